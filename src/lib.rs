pub mod analysis;
pub mod cli;
pub mod commands;
pub mod error;
pub mod models;

use clap::Parser;
use cli::Cli;

pub fn run() -> error::Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.quiet);
    cli::execute(cli)
}
