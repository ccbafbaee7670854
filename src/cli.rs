use crate::commands::export::export_recommendations;
use crate::commands::session::{Change, Session};
use crate::commands::settings::{
    load_engine_settings, load_settings_from_disk, update_setting, EngineSettings,
};
use crate::error::{EngineError, Result};
use crate::models::box_record::{BoxUpdate, NewBox};
use crate::models::score::Recommendation;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "boxroute")]
#[command(about = "Ranks collection boxes for the next pickup round", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding settings.json, the catalog and the visit ledger
    #[arg(long, global = true, default_value = ".")]
    pub data_dir: PathBuf,

    /// Log only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the boxes worth visiting next, best first
    Recommend(RecommendArgs),
    /// Score breakdown and history for one box
    Details { id: u32 },
    /// Record a visit to a box
    Visit {
        id: u32,
        /// Observed fill level (0-10)
        #[arg(long)]
        fill: Option<f64>,
    },
    /// Add a box to the catalog
    Add(AddArgs),
    /// Remove a box and its visit history
    Remove { id: u32 },
    /// Change catalog fields of a box
    Update(UpdateArgs),
    /// Forget every recorded visit
    Reset,
    /// Catalog-wide statistics
    Stats,
    /// Boxes with a recorded visit, most recent first
    Visited,
    /// Every box with its current score
    List {
        /// Case-insensitive match on address or id
        #[arg(long)]
        search: Option<String>,
    },
    /// Show or change settings.json
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Set one key, e.g. `config set maxBoxes 30` or `config set ledgerBackend sqlite`
    Set { key: String, value: String },
}

#[derive(Args)]
pub struct RecommendArgs {
    /// Maximum number of boxes (defaults to maxBoxes from settings)
    #[arg(long)]
    pub max: Option<usize>,

    /// Minimum profitability score (defaults to minScore from settings)
    #[arg(long)]
    pub min_score: Option<f64>,

    /// Also write the round as a delivery CSV
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct AddArgs {
    pub id: u32,
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub municipality: String,
    #[arg(long)]
    pub postal_code: String,
    #[arg(long)]
    pub container_type: String,
    #[arg(long)]
    pub average_fill: f64,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: u32,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub municipality: Option<String>,
    #[arg(long)]
    pub postal_code: Option<String>,
    #[arg(long)]
    pub container_type: Option<String>,
    #[arg(long)]
    pub average_fill: Option<f64>,
}

pub fn init_logging(quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        // Settings can be edited before a catalog exists.
        Commands::Config(command) => configure(&cli.data_dir, command),
        command => {
            let settings = load_engine_settings(&cli.data_dir)?;
            let mut session = Session::open(&settings)?;
            dispatch(&mut session, &settings, command)
        }
    }
}

pub fn dispatch(
    session: &mut Session,
    settings: &EngineSettings,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Recommend(args) => {
            let max = args.max.unwrap_or(settings.max_boxes);
            let min_score = args.min_score.unwrap_or(settings.min_score);
            let round = session.engine_mut().recommended_boxes(max, min_score);

            if let Some(path) = &args.export {
                let today = session.engine().now().date_naive();
                let rows = export_recommendations(path, &round, today)?;
                info!("Exported {rows} boxes to {}", path.display());
            }

            if args.json {
                print_json(&round)?;
            } else {
                print_round(&round);
            }
        }
        Commands::Details { id } => print_json(&session.engine_mut().box_details(id)?)?,
        Commands::Visit { id, fill } => {
            let (record, failure) = session.record_visit(id, fill)?;
            print_json(&record)?;
            report_unsaved(failure);
        }
        Commands::Add(args) => {
            let added = session.engine_mut().add_box(NewBox {
                id: args.id,
                address: args.address,
                municipality: args.municipality,
                postal_code: args.postal_code,
                container_type: args.container_type,
                average_fill: args.average_fill,
            })?;
            print_json(&added)?;
            report_unsaved(session.commit(Change::Catalog).err());
        }
        Commands::Remove { id } => {
            let removed = session.engine_mut().remove_box(id)?;
            print_json(&removed)?;
            report_unsaved(session.commit(Change::CatalogAndLedger).err());
        }
        Commands::Update(args) => {
            let update = BoxUpdate {
                address: args.address,
                municipality: args.municipality,
                postal_code: args.postal_code,
                container_type: args.container_type,
                average_fill: args.average_fill,
                weekly_fill: None,
            };
            if update.is_empty() {
                return Err(EngineError::InvalidInput("nothing to update".to_string()));
            }
            let updated = session.engine_mut().update_box(args.id, update)?;
            print_json(&updated)?;
            report_unsaved(session.commit(Change::Catalog).err());
        }
        Commands::Reset => {
            let cleared = session.engine_mut().reset_visits();
            println!("Cleared visits for {cleared} boxes");
            report_unsaved(session.commit(Change::Ledger).err());
        }
        Commands::Stats => print_json(&session.engine().stats())?,
        Commands::Visited => print_json(&session.engine().visited_boxes())?,
        Commands::List { search } => {
            print_json(&session.engine_mut().all_boxes(search.as_deref()))?
        }
        Commands::Config(command) => configure(&settings.data_dir, command)?,
    }
    Ok(())
}

pub fn configure(data_dir: &Path, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => print_json(&load_settings_from_disk(data_dir)?),
        ConfigCommand::Set { key, value } => {
            let stored = update_setting(data_dir, &key, parse_setting_value(&value))?;
            info!("{key} set to {stored}");
            print_json(&stored)
        }
    }
}

/// JSON literals (`30`, `12.5`, `true`) are taken as-is, anything else as a string.
fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn report_unsaved(failure: Option<EngineError>) {
    if let Some(e) = failure {
        error!("Change applied but not saved: {e}");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_round(round: &[Recommendation]) {
    if round.is_empty() {
        println!("No box meets the score threshold");
        return;
    }

    println!(
        "{:>4}  {:>6}  {:>6}  {:>5}  {:>6}  {}",
        "rank", "box", "score", "fill", "days", "address"
    );
    for (rank, rec) in round.iter().enumerate() {
        let days = rec
            .days_since_last_visit
            .map_or_else(|| "never".to_string(), |d| d.to_string());
        println!(
            "{:>4}  {:>6}  {:>6.1}  {:>5.1}  {:>6}  {}, {}",
            rank + 1,
            rec.box_id,
            rec.profitability_score,
            rec.expected_fill,
            days,
            rec.address,
            rec.municipality
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn run_in(dir: &Path, args: &[&str]) -> Result<()> {
        let data_dir = dir.to_string_lossy().to_string();
        let mut argv = vec!["boxroute", "--data-dir", data_dir.as_str()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).expect("valid arguments");
        execute(cli)
    }

    #[test]
    fn setting_values_parse_as_json_or_text() {
        assert_eq!(parse_setting_value("30"), serde_json::json!(30));
        assert_eq!(parse_setting_value("12.5"), serde_json::json!(12.5));
        assert_eq!(parse_setting_value("sqlite"), serde_json::json!("sqlite"));
        assert_eq!(parse_setting_value("Europe/Zurich"), serde_json::json!("Europe/Zurich"));
    }

    #[test]
    fn config_set_works_without_a_catalog() {
        let dir = tempfile::tempdir().expect("temp dir");

        run_in(dir.path(), &["config", "set", "maxBoxes", "35"]).expect("config set");
        run_in(dir.path(), &["config", "set", "ledgerBackend", "sqlite"]).expect("config set");

        let settings = load_engine_settings(dir.path()).expect("settings");
        assert_eq!(settings.max_boxes, 35);
        assert_eq!(settings.ledger_backend, crate::commands::settings::LedgerBackend::Sqlite);
        assert!(run_in(dir.path(), &["config", "set", "noSuchKey", "1"]).is_err());
    }

    #[test]
    fn mutating_commands_write_the_catalog_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(
            dir.path().join("ml_boxes_ready.csv"),
            "n_boite,adresse,commune,cp,conteneur,volume_moyen,semaine_1,route\n\
             1,Rue A 1,Nyon,1260,Textile,6,5,north\n",
        )
        .expect("write catalog");

        run_in(dir.path(), &["update", "1", "--average-fill", "8"]).expect("update");
        run_in(
            dir.path(),
            &[
                "add", "2", "--address", "Rue B 2", "--municipality", "Gland", "--postal-code", "1196",
                "--container-type", "Shoes", "--average-fill", "4",
            ],
        )
        .expect("add");

        let written = fs::read_to_string(dir.path().join("ml_boxes_ready.csv")).expect("catalog");
        assert_eq!(
            written.lines().collect::<Vec<_>>(),
            vec![
                "n_boite,adresse,commune,cp,conteneur,volume_moyen,semaine_1,route",
                "1,Rue A 1,Nyon,1260,Textile,8,5,north",
                "2,Rue B 2,Gland,1196,Shoes,4,,",
            ]
        );
        assert!(run_in(dir.path(), &["update", "1"]).is_err());
    }
}
