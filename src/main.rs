use std::process::ExitCode;

fn main() -> ExitCode {
    match boxroute_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
