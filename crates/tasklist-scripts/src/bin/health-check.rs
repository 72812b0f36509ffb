//! Verifies the database is reachable and prints basic diagnostics.
//!
//! Exits 0 when the database answers, 1 when it cannot be reached.

use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match tasklist_scripts::init_script() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    tasklist_scripts::health_check::run(&config).into()
}
