//! Applies pending SQL migrations.
//!
//! Exits 0 when every pending migration applied (or none were pending), 1 on
//! the first failure.

use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match tasklist_scripts::init_script() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    tasklist_scripts::migrate::run(&config).into()
}
