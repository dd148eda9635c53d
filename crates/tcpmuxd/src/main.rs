use std::io::{self, Write};
use std::process::ExitCode;

use tcpmux_config::Config;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            if error.print().is_err() {
                return ExitCode::FAILURE;
            }
            return if error.is_informational() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    match tcpmuxd::run_daemon(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Nothing more can be reported if stderr itself is gone.
            let _ = writeln!(io::stderr(), "tcpmuxd: {error}");
            ExitCode::FAILURE
        }
    }
}
