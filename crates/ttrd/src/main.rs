//! Binary entry point for the warm test-runner daemon.

use std::process::ExitCode;

fn main() -> ExitCode {
    match ttrd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ttrd: {error}");
            ExitCode::FAILURE
        }
    }
}
