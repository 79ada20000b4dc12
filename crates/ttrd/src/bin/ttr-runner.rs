//! Reference runner collaborator.
//!
//! Speaks the daemon's runner channel over stdin/stdout: each request
//! arrives as a length-prefixed `<command>|<payload>` message and each
//! response goes back the same way. The catalogue is loaded once at
//! startup from a manifest file given as the first argument (one test id
//! per line), mirroring the warm state a real runner would hold in memory.

use std::env;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use tracing::{debug, warn};

use ttrd::catalog::{self, TestCatalog};
use ttrd::protocol::{MessageReader, Request, write_message};

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();

    let Some(manifest) = env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: ttr-runner <manifest>");
        return ExitCode::FAILURE;
    };
    let catalog = match TestCatalog::load(&manifest) {
        Ok(catalog) => catalog,
        Err(error) => {
            eprintln!("ttr-runner: {error}");
            return ExitCode::FAILURE;
        }
    };
    debug!(tests = catalog.len(), "catalogue loaded");

    match serve(&catalog, io::stdin().lock(), io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ttr-runner: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Answers requests until the peer closes the stream.
fn serve<R: Read, W: Write>(
    catalog: &TestCatalog,
    input: R,
    mut output: W,
) -> io::Result<()> {
    let mut requests = MessageReader::new(input);
    while let Some(frame) = requests.next_message()? {
        let response = match Request::parse(&frame) {
            Ok(Request::RunTests(ids)) => {
                let started = Instant::now();
                let selected = catalog.select_exact(&ids);
                catalog::render_run_report(&selected, started.elapsed())
            }
            Ok(Request::ListTests(filter)) => {
                catalog::render_listing(&catalog.select_matching(&filter))
            }
            Err(error) => {
                // Malformed frames that slipped past the daemon are dropped
                // without a response, matching the daemon's own policy.
                warn!(%error, "dropping malformed request");
                continue;
            }
        };
        write_message(&mut output, response.as_bytes())?;
    }
    Ok(())
}
