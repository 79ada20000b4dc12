//! Launch sequencing for the daemon runtime.

use std::env;
use std::ffi::OsStr;
use std::sync::mpsc;

use daemonize_me::Daemon;
use tracing::info;

use ttr_config::{Config, RuntimePaths};

use crate::control::SignalBridge;
use crate::supervisor::Supervisor;
use crate::telemetry;
use crate::watcher::{ChangeNotifier, WatchTree};

use super::errors::{DaemonizeError, LaunchError};
use super::guard::ProcessGuard;
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Runs the daemon: configuration, telemetry, singleton guard, watcher,
/// signal bridge, and finally the supervisor's accept loop.
///
/// Returns once a shutdown event has been observed and both collaborators
/// are torn down. Only startup failures and a failed runner respawn surface
/// as errors.
pub fn run_daemon() -> Result<(), LaunchError> {
    let config = Config::load()?;
    telemetry::initialise(&config)?;
    let mode = LaunchMode::detect();
    info!(
        target: PROCESS_TARGET,
        ?mode,
        endpoint = %config.listen,
        "starting daemon runtime"
    );

    let guard = ProcessGuard::acquire(RuntimePaths::resolve()?)?;
    if matches!(mode, LaunchMode::Background) {
        daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;

    let (control_sender, control_receiver) = mpsc::channel();
    let _signals = SignalBridge::install(control_sender.clone())?;

    let tree = WatchTree::build(&config.watch_root, &config.watch_rules)?;
    let _notifier = ChangeNotifier::spawn(tree, config.watch_rules.clone(), control_sender)?;

    let supervisor = Supervisor::new(&config, control_receiver)?;
    supervisor.run()?;

    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn daemonize(paths: &RuntimePaths) -> Result<(), DaemonizeError> {
    info!(
        target: PROCESS_TARGET,
        runtime = %paths.runtime_dir().display(),
        "daemonising into background"
    );
    let mut daemon = Daemon::new();
    daemon = daemon.work_dir(paths.runtime_dir());
    daemon = daemon.name(OsStr::new(env!("CARGO_PKG_NAME")));
    daemon.start()?;
    info!(
        target: PROCESS_TARGET,
        "daemon process detached; continuing in child"
    );
    Ok(())
}
