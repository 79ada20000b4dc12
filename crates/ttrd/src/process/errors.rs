//! Error types for process supervision and daemon launch.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use ttr_config::{ConfigError, RuntimePathsError};

use crate::control::ControlError;
use crate::supervisor::SupervisorError;
use crate::telemetry::TelemetryError;
use crate::watcher::WatchError;
use crate::watcher::notifier::NotifierError;

/// Errors surfaced while acquiring the singleton guard.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running daemon already holds the lock.
    #[error("daemon already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale runtime artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Attempting to probe an existing PID failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID that failed to probe.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[from]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[from]
        source: TelemetryError,
    },
    /// Runtime paths could not be derived.
    #[error("failed to derive runtime paths: {source}")]
    RuntimePaths {
        /// Underlying path error.
        #[from]
        source: RuntimePathsError,
    },
    /// The singleton guard could not be acquired.
    #[error(transparent)]
    Guard(#[from] GuardError),
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[from]
        source: DaemonizeError,
    },
    /// The signal bridge could not be installed.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// The watch tree could not be built.
    #[error(transparent)]
    Watch(#[from] WatchError),
    /// The change notifier could not be started.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    /// The supervisor failed to start or run.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
