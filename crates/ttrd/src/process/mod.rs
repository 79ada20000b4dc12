//! Daemon process supervision: backgrounding, pid/lock management, and the
//! launch sequence wiring all collaborators together.

mod errors;
mod guard;
mod launch;

pub use errors::{DaemonizeError, GuardError, LaunchError};
pub use launch::{LaunchMode, run_daemon};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

const FOREGROUND_ENV_VAR: &str = "TTR_FOREGROUND";
