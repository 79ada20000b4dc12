//! Default values shared by the daemon and its clients.

use crate::endpoint::ListenEndpoint;

/// Default TCP port the daemon listens on.
pub const DEFAULT_TCP_PORT: u16 = 25000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory path fragments excluded from watch registration by default.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] =
    &["/.git", "/.tox", "/.eggs", "/__pycache__", "/target", "/doc"];

/// File name fragments whose changes never trigger a restart by default.
pub const DEFAULT_EXCLUDE_FILES: &[&str] = &[".#", ".pyc", ".swp", "~"];

/// Command used to spawn the execution collaborator when none is configured.
pub const DEFAULT_RUNNER_COMMAND: &str = "ttr-runner";

/// Computes the default listen endpoint for the daemon.
#[must_use]
pub fn default_listen_endpoint() -> ListenEndpoint {
    ListenEndpoint::new("127.0.0.1", DEFAULT_TCP_PORT)
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}
