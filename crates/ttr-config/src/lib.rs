//! Shared configuration for the `ttr` warm test-runner daemon.
//!
//! The daemon and any external controllers need to agree on the listen
//! endpoint, the watched tree and its exclusion rules, the runner command,
//! and the runtime artefact layout. Everything is loaded from environment
//! variables over typed defaults; command-line parsing is deliberately out
//! of scope and handled by whatever launches the daemon.
//!
//! Recognised variables: `TTR_LISTEN` (`tcp://host:port`), `TTR_WATCH_ROOT`,
//! `TTR_RUNNER` (whitespace-separated command), `TTR_EXCLUDE_DIRS` and
//! `TTR_EXCLUDE_FILES` (comma-separated fragments), `TTR_LOG_FILTER`, and
//! `TTR_LOG_FORMAT` (`compact` or `json`).

mod defaults;
mod endpoint;
mod logging;
mod runtime;
mod watch;

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_EXCLUDE_DIRS, DEFAULT_EXCLUDE_FILES, DEFAULT_LOG_FILTER, DEFAULT_RUNNER_COMMAND,
    DEFAULT_TCP_PORT, default_listen_endpoint, default_log_filter_string,
};
pub use endpoint::{EndpointParseError, ListenEndpoint};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use watch::WatchRules;

/// Resolved daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Endpoint the daemon listens on.
    pub listen: ListenEndpoint,
    /// Root of the tree watched for changes.
    pub watch_root: PathBuf,
    /// Exclusion rules applied while watching.
    pub watch_rules: WatchRules,
    /// Command spawned as the execution collaborator.
    pub runner_command: Vec<String>,
    /// Filter expression handed to the tracing subscriber.
    pub log_filter: String,
    /// Output format for structured logs.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            watch_root: PathBuf::from("."),
            watch_rules: WatchRules::default(),
            runner_command: vec![DEFAULT_RUNNER_COMMAND.to_owned()],
            log_filter: default_log_filter_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| env::var_os(name))
    }

    /// Loads the configuration from an arbitrary variable lookup.
    ///
    /// Exposed so tests can exercise override handling without mutating the
    /// process environment.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Self::default();

        if let Some(raw) = unicode_var(&lookup, "TTR_LISTEN")? {
            config.listen = raw
                .parse()
                .map_err(|source| ConfigError::InvalidListen { value: raw, source })?;
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_WATCH_ROOT")? {
            config.watch_root = PathBuf::from(raw);
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_RUNNER")? {
            let command: Vec<String> = raw.split_whitespace().map(str::to_owned).collect();
            if command.is_empty() {
                return Err(ConfigError::EmptyRunnerCommand);
            }
            config.runner_command = command;
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_EXCLUDE_DIRS")? {
            config.watch_rules.exclude_dirs = split_fragments(&raw);
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_EXCLUDE_FILES")? {
            config.watch_rules.exclude_files = split_fragments(&raw);
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_LOG_FILTER")? {
            config.log_filter = raw;
        }
        if let Some(raw) = unicode_var(&lookup, "TTR_LOG_FORMAT")? {
            config.log_format = raw
                .parse()
                .map_err(|source| ConfigError::InvalidLogFormat { value: raw, source })?;
        }

        Ok(config)
    }
}

fn unicode_var<F>(lookup: &F, name: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .into_string()
            .map(Some)
            .map_err(|_| ConfigError::NonUnicode { name }),
    }
}

fn split_fragments(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The listen endpoint override did not parse.
    #[error("invalid TTR_LISTEN value '{value}': {source}")]
    InvalidListen {
        /// Raw override value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: EndpointParseError,
    },
    /// The log format override did not parse.
    #[error("invalid TTR_LOG_FORMAT value '{value}': {source}")]
    InvalidLogFormat {
        /// Raw override value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: LogFormatParseError,
    },
    /// The runner command override contained no words.
    #[error("TTR_RUNNER must contain at least one word")]
    EmptyRunnerCommand,
    /// An override variable held non-unicode bytes.
    #[error("environment variable {name} is not valid unicode")]
    NonUnicode {
        /// Name of the offending variable.
        name: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).map(OsString::from)
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let config = Config::load_from(|_| None).expect("load defaults");
        assert_eq!(config.listen, ListenEndpoint::new("127.0.0.1", 25000));
        assert_eq!(config.runner_command, vec!["ttr-runner".to_owned()]);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn overrides_take_precedence() {
        let lookup = lookup_from(&[
            ("TTR_LISTEN", "tcp://0.0.0.0:4100"),
            ("TTR_RUNNER", "python -m warmrunner"),
            ("TTR_EXCLUDE_DIRS", "/.git, /node_modules"),
            ("TTR_LOG_FORMAT", "json"),
        ]);
        let config = Config::load_from(lookup).expect("load overrides");
        assert_eq!(config.listen, ListenEndpoint::new("0.0.0.0", 4100));
        assert_eq!(
            config.runner_command,
            vec!["python".to_owned(), "-m".to_owned(), "warmrunner".to_owned()]
        );
        assert_eq!(
            config.watch_rules.exclude_dirs,
            vec!["/.git".to_owned(), "/node_modules".to_owned()]
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[rstest]
    #[case("not-a-url")]
    #[case("http://127.0.0.1:4100")]
    #[case("tcp://127.0.0.1")]
    fn rejects_bad_listen_values(#[case] raw: &str) {
        let lookup = lookup_from(&[("TTR_LISTEN", raw)]);
        let error = Config::load_from(lookup).expect_err("should reject listen value");
        assert!(matches!(error, ConfigError::InvalidListen { .. }));
    }

    #[test]
    fn rejects_blank_runner_command() {
        let lookup = lookup_from(&[("TTR_RUNNER", "   ")]);
        let error = Config::load_from(lookup).expect_err("should reject runner");
        assert!(matches!(error, ConfigError::EmptyRunnerCommand));
    }
}
