//! Warm test-runner daemon.
//!
//! `ttrd` keeps a catalogue of tests loaded in a runner subprocess and
//! re-runs selected tests on demand over a small TCP protocol, restarting
//! the runner whenever watched source files change. One single-threaded
//! supervisor owns the listening socket, the runner handle, and a control
//! channel fed by the file-watch notifier and by an OS signal bridge;
//! client connections are served strictly sequentially.
//!
//! The wire protocol frames requests with a fixed end marker
//! (`run_tests|<ids>---`, `list_tests|<filter>---`); responses are the raw
//! report bytes with no framing. The duplex stdin/stdout channel to the
//! runner carries length-prefixed messages instead, since run reports can
//! contain the marker bytes. This crate ships `ttr-runner`, a reference
//! runner backed by a manifest file.

pub mod catalog;
pub mod control;
pub mod process;
pub mod protocol;
pub mod runner;
pub mod supervisor;
pub mod telemetry;
pub mod watcher;

pub use process::{LaunchError, LaunchMode, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};
