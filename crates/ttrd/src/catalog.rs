//! Immutable test catalogue and per-request selection.
//!
//! The runner loads the full catalogue once at startup; every request then
//! operates on a filtered view. Selection borrows from the catalogue and
//! never mutates it, so no filter application can leak into a later request
//! with a different filter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// The full, unfiltered set of test identifiers known to a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCatalog {
    ids: Vec<String>,
}

impl TestCatalog {
    /// Builds a catalogue from a list of test ids.
    #[must_use]
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    /// Loads a catalogue from a manifest file, one test id per line.
    ///
    /// Blank lines and surrounding whitespace are ignored.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ids = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self::new(ids))
    }

    /// Number of tests in the catalogue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the catalogue holds no tests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selects tests by exact id match, preserving catalogue order.
    ///
    /// Ids not present in the catalogue are ignored; duplicate requested ids
    /// select a test once.
    #[must_use]
    pub fn select_exact(&self, requested: &[String]) -> Vec<&str> {
        self.ids
            .iter()
            .filter(|id| requested.iter().any(|wanted| wanted == *id))
            .map(String::as_str)
            .collect()
    }

    /// Selects tests whose id contains the given substring.
    #[must_use]
    pub fn select_matching(&self, filter: &str) -> Vec<&str> {
        self.ids
            .iter()
            .filter(|id| id.contains(filter))
            .map(String::as_str)
            .collect()
    }
}

/// Errors raised while loading a catalogue manifest.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The manifest file could not be read.
    #[error("failed to read test manifest '{path}': {source}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Renders a run report in the familiar test-runner shape.
///
/// The summary line reads `Ran N test(s) in X.XXXs` so clients can grep for
/// the executed count.
#[must_use]
pub fn render_run_report(selected: &[&str], elapsed: Duration) -> String {
    let mut report = String::new();
    for id in selected {
        report.push_str(id);
        report.push_str(" ... ok\n");
    }
    let noun = if selected.len() == 1 { "test" } else { "tests" };
    report.push_str(&format!(
        "----------------------------------------------------------------------\nRan {} {} in {:.3}s\n\nOK\n",
        selected.len(),
        noun,
        elapsed.as_secs_f64(),
    ));
    report
}

/// Renders a listing response: matching ids joined by newline, or a single
/// space when nothing matched.
#[must_use]
pub fn render_listing(matches: &[&str]) -> String {
    if matches.is_empty() {
        " ".to_owned()
    } else {
        matches.join("\n")
    }
}
