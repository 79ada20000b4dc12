//! Exclusion rules applied while watching the source tree.
//!
//! Both lists are substring fragments, not globs: a directory is skipped when
//! its full path contains any directory fragment, and a change event is
//! ignored when the changed file's name contains any filename fragment. This
//! keeps editor droppings and build output from restarting the runner.

use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_EXCLUDE_DIRS, DEFAULT_EXCLUDE_FILES};

/// Path and filename fragments excluded from change watching.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WatchRules {
    /// Fragments matched against full directory paths.
    pub exclude_dirs: Vec<String>,
    /// Fragments matched against changed file names.
    pub exclude_files: Vec<String>,
}

impl Default for WatchRules {
    fn default() -> Self {
        Self {
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_owned()).collect(),
            exclude_files: DEFAULT_EXCLUDE_FILES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl WatchRules {
    /// Returns true when the directory path contains any excluded fragment.
    #[must_use]
    pub fn excludes_dir(&self, path: &str) -> bool {
        self.exclude_dirs.iter().any(|fragment| path.contains(fragment))
    }

    /// Returns true when the file name contains any excluded fragment.
    #[must_use]
    pub fn excludes_file(&self, filename: &str) -> bool {
        self.exclude_files
            .iter()
            .any(|fragment| filename.contains(fragment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_skip_vcs_and_build_output() {
        let rules = WatchRules::default();
        assert!(rules.excludes_dir("/home/dev/project/.git/objects"));
        assert!(rules.excludes_dir("/home/dev/project/target/debug"));
        assert!(!rules.excludes_dir("/home/dev/project/src"));
    }

    #[test]
    fn default_rules_skip_editor_droppings() {
        let rules = WatchRules::default();
        assert!(rules.excludes_file(".#server.rs"));
        assert!(rules.excludes_file("lib.rs.swp"));
        assert!(!rules.excludes_file("lib.rs"));
    }

    #[test]
    fn empty_rules_exclude_nothing() {
        let rules = WatchRules {
            exclude_dirs: Vec::new(),
            exclude_files: Vec::new(),
        };
        assert!(!rules.excludes_dir("/anything/.git"));
        assert!(!rules.excludes_file(".#anything"));
    }
}
