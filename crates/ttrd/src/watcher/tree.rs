//! Exclusion-aware registration of modify-watches over a directory tree.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, warn};

use ttr_config::WatchRules;

use super::WATCHER_TARGET;

/// A single qualifying file-system change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Full path of the changed file.
    pub path: PathBuf,
}

impl ChangeEvent {
    /// Name of the changed file, when representable as UTF-8.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Modify-watches over a directory tree, minus excluded subtrees.
///
/// The set of watched directories is a static snapshot taken at build time;
/// directories created afterwards are not watched. Events form a lazy,
/// unbounded sequence that ends only when the tree is dropped.
#[derive(Debug)]
pub struct WatchTree {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    watched: Vec<PathBuf>,
}

impl WatchTree {
    /// Registers modify-watches across the tree rooted at `root`.
    ///
    /// The traversal is an iterative breadth-first walk with an explicit
    /// queue, so arbitrarily deep trees cannot exhaust the stack. A child
    /// directory is enqueued only when its full path contains none of the
    /// configured exclude fragments. Canonicalised paths already visited are
    /// skipped, which also terminates cyclic symlink graphs.
    pub fn build(root: &Path, rules: &WatchRules) -> Result<Self, WatchError> {
        let (sender, events) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = sender.send(result);
        })
        .map_err(|source| WatchError::Init { source })?;

        let mut watched = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue = VecDeque::from([root.to_path_buf()]);
        while let Some(dir) = queue.pop_front() {
            let canonical = fs::canonicalize(&dir).map_err(|source| WatchError::Enumerate {
                path: dir.clone(),
                source,
            })?;
            if !visited.insert(canonical) {
                continue;
            }

            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Register {
                    path: dir.clone(),
                    source,
                })?;
            watched.push(dir.clone());

            let entries = fs::read_dir(&dir).map_err(|source| WatchError::Enumerate {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| WatchError::Enumerate {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if rules.excludes_dir(&path.to_string_lossy()) {
                    debug!(
                        target: WATCHER_TARGET,
                        path = %path.display(),
                        "skipping excluded subtree"
                    );
                    continue;
                }
                queue.push_back(path);
            }
        }

        debug!(
            target: WATCHER_TARGET,
            root = %root.display(),
            directories = watched.len(),
            "installed watch tree"
        );
        Ok(Self {
            _watcher: watcher,
            events,
            watched,
        })
    }

    /// Directories carrying a watch registration.
    #[must_use]
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Waits up to `timeout` for the next modify event.
    ///
    /// Returns `None` on timeout; callers poll in a loop so they can check
    /// for shutdown between waits. Watch backend errors are logged and
    /// skipped.
    pub fn poll_event(&self, timeout: Duration) -> Result<Option<ChangeEvent>, WatchError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(Ok(event)) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }
                    let Some(path) = event.paths.into_iter().next() else {
                        continue;
                    };
                    return Ok(Some(ChangeEvent { path }));
                }
                Ok(Err(error)) => {
                    warn!(target: WATCHER_TARGET, %error, "watch backend error");
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(WatchError::Closed),
            }
        }
    }

    /// Lazy, unbounded sequence of change events.
    ///
    /// The iterator blocks between events and never ends on its own; it
    /// terminates only when the backing watcher shuts down.
    pub fn events(&self) -> impl Iterator<Item = ChangeEvent> + '_ {
        std::iter::from_fn(move || loop {
            match self.poll_event(Duration::from_secs(1)) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => continue,
                Err(_) => return None,
            }
        })
    }
}

/// Errors raised while building or polling the watch tree.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watch backend could not be created.
    #[error("failed to initialise file watcher: {source}")]
    Init {
        /// Underlying notify error.
        #[source]
        source: notify::Error,
    },
    /// A directory watch could not be registered.
    #[error("failed to watch directory '{path}': {source}")]
    Register {
        /// Directory that failed to register.
        path: PathBuf,
        /// Underlying notify error.
        #[source]
        source: notify::Error,
    },
    /// A directory could not be enumerated during the traversal.
    #[error("failed to enumerate directory '{path}': {source}")]
    Enumerate {
        /// Directory that failed to enumerate.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watch backend shut down and no further events will arrive.
    #[error("watch event stream closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn tree_fixture() -> TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("src/nested")).expect("create src");
        fs::create_dir_all(dir.path().join(".git/objects")).expect("create .git");
        fs::create_dir_all(dir.path().join("target/debug")).expect("create target");
        File::create(dir.path().join("src/lib.rs")).expect("create file");
        dir
    }

    #[test]
    fn excluded_subtrees_get_no_watch_registration() {
        let dir = tree_fixture();
        let tree = WatchTree::build(dir.path(), &WatchRules::default()).expect("build tree");

        let watched: Vec<String> = tree
            .watched_dirs()
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        assert!(watched.iter().any(|path| path.ends_with("src")));
        assert!(watched.iter().any(|path| path.ends_with("src/nested")));
        assert!(!watched.iter().any(|path| path.contains(".git")));
        assert!(!watched.iter().any(|path| path.contains("target")));
    }

    #[test]
    fn modify_in_watched_directory_yields_an_event() {
        let dir = tree_fixture();
        let file = dir.path().join("src/lib.rs");
        let tree = WatchTree::build(dir.path(), &WatchRules::default()).expect("build tree");

        let mut handle = File::options().append(true).open(&file).expect("open file");
        writeln!(handle, "// changed").expect("write file");
        handle.sync_all().expect("sync");

        let event = tree
            .poll_event(Duration::from_secs(5))
            .expect("event stream healthy")
            .expect("change should surface");
        assert_eq!(event.file_name(), Some("lib.rs"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate_the_traversal() {
        let dir = tree_fixture();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("src/loop"))
            .expect("create cyclic symlink");
        // Termination is the property under test; build would hang forever
        // without the visited-set guard.
        let tree = WatchTree::build(dir.path(), &WatchRules::default()).expect("build tree");
        assert!(!tree.watched_dirs().is_empty());
    }
}
