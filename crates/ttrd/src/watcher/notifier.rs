//! Turns qualifying change events into runner restart requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use ttr_config::WatchRules;

use crate::control::ControlEvent;

use super::WATCHER_TARGET;
use super::tree::WatchTree;

const EVENT_POLL: Duration = Duration::from_millis(200);

/// Background thread consuming watch events and requesting restarts.
///
/// Delivery is fire-and-forget: every qualifying event independently sends a
/// restart request, with no debouncing. The thread stops when the notifier
/// is dropped or the control channel closes.
pub struct ChangeNotifier {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ChangeNotifier {
    /// Starts the notifier over an already-built watch tree.
    pub fn spawn(
        tree: WatchTree,
        rules: WatchRules,
        control: Sender<ControlEvent>,
    ) -> Result<Self, NotifierError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("ttr-notifier".to_owned())
            .spawn(move || run_notifier(&tree, &rules, &control, &flag))
            .map_err(|source| NotifierError::Thread { source })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: WATCHER_TARGET, "notifier thread panicked");
        }
    }
}

fn run_notifier(
    tree: &WatchTree,
    rules: &WatchRules,
    control: &Sender<ControlEvent>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        let event = match tree.poll_event(EVENT_POLL) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(error) => {
                warn!(target: WATCHER_TARGET, %error, "watch stream ended");
                return;
            }
        };
        let Some(name) = event.file_name() else {
            continue;
        };
        if rules.excludes_file(name) {
            debug!(
                target: WATCHER_TARGET,
                path = %event.path.display(),
                "ignoring excluded file change"
            );
            continue;
        }
        info!(
            target: WATCHER_TARGET,
            path = %event.path.display(),
            "change detected; requesting runner restart"
        );
        if control.send(ControlEvent::Restart).is_err() {
            return;
        }
    }
}

/// Errors raised while starting the notifier.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// Spawning the notifier thread failed.
    #[error("failed to spawn notifier thread: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::mpsc;

    use tempfile::TempDir;

    use super::*;

    struct NotifierFixture {
        _notifier: ChangeNotifier,
        events: mpsc::Receiver<ControlEvent>,
        dir: TempDir,
    }

    fn notifier_fixture() -> NotifierFixture {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir(dir.path().join("src")).expect("create src");
        File::create(dir.path().join("src/lib.rs")).expect("create file");

        let rules = WatchRules::default();
        let tree = WatchTree::build(dir.path(), &rules).expect("build tree");
        let (sender, events) = mpsc::channel();
        let notifier = ChangeNotifier::spawn(tree, rules, sender).expect("spawn notifier");
        NotifierFixture {
            _notifier: notifier,
            events,
            dir,
        }
    }

    fn touch(fixture: &NotifierFixture, name: &str) {
        let path = fixture.dir.path().join("src").join(name);
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .expect("open file");
        writeln!(file, "x").expect("write file");
        file.sync_all().expect("sync");
    }

    #[test]
    fn source_change_triggers_a_restart_request() {
        let fixture = notifier_fixture();
        touch(&fixture, "lib.rs");
        let event = fixture
            .events
            .recv_timeout(Duration::from_secs(5))
            .expect("restart request should arrive");
        assert_eq!(event, ControlEvent::Restart);
    }

    #[test]
    fn excluded_file_change_is_ignored() {
        let fixture = notifier_fixture();
        touch(&fixture, ".#lib.rs");
        let outcome = fixture.events.recv_timeout(Duration::from_millis(600));
        assert!(outcome.is_err(), "editor droppings must not restart");
    }
}
