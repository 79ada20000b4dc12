//! File-system change watching.
//!
//! [`tree::WatchTree`] installs exclusion-aware modify-watches over the
//! source tree and exposes changes as a lazy event sequence;
//! [`notifier::ChangeNotifier`] filters those events by filename and turns
//! the survivors into restart requests on the supervisor's control channel.

pub mod notifier;
pub mod tree;

pub use notifier::ChangeNotifier;
pub use tree::{ChangeEvent, WatchError, WatchTree};

pub(crate) const WATCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::watcher");
