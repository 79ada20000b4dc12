//! Control events driving the supervisor's event loop.
//!
//! All asynchronous stimuli — file changes from the notifier and OS signals
//! from external controllers — arrive as explicit messages on one channel,
//! which the supervisor drains between blocking socket operations. OS
//! signals are retained only at the process boundary: the bridge thread
//! translates them into control events.

use std::io;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{info, warn};

const CONTROL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::control");

/// Messages consumed by the supervisor's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Replace the runner subprocess with a fresh one.
    Restart,
    /// Stop accepting connections and tear everything down.
    Shutdown,
}

/// Errors reported while installing the signal bridge.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the bridge thread failed.
    #[error("failed to spawn signal bridge thread: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Bridges OS signals into the control channel.
///
/// `SIGHUP` requests a runner restart; `SIGTERM`, `SIGINT`, and `SIGQUIT`
/// request shutdown. The bridge thread ends when the handle is closed on
/// drop or when the control channel is gone.
pub struct SignalBridge {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalBridge {
    /// Installs the signal handlers and starts the bridge thread.
    pub fn install(sender: Sender<ControlEvent>) -> Result<Self, ControlError> {
        let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])
            .map_err(|source| ControlError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("ttr-signal-bridge".to_owned())
            .spawn(move || forward_signals(&mut signals, &sender))
            .map_err(|source| ControlError::Thread { source })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: CONTROL_TARGET, "signal bridge thread panicked");
        }
    }
}

fn forward_signals(signals: &mut Signals, sender: &Sender<ControlEvent>) {
    for signal in signals.forever() {
        let event = if signal == SIGHUP {
            ControlEvent::Restart
        } else {
            ControlEvent::Shutdown
        };
        info!(target: CONTROL_TARGET, signal, ?event, "signal received");
        if sender.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[cfg(unix)]
    #[test]
    fn sighup_becomes_a_restart_event() {
        let (sender, receiver) = mpsc::channel();
        let _bridge = SignalBridge::install(sender).expect("install bridge");

        nix::sys::signal::kill(
            nix::unistd::Pid::this(),
            nix::sys::signal::Signal::SIGHUP,
        )
        .expect("deliver SIGHUP");

        let event = receiver
            .recv_timeout(Duration::from_secs(2))
            .expect("bridge should forward the signal");
        assert_eq!(event, ControlEvent::Restart);
    }
}
