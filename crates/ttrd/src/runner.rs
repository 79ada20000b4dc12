//! Lifecycle of the runner subprocess and its duplex channel.
//!
//! The runner is spawned with piped stdin/stdout; requests are written to
//! its stdin and responses read from its stdout as length-prefixed
//! messages. A reader thread reframes runner stdout into a channel so the
//! supervisor can wait for a response with a bounded poll, draining control
//! events between checks. Exactly one request is in flight at a time.

use std::io;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{MessageReader, write_message};

const RUNNER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runner");

/// Supervisor-owned handle to the live runner subprocess.
///
/// Dropping the handle kills and reaps the child; replacing the runner is
/// therefore as simple as constructing a new handle and letting the old one
/// fall out of scope. The generation number distinguishes responses from
/// successive runner incarnations.
#[derive(Debug)]
pub struct RunnerHandle {
    child: Child,
    stdin: ChildStdin,
    responses: Receiver<io::Result<Vec<u8>>>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Spawns the runner command with a fresh duplex channel.
    pub fn spawn(command: &[String], generation: u64) -> Result<Self, RunnerError> {
        let (program, args) = command.split_first().ok_or(RunnerError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(RunnerError::MissingPipe)?;
        let stdout = child.stdout.take().ok_or(RunnerError::MissingPipe)?;

        let (sender, responses) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("ttr-runner-reader-{generation}"))
            .spawn(move || {
                let mut messages = MessageReader::new(stdout);
                loop {
                    match messages.next_message() {
                        Ok(Some(frame)) => {
                            if sender.send(Ok(frame)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            let _ = sender.send(Err(error));
                            break;
                        }
                    }
                }
            })
            .map_err(|source| RunnerError::ReaderThread { source })?;

        info!(
            target: RUNNER_TARGET,
            pid = child.id(),
            generation,
            "started runner subprocess"
        );
        Ok(Self {
            child,
            stdin,
            responses,
            generation,
            reader: Some(reader),
        })
    }

    /// Generation number of this runner incarnation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id of the runner child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Forwards a raw request frame (end marker already stripped) to the
    /// runner as one length-prefixed message.
    pub fn forward(&mut self, frame: &[u8]) -> Result<(), RunnerError> {
        write_message(&mut self.stdin, frame).map_err(|source| RunnerError::Forward { source })
    }

    /// Waits up to `timeout` for the next response frame.
    ///
    /// Returns `Ok(None)` on timeout so the caller can poll control events
    /// and try again.
    pub fn try_response(&self, timeout: Duration) -> Result<Option<Vec<u8>>, RunnerError> {
        match self.responses.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(source)) => Err(RunnerError::ChannelRead { source }),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RunnerError::Exited),
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        let pid = self.child.id();
        if let Err(error) = self.child.kill()
            && error.kind() != io::ErrorKind::InvalidInput
        {
            warn!(target: RUNNER_TARGET, pid, %error, "failed to kill runner");
        }
        match self.child.wait() {
            Ok(status) => {
                debug!(target: RUNNER_TARGET, pid, %status, "runner reaped");
            }
            Err(error) => {
                warn!(target: RUNNER_TARGET, pid, %error, "failed to reap runner");
            }
        }
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!(target: RUNNER_TARGET, pid, "runner reader thread panicked");
        }
    }
}

/// Errors surfaced while spawning or talking to the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configured runner command held no words.
    #[error("runner command is empty")]
    EmptyCommand,
    /// The child process could not be spawned.
    #[error("failed to spawn runner '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The child was spawned without the expected pipes.
    #[error("runner child is missing its stdio pipes")]
    MissingPipe,
    /// The stdout reader thread could not be spawned.
    #[error("failed to spawn runner reader thread: {source}")]
    ReaderThread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a request to the runner's stdin failed.
    #[error("failed to forward request to runner: {source}")]
    Forward {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading a response frame from the runner failed.
    #[error("failed to read runner response: {source}")]
    ChannelRead {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The runner closed its stdout; no more responses will arrive.
    #[error("runner exited; response channel closed")]
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;

    // `cat` echoes frames verbatim, which makes it a convenient stand-in
    // runner for channel plumbing tests.
    #[cfg(unix)]
    fn echo_runner(generation: u64) -> RunnerHandle {
        RunnerHandle::spawn(&["cat".to_owned()], generation).expect("spawn cat")
    }

    #[cfg(unix)]
    #[test]
    fn forwards_request_and_reads_response() {
        let mut runner = echo_runner(0);
        runner.forward(b"list_tests|x").expect("forward");
        let response = wait_for_response(&runner);
        assert_eq!(response, b"list_tests|x");
    }

    #[cfg(unix)]
    #[test]
    fn responses_are_sequenced_per_request() {
        let mut runner = echo_runner(0);
        runner.forward(b"a|1").expect("forward first");
        runner.forward(b"b|2").expect("forward second");
        assert_eq!(wait_for_response(&runner), b"a|1");
        assert_eq!(wait_for_response(&runner), b"b|2");
    }

    #[cfg(unix)]
    #[test]
    fn dropping_the_handle_kills_the_child() {
        let runner = echo_runner(7);
        let pid = runner.pid();
        drop(runner);
        // After the drop the pid must no longer refer to a live process.
        let alive = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(i32::try_from(pid).expect("pid fits")),
            None,
        )
        .is_ok();
        assert!(!alive, "runner child should be reaped on drop");
    }

    #[test]
    fn empty_command_is_rejected() {
        let error = RunnerHandle::spawn(&[], 0).expect_err("empty command");
        assert!(matches!(error, RunnerError::EmptyCommand));
    }

    #[cfg(unix)]
    fn wait_for_response(runner: &RunnerHandle) -> Vec<u8> {
        for _ in 0..50 {
            if let Some(frame) = runner
                .try_response(Duration::from_millis(100))
                .expect("response channel healthy")
            {
                return frame;
            }
        }
        panic!("runner response did not arrive in time");
    }
}
