//! The supervisor: accept loop, request service, and runner lifecycle.
//!
//! One single-threaded event loop owns the listening socket, the runner
//! handle, and the receiving end of the control channel. Client connections
//! are served strictly sequentially: a connection's requests are processed
//! to completion before the next connection is accepted; the listen backlog
//! only queues pending connections. Control events are drained between
//! accepts, between frames, and while waiting on the runner, so a restart or
//! shutdown request is honoured even mid-connection.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

use ttr_config::{Config, ListenEndpoint};

use crate::control::ControlEvent;
use crate::protocol::{FrameReader, Request, RequestParseError};
use crate::runner::{RunnerError, RunnerHandle};

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

const LISTEN_BACKLOG: i32 = 5;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const READ_POLL: Duration = Duration::from_millis(100);
const RESPONSE_POLL: Duration = Duration::from_millis(100);

/// Outcome of forwarding one request to the runner.
enum Exchange {
    /// The runner produced a response to relay to the client.
    Response(Vec<u8>),
    /// A restart or shutdown interrupted the exchange; the client's
    /// connection is dropped and the client must retry.
    Abandoned,
}

/// Owns the listening socket, the runner subprocess, and the control
/// channel's receiving end.
#[derive(Debug)]
pub struct Supervisor {
    listener: TcpListener,
    control: Receiver<ControlEvent>,
    runner_command: Vec<String>,
    runner: RunnerHandle,
    generation: u64,
    stopping: bool,
}

impl Supervisor {
    /// Binds the listener and spawns the initial runner.
    pub fn new(config: &Config, control: Receiver<ControlEvent>) -> Result<Self, SupervisorError> {
        let listener = bind_listener(&config.listen)?;
        listener
            .set_nonblocking(true)
            .map_err(|source| SupervisorError::NonBlocking { source })?;
        let runner = RunnerHandle::spawn(&config.runner_command, 0)?;
        info!(
            target: SUPERVISOR_TARGET,
            endpoint = %config.listen,
            "supervisor listening"
        );
        Ok(Self {
            listener,
            control,
            runner_command: config.runner_command.clone(),
            runner,
            generation: 0,
            stopping: false,
        })
    }

    /// Address the listener is bound to; useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until a shutdown event is observed.
    ///
    /// Steady-state errors are absorbed here: per-connection transport
    /// failures are logged and the loop resumes accepting. Only a failure to
    /// respawn the runner propagates.
    pub fn run(mut self) -> Result<(), SupervisorError> {
        let mut last_error = None::<io::ErrorKind>;
        while !self.stopping {
            self.drain_control()?;
            if self.stopping {
                break;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    last_error = None;
                    info!(target: SUPERVISOR_TARGET, %peer, "connection accepted");
                    self.serve_connection(stream)?;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(target: SUPERVISOR_TARGET, %error, "socket accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        info!(target: SUPERVISOR_TARGET, "supervisor stopping");
        Ok(())
    }

    /// Applies every queued control event.
    fn drain_control(&mut self) -> Result<(), SupervisorError> {
        while let Ok(event) = self.control.try_recv() {
            self.handle_control(event)?;
        }
        Ok(())
    }

    fn handle_control(&mut self, event: ControlEvent) -> Result<(), SupervisorError> {
        match event {
            ControlEvent::Restart => {
                self.generation += 1;
                info!(
                    target: SUPERVISOR_TARGET,
                    old_pid = self.runner.pid(),
                    generation = self.generation,
                    "restarting runner"
                );
                // Assignment drops the old handle, killing and reaping the
                // previous child before the new one is recorded.
                self.runner = RunnerHandle::spawn(&self.runner_command, self.generation)?;
                Ok(())
            }
            ControlEvent::Shutdown => {
                self.stopping = true;
                Ok(())
            }
        }
    }

    /// Serves one connection's requests to completion.
    ///
    /// Transport errors end the connection and are logged; they never
    /// propagate. Malformed frames are dropped silently and unknown commands
    /// are logged without a response, leaving the connection open either
    /// way.
    fn serve_connection(&mut self, stream: TcpStream) -> Result<(), SupervisorError> {
        let reader = match stream
            .try_clone()
            .and_then(|clone| stream.set_read_timeout(Some(READ_POLL)).map(|()| clone))
        {
            Ok(reader) => reader,
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, %error, "failed to prepare connection");
                return Ok(());
            }
        };
        let mut frames = FrameReader::new(reader);
        let mut stream = stream;

        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => {
                    match Request::parse(&frame) {
                        Ok(request) => {
                            debug!(target: SUPERVISOR_TARGET, ?request, "dispatching request");
                        }
                        Err(RequestParseError::UnknownCommand { command }) => {
                            warn!(
                                target: SUPERVISOR_TARGET,
                                command,
                                "unknown command; dropped without response"
                            );
                            continue;
                        }
                        Err(error) => {
                            debug!(target: SUPERVISOR_TARGET, %error, "malformed request dropped");
                            continue;
                        }
                    }
                    match self.exchange(&frame)? {
                        Exchange::Response(bytes) => {
                            if let Err(error) =
                                stream.write_all(&bytes).and_then(|()| stream.flush())
                            {
                                warn!(
                                    target: SUPERVISOR_TARGET,
                                    %error,
                                    "failed to write response"
                                );
                                return Ok(());
                            }
                        }
                        Exchange::Abandoned => {
                            info!(target: SUPERVISOR_TARGET, "in-flight request abandoned");
                            return Ok(());
                        }
                    }
                }
                Ok(None) => {
                    debug!(target: SUPERVISOR_TARGET, "client closed connection");
                    return Ok(());
                }
                Err(error) if is_poll_timeout(&error) => {
                    // Idle connections survive restarts; only shutdown ends
                    // them here.
                    self.drain_control()?;
                    if self.stopping {
                        return Ok(());
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(target: SUPERVISOR_TARGET, %error, "client transport error");
                    return Ok(());
                }
            }
        }
    }

    /// Forwards one frame to the runner and waits for its response.
    ///
    /// The wait polls the control channel; if a restart replaces the runner
    /// mid-exchange, or shutdown begins, the request is abandoned. Responses
    /// are only ever taken from the generation the request was sent to.
    fn exchange(&mut self, frame: &[u8]) -> Result<Exchange, SupervisorError> {
        let generation = self.runner.generation();
        if let Err(error) = self.runner.forward(frame) {
            warn!(target: SUPERVISOR_TARGET, %error, "failed to forward request to runner");
            return Ok(Exchange::Abandoned);
        }
        loop {
            match self.runner.try_response(RESPONSE_POLL) {
                Ok(Some(bytes)) => return Ok(Exchange::Response(bytes)),
                Ok(None) => {
                    self.drain_control()?;
                    if self.stopping || self.runner.generation() != generation {
                        return Ok(Exchange::Abandoned);
                    }
                }
                Err(error) => {
                    warn!(target: SUPERVISOR_TARGET, %error, "runner response channel failed");
                    return Ok(Exchange::Abandoned);
                }
            }
        }
    }
}

fn is_poll_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Binds the listening socket with address reuse and a fixed backlog.
fn bind_listener(endpoint: &ListenEndpoint) -> Result<TcpListener, SupervisorError> {
    let addr = resolve_endpoint(endpoint)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(|source| {
        SupervisorError::Bind { addr, source }
    })?;
    socket
        .set_reuse_address(true)
        .and_then(|()| socket.bind(&SockAddr::from(addr)))
        .and_then(|()| socket.listen(LISTEN_BACKLOG))
        .map_err(|source| SupervisorError::Bind { addr, source })?;
    Ok(socket.into())
}

fn resolve_endpoint(endpoint: &ListenEndpoint) -> Result<SocketAddr, SupervisorError> {
    let mut addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|source| SupervisorError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?;
    addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| SupervisorError::ResolveEmpty {
            endpoint: endpoint.clone(),
        })
}

/// Errors surfaced while starting or running the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The listen host did not resolve.
    #[error("failed to resolve listen endpoint '{endpoint}': {source}")]
    Resolve {
        /// Configured endpoint.
        endpoint: ListenEndpoint,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Resolution produced no usable address.
    #[error("listen endpoint '{endpoint}' resolved to no addresses")]
    ResolveEmpty {
        /// Configured endpoint.
        endpoint: ListenEndpoint,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Resolved socket address.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to configure non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The runner subprocess could not be spawned or respawned.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::mpsc;

    use super::*;

    fn echo_config(port: u16) -> Config {
        Config {
            listen: ListenEndpoint::new("127.0.0.1", port),
            runner_command: vec!["cat".to_owned()],
            ..Config::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn binds_and_reports_a_local_address() {
        let (_sender, receiver) = mpsc::channel();
        let supervisor = Supervisor::new(&echo_config(0), receiver).expect("start supervisor");
        let addr = supervisor.local_addr().expect("local addr");
        assert_ne!(addr.port(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn shutdown_event_ends_the_accept_loop() {
        let (sender, receiver) = mpsc::channel();
        let supervisor = Supervisor::new(&echo_config(0), receiver).expect("start supervisor");
        let handle = thread::spawn(move || supervisor.run());
        sender.send(ControlEvent::Shutdown).expect("send shutdown");
        handle
            .join()
            .expect("join supervisor")
            .expect("clean shutdown");
    }

    #[cfg(unix)]
    #[test]
    fn relays_a_request_through_the_runner() {
        let (sender, receiver) = mpsc::channel();
        let supervisor = Supervisor::new(&echo_config(0), receiver).expect("start supervisor");
        let addr = supervisor.local_addr().expect("local addr");
        let handle = thread::spawn(move || supervisor.run());

        // `cat` as the runner echoes the frame back verbatim.
        let mut client = TcpStream::connect(addr).expect("connect");
        client
            .write_all(b"list_tests|warm---")
            .expect("write request");
        client
            .shutdown(std::net::Shutdown::Write)
            .expect("half close");
        let mut response = Vec::new();
        client.read_to_end(&mut response).expect("read response");
        assert_eq!(response, b"list_tests|warm");

        sender.send(ControlEvent::Shutdown).expect("send shutdown");
        handle
            .join()
            .expect("join supervisor")
            .expect("clean shutdown");
    }
}
