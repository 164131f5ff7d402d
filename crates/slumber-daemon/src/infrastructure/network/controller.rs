//! Port ownership controller: the listener and the real server take turns on one port.
//!
//! The controller owns the listening socket and the [`ServerLifecycleState`].
//! One call to [`PortController::run`] drives the whole cycle:
//!
//! 1. **Listening** – accept connections one at a time and hand each to
//!    [`handle_connection`].  Status queries are answered inline.
//! 2. **HandingOff** – a login attempt arrived.  Close the listener so the
//!    port is free, then ask the [`ProcessLauncher`] to start the server.
//! 3. **Running** – a monitor task waits for the child to exit and reports
//!    the exit through a oneshot channel.
//! 4. **Restarting** – rebind the same address with exponential backoff,
//!    then go back to step 1.
//!
//! # Why close before launching? (for beginners)
//!
//! The real server binds the very same port.  Two listening sockets cannot
//! share a TCP port, so if the controller still held it the server would fail
//! with "address in use".  Clients that connect in the short gap between the
//! close and the server's bind are refused; nothing queues them.
//!
//! # Shutdown
//!
//! [`ControllerHandle::shutdown`] flips a `watch` flag.  The accept loop, the
//! connection exchange, the supervision wait and the rebind backoff all
//! `select!` on it, so shutdown never looks like an accept failure and never
//! leads back to `Listening`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slumber_core::{LifecycleError, ServerLifecycleState};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::handle_connection::{
    handle_connection, ConnectionOutcome, StatusResponder,
};
use crate::infrastructure::supervisor::{ChildExit, ChildHandle, ProcessLauncher, SupervisorError};

/// Pending-connection queue length for the listening socket.
const LISTEN_BACKLOG: u32 = 128;

/// Default port of the game's server.
pub const DEFAULT_PORT: u16 = 25565;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for the port controller.  Every variant ends [`PortController::run`].
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listener failed unexpectedly: {0}")]
    Accept(#[source] io::Error),
    #[error("wake aborted: {0}")]
    Launch(#[from] SupervisorError),
    #[error("could not re-acquire {addr} after {attempts} attempts: {source}")]
    RebindExhausted {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Bounded exponential backoff used when re-acquiring the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total bind attempts, including the first.  At least 1.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 = the wait after the first failure).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Runtime settings for [`PortController`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on one connection's handshake/status exchange.
    pub connection_timeout: Duration,
    pub rebind: RetryPolicy,
}

impl ControllerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            connection_timeout: Duration::from_secs(5),
            rebind: RetryPolicy::default(),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Snapshot published on every lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: ServerLifecycleState,
    /// Bound address; `Some` exactly while `state` is `Listening`.
    pub local_addr: Option<SocketAddr>,
    /// Number of server launches so far.
    pub wakes: u64,
}

/// Cloneable handle for observing and stopping a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    status_rx: watch::Receiver<ControllerStatus>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ControllerHandle {
    /// Latest published status.
    pub fn status(&self) -> ControllerStatus {
        *self.status_rx.borrow()
    }

    /// Waits until a published status satisfies `predicate`.
    ///
    /// Returns `None` if the controller stopped first.
    pub async fn wait_until<F>(&self, predicate: F) -> Option<ControllerStatus>
    where
        F: FnMut(&ControllerStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx.wait_for(predicate).await.ok().map(|s| *s);
        status
    }

    /// Asks the controller to stop.  Idempotent.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

/// How a supervision wait ended.
enum Supervision {
    Exited,
    ShutdownRequested,
}

/// Owns the game port and the lifecycle state.  See the module docs.
pub struct PortController {
    config: ControllerConfig,
    responder: StatusResponder,
    launcher: Arc<dyn ProcessLauncher>,
    state: ServerLifecycleState,
    /// Resolved address; a port of 0 in the config is replaced by the OS pick.
    addr: SocketAddr,
    listener: Option<TcpListener>,
    wakes: u64,
    status_tx: watch::Sender<ControllerStatus>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PortController {
    /// Binds the configured address and enters `Listening`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Bind`] if the port is unavailable.
    pub fn bind(
        config: ControllerConfig,
        responder: StatusResponder,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<(Self, ControllerHandle), ControllerError> {
        let listener = bind_listener(config.bind_addr).map_err(|source| ControllerError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ControllerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        info!(%addr, "listening for status pings and login attempts");

        let state = ServerLifecycleState::Listening;
        let (status_tx, status_rx) = watch::channel(ControllerStatus {
            state,
            local_addr: Some(addr),
            wakes: 0,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Self {
            config,
            responder,
            launcher,
            state,
            addr,
            listener: Some(listener),
            wakes: 0,
            status_tx,
            shutdown_rx,
        };
        let handle = ControllerHandle {
            status_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        };
        Ok((controller, handle))
    }

    /// The address the controller listens on, with any OS-assigned port filled in.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the listen / hand-off / supervise / rebind cycle until shutdown.
    ///
    /// # Errors
    ///
    /// See [`ControllerError`].  Returns `Ok(())` only after
    /// [`ControllerHandle::shutdown`].
    pub async fn run(mut self) -> Result<(), ControllerError> {
        let mut listener = match self.listener.take() {
            Some(listener) => listener,
            None => match bind_with_retry(self.addr, &self.config.rebind, &mut self.shutdown_rx).await? {
                Some(listener) => listener,
                None => return Ok(()),
            },
        };

        loop {
            if !self.accept_until_wake(&listener).await? {
                info!(addr = %self.addr, "shutdown requested; closing listener");
                return Ok(());
            }

            let child = self.hand_off(listener)?;
            let exit_rx = spawn_monitor(child);

            match self.supervise(exit_rx).await {
                Supervision::Exited => {}
                Supervision::ShutdownRequested => {
                    info!("shutdown requested while server running; leaving the port to it");
                    return Ok(());
                }
            }

            self.transition(ServerLifecycleState::Restarting)?;
            listener = match bind_with_retry(self.addr, &self.config.rebind, &mut self.shutdown_rx).await? {
                Some(listener) => listener,
                None => {
                    info!(addr = %self.addr, "shutdown requested while re-acquiring the port");
                    return Ok(());
                }
            };
            self.transition(ServerLifecycleState::Listening)?;
            info!(addr = %self.addr, "port re-acquired; listening again");
        }
    }

    /// Serves connections until one requests a wake (`true`) or shutdown is
    /// requested (`false`).
    async fn accept_until_wake(&mut self, listener: &TcpListener) -> Result<bool, ControllerError> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_rx) => return Ok(false),
                accepted = listener.accept() => accepted,
            };

            let (mut stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("transient accept error: {e}");
                    continue;
                }
                Err(e) => {
                    error!("accept failed while listening: {e}");
                    return Err(ControllerError::Accept(e));
                }
            };

            let exchange = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_rx) => {
                    debug!(%peer, "shutdown requested mid-exchange; dropping connection");
                    return Ok(false);
                }
                exchange = timeout(
                    self.config.connection_timeout,
                    handle_connection(&mut stream, &self.responder),
                ) => exchange,
            };
            match exchange {
                Ok(Ok(ConnectionOutcome::WakeRequested(handshake))) => {
                    drop(stream);
                    info!(
                        %peer,
                        address = %handshake.server_address,
                        protocol = handshake.protocol_version,
                        "login attempt; waking server"
                    );
                    return Ok(true);
                }
                Ok(Ok(ConnectionOutcome::StatusServed { pinged })) => {
                    debug!(%peer, pinged, "status served");
                }
                Ok(Ok(ConnectionOutcome::Ignored { packet_id })) => {
                    debug!(%peer, packet_id, "dropping connection with unknown first packet");
                }
                Ok(Ok(ConnectionOutcome::Closed)) => {
                    debug!(%peer, "connection closed without a handshake");
                }
                Ok(Err(e)) => warn!(%peer, "dropping connection: {e}"),
                Err(_) => warn!(%peer, "dropping connection: no complete exchange in time"),
            }
        }
    }

    /// Releases the port and starts the server.  The listener is consumed so
    /// it is closed before the launcher runs.
    fn hand_off(&mut self, listener: TcpListener) -> Result<ChildHandle, ControllerError> {
        self.transition(ServerLifecycleState::HandingOff)?;
        drop(listener);

        let child = self.launcher.start().map_err(|e| {
            error!("failed to start server: {e}");
            ControllerError::Launch(e)
        })?;

        self.wakes += 1;
        self.transition(ServerLifecycleState::Running)?;
        info!(pid = child.id(), "server running");
        Ok(child)
    }

    async fn supervise(
        &mut self,
        exit_rx: oneshot::Receiver<Result<ChildExit, SupervisorError>>,
    ) -> Supervision {
        let outcome = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown_rx) => return Supervision::ShutdownRequested,
            outcome = exit_rx => outcome,
        };
        match outcome.unwrap_or(Err(SupervisorError::ExitSignalLost)) {
            Ok(exit) if exit.success() => info!(%exit, "server process exited"),
            Ok(exit) => warn!(%exit, "server process exited"),
            Err(e) => error!("lost track of server process: {e}; reclaiming port"),
        }
        Supervision::Exited
    }

    fn transition(&mut self, to: ServerLifecycleState) -> Result<(), LifecycleError> {
        self.state = self.state.transition_to(to)?;
        debug!(state = %self.state, "lifecycle transition");
        self.status_tx.send_replace(ControllerStatus {
            state: self.state,
            local_addr: self.state.owns_socket().then_some(self.addr),
            wakes: self.wakes,
        });
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Waits for the child in its own task and reports the result exactly once.
fn spawn_monitor(child: ChildHandle) -> oneshot::Receiver<Result<ChildExit, SupervisorError>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        // The controller may have stopped listening for the exit.
        let _ = tx.send(child.wait().await);
    });
    rx
}

/// Resolves once shutdown has been requested.  Never resolves if every
/// handle was dropped without requesting it.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

/// Binds a listening socket.  On Unix `SO_REUSEADDR` lets the bind succeed
/// while the previous owner's connections sit in `TIME_WAIT`.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Binds `addr`, retrying with exponential backoff while it is still busy.
///
/// Returns `Ok(None)` without binding once `shutdown` is set, including when
/// it is set before the first attempt or during a backoff sleep.
///
/// # Errors
///
/// Returns [`ControllerError::RebindExhausted`] with the last bind error
/// once `policy.attempts` binds have failed.
pub async fn bind_with_retry(
    addr: SocketAddr,
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<TcpListener>, ControllerError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        if *shutdown.borrow() {
            return Ok(None);
        }
        match bind_listener(addr) {
            Ok(listener) => return Ok(Some(listener)),
            Err(source) if attempt >= attempts => {
                error!(%addr, attempts, "giving up on re-acquiring port: {source}");
                return Err(ControllerError::RebindExhausted {
                    addr,
                    attempts,
                    source,
                });
            }
            Err(e) => {
                let delay = policy.delay_before(attempt - 1);
                warn!(%addr, attempt, ?delay, "port still busy: {e}");
                tokio::select! {
                    biased;
                    _ = shutdown_requested(shutdown) => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
