//! Mock process launcher for tests.
//!
//! Lets tests play the part of the real server without spawning anything:
//! each launch is recorded, and the test decides when (and how) the fake
//! child exits.

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::{ChildExit, ChildHandle, ProcessLauncher, SupervisorError};

/// What the mock saw when it was asked to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Whether the probe address could be bound at launch time, i.e. whether
    /// the front had released the port.  `None` if no probe was configured.
    pub port_was_free: Option<bool>,
}

#[derive(Default)]
struct MockState {
    launches: Vec<LaunchRecord>,
    pending_exit: Option<oneshot::Sender<ChildExit>>,
    fail_next: bool,
    probe_addr: Option<SocketAddr>,
}

/// A [`ProcessLauncher`] whose children exit when the test says so.
///
/// Clones share state, so a test can hand one clone to the controller and
/// keep another to drive it.
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<Mutex<MockState>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every launch try to bind `addr` and record whether it succeeded.
    pub fn set_probe_addr(&self, addr: SocketAddr) {
        self.state.lock().expect("lock poisoned").probe_addr = Some(addr);
    }

    /// Makes the next `start()` fail with a spawn error.
    pub fn fail_next_launch(&self) {
        self.state.lock().expect("lock poisoned").fail_next = true;
    }

    /// Number of successful launches so far.
    pub fn launch_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").launches.len()
    }

    /// Records of every successful launch, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().expect("lock poisoned").launches.clone()
    }

    /// Makes the currently running fake child exit with `code`.
    ///
    /// Returns `false` if no child is running.
    pub fn exit_child(&self, code: i32) -> bool {
        let sender = self.state.lock().expect("lock poisoned").pending_exit.take();
        match sender {
            Some(tx) => tx.send(ChildExit { code: Some(code) }).is_ok(),
            None => false,
        }
    }
}

impl ProcessLauncher for MockLauncher {
    fn start(&self) -> Result<ChildHandle, SupervisorError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_next {
            state.fail_next = false;
            return Err(SupervisorError::Spawn {
                command: "mock-server".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "injected failure"),
            });
        }

        // The listener is dropped immediately so the real port stays free.
        let port_was_free = state.probe_addr.map(|addr| TcpListener::bind(addr).is_ok());
        state.launches.push(LaunchRecord { port_was_free });

        let (tx, rx) = oneshot::channel();
        state.pending_exit = Some(tx);
        let pid = state.launches.len() as u32;
        Ok(ChildHandle::from_exit_signal(Some(pid), rx))
    }
}
