//! Lifecycle of the port hand-off between the sleeping front and the real server.
//!
//! ```text
//!            wake request              process started
//! Listening ───────────────▶ HandingOff ───────────────▶ Running
//!     ▲                                                     │
//!     │         port re-acquired                child exited│
//!     └────────────────────────── Restarting ◀──────────────┘
//! ```
//!
//! The listening socket is open exactly while the state is [`Listening`].
//! Every other state means either the port is in flight or the child owns it.
//! Only the four forward edges above are legal; nothing may skip a state.
//!
//! [`Listening`]: ServerLifecycleState::Listening

use std::fmt;

use thiserror::Error;

/// Error returned when a caller asks for a transition that is not an edge of
/// the lifecycle graph.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal lifecycle transition: {from} -> {to}")]
pub struct LifecycleError {
    pub from: ServerLifecycleState,
    pub to: ServerLifecycleState,
}

/// Who owns the game port right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerLifecycleState {
    /// The front holds the port and answers status pings.
    Listening,
    /// The front has been asked to wake and is releasing the port.
    HandingOff,
    /// The real server process is running and owns the port.
    Running,
    /// The child exited; the front is re-acquiring the port.
    Restarting,
}

impl ServerLifecycleState {
    /// The only state this one may move to.
    pub fn successor(self) -> Self {
        match self {
            Self::Listening => Self::HandingOff,
            Self::HandingOff => Self::Running,
            Self::Running => Self::Restarting,
            Self::Restarting => Self::Listening,
        }
    }

    /// Validates and performs a transition to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless `to` is [`Self::successor`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slumber_core::ServerLifecycleState;
    ///
    /// let state = ServerLifecycleState::Listening;
    /// assert!(state.transition_to(ServerLifecycleState::HandingOff).is_ok());
    /// assert!(state.transition_to(ServerLifecycleState::Running).is_err());
    /// ```
    pub fn transition_to(self, to: Self) -> Result<Self, LifecycleError> {
        if self.successor() == to {
            Ok(to)
        } else {
            Err(LifecycleError { from: self, to })
        }
    }

    /// Whether the front's listening socket is open in this state.
    pub fn owns_socket(self) -> bool {
        matches!(self, Self::Listening)
    }
}

impl fmt::Display for ServerLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Listening => "listening",
            Self::HandingOff => "handing-off",
            Self::Running => "running",
            Self::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
