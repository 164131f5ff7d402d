//! # slumber-core
//!
//! Shared library for Slumber, the sleep/wake front for a game server.
//! Contains the Server List Ping wire codec and the port hand-off lifecycle.
//!
//! It opens no sockets and starts no processes.  The async framing helpers
//! are generic over `tokio::io::AsyncRead`/`AsyncWrite`, so they work on a
//! `TcpStream` and on an in-memory test stream alike.
//!
//! # Architecture overview (for beginners)
//!
//! While the real game server is stopped, Slumber sits on its TCP port.
//! Clients refreshing their server list get a "sleeping" status entry; the
//! first client that actually tries to join makes Slumber step aside and
//! start the real server.  When that server exits, Slumber takes the port
//! back.
//!
//! This crate defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Packets are
//!   `[length][id][payload]` with lengths and ids encoded as VarInts.
//!
//! - **`domain`** – The [`ServerLifecycleState`] graph
//!   (`Listening → HandingOff → Running → Restarting → Listening`).

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `slumber_core::Packet` instead of `slumber_core::protocol::codec::Packet`.
pub use domain::lifecycle::{LifecycleError, ServerLifecycleState};
pub use protocol::codec::{Packet, ProtocolError};
pub use protocol::messages::{HandshakeRequest, NextState, PingPayload, StatusResponse};
