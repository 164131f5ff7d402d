//! Handles one accepted client connection against the Server List Ping grammar.
//!
//! Every connection starts with a handshake.  What happens next depends on
//! the handshake's `next_state`:
//!
//! ```text
//! AwaitHandshake ──status──▶ AwaitStatusRequest ──▶ AwaitPing ──▶ done
//!        │
//!        └──────login──────▶ TriggerWake ──▶ done (no bytes written)
//! ```
//!
//! The handler never touches the lifecycle state.  It only reports what the
//! client asked for; the port controller decides what to do about it.
//!
//! # Testability
//!
//! [`handle_connection`] is generic over any `AsyncRead + AsyncWrite` stream,
//! so unit tests drive it with scripted `tokio_test::io` mocks instead of
//! real sockets.

use std::time::Duration;

use slumber_core::protocol::{
    codec::read_optional_packet, read_packet, write_packet, HandshakeRequest, NextState,
    PingPayload, ProtocolError, StatusResponse, HANDSHAKE_ID, PING_ID, STATUS_REQUEST_ID,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Default time to wait for the optional ping after a status response.
pub const DEFAULT_PING_GRACE: Duration = Duration::from_secs(1);

/// Error type for a single connection.  Always ends that connection only.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unexpected packet 0x{0:02x} while waiting for a status request")]
    UnexpectedPacket(u32),
}

/// What a finished connection asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The peer closed before sending anything.
    Closed,
    /// The first packet was not a handshake; the connection was dropped.
    Ignored { packet_id: u32 },
    /// A status response was sent, followed by a pong if the peer pinged.
    StatusServed { pinged: bool },
    /// The peer wants to join; the real server should be started.
    WakeRequested(HandshakeRequest),
}

/// The status reply and timing used for server-list queries.
#[derive(Debug, Clone)]
pub struct StatusResponder {
    pub status: StatusResponse,
    pub ping_grace: Duration,
}

impl StatusResponder {
    pub fn new(status: StatusResponse, ping_grace: Duration) -> Self {
        Self { status, ping_grace }
    }

    /// A sleeping entry with `motd` and the default ping grace.
    pub fn sleeping(motd: impl Into<String>) -> Self {
        Self::new(StatusResponse::sleeping(motd), DEFAULT_PING_GRACE)
    }
}

enum Step {
    AwaitHandshake,
    AwaitStatusRequest,
    AwaitPing,
    TriggerWake(HandshakeRequest),
}

/// Runs the handshake/status exchange on `stream` and reports the outcome.
///
/// The caller closes the stream afterwards in every case.
///
/// # Errors
///
/// Any framing or parse failure, including an invalid next state, returns
/// [`ConnectionError`].  A missing or late ping is not an error.
pub async fn handle_connection<S>(
    stream: &mut S,
    responder: &StatusResponder,
) -> Result<ConnectionOutcome, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut step = Step::AwaitHandshake;
    loop {
        step = match step {
            Step::AwaitHandshake => {
                let Some(packet) = read_optional_packet(stream).await? else {
                    return Ok(ConnectionOutcome::Closed);
                };
                if packet.id != HANDSHAKE_ID {
                    return Ok(ConnectionOutcome::Ignored {
                        packet_id: packet.id,
                    });
                }
                let handshake = HandshakeRequest::decode(&packet.payload)?;
                debug!(
                    protocol = handshake.protocol_version,
                    address = %handshake.server_address,
                    port = handshake.server_port,
                    next = ?handshake.next_state,
                    "handshake received"
                );
                match handshake.next_state {
                    NextState::Status => Step::AwaitStatusRequest,
                    NextState::Login => Step::TriggerWake(handshake),
                }
            }
            Step::AwaitStatusRequest => {
                let packet = read_packet(stream).await?;
                if packet.id != STATUS_REQUEST_ID {
                    return Err(ConnectionError::UnexpectedPacket(packet.id));
                }
                write_packet(stream, &responder.status.to_packet()?).await?;
                Step::AwaitPing
            }
            Step::AwaitPing => {
                let pinged = answer_ping(stream, responder.ping_grace).await?;
                return Ok(ConnectionOutcome::StatusServed { pinged });
            }
            Step::TriggerWake(handshake) => return Ok(ConnectionOutcome::WakeRequested(handshake)),
        };
    }
}

/// Waits up to `grace` for a ping and echoes it.  Returns whether a pong was sent.
async fn answer_ping<S>(stream: &mut S, grace: Duration) -> Result<bool, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let packet = match tokio::time::timeout(grace, read_optional_packet(stream)).await {
        Ok(Ok(Some(packet))) => packet,
        Ok(Ok(None)) => {
            debug!("client closed after status response");
            return Ok(false);
        }
        Ok(Err(e)) => {
            debug!("no usable ping after status response: {e}");
            return Ok(false);
        }
        Err(_) => {
            debug!(grace_ms = grace.as_millis() as u64, "no ping within grace window");
            return Ok(false);
        }
    };

    if packet.id != PING_ID {
        debug!(packet_id = packet.id, "ignoring non-ping packet after status response");
        return Ok(false);
    }
    match PingPayload::decode(&packet.payload) {
        Ok(ping) => {
            write_packet(stream, &ping.to_pong_packet()).await?;
            Ok(true)
        }
        Err(e) => {
            debug!("malformed ping: {e}");
            Ok(false)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
