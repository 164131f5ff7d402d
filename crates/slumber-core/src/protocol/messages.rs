//! Payload types for the subset of the Server List Ping protocol we speak.
//!
//! Only enough of the game's handshake is understood to tell a status query
//! apart from a login attempt.  Everything after a login handshake belongs to
//! the real server.
//!
//! | Direction | Packet          | Id     | Payload                                   |
//! |-----------|-----------------|--------|-------------------------------------------|
//! | C → S     | Handshake       | `0x00` | VarInt version, String addr, u16 port, VarInt next |
//! | C → S     | Status request  | `0x00` | empty                                     |
//! | S → C     | Status response | `0x00` | String (JSON)                             |
//! | C → S     | Ping            | `0x01` | i64 token (big-endian)                    |
//! | S → C     | Pong            | `0x01` | same i64 token                            |

use serde::Serialize;

use crate::protocol::codec::{Packet, ProtocolError};
use crate::protocol::varint::{decode_varint, encode_varint};

// ── Packet ids ────────────────────────────────────────────────────────────────

/// Id of the first packet of every connection.
pub const HANDSHAKE_ID: u32 = 0x00;
/// Id of the (empty) status request sent after a status handshake.
pub const STATUS_REQUEST_ID: u32 = 0x00;
/// Id of the JSON status response.
pub const STATUS_RESPONSE_ID: u32 = 0x00;
/// Id of the ping packet that may follow a status exchange.
pub const PING_ID: u32 = 0x01;
/// Id of the pong reply; shares its value with [`PING_ID`].
pub const PONG_ID: u32 = 0x01;

/// Version label shown to clients while the real server is asleep.
pub const SLEEPING_VERSION_NAME: &str = "Sleeping...";
/// Protocol number advertised while asleep.  No real client speaks it, so
/// the client list shows the label above instead of a version mismatch.
pub const SLEEPING_PROTOCOL: i32 = 999;

// ── Handshake ─────────────────────────────────────────────────────────────────

/// What the client wants to do after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NextState {
    /// Server list query: status request and optional ping follow.
    Status = 1,
    /// The player wants to join.
    Login = 2,
}

impl TryFrom<i32> for NextState {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            other => Err(ProtocolError::InvalidNextState(other)),
        }
    }
}

/// The first packet of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl HandshakeRequest {
    /// Parses a handshake payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidNextState`] for a next state other than
    /// 1 or 2, [`ProtocolError::CorruptVarInt`] for an unterminated VarInt and
    /// [`ProtocolError::MalformedPayload`] for short or non-UTF-8 fields.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (protocol_version, mut offset) = read_varint_field(payload, 0, "protocol version")?;
        let (server_address, next) = read_string(payload, offset)?;
        offset = next;
        let server_port = read_u16(payload, offset)?;
        offset += 2;
        let (next_state, _) = read_varint_field(payload, offset, "next state")?;
        Ok(Self {
            protocol_version: protocol_version as i32,
            server_address,
            server_port,
            next_state: NextState::try_from(next_state as i32)?,
        })
    }

    /// Encodes the handshake payload (without the packet frame).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.server_address.len());
        encode_varint(self.protocol_version as u32, &mut buf);
        write_string(&mut buf, &self.server_address);
        buf.extend_from_slice(&self.server_port.to_be_bytes());
        encode_varint(self.next_state as u32, &mut buf);
        buf
    }

    /// Wraps the encoded handshake in a [`HANDSHAKE_ID`] packet.
    pub fn to_packet(&self) -> Packet {
        Packet::new(HANDSHAKE_ID, self.encode())
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Outbound server-list entry.  Serialized to JSON, never parsed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub motd: String,
    pub protocol_label: String,
    pub protocol: i32,
    pub max_players: i32,
    pub online_players: i32,
}

impl StatusResponse {
    /// A "sleeping" entry: placeholder version, zero players.
    pub fn sleeping(motd: impl Into<String>) -> Self {
        Self {
            motd: motd.into(),
            protocol_label: SLEEPING_VERSION_NAME.to_string(),
            protocol: SLEEPING_PROTOCOL,
            max_players: 0,
            online_players: 0,
        }
    }

    /// Renders the JSON document clients expect, e.g.
    /// `{"version":{"name":"Sleeping...","protocol":999},"players":{"max":0,"online":0},"description":{"text":"..."}}`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let doc = StatusJson {
            version: VersionJson {
                name: &self.protocol_label,
                protocol: self.protocol,
            },
            players: PlayersJson {
                max: self.max_players,
                online: self.online_players,
            },
            description: DescriptionJson { text: &self.motd },
        };
        serde_json::to_string(&doc)
            .map_err(|e| ProtocolError::MalformedPayload(format!("status JSON: {e}")))
    }

    /// Builds the [`STATUS_RESPONSE_ID`] packet carrying the JSON as a protocol string.
    ///
    /// # Errors
    ///
    /// Propagates [`StatusResponse::to_json`] failures.
    pub fn to_packet(&self) -> Result<Packet, ProtocolError> {
        let json = self.to_json()?;
        let mut payload = Vec::with_capacity(json.len() + 3);
        write_string(&mut payload, &json);
        Ok(Packet::new(STATUS_RESPONSE_ID, payload))
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    version: VersionJson<'a>,
    players: PlayersJson,
    description: DescriptionJson<'a>,
}

#[derive(Serialize)]
struct VersionJson<'a> {
    name: &'a str,
    protocol: i32,
}

#[derive(Serialize)]
struct PlayersJson {
    max: i32,
    online: i32,
}

#[derive(Serialize)]
struct DescriptionJson<'a> {
    text: &'a str,
}

// ── Ping / pong ───────────────────────────────────────────────────────────────

/// Opaque ping token that must come back unchanged in the pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload(pub i64);

impl PingPayload {
    /// Parses the 8-byte big-endian token of a ping packet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] unless the payload is exactly 8 bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; 8] = payload.try_into().map_err(|_| {
            ProtocolError::MalformedPayload(format!(
                "ping payload must be 8 bytes, got {}",
                payload.len()
            ))
        })?;
        Ok(Self(i64::from_be_bytes(bytes)))
    }

    /// Builds a [`PING_ID`] packet carrying this token.
    pub fn to_ping_packet(self) -> Packet {
        Packet::new(PING_ID, self.0.to_be_bytes())
    }

    /// Builds the matching [`PONG_ID`] reply.
    pub fn to_pong_packet(self) -> Packet {
        Packet::new(PONG_ID, self.0.to_be_bytes())
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

/// Appends a VarInt-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    encode_varint(s.len() as u32, buf);
    buf.extend_from_slice(s.as_bytes());
}

/// Reads a VarInt-length-prefixed UTF-8 string at `offset`.
///
/// Returns the string and the offset just past it.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the string overruns the
/// buffer or is not valid UTF-8.
pub fn read_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let (len, start) = read_varint_field(buf, offset, "string length")?;
    let len = len as usize;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "string of length {len} at offset {start} exceeds buffer"
            ))
        })?;
    let s = std::str::from_utf8(&buf[start..end])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, end))
}

fn read_varint_field(buf: &[u8], offset: usize, field: &str) -> Result<(u32, usize), ProtocolError> {
    let rest = buf.get(offset..).unwrap_or_default();
    match decode_varint(rest) {
        Ok((value, len)) => Ok((value, offset + len)),
        Err(ProtocolError::TruncatedPacket) => Err(ProtocolError::MalformedPayload(format!(
            "{field}: payload ends at offset {offset}"
        ))),
        Err(other) => Err(other),
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    match buf.get(offset..offset + 2) {
        Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
        _ => Err(ProtocolError::MalformedPayload(format!(
            "server port: need 2 bytes at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
