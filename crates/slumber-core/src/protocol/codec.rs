//! Packet framing for the Server List Ping protocol.
//!
//! Wire format:
//! ```text
//! [length:VarInt][packet_id:VarInt][payload:length - sizeof(packet_id)]
//! ```
//! `length` counts the id and the payload, not itself.  Writing mirrors
//! reading: the `[id][payload]` body is built in memory first and then
//! prefixed with the VarInt length of that body.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::varint::{continue_varint, decode_varint, encode_varint, read_varint, varint_len};

/// Largest packet body accepted from a peer: the biggest value a 3-byte
/// VarInt can carry, which is the protocol's own limit for uncompressed packets.
pub const MAX_PACKET_LEN: usize = 2_097_151;

/// Errors that can occur while framing or parsing protocol packets.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// A VarInt carried the continuation flag on all five permitted bytes.
    #[error("corrupt VarInt: more than 5 bytes without a terminating byte")]
    CorruptVarInt,

    /// The stream or buffer ended in the middle of a packet.
    #[error("truncated packet: stream ended mid-packet")]
    TruncatedPacket,

    /// The declared packet length exceeds [`MAX_PACKET_LEN`].
    #[error("packet too large: declared {declared} bytes, limit is {limit}")]
    PacketTooLarge { declared: usize, limit: usize },

    /// The frame itself is inconsistent (e.g. zero length, id overruns the body).
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A handshake declared a next state other than status (1) or login (2).
    #[error("invalid handshake next state: {0}")]
    InvalidNextState(i32),

    /// The payload could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Any other socket failure.
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl ProtocolError {
    /// Maps a read failure, treating an early end-of-stream as truncation.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::TruncatedPacket
        } else {
            ProtocolError::from(err)
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One framed protocol packet.  Ephemeral: built per read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet id (`0x00` handshake/status, `0x01` ping/pong).
    pub id: u32,
    /// Everything after the id.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet from an id and payload bytes.
    pub fn new(id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

// ── Buffer API ────────────────────────────────────────────────────────────────

/// Encodes `packet` into `[length][id][payload]`.
///
/// # Examples
///
/// ```rust
/// use slumber_core::protocol::codec::{decode_packet, encode_packet, Packet};
///
/// let packet = Packet::new(0x01, 42i64.to_be_bytes());
/// let bytes = encode_packet(&packet);
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut body = Vec::with_capacity(varint_len(packet.id) + packet.payload.len());
    encode_varint(packet.id, &mut body);
    body.extend_from_slice(&packet.payload);

    let mut buf = Vec::with_capacity(varint_len(body.len() as u32) + body.len());
    encode_varint(body.len() as u32, &mut buf);
    buf.extend_from_slice(&body);
    buf
}

/// Decodes one packet from the beginning of `bytes`.
///
/// Returns the packet and the total number of bytes consumed, so the caller
/// can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or incomplete.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let (length, prefix_len) = decode_varint(bytes)?;
    let length = check_length(length)?;
    let end = prefix_len + length;
    if bytes.len() < end {
        return Err(ProtocolError::TruncatedPacket);
    }
    let packet = split_body(&bytes[prefix_len..end])?;
    Ok((packet, end))
}

// ── Stream API ────────────────────────────────────────────────────────────────

/// Reads one complete packet from `reader`.
///
/// # Errors
///
/// - [`ProtocolError::TruncatedPacket`] on any short read, including a stream
///   that is already at end-of-file.
/// - [`ProtocolError::CorruptVarInt`] / [`ProtocolError::PacketTooLarge`] /
///   [`ProtocolError::MalformedPacket`] for invalid frames.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let length = read_varint(reader).await?;
    read_body(reader, length).await
}

/// Reads one packet, or returns `Ok(None)` if the peer closed the stream
/// cleanly at a packet boundary.
///
/// A stream that closes after the first byte of a packet is still a
/// [`ProtocolError::TruncatedPacket`].
pub async fn read_optional_packet<R>(reader: &mut R) -> Result<Option<Packet>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let length = continue_varint(reader, first[0]).await?;
    read_body(reader, length).await.map(Some)
}

/// Encodes `packet` and writes it to `writer` in a single buffer, then flushes.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the write fails.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_packet(packet);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn read_body<R>(reader: &mut R, length: u32) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let length = check_length(length)?;
    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(ProtocolError::from_read)?;
    let packet = split_body(&body)?;
    trace!(packet_id = packet.id, length, "packet read");
    Ok(packet)
}

fn check_length(length: u32) -> Result<usize, ProtocolError> {
    let length = length as usize;
    if length == 0 {
        return Err(ProtocolError::MalformedPacket(
            "zero-length packet has no id".to_string(),
        ));
    }
    if length > MAX_PACKET_LEN {
        return Err(ProtocolError::PacketTooLarge {
            declared: length,
            limit: MAX_PACKET_LEN,
        });
    }
    Ok(length)
}

fn split_body(body: &[u8]) -> Result<Packet, ProtocolError> {
    let (id, id_len) = decode_varint(body).map_err(|e| match e {
        ProtocolError::TruncatedPacket => {
            ProtocolError::MalformedPacket("packet id overruns declared length".to_string())
        }
        other => other,
    })?;
    Ok(Packet {
        id,
        payload: body[id_len..].to_vec(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
