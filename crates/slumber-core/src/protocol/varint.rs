//! VarInt encoding used for packet lengths, packet ids and small integer fields.
//!
//! Wire format:
//! ```text
//! [group0 | 0x80?][group1 | 0x80?]...[groupN]
//! ```
//! Each byte carries 7 data bits in its low bits.  The high bit (`0x80`) is a
//! continuation flag: when set, another byte follows.  Groups are written
//! least-significant first, so `300` (`0b10_0101100`) becomes `[0xAC, 0x02]`.
//!
//! # Why bound the length? (for beginners)
//!
//! A 32-bit value needs at most `ceil(32 / 7) = 5` groups.  A peer that keeps
//! setting the continuation bit past the fifth byte is either broken or
//! hostile; without a bound the reader would keep consuming bytes forever.
//! Decoding therefore fails with [`ProtocolError::CorruptVarInt`] as soon as a
//! sixth byte would be needed.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::codec::ProtocolError;

/// Maximum number of bytes a 32-bit VarInt may occupy on the wire.
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Appends the VarInt encoding of `value` to `buf`.
///
/// Signed protocol fields (e.g. the handshake protocol version) are encoded
/// by reinterpreting their bits as `u32`, so `-1` takes the full 5 bytes.
///
/// # Examples
///
/// ```rust
/// use slumber_core::protocol::varint::encode_varint;
///
/// let mut buf = Vec::new();
/// encode_varint(300, &mut buf);
/// assert_eq!(buf, [0xAC, 0x02]);
/// ```
pub fn encode_varint(value: u32, buf: &mut Vec<u8>) {
    let mut remaining = value;
    loop {
        let group = (remaining & SEGMENT_BITS as u32) as u8;
        remaining >>= 7;
        if remaining == 0 {
            buf.push(group);
            return;
        }
        buf.push(group | CONTINUE_BIT);
    }
}

/// Returns the number of bytes [`encode_varint`] emits for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decodes one VarInt from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// - [`ProtocolError::CorruptVarInt`] if five bytes all carry the continuation flag.
/// - [`ProtocolError::TruncatedPacket`] if `bytes` ends before the terminating byte.
pub fn decode_varint(bytes: &[u8]) -> Result<(u32, usize), ProtocolError> {
    let mut value: u32 = 0;
    for (index, byte) in bytes.iter().copied().enumerate() {
        if index == MAX_VARINT_LEN {
            return Err(ProtocolError::CorruptVarInt);
        }
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * index);
        if byte & CONTINUE_BIT == 0 {
            return Ok((value, index + 1));
        }
    }
    if bytes.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::CorruptVarInt);
    }
    Err(ProtocolError::TruncatedPacket)
}

/// Reads one VarInt from an async byte stream, one byte at a time.
///
/// # Errors
///
/// - [`ProtocolError::CorruptVarInt`] after five continuation bytes.
/// - [`ProtocolError::TruncatedPacket`] if the stream closes mid-VarInt.
/// - [`ProtocolError::Io`] for any other read failure.
pub async fn read_varint<R>(reader: &mut R) -> Result<u32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let first = reader.read_u8().await.map_err(ProtocolError::from_read)?;
    continue_varint(reader, first).await
}

/// Finishes reading a VarInt whose first byte has already been consumed.
///
/// The framer uses this to tell a clean end-of-stream (no first byte) apart
/// from a truncated packet.
pub(crate) async fn continue_varint<R>(reader: &mut R, first: u8) -> Result<u32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut value = (first & SEGMENT_BITS) as u32;
    let mut byte = first;
    let mut index = 1;
    while byte & CONTINUE_BIT != 0 {
        if index == MAX_VARINT_LEN {
            return Err(ProtocolError::CorruptVarInt);
        }
        byte = reader.read_u8().await.map_err(ProtocolError::from_read)?;
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * index);
        index += 1;
    }
    Ok(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
