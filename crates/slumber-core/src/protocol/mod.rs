//! Protocol module: VarInt codec, packet framer and payload types.

pub mod codec;
pub mod messages;
pub mod varint;

pub use codec::{decode_packet, encode_packet, read_packet, write_packet, Packet, ProtocolError};
pub use messages::*;
