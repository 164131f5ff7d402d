//! Integration tests for the slumber-core packet framer.
//!
//! These tests drive the public stream API the way the daemon does: a
//! client-side byte sequence is fed through an async reader, packets are
//! pulled off one by one, and replies are written back.  They verify that
//! framing holds up when a peer splits packets across TCP segments or
//! pipelines several packets in one write.

use slumber_core::protocol::{
    codec::{encode_packet, read_optional_packet, read_packet, write_packet, MAX_PACKET_LEN},
    messages::{read_string, PING_ID, STATUS_REQUEST_ID},
    varint::encode_varint,
};
use slumber_core::{HandshakeRequest, NextState, Packet, PingPayload, ProtocolError, StatusResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Builds the bytes a vanilla client sends when refreshing its server list.
fn client_status_sequence(token: i64) -> Vec<u8> {
    let handshake = HandshakeRequest {
        protocol_version: 767,
        server_address: "localhost".to_string(),
        server_port: 25565,
        next_state: NextState::Status,
    };
    let mut bytes = encode_packet(&handshake.to_packet());
    bytes.extend(encode_packet(&Packet::new(STATUS_REQUEST_ID, Vec::new())));
    bytes.extend(encode_packet(&PingPayload(token).to_ping_packet()));
    bytes
}

#[tokio::test]
async fn test_pipelined_client_sequence_yields_three_packets() {
    // Arrange: all three packets arrive in a single segment
    let bytes = client_status_sequence(7);
    let mut reader: &[u8] = &bytes;

    // Act
    let handshake = read_packet(&mut reader).await.expect("handshake");
    let request = read_packet(&mut reader).await.expect("status request");
    let ping = read_packet(&mut reader).await.expect("ping");
    let end = read_optional_packet(&mut reader).await.expect("clean end");

    // Assert
    assert_eq!(
        HandshakeRequest::decode(&handshake.payload).unwrap().next_state,
        NextState::Status
    );
    assert_eq!(request, Packet::new(STATUS_REQUEST_ID, Vec::new()));
    assert_eq!(ping.id, PING_ID);
    assert_eq!(PingPayload::decode(&ping.payload).unwrap(), PingPayload(7));
    assert!(end.is_none());
}

#[tokio::test]
async fn test_packet_split_across_segments_is_reassembled() {
    // Arrange: deliver the sequence one byte per read
    let bytes = client_status_sequence(0x1122_3344_5566_7788);
    let mut builder = tokio_test::io::Builder::new();
    for byte in &bytes {
        builder.read(std::slice::from_ref(byte));
    }
    let mut stream = builder.build();

    // Act
    let _handshake = read_packet(&mut stream).await.unwrap();
    let _request = read_packet(&mut stream).await.unwrap();
    let ping = read_packet(&mut stream).await.unwrap();

    // Assert
    assert_eq!(
        PingPayload::decode(&ping.payload).unwrap(),
        PingPayload(0x1122_3344_5566_7788)
    );
}

#[tokio::test]
async fn test_status_reply_written_over_duplex_is_readable_by_peer() {
    // Arrange
    let (mut server, mut client) = tokio::io::duplex(4096);
    let status = StatusResponse::sleeping("A sleepy server");

    // Act: server writes the status packet, client reads it back
    write_packet(&mut server, &status.to_packet().unwrap())
        .await
        .unwrap();
    let packet = read_packet(&mut client).await.unwrap();

    // Assert
    let (json, _) = read_string(&packet.payload, 0).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["description"]["text"], "A sleepy server");
    assert_eq!(value["version"]["protocol"], 999);
}

#[tokio::test]
async fn test_runaway_length_varint_is_corrupt_and_stops_reading() {
    // Arrange: ten continuation bytes, then something that would look valid
    let mut bytes = vec![0xFF; 10];
    bytes.extend(encode_packet(&Packet::new(0x00, Vec::new())));
    let mut reader: &[u8] = &bytes;

    // Act
    let result = read_packet(&mut reader).await;

    // Assert: rejected after the fifth byte, the rest is untouched
    assert_eq!(result, Err(ProtocolError::CorruptVarInt));
    assert_eq!(reader.len(), bytes.len() - 5);
}

#[tokio::test]
async fn test_oversized_declared_length_is_rejected() {
    let mut bytes = Vec::new();
    encode_varint((MAX_PACKET_LEN + 1) as u32, &mut bytes);
    let mut reader: &[u8] = &bytes;
    assert!(matches!(
        read_packet(&mut reader).await,
        Err(ProtocolError::PacketTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_peer_closing_mid_packet_is_truncated() {
    // Arrange: client writes half a handshake and hangs up
    let (mut server, mut client) = tokio::io::duplex(64);
    let handshake = encode_packet(
        &HandshakeRequest {
            protocol_version: 47,
            server_address: "example.org".to_string(),
            server_port: 25565,
            next_state: NextState::Login,
        }
        .to_packet(),
    );
    client.write_all(&handshake[..6]).await.unwrap();
    drop(client);

    // Act
    let result = read_packet(&mut server).await;

    // Assert
    assert_eq!(result, Err(ProtocolError::TruncatedPacket));
    let mut rest = Vec::new();
    assert_eq!(server.read_to_end(&mut rest).await.unwrap(), 0);
}
