use std::io::Cursor;

use noughts::protocol::{
    recv_packet, send_packet, PacketHeader, PacketType, ProtocolError, HEADER_SIZE,
};
use noughts::role::Role;


#[test]
fn header_layout_is_big_endian_and_16_bytes() {
    let header = PacketHeader {
        id: 3,
        role: Some(Role::Second),
        payload_size: 0x1234,
        timestamp_sec: 0x01020304,
        timestamp_nsec: 0x05060708,
        ..PacketHeader::new(PacketType::Invited)
    };
    let mut buf = [0u8; HEADER_SIZE];
    header.encode(&mut buf);
    assert_eq!(buf, [11, 3, 2, 0, 0x12, 0x34, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
    let decoded = PacketHeader::decode(&buf).unwrap();
    assert_eq!(decoded.packet_type, PacketType::Invited);
    assert_eq!(decoded.id, 3);
    assert_eq!(decoded.role, Some(Role::Second));
    assert_eq!(decoded.payload_size, 0x1234);
    assert_eq!(decoded.timestamp_sec, 0x01020304);
    assert_eq!(decoded.timestamp_nsec, 0x05060708);
}

#[test]
fn send_then_recv_carries_the_payload() {
    let mut wire = Vec::new();
    let header = PacketHeader {
        id: 1,
        payload_size: 5,
        ..PacketHeader::new(PacketType::Moved)
    };
    send_packet(&mut wire, &header, Some(b"5<-X\n")).unwrap();
    assert_eq!(wire.len(), HEADER_SIZE + 5);
    let (received, payload) = recv_packet(&mut Cursor::new(wire)).unwrap();
    assert_eq!(received.packet_type, PacketType::Moved);
    assert_eq!(received.id, 1);
    assert_eq!(payload.as_deref(), Some(&b"5<-X\n"[..]));
}

#[test]
fn send_stamps_a_monotonic_timestamp() {
    let mut first = Vec::new();
    let mut second = Vec::new();
    send_packet(&mut first, &PacketHeader::new(PacketType::Ack), None).unwrap();
    send_packet(&mut second, &PacketHeader::new(PacketType::Ack), None).unwrap();
    let (a, _) = recv_packet(&mut Cursor::new(first)).unwrap();
    let (b, _) = recv_packet(&mut Cursor::new(second)).unwrap();
    let a = (u64::from(a.timestamp_sec), a.timestamp_nsec);
    let b = (u64::from(b.timestamp_sec), b.timestamp_nsec);
    assert!(b >= a);
}

#[test]
fn payload_must_match_the_header() {
    let mut wire = Vec::new();
    let zero_size = PacketHeader::new(PacketType::Login);
    assert!(matches!(
        send_packet(&mut wire, &zero_size, Some(b"alice")),
        Err(ProtocolError::InvalidPacket(_))
    ));
    let five_bytes = PacketHeader { payload_size: 5, ..PacketHeader::new(PacketType::Login) };
    assert!(matches!(
        send_packet(&mut wire, &five_bytes, None),
        Err(ProtocolError::InvalidPacket(_))
    ));
    assert!(matches!(
        send_packet(&mut wire, &five_bytes, Some(b"bob")),
        Err(ProtocolError::InvalidPacket(_))
    ));
    assert!(wire.is_empty());
}

#[test]
fn truncated_input_reports_disconnected() {
    assert!(matches!(
        recv_packet(&mut Cursor::new(vec![0u8; HEADER_SIZE - 1])),
        Err(ProtocolError::Disconnected)
    ));
    // Header promises 10 payload bytes, the wire carries 3.
    let header = PacketHeader { payload_size: 10, ..PacketHeader::new(PacketType::Move) };
    let mut wire = [0u8; HEADER_SIZE];
    header.encode(&mut wire);
    let mut wire = wire.to_vec();
    wire.extend_from_slice(b"5<-");
    assert!(matches!(
        recv_packet(&mut Cursor::new(wire)),
        Err(ProtocolError::Disconnected)
    ));
}

#[test]
fn unknown_type_byte_is_rejected() {
    let mut wire = [0u8; HEADER_SIZE];
    wire[0] = 200;
    assert!(matches!(
        recv_packet(&mut Cursor::new(wire.to_vec())),
        Err(ProtocolError::InvalidPacket(_))
    ));
    let mut wire = [0u8; HEADER_SIZE];
    wire[2] = 7; // bad role
    assert!(matches!(
        recv_packet(&mut Cursor::new(wire.to_vec())),
        Err(ProtocolError::InvalidPacket(_))
    ));
}
