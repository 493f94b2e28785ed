use std::io::{self, Read, Write};
use std::time::Instant;

use byteorder::{BigEndian, ByteOrder};
use log::trace;
use once_cell::sync::Lazy;
use strum::{Display, FromRepr};

use crate::role::{role_from_wire, role_to_wire, Role};


pub const HEADER_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, FromRepr)]
#[repr(u8)]
pub enum PacketType {
    // Unused sentinel.
    None = 0,
    // Client-to-server requests.
    Login = 1,
    Users = 2,
    Invite = 3,
    Revoke = 4,
    Accept = 5,
    Decline = 6,
    Move = 7,
    Resign = 8,
    // Server-to-client synchronous replies.
    Ack = 9,
    Nack = 10,
    // Server-to-client asynchronous notifications.
    Invited = 11,
    Revoked = 12,
    Accepted = 13,
    Declined = 14,
    Moved = 15,
    Resigned = 16,
    Ended = 17,
}

#[derive(Debug)]
pub enum ProtocolError {
    // EOF or short read on the receiving side.
    Disconnected,
    // The peer's socket went away mid-write.
    PeerGone(io::Error),
    InvalidPacket(&'static str),
}

// Wire layout, big-endian: type, invitation id, role, one reserved byte,
// u16 payload size, two reserved bytes, u32 seconds and u32 nanoseconds of
// the sender's monotonic clock. Invitation ids are local to the recipient.
#[derive(Clone, Copy, Debug)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub id: u8,
    pub role: Option<Role>,
    pub payload_size: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> Self {
        PacketHeader {
            packet_type,
            id: 0,
            role: None,
            payload_size: 0,
            timestamp_sec: 0,
            timestamp_nsec: 0,
        }
    }

    pub fn encode(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf[0] = self.packet_type as u8;
        buf[1] = self.id;
        buf[2] = role_to_wire(self.role);
        BigEndian::write_u16(&mut buf[4..6], self.payload_size);
        BigEndian::write_u32(&mut buf[8..12], self.timestamp_sec);
        BigEndian::write_u32(&mut buf[12..16], self.timestamp_nsec);
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let packet_type = PacketType::from_repr(buf[0])
            .ok_or(ProtocolError::InvalidPacket("unknown packet type"))?;
        let role =
            role_from_wire(buf[2]).map_err(|_| ProtocolError::InvalidPacket("bad role field"))?;
        Ok(PacketHeader {
            packet_type,
            id: buf[1],
            role,
            payload_size: BigEndian::read_u16(&buf[4..6]),
            timestamp_sec: BigEndian::read_u32(&buf[8..12]),
            timestamp_nsec: BigEndian::read_u32(&buf[12..16]),
        })
    }
}

// Timestamps count from the first packet the process ever sends; only
// monotonicity matters, not the epoch.
static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

// Serializes and writes one packet. The caller is responsible for exclusive
// access to the writer (the session write-mutex): packets from concurrent
// senders must not interleave.
pub fn send_packet(
    writer: &mut impl Write, header: &PacketHeader, payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    if (header.payload_size == 0) != payload.is_none()
        || payload.map_or(0, <[u8]>::len) != usize::from(header.payload_size)
    {
        return Err(ProtocolError::InvalidPacket("payload does not match header size"));
    }
    let elapsed = PROCESS_EPOCH.elapsed();
    let mut stamped = *header;
    stamped.timestamp_sec = elapsed.as_secs() as u32;
    stamped.timestamp_nsec = elapsed.subsec_nanos();
    let mut buf = [0u8; HEADER_SIZE];
    stamped.encode(&mut buf);
    writer.write_all(&buf).map_err(ProtocolError::PeerGone)?;
    if let Some(payload) = payload {
        writer.write_all(payload).map_err(ProtocolError::PeerGone)?;
    }
    trace_packet("send", &stamped, payload);
    Ok(())
}

// Reads exactly one packet; the payload buffer is freshly allocated and
// exactly `payload_size` bytes. Any EOF or short read reports
// `Disconnected`.
pub fn recv_packet(
    reader: &mut impl Read,
) -> Result<(PacketHeader, Option<Vec<u8>>), ProtocolError> {
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).map_err(|_| ProtocolError::Disconnected)?;
    let header = PacketHeader::decode(&buf)?;
    let payload = if header.payload_size > 0 {
        let mut payload = vec![0u8; usize::from(header.payload_size)];
        reader.read_exact(&mut payload).map_err(|_| ProtocolError::Disconnected)?;
        Some(payload)
    } else {
        None
    };
    trace_packet("recv", &header, payload.as_deref());
    Ok((header, payload))
}

fn trace_packet(direction: &str, header: &PacketHeader, payload: Option<&[u8]>) {
    trace!(
        "{}: {} id={} role={} size={} ts={}.{:09}",
        direction,
        header.packet_type,
        header.id,
        role_to_wire(header.role),
        header.payload_size,
        header.timestamp_sec,
        header.timestamp_nsec,
    );
}
