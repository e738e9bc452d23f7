//! Packet iteration and per-direction message reassembly.
//!
//! TDS messages (a SQL Batch or an RPC invocation) can span multiple packets.
//! [`iter_packets`] splits a byte buffer into complete packets, leaving any
//! trailing partial packet for the next read. [`MessageAssembler`] then
//! accumulates packet payloads for one packet type until the
//! `END_OF_MESSAGE` status bit is seen.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

/// Cap on undelivered bytes held in a per-direction reassembly buffer.
///
/// A direction that accumulates more than this without completing a packet
/// is treated as a protocol violation rather than left to grow unbounded.
pub const DEFAULT_REASSEMBLY_CAP: usize = 1 << 20;

/// A single decoded packet: its header and payload slice.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Decoded header.
    pub header: PacketHeader,
    /// Payload bytes (header excluded).
    pub payload: Bytes,
}

/// Split `buf` into zero or more complete packets.
///
/// Returns the decoded packets plus the number of bytes consumed from the
/// front of `buf`. Any bytes at `buf[consumed..]` are an incomplete trailing
/// packet and must be carried over to the next read.
pub fn iter_packets(buf: &[u8]) -> Result<(Vec<Packet>, usize), ProtocolError> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    while buf.len() - offset >= PACKET_HEADER_SIZE {
        let header_slice = &buf[offset..offset + PACKET_HEADER_SIZE];
        let mut cursor = header_slice;
        let header = match PacketHeader::decode(&mut cursor) {
            Ok(h) => h,
            Err(ProtocolError::IncompletePacket { .. }) => break,
            Err(e) => return Err(e),
        };

        if (header.length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::PacketTooShort(header.length));
        }

        let total_len = header.length as usize;
        if buf.len() - offset < total_len {
            // Not enough bytes yet for the full packet; wait for more data.
            break;
        }

        let payload_start = offset + PACKET_HEADER_SIZE;
        let payload_end = offset + total_len;
        let payload = Bytes::copy_from_slice(&buf[payload_start..payload_end]);
        packets.push(Packet { header, payload });
        offset = payload_end;
    }

    Ok((packets, offset))
}

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// The packet type carried by every packet of this message.
    pub packet_type: PacketType,
    /// The complete message payload (all packets concatenated).
    pub payload: Bytes,
}

/// Accumulates packet payloads of a single in-progress message.
///
/// Used once per connection direction per message kind (a SQL Batch
/// assembler and a separate RPC assembler, since the two can theoretically
/// interleave at the framer level even though in practice a connection
/// sends one message kind at a time).
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
    cap: usize,
}

impl MessageAssembler {
    /// Create a new assembler with the default reassembly cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_REASSEMBLY_CAP)
    }

    /// Create a new assembler with an explicit cap on accumulated bytes.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            packet_type: None,
            packet_count: 0,
            cap,
        }
    }

    /// Push one packet's payload into the assembler.
    ///
    /// Returns `Ok(Some(message))` once `status` carries `END_OF_MESSAGE`,
    /// `Ok(None)` while more packets are expected, and `Err` if the
    /// accumulated buffer would exceed the configured cap.
    pub fn push(
        &mut self,
        packet_type: PacketType,
        status: PacketStatus,
        payload: &[u8],
    ) -> Result<Option<Message>, ProtocolError> {
        if self.packet_type.is_none() {
            self.packet_type = Some(packet_type);
        }

        if self.buffer.len() + payload.len() > self.cap {
            return Err(ProtocolError::ReassemblyOverflow { limit: self.cap });
        }

        self.buffer.extend_from_slice(payload);
        self.packet_count += 1;

        tracing::trace!(
            ?packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = status.contains(PacketStatus::END_OF_MESSAGE),
            "assembling message"
        );

        if status.contains(PacketStatus::END_OF_MESSAGE) {
            let message = Message {
                packet_type: self
                    .packet_type
                    .take()
                    .unwrap_or(PacketType::SqlBatch),
                payload: self.buffer.split().freeze(),
            };
            self.packet_count = 0;
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Whether a message is partially accumulated.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Number of packets accumulated for the in-progress message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Bytes currently buffered for the in-progress message.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial message data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header_bytes(packet_type: PacketType, status: PacketStatus, payload_len: usize) -> Vec<u8> {
        let header = PacketHeader::new(
            packet_type,
            status,
            (PACKET_HEADER_SIZE + payload_len) as u16,
        );
        header.encode_to_bytes().to_vec()
    }

    #[test]
    fn test_iter_packets_single() {
        let mut buf = header_bytes(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 5);
        buf.extend_from_slice(b"hello");

        let (packets, consumed) = iter_packets(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].payload[..], b"hello");
    }

    #[test]
    fn test_iter_packets_partial_trailing() {
        let mut buf = header_bytes(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 5);
        buf.extend_from_slice(b"hello");
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x20]); // a truncated header

        let (packets, consumed) = iter_packets(&buf).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(consumed, buf.len() - 4);
    }

    #[test]
    fn test_iter_packets_two_in_one_buffer() {
        let mut buf = header_bytes(PacketType::SqlBatch, PacketStatus::NORMAL, 3);
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&header_bytes(
            PacketType::SqlBatch,
            PacketStatus::END_OF_MESSAGE,
            2,
        ));
        buf.extend_from_slice(b"de");

        let (packets, consumed) = iter_packets(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0].payload[..], b"abc");
        assert_eq!(&packets[1].payload[..], b"de");
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler
            .push(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, b"hello")
            .unwrap()
            .expect("should complete message");
        assert_eq!(message.packet_type, PacketType::SqlBatch);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();

        assert!(
            assembler
                .push(PacketType::SqlBatch, PacketStatus::NORMAL, b"hello ")
                .unwrap()
                .is_none()
        );
        assert!(assembler.has_partial());
        assert_eq!(assembler.packet_count(), 1);

        assert!(
            assembler
                .push(PacketType::SqlBatch, PacketStatus::NORMAL, b"world")
                .unwrap()
                .is_none()
        );
        assert_eq!(assembler.packet_count(), 2);

        let message = assembler
            .push(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, b"!")
            .unwrap()
            .expect("should complete message");

        assert_eq!(&message.payload[..], b"hello world!");
        assert!(!assembler.has_partial());
        assert_eq!(assembler.packet_count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::new();
        assembler
            .push(PacketType::SqlBatch, PacketStatus::NORMAL, b"partial")
            .unwrap();
        assert!(assembler.has_partial());

        assembler.clear();
        assert!(!assembler.has_partial());
        assert_eq!(assembler.buffer_len(), 0);
    }

    #[test]
    fn test_reassembly_overflow() {
        let mut assembler = MessageAssembler::with_cap(4);
        let err = assembler
            .push(PacketType::SqlBatch, PacketStatus::NORMAL, b"hello")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ReassemblyOverflow { limit: 4 }));
    }
}
