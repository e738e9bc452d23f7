//! Errors produced while framing and reassembling TDS packets.

use thiserror::Error;

/// Errors returned by packet header decoding and message reassembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes were available than a complete packet header requires.
    #[error("incomplete packet header: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required for a full header.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The type byte did not match a known TDS packet type.
    #[error("invalid packet type: 0x{0:02x}")]
    InvalidPacketType(u8),

    /// The status byte contained bits outside the known flag set.
    #[error("invalid packet status: 0x{0:02x}")]
    InvalidPacketStatus(u8),

    /// A packet declared a length shorter than the header itself.
    #[error("packet length {0} is smaller than the header size")]
    PacketTooShort(u16),

    /// The per-direction reassembly buffer grew past its configured cap
    /// without completing a message.
    #[error("reassembly buffer exceeded {limit} bytes without end-of-message")]
    ReassemblyOverflow {
        /// Configured cap, in bytes.
        limit: usize,
    },
}

/// Convenience alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
