//! # tds-protocol
//!
//! Packet-level framing and message reassembly for the MS-TDS (Tabular Data
//! Stream) protocol used by Microsoft SQL Server.
//!
//! This crate decodes the 8-byte TDS packet header, splits a byte buffer
//! into complete packets, and reassembles multi-packet SQL Batch and RPC
//! messages. It recognizes the full TDS packet type space (login, pre-login,
//! tabular result, and so on) for header parsing, but only SQL Batch and RPC
//! payloads are passed on to higher layers for further decoding.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic
//! and makes no assumptions about the async runtime; the connection pipe
//! built on top of it owns all socket I/O.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_protocol::packet::{PacketHeader, PacketStatus, PacketType};
//! use tds_protocol::framer::iter_packets;
//!
//! let (packets, consumed) = iter_packets(&buf)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framer;
pub mod packet;

pub use error::ProtocolError;
pub use framer::{iter_packets, Message, MessageAssembler, Packet, DEFAULT_REASSEMBLY_CAP};
pub use packet::{
    PacketHeader, PacketStatus, PacketType, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE,
    PACKET_HEADER_SIZE,
};
