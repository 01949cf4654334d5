//! Wire protocol implementation.
//!
//! Every frame has a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! A frame carries at most 2^24 - 1 bytes. Longer logical packets are split
//! into consecutive full frames; a frame shorter than the maximum ends the
//! packet, so a payload that is an exact multiple of the maximum is closed
//! by an empty frame.

#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod bulk;
pub mod reader;
pub mod wkb;
pub mod writer;

pub use buffer::OutputBuffer;
pub use bulk::{BulkEncoder, BulkSummary};
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload size of a single frame (2^24 - 1 bytes).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Command codes (COM_xxx) the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Ping server
    Ping = 0x0e,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Send long data for prepared statement
    StmtSendLongData = 0x18,
    /// Close prepared statement
    StmtClose = 0x19,
    /// Reset prepared statement
    StmtReset = 0x1a,
    /// Reset connection
    ResetConnection = 0x1f,
    /// MariaDB bulk execute
    StmtBulkExecute = 0xfa,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Frame sequence counter.
///
/// Sequence numbers are scoped to one command: they restart at 0 for every
/// new request and advance by one (mod 256) for each frame in either
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence {
    next: u8,
}

impl Sequence {
    /// Counter for a new command.
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    pub const fn starting_at(next: u8) -> Self {
        Self { next }
    }

    /// The number the next frame will carry.
    pub const fn peek(self) -> u8 {
        self.next
    }

    /// Take the next number and advance.
    pub fn next_value(&mut self) -> u8 {
        let value = self.next;
        self.next = value.wrapping_add(1);
        value
    }

    /// Record a received frame's number. Returns `false` when it was not the
    /// expected one; the counter follows the received value either way.
    pub fn observe(&mut self, received: u8) -> bool {
        let in_order = received == self.next;
        self.next = received.wrapping_add(1);
        in_order
    }
}

/// A frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = HEADER_SIZE;

    /// Parse a header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }

    /// A full frame means the logical packet continues in the next frame.
    pub fn is_continued(&self) -> bool {
        self.payload_length as usize == MAX_PAYLOAD_LEN
    }
}

/// Server response packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE with a short payload)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else (column definitions, rows, ...)
    Data,
}

impl PacketType {
    /// Classify a payload by its first byte.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }

    /// Classify a whole payload. An empty payload is data.
    pub fn of(payload: &[u8]) -> Self {
        payload
            .first()
            .map_or(PacketType::Data, |&b| Self::from_first_byte(b, payload.len()))
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Info string (if any)
    pub info: String,
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

/// Render bytes as a spaced hex string for packet tracing.
pub(crate) fn hex_dump(data: &[u8], limit: usize) -> String {
    use std::fmt::Write;

    let shown = &data[..data.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3 + 16);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    if data.len() > limit {
        let _ = write!(out, " ... (+{} bytes)", data.len() - limit);
    }
    out
}
