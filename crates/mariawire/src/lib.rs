//! MariaDB/MySQL client wire-protocol engine.
//!
//! This crate implements the byte-level half of a MariaDB connector. It
//! provides:
//!
//! - Packet framing with sequence numbers and multi-frame splitting
//! - Reassembly of transport chunks into logical packets, routed to the
//!   command that is waiting for them
//! - Decoding of protocol primitives and column values (integers,
//!   length-encoded strings, dates, WKB geometry)
//! - Text-protocol value rendering with wire escaping
//! - Bulk execute encoding (COM_STMT_BULK_EXECUTE) with automatic
//!   sub-batch splitting
//!
//! No sockets are opened here: frames go to a [`Transport`] and received
//! bytes are fed to a [`Reassembler`].
//!
//! # Protocol Overview
//!
//! - 3-byte payload length + 1-byte sequence number header
//! - Payloads of 2^24 - 1 bytes or more are split across frames
//! - Sequence numbers restart at 0 for every command
//!
//! # Example
//!
//! ```
//! use mariawire::{CommandCode, MemoryTransport, PacketChannel, ResponseCollector, WireConfig};
//!
//! let mut channel: PacketChannel<_, ResponseCollector> =
//!     PacketChannel::new(MemoryTransport::new(), &WireConfig::default())?;
//! channel.send(CommandCode::Ping, ResponseCollector::count(1), |_| Ok(()))?;
//! assert_eq!(channel.transport().bytes(), vec![1, 0, 0, 0, 0x0e]);
//!
//! channel.feed(&[7, 0, 0, 1, 0x00, 0, 0, 2, 0, 0, 0])?;
//! let ping = channel.pop_finished().unwrap();
//! assert_eq!(ping.packets().len(), 1);
//! # Ok::<(), mariawire_core::Error>(())
//! ```

pub mod channel;
pub mod charset;
pub mod command;
pub mod config;
pub mod protocol;
pub mod reassembler;
pub mod transport;
pub mod types;

pub use channel::PacketChannel;
pub use charset::Charset;
pub use command::{Command, CommandState, ResponseCollector};
pub use config::{Diagnostic, DiagnosticHook, Timezone, WireConfig};
pub use protocol::{
    BulkEncoder, BulkSummary, OutputBuffer, PacketReader, PacketWriter, Sequence,
    Command as CommandCode,
};
pub use reassembler::{Packet, Reassembler};
pub use transport::{IoTransport, MemoryTransport, Transport};
pub use types::{FieldType, escape_id, escape_string};

pub use mariawire_core::{Error, Geometry, Result, Value};
