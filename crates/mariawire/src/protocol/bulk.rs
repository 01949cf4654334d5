//! Bulk execute encoding (COM_STMT_BULK_EXECUTE).
//!
//! A bulk packet is a header followed by rows of parameters back to back:
//!
//! ```text
//! 0xFA | statement id (4) | flags (2) | (type code, 0x00) x columns
//! then per value: 0x00 + value, or 0x01 for NULL
//! ```
//!
//! Rows carry no delimiters. The encoder remembers where the last complete
//! row ended (the mark) and only ever closes a packet there. A packet is
//! closed when a row's type signature does not fit the header or when the
//! next row would push the packet over the size ceiling. Each closed packet
//! is an independent sub-batch command with sequence numbers from 0.

#![allow(clippy::cast_possible_truncation)]

use mariawire_core::{EncodeError, Error, Result, Value, ValueKind};

use crate::charset::Charset;
use crate::config::{Diagnostic, WireConfig};
use crate::protocol::wkb::encode_wkb;
use crate::protocol::writer::{encode_binary_date, encode_lenenc_int};
use crate::protocol::{Command, MAX_PAYLOAD_LEN, PacketWriter, Sequence};
use crate::transport::Transport;
use crate::types::FieldType;

/// Statement id meaning "the statement prepared last on this connection".
pub const LAST_PREPARED_STATEMENT: u32 = 0xFFFF_FFFF;

/// Header flag: parameter types are sent.
pub const BULK_SEND_TYPES: u16 = 0x0080;

const INDICATOR_NONE: u8 = 0x00;
const INDICATOR_NULL: u8 = 0x01;

/// Payload offset of the first column's type code.
const HEADER_TYPES_OFFSET: usize = 7;

/// Outcome of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Rows encoded
    pub rows: usize,
    /// Sub-batch packets produced
    pub sub_batches: usize,
    /// Sub-batch packets actually handed to the transport
    pub sent_sub_batches: usize,
    /// Sequence state after each sent sub-batch; responses continue from it
    pub sequences: Vec<Sequence>,
}

/// Encodes rows of one prepared statement into bulk packets.
///
/// ```
/// use mariawire::{BulkEncoder, MemoryTransport, PacketWriter, WireConfig};
/// use mariawire_core::Value;
///
/// let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
/// let mut bulk = BulkEncoder::begin_batch(&mut writer, 2)?;
/// bulk.append_row(&[Value::from(1_i64), Value::from("a")])?;
/// bulk.append_row(&[Value::from(2_i64), Value::Null])?;
/// let summary = bulk.end_batch()?;
/// assert_eq!(summary.sub_batches, 1);
/// # Ok::<(), mariawire_core::Error>(())
/// ```
#[derive(Debug)]
pub struct BulkEncoder<'w, T: Transport> {
    writer: &'w mut PacketWriter<T>,
    column_count: usize,
    statement_id: u32,
    /// Type codes declared by the open header; `None` marks a column first
    /// seen as NULL whose type can still be settled
    header: Vec<Option<u8>>,
    open: bool,
    max_packet: usize,
    rows: usize,
    rows_in_packet: usize,
    sub_batches: usize,
    sent_sub_batches: usize,
    sequences: Vec<Sequence>,
    warned_oversize: bool,
    was_muted: bool,
    scratch: Vec<u8>,
}

impl<'w, T: Transport> BulkEncoder<'w, T> {
    /// Start a batch of rows with `column_count` parameters each.
    #[tracing::instrument(level = "debug", skip(writer))]
    pub fn begin_batch(writer: &'w mut PacketWriter<T>, column_count: usize) -> Result<Self> {
        if column_count == 0 {
            return Err(Error::Encode(EncodeError {
                row: None,
                position: None,
                message: "a bulk batch needs at least one parameter".to_string(),
            }));
        }
        if writer.in_packet() {
            return Err(Error::protocol(
                "cannot begin a bulk batch while another packet is under construction",
            ));
        }
        let max_allowed = writer.config().max_allowed_packet as usize;
        let was_muted = writer.is_muted();
        Ok(Self {
            writer,
            column_count,
            statement_id: LAST_PREPARED_STATEMENT,
            header: Vec::with_capacity(column_count),
            open: false,
            max_packet: max_allowed.min(MAX_PAYLOAD_LEN),
            rows: 0,
            rows_in_packet: 0,
            sub_batches: 0,
            sent_sub_batches: 0,
            sequences: Vec::new(),
            warned_oversize: false,
            was_muted,
            scratch: Vec::new(),
        })
    }

    /// Target an explicit statement id instead of the last prepared one.
    pub fn statement_id(mut self, id: u32) -> Self {
        self.statement_id = id;
        self
    }

    /// Rows appended so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether a server error has latched the encoder.
    pub fn is_error_latched(&self) -> bool {
        self.writer.is_muted() && !self.was_muted
    }

    /// Encode one row.
    ///
    /// The row is validated and encoded in full before any of it is written,
    /// so a rejected row leaves the open packet untouched.
    pub fn append_row(&mut self, row: &[Value]) -> Result<()> {
        let index = self.rows;
        check_arity(row, index, self.column_count)?;
        let signature = encode_row(
            row,
            index,
            self.writer.charset(),
            self.writer.config(),
            &mut self.scratch,
        )?;

        if self.open {
            if !self.accepts(&signature) {
                self.writer.config().report(Diagnostic::BulkSignatureChanged {
                    row: index,
                    previous: declared_codes(&self.header),
                    next: declared_codes(&signature),
                });
                self.finish_sub_batch()?;
            } else if self.rows_in_packet > 0
                && self.writer.packet_len() + self.scratch.len() > self.max_packet
            {
                tracing::debug!(
                    row = index,
                    packet_len = self.writer.packet_len(),
                    row_len = self.scratch.len(),
                    "bulk packet full, starting new sub-batch"
                );
                self.finish_sub_batch()?;
            }
        }

        if self.open {
            self.settle_header(&signature)?;
        } else {
            self.open_sub_batch(&signature)?;
        }

        self.writer.write_bytes(&self.scratch)?;
        self.rows += 1;
        self.rows_in_packet += 1;
        self.check_allowed_size();
        Ok(())
    }

    /// The server reported an error for this batch.
    ///
    /// Encoding goes on so local state stays consistent, but nothing more
    /// reaches the transport.
    pub fn mark_error(&mut self) {
        if !self.writer.is_muted() {
            tracing::debug!(rows = self.rows, "bulk batch latched on server error");
        }
        self.writer.set_muted(true);
    }

    /// Close the open sub-batch and report what was produced.
    #[tracing::instrument(level = "debug", skip(self), fields(rows = self.rows))]
    pub fn end_batch(mut self) -> Result<BulkSummary> {
        if self.open {
            self.finish_sub_batch()?;
        }
        self.writer.set_muted(self.was_muted);
        Ok(BulkSummary {
            rows: self.rows,
            sub_batches: self.sub_batches,
            sent_sub_batches: self.sent_sub_batches,
            sequences: std::mem::take(&mut self.sequences),
        })
    }

    /// Whether a row with `signature` can join the open sub-batch.
    ///
    /// NULL values fit any column. A column declared from a NULL can take a
    /// new type only while the header is still in the buffer.
    fn accepts(&self, signature: &[Option<u8>]) -> bool {
        let patchable = !self.writer.is_streaming();
        self.header
            .iter()
            .zip(signature)
            .all(|(declared, incoming)| match (declared, incoming) {
                (_, None) => true,
                (Some(a), Some(b)) => a == b,
                (None, Some(b)) => patchable || *b == FieldType::VarChar.code(),
            })
    }

    /// Fix the type of header columns first declared from a NULL.
    fn settle_header(&mut self, signature: &[Option<u8>]) -> Result<()> {
        for (column, (declared, incoming)) in self.header.iter_mut().zip(signature).enumerate() {
            if let (None, Some(code)) = (*declared, *incoming) {
                if code != FieldType::VarChar.code() {
                    self.writer
                        .patch_byte(HEADER_TYPES_OFFSET + 2 * column, code)?;
                }
                *declared = Some(code);
            }
        }
        Ok(())
    }

    fn open_sub_batch(&mut self, signature: &[Option<u8>]) -> Result<()> {
        self.writer.start_packet(Sequence::new())?;
        self.writer.write_u8(Command::StmtBulkExecute.code())?;
        self.writer.write_u32_le(self.statement_id)?;
        self.writer.write_u16_le(BULK_SEND_TYPES)?;
        for code in signature {
            self.writer
                .write_u8(code.unwrap_or(FieldType::VarChar.code()))?;
            self.writer.write_u8(0)?;
        }
        self.header.clear();
        self.header.extend_from_slice(signature);
        self.open = true;
        self.rows_in_packet = 0;
        self.warned_oversize = false;
        Ok(())
    }

    fn finish_sub_batch(&mut self) -> Result<()> {
        self.writer.flush(true)?;
        self.open = false;
        self.sub_batches += 1;
        if !self.writer.is_muted() {
            self.sent_sub_batches += 1;
            self.sequences.push(self.writer.sequence());
        }
        tracing::debug!(
            sub_batch = self.sub_batches,
            rows = self.rows_in_packet,
            muted = self.writer.is_muted(),
            "bulk sub-batch finished"
        );
        Ok(())
    }

    fn check_allowed_size(&mut self) {
        let max_allowed = self.writer.config().max_allowed_packet;
        let size = self.writer.packet_len();
        if !self.warned_oversize && size > max_allowed as usize {
            self.warned_oversize = true;
            self.writer.config().report(Diagnostic::PacketAboveMaxAllowed {
                size,
                max_allowed,
            });
        }
    }
}

impl<T: Transport> Drop for BulkEncoder<'_, T> {
    fn drop(&mut self) {
        if self.open {
            self.writer.abort();
        }
        self.writer.set_muted(self.was_muted);
    }
}

/// Check rows the way [`BulkEncoder::append_row`] would, writing nothing.
///
/// The first rejection is returned with its row index and column.
pub fn validate_rows<R: AsRef<[Value]>>(
    rows: &[R],
    column_count: usize,
    charset: Charset,
    config: &WireConfig,
) -> Result<()> {
    let mut scratch = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        check_arity(row, index, column_count)?;
        encode_row(row, index, charset, config, &mut scratch)?;
    }
    Ok(())
}

fn check_arity(row: &[Value], index: usize, column_count: usize) -> Result<()> {
    if row.len() == column_count {
        return Ok(());
    }
    Err(Error::Encode(EncodeError::row(
        index,
        format!("expected {column_count} parameters, got {}", row.len()),
    )))
}

fn declared_codes(signature: &[Option<u8>]) -> Vec<u8> {
    signature
        .iter()
        .map(|code| code.unwrap_or(FieldType::VarChar.code()))
        .collect()
}

/// Encode a row's values into `out` and return its type signature.
fn encode_row(
    row: &[Value],
    index: usize,
    charset: Charset,
    config: &WireConfig,
    out: &mut Vec<u8>,
) -> Result<Vec<Option<u8>>> {
    out.clear();
    let mut signature = Vec::with_capacity(row.len());
    for (position, value) in row.iter().enumerate() {
        let kind = value.kind();
        if kind == ValueKind::Null {
            out.push(INDICATOR_NULL);
            signature.push(None);
            continue;
        }
        out.push(INDICATOR_NONE);
        encode_value(value, kind, charset, config, out).map_err(|err| match err {
            Error::Encode(e) => Error::Encode(EncodeError::at(index, position, e.message)),
            other => other,
        })?;
        signature.push(Some(FieldType::for_bulk(kind).code()));
    }
    Ok(signature)
}

fn encode_value(
    value: &Value,
    kind: ValueKind,
    charset: Charset,
    config: &WireConfig,
    out: &mut Vec<u8>,
) -> Result<()> {
    match kind {
        ValueKind::Null => {}
        ValueKind::Bool => out.push(u8::from(value.as_bool().unwrap_or(false))),
        ValueKind::Date => {
            if let Value::DateTime(instant) = value {
                let mut encoded = [0u8; 12];
                let len = encode_binary_date(instant, config, &mut encoded)?;
                out.extend_from_slice(&encoded[..len]);
            }
        }
        ValueKind::Blob => put_lenenc_bytes(out, value.as_bytes().unwrap_or_default()),
        ValueKind::Geometry => {
            let Some(geometry) = value.as_geometry() else {
                return Err(Error::Encode(EncodeError {
                    row: None,
                    position: None,
                    message: "value is not a geometry".to_string(),
                }));
            };
            // Internal geometry format: SRID 0 followed by WKB
            let mut wkb = vec![0, 0, 0, 0];
            encode_wkb(&geometry, &mut wkb);
            put_lenenc_bytes(out, &wkb);
        }
        ValueKind::Number | ValueKind::Text => {
            let text = value.to_text().unwrap_or_default();
            put_lenenc_bytes(out, &charset.encode(&text));
        }
    }
    Ok(())
}

fn put_lenenc_bytes(out: &mut Vec<u8>, data: &[u8]) {
    let mut prefix = [0u8; 9];
    let len = encode_lenenc_int(data.len() as u64, &mut prefix);
    out.extend_from_slice(&prefix[..len]);
    out.extend_from_slice(data);
}
