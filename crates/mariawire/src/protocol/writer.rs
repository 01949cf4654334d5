//! Packet writing utilities.
//!
//! [`PacketWriter`] builds one logical packet at a time in an
//! [`OutputBuffer`] and hands finished frames to a [`Transport`]. Values
//! that do not fit in the largest buffer tier are streamed: the buffer is
//! filled, sent as a full continuation frame, and writing resumes in a fresh
//! buffer. That is how payloads above 16MB are split.

#![allow(clippy::cast_possible_truncation)]

use chrono::{DateTime, Datelike, Timelike, Utc};
use mariawire_core::{EncodeError, Error, Result, Value};

use crate::charset::Charset;
use crate::config::{Diagnostic, WireConfig};
use crate::protocol::buffer::OutputBuffer;
use crate::protocol::{Command, MAX_PAYLOAD_LEN, PacketHeader, Sequence, hex_dump};
use crate::transport::Transport;

/// How many bytes of each frame the packet log shows.
const LOG_PACKET_BYTES: usize = 512;

/// A writer for outgoing packets.
#[derive(Debug)]
pub struct PacketWriter<T: Transport> {
    transport: T,
    buffer: OutputBuffer,
    sequence: Sequence,
    charset: Charset,
    config: WireConfig,
    in_packet: bool,
    muted: bool,
    /// Payload bytes of the current packet already sent as continuation frames
    streamed: usize,
}

impl<T: Transport> PacketWriter<T> {
    /// Create a writer over a transport.
    pub fn new(transport: T, config: &WireConfig) -> Self {
        Self {
            transport,
            buffer: OutputBuffer::new(),
            sequence: Sequence::new(),
            charset: config.charset(),
            config: config.clone(),
            in_packet: false,
            muted: false,
            streamed: 0,
        }
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Switch the text encoding used by string writers.
    pub fn set_charset(&mut self, charset: Charset) {
        self.charset = charset;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Sequence state after the last frame written.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Whether frames are currently withheld from the transport.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Keep building and flushing but stop handing frames to the transport.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Whether a packet is under construction.
    pub fn in_packet(&self) -> bool {
        self.in_packet
    }

    /// Payload bytes of the current packet, sent and buffered.
    pub fn packet_len(&self) -> usize {
        self.streamed + self.buffer.payload_len()
    }

    /// Bytes of the current packet still in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.payload_len()
    }

    /// Whether the current packet has already sent continuation frames.
    pub fn is_streaming(&self) -> bool {
        self.streamed > 0
    }

    /// Begin a packet whose frames are numbered from `sequence`.
    ///
    /// The writer is not reentrant: the previous packet must have been
    /// flushed with `flush(true)` or abandoned with [`abort`](Self::abort).
    pub fn start_packet(&mut self, sequence: Sequence) -> Result<()> {
        if self.in_packet {
            return Err(Error::protocol(
                "a packet is already under construction; flush it before starting another",
            ));
        }
        self.buffer.reset();
        self.sequence = sequence;
        self.in_packet = true;
        self.streamed = 0;
        Ok(())
    }

    /// Begin a new command packet: sequence 0 followed by the command byte.
    pub fn start_command(&mut self, command: Command) -> Result<()> {
        self.start_packet(Sequence::new())?;
        self.write_u8(command.code())
    }

    /// Discard the packet under construction.
    pub fn abort(&mut self) {
        if self.streamed > 0 {
            tracing::warn!(
                streamed = self.streamed,
                "abandoning a packet after continuation frames were sent; connection framing is broken"
            );
        }
        self.buffer.reset();
        self.in_packet = false;
        self.streamed = 0;
    }

    /// Write raw bytes, growing the buffer or streaming full frames as needed.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.buffer.ensure(data.len()) {
            self.buffer.put(data);
            return Ok(());
        }
        let mut rest = data;
        loop {
            let room = self.buffer.remaining();
            if rest.len() <= room {
                self.buffer.put(rest);
                return Ok(());
            }
            let (head, tail) = rest.split_at(room);
            self.buffer.put(head);
            rest = tail;
            self.flush(false)?;
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        if self.buffer.ensure(1) {
            self.buffer.put_u8(value);
            Ok(())
        } else {
            self.write_bytes(&[value])
        }
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()[..3])
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a length-encoded integer.
    ///
    /// - below 0xFB: 1-byte value
    /// - 0xFC + 2 bytes: values up to 2^16
    /// - 0xFD + 3 bytes: values up to 2^24
    /// - 0xFE + 8 bytes: everything else
    pub fn write_lenenc_int(&mut self, value: u64) -> Result<()> {
        let mut encoded = [0u8; 9];
        let len = encode_lenenc_int(value, &mut encoded);
        self.write_bytes(&encoded[..len])
    }

    /// Write a length-encoded byte slice.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_lenenc_int(data.len() as u64)?;
        self.write_bytes(data)
    }

    /// Write a length-encoded string in the connection charset.
    pub fn write_lenenc_string(&mut self, s: &str) -> Result<()> {
        let charset = self.charset;
        self.write_lenenc_bytes(&charset.encode(s))
    }

    /// Write text in the connection charset without quoting or escaping.
    pub fn write_string_raw(&mut self, s: &str) -> Result<()> {
        let charset = self.charset;
        self.write_bytes(&charset.encode(s))
    }

    /// Write a quoted, escaped string literal.
    ///
    /// `'`, `"`, `\` and NUL are backslash-escaped.
    pub fn write_string_escaped(&mut self, s: &str) -> Result<()> {
        let charset = self.charset;
        let worst = s.len().saturating_mul(2).saturating_add(2);
        if self.buffer.ensure(worst) {
            let mut sink = SliceSink::new(self.buffer.unfilled());
            escape_str(s, charset, &mut sink);
            let written = sink.len;
            self.buffer.advance(written);
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(s.len() + s.len() / 8 + 2);
        escape_str(s, charset, &mut encoded);
        self.write_bytes(&encoded)
    }

    /// Write a quoted, escaped string literal from UTF-16 code units.
    ///
    /// Surrogate pairs are combined into one code point. An unpaired
    /// surrogate is replaced with `?` and reported as a
    /// [`Diagnostic::UnpairedSurrogate`].
    pub fn write_utf16_escaped(&mut self, units: &[u16]) -> Result<()> {
        let charset = self.charset;
        let mut replaced = Vec::new();
        let worst = units.len().saturating_mul(3).saturating_add(2);
        if self.buffer.ensure(worst) {
            let mut sink = SliceSink::new(self.buffer.unfilled());
            escape_utf16(units, charset, &mut sink, &mut replaced);
            let written = sink.len;
            self.buffer.advance(written);
        } else {
            let mut encoded = Vec::with_capacity(units.len() + 2);
            escape_utf16(units, charset, &mut encoded, &mut replaced);
            self.write_bytes(&encoded)?;
        }
        for position in replaced {
            self.config.report(Diagnostic::UnpairedSurrogate { position });
        }
        Ok(())
    }

    /// Write an instant in the binary DATETIME layout.
    ///
    /// The instant is converted to wall-clock fields in the configured
    /// timezone. The 7-byte form is used unless there are microseconds.
    pub fn write_binary_date(&mut self, instant: &DateTime<Utc>) -> Result<()> {
        let mut encoded = [0u8; 12];
        let len = encode_binary_date(instant, &self.config, &mut encoded)?;
        self.write_bytes(&encoded[..len])
    }

    /// Write a value as a text-protocol SQL literal.
    pub fn write_text_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.write_bytes(b"NULL"),
            Value::Bool(b) => self.write_bytes(if *b { b"true" } else { b"false" }),
            Value::Int(_) | Value::UInt(_) | Value::Decimal(_) => match value.to_text() {
                Some(text) => self.write_bytes(text.as_bytes()),
                None => self.write_bytes(b"NULL"),
            },
            Value::Double(f) => {
                if f.is_nan() {
                    self.write_bytes(b"NULL")
                } else if f.is_infinite() {
                    self.write_bytes(if f.is_sign_positive() { b"1e308" } else { b"-1e308" })
                } else {
                    self.write_bytes(f.to_string().as_bytes())
                }
            }
            Value::Text(s) => self.write_string_escaped(s),
            Value::Bytes(data) => {
                let mut encoded = Vec::with_capacity(data.len() + 10);
                encoded.extend_from_slice(b"_binary'");
                for &byte in data {
                    push_escaped_byte(byte, &mut encoded);
                }
                encoded.push(b'\'');
                self.write_bytes(&encoded)
            }
            Value::DateTime(instant) => {
                let local = self.config.timezone.naive_local(instant);
                let text = local.format("'%Y-%m-%d %H:%M:%S%.6f'").to_string();
                self.write_bytes(text.as_bytes())
            }
            Value::Geometry(_) | Value::Json(_) => match value.as_geometry() {
                Some(geometry) => {
                    self.write_bytes(b"ST_GeomFromText(")?;
                    self.write_string_escaped(&geometry.to_wkt())?;
                    self.write_u8(b')')
                }
                None => match value.to_text() {
                    Some(text) => self.write_string_escaped(&text),
                    None => self.write_bytes(b"NULL"),
                },
            },
            Value::Raw(sql) => self.write_string_raw(sql),
        }
    }

    /// Overwrite a byte of the current packet that is still buffered.
    pub fn patch_byte(&mut self, payload_offset: usize, byte: u8) -> Result<()> {
        if self.streamed > 0 || payload_offset >= self.buffer.payload_len() {
            return Err(Error::protocol(format!(
                "payload offset {payload_offset} is no longer in the buffer"
            )));
        }
        self.buffer.patch(payload_offset, byte);
        Ok(())
    }

    /// Send the buffered frame.
    ///
    /// A non-final flush is only legal on a full frame and continues the
    /// packet in a fresh maximum-size buffer. A final flush ends the packet;
    /// when its last frame is exactly the maximum size an empty frame follows
    /// so the receiver knows the packet is complete.
    pub fn flush(&mut self, is_final: bool) -> Result<()> {
        if !self.in_packet {
            return Err(Error::protocol("flush called without a packet under construction"));
        }
        let payload_len = self.buffer.payload_len();
        if !is_final && payload_len != MAX_PAYLOAD_LEN {
            return Err(Error::protocol(format!(
                "cannot continue a packet after a partial frame of {payload_len} bytes"
            )));
        }
        let sequence_id = self.sequence.next_value();
        let frame = self.buffer.take_frame(sequence_id, !is_final);
        self.emit(frame);

        if is_final {
            if payload_len == MAX_PAYLOAD_LEN {
                let header = PacketHeader {
                    payload_length: 0,
                    sequence_id: self.sequence.next_value(),
                };
                self.emit(header.to_bytes().to_vec());
            }
            self.in_packet = false;
            self.streamed = 0;
        } else {
            self.streamed += payload_len;
        }
        Ok(())
    }

    fn emit(&mut self, frame: Vec<u8>) {
        let sequence_id = frame[3];
        tracing::trace!(
            len = frame.len() - 4,
            sequence_id,
            muted = self.muted,
            "frame out"
        );
        if self.config.log_packets {
            tracing::trace!(
                target: "mariawire::packets",
                sequence_id,
                "send {}",
                hex_dump(&frame, LOG_PACKET_BYTES)
            );
        }
        if !self.muted {
            self.transport.send(frame);
        }
    }
}

/// Encode a length-encoded integer into `out`, returning the byte count.
pub fn encode_lenenc_int(value: u64, out: &mut [u8; 9]) -> usize {
    if value < 0xFB {
        out[0] = value as u8;
        1
    } else if value < 0x1_0000 {
        out[0] = 0xFC;
        out[1..3].copy_from_slice(&(value as u16).to_le_bytes());
        3
    } else if value < 0x100_0000 {
        out[0] = 0xFD;
        out[1..4].copy_from_slice(&(value as u32).to_le_bytes()[..3]);
        4
    } else {
        out[0] = 0xFE;
        out[1..9].copy_from_slice(&value.to_le_bytes());
        9
    }
}

/// Encoded size of a length-encoded integer.
pub const fn lenenc_int_len(value: u64) -> usize {
    if value < 0xFB {
        1
    } else if value < 0x1_0000 {
        3
    } else if value < 0x100_0000 {
        4
    } else {
        9
    }
}

/// Encode an instant in the binary DATETIME layout, returning the byte count.
pub(crate) fn encode_binary_date(
    instant: &DateTime<Utc>,
    config: &WireConfig,
    out: &mut [u8; 12],
) -> Result<usize> {
    let local = config.timezone.naive_local(instant);
    let year = u16::try_from(local.year())
        .ok()
        .filter(|year| *year <= 9999)
        .ok_or_else(|| {
            Error::Encode(EncodeError {
                row: None,
                position: None,
                message: format!("year {} is outside the DATETIME range", local.year()),
            })
        })?;
    // Leap seconds report up to 1_999_999 microseconds
    let micros = (local.nanosecond() / 1000).min(999_999);
    let len = if micros == 0 { 7 } else { 11 };
    out[0] = len;
    out[1..3].copy_from_slice(&year.to_le_bytes());
    out[3] = local.month() as u8;
    out[4] = local.day() as u8;
    out[5] = local.hour() as u8;
    out[6] = local.minute() as u8;
    out[7] = local.second() as u8;
    out[8..12].copy_from_slice(&micros.to_le_bytes());
    Ok(usize::from(len) + 1)
}

/// Destination for escaped bytes.
trait ByteSink {
    fn push(&mut self, byte: u8);
    fn extend(&mut self, bytes: &[u8]);
}

impl ByteSink for Vec<u8> {
    fn push(&mut self, byte: u8) {
        Vec::push(self, byte);
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Writes directly into a buffer region known to be large enough.
struct SliceSink<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> SliceSink<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }
}

impl ByteSink for SliceSink<'_> {
    fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        let end = self.len + bytes.len();
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
    }
}

fn push_escaped_byte<S: ByteSink + ?Sized>(byte: u8, sink: &mut S) {
    match byte {
        b'\'' | b'"' | b'\\' => {
            sink.push(b'\\');
            sink.push(byte);
        }
        0 => {
            sink.push(b'\\');
            sink.push(b'0');
        }
        _ => sink.push(byte),
    }
}

fn push_escaped_char<S: ByteSink>(ch: char, charset: Charset, sink: &mut S, scratch: &mut [u8; 4]) {
    if ch.is_ascii() {
        push_escaped_byte(ch as u8, sink);
    } else {
        sink.extend(charset.encode_char(ch, scratch));
    }
}

fn escape_str<S: ByteSink>(text: &str, charset: Charset, sink: &mut S) {
    sink.push(b'\'');
    if charset.passes_through(text) {
        // Escaped bytes are ASCII, which never occurs inside a multi-byte sequence
        for &byte in text.as_bytes() {
            push_escaped_byte(byte, sink);
        }
    } else {
        let mut scratch = [0u8; 4];
        for ch in text.chars() {
            push_escaped_char(ch, charset, sink, &mut scratch);
        }
    }
    sink.push(b'\'');
}

fn escape_utf16<S: ByteSink>(
    units: &[u16],
    charset: Charset,
    sink: &mut S,
    replaced: &mut Vec<usize>,
) {
    sink.push(b'\'');
    let mut scratch = [0u8; 4];
    let mut index = 0;
    for decoded in char::decode_utf16(units.iter().copied()) {
        match decoded {
            Ok(ch) => {
                index += ch.len_utf16();
                push_escaped_char(ch, charset, sink, &mut scratch);
            }
            Err(_) => {
                replaced.push(index);
                index += 1;
                sink.push(b'?');
            }
        }
    }
    sink.push(b'\'');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timezone;
    use crate::transport::MemoryTransport;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn writer() -> PacketWriter<MemoryTransport> {
        PacketWriter::new(MemoryTransport::new(), &WireConfig::new().timezone(Timezone::utc()))
    }

    fn single_payload(writer: &PacketWriter<MemoryTransport>) -> Vec<u8> {
        let frames = writer.transport().frames();
        assert_eq!(frames.len(), 1);
        frames[0][4..].to_vec()
    }

    #[test]
    fn test_small_packet_frame() {
        let mut w = writer();
        w.start_command(Command::Ping).unwrap();
        w.flush(true).unwrap();
        assert_eq!(w.transport().frames(), &[vec![1, 0, 0, 0, 0x0E]]);
        assert_eq!(w.sequence().peek(), 1);
        assert!(!w.in_packet());
    }

    #[test]
    fn test_write_ints() {
        let mut w = writer();
        w.start_packet(Sequence::starting_at(3)).unwrap();
        w.write_u16_le(0x1234).unwrap();
        w.write_u24_le(0x0012_3456).unwrap();
        w.write_u32_le(0x1234_5678).unwrap();
        w.write_u64_le(0x0807_0605_0403_0201).unwrap();
        w.flush(true).unwrap();
        let frame = &w.transport().frames()[0];
        assert_eq!(frame[3], 3);
        assert_eq!(
            &frame[4..],
            &[
                0x34, 0x12, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x01, 0x02, 0x03, 0x04,
                0x05, 0x06, 0x07, 0x08
            ]
        );
    }

    #[test]
    fn test_write_lenenc_int_tiers() {
        let cases: [(u64, &[u8]); 5] = [
            (0xFA, &[0xFA]),
            (0xFB, &[0xFC, 0xFB, 0x00]),
            (0x1234, &[0xFC, 0x34, 0x12]),
            (0x12_3456, &[0xFD, 0x56, 0x34, 0x12]),
            (0x0100_0000, &[0xFE, 0, 0, 0, 1, 0, 0, 0, 0]),
        ];
        for (value, expected) in cases {
            let mut w = writer();
            w.start_packet(Sequence::new()).unwrap();
            w.write_lenenc_int(value).unwrap();
            w.flush(true).unwrap();
            assert_eq!(single_payload(&w), expected, "value {value:#x}");
            assert_eq!(lenenc_int_len(value), expected.len());
        }
    }

    #[test]
    fn test_write_string_escaped() {
        let mut w = writer();
        w.start_packet(Sequence::new()).unwrap();
        w.write_string_escaped("it's \"x\" \\ \0 caf\u{e9}").unwrap();
        w.flush(true).unwrap();
        assert_eq!(
            single_payload(&w),
            "'it\\'s \\\"x\\\" \\\\ \\0 caf\u{e9}'".as_bytes()
        );
    }

    #[test]
    fn test_write_string_escaped_latin1() {
        let config = WireConfig::new().collation(crate::charset::collation::LATIN1_SWEDISH_CI);
        let mut w = PacketWriter::new(MemoryTransport::new(), &config);
        w.start_packet(Sequence::new()).unwrap();
        w.write_string_escaped("caf\u{e9}'\u{20ac}").unwrap();
        w.flush(true).unwrap();
        assert_eq!(single_payload(&w), b"'caf\xe9\\'?'");
    }

    #[test]
    fn test_write_string_escaped_utf8mb3() {
        let config = WireConfig::new().collation(crate::charset::collation::UTF8_GENERAL_CI);
        let mut w = PacketWriter::new(MemoryTransport::new(), &config);
        w.start_packet(Sequence::new()).unwrap();
        w.write_string_escaped("\u{20ac}'\u{1F600}").unwrap();
        w.flush(true).unwrap();
        assert_eq!(single_payload(&w), "'\u{20ac}\\'?'".as_bytes());
    }

    #[test]
    fn test_write_utf16_surrogates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = WireConfig::new().diagnostics(move |d| sink.lock().unwrap().push(d.clone()));
        let mut w = PacketWriter::new(MemoryTransport::new(), &config);

        // "a", U+1F3A4 as a pair, lone low surrogate, "'", lone high surrogate
        let units = [0x61, 0xD83C, 0xDFA4, 0xDC00, 0x27, 0xD800];
        w.start_packet(Sequence::new()).unwrap();
        w.write_utf16_escaped(&units).unwrap();
        w.flush(true).unwrap();

        let mut expected = b"'a".to_vec();
        expected.extend_from_slice("\u{1F3A4}".as_bytes());
        expected.extend_from_slice(b"?\\'?'");
        assert_eq!(single_payload(&w), expected);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[
                Diagnostic::UnpairedSurrogate { position: 3 },
                Diagnostic::UnpairedSurrogate { position: 5 },
            ]
        );
    }

    #[test]
    fn test_write_binary_date() {
        let mut w = writer();
        let instant = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        w.start_packet(Sequence::new()).unwrap();
        w.write_binary_date(&instant).unwrap();
        w.write_binary_date(&(instant + chrono::Duration::microseconds(123_456)))
            .unwrap();
        w.flush(true).unwrap();
        assert_eq!(
            single_payload(&w),
            vec![
                7, 0xE8, 0x07, 5, 6, 7, 8, 9, //
                11, 0xE8, 0x07, 5, 6, 7, 8, 9, 0x40, 0xE2, 0x01, 0x00
            ]
        );
    }

    #[test]
    fn test_write_binary_date_offset() {
        let tz = Timezone::Offset(chrono::FixedOffset::east_opt(3600).unwrap());
        let mut w = PacketWriter::new(MemoryTransport::new(), &WireConfig::new().timezone(tz));
        let instant = Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap();
        w.start_packet(Sequence::new()).unwrap();
        w.write_binary_date(&instant).unwrap();
        w.flush(true).unwrap();
        assert_eq!(single_payload(&w), vec![7, 0xE9, 0x07, 1, 1, 0, 30, 0]);
    }

    #[test]
    fn test_write_text_values() {
        let mut w = writer();
        w.start_packet(Sequence::new()).unwrap();
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-5),
            Value::Bytes(vec![0, b'\'', 0xFF]),
            Value::Raw("NOW()".into()),
            Value::from(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            Value::from(mariawire_core::Geometry::Point([1.0, 2.0])),
        ] {
            w.write_text_value(&value).unwrap();
            w.write_u8(b',').unwrap();
        }
        w.flush(true).unwrap();
        let mut expected = b"NULL,true,-5,_binary'\\0\\'\xff',NOW(),".to_vec();
        expected.extend_from_slice(b"'2024-01-02 03:04:05.000000',ST_GeomFromText('POINT(1 2)'),");
        assert_eq!(single_payload(&w), expected);
    }

    #[test]
    fn test_start_packet_not_reentrant() {
        let mut w = writer();
        w.start_packet(Sequence::new()).unwrap();
        assert!(matches!(
            w.start_packet(Sequence::new()),
            Err(Error::Protocol(_))
        ));
        w.abort();
        assert!(w.start_packet(Sequence::new()).is_ok());
    }

    #[test]
    fn test_partial_non_final_flush_rejected() {
        let mut w = writer();
        w.start_packet(Sequence::new()).unwrap();
        w.write_u8(1).unwrap();
        assert!(w.flush(false).is_err());
        assert!(w.transport().frames().is_empty());
        assert!(w.flush(true).is_ok());
        assert!(w.flush(true).is_err());
    }

    #[test]
    fn test_muted_writer_sends_nothing() {
        let mut w = writer();
        w.set_muted(true);
        w.start_packet(Sequence::new()).unwrap();
        w.write_bytes(b"abc").unwrap();
        w.flush(true).unwrap();
        assert!(w.transport().frames().is_empty());
        assert_eq!(w.sequence().peek(), 1);
    }

    #[test]
    fn test_large_value_streams_frames() {
        let mut w = writer();
        let data = vec![0xAB; MAX_PAYLOAD_LEN + 10];
        w.start_packet(Sequence::new()).unwrap();
        w.write_bytes(&data).unwrap();
        assert!(w.is_streaming());
        assert_eq!(w.packet_len(), MAX_PAYLOAD_LEN + 10);
        w.flush(true).unwrap();

        let frames = w.transport().frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..4], &[0xFF, 0xFF, 0xFF, 0]);
        assert_eq!(&frames[1][..4], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_exact_max_payload_gets_empty_terminator() {
        let mut w = writer();
        w.start_packet(Sequence::new()).unwrap();
        w.write_bytes(&vec![1; MAX_PAYLOAD_LEN]).unwrap();
        w.flush(true).unwrap();

        let frames = w.transport().frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), MAX_PAYLOAD_LEN + 4);
        assert_eq!(frames[1], vec![0, 0, 0, 1]);
    }
}
