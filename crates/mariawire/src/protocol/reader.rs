//! Packet reading utilities.
//!
//! [`PacketReader`] is a cursor over one logical packet. Every read is
//! bounds-checked; running off the end of the payload is a protocol error
//! rather than a short read.

#![allow(clippy::cast_possible_truncation)]

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mariawire_core::{Error, Geometry, GeometryType, Result, ServerError};

use crate::charset::Charset;
use crate::protocol::wkb::decode_wkb;
use crate::protocol::{EofPacket, OkPacket};

/// A reader for protocol data.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
    charset: Charset,
    extended_metadata: bool,
}

impl<'a> PacketReader<'a> {
    /// Create a reader that decodes text as utf8mb4.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_charset(data, Charset::default())
    }

    pub fn with_charset(data: &'a [u8], charset: Charset) -> Self {
        Self {
            data,
            pos: 0,
            charset,
            extended_metadata: false,
        }
    }

    /// Decode empty geometry columns to a type tag instead of NULL.
    pub fn with_extended_metadata(mut self, enabled: bool) -> Self {
        self.extended_metadata = enabled;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn truncated(&self, wanted: usize) -> Error {
        Error::Protocol(mariawire_core::ProtocolError {
            message: format!(
                "packet truncated: needed {wanted} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            ),
            raw_data: Some(self.data.to_vec()),
            source: None,
        })
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a signed 64-bit value stored as an unsigned low half followed by
    /// a signed high half.
    pub fn read_big_int_le(&mut self) -> Result<i64> {
        let low = self.read_u32_le()?;
        let high = self.read_u32_le()? as i32;
        Ok((i64::from(high) << 32) | i64::from(low))
    }

    /// Read a length-encoded integer.
    ///
    /// - 0xFB: NULL
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - anything else: the byte is the value
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0xFB => Ok(None),
            0xFC => self.read_u16_le().map(|v| Some(u64::from(v))),
            0xFD => self.read_u24_le().map(|v| Some(u64::from(v))),
            0xFE => self.read_u64_le().map(Some),
            other => Ok(Some(u64::from(other))),
        }
    }

    /// Read a length-encoded byte slice. `None` for SQL NULL.
    pub fn read_lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_lenenc_int()? {
            Some(len) => {
                let len = usize::try_from(len).map_err(|_| self.truncated(usize::MAX))?;
                self.read_bytes(len).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Read a length-encoded string, decoded with the packet charset.
    pub fn read_lenenc_string(&mut self) -> Result<Option<Cow<'a, str>>> {
        let charset = self.charset;
        Ok(self.read_lenenc_bytes()?.map(|bytes| charset.decode(bytes)))
    }

    /// Read a null-terminated string. A missing terminator reads to the end.
    pub fn read_null_string(&mut self) -> Cow<'a, str> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        self.pos += len;
        if self.pos < self.data.len() {
            self.pos += 1;
        }
        self.charset.decode(&rest[..len])
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Result<Cow<'a, str>> {
        let charset = self.charset;
        self.read_bytes(len).map(|bytes| charset.decode(bytes))
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> Cow<'a, str> {
        let charset = self.charset;
        charset.decode(self.read_rest())
    }

    /// Read a length-encoded `YYYY-MM-DD` text date.
    ///
    /// NULL and the zero date decode to `None`.
    pub fn read_date(&mut self) -> Result<Option<NaiveDate>> {
        let Some(text) = self.read_lenenc_bytes()? else {
            return Ok(None);
        };
        let groups = digit_groups(text)?;
        if groups.len() < 3 {
            return Err(Error::protocol(format!(
                "malformed date {:?}",
                String::from_utf8_lossy(text)
            )));
        }
        date_from_groups(&groups, text)
    }

    /// Read a length-encoded `YYYY-MM-DD HH:MM:SS[.ffffff]` text timestamp.
    ///
    /// NULL and zero dates decode to `None`.
    pub fn read_date_time(&mut self) -> Result<Option<NaiveDateTime>> {
        let Some(text) = self.read_lenenc_bytes()? else {
            return Ok(None);
        };
        let groups = digit_groups(text)?;
        if groups.len() < 3 {
            return Err(Error::protocol(format!(
                "malformed datetime {:?}",
                String::from_utf8_lossy(text)
            )));
        }
        let Some(date) = date_from_groups(&groups, text)? else {
            return Ok(None);
        };
        let field = |i: usize| groups.get(i).map_or(0, |g| g.value);
        let micros = groups.get(6).map_or(0, DigitGroup::as_micros);
        let time = NaiveTime::from_hms_micro_opt(field(3), field(4), field(5), micros)
            .ok_or_else(|| {
                Error::protocol(format!(
                    "invalid time in {:?}",
                    String::from_utf8_lossy(text)
                ))
            })?;
        Ok(Some(date.and_time(time)))
    }

    /// Read a binary-protocol DATE/DATETIME/TIMESTAMP value.
    ///
    /// The length byte selects the form: 0 (zero date), 4 (date), 7 (date
    /// and time) or 11 (with microseconds).
    pub fn read_binary_date_time(&mut self) -> Result<Option<NaiveDateTime>> {
        let len = self.read_u8()?;
        if len == 0 {
            return Ok(None);
        }
        if !matches!(len, 4 | 7 | 11) {
            return Err(Error::protocol(format!("invalid binary date length {len}")));
        }
        let year = self.read_u16_le()?;
        let month = self.read_u8()?;
        let day = self.read_u8()?;
        let (hour, minute, second) = if len >= 7 {
            (self.read_u8()?, self.read_u8()?, self.read_u8()?)
        } else {
            (0, 0, 0)
        };
        let micros = if len == 11 { self.read_u32_le()? } else { 0 };
        if year == 0 && month == 0 && day == 0 {
            return Ok(None);
        }
        NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
            .and_then(|date| {
                date.and_hms_micro_opt(
                    u32::from(hour),
                    u32::from(minute),
                    u32::from(second),
                    micros,
                )
            })
            .map(Some)
            .ok_or_else(|| {
                Error::protocol(format!(
                    "invalid binary datetime {year}-{month}-{day} {hour}:{minute}:{second}.{micros}"
                ))
            })
    }

    /// Read a length-encoded geometry value (4-byte SRID followed by WKB).
    ///
    /// NULL and empty values decode to `default`, which callers build with
    /// [`empty_geometry`].
    pub fn read_geometry(&mut self, default: Option<Geometry>) -> Result<Option<Geometry>> {
        let data = match self.read_lenenc_bytes()? {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(default),
        };
        if data.len() < 4 {
            return Err(Error::protocol(format!(
                "geometry value of {} bytes has no SRID",
                data.len()
            )));
        }
        decode_wkb(&data[4..]).map(Some)
    }

    /// Read a geometry column whose declared type name is `type_name`.
    ///
    /// Empty values follow the reader's extended-metadata setting.
    pub fn read_geometry_column(&mut self, type_name: Option<&str>) -> Result<Option<Geometry>> {
        self.read_geometry(empty_geometry(type_name, self.extended_metadata))
    }

    /// Parse an ERR packet.
    ///
    /// Format: 0xFF marker, 2-byte error code, optional `#` plus 5-character
    /// SQLSTATE, message text.
    pub fn read_error(&mut self) -> Result<ServerError> {
        if self.peek() == Some(0xFF) {
            self.skip(1)?;
        }
        let code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1)?;
            self.read_string(5)?.into_owned()
        } else {
            ServerError::DEFAULT_SQL_STATE.to_string()
        };
        let message = self.read_rest_string().into_owned();
        Ok(ServerError::new(code, sql_state, message))
    }

    /// Parse an OK packet.
    ///
    /// Format: 0x00 marker, affected rows (lenenc), last insert id (lenenc),
    /// status flags (2), warnings (2), optional info text.
    pub fn parse_ok_packet(&mut self) -> Result<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1)?;
        }
        let affected_rows = self.read_lenenc_int()?.unwrap_or(0);
        let last_insert_id = self.read_lenenc_int()?.unwrap_or(0);
        let status_flags = self.read_u16_le()?;
        let warnings = self.read_u16_le()?;
        let info = self.read_rest_string().into_owned();

        Ok(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an EOF packet: 0xFE marker, warnings (2), status flags (2).
    pub fn parse_eof_packet(&mut self) -> Result<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1)?;
        }
        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;

        Ok(EofPacket {
            warnings,
            status_flags,
        })
    }
}

/// Value an empty or NULL geometry column decodes to.
///
/// With extended metadata the column's declared type name is known and the
/// value becomes a bare type tag; otherwise it is NULL.
pub fn empty_geometry(type_name: Option<&str>, extended_metadata: bool) -> Option<Geometry> {
    if !extended_metadata {
        return None;
    }
    type_name
        .and_then(GeometryType::from_column_type_name)
        .map(Geometry::Empty)
}

#[derive(Debug, Clone, Copy)]
struct DigitGroup {
    value: u32,
    digits: u32,
}

impl DigitGroup {
    /// Interpret a fractional-seconds group as microseconds.
    fn as_micros(&self) -> u32 {
        if self.digits <= 6 {
            self.value * 10_u32.pow(6 - self.digits)
        } else {
            self.value / 10_u32.pow(self.digits - 6)
        }
    }
}

/// Split ASCII text into runs of digits, ignoring the separators.
fn digit_groups(text: &[u8]) -> Result<Vec<DigitGroup>> {
    let mut groups = Vec::with_capacity(7);
    let mut current: Option<DigitGroup> = None;
    for &byte in text {
        if byte.is_ascii_digit() {
            let group = current.get_or_insert(DigitGroup { value: 0, digits: 0 });
            if group.digits == 9 {
                return Err(Error::protocol(format!(
                    "digit group too long in {:?}",
                    String::from_utf8_lossy(text)
                )));
            }
            group.value = group.value * 10 + u32::from(byte - b'0');
            group.digits += 1;
        } else if let Some(group) = current.take() {
            groups.push(group);
        }
    }
    groups.extend(current);
    Ok(groups)
}

fn date_from_groups(groups: &[DigitGroup], text: &[u8]) -> Result<Option<NaiveDate>> {
    let (year, month, day) = (groups[0].value, groups[1].value, groups[2].value);
    if year == 0 && month == 0 && day == 0 {
        return Ok(None);
    }
    let year = i32::try_from(year).unwrap_or(i32::MAX);
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Some)
        .ok_or_else(|| {
            Error::protocol(format!(
                "invalid date {:?}",
                String::from_utf8_lossy(text)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenenc_text(text: &str) -> Vec<u8> {
        let mut data = vec![text.len() as u8];
        data.extend_from_slice(text.as_bytes());
        data
    }

    #[test]
    fn test_read_fixed_ints() {
        let data = [0x42, 0x34, 0x12, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u16_le().unwrap(), 0x1234);
        assert_eq!(reader.read_u24_le().unwrap(), 0x0012_3456);
        assert_eq!(reader.read_u32_le().unwrap(), 0x1234_5678);
        assert!(reader.is_empty());
        assert!(matches!(reader.read_u8(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_read_lenenc_int() {
        let mut reader = PacketReader::new(&[0x42]);
        assert_eq!(reader.read_lenenc_int().unwrap(), Some(0x42));

        let mut reader = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int().unwrap(), Some(0x1234));

        let mut reader = PacketReader::new(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int().unwrap(), Some(0x0012_3456));

        let mut reader =
            PacketReader::new(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(
            reader.read_lenenc_int().unwrap(),
            Some(0x0807_0605_0403_0201)
        );

        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(reader.read_lenenc_int().unwrap(), None);

        let mut reader = PacketReader::new(&[0xFF]);
        assert_eq!(reader.read_lenenc_int().unwrap(), Some(0xFF));
    }

    #[test]
    fn test_read_lenenc_truncated() {
        let mut reader = PacketReader::new(&[0xFC, 0x34]);
        assert!(reader.read_lenenc_int().is_err());

        let mut reader = PacketReader::new(&[0x05, b'a', b'b']);
        assert!(reader.read_lenenc_bytes().is_err());
    }

    #[test]
    fn test_read_lenenc_string_charset() {
        let data = [0x04, b'c', b'a', b'f', 0xE9, 0xFB];
        let mut reader = PacketReader::with_charset(&data, Charset::Latin1);
        assert_eq!(reader.read_lenenc_string().unwrap().unwrap(), "caf\u{e9}");
        assert_eq!(reader.read_lenenc_string().unwrap(), None);
    }

    #[test]
    fn test_read_big_int_le() {
        let mut data = Vec::new();
        data.extend_from_slice(&(-2_i64).to_le_bytes());
        data.extend_from_slice(&0x0000_0001_0000_0002_i64.to_le_bytes());
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_big_int_le().unwrap(), -2);
        assert_eq!(reader.read_big_int_le().unwrap(), 0x0000_0001_0000_0002);
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"abc\0def");
        assert_eq!(reader.read_null_string(), "abc");
        assert_eq!(reader.read_null_string(), "def");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_date() {
        let data = lenenc_text("2024-02-29");
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            reader.read_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );

        let data = lenenc_text("0000-00-00");
        assert_eq!(PacketReader::new(&data).read_date().unwrap(), None);

        let data = lenenc_text("2023-02-30");
        assert!(PacketReader::new(&data).read_date().is_err());
    }

    #[test]
    fn test_read_date_time() {
        let data = lenenc_text("2024-05-06 07:08:09.12");
        let parsed = PacketReader::new(&data).read_date_time().unwrap().unwrap();
        assert_eq!(parsed.to_string(), "2024-05-06 07:08:09.120");

        let data = lenenc_text("2024-05-06");
        let parsed = PacketReader::new(&data).read_date_time().unwrap().unwrap();
        assert_eq!(parsed.to_string(), "2024-05-06 00:00:00");

        let data = lenenc_text("0000-00-00 00:00:00");
        assert_eq!(PacketReader::new(&data).read_date_time().unwrap(), None);

        assert_eq!(PacketReader::new(&[0xFB]).read_date_time().unwrap(), None);
    }

    #[test]
    fn test_read_binary_date_time() {
        let data = [11, 0xE8, 0x07, 5, 6, 7, 8, 9, 0x40, 0xE2, 0x01, 0x00];
        let parsed = PacketReader::new(&data)
            .read_binary_date_time()
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_string(), "2024-05-06 07:08:09.123456");

        let data = [4, 0xE8, 0x07, 5, 6];
        let parsed = PacketReader::new(&data)
            .read_binary_date_time()
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_string(), "2024-05-06 00:00:00");

        assert_eq!(
            PacketReader::new(&[0]).read_binary_date_time().unwrap(),
            None
        );
        assert!(PacketReader::new(&[5, 0, 0, 0, 0, 0])
            .read_binary_date_time()
            .is_err());
    }

    #[test]
    fn test_read_geometry_empty_uses_default() {
        let default = empty_geometry(Some("point"), true);
        let mut reader = PacketReader::new(&[0x00]);
        let geometry = reader.read_geometry(default).unwrap().unwrap();
        assert_eq!(geometry.to_geojson(), serde_json::json!({"type": "Point"}));

        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(
            reader
                .read_geometry(empty_geometry(Some("point"), false))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_read_geometry_column_follows_extended_metadata() {
        let mut reader = PacketReader::new(&[0xFB, 0x00]).with_extended_metadata(true);
        assert_eq!(
            reader.read_geometry_column(Some("polygon")).unwrap(),
            Some(Geometry::Empty(GeometryType::Polygon))
        );
        assert_eq!(reader.read_geometry_column(None).unwrap(), None);

        let mut plain = PacketReader::new(&[0xFB]);
        assert_eq!(plain.read_geometry_column(Some("polygon")).unwrap(), None);
    }

    #[test]
    fn test_read_geometry_with_srid() {
        let mut value = vec![0, 0, 0, 0, 1, 1, 0, 0, 0];
        value.extend_from_slice(&1.5_f64.to_le_bytes());
        value.extend_from_slice(&2.5_f64.to_le_bytes());
        let mut data = vec![value.len() as u8];
        data.extend_from_slice(&value);

        let geometry = PacketReader::new(&data)
            .read_geometry(None)
            .unwrap()
            .unwrap();
        assert_eq!(geometry, Geometry::Point([1.5, 2.5]));
    }

    #[test]
    fn test_read_error_with_state() {
        let mut data = vec![0xFF, 0x26, 0x04, b'#'];
        data.extend_from_slice(b"23000Duplicate entry '1' for key 'PRIMARY'");
        let err = PacketReader::new(&data).read_error().unwrap();
        assert_eq!(err.code, 1062);
        assert_eq!(err.sql_state, "23000");
        assert_eq!(err.message, "Duplicate entry '1' for key 'PRIMARY'");
        assert!(!err.fatal);
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_read_error_fatal_classes() {
        let mut data = vec![0xFF, 0x87, 0x07, b'#'];
        data.extend_from_slice(b"08S01Connection reset");
        assert!(PacketReader::new(&data).read_error().unwrap().fatal);

        let mut data = vec![0xFF, 0x35, 0x05, b'#'];
        data.extend_from_slice(b"70100Query execution was interrupted");
        assert!(PacketReader::new(&data).read_error().unwrap().fatal);
    }

    #[test]
    fn test_read_error_without_state() {
        let data = [0xFF, 0x15, 0x04, b'n', b'o'];
        let err = PacketReader::new(&data).read_error().unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state, "HY000");
        assert_eq!(err.message, "no");
        assert!(!err.fatal);
    }

    #[test]
    fn test_parse_ok_packet() {
        let data = [0x00, 0x05, 0x0A, 0x02, 0x00, 0x01, 0x00, b'h', b'i'];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 5);
        assert_eq!(ok.last_insert_id, 10);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, "hi");
    }

    #[test]
    fn test_parse_eof_packet() {
        let data = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let eof = PacketReader::new(&data).parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 0);
        assert_eq!(eof.status_flags, 2);
        assert!(PacketReader::new(&[0xFE, 0x00]).parse_eof_packet().is_err());
    }
}
