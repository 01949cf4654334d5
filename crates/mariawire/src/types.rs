//! Field type codes and text-literal escaping.
//!
//! This module provides:
//! - The `MYSQL_TYPE_*` codes the engine sends or recognizes
//! - The mapping from a value's [`ValueKind`] to its bulk parameter type
//! - Legacy text-protocol escaping for strings and identifiers

#![allow(clippy::cast_possible_truncation)]

use mariawire_core::ValueKind;

/// Field type codes.
///
/// These are the `MYSQL_TYPE_*` constants of the C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    /// TINYINT, also used for booleans
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    /// VARCHAR; numbers and text travel as strings in bulk rows
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type code. Unknown codes are treated as strings.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    /// Parameter type sent in a bulk header for a value of this kind.
    ///
    /// NULL is declared as a string; the per-value indicator carries the null.
    pub const fn for_bulk(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => FieldType::Tiny,
            ValueKind::Date => FieldType::DateTime,
            ValueKind::Blob | ValueKind::Geometry => FieldType::LongBlob,
            ValueKind::Null | ValueKind::Number | ValueKind::Text => FieldType::VarChar,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Escape sequence for one byte under the legacy text-literal table.
///
/// `%` and `_` are deliberately left alone: they only matter inside `LIKE`.
pub const fn legacy_escape(byte: u8) -> Option<&'static [u8; 2]> {
    match byte {
        0x00 => Some(b"\\0"),
        b'\'' => Some(b"\\'"),
        b'"' => Some(b"\\\""),
        0x08 => Some(b"\\b"),
        b'\n' => Some(b"\\n"),
        b'\r' => Some(b"\\r"),
        b'\t' => Some(b"\\t"),
        0x1A => Some(b"\\Z"),
        b'\\' => Some(b"\\\\"),
        _ => None,
    }
}

/// Quote and escape a string literal for the text protocol.
///
/// ```
/// use mariawire::types::escape_string;
///
/// assert_eq!(escape_string("it's"), r"'it\'s'");
/// ```
pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        let escaped = if ch.is_ascii() { legacy_escape(ch as u8) } else { None };
        match escaped {
            Some(seq) => {
                result.push('\\');
                result.push(char::from(seq[1]));
            }
            None => result.push(ch),
        }
    }
    result.push('\'');
    result
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn escape_id(id: &str) -> String {
    let mut result = String::with_capacity(id.len() + 2);
    result.push('`');
    for ch in id.chars() {
        if ch == '`' {
            result.push('`');
        }
        result.push(ch);
    }
    result.push('`');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string_legacy_table() {
        let input = "a'\nb\tc\rd\\e%_\u{1a}";
        assert_eq!(escape_string(input), "'a\\'\\nb\\tc\\rd\\\\e%_\\Z'");
    }

    #[test]
    fn test_escape_string_controls() {
        assert_eq!(escape_string("\0\u{8}\""), "'\\0\\b\\\"'");
        assert_eq!(escape_string("caf\u{e9}"), "'caf\u{e9}'");
        assert_eq!(escape_string(""), "''");
    }

    #[test]
    fn test_escape_id() {
        assert_eq!(escape_id("users"), "`users`");
        assert_eq!(escape_id("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0x0C), FieldType::DateTime);
        assert_eq!(FieldType::from_u8(0xFB), FieldType::LongBlob);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
    }

    #[test]
    fn test_bulk_type_codes() {
        assert_eq!(FieldType::for_bulk(ValueKind::Null).code(), 0x0F);
        assert_eq!(FieldType::for_bulk(ValueKind::Bool).code(), 0x01);
        assert_eq!(FieldType::for_bulk(ValueKind::Number).code(), 0x0F);
        assert_eq!(FieldType::for_bulk(ValueKind::Date).code(), 0x0C);
        assert_eq!(FieldType::for_bulk(ValueKind::Blob).code(), 0xFB);
        assert_eq!(FieldType::for_bulk(ValueKind::Geometry).code(), 0xFB);
        assert_eq!(FieldType::for_bulk(ValueKind::Text).code(), 0x0F);
    }
}
