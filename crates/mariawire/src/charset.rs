//! Charset strategies for text encoding and decoding.
//!
//! The strategy is picked once per connection from the collation id and only
//! swapped on an explicit charset change. UTF-8 collations take the native
//! fast path; single-byte charsets go through a small per-code-point codec.

use std::borrow::Cow;

/// Collation ids the engine recognizes by name.
#[allow(dead_code)]
pub mod collation {
    pub const LATIN1_SWEDISH_CI: u16 = 8;
    pub const ASCII_GENERAL_CI: u16 = 11;
    pub const UTF8_GENERAL_CI: u16 = 33;
    pub const UTF8MB4_GENERAL_CI: u16 = 45;
    pub const LATIN1_BIN: u16 = 47;
    pub const BINARY: u16 = 63;
    pub const UTF8MB4_UNICODE_CI: u16 = 224;
    pub const UTF8MB4_0900_AI_CI: u16 = 255;
}

/// Text codec selected by the connection collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8mb4,
    /// Three-byte UTF-8 (`utf8`/`utf8mb3` collations)
    Utf8mb3,
    Latin1,
    Ascii,
    /// The `binary` pseudo charset; text is sent as UTF-8 bytes
    Binary,
}

impl Charset {
    /// Pick the strategy for a collation id.
    pub fn from_collation(id: u16) -> Self {
        match id {
            33 | 83 | 192..=215 | 223 => Charset::Utf8mb3,
            45 | 46 | 224..=247 => Charset::Utf8mb4,
            id if id >= 255 => Charset::Utf8mb4,
            5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => Charset::Latin1,
            11 | 65 => Charset::Ascii,
            63 => Charset::Binary,
            other => {
                tracing::debug!(collation = other, "unknown collation, assuming utf8mb4");
                Charset::Utf8mb4
            }
        }
    }

    /// Whether `text` goes on the wire as its UTF-8 bytes unchanged.
    pub fn passes_through(self, text: &str) -> bool {
        match self {
            Charset::Utf8mb4 | Charset::Binary => true,
            // Four-byte sequences lead with 0xF0..=0xF4
            Charset::Utf8mb3 => text.bytes().all(|b| b < 0xF0),
            Charset::Latin1 | Charset::Ascii => text.is_ascii(),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Charset::Utf8mb4 => "utf8mb4",
            Charset::Utf8mb3 => "utf8mb3",
            Charset::Latin1 => "latin1",
            Charset::Ascii => "ascii",
            Charset::Binary => "binary",
        }
    }

    /// Encode one code point. Characters the charset cannot represent become `?`.
    pub fn encode_char(self, ch: char, buf: &mut [u8; 4]) -> &[u8] {
        let limit = match self {
            Charset::Latin1 => 0xFF,
            Charset::Ascii => 0x7F,
            Charset::Utf8mb3 if ch.len_utf8() == 4 => 0,
            _ => return ch.encode_utf8(buf).as_bytes(),
        };
        let code = u32::from(ch);
        #[allow(clippy::cast_possible_truncation)]
        {
            buf[0] = if code <= limit { code as u8 } else { b'?' };
        }
        &buf[..1]
    }

    /// Encode a whole string.
    pub fn encode<'a>(self, text: &'a str) -> Cow<'a, [u8]> {
        if self.passes_through(text) {
            return Cow::Borrowed(text.as_bytes());
        }
        let mut out = Vec::with_capacity(text.len());
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            out.extend_from_slice(self.encode_char(ch, &mut buf));
        }
        Cow::Owned(out)
    }

    /// Decode bytes received from the server.
    pub fn decode<'a>(self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Charset::Latin1 => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())
                }
            }
            Charset::Ascii => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(
                        bytes
                            .iter()
                            .map(|&b| if b.is_ascii() { char::from(b) } else { '\u{FFFD}' })
                            .collect(),
                    )
                }
            }
            _ => String::from_utf8_lossy(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_collation() {
        assert_eq!(Charset::from_collation(224), Charset::Utf8mb4);
        assert_eq!(Charset::from_collation(45), Charset::Utf8mb4);
        assert_eq!(Charset::from_collation(255), Charset::Utf8mb4);
        assert_eq!(Charset::from_collation(33), Charset::Utf8mb3);
        assert_eq!(Charset::from_collation(8), Charset::Latin1);
        assert_eq!(Charset::from_collation(11), Charset::Ascii);
        assert_eq!(Charset::from_collation(63), Charset::Binary);
        assert_eq!(Charset::from_collation(2), Charset::Utf8mb4);
    }

    #[test]
    fn test_encode_latin1() {
        assert_eq!(Charset::Latin1.encode("caf\u{e9}").as_ref(), b"caf\xe9");
        assert_eq!(Charset::Latin1.encode("\u{20ac}").as_ref(), b"?");
        assert!(matches!(Charset::Utf8mb4.encode("caf\u{e9}"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode() {
        assert_eq!(Charset::Latin1.decode(b"caf\xe9"), "caf\u{e9}");
        assert_eq!(Charset::Utf8mb4.decode("caf\u{e9}".as_bytes()), "caf\u{e9}");
        assert_eq!(Charset::Ascii.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_encode_char() {
        let mut buf = [0u8; 4];
        assert_eq!(Charset::Utf8mb4.encode_char('\u{1F3A4}', &mut buf).len(), 4);
        assert_eq!(Charset::Ascii.encode_char('\u{e9}', &mut buf), b"?");
        assert_eq!(Charset::Utf8mb3.encode_char('\u{1F3A4}', &mut buf), b"?");
        assert_eq!(Charset::Utf8mb3.encode_char('\u{20ac}', &mut buf).len(), 3);
    }

    #[test]
    fn test_utf8mb3_replaces_supplementary_plane() {
        assert!(matches!(Charset::Utf8mb3.encode("caf\u{e9}"), Cow::Borrowed(_)));
        assert_eq!(
            Charset::Utf8mb3.encode("a\u{1F600}\u{20ac}").as_ref(),
            "a?\u{20ac}".as_bytes()
        );
        assert!(Charset::Utf8mb4.passes_through("\u{1F600}"));
        assert!(!Charset::Utf8mb3.passes_through("\u{1F600}"));
    }
}
