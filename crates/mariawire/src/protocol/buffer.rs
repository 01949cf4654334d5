//! Tiered output buffer.
//!
//! Holds one frame under construction. Bytes `[0, 4)` are reserved for the
//! header, which is patched in when the frame is taken. Capacity grows
//! through fixed tiers and the largest tier holds exactly one full frame.

use crate::protocol::{HEADER_SIZE, MAX_PAYLOAD_LEN, PacketHeader};

/// Largest buffer: one maximum-size frame including its header.
pub const MAX_BUFFER_SIZE: usize = MAX_PAYLOAD_LEN + HEADER_SIZE;

/// Capacity tiers, smallest first.
pub const TIERS: [usize; 5] = [
    1024,
    16 * 1024,
    128 * 1024,
    1024 * 1024,
    MAX_BUFFER_SIZE,
];

/// Owned byte arena with an explicit write cursor.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_tier(TIERS[0])
    }
}

impl OutputBuffer {
    /// Create a buffer at the smallest tier.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tier(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            pos: HEADER_SIZE,
        }
    }

    /// Cursor position, header included.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Payload bytes written so far.
    pub fn payload_len(&self) -> usize {
        self.pos - HEADER_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_full(&self) -> bool {
        self.pos == MAX_BUFFER_SIZE
    }

    /// Make room for `additional` bytes by moving up the tiers.
    ///
    /// Returns `false` when even the largest tier cannot hold them; the
    /// buffer is then left at the largest tier.
    pub fn ensure(&mut self, additional: usize) -> bool {
        let needed = self.pos.saturating_add(additional);
        if needed <= self.buf.len() {
            return true;
        }
        let tier = TIERS
            .iter()
            .copied()
            .find(|&tier| tier >= needed)
            .unwrap_or(MAX_BUFFER_SIZE);
        if tier > self.buf.len() {
            tracing::trace!(from = self.buf.len(), to = tier, "growing output buffer");
            self.buf.resize(tier, 0);
        }
        needed <= self.buf.len()
    }

    /// Append bytes. The caller must have made room with [`ensure`](Self::ensure).
    pub fn put(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
    }

    /// The writable region after the cursor.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    /// Move the cursor past bytes written through [`unfilled`](Self::unfilled).
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.buf.len());
        self.pos += n;
    }

    /// Overwrite one already-written payload byte.
    pub fn patch(&mut self, payload_offset: usize, byte: u8) {
        debug_assert!(payload_offset < self.payload_len());
        self.buf[HEADER_SIZE + payload_offset] = byte;
    }

    /// Payload written so far.
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..self.pos]
    }

    /// Patch the header and hand out the filled prefix as a frame.
    ///
    /// The buffer is replaced by a fresh one: the smallest tier, or the
    /// largest when `keep_max` is set because more payload is about to
    /// stream through.
    #[allow(clippy::cast_possible_truncation)]
    pub fn take_frame(&mut self, sequence_id: u8, keep_max: bool) -> Vec<u8> {
        let header = PacketHeader {
            payload_length: self.payload_len() as u32,
            sequence_id,
        };
        let next = if keep_max { MAX_BUFFER_SIZE } else { TIERS[0] };
        let mut frame = std::mem::replace(self, Self::with_tier(next)).buf;
        let len = HEADER_SIZE + header.payload_length as usize;
        frame.truncate(len);
        frame[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        frame
    }

    /// Drop everything written and fall back to the smallest tier.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_reserves_header() {
        let buffer = OutputBuffer::new();
        assert_eq!(buffer.pos(), 4);
        assert_eq!(buffer.payload_len(), 0);
        assert_eq!(buffer.capacity(), 1024);
    }

    #[test]
    fn test_grows_through_tiers() {
        let mut buffer = OutputBuffer::new();
        assert!(buffer.ensure(1020));
        assert_eq!(buffer.capacity(), 1024);
        assert!(buffer.ensure(1021));
        assert_eq!(buffer.capacity(), 16 * 1024);
        assert!(buffer.ensure(200_000));
        assert_eq!(buffer.capacity(), 1024 * 1024);
    }

    #[test]
    fn test_ensure_beyond_max() {
        let mut buffer = OutputBuffer::new();
        assert!(!buffer.ensure(MAX_PAYLOAD_LEN + 1));
        assert_eq!(buffer.capacity(), MAX_BUFFER_SIZE);
        assert!(buffer.ensure(MAX_PAYLOAD_LEN));
    }

    #[test]
    fn test_take_frame_patches_header() {
        let mut buffer = OutputBuffer::new();
        buffer.ensure(3);
        buffer.put(&[0x03, b'a', b'b']);
        let frame = buffer.take_frame(9, false);
        assert_eq!(frame, vec![3, 0, 0, 9, 0x03, b'a', b'b']);
        assert_eq!(buffer.pos(), 4);
        assert_eq!(buffer.capacity(), 1024);
    }

    #[test]
    fn test_unfilled_and_advance() {
        let mut buffer = OutputBuffer::new();
        buffer.unfilled()[..2].copy_from_slice(b"hi");
        buffer.advance(2);
        buffer.patch(1, b'o');
        assert_eq!(buffer.payload(), b"ho");
        buffer.reset();
        assert_eq!(buffer.payload_len(), 0);
    }
}
