//! Transport boundary.
//!
//! The engine hands finished frames to a [`Transport`] and never waits on it:
//! delivery, backpressure and socket errors are the transport's concern.

use std::io::Write;

use mariawire_core::{Error, Result};

/// An ordered, reliable byte sink (a TCP-like stream).
pub trait Transport {
    /// Take ownership of one frame (4-byte header followed by its payload).
    fn send(&mut self, frame: Vec<u8>);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, frame: Vec<u8>) {
        (**self).send(frame);
    }
}

/// Collects frames in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    frames: Vec<Vec<u8>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far, in order.
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Remove and return every frame sent so far.
    pub fn take_frames(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.frames)
    }

    /// All frames concatenated, as they would appear on the wire.
    pub fn bytes(&self) -> Vec<u8> {
        self.frames.concat()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Vec<u8>) {
        self.frames.push(frame);
    }
}

/// Writes frames to any [`std::io::Write`].
///
/// Sends are fire-and-forget, so the first I/O error is latched and every
/// later frame is dropped. Call [`IoTransport::check`] to surface it.
#[derive(Debug)]
pub struct IoTransport<W: Write> {
    inner: W,
    error: Option<std::io::Error>,
}

impl<W: Write> IoTransport<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    /// Return the latched I/O error, if any.
    pub fn check(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(Error::Io(err)),
            None => Ok(()),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Transport for IoTransport<W> {
    fn send(&mut self, frame: Vec<u8>) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.inner.write_all(&frame).and_then(|()| self.inner.flush()) {
            tracing::warn!(error = %err, "transport write failed");
            self.error = Some(err);
        }
    }
}
