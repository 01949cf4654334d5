//! Packet reassembly (input side).
//!
//! [`Reassembler::feed`] accepts transport chunks of any size, rebuilds
//! frames from them, joins continuation frames into logical packets and
//! hands each packet to the oldest pending command.
//!
//! A frame whose payload is the maximum length is a continuation; the
//! packet ends with the first shorter frame, which may be empty.

use std::borrow::Cow;
use std::collections::VecDeque;

use mariawire_core::{Error, ProtocolError, Result};

use crate::charset::Charset;
use crate::command::{Command, CommandState};
use crate::config::WireConfig;
use crate::protocol::{
    HEADER_SIZE, MAX_PAYLOAD_LEN, PacketHeader, PacketReader, PacketType, Sequence, hex_dump,
};

const LOG_PACKET_BYTES: usize = 512;

/// A complete logical packet.
///
/// Single-frame packets borrow straight from the transport chunk; packets
/// assembled from several frames (or several chunks) own their bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    payload: Cow<'a, [u8]>,
    sequence_id: u8,
    charset: Charset,
    extended_metadata: bool,
}

impl<'a> Packet<'a> {
    pub fn new(payload: Cow<'a, [u8]>, sequence_id: u8, charset: Charset) -> Self {
        Self {
            payload,
            sequence_id,
            charset,
            extended_metadata: false,
        }
    }

    /// Mark the packet as read on a connection with extended type metadata.
    pub fn with_extended_metadata(mut self, enabled: bool) -> Self {
        self.extended_metadata = enabled;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Sequence number of the packet's last frame.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Classify the packet by its first byte.
    pub fn packet_type(&self) -> PacketType {
        PacketType::of(&self.payload)
    }

    pub fn extended_metadata(&self) -> bool {
        self.extended_metadata
    }

    /// A decoder over the payload using the connection's decode settings.
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::with_charset(&self.payload, self.charset)
            .with_extended_metadata(self.extended_metadata)
    }

    /// Detach from the transport chunk.
    pub fn into_owned(self) -> Packet<'static> {
        Packet {
            payload: Cow::Owned(self.payload.into_owned()),
            sequence_id: self.sequence_id,
            charset: self.charset,
            extended_metadata: self.extended_metadata,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload.into_owned()
    }
}

#[derive(Debug)]
struct Pending<C> {
    command: C,
    state: CommandState,
    sequence: Sequence,
}

/// Incremental frame parser and command dispatcher.
#[derive(Debug)]
pub struct Reassembler<C: Command = Box<dyn Command>> {
    header: [u8; HEADER_SIZE],
    header_len: usize,
    in_frame: bool,
    frame_len: usize,
    frame_sequence: u8,
    /// Payload bytes the current frame still needs
    remaining: usize,
    /// Payload of the packet so far (continuation frames plus a partial frame)
    parts: Vec<u8>,
    continued: bool,
    pending: VecDeque<Pending<C>>,
    finished: VecDeque<C>,
    charset: Charset,
    extended_metadata: bool,
    poisoned: bool,
    log_packets: bool,
}

impl<C: Command> Reassembler<C> {
    pub fn new(config: &WireConfig) -> Self {
        Self {
            header: [0; HEADER_SIZE],
            header_len: 0,
            in_frame: false,
            frame_len: 0,
            frame_sequence: 0,
            remaining: 0,
            parts: Vec::new(),
            continued: false,
            pending: VecDeque::new(),
            finished: VecDeque::new(),
            charset: config.charset(),
            extended_metadata: config.extended_metadata,
            poisoned: false,
            log_packets: config.log_packets,
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Switch the decode strategy after the session charset changed.
    pub fn change_charset(&mut self, charset: Charset) {
        if charset != self.charset {
            tracing::debug!(from = self.charset.name(), to = charset.name(), "charset changed");
            self.charset = charset;
        }
    }

    /// Queue a command whose response frames continue from `sequence`.
    pub fn enqueue(&mut self, command: C, sequence: Sequence) {
        let state = if command.expects_response() {
            CommandState::AwaitingFirst
        } else {
            CommandState::Done
        };
        self.pending.push_back(Pending {
            command,
            state,
            sequence,
        });
    }

    /// Commands still waiting for packets.
    pub fn pending_len(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| !entry.state.is_done())
            .count()
    }

    /// Oldest command that received its last packet.
    pub fn pop_finished(&mut self) -> Option<C> {
        self.retire_stale();
        self.finished.pop_front()
    }

    /// Whether an unexpected packet broke the stream.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether a frame or packet is partially received.
    pub fn is_mid_packet(&self) -> bool {
        self.header_len > 0 || self.in_frame || self.continued
    }

    /// Consume a transport chunk and return how many packets were dispatched.
    ///
    /// An error from a command handler is returned after the rest of the
    /// chunk has been processed. A packet that arrives with no pending
    /// command is a desync: the reassembler is poisoned and refuses all
    /// further input.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize> {
        if self.poisoned {
            return Err(Error::protocol(
                "stream is desynchronized; no further packets can be decoded",
            ));
        }
        let mut dispatched = 0;
        let mut handler_error = None;
        let mut pos = 0;
        loop {
            if !self.in_frame {
                if pos == chunk.len() {
                    break;
                }
                let take = (HEADER_SIZE - self.header_len).min(chunk.len() - pos);
                self.header[self.header_len..self.header_len + take]
                    .copy_from_slice(&chunk[pos..pos + take]);
                self.header_len += take;
                pos += take;
                if self.header_len < HEADER_SIZE {
                    break;
                }
                self.begin_frame(PacketHeader::from_bytes(&self.header));
            }

            let available = chunk.len() - pos;
            if !self.continued
                && self.parts.is_empty()
                && self.frame_len < MAX_PAYLOAD_LEN
                && self.remaining <= available
            {
                let payload = &chunk[pos..pos + self.remaining];
                pos += self.remaining;
                self.in_frame = false;
                self.remaining = 0;
                self.dispatch(Cow::Borrowed(payload), &mut handler_error)?;
                dispatched += 1;
                continue;
            }

            let take = self.remaining.min(available);
            self.parts.extend_from_slice(&chunk[pos..pos + take]);
            pos += take;
            self.remaining -= take;
            if self.remaining > 0 {
                break;
            }
            self.in_frame = false;
            if self.frame_len == MAX_PAYLOAD_LEN {
                self.continued = true;
                continue;
            }
            self.continued = false;
            let payload = std::mem::take(&mut self.parts);
            self.dispatch(Cow::Owned(payload), &mut handler_error)?;
            dispatched += 1;
        }
        match handler_error {
            Some(err) => Err(err),
            None => Ok(dispatched),
        }
    }

    /// Drop partial framing state, keeping queued commands.
    pub fn reset_framing(&mut self) {
        self.header_len = 0;
        self.in_frame = false;
        self.remaining = 0;
        self.parts = Vec::new();
        self.continued = false;
        self.poisoned = false;
    }

    fn begin_frame(&mut self, header: PacketHeader) {
        self.header_len = 0;
        self.in_frame = true;
        self.frame_len = header.payload_length as usize;
        self.remaining = self.frame_len;
        self.frame_sequence = header.sequence_id;
        tracing::trace!(
            len = self.frame_len,
            sequence_id = header.sequence_id,
            "frame in"
        );

        self.retire_stale();
        if let Some(entry) = self.pending.front_mut() {
            let expected = entry.sequence.peek();
            if !entry.sequence.observe(header.sequence_id) {
                tracing::warn!(
                    expected,
                    received = header.sequence_id,
                    "packet sequence mismatch"
                );
            }
        }
    }

    fn dispatch(&mut self, payload: Cow<'_, [u8]>, handler_error: &mut Option<Error>) -> Result<()> {
        let packet = Packet::new(payload, self.frame_sequence, self.charset)
            .with_extended_metadata(self.extended_metadata);
        if self.log_packets {
            tracing::trace!(
                target: "mariawire::packets",
                sequence_id = packet.sequence_id(),
                "recv {}",
                hex_dump(packet.payload(), LOG_PACKET_BYTES)
            );
        }

        self.retire_stale();
        let Some(entry) = self.pending.front_mut() else {
            self.poisoned = true;
            tracing::warn!(
                len = packet.len(),
                sequence_id = packet.sequence_id(),
                "unexpected packet with no pending command"
            );
            return Err(Error::Protocol(ProtocolError {
                message: "unexpected packet with no pending command".to_string(),
                raw_data: Some(packet.into_payload()),
                source: None,
            }));
        };

        match entry.command.on_packet(&packet) {
            Ok(reply) => entry.state = entry.state.advance(reply),
            Err(err) => {
                entry.state = CommandState::Done;
                if handler_error.is_none() {
                    *handler_error = Some(err);
                }
            }
        }
        self.retire_stale();
        Ok(())
    }

    /// Move finished commands off the front of the queue.
    fn retire_stale(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|entry| entry.state.is_done())
        {
            if let Some(entry) = self.pending.pop_front() {
                self.finished.push_back(entry.command);
            }
        }
    }
}
