//! One connection's framing state: the outgoing writer paired with the
//! incoming reassembler.
//!
//! Every request sent through the channel registers its response handler
//! with the sequence number the server's reply continues from.

use mariawire_core::{Result, Value};

use crate::charset::Charset;
use crate::command::Command;
use crate::config::WireConfig;
use crate::protocol::bulk::validate_rows;
use crate::protocol::{self, BulkEncoder, BulkSummary, PacketWriter, Sequence};
use crate::reassembler::Reassembler;
use crate::transport::Transport;

#[derive(Debug)]
pub struct PacketChannel<T: Transport, C: Command = Box<dyn Command>> {
    writer: PacketWriter<T>,
    reassembler: Reassembler<C>,
}

impl<T: Transport, C: Command> PacketChannel<T, C> {
    pub fn new(transport: T, config: &WireConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            writer: PacketWriter::new(transport, config),
            reassembler: Reassembler::new(config),
        })
    }

    /// Send one command packet and queue `handler` for its response.
    ///
    /// `build` writes the payload after the command byte. If it fails the
    /// packet is abandoned and nothing is queued.
    pub fn send<F>(&mut self, code: protocol::Command, handler: C, build: F) -> Result<()>
    where
        F: FnOnce(&mut PacketWriter<T>) -> Result<()>,
    {
        self.writer.start_command(code)?;
        let written = build(&mut self.writer).and_then(|()| self.writer.flush(true));
        if let Err(err) = written {
            self.writer.abort();
            return Err(err);
        }
        tracing::debug!(command = ?code, "command sent");
        self.reassembler.enqueue(handler, self.writer.sequence());
        Ok(())
    }

    /// Send rows through the bulk encoder, queueing one handler from
    /// `handler` for every sub-batch that reached the transport.
    ///
    /// Every row is checked before the first byte is written, so a rejected
    /// row sends nothing and queues nothing.
    pub fn send_bulk<R, H>(
        &mut self,
        column_count: usize,
        rows: impl IntoIterator<Item = R>,
        mut handler: H,
    ) -> Result<BulkSummary>
    where
        R: AsRef<[Value]>,
        H: FnMut() -> C,
    {
        let rows: Vec<R> = rows.into_iter().collect();
        validate_rows(&rows, column_count, self.writer.charset(), self.writer.config())?;

        let mut bulk = BulkEncoder::begin_batch(&mut self.writer, column_count)?;
        let mut failure = None;
        for row in &rows {
            if let Err(err) = bulk.append_row(row.as_ref()) {
                failure = Some(err);
                break;
            }
        }
        if failure.is_some() {
            bulk.mark_error();
        }
        let summary = bulk.end_batch()?;
        for sequence in &summary.sequences {
            self.reassembler.enqueue(handler(), *sequence);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Queue a handler for packets the server sends without a request.
    pub fn expect(&mut self, handler: C, sequence: Sequence) {
        self.reassembler.enqueue(handler, sequence);
    }

    /// Feed bytes received from the transport.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize> {
        self.reassembler.feed(chunk)
    }

    pub fn pop_finished(&mut self) -> Option<C> {
        self.reassembler.pop_finished()
    }

    /// Apply a session collation change to both directions.
    pub fn change_charset(&mut self, collation: u16) {
        let charset = Charset::from_collation(collation);
        self.writer.set_charset(charset);
        self.reassembler.change_charset(charset);
    }

    pub fn charset(&self) -> Charset {
        self.writer.charset()
    }

    pub fn writer(&self) -> &PacketWriter<T> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut PacketWriter<T> {
        &mut self.writer
    }

    pub fn reassembler(&self) -> &Reassembler<C> {
        &self.reassembler
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler<C> {
        &mut self.reassembler
    }

    pub fn transport(&self) -> &T {
        self.writer.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.writer.transport_mut()
    }
}
