//! Command boundary.
//!
//! A command owns one outstanding request. The reassembler hands it every
//! logical packet of the response until the command reports
//! [`CommandState::Done`].

use mariawire_core::{Result, ServerError};

use crate::protocol::PacketType;
use crate::reassembler::Packet;

/// Where a command is in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    /// Nothing received yet
    #[default]
    AwaitingFirst,
    /// At least one packet received, more expected
    AwaitingMore,
    /// No more packets expected
    Done,
}

impl CommandState {
    /// Transition after a packet was handled and the command answered `reply`.
    ///
    /// `Done` is terminal; any other reply means more packets are expected.
    pub fn advance(self, reply: CommandState) -> CommandState {
        match (self, reply) {
            (CommandState::Done, _) | (_, CommandState::Done) => CommandState::Done,
            _ => CommandState::AwaitingMore,
        }
    }

    pub fn is_done(self) -> bool {
        self == CommandState::Done
    }
}

/// A pending request waiting for its response packets.
pub trait Command {
    /// Handle one complete logical packet and say whether more are expected.
    fn on_packet(&mut self, packet: &Packet<'_>) -> Result<CommandState>;

    /// Commands the server does not answer are retired without receiving.
    fn expects_response(&self) -> bool {
        true
    }
}

impl<C: Command + ?Sized> Command for Box<C> {
    fn on_packet(&mut self, packet: &Packet<'_>) -> Result<CommandState> {
        (**self).on_packet(packet)
    }

    fn expects_response(&self) -> bool {
        (**self).expects_response()
    }
}

/// When a [`ResponseCollector`] stops receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Until {
    Count(usize),
    Terminal,
}

/// A command that keeps copies of its response packets.
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    packets: Vec<Packet<'static>>,
    until: Until,
    expects_response: bool,
}

impl ResponseCollector {
    /// Collect exactly `count` packets.
    pub fn count(count: usize) -> Self {
        Self {
            packets: Vec::new(),
            until: Until::Count(count),
            expects_response: count > 0,
        }
    }

    /// Collect packets up to and including the first OK, ERR or EOF.
    pub fn until_terminal() -> Self {
        Self {
            packets: Vec::new(),
            until: Until::Terminal,
            expects_response: true,
        }
    }

    /// A command the server does not answer.
    pub fn no_response() -> Self {
        Self::count(0)
    }

    pub fn packets(&self) -> &[Packet<'static>] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<Packet<'static>> {
        self.packets
    }

    /// The first ERR packet received, decoded.
    pub fn server_error(&self) -> Option<Result<ServerError>> {
        self.packets
            .iter()
            .find(|p| p.packet_type() == PacketType::Error)
            .map(|p| p.reader().read_error())
    }
}

impl Command for ResponseCollector {
    fn on_packet(&mut self, packet: &Packet<'_>) -> Result<CommandState> {
        let packet_type = packet.packet_type();
        self.packets.push(packet.clone().into_owned());
        let done = match self.until {
            Until::Count(count) => self.packets.len() >= count,
            Until::Terminal => matches!(
                packet_type,
                PacketType::Ok | PacketType::Error | PacketType::Eof
            ),
        };
        Ok(if done {
            CommandState::Done
        } else {
            CommandState::AwaitingMore
        })
    }

    fn expects_response(&self) -> bool {
        self.expects_response
    }
}
