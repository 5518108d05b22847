//! Command channel state machine.
//!
//! The chip accepts one command at a time. The slot below records which
//! major is outstanding; responses are routed on it, and it is the only
//! admission control for new commands.

use std::fmt;

use tracing::{debug, trace};

use crate::error::{DriverError, Result};
use crate::protocol::{
    CommandHeader, CommandResponse, MAX_COMMAND_PAYLOAD, Major, Minor, REGISTER_FIFO_COMMAND,
};
use crate::transport::SerialBus;

/// Outstanding command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveCommand {
    #[default]
    NoCommand,
    Issued(Major),
}

impl fmt::Display for ActiveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveCommand::NoCommand => write!(f, "NO_COMMAND"),
            ActiveCommand::Issued(major) => write!(f, "{}", major),
        }
    }
}

impl ActiveCommand {
    pub fn major(&self) -> Option<Major> {
        match self {
            ActiveCommand::NoCommand => None,
            ActiveCommand::Issued(major) => Some(*major),
        }
    }
}

/// Single-slot command channel over the command FIFO.
#[derive(Debug, Default)]
pub struct CommandChannel {
    active: ActiveCommand,
    /// Header of the most recent packet sent on the slot.
    last: Option<CommandHeader>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> ActiveCommand {
        self.active
    }

    pub fn is_idle(&self) -> bool {
        self.active == ActiveCommand::NoCommand
    }

    /// Header of the last packet sent while the slot is occupied.
    pub fn last_header(&self) -> Option<&CommandHeader> {
        self.last.as_ref()
    }

    /// Transition to a new slot state.
    fn goto(&mut self, next: ActiveCommand) {
        if self.active != next {
            tracing::info!(from = %self.active, to = %next, "Command slot transition");
        }
        self.active = next;
    }

    /// Send the first packet of a command and occupy the slot.
    pub fn issue<B: SerialBus + ?Sized>(
        &mut self,
        bus: &B,
        trans_id: u32,
        major: Major,
        minor: Minor,
        address: u16,
        payload: &[u8],
    ) -> Result<CommandHeader> {
        if let ActiveCommand::Issued(active) = self.active {
            return Err(DriverError::Busy { active });
        }
        let header = send_packet(bus, trans_id, major, minor, address, payload)?;
        self.last = Some(header);
        self.goto(ActiveCommand::Issued(major));
        Ok(header)
    }

    /// Send the next packet of the command that holds the slot.
    pub fn continue_with<B: SerialBus + ?Sized>(
        &mut self,
        bus: &B,
        trans_id: u32,
        minor: Minor,
        address: u16,
        payload: &[u8],
    ) -> Result<CommandHeader> {
        let major = self
            .active
            .major()
            .ok_or_else(|| DriverError::Protocol("no command to continue".into()))?;
        let header = send_packet(bus, trans_id, major, minor, address, payload)?;
        self.last = Some(header);
        Ok(header)
    }

    /// Read one response from the command FIFO.
    pub fn read_response<B: SerialBus + ?Sized>(&self, bus: &B) -> Result<CommandResponse> {
        let mut raw = [0u8; CommandHeader::SIZE];
        bus.read_fifo(REGISTER_FIFO_COMMAND, &mut raw)?;
        let header = CommandHeader::from_bytes(&raw)?;
        header.validate()?;

        let length = header.length as usize;
        if length > MAX_COMMAND_PAYLOAD {
            return Err(DriverError::Protocol(format!(
                "response length {} exceeds {}",
                length, MAX_COMMAND_PAYLOAD
            )));
        }
        let mut data = vec![0u8; length];
        if length > 0 {
            bus.read_fifo(REGISTER_FIFO_COMMAND, &mut data)?;
        }
        trace!(
            major = header.major,
            minor = header.minor,
            len = length,
            "Command response"
        );
        Ok(CommandResponse { header, data })
    }

    /// Free the slot. Returns the major that held it.
    pub fn release(&mut self) -> Option<Major> {
        let major = self.active.major();
        self.last = None;
        self.goto(ActiveCommand::NoCommand);
        major
    }
}

fn send_packet<B: SerialBus + ?Sized>(
    bus: &B,
    trans_id: u32,
    major: Major,
    minor: Minor,
    address: u16,
    payload: &[u8],
) -> Result<CommandHeader> {
    if payload.len() > MAX_COMMAND_PAYLOAD {
        return Err(DriverError::TooLarge {
            size: payload.len(),
            limit: MAX_COMMAND_PAYLOAD,
        });
    }
    let header = CommandHeader::new(major, minor, address, payload.len() as u16, trans_id);
    let mut packet = Vec::with_capacity(CommandHeader::SIZE + payload.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);
    bus.write_fifo(REGISTER_FIFO_COMMAND, &packet)?;
    debug!(
        major = %major,
        minor = %minor,
        address = %format!("0x{:04X}", address),
        len = payload.len(),
        "Command packet sent"
    );
    Ok(header)
}

/// Pack `words` as little-endian command data.
pub fn data_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
