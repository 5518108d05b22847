//! Wire headers exchanged with the sensor ASIC.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

use super::codes::{Major, Minor};
use super::constants::*;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sonacomm command header (14 bytes).
///
/// Layout: magic(4) address(2) length(2) major(1) minor(1) trans_id(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub magic: u32,
    pub address: u16,
    pub length: u16,
    pub major: u8,
    pub minor: u8,
    pub trans_id: u32,
}

impl CommandHeader {
    pub const SIZE: usize = 14;

    pub fn new(major: Major, minor: Minor, address: u16, length: u16, trans_id: u32) -> Self {
        Self {
            magic: COMMAND_MAGIC,
            address,
            length,
            major: major as u8,
            minor: minor as u8,
            trans_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u16(&mut buf[4..6], self.address);
        LittleEndian::write_u16(&mut buf[6..8], self.length);
        buf[8] = self.major;
        buf[9] = self.minor;
        LittleEndian::write_u32(&mut buf[10..14], self.trans_id);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            magic: cursor.read_u32::<LittleEndian>()?,
            address: cursor.read_u16::<LittleEndian>()?,
            length: cursor.read_u16::<LittleEndian>()?,
            major: cursor.read_u8()?,
            minor: cursor.read_u8()?,
            trans_id: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Reject headers that do not carry the sonacomm magic.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.magic != COMMAND_MAGIC {
            return Err(HeaderError::InvalidMagic {
                expected: COMMAND_MAGIC,
                actual: self.magic,
            });
        }
        Ok(())
    }

    pub fn major(&self) -> Option<Major> {
        Major::from_u8(self.major)
    }

    pub fn minor(&self) -> Option<Minor> {
        Minor::from_u8(self.minor)
    }
}

/// A response read back from the command FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub header: CommandHeader,
    pub data: Vec<u8>,
}

impl CommandResponse {
    pub fn minor(&self) -> Option<Minor> {
        self.header.minor()
    }

    /// Little-endian data word at `index`, if the response carries it.
    pub fn word(&self, index: usize) -> Option<u32> {
        let start = index * 4;
        self.data
            .get(start..start + 4)
            .map(LittleEndian::read_u32)
    }
}

/// Header in front of every touch FIFO block (4 bytes).
///
/// `length` counts the frame field plus the report records that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackReportHeader {
    pub length: u16,
    pub frame: u16,
}

impl TrackReportHeader {
    pub const SIZE: usize = TOUCH_LENGTH_WIDTH + TOUCH_FRAME_WIDTH;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..2], self.length);
        LittleEndian::write_u16(&mut buf[2..4], self.frame);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            length: cursor.read_u16::<LittleEndian>()?,
            frame: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Boot configuration record, written into the first firmware payload.
///
/// Packed as `[31:24]` I2C address, `[23:11]` reserved, `[10:8]` log level,
/// `[7:2]` edge duration, `[1]` irq level (edge when set), `[0]` irq
/// polarity (active low when set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub i2c_addr: u8,
    pub log_level: u8,
    pub edge_duration: u8,
    pub edge_triggered: bool,
    pub active_low: bool,
}

impl BootConfig {
    pub fn to_word(&self) -> u32 {
        ((self.i2c_addr as u32 & BCR_I2C_ADDR_MASK) << BCR_I2C_ADDR_POS)
            | ((self.log_level as u32 & BCR_LOG_LEVEL_MASK) << BCR_LOG_LEVEL_POS)
            | ((self.edge_duration as u32 & BCR_EDGE_DURATION_MASK) << BCR_EDGE_DURATION_POS)
            | ((self.edge_triggered as u32) << BCR_IRQ_LEVEL_POS)
            | ((self.active_low as u32) << BCR_IRQ_POLARITY_POS)
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            i2c_addr: ((word >> BCR_I2C_ADDR_POS) & BCR_I2C_ADDR_MASK) as u8,
            log_level: ((word >> BCR_LOG_LEVEL_POS) & BCR_LOG_LEVEL_MASK) as u8,
            edge_duration: ((word >> BCR_EDGE_DURATION_POS) & BCR_EDGE_DURATION_MASK) as u8,
            edge_triggered: (word >> BCR_IRQ_LEVEL_POS) & 1 != 0,
            active_low: (word >> BCR_IRQ_POLARITY_POS) & 1 != 0,
        }
    }

    pub fn logging_enabled(&self) -> bool {
        self.log_level != BCR_LOG_LEVEL_OFF
    }
}
