//! Command major/minor codes and event register flags.

use std::fmt;

use bitflags::bitflags;

/// Command kind carried in the major byte of a command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Major {
    D1Test = 0x01,
    FrameDump = 0x02,
    NoTouch = 0x03,
    SetSysParam = 0x04,
    GetSysParam = 0x05,
    FwUpdate = 0x06,
    FlashUpdate = 0x07,
    UpdateRegs = 0x08,
    RegScript = 0x09,
}

impl Major {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Major::D1Test,
            0x02 => Major::FrameDump,
            0x03 => Major::NoTouch,
            0x04 => Major::SetSysParam,
            0x05 => Major::GetSysParam,
            0x06 => Major::FwUpdate,
            0x07 => Major::FlashUpdate,
            0x08 => Major::UpdateRegs,
            0x09 => Major::RegScript,
            _ => return None,
        })
    }
}

impl fmt::Display for Major {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Major::D1Test => write!(f, "D1_TEST"),
            Major::FrameDump => write!(f, "FRAME_DUMP"),
            Major::NoTouch => write!(f, "NO_TOUCH"),
            Major::SetSysParam => write!(f, "SET_SYS_PARAM"),
            Major::GetSysParam => write!(f, "GET_SYS_PARAM"),
            Major::FwUpdate => write!(f, "FW_UPDATE"),
            Major::FlashUpdate => write!(f, "FLASH_UPDATE"),
            Major::UpdateRegs => write!(f, "UPDATE_REGS"),
            Major::RegScript => write!(f, "REG_SCRIPT"),
        }
    }
}

/// Status carried in the minor byte of a command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Minor {
    Ok = 0x00,
    DataFragment = 0x01,
    DataLast = 0x02,
    BadData = 0x03,
    BadPartition = 0x04,
    NotSupported = 0x05,
}

impl Minor {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Minor::Ok,
            0x01 => Minor::DataFragment,
            0x02 => Minor::DataLast,
            0x03 => Minor::BadData,
            0x04 => Minor::BadPartition,
            0x05 => Minor::NotSupported,
            _ => return None,
        })
    }

    /// Statuses that end the pending operation with an error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Minor::BadData | Minor::BadPartition | Minor::NotSupported
        )
    }
}

impl fmt::Display for Minor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Minor::Ok => write!(f, "OK"),
            Minor::DataFragment => write!(f, "DATA_FRAG"),
            Minor::DataLast => write!(f, "DATA_LAST"),
            Minor::BadData => write!(f, "DATA_BAD"),
            Minor::BadPartition => write!(f, "BAD_PART"),
            Minor::NotSupported => write!(f, "NOT_SUPPORTED"),
        }
    }
}

bitflags! {
    /// Decoded snapshot of `REGISTER_EVENT`.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventRecord: u16 {
        const BOOT = 1 << 0;
        const TOUCH = 1 << 1;
        const COMMAND = 1 << 2;
        const STREAM = 1 << 3;
        /// Chip requests a firmware download (it has been reset).
        const FWD = 1 << 4;
        /// Host wake request.
        const HOST = 1 << 5;
    }
}

impl EventRecord {
    pub fn from_register(value: u16) -> Self {
        Self::from_bits_truncate(value)
    }
}

bitflags! {
    /// Bits of the write-only `REGISTER_ACTIONS`.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u16 {
        const FLUSH_COMMAND = 1 << 0;
        const FLUSH_STREAM = 1 << 1;
    }
}
