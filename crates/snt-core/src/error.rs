//! Driver error taxonomy.

use thiserror::Error;

use crate::payload::script::ScriptError;
use crate::protocol::{HeaderError, Major, Minor};
use crate::transport::BusError;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command slot busy with {active}")]
    Busy { active: Major },

    #[error("Timed out waiting for the chip")]
    Timeout,

    #[error("A firmware upload is already running")]
    UploadInProgress,

    #[error("Cannot open {path}")]
    BadOpen { path: String },

    #[error("Read failed: {0}")]
    BadRead(String),

    #[error("Write failed: {0}")]
    BadWrite(String),

    #[error("Too many payloads ({0})")]
    TooMany(u32),

    #[error("Payload too large: {size} bytes, limit {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Payload size {0} is not a multiple of the transfer unit")]
    BadSize(usize),

    #[error("Chip rejected {major} with {minor}")]
    Rejected { major: Major, minor: Minor },

    #[error("Register script: {0}")]
    Script(#[from] ScriptError),
}

impl From<HeaderError> for DriverError {
    fn from(e: HeaderError) -> Self {
        DriverError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
