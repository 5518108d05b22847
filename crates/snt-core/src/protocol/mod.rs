//! Protocol module - register map, command codes and wire headers.

pub mod codes;
pub mod constants;
pub mod header;

pub use codes::{ActionFlags, EventRecord, Major, Minor};
pub use constants::*;
pub use header::{BootConfig, CommandHeader, CommandResponse, HeaderError, TrackReportHeader};
