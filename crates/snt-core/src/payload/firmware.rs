//! Firmware image pacing.
//!
//! A boot image is a sequence of payloads. Each payload starts with an
//! 8-byte header chunk (a little-endian size word and a reserved word),
//! followed by `size - 4` bytes of data:
//!
//! ```text
//! | size (4) | reserved/BCR (4) | data (size - 4) ... | size (4) | ...
//! ```
//!
//! One payload is pushed per pacer step; the chip raises its interrupt
//! when it is ready for the next one. The reserved word of the first
//! payload carries the boot configuration record.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

use super::read_full;
use crate::error::{DriverError, Result};
use crate::platform::{Clock, FileSystem, ImageFile};
use crate::protocol::{FIRMWARE_HEADER_CHUNK, MAX_PAYLOAD_BYTES, MAX_PAYLOAD_NUM};
use crate::transport::{BusError, DuplexStatus};

/// Which upload is running; selects the completion action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Boot-time upload; resumes normal event processing when done.
    Boot,
    /// Upload requested by the chip after a reset; runs post-reset recovery.
    Redownload,
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Boot => write!(f, "boot"),
            UploadKind::Redownload => write!(f, "redownload"),
        }
    }
}

/// Pacer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacerState {
    #[default]
    Idle,
    OpeningFile,
    AwaitingInterrupt,
    TransferringPayload,
    Finished,
    Failed,
}

impl fmt::Display for PacerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacerState::Idle => write!(f, "IDLE"),
            PacerState::OpeningFile => write!(f, "OPENING_FILE"),
            PacerState::AwaitingInterrupt => write!(f, "AWAITING_IRQ"),
            PacerState::TransferringPayload => write!(f, "TRANSFERRING"),
            PacerState::Finished => write!(f, "FINISHED"),
            PacerState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of one successful pacer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A payload went out; wait for the chip.
    Continue,
    /// End of image.
    Finished,
    /// The chip already runs firmware.
    Already,
}

/// Upload status as seen by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    InProgress {
        kind: UploadKind,
        payloads: u32,
        bytes: u64,
    },
    Done {
        kind: UploadKind,
        already: bool,
        payloads: u32,
        bytes: u64,
    },
    Failed {
        kind: UploadKind,
        error: String,
    },
}

impl UploadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, UploadStatus::Done { .. } | UploadStatus::Failed { .. })
    }
}

/// One firmware upload: file, counters and the duplex buffers.
pub struct UploadSession {
    kind: UploadKind,
    state: PacerState,
    file: Option<Box<dyn ImageFile>>,
    offset: u64,
    payloads: u32,
    bytes: u64,
    /// Outbound payload buffer.
    out_buf: Vec<u8>,
    /// Inbound discard buffer for the duplex transfer.
    in_buf: Vec<u8>,
    boot_word: u32,
    started_ms: u64,
}

impl UploadSession {
    pub fn new(kind: UploadKind, buffer_size: usize, boot_word: u32, started_ms: u64) -> Self {
        let size = buffer_size.max(FIRMWARE_HEADER_CHUNK);
        Self {
            kind,
            state: PacerState::Idle,
            file: None,
            offset: 0,
            payloads: 0,
            bytes: 0,
            out_buf: vec![0; size],
            in_buf: vec![0; size],
            boot_word,
            started_ms,
        }
    }

    pub fn kind(&self) -> UploadKind {
        self.kind
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn payloads(&self) -> u32 {
        self.payloads
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, state: PacerState) {
        debug!(kind = %self.kind, from = %self.state, to = %state, "Pacer transition");
        self.state = state;
    }

    pub fn attach(&mut self, file: Box<dyn ImageFile>) {
        self.file = Some(file);
    }

    /// Push the next payload through `transfer`.
    pub fn transfer_payload<F>(&mut self, mut transfer: F) -> Result<StepOutcome>
    where
        F: FnMut(&[u8], &mut [u8]) -> std::result::Result<DuplexStatus, BusError>,
    {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DriverError::BadRead("no image attached".into()))?;
        self.state = PacerState::TransferringPayload;

        let header = &mut self.out_buf[..FIRMWARE_HEADER_CHUNK];
        let n = read_full(&mut **file, header).map_err(|e| DriverError::BadRead(e.to_string()))?;
        if n == 0 {
            return Ok(StepOutcome::Finished);
        }
        if n < FIRMWARE_HEADER_CHUNK {
            return Err(DriverError::BadSize(n));
        }

        self.payloads += 1;
        let size = LittleEndian::read_u32(&self.out_buf[0..4]) as usize;
        if self.payloads == 1 {
            LittleEndian::write_u32(&mut self.out_buf[4..8], self.boot_word);
        }

        match transfer(
            &self.out_buf[..FIRMWARE_HEADER_CHUNK],
            &mut self.in_buf[..FIRMWARE_HEADER_CHUNK],
        )? {
            DuplexStatus::AlreadyLoaded => return Ok(StepOutcome::Already),
            DuplexStatus::Done => {}
        }
        self.bytes += FIRMWARE_HEADER_CHUNK as u64;
        self.offset += FIRMWARE_HEADER_CHUNK as u64;

        // The reserved word already went out with the header chunk.
        let mut remaining = size
            .checked_sub(FIRMWARE_HEADER_CHUNK - 4)
            .ok_or(DriverError::BadSize(size))?;
        if remaining % FIRMWARE_HEADER_CHUNK != 0 {
            return Err(DriverError::BadSize(size));
        }
        if remaining > MAX_PAYLOAD_BYTES {
            return Err(DriverError::TooLarge {
                size: remaining,
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        while remaining > 0 {
            let want = remaining.min(self.out_buf.len());
            let got = read_full(&mut **file, &mut self.out_buf[..want])
                .map_err(|e| DriverError::BadRead(e.to_string()))?;
            if got == 0 {
                return Err(DriverError::BadRead(format!(
                    "image ends inside payload {} at offset {}",
                    self.payloads, self.offset
                )));
            }
            match transfer(&self.out_buf[..got], &mut self.in_buf[..got]) {
                Ok(DuplexStatus::Done) => {}
                Ok(DuplexStatus::AlreadyLoaded) => return Ok(StepOutcome::Already),
                Err(e) => return Err(DriverError::BadWrite(e.to_string())),
            }
            remaining -= got;
            self.bytes += got as u64;
            self.offset += got as u64;
        }

        if self.payloads >= MAX_PAYLOAD_NUM {
            return Err(DriverError::TooMany(self.payloads));
        }
        Ok(StepOutcome::Continue)
    }

    /// Transfer rate since the session started, in kbit/s.
    pub fn throughput_kbps(&self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.started_ms).max(1);
        self.bytes * 8 / elapsed
    }
}

/// Open `primary`, retrying with a fixed backoff, then fall back to `backup`.
pub fn open_image(
    files: &dyn FileSystem,
    clock: &dyn Clock,
    primary: &Path,
    backup: Option<&Path>,
    attempts: u32,
    backoff: Duration,
) -> Result<Box<dyn ImageFile>> {
    for attempt in 1..=attempts.max(1) {
        match files.open(primary) {
            Ok(file) => {
                info!(path = %primary.display(), attempt = attempt, "Opened firmware image");
                return Ok(file);
            }
            Err(e) => {
                warn!(path = %primary.display(), attempt = attempt, error = %e, "Firmware image not available");
                if attempt < attempts {
                    clock.sleep(backoff);
                }
            }
        }
    }

    if let Some(backup) = backup {
        match files.open(backup) {
            Ok(file) => {
                info!(path = %backup.display(), "Opened backup firmware image");
                return Ok(file);
            }
            Err(e) => warn!(path = %backup.display(), error = %e, "Backup image not available"),
        }
    }

    Err(DriverError::BadOpen {
        path: primary.display().to_string(),
    })
}
