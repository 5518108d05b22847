//! Track report ingestion.
//!
//! Each touch interrupt leaves a block in the touch FIFO:
//!
//! ```text
//! | length (2) | frame (2) | record (8) | record (8) | ...
//! ```
//!
//! `length` counts the frame field plus the records. Records are handed to
//! the [`ReportConsumer`] and optionally mirrored to a text or binary log.

use std::fmt;
use std::io::{self, Cursor, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::platform::LogSink;
use crate::protocol::{
    MAX_TRACK_REPORTS_LEN, REGISTER_FIFO_TOUCH, TOUCH_FRAME_WIDTH, TRACK_DIAG_MAX_VERSION,
    TRACK_REPORT_SIZE, TrackReportHeader,
};
use crate::transport::SerialBus;

/// Header line of the text track log.
pub const TEXT_LOG_HEADER: &str = "Timestamp, Frame No, Bar, Track ID, Force, Pos0, Pos1, Pos2\n";

/// One touch on one bar.
///
/// Byte 0 packs the bar id (bits 0-4) and the track id (bits 5-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackReport {
    pub bar_id: u8,
    pub track_id: u8,
    pub force: u8,
    pub top: u16,
    pub center: u16,
    pub bottom: u16,
}

impl TrackReport {
    pub const SIZE: usize = TRACK_REPORT_SIZE;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(DriverError::Protocol(format!(
                "track report needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        Ok(Self::decode(data))
    }

    fn decode(data: &[u8]) -> Self {
        Self {
            bar_id: data[0] & 0x1F,
            track_id: data[0] >> 5,
            force: data[1],
            top: LittleEndian::read_u16(&data[2..4]),
            center: LittleEndian::read_u16(&data[4..6]),
            bottom: LittleEndian::read_u16(&data[6..8]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = (self.bar_id & 0x1F) | (self.track_id << 5);
        buf[1] = self.force;
        LittleEndian::write_u16(&mut buf[2..4], self.top);
        LittleEndian::write_u16(&mut buf[4..6], self.center);
        LittleEndian::write_u16(&mut buf[6..8], self.bottom);
        buf
    }

    /// Diagnostic records sit in bar 0, track 0 with the version in the force byte.
    pub fn is_diagnostic(&self) -> bool {
        self.bar_id == 0 && self.track_id == 0 && self.force <= TRACK_DIAG_MAX_VERSION
    }
}

/// Records of one frame, lent to the consumer for the duration of a callback.
#[derive(Debug, Clone, Copy)]
pub struct TrackReportBatch<'a> {
    pub frame: u16,
    records: &'a [u8],
}

impl<'a> TrackReportBatch<'a> {
    /// `records` must be a whole number of records.
    pub fn new(frame: u16, records: &'a [u8]) -> Self {
        debug_assert_eq!(records.len() % TRACK_REPORT_SIZE, 0);
        Self { frame, records }
    }

    pub fn len(&self) -> usize {
        self.records.len() / TRACK_REPORT_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackReport> + 'a {
        self.records
            .chunks_exact(TRACK_REPORT_SIZE)
            .map(TrackReport::decode)
    }

    /// Raw record bytes, as read from the FIFO.
    pub fn raw(&self) -> &'a [u8] {
        self.records
    }
}

/// Receives every batch, synchronously, from the event worker.
///
/// Called without the device lock held, so a consumer may query the
/// [`Device`](crate::device::Device). The batch borrows the driver's
/// scratch buffer; copy out what must outlive the call.
pub trait ReportConsumer: Send + Sync {
    fn on_track_reports(&self, batch: &TrackReportBatch<'_>);
}

/// Consumer that drops every batch.
pub struct NullConsumer;

impl ReportConsumer for NullConsumer {
    fn on_track_reports(&self, _batch: &TrackReportBatch<'_>) {}
}

/// Track log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackLogKind {
    Text,
    Binary,
}

impl fmt::Display for TrackLogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackLogKind::Text => write!(f, "text"),
            TrackLogKind::Binary => write!(f, "binary"),
        }
    }
}

/// Read one touch FIFO block into `scratch` and return its frame number.
///
/// The length is validated before any record byte is read.
pub fn read_batch<B: SerialBus + ?Sized>(bus: &B, scratch: &mut Vec<u8>) -> Result<u16> {
    let mut head = [0u8; TrackReportHeader::SIZE];
    bus.read_fifo(REGISTER_FIFO_TOUCH, &mut head)?;
    let header = TrackReportHeader::from_bytes(&head)?;

    let length = header.length as usize;
    if length > MAX_TRACK_REPORTS_LEN {
        return Err(DriverError::Protocol(format!(
            "track report block of {} bytes exceeds {}",
            length, MAX_TRACK_REPORTS_LEN
        )));
    }
    let payload = length.checked_sub(TOUCH_FRAME_WIDTH).ok_or_else(|| {
        DriverError::Protocol(format!("track report block of {} bytes has no frame", length))
    })?;
    if payload % TRACK_REPORT_SIZE != 0 {
        return Err(DriverError::Protocol(format!(
            "track report payload of {} bytes is not a multiple of {}",
            payload, TRACK_REPORT_SIZE
        )));
    }

    scratch.clear();
    scratch.resize(payload, 0);
    if payload > 0 {
        bus.read_fifo(REGISTER_FIFO_TOUCH, scratch)?;
    }
    Ok(header.frame)
}

/// Text and binary mirrors of the report stream.
#[derive(Default)]
pub struct TrackLog {
    text: Option<LogSink>,
    binary: Option<LogSink>,
}

impl TrackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, kind: TrackLogKind) -> bool {
        match kind {
            TrackLogKind::Text => self.text.is_some(),
            TrackLogKind::Binary => self.binary.is_some(),
        }
    }

    /// Start logging to `sink`; the text log gets its header line first.
    pub fn open(&mut self, kind: TrackLogKind, mut sink: LogSink) -> io::Result<()> {
        match kind {
            TrackLogKind::Text => {
                sink.write_all(TEXT_LOG_HEADER.as_bytes())?;
                self.text = Some(sink);
            }
            TrackLogKind::Binary => self.binary = Some(sink),
        }
        Ok(())
    }

    pub fn close(&mut self, kind: TrackLogKind) -> io::Result<()> {
        let sink = match kind {
            TrackLogKind::Text => self.text.take(),
            TrackLogKind::Binary => self.binary.take(),
        };
        match sink {
            Some(mut sink) => sink.flush(),
            None => Ok(()),
        }
    }

    pub fn close_all(&mut self) -> io::Result<()> {
        self.close(TrackLogKind::Text)?;
        self.close(TrackLogKind::Binary)
    }

    pub fn record(&mut self, batch: &TrackReportBatch<'_>, now_ms: u64) -> io::Result<()> {
        if let Some(sink) = self.text.as_mut() {
            write_text(sink, batch, now_ms)?;
        }
        if let Some(sink) = self.binary.as_mut() {
            write_binary(sink, batch, now_ms)?;
        }
        Ok(())
    }
}

/// One line per record; a diagnostic record ends the batch. The
/// timestamp column is the full millisecond clock.
pub fn write_text<W: Write + ?Sized>(
    sink: &mut W,
    batch: &TrackReportBatch<'_>,
    now_ms: u64,
) -> io::Result<()> {
    for (i, report) in batch.iter().enumerate() {
        if report.is_diagnostic() {
            let rest = &batch.raw()[i * TRACK_REPORT_SIZE..];
            if i == 0 {
                writeln!(sink, "{}, {}", now_ms, batch.frame)?;
            }
            write!(sink, "    diag vers={}:", report.force)?;
            for byte in &rest[2..] {
                write!(sink, " {:02x}", byte)?;
            }
            writeln!(sink)?;
            break;
        }
        writeln!(
            sink,
            "{}, {}, {}, {}, {}, {}, {}, {}",
            now_ms,
            batch.frame,
            report.bar_id,
            report.track_id,
            report.force,
            report.center,
            report.bottom,
            report.top
        )?;
    }
    Ok(())
}

/// `tot_len, ts_lo, ts_hi, rec_len, frame` (u16 LE each), then the raw records.
///
/// The timestamp field holds the low 32 bits of the millisecond clock, so
/// it wraps roughly every 49.7 days of uptime.
pub fn write_binary<W: Write + ?Sized>(
    sink: &mut W,
    batch: &TrackReportBatch<'_>,
    now_ms: u64,
) -> io::Result<()> {
    let records = batch.raw().len();
    let ms = now_ms as u32;
    let mut head = Vec::with_capacity(10);
    head.write_u16::<LittleEndian>((records + 8) as u16)?;
    head.write_u16::<LittleEndian>((ms & 0xFFFF) as u16)?;
    head.write_u16::<LittleEndian>((ms >> 16) as u16)?;
    head.write_u16::<LittleEndian>((records + 2) as u16)?;
    head.write_u16::<LittleEndian>(batch.frame)?;
    sink.write_all(&head)?;
    sink.write_all(batch.raw())
}

/// One batch read back from a binary track log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedBatch {
    /// Low 32 bits of the clock at write time.
    pub timestamp_ms: u32,
    pub frame: u16,
    pub reports: Vec<TrackReport>,
}

/// Parse a binary track log.
pub fn decode_binary_log(data: &[u8]) -> Result<Vec<LoggedBatch>> {
    let mut batches = Vec::new();
    let mut cursor = Cursor::new(data);
    let malformed = |offset: u64, what: &str| {
        DriverError::Protocol(format!("binary track log: {} at offset {}", what, offset))
    };

    while (cursor.position() as usize) < data.len() {
        let offset = cursor.position();
        let mut head = [0u16; 5];
        for word in head.iter_mut() {
            *word = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| malformed(offset, "truncated header"))?;
        }
        let [tot_len, ts_lo, ts_hi, rec_len, frame] = head;
        let records = (rec_len as usize)
            .checked_sub(2)
            .ok_or_else(|| malformed(offset, "record length below frame width"))?;
        if tot_len as usize != records + 8 || records % TRACK_REPORT_SIZE != 0 {
            return Err(malformed(offset, "inconsistent lengths"));
        }

        let start = cursor.position() as usize;
        let body = data
            .get(start..start + records)
            .ok_or_else(|| malformed(offset, "truncated records"))?;
        cursor.set_position((start + records) as u64);

        batches.push(LoggedBatch {
            timestamp_ms: (ts_hi as u32) << 16 | ts_lo as u32,
            frame,
            reports: TrackReportBatch::new(frame, body).iter().collect(),
        });
    }
    Ok(batches)
}
