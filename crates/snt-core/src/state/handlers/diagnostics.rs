//! D1 test, frame dump and no-touch logging sessions.
//!
//! Each session owns a log sink and, while it runs, the command slot. A
//! session ends when its count runs out, when it is disabled with a
//! zero count, or when cleanup tears everything down.

use std::io::Write;

use tracing::{debug, info, warn};

use super::{HandleResult, HandlerContext, check_minor};
use crate::error::{DriverError, Result};
use crate::events::SensorEvent;
use crate::platform::LogSink;
use crate::protocol::{FRAME_LENGTH_WIDTH, MAX_FRAME_SIZE, Major, Minor, REGISTER_FIFO_STREAM};
use crate::state::machine::data_words;
use crate::transport::SerialBus;

use super::control;

pub(crate) struct D1TestLog {
    sink: LogSink,
    remaining: i64,
}

pub(crate) struct FrameCapture {
    sink: LogSink,
    remaining: u32,
    /// Zero until the chip answers the enable command.
    frame_size: usize,
    buffer: Vec<u8>,
}

/// Open diagnostic sinks.
#[derive(Default)]
pub(crate) struct DiagnosticSessions {
    pub d1test: Option<D1TestLog>,
    pub frame: Option<FrameCapture>,
    pub no_touch: Option<LogSink>,
    pub event_log: Option<LogSink>,
}

impl DiagnosticSessions {
    pub(crate) fn close_all(&mut self) {
        close(self.d1test.take().map(|s| s.sink));
        close(self.frame.take().map(|s| s.sink));
        close(self.no_touch.take());
        close(self.event_log.take());
    }
}

pub(crate) fn close(sink: Option<LogSink>) {
    if let Some(mut sink) = sink {
        if let Err(e) = sink.flush() {
            warn!(error = %e, "Flushing log sink failed");
        }
    }
}

fn append(sink: &mut LogSink, data: &[u8]) -> Result<()> {
    sink.write_all(data)
        .map_err(|e| DriverError::BadWrite(e.to_string()))
}

/// Send the disable packet for `major`, then free the slot.
///
/// A slot held by some other command is left alone.
fn send_disable<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
    major: Major,
    payload: &[u8],
) -> Result<()> {
    match ctx.send(major, Minor::DataLast, 0, payload) {
        Ok(()) => {
            ctx.complete(Some(Minor::DataLast));
            Ok(())
        }
        Err(e @ DriverError::Busy { .. }) => Err(e),
        Err(e) => {
            if ctx.core.channel.active().major() == Some(major) {
                ctx.complete(None);
            }
            Err(e)
        }
    }
}

/// Start (`count > 0`) or stop (`count == 0`) d1test logging.
pub(crate) fn enable_d1test<B: SerialBus>(ctx: &mut HandlerContext<'_, B>, count: u32) -> Result<()> {
    if count == 0 {
        close(ctx.core.diag.d1test.take().map(|s| s.sink));
        return send_disable(ctx, Major::D1Test, &[]);
    }

    ctx.require_idle()?;
    let sink = ctx.create_log(&ctx.config.d1test_log_path)?;
    ctx.issue(Major::D1Test, Minor::Ok, 0, &data_words(&[count]))?;
    ctx.core.diag.d1test = Some(D1TestLog {
        sink,
        remaining: count as i64,
    });
    info!(count, "D1 test logging started");
    Ok(())
}

pub(crate) fn handle_d1test<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<HandleResult> {
    let rsp = ctx.read_response()?;
    let minor = check_minor(Major::D1Test, &rsp)?;

    let done = match ctx.core.diag.d1test.as_mut() {
        Some(log) => {
            append(&mut log.sink, &rsp.data)?;
            log.remaining -= 1;
            log.remaining <= 0
        }
        None => true,
    };

    if !done {
        return Ok(HandleResult::Continue);
    }
    close(ctx.core.diag.d1test.take().map(|s| s.sink));
    ctx.complete(Some(minor));
    info!("D1 test logging finished");
    Ok(HandleResult::Complete)
}

/// Start (`count > 0`) or stop (`count == 0`) frame capture.
pub(crate) fn enable_frame<B: SerialBus>(ctx: &mut HandlerContext<'_, B>, count: u32) -> Result<()> {
    if count == 0 {
        close(ctx.core.diag.frame.take().map(|s| s.sink));
        return send_disable(ctx, Major::FrameDump, &data_words(&[0]));
    }

    ctx.require_idle()?;
    let sink = ctx.create_log(&ctx.config.frame_log_path)?;
    ctx.issue(Major::FrameDump, Minor::Ok, 0, &data_words(&[count]))?;
    ctx.core.diag.frame = Some(FrameCapture {
        sink,
        remaining: count,
        frame_size: 0,
        buffer: Vec::new(),
    });
    info!(count, "Frame capture started");
    Ok(())
}

/// The enable response carries the frame size; later responses are acks.
pub(crate) fn handle_frame_command<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
) -> Result<HandleResult> {
    let rsp = ctx.read_response()?;
    let minor = check_minor(Major::FrameDump, &rsp)?;

    let Some(frame) = ctx.core.diag.frame.as_mut() else {
        ctx.complete(Some(minor));
        return Ok(HandleResult::Complete);
    };
    if frame.frame_size != 0 {
        return Ok(HandleResult::Continue);
    }

    let size = rsp
        .word(0)
        .ok_or_else(|| DriverError::Protocol("frame dump response without size".into()))?
        as usize;
    if size > MAX_FRAME_SIZE {
        return Err(DriverError::Protocol(format!(
            "frame size {} exceeds {}",
            size, MAX_FRAME_SIZE
        )));
    }
    frame.frame_size = size;
    debug!(frame_size = size, "Frame size reported");
    Ok(HandleResult::Continue)
}

/// Stream FIFO has a frame ready.
pub(crate) fn handle_frame_stream<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<()> {
    let core = &mut *ctx.core;
    let Some(frame) = core.diag.frame.as_mut() else {
        warn!("Stream data with no frame capture running");
        control::flush(&core.bus)?;
        if core.channel.active().major() == Some(Major::FrameDump) {
            ctx.complete(None);
        }
        return Ok(());
    };
    if frame.frame_size == 0 {
        return Err(DriverError::Protocol("stream data before frame size".into()));
    }

    frame.buffer.resize(FRAME_LENGTH_WIDTH + frame.frame_size, 0);
    core.bus.read_fifo(REGISTER_FIFO_STREAM, &mut frame.buffer)?;
    append(&mut frame.sink, &frame.buffer[FRAME_LENGTH_WIDTH..])?;
    frame.remaining = frame.remaining.saturating_sub(1);
    let remaining = frame.remaining;

    ctx.emit(SensorEvent::FrameCaptured { remaining });
    if remaining == 0 {
        info!("Frame capture finished");
        return enable_frame(ctx, 0);
    }
    Ok(())
}

pub(crate) fn enable_no_touch<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<()> {
    ctx.require_idle()?;
    let sink = ctx.create_log(&ctx.config.no_touch_log_path)?;
    ctx.issue(Major::NoTouch, Minor::Ok, 0, &[])?;
    ctx.core.diag.no_touch = Some(sink);
    info!("No-touch logging started");
    Ok(())
}

pub(crate) fn handle_no_touch<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<HandleResult> {
    let rsp = match ctx.read_response() {
        Ok(rsp) => rsp,
        Err(e) => {
            close(ctx.core.diag.no_touch.take());
            ctx.complete(None);
            return Err(e);
        }
    };
    let minor = check_minor(Major::NoTouch, &rsp)?;

    if let Some(sink) = ctx.core.diag.no_touch.as_mut() {
        append(sink, &rsp.data)?;
    }
    if minor != Minor::DataLast && ctx.core.diag.no_touch.is_some() {
        return Ok(HandleResult::Continue);
    }
    close(ctx.core.diag.no_touch.take());
    ctx.complete(Some(minor));
    info!("No-touch logging finished");
    Ok(HandleResult::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandHeader, REGISTER_ACTIONS, REGISTER_FIFO_COMMAND};
    use crate::state::handlers::tests::Harness;
    use crate::state::machine::ActiveCommand;
    use crate::state::machine::tests::response;

    #[test]
    fn test_d1test_counts_down_and_frees_slot() {
        let mut h = Harness::new();
        enable_d1test(&mut h.ctx(), 2).unwrap();
        assert_eq!(h.core.channel.active(), ActiveCommand::Issued(Major::D1Test));
        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        assert_eq!(&sent[0][CommandHeader::SIZE..], &[2, 0, 0, 0]);

        h.bus.queue_fifo(REGISTER_FIFO_COMMAND, &response(Major::D1Test, Minor::Ok, 0, &[1, 2]));
        assert_eq!(handle_d1test(&mut h.ctx()).unwrap(), HandleResult::Continue);
        h.bus.queue_fifo(REGISTER_FIFO_COMMAND, &response(Major::D1Test, Minor::Ok, 0, &[3]));
        assert_eq!(handle_d1test(&mut h.ctx()).unwrap(), HandleResult::Complete);

        assert!(h.core.channel.is_idle());
        assert!(h.core.diag.d1test.is_none());
        assert_eq!(h.files.contents(&h.config.d1test_log_path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_d1test_disable_sends_data_last() {
        let mut h = Harness::new();
        enable_d1test(&mut h.ctx(), 5).unwrap();
        enable_d1test(&mut h.ctx(), 0).unwrap();

        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        assert_eq!(sent.len(), 2);
        let header = CommandHeader::from_bytes(&sent[1]).unwrap();
        assert_eq!(header.minor(), Some(Minor::DataLast));
        assert_eq!(header.length, 0);
        assert!(h.core.channel.is_idle());
        assert!(h.core.diag.d1test.is_none());
    }

    #[test]
    fn test_d1test_error_minor_is_rejected() {
        let mut h = Harness::new();
        enable_d1test(&mut h.ctx(), 3).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::D1Test, Minor::BadData, 0, &[]),
        );
        assert!(matches!(
            handle_d1test(&mut h.ctx()),
            Err(DriverError::Rejected {
                minor: Minor::BadData,
                ..
            })
        ));
    }

    #[test]
    fn test_frame_capture_logs_frames_then_disables() {
        let mut h = Harness::new();
        enable_frame(&mut h.ctx(), 2).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::FrameDump, Minor::Ok, 0, &data_words(&[3])),
        );
        assert_eq!(handle_frame_command(&mut h.ctx()).unwrap(), HandleResult::Continue);

        h.bus.queue_fifo(REGISTER_FIFO_STREAM, &[3, 0, 0, 0, 0xA, 0xB, 0xC]);
        handle_frame_stream(&mut h.ctx()).unwrap();
        assert_eq!(h.core.channel.active(), ActiveCommand::Issued(Major::FrameDump));

        h.bus.queue_fifo(REGISTER_FIFO_STREAM, &[3, 0, 0, 0, 0xD, 0xE, 0xF]);
        handle_frame_stream(&mut h.ctx()).unwrap();

        assert!(h.core.channel.is_idle());
        assert_eq!(
            h.files.contents(&h.config.frame_log_path).unwrap(),
            vec![0xA, 0xB, 0xC, 0xD, 0xE, 0xF]
        );
        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        let stop = CommandHeader::from_bytes(&sent[1]).unwrap();
        assert_eq!(stop.minor(), Some(Minor::DataLast));
        assert_eq!(&sent[1][CommandHeader::SIZE..], &[0, 0, 0, 0]);
        assert_eq!(
            h.observer
                .count(|e| matches!(e, SensorEvent::FrameCaptured { .. })),
            2
        );
    }

    #[test]
    fn test_frame_size_limit() {
        let mut h = Harness::new();
        enable_frame(&mut h.ctx(), 1).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(
                Major::FrameDump,
                Minor::Ok,
                0,
                &data_words(&[MAX_FRAME_SIZE as u32 + 1]),
            ),
        );
        assert!(matches!(
            handle_frame_command(&mut h.ctx()),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn test_stream_before_size_is_error() {
        let mut h = Harness::new();
        enable_frame(&mut h.ctx(), 1).unwrap();
        assert!(matches!(
            handle_frame_stream(&mut h.ctx()),
            Err(DriverError::Protocol(_))
        ));
        assert!(h.bus.fifo_reads(REGISTER_FIFO_STREAM).is_empty());
    }

    #[test]
    fn test_stream_without_capture_flushes() {
        let mut h = Harness::new();
        handle_frame_stream(&mut h.ctx()).unwrap();
        assert_eq!(h.bus.register_writes(REGISTER_ACTIONS), vec![0x0003]);
        assert!(h.bus.fifo_reads(REGISTER_FIFO_STREAM).is_empty());
    }

    #[test]
    fn test_no_touch_until_data_last() {
        let mut h = Harness::new();
        enable_no_touch(&mut h.ctx()).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::NoTouch, Minor::DataFragment, 0, &[1, 1]),
        );
        assert_eq!(handle_no_touch(&mut h.ctx()).unwrap(), HandleResult::Continue);
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::NoTouch, Minor::DataLast, 0, &[2]),
        );
        assert_eq!(handle_no_touch(&mut h.ctx()).unwrap(), HandleResult::Complete);
        assert!(h.core.channel.is_idle());
        assert_eq!(h.files.contents(&h.config.no_touch_log_path).unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn test_no_touch_read_failure_cleans_up() {
        let mut h = Harness::new();
        enable_no_touch(&mut h.ctx()).unwrap();
        assert!(handle_no_touch(&mut h.ctx()).is_err());
        assert!(h.core.channel.is_idle());
        assert!(h.core.diag.no_touch.is_none());
    }

    #[test]
    fn test_enable_while_busy() {
        let mut h = Harness::new();
        enable_no_touch(&mut h.ctx()).unwrap();
        assert!(matches!(
            enable_d1test(&mut h.ctx(), 4),
            Err(DriverError::Busy {
                active: Major::NoTouch
            })
        ));
        assert!(matches!(
            enable_d1test(&mut h.ctx(), 0),
            Err(DriverError::Busy { .. })
        ));
        assert_eq!(h.core.channel.active(), ActiveCommand::Issued(Major::NoTouch));
    }
}
