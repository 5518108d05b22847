//! Event dispatcher: drains the event register after an interrupt.
//!
//! Runs as [`Job::Event`](crate::work::Job::Event) on the worker. Errors
//! are logged and reported to the observer; nothing propagates out.

use std::sync::atomic::Ordering;

use tracing::{debug, trace, warn};

use crate::device::{Device, OperationalState, lock};
use crate::error::{DriverError, Result};
use crate::events::SensorEvent;
use crate::payload::UploadKind;
use crate::protocol::{EventRecord, Major, REGISTER_EVENT, REGISTER_FRAME_RATE};
use crate::state::handlers::{self, HandlerContext, control, diagnostics};
use crate::track::{self, TrackReportBatch};
use crate::transport::SerialBus;

impl<B: SerialBus + 'static> Device<B> {
    /// One dispatcher run.
    pub(crate) fn process_events(&self) {
        let _events = lock(&self.event_lock);
        self.dispatches.fetch_add(1, Ordering::SeqCst);

        let state = self.lock_core().state;
        if matches!(
            state,
            OperationalState::Suspended | OperationalState::DeepSleep
        ) {
            debug!(state = %state, "Ignoring events while asleep");
            return;
        }

        let mut last = EventRecord::empty();
        let mut cycles = 0u32;
        loop {
            cycles += 1;
            let events = match self.read_events() {
                Ok(events) => events,
                Err(e) => {
                    self.report("Event register read failed", &e);
                    break;
                }
            };
            trace!(events = ?events, cycle = cycles, "Event register");
            last = events;

            if events.contains(EventRecord::FWD) {
                self.request_redownload();
            }
            if events.contains(EventRecord::TOUCH) {
                if let Err(e) = self.ingest_track_reports() {
                    self.report("Track report ingestion failed", &e);
                }
            }
            if events.contains(EventRecord::COMMAND) {
                self.handle_command_event();
            }
            if events.contains(EventRecord::STREAM) {
                if let Err(e) = self.with_context(diagnostics::handle_frame_stream) {
                    self.report("Frame stream failed", &e);
                    self.with_context(control::cleanup);
                }
            }

            let d1test_idle = self.lock_core().diag.d1test.is_none();
            let more = events.contains(EventRecord::TOUCH)
                || (events.contains(EventRecord::COMMAND) && d1test_idle);
            if !more {
                break;
            }
            if cycles >= self.config.max_drain_cycles {
                warn!(cycles, "Event drain limit reached");
                break;
            }
        }

        // only the final register read decides the host wake
        if last.contains(EventRecord::HOST) {
            self.restore_frame_rate();
        }
    }

    /// Read the event register, re-reading once if stream data shows up
    /// with no frame dump outstanding.
    fn read_events(&self) -> Result<EventRecord> {
        let core = self.lock_core();
        let mut events = EventRecord::from_register(core.bus.read_register(REGISTER_EVENT)?);
        if events.contains(EventRecord::STREAM)
            && core.channel.active().major() != Some(Major::FrameDump)
        {
            debug!("Stream flag without frame dump, re-reading event register");
            events = EventRecord::from_register(core.bus.read_register(REGISTER_EVENT)?);
        }
        Ok(events)
    }

    fn request_redownload(&self) {
        if self.context_fwd.swap(true, Ordering::SeqCst) {
            debug!("Redownload already running");
            return;
        }
        let path = self.config.firmware_path.clone();
        if let Err(e) = self.begin_upload(UploadKind::Redownload, &path) {
            self.context_fwd.store(false, Ordering::SeqCst);
            self.report("Redownload could not start", &e);
        }
    }

    /// The scratch buffer leaves the core while the consumer runs, so the
    /// device lock is not held across the callback. The event lock keeps
    /// any other ingestion out meanwhile.
    fn ingest_track_reports(&self) -> Result<()> {
        let now_ms = self.platform.clock.now_ms();
        let (frame, scratch) = {
            let mut core = self.lock_core();
            let core = &mut *core;
            let frame = track::read_batch(&core.bus, &mut core.scratch)?;
            (frame, std::mem::take(&mut core.scratch))
        };

        let batch = TrackReportBatch::new(frame, &scratch);
        self.platform.consumer.on_track_reports(&batch);

        let mut core = self.lock_core();
        if let Err(e) = core.track_log.record(&batch, now_ms) {
            warn!(error = %e, "Track report logging failed");
        }
        let count = batch.len();
        core.scratch = scratch;
        drop(core);

        self.emit(SensorEvent::TrackReports { frame, count });
        Ok(())
    }

    fn handle_command_event(&self) {
        let mut core = self.lock_core();
        let mut ctx = HandlerContext::new(&mut core, &self.platform, &self.config);
        if let Err(e) = handlers::handle_response(&mut ctx) {
            self.report("Command response failed", &e);
            control::cleanup(&mut ctx);
        }
        drop(core);
        self.param_cv.notify_all();
    }

    fn restore_frame_rate(&self) {
        let core = self.lock_core();
        if core.frame_rate_override {
            return;
        }
        if let Err(e) = core.bus.write_register(REGISTER_FRAME_RATE, core.frame_rate) {
            self.report("Frame rate restore failed", &DriverError::from(e));
        }
    }
}
