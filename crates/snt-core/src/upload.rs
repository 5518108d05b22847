//! Firmware upload pacer.
//!
//! Each [`Job::Firmware`] run pushes one payload. Between payloads the
//! pacer waits for the chip's ready interrupt (or a fixed delay when not
//! interrupt driven). The interrupt top half only flips atomics and
//! reschedules the job.

use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::device::{Device, lock};
use crate::error::{DriverError, Result};
use crate::events::{DriverStatus, SensorEvent};
use crate::payload::{PacerState, StepOutcome, UploadKind, UploadSession, UploadStatus, open_image};
use crate::protocol::REGISTER_EVENT;
use crate::session::DriverConfig;
use crate::transport::SerialBus;
use crate::work::Job;

/// The upload currently owned by the pacer.
pub(crate) struct ActiveUpload {
    session: UploadSession,
    path: PathBuf,
    /// Set when this upload installed the interrupt handler itself.
    irq_registered: bool,
}

impl<B: SerialBus + 'static> Device<B> {
    /// Start a boot upload of `path`. Progress is reported through
    /// [`Self::upload_status`].
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn upload_firmware(&self, path: &Path) -> Result<()> {
        self.begin_upload(UploadKind::Boot, path)
    }

    pub fn upload_status(&self) -> UploadStatus {
        lock(&self.upload_status).clone()
    }

    /// Block while an upload is in progress, for at most `timeout`.
    pub fn wait_for_upload(&self, timeout: Duration) -> UploadStatus {
        let status = lock(&self.upload_status);
        let (status, _) = self
            .upload_cv
            .wait_timeout_while(status, timeout, |s| {
                matches!(s, UploadStatus::InProgress { .. })
            })
            .unwrap_or_else(PoisonError::into_inner);
        status.clone()
    }

    pub(crate) fn begin_upload(&self, kind: UploadKind, path: &Path) -> Result<()> {
        {
            let mut upload = lock(&self.upload);
            if upload.is_some() {
                return Err(DriverError::UploadInProgress);
            }
            let mut session = UploadSession::new(
                kind,
                self.config.fwdl_buffer_size,
                self.config.boot.to_word(),
                self.platform.clock.now_ms(),
            );
            session.goto_state(PacerState::OpeningFile);
            *upload = Some(ActiveUpload {
                session,
                path: path.to_path_buf(),
                irq_registered: false,
            });
        }

        self.fw_waiting_irq.store(false, Ordering::SeqCst);
        self.upload_active.store(true, Ordering::SeqCst);
        *lock(&self.upload_status) = UploadStatus::InProgress {
            kind,
            payloads: 0,
            bytes: 0,
        };
        info!(kind = %kind, path = %path.display(), "Firmware upload requested");

        let delay = match kind {
            UploadKind::Boot => {
                self.set_status(DriverStatus::FirmwareLoading);
                self.config.upload_start_delay_ms
            }
            UploadKind::Redownload => 0,
        };
        self.platform
            .scheduler
            .schedule(Job::Firmware, DriverConfig::delay(delay));
        Ok(())
    }

    /// Interrupt top half.
    pub(crate) fn on_interrupt(&self) {
        if self.upload_active.load(Ordering::SeqCst) {
            self.fw_waiting_irq.store(false, Ordering::SeqCst);
            let delay = if self.config.boot.logging_enabled() {
                self.config.log_delay_ms
            } else {
                0
            };
            self.platform
                .scheduler
                .reschedule(Job::Firmware, DriverConfig::delay(delay));
        } else {
            self.platform.scheduler.schedule(Job::Event, Duration::ZERO);
        }
    }

    /// One pacer step, run by the worker.
    pub(crate) fn firmware_step(&self) {
        let mut upload = lock(&self.upload);
        let Some(active) = upload.as_mut() else {
            debug!("Firmware job with no upload running");
            return;
        };

        let result = self.advance(active);
        if matches!(result, Ok(StepOutcome::Continue)) {
            let (kind, payloads, bytes) = (
                active.session.kind(),
                active.session.payloads(),
                active.session.bytes(),
            );
            drop(upload);
            *lock(&self.upload_status) = UploadStatus::InProgress {
                kind,
                payloads,
                bytes,
            };
            self.emit(SensorEvent::Progress {
                kind,
                payloads,
                bytes,
            });
            return;
        }

        let finished = upload.take();
        drop(upload);
        if let Some(active) = finished {
            self.finish(active, result);
        }
    }

    fn advance(&self, active: &mut ActiveUpload) -> Result<StepOutcome> {
        let paced = self.config.upload_with_irq;

        if !active.session.has_file() {
            let file = open_image(
                &*self.platform.files,
                &*self.platform.clock,
                &active.path,
                self.config.backup_firmware_path.as_deref(),
                self.config.open_attempts,
                DriverConfig::delay(self.config.open_retry_delay_ms),
            )?;
            active.session.attach(file);
            if paced && active.session.kind() == UploadKind::Boot {
                self.install_irq()?;
                active.irq_registered = true;
            }
        }

        if paced {
            if self.fw_waiting_irq.swap(true, Ordering::SeqCst) {
                warn!(
                    kind = %active.session.kind(),
                    payloads = active.session.payloads(),
                    "No interrupt from chip"
                );
                return Err(DriverError::Timeout);
            }
            self.platform.scheduler.schedule(
                Job::Firmware,
                DriverConfig::delay(self.config.irq_timeout_ms),
            );
        }

        let outcome = {
            let core = self.lock_core();
            active
                .session
                .transfer_payload(|out, input| core.bus.read_and_write(out, input))?
        };

        if outcome == StepOutcome::Continue {
            active.session.goto_state(PacerState::AwaitingInterrupt);
            if !paced {
                self.platform.scheduler.schedule(
                    Job::Firmware,
                    DriverConfig::delay(self.config.upload_delay_ms),
                );
            }
        }
        Ok(outcome)
    }

    fn finish(&self, active: ActiveUpload, result: Result<StepOutcome>) {
        let ActiveUpload {
            mut session,
            irq_registered,
            ..
        } = active;
        let kind = session.kind();

        self.upload_active.store(false, Ordering::SeqCst);
        self.fw_waiting_irq.store(false, Ordering::SeqCst);
        self.platform.scheduler.cancel(Job::Firmware);
        if irq_registered {
            self.platform.irq.unregister();
        }

        let (payloads, bytes) = (session.payloads(), session.bytes());
        info!(
            kind = %kind,
            payloads,
            bytes,
            kbps = session.throughput_kbps(self.platform.clock.now_ms()),
            "Firmware upload ended"
        );
        let status = match &result {
            Ok(outcome) => {
                session.goto_state(PacerState::Finished);
                UploadStatus::Done {
                    kind,
                    already: *outcome == StepOutcome::Already,
                    payloads,
                    bytes,
                }
            }
            Err(e) => {
                session.goto_state(PacerState::Failed);
                self.report("Firmware upload failed", e);
                UploadStatus::Failed {
                    kind,
                    error: e.to_string(),
                }
            }
        };
        drop(session);

        let success = result.is_ok();
        match kind {
            UploadKind::Boot if success => {
                self.set_status(DriverStatus::FirmwareLoaded);
                if let Err(e) = self.start_event_processing() {
                    self.report("Event processing did not start", &e);
                }
            }
            UploadKind::Boot => self.set_status(DriverStatus::FirmwareFailed),
            UploadKind::Redownload => {
                self.context_fwd.store(false, Ordering::SeqCst);
                if success {
                    self.recover_after_reset();
                } else {
                    self.set_status(DriverStatus::FirmwareFailed);
                }
            }
        }

        *lock(&self.upload_status) = status;
        self.upload_cv.notify_all();
        self.emit(SensorEvent::UploadFinished { kind, success });
    }

    /// The chip rebooted under us: forget the outstanding command and
    /// reapply calibration.
    fn recover_after_reset(&self) {
        {
            let mut core = self.lock_core();
            if let Some(major) = core.channel.release() {
                warn!(major = %major, "Command lost to chip reset");
            }
            match core.bus.read_register(REGISTER_EVENT) {
                Ok(events) => debug!(events = %format!("0x{:04X}", events), "Event register after reset"),
                Err(e) => warn!(error = %e, "Event register read after reset failed"),
            }
        }
        self.param_cv.notify_all();
        self.schedule_calibration();
    }
}
