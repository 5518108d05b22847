//! Factory calibration: a register script applied once events start.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::DriverError;
use crate::events::SensorEvent;
use crate::session::DriverConfig;
use crate::transport::SerialBus;
use crate::work::Job;

impl<B: SerialBus + 'static> Device<B> {
    pub(crate) fn schedule_calibration(&self) {
        self.calibration_attempts.store(0, Ordering::SeqCst);
        self.platform
            .scheduler
            .schedule(Job::Calibration, Duration::ZERO);
    }

    pub(crate) fn run_calibration(&self) {
        let Some(path) = self.config.calibration_path.as_deref() else {
            debug!("No calibration file configured");
            return;
        };
        let attempts = self.calibration_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self
            .platform
            .files
            .read_to_end(path)
            .map_err(|_| DriverError::BadOpen {
                path: path.display().to_string(),
            })
            .and_then(|raw| self.apply_boot_init(&raw));

        match result {
            Ok(groups) => {
                info!(path = %path.display(), groups, attempts, "Calibration applied");
                self.emit(SensorEvent::Calibration {
                    applied: true,
                    attempts,
                });
            }
            Err(e) if attempts < self.config.calibration_retries => {
                debug!(error = %e, attempts, "Calibration not ready, retrying");
                self.platform.scheduler.schedule(
                    Job::Calibration,
                    DriverConfig::delay(self.config.calibration_retry_delay_ms),
                );
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, attempts, "Calibration abandoned");
                self.emit(SensorEvent::Calibration {
                    applied: false,
                    attempts,
                });
            }
        }
    }
}
