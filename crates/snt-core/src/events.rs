//! Event system for UI decoupling.
//!
//! Lets a CLI or control surface follow driver activity without reaching
//! into the device state.

use std::fmt;

use crate::payload::firmware::UploadKind;
use crate::protocol::{Major, Minor};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Driver lifecycle, as reported to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverStatus {
    /// Probed, nothing started.
    #[default]
    Idle,
    /// Boot firmware upload in progress.
    FirmwareLoading,
    /// Boot firmware accepted by the chip.
    FirmwareLoaded,
    /// Boot firmware upload failed.
    FirmwareFailed,
    /// Event processing is running.
    EventMonitoring,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverStatus::Idle => write!(f, "Idle"),
            DriverStatus::FirmwareLoading => write!(f, "Firmware Loading"),
            DriverStatus::FirmwareLoaded => write!(f, "Firmware Loaded"),
            DriverStatus::FirmwareFailed => write!(f, "Firmware Failed"),
            DriverStatus::EventMonitoring => write!(f, "Event Monitoring"),
        }
    }
}

/// Events emitted by the device.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// Lifecycle changed.
    StatusChanged { from: DriverStatus, to: DriverStatus },
    /// A command packet went out on the command FIFO.
    CommandIssued {
        major: Major,
        minor: Minor,
        address: u16,
        length: usize,
    },
    /// The outstanding command finished and the slot is free again.
    CommandCompleted { major: Major, minor: Option<Minor> },
    /// A batch of track reports was handed to the consumer.
    TrackReports { frame: u16, count: usize },
    /// A streamed frame was logged.
    FrameCaptured { remaining: u32 },
    /// Firmware upload progress.
    Progress {
        kind: UploadKind,
        payloads: u32,
        bytes: u64,
    },
    /// Firmware upload ended.
    UploadFinished { kind: UploadKind, success: bool },
    /// Calibration script was applied (or given up on).
    Calibration { applied: bool, attempts: u32 },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Error occurred.
    Error { message: String },
}

/// Observer trait for receiving device events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SensorObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &SensorEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SensorObserver for NullObserver {
    fn on_event(&self, _event: &SensorEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SensorObserver for TracingObserver {
    fn on_event(&self, event: &SensorEvent) {
        match event {
            SensorEvent::StatusChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Driver status changed");
            }
            SensorEvent::CommandIssued {
                major,
                minor,
                address,
                length,
            } => {
                tracing::debug!(
                    major = %major,
                    minor = %minor,
                    address = %format!("0x{:04X}", address),
                    len = length,
                    "Command issued"
                );
            }
            SensorEvent::CommandCompleted { major, minor } => {
                let minor = minor.map_or_else(|| "?".to_string(), |m| m.to_string());
                tracing::debug!(major = %major, minor = %minor, "Command completed");
            }
            SensorEvent::TrackReports { frame, count } => {
                tracing::trace!(frame = frame, count = count, "Track reports");
            }
            SensorEvent::FrameCaptured { remaining } => {
                tracing::debug!(remaining = remaining, "Frame captured");
            }
            SensorEvent::Progress {
                kind,
                payloads,
                bytes,
            } => {
                tracing::debug!(kind = %kind, payloads = payloads, bytes = bytes, "Upload progress");
            }
            SensorEvent::UploadFinished { kind, success } => {
                if *success {
                    tracing::info!(kind = %kind, "Firmware upload finished");
                } else {
                    tracing::error!(kind = %kind, "Firmware upload failed");
                }
            }
            SensorEvent::Calibration { applied, attempts } => {
                if *applied {
                    tracing::info!(attempts = attempts, "Calibration applied");
                } else {
                    tracing::warn!(attempts = attempts, "Calibration not applied");
                }
            }
            SensorEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            SensorEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer that keeps every event for later inspection.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub events: Mutex<Vec<SensorEvent>>,
    }

    impl SensorObserver for RecordingObserver {
        fn on_event(&self, event: &SensorEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl RecordingObserver {
        pub fn count(&self, pred: impl Fn(&SensorEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    #[test]
    fn test_recording_observer_counts() {
        let observer = RecordingObserver::default();
        observer.on_event(&SensorEvent::FrameCaptured { remaining: 1 });
        observer.on_event(&SensorEvent::Error {
            message: "x".into(),
        });
        assert_eq!(
            observer.count(|e| matches!(e, SensorEvent::FrameCaptured { .. })),
            1
        );
        assert_eq!(observer.count(|_| true), 2);
    }

    #[test]
    fn test_driver_status_display() {
        assert_eq!(DriverStatus::EventMonitoring.to_string(), "Event Monitoring");
        assert_eq!(DriverStatus::default(), DriverStatus::Idle);
    }
}
