//! Deferred work items and the scheduler that runs them.

use std::fmt;
use std::time::Duration;

/// A deferred work item. At most one instance of each is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {
    /// Drain the event register.
    Event,
    /// Next firmware pacer step, or its interrupt timeout.
    Firmware,
    /// Apply the boot-init calibration script.
    Calibration,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Event => write!(f, "event"),
            Job::Firmware => write!(f, "firmware"),
            Job::Calibration => write!(f, "calibration"),
        }
    }
}

/// Queues deferred jobs for the device worker.
///
/// Calls come from interrupt top halves as well as from the worker itself,
/// so implementations must never block.
pub trait Scheduler: Send + Sync {
    /// Queue `job` after `delay` unless it is already pending.
    fn schedule(&self, job: Job, delay: Duration);

    /// Queue `job` after `delay`, replacing the deadline of a pending instance.
    fn reschedule(&self, job: Job, delay: Duration);

    /// Drop a pending instance of `job`, if any.
    fn cancel(&self, job: Job);
}
