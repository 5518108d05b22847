//! Deferred work: job kinds, the scheduler seam and its implementations.

pub mod manual;
pub mod queue;
pub mod traits;

pub use manual::ManualScheduler;
pub use queue::{PendingJobs, WorkQueue, WorkReceiver};
pub use traits::{Job, Scheduler};
