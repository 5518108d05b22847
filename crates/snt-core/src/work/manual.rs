//! Manually driven scheduler for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{Job, Scheduler};

/// Records scheduling requests; tests run the jobs themselves.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    pending: Arc<Mutex<BTreeMap<Job, Duration>>>,
    cancelled: Arc<Mutex<Vec<Job>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, job: Job) -> bool {
        self.pending.lock().unwrap().contains_key(&job)
    }

    /// Delay of the pending instance of `job`.
    pub fn delay(&self, job: Job) -> Option<Duration> {
        self.pending.lock().unwrap().get(&job).copied()
    }

    /// Remove `job` from the pending set, as if the worker picked it up.
    pub fn take(&self, job: Job) -> bool {
        self.pending.lock().unwrap().remove(&job).is_some()
    }

    pub fn pending(&self) -> Vec<Job> {
        self.pending.lock().unwrap().keys().copied().collect()
    }

    /// Jobs that were pending when `cancel` was called, in order.
    pub fn cancelled(&self) -> Vec<Job> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, job: Job, delay: Duration) {
        self.pending.lock().unwrap().entry(job).or_insert(delay);
    }

    fn reschedule(&self, job: Job, delay: Duration) {
        self.pending.lock().unwrap().insert(job, delay);
    }

    fn cancel(&self, job: Job) {
        if self.pending.lock().unwrap().remove(&job).is_some() {
            self.cancelled.lock().unwrap().push(job);
        }
    }
}
