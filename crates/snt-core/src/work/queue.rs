//! Thread-backed work queue.
//!
//! Interrupt top halves and the worker itself post messages on an mpsc
//! channel; a single worker thread keeps the pending table and runs due
//! jobs one at a time, so no two jobs for a device ever overlap.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::traits::{Job, Scheduler};

enum Message {
    Schedule(Job, Duration),
    Reschedule(Job, Duration),
    Cancel(Job),
    Shutdown,
}

/// Pending jobs keyed by kind, each with a deadline.
#[derive(Debug, Default)]
pub struct PendingJobs {
    deadlines: HashMap<Job, Instant>,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the job was already pending.
    pub fn schedule(&mut self, job: Job, at: Instant) -> bool {
        if self.deadlines.contains_key(&job) {
            return false;
        }
        self.deadlines.insert(job, at);
        true
    }

    pub fn reschedule(&mut self, job: Job, at: Instant) {
        self.deadlines.insert(job, at);
    }

    pub fn cancel(&mut self, job: Job) -> bool {
        self.deadlines.remove(&job).is_some()
    }

    pub fn is_pending(&self, job: Job) -> bool {
        self.deadlines.contains_key(&job)
    }

    /// Remove and return the earliest job due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Job> {
        let job = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(job, at)| (**at, **job))
            .map(|(job, _)| *job)?;
        self.deadlines.remove(&job);
        Some(job)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }
}

/// Producer handle. Cheap to clone; hand one to the device.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<Message>,
}

/// Consumer half, turned into the worker thread by [`WorkReceiver::spawn`].
pub struct WorkReceiver {
    receiver: mpsc::Receiver<Message>,
}

impl WorkQueue {
    pub fn new() -> (WorkQueue, WorkReceiver) {
        let (sender, receiver) = mpsc::channel();
        (WorkQueue { sender }, WorkReceiver { receiver })
    }

    /// Ask the worker to exit once it finishes the current job.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
    }

    fn post(&self, message: Message) {
        // The worker is gone only after shutdown; late posts are dropped.
        let _ = self.sender.send(message);
    }
}

impl Scheduler for WorkQueue {
    fn schedule(&self, job: Job, delay: Duration) {
        self.post(Message::Schedule(job, delay));
    }

    fn reschedule(&self, job: Job, delay: Duration) {
        self.post(Message::Reschedule(job, delay));
    }

    fn cancel(&self, job: Job) {
        self.post(Message::Cancel(job));
    }
}

impl WorkReceiver {
    /// Start the worker thread. `run` is called for every due job.
    pub fn spawn<F>(self, name: &str, run: F) -> io::Result<thread::JoinHandle<()>>
    where
        F: FnMut(Job) + Send + 'static,
    {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run_loop(run))
    }

    fn run_loop<F: FnMut(Job)>(self, mut run: F) {
        let mut pending = PendingJobs::new();
        loop {
            while let Some(job) = pending.pop_due(Instant::now()) {
                trace!(job = %job, "Running job");
                run(job);
            }

            let message = match pending.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.receiver.recv_timeout(timeout) {
                        Ok(m) => Some(m),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.receiver.recv() {
                    Ok(m) => Some(m),
                    Err(_) => break,
                },
            };

            let now = Instant::now();
            match message {
                Some(Message::Schedule(job, delay)) => {
                    pending.schedule(job, now + delay);
                }
                Some(Message::Reschedule(job, delay)) => pending.reschedule(job, now + delay),
                Some(Message::Cancel(job)) => {
                    pending.cancel(job);
                }
                Some(Message::Shutdown) => break,
                None => {}
            }
        }
        debug!("Work queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_pending_schedule_keeps_first_deadline() {
        let base = Instant::now();
        let mut pending = PendingJobs::new();
        assert!(pending.schedule(Job::Event, base + Duration::from_millis(10)));
        assert!(!pending.schedule(Job::Event, base));
        assert_eq!(pending.pop_due(base + Duration::from_millis(5)), None);
        assert_eq!(
            pending.pop_due(base + Duration::from_millis(10)),
            Some(Job::Event)
        );
        assert!(!pending.is_pending(Job::Event));
    }

    #[test]
    fn test_pending_reschedule_and_cancel() {
        let base = Instant::now();
        let mut pending = PendingJobs::new();
        pending.schedule(Job::Firmware, base + Duration::from_secs(5));
        pending.reschedule(Job::Firmware, base);
        assert_eq!(pending.next_deadline(), Some(base));
        assert!(pending.cancel(Job::Firmware));
        assert!(!pending.cancel(Job::Firmware));
        assert_eq!(pending.next_deadline(), None);
    }

    #[test]
    fn test_pending_pops_earliest_first() {
        let base = Instant::now();
        let mut pending = PendingJobs::new();
        pending.schedule(Job::Calibration, base + Duration::from_millis(2));
        pending.schedule(Job::Event, base + Duration::from_millis(1));
        let later = base + Duration::from_millis(3);
        assert_eq!(pending.pop_due(later), Some(Job::Event));
        assert_eq!(pending.pop_due(later), Some(Job::Calibration));
        assert_eq!(pending.pop_due(later), None);
    }

    #[test]
    fn test_worker_runs_jobs_and_stops() {
        let (queue, receiver) = WorkQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = receiver
            .spawn("snt-test-worker", move |job| {
                log.lock().unwrap().push(job);
                if job == Job::Calibration {
                    let _ = done_tx.send(());
                }
            })
            .unwrap();

        queue.schedule(Job::Event, Duration::ZERO);
        queue.schedule(Job::Firmware, Duration::from_secs(60));
        queue.cancel(Job::Firmware);
        queue.schedule(Job::Calibration, Duration::from_millis(5));

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        queue.shutdown();
        handle.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Job::Event, Job::Calibration]);
    }
}
