//! Host services the driver core calls into.

pub mod clock;
pub mod fs;

use std::sync::Arc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fs::{FileSystem, ImageFile, LogSink, MemoryFileSystem, StdFileSystem};

use crate::events::{NullObserver, SensorObserver};
use crate::track::{NullConsumer, ReportConsumer};
use crate::transport::InterruptLine;
use crate::work::Scheduler;

/// Everything a [`Device`](crate::device::Device) needs besides its bus.
#[derive(Clone)]
pub struct Platform {
    pub files: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub irq: Arc<dyn InterruptLine>,
    pub observer: Arc<dyn SensorObserver>,
    pub consumer: Arc<dyn ReportConsumer>,
}

impl Platform {
    /// Platform with no observer and no report consumer.
    pub fn new(
        files: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        irq: Arc<dyn InterruptLine>,
    ) -> Self {
        Self {
            files,
            clock,
            scheduler,
            irq,
            observer: Arc::new(NullObserver),
            consumer: Arc::new(NullConsumer),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SensorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_consumer(mut self, consumer: Arc<dyn ReportConsumer>) -> Self {
        self.consumer = consumer;
        self
    }
}
