//! The sensor device: one bus, one command slot and the control surface.
//!
//! Everything that touches the bus goes through [`Device::lock_core`].
//! Deferred work (event dispatch, firmware pacing, calibration) runs as
//! [`Job`]s on the platform scheduler; see `dispatcher`, `upload` and
//! `calibration` for those halves of the implementation.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::error::{DriverError, Result};
use crate::events::{DriverStatus, SensorEvent};
use crate::payload::{FlashUpdate, UploadStatus, script};
use crate::platform::Platform;
use crate::protocol::{
    ENABLE_SENSING, EventRecord, Major, REGISTER_ENABLE, REGISTER_EVENT,
    REGISTER_FRAME_RATE,
};
use crate::session::DriverConfig;
use crate::state::handlers::diagnostics::{self, DiagnosticSessions};
use crate::state::handlers::partition::{self, PartitionWrite};
use crate::state::handlers::{HandlerContext, ParamOutcome, control, flash, params};
use crate::state::machine::{ActiveCommand, CommandChannel};
use crate::track::{TrackLog, TrackLogKind};
use crate::transport::SerialBus;
use crate::upload::ActiveUpload;
use crate::work::Job;

/// Power state consulted by the event dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationalState {
    #[default]
    Active,
    Suspended,
    DeepSleep,
    Resetting,
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationalState::Active => write!(f, "ACTIVE"),
            OperationalState::Suspended => write!(f, "SUSPENDED"),
            OperationalState::DeepSleep => write!(f, "DEEP_SLEEP"),
            OperationalState::Resetting => write!(f, "RESETTING"),
        }
    }
}

/// State guarded by the device lock.
pub(crate) struct DeviceCore<B> {
    pub bus: B,
    pub channel: CommandChannel,
    /// Reused for every touch FIFO read.
    pub scratch: Vec<u8>,
    pub track_log: TrackLog,
    pub diag: DiagnosticSessions,
    pub get_param: ParamOutcome,
    pub set_param: ParamOutcome,
    pub partition: Option<PartitionWrite>,
    pub flash: Option<FlashUpdate>,
    pub frame_rate: u16,
    pub state: OperationalState,
    pub frame_rate_override: bool,
    pub product_config: Vec<u8>,
}

impl<B> DeviceCore<B> {
    pub(crate) fn new(bus: B, config: &DriverConfig) -> Self {
        Self {
            bus,
            channel: CommandChannel::new(),
            scratch: Vec::new(),
            track_log: TrackLog::new(),
            diag: DiagnosticSessions::default(),
            get_param: ParamOutcome::Idle,
            set_param: ParamOutcome::Idle,
            partition: None,
            flash: None,
            frame_rate: config.frame_rate,
            state: OperationalState::Active,
            frame_rate_override: false,
            product_config: Vec::new(),
        }
    }
}

/// One SNT8100 behind a [`SerialBus`].
pub struct Device<B: SerialBus> {
    pub(crate) this: Weak<Self>,
    pub(crate) core: Mutex<DeviceCore<B>>,
    /// Held for a whole dispatcher drain loop.
    pub(crate) event_lock: Mutex<()>,
    pub(crate) upload: Mutex<Option<ActiveUpload>>,
    pub(crate) upload_status: Mutex<UploadStatus>,
    pub(crate) upload_cv: Condvar,
    /// Signalled whenever a sys-param outcome may have changed.
    pub(crate) param_cv: Condvar,
    /// A chip-requested redownload is running.
    pub(crate) context_fwd: AtomicBool,
    pub(crate) fw_waiting_irq: AtomicBool,
    pub(crate) upload_active: AtomicBool,
    pub(crate) dispatches: AtomicU64,
    pub(crate) calibration_attempts: AtomicU32,
    pub(crate) status: Mutex<DriverStatus>,
    pub(crate) config: DriverConfig,
    pub(crate) platform: Platform,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: SerialBus + 'static> Device<B> {
    pub fn new(bus: B, config: DriverConfig, platform: Platform) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            core: Mutex::new(DeviceCore::new(bus, &config)),
            event_lock: Mutex::new(()),
            upload: Mutex::new(None),
            upload_status: Mutex::new(UploadStatus::Idle),
            upload_cv: Condvar::new(),
            param_cv: Condvar::new(),
            context_fwd: AtomicBool::new(false),
            fw_waiting_irq: AtomicBool::new(false),
            upload_active: AtomicBool::new(false),
            dispatches: AtomicU64::new(0),
            calibration_attempts: AtomicU32::new(0),
            status: Mutex::new(DriverStatus::Idle),
            config,
            platform,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, DeviceCore<B>> {
        lock(&self.core)
    }

    /// Run `f` with the device locked.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce(&mut HandlerContext<'_, B>) -> R) -> R {
        let mut core = self.lock_core();
        let mut ctx = HandlerContext::new(&mut core, &self.platform, &self.config);
        f(&mut ctx)
    }

    pub(crate) fn emit(&self, event: SensorEvent) {
        self.platform.observer.on_event(&event);
    }

    pub(crate) fn set_status(&self, to: DriverStatus) {
        let from = std::mem::replace(&mut *lock(&self.status), to);
        if from != to {
            info!(from = %from, to = %to, "Driver status transition");
            self.emit(SensorEvent::StatusChanged { from, to });
        }
    }

    /// Log a failure that has no caller to return to.
    pub(crate) fn report(&self, what: &str, err: &DriverError) {
        error!(error = %err, "{}", what);
        self.emit(SensorEvent::Error {
            message: format!("{}: {}", what, err),
        });
    }

    pub fn driver_status(&self) -> DriverStatus {
        *lock(&self.status)
    }

    pub fn active_command(&self) -> ActiveCommand {
        self.lock_core().channel.active()
    }

    pub fn product_config(&self) -> Vec<u8> {
        self.lock_core().product_config.clone()
    }

    /// Number of dispatcher runs so far.
    pub fn event_dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Entry point for the worker.
    pub fn run_job(&self, job: Job) {
        match job {
            Job::Event => self.process_events(),
            Job::Firmware => self.firmware_step(),
            Job::Calibration => self.run_calibration(),
        }
    }

    pub(crate) fn install_irq(&self) -> Result<()> {
        let weak = self.this.clone();
        self.platform.irq.register(Box::new(move || {
            if let Some(device) = weak.upgrade() {
                device.on_interrupt();
            }
        }))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn start_event_processing(&self) -> Result<()> {
        {
            let mut core = self.lock_core();
            core.channel.release();
            let events = EventRecord::from_register(core.bus.read_register(REGISTER_EVENT)?);
            info!(
                boot = events.contains(EventRecord::BOOT),
                "Event register at start"
            );
            match control::read_product_config(&core.bus) {
                Ok(config) => core.product_config = config,
                Err(e) => warn!(error = %e, "Product config unavailable"),
            }
            let rate = core.frame_rate;
            core.bus.write_register(REGISTER_FRAME_RATE, rate)?;
        }

        self.install_irq()?;
        self.platform.irq.enable_wake()?;

        {
            let core = self.lock_core();
            let enable = core.bus.read_register(REGISTER_ENABLE)?;
            core.bus
                .write_register(REGISTER_ENABLE, enable | ENABLE_SENSING)?;
            let readback = core.bus.read_register(REGISTER_ENABLE)?;
            if readback & ENABLE_SENSING == 0 {
                return Err(DriverError::Protocol(format!(
                    "enable register reads back 0x{:04X}",
                    readback
                )));
            }
        }

        self.schedule_calibration();
        self.set_status(DriverStatus::EventMonitoring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn stop_event_processing(&self) {
        self.platform.irq.unregister();
        self.platform.scheduler.cancel(Job::Event);
        self.platform.scheduler.cancel(Job::Calibration);

        {
            let _events = lock(&self.event_lock);
            self.with_context(|ctx| {
                let disabled = ctx
                    .core
                    .bus
                    .read_register(REGISTER_ENABLE)
                    .and_then(|v| {
                        ctx.core
                            .bus
                            .write_register(REGISTER_ENABLE, v & !ENABLE_SENSING)
                    });
                if let Err(e) = disabled {
                    warn!(error = %e, "Could not clear enable bit");
                }
                control::cleanup(ctx);
                ctx.core.scratch = Vec::new();
                if let Err(e) = ctx.core.track_log.close_all() {
                    warn!(error = %e, "Closing track logs failed");
                }
            });
        }
        self.param_cv.notify_all();
        self.set_status(DriverStatus::Idle);
    }

    pub fn operational_state(&self) -> OperationalState {
        self.lock_core().state
    }

    /// Record the power state the dispatcher consults. The chip is not
    /// touched; frame-rate policy belongs to whoever calls
    /// [`Self::set_frame_rate`].
    pub fn set_operational_state(&self, state: OperationalState) {
        let mut core = self.lock_core();
        let from = std::mem::replace(&mut core.state, state);
        info!(from = %from, to = %state, "Operational state transition");
    }

    pub fn frame_rate(&self) -> u16 {
        self.lock_core().frame_rate
    }

    pub fn set_frame_rate(&self, rate: u16) -> Result<()> {
        let mut core = self.lock_core();
        core.bus.write_register(REGISTER_FRAME_RATE, rate)?;
        core.frame_rate = rate;
        info!(rate, "Frame rate set");
        Ok(())
    }

    pub fn set_frame_rate_override(&self, enabled: bool) {
        self.lock_core().frame_rate_override = enabled;
    }

    pub fn enable_track_report_logging(&self, enable: bool, kind: TrackLogKind) -> Result<()> {
        let mut core = self.lock_core();
        if !enable {
            core.track_log
                .close(kind)
                .map_err(|e| DriverError::BadWrite(e.to_string()))?;
            info!(kind = %kind, "Track report logging stopped");
            return Ok(());
        }

        let path = match kind {
            TrackLogKind::Text => &self.config.track_text_log_path,
            TrackLogKind::Binary => &self.config.track_binary_log_path,
        };
        let sink = self
            .platform
            .files
            .create(path)
            .map_err(|_| DriverError::BadOpen {
                path: path.display().to_string(),
            })?;
        core.track_log
            .open(kind, sink)
            .map_err(|e| DriverError::BadWrite(e.to_string()))?;
        info!(kind = %kind, path = %path.display(), "Track report logging started");
        Ok(())
    }

    pub fn enable_frame_logging(&self, count: u32) -> Result<()> {
        self.with_context(|ctx| diagnostics::enable_frame(ctx, count))
    }

    pub fn enable_no_touch_logging(&self) -> Result<()> {
        self.with_context(diagnostics::enable_no_touch)
    }

    pub fn enable_d1test_logging(&self, count: u32) -> Result<()> {
        self.with_context(|ctx| diagnostics::enable_d1test(ctx, count))
    }

    pub fn enable_event_log(&self) -> Result<()> {
        self.with_context(params::enable_event_log)
    }

    pub fn set_sys_param(&self, id: u16, value: u32) -> Result<()> {
        self.with_context(|ctx| params::set_sys_param(ctx, id, value))
    }

    /// Issue a get without waiting; poll [`Self::get_param_outcome`].
    pub fn request_sys_param(&self, id: u16) -> Result<()> {
        self.with_context(|ctx| params::request_sys_param(ctx, id))
    }

    /// Issue a get and block until the response is handled or `timeout`.
    pub fn get_sys_param(&self, id: u16, timeout: Duration) -> Result<u32> {
        let mut core = self.lock_core();
        {
            let mut ctx = HandlerContext::new(&mut core, &self.platform, &self.config);
            params::request_sys_param(&mut ctx, id)?;
        }

        let (core, _) = self
            .param_cv
            .wait_timeout_while(core, timeout, |c| c.get_param.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        match &core.get_param {
            ParamOutcome::Complete { value, .. } => Ok(*value),
            ParamOutcome::Rejected(minor) => Err(DriverError::Rejected {
                major: Major::GetSysParam,
                minor: *minor,
            }),
            ParamOutcome::Failed(message) => Err(DriverError::Protocol(message.clone())),
            ParamOutcome::Idle | ParamOutcome::Pending => Err(DriverError::Timeout),
        }
    }

    pub fn get_param_outcome(&self) -> ParamOutcome {
        self.lock_core().get_param.clone()
    }

    pub fn set_param_outcome(&self) -> ParamOutcome {
        self.lock_core().set_param.clone()
    }

    /// Send a textual register script. Returns the encoded size.
    pub fn write_register_script(&self, raw: &[u8]) -> Result<usize> {
        self.with_context(|ctx| partition::start(ctx, Major::RegScript, raw))
    }

    /// Write a textual register script into the chip's register partition.
    pub fn update_register_partition(&self, raw: &[u8]) -> Result<usize> {
        self.with_context(|ctx| partition::start(ctx, Major::UpdateRegs, raw))
    }

    /// Write each group of a register script straight to its register.
    /// Returns the number of groups written.
    pub fn apply_boot_init(&self, raw: &[u8]) -> Result<usize> {
        let groups = script::parse(raw)?;
        let core = self.lock_core();
        for group in &groups {
            core.bus.write_fifo(group.base, &group.value_bytes())?;
        }
        info!(groups = groups.len(), "Boot init applied");
        Ok(groups.len())
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn update_flash(&self, path: &Path) -> Result<()> {
        self.with_context(|ctx| flash::start(ctx, path))
    }

    pub fn flush(&self) -> Result<()> {
        control::flush(&self.lock_core().bus)
    }

    /// Abort every running command session.
    pub fn cleanup(&self) {
        self.with_context(control::cleanup);
        self.param_cv.notify_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::tests::RecordingObserver;
    use crate::platform::{ManualClock, MemoryFileSystem};
    use crate::protocol::{
        Minor, REGISTER_ACTIONS, REGISTER_FIFO_COMMAND, REGISTER_FIFO_CONFIG,
    };
    use crate::state::machine::tests::response;
    use crate::state::machine::data_words;
    use crate::track::tests::CollectingConsumer;
    use crate::transport::{MockBus, MockInterrupt};
    use crate::work::ManualScheduler;

    pub(crate) struct Fixture {
        pub device: Arc<Device<MockBus>>,
        pub bus: MockBus,
        pub files: MemoryFileSystem,
        pub clock: Arc<ManualClock>,
        pub scheduler: ManualScheduler,
        pub irq: MockInterrupt,
        pub observer: Arc<RecordingObserver>,
        pub consumer: Arc<CollectingConsumer>,
    }

    pub(crate) fn fixture_with(config: DriverConfig) -> Fixture {
        let bus = MockBus::new();
        let files = MemoryFileSystem::new();
        let clock = Arc::new(ManualClock::new(10_000));
        let scheduler = ManualScheduler::new();
        let irq = MockInterrupt::new();
        let observer = Arc::new(RecordingObserver::default());
        let consumer = Arc::new(CollectingConsumer::default());
        let platform = Platform::new(
            Arc::new(files.clone()),
            clock.clone(),
            Arc::new(scheduler.clone()),
            Arc::new(irq.clone()),
        )
        .with_observer(observer.clone())
        .with_consumer(consumer.clone());
        Fixture {
            device: Device::new(bus.clone(), config, platform),
            bus,
            files,
            clock,
            scheduler,
            irq,
            observer,
            consumer,
        }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(DriverConfig {
            calibration_path: None,
            ..Default::default()
        })
    }

    /// Fixture with event processing already started.
    pub(crate) fn started() -> Fixture {
        let f = fixture();
        f.bus.queue_fifo(REGISTER_FIFO_CONFIG, &[0, 0]);
        f.device.start_event_processing().unwrap();
        f.bus.clear_log();
        f
    }

    #[test]
    fn test_start_event_processing() {
        let f = fixture();
        f.bus.queue_fifo(REGISTER_FIFO_CONFIG, &[2, 0, 0x11, 0x22]);
        f.device.start_event_processing().unwrap();

        assert_eq!(f.device.driver_status(), DriverStatus::EventMonitoring);
        assert_eq!(f.device.product_config(), vec![0x11, 0x22]);
        assert_eq!(f.bus.register_writes(REGISTER_FRAME_RATE), vec![100]);
        assert_eq!(f.bus.register_writes(REGISTER_ENABLE), vec![ENABLE_SENSING]);
        assert!(f.irq.is_registered());
        assert!(f.irq.wake_enabled());
        assert!(f.scheduler.is_pending(Job::Calibration));
        assert_eq!(
            f.observer.count(|e| matches!(
                e,
                SensorEvent::StatusChanged {
                    to: DriverStatus::EventMonitoring,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_start_survives_missing_product_config() {
        let f = fixture();
        f.device.start_event_processing().unwrap();
        assert!(f.device.product_config().is_empty());
        assert_eq!(f.device.driver_status(), DriverStatus::EventMonitoring);
    }

    #[test]
    fn test_start_fails_when_enable_does_not_stick() {
        let f = fixture();
        f.bus.queue_fifo(REGISTER_FIFO_CONFIG, &[0, 0]);
        f.bus.queue_register(REGISTER_ENABLE, 0);
        f.bus.queue_register(REGISTER_ENABLE, 0);
        assert!(matches!(
            f.device.start_event_processing(),
            Err(DriverError::Protocol(_))
        ));
        assert_ne!(f.device.driver_status(), DriverStatus::EventMonitoring);
    }

    #[test]
    fn test_stop_event_processing() {
        let f = started();
        f.device.enable_no_touch_logging().unwrap();
        f.device.stop_event_processing();

        assert!(!f.irq.is_registered());
        assert_eq!(f.device.active_command(), ActiveCommand::NoCommand);
        assert_eq!(f.bus.register_writes(REGISTER_ENABLE), vec![0]);
        assert_eq!(f.bus.register_writes(REGISTER_ACTIONS), vec![0x0003]);
        assert!(!f.scheduler.is_pending(Job::Calibration));
        assert_eq!(f.device.driver_status(), DriverStatus::Idle);
    }

    #[test]
    fn test_get_sys_param_times_out_without_response() {
        let f = started();
        assert!(matches!(
            f.device.get_sys_param(5, Duration::from_millis(20)),
            Err(DriverError::Timeout)
        ));
        assert_eq!(
            f.device.active_command(),
            ActiveCommand::Issued(Major::GetSysParam)
        );
    }

    #[test]
    fn test_get_sys_param_blocks_until_dispatch() {
        let f = started();
        f.bus.queue_register(REGISTER_EVENT, EventRecord::COMMAND.bits());
        f.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::GetSysParam, Minor::Ok, 5, &data_words(&[0, 99])),
        );

        let device = f.device.clone();
        let waiter = std::thread::spawn(move || device.get_sys_param(5, Duration::from_secs(5)));
        while f.device.active_command() != ActiveCommand::Issued(Major::GetSysParam) {
            std::thread::yield_now();
        }
        f.device.run_job(Job::Event);

        assert_eq!(waiter.join().unwrap().unwrap(), 99);
        assert_eq!(f.device.active_command(), ActiveCommand::NoCommand);
    }

    #[test]
    fn test_get_sys_param_rejected() {
        let f = started();
        f.bus.queue_register(REGISTER_EVENT, EventRecord::COMMAND.bits());
        f.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::GetSysParam, Minor::NotSupported, 5, &[]),
        );

        let device = f.device.clone();
        let waiter = std::thread::spawn(move || device.get_sys_param(5, Duration::from_secs(5)));
        while f.device.active_command() != ActiveCommand::Issued(Major::GetSysParam) {
            std::thread::yield_now();
        }
        f.device.run_job(Job::Event);

        assert!(matches!(
            waiter.join().unwrap(),
            Err(DriverError::Rejected {
                minor: Minor::NotSupported,
                ..
            })
        ));
        assert_eq!(
            f.device.get_param_outcome(),
            ParamOutcome::Rejected(Minor::NotSupported)
        );
        assert_eq!(f.device.active_command(), ActiveCommand::NoCommand);
    }

    #[test]
    fn test_busy_command_is_refused() {
        let f = started();
        f.device.request_sys_param(5).unwrap();
        assert!(matches!(
            f.device.set_sys_param(6, 1),
            Err(DriverError::Busy {
                active: Major::GetSysParam
            })
        ));
        assert_eq!(f.bus.fifo_writes(REGISTER_FIFO_COMMAND).len(), 1);
    }

    #[test]
    fn test_apply_boot_init_writes_groups() {
        let f = fixture();
        let groups = f
            .device
            .apply_boot_init(b"# init\n0x20 2 0x0102 3\n0x21 1 -1\n0 0\n0x30 1 9\n")
            .unwrap();
        assert_eq!(groups, 2);
        assert_eq!(f.bus.fifo_writes(0x20), vec![vec![0x02, 0x01, 0x03, 0x00]]);
        assert_eq!(f.bus.fifo_writes(0x21), vec![vec![0xFF, 0xFF]]);
        assert!(f.bus.fifo_writes(0x30).is_empty());
        assert!(f.bus.fifo_writes(0).is_empty());
    }

    #[test]
    fn test_apply_boot_init_is_all_or_nothing() {
        let f = fixture();
        assert!(matches!(
            f.device.apply_boot_init(b"0x20 1 5\n0x21 2 1"),
            Err(DriverError::Script(_))
        ));
        assert!(f.bus.get_writes().is_empty());
    }

    #[test]
    fn test_operational_state_leaves_frame_rate_alone() {
        let f = started();
        for state in [
            OperationalState::Suspended,
            OperationalState::DeepSleep,
            OperationalState::Resetting,
            OperationalState::Active,
        ] {
            f.device.set_operational_state(state);
            assert_eq!(f.device.operational_state(), state);
        }
        assert!(f.bus.register_writes(REGISTER_FRAME_RATE).is_empty());

        f.device.set_frame_rate(60).unwrap();
        assert_eq!(f.bus.register_writes(REGISTER_FRAME_RATE), vec![60]);
        assert_eq!(f.device.frame_rate(), 60);
    }

    #[test]
    fn test_sleep_states_gate_dispatch() {
        let f = started();
        f.device.set_operational_state(OperationalState::DeepSleep);
        f.bus
            .queue_register(REGISTER_EVENT, EventRecord::TOUCH.bits());
        f.device.run_job(Job::Event);
        assert!(f.consumer.batches.lock().unwrap().is_empty());
        assert!(f.bus.get_writes().is_empty());

        f.device.set_operational_state(OperationalState::Active);
        f.bus.queue_fifo(
            crate::protocol::REGISTER_FIFO_TOUCH,
            &crate::track::tests::touch_block(3, &[]),
        );
        f.device.run_job(Job::Event);
        assert_eq!(f.consumer.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_track_logging_toggles() {
        let f = fixture();
        f.device
            .enable_track_report_logging(true, TrackLogKind::Text)
            .unwrap();
        let path = f.device.config().track_text_log_path.clone();
        assert_eq!(
            f.files.contents(&path).unwrap(),
            crate::track::TEXT_LOG_HEADER.as_bytes()
        );
        f.device
            .enable_track_report_logging(false, TrackLogKind::Text)
            .unwrap();
        assert!(!f.device.lock_core().track_log.is_enabled(TrackLogKind::Text));
    }

    #[test]
    fn test_cleanup_frees_slot() {
        let f = started();
        f.device.enable_d1test_logging(3).unwrap();
        f.device.cleanup();
        assert_eq!(f.device.active_command(), ActiveCommand::NoCommand);
        assert_eq!(f.bus.register_writes(REGISTER_ACTIONS), vec![0x0003]);
    }
}
