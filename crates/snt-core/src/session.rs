//! Driver configuration and the worker-backed session that runs a device.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::device::Device;
use crate::events::DriverStatus;
use crate::platform::Platform;
use crate::protocol::{
    BootConfig, DEFAULT_FRAME_RATE, DEFAULT_FWDL_BUFFER_SIZE,
};
use crate::transport::SerialBus;
use crate::work::WorkQueue;

/// Configuration for a driver instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Boot firmware image.
    pub firmware_path: PathBuf,
    /// Tried once all attempts on `firmware_path` failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_firmware_path: Option<PathBuf>,
    /// Register script applied after event processing starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_path: Option<PathBuf>,

    pub track_text_log_path: PathBuf,
    pub track_binary_log_path: PathBuf,
    pub event_log_path: PathBuf,
    pub d1test_log_path: PathBuf,
    pub frame_log_path: PathBuf,
    pub no_touch_log_path: PathBuf,

    /// Image open attempts before falling back to the backup image.
    pub open_attempts: u32,
    pub open_retry_delay_ms: u64,
    /// Delay before the first boot upload step.
    pub upload_start_delay_ms: u64,
    /// How long to wait for the chip between payloads.
    pub irq_timeout_ms: u64,
    /// Payload pacing when the upload is not interrupt driven.
    pub upload_delay_ms: u64,
    /// Extra delay after each interrupt while the boot ROM is logging.
    pub log_delay_ms: u64,
    /// Pace boot uploads on the chip's ready interrupt.
    pub upload_with_irq: bool,
    /// Duplex transfer buffer size.
    pub fwdl_buffer_size: usize,
    pub boot: BootConfig,

    pub calibration_retries: u32,
    pub calibration_retry_delay_ms: u64,

    pub frame_rate: u16,
    /// Upper bound on event register reads per dispatch.
    pub max_drain_cycles: u32,
    /// Default timeout of the blocking sys-param query.
    pub param_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            firmware_path: PathBuf::from("/vendor/asusfw/grip_fw/snt8100fsr.image"),
            backup_firmware_path: Some(PathBuf::from("/vendor/etc/grip_fw/snt8100fsr.image")),
            calibration_path: Some(PathBuf::from("/vendor/factory/snt_reg_init")),
            track_text_log_path: PathBuf::from("/sdcard/track_report.log"),
            track_binary_log_path: PathBuf::from("/sdcard/track_report.bin"),
            event_log_path: PathBuf::from("/sdcard/event_log.bin"),
            d1test_log_path: PathBuf::from("/sdcard/d1test_data.log"),
            frame_log_path: PathBuf::from("/sdcard/frame_data.log"),
            no_touch_log_path: PathBuf::from("/sdcard/no_touch_frame_data.log"),
            open_attempts: 20,
            open_retry_delay_ms: 500,
            upload_start_delay_ms: 0,
            irq_timeout_ms: 5000,
            upload_delay_ms: 100,
            log_delay_ms: 2,
            upload_with_irq: true,
            fwdl_buffer_size: DEFAULT_FWDL_BUFFER_SIZE,
            boot: BootConfig::default(),
            calibration_retries: 10,
            calibration_retry_delay_ms: 1000,
            frame_rate: DEFAULT_FRAME_RATE,
            max_drain_cycles: 64,
            param_timeout_ms: 1000,
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: DriverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub(crate) fn delay(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }
}

/// A device plus the worker thread that runs its deferred jobs.
pub struct DriverSession<B: SerialBus + 'static> {
    device: Arc<Device<B>>,
    queue: WorkQueue,
    worker: Option<JoinHandle<()>>,
}

impl<B: SerialBus + 'static> DriverSession<B> {
    /// Start the worker and probe the device.
    ///
    /// `platform.scheduler` is replaced by the session's own work queue.
    #[instrument(skip_all)]
    pub fn start(bus: B, config: DriverConfig, mut platform: Platform) -> Result<Self> {
        let (queue, receiver) = WorkQueue::new();
        platform.scheduler = Arc::new(queue.clone());

        let device = Device::new(bus, config, platform);
        let weak: Weak<Device<B>> = Arc::downgrade(&device);
        let worker = receiver
            .spawn("snt-worker", move |job| {
                if let Some(device) = weak.upgrade() {
                    device.run_job(job);
                }
            })
            .context("spawning device worker")?;

        info!("Driver session started");
        Ok(Self {
            device,
            queue,
            worker: Some(worker),
        })
    }

    pub fn device(&self) -> &Arc<Device<B>> {
        &self.device
    }

    /// Stop event processing and join the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if self.device.driver_status() == DriverStatus::EventMonitoring {
                self.device.stop_event_processing();
            }
            self.queue.shutdown();
            if worker.join().is_err() {
                warn!("Device worker panicked");
            }
            info!("Driver session stopped");
        }
    }
}

impl<B: SerialBus + 'static> Drop for DriverSession<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
