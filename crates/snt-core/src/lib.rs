//! SNT-Core: control core for the SNT8100 force-sensor controller.
//!
//! This crate drives an SNT8100 attached over a serial bus (SPI or I2C):
//! paced firmware upload at boot, interrupt-driven event dispatch, the
//! command/response channel with its diagnostic and update sessions, and
//! track-report capture.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Register map, command codes, wire headers
//! - **Transport**: Serial bus and interrupt line abstraction (mock included)
//! - **Platform**: File system, clock and other host services
//! - **Work**: Deferred jobs and the worker that runs them
//! - **Payload**: Firmware pacing, flash packets, register scripts
//! - **State**: Command channel and its response handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Device**: The driver instance tying the layers together
//! - **Session**: Configuration and a self-contained runtime
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snt_core::platform::{Platform, StdFileSystem, SystemClock};
//! use snt_core::session::{DriverConfig, DriverSession};
//! use snt_core::transport::{MockBus, MockInterrupt};
//! use snt_core::work::ManualScheduler;
//!
//! let platform = Platform::new(
//!     Arc::new(StdFileSystem),
//!     Arc::new(SystemClock::new()),
//!     Arc::new(ManualScheduler::new()),
//!     Arc::new(MockInterrupt::new()),
//! );
//! let session = DriverSession::start(MockBus::new(), DriverConfig::default(), platform)
//!     .expect("worker failed to start");
//! let firmware = session.device().config().firmware_path.clone();
//! session.device().upload_firmware(&firmware).expect("upload refused");
//! session.shutdown();
//! ```

pub mod calibration;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod payload;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod state;
pub mod track;
pub mod transport;
pub mod upload;
pub mod work;

// Re-exports for convenience
pub use device::{Device, OperationalState};
pub use error::{DriverError, Result};
pub use events::{DriverStatus, LogLevel, NullObserver, SensorEvent, SensorObserver, TracingObserver};
pub use payload::{RegisterGroup, ScriptError, UploadKind, UploadStatus};
pub use platform::Platform;
pub use protocol::{Major, Minor};
pub use session::{DriverConfig, DriverSession};
pub use state::{ActiveCommand, ParamOutcome};
pub use track::{ReportConsumer, TrackLogKind, TrackReport};
pub use transport::{BusError, InterruptLine, MockBus, MockInterrupt, SerialBus};
