//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::{BusWrite, MockBus, MockInterrupt};
pub use traits::{BusError, DuplexStatus, InterruptLine, IrqHandler, SerialBus};
