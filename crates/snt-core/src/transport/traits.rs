//! Bus and interrupt line abstractions.
//!
//! The sensor is reached over SPI or I2C; the raw transfer and the
//! interrupt wiring live outside this crate and are reached through
//! `SerialBus` and `InterruptLine`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Register read failed at 0x{addr:02X}: {message}")]
    ReadFailed { addr: u8, message: String },

    #[error("Register write failed at 0x{addr:02X}: {message}")]
    WriteFailed { addr: u8, message: String },

    #[error("Short FIFO read at 0x{addr:02X}: wanted {wanted}, got {got}")]
    ShortRead { addr: u8, wanted: usize, got: usize },

    #[error("Duplex transfer failed: {0}")]
    TransferFailed(String),

    #[error("Device not responding")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a full-duplex firmware transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexStatus {
    /// Chunk accepted.
    Done,
    /// The boot ROM reports that firmware is already running.
    AlreadyLoaded,
}

/// Abstract register/FIFO bus.
///
/// All access happens under the device lock; implementations only need
/// to be movable between threads.
pub trait SerialBus: Send {
    /// Read a 16-bit register.
    fn read_register(&self, addr: u8) -> Result<u16, BusError>;

    /// Write a 16-bit register.
    fn write_register(&self, addr: u8, value: u16) -> Result<(), BusError>;

    /// Fill `buf` from a FIFO register.
    fn read_fifo(&self, addr: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Stream `data` into a FIFO register.
    fn write_fifo(&self, addr: u8, data: &[u8]) -> Result<(), BusError>;

    /// Full-duplex raw transfer used by the boot loader.
    ///
    /// `input` must be at least as long as `output`.
    fn read_and_write(&self, output: &[u8], input: &mut [u8]) -> Result<DuplexStatus, BusError>;
}

/// Interrupt top half. Must not block.
pub type IrqHandler = Box<dyn Fn() + Send + Sync>;

/// Host interrupt line wired to the chip's IRQ pin.
pub trait InterruptLine: Send + Sync {
    /// Install `handler`, replacing any previous one.
    fn register(&self, handler: IrqHandler) -> Result<(), BusError>;

    fn unregister(&self);

    /// Allow the line to wake the host from suspend.
    fn enable_wake(&self) -> Result<(), BusError>;
}
