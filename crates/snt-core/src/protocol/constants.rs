//! Register map and protocol sizes for the SNT8100 sensor ASIC.
//!
//! All multi-byte fields on the wire are little-endian.

// ============================================================================
// Registers
// ============================================================================

/// Active frame rate (frames per second; 0xFF selects deep sleep).
pub const REGISTER_FRAME_RATE: u8 = 0x01;
/// Global enable register. Bit 0 turns sensing on.
pub const REGISTER_ENABLE: u8 = 0x02;
/// Event register, decoded as [`EventRecord`](super::EventRecord).
pub const REGISTER_EVENT: u8 = 0x03;
/// Write-only action register (FIFO flush bits).
pub const REGISTER_ACTIONS: u8 = 0x04;
/// Largest flash register partition the chip will accept, in bytes.
pub const REGISTER_FRP_MAX_SIZE: u8 = 0x0B;

/// Touch track report FIFO.
pub const REGISTER_FIFO_TOUCH: u8 = 0x84;
/// Command/response FIFO.
pub const REGISTER_FIFO_COMMAND: u8 = 0x85;
/// Frame stream FIFO (frame dump data).
pub const REGISTER_FIFO_STREAM: u8 = 0x86;
/// Product configuration string FIFO.
pub const REGISTER_FIFO_CONFIG: u8 = 0x87;

/// Bit in [`REGISTER_ENABLE`] that enables sensing.
pub const ENABLE_SENSING: u16 = 0x0001;

// ============================================================================
// Command Channel
// ============================================================================

/// Sonacomm magic ('Sona').
pub const COMMAND_MAGIC: u32 = 0x536F_6E61;

/// Maximum data bytes carried by one command packet.
pub const MAX_COMMAND_PAYLOAD: usize = 1024;

/// Sys-param id whose response is the chip's event log.
pub const SYS_PARAM_EVENT_LOG: u16 = 0x00FE;

// ============================================================================
// Track Reports
// ============================================================================

/// Width of the length field that prefixes a touch FIFO block.
pub const TOUCH_LENGTH_WIDTH: usize = 2;
/// Width of the frame number field; counted in the block length.
pub const TOUCH_FRAME_WIDTH: usize = 2;
/// Size of one track report record.
pub const TRACK_REPORT_SIZE: usize = 8;
/// Hard ceiling on a touch FIFO block, frame field included.
pub const MAX_TRACK_REPORTS_LEN: usize = 4096;
/// Highest diagnostic record version carried in a track report slot.
pub const TRACK_DIAG_MAX_VERSION: u8 = 2;

/// Largest product configuration block.
pub const MAX_PRODUCT_CONFIG_LEN: usize = 256;

// ============================================================================
// Frame Streaming
// ============================================================================

/// Width of the length prefix in front of every streamed frame.
pub const FRAME_LENGTH_WIDTH: usize = 4;
/// Largest frame the chip may announce for a frame dump.
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

// ============================================================================
// Firmware Upload
// ============================================================================

/// Bytes read for each payload header (size word + boot config word).
pub const FIRMWARE_HEADER_CHUNK: usize = 8;
/// Maximum number of payloads in a single image.
pub const MAX_PAYLOAD_NUM: u32 = 1000;
/// Maximum bytes carried by a single payload.
pub const MAX_PAYLOAD_BYTES: usize = 65 * 1024;
/// Default duplex transfer buffer (I2C builds).
pub const DEFAULT_FWDL_BUFFER_SIZE: usize = 512;

/// Flash update packet size.
pub const FLASH_MTU: usize = 256;
/// Trailer bytes at the end of a flash image that are never sent.
pub const FLASH_IMAGE_TRAILER: usize = 16;

// ============================================================================
// Frame Rates
// ============================================================================

pub const DEFAULT_FRAME_RATE: u16 = 100;

// ============================================================================
// Boot Configuration Record
// ============================================================================

pub const BCR_I2C_ADDR_POS: u32 = 24;
pub const BCR_I2C_ADDR_MASK: u32 = 0xFF;
pub const BCR_LOG_LEVEL_POS: u32 = 8;
pub const BCR_LOG_LEVEL_MASK: u32 = 0x07;
pub const BCR_EDGE_DURATION_POS: u32 = 2;
pub const BCR_EDGE_DURATION_MASK: u32 = 0x3F;
pub const BCR_IRQ_LEVEL_POS: u32 = 1;
pub const BCR_IRQ_POLARITY_POS: u32 = 0;

/// Boot ROM logging disabled.
pub const BCR_LOG_LEVEL_OFF: u8 = 0;
