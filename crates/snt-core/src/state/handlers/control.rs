//! Control helpers: FIFO flush, session cleanup and product config.

use tracing::{debug, warn};

use super::{HandleResult, HandlerContext, ParamOutcome};
use crate::error::{DriverError, Result};
use crate::events::LogLevel;
use crate::protocol::{ActionFlags, MAX_PRODUCT_CONFIG_LEN, REGISTER_ACTIONS, REGISTER_FIFO_CONFIG};
use crate::transport::SerialBus;

/// Ask the chip to drop whatever sits in its command and stream FIFOs.
pub(crate) fn flush<B: SerialBus + ?Sized>(bus: &B) -> Result<()> {
    let flags = ActionFlags::FLUSH_COMMAND | ActionFlags::FLUSH_STREAM;
    bus.write_register(REGISTER_ACTIONS, flags.bits())?;
    debug!("FIFOs flushed");
    Ok(())
}

/// Flush, close every diagnostic sink, drop multi-packet sessions and
/// free the slot.
pub(crate) fn cleanup<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) {
    if let Err(e) = flush(&ctx.core.bus) {
        warn!(error = %e, "Flush during cleanup failed");
    }
    ctx.core.diag.close_all();
    ctx.core.partition = None;
    ctx.core.flash = None;

    for outcome in [&mut ctx.core.get_param, &mut ctx.core.set_param] {
        if *outcome == ParamOutcome::Pending {
            *outcome = ParamOutcome::Failed("command aborted".into());
        }
    }

    if !ctx.core.channel.is_idle() {
        ctx.complete(None);
    }
}

/// A response arrived with nothing outstanding; read it and drop it.
pub(crate) fn handle_spurious<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
) -> Result<HandleResult> {
    let rsp = ctx.read_response()?;
    ctx.log(
        LogLevel::Warn,
        format!(
            "Discarding response 0x{:02X}/0x{:02X} ({} bytes) with no active command",
            rsp.header.major,
            rsp.header.minor,
            rsp.data.len()
        ),
    );
    Ok(HandleResult::Complete)
}

/// Read the length-prefixed product config block.
pub(crate) fn read_product_config<B: SerialBus + ?Sized>(bus: &B) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    bus.read_fifo(REGISTER_FIFO_CONFIG, &mut prefix)?;
    let length = u16::from_le_bytes(prefix) as usize;
    if length > MAX_PRODUCT_CONFIG_LEN {
        return Err(DriverError::Protocol(format!(
            "product config length {} exceeds {}",
            length, MAX_PRODUCT_CONFIG_LEN
        )));
    }
    let mut body = vec![0u8; length];
    if length > 0 {
        bus.read_fifo(REGISTER_FIFO_CONFIG, &mut body)?;
    }
    debug!(len = length, "Product config read");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBus;

    #[test]
    fn test_flush_sets_both_bits() {
        let bus = MockBus::new();
        flush(&bus).unwrap();
        assert_eq!(bus.register_writes(REGISTER_ACTIONS), vec![0x0003]);
    }

    #[test]
    fn test_product_config_block() {
        let bus = MockBus::new();
        bus.queue_fifo(REGISTER_FIFO_CONFIG, &[3, 0, 0xAA, 0xBB, 0xCC]);
        assert_eq!(read_product_config(&bus).unwrap(), vec![0xAA, 0xBB, 0xCC]);

        bus.queue_fifo(REGISTER_FIFO_CONFIG, &[0, 0]);
        assert!(read_product_config(&bus).unwrap().is_empty());
        assert_eq!(bus.fifo_reads(REGISTER_FIFO_CONFIG), vec![2, 3, 2]);
    }

    #[test]
    fn test_product_config_too_long() {
        let bus = MockBus::new();
        bus.queue_fifo(REGISTER_FIFO_CONFIG, &(300u16).to_le_bytes());
        assert!(matches!(
            read_product_config(&bus),
            Err(DriverError::Protocol(_))
        ));
        assert_eq!(bus.fifo_reads(REGISTER_FIFO_CONFIG), vec![2]);
    }
}
