//! Firmware/flash update over the command channel.

use std::path::Path;

use tracing::{debug, info};

use super::{HandleResult, HandlerContext, check_minor};
use crate::error::{DriverError, Result};
use crate::payload::FlashUpdate;
use crate::transport::SerialBus;

pub(crate) fn start<B: SerialBus>(ctx: &mut HandlerContext<'_, B>, path: &Path) -> Result<()> {
    ctx.require_idle()?;
    let file = ctx
        .platform
        .files
        .open(path)
        .map_err(|_| DriverError::BadOpen {
            path: path.display().to_string(),
        })?;
    let mut update = FlashUpdate::new(file, FlashUpdate::major_for(path))?;
    info!(
        path = %path.display(),
        major = %update.major(),
        packets = update.packets_left(),
        "Starting flash update"
    );

    let packet = update
        .next_packet()?
        .ok_or_else(|| DriverError::Protocol("flash image produced no packets".into()))?;
    ctx.issue(update.major(), packet.minor, packet.address, &packet.payload)?;
    ctx.core.flash = Some(update);
    Ok(())
}

pub(crate) fn handle_response<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
) -> Result<HandleResult> {
    let rsp = ctx.read_response()?;
    let (major, packet) = {
        let update = ctx
            .core
            .flash
            .as_mut()
            .ok_or_else(|| DriverError::Protocol("flash response with no update running".into()))?;
        let major = update.major();
        if rsp.header.major() != Some(major) {
            return Err(DriverError::Protocol(format!(
                "flash response major 0x{:02X}, expected {}",
                rsp.header.major, major
            )));
        }
        check_minor(major, &rsp)?;
        (major, update.next_packet()?)
    };

    match packet {
        Some(packet) => {
            ctx.continue_with(packet.minor, packet.address, &packet.payload)?;
            debug!(address = packet.address, len = packet.payload.len(), "Flash packet sent");
            Ok(HandleResult::Continue)
        }
        None => {
            let sent = ctx.core.flash.take().map_or(0, |u| u.bytes_sent());
            ctx.complete(rsp.minor());
            info!(major = %major, bytes = sent, "Flash update finished");
            Ok(HandleResult::Complete)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandHeader, Major, Minor, REGISTER_FIFO_COMMAND};
    use crate::state::handlers::tests::Harness;
    use crate::state::machine::tests::response;

    fn ack(h: &Harness, major: Major) {
        h.bus
            .queue_fifo(REGISTER_FIFO_COMMAND, &response(major, Minor::Ok, 0, &[]));
    }

    #[test]
    fn test_flash_update_walks_image() {
        let mut h = Harness::new();
        // 300 data bytes plus trailer: two data packets and a closing one
        h.files.insert("/data/fw.flash", vec![0x5Au8; 316]);
        start(&mut h.ctx(), Path::new("/data/fw.flash")).unwrap();

        ack(&h, Major::FlashUpdate);
        assert_eq!(handle_response(&mut h.ctx()).unwrap(), HandleResult::Continue);
        ack(&h, Major::FlashUpdate);
        assert_eq!(handle_response(&mut h.ctx()).unwrap(), HandleResult::Continue);
        ack(&h, Major::FlashUpdate);
        assert_eq!(handle_response(&mut h.ctx()).unwrap(), HandleResult::Complete);
        assert!(h.core.channel.is_idle());
        assert!(h.core.flash.is_none());

        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        let headers: Vec<_> = sent
            .iter()
            .map(|p| CommandHeader::from_bytes(p).unwrap())
            .collect();
        assert_eq!(
            headers.iter().map(|h| h.length).collect::<Vec<_>>(),
            vec![260, 48, 0]
        );
        assert_eq!(headers[1].address, 256);
        assert_eq!(headers[2].minor(), Some(Minor::DataLast));
    }

    #[test]
    fn test_firmware_major_for_other_extensions() {
        let mut h = Harness::new();
        h.files.insert("/data/fw.bin", vec![1u8; 20]);
        start(&mut h.ctx(), Path::new("/data/fw.bin")).unwrap();
        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        let header = CommandHeader::from_bytes(&sent[0]).unwrap();
        assert_eq!(header.major(), Some(Major::FwUpdate));
    }

    #[test]
    fn test_mismatched_major_aborts() {
        let mut h = Harness::new();
        h.files.insert("/data/fw.bin", vec![1u8; 300]);
        start(&mut h.ctx(), Path::new("/data/fw.bin")).unwrap();
        ack(&h, Major::FlashUpdate);
        assert!(matches!(
            handle_response(&mut h.ctx()),
            Err(DriverError::Protocol(_))
        ));
        assert_eq!(h.bus.fifo_writes(REGISTER_FIFO_COMMAND).len(), 1);
    }

    #[test]
    fn test_missing_image() {
        let mut h = Harness::new();
        assert!(matches!(
            start(&mut h.ctx(), Path::new("/data/none.flash")),
            Err(DriverError::BadOpen { .. })
        ));
        assert!(h.core.channel.is_idle());
    }
}
