//! Register script and register partition writes.

use tracing::{debug, info};

use super::{HandleResult, HandlerContext, check_minor};
use crate::error::{DriverError, Result};
use crate::payload::script;
use crate::protocol::{MAX_COMMAND_PAYLOAD, Major, Minor, REGISTER_FRP_MAX_SIZE};
use crate::transport::SerialBus;

/// Encoded partition on its way to the chip.
pub(crate) struct PartitionWrite {
    data: Vec<u8>,
    offset: usize,
}

/// Parse `raw`, encode it and send the first packet under `major`.
/// Returns the encoded partition size.
pub(crate) fn start<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
    major: Major,
    raw: &[u8],
) -> Result<usize> {
    ctx.require_idle()?;
    let groups = script::parse(raw)?;
    let data = script::encode(&groups)?;

    let limit = match ctx.core.bus.read_register(REGISTER_FRP_MAX_SIZE)? {
        0 => MAX_COMMAND_PAYLOAD,
        n => n as usize,
    };
    if data.len() > limit {
        return Err(DriverError::TooLarge {
            size: data.len(),
            limit,
        });
    }

    let size = data.len();
    info!(major = %major, groups = groups.len(), size, "Writing register partition");
    ctx.core.partition = Some(PartitionWrite { data, offset: 0 });
    if let Err(e) = send_next(ctx, major) {
        ctx.core.partition = None;
        return Err(e);
    }
    Ok(size)
}

fn send_next<B: SerialBus>(ctx: &mut HandlerContext<'_, B>, major: Major) -> Result<()> {
    let (chunk, offset, end) = {
        let part = ctx
            .core
            .partition
            .as_ref()
            .ok_or_else(|| DriverError::Protocol("no partition write in progress".into()))?;
        let end = (part.offset + MAX_COMMAND_PAYLOAD).min(part.data.len());
        (part.data[part.offset..end].to_vec(), part.offset, end)
    };
    let last = end == ctx.core.partition.as_ref().map_or(0, |p| p.data.len());
    let minor = if last {
        Minor::DataLast
    } else {
        Minor::DataFragment
    };

    ctx.send(major, minor, offset as u16, &chunk)?;
    if let Some(part) = ctx.core.partition.as_mut() {
        part.offset = end;
    }
    debug!(offset, len = chunk.len(), last, "Partition packet sent");
    Ok(())
}

pub(crate) fn handle_response<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
) -> Result<HandleResult> {
    let major = ctx
        .core
        .channel
        .active()
        .major()
        .ok_or_else(|| DriverError::Protocol("partition response with no command".into()))?;
    let rsp = ctx.read_response()?;
    let minor = check_minor(major, &rsp)?;

    let remaining = ctx
        .core
        .partition
        .as_ref()
        .map_or(0, |p| p.data.len() - p.offset);
    if remaining > 0 {
        send_next(ctx, major)?;
        return Ok(HandleResult::Continue);
    }

    ctx.core.partition = None;
    ctx.complete(Some(minor));
    info!(major = %major, "Register partition written");
    Ok(HandleResult::Complete)
}
