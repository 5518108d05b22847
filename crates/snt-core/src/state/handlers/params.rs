//! System parameter get/set.

use std::io::Write;

use tracing::{debug, info, warn};

use super::diagnostics::close;
use super::{HandleResult, HandlerContext};
use crate::error::{DriverError, Result};
use crate::protocol::{CommandResponse, Major, Minor, SYS_PARAM_EVENT_LOG};
use crate::state::machine::data_words;
use crate::transport::SerialBus;

/// Last known result of a sys-param command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamOutcome {
    #[default]
    Idle,
    /// Issued, no response yet.
    Pending,
    Complete {
        status: u32,
        value: u32,
        data: Vec<u8>,
    },
    /// The chip answered with a non-`Ok` minor.
    Rejected(Minor),
    /// The response could not be read.
    Failed(String),
}

impl ParamOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ParamOutcome::Pending)
    }
}

pub(crate) fn set_sys_param<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
    id: u16,
    value: u32,
) -> Result<()> {
    ctx.issue(Major::SetSysParam, Minor::Ok, id, &data_words(&[value]))?;
    ctx.core.set_param = ParamOutcome::Pending;
    debug!(id, value, "Set sys param issued");
    Ok(())
}

pub(crate) fn request_sys_param<B: SerialBus>(ctx: &mut HandlerContext<'_, B>, id: u16) -> Result<()> {
    ctx.issue(Major::GetSysParam, Minor::Ok, id, &[])?;
    ctx.core.get_param = ParamOutcome::Pending;
    debug!(id, "Get sys param issued");
    Ok(())
}

/// Read the event log out through the sys-param channel.
pub(crate) fn enable_event_log<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<()> {
    ctx.require_idle()?;
    let sink = ctx.create_log(&ctx.config.event_log_path)?;
    request_sys_param(ctx, SYS_PARAM_EVENT_LOG)?;
    ctx.core.diag.event_log = Some(sink);
    info!("Event log requested");
    Ok(())
}

fn outcome(rsp: &CommandResponse) -> ParamOutcome {
    match rsp.minor() {
        Some(Minor::Ok) => ParamOutcome::Complete {
            status: rsp.word(0).unwrap_or(0),
            value: rsp.word(1).unwrap_or(0),
            data: rsp.data.clone(),
        },
        Some(minor) => ParamOutcome::Rejected(minor),
        None => ParamOutcome::Failed(format!("unknown minor 0x{:02X}", rsp.header.minor)),
    }
}

/// Read the response or record why it could not be read. The slot is
/// freed either way.
fn read_or_fail<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
    major: Major,
) -> Result<CommandResponse> {
    match ctx.read_response() {
        Ok(rsp) => Ok(rsp),
        Err(e) => {
            let failed = ParamOutcome::Failed(e.to_string());
            if major == Major::SetSysParam {
                ctx.core.set_param = failed;
            } else {
                ctx.core.get_param = failed;
            }
            ctx.complete(None);
            Err(e)
        }
    }
}

pub(crate) fn handle_set<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<HandleResult> {
    let rsp = read_or_fail(ctx, Major::SetSysParam)?;
    let result = outcome(&rsp);
    if let ParamOutcome::Rejected(minor) = result {
        warn!(id = rsp.header.address, minor = %minor, "Set sys param rejected");
    }
    ctx.core.set_param = result;
    ctx.complete(rsp.minor());
    Ok(HandleResult::Complete)
}

pub(crate) fn handle_get<B: SerialBus>(ctx: &mut HandlerContext<'_, B>) -> Result<HandleResult> {
    let id = ctx.core.channel.last_header().map(|h| h.address);
    let rsp = read_or_fail(ctx, Major::GetSysParam)?;
    let result = outcome(&rsp);

    let mut write_err = None;
    if id == Some(SYS_PARAM_EVENT_LOG) {
        if let Some(mut sink) = ctx.core.diag.event_log.take() {
            if matches!(result, ParamOutcome::Complete { .. }) {
                if let Err(e) = sink.write_all(&rsp.data) {
                    write_err = Some(DriverError::BadWrite(e.to_string()));
                }
            }
            close(Some(sink));
            info!(len = rsp.data.len(), "Event log saved");
        }
    }
    if let ParamOutcome::Rejected(minor) = result {
        warn!(id = ?id, minor = %minor, "Get sys param rejected");
    }

    ctx.core.get_param = result;
    ctx.complete(rsp.minor());
    match write_err {
        Some(e) => Err(e),
        None => Ok(HandleResult::Complete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REGISTER_FIFO_COMMAND;
    use crate::state::handlers::tests::Harness;
    use crate::state::machine::tests::response;

    #[test]
    fn test_get_sys_param_ok_surfaces_value() {
        let mut h = Harness::new();
        request_sys_param(&mut h.ctx(), 5).unwrap();
        assert!(h.core.get_param.is_pending());

        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::GetSysParam, Minor::Ok, 5, &data_words(&[0, 42])),
        );
        assert_eq!(handle_get(&mut h.ctx()).unwrap(), HandleResult::Complete);
        assert!(h.core.channel.is_idle());
        assert_eq!(
            h.core.get_param,
            ParamOutcome::Complete {
                status: 0,
                value: 42,
                data: data_words(&[0, 42]),
            }
        );
    }

    #[test]
    fn test_get_sys_param_not_supported_frees_slot() {
        let mut h = Harness::new();
        request_sys_param(&mut h.ctx(), 5).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::GetSysParam, Minor::NotSupported, 5, &[]),
        );
        handle_get(&mut h.ctx()).unwrap();
        assert!(h.core.channel.is_idle());
        assert_eq!(h.core.get_param, ParamOutcome::Rejected(Minor::NotSupported));
    }

    #[test]
    fn test_set_sys_param_status() {
        let mut h = Harness::new();
        set_sys_param(&mut h.ctx(), 9, 0x1234).unwrap();
        let sent = h.bus.fifo_writes(REGISTER_FIFO_COMMAND);
        assert_eq!(&sent[0][14..], &[0x34, 0x12, 0, 0]);

        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::SetSysParam, Minor::Ok, 9, &data_words(&[1])),
        );
        handle_set(&mut h.ctx()).unwrap();
        assert!(matches!(
            h.core.set_param,
            ParamOutcome::Complete { status: 1, .. }
        ));
        assert!(h.core.channel.is_idle());
    }

    #[test]
    fn test_unreadable_response_marks_failed() {
        let mut h = Harness::new();
        request_sys_param(&mut h.ctx(), 5).unwrap();
        assert!(handle_get(&mut h.ctx()).is_err());
        assert!(matches!(h.core.get_param, ParamOutcome::Failed(_)));
        assert!(h.core.channel.is_idle());
    }

    #[test]
    fn test_event_log_written_to_sink() {
        let mut h = Harness::new();
        enable_event_log(&mut h.ctx()).unwrap();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(
                Major::GetSysParam,
                Minor::Ok,
                SYS_PARAM_EVENT_LOG,
                &[9, 8, 7, 6],
            ),
        );
        handle_get(&mut h.ctx()).unwrap();
        assert_eq!(
            h.files.contents(&h.config.event_log_path).unwrap(),
            vec![9, 8, 7, 6]
        );
        assert!(h.core.diag.event_log.is_none());
    }
}
