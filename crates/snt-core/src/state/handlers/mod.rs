//! Command response handlers, one submodule per command family.
//!
//! - `control`: flush, cleanup, spurious responses, product config
//! - `diagnostics`: d1test, frame dump and no-touch logging
//! - `flash`: firmware/flash update packets
//! - `params`: get/set sys-param
//! - `partition`: register script and register partition writes

pub(crate) mod control;
pub(crate) mod diagnostics;
pub(crate) mod flash;
pub(crate) mod params;
pub(crate) mod partition;

use std::path::Path;

use tracing::debug;

use crate::device::DeviceCore;
use crate::error::{DriverError, Result};
use crate::events::{LogLevel, SensorEvent};
use crate::platform::{LogSink, Platform};
use crate::protocol::{CommandResponse, Major, Minor};
use crate::session::DriverConfig;
use crate::state::machine::ActiveCommand;
use crate::transport::SerialBus;

pub use params::ParamOutcome;

/// Result of handling a command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// More responses are expected; the slot stays occupied.
    Continue,
    /// The command finished and the slot is free.
    Complete,
}

/// Handler context: the locked device state plus its platform services.
pub(crate) struct HandlerContext<'a, B: SerialBus> {
    pub core: &'a mut DeviceCore<B>,
    pub platform: &'a Platform,
    pub config: &'a DriverConfig,
}

impl<'a, B: SerialBus> HandlerContext<'a, B> {
    pub(crate) fn new(
        core: &'a mut DeviceCore<B>,
        platform: &'a Platform,
        config: &'a DriverConfig,
    ) -> Self {
        Self {
            core,
            platform,
            config,
        }
    }

    pub(crate) fn emit(&self, event: SensorEvent) {
        self.platform.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(SensorEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.platform.clock.now_ms()
    }

    /// Send the first packet of a command.
    pub(crate) fn issue(
        &mut self,
        major: Major,
        minor: Minor,
        address: u16,
        payload: &[u8],
    ) -> Result<()> {
        let trans_id = self.now_ms() as u32;
        let core = &mut *self.core;
        core.channel
            .issue(&core.bus, trans_id, major, minor, address, payload)?;
        self.emit(SensorEvent::CommandIssued {
            major,
            minor,
            address,
            length: payload.len(),
        });
        Ok(())
    }

    /// Send the next packet of the active command.
    pub(crate) fn continue_with(&mut self, minor: Minor, address: u16, payload: &[u8]) -> Result<()> {
        let trans_id = self.now_ms() as u32;
        let core = &mut *self.core;
        let header = core
            .channel
            .continue_with(&core.bus, trans_id, minor, address, payload)?;
        if let Some(major) = header.major() {
            self.emit(SensorEvent::CommandIssued {
                major,
                minor,
                address,
                length: payload.len(),
            });
        }
        Ok(())
    }

    /// Issue on a free slot, or continue if `major` already holds it.
    pub(crate) fn send(&mut self, major: Major, minor: Minor, address: u16, payload: &[u8]) -> Result<()> {
        match self.core.channel.active() {
            ActiveCommand::Issued(active) if active == major => {
                self.continue_with(minor, address, payload)
            }
            _ => self.issue(major, minor, address, payload),
        }
    }

    pub(crate) fn read_response(&mut self) -> Result<CommandResponse> {
        let core = &*self.core;
        core.channel.read_response(&core.bus)
    }

    /// Free the slot and report the command as done.
    pub(crate) fn complete(&mut self, minor: Option<Minor>) {
        if let Some(major) = self.core.channel.release() {
            self.emit(SensorEvent::CommandCompleted { major, minor });
        }
    }

    pub(crate) fn create_log(&self, path: &Path) -> Result<LogSink> {
        debug!(path = %path.display(), "Creating log file");
        self.platform
            .files
            .create(path)
            .map_err(|_| DriverError::BadOpen {
                path: path.display().to_string(),
            })
    }

    pub(crate) fn require_idle(&self) -> Result<()> {
        match self.core.channel.active() {
            ActiveCommand::NoCommand => Ok(()),
            ActiveCommand::Issued(active) => Err(DriverError::Busy { active }),
        }
    }
}

/// Known minor of `response`, or the error it reports.
pub(crate) fn check_minor(major: Major, response: &CommandResponse) -> Result<Minor> {
    let minor = response.minor().ok_or_else(|| {
        DriverError::Protocol(format!("unknown minor 0x{:02X}", response.header.minor))
    })?;
    if minor.is_error() {
        return Err(DriverError::Rejected { major, minor });
    }
    Ok(minor)
}

/// Route a command response by the major that holds the slot.
pub(crate) fn handle_response<B: SerialBus>(
    ctx: &mut HandlerContext<'_, B>,
) -> Result<HandleResult> {
    let major = match ctx.core.channel.active() {
        ActiveCommand::NoCommand => return control::handle_spurious(ctx),
        ActiveCommand::Issued(major) => major,
    };

    match major {
        Major::D1Test => diagnostics::handle_d1test(ctx),
        Major::FrameDump => diagnostics::handle_frame_command(ctx),
        Major::NoTouch => diagnostics::handle_no_touch(ctx),
        Major::SetSysParam => params::handle_set(ctx),
        Major::GetSysParam => params::handle_get(ctx),
        Major::FwUpdate | Major::FlashUpdate => flash::handle_response(ctx),
        Major::UpdateRegs | Major::RegScript => partition::handle_response(ctx),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::events::tests::RecordingObserver;
    use crate::platform::{ManualClock, MemoryFileSystem};
    use crate::protocol::REGISTER_FIFO_COMMAND;
    use crate::state::machine::tests::response;
    use crate::transport::{MockBus, MockInterrupt};
    use crate::work::ManualScheduler;

    /// Device state and mocks for driving handlers directly.
    pub(crate) struct Harness {
        pub core: DeviceCore<MockBus>,
        pub platform: Platform,
        pub config: DriverConfig,
        pub bus: MockBus,
        pub files: MemoryFileSystem,
        pub observer: Arc<RecordingObserver>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let bus = MockBus::new();
            let files = MemoryFileSystem::new();
            let observer = Arc::new(RecordingObserver::default());
            let config = DriverConfig::default();
            let platform = Platform::new(
                Arc::new(files.clone()),
                Arc::new(ManualClock::new(1_000)),
                Arc::new(ManualScheduler::new()),
                Arc::new(MockInterrupt::new()),
            )
            .with_observer(observer.clone());
            Self {
                core: DeviceCore::new(bus.clone(), &config),
                platform,
                config,
                bus,
                files,
                observer,
            }
        }

        pub(crate) fn ctx(&mut self) -> HandlerContext<'_, MockBus> {
            HandlerContext::new(&mut self.core, &self.platform, &self.config)
        }
    }

    #[test]
    fn test_issue_and_complete_emit_events() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        ctx.issue(Major::NoTouch, Minor::Ok, 0, &[]).unwrap();
        ctx.complete(Some(Minor::DataLast));
        ctx.complete(None);

        assert_eq!(
            h.observer
                .count(|e| matches!(e, SensorEvent::CommandIssued { major: Major::NoTouch, .. })),
            1
        );
        assert_eq!(
            h.observer
                .count(|e| matches!(e, SensorEvent::CommandCompleted { .. })),
            1
        );
    }

    #[test]
    fn test_transaction_id_from_clock() {
        let mut h = Harness::new();
        h.ctx().issue(Major::D1Test, Minor::Ok, 0, &[]).unwrap();
        assert_eq!(h.core.channel.last_header().unwrap().trans_id, 1_000);
    }

    #[test]
    fn test_spurious_response_is_drained() {
        let mut h = Harness::new();
        h.bus.queue_fifo(
            REGISTER_FIFO_COMMAND,
            &response(Major::GetSysParam, Minor::Ok, 5, &[1, 2, 3, 4]),
        );
        assert_eq!(handle_response(&mut h.ctx()).unwrap(), HandleResult::Complete);
        assert_eq!(h.bus.fifo_remaining(REGISTER_FIFO_COMMAND), 0);
        assert!(h.core.channel.is_idle());
        assert_eq!(
            h.observer.count(|e| matches!(
                e,
                SensorEvent::Log {
                    level: LogLevel::Warn,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_check_minor() {
        let rsp = |minor| CommandResponse {
            header: crate::protocol::CommandHeader::new(Major::D1Test, minor, 0, 0, 0),
            data: Vec::new(),
        };
        assert_eq!(check_minor(Major::D1Test, &rsp(Minor::DataFragment)).unwrap(), Minor::DataFragment);
        assert!(matches!(
            check_minor(Major::D1Test, &rsp(Minor::NotSupported)),
            Err(DriverError::Rejected { .. })
        ));

        let mut unknown = rsp(Minor::Ok);
        unknown.header.minor = 0x7F;
        assert!(matches!(
            check_minor(Major::D1Test, &unknown),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn test_cleanup_releases_everything() {
        let mut h = Harness::new();
        diagnostics::enable_no_touch(&mut h.ctx()).unwrap();
        h.core.get_param = ParamOutcome::Pending;
        control::cleanup(&mut h.ctx());

        assert!(h.core.channel.is_idle());
        assert!(h.core.diag.no_touch.is_none());
        assert!(matches!(h.core.get_param, ParamOutcome::Failed(_)));
        assert_eq!(
            h.bus.register_writes(crate::protocol::REGISTER_ACTIONS),
            vec![0x0003]
        );
    }
}
