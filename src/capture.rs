//! One triggered block: arm, wait for the device, transfer.
//!
//! The steps are typestates borrowing the session: [`ArmedBlock`] turns into a
//! [`ReadyBlock`] once the device reports the block complete, and a `ReadyBlock`
//! is consumed by the bulk transfer, which fails when the device hands back
//! fewer samples than the window holds. Failures leave the session with its caller,
//! which still has to close it.

use crate::channel::Channel;
use crate::driver::{BlockBuffers, DeviceDriver};
use crate::error::{AcquisitionError, Result};
use crate::session::{into_result, DeviceSession, SessionState};
use crate::status::{Command, PicoStatus};
use crate::timebase::{CaptureWindow, TimebaseDescriptor};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared flag asking a blocking wait to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PollSettings {
    /// Sleep between readiness polls. `None` polls back to back.
    pub interval: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// A channel that went over range fails the transfer.
    #[default]
    Reject,
    /// Keep the clipped samples and only flag the channel.
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChannel {
    pub channel: Channel,
    pub samples: Vec<i16>,
    pub overflowed: bool,
}

/// Counts as transferred from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub channels: Vec<RawChannel>,
    pub pre_trigger: u32,
    pub sample_interval_ns: f64,
    pub started_at: DateTime<Utc>,
}

impl RawBlock {
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: Channel) -> Option<&RawChannel> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

pub struct ArmedBlock<'s, 'd, D: DeviceDriver + ?Sized> {
    session: &'s mut DeviceSession<'d, D>,
    timebase: TimebaseDescriptor,
    window: CaptureWindow,
    started_at: DateTime<Utc>,
    polls: u64,
}

impl<'s, 'd, D: DeviceDriver + ?Sized> ArmedBlock<'s, 'd, D> {
    /// Start a block of `window` samples at `timebase`.
    pub fn arm(
        session: &'s mut DeviceSession<'d, D>,
        timebase: &TimebaseDescriptor,
        window: CaptureWindow,
    ) -> Result<Self> {
        session.expect_state(
            "arm a block",
            &[SessionState::Configured, SessionState::Transferred],
        )?;
        let started_at = Utc::now();
        session
            .call(Command::RunBlock, |d, h| {
                into_result(d.run_block(
                    h,
                    window.pre_trigger,
                    window.post_trigger,
                    timebase.timebase_code,
                ))
            })
            .map_err(|status| AcquisitionError::Transfer {
                command: Command::RunBlock,
                status: Some(status),
                message: format!("device refused to arm with timebase {}", timebase.timebase_code),
            })?;
        session.set_state(SessionState::Armed);
        log::debug!(
            "armed {}+{} samples at timebase {}",
            window.pre_trigger,
            window.post_trigger,
            timebase.timebase_code
        );

        Ok(Self {
            session,
            timebase: *timebase,
            window,
            started_at,
            polls: 0,
        })
    }

    /// Readiness polls issued so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the device once whether the block is complete.
    pub fn poll_ready(mut self) -> Result<std::result::Result<ReadyBlock<'s, 'd, D>, Self>> {
        self.polls += 1;
        match self.session.call_unrecorded(|d, h| d.is_ready(h)) {
            Ok(true) => {
                self.session.record(Command::IsReady, PicoStatus::Ok);
                self.session.set_state(SessionState::Ready);
                Ok(Ok(ReadyBlock {
                    session: self.session,
                    timebase: self.timebase,
                    window: self.window,
                    started_at: self.started_at,
                }))
            }
            Ok(false) => Ok(Err(self)),
            Err(status) => {
                self.session.record(Command::IsReady, status);
                Err(AcquisitionError::Transfer {
                    command: Command::IsReady,
                    status: Some(status),
                    message: format!("readiness poll {} failed", self.polls),
                })
            }
        }
    }

    /// Poll until the block is complete or `poll.cancel` fires.
    pub fn wait_ready(self, poll: &PollSettings) -> Result<ReadyBlock<'s, 'd, D>> {
        let mut armed = self;
        loop {
            if poll.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                log::info!("block cancelled after {} polls", armed.polls);
                return Err(AcquisitionError::Cancelled);
            }
            armed = match armed.poll_ready()? {
                Ok(ready) => return Ok(ready),
                Err(armed) => armed,
            };
            if let Some(interval) = poll.interval {
                std::thread::sleep(interval);
            }
        }
    }
}

pub struct ReadyBlock<'s, 'd, D: DeviceDriver + ?Sized> {
    session: &'s mut DeviceSession<'d, D>,
    timebase: TimebaseDescriptor,
    window: CaptureWindow,
    started_at: DateTime<Utc>,
}

impl<D: DeviceDriver + ?Sized> ReadyBlock<'_, '_, D> {
    /// Register one buffer pair per active channel and fetch the block in a
    /// single bulk call.
    pub fn transfer(self, overflow: OverflowPolicy) -> Result<RawBlock> {
        let channels = self.session.active_channels();
        let len = self.window.total() as usize;

        for &channel in &channels {
            self.session
                .call(Command::SetDataBuffers, |d, h| {
                    into_result(d.set_data_buffers(h, channel, len))
                })
                .map_err(|status| AcquisitionError::rejected(Command::SetDataBuffers, status))?;
        }

        let mut buffers = BlockBuffers::for_channels(channels, len);
        let reply = self
            .session
            .call(Command::GetValues, |d, h| d.get_values(h, &mut buffers))
            .map_err(|status| AcquisitionError::Transfer {
                command: Command::GetValues,
                status: Some(status),
                message: format!("bulk read of {len} samples failed"),
            })?;
        if reply.n_samples < len {
            return Err(AcquisitionError::Transfer {
                command: Command::GetValues,
                status: None,
                message: format!("device returned {} of {} samples", reply.n_samples, len),
            });
        }

        let channels: Vec<RawChannel> = buffers
            .into_inner()
            .into_iter()
            .map(|b| RawChannel {
                channel: b.channel,
                overflowed: reply.overflow & (1 << b.channel.code()) != 0,
                samples: b.max,
            })
            .collect();
        self.session.set_state(SessionState::Transferred);

        let clipped: Vec<String> = channels
            .iter()
            .filter(|c| c.overflowed)
            .map(|c| c.channel.to_string())
            .collect();
        if !clipped.is_empty() {
            if overflow == OverflowPolicy::Reject {
                return Err(AcquisitionError::Transfer {
                    command: Command::GetValues,
                    status: None,
                    message: format!("{} went over range", clipped.join(", ")),
                });
            }
            log::warn!("{} went over range", clipped.join(", "));
        }

        Ok(RawBlock {
            channels,
            pre_trigger: self.window.pre_trigger,
            sample_interval_ns: self.timebase.sample_interval_ns,
            started_at: self.started_at,
        })
    }
}

/// Arm, wait and transfer one block on a configured session.
pub fn capture<D: DeviceDriver + ?Sized>(
    session: &mut DeviceSession<'_, D>,
    timebase: &TimebaseDescriptor,
    window: CaptureWindow,
    poll: &PollSettings,
    overflow: OverflowPolicy,
) -> Result<RawBlock> {
    ArmedBlock::arm(session, timebase, window)?
        .wait_ready(poll)?
        .transfer(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSettings, Resolution, VoltageRange};
    use crate::simulated::SimulatedDriver;
    use crate::timebase::DeviceModel;

    fn timebase() -> TimebaseDescriptor {
        TimebaseDescriptor {
            timebase_code: 9,
            sample_interval_ns: 96.0,
            realized_max_samples: 100,
        }
    }

    fn configured(driver: &mut SimulatedDriver) -> DeviceSession<'_, SimulatedDriver> {
        let mut session = DeviceSession::open(driver, "SIM001", Resolution::Bits12).unwrap();
        session
            .configure_channels(&[
                (Channel::A, ChannelSettings::dc(VoltageRange::V10)),
                (Channel::B, ChannelSettings::dc(VoltageRange::V10)),
            ])
            .unwrap();
        session
    }

    #[test]
    fn test_capture_fills_every_channel() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a)
            .with_polls_until_ready(3)
            .with_signal(|channel, k| (channel.code() * 1000) as i16 + k as i16);
        let mut session = configured(&mut driver);
        let window = CaptureWindow::new(40, 60).unwrap();
        let block = capture(
            &mut session,
            &timebase(),
            window,
            &PollSettings::default(),
            OverflowPolicy::Reject,
        )
        .unwrap();

        assert_eq!(block.len(), 100);
        assert_eq!(block.pre_trigger, 40);
        assert_eq!(block.channel(Channel::B).unwrap().samples[5], 1005);
        assert_eq!(session.state(), SessionState::Transferred);
        assert_eq!(session.status_log().count(Command::GetValues), 1);
        assert_eq!(session.status_log().count(Command::SetDataBuffers), 2);
        session.close().unwrap();
    }

    #[test]
    fn test_poll_ready_hands_back_armed_block() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_polls_until_ready(2);
        let mut session = configured(&mut driver);
        let window = CaptureWindow::new(10, 10).unwrap();
        let mut armed = ArmedBlock::arm(&mut session, &timebase(), window).unwrap();
        let ready = loop {
            armed = match armed.poll_ready().unwrap() {
                Ok(ready) => break ready,
                Err(armed) => armed,
            };
        };
        assert_eq!(ready.transfer(OverflowPolicy::Reject).unwrap().len(), 20);
    }

    #[test]
    fn test_short_transfer_is_a_transfer_error() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_transfer_limit(15);
        let mut session = configured(&mut driver);
        let err = capture(
            &mut session,
            &timebase(),
            CaptureWindow::new(10, 10).unwrap(),
            &PollSettings::default(),
            OverflowPolicy::Flag,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Transfer {
                command: Command::GetValues,
                status: None,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_cancelled_wait() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_polls_until_ready(u32::MAX);
        let mut session = configured(&mut driver);
        let token = CancelToken::new();
        token.cancel();
        let poll = PollSettings {
            interval: None,
            cancel: Some(token),
        };
        let err = capture(
            &mut session,
            &timebase(),
            CaptureWindow::new(10, 10).unwrap(),
            &poll,
            OverflowPolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, AcquisitionError::Cancelled));
        assert_eq!(session.state(), SessionState::Armed);
    }

    #[test]
    fn test_overflow_policy() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_overflow(Channel::B);
        let mut session = configured(&mut driver);
        let window = CaptureWindow::new(10, 10).unwrap();
        let err = capture(
            &mut session,
            &timebase(),
            window,
            &PollSettings::default(),
            OverflowPolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Transfer {
                command: Command::GetValues,
                ..
            }
        ));

        let block = capture(
            &mut session,
            &timebase(),
            window,
            &PollSettings::default(),
            OverflowPolicy::Flag,
        )
        .unwrap();
        assert!(block.channel(Channel::B).unwrap().overflowed);
        assert!(!block.channel(Channel::A).unwrap().overflowed);
    }

    #[test]
    fn test_arm_before_configure_is_invalid() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        let err = ArmedBlock::arm(&mut session, &timebase(), CaptureWindow::new(1, 1).unwrap())
            .err();
        assert!(matches!(err, Some(AcquisitionError::InvalidState { .. })));
    }

    #[test]
    fn test_run_block_failure() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a)
            .fail_on(Command::RunBlock, PicoStatus::InvalidTimebase);
        let mut session = configured(&mut driver);
        let err = capture(
            &mut session,
            &timebase(),
            CaptureWindow::new(10, 10).unwrap(),
            &PollSettings::default(),
            OverflowPolicy::Reject,
        )
        .unwrap_err();
        assert_eq!(err.command(), Some(Command::RunBlock));
        session.close().unwrap();
    }
}
