//! Lifecycle of one opened unit.
//!
//! A [`DeviceSession`] exists only after the unit opened successfully (after
//! power-source negotiation when needed) and releases the unit exactly once:
//! either through [`DeviceSession::close`] or, failing that, when dropped.
//! Every command it issues lands in its [`StatusLog`].

use crate::channel::{Channel, ChannelSettings, Resolution, VoltageRange};
use crate::driver::{DeviceDriver, UnitHandle};
use crate::error::{AcquisitionError, Result};
use crate::status::{Command, PicoStatus, StatusEntry, StatusLog};
use crate::timebase::TimebaseDescriptor;
use crate::trigger_config::{RawTrigger, SimpleTrigger, TriggerSource};
use std::collections::BTreeMap;

/// Full scale of the external trigger input.
pub const EXTERNAL_TRIGGER_RANGE_MV: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    Configured,
    Armed,
    Ready,
    Transferred,
}

pub struct DeviceSession<'d, D: DeviceDriver + ?Sized> {
    driver: &'d mut D,
    serial: String,
    handle: Option<UnitHandle>,
    state: SessionState,
    log: StatusLog,
    ranges: BTreeMap<Channel, VoltageRange>,
    max_adc_count: Option<i16>,
    trigger: Option<RawTrigger>,
}

impl<'d, D: DeviceDriver + ?Sized> DeviceSession<'d, D> {
    /// Open the unit with `serial` at `resolution`.
    ///
    /// The two power-source outcomes are answered with a change-power-source
    /// command carrying the same code; any other failure means no session.
    pub fn open(driver: &'d mut D, serial: &str, resolution: Resolution) -> Result<Self> {
        let mut log = StatusLog::new();
        let (handle, status) = driver.open_unit(serial, resolution);
        log.record(Command::OpenUnit, status);

        if status.is_power_source_condition() {
            log::info!("unit {serial} reported {status}, switching power source");
            let changed = driver.change_power_source(handle, status);
            log.record(Command::ChangePowerSource, changed);
            if !changed.is_ok() {
                let released = driver.close_unit(handle);
                if !released.is_ok() {
                    log::warn!("failed to release unit {serial} after {changed}: {released}");
                }
                return Err(AcquisitionError::DeviceOpen {
                    serial: serial.to_string(),
                    command: Command::ChangePowerSource,
                    status: changed,
                });
            }
        } else if !status.is_ok() {
            return Err(AcquisitionError::DeviceOpen {
                serial: serial.to_string(),
                command: Command::OpenUnit,
                status,
            });
        }

        log::info!("opened unit {serial} at {resolution} resolution");
        Ok(Self {
            driver,
            serial: serial.to_string(),
            handle: Some(handle),
            state: SessionState::Opened,
            log,
            ranges: BTreeMap::new(),
            max_adc_count: None,
            trigger: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.log
    }

    /// `None` until a channel has been enabled.
    pub fn max_adc_count(&self) -> Option<i16> {
        self.max_adc_count
    }

    pub fn channel_ranges(&self) -> &BTreeMap<Channel, VoltageRange> {
        &self.ranges
    }

    pub fn active_channels(&self) -> Vec<Channel> {
        self.ranges.keys().copied().collect()
    }

    pub fn trigger(&self) -> Option<&RawTrigger> {
        self.trigger.as_ref()
    }

    /// Apply `settings` to one channel. Enabling a channel records its range;
    /// the first enabled channel also fetches the maximum ADC count.
    pub fn configure_channel(
        &mut self,
        channel: Channel,
        settings: &ChannelSettings,
    ) -> Result<StatusEntry> {
        self.expect_state(
            "configure a channel",
            &[
                SessionState::Opened,
                SessionState::Configured,
                SessionState::Transferred,
            ],
        )?;

        let status = self
            .call(Command::SetChannel, |d, h| {
                into_result(d.set_channel(h, channel, settings))
            })
            .err()
            .unwrap_or(PicoStatus::Ok);
        let entry = StatusEntry {
            command: Command::SetChannel,
            status,
        };
        if !status.is_ok() {
            if !settings.enabled && status == PicoStatus::InvalidChannel {
                // Units with fewer inputs reject disabling the ones they lack.
                log::debug!("{channel} not present on unit {}", self.serial);
                self.ranges.remove(&channel);
                return Ok(entry);
            }
            return Err(AcquisitionError::rejected(Command::SetChannel, status));
        }

        if settings.enabled {
            self.ranges.insert(channel, settings.range);
            if self.max_adc_count.is_none() {
                let max = self
                    .call(Command::MaximumValue, |d, h| d.maximum_value(h))
                    .map_err(|status| AcquisitionError::rejected(Command::MaximumValue, status))?;
                if max <= 0 {
                    return Err(AcquisitionError::configuration(format!(
                        "unit {} reported a maximum ADC count of {max}",
                        self.serial
                    )));
                }
                self.max_adc_count = Some(max);
            }
        } else {
            self.ranges.remove(&channel);
        }

        self.state = SessionState::Configured;
        Ok(entry)
    }

    /// Enable exactly the channels in `channels` and disable every other input.
    pub fn configure_channels(
        &mut self,
        channels: &[(Channel, ChannelSettings)],
    ) -> Result<Vec<StatusEntry>> {
        let mut outcomes = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let settings = channels
                .iter()
                .find(|(c, _)| *c == channel)
                .map_or_else(ChannelSettings::disabled, |(_, s)| *s);
            outcomes.push(self.configure_channel(channel, &settings)?);
        }
        if self.ranges.is_empty() {
            return Err(AcquisitionError::configuration("no channel is enabled"));
        }
        Ok(outcomes)
    }

    pub fn configure_trigger(&mut self, trigger: &SimpleTrigger) -> Result<StatusEntry> {
        self.expect_state(
            "configure the trigger",
            &[SessionState::Configured, SessionState::Transferred],
        )?;
        let max_adc_count = self
            .max_adc_count
            .ok_or_else(|| AcquisitionError::configuration("no channel is enabled"))?;
        let range_mv = match trigger.source {
            TriggerSource::External => EXTERNAL_TRIGGER_RANGE_MV,
            TriggerSource::Channel(channel) => self
                .ranges
                .get(&channel)
                .map(|r| r.full_scale_mv())
                .ok_or_else(|| {
                    AcquisitionError::configuration(format!(
                        "trigger source {channel} is not enabled"
                    ))
                })?,
        };

        let raw = trigger.to_raw(range_mv, max_adc_count)?;
        self.call(Command::SetSimpleTrigger, |d, h| {
            into_result(d.set_simple_trigger(h, &raw))
        })
        .map_err(|status| AcquisitionError::rejected(Command::SetSimpleTrigger, status))?;

        log::debug!(
            "trigger on {:?} at {} counts ({} mV)",
            raw.source,
            raw.threshold,
            trigger.threshold_mv
        );
        self.trigger = Some(raw);
        self.state = SessionState::Configured;
        Ok(StatusEntry {
            command: Command::SetSimpleTrigger,
            status: PicoStatus::Ok,
        })
    }

    /// Ask the unit what `plan` really gives. The returned descriptor carries the
    /// interval and sample capacity the device reports.
    pub fn query_timebase(&mut self, plan: &TimebaseDescriptor) -> Result<TimebaseDescriptor> {
        self.expect_state(
            "query the timebase",
            &[SessionState::Configured, SessionState::Transferred],
        )?;
        let requested = plan.realized_max_samples;
        let info = self
            .call(Command::GetTimebase, |d, h| {
                d.get_timebase(h, plan.timebase_code, requested)
            })
            .map_err(|status| AcquisitionError::InfeasibleTimebase {
                status: Some(status),
                message: format!("timebase {} rejected", plan.timebase_code),
            })?;

        if info.max_samples < requested {
            return Err(AcquisitionError::InfeasibleTimebase {
                status: None,
                message: format!(
                    "timebase {} holds {} samples, {} requested",
                    plan.timebase_code, info.max_samples, requested
                ),
            });
        }
        Ok(TimebaseDescriptor {
            timebase_code: plan.timebase_code,
            sample_interval_ns: f64::from(info.interval_ns),
            realized_max_samples: info.max_samples,
        })
    }

    /// Stop the unit and release it. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let stopped = self.driver.stop(handle);
        self.log.record(Command::Stop, stopped);
        let closed = self.driver.close_unit(handle);
        self.log.record(Command::CloseUnit, closed);
        self.state = SessionState::Closed;

        if !stopped.is_ok() {
            return Err(AcquisitionError::Close {
                command: Command::Stop,
                status: stopped,
            });
        }
        if !closed.is_ok() {
            return Err(AcquisitionError::Close {
                command: Command::CloseUnit,
                status: closed,
            });
        }
        log::debug!("closed unit {}", self.serial);
        Ok(())
    }

    /// Run one command against the open unit and record its outcome.
    pub(crate) fn call<T>(
        &mut self,
        command: Command,
        f: impl FnOnce(&mut D, UnitHandle) -> std::result::Result<T, PicoStatus>,
    ) -> std::result::Result<T, PicoStatus> {
        let Some(handle) = self.handle else {
            self.log.record(command, PicoStatus::InvalidHandle);
            return Err(PicoStatus::InvalidHandle);
        };
        let result = f(&mut *self.driver, handle);
        self.log
            .record(command, result.as_ref().err().copied().unwrap_or(PicoStatus::Ok));
        result
    }

    /// Run one command without recording it; used for the not-ready polls.
    pub(crate) fn call_unrecorded<T>(
        &mut self,
        f: impl FnOnce(&mut D, UnitHandle) -> std::result::Result<T, PicoStatus>,
    ) -> std::result::Result<T, PicoStatus> {
        match self.handle {
            Some(handle) => f(&mut *self.driver, handle),
            None => Err(PicoStatus::InvalidHandle),
        }
    }

    pub(crate) fn record(&mut self, command: Command, status: PicoStatus) {
        self.log.record(command, status);
    }

    pub(crate) fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AcquisitionError::InvalidState {
                operation,
                actual: self.state,
            })
        }
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }
}

impl<D: DeviceDriver + ?Sized> Drop for DeviceSession<'_, D> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::warn!("session for unit {} dropped while open, closing", self.serial);
            if let Err(e) = self.close() {
                log::warn!("{e}");
            }
        }
    }
}

pub(crate) fn into_result(status: PicoStatus) -> std::result::Result<(), PicoStatus> {
    if status.is_ok() { Ok(()) } else { Err(status) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDriver;
    use crate::timebase::DeviceModel;

    fn two_channels() -> Vec<(Channel, ChannelSettings)> {
        vec![
            (Channel::A, ChannelSettings::dc(VoltageRange::V10)),
            (Channel::B, ChannelSettings::dc(VoltageRange::V2)),
        ]
    }

    #[test]
    fn test_power_source_negotiation() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a)
            .with_open_status(PicoStatus::PowerSupplyNotConnected);
        let session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(
            session.status_log().last(Command::ChangePowerSource),
            Some(PicoStatus::Ok)
        );
        drop(session);
        assert_eq!(driver.calls(Command::ChangePowerSource), 1);
        assert_eq!(driver.calls(Command::CloseUnit), 1);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_serials(["SIM001"]);
        let err = DeviceSession::open(&mut driver, "MISSING", Resolution::Bits8).err();
        assert!(matches!(
            err,
            Some(AcquisitionError::DeviceOpen {
                command: Command::OpenUnit,
                status: PicoStatus::NotFound,
                ..
            })
        ));
        assert_eq!(driver.calls(Command::CloseUnit), 0);
    }

    #[test]
    fn test_reconfiguring_replaces_range() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        session.configure_channels(&two_channels()).unwrap();
        session
            .configure_channel(Channel::B, &ChannelSettings::dc(VoltageRange::Mv500))
            .unwrap();
        assert_eq!(session.channel_ranges().get(&Channel::B), Some(&VoltageRange::Mv500));
        assert_eq!(session.active_channels(), vec![Channel::A, Channel::B]);
        assert_eq!(session.status_log().count(Command::MaximumValue), 1);
        session.close().unwrap();
    }

    #[test]
    fn test_trigger_before_channels_is_invalid() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        let trigger = SimpleTrigger::start_capturing_when(TriggerSource::External, 500.0).build();
        let err = session.configure_trigger(&trigger).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::InvalidState {
                actual: SessionState::Opened,
                ..
            }
        ));
    }

    #[test]
    fn test_trigger_uses_channel_range() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        session.configure_channels(&two_channels()).unwrap();
        let max = f64::from(session.max_adc_count().unwrap());

        let trigger =
            SimpleTrigger::start_capturing_when(TriggerSource::Channel(Channel::B), 1_000.0).build();
        session.configure_trigger(&trigger).unwrap();
        assert_eq!(
            session.trigger().map(|t| t.threshold),
            Some((max / 2.0).round() as i16)
        );

        let unused =
            SimpleTrigger::start_capturing_when(TriggerSource::Channel(Channel::C), 0.0).build();
        assert!(session.configure_trigger(&unused).is_err());
    }

    #[test]
    fn test_close_runs_once() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.status_log().count(Command::Stop), 1);
        drop(session);
        assert_eq!(driver.calls(Command::CloseUnit), 1);
    }

    #[test]
    fn test_close_failure_reports_command() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a)
            .fail_on(Command::CloseUnit, PicoStatus::NotResponding);
        let mut session = DeviceSession::open(&mut driver, "SIM001", Resolution::Bits12).unwrap();
        let err = session.close().unwrap_err();
        assert_eq!(err.command(), Some(Command::CloseUnit));
    }
}
