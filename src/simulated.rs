//! In-process digitizer implementing [`DeviceDriver`].
//!
//! Useful without hardware: the open status, memory depth, readiness latency,
//! per-command failures and over-range channels are all configurable, and every
//! command is counted so tests can check what a session issued.
//!
//! ```
//! use blockscope_rs::simulated::SimulatedDriver;
//! use blockscope_rs::status::{Command, PicoStatus};
//! use blockscope_rs::timebase::DeviceModel;
//!
//! let driver = SimulatedDriver::new(DeviceModel::Ps5000a)
//!     .with_polls_until_ready(10)
//!     .fail_on(Command::GetValues, PicoStatus::NotResponding)
//!     .with_signal(|_, k| ((k % 100) as i16 - 50) * 100);
//! assert_eq!(driver.calls(Command::OpenUnit), 0);
//! ```

use crate::channel::{Channel, ChannelSettings, Resolution};
use crate::driver::{BlockBuffers, DeviceDriver, TimebaseInfo, UnitHandle, ValuesReply};
use crate::status::{Command, PicoStatus};
use crate::timebase::{DeviceModel, TimingTable};
use crate::trigger_config::{RawTrigger, TriggerSource};
use std::collections::{BTreeMap, HashMap};

type Signal = Box<dyn Fn(Channel, usize) -> i16 + Send>;

/// Default sample memory, shared between the enabled channels.
pub const DEFAULT_MEMORY_SAMPLES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingBlock {
    samples: u32,
    polls_left: u32,
}

pub struct SimulatedDriver {
    model: DeviceModel,
    timing: TimingTable,
    serials: Vec<String>,
    open_status: PicoStatus,
    memory_samples: u32,
    polls_until_ready: u32,
    failures: HashMap<Command, PicoStatus>,
    signal: Signal,
    overflow: u16,
    transfer_limit: Option<usize>,
    calls: HashMap<Command, usize>,

    handle: Option<UnitHandle>,
    next_handle: i16,
    power_pending: Option<PicoStatus>,
    resolution: Resolution,
    channels: BTreeMap<Channel, ChannelSettings>,
    trigger: Option<RawTrigger>,
    registered: BTreeMap<Channel, usize>,
    last_run: Option<(u32, u32, u32)>,
    pending: Option<PendingBlock>,
}

impl SimulatedDriver {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            timing: TimingTable::default(),
            serials: Vec::new(),
            open_status: PicoStatus::Ok,
            memory_samples: DEFAULT_MEMORY_SAMPLES,
            polls_until_ready: 0,
            failures: HashMap::new(),
            signal: Box::new(|_, _| 0),
            overflow: 0,
            transfer_limit: None,
            calls: HashMap::new(),
            handle: None,
            next_handle: 1,
            power_pending: None,
            resolution: model.default_resolution(),
            channels: BTreeMap::new(),
            trigger: None,
            registered: BTreeMap::new(),
            last_run: None,
            pending: None,
        }
    }

    /// Only these serials open; any serial opens when the list is empty.
    pub fn with_serials<I, S>(mut self, serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.serials = serials.into_iter().map(Into::into).collect();
        self
    }

    /// Status reported by open-unit. The power-source codes leave the unit open
    /// but unusable until the matching change-power-source command.
    pub fn with_open_status(mut self, status: PicoStatus) -> Self {
        self.open_status = status;
        self
    }

    pub fn with_timing_table(mut self, timing: TimingTable) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_memory_depth(mut self, samples: u32) -> Self {
        self.memory_samples = samples;
        self
    }

    /// Number of not-ready answers before a block completes.
    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    pub fn fail_on(mut self, command: Command, status: PicoStatus) -> Self {
        self.failures.insert(command, status);
        self
    }

    /// Sample `k` of `channel` in device counts.
    pub fn with_signal(mut self, signal: impl Fn(Channel, usize) -> i16 + Send + 'static) -> Self {
        self.signal = Box::new(signal);
        self
    }

    /// Report `channel` as over range on every transfer.
    pub fn with_overflow(mut self, channel: Channel) -> Self {
        self.overflow |= 1 << channel.code();
        self
    }

    /// Cut every bulk transfer short at `samples`.
    pub fn with_transfer_limit(mut self, samples: usize) -> Self {
        self.transfer_limit = Some(samples);
        self
    }

    pub fn calls(&self, command: Command) -> usize {
        self.calls.get(&command).copied().unwrap_or(0)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn channel_settings(&self, channel: Channel) -> Option<&ChannelSettings> {
        self.channels.get(&channel)
    }

    pub fn trigger(&self) -> Option<&RawTrigger> {
        self.trigger.as_ref()
    }

    /// Pre, post and timebase of the latest run-block.
    pub fn last_run(&self) -> Option<(u32, u32, u32)> {
        self.last_run
    }

    pub fn max_adc_count(&self) -> i16 {
        match (self.model, self.resolution) {
            (DeviceModel::Ps5000a, Resolution::Bits8) | (DeviceModel::Ps3000a, _) => 32_512,
            (DeviceModel::Ps5000a, _) => 32_767,
        }
    }

    fn begin(&mut self, command: Command, handle: UnitHandle) -> Result<(), PicoStatus> {
        *self.calls.entry(command).or_insert(0) += 1;
        if let Some(status) = self.failures.get(&command) {
            return Err(*status);
        }
        if self.handle != Some(handle) {
            return Err(PicoStatus::InvalidHandle);
        }
        if command != Command::ChangePowerSource && command != Command::CloseUnit {
            if let Some(status) = self.power_pending {
                return Err(status);
            }
        }
        Ok(())
    }

    fn enabled_channels(&self) -> usize {
        self.channels.values().filter(|s| s.enabled).count()
    }
}

fn status_of(result: Result<(), PicoStatus>) -> PicoStatus {
    result.err().unwrap_or(PicoStatus::Ok)
}

impl DeviceDriver for SimulatedDriver {
    fn open_unit(&mut self, serial: &str, resolution: Resolution) -> (UnitHandle, PicoStatus) {
        *self.calls.entry(Command::OpenUnit).or_insert(0) += 1;
        if let Some(status) = self.failures.get(&Command::OpenUnit) {
            return (UnitHandle(0), *status);
        }
        if self.handle.is_some() {
            return (UnitHandle(0), PicoStatus::MaxUnitsOpened);
        }
        if !self.serials.is_empty() && !self.serials.iter().any(|s| s == serial) {
            return (UnitHandle(0), PicoStatus::NotFound);
        }
        if self.model == DeviceModel::Ps3000a && resolution != Resolution::Bits8 {
            return (UnitHandle(0), PicoStatus::InvalidParameter);
        }
        if !self.open_status.is_ok() && !self.open_status.is_power_source_condition() {
            return (UnitHandle(0), self.open_status);
        }

        let handle = UnitHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.handle = Some(handle);
        self.resolution = resolution;
        self.power_pending = self
            .open_status
            .is_power_source_condition()
            .then_some(self.open_status);
        self.channels.clear();
        self.registered.clear();
        self.trigger = None;
        self.pending = None;
        log::debug!("simulated {} {serial} opened as {:?}", self.model, handle);
        (handle, self.open_status)
    }

    fn change_power_source(&mut self, handle: UnitHandle, status: PicoStatus) -> PicoStatus {
        if let Err(e) = self.begin(Command::ChangePowerSource, handle) {
            return e;
        }
        match self.power_pending {
            Some(pending) if pending == status => {
                self.power_pending = None;
                PicoStatus::Ok
            }
            Some(_) => PicoStatus::InvalidParameter,
            None => PicoStatus::PowerSupplyConnected,
        }
    }

    fn set_channel(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        settings: &ChannelSettings,
    ) -> PicoStatus {
        if let Err(e) = self.begin(Command::SetChannel, handle) {
            return e;
        }
        self.channels.insert(channel, *settings);
        PicoStatus::Ok
    }

    fn maximum_value(&mut self, handle: UnitHandle) -> Result<i16, PicoStatus> {
        self.begin(Command::MaximumValue, handle)?;
        Ok(self.max_adc_count())
    }

    fn set_simple_trigger(&mut self, handle: UnitHandle, trigger: &RawTrigger) -> PicoStatus {
        if let Err(e) = self.begin(Command::SetSimpleTrigger, handle) {
            return e;
        }
        if let TriggerSource::Channel(channel) = trigger.source {
            if !self.channels.get(&channel).is_some_and(|s| s.enabled) {
                return PicoStatus::InvalidTriggerChannel;
            }
        }
        self.trigger = Some(*trigger);
        PicoStatus::Ok
    }

    fn get_timebase(
        &mut self,
        handle: UnitHandle,
        timebase: u32,
        n_samples: u32,
    ) -> Result<TimebaseInfo, PicoStatus> {
        self.begin(Command::GetTimebase, handle)?;
        let timing = self
            .timing
            .lookup(self.model, self.resolution)
            .map_err(|_| PicoStatus::InvalidParameter)?;
        if timebase <= timing.offset {
            return Err(PicoStatus::InvalidTimebase);
        }
        let per_channel = self.memory_samples / self.enabled_channels().max(1) as u32;
        log::debug!("simulated timebase {timebase} for {n_samples} samples");
        Ok(TimebaseInfo {
            interval_ns: timing.interval_ns(timebase) as f32,
            max_samples: per_channel,
        })
    }

    fn run_block(&mut self, handle: UnitHandle, pre: u32, post: u32, timebase: u32) -> PicoStatus {
        if let Err(e) = self.begin(Command::RunBlock, handle) {
            return e;
        }
        let samples = pre.saturating_add(post);
        let per_channel = self.memory_samples / self.enabled_channels().max(1) as u32;
        if samples > per_channel {
            return PicoStatus::TooManySamples;
        }
        self.last_run = Some((pre, post, timebase));
        self.pending = Some(PendingBlock {
            samples,
            polls_left: self.polls_until_ready,
        });
        PicoStatus::Ok
    }

    fn is_ready(&mut self, handle: UnitHandle) -> Result<bool, PicoStatus> {
        self.begin(Command::IsReady, handle)?;
        let pending = self.pending.as_mut().ok_or(PicoStatus::OperationFailed)?;
        if pending.polls_left == 0 {
            Ok(true)
        } else {
            pending.polls_left -= 1;
            Ok(false)
        }
    }

    fn set_data_buffers(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        buffer_len: usize,
    ) -> PicoStatus {
        if let Err(e) = self.begin(Command::SetDataBuffers, handle) {
            return e;
        }
        if !self.channels.get(&channel).is_some_and(|s| s.enabled) {
            return PicoStatus::InvalidChannel;
        }
        self.registered.insert(channel, buffer_len);
        PicoStatus::Ok
    }

    fn get_values(
        &mut self,
        handle: UnitHandle,
        buffers: &mut BlockBuffers,
    ) -> Result<ValuesReply, PicoStatus> {
        self.begin(Command::GetValues, handle)?;
        let pending = self.pending.ok_or(PicoStatus::OperationFailed)?;
        if pending.polls_left > 0 {
            return Err(PicoStatus::Busy);
        }

        let n = (pending.samples as usize)
            .min(buffers.capacity())
            .min(self.transfer_limit.unwrap_or(usize::MAX));
        for buffer in buffers.iter_mut() {
            match self.registered.get(&buffer.channel) {
                Some(&len) if len >= n => {}
                _ => return Err(PicoStatus::InvalidParameter),
            }
            for (k, sample) in buffer.max.iter_mut().take(n).enumerate() {
                *sample = (self.signal)(buffer.channel, k);
            }
        }

        let enabled_mask = buffers
            .channels()
            .fold(0u16, |mask, c| mask | (1 << c.code()));
        Ok(ValuesReply {
            n_samples: n,
            overflow: self.overflow & enabled_mask,
        })
    }

    fn stop(&mut self, handle: UnitHandle) -> PicoStatus {
        if let Err(e) = self.begin(Command::Stop, handle) {
            return e;
        }
        self.pending = None;
        PicoStatus::Ok
    }

    fn close_unit(&mut self, handle: UnitHandle) -> PicoStatus {
        let status = status_of(self.begin(Command::CloseUnit, handle));
        if self.handle == Some(handle) {
            self.handle = None;
            self.power_pending = None;
            self.pending = None;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::VoltageRange;

    #[test]
    fn test_commands_need_power_source_change() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a)
            .with_open_status(PicoStatus::Usb3DeviceNonUsb3Port);
        let (handle, status) = driver.open_unit("SIM", Resolution::Bits12);
        assert_eq!(status, PicoStatus::Usb3DeviceNonUsb3Port);
        assert_eq!(driver.maximum_value(handle), Err(PicoStatus::Usb3DeviceNonUsb3Port));
        assert_eq!(
            driver.change_power_source(handle, PicoStatus::Usb3DeviceNonUsb3Port),
            PicoStatus::Ok
        );
        assert_eq!(driver.maximum_value(handle), Ok(32_767));
    }

    #[test]
    fn test_memory_is_shared_between_channels() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a).with_memory_depth(1_000);
        let (handle, _) = driver.open_unit("SIM", Resolution::Bits8);
        for channel in [Channel::A, Channel::B] {
            driver.set_channel(handle, channel, &ChannelSettings::dc(VoltageRange::V1));
        }
        let info = driver.get_timebase(handle, 10, 100).unwrap();
        assert_eq!(info.max_samples, 500);
        assert_eq!(info.interval_ns, 64.0);
        assert_eq!(driver.run_block(handle, 300, 300, 10), PicoStatus::TooManySamples);
    }

    #[test]
    fn test_ps3000a_is_eight_bit_only() {
        let mut driver = SimulatedDriver::new(DeviceModel::Ps3000a);
        assert_eq!(
            driver.open_unit("SIM", Resolution::Bits12).1,
            PicoStatus::InvalidParameter
        );
        assert!(!driver.is_open());
        assert_eq!(driver.open_unit("SIM", Resolution::Bits8).1, PicoStatus::Ok);
        assert_eq!(driver.calls(Command::OpenUnit), 2);
    }
}
