//! Command surface of a block-mode digitizer driver.
//!
//! The trait mirrors the vendor API one call per method: every command reports a
//! [`PicoStatus`], and commands with outputs return them alongside. Buffers are
//! owned by the caller: [`DeviceDriver::set_data_buffers`] registers a channel for
//! the next transfer and [`DeviceDriver::get_values`] fills every registered
//! buffer in one bulk call.

use crate::channel::{Channel, ChannelSettings, Resolution};
use crate::status::PicoStatus;
use crate::trigger_config::RawTrigger;

/// Opaque reference to an opened unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitHandle(pub i16);

/// Timing reported by the device for a timebase code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseInfo {
    pub interval_ns: f32,
    pub max_samples: u32,
}

/// Result of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuesReply {
    pub n_samples: usize,
    /// Bit `n` set when channel with code `n` went over range.
    pub overflow: u16,
}

/// One max/min buffer pair. The min buffer is only populated by downsampling
/// modes, which the block capture does not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBuffers {
    pub channel: Channel,
    pub max: Vec<i16>,
    pub min: Vec<i16>,
}

/// The buffers of every active channel for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockBuffers {
    buffers: Vec<ChannelBuffers>,
}

impl BlockBuffers {
    pub fn for_channels(channels: impl IntoIterator<Item = Channel>, len: usize) -> Self {
        let buffers = channels
            .into_iter()
            .map(|channel| ChannelBuffers {
                channel,
                max: vec![0; len],
                min: vec![0; len],
            })
            .collect();
        Self { buffers }
    }

    /// Samples each buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buffers.first().map_or(0, |b| b.max.len())
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.buffers.iter().map(|b| b.channel)
    }

    pub fn get(&self, channel: Channel) -> Option<&ChannelBuffers> {
        self.buffers.iter().find(|b| b.channel == channel)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ChannelBuffers> {
        self.buffers.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<ChannelBuffers> {
        self.buffers
    }
}

pub trait DeviceDriver {
    /// Open the unit with the given serial. A handle is returned together with
    /// the status because power-source conditions leave the unit usable.
    fn open_unit(&mut self, serial: &str, resolution: Resolution) -> (UnitHandle, PicoStatus);

    fn change_power_source(&mut self, handle: UnitHandle, status: PicoStatus) -> PicoStatus;

    fn set_channel(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        settings: &ChannelSettings,
    ) -> PicoStatus;

    fn maximum_value(&mut self, handle: UnitHandle) -> Result<i16, PicoStatus>;

    fn set_simple_trigger(&mut self, handle: UnitHandle, trigger: &RawTrigger) -> PicoStatus;

    fn get_timebase(
        &mut self,
        handle: UnitHandle,
        timebase: u32,
        n_samples: u32,
    ) -> Result<TimebaseInfo, PicoStatus>;

    fn run_block(&mut self, handle: UnitHandle, pre: u32, post: u32, timebase: u32) -> PicoStatus;

    fn is_ready(&mut self, handle: UnitHandle) -> Result<bool, PicoStatus>;

    fn set_data_buffers(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        buffer_len: usize,
    ) -> PicoStatus;

    fn get_values(
        &mut self,
        handle: UnitHandle,
        buffers: &mut BlockBuffers,
    ) -> Result<ValuesReply, PicoStatus>;

    fn stop(&mut self, handle: UnitHandle) -> PicoStatus;

    fn close_unit(&mut self, handle: UnitHandle) -> PicoStatus;
}

impl<D: DeviceDriver + ?Sized> DeviceDriver for Box<D> {
    fn open_unit(&mut self, serial: &str, resolution: Resolution) -> (UnitHandle, PicoStatus) {
        (**self).open_unit(serial, resolution)
    }

    fn change_power_source(&mut self, handle: UnitHandle, status: PicoStatus) -> PicoStatus {
        (**self).change_power_source(handle, status)
    }

    fn set_channel(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        settings: &ChannelSettings,
    ) -> PicoStatus {
        (**self).set_channel(handle, channel, settings)
    }

    fn maximum_value(&mut self, handle: UnitHandle) -> Result<i16, PicoStatus> {
        (**self).maximum_value(handle)
    }

    fn set_simple_trigger(&mut self, handle: UnitHandle, trigger: &RawTrigger) -> PicoStatus {
        (**self).set_simple_trigger(handle, trigger)
    }

    fn get_timebase(
        &mut self,
        handle: UnitHandle,
        timebase: u32,
        n_samples: u32,
    ) -> Result<TimebaseInfo, PicoStatus> {
        (**self).get_timebase(handle, timebase, n_samples)
    }

    fn run_block(&mut self, handle: UnitHandle, pre: u32, post: u32, timebase: u32) -> PicoStatus {
        (**self).run_block(handle, pre, post, timebase)
    }

    fn is_ready(&mut self, handle: UnitHandle) -> Result<bool, PicoStatus> {
        (**self).is_ready(handle)
    }

    fn set_data_buffers(
        &mut self,
        handle: UnitHandle,
        channel: Channel,
        buffer_len: usize,
    ) -> PicoStatus {
        (**self).set_data_buffers(handle, channel, buffer_len)
    }

    fn get_values(
        &mut self,
        handle: UnitHandle,
        buffers: &mut BlockBuffers,
    ) -> Result<ValuesReply, PicoStatus> {
        (**self).get_values(handle, buffers)
    }

    fn stop(&mut self, handle: UnitHandle) -> PicoStatus {
        (**self).stop(handle)
    }

    fn close_unit(&mut self, handle: UnitHandle) -> PicoStatus {
        (**self).close_unit(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_buffers_layout() {
        let buffers = BlockBuffers::for_channels([Channel::A, Channel::C], 16);
        assert_eq!(buffers.capacity(), 16);
        assert_eq!(buffers.channels().collect::<Vec<_>>(), vec![Channel::A, Channel::C]);
        assert!(buffers.get(Channel::B).is_none());
        assert!(BlockBuffers::default().is_empty());
    }
}
