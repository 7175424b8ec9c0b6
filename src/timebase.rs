//! Timing arithmetic that turns a capture duration into a device timebase code.
//!
//! A digitizer samples at `samples_per_second / (code - offset)` for codes above
//! `offset`, so the code for a requested window is
//! `round(duration / total_samples * samples_per_second + offset)`. The constants
//! depend on the device family and the selected resolution; [`TimingTable`] holds
//! them and starts out with the hardware values.

use crate::channel::Resolution;
use crate::error::{AcquisitionError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    #[default]
    Ps5000a,
    Ps3000a,
}

impl DeviceModel {
    /// Oversampling applied when the configuration does not name one.
    /// The 3000A family makes up for its 8-bit converter by averaging runs of 32.
    pub fn default_oversampling(self) -> u32 {
        match self {
            Self::Ps5000a => 1,
            Self::Ps3000a => 32,
        }
    }

    pub fn default_resolution(self) -> Resolution {
        match self {
            Self::Ps5000a => Resolution::Bits12,
            Self::Ps3000a => Resolution::Bits8,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ps5000a => f.write_str("PS5000A"),
            Self::Ps3000a => f.write_str("PS3000A"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TimingModel {
    pub samples_per_second: f64,
    pub offset: u32,
    pub max_channels: usize,
}

impl TimingModel {
    pub const fn new(samples_per_second: f64, offset: u32, max_channels: usize) -> Self {
        Self {
            samples_per_second,
            offset,
            max_channels,
        }
    }

    /// Smallest code with a positive sample interval.
    pub fn min_timebase(&self) -> u32 {
        self.offset.saturating_add(1)
    }

    pub fn interval_ns(&self, timebase_code: u32) -> f64 {
        f64::from(timebase_code.saturating_sub(self.offset)) / self.samples_per_second * 1e9
    }
}

/// Timing constants per device family and resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingTable {
    models: BTreeMap<(DeviceModel, Resolution), TimingModel>,
}

impl Default for TimingTable {
    fn default() -> Self {
        let ps5000a = |resolution| (DeviceModel::Ps5000a, resolution);
        let models = [
            (ps5000a(Resolution::Bits8), TimingModel::new(125e6, 2, 4)),
            (ps5000a(Resolution::Bits12), TimingModel::new(62.5e6, 3, 4)),
            (ps5000a(Resolution::Bits14), TimingModel::new(125e6, 2, 4)),
            (ps5000a(Resolution::Bits15), TimingModel::new(125e6, 2, 2)),
            (ps5000a(Resolution::Bits16), TimingModel::new(62.5e6, 3, 1)),
            (
                (DeviceModel::Ps3000a, Resolution::Bits8),
                TimingModel::new(125e6, 2, 4),
            ),
        ]
        .into_iter()
        .collect();
        Self { models }
    }
}

impl TimingTable {
    pub fn lookup(&self, model: DeviceModel, resolution: Resolution) -> Result<TimingModel> {
        self.models
            .get(&(model, resolution))
            .copied()
            .ok_or_else(|| {
                AcquisitionError::configuration(format!(
                    "{model} has no timing model for {resolution} resolution"
                ))
            })
    }

    /// Replace (or add) the constants for one model and resolution.
    pub fn insert(&mut self, model: DeviceModel, resolution: Resolution, timing: TimingModel) {
        self.models.insert((model, resolution), timing);
    }
}

/// Pre/post trigger sample counts of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureWindow {
    pub pre_trigger: u32,
    pub post_trigger: u32,
}

impl CaptureWindow {
    pub fn new(pre_trigger: u32, post_trigger: u32) -> Result<Self> {
        if pre_trigger == 0 && post_trigger == 0 {
            return Err(AcquisitionError::configuration(
                "a block needs at least one pre- or post-trigger sample",
            ));
        }
        Ok(Self {
            pre_trigger,
            post_trigger,
        })
    }

    pub fn total(&self) -> u32 {
        self.pre_trigger.saturating_add(self.post_trigger)
    }

    /// The window the device has to record so that averaging runs of `factor`
    /// gives back this window.
    pub fn oversampled(&self, factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(AcquisitionError::configuration(
                "oversampling factor must be at least 1",
            ));
        }
        let scale = |n: u32| {
            n.checked_mul(factor).ok_or_else(|| {
                AcquisitionError::configuration(format!(
                    "{n} samples oversampled by {factor} do not fit in a block"
                ))
            })
        };
        let window = Self {
            pre_trigger: scale(self.pre_trigger)?,
            post_trigger: scale(self.post_trigger)?,
        };
        if window.pre_trigger.checked_add(window.post_trigger).is_none() {
            return Err(AcquisitionError::configuration(format!(
                "{} samples oversampled by {factor} do not fit in a block",
                self.total()
            )));
        }
        Ok(window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseDescriptor {
    pub timebase_code: u32,
    pub sample_interval_ns: f64,
    pub realized_max_samples: u32,
}

/// Derive the timebase code for spreading `total_samples` over `duration`.
pub fn plan(duration: Duration, total_samples: u32, timing: &TimingModel) -> Result<TimebaseDescriptor> {
    if total_samples == 0 {
        return Err(AcquisitionError::configuration("cannot plan a block of zero samples"));
    }
    if duration.is_zero() {
        return Err(AcquisitionError::configuration("capture duration must be positive"));
    }

    let code = (duration.as_secs_f64() / f64::from(total_samples) * timing.samples_per_second
        + f64::from(timing.offset))
    .round();

    if !code.is_finite() || code > f64::from(u32::MAX) {
        return Err(AcquisitionError::InfeasibleTimebase {
            status: None,
            message: format!(
                "{duration:?} over {total_samples} samples needs a timebase beyond {}",
                u32::MAX
            ),
        });
    }
    let timebase_code = code as u32;
    if timebase_code < timing.min_timebase() {
        return Err(AcquisitionError::InfeasibleTimebase {
            status: None,
            message: format!(
                "{duration:?} over {total_samples} samples is faster than {:.0} samples/s allows",
                timing.samples_per_second
            ),
        });
    }

    let descriptor = TimebaseDescriptor {
        timebase_code,
        sample_interval_ns: timing.interval_ns(timebase_code),
        realized_max_samples: total_samples,
    };
    log::debug!(
        "planned timebase {} ({:.3} ns/sample) for {:?} over {} samples",
        descriptor.timebase_code,
        descriptor.sample_interval_ns,
        duration,
        total_samples
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twelve_bit_millisecond_window() {
        let timing = TimingTable::default()
            .lookup(DeviceModel::Ps5000a, Resolution::Bits12)
            .unwrap();
        let tb = plan(Duration::from_millis(1), 10_000, &timing).unwrap();
        assert_eq!(tb.timebase_code, 9);
        assert!((tb.sample_interval_ns - 96.0).abs() < 1e-9);
        assert_eq!(tb.realized_max_samples, 10_000);
    }

    #[test]
    fn test_too_fast_is_infeasible() {
        let timing = TimingModel::new(62.5e6, 3, 4);
        let err = plan(Duration::from_nanos(10), 10_000, &timing).unwrap_err();
        assert!(matches!(err, AcquisitionError::InfeasibleTimebase { .. }));
    }

    #[test]
    fn test_interval_is_positive_across_durations() {
        let timing = TimingModel::new(125e6, 2, 4);
        for micros in [50u64, 80, 1_000, 250_000, 3_000_000] {
            let tb = plan(Duration::from_micros(micros), 4_000, &timing).unwrap();
            assert!(tb.timebase_code >= timing.min_timebase());
            assert!(tb.sample_interval_ns > 0.0);
        }
    }

    #[test]
    fn test_zero_samples_rejected() {
        let timing = TimingModel::new(125e6, 2, 4);
        assert!(matches!(
            plan(Duration::from_millis(1), 0, &timing),
            Err(AcquisitionError::Configuration { .. })
        ));
    }

    #[test]
    fn test_huge_duration_overflows_code() {
        let timing = TimingModel::new(125e6, 2, 4);
        let err = plan(Duration::from_secs(1_000_000), 1, &timing).unwrap_err();
        assert!(matches!(err, AcquisitionError::InfeasibleTimebase { .. }));
    }

    #[test]
    fn test_missing_resolution() {
        let table = TimingTable::default();
        assert!(table.lookup(DeviceModel::Ps3000a, Resolution::Bits12).is_err());
        assert_eq!(
            table.lookup(DeviceModel::Ps5000a, Resolution::Bits16).unwrap().max_channels,
            1
        );
    }

    #[test]
    fn test_oversampled_window() {
        let window = CaptureWindow::new(100, 300).unwrap().oversampled(32).unwrap();
        assert_eq!(window.pre_trigger, 3_200);
        assert_eq!(window.total(), 12_800);
        assert!(CaptureWindow::new(0, 0).is_err());
        assert!(CaptureWindow::new(u32::MAX, 1).unwrap().oversampled(2).is_err());
    }
}
