//! TOML description of an acquisition.
//!
//! ```toml
//! [device]
//! model = "ps5000a"
//! serial = "GO021/0001"
//! resolution = "12-bit"
//!
//! [capture]
//! duration_s = 0.001
//! pre_trigger_samples = 5000
//! post_trigger_samples = 5000
//! output = "trace.csv"
//!
//! [[channel]]
//! id = "A"
//! range = "10V"
//!
//! [trigger]
//! source = "external"
//! threshold_mv = 500.0
//! direction = "rising"
//! ```
//!
//! Every section is optional; missing values fall back to a two-channel
//! PS5000A setup triggered by a 500 mV rising edge on the external input.

use crate::acquisition::{AcquisitionRequest, FileSink};
use crate::capture::OverflowPolicy;
use crate::channel::{Channel, ChannelSettings, Coupling, Resolution, VoltageRange};
use crate::error::{AcquisitionError, Result};
use crate::timebase::{CaptureWindow, DeviceModel, TimingModel, TimingTable};
use crate::trigger_config::{SimpleTrigger, ThresholdDirection, TriggerSource};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub device: DeviceSection,
    pub capture: CaptureSection,
    #[serde(rename = "channel")]
    pub channels: Vec<ChannelSection>,
    pub trigger: TriggerSection,
    #[serde(rename = "timing_model")]
    pub timing_models: Vec<TimingOverride>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            device: DeviceSection::default(),
            capture: CaptureSection::default(),
            channels: vec![
                ChannelSection::dc(Channel::A, VoltageRange::V10),
                ChannelSection::dc(Channel::B, VoltageRange::V10),
            ],
            trigger: TriggerSection::default(),
            timing_models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub model: DeviceModel,
    pub serial: String,
    /// Defaults to 12-bit on the PS5000A and 8-bit on the PS3000A.
    pub resolution: Option<Resolution>,
    pub oversampling: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    pub duration_s: f64,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub poll_interval_us: Option<u64>,
    pub reject_overflow: bool,
    pub absolute_time: bool,
    pub output: Option<PathBuf>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            duration_s: 1e-3,
            pre_trigger_samples: 5_000,
            post_trigger_samples: 5_000,
            poll_interval_us: None,
            reject_overflow: true,
            absolute_time: false,
            output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    pub id: Channel,
    pub range: VoltageRange,
    #[serde(default)]
    pub coupling: Coupling,
    #[serde(default)]
    pub analog_offset_v: f32,
}

impl ChannelSection {
    fn dc(id: Channel, range: VoltageRange) -> Self {
        Self {
            id,
            range,
            coupling: Coupling::Dc,
            analog_offset_v: 0.0,
        }
    }

    fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            enabled: true,
            coupling: self.coupling,
            range: self.range,
            analog_offset: self.analog_offset_v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerSection {
    pub source: TriggerSource,
    pub threshold_mv: f64,
    pub direction: ThresholdDirection,
    pub delay_samples: u32,
    /// 0 waits for a trigger indefinitely.
    pub auto_trigger_ms: u64,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            source: TriggerSource::External,
            threshold_mv: 500.0,
            direction: ThresholdDirection::Rising,
            delay_samples: 0,
            auto_trigger_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingOverride {
    pub model: DeviceModel,
    pub resolution: Resolution,
    pub samples_per_second: f64,
    pub offset: u32,
    pub max_channels: usize,
}

impl AcquisitionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loading acquisition config from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|c| c.id == channel.id) {
                return Err(AcquisitionError::configuration(format!(
                    "{} is listed twice",
                    channel.id
                )));
            }
        }
        for timing in &self.timing_models {
            if timing.samples_per_second.is_nan() || timing.samples_per_second <= 0.0 {
                return Err(AcquisitionError::configuration(format!(
                    "timing model for {} {} needs a positive sample rate",
                    timing.model, timing.resolution
                )));
            }
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        self.device
            .resolution
            .unwrap_or_else(|| self.device.model.default_resolution())
    }

    /// Hardware defaults with the `[[timing_model]]` entries applied.
    pub fn timing_table(&self) -> TimingTable {
        let mut table = TimingTable::default();
        for t in &self.timing_models {
            table.insert(
                t.model,
                t.resolution,
                TimingModel::new(t.samples_per_second, t.offset, t.max_channels),
            );
        }
        table
    }

    pub fn to_request(&self) -> Result<AcquisitionRequest> {
        let duration = Duration::try_from_secs_f64(self.capture.duration_s).map_err(|e| {
            AcquisitionError::configuration(format!(
                "invalid duration {} s: {e}",
                self.capture.duration_s
            ))
        })?;
        let window = CaptureWindow::new(
            self.capture.pre_trigger_samples,
            self.capture.post_trigger_samples,
        )?;

        let mut trigger = SimpleTrigger::start_capturing_when(
            self.trigger.source,
            self.trigger.threshold_mv,
        )
        .delayed_by(self.trigger.delay_samples)
        .auto_trigger_after(Duration::from_millis(self.trigger.auto_trigger_ms));
        trigger = match self.trigger.direction {
            ThresholdDirection::Rising => trigger.rising_edge(),
            ThresholdDirection::Falling => trigger.falling_edge(),
        };

        Ok(AcquisitionRequest {
            duration,
            window,
            resolution: self.resolution(),
            channels: self
                .channels
                .iter()
                .map(|c| (c.id, c.settings()))
                .collect(),
            trigger: trigger.build(),
            oversampling: self.device.oversampling,
            poll_interval: self.capture.poll_interval_us.map(Duration::from_micros),
            overflow: if self.capture.reject_overflow {
                OverflowPolicy::Reject
            } else {
                OverflowPolicy::Flag
            },
            absolute_time: self.capture.absolute_time,
        })
    }

    /// File sink for `[capture] output`, if one is configured.
    pub fn file_sink(&self) -> Option<FileSink> {
        self.capture.output.as_ref().map(FileSink::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AcquisitionConfig::from_toml_str("").unwrap();
        assert_eq!(config, AcquisitionConfig::default());
        let request = config.to_request().unwrap();
        assert_eq!(request, AcquisitionRequest::default());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [device]
            model = "ps3000a"
            serial = "JO123/0042"
            oversampling = 16

            [capture]
            duration_s = 0.02
            pre_trigger_samples = 200
            post_trigger_samples = 800
            poll_interval_us = 250
            reject_overflow = false
            output = "out.parquet"

            [[channel]]
            id = "C"
            range = "500mV"
            coupling = "ac"
            analog_offset_v = 0.1

            [trigger]
            source = "C"
            threshold_mv = -20.0
            direction = "falling"
            auto_trigger_ms = 100

            [[timing_model]]
            model = "ps3000a"
            resolution = "8-bit"
            samples_per_second = 250e6
            offset = 2
            max_channels = 4
        "#;
        let config = AcquisitionConfig::from_toml_str(text).unwrap();
        assert_eq!(config.resolution(), Resolution::Bits8);
        assert_eq!(
            config.file_sink().map(|s| s.path().to_path_buf()),
            Some(PathBuf::from("out.parquet"))
        );

        let request = config.to_request().unwrap();
        assert_eq!(request.oversampling, Some(16));
        assert_eq!(request.poll_interval, Some(Duration::from_micros(250)));
        assert_eq!(request.overflow, OverflowPolicy::Flag);
        assert_eq!(request.channels.len(), 1);
        assert_eq!(request.channels[0].1.coupling, Coupling::Ac);
        assert_eq!(request.trigger.source, TriggerSource::Channel(Channel::C));
        assert_eq!(request.trigger.direction, ThresholdDirection::Falling);
        assert_eq!(request.trigger.auto_trigger, Duration::from_millis(100));

        let timing = config
            .timing_table()
            .lookup(DeviceModel::Ps3000a, Resolution::Bits8)
            .unwrap();
        assert_eq!(timing.samples_per_second, 250e6);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            AcquisitionConfig::from_toml_str("[capture]\nsamples = 3"),
            Err(AcquisitionError::Config(_))
        ));
        assert!(matches!(
            AcquisitionConfig::from_toml_str("[trigger]\nsource = \"aux\""),
            Err(AcquisitionError::Config(_))
        ));
        let twice = "[[channel]]\nid = \"A\"\nrange = \"1V\"\n[[channel]]\nid = \"A\"\nrange = \"2V\"";
        assert!(AcquisitionConfig::from_toml_str(twice).is_err());

        let config = AcquisitionConfig::from_toml_str("[capture]\nduration_s = -1.0").unwrap();
        assert!(config.to_request().is_err());
    }
}
