use crate::channel::Channel;
use crate::error::{AcquisitionError, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TriggerSource {
    #[default]
    External,
    Channel(Channel),
}

impl TriggerSource {
    /// Vendor source index; the external input follows the four analog channels.
    pub fn code(self) -> i32 {
        match self {
            Self::External => 4,
            Self::Channel(channel) => channel.code(),
        }
    }
}

impl TryFrom<String> for TriggerSource {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "external" | "ext" => Ok(Self::External),
            "a" => Ok(Self::Channel(Channel::A)),
            "b" => Ok(Self::Channel(Channel::B)),
            "c" => Ok(Self::Channel(Channel::C)),
            "d" => Ok(Self::Channel(Channel::D)),
            _ => Err(format!("unknown trigger source '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    #[default]
    Rising,
    Falling,
}

impl ThresholdDirection {
    pub fn code(self) -> i32 {
        match self {
            Self::Rising => 2,
            Self::Falling => 3,
        }
    }
}

/// Trigger in device units, ready for the set-simple-trigger command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTrigger {
    pub enabled: bool,
    pub source: TriggerSource,
    pub threshold: i16,
    pub direction: ThresholdDirection,
    pub delay_samples: u32,
    /// 0 makes the device wait for a trigger indefinitely.
    pub auto_trigger_ms: i16,
}

#[derive(Debug)]
pub struct SimpleTriggerBuilder {
    source: TriggerSource,
    threshold_mv: f64,
    direction: ThresholdDirection,
    delay_samples: u32,
    auto_trigger: Duration,
}

impl SimpleTriggerBuilder {
    pub fn rising_edge(mut self) -> Self {
        self.direction = ThresholdDirection::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.direction = ThresholdDirection::Falling;
        self
    }

    /// Start storing post-trigger samples this many samples after the event.
    pub fn delayed_by(mut self, samples: u32) -> Self {
        self.delay_samples = samples;
        self
    }

    /// Fire on its own when no edge arrives within `timeout`.
    pub fn auto_trigger_after(mut self, timeout: Duration) -> Self {
        self.auto_trigger = timeout;
        self
    }

    pub fn wait_indefinitely(mut self) -> Self {
        self.auto_trigger = Duration::ZERO;
        self
    }

    pub fn build(self) -> SimpleTrigger {
        SimpleTrigger {
            source: self.source,
            threshold_mv: self.threshold_mv,
            direction: self.direction,
            delay_samples: self.delay_samples,
            auto_trigger: self.auto_trigger,
        }
    }
}

/// Single-edge trigger expressed in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleTrigger {
    pub source: TriggerSource,
    pub threshold_mv: f64,
    pub direction: ThresholdDirection,
    pub delay_samples: u32,
    pub auto_trigger: Duration,
}

impl SimpleTrigger {
    pub fn start_capturing_when(source: TriggerSource, threshold_mv: f64) -> SimpleTriggerBuilder {
        SimpleTriggerBuilder {
            source,
            threshold_mv,
            direction: ThresholdDirection::Rising,
            delay_samples: 0,
            auto_trigger: Duration::ZERO,
        }
    }

    /// Convert to device counts for an input spanning `±range_mv`.
    pub fn to_raw(&self, range_mv: f64, max_adc_count: i16) -> Result<RawTrigger> {
        if max_adc_count <= 0 {
            return Err(AcquisitionError::configuration(format!(
                "maximum ADC count must be positive, got {max_adc_count}"
            )));
        }
        let counts = (self.threshold_mv * f64::from(max_adc_count) / range_mv).round();
        if !counts.is_finite() || counts.abs() > f64::from(max_adc_count) {
            return Err(AcquisitionError::configuration(format!(
                "trigger threshold {} mV is outside the ±{} mV input range",
                self.threshold_mv, range_mv
            )));
        }

        let auto_trigger_ms = i16::try_from(self.auto_trigger.as_millis()).map_err(|_| {
            AcquisitionError::configuration(format!(
                "auto-trigger timeout {:?} exceeds {} ms",
                self.auto_trigger,
                i16::MAX
            ))
        })?;

        Ok(RawTrigger {
            enabled: true,
            source: self.source,
            threshold: counts as i16,
            direction: self.direction,
            delay_samples: self.delay_samples,
            auto_trigger_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_scales_with_range() {
        let trigger = SimpleTrigger::start_capturing_when(TriggerSource::External, 500.0)
            .rising_edge()
            .build();
        let raw = trigger.to_raw(5_000.0, 32_512).unwrap();
        assert_eq!(raw.threshold, 3251);
        assert_eq!(raw.direction.code(), 2);
        assert_eq!(raw.source.code(), 4);
        assert_eq!(raw.auto_trigger_ms, 0);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let trigger = SimpleTrigger::start_capturing_when(TriggerSource::Channel(Channel::A), -600.0)
            .falling_edge()
            .build();
        assert!(trigger.to_raw(500.0, 32_512).is_err());
    }

    #[test]
    fn test_source_names() {
        assert_eq!(TriggerSource::try_from("External".to_string()), Ok(TriggerSource::External));
        assert_eq!(
            TriggerSource::try_from("b".to_string()),
            Ok(TriggerSource::Channel(Channel::B))
        );
        assert!(TriggerSource::try_from("aux".to_string()).is_err());
    }

    #[test]
    fn test_auto_trigger_limit() {
        let trigger = SimpleTrigger::start_capturing_when(TriggerSource::External, 0.0)
            .auto_trigger_after(Duration::from_secs(60))
            .build();
        assert!(trigger.to_raw(5_000.0, 32_512).is_err());

        let trigger = SimpleTrigger::start_capturing_when(TriggerSource::External, 0.0)
            .auto_trigger_after(Duration::from_millis(1000))
            .build();
        assert_eq!(trigger.to_raw(5_000.0, 32_512).unwrap().auto_trigger_ms, 1000);
    }
}
