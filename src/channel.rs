use serde::Deserialize;
use std::fmt;

/// Analog input channel of a four-channel digitizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Channel {
    A,
    B,
    C,
    D,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Vendor channel index (`PS5000A_CHANNEL_A` = 0, ...).
    pub fn code(self) -> i32 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    /// Column name used for this channel in a persisted bundle.
    pub fn column_name(self) -> &'static str {
        match self {
            Self::A => "ChA_mV",
            Self::B => "ChB_mV",
            Self::C => "ChC_mV",
            Self::D => "ChD_mV",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    Ac,
    #[default]
    Dc,
}

impl Coupling {
    pub fn code(self) -> i32 {
        match self {
            Self::Ac => 0,
            Self::Dc => 1,
        }
    }
}

/// Full-scale input range. A range of `±R` maps `±max_adc_count` onto `±R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub enum VoltageRange {
    #[serde(rename = "10mV")]
    Mv10,
    #[serde(rename = "20mV")]
    Mv20,
    #[serde(rename = "50mV")]
    Mv50,
    #[serde(rename = "100mV")]
    Mv100,
    #[serde(rename = "200mV")]
    Mv200,
    #[serde(rename = "500mV")]
    Mv500,
    #[serde(rename = "1V")]
    V1,
    #[serde(rename = "2V")]
    V2,
    #[serde(rename = "5V")]
    V5,
    #[serde(rename = "10V")]
    V10,
    #[serde(rename = "20V")]
    V20,
    #[serde(rename = "50V")]
    V50,
}

impl VoltageRange {
    /// Vendor range index (`PS5000A_10MV` = 0 ... `PS5000A_50V` = 11).
    pub fn code(self) -> i32 {
        match self {
            Self::Mv10 => 0,
            Self::Mv20 => 1,
            Self::Mv50 => 2,
            Self::Mv100 => 3,
            Self::Mv200 => 4,
            Self::Mv500 => 5,
            Self::V1 => 6,
            Self::V2 => 7,
            Self::V5 => 8,
            Self::V10 => 9,
            Self::V20 => 10,
            Self::V50 => 11,
        }
    }

    pub fn full_scale_mv(self) -> f64 {
        match self {
            Self::Mv10 => 10.0,
            Self::Mv20 => 20.0,
            Self::Mv50 => 50.0,
            Self::Mv100 => 100.0,
            Self::Mv200 => 200.0,
            Self::Mv500 => 500.0,
            Self::V1 => 1_000.0,
            Self::V2 => 2_000.0,
            Self::V5 => 5_000.0,
            Self::V10 => 10_000.0,
            Self::V20 => 20_000.0,
            Self::V50 => 50_000.0,
        }
    }
}

/// ADC resolution mode. The 3000A family only samples at 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Resolution {
    #[serde(rename = "8-bit")]
    Bits8,
    #[serde(rename = "12-bit")]
    Bits12,
    #[serde(rename = "14-bit")]
    Bits14,
    #[serde(rename = "15-bit")]
    Bits15,
    #[serde(rename = "16-bit")]
    Bits16,
}

impl Resolution {
    /// Vendor `PS5000A_DEVICE_RESOLUTION` value.
    pub fn code(self) -> i32 {
        match self {
            Self::Bits8 => 0,
            Self::Bits12 => 1,
            Self::Bits14 => 2,
            Self::Bits15 => 3,
            Self::Bits16 => 4,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits12 => 12,
            Self::Bits14 => 14,
            Self::Bits15 => 15,
            Self::Bits16 => 16,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Per-channel front-end setup passed to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub coupling: Coupling,
    pub range: VoltageRange,
    /// Offset added to the input before digitization, in volts.
    pub analog_offset: f32,
}

impl ChannelSettings {
    pub fn dc(range: VoltageRange) -> Self {
        Self {
            enabled: true,
            coupling: Coupling::Dc,
            range,
            analog_offset: 0.0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            coupling: Coupling::Dc,
            range: VoltageRange::V5,
            analog_offset: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names() {
        assert_eq!(Channel::A.column_name(), "ChA_mV");
        assert_eq!(Channel::D.column_name(), "ChD_mV");
    }

    #[test]
    fn test_range_codes_are_ordered() {
        assert_eq!(VoltageRange::Mv10.code(), 0);
        assert_eq!(VoltageRange::V5.code(), 8);
        assert_eq!(VoltageRange::V10.full_scale_mv(), 10_000.0);
    }
}
