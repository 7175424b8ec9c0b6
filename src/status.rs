//! Vendor status vocabulary and the per-session record of command outcomes.

use std::fmt;

/// Status code returned by every command of the digitizer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicoStatus {
    Ok,
    MaxUnitsOpened,
    MemoryFail,
    NotFound,
    FwFail,
    OpenOperationInProgress,
    OperationFailed,
    NotResponding,
    ConfigFail,
    InvalidHandle,
    InvalidParameter,
    InvalidTimebase,
    InvalidVoltageRange,
    InvalidChannel,
    InvalidTriggerChannel,
    BlockModeFailed,
    TooManySamples,
    Busy,
    PowerSupplyConnected,
    PowerSupplyNotConnected,
    Usb3DeviceNonUsb3Port,
    Other(u32),
}

impl PicoStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::MaxUnitsOpened,
            0x02 => Self::MemoryFail,
            0x03 => Self::NotFound,
            0x04 => Self::FwFail,
            0x05 => Self::OpenOperationInProgress,
            0x06 => Self::OperationFailed,
            0x07 => Self::NotResponding,
            0x08 => Self::ConfigFail,
            0x0C => Self::InvalidHandle,
            0x0D => Self::InvalidParameter,
            0x0E => Self::InvalidTimebase,
            0x0F => Self::InvalidVoltageRange,
            0x10 => Self::InvalidChannel,
            0x11 => Self::InvalidTriggerChannel,
            0x15 => Self::BlockModeFailed,
            0x1D => Self::TooManySamples,
            0x27 => Self::Busy,
            0x119 => Self::PowerSupplyConnected,
            0x11A => Self::PowerSupplyNotConnected,
            0x11E => Self::Usb3DeviceNonUsb3Port,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0x00,
            Self::MaxUnitsOpened => 0x01,
            Self::MemoryFail => 0x02,
            Self::NotFound => 0x03,
            Self::FwFail => 0x04,
            Self::OpenOperationInProgress => 0x05,
            Self::OperationFailed => 0x06,
            Self::NotResponding => 0x07,
            Self::ConfigFail => 0x08,
            Self::InvalidHandle => 0x0C,
            Self::InvalidParameter => 0x0D,
            Self::InvalidTimebase => 0x0E,
            Self::InvalidVoltageRange => 0x0F,
            Self::InvalidChannel => 0x10,
            Self::InvalidTriggerChannel => 0x11,
            Self::BlockModeFailed => 0x15,
            Self::TooManySamples => 0x1D,
            Self::Busy => 0x27,
            Self::PowerSupplyConnected => 0x119,
            Self::PowerSupplyNotConnected => 0x11A,
            Self::Usb3DeviceNonUsb3Port => 0x11E,
            Self::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Open outcomes that are fixed by switching the power source
    /// rather than by giving up on the unit.
    pub fn is_power_source_condition(self) -> bool {
        matches!(
            self,
            Self::PowerSupplyNotConnected | Self::Usb3DeviceNonUsb3Port
        )
    }
}

impl fmt::Display for PicoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:X})", self, self.code())
    }
}

/// Commands of the device surface, named as they appear in the status log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    OpenUnit,
    ChangePowerSource,
    SetChannel,
    MaximumValue,
    SetSimpleTrigger,
    GetTimebase,
    RunBlock,
    IsReady,
    SetDataBuffers,
    GetValues,
    Stop,
    CloseUnit,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenUnit => "open_unit",
            Self::ChangePowerSource => "change_power_source",
            Self::SetChannel => "set_channel",
            Self::MaximumValue => "maximum_value",
            Self::SetSimpleTrigger => "set_simple_trigger",
            Self::GetTimebase => "get_timebase",
            Self::RunBlock => "run_block",
            Self::IsReady => "is_ready",
            Self::SetDataBuffers => "set_data_buffers",
            Self::GetValues => "get_values",
            Self::Stop => "stop",
            Self::CloseUnit => "close_unit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of a single device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub command: Command,
    pub status: PicoStatus,
}

/// Ordered record of every command a session issued.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    entries: Vec<StatusEntry>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, command: Command, status: PicoStatus) -> StatusEntry {
        let entry = StatusEntry { command, status };
        log::debug!("{} -> {}", command, status);
        self.entries.push(entry);
        entry
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    /// Latest outcome of `command`, if it was ever issued.
    pub fn last(&self, command: Command) -> Option<PicoStatus> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.command == command)
            .map(|e| e.status)
    }

    pub fn count(&self, command: Command) -> usize {
        self.entries.iter().filter(|e| e.command == command).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_source_codes() {
        assert!(PicoStatus::from_code(282).is_power_source_condition());
        assert!(PicoStatus::from_code(286).is_power_source_condition());
        assert!(!PicoStatus::from_code(3).is_power_source_condition());
        assert!(!PicoStatus::Ok.is_power_source_condition());
    }

    #[test]
    fn test_unknown_code_survives() {
        let status = PicoStatus::from_code(0x4242);
        assert_eq!(status, PicoStatus::Other(0x4242));
        assert_eq!(status.code(), 0x4242);
    }

    #[test]
    fn test_status_log_last_and_count() {
        let mut log = StatusLog::new();
        log.record(Command::IsReady, PicoStatus::Ok);
        log.record(Command::IsReady, PicoStatus::Busy);
        assert_eq!(log.count(Command::IsReady), 2);
        assert_eq!(log.last(Command::IsReady), Some(PicoStatus::Busy));
        assert_eq!(log.last(Command::CloseUnit), None);
    }
}
