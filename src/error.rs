use crate::session::SessionState;
use crate::status::{Command, PicoStatus};
use polars::prelude::PolarsError;

pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Everything that can abort an acquisition. Each hardware failure names the
/// command that failed so a wiring fault can be told apart from a power glitch
/// or an infeasible request.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Failed to open unit {serial}: {command} returned {status}")]
    DeviceOpen {
        serial: String,
        command: Command,
        status: PicoStatus,
    },

    #[error("Configuration rejected: {message}")]
    Configuration {
        command: Option<Command>,
        status: Option<PicoStatus>,
        message: String,
    },

    #[error("Infeasible timebase: {message}")]
    InfeasibleTimebase {
        status: Option<PicoStatus>,
        message: String,
    },

    #[error("Transfer failed in {command}: {message}")]
    Transfer {
        command: Command,
        status: Option<PicoStatus>,
        message: String,
    },

    #[error("Failed to release unit: {command} returned {status}")]
    Close { command: Command, status: PicoStatus },

    #[error("Cannot {operation} while session is {actual:?}")]
    InvalidState {
        operation: &'static str,
        actual: SessionState,
    },

    #[error("Cannot average {samples} samples in runs of {factor}")]
    Decimation { samples: usize, factor: usize },

    #[error("Acquisition cancelled while waiting for the device")]
    Cancelled,

    #[error("Acquisition worker panicked: {0}")]
    Worker(String),

    #[error("Failed to persist bundle: {0}")]
    Persist(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Config(#[from] toml::de::Error),
}

impl AcquisitionError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            command: None,
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(command: Command, status: PicoStatus) -> Self {
        Self::Configuration {
            command: Some(command),
            status: Some(status),
            message: format!("{command} returned {status}"),
        }
    }

    /// Name of the device command that failed, if the error came from hardware.
    pub fn command(&self) -> Option<Command> {
        match self {
            Self::DeviceOpen { command, .. }
            | Self::Transfer { command, .. }
            | Self::Close { command, .. } => Some(*command),
            Self::Configuration { command, .. } => *command,
            Self::InfeasibleTimebase { status, .. } => status.map(|_| Command::GetTimebase),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<PicoStatus> {
        match self {
            Self::DeviceOpen { status, .. } | Self::Close { status, .. } => Some(*status),
            Self::Configuration { status, .. }
            | Self::InfeasibleTimebase { status, .. }
            | Self::Transfer { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_failing_command() {
        let err = AcquisitionError::Transfer {
            command: Command::GetValues,
            status: Some(PicoStatus::NotResponding),
            message: "bulk read failed".to_string(),
        };
        assert_eq!(err.command(), Some(Command::GetValues));
        assert!(err.to_string().contains("get_values"));
    }

    #[test]
    fn test_rejected_configuration_carries_status() {
        let err = AcquisitionError::rejected(Command::SetChannel, PicoStatus::InvalidVoltageRange);
        assert_eq!(err.status(), Some(PicoStatus::InvalidVoltageRange));
        assert!(err.to_string().contains("set_channel"));
    }
}
