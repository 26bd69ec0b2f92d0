use thiserror::Error;

use crate::sans::{FrameError, fields::FieldError};

/// Failure reported by a driver or decoder.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unable to connect to the meter: {0}.")]
    ConnectionFailed(String),

    #[error("Malformed command: {0}.")]
    MalformedCommand(String),

    #[error("Invalid frame received: {0}")]
    Frame(FrameError),

    #[error("Response checksum not matching: {expected:08x} expected, {calculated:08x} gotten")]
    InvalidChecksum { expected: u32, calculated: u32 },

    #[error("Response is missing checksum: {0:?}.")]
    MissingChecksum(String),

    #[error("Invalid response received: {0}.")]
    InvalidResponse(String),

    #[error("Invalid glucose unit received: {0:?}.")]
    InvalidGlucoseUnit(String),

    #[error("Invalid date and time reported by the meter.")]
    InvalidDateTime,

    #[error("Serial number {0:?} is invalid.")]
    InvalidSerialNumber(String),

    #[error("Command rejected by the meter: {0}.")]
    CommandError(String),

    #[error("Operation not supported: {0}.")]
    NotImplemented(&'static str),

    #[error("Readings were already retrieved on this connection.")]
    ReadingsConsumed,

    #[error("Meter is not connected.")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error belongs to the family of malformed device replies:
    /// checksum failures and malformed commands included.
    pub fn is_invalid_response(&self) -> bool {
        matches!(
            self,
            Self::InvalidResponse(_)
                | Self::MalformedCommand(_)
                | Self::InvalidChecksum { .. }
                | Self::MissingChecksum(_)
                | Self::InvalidGlucoseUnit(_)
                | Self::InvalidDateTime
                | Self::InvalidSerialNumber(_)
                | Self::Frame(_)
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Checksum { found, calculated } => Self::InvalidChecksum {
                expected: found,
                calculated,
            },
            FrameError::MissingChecksum(response) => Self::MissingChecksum(response),
            e => Self::Frame(e),
        }
    }
}

impl From<FieldError> for Error {
    fn from(e: FieldError) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
