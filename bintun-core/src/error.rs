//! Error types produced by the tunnel engine.

use crate::protocol::DeviceId;
use std::fmt;
use std::io;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Stable error codes delivered through the error event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0,
    /// `send` targeted a peer that is unknown or not connected.
    DeviceNotConnected = 1,
    /// A connected peer went quiet and was marked lost.
    DeviceLost = 2,
    /// A peer answered one of our frames with a negative acknowledgement.
    IncorrectFormat = 3,
}

impl ErrorCode {
    /// Stable numeric value.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::DeviceNotConnected => "DEVICE_NOT_CONNECTED",
            ErrorCode::DeviceLost => "DEVICE_LOST",
            ErrorCode::IncorrectFormat => "INCORRECT_FORMAT_ERROR",
        };
        f.write_str(name)
    }
}

/// Errors returned by engine operations.
///
/// Intentionally minimal: only what `send`, `connect`, `disconnect` and
/// `poll` actually produce. Frame validation failures never surface
/// here; the engine answers them on the wire.
#[derive(Debug)]
pub enum TunnelError {
    /// The target peer is unknown or not in the connected state.
    NotConnected { device: DeviceId },
    /// Data frames require at least one payload byte.
    EmptyPayload,
    /// The payload exceeds what the one-byte size field can carry.
    PayloadTooLarge { size: usize },
    /// The configuration failed validation.
    Config { message: String },
    /// The underlying wire failed.
    Io(io::Error),
}

impl TunnelError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        TunnelError::Config {
            message: message.into(),
        }
    }

    /// True for wire failures, which the host may want to treat as
    /// fatal; everything else is a per-call rejection.
    pub fn is_io(&self) -> bool {
        matches!(self, TunnelError::Io(_))
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::NotConnected { device } => {
                write!(f, "device {device} is not connected")
            }
            TunnelError::EmptyPayload => write!(f, "data frames require a payload"),
            TunnelError::PayloadTooLarge { size } => {
                write!(f, "payload of {size} bytes exceeds the frame size field")
            }
            TunnelError::Config { message } => write!(f, "configuration error: {message}"),
            TunnelError::Io(e) => write!(f, "wire error: {e}"),
        }
    }
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunnelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TunnelError {
    fn from(e: io::Error) -> Self {
        TunnelError::Io(e)
    }
}
