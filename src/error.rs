use thiserror::Error;

/// Errors surfaced by the loopback device and its buffering core.
///
/// `Underflow` and `Overflow` are expected during normal streaming and are
/// safe to retry; everything else indicates a configuration problem or a
/// caller defect and must not be retried.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No samples available to read")]
    Underflow,

    #[error("No space available to write")]
    Overflow,

    #[error("Timed out waiting for buffer availability")]
    Timeout,

    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("Channel buffer too small: need {needed} bytes, have {len}")]
    ShortBuffer { needed: usize, len: usize },

    #[error("Stream disagrees in {what} ({requested} != {existing}) with previously-setup stream")]
    ConfigurationConflict {
        what: &'static str,
        requested: usize,
        existing: usize,
    },

    #[error("Buffer protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid channel selection: {0}")]
    InvalidChannelSelection(String),

    #[error("Stream state error: {0}")]
    StreamState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),
}

impl DeviceError {
    /// True for conditions that clear on their own as the other side of the
    /// loopback makes progress. Callers may retry these; every other variant
    /// is a contract violation and retrying it would mask a defect.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Underflow | DeviceError::Overflow)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
