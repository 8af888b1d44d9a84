//! Error taxonomy shared by the STUN, ICE and SDP layers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtcError {
    /// Bad caller input. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{name} out of range: {value}")]
    OutOfRange { name: &'static str, value: i64 },

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    /// Transport or socket failure. The only retryable kind.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Malformed or mismatched STUN/SDP data.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RtcError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RtcError::ConnectionFailure(_))
    }
}

impl From<std::io::Error> for RtcError {
    fn from(e: std::io::Error) -> Self {
        RtcError::ConnectionFailure(e.to_string())
    }
}

pub type RtcResult<T> = Result<T, RtcError>;
