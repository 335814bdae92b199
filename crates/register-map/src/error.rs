use modbus_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = RegisterError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("unknown metric group: {0}")]
    UnknownGroup(String),
    #[error("duplicate metric in schema: {0}")]
    DuplicateMetric(String),
    #[error("invalid register spec for {metric}: {reason}")]
    InvalidSpec { metric: String, reason: String },
    #[error("invalid decode rule: {0}")]
    InvalidRule(String),
    #[error("malformed response: expected {expected} words, got {actual}")]
    MalformedResponse { expected: usize, actual: usize },
    #[error("read of {metric} failed: {source}")]
    ReadFailed {
        metric: String,
        #[source]
        source: TransportError,
    },
    #[error("read of {0} cancelled")]
    Cancelled(String),
}

impl RegisterError {
    /// Errors that indicate a static schema mistake rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegisterError::UnknownMetric(_)
                | RegisterError::UnknownGroup(_)
                | RegisterError::DuplicateMetric(_)
                | RegisterError::InvalidSpec { .. }
                | RegisterError::InvalidRule(_)
                | RegisterError::Cancelled(_)
        )
    }
}
