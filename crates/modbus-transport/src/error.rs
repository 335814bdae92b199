use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timeout")]
    Timeout,
    #[error("framing error: {0}")]
    Framing(String),
    #[error("device not responding: {0}")]
    DeviceNotResponding(String),
    #[error("device exception: {0}")]
    Exception(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Faults caused by line noise or a busy device; a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_)
                | TransportError::Timeout
                | TransportError::Framing(_)
                | TransportError::DeviceNotResponding(_)
                | TransportError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceptions_are_not_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Framing("crc".into()).is_transient());
        assert!(!TransportError::Exception("illegal data address".into()).is_transient());
        assert!(!TransportError::Unsupported("x").is_transient());
    }
}
