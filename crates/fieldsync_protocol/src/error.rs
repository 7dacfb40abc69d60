//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by encoding or by invalid lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A value could not be encoded to CBOR.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded from CBOR.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record payload was decoded as the wrong entity type.
    #[error("entity type mismatch: expected {expected}, found {found}")]
    EntityTypeMismatch {
        /// The type the caller asked for.
        expected: String,
        /// The type stored on the record.
        found: String,
    },

    /// An outbox entry was asked to make a transition its status forbids.
    #[error("invalid outbox transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidTransition {
            from: "COMPLETED".into(),
            to: "IN_FLIGHT".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid outbox transition from COMPLETED to IN_FLIGHT"
        );

        let err = ProtocolError::EntityTypeMismatch {
            expected: "task".into(),
            found: "chat_message".into(),
        };
        assert!(err.to_string().contains("chat_message"));
    }
}
