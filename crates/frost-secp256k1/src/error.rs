//! Error types for context, marshaling and protocol operations

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the context layer and the FROST protocol engines.
///
/// A declined primitive operation (invalid scalar, failed verification) is
/// *not* an error: those come back as `Ok(None)` or `Ok(false)` from the
/// wrapper in question.
#[derive(Debug, Error)]
pub enum Error {
    /// Argument size outside the bounds the primitive accepts; rejected
    /// before any engine call is made
    #[error("invalid {what} length: {len}")]
    InvalidInputLength { what: &'static str, len: usize },

    /// The engine declared a result length that disagrees with the payload
    /// it produced; contract violation between this layer and the engine
    #[error("engine length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Operation attempted after the context was destroyed
    #[error("crypto context has been destroyed")]
    ContextUnavailable,

    /// Invalid session configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Participant index outside the signer set
    #[error("invalid participant index: {0}")]
    InvalidParticipant(usize),

    /// A share, commitment or proof failed verification
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The protocol instance aborted and must not be reused
    #[error("protocol aborted: {0}")]
    ProtocolAborted(String),

    /// A round operation was called out of order for the session state
    #[error("invalid session state: expected {expected}, in {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Aggregation produced a signature that does not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Transport/relay error
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
