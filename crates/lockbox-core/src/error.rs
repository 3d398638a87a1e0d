//! Error types for lockbox core.

use thiserror::Error;

/// Errors raised by the core primitives and the envelope codec.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    /// The envelope version is not registered for this payload kind.
    #[error("unknown {kind} version: {version}")]
    UnknownVersion { kind: &'static str, version: i64 },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid path expression {input:?}: {reason}")]
    InvalidPath { input: String, reason: String },
}

impl CoreError {
    pub(crate) fn invalid_path(input: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidPath {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
