//! Error types for the registry transport.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// A structured error returned by the registry.
///
/// The status code travels out of band on the HTTP response; the body is
/// `{"type": <string>, "error": [<string>, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "error", default)]
    pub messages: Vec<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)?;
        if !self.messages.is_empty() {
            write!(f, ": {}", self.messages.join("; "))?;
        }
        Ok(())
    }
}

/// Errors that can occur talking to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connection, TLS, or client timeout failure. Retryable.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("malformed response from registry: {0}")]
    MalformedResponse(String),

    /// The registry answered with a structured error.
    #[error("registry error: {0}")]
    Api(ApiError),

    /// The registry answered non-2xx with an empty body.
    #[error("error from registry, status {0}")]
    Status(u16),

    /// The caller cancelled the call or its deadline passed.
    #[error("request cancelled")]
    Cancelled,

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A returned envelope failed to decode.
    #[error("core error: {0}")]
    Core(#[from] lockbox_core::CoreError),
}

impl RegistryError {
    /// HTTP status of the failure, if the registry answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Api(e) => Some(e.status),
            RegistryError::Status(status) => Some(*status),
            _ => None,
        }
    }

    /// True for the optimistic concurrency rejection on keyring updates.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
