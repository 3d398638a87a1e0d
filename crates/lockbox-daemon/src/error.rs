//! Error types for the daemon.

use std::fmt;

use lockbox_core::{CoreError, IdentityId, PathExp};
use lockbox_keyring::KeyringError;
use lockbox_registry::RegistryError;
use thiserror::Error;

/// Errors raised by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot overwrite existing session")]
    AlreadyLoggedIn,

    #[error("please login to perform that command")]
    NotLoggedIn,

    /// An envelope is missing or its body does not fit the session type.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("passphrase and token must not be empty")]
    EmptyCredential,

    /// A session type string from outside the process was not recognized.
    #[error("unknown session type: {0:?}")]
    UnknownType(String),
}

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The registry could not be reached or the call was cut short. Retry.
    Transport,
    /// Malformed data or version skew. Not retryable.
    Protocol,
    /// Not logged in, already logged in, or the session cannot act.
    Authorization,
    /// The secret exists but this identity cannot decrypt or change it.
    AccessControl,
    /// A claim chain or ciphertext failed verification.
    Integrity,
    /// The request itself is malformed or names something that does not exist.
    Input,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::AccessControl => "access_control",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::Input => "input",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The master key unsealed to keys of a different identity.
    #[error("master key belongs to {derived}, session is {expected}")]
    IdentityMismatch {
        expected: IdentityId,
        derived: IdentityId,
    },

    /// No keyring scope covers the path.
    #[error("no keyring covers {0}")]
    NoKeyring(PathExp),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DaemonError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DaemonError::Session(SessionError::UnknownType(_)) => ErrorCategory::Input,
            DaemonError::Session(_) => ErrorCategory::Authorization,
            DaemonError::Keyring(e) => keyring_category(e),
            DaemonError::Registry(e) => registry_category(e),
            DaemonError::Core(e) => core_category(e),
            DaemonError::IdentityMismatch { .. } => ErrorCategory::Authorization,
            DaemonError::NoKeyring(_) => ErrorCategory::AccessControl,
            DaemonError::CredentialNotFound(_)
            | DaemonError::InvalidConfig(_)
            | DaemonError::InvalidRequest(_) => ErrorCategory::Input,
        }
    }
}

fn keyring_category(e: &KeyringError) -> ErrorCategory {
    match e {
        KeyringError::NotAuthorized { .. } | KeyringError::AccessDenied { .. } => {
            ErrorCategory::AccessControl
        }
        KeyringError::InvalidClaim { .. } | KeyringError::DecryptionError(_) => {
            ErrorCategory::Integrity
        }
        KeyringError::UnsealFailed => ErrorCategory::Authorization,
        KeyringError::KeyringExists(_)
        | KeyringError::KeyringNotFound(_)
        | KeyringError::AlreadyMember { .. }
        | KeyringError::NotMember { .. }
        | KeyringError::LastMember(_) => ErrorCategory::Input,
        KeyringError::KeyDerivationError(_) | KeyringError::EncryptionError(_) => {
            ErrorCategory::Protocol
        }
        KeyringError::CoreError(e) => core_category(e),
    }
}

fn registry_category(e: &RegistryError) -> ErrorCategory {
    match e {
        RegistryError::Transport(_) | RegistryError::Cancelled => ErrorCategory::Transport,
        RegistryError::MalformedResponse(_) | RegistryError::Core(_) => ErrorCategory::Protocol,
        RegistryError::InvalidRequest(_) => ErrorCategory::Input,
        RegistryError::Api(_) | RegistryError::Status(_) => match e.status() {
            Some(401) | Some(403) => ErrorCategory::Authorization,
            Some(409) => ErrorCategory::Transport,
            Some(s) if s >= 500 => ErrorCategory::Transport,
            _ => ErrorCategory::Input,
        },
    }
}

fn core_category(e: &CoreError) -> ErrorCategory {
    match e {
        CoreError::InvalidPath { .. } => ErrorCategory::Input,
        CoreError::InvalidSignature => ErrorCategory::Integrity,
        _ => ErrorCategory::Protocol,
    }
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
