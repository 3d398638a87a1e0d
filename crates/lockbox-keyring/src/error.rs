//! Error types for keyrings and the claim chain.

use lockbox_core::{IdentityId, PathExp};
use thiserror::Error;

/// Errors that can occur during keyring operations.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// The actor is not an active member of the keyring.
    #[error("{actor} is not authorized to change keyring {scope}")]
    NotAuthorized { scope: PathExp, actor: IdentityId },

    /// The identity holds no usable wrap for the requested key version.
    #[error("{identity} has no access to keyring {scope} at key version {version}")]
    AccessDenied {
        scope: PathExp,
        identity: IdentityId,
        version: u32,
    },

    /// A claim failed validation and was not appended.
    #[error("invalid claim for {scope}: {reason}")]
    InvalidClaim { scope: PathExp, reason: String },

    #[error("keyring already exists: {0}")]
    KeyringExists(PathExp),

    #[error("keyring not found: {0}")]
    KeyringNotFound(PathExp),

    #[error("{identity} is already a member of {scope}")]
    AlreadyMember { scope: PathExp, identity: IdentityId },

    #[error("{identity} is not a member of {scope}")]
    NotMember { scope: PathExp, identity: IdentityId },

    /// Revoking this member would leave the keyring without members.
    #[error("cannot revoke the last member of {0}")]
    LastMember(PathExp),

    /// Wrong passphrase or tampered master key.
    #[error("failed to unseal master key")]
    UnsealFailed,

    #[error("key derivation error: {0}")]
    KeyDerivationError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("core error: {0}")]
    CoreError(#[from] lockbox_core::CoreError),
}

impl KeyringError {
    pub(crate) fn invalid_claim(scope: &PathExp, reason: impl Into<String>) -> Self {
        KeyringError::InvalidClaim {
            scope: scope.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type for keyring operations.
pub type Result<T> = std::result::Result<T, KeyringError>;
