//! Key wraps: a keyring key encrypted for one identity.
//!
//! Wrapping uses an ephemeral X25519 key agreement with the recipient's
//! encryption key. The derived wrapping key is bound to the scope, the
//! recipient, and the key version, so a wrap cannot be replayed as a wrap
//! for another keyring or version.

use lockbox_core::{IdentityId, PathExp};
use serde::{Deserialize, Serialize};

use crate::crypto::{sender_key, EncryptionKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
use crate::error::{KeyringError, Result};
use crate::identity::PublicIdentity;

/// A keyring member's copy of one key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWrap {
    pub scope: PathExp,
    pub identity: IdentityId,
    pub key_version: u32,

    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: X25519PublicKey,

    pub nonce: EncryptionNonce,

    /// The keyring key, encrypted with the derived wrapping key.
    #[serde(with = "lockbox_core::wire::base64_bytes")]
    pub wrapped_key: Vec<u8>,
}

impl KeyWrap {
    /// Wrap `key` for `recipient`.
    pub fn create(
        scope: &PathExp,
        recipient: &PublicIdentity,
        key_version: u32,
        key: &EncryptionKey,
    ) -> Result<Self> {
        let context = wrap_context(scope, &recipient.id, key_version);
        let (ephemeral_public, wrap_key) = sender_key(&recipient.encryption_key, &context);

        let nonce = EncryptionNonce::generate();
        let wrapped_key = wrap_key.encrypt(key.as_bytes(), &nonce)?;

        Ok(Self {
            scope: scope.clone(),
            identity: recipient.id,
            key_version,
            ephemeral_public,
            nonce,
            wrapped_key,
        })
    }

    /// Recover the keyring key with the recipient's secret.
    pub fn unwrap_key(&self, recipient_secret: &X25519StaticSecret) -> Result<EncryptionKey> {
        let context = wrap_context(&self.scope, &self.identity, self.key_version);
        let wrap_key = recipient_secret.receiver_key(&self.ephemeral_public, &context);

        let key_bytes = wrap_key.decrypt(&self.wrapped_key, &self.nonce)?;
        let bytes: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            KeyringError::DecryptionError(format!(
                "invalid key length: expected 32, got {}",
                key_bytes.len()
            ))
        })?;
        Ok(EncryptionKey::from_bytes(bytes))
    }
}

fn wrap_context(scope: &PathExp, identity: &IdentityId, key_version: u32) -> Vec<u8> {
    let scope = scope.to_string();
    let mut context = Vec::with_capacity(scope.len() + 1 + 32 + 4);
    context.extend_from_slice(scope.as_bytes());
    context.push(0);
    context.extend_from_slice(identity.as_bytes());
    context.extend_from_slice(&key_version.to_be_bytes());
    context
}
