//! Identity key material.

use lockbox_core::{Ed25519PublicKey, IdentityId, Keypair};
use serde::{Deserialize, Serialize};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};

/// The public half of an identity, as recorded in AddMember claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub id: IdentityId,
    pub signing_key: Ed25519PublicKey,
    pub encryption_key: X25519PublicKey,
}

impl PublicIdentity {
    /// True if `id` is the id owned by `signing_key`.
    pub fn is_self_certifying(&self) -> bool {
        self.signing_key.identity_id() == self.id
    }
}

/// The private key material of one identity.
///
/// Derived from the identity's master secret; never leaves the daemon.
#[derive(Clone)]
pub struct IdentityKeys {
    signing: Keypair,
    encryption: X25519StaticSecret,
}

impl IdentityKeys {
    pub fn new(signing: Keypair, encryption: X25519StaticSecret) -> Self {
        Self {
            signing,
            encryption,
        }
    }

    /// Fresh random keys, not tied to any master secret.
    pub fn generate() -> Self {
        Self::new(Keypair::generate(), X25519StaticSecret::generate())
    }

    pub fn id(&self) -> IdentityId {
        self.signing.identity_id()
    }

    pub fn signing(&self) -> &Keypair {
        &self.signing
    }

    pub fn encryption(&self) -> &X25519StaticSecret {
        &self.encryption
    }

    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id(),
            signing_key: self.signing.public_key(),
            encryption_key: self.encryption.public_key(),
        }
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKeys({:?})", self.id())
    }
}
