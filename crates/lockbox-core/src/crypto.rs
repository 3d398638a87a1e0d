//! Ed25519 signing keys and the identity ids derived from them.
//!
//! An identity id is a keyed BLAKE3 digest of the verifying key, so any
//! claim can be checked from its signer's public key alone.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::IdentityId;

const IDENTITY_ID_CONTEXT: &str = "lockbox identity-id v1";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(#[serde(with = "crate::wire::hex_array")] pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The id of the identity that owns this key.
    pub fn identity_id(&self) -> IdentityId {
        IdentityId(blake3::derive_key(IDENTITY_ID_CONTEXT, &self.0))
    }

    /// Check `signature` over `message`.
    ///
    /// Bytes that are not a valid curve point fail with
    /// [`CoreError::InvalidPublicKey`]; everything else that does not verify
    /// is [`CoreError::InvalidSignature`].
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|_| CoreError::InvalidPublicKey)?
            .verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({}..)", hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Signature(#[serde(with = "crate::wire::hex_array")] pub [u8; 64]);

impl Ed25519Signature {
    /// All zeroes. Placeholder for a claim body that is about to be signed;
    /// it never verifies.
    pub const ZERO: Self = Self([0u8; 64]);

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}..)", hex::encode(&self.0[..8]))
    }
}

/// An identity's signing half.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Deterministic keypair from a 32-byte seed. Master keys derive their
    /// signing seed and feed it through here.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn identity_id(&self) -> IdentityId {
        self.public_key().identity_id()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keypair").field(&self.public_key()).finish()
    }
}
