//! Key agreement and symmetric sealing.
//!
//! Keyring keys travel to members through an X25519 agreement between a
//! one-shot sender key and the member's static key. The agreed secret is
//! never used directly: it is run through a BLAKE3 derivation bound to a
//! caller-supplied context before it keys ChaCha20-Poly1305.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};

use crate::error::{KeyringError, Result};

const WRAP_KEY_CONTEXT: &str = "lockbox keyring v1 wrap-key";

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

/// Turn an agreed secret into a symmetric key bound to `context`.
fn bind(shared: SharedSecret, context: &[u8]) -> EncryptionKey {
    let digest = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT)
        .update(shared.as_bytes())
        .update(context)
        .finalize();
    EncryptionKey(*digest.as_bytes())
}

/// The half of an X25519 pair that is published on an identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(#[serde(with = "lockbox_core::wire::hex_array")] pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("X25519Pub(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        f.write_str("..)")
    }
}

/// An identity's long-lived X25519 secret. Never serialized.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        Self::from_bytes(random_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0).to_bytes())
    }

    /// The receiving side of [`sender_key`]: agree with the sender's
    /// one-shot public key and bind the result to `context`.
    pub fn receiver_key(&self, sender: &X25519PublicKey, context: &[u8]) -> EncryptionKey {
        bind(self.0.diffie_hellman(&PublicKey::from(sender.0)), context)
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("X25519Secret").field(&self.public_key()).finish()
    }
}

/// Agree a symmetric key with `recipient` using a fresh sender secret.
///
/// Returns the sender's public half, which the recipient needs to derive
/// the same key with [`X25519StaticSecret::receiver_key`]. The sender
/// secret is dropped here and cannot be reused.
pub fn sender_key(recipient: &X25519PublicKey, context: &[u8]) -> (X25519PublicKey, EncryptionKey) {
    let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
    let public = X25519PublicKey(PublicKey::from(&secret).to_bytes());
    let key = bind(secret.diffie_hellman(&PublicKey::from(recipient.0)), context);
    (public, key)
}

/// A ChaCha20-Poly1305 key. Keyring keys, wrapping keys and master-key
/// sealing keys all take this form; none of them leave daemon memory
/// unencrypted.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        self.cipher()
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|_| KeyringError::EncryptionError("aead seal failed".into()))
    }

    /// Fails on a wrong key, a wrong nonce, or any tampering.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        self.cipher()
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| KeyringError::DecryptionError("authentication tag mismatch".into()))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A 96-bit nonce. Always random; never derived from a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(#[serde(with = "lockbox_core::wire::hex_array")] pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_and_receiver_agree() {
        let member = X25519StaticSecret::generate();
        let (sender_public, sent) = sender_key(&member.public_key(), b"ctx");

        assert_eq!(member.receiver_key(&sender_public, b"ctx"), sent);
        assert_ne!(member.receiver_key(&sender_public, b"other"), sent);
    }

    #[test]
    fn test_sender_keys_are_fresh() {
        let member = X25519StaticSecret::generate();
        let (p1, k1) = sender_key(&member.public_key(), b"ctx");
        let (p2, k2) = sender_key(&member.public_key(), b"ctx");
        assert_ne!(p1, p2);
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_seal_and_open() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();

        let sealed = key.encrypt(b"hunter2", &nonce).unwrap();
        assert_ne!(&sealed[..], b"hunter2");
        assert_eq!(key.decrypt(&sealed, &nonce).unwrap(), b"hunter2");

        let other_nonce = EncryptionNonce::from_bytes([7; 12]);
        assert!(key.decrypt(&sealed, &other_nonce).is_err());
    }

    #[test]
    fn test_flipped_bit_is_rejected() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();
        let mut sealed = key.encrypt(b"value", &nonce).unwrap();
        sealed[0] ^= 1;

        assert!(matches!(
            key.decrypt(&sealed, &nonce),
            Err(KeyringError::DecryptionError(_))
        ));
        assert!(EncryptionKey::generate().decrypt(&sealed, &nonce).is_err());
    }

    #[test]
    fn test_static_secret_is_deterministic() {
        let a = X25519StaticSecret::from_bytes([3; 32]);
        let b = X25519StaticSecret::from_bytes([3; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = EncryptionKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
        let secret = X25519StaticSecret::from_bytes([0xcd; 32]);
        assert!(format!("{:?}", secret).starts_with("X25519Secret(X25519Pub("));
    }
}
