//! Master-key sealing.
//!
//! Every user and machine token carries a [`MasterKey`]: a random 32-byte
//! master secret sealed with ChaCha20-Poly1305 under a key derived from the
//! passphrase with Argon2id. The identity's signing and wrapping keys are
//! derived from the master secret, so knowing the passphrase is what grants
//! the daemon the ability to act as the identity.

use argon2::{Algorithm, Argon2, Params, Version};
use lockbox_core::{KdfParams, Keypair, MasterKey, MasterKeyAlg};
use rand::RngCore;

use crate::crypto::{EncryptionKey, EncryptionNonce, X25519StaticSecret};
use crate::error::{KeyringError, Result};
use crate::identity::IdentityKeys;

/// Salt length for key derivation.
pub const SALT_LEN: usize = 16;

/// Upper bounds on the Argon2 cost a sealed key may ask for. Sealed keys come
/// from the registry and are rejected above these before any hashing.
pub const MAX_MEMORY_KIB: u32 = 4 * 65536;
pub const MAX_ITERATIONS: u32 = 4 * 3;
pub const MAX_PARALLELISM: u32 = 4 * 4;

const SIGNING_CONTEXT: &str = "lockbox master v1 signing-key";
const ENCRYPTION_CONTEXT: &str = "lockbox master v1 encryption-key";

/// A plaintext master secret.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterSecret([u8; 32]);

impl MasterSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministically derive the identity keys owned by this secret.
    pub fn identity_keys(&self) -> IdentityKeys {
        let signing = blake3::derive_key(SIGNING_CONTEXT, &self.0);
        let encryption = blake3::derive_key(ENCRYPTION_CONTEXT, &self.0);
        IdentityKeys::new(
            Keypair::from_seed(&signing),
            X25519StaticSecret::from_bytes(encryption),
        )
    }

    /// Seal under `passphrase` with a fresh salt and nonce.
    pub fn seal(&self, passphrase: &[u8], params: KdfParams) -> Result<MasterKey> {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let nonce = EncryptionNonce::generate();

        let kek = derive_key_encryption_key(passphrase, &salt, &params)?;
        let value = kek.encrypt(&self.0, &nonce)?;

        Ok(MasterKey {
            alg: MasterKeyAlg::Argon2idChacha20poly1305,
            params,
            salt,
            nonce: *nonce.as_bytes(),
            value,
        })
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

/// Recover the master secret from its sealed form.
///
/// A wrong passphrase and a tampered ciphertext are indistinguishable and
/// both fail with [`KeyringError::UnsealFailed`].
pub fn unseal(master: &MasterKey, passphrase: &[u8]) -> Result<MasterSecret> {
    match master.alg {
        MasterKeyAlg::Argon2idChacha20poly1305 => {}
    }
    let kek = derive_key_encryption_key(passphrase, &master.salt, &master.params)?;
    let plaintext = kek
        .decrypt(&master.value, &EncryptionNonce::from_bytes(master.nonce))
        .map_err(|_| KeyringError::UnsealFailed)?;

    let bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| KeyringError::UnsealFailed)?;
    Ok(MasterSecret(bytes))
}

fn derive_key_encryption_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<EncryptionKey> {
    check_cost(params)?;
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| KeyringError::KeyDerivationError(format!("invalid argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| KeyringError::KeyDerivationError(e.to_string()))?;

    Ok(EncryptionKey::from_bytes(key))
}

fn check_cost(params: &KdfParams) -> Result<()> {
    if params.memory_kib > MAX_MEMORY_KIB
        || params.iterations > MAX_ITERATIONS
        || params.parallelism > MAX_PARALLELISM
    {
        return Err(KeyringError::KeyDerivationError(format!(
            "argon2 cost m={} t={} p={} exceeds m={} t={} p={}",
            params.memory_kib,
            params.iterations,
            params.parallelism,
            MAX_MEMORY_KIB,
            MAX_ITERATIONS,
            MAX_PARALLELISM
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_seal_unseal() {
        let secret = MasterSecret::generate();
        let sealed = secret.seal(b"correct horse", fast()).unwrap();

        assert_eq!(unseal(&sealed, b"correct horse").unwrap(), secret);
    }

    #[test]
    fn test_wrong_passphrase() {
        let sealed = MasterSecret::generate().seal(b"correct horse", fast()).unwrap();
        assert!(matches!(
            unseal(&sealed, b"battery staple"),
            Err(KeyringError::UnsealFailed)
        ));
    }

    #[test]
    fn test_identity_keys_are_deterministic() {
        let secret = MasterSecret::from_bytes([5; 32]);
        let a = secret.identity_keys().public();
        let b = secret.identity_keys().public();
        assert_eq!(a, b);
        assert!(a.is_self_certifying());

        let other = MasterSecret::from_bytes([6; 32]).identity_keys().public();
        assert_ne!(a.id, other.id);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(matches!(
            MasterSecret::generate().seal(b"pw", params),
            Err(KeyringError::KeyDerivationError(_))
        ));
    }

    #[test]
    fn test_excessive_cost_rejected_before_hashing() {
        let sealed = MasterSecret::generate().seal(b"pw", fast()).unwrap();

        let mut memory = sealed.clone();
        memory.params.memory_kib = u32::MAX;
        let mut iterations = sealed.clone();
        iterations.params.iterations = MAX_ITERATIONS + 1;
        let mut lanes = sealed.clone();
        lanes.params.parallelism = 1024;

        for tampered in [memory, iterations, lanes] {
            assert!(matches!(
                unseal(&tampered, b"pw"),
                Err(KeyringError::KeyDerivationError(_))
            ));
        }

        // The default cost is within bounds.
        assert!(check_cost(&KdfParams::default()).is_ok());
    }
}
