//! Sealing credential values under a keyring key.

use lockbox_core::{SealAlg, SealedValue};

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::Result;

/// Encrypt `plaintext` under the keyring key of `key_version`.
pub fn seal(key: &EncryptionKey, key_version: u32, plaintext: &[u8]) -> Result<SealedValue> {
    let nonce = EncryptionNonce::generate();
    let ciphertext = key.encrypt(plaintext, &nonce)?;
    Ok(SealedValue {
        alg: SealAlg::Chacha20poly1305,
        key_version,
        nonce: *nonce.as_bytes(),
        ciphertext,
    })
}

/// Decrypt a sealed value. The caller resolves the key for
/// `sealed.key_version`.
pub fn open(key: &EncryptionKey, sealed: &SealedValue) -> Result<Vec<u8>> {
    match sealed.alg {
        SealAlg::Chacha20poly1305 => {
            key.decrypt(&sealed.ciphertext, &EncryptionNonce::from_bytes(sealed.nonce))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let sealed = seal(&key, 3, b"s3cr3t").unwrap();
        assert_eq!(sealed.key_version, 3);
        assert_eq!(open(&key, &sealed).unwrap(), b"s3cr3t");
    }

    #[test]
    fn test_open_with_other_version_key_fails() {
        let v1 = EncryptionKey::generate();
        let v2 = EncryptionKey::generate();
        let sealed = seal(&v1, 1, b"s3cr3t").unwrap();
        assert!(open(&v2, &sealed).is_err());
    }
}
