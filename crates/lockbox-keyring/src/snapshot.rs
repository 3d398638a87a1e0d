//! Keyring exchange formats.

use lockbox_core::PathExp;
use serde::{Deserialize, Serialize};

use crate::claim::Claim;
use crate::wrap::KeyWrap;

/// A full keyring: its claim chain and every wrap issued so far.
///
/// This is what the registry stores and serves. It holds no key in
/// cleartext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringSnapshot {
    pub scope: PathExp,
    pub claims: Vec<Claim>,
    pub wraps: Vec<KeyWrap>,
}

/// The claims and wraps appended by one keyring mutation.
///
/// `base_len` is the chain length the mutation started from; the registry
/// rejects an update whose base no longer matches its stored chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringUpdate {
    pub scope: PathExp,
    pub base_len: u64,
    pub claims: Vec<Claim>,
    pub wraps: Vec<KeyWrap>,
}

impl KeyringUpdate {
    /// Chain length after the update is applied.
    pub fn new_len(&self) -> u64 {
        self.base_len + self.claims.len() as u64
    }
}
