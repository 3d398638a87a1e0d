//! # Lockbox Keyring
//!
//! Access control for credentials.
//!
//! ## Overview
//!
//! Every credential scope (a path expression such as `/org1/proj1/*`) is
//! protected by a keyring: a symmetric key, versioned, of which each member
//! holds a copy wrapped for its own X25519 key. Who is a member is never
//! stored as a flag. It is the result of folding the scope's signed claim
//! chain.
//!
//! ## Key Concepts
//!
//! - **Claim**: signed AddMember, RevokeMember, or Rotate record
//! - **Membership**: the fold of a claim chain; active members and key version
//! - **KeyWrap**: one member's copy of one key version
//! - **MasterKey**: passphrase-sealed secret from which identity keys derive
//!
//! ## Encryption Model
//!
//! 1. **Keyring key**: ChaCha20-Poly1305 key that seals credential values
//! 2. **Wraps**: the keyring key encrypted per member via X25519 ECDH
//!
//! Revocation rotates to a new key wrapped only for the remaining members.
//! Values sealed under older versions stay readable to current members that
//! hold those versions; re-encrypting them is a separate operation.

pub mod chain;
pub mod claim;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod master;
pub mod sealed;
pub mod snapshot;
pub mod wrap;

pub use chain::{fold, Membership};
pub use claim::{Claim, ClaimAction, ClaimBody};
pub use crypto::{EncryptionKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
pub use engine::{KeyringEngine, ResolvedKey};
pub use error::{KeyringError, Result};
pub use identity::{IdentityKeys, PublicIdentity};
pub use master::{unseal, MasterSecret};
pub use snapshot::{KeyringSnapshot, KeyringUpdate};
pub use wrap::KeyWrap;
