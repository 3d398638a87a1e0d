//! # Lockbox Core
//!
//! Pure primitives shared by every lockbox crate: identifiers, signatures,
//! canonical encoding, the versioned envelope codec, credential and identity
//! bodies, and path expressions.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Envelope`] - `{id, version, body}` wrapper decoded through a closed table
//! - [`Credential`] - credential body, version 1 or 2
//! - [`PrincipalEnvelope`] - user, machine, or machine token envelope
//! - [`PathExp`] - hierarchical path expression
//!
//! ## Canonicalization
//!
//! Signed structures are encoded using deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod credential;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod pathexp;
pub mod types;
pub mod wire;

pub use canonical::{canonical_bytes, domain_bytes};
pub use credential::{
    BaseCredential, Credential, CredentialEnvelope, CredentialState, CredentialV2, SealAlg,
    SealedValue,
};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use envelope::{DecodeFn, DecodeTable, Envelope, RawEnvelope, Versioned};
pub use error::{CoreError, Result};
pub use identity::{
    IdentityState, KdfParams, Machine, MachineToken, MasterKey, MasterKeyAlg, PrincipalEnvelope,
    RawPrincipal, User,
};
pub use pathexp::{CredentialPath, PathExp, Segment};
pub use types::{ClaimId, CredentialId, IdentityId};
