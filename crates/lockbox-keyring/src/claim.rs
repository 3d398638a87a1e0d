//! Membership claims.
//!
//! A claim is a signed, immutable record of one membership or rotation
//! event. Claims for a scope form a hash-linked chain: each carries its
//! position (`seq`) and the id of its predecessor (`prev`).

use serde::{Deserialize, Serialize};

use lockbox_core::{
    canonical_bytes, domain_bytes, ClaimId, Ed25519PublicKey, Ed25519Signature, IdentityId,
    Keypair, PathExp,
};

use crate::error::Result;
use crate::identity::PublicIdentity;

/// Domain separator for claim signatures.
pub const CLAIM_DOMAIN: &[u8] = b"lockbox-claim-v1:";

/// What a claim does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimAction {
    /// Adds `member` with a wrap of `key_version`. The founding claim is a
    /// self-signed AddMember at version 1.
    AddMember {
        member: PublicIdentity,
        key_version: u32,
    },

    /// Removes `target` from the active set. Always followed by a Rotate.
    RevokeMember { target: IdentityId },

    /// Moves the keyring to `key_version`.
    Rotate { key_version: u32 },
}

impl ClaimAction {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClaimAction::AddMember { .. } => "add_member",
            ClaimAction::RevokeMember { .. } => "revoke_member",
            ClaimAction::Rotate { .. } => "rotate",
        }
    }
}

/// The signed part of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimBody {
    pub scope: PathExp,
    pub seq: u64,
    pub prev: Option<ClaimId>,
    pub action: ClaimAction,
    pub actor: Ed25519PublicKey,

    /// Unix milliseconds. Informational; ordering comes from `seq`.
    pub timestamp: i64,
}

/// A signed claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub body: ClaimBody,
    pub signature: Ed25519Signature,
}

impl Claim {
    /// Sign `body` with the actor's keypair.
    pub fn sign(body: ClaimBody, keypair: &Keypair) -> Result<Self> {
        let message = domain_bytes(CLAIM_DOMAIN, &body)?;
        let signature = keypair.sign(&message);
        Ok(Self { body, signature })
    }

    /// Check the signature against the embedded actor key.
    pub fn verify_signature(&self) -> Result<()> {
        let message = domain_bytes(CLAIM_DOMAIN, &self.body)?;
        self.body.actor.verify(&message, &self.signature)?;
        Ok(())
    }

    /// Content address of the claim.
    pub fn id(&self) -> Result<ClaimId> {
        let bytes = canonical_bytes(self)?;
        Ok(ClaimId::from_bytes(*blake3::hash(&bytes).as_bytes()))
    }

    pub fn actor_id(&self) -> IdentityId {
        self.body.actor.identity_id()
    }

    pub fn scope(&self) -> &PathExp {
        &self.body.scope
    }

    pub fn seq(&self) -> u64 {
        self.body.seq
    }

    pub fn action(&self) -> &ClaimAction {
        &self.body.action
    }
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
