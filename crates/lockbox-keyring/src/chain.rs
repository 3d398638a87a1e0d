//! Claim chain folding.
//!
//! Membership of a keyring is never stored directly. It is computed by
//! replaying the scope's claims in append order:
//!
//! - AddMember inserts into the active set
//! - RevokeMember removes from the active set
//! - Rotate bumps the key version
//!
//! Every claim after the founding one must be signed by an identity the
//! fold already recognizes as active. The fold is deterministic and has no
//! side effects, so any verifier replaying the same claims reaches the same
//! [`Membership`].

use std::collections::BTreeMap;

use lockbox_core::{ClaimId, IdentityId, PathExp};

use crate::claim::{Claim, ClaimAction};
use crate::error::{KeyringError, Result};
use crate::identity::PublicIdentity;

/// Membership snapshot of one keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    scope: PathExp,
    members: BTreeMap<IdentityId, PublicIdentity>,
    key_version: u32,
    head: Option<ClaimId>,
    len: u64,
    pending_rotation: bool,
}

impl Membership {
    /// The empty membership of a scope with no claims yet.
    pub fn empty(scope: PathExp) -> Self {
        Self {
            scope,
            members: BTreeMap::new(),
            key_version: 0,
            head: None,
            len: 0,
            pending_rotation: false,
        }
    }

    pub fn scope(&self) -> &PathExp {
        &self.scope
    }

    /// Current key version. Zero until the founding claim.
    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Id of the last applied claim.
    pub fn head(&self) -> Option<ClaimId> {
        self.head
    }

    /// Number of applied claims.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_member(&self, id: &IdentityId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member(&self, id: &IdentityId) -> Option<&PublicIdentity> {
        self.members.get(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &PublicIdentity> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// True between a RevokeMember and its Rotate.
    pub fn pending_rotation(&self) -> bool {
        self.pending_rotation
    }

    /// Validate `claim` against this snapshot and apply it.
    ///
    /// On error the snapshot is left unchanged.
    pub fn apply(&mut self, claim: &Claim) -> Result<()> {
        let scope = self.scope.clone();
        let reject = |reason: String| Err(KeyringError::invalid_claim(&scope, reason));

        if claim.scope() != &self.scope {
            return reject(format!("claim belongs to scope {}", claim.scope()));
        }
        if claim.seq() != self.len {
            return reject(format!("expected seq {}, got {}", self.len, claim.seq()));
        }
        if claim.body.prev != self.head {
            return reject("prev does not link to the chain head".into());
        }
        if claim.verify_signature().is_err() {
            return reject(format!("bad signature at seq {}", claim.seq()));
        }

        let actor = claim.actor_id();
        if self.len == 0 {
            match claim.action() {
                ClaimAction::AddMember {
                    member,
                    key_version: 1,
                } if member.signing_key == claim.body.actor => {}
                _ => return reject("founding claim must be a self-signed AddMember at version 1".into()),
            }
        } else if !self.is_member(&actor) {
            return reject(format!("{} is not an active member", actor));
        }

        if self.pending_rotation && !matches!(claim.action(), ClaimAction::Rotate { .. }) {
            return reject("revocation must be followed by a rotation".into());
        }

        let id = claim.id()?;
        match claim.action() {
            ClaimAction::AddMember {
                member,
                key_version,
            } => {
                if !member.is_self_certifying() {
                    return reject(format!("member {} does not own its signing key", member.id));
                }
                if self.is_member(&member.id) {
                    return reject(format!("{} is already a member", member.id));
                }
                let expected = self.key_version.max(1);
                if *key_version != expected {
                    return reject(format!(
                        "member wrapped at version {}, current is {}",
                        key_version, expected
                    ));
                }
                self.members.insert(member.id, *member);
                self.key_version = expected;
            }
            ClaimAction::RevokeMember { target } => {
                if !self.is_member(target) {
                    return reject(format!("{} is not a member", target));
                }
                if self.members.len() == 1 {
                    return reject("cannot revoke the last member".into());
                }
                self.members.remove(target);
                self.pending_rotation = true;
            }
            ClaimAction::Rotate { key_version } => {
                if *key_version != self.key_version + 1 {
                    return reject(format!(
                        "rotation to {} from {}",
                        key_version, self.key_version
                    ));
                }
                self.key_version = *key_version;
                self.pending_rotation = false;
            }
        }

        self.head = Some(id);
        self.len += 1;
        Ok(())
    }
}

/// Fold a full claim sequence for `scope`.
pub fn fold(scope: &PathExp, claims: &[Claim]) -> Result<Membership> {
    let mut membership = Membership::empty(scope.clone());
    for claim in claims {
        membership.apply(claim)?;
    }
    Ok(membership)
}
