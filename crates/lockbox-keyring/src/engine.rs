//! The keyring engine.
//!
//! Maps `(scope, identity)` to the symmetric key that protects credentials
//! in that scope and manages the key across membership changes.
//!
//! ## Locking
//!
//! The scope table sits behind one `RwLock`; each keyring sits behind its
//! own `RwLock`. Mutations hold the keyring's write lock for the whole
//! claim, rotate, re-wrap sequence and build it on a copy of the
//! membership, so either every claim of the sequence is appended or none
//! is. Resolves take the read lock and always see a fully applied chain.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lockbox_core::{IdentityId, PathExp};
use tracing::{debug, info};

use crate::chain::{fold, Membership};
use crate::claim::{now_millis, Claim, ClaimAction, ClaimBody};
use crate::crypto::EncryptionKey;
use crate::error::{KeyringError, Result};
use crate::identity::{IdentityKeys, PublicIdentity};
use crate::snapshot::{KeyringSnapshot, KeyringUpdate};
use crate::wrap::KeyWrap;

/// A keyring key unwrapped for one identity.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub version: u32,
    pub key: EncryptionKey,
}

struct KeyringState {
    membership: Membership,
    claims: Vec<Claim>,
    wraps: Vec<KeyWrap>,
}

impl KeyringState {
    fn empty(scope: PathExp) -> Self {
        Self {
            membership: Membership::empty(scope),
            claims: Vec::new(),
            wraps: Vec::new(),
        }
    }

    fn scope(&self) -> &PathExp {
        self.membership.scope()
    }

    fn authorize(&self, actor: &IdentityKeys) -> Result<()> {
        if self.membership.is_member(&actor.id()) {
            Ok(())
        } else {
            Err(KeyringError::NotAuthorized {
                scope: self.scope().clone(),
                actor: actor.id(),
            })
        }
    }

    fn wrap_for(&self, identity: &IdentityId, version: u32) -> Option<&KeyWrap> {
        self.wraps
            .iter()
            .find(|w| w.identity == *identity && w.key_version == version)
    }

    fn resolve(&self, identity: &IdentityKeys, version: u32) -> Result<ResolvedKey> {
        let id = identity.id();
        let denied = || KeyringError::AccessDenied {
            scope: self.scope().clone(),
            identity: id,
            version,
        };

        if !self.membership.is_member(&id) || version == 0 || version > self.membership.key_version() {
            return Err(denied());
        }
        let wrap = self.wrap_for(&id, version).ok_or_else(denied)?;
        let key = wrap.unwrap_key(identity.encryption())?;
        Ok(ResolvedKey { version, key })
    }

    /// Wrap `key` for every member of `members`.
    fn wrap_all<'a>(
        &self,
        members: impl Iterator<Item = &'a PublicIdentity>,
        version: u32,
        key: &EncryptionKey,
    ) -> Result<Vec<KeyWrap>> {
        members
            .map(|m| KeyWrap::create(self.scope(), m, version, key))
            .collect()
    }

    /// Sign `actions` as `actor`, validate them as one sequence, and append
    /// them together with `wraps`.
    fn append(
        &mut self,
        actor: &IdentityKeys,
        actions: Vec<ClaimAction>,
        wraps: Vec<KeyWrap>,
    ) -> Result<KeyringUpdate> {
        let mut next = self.membership.clone();
        let mut claims = Vec::with_capacity(actions.len());
        for action in actions {
            let claim = Claim::sign(
                ClaimBody {
                    scope: next.scope().clone(),
                    seq: next.len(),
                    prev: next.head(),
                    action,
                    actor: actor.signing().public_key(),
                    timestamp: now_millis(),
                },
                actor.signing(),
            )?;
            next.apply(&claim)?;
            claims.push(claim);
        }

        let update = KeyringUpdate {
            scope: self.scope().clone(),
            base_len: self.membership.len(),
            claims: claims.clone(),
            wraps: wraps.clone(),
        };
        self.claims.extend(claims);
        self.wraps.extend(wraps);
        self.membership = next;
        Ok(update)
    }
}

/// Keyrings known to this daemon, keyed by scope.
pub struct KeyringEngine {
    keyrings: RwLock<HashMap<PathExp, Arc<RwLock<KeyringState>>>>,
}

impl KeyringEngine {
    pub fn new() -> Self {
        Self {
            keyrings: RwLock::new(HashMap::new()),
        }
    }

    fn keyring(&self, scope: &PathExp) -> Result<Arc<RwLock<KeyringState>>> {
        self.keyrings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .cloned()
            .ok_or_else(|| KeyringError::KeyringNotFound(scope.clone()))
    }

    /// Create a keyring founded by `founder` with key version 1.
    pub fn create_keyring(&self, scope: PathExp, founder: &IdentityKeys) -> Result<KeyringUpdate> {
        let mut keyrings = self.keyrings.write().unwrap_or_else(PoisonError::into_inner);
        if keyrings.contains_key(&scope) {
            return Err(KeyringError::KeyringExists(scope));
        }

        let mut state = KeyringState::empty(scope.clone());
        let key = EncryptionKey::generate();
        let founder_public = founder.public();
        let wraps = state.wrap_all(std::iter::once(&founder_public), 1, &key)?;
        let update = state.append(
            founder,
            vec![ClaimAction::AddMember {
                member: founder_public,
                key_version: 1,
            }],
            wraps,
        )?;

        keyrings.insert(scope.clone(), Arc::new(RwLock::new(state)));
        info!(scope = %scope, founder = %founder.id(), "created keyring");
        Ok(update)
    }

    /// Add `target` with a wrap of the current key version.
    ///
    /// The actor must be an active member; it unwraps the current key with
    /// its own wrap to produce the target's.
    pub fn add_member(
        &self,
        scope: &PathExp,
        actor: &IdentityKeys,
        target: &PublicIdentity,
    ) -> Result<KeyringUpdate> {
        let ring = self.keyring(scope)?;
        let mut state = write(&ring);
        state.authorize(actor)?;

        if state.membership.is_member(&target.id) {
            return Err(KeyringError::AlreadyMember {
                scope: scope.clone(),
                identity: target.id,
            });
        }

        let current = state.resolve(actor, state.membership.key_version())?;
        let wraps = state.wrap_all(std::iter::once(target), current.version, &current.key)?;
        let update = state.append(
            actor,
            vec![ClaimAction::AddMember {
                member: *target,
                key_version: current.version,
            }],
            wraps,
        )?;

        info!(scope = %scope, actor = %actor.id(), member = %target.id, "added keyring member");
        Ok(update)
    }

    /// Revoke `target`, then rotate to a new key wrapped for every
    /// remaining member.
    ///
    /// Credentials sealed under earlier versions are not re-encrypted.
    pub fn revoke_member(
        &self,
        scope: &PathExp,
        actor: &IdentityKeys,
        target: &IdentityId,
    ) -> Result<KeyringUpdate> {
        let ring = self.keyring(scope)?;
        let mut state = write(&ring);
        state.authorize(actor)?;

        if !state.membership.is_member(target) {
            return Err(KeyringError::NotMember {
                scope: scope.clone(),
                identity: *target,
            });
        }
        if state.membership.member_count() == 1 {
            return Err(KeyringError::LastMember(scope.clone()));
        }
        if *target == actor.id() {
            return Err(KeyringError::invalid_claim(
                scope,
                "an identity cannot revoke itself",
            ));
        }

        let version = state.membership.key_version() + 1;
        let key = EncryptionKey::generate();
        let remaining: Vec<PublicIdentity> = state
            .membership
            .members()
            .filter(|m| m.id != *target)
            .copied()
            .collect();
        let wraps = state.wrap_all(remaining.iter(), version, &key)?;
        let update = state.append(
            actor,
            vec![
                ClaimAction::RevokeMember { target: *target },
                ClaimAction::Rotate {
                    key_version: version,
                },
            ],
            wraps,
        )?;

        info!(
            scope = %scope,
            actor = %actor.id(),
            revoked = %target,
            key_version = version,
            "revoked keyring member"
        );
        Ok(update)
    }

    /// Rotate to a new key version without a membership change.
    pub fn rotate(&self, scope: &PathExp, actor: &IdentityKeys) -> Result<KeyringUpdate> {
        let ring = self.keyring(scope)?;
        let mut state = write(&ring);
        state.authorize(actor)?;

        let version = state.membership.key_version() + 1;
        let key = EncryptionKey::generate();
        let members: Vec<PublicIdentity> = state.membership.members().copied().collect();
        let wraps = state.wrap_all(members.iter(), version, &key)?;
        let update = state.append(
            actor,
            vec![ClaimAction::Rotate {
                key_version: version,
            }],
            wraps,
        )?;

        info!(scope = %scope, actor = %actor.id(), key_version = version, "rotated keyring");
        Ok(update)
    }

    /// The current key for `identity`, or `AccessDenied`.
    pub fn resolve(&self, scope: &PathExp, identity: &IdentityKeys) -> Result<ResolvedKey> {
        let ring = self.keyring(scope)?;
        let state = read(&ring);
        let version = state.membership.key_version();
        debug!(scope = %scope, identity = %identity.id(), version, "resolving keyring key");
        state.resolve(identity, version)
    }

    /// The key of an older `version`, for identities that are still active
    /// members and hold a wrap of that version.
    pub fn resolve_version(
        &self,
        scope: &PathExp,
        identity: &IdentityKeys,
        version: u32,
    ) -> Result<ResolvedKey> {
        let ring = self.keyring(scope)?;
        let state = read(&ring);
        state.resolve(identity, version)
    }

    pub fn membership(&self, scope: &PathExp) -> Result<Membership> {
        let ring = self.keyring(scope)?;
        let state = read(&ring);
        Ok(state.membership.clone())
    }

    pub fn contains(&self, scope: &PathExp) -> bool {
        self.keyrings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(scope)
    }

    /// Drop the local copy of a keyring, e.g. after the registry refused an
    /// update built on it. The next import starts from scratch.
    pub fn forget(&self, scope: &PathExp) -> bool {
        let removed = self
            .keyrings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scope)
            .is_some();
        if removed {
            debug!(scope = %scope, "forgot local keyring");
        }
        removed
    }

    pub fn scopes(&self) -> Vec<PathExp> {
        self.keyrings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The most specific keyring scope covering `path`.
    pub fn scope_for(&self, path: &PathExp) -> Option<PathExp> {
        self.keyrings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|scope| scope.matches_path(path))
            .max_by(|a, b| a.specificity_cmp(b))
            .cloned()
    }

    pub fn snapshot(&self, scope: &PathExp) -> Result<KeyringSnapshot> {
        let ring = self.keyring(scope)?;
        let state = read(&ring);
        Ok(KeyringSnapshot {
            scope: scope.clone(),
            claims: state.claims.clone(),
            wraps: state.wraps.clone(),
        })
    }

    /// Import a snapshot, typically pulled from the registry.
    ///
    /// The whole chain is replayed. A snapshot must extend the local chain;
    /// one that is a prefix of it is ignored and one that diverges from it
    /// fails with `InvalidClaim`. Returns the number of new claims.
    pub fn import(&self, snapshot: KeyringSnapshot) -> Result<usize> {
        let scope = snapshot.scope.clone();
        if snapshot.claims.is_empty() {
            return Ok(0);
        }

        let folded = fold(&scope, &snapshot.claims)?;
        if folded.pending_rotation() {
            return Err(KeyringError::invalid_claim(
                &scope,
                "chain ends between a revocation and its rotation",
            ));
        }
        for wrap in &snapshot.wraps {
            if wrap.scope != scope || wrap.key_version == 0 || wrap.key_version > folded.key_version() {
                return Err(KeyringError::invalid_claim(
                    &scope,
                    format!("wrap for {} at version {} does not fit the chain", wrap.identity, wrap.key_version),
                ));
            }
        }

        let ring = {
            let mut keyrings = self.keyrings.write().unwrap_or_else(PoisonError::into_inner);
            keyrings
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(RwLock::new(KeyringState::empty(scope.clone()))))
                .clone()
        };
        let mut state = write(&ring);

        let local = state.claims.len();
        let common = local.min(snapshot.claims.len());
        if state.claims[..common] != snapshot.claims[..common] {
            return Err(KeyringError::invalid_claim(&scope, "snapshot diverges from local chain"));
        }
        if snapshot.claims.len() <= local {
            return Ok(0);
        }

        let added = snapshot.claims.len() - local;
        for wrap in snapshot.wraps {
            if state.wrap_for(&wrap.identity, wrap.key_version).is_none() {
                state.wraps.push(wrap);
            }
        }
        state.claims = snapshot.claims;
        state.membership = folded;

        debug!(scope = %scope, added, "imported keyring claims");
        Ok(added)
    }
}

impl Default for KeyringEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn read(ring: &RwLock<KeyringState>) -> RwLockReadGuard<'_, KeyringState> {
    ring.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(ring: &RwLock<KeyringState>) -> RwLockWriteGuard<'_, KeyringState> {
    ring.write().unwrap_or_else(PoisonError::into_inner)
}
