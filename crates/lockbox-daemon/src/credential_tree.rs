//! The credential tree.
//!
//! Credentials are filed at a path expression plus a name, e.g.
//! `/org1/proj1/[dev|stage]` + `db-password`. Every write files a new
//! envelope; the registry keeps them all. The *current* credential at a
//! `(pathexp, name)` is the one with the highest `credential_version`.
//!
//! Values are sealed here, before they reach the registry, under the
//! current key of the most specific keyring covering the path expression.
//! Reads unwrap whatever key version the stored value names.

use std::collections::HashMap;
use std::fmt;

use lockbox_core::{
    Credential, CredentialEnvelope, CredentialId, CredentialPath, CredentialState, CredentialV2,
    PathExp,
};
use lockbox_keyring::{sealed, ResolvedKey};
use lockbox_registry::{CallOptions, CredentialQuery, ProgressFn};
use tracing::{debug, info};

use crate::daemon::Daemon;
use crate::error::{DaemonError, Result};

/// A credential with its value decrypted.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredential {
    pub id: CredentialId,
    pub name: String,
    pub pathexp: PathExp,
    pub scope: PathExp,
    pub state: CredentialState,
    pub credential_version: u32,
    pub previous: Option<CredentialId>,
    /// Key version the value was sealed under.
    pub key_version: Option<u32>,
    pub value: Option<Vec<u8>>,
}

impl fmt::Debug for PlainCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCredential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pathexp", &self.pathexp.to_string())
            .field("state", &self.state)
            .field("credential_version", &self.credential_version)
            .field("key_version", &self.key_version)
            .finish_non_exhaustive()
    }
}

/// Credential operations on behalf of the daemon's session.
pub struct CredentialTree<'a> {
    daemon: &'a Daemon,
}

/// Resolved keys reused within one call.
type KeyCache = HashMap<(PathExp, u32), ResolvedKey>;

impl<'a> CredentialTree<'a> {
    pub(crate) fn new(daemon: &'a Daemon) -> Self {
        Self { daemon }
    }

    /// Current credentials whose path expression matches `path`, decrypted.
    ///
    /// Several may match when the same name is filed at different levels;
    /// the caller disambiguates. Unset credentials are left out.
    pub async fn get(&self, path: &CredentialPath, opts: &CallOptions) -> Result<Vec<PlainCredential>> {
        self.current_plain(&CredentialQuery::Path(path.clone()), opts)
            .await
    }

    /// Current credentials whose full path is matched by `pattern`,
    /// decrypted. Unset credentials are left out.
    pub async fn search(&self, pattern: &PathExp, opts: &CallOptions) -> Result<Vec<PlainCredential>> {
        self.current_plain(&CredentialQuery::PathExp(pattern.clone()), opts)
            .await
    }

    /// Every stored envelope answering `query`, still sealed.
    pub async fn fetch(&self, query: &CredentialQuery, opts: &CallOptions) -> Result<Vec<CredentialEnvelope>> {
        Ok(self.daemon.registry().list_credentials(query, opts).await?)
    }

    /// Every version filed at paths matching `path`, oldest first per path
    /// expression.
    pub async fn history(&self, path: &CredentialPath, opts: &CallOptions) -> Result<Vec<CredentialEnvelope>> {
        let mut all = self.fetch(&CredentialQuery::Path(path.clone()), opts).await?;
        all.sort_by_key(|env| (env.body.pathexp().to_string(), env.body.credential_version()));
        Ok(all)
    }

    /// Seal `value` and file it as the next version at `(pathexp, name)`.
    ///
    /// Returns the filed credential with its plaintext, so the caller does
    /// not need a second round trip.
    pub async fn create(
        &self,
        pathexp: &PathExp,
        name: &str,
        value: &[u8],
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<PlainCredential> {
        check_name(pathexp, name)?;
        let scope = self.daemon.scope_for(pathexp, opts).await?;
        let _guard = self.daemon.lock_scope(&scope).await;

        let previous = self.current_at(pathexp, name, opts).await?;
        let key = self.daemon.resolve_key(&scope, opts).await?;
        let sealed = sealed::seal(&key.key, key.version, value)?;

        let body = CredentialV2 {
            name: name.to_string(),
            pathexp: pathexp.clone(),
            scope: scope.clone(),
            state: CredentialState::Set,
            credential_version: previous.as_ref().map_or(1, |p| p.body.credential_version() + 1),
            previous: previous.as_ref().map(|p| p.id),
            value: Some(sealed),
        };
        let filed = self.file(body, opts, progress).await?;

        info!(
            pathexp = %pathexp,
            name,
            scope = %scope,
            credential_version = filed.body.credential_version(),
            key_version = key.version,
            "filed credential"
        );
        Ok(plain(&filed, Some(value.to_vec())))
    }

    /// File an `Unset` version at `(pathexp, name)`.
    pub async fn unset(
        &self,
        pathexp: &PathExp,
        name: &str,
        opts: &CallOptions,
    ) -> Result<CredentialEnvelope> {
        check_name(pathexp, name)?;
        let missing = || DaemonError::CredentialNotFound(format!("{}/{}", pathexp, name));
        let scope = self.daemon.scope_for(pathexp, opts).await?;
        let _guard = self.daemon.lock_scope(&scope).await;

        let current = self
            .current_at(pathexp, name, opts)
            .await?
            .filter(|c| c.body.state() == CredentialState::Set)
            .ok_or_else(missing)?;

        let body = CredentialV2 {
            name: name.to_string(),
            pathexp: pathexp.clone(),
            scope: current.body.scope().clone(),
            state: CredentialState::Unset,
            credential_version: current.body.credential_version() + 1,
            previous: Some(current.id),
            value: None,
        };
        let filed = self.file(body, opts, None).await?;
        info!(pathexp = %pathexp, name, "unset credential");
        Ok(filed)
    }

    /// Re-seal every current credential of `scope` that is sealed under an
    /// older key version, filing each as a new version. Returns how many
    /// were re-filed.
    ///
    /// Revocation never does this on its own.
    pub async fn reencrypt(&self, scope: &PathExp, opts: &CallOptions) -> Result<usize> {
        let _guard = self.daemon.lock_scope(scope).await;
        let current_key = self.daemon.resolve_key(scope, opts).await?;

        let stale: Vec<CredentialEnvelope> = self
            .current(&CredentialQuery::PathExp(scope.clone()), opts)
            .await?
            .into_iter()
            .filter(|c| c.body.scope() == scope)
            .filter(|c| {
                c.body
                    .value()
                    .is_some_and(|v| v.key_version < current_key.version)
            })
            .collect();

        let mut keys = KeyCache::new();
        for envelope in &stale {
            let value = self.open(&envelope.body, &mut keys, opts).await?.unwrap_or_default();
            let body = CredentialV2 {
                name: envelope.body.name().to_string(),
                pathexp: envelope.body.pathexp().clone(),
                scope: scope.clone(),
                state: CredentialState::Set,
                credential_version: envelope.body.credential_version() + 1,
                previous: Some(envelope.id),
                value: Some(sealed::seal(&current_key.key, current_key.version, &value)?),
            };
            self.file(body, opts, None).await?;
        }

        info!(scope = %scope, count = stale.len(), key_version = current_key.version, "re-encrypted credentials");
        Ok(stale.len())
    }

    async fn file(
        &self,
        body: CredentialV2,
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<CredentialEnvelope> {
        let envelope = CredentialEnvelope::new(CredentialId::random(), Credential::V2(body));
        Ok(self
            .daemon
            .registry()
            .create_credential(&envelope, opts, progress)
            .await?)
    }

    /// The current credential filed at exactly `(pathexp, name)`.
    async fn current_at(
        &self,
        pathexp: &PathExp,
        name: &str,
        opts: &CallOptions,
    ) -> Result<Option<CredentialEnvelope>> {
        let query = CredentialQuery::PathExp(pathexp.join(name)?);
        Ok(self
            .current(&query, opts)
            .await?
            .into_iter()
            .find(|c| c.body.pathexp() == pathexp && c.body.name() == name))
    }

    /// Highest version per `(pathexp, name)`, ordered by path.
    async fn current(&self, query: &CredentialQuery, opts: &CallOptions) -> Result<Vec<CredentialEnvelope>> {
        let mut latest: HashMap<(PathExp, String), CredentialEnvelope> = HashMap::new();
        for envelope in self.fetch(query, opts).await? {
            let key = (envelope.body.pathexp().clone(), envelope.body.name().to_string());
            match latest.get(&key) {
                Some(seen) if seen.body.credential_version() >= envelope.body.credential_version() => {}
                _ => {
                    latest.insert(key, envelope);
                }
            }
        }
        let mut current: Vec<CredentialEnvelope> = latest.into_values().collect();
        current.sort_by_key(|c| (c.body.pathexp().to_string(), c.body.name().to_string()));
        Ok(current)
    }

    async fn current_plain(&self, query: &CredentialQuery, opts: &CallOptions) -> Result<Vec<PlainCredential>> {
        let mut keys = KeyCache::new();
        let mut out = Vec::new();
        for envelope in self.current(query, opts).await? {
            if envelope.body.state() == CredentialState::Unset {
                continue;
            }
            let value = self.open(&envelope.body, &mut keys, opts).await?;
            out.push(plain(&envelope, value));
        }
        debug!(count = out.len(), "decrypted credentials");
        Ok(out)
    }

    /// Decrypt a credential's value with the key version it names.
    async fn open(
        &self,
        credential: &Credential,
        keys: &mut KeyCache,
        opts: &CallOptions,
    ) -> Result<Option<Vec<u8>>> {
        let Some(value) = credential.value() else {
            return Ok(None);
        };
        let slot = (credential.scope().clone(), value.key_version);
        if !keys.contains_key(&slot) {
            let key = self
                .daemon
                .resolve_key_version(credential.scope(), value.key_version, opts)
                .await?;
            keys.insert(slot.clone(), key);
        }
        let key = keys
            .get(&slot)
            .ok_or_else(|| DaemonError::NoKeyring(credential.scope().clone()))?;
        Ok(Some(sealed::open(&key.key, value)?))
    }
}

/// A credential name is one literal segment. Globs and alternations would
/// later match as patterns.
fn check_name(pathexp: &PathExp, name: &str) -> Result<()> {
    let joined = pathexp.join(name)?;
    match joined.segments().last() {
        Some(segment) if segment.is_literal() => Ok(()),
        _ => Err(DaemonError::InvalidRequest(format!(
            "credential name {:?} must be a literal segment",
            name
        ))),
    }
}

fn plain(envelope: &CredentialEnvelope, value: Option<Vec<u8>>) -> PlainCredential {
    let body = &envelope.body;
    PlainCredential {
        id: envelope.id,
        name: body.name().to_string(),
        pathexp: body.pathexp().clone(),
        scope: body.scope().clone(),
        state: body.state(),
        credential_version: body.credential_version(),
        previous: body.previous(),
        key_version: body.value().map(|v| v.key_version),
        value,
    }
}
