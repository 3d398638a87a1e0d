//! In-memory implementation of the Registry trait.
//!
//! This is primarily for testing. It answers the same queries as the HTTP
//! registry and enforces the same keyring concurrency rule, but keeps
//! everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use lockbox_core::{CredentialEnvelope, CredentialId, PathExp, RawEnvelope};
use lockbox_keyring::{KeyringSnapshot, KeyringUpdate};

use crate::cancel::CallOptions;
use crate::error::{ApiError, RegistryError, Result};
use crate::progress::{ProgressEvent, ProgressFn};
use crate::registry::{CredentialQuery, Registry};

/// In-memory registry.
///
/// Credentials are kept in wire form so every read goes through the
/// envelope decoder, as it would over HTTP.
pub struct MemoryRegistry {
    inner: RwLock<MemoryRegistryInner>,
}

#[derive(Default)]
struct MemoryRegistryInner {
    /// Credentials in creation order.
    credentials: Vec<RawEnvelope<CredentialId>>,

    /// Keyrings by scope.
    keyrings: HashMap<PathExp, KeyringSnapshot>,

    /// When set, every call fails with this status.
    unavailable: Option<u16>,
}

fn api_error(status: u16, kind: &str, message: String) -> RegistryError {
    RegistryError::Api(ApiError {
        status,
        kind: kind.to_string(),
        messages: vec![message],
    })
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryRegistryInner::default()),
        }
    }

    /// Make every subsequent call fail with an empty-bodied `status`, or
    /// restore service with `None`.
    pub fn set_unavailable(&self, status: Option<u16>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = status;
    }

    /// Number of stored credential versions.
    pub fn credential_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials
            .len()
    }

    /// Every stored credential in wire form.
    pub fn raw_credentials(&self) -> Vec<RawEnvelope<CredentialId>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials
            .clone()
    }

    fn check_available(inner: &MemoryRegistryInner) -> Result<()> {
        match inner.unavailable {
            Some(status) => Err(RegistryError::Status(status)),
            None => Ok(()),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_credentials(
        &self,
        query: &CredentialQuery,
        opts: &CallOptions,
    ) -> Result<Vec<CredentialEnvelope>> {
        opts.run(async {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            Self::check_available(&inner)?;

            let mut found = Vec::new();
            for raw in &inner.credentials {
                let envelope = CredentialEnvelope::from_raw(raw)?;
                if query.matches(&envelope.body) {
                    found.push(envelope);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn create_credential(
        &self,
        envelope: &CredentialEnvelope,
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<CredentialEnvelope> {
        opts.run(async {
            let raw = envelope.to_raw()?;
            let report = |step: &str, completed: u64| {
                if let Some(progress) = progress {
                    progress(&ProgressEvent {
                        step: step.to_string(),
                        completed,
                        total: 2,
                    });
                }
            };

            report("validating credential", 1);
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            Self::check_available(&inner)?;
            if inner.credentials.iter().any(|c| c.id == raw.id) {
                return Err(api_error(
                    409,
                    "conflict",
                    format!("credential {} already exists", raw.id),
                ));
            }

            report("storing credential", 2);
            inner.credentials.push(raw.clone());
            drop(inner);

            Ok(CredentialEnvelope::from_raw(&raw)?)
        })
        .await
    }

    async fn list_keyring_scopes(&self, opts: &CallOptions) -> Result<Vec<PathExp>> {
        opts.run(async {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            Self::check_available(&inner)?;
            let mut scopes: Vec<PathExp> = inner.keyrings.keys().cloned().collect();
            scopes.sort_by_key(|s| s.to_string());
            Ok(scopes)
        })
        .await
    }

    async fn fetch_keyring(
        &self,
        scope: &PathExp,
        opts: &CallOptions,
    ) -> Result<Option<KeyringSnapshot>> {
        opts.run(async {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            Self::check_available(&inner)?;
            Ok(inner.keyrings.get(scope).cloned())
        })
        .await
    }

    async fn publish_keyring(&self, update: &KeyringUpdate, opts: &CallOptions) -> Result<()> {
        opts.run(async {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            Self::check_available(&inner)?;

            let stored_len = inner
                .keyrings
                .get(&update.scope)
                .map(|k| k.claims.len() as u64)
                .unwrap_or(0);
            if stored_len != update.base_len {
                return Err(api_error(
                    409,
                    "conflict",
                    format!(
                        "keyring {} is at length {}, update expects {}",
                        update.scope, stored_len, update.base_len
                    ),
                ));
            }

            let stored = inner
                .keyrings
                .entry(update.scope.clone())
                .or_insert_with(|| KeyringSnapshot {
                    scope: update.scope.clone(),
                    claims: Vec::new(),
                    wraps: Vec::new(),
                });
            stored.claims.extend(update.claims.iter().cloned());
            stored.wraps.extend(update.wraps.iter().cloned());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_core::{BaseCredential, Credential, CredentialPath, SealAlg, SealedValue};
    use lockbox_keyring::{IdentityKeys, KeyringEngine};
    use std::sync::Mutex;

    fn envelope(pathexp: &str, name: &str) -> CredentialEnvelope {
        CredentialEnvelope::new(
            CredentialId::random(),
            Credential::V1(BaseCredential {
                name: name.into(),
                pathexp: PathExp::parse(pathexp).unwrap(),
                scope: PathExp::parse("/org1/*").unwrap(),
                value: SealedValue {
                    alg: SealAlg::Chacha20poly1305,
                    key_version: 1,
                    nonce: [7; 12],
                    ciphertext: vec![1, 2, 3],
                },
            }),
        )
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let registry = MemoryRegistry::new();
        let opts = CallOptions::default();

        let a = envelope("/org1/proj1/dev", "db-password");
        let b = envelope("/org1/proj1/[dev|stage]", "api-key");
        registry.create_credential(&a, &opts, None).await.unwrap();
        registry.create_credential(&b, &opts, None).await.unwrap();

        let query = CredentialQuery::Path(CredentialPath::parse("/org1/proj1/stage/api-key").unwrap());
        let found = registry.list_credentials(&query, &opts).await.unwrap();
        assert_eq!(found, vec![b.clone()]);

        let query = CredentialQuery::PathExp(PathExp::parse("/org1/*").unwrap());
        let found = registry.list_credentials(&query, &opts).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_create_reports_progress() {
        let registry = MemoryRegistry::new();
        let events = Mutex::new(Vec::new());
        let progress = |e: &ProgressEvent| events.lock().unwrap().push(e.completed);

        registry
            .create_credential(&envelope("/o/p/e", "x"), &CallOptions::default(), Some(&progress))
            .await
            .unwrap();
        assert_eq!(*events.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let registry = MemoryRegistry::new();
        let e = envelope("/o/p/e", "x");
        registry.create_credential(&e, &CallOptions::default(), None).await.unwrap();
        let err = registry
            .create_credential(&e, &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(registry.credential_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_rejects_stale_base() {
        let registry = MemoryRegistry::new();
        let opts = CallOptions::default();
        let scope = PathExp::parse("/org1/*").unwrap();
        let u1 = IdentityKeys::generate();
        let u2 = IdentityKeys::generate();

        let engine = KeyringEngine::new();
        let created = engine.create_keyring(scope.clone(), &u1).unwrap();
        registry.publish_keyring(&created, &opts).await.unwrap();

        let added = engine.add_member(&scope, &u1, &u2.public()).unwrap();
        registry.publish_keyring(&added, &opts).await.unwrap();

        // Replaying the founding update no longer fits the stored chain.
        let err = registry.publish_keyring(&created, &opts).await.unwrap_err();
        assert!(err.is_conflict());

        let snapshot = registry.fetch_keyring(&scope, &opts).await.unwrap().unwrap();
        assert_eq!(snapshot.claims.len() as u64, added.new_len());
        assert_eq!(registry.list_keyring_scopes(&opts).await.unwrap(), vec![scope]);
    }

    #[tokio::test]
    async fn test_missing_keyring_is_none() {
        let registry = MemoryRegistry::new();
        let scope = PathExp::parse("/org1/*").unwrap();
        let stale = KeyringUpdate {
            scope: scope.clone(),
            base_len: 3,
            claims: vec![],
            wraps: vec![],
        };
        assert!(registry.publish_keyring(&stale, &CallOptions::default()).await.is_err());
        assert!(registry
            .fetch_keyring(&scope, &CallOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let registry = MemoryRegistry::new();
        registry.set_unavailable(Some(503));
        let err = registry
            .list_keyring_scopes(&CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));

        registry.set_unavailable(None);
        assert!(registry.list_keyring_scopes(&CallOptions::default()).await.is_ok());
    }
}
