//! The daemon context.
//!
//! One [`Daemon`] lives for the life of the process and is passed by
//! reference to every request handler. It owns the session, the registry
//! handle, and the local keyring engine, and it is the only place that
//! combines them: it derives the session's identity keys, pulls keyring
//! chains from the registry before using them, and publishes every
//! membership change back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lockbox_core::{IdentityId, PathExp, PrincipalEnvelope};
use lockbox_keyring::{unseal, IdentityKeys, KeyringEngine, KeyringUpdate, PublicIdentity, ResolvedKey};
use lockbox_registry::{CallOptions, Registry, RegistryClient};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credential_tree::CredentialTree;
use crate::error::{DaemonError, Result, SessionError};
use crate::session::{Session, SessionType};

/// Process-wide daemon state.
pub struct Daemon {
    config: Config,
    session: Arc<Session>,
    registry: Arc<dyn Registry>,
    keyrings: KeyringEngine,
    /// One writer per scope for the sync, mutate, publish sequence.
    scope_locks: Mutex<HashMap<PathExp, Arc<AsyncMutex<()>>>>,
    /// Identity keys of the current session, keyed by auth id.
    keys: Mutex<Option<(IdentityId, IdentityKeys)>>,
}

impl Daemon {
    /// Create a daemon talking to `registry`, with a fresh logged out
    /// session.
    pub fn new(config: Config, registry: Arc<dyn Registry>) -> Self {
        Self::with_session(config, Arc::new(Session::new()), registry)
    }

    fn with_session(config: Config, session: Arc<Session>, registry: Arc<dyn Registry>) -> Self {
        Self {
            config,
            session,
            registry,
            keyrings: KeyringEngine::new(),
            scope_locks: Mutex::new(HashMap::new()),
            keys: Mutex::new(None),
        }
    }

    /// Create a daemon whose registry client authorizes requests with the
    /// session's token.
    pub fn with_http_registry(config: Config) -> Result<Self> {
        let session = Arc::new(Session::new());
        let client = RegistryClient::new(config.client_config(), session.clone())?;
        Ok(Self::with_session(config, session, Arc::new(client)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Local keyring state. Mutate it through the daemon so changes reach
    /// the registry.
    pub fn keyrings(&self) -> &KeyringEngine {
        &self.keyrings
    }

    /// Credential operations for the current session.
    pub fn credentials(&self) -> CredentialTree<'_> {
        CredentialTree::new(self)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────────

    /// Fill the session and prove the passphrase by deriving the identity
    /// keys. A session that cannot derive its keys is cleared again.
    pub fn login(
        &self,
        kind: SessionType,
        identity: Option<PrincipalEnvelope>,
        auth: Option<PrincipalEnvelope>,
        passphrase: &str,
        token: &str,
    ) -> Result<()> {
        self.session.set(kind, identity, auth, passphrase, token)?;
        if let Err(e) = self.identity_keys() {
            warn!(error = %e, "login rejected, clearing session");
            let _ = self.session.logout();
            self.clear_keys();
            return Err(e);
        }
        info!(session_type = kind.as_str(), "logged in");
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.session.logout()?;
        self.clear_keys();
        info!("logged out");
        Ok(())
    }

    fn clear_keys(&self) {
        *lock(&self.keys) = None;
    }

    /// Keys of the session's identity, unsealed from the auth body's master
    /// key with the session passphrase.
    ///
    /// The derived id must equal the auth envelope id, otherwise the master
    /// key belongs to someone else.
    pub fn identity_keys(&self) -> Result<IdentityKeys> {
        let expected = self.session.auth_id().ok_or(SessionError::NotLoggedIn)?;
        let mut cached = lock(&self.keys);
        if let Some((id, keys)) = cached.as_ref() {
            if *id == expected {
                return Ok(keys.clone());
            }
        }

        let master = self.session.master_key()?;
        let passphrase = self.session.passphrase();
        let keys = unseal(&master, passphrase.as_bytes())?.identity_keys();
        let derived = keys.id();
        if derived != expected {
            return Err(DaemonError::IdentityMismatch { expected, derived });
        }

        debug!(identity = %derived, "derived identity keys");
        *cached = Some((expected, keys.clone()));
        Ok(keys)
    }

    /// The public half of the session identity, for adding it to keyrings.
    pub fn public_identity(&self) -> Result<PublicIdentity> {
        Ok(self.identity_keys()?.public())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keyrings
    // ─────────────────────────────────────────────────────────────────────────

    /// The writer lock of `scope`. Held across sync, mutate, and publish, and
    /// by credential writes so version numbers stay linear.
    pub(crate) async fn lock_scope(&self, scope: &PathExp) -> OwnedMutexGuard<()> {
        let slot = lock(&self.scope_locks)
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        slot.lock_owned().await
    }

    /// Pull the registry's chain for `scope` into the local engine.
    ///
    /// Returns whether a keyring for `scope` is known afterwards. A chain
    /// that does not extend the local one is an integrity failure; the
    /// local copy is kept.
    pub async fn sync_keyring(&self, scope: &PathExp, opts: &CallOptions) -> Result<bool> {
        match self.registry.fetch_keyring(scope, opts).await? {
            Some(snapshot) => {
                let added = self.keyrings.import(snapshot)?;
                if added > 0 {
                    debug!(scope = %scope, added, "pulled keyring claims");
                }
                Ok(true)
            }
            None => Ok(self.keyrings.contains(scope)),
        }
    }

    /// Run one membership mutation under the scope's writer lock and
    /// publish it. If the registry refuses, the local copy is dropped so
    /// the next sync starts from the registry's chain.
    async fn mutate<F>(&self, scope: &PathExp, opts: &CallOptions, change: F) -> Result<KeyringUpdate>
    where
        F: FnOnce(&KeyringEngine, &IdentityKeys) -> lockbox_keyring::Result<KeyringUpdate>,
    {
        let actor = self.identity_keys()?;
        let _guard = self.lock_scope(scope).await;
        self.sync_keyring(scope, opts).await?;

        let update = change(&self.keyrings, &actor)?;
        if let Err(e) = self.registry.publish_keyring(&update, opts).await {
            warn!(scope = %scope, error = %e, "registry refused keyring update");
            self.keyrings.forget(scope);
            return Err(e.into());
        }
        debug!(scope = %scope, new_len = update.new_len(), "published keyring update");
        Ok(update)
    }

    /// Found a keyring for `scope` with the session identity as its only
    /// member.
    pub async fn create_keyring(&self, scope: &PathExp, opts: &CallOptions) -> Result<KeyringUpdate> {
        let owned = scope.clone();
        self.mutate(scope, opts, move |engine, actor| engine.create_keyring(owned, actor))
            .await
    }

    pub async fn add_member(
        &self,
        scope: &PathExp,
        target: &PublicIdentity,
        opts: &CallOptions,
    ) -> Result<KeyringUpdate> {
        self.mutate(scope, opts, |engine, actor| engine.add_member(scope, actor, target))
            .await
    }

    /// Revoke `target` and rotate. Values sealed under earlier versions are
    /// left as they are; see [`CredentialTree::reencrypt`].
    pub async fn revoke_member(
        &self,
        scope: &PathExp,
        target: &IdentityId,
        opts: &CallOptions,
    ) -> Result<KeyringUpdate> {
        self.mutate(scope, opts, |engine, actor| engine.revoke_member(scope, actor, target))
            .await
    }

    pub async fn rotate_keyring(&self, scope: &PathExp, opts: &CallOptions) -> Result<KeyringUpdate> {
        self.mutate(scope, opts, |engine, actor| engine.rotate(scope, actor))
            .await
    }

    /// The current key of `scope` for the session identity.
    pub async fn resolve_key(&self, scope: &PathExp, opts: &CallOptions) -> Result<ResolvedKey> {
        let keys = self.identity_keys()?;
        if !self.sync_keyring(scope, opts).await? {
            return Err(DaemonError::NoKeyring(scope.clone()));
        }
        Ok(self.keyrings.resolve(scope, &keys)?)
    }

    /// The key of an older `version` of `scope` for the session identity.
    pub async fn resolve_key_version(
        &self,
        scope: &PathExp,
        version: u32,
        opts: &CallOptions,
    ) -> Result<ResolvedKey> {
        let keys = self.identity_keys()?;
        if !self.sync_keyring(scope, opts).await? {
            return Err(DaemonError::NoKeyring(scope.clone()));
        }
        Ok(self.keyrings.resolve_version(scope, &keys, version)?)
    }

    /// The most specific keyring scope, known locally or to the registry,
    /// that covers `path`.
    pub async fn scope_for(&self, path: &PathExp, opts: &CallOptions) -> Result<PathExp> {
        let mut scopes = self.registry.list_keyring_scopes(opts).await?;
        scopes.extend(self.keyrings.scopes());
        scopes
            .into_iter()
            .filter(|scope| scope.matches_path(path))
            .max_by(|a, b| a.specificity_cmp(b))
            .ok_or_else(|| DaemonError::NoKeyring(path.clone()))
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("registry_url", &self.config.registry_url.as_str())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use lockbox_core::CredentialEnvelope;
    use lockbox_keyring::{KeyringError, KeyringSnapshot};
    use lockbox_registry::{ApiError, CredentialQuery, MemoryRegistry, ProgressFn, RegistryError};
    use lockbox_testkit::{init_tracing, TestIdentity};

    use crate::error::ErrorCategory;

    fn config() -> Config {
        Config::with_root("/tmp/lockbox-test").unwrap()
    }

    fn daemon(registry: &Arc<MemoryRegistry>) -> Daemon {
        Daemon::new(config(), registry.clone())
    }

    fn login(daemon: &Daemon, who: &TestIdentity) {
        let parts = who.user_session();
        daemon
            .login(
                SessionType::User,
                Some(parts.identity),
                Some(parts.auth),
                &parts.passphrase,
                &parts.token,
            )
            .unwrap();
    }

    fn scope() -> PathExp {
        PathExp::parse("/org1/proj1/*").unwrap()
    }

    #[test]
    fn test_login_derives_matching_keys() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        let alice = TestIdentity::new("alice");

        assert!(matches!(
            daemon.identity_keys(),
            Err(DaemonError::Session(SessionError::NotLoggedIn))
        ));
        login(&daemon, &alice);
        assert_eq!(daemon.identity_keys().unwrap().id(), alice.id());
        assert_eq!(daemon.public_identity().unwrap(), alice.public());

        daemon.logout().unwrap();
        assert!(daemon.identity_keys().is_err());
    }

    #[test]
    fn test_wrong_passphrase_clears_session() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        let alice = TestIdentity::new("alice");
        let parts = alice.user_session();

        let err = daemon
            .login(SessionType::User, Some(parts.identity.clone()), Some(parts.auth.clone()), "wrong", &parts.token)
            .unwrap_err();
        assert!(matches!(err, DaemonError::Keyring(KeyringError::UnsealFailed)));
        assert!(!daemon.session().has_token());

        // The slot is free for a correct attempt.
        login(&daemon, &alice);
    }

    #[test]
    fn test_foreign_master_key_is_rejected() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        let alice = TestIdentity::new("alice");
        let mallory = TestIdentity::new("mallory");

        // Alice's envelope carrying Mallory's master key and passphrase.
        let mut user = alice.user();
        user.body.master = mallory.master.clone();
        let env = PrincipalEnvelope::User(user);

        let err = daemon
            .login(SessionType::User, Some(env.clone()), Some(env), &mallory.passphrase, "t")
            .unwrap_err();
        assert!(matches!(err, DaemonError::IdentityMismatch { .. }));
        assert!(!daemon.session().has_token());
    }

    #[tokio::test]
    async fn test_mutations_are_published() {
        init_tracing();
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        let alice = TestIdentity::new("alice");
        let bob = TestIdentity::new("bob");
        let opts = CallOptions::default();
        login(&daemon, &alice);

        daemon.create_keyring(&scope(), &opts).await.unwrap();
        daemon.add_member(&scope(), &bob.public(), &opts).await.unwrap();
        daemon.rotate_keyring(&scope(), &opts).await.unwrap();

        let remote = registry.fetch_keyring(&scope(), &opts).await.unwrap().unwrap();
        assert_eq!(remote.claims.len(), 3);
        assert_eq!(remote.claims, daemon.keyrings().snapshot(&scope()).unwrap().claims);
        assert_eq!(daemon.resolve_key(&scope(), &opts).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_create_existing_keyring_fails() {
        let registry = Arc::new(MemoryRegistry::new());
        let alice = TestIdentity::new("alice");
        let opts = CallOptions::default();

        let first = daemon(&registry);
        login(&first, &alice);
        first.create_keyring(&scope(), &opts).await.unwrap();

        // A second daemon learns about the keyring from the registry.
        let second = daemon(&registry);
        login(&second, &alice);
        let err = second.create_keyring(&scope(), &opts).await.unwrap_err();
        assert!(matches!(err, DaemonError::Keyring(KeyringError::KeyringExists(_))));
    }

    /// Delegates to a memory registry but can refuse keyring updates.
    #[derive(Default)]
    struct RefusingRegistry {
        inner: MemoryRegistry,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl Registry for RefusingRegistry {
        async fn list_credentials(
            &self,
            query: &CredentialQuery,
            opts: &CallOptions,
        ) -> lockbox_registry::Result<Vec<CredentialEnvelope>> {
            self.inner.list_credentials(query, opts).await
        }

        async fn create_credential(
            &self,
            envelope: &CredentialEnvelope,
            opts: &CallOptions,
            progress: Option<&ProgressFn<'_>>,
        ) -> lockbox_registry::Result<CredentialEnvelope> {
            self.inner.create_credential(envelope, opts, progress).await
        }

        async fn list_keyring_scopes(&self, opts: &CallOptions) -> lockbox_registry::Result<Vec<PathExp>> {
            self.inner.list_keyring_scopes(opts).await
        }

        async fn fetch_keyring(
            &self,
            scope: &PathExp,
            opts: &CallOptions,
        ) -> lockbox_registry::Result<Option<KeyringSnapshot>> {
            self.inner.fetch_keyring(scope, opts).await
        }

        async fn publish_keyring(&self, update: &KeyringUpdate, opts: &CallOptions) -> lockbox_registry::Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RegistryError::Api(ApiError {
                    status: 409,
                    kind: "conflict".into(),
                    messages: vec!["stale base".into()],
                }));
            }
            self.inner.publish_keyring(update, opts).await
        }
    }

    #[tokio::test]
    async fn test_refused_publish_drops_local_copy() {
        let registry = Arc::new(RefusingRegistry::default());
        let daemon = Daemon::new(config(), registry.clone());
        let alice = TestIdentity::new("alice");
        let bob = TestIdentity::new("bob");
        let opts = CallOptions::default();
        login(&daemon, &alice);
        daemon.create_keyring(&scope(), &opts).await.unwrap();

        registry.refuse.store(true, Ordering::SeqCst);
        let err = daemon.add_member(&scope(), &bob.public(), &opts).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(!daemon.keyrings().contains(&scope()));

        registry.refuse.store(false, Ordering::SeqCst);
        // Pulled again from the registry, without the refused claim.
        assert!(daemon.sync_keyring(&scope(), &opts).await.unwrap());
        let membership = daemon.keyrings().membership(&scope()).unwrap();
        assert_eq!(membership.len(), 1);
        assert!(!membership.is_member(&bob.id()));

        daemon.add_member(&scope(), &bob.public(), &opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_registry_is_transport() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        login(&daemon, &TestIdentity::new("alice"));

        registry.set_unavailable(Some(503));
        let err = daemon.create_keyring(&scope(), &CallOptions::default()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(!daemon.keyrings().contains(&scope()));
    }

    #[tokio::test]
    async fn test_scope_for_prefers_most_specific() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        let alice = TestIdentity::new("alice");
        let opts = CallOptions::default();
        login(&daemon, &alice);

        let broad = PathExp::parse("/org1/*").unwrap();
        daemon.create_keyring(&broad, &opts).await.unwrap();
        daemon.create_keyring(&scope(), &opts).await.unwrap();

        let dev = PathExp::parse("/org1/proj1/dev").unwrap();
        let other = PathExp::parse("/org1/proj2/dev").unwrap();
        assert_eq!(daemon.scope_for(&dev, &opts).await.unwrap(), scope());
        assert_eq!(daemon.scope_for(&other, &opts).await.unwrap(), broad);

        let missing = PathExp::parse("/org2/proj1/dev").unwrap();
        assert!(matches!(
            daemon.scope_for(&missing, &opts).await,
            Err(DaemonError::NoKeyring(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_scope() {
        let registry = Arc::new(MemoryRegistry::new());
        let daemon = daemon(&registry);
        login(&daemon, &TestIdentity::new("alice"));

        let err = daemon.resolve_key(&scope(), &CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, DaemonError::NoKeyring(_)));
    }
}
