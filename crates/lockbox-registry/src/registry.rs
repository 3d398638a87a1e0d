//! The registry seam and its HTTP implementation.
//!
//! | call | route |
//! |---|---|
//! | list credentials | `GET /credentials?path=<p>` or `?pathexp=<pe>` |
//! | create credential | `POST /credentials`, may stream progress |
//! | list keyring scopes | `GET /keyrings` |
//! | fetch keyring | `GET /keyrings?scope=<pe>` |
//! | publish keyring update | `POST /keyrings`, `409` on a stale `base_len` |

use async_trait::async_trait;
use lockbox_core::{
    Credential, CredentialEnvelope, CredentialId, CredentialPath, PathExp, RawEnvelope,
};
use lockbox_keyring::{KeyringSnapshot, KeyringUpdate};
use reqwest::Method;

use crate::cancel::CallOptions;
use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::progress::ProgressFn;

/// Which credentials to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialQuery {
    /// Every credential whose path expression and name match this concrete
    /// path.
    Path(CredentialPath),
    /// Every credential whose full path is matched by this expression.
    PathExp(PathExp),
}

impl CredentialQuery {
    fn param(&self) -> (&'static str, String) {
        match self {
            CredentialQuery::Path(path) => ("path", path.to_string()),
            CredentialQuery::PathExp(exp) => ("pathexp", exp.to_string()),
        }
    }

    /// Whether `credential` answers this query.
    pub fn matches(&self, credential: &Credential) -> bool {
        match self {
            CredentialQuery::Path(path) => {
                let segments: Vec<String> =
                    path.parent.segments().iter().map(|s| s.to_string()).collect();
                credential.name() == path.name && credential.pathexp().matches(&segments)
            }
            CredentialQuery::PathExp(exp) => credential
                .pathexp()
                .join(credential.name())
                .map(|full| exp.matches_path(&full))
                .unwrap_or(false),
        }
    }
}

/// Remote storage for credentials and keyrings. It never sees plaintext.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_credentials(
        &self,
        query: &CredentialQuery,
        opts: &CallOptions,
    ) -> Result<Vec<CredentialEnvelope>>;

    /// File a new credential envelope. `progress` receives intermediate
    /// frames while the registry provisions the write.
    async fn create_credential(
        &self,
        envelope: &CredentialEnvelope,
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<CredentialEnvelope>;

    async fn list_keyring_scopes(&self, opts: &CallOptions) -> Result<Vec<PathExp>>;

    /// `None` when the registry has no keyring for `scope`.
    async fn fetch_keyring(
        &self,
        scope: &PathExp,
        opts: &CallOptions,
    ) -> Result<Option<KeyringSnapshot>>;

    async fn publish_keyring(&self, update: &KeyringUpdate, opts: &CallOptions) -> Result<()>;
}

fn decode_all(raw: Vec<RawEnvelope<CredentialId>>) -> Result<Vec<CredentialEnvelope>> {
    raw.iter()
        .map(|r| CredentialEnvelope::from_raw(r).map_err(RegistryError::from))
        .collect()
}

#[async_trait]
impl Registry for RegistryClient {
    async fn list_credentials(
        &self,
        query: &CredentialQuery,
        opts: &CallOptions,
    ) -> Result<Vec<CredentialEnvelope>> {
        let (key, value) = query.param();
        let request = self.request(Method::GET, "/credentials", &[(key, &value)], None::<&()>)?;
        let raw: Vec<RawEnvelope<CredentialId>> = self.execute(request, opts).await?;
        decode_all(raw)
    }

    async fn create_credential(
        &self,
        envelope: &CredentialEnvelope,
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<CredentialEnvelope> {
        let raw = envelope.to_raw()?;
        let request = self.request(Method::POST, "/credentials", &[], Some(&raw))?;
        let created: RawEnvelope<CredentialId> =
            self.execute_with_progress(request, opts, progress).await?;
        Ok(CredentialEnvelope::from_raw(&created)?)
    }

    async fn list_keyring_scopes(&self, opts: &CallOptions) -> Result<Vec<PathExp>> {
        let request = self.request(Method::GET, "/keyrings", &[], None::<&()>)?;
        self.execute(request, opts).await
    }

    async fn fetch_keyring(
        &self,
        scope: &PathExp,
        opts: &CallOptions,
    ) -> Result<Option<KeyringSnapshot>> {
        let scope = scope.to_string();
        let request = self.request(Method::GET, "/keyrings", &[("scope", &scope)], None::<&()>)?;
        match self.execute(request, opts).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn publish_keyring(&self, update: &KeyringUpdate, opts: &CallOptions) -> Result<()> {
        let request = self.request(Method::POST, "/keyrings", &[], Some(update))?;
        self.execute_empty(request, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_core::{BaseCredential, SealAlg, SealedValue};

    fn credential(pathexp: &str, name: &str) -> Credential {
        Credential::V1(BaseCredential {
            name: name.into(),
            pathexp: PathExp::parse(pathexp).unwrap(),
            scope: PathExp::parse("/org1/*").unwrap(),
            value: SealedValue {
                alg: SealAlg::Chacha20poly1305,
                key_version: 1,
                nonce: [0; 12],
                ciphertext: vec![],
            },
        })
    }

    #[test]
    fn test_path_query_matches_expressions_covering_the_path() {
        let query = CredentialQuery::Path(CredentialPath::parse("/org1/proj1/dev/api/1/port").unwrap());

        assert!(query.matches(&credential("/org1/proj1/dev/api/1", "port")));
        assert!(!query.matches(&credential("/org1/proj1/[dev|stage]/api-*/*", "port")));
        assert!(query.matches(&credential("/org1/proj1/[dev|stage]/*/*", "port")));
        assert!(!query.matches(&credential("/org1/proj1/dev/api/1", "host")));
        assert!(!query.matches(&credential("/org1/proj1/prod/api/1", "port")));
    }

    #[test]
    fn test_pathexp_query_searches_subtree() {
        let query = CredentialQuery::PathExp(PathExp::parse("/org1/proj1/*").unwrap());

        assert!(query.matches(&credential("/org1/proj1/dev", "db-password")));
        assert!(query.matches(&credential("/org1/proj1/dev/api/1", "port")));
        assert!(!query.matches(&credential("/org1/proj2/dev", "db-password")));
    }

    #[test]
    fn test_query_params() {
        let path = CredentialQuery::Path(CredentialPath::parse("/o/p/e/name").unwrap());
        assert_eq!(path.param(), ("path", "/o/p/e/name".to_string()));

        let exp = CredentialQuery::PathExp(PathExp::parse("/o/p/*").unwrap());
        assert_eq!(exp.param(), ("pathexp", "/o/p/*".to_string()));
    }
}
