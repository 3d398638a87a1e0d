//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use lockbox_core::{
    Envelope, IdentityId, IdentityState, KdfParams, Machine, MachineToken, MasterKey,
    PrincipalEnvelope, User,
};
use lockbox_keyring::{IdentityKeys, MasterSecret, PublicIdentity};

/// Argon2 parameters cheap enough for tests.
pub const TEST_KDF: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

/// The pieces a daemon session is set from.
#[derive(Debug, Clone)]
pub struct SessionParts {
    pub identity: PrincipalEnvelope,
    pub auth: PrincipalEnvelope,
    pub passphrase: String,
    pub token: String,
}

/// An identity with a sealed master key and the keys derived from it.
pub struct TestIdentity {
    pub name: String,
    pub passphrase: String,
    pub master: MasterKey,
    pub keys: IdentityKeys,
}

impl TestIdentity {
    /// Create a new identity with a random master secret.
    pub fn new(name: &str) -> Self {
        Self::from_secret(name, MasterSecret::generate())
    }

    /// Create with a deterministic master secret.
    pub fn with_seed(name: &str, seed: [u8; 32]) -> Self {
        Self::from_secret(name, MasterSecret::from_bytes(seed))
    }

    fn from_secret(name: &str, secret: MasterSecret) -> Self {
        let passphrase = format!("{}-passphrase", name);
        let master = secret
            .seal(passphrase.as_bytes(), TEST_KDF)
            .expect("sealing with test params");
        Self {
            name: name.to_string(),
            passphrase,
            master,
            keys: secret.identity_keys(),
        }
    }

    /// Id derived from the identity's signing key.
    pub fn id(&self) -> IdentityId {
        self.keys.id()
    }

    pub fn public(&self) -> PublicIdentity {
        self.keys.public()
    }

    /// Bearer token the fixture registry would have issued.
    pub fn token(&self) -> String {
        format!("tok-{}", self.id().to_hex())
    }

    pub fn user(&self) -> Envelope<User> {
        Envelope::new(
            self.id(),
            User {
                username: self.name.clone(),
                name: self.name.to_uppercase(),
                email: format!("{}@example.com", self.name),
                state: IdentityState::Active,
                master: self.master.clone(),
            },
        )
    }

    /// Session parts for logging in as this identity, as a user.
    pub fn user_session(&self) -> SessionParts {
        let user = PrincipalEnvelope::User(self.user());
        SessionParts {
            identity: user.clone(),
            auth: user,
            passphrase: self.passphrase.clone(),
            token: self.token(),
        }
    }

    /// Session parts for a machine authenticating with a token that carries
    /// this identity's master key.
    pub fn machine_session(&self, created_by: IdentityId) -> SessionParts {
        let machine_id = IdentityId::from_bytes(*blake3::hash(self.id().as_bytes()).as_bytes());
        let machine = Envelope::new(
            machine_id,
            Machine {
                name: self.name.clone(),
                state: IdentityState::Active,
                created_by,
            },
        );
        let token = Envelope::new(
            self.id(),
            MachineToken {
                machine_id,
                state: IdentityState::Active,
                master: self.master.clone(),
            },
        );
        SessionParts {
            identity: PrincipalEnvelope::Machine(machine),
            auth: PrincipalEnvelope::MachineToken(token),
            passphrase: self.passphrase.clone(),
            token: self.token(),
        }
    }
}

impl std::fmt::Debug for TestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestIdentity")
            .field("name", &self.name)
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Create several identities with distinct deterministic secrets.
pub fn team(names: &[&str]) -> Vec<TestIdentity> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8 + 1;
            TestIdentity::with_seed(name, seed)
        })
        .collect()
}

/// Route `tracing` output through the test harness. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_keyring::unseal;

    #[test]
    fn test_master_key_unseals_to_same_identity() {
        let alice = TestIdentity::new("alice");
        let secret = unseal(&alice.master, alice.passphrase.as_bytes()).unwrap();
        assert_eq!(secret.identity_keys().id(), alice.id());
    }

    #[test]
    fn test_team_members_are_distinct_and_stable() {
        let a = team(&["u1", "u2", "u3"]);
        let b = team(&["u1", "u2", "u3"]);

        assert_ne!(a[0].id(), a[1].id());
        assert_ne!(a[1].id(), a[2].id());
        assert_eq!(a[0].id(), b[0].id());
    }

    #[test]
    fn test_machine_session_links_token_to_machine() {
        let owner = TestIdentity::new("owner");
        let bot = TestIdentity::new("ci");
        let parts = bot.machine_session(owner.id());

        match (&parts.identity, &parts.auth) {
            (PrincipalEnvelope::Machine(m), PrincipalEnvelope::MachineToken(t)) => {
                assert_eq!(t.body.machine_id, m.id);
                assert_eq!(m.body.created_by, owner.id());
                assert_eq!(t.id, bot.id());
            }
            other => panic!("unexpected principals: {:?}", other),
        }
    }
}
