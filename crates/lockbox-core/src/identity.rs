//! Identity bodies: users, machines, and machine tokens.
//!
//! A user session authenticates as the user itself; a machine session
//! authenticates with a machine token. Both auth bodies carry a sealed
//! [`MasterKey`] from which the identity's key material is derived.

use serde::{Deserialize, Serialize};

use crate::envelope::{json_body, to_json_body, DecodeFn, DecodeTable, Envelope, RawEnvelope, Versioned};
use crate::error::{CoreError, Result};
use crate::types::IdentityId;

/// Key derivation parameters for sealing a master key under a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Algorithm used to seal a master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MasterKeyAlg {
    /// Argon2id key derivation, ChaCha20-Poly1305 sealing.
    Argon2idChacha20poly1305,
}

/// A passphrase-sealed master secret.
///
/// The plaintext secret never leaves the daemon. Only this sealed form is
/// stored by the registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    pub alg: MasterKeyAlg,
    pub params: KdfParams,
    #[serde(with = "crate::wire::base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "crate::wire::hex_array")]
    pub nonce: [u8; 12],
    #[serde(with = "crate::wire::base64_bytes")]
    pub value: Vec<u8>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("alg", &self.alg)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityState {
    Unverified,
    Active,
    Destroyed,
}

/// A human user. Doubles as the auth body of a user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub name: String,
    pub email: String,
    pub state: IdentityState,
    pub master: MasterKey,
}

/// A machine identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    pub state: IdentityState,
    pub created_by: IdentityId,
}

/// A token a machine authenticates with. Carries the machine's master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineToken {
    pub machine_id: IdentityId,
    pub state: IdentityState,
    pub master: MasterKey,
}

fn decode_user_v1(raw: &[u8]) -> Result<User> {
    json_body(raw)
}

fn decode_machine_v1(raw: &[u8]) -> Result<Machine> {
    json_body(raw)
}

fn decode_machine_token_v1(raw: &[u8]) -> Result<MachineToken> {
    json_body(raw)
}

impl Versioned for User {
    type Id = IdentityId;
    const TABLE: DecodeTable<Self> =
        DecodeTable::new("user", &[(1, decode_user_v1 as DecodeFn<User>)]);

    fn version(&self) -> i64 {
        1
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        to_json_body(self)
    }
}

impl Versioned for Machine {
    type Id = IdentityId;
    const TABLE: DecodeTable<Self> =
        DecodeTable::new("machine", &[(1, decode_machine_v1 as DecodeFn<Machine>)]);

    fn version(&self) -> i64 {
        1
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        to_json_body(self)
    }
}

impl Versioned for MachineToken {
    type Id = IdentityId;
    const TABLE: DecodeTable<Self> = DecodeTable::new(
        "machine_token",
        &[(1, decode_machine_token_v1 as DecodeFn<MachineToken>)],
    );

    fn version(&self) -> i64 {
        1
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        to_json_body(self)
    }
}

/// An identity or auth envelope of any principal kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalEnvelope {
    User(Envelope<User>),
    Machine(Envelope<Machine>),
    MachineToken(Envelope<MachineToken>),
}

impl PrincipalEnvelope {
    /// Id of the wrapped envelope.
    pub fn id(&self) -> IdentityId {
        match self {
            PrincipalEnvelope::User(e) => e.id,
            PrincipalEnvelope::Machine(e) => e.id,
            PrincipalEnvelope::MachineToken(e) => e.id,
        }
    }

    /// Wire name of the principal kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PrincipalEnvelope::User(_) => User::TABLE.kind(),
            PrincipalEnvelope::Machine(_) => Machine::TABLE.kind(),
            PrincipalEnvelope::MachineToken(_) => MachineToken::TABLE.kind(),
        }
    }

    /// Decode a wire principal.
    pub fn from_raw(raw: &RawPrincipal) -> Result<Self> {
        match raw.kind.as_str() {
            "user" => Envelope::from_raw(&raw.envelope).map(PrincipalEnvelope::User),
            "machine" => Envelope::from_raw(&raw.envelope).map(PrincipalEnvelope::Machine),
            "machine_token" => {
                Envelope::from_raw(&raw.envelope).map(PrincipalEnvelope::MachineToken)
            }
            other => Err(CoreError::DecodingError(format!(
                "unknown principal kind: {}",
                other
            ))),
        }
    }

    /// Encode for the wire.
    pub fn to_raw(&self) -> Result<RawPrincipal> {
        let envelope = match self {
            PrincipalEnvelope::User(e) => e.to_raw()?,
            PrincipalEnvelope::Machine(e) => e.to_raw()?,
            PrincipalEnvelope::MachineToken(e) => e.to_raw()?,
        };
        Ok(RawPrincipal {
            kind: self.kind().to_string(),
            envelope,
        })
    }
}

/// A principal envelope on the wire, tagged with its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrincipal {
    pub kind: String,
    pub envelope: RawEnvelope<IdentityId>,
}
