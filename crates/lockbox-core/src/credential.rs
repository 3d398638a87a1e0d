//! Credential bodies.
//!
//! Two versions are registered:
//!
//! | version | body | notes |
//! |---|---|---|
//! | 1 | [`BaseCredential`] | always set, always carries a value |
//! | 2 | [`CredentialV2`] | adds state, a version counter, and a back link |
//!
//! Both expose the same capabilities through [`Credential`]. The value is
//! always sealed; registry JSON never contains plaintext.

use serde::{Deserialize, Serialize};

use crate::envelope::{json_body, to_json_body, DecodeFn, DecodeTable, Envelope, Versioned};
use crate::error::Result;
use crate::pathexp::PathExp;
use crate::types::CredentialId;

/// AEAD used to seal a credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SealAlg {
    Chacha20poly1305,
}

/// A value encrypted under a keyring key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    pub alg: SealAlg,
    pub key_version: u32,
    #[serde(with = "crate::wire::hex_array")]
    pub nonce: [u8; 12],
    #[serde(with = "crate::wire::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Whether a credential version holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Set,
    Unset,
}

/// Version 1 credential body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseCredential {
    pub name: String,
    pub pathexp: PathExp,
    /// Scope of the keyring the value is sealed under.
    pub scope: PathExp,
    pub value: SealedValue,
}

/// Version 2 credential body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialV2 {
    pub name: String,
    pub pathexp: PathExp,
    pub scope: PathExp,
    pub state: CredentialState,
    /// Starts at 1 and increases by one per filed version.
    pub credential_version: u32,
    pub previous: Option<CredentialId>,
    /// `None` exactly when `state` is `Unset`.
    pub value: Option<SealedValue>,
}

/// A credential body of any registered version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    V1(BaseCredential),
    V2(CredentialV2),
}

impl Credential {
    pub fn name(&self) -> &str {
        match self {
            Credential::V1(c) => &c.name,
            Credential::V2(c) => &c.name,
        }
    }

    pub fn pathexp(&self) -> &PathExp {
        match self {
            Credential::V1(c) => &c.pathexp,
            Credential::V2(c) => &c.pathexp,
        }
    }

    pub fn scope(&self) -> &PathExp {
        match self {
            Credential::V1(c) => &c.scope,
            Credential::V2(c) => &c.scope,
        }
    }

    /// Version 1 credentials are always set.
    pub fn state(&self) -> CredentialState {
        match self {
            Credential::V1(_) => CredentialState::Set,
            Credential::V2(c) => c.state,
        }
    }

    pub fn value(&self) -> Option<&SealedValue> {
        match self {
            Credential::V1(c) => Some(&c.value),
            Credential::V2(c) => c.value.as_ref(),
        }
    }

    /// Position in the credential's version history. Version 1 bodies have
    /// no history and count as the first.
    pub fn credential_version(&self) -> u32 {
        match self {
            Credential::V1(_) => 1,
            Credential::V2(c) => c.credential_version,
        }
    }

    pub fn previous(&self) -> Option<CredentialId> {
        match self {
            Credential::V1(_) => None,
            Credential::V2(c) => c.previous,
        }
    }
}

fn decode_v1(raw: &[u8]) -> Result<Credential> {
    json_body(raw).map(Credential::V1)
}

fn decode_v2(raw: &[u8]) -> Result<Credential> {
    json_body(raw).map(Credential::V2)
}

impl Versioned for Credential {
    type Id = CredentialId;
    const TABLE: DecodeTable<Self> = DecodeTable::new(
        "credential",
        &[
            (1, decode_v1 as DecodeFn<Credential>),
            (2, decode_v2 as DecodeFn<Credential>),
        ],
    );

    fn version(&self) -> i64 {
        match self {
            Credential::V1(_) => 1,
            Credential::V2(_) => 2,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        match self {
            Credential::V1(c) => to_json_body(c),
            Credential::V2(c) => to_json_body(c),
        }
    }
}

/// A credential envelope.
pub type CredentialEnvelope = Envelope<Credential>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, encode, RawEnvelope};
    use crate::error::CoreError;

    fn sealed() -> SealedValue {
        SealedValue {
            alg: SealAlg::Chacha20poly1305,
            key_version: 1,
            nonce: [4; 12],
            ciphertext: vec![1, 2, 3, 4],
        }
    }

    fn v1() -> Credential {
        Credential::V1(BaseCredential {
            name: "db-password".into(),
            pathexp: PathExp::parse("/org1/proj1/dev").unwrap(),
            scope: PathExp::parse("/org1/proj1/*").unwrap(),
            value: sealed(),
        })
    }

    fn v2_unset() -> Credential {
        Credential::V2(CredentialV2 {
            name: "db-password".into(),
            pathexp: PathExp::parse("/org1/proj1/dev").unwrap(),
            scope: PathExp::parse("/org1/proj1/*").unwrap(),
            state: CredentialState::Unset,
            credential_version: 2,
            previous: Some(CredentialId::from_bytes([1; 32])),
            value: None,
        })
    }

    #[test]
    fn test_roundtrip_each_version() {
        for cred in [v1(), v2_unset()] {
            let (raw, version) = encode(&cred).unwrap();
            assert_eq!(decode::<Credential>(&raw, version).unwrap(), cred);
        }
    }

    #[test]
    fn test_common_accessors() {
        let a = v1();
        assert_eq!(a.state(), CredentialState::Set);
        assert_eq!(a.credential_version(), 1);
        assert!(a.value().is_some());

        let b = v2_unset();
        assert_eq!(b.name(), "db-password");
        assert_eq!(b.state(), CredentialState::Unset);
        assert!(b.value().is_none());
        assert_eq!(b.previous(), Some(CredentialId::from_bytes([1; 32])));
    }

    #[test]
    fn test_unknown_credential_version() {
        for version in [0i64, 3, 256, 300, -1, i64::MAX] {
            let raw: RawEnvelope<CredentialId> = serde_json::from_str(&format!(
                r#"{{"id":"{}","version":{},"body":{{}}}}"#,
                CredentialId::from_bytes([0; 32]).to_hex(),
                version
            ))
            .unwrap();
            let err = CredentialEnvelope::from_raw(&raw).unwrap_err();
            assert!(
                matches!(
                    err,
                    CoreError::UnknownVersion { kind: "credential", version: v } if v == version
                ),
                "version {}: {:?}",
                version,
                err
            );
        }
    }

    #[test]
    fn test_wire_shape_has_no_plaintext_fields() {
        let env = CredentialEnvelope::new(CredentialId::from_bytes([2; 32]), v1());
        let json = serde_json::to_value(env.to_raw().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["body"]["value"]["alg"], "chacha20poly1305");
        assert_eq!(json["body"]["value"]["ciphertext"], "AQIDBA==");
    }
}
