//! Proptest generators for property-based testing.

use proptest::prelude::*;

use lockbox_core::{
    BaseCredential, Credential, CredentialEnvelope, CredentialId, CredentialState, CredentialV2,
    PathExp, SealAlg, SealedValue,
};

/// Generate a literal path segment.
pub fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,7}".prop_map(String::from)
}

/// Generate a segment pattern: literal, prefix glob, alternation, or `*`.
pub fn segment_pattern() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => segment(),
        1 => segment().prop_map(|s| format!("{}*", s)),
        1 => prop::collection::vec(segment(), 2..=3).prop_map(|alts| format!("[{}]", alts.join("|"))),
        1 => Just("*".to_string()),
    ]
}

/// Generate a concrete path of `min..=max` segments.
pub fn concrete_path(min: usize, max: usize) -> impl Strategy<Value = PathExp> {
    prop::collection::vec(segment(), min..=max).prop_map(|segs| {
        PathExp::parse(&format!("/{}", segs.join("/"))).expect("generated literal path parses")
    })
}

/// Generate a path expression of `min..=max` segments.
pub fn pathexp(min: usize, max: usize) -> impl Strategy<Value = PathExp> {
    prop::collection::vec(segment_pattern(), min..=max).prop_map(|segs| {
        PathExp::parse(&format!("/{}", segs.join("/"))).expect("generated pattern parses")
    })
}

/// Generate a credential name.
pub fn credential_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// Generate a random CredentialId.
pub fn credential_id() -> impl Strategy<Value = CredentialId> {
    any::<[u8; 32]>().prop_map(CredentialId::from_bytes)
}

/// Generate plaintext of specified max length.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a sealed value. The ciphertext is random bytes, not a real
/// seal.
pub fn sealed_value() -> impl Strategy<Value = SealedValue> {
    (1u32..=8, any::<[u8; 12]>(), prop::collection::vec(any::<u8>(), 16..=80)).prop_map(
        |(key_version, nonce, ciphertext)| SealedValue {
            alg: SealAlg::Chacha20poly1305,
            key_version,
            nonce,
            ciphertext,
        },
    )
}

pub fn base_credential() -> impl Strategy<Value = Credential> {
    (credential_name(), pathexp(2, 5), pathexp(1, 3), sealed_value()).prop_map(
        |(name, pathexp, scope, value)| {
            Credential::V1(BaseCredential {
                name,
                pathexp,
                scope,
                value,
            })
        },
    )
}

pub fn credential_v2() -> impl Strategy<Value = Credential> {
    (
        credential_name(),
        pathexp(2, 5),
        pathexp(1, 3),
        1u32..=50,
        proptest::option::of(credential_id()),
        proptest::option::of(sealed_value()),
    )
        .prop_map(|(name, pathexp, scope, credential_version, previous, value)| {
            Credential::V2(CredentialV2 {
                name,
                pathexp,
                scope,
                state: if value.is_some() {
                    CredentialState::Set
                } else {
                    CredentialState::Unset
                },
                credential_version,
                previous,
                value,
            })
        })
}

/// Generate a credential body of any registered version.
pub fn credential() -> impl Strategy<Value = Credential> {
    prop_oneof![base_credential(), credential_v2()]
}

pub fn credential_envelope() -> impl Strategy<Value = CredentialEnvelope> {
    (credential_id(), credential()).prop_map(|(id, body)| CredentialEnvelope::new(id, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_generated_pathexp_displays_as_parsed(exp in pathexp(1, 6)) {
            let reparsed = PathExp::parse(&exp.to_string()).unwrap();
            prop_assert_eq!(reparsed, exp);
        }

        #[test]
        fn test_concrete_path_matches_itself(path in concrete_path(1, 6)) {
            prop_assert!(path.is_concrete());
            prop_assert!(path.matches_path(&path));
        }

        #[test]
        fn test_unset_credentials_carry_no_value(c in credential_v2()) {
            prop_assert_eq!(c.value().is_none(), c.state() == CredentialState::Unset);
        }
    }
}
