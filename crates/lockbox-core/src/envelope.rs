//! Versioned envelope codec.
//!
//! Every object the registry stores or returns travels as
//! `{id, version, body}`. The body is interpreted through a closed decode
//! table keyed by `version`: each entry is a pure function from raw JSON
//! bytes to the typed payload. A version missing from the table fails with
//! [`CoreError::UnknownVersion`]; there is no default interpretation.
//!
//! Adding a version means appending one entry to the payload's table.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{CoreError, Result};

/// A pure decoder for one body version.
pub type DecodeFn<T> = fn(&[u8]) -> Result<T>;

/// Closed table of decoders for one payload kind.
pub struct DecodeTable<T: 'static> {
    kind: &'static str,
    entries: &'static [(i64, DecodeFn<T>)],
}

impl<T> DecodeTable<T> {
    /// Build a table. Entries are registered once, at compile time.
    pub const fn new(kind: &'static str, entries: &'static [(i64, DecodeFn<T>)]) -> Self {
        Self { kind, entries }
    }

    /// Name of the payload kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Whether `version` has a registered decoder.
    pub fn supports(&self, version: i64) -> bool {
        self.entries.iter().any(|(v, _)| *v == version)
    }

    /// All registered versions in table order.
    pub fn versions(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|(v, _)| *v)
    }

    /// Decode `raw` with the decoder registered for `version`.
    pub fn decode(&self, version: i64, raw: &[u8]) -> Result<T> {
        let decode = self
            .entries
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, f)| *f)
            .ok_or(CoreError::UnknownVersion {
                kind: self.kind,
                version,
            })?;
        decode(raw)
    }
}

/// A payload that travels inside an envelope.
pub trait Versioned: Sized + 'static {
    /// The id type of envelopes carrying this payload.
    type Id: Copy + Eq + Debug + Serialize + DeserializeOwned;

    /// The decode table for this payload kind.
    const TABLE: DecodeTable<Self>;

    /// The version this payload encodes as.
    fn version(&self) -> i64;

    /// Encode the body without its version tag.
    fn encode_body(&self) -> Result<Vec<u8>>;
}

/// Decode a raw body tagged with `version`.
pub fn decode<T: Versioned>(raw: &[u8], version: i64) -> Result<T> {
    T::TABLE.decode(version, raw)
}

/// Encode a payload to its raw body and version tag.
///
/// Inverse of [`decode`] for every registered version.
pub fn encode<T: Versioned>(payload: &T) -> Result<(Vec<u8>, i64)> {
    let version = payload.version();
    if !T::TABLE.supports(version) {
        return Err(CoreError::UnknownVersion {
            kind: T::TABLE.kind(),
            version,
        });
    }
    Ok((payload.encode_body()?, version))
}

/// Decoder helper for table entries: plain JSON into `B`, then map into the
/// payload type.
pub fn json_body<B: DeserializeOwned>(raw: &[u8]) -> Result<B> {
    serde_json::from_slice(raw).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// Encoder helper for [`Versioned::encode_body`].
pub fn to_json_body<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| CoreError::EncodingError(e.to_string()))
}

/// An envelope as it appears on the wire, body not yet interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope<I> {
    pub id: I,
    pub version: i64,
    pub body: Box<RawValue>,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T: Versioned> {
    pub id: T::Id,
    pub version: i64,
    pub body: T,
}

impl<T: Versioned> Envelope<T> {
    /// Wrap a body, taking the version from the body itself.
    pub fn new(id: T::Id, body: T) -> Self {
        Self {
            id,
            version: body.version(),
            body,
        }
    }

    /// Decode a wire envelope through the payload's decode table.
    pub fn from_raw(raw: &RawEnvelope<T::Id>) -> Result<Self> {
        let body = decode::<T>(raw.body.get().as_bytes(), raw.version)?;
        Ok(Self {
            id: raw.id,
            version: raw.version,
            body,
        })
    }

    /// Encode into a wire envelope.
    pub fn to_raw(&self) -> Result<RawEnvelope<T::Id>> {
        let (bytes, version) = encode(&self.body)?;
        if version != self.version {
            return Err(CoreError::EncodingError(format!(
                "envelope version {} does not match body version {}",
                self.version, version
            )));
        }
        let text = String::from_utf8(bytes).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        let body = RawValue::from_string(text).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(RawEnvelope {
            id: self.id,
            version,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialId;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct NoteV1 {
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct NoteV2 {
        text: String,
        pinned: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Note {
        V1(NoteV1),
        V2(NoteV2),
    }

    fn decode_v1(raw: &[u8]) -> Result<Note> {
        json_body(raw).map(Note::V1)
    }

    fn decode_v2(raw: &[u8]) -> Result<Note> {
        json_body(raw).map(Note::V2)
    }

    impl Versioned for Note {
        type Id = CredentialId;
        const TABLE: DecodeTable<Self> = DecodeTable::new(
            "note",
            &[(1, decode_v1 as DecodeFn<Note>), (2, decode_v2 as DecodeFn<Note>)],
        );

        fn version(&self) -> i64 {
            match self {
                Note::V1(_) => 1,
                Note::V2(_) => 2,
            }
        }

        fn encode_body(&self) -> Result<Vec<u8>> {
            match self {
                Note::V1(b) => to_json_body(b),
                Note::V2(b) => to_json_body(b),
            }
        }
    }

    #[test]
    fn test_decode_dispatches_on_version() {
        let raw = br#"{"text":"hi","pinned":true}"#;
        assert_eq!(
            decode::<Note>(raw, 2).unwrap(),
            Note::V2(NoteV2 {
                text: "hi".into(),
                pinned: true
            })
        );
        // v1 ignores the extra field rather than guessing v2.
        assert_eq!(
            decode::<Note>(raw, 1).unwrap(),
            Note::V1(NoteV1 { text: "hi".into() })
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = decode::<Note>(br#"{"text":"hi"}"#, 3).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnknownVersion {
                kind: "note",
                version: 3
            }
        ));
    }

    #[test]
    fn test_envelope_raw_roundtrip() {
        let env = Envelope::new(
            CredentialId::from_bytes([9; 32]),
            Note::V1(NoteV1 { text: "x".into() }),
        );
        let raw = env.to_raw().unwrap();
        let json = serde_json::to_string(&raw).unwrap();
        let parsed: RawEnvelope<CredentialId> = serde_json::from_str(&json).unwrap();
        assert_eq!(Envelope::<Note>::from_raw(&parsed).unwrap(), env);
    }

    #[test]
    fn test_table_versions() {
        assert_eq!(Note::TABLE.versions().collect::<Vec<_>>(), vec![1, 2]);
        assert!(!Note::TABLE.supports(0));
    }
}
