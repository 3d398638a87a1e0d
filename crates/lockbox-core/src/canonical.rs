//! Deterministic CBOR for everything that is signed or hashed.
//!
//! Two daemons must produce identical bytes for the same claim, or
//! signatures stop verifying and hashes stop linking. Output follows the
//! RFC 8949 core deterministic rules: shortest-form heads, definite
//! lengths, map entries ordered by their encoded key bytes. Floats are
//! refused outright; every timestamp in this workspace is integer
//! milliseconds.

use ciborium::value::Value;
use serde::Serialize;

use crate::error::{CoreError, Result};

const MAJOR_UINT: u8 = 0;
const MAJOR_NEGINT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;

/// Serialize `value` and emit its deterministic encoding.
///
/// Because maps are reordered on output, the declaration order of struct
/// fields has no effect on the bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let tree = Value::serialized(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    encode_canonical(&tree)
}

/// `domain` followed by the canonical bytes of `value`. Signatures are
/// always taken over this form.
pub fn domain_bytes<T: Serialize + ?Sized>(domain: &[u8], value: &T) -> Result<Vec<u8>> {
    let body = canonical_bytes(value)?;
    Ok([domain, &body[..]].concat())
}

pub fn encode_canonical(value: &Value) -> Result<Vec<u8>> {
    let mut out = Encoder::default();
    out.value(value)?;
    Ok(out.0)
}

#[derive(Default)]
struct Encoder(Vec<u8>);

impl Encoder {
    /// Initial byte plus the shortest argument that holds `arg`.
    fn head(&mut self, major: u8, arg: u64) {
        let top = major << 5;
        match arg {
            0..=23 => self.0.push(top | arg as u8),
            24..=0xff => self.0.extend_from_slice(&[top | 24, arg as u8]),
            0x100..=0xffff => {
                self.0.push(top | 25);
                self.0.extend_from_slice(&(arg as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.0.push(top | 26);
                self.0.extend_from_slice(&(arg as u32).to_be_bytes());
            }
            _ => {
                self.0.push(top | 27);
                self.0.extend_from_slice(&arg.to_be_bytes());
            }
        }
    }

    fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Integer(i) => {
                let n = i128::from(*i);
                // Negative n is carried as -1 - n.
                match u64::try_from(n) {
                    Ok(u) => self.head(MAJOR_UINT, u),
                    Err(_) => self.head(MAJOR_NEGINT, (-1 - n) as u64),
                }
            }
            Value::Bytes(b) => {
                self.head(MAJOR_BYTES, b.len() as u64);
                self.0.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.head(MAJOR_TEXT, s.len() as u64);
                self.0.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                self.head(MAJOR_ARRAY, items.len() as u64);
                items.iter().try_for_each(|item| self.value(item))?;
            }
            Value::Map(entries) => self.map(entries)?,
            Value::Bool(b) => self.0.push(if *b { TRUE } else { FALSE }),
            Value::Null => self.0.push(NULL),
            Value::Float(_) => {
                return Err(CoreError::EncodingError("float in canonical value".into()))
            }
            other => {
                return Err(CoreError::EncodingError(format!(
                    "no canonical form for {:?}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn map(&mut self, entries: &[(Value, Value)]) -> Result<()> {
        let mut keyed = entries
            .iter()
            .map(|(k, v)| encode_canonical(k).map(|key| (key, v)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        if keyed.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(CoreError::EncodingError("repeated map key".into()));
        }

        self.head(MAJOR_MAP, keyed.len() as u64);
        for (key, v) in keyed {
            self.0.extend_from_slice(&key);
            self.value(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct ScopeFirst {
        scope: &'static str,
        seq: u64,
    }

    #[derive(Serialize)]
    struct SeqFirst {
        seq: u64,
        scope: &'static str,
    }

    #[test]
    fn test_declaration_order_is_irrelevant() {
        let a = canonical_bytes(&ScopeFirst { scope: "/org1/*", seq: 3 }).unwrap();
        let b = canonical_bytes(&SeqFirst { seq: 3, scope: "/org1/*" }).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shortest_heads() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 0x18]),
            (255, &[0x18, 0xff]),
            (256, &[0x19, 0x01, 0x00]),
            (65_536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
            (-1, &[0x20]),
            (-25, &[0x38, 0x18]),
        ];
        for (n, expected) in cases {
            let bytes = encode_canonical(&Value::Integer((*n).into())).unwrap();
            assert_eq!(&bytes[..], *expected, "head for {}", n);
        }
    }

    #[test]
    fn test_map_entries_sorted_by_encoded_key() {
        // Integer key 10 encodes as 0x0a, before text "b" at 0x61 0x62.
        let value = Value::Map(vec![
            (Value::Text("b".into()), Value::Bool(true)),
            (Value::Integer(10.into()), Value::Null),
        ]);
        assert_eq!(
            encode_canonical(&value).unwrap(),
            vec![0xa2, 0x0a, 0xf6, 0x61, 0x62, 0xf5]
        );
    }

    #[test]
    fn test_repeated_key_rejected() {
        let value = Value::Map(vec![
            (Value::Text("k".into()), Value::Null),
            (Value::Text("k".into()), Value::Null),
        ]);
        assert!(encode_canonical(&value).is_err());
    }

    #[test]
    fn test_floats_rejected() {
        assert!(canonical_bytes(&0.5f64).is_err());
    }

    #[test]
    fn test_domain_prefix() {
        assert_eq!(domain_bytes(b"claim:", &1u8).unwrap(), b"claim:\x01".to_vec());
    }
}
