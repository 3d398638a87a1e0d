//! Path expressions.
//!
//! Credentials are addressed by hierarchical paths such as
//! `/org/project/environment/service/instance/name`. A path expression
//! generalizes a path with per-segment patterns:
//!
//! - `literal` matches that exact segment
//! - `dev-*` matches any segment starting with `dev-`
//! - `[dev|stage]` matches any listed alternative
//! - `*` matches any single segment; as the final segment it matches the
//!   whole remaining subtree (one or more segments)
//!
//! Keyring scopes are path expressions too, e.g. `/org1/proj1/*`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};

/// One segment pattern of a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Prefix(String),
    Alternation(Vec<Segment>),
    Any,
}

impl Segment {
    /// Whether this pattern matches the segment text.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Segment::Literal(s) => s == text,
            Segment::Prefix(p) => text.starts_with(p.as_str()),
            Segment::Alternation(alts) => alts.iter().any(|a| a.matches(text)),
            Segment::Any => true,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }

    /// Whether every segment text matched by `other` is matched by this
    /// pattern.
    pub fn covers(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Any, _) => true,
            (_, Segment::Alternation(alts)) => alts.iter().all(|alt| self.covers(alt)),
            (_, Segment::Literal(text)) => self.matches(text),
            (Segment::Prefix(p), Segment::Prefix(q)) => q.starts_with(p.as_str()),
            (Segment::Alternation(alts), Segment::Prefix(_)) => alts.iter().any(|alt| alt.covers(other)),
            _ => false,
        }
    }

    fn parse(full: &str, raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(CoreError::invalid_path(full, "empty segment"));
        }
        if raw == "*" {
            return Ok(Segment::Any);
        }
        if let Some(inner) = raw.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| CoreError::invalid_path(full, "unterminated alternation"))?;
            let alts = inner
                .split('|')
                .map(|alt| match Segment::parse(full, alt)? {
                    Segment::Any | Segment::Alternation(_) => Err(CoreError::invalid_path(
                        full,
                        "alternatives must be literals or prefixes",
                    )),
                    seg => Ok(seg),
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Segment::Alternation(alts));
        }
        if let Some(prefix) = raw.strip_suffix('*') {
            validate_chars(full, prefix)?;
            return Ok(Segment::Prefix(prefix.to_string()));
        }
        validate_chars(full, raw)?;
        Ok(Segment::Literal(raw.to_string()))
    }
}

fn validate_chars(full: &str, text: &str) -> Result<()> {
    let ok = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CoreError::invalid_path(
            full,
            format!("invalid characters in segment {:?}", text),
        ))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Prefix(p) => write!(f, "{}*", p),
            Segment::Alternation(alts) => {
                f.write_str("[")?;
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{}", alt)?;
                }
                f.write_str("]")
            }
            Segment::Any => f.write_str("*"),
        }
    }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExp {
    segments: Vec<Segment>,
}

impl PathExp {
    /// Parse a path expression such as `/org/proj/[dev|stage]/*`.
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input
            .strip_prefix('/')
            .ok_or_else(|| CoreError::invalid_path(input, "must start with '/'"))?;
        if rest.is_empty() {
            return Err(CoreError::invalid_path(input, "no segments"));
        }
        let segments = rest
            .split('/')
            .map(|raw| Segment::parse(input, raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when every segment is a literal, i.e. this is a plain path.
    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(Segment::is_literal)
    }

    /// Whether the expression matches the given path segments.
    pub fn matches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let last = self.segments.len() - 1;
        for (i, seg) in self.segments.iter().enumerate() {
            if i == last && *seg == Segment::Any && last > 0 {
                return path.len() > last;
            }
            match path.get(i) {
                Some(text) if seg.matches(text.as_ref()) => {}
                _ => return false,
            }
        }
        path.len() == self.segments.len()
    }

    /// True when the final `*` matches a whole subtree.
    fn is_subtree(&self) -> bool {
        self.segments.len() > 1 && self.segments.last() == Some(&Segment::Any)
    }

    /// Whether every path matched by `other` is also matched by this
    /// expression. For a concrete `other` this is plain matching.
    pub fn matches_path(&self, other: &PathExp) -> bool {
        let prefix = if self.is_subtree() {
            if other.segments.len() < self.segments.len() {
                return false;
            }
            self.segments.len() - 1
        } else {
            if other.is_subtree() || other.segments.len() != self.segments.len() {
                return false;
            }
            self.segments.len()
        };
        self.segments[..prefix]
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| a.covers(b))
    }

    /// Append a literal segment, e.g. a credential name.
    pub fn join(&self, name: &str) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.push(Segment::parse(name, name)?);
        Ok(Self { segments })
    }

    /// Split the final segment off, returning `(parent, last)`.
    pub fn split_last(&self) -> Option<(PathExp, &Segment)> {
        let (last, parent) = self.segments.split_last()?;
        if parent.is_empty() {
            return None;
        }
        Some((
            PathExp {
                segments: parent.to_vec(),
            },
            last,
        ))
    }

    /// Ordering by how specific the expression is. More literal segments win,
    /// then more segments overall.
    pub fn specificity_cmp(&self, other: &PathExp) -> Ordering {
        let key = |p: &PathExp| {
            let literals = p.segments.iter().filter(|s| s.is_literal()).count();
            let concrete = p.segments.iter().filter(|s| **s != Segment::Any).count();
            (literals, concrete, p.segments.len())
        };
        key(self).cmp(&key(other))
    }
}

impl fmt::Display for PathExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}

impl FromStr for PathExp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        PathExp::parse(s)
    }
}

impl Serialize for PathExp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PathExp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PathExp::parse(&s).map_err(de::Error::custom)
    }
}

/// A concrete credential path split into its parent and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialPath {
    pub parent: PathExp,
    pub name: String,
}

impl CredentialPath {
    /// Parse `/org/proj/env/name`. The path must be concrete and have at
    /// least one parent segment.
    pub fn parse(input: &str) -> Result<Self> {
        let exp = PathExp::parse(input)?;
        if !exp.is_concrete() {
            return Err(CoreError::invalid_path(input, "credential path must be concrete"));
        }
        let (parent, last) = exp
            .split_last()
            .ok_or_else(|| CoreError::invalid_path(input, "missing credential name"))?;
        Ok(Self {
            name: last.to_string(),
            parent,
        })
    }
}

impl fmt::Display for CredentialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}
