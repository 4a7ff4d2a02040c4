//! Hierarchical object keys.
//!
//! An [`IdRef`] names one object as `kind/id`, optionally nested under a
//! parent key. The canonical text form is a URI path:
//! `/piped_objects/7/__source_marker/7`. Each segment is percent-encoded,
//! so kinds and ids may hold any text (`/tag_stats/c%2Fc%2B%2B`) and
//! distinct keys never share a URI. Empty kinds and ids are invalid; see
//! [`IdRef::validate`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdRef {
    parent: Option<Box<IdRef>>,
    kind: String,
    id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdRefParseError {
    #[error("key must start with '/': {0:?}")]
    MissingLeadingSlash(String),

    #[error("key has an empty segment: {0:?}")]
    EmptySegment(String),

    #[error("key must have an even number of segments: {0:?}")]
    OddSegments(String),

    #[error("key has a segment that is not valid percent-encoded UTF-8: {0:?}")]
    InvalidEncoding(String),
}

impl IdRef {
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            parent: None,
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Key of an object owned by this one. Child keys are deterministic, so
    /// the same (parent, kind, id) always names the same row.
    pub fn child(&self, kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            parent: Some(Box::new(self.clone())),
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&IdRef> {
        self.parent.as_deref()
    }

    pub fn uri(&self) -> String {
        self.to_string()
    }

    /// Reject keys whose URI could not be parsed back: an empty kind or id
    /// anywhere in the chain.
    pub fn validate(&self) -> Result<(), IdRefParseError> {
        let mut current = Some(self);
        while let Some(key) = current {
            if key.kind.is_empty() || key.id.is_empty() {
                return Err(IdRefParseError::EmptySegment(self.to_string()));
            }
            current = key.parent();
        }
        Ok(())
    }
}

impl fmt::Display for IdRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}")?;
        }
        write!(
            f,
            "/{}/{}",
            urlencoding::encode(&self.kind),
            urlencoding::encode(&self.id)
        )
    }
}

impl FromStr for IdRef {
    type Err = IdRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| IdRefParseError::MissingLeadingSlash(s.to_string()))?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(IdRefParseError::EmptySegment(s.to_string()));
        }
        if segments.len() % 2 != 0 {
            return Err(IdRefParseError::OddSegments(s.to_string()));
        }

        let decode = |segment: &str| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| IdRefParseError::InvalidEncoding(s.to_string()))
        };

        let mut current: Option<IdRef> = None;
        for pair in segments.chunks(2) {
            let (kind, id) = (decode(pair[0])?, decode(pair[1])?);
            if kind.is_empty() || id.is_empty() {
                return Err(IdRefParseError::EmptySegment(s.to_string()));
            }
            current = Some(match current {
                None => IdRef::new(kind, id),
                Some(parent) => parent.child(kind, id),
            });
        }

        // segments is non-empty: "" splits into [""] which fails EmptySegment above
        current.ok_or_else(|| IdRefParseError::EmptySegment(s.to_string()))
    }
}

impl Serialize for IdRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
