//! Type-qualified record identities.
//!
//! Every identity carries the record kind it belongs to, rendered as
//! `kind:key`. Embedding the kind makes identities globally unique across
//! types, which is what lets the import side keep a single remap table.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::GraftError;

/// A store-assigned identity, qualified by its record kind.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    kind: String,
    key: String,
}

impl RecordId {
    /// Build an identity from its parts.
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Mint a fresh identity under `kind` with a generated key.
    pub fn generate(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: Uuid::new_v4().to_string(),
        }
    }

    /// Parse a `kind:key` identity string.
    pub fn parse(s: &str) -> Result<Self, GraftError> {
        match s.split_once(':') {
            Some((kind, key)) if !kind.is_empty() && !key.is_empty() => {
                Ok(Self::new(kind, key))
            }
            _ => Err(GraftError::InvalidRecordId {
                input: s.to_string(),
            }),
        }
    }

    /// The record kind this identity belongs to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The store-assigned key within the kind's namespace.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

impl FromStr for RecordId {
    type Err = GraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a record identity in the form 'kind:key'")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                RecordId::parse(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}
