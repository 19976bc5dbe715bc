//! Entity identities and references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique key of one logical entity.
///
/// Identities are assigned once when an entity is created and never change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an existing identity string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identity text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lightweight pointer to an entity that does not force it to load.
///
/// Equality, ordering and hashing are by identity alone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityReference {
    identity: Identity,
}

impl EntityReference {
    /// Creates a reference to the given identity.
    #[must_use]
    pub const fn new(identity: Identity) -> Self {
        Self { identity }
    }

    /// Creates a reference to a freshly generated identity.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Identity::generate())
    }

    /// Parses a reference from its string form.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::new(Identity::new(text))
    }

    /// Returns the referenced identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the reference as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.identity.as_str()
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity.fmt(f)
    }
}

impl FromStr for EntityReference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<Identity> for EntityReference {
    fn from(identity: Identity) -> Self {
        Self::new(identity)
    }
}

impl From<&str> for EntityReference {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_identities_are_distinct() {
        let ids: HashSet<_> = (0..100).map(|_| Identity::generate()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn reference_equality_is_by_identity() {
        let a = EntityReference::parse("E1");
        let b: EntityReference = "E1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "E1");
        assert_ne!(a, EntityReference::parse("E2"));
    }

    #[test]
    fn reference_serializes_as_plain_string() {
        let json = serde_json::to_string(&EntityReference::parse("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
