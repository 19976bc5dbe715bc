//! Small value types shared by sessions and stores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes what a session is for. Carried into every store session and
/// surfaced in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usecase {
    name: String,
}

impl Usecase {
    /// Creates a usecase with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the usecase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for Usecase {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for Usecase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque version token assigned by a store at commit.
///
/// The empty token means the store does not track versions; conflict checks
/// are skipped for such states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Creates a version token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The "not tracked" token.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Returns true if this is the "not tracked" token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<untracked>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_version_is_untracked() {
        assert!(Version::empty().is_empty());
        assert!(Version::default().is_empty());
        assert!(!Version::new("v1").is_empty());
        assert_eq!(Version::empty().to_string(), "<untracked>");
    }

    #[test]
    fn usecase_display() {
        assert_eq!(Usecase::new("import").to_string(), "import");
        assert_eq!(Usecase::default().name(), "default");
    }
}
