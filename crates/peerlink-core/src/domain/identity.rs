//! Node identities.
//!
//! A [`NodeIdentity`] names a node's logical role (`"NODE1"`, `"AIMLAB_CPP"`,
//! ...).  It is the only thing two nodes agree on before discovery, so it is
//! validated once at construction and then carried around as an opaque,
//! already-safe value.  Every identity can be written into a frame without
//! further checks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest identity accepted, in bytes.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Reasons an identity string is rejected.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum IdentityError {
    #[error("node identity must not be empty")]
    Empty,

    #[error("node identity is {len} bytes long; the limit is {max}")]
    TooLong { len: usize, max: usize },

    /// Only printable ASCII other than `:` is allowed.
    #[error("node identity contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Stable name of a node's logical role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Validates and wraps `value`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when `value` is empty, longer than
    /// [`MAX_IDENTITY_LEN`], or contains whitespace, control characters,
    /// non-ASCII characters, or the `:` delimiter.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentityError::Empty);
        }
        if value.len() > MAX_IDENTITY_LEN {
            return Err(IdentityError::TooLong {
                len: value.len(),
                max: MAX_IDENTITY_LEN,
            });
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_graphic() || *c == ':') {
            return Err(IdentityError::InvalidCharacter(bad));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::str::FromStr for NodeIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<NodeIdentity> for String {
    fn from(id: NodeIdentity) -> Self {
        id.0
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_role_names() {
        for name in ["NODE1", "NODE2", "AIMLAB_CPP", "unity-client.7"] {
            assert!(NodeIdentity::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(NodeIdentity::new(""), Err(IdentityError::Empty));
    }

    #[test]
    fn test_rejects_delimiter_and_whitespace() {
        assert_eq!(
            NodeIdentity::new("NODE:1"),
            Err(IdentityError::InvalidCharacter(':'))
        );
        assert_eq!(
            NodeIdentity::new("NODE 1"),
            Err(IdentityError::InvalidCharacter(' '))
        );
    }

    #[test]
    fn test_rejects_overlong_identity() {
        let long = "N".repeat(MAX_IDENTITY_LEN + 1);
        assert!(matches!(
            NodeIdentity::new(long),
            Err(IdentityError::TooLong { .. })
        ));
    }

    #[test]
    fn test_deserializing_validates() {
        // Arrange
        #[derive(Deserialize)]
        struct Holder {
            id: NodeIdentity,
        }

        // Act
        let good: Result<Holder, _> = toml::from_str(r#"id = "NODE1""#);
        let bad: Result<Holder, _> = toml::from_str(r#"id = "NODE:1""#);

        // Assert
        assert_eq!(good.unwrap().id.as_str(), "NODE1");
        assert!(bad.is_err());
    }
}
