//! Opaque, totally-ordered version identifiers.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum length of a version label, in bytes.
///
/// Bounded so a label always fits the one-byte length prefix of a
/// [`VersionedEnvelope`](crate::VersionedEnvelope).
pub const MAX_VERSION_LEN: usize = 64;

/// A published schema version.
///
/// Versions are opaque tokens. The only operations are equality, hashing and
/// ordering; there is no arithmetic. The ordering key is the
/// label compared byte-wise, so labels within one domain must share a
/// fixed-width format (the bundled domains use `YYYYMMDD` date stamps).
///
/// # Example
///
/// ```
/// use verchain::Version;
///
/// let old: Version = "20180221".parse().unwrap();
/// let new = Version::new("20180420").unwrap();
/// assert!(old < new);
/// assert_eq!(new.as_str(), "20180420");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(String);

/// Error parsing a version label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The label is empty.
    #[error("version label must not be empty")]
    Empty,
    /// The label exceeds [`MAX_VERSION_LEN`].
    #[error("version label `{0}` is longer than 64 bytes")]
    TooLong(String),
    /// The label contains whitespace or control characters.
    #[error("version label `{0}` contains whitespace or control characters")]
    InvalidCharacter(String),
}

impl Version {
    /// Create a version from a label, validating its shape.
    pub fn new(label: impl Into<String>) -> Result<Self, VersionError> {
        let label = label.into();
        if label.is_empty() {
            return Err(VersionError::Empty);
        }
        if label.len() > MAX_VERSION_LEN {
            return Err(VersionError::TooLong(label));
        }
        if label.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(VersionError::InvalidCharacter(label));
        }
        Ok(Self(label))
    }

    /// The version label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Version {
    type Error = VersionError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::new(label).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_label() {
        let a = Version::new("20180221").unwrap();
        let b = Version::new("20180420").unwrap();
        let c = Version::new("20230704").unwrap();
        assert!(a < b && b < c);
        assert_eq!(a, "20180221".parse().unwrap());
    }

    #[test]
    fn rejects_empty_label() {
        assert_eq!(Version::new(""), Err(VersionError::Empty));
    }

    #[test]
    fn rejects_whitespace() {
        assert!(matches!(
            Version::new("2018 0221"),
            Err(VersionError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn rejects_overlong_label() {
        let label = "9".repeat(MAX_VERSION_LEN + 1);
        assert!(matches!(Version::new(label), Err(VersionError::TooLong(_))));
    }

    #[test]
    fn serde_is_a_plain_string() {
        let v = Version::new("20200923").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"20200923\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_str::<Version>("\"\"").is_err());
    }
}
