//! Protocol versioning for safe upgrades.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol version for client-daemon communication.
///
/// Uses semantic versioning: major.minor
/// - Major version bump: breaking changes, incompatible
/// - Minor version bump: additive changes, backward compatible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    /// Creates a new ProtocolVersion.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parses a version string like "1.0".
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let mut parts = s.split('.');

        let major = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| VersionError::InvalidFormat(s.to_string()))?;

        let minor = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| VersionError::InvalidFormat(s.to_string()))?;

        if parts.next().is_some() {
            return Err(VersionError::InvalidFormat(s.to_string()));
        }

        Ok(Self { major, minor })
    }

    /// Returns true if this version is compatible with another.
    ///
    /// Compatibility rules:
    /// - Major versions must match
    /// - Any minor version is compatible within the same major version
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Returns true if this version is the current version.
    pub fn is_current(&self) -> bool {
        *self == Self::CURRENT
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors from version parsing.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid version format: {0} (expected major.minor)")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_versions() {
        let v = ProtocolVersion::parse("1.0").unwrap();
        assert_eq!(v, ProtocolVersion::new(1, 0));

        let v = ProtocolVersion::parse("2.17").unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.minor, 17);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ProtocolVersion::parse("1").is_err());
        assert!(ProtocolVersion::parse("1.0.0").is_err());
        assert!(ProtocolVersion::parse("a.b").is_err());
        assert!(ProtocolVersion::parse("").is_err());
    }

    #[test]
    fn compatibility_is_major_only() {
        let v1_0 = ProtocolVersion::new(1, 0);
        let v1_9 = ProtocolVersion::new(1, 9);
        let v2_0 = ProtocolVersion::new(2, 0);

        assert!(v1_0.is_compatible_with(&v1_9));
        assert!(v1_9.is_compatible_with(&v1_0));
        assert!(!v1_0.is_compatible_with(&v2_0));
    }

    #[test]
    fn default_is_current() {
        assert!(ProtocolVersion::default().is_current());
    }

    #[test]
    fn display_format() {
        assert_eq!(ProtocolVersion::new(1, 4).to_string(), "1.4");
    }
}
