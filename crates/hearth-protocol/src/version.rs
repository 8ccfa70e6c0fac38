//! Engine version values and compatibility ranges.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error produced when parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    #[error("empty version string")]
    Empty,
    #[error("version `{0}` must have three dot-separated parts")]
    Shape(String),
    #[error("version `{0}` contains a non-numeric part")]
    Number(String),
}

/// A `major.minor.patch` engine version.
///
/// Ordering is lexicographic over the three components, which matches how
/// release numbering is compared everywhere else in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Artifact names and greeting lines may carry a leading `v`.
        let trimmed = s.trim().trim_start_matches('v');
        if trimmed.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        let mut parts = trimmed.split('.');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| ParseVersionError::Shape(s.to_string()))?
                .parse::<u64>()
                .map_err(|_| ParseVersionError::Number(s.to_string()))
        };
        let version = Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(ParseVersionError::Shape(s.to_string()));
        }
        Ok(version)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An inclusive compatibility window over engine versions.
///
/// `max` of `None` means the range is open-ended above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: Version,
    pub max: Option<Version>,
}

impl VersionRange {
    /// Range accepting `min` and everything above it.
    pub const fn at_least(min: Version) -> Self {
        Self { min, max: None }
    }

    /// Range accepting versions between `min` and `max`, inclusive.
    pub const fn between(min: Version, max: Version) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// True when no version can satisfy the range.
    pub fn is_empty(&self) -> bool {
        matches!(self.max, Some(max) if max < self.min)
    }

    pub fn contains(&self, version: Version) -> bool {
        if version < self.min {
            return false;
        }
        match self.max {
            Some(max) => version <= max,
            None => true,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{} through {}", self.min, max),
            None => write!(f, "{} or newer", self.min),
        }
    }
}
