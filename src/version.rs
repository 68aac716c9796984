//! Update version identifiers
//!
//! Versions are dotted triples (`major.minor.patch`). Comparison is numeric and
//! component-wise, left to right; shorter inputs such as `1.2` are padded with
//! zeros on parse, so `1.2` and `1.2.0` are the same version.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::OtaError;

/// Dotted-triple update version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Create a new version
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version every client is assumed to run when it does not say otherwise
    pub const fn baseline() -> Self {
        Self::new(1, 0, 0)
    }

    /// Same version with the patch component incremented
    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch.saturating_add(1))
    }

    /// Same version with the patch component decremented, floored at zero
    pub fn previous_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch.saturating_sub(1))
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::baseline()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| OtaError::InvalidVersion {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        // Remove 'v' prefix if present
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        for component in trimmed.split('.') {
            if count == parts.len() {
                return Err(invalid("more than three components"));
            }
            parts[count] = component
                .parse()
                .map_err(|_| invalid("components must be unsigned integers"))?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
