use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{BugcheckError, Result};

/// A `major.minor.patch` version
///
/// Parsing accepts a missing patch component (`3.5` is `3.5.0`) and ignores
/// any build suffix after the first `-` (`2021.2.0-123` is `2021.2.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl Version {
    /// Create a version from its components
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Evaluate `self <comparator> other`
    #[must_use]
    pub fn satisfies(&self, comparator: Comparator, other: &Self) -> bool {
        let ordering = self.cmp(other);
        match comparator {
            Comparator::Newer => ordering == Ordering::Greater,
            Comparator::NewerOrEqual => ordering != Ordering::Less,
            Comparator::Older => ordering == Ordering::Less,
            Comparator::OlderOrEqual => ordering != Ordering::Greater,
            Comparator::Equal => ordering == Ordering::Equal,
        }
    }
}

impl FromStr for Version {
    type Err = BugcheckError;

    fn from_str(s: &str) -> Result<Self> {
        let core = s.trim().split('-').next().unwrap_or_default();
        let parts: Vec<&str> = core.split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(BugcheckError::InvalidVersion(s.to_string()));
        }

        let number = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| BugcheckError::InvalidVersion(s.to_string()))
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: parts.get(2).map_or(Ok(0), |p| number(p))?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Version comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `>` / `newer`
    Newer,
    /// `>=` / `newer or equal`
    NewerOrEqual,
    /// `<` / `older`
    Older,
    /// `<=` / `older or equal`
    OlderOrEqual,
    /// `==` / `=` / `equal`
    Equal,
}

impl FromStr for Comparator {
    type Err = BugcheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "newer" => Ok(Self::Newer),
            ">=" | "newer or equal" => Ok(Self::NewerOrEqual),
            "<" | "older" => Ok(Self::Older),
            "<=" | "older or equal" => Ok(Self::OlderOrEqual),
            "==" | "=" | "equal" => Ok(Self::Equal),
            other => Err(BugcheckError::InvalidComparison(other.to_string())),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Newer => ">",
            Self::NewerOrEqual => ">=",
            Self::Older => "<",
            Self::OlderOrEqual => "<=",
            Self::Equal => "==",
        };
        f.write_str(symbol)
    }
}

/// Check that a unit requiring engine `required` can run on `current`.
///
/// The major versions must match and the running minor version must be at
/// least the required one. Patch levels are ignored.
pub fn check_engine_compat(required: &Version, current: &Version) -> Result<()> {
    if required.major != current.major {
        return Err(BugcheckError::IncompatibleEngine {
            required: format!("{}.x.x", required.major),
            current: current.to_string(),
        });
    }
    if required.minor > current.minor {
        return Err(BugcheckError::IncompatibleEngine {
            required: format!("{}.{}.x", required.major, required.minor),
            current: current.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parses_product_versions() {
        assert_eq!(v("2021.2.0"), Version::new(2021, 2, 0));
        assert_eq!(v("2020.3.1-89"), Version::new(2020, 3, 1));
        assert_eq!(v("3.5"), Version::new(3, 5, 0));
        assert!("2021".parse::<Version>().is_err());
        assert!("a.b.c".parse::<Version>().is_err());
    }

    #[test]
    fn engine_minor_too_low_is_rejected() {
        let err = check_engine_compat(&v("3.5.0"), &v("3.4.9")).unwrap_err();
        assert!(matches!(err, BugcheckError::IncompatibleEngine { .. }));
    }

    #[test]
    fn engine_same_version_is_accepted() {
        assert!(check_engine_compat(&v("3.5.0"), &v("3.5.0")).is_ok());
        assert!(check_engine_compat(&v("3.5.0"), &v("3.7.2")).is_ok());
    }

    #[test]
    fn engine_major_mismatch_is_rejected() {
        let err = check_engine_compat(&v("3.5.0"), &v("4.0.0")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "this bugcheck requires engine 3.x.x (currently using 4.0.0)"
        );
    }

    #[test]
    fn comparators() {
        let current = v("2021.1.0");
        assert!(current.satisfies(">=".parse().unwrap(), &v("2020.2.0")));
        assert!(current.satisfies("newer".parse().unwrap(), &v("2020.2.0")));
        assert!(current.satisfies("<".parse().unwrap(), &v("2021.1.1")));
        assert!(current.satisfies("==".parse().unwrap(), &v("2021.1.0")));
        assert!(!current.satisfies("older or equal".parse().unwrap(), &v("2020.9.9")));
        assert!("~=".parse::<Comparator>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&v("3.5.1")).unwrap();
        assert_eq!(json, "\"3.5.1\"");
        let parsed: Version = serde_json::from_str("\"2021.1.0\"").unwrap();
        assert_eq!(parsed, v("2021.1.0"));
    }
}
