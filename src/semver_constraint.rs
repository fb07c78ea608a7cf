//! Semantic version parsing and the dependency-constraint grammar.
//!
//! Supported forms: `=X.Y.Z`, `>X.Y.Z`, `>=X.Y.Z`, `<X.Y.Z`, `<=X.Y.Z`,
//! `~X.Y.Z` (compatible within `X.Y.*`), `^X.Y.Z` (compatible within
//! `X.*.*`, or `0.Y.*` when `X=0`). Pre-release suffixes compare
//! lexicographically after the numeric components, matching common semver
//! precedence behavior without pulling in a full semver crate for a
//! narrow, fully-specified grammar.

use crate::error::MeshError;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };
        let mut parts = core.split('.');
        let mut next = |label: &str| -> Result<u64, MeshError> {
            parts
                .next()
                .ok_or_else(|| MeshError::InvalidVersion(format!("missing {label} in '{s}'")))?
                .parse::<u64>()
                .map_err(|_| MeshError::InvalidVersion(format!("non-numeric {label} in '{s}'")))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(MeshError::InvalidVersion(format!("too many components in '{s}'")));
        }
        Ok(Self { major, minor, patch, pre })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // a pre-release version is lower precedence than its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

#[derive(Debug, Clone)]
pub enum Constraint {
    Exact(Version),
    Gt(Version),
    Gte(Version),
    Lt(Version),
    Lte(Version),
    Tilde(Version),
    Caret(Version),
}

impl Constraint {
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (">=", rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            ("<=", rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (">", rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            ("<", rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            ("=", rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            ("~", rest)
        } else if let Some(rest) = s.strip_prefix('^') {
            ("^", rest)
        } else {
            ("=", s)
        };
        let version = Version::parse(rest)?;
        Ok(match op {
            ">=" => Constraint::Gte(version),
            "<=" => Constraint::Lte(version),
            ">" => Constraint::Gt(version),
            "<" => Constraint::Lt(version),
            "~" => Constraint::Tilde(version),
            "^" => Constraint::Caret(version),
            _ => Constraint::Exact(version),
        })
    }

    pub fn satisfies(&self, candidate: &Version) -> bool {
        match self {
            Constraint::Exact(v) => candidate == v,
            Constraint::Gt(v) => candidate > v,
            Constraint::Gte(v) => candidate >= v,
            Constraint::Lt(v) => candidate < v,
            Constraint::Lte(v) => candidate <= v,
            Constraint::Tilde(v) => {
                candidate.major == v.major && candidate.minor == v.minor && candidate >= v
            }
            Constraint::Caret(v) => {
                if v.major == 0 {
                    candidate.major == 0 && candidate.minor == v.minor && candidate >= v
                } else {
                    candidate.major == v.major && candidate >= v
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn caret_excludes_next_major() {
        let c = Constraint::parse("^1.0.0").unwrap();
        assert!(c.satisfies(&v("1.2.3")));
        assert!(!c.satisfies(&v("2.0.0")));
        assert!(!c.satisfies(&v("0.9.9")));
    }

    #[test]
    fn caret_zero_major_restricts_to_minor() {
        let c = Constraint::parse("^0.2.0").unwrap();
        assert!(c.satisfies(&v("0.2.5")));
        assert!(!c.satisfies(&v("0.3.0")));
    }

    #[test]
    fn tilde_restricts_to_patch() {
        let c = Constraint::parse("~1.2.3").unwrap();
        assert!(c.satisfies(&v("1.2.9")));
        assert!(!c.satisfies(&v("1.3.0")));
    }

    #[test]
    fn comparison_operators() {
        assert!(Constraint::parse(">1.0.0").unwrap().satisfies(&v("1.0.1")));
        assert!(!Constraint::parse(">1.0.0").unwrap().satisfies(&v("1.0.0")));
        assert!(Constraint::parse(">=1.0.0").unwrap().satisfies(&v("1.0.0")));
        assert!(Constraint::parse("<=1.0.0").unwrap().satisfies(&v("1.0.0")));
        assert!(Constraint::parse("<1.0.0").unwrap().satisfies(&v("0.9.9")));
    }

    #[test]
    fn tie_break_prefers_highest_within_caret_range() {
        let c = Constraint::parse("^1.0.0").unwrap();
        let candidates = ["1.0.0", "1.2.3", "2.0.0"];
        let best = candidates
            .iter()
            .map(|s| v(s))
            .filter(|cand| c.satisfies(cand))
            .max()
            .unwrap();
        assert_eq!(best, v("1.2.3"));
    }

    #[test]
    fn rejects_malformed_version() {
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("a.b.c").is_err());
    }
}
