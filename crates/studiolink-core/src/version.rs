//! Version negotiation.
//!
//! Versions are `major.minor.patch` strings. Two versions are compatible when
//! their major and minor segments are textually equal; the patch segment is
//! ignored so bugfix releases of either side interoperate.

use std::fmt;

/// The dot-separated segments of a version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionParts<'a> {
    pub major: &'a str,
    pub minor: &'a str,
    pub patch: Option<&'a str>,
}

impl<'a> VersionParts<'a> {
    /// Split a version string. Returns `None` when fewer than two segments exist.
    pub fn parse(s: &'a str) -> Option<Self> {
        let mut segments = s.split('.');
        let major = segments.next()?;
        let minor = segments.next()?;
        Some(Self {
            major,
            minor,
            patch: segments.next(),
        })
    }

    /// Whether `self` and `other` share major and minor segments.
    pub fn same_series(&self, other: &VersionParts<'_>) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for VersionParts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

/// Decide whether a peer reporting `peer` may talk to a server at `server`.
///
/// Malformed input is never compatible.
pub fn is_compatible(server: &str, peer: &str) -> bool {
    match (VersionParts::parse(server), VersionParts::parse(peer)) {
        (Some(s), Some(p)) => s.same_series(&p),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(is_compatible("1.1.0", "1.1.0"));
    }

    #[test]
    fn minor_bump_is_incompatible() {
        assert!(!is_compatible("1.1.0", "1.2.0"));
    }

    #[test]
    fn patch_is_ignored() {
        assert!(is_compatible("1.1.0", "1.1.99"));
        assert!(is_compatible("1.1", "1.1.7"));
    }

    #[test]
    fn major_bump_is_incompatible() {
        assert!(!is_compatible("2.0.0", "1.0.0"));
    }

    #[test]
    fn malformed_is_incompatible() {
        assert!(!is_compatible("1.1.0", "1"));
        assert!(!is_compatible("", "1.1.0"));
        assert!(!is_compatible("1.1.0", "garbage"));
    }

    #[test]
    fn segments_compare_textually() {
        assert!(!is_compatible("1.01.0", "1.1.0"));
    }

    #[test]
    fn parse_and_display() {
        let v = VersionParts::parse("2.0.3").unwrap();
        assert_eq!(v.major, "2");
        assert_eq!(v.minor, "0");
        assert_eq!(v.patch, Some("3"));
        assert_eq!(v.to_string(), "2.0.3");
        assert_eq!(VersionParts::parse("7"), None);
    }
}
