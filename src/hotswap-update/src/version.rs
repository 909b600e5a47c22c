//! Release tag comparison.

use std::cmp::Ordering;

/// Result of comparing two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComparison {
    /// Current is older than target
    Older,
    /// Current equals target
    Equal,
    /// Current is newer than target
    Newer,
}

/// Compare two semver-like tags.
pub fn compare_versions(current: &str, target: &str) -> VersionComparison {
    match version_order(current, target) {
        Ordering::Less => VersionComparison::Older,
        Ordering::Equal => VersionComparison::Equal,
        Ordering::Greater => VersionComparison::Newer,
    }
}

/// Total order over tags: numeric major/minor/patch, then a release without a
/// prerelease suffix above one with a suffix, then suffixes lexically.
pub fn version_order(a: &str, b: &str) -> Ordering {
    let (a_core, a_pre) = parse_version(a);
    let (b_core, b_pre) = parse_version(b);

    a_core.cmp(&b_core).then_with(|| match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    })
}

/// Whether two tags name the same release (`v1.2.3` and `1.2.3` do).
pub fn versions_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

/// Parse a tag into comparable parts.
fn parse_version(version: &str) -> ((u64, u64, u64), Option<&str>) {
    let version = normalize(version);

    // Build metadata never affects ordering
    let version = version.split_once('+').map_or(version, |(v, _)| v);

    let (version_part, prerelease) = match version.split_once('-') {
        Some((v, p)) => (v, Some(p)),
        None => (version, None),
    };

    let mut parts = version_part
        .split('.')
        .take(3)
        .map(|s| s.parse::<u64>().unwrap_or(0));

    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    ((major, minor, patch), prerelease)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("0.1.0", "0.2.0"), VersionComparison::Older);
        assert_eq!(compare_versions("0.2.0", "0.2.0"), VersionComparison::Equal);
        assert_eq!(compare_versions("0.3.0", "0.2.0"), VersionComparison::Newer);
        assert_eq!(compare_versions("1.0.0", "0.9.9"), VersionComparison::Newer);
        assert_eq!(compare_versions("0.10.0", "0.9.0"), VersionComparison::Newer);
    }

    #[test]
    fn test_compare_versions_with_prefix() {
        assert_eq!(
            compare_versions("v0.1.0", "0.2.0"),
            VersionComparison::Older
        );
        assert_eq!(
            compare_versions("0.1.0", "v0.2.0"),
            VersionComparison::Older
        );
    }

    #[test]
    fn test_prerelease_ranks_below_release() {
        assert_eq!(version_order("v1.0.0-rc.1", "v1.0.0"), Ordering::Less);
        assert_eq!(version_order("v1.0.0-beta", "v1.0.0-alpha"), Ordering::Greater);
        assert_eq!(version_order("v1.0.0+build.5", "v1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match("v1.2.3", "v1.2.3"));
        assert!(versions_match("v1.2.3", "1.2.3"));
        assert!(versions_match(" v1.2.3\n", "v1.2.3"));
        assert!(!versions_match("v1.2.3", "v1.2.4"));
        assert!(!versions_match("nightly", "v0.0.0"));
    }
}
