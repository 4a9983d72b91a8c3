//! Release version ordering
//!
//! Release tags are loose (`v1.2.3`, `1.2`, `1.2.3-beta`), so ordering is
//! component-wise on the numeric prefix of each part. A pre-release suffix is
//! ignored: `1.2.3-beta` orders equal to `1.2.3`.

use std::cmp::Ordering;

/// Compare two version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    parse_version(a).cmp(&parse_version(b))
}

/// True if `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

/// True if a release should be offered to the user: strictly newer than the
/// running version and not the version the user dismissed.
pub fn should_surface(candidate: &str, current: &str, dismissed: Option<&str>) -> bool {
    if !is_newer(candidate, current) {
        return false;
    }
    match dismissed {
        Some(dismissed) => dismissed.trim() != candidate.trim(),
        None => true,
    }
}

/// True once the running version has reached `target`
pub fn has_reached(current: &str, target: &str) -> bool {
    compare_versions(current, target) != Ordering::Less
}

fn parse_version(raw: &str) -> [u64; 3] {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let mut parts = [0u64; 3];
    for (slot, part) in parts.iter_mut().zip(trimmed.split('.')) {
        let part = part.split('-').next().unwrap_or("");
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        *slot = digits.parse().unwrap_or(0);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions("2.6.23", "2.6.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_leading_v_ignored() {
        assert_eq!(compare_versions("v1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.1.11", "v1.1.2"), Ordering::Greater);
    }

    #[test]
    fn test_missing_components_padded() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("2", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_suffix_and_garbage() {
        assert_eq!(compare_versions("1.2.3-beta", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("1.x.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("", "0.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_should_surface() {
        assert!(should_surface("v1.2.0", "v1.1.11", None));
        assert!(!should_surface("v1.1.11", "v1.1.11", None));
        assert!(!should_surface("v1.0.0", "v1.1.11", None));
        assert!(!should_surface("v1.2.0", "v1.1.11", Some("v1.2.0")));
        assert!(should_surface("v1.3.0", "v1.1.11", Some("v1.2.0")));
    }

    #[test]
    fn test_has_reached() {
        assert!(has_reached("v1.2.0", "v1.2.0"));
        assert!(has_reached("v1.3.0", "1.2.0"));
        assert!(!has_reached("v1.1.11", "v1.2.0"));
    }
}
