/// Checks if a domain matches a wildcard pattern
///
/// Two pattern forms are supported:
/// 1. Exact: `"example.com"` matches only `"example.com"`
/// 2. Wildcard: `"*.example.com"` matches the bare domain and any
///    subdomain at any depth (`"example.com"`, `"blog.example.com"`,
///    `"api.v2.example.com"`)
///
/// Both sides are expected to already be lowercase; the comparison itself
/// is case-sensitive.
///
/// # Arguments
///
/// * `pattern` - The domain pattern, optionally starting with `*.`
/// * `candidate` - The domain to check against the pattern
///
/// # Examples
///
/// ```
/// use spinneret::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "blog.example.com"));
/// assert!(!matches_wildcard("*.example.com", "notexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "other.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
    }

    #[test]
    fn test_wildcard_matches_bare_domain() {
        assert!(matches_wildcard("*.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_matches_subdomains() {
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
    }

    #[test]
    fn test_wildcard_rejects_suffix_lookalikes() {
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.org"));
        assert!(!matches_wildcard("*.example.com", "example.org"));
    }

    #[test]
    fn test_case_sensitive_comparison() {
        assert!(!matches_wildcard("example.com", "EXAMPLE.COM"));
    }

    #[test]
    fn test_multiple_dots_in_base() {
        assert!(matches_wildcard("*.co.uk", "example.co.uk"));
        assert!(matches_wildcard("*.co.uk", "blog.example.co.uk"));
        assert!(!matches_wildcard("*.co.uk", "co.jp"));
    }

    #[test]
    fn test_empty_candidate() {
        assert!(!matches_wildcard("*.example.com", ""));
        assert!(!matches_wildcard("", "example.com"));
    }
}
