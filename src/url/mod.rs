//! URL handling module
//!
//! This module provides URL normalization, domain extraction, wildcard
//! matching, and the admission filters applied by the frontier.

mod domain;
mod matcher;
mod normalize;

use crate::config::FiltersConfig;

// Re-export main functions
pub use domain::extract_domain;
pub use matcher::matches_wildcard;
pub use normalize::normalize_url;

/// Checks whether a domain passes the configured allow-list
///
/// An empty allow-list admits every domain. Patterns support the same
/// wildcard form as [`matches_wildcard`], so `*.example.com` matches the
/// bare domain and all subdomains.
///
/// # Arguments
///
/// * `domain` - The domain to test (lowercase)
/// * `filters` - The configured URL filters
pub fn domain_allowed(domain: &str, filters: &FiltersConfig) -> bool {
    if filters.allowed_domains.is_empty() {
        return true;
    }

    filters
        .allowed_domains
        .iter()
        .any(|pattern| matches_wildcard(pattern, domain))
}

/// Checks whether a URL path hits one of the configured excluded prefixes
///
/// # Arguments
///
/// * `path` - The URL path (starting with `/`)
/// * `filters` - The configured URL filters
pub fn path_excluded(path: &str, filters: &FiltersConfig) -> bool {
    filters
        .excluded_paths
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
}
