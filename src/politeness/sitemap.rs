//! XML sitemap parsing
//!
//! Parses `<urlset>` sitemap documents into [`SitemapEntry`] values. The
//! parser is deliberately forgiving: a malformed individual `<url>` entry
//! is skipped with a debug log, and never fails the whole document.

use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// One `<url>` entry from a sitemap
#[derive(Debug, Clone)]
pub struct SitemapEntry {
    /// The page URL from `<loc>`
    pub url: Url,

    /// `<lastmod>` timestamp, when present and parseable
    pub last_modified: Option<DateTime<Utc>>,

    /// `<priority>` value in `[0.0, 1.0]`, when present and parseable
    pub priority: Option<f32>,

    /// `<changefreq>` value, kept as the raw token
    pub change_frequency: Option<String>,
}

/// Parses a sitemap document into its entries
///
/// # Arguments
///
/// * `content` - The sitemap XML text
///
/// # Returns
///
/// All well-formed entries; entries without a parseable `<loc>` are
/// skipped.
pub fn parse_sitemap(content: &str) -> Vec<SitemapEntry> {
    let document = Html::parse_document(content);

    // Selector::parse only fails on invalid selector syntax, and these are
    // fixed strings
    let Ok(url_selector) = Selector::parse("url") else {
        return Vec::new();
    };
    let Ok(loc_selector) = Selector::parse("loc") else {
        return Vec::new();
    };
    let Ok(lastmod_selector) = Selector::parse("lastmod") else {
        return Vec::new();
    };
    let Ok(priority_selector) = Selector::parse("priority") else {
        return Vec::new();
    };
    let Ok(changefreq_selector) = Selector::parse("changefreq") else {
        return Vec::new();
    };

    let mut entries = Vec::new();

    for url_element in document.select(&url_selector) {
        let loc_text = url_element
            .select(&loc_selector)
            .next()
            .map(|loc| loc.text().collect::<String>());

        let Some(loc_text) = loc_text else {
            debug!("skipping sitemap entry without <loc>");
            continue;
        };

        let url = match Url::parse(loc_text.trim()) {
            Ok(url) => url,
            Err(e) => {
                debug!(loc = loc_text.trim(), error = %e, "skipping malformed sitemap entry");
                continue;
            }
        };

        let last_modified = url_element
            .select(&lastmod_selector)
            .next()
            .map(|e| e.text().collect::<String>())
            .and_then(|s| parse_lastmod(s.trim()));

        let priority = url_element
            .select(&priority_selector)
            .next()
            .map(|e| e.text().collect::<String>())
            .and_then(|s| s.trim().parse::<f32>().ok())
            .filter(|p| (0.0..=1.0).contains(p));

        let change_frequency = url_element
            .select(&changefreq_selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        entries.push(SitemapEntry {
            url,
            last_modified,
            priority,
            change_frequency,
        });
    }

    entries
}

/// Parses a `<lastmod>` value, which may be a full W3C datetime or a bare
/// date
fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/</loc>
    <lastmod>2024-03-01</lastmod>
    <priority>0.8</priority>
    <changefreq>daily</changefreq>
  </url>
  <url>
    <loc>https://example.com/about</loc>
  </url>
</urlset>"#;

    #[test]
    fn test_parse_full_sitemap() {
        let entries = parse_sitemap(SITEMAP);
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.url.as_str(), "https://example.com/");
        assert!(first.last_modified.is_some());
        assert_eq!(first.priority, Some(0.8));
        assert_eq!(first.change_frequency.as_deref(), Some("daily"));

        let second = &entries[1];
        assert_eq!(second.url.as_str(), "https://example.com/about");
        assert!(second.last_modified.is_none());
        assert!(second.priority.is_none());
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let content = r#"<urlset>
  <url><loc>not a url</loc></url>
  <url><loc>https://example.com/ok</loc></url>
  <url><priority>0.5</priority></url>
</urlset>"#;

        let entries = parse_sitemap(content);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url.as_str(), "https://example.com/ok");
    }

    #[test]
    fn test_rfc3339_lastmod() {
        let content = r#"<urlset><url>
  <loc>https://example.com/page</loc>
  <lastmod>2024-03-01T12:30:00+00:00</lastmod>
</url></urlset>"#;

        let entries = parse_sitemap(content);
        assert_eq!(entries.len(), 1);
        let lastmod = entries[0].last_modified.unwrap();
        assert_eq!(lastmod.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }

    #[test]
    fn test_invalid_lastmod_and_priority_dropped() {
        let content = r#"<urlset><url>
  <loc>https://example.com/page</loc>
  <lastmod>last tuesday</lastmod>
  <priority>5.0</priority>
</url></urlset>"#;

        let entries = parse_sitemap(content);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_modified.is_none());
        assert!(entries[0].priority.is_none());
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_sitemap("").is_empty());
        assert!(parse_sitemap("<urlset></urlset>").is_empty());
    }
}
