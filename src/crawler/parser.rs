//! HTML parsing
//!
//! The [`Parser`] seam extracts followable links, image sources, and the
//! page title from fetched bodies. The default [`HtmlParser`] is built on
//! `scraper`; swapping in a stub parser lets tests steer the crawl without
//! writing HTML.

use scraper::{Html, Selector};
use url::Url;

/// The parsing seam
///
/// Implementations must be shareable across worker threads.
pub trait Parser: Send + Sync {
    /// Extracts followable links, resolved against `base`
    fn extract_links(&self, base: &Url, body: &[u8]) -> Vec<Url>;

    /// Extracts image sources, resolved against `base`
    fn extract_images(&self, base: &Url, body: &[u8]) -> Vec<Url>;

    /// Extracts the page title
    fn title(&self, body: &[u8]) -> Option<String>;
}

/// Default parser on the `scraper` crate
///
/// # Link Extraction Rules
///
/// **Include:** `<a href>` anywhere in the document. `rel="nofollow"`
/// links are followed.
///
/// **Exclude:** links carrying the `download` attribute;
/// `javascript:`/`mailto:`/`tel:`/`data:` schemes; fragment-only anchors;
/// anything that does not resolve to HTTP(S).
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for HtmlParser {
    fn extract_links(&self, base: &Url, body: &[u8]) -> Vec<Url> {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut links = Vec::new();
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(url) = resolve_link(href, base) {
                    links.push(url);
                }
            }
        }
        links
    }

    fn extract_images(&self, base: &Url, body: &[u8]) -> Vec<Url> {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let Ok(selector) = Selector::parse("img[src]") else {
            return Vec::new();
        };

        let mut images = Vec::new();
        for element in document.select(&selector) {
            if let Some(src) = element.value().attr("src") {
                if let Some(url) = resolve_link(src, base) {
                    images.push(url);
                }
            }
        }
        images
    }

    fn title(&self, body: &[u8]) -> Option<String> {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let selector = Selector::parse("title").ok()?;
        document
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Resolves an href to an absolute URL, or None if it should be excluded
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    // Fragment-only links are same-page anchors
    if href.starts_with('#') {
        return None;
    }

    match base.join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        _ => None,
    }
}
