//! Parsed robots.txt rules for a single domain
//!
//! Path matching is delegated to the robotstxt crate, which implements the
//! Robots Exclusion Protocol the way major crawlers do: within the selected
//! user-agent group the longest matching rule wins, and `Allow` wins ties.
//! `Crawl-delay` and `Sitemap` directives are not part of that crate's
//! surface, so they are extracted here with a line scan.

use robotstxt::DefaultMatcher;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// The rules extracted from one robots.txt file
#[derive(Debug, Clone)]
pub struct RobotsRules {
    /// Raw robots.txt content, matched against on every query
    content: String,

    /// When set, every path is allowed without consulting the content
    allow_all: bool,

    /// Sitemap URLs declared in the file (a file-wide directive)
    sitemaps: Vec<Url>,
}

impl RobotsRules {
    /// Parses robots.txt content
    ///
    /// Never fails: unparseable lines are ignored by the matcher, and
    /// malformed `Sitemap` URLs are skipped.
    pub fn parse(content: &str) -> Self {
        let sitemaps = extract_sitemaps(content);

        Self {
            content: content.to_string(),
            allow_all: false,
            sitemaps,
        }
    }

    /// A rule set that allows everything
    ///
    /// Used when robots.txt is missing, unfetchable, or disabled.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
            sitemaps: Vec::new(),
        }
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// Group selection prefers an exact user-agent token match and falls
    /// back to the `*` group.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Returns the crawl delay declared for `user_agent`, if any
    ///
    /// `Crawl-delay` applies to the user-agent group it appears in; a delay
    /// in a group naming the agent specifically takes precedence over one
    /// in the `*` group. Negative or unparseable values are ignored.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        if self.allow_all || self.content.is_empty() {
            return None;
        }

        let normalized_agent = user_agent.to_lowercase();

        let mut current_agents: Vec<String> = Vec::new();
        let mut in_group_header = false;
        let mut wildcard_delay: Option<f64> = None;
        let mut agent_delay: Option<f64> = None;

        for line in self.content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // Consecutive User-agent lines form one group; a
                    // User-agent line after rule lines starts a new group
                    if !in_group_header {
                        current_agents.clear();
                    }
                    current_agents.push(value.to_lowercase());
                    in_group_header = true;
                }
                "crawl-delay" => {
                    in_group_header = false;
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay.is_finite() && delay >= 0.0 {
                            if current_agents
                                .iter()
                                .any(|ua| ua != "*" && normalized_agent.contains(ua.as_str()))
                            {
                                agent_delay = Some(delay);
                            } else if current_agents.iter().any(|ua| ua == "*") {
                                wildcard_delay = Some(delay);
                            }
                        }
                    }
                }
                // Allow/Disallow lines keep the current group open;
                // delays may appear after the path rules
                _ => in_group_header = false,
            }
        }

        agent_delay.or(wildcard_delay).map(Duration::from_secs_f64)
    }

    /// Sitemap URLs declared in the file
    pub fn sitemaps(&self) -> &[Url] {
        &self.sitemaps
    }
}

/// Extracts `Sitemap:` directives, which apply file-wide regardless of
/// user-agent groups
fn extract_sitemaps(content: &str) -> Vec<Url> {
    let mut sitemaps = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };

        if key.trim().eq_ignore_ascii_case("sitemap") {
            match Url::parse(value.trim()) {
                Ok(url) => sitemaps.push(url),
                Err(e) => debug!(value = value.trim(), error = %e, "skipping malformed sitemap URL"),
            }
        }
    }

    sitemaps
}
