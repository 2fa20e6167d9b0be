//! Politeness layer
//!
//! Everything that decides whether and how gently a domain may be
//! contacted: robots.txt rules, crawl delays, and sitemap discovery.

mod cache;
mod rules;
pub(crate) mod sitemap;

pub use cache::PolitenessCache;
pub use rules::RobotsRules;
pub use sitemap::{parse_sitemap, SitemapEntry};
