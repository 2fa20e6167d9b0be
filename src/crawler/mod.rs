//! The crawl core: engine, worker pool, frontier, fetching, and parsing

mod annotate;
mod engine;
mod fetcher;
mod frontier;
mod parser;
mod pool;
mod stats;

pub use annotate::{Annotator, NoopAnnotator};
pub use engine::CrawlEngine;
pub use fetcher::{FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use frontier::{Frontier, FrontierEntry, Submission};
pub use parser::{HtmlParser, Parser};
pub use stats::{CrawlStats, StatsSnapshot};
