//! Page annotation hook
//!
//! Extension seam for enriching crawled pages with derived metadata
//! (classification, content analysis, scoring). Whatever string an
//! annotator returns is stored verbatim in the page's `annotations`
//! column.

use crate::crawler::FetchedPage;

/// The annotation seam
pub trait Annotator: Send + Sync {
    /// Produces an annotation for a fetched page, or None to store nothing
    fn annotate(&self, page: &FetchedPage) -> Option<String>;
}

/// Default annotator that stores nothing
#[derive(Debug, Default)]
pub struct NoopAnnotator;

impl Annotator for NoopAnnotator {
    fn annotate(&self, _page: &FetchedPage) -> Option<String> {
        None
    }
}
