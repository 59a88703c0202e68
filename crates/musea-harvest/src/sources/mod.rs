//! Source adapters
//!
//! An adapter turns one museum's listing idiom into a pull-based sequence of
//! normalized records. Three idioms exist:
//!
//! - page cursor ([`aic::AicAdapter`])
//! - sorted candidate-id list ([`id_list::IdListAdapter`], used by Met and CMA)
//! - sorted dump-file directory ([`cma::CmaDumpAdapter`])
//!
//! `iter_collection` positions the adapter from the tracker's cursor;
//! `next_artwork` then yields records one at a time, skipping ids the tracker
//! already knows about.

pub mod aic;
pub mod cma;
pub mod id_list;
pub mod met;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{HarvestError, Result};
use crate::model::{Breadcrumb, ImageReference, NormalizedArtwork, SourceCode};
use crate::progress::{ProgressTracker, SourceCursor};

pub use aic::AicAdapter;
pub use cma::{CmaDumpAdapter, CmaListing};
pub use id_list::{CandidateCache, IdListAdapter, IdListing};
pub use met::MetListing;

pub type MetAdapter = IdListAdapter<MetListing>;
pub type CmaAdapter = IdListAdapter<CmaListing>;

/// Query parameters passed to a source's listing endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionQuery {
    params: BTreeMap<String, String>,
}

impl CollectionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Pairs excluding the given keys
    pub fn pairs_without(&self, skip: &[&str]) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter(|(k, _)| !skip.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Stable identity of the query, used to validate cached candidate lists
    pub fn fingerprint(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl From<BTreeMap<String, String>> for CollectionQuery {
    fn from(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}

/// One step of a source traversal
#[derive(Debug)]
pub enum Harvested {
    Record(NormalizedArtwork),
    /// An item that could not be fetched or normalized
    Failed {
        id: String,
        error: HarvestError,
        breadcrumb: Option<Breadcrumb>,
    },
}

#[async_trait]
pub trait SourceAdapter: Send {
    type Cursor: SourceCursor;

    fn source(&self) -> SourceCode;

    /// Position the traversal from the tracker's cursor. Calling it again
    /// restarts from whatever the tracker now records.
    async fn iter_collection(
        &mut self,
        query: &CollectionQuery,
        tracker: &mut ProgressTracker<Self::Cursor>,
    ) -> Result<()>;

    /// Next unprocessed item, or `None` once the collection is exhausted.
    ///
    /// An `Err` is a listing-level failure; the traversal position is kept so
    /// the call can be retried.
    async fn next_artwork(
        &mut self,
        tracker: &mut ProgressTracker<Self::Cursor>,
    ) -> Result<Option<Harvested>>;

    /// Fetch and normalize one item by id
    async fn get_artwork_details(&self, id: &str) -> Result<NormalizedArtwork>;

    /// Fetchable URL for an image reference
    fn image_url(&self, reference: &ImageReference) -> Option<String>;

    /// Whether items come from a remote API. Remote sources pause after
    /// every item; local ones only after an image download.
    fn is_remote(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = CollectionQuery::new().with("q", "*").with("hasImages", "true");
        let b = CollectionQuery::new().with("hasImages", "true").with("q", "*");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), "hasImages=true&q=*");
        assert_eq!(a.pairs_without(&["q"]), vec![("hasImages".to_string(), "true".to_string())]);
    }
}
