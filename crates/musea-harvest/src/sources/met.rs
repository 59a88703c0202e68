//! Metropolitan Museum of Art listing

use async_trait::async_trait;
use serde_json::Value;

use super::{CollectionQuery, IdListing};
use crate::error::Result;
use crate::http::HttpClient;
use crate::model::{ImageReference, NormalizedArtwork, SourceCode};
use crate::normalize::{id_value, MetFactory, MetadataFactory};

pub struct MetListing {
    http: HttpClient,
    base_url: String,
    factory: MetFactory,
}

impl MetListing {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            factory: MetFactory,
        }
    }
}

#[async_trait]
impl IdListing for MetListing {
    fn source(&self) -> SourceCode {
        SourceCode::Met
    }

    /// `/search` when the query has a `q` term, `/objects` otherwise
    async fn list_ids(&self, query: &CollectionQuery) -> Result<Vec<String>> {
        let url = if query.get("q").is_some() {
            format!("{}/search", self.base_url)
        } else {
            format!("{}/objects", self.base_url)
        };

        let body = self.http.get_json(&url, &query.pairs()).await?;

        // objectIDs is null when nothing matches
        let ids = body
            .get("objectIDs")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|id| id_value(Some(id))).collect())
            .unwrap_or_default();
        Ok(ids)
    }

    async fn fetch_details(&self, id: &str) -> Result<NormalizedArtwork> {
        let url = format!("{}/objects/{}", self.base_url, id);
        let body = self.http.get_json(&url, &[]).await?;
        self.factory.create_metadata(&body)
    }

    fn image_url(&self, reference: &ImageReference) -> Option<String> {
        match reference {
            ImageReference::Url(url) => Some(url.clone()),
            ImageReference::IiifId(_) => None,
        }
    }
}
