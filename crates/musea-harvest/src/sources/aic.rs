//! Art Institute of Chicago: page-cursor traversal

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{info, warn};

use super::{CollectionQuery, Harvested, SourceAdapter};
use crate::error::{HarvestError, Result};
use crate::http::HttpClient;
use crate::model::{Breadcrumb, ImageReference, NormalizedArtwork, SourceCode};
use crate::normalize::aic::AIC_FIELDS;
use crate::normalize::{id_value, AicFactory, MetadataFactory};
use crate::progress::{PageCursor, ProgressTracker};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// IIIF size segment requested for AIC images
const IIIF_SIZE: &str = "843,";

pub struct AicAdapter {
    http: HttpClient,
    base_url: String,
    image_base_url: String,
    factory: AicFactory,
    params: Vec<(String, String)>,
    search: bool,
    next_page: u32,
    current_page: u32,
    total_pages: Option<u32>,
    buffer: VecDeque<Value>,
    exhausted: bool,
}

impl AicAdapter {
    pub fn new(http: HttpClient, base_url: impl Into<String>, image_base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            image_base_url: image_base_url.into().trim_end_matches('/').to_string(),
            factory: AicFactory,
            params: Vec::new(),
            search: false,
            next_page: 1,
            current_page: 0,
            total_pages: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fields() -> String {
        AIC_FIELDS.join(",")
    }

    fn listing_url(&self) -> String {
        if self.search {
            format!("{}/artworks/search", self.base_url)
        } else {
            format!("{}/artworks", self.base_url)
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        if let Some(total) = self.total_pages {
            if self.next_page > total {
                info!(source = "aic", total_pages = total, "Reached last page");
                self.exhausted = true;
                return Ok(());
            }
        }

        let page = self.next_page;
        let mut params = self.params.clone();
        params.push(("page".to_string(), page.to_string()));

        info!(source = "aic", page, total_pages = ?self.total_pages, "Fetching page");
        let body = match self.http.get_json(&self.listing_url(), &params).await {
            Ok(body) => body,
            Err(e) if e.status() == Some(400) => {
                info!(source = "aic", page, "Page rejected with HTTP 400; treating as end of collection");
                self.exhausted = true;
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        if let Some(total) = body
            .pointer("/pagination/total_pages")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
        {
            self.total_pages = Some(total);
        }

        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| HarvestError::validation(format!("page {} has no data array", page)))?;

        if data.is_empty() {
            info!(source = "aic", page, "Empty page; end of collection");
            self.exhausted = true;
            return Ok(());
        }

        self.buffer.extend(data.iter().cloned());
        self.current_page = page;
        self.next_page = page + 1;
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for AicAdapter {
    type Cursor = PageCursor;

    fn source(&self) -> SourceCode {
        SourceCode::Aic
    }

    async fn iter_collection(
        &mut self,
        query: &CollectionQuery,
        tracker: &mut ProgressTracker<PageCursor>,
    ) -> Result<()> {
        self.search = query.get("q").is_some();
        self.params = query.pairs_without(&["page"]);
        if query.get("fields").is_none() {
            self.params.push(("fields".to_string(), Self::fields()));
        }
        if query.get("limit").is_none() {
            self.params.push(("limit".to_string(), DEFAULT_PAGE_SIZE.to_string()));
        }

        // The last page may be partially processed, so it is fetched again
        let cursor = tracker.cursor();
        self.next_page = cursor.last_page.max(1);
        self.current_page = self.next_page;
        self.total_pages = cursor.total_pages;
        self.buffer.clear();
        self.exhausted = false;

        info!(source = "aic", start_page = self.next_page, "Starting page traversal");
        Ok(())
    }

    async fn next_artwork(
        &mut self,
        tracker: &mut ProgressTracker<PageCursor>,
    ) -> Result<Option<Harvested>> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                let breadcrumb = Breadcrumb::Page {
                    page: self.current_page,
                    total_pages: self.total_pages,
                };
                match self.factory.create_metadata(&raw) {
                    Ok(art) if tracker.is_processed(&art.id) => continue,
                    Ok(art) => return Ok(Some(Harvested::Record(art.with_breadcrumb(breadcrumb)))),
                    Err(error) => match id_value(raw.get("id")) {
                        Some(id) if tracker.is_processed(&id) => continue,
                        Some(id) => {
                            return Ok(Some(Harvested::Failed {
                                id,
                                error,
                                breadcrumb: Some(breadcrumb),
                            }))
                        },
                        None => {
                            warn!(
                                source = "aic",
                                page = self.current_page,
                                error = %error,
                                "Dropping record without id"
                            );
                            continue;
                        },
                    },
                }
            }

            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn get_artwork_details(&self, id: &str) -> Result<NormalizedArtwork> {
        let url = format!("{}/artworks/{}", self.base_url, id);
        let body = self
            .http
            .get_json(&url, &[("fields".to_string(), Self::fields())])
            .await?;
        let data = body
            .get("data")
            .ok_or_else(|| HarvestError::validation(format!("artwork {} response has no data", id)))?;
        self.factory.create_metadata(data)
    }

    fn image_url(&self, reference: &ImageReference) -> Option<String> {
        match reference {
            ImageReference::IiifId(id) => Some(format!(
                "{}/{}/full/{}/0/default.jpg",
                self.image_base_url, id, IIIF_SIZE
            )),
            ImageReference::Url(url) => Some(url.clone()),
        }
    }
}
