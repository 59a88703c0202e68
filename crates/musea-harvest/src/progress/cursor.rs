//! Source-specific resumption cursors
//!
//! A cursor is the only per-source part of the progress state. It is
//! flattened into the progress document, so its field names are the
//! on-disk names.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;

use crate::model::{compare_ids, Breadcrumb};

/// Bookmark that moves forward as records reach a terminal outcome
pub trait SourceCursor:
    Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static
{
    /// Move forward to `breadcrumb`. Never moves backward.
    fn advance(&mut self, breadcrumb: &Breadcrumb);

    /// Short human-readable position for status output
    fn describe(&self) -> String;
}

/// Page-number cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    #[serde(default)]
    pub last_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

impl SourceCursor for PageCursor {
    fn advance(&mut self, breadcrumb: &Breadcrumb) {
        if let Breadcrumb::Page { page, total_pages } = breadcrumb {
            self.last_page = self.last_page.max(*page);
            if total_pages.is_some() {
                self.total_pages = *total_pages;
            }
        }
    }

    fn describe(&self) -> String {
        match self.total_pages {
            Some(total) => format!("page {}/{}", self.last_page, total),
            None => format!("page {}", self.last_page),
        }
    }
}

/// Last object id reached in a sorted candidate list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCursor {
    #[serde(default, deserialize_with = "super::state::optional_id")]
    pub last_object_id: Option<String>,
    #[serde(default)]
    pub total_objects: usize,
}

impl SourceCursor for ObjectCursor {
    fn advance(&mut self, breadcrumb: &Breadcrumb) {
        if let Breadcrumb::Object { object_id, total_objects } = breadcrumb {
            let forward = match &self.last_object_id {
                Some(last) => compare_ids(object_id, last) == Ordering::Greater,
                None => true,
            };
            if forward {
                self.last_object_id = Some(object_id.clone());
            }
            self.total_objects = *total_objects;
        }
    }

    fn describe(&self) -> String {
        match &self.last_object_id {
            Some(id) => format!("object {} of {}", id, self.total_objects),
            None => format!("not started ({} candidates)", self.total_objects),
        }
    }
}

/// Position in a sorted directory of dump files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFileCursor {
    #[serde(default)]
    pub last_processed_index: usize,
    #[serde(default)]
    pub total_files: usize,
}

impl SourceCursor for DumpFileCursor {
    fn advance(&mut self, breadcrumb: &Breadcrumb) {
        if let Breadcrumb::DumpFile { index, total_files } = breadcrumb {
            self.last_processed_index = self.last_processed_index.max(*index);
            self.total_files = *total_files;
        }
    }

    fn describe(&self) -> String {
        format!("file {}/{}", self.last_processed_index, self.total_files)
    }
}
