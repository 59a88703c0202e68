//! Canonical artwork record shared by every source

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::HarvestError;

/// A harvestable source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceCode {
    #[serde(rename = "aic")]
    Aic,
    #[serde(rename = "met")]
    Met,
    #[serde(rename = "cma")]
    Cma,
    #[serde(rename = "cma-dump")]
    CmaDump,
}

impl SourceCode {
    pub const ALL: [SourceCode; 4] =
        [SourceCode::Aic, SourceCode::Met, SourceCode::Cma, SourceCode::CmaDump];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCode::Aic => "aic",
            SourceCode::Met => "met",
            SourceCode::Cma => "cma",
            SourceCode::CmaDump => "cma-dump",
        }
    }

    /// Museum code used as the persistence key
    ///
    /// The CMA API and the CMA dump describe the same collection, so they
    /// share one key and dedupe against each other in the repository.
    pub fn museum_code(&self) -> &'static str {
        match self {
            SourceCode::Aic => "aic",
            SourceCode::Met => "met",
            SourceCode::Cma | SourceCode::CmaDump => "cma",
        }
    }

    /// Prefix used in generated image filenames
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SourceCode::Aic => "AIC",
            SourceCode::Met => "MET",
            SourceCode::Cma | SourceCode::CmaDump => "CMA",
        }
    }

    pub fn museum_name(&self) -> &'static str {
        match self {
            SourceCode::Aic => "Art Institute of Chicago",
            SourceCode::Met => "Metropolitan Museum of Art",
            SourceCode::Cma | SourceCode::CmaDump => "Cleveland Museum of Art",
        }
    }

    /// Environment variable prefix for per-source overrides
    pub fn env_prefix(&self) -> String {
        format!("MUSEA_{}_", self.as_str().to_uppercase().replace('-', "_"))
    }
}

impl fmt::Display for SourceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceCode {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        SourceCode::ALL
            .into_iter()
            .find(|code| code.as_str() == wanted)
            .ok_or_else(|| HarvestError::config(format!("unknown source '{}'", s)))
    }
}

/// Where an artwork's image comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageReference {
    /// Directly fetchable URL
    Url(String),
    /// IIIF image identifier; the adapter builds the URL
    IiifId(String),
}

/// Position of a record within its source's traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Breadcrumb {
    Page { page: u32, total_pages: Option<u32> },
    Object { object_id: String, total_objects: usize },
    DumpFile { index: usize, total_files: usize },
}

/// Source-independent artwork record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArtwork {
    pub id: String,
    pub accession_number: Option<String>,
    pub title: String,
    pub artist: String,
    pub artist_display: Option<String>,
    pub artist_bio: Option<String>,
    pub artist_nationality: Option<String>,
    pub artist_birth_year: Option<i32>,
    pub artist_death_year: Option<i32>,

    pub date_display: Option<String>,
    pub date_start: Option<i32>,
    pub date_end: Option<i32>,
    pub medium: Option<String>,
    pub dimensions: Option<String>,
    pub height_cm: Option<f64>,
    pub width_cm: Option<f64>,
    pub depth_cm: Option<f64>,
    pub diameter_cm: Option<f64>,

    pub department: Option<String>,
    pub artwork_type: Option<String>,
    pub culture: Vec<String>,
    pub is_public_domain: bool,
    pub credit_line: Option<String>,
    pub is_on_view: Option<bool>,
    pub is_highlight: Option<bool>,

    pub description: Option<String>,
    pub short_description: Option<String>,
    pub provenance: Option<String>,
    pub inscriptions: Vec<String>,
    pub fun_fact: Option<String>,
    pub keywords: Vec<String>,

    pub image: Option<ImageReference>,
    pub colorfulness: Option<f64>,
    pub color_h: Option<f64>,
    pub color_s: Option<f64>,
    pub color_l: Option<f64>,

    /// Set by the adapter that produced the record
    #[serde(skip)]
    pub breadcrumb: Option<Breadcrumb>,
}

impl NormalizedArtwork {
    pub fn with_breadcrumb(mut self, breadcrumb: Breadcrumb) -> Self {
        self.breadcrumb = Some(breadcrumb);
        self
    }
}

/// Order ids numerically when both parse as integers, lexicographically
/// otherwise. Numeric ids sort before non-numeric ones.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
