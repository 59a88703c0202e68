//! Art Institute of Chicago payloads

use serde_json::Value;

use super::{
    as_object, flag, number, number_value, required_id, string_list, text, text_or, year,
    MetadataFactory, UNTITLED,
};
use crate::error::Result;
use crate::model::{ImageReference, NormalizedArtwork};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Fields requested from the AIC listing endpoint
pub const AIC_FIELDS: &[&str] = &[
    "id",
    "main_reference_number",
    "title",
    "artist_title",
    "artist_display",
    "date_display",
    "date_start",
    "date_end",
    "medium_display",
    "dimensions",
    "dimensions_detail",
    "department_title",
    "artwork_type_title",
    "place_of_origin",
    "is_public_domain",
    "credit_line",
    "is_on_view",
    "description",
    "short_description",
    "provenance_text",
    "inscriptions",
    "subject_titles",
    "style_titles",
    "colorfulness",
    "color",
    "image_id",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct AicFactory;

impl MetadataFactory for AicFactory {
    fn create_metadata(&self, raw: &Value) -> Result<NormalizedArtwork> {
        as_object(raw)?;
        let id = required_id(raw, "id")?;

        // First entry of dimensions_detail carries the overall size
        let overall = raw
            .get("dimensions_detail")
            .and_then(Value::as_array)
            .and_then(|dims| dims.first());
        let dim = |key: &str| overall.and_then(|d| number_value(d.get(key)));

        let color = raw.get("color");
        let hsl = |key: &str| color.and_then(|c| number_value(c.get(key)));

        let mut keywords = string_list(raw.get("subject_titles"), None);
        keywords.extend(string_list(raw.get("style_titles"), None));

        Ok(NormalizedArtwork {
            id,
            accession_number: text(raw, "main_reference_number"),
            title: text_or(raw, "title", UNTITLED),
            artist: text_or(raw, "artist_title", UNKNOWN_ARTIST),
            artist_display: text(raw, "artist_display"),
            date_display: text(raw, "date_display"),
            date_start: year(raw, "date_start"),
            date_end: year(raw, "date_end"),
            medium: text(raw, "medium_display"),
            dimensions: text(raw, "dimensions"),
            height_cm: dim("height_cm"),
            width_cm: dim("width_cm"),
            depth_cm: dim("depth_cm"),
            diameter_cm: dim("diameter_cm"),
            department: text(raw, "department_title"),
            artwork_type: text(raw, "artwork_type_title"),
            culture: text(raw, "place_of_origin").into_iter().collect(),
            is_public_domain: flag(raw, "is_public_domain").unwrap_or(false),
            credit_line: text(raw, "credit_line"),
            is_on_view: flag(raw, "is_on_view"),
            description: text(raw, "description"),
            short_description: text(raw, "short_description"),
            provenance: text(raw, "provenance_text"),
            inscriptions: text(raw, "inscriptions").into_iter().collect(),
            keywords,
            image: text(raw, "image_id").map(ImageReference::IiifId),
            colorfulness: number(raw, "colorfulness"),
            color_h: hsl("h"),
            color_s: hsl("s"),
            color_l: hsl("l"),
            ..Default::default()
        })
    }
}
