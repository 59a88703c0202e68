//! Cleveland Museum of Art payloads (API and bulk dump share one shape)

use serde_json::Value;

use super::{
    as_object, flag, number_value, required_id, string_list, text, text_value, year,
    year_value, MetadataFactory, UNTITLED,
};
use crate::error::Result;
use crate::model::{ImageReference, NormalizedArtwork};

pub const UNKNOWN_ARTIST: &str = "Unknown";

/// License status marking a public-domain CMA record
pub const CC0: &str = "CC0";

#[derive(Debug, Clone, Copy, Default)]
pub struct CmaFactory;

impl MetadataFactory for CmaFactory {
    fn create_metadata(&self, raw: &Value) -> Result<NormalizedArtwork> {
        as_object(raw)?;
        let id = required_id(raw, "id")?;

        let creator = raw
            .get("creators")
            .and_then(Value::as_array)
            .and_then(|c| c.first());
        let creator_text = |key: &str| creator.and_then(|c| text_value(c.get(key)));
        let creator_year = |key: &str| creator.and_then(|c| year_value(c.get(key)));

        // Framed dimensions are in meters
        let framed = raw.get("dimensions").and_then(|d| d.get("framed"));
        let cm = |key: &str| {
            framed
                .and_then(|f| number_value(f.get(key)))
                .map(|meters| meters * 100.0)
        };

        let provenance: Vec<String> = string_list(raw.get("provenance"), Some("description"));
        let mut culture = string_list(raw.get("culture"), None);
        if culture.is_empty() {
            culture.extend(text(raw, "culture"));
        }

        Ok(NormalizedArtwork {
            id,
            accession_number: text(raw, "accession_number"),
            title: text(raw, "title").unwrap_or_else(|| UNTITLED.to_string()),
            artist: creator_text("description").unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            artist_display: creator_text("description"),
            artist_bio: creator_text("biography"),
            artist_birth_year: creator_year("birth_year"),
            artist_death_year: creator_year("death_year"),
            date_display: text(raw, "creation_date"),
            date_start: year(raw, "creation_date_earliest"),
            date_end: year(raw, "creation_date_latest"),
            medium: text(raw, "technique"),
            dimensions: text(raw, "measurements"),
            height_cm: cm("height"),
            width_cm: cm("width"),
            depth_cm: cm("depth"),
            diameter_cm: cm("diameter"),
            department: text(raw, "department"),
            artwork_type: text(raw, "type"),
            culture,
            is_public_domain: text(raw, "share_license_status").as_deref() == Some(CC0),
            credit_line: text(raw, "creditline"),
            is_on_view: Some(raw.get("current_location").is_some_and(|l| !l.is_null())),
            is_highlight: flag(raw, "is_highlight"),
            description: text(raw, "description"),
            short_description: text(raw, "tombstone"),
            provenance: (!provenance.is_empty()).then(|| provenance.join(" ")),
            inscriptions: string_list(raw.get("inscriptions"), Some("inscription")),
            fun_fact: text(raw, "did_you_know"),
            keywords: string_list(raw.get("tags"), None),
            image: best_image(raw).map(ImageReference::Url),
            ..Default::default()
        })
    }
}

/// Prefer the web rendition, then print, then full resolution
fn best_image(raw: &Value) -> Option<String> {
    let images = raw.get("images")?;
    ["web", "print", "full"]
        .iter()
        .find_map(|size| text_value(images.get(*size).and_then(|i| i.get("url"))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record() {
        let raw = json!({
            "id": 135382,
            "accession_number": "1958.31",
            "title": "Water Lilies (Agapanthus)",
            "creators": [{
                "description": "Claude Monet (French, 1840-1926)",
                "biography": "Monet was a founder of French Impressionist painting.",
                "birth_year": "1840",
                "death_year": "1926"
            }],
            "creation_date_earliest": 1915,
            "creation_date_latest": 1926,
            "technique": "oil on canvas",
            "dimensions": {"framed": {"height": 2.205, "width": 4.335}},
            "culture": ["France, 20th century"],
            "share_license_status": "CC0",
            "current_location": "222 Impressionism",
            "provenance": [{"description": "Durand-Ruel"}, {"description": "Cleveland"}],
            "inscriptions": [{"inscription": "Claude Monet"}, {"inscription_translation": "x"}],
            "did_you_know": "Monet painted many water lilies.",
            "images": {"print": {"url": "https://openaccess-cdn.clevelandart.org/print.jpg"}}
        });

        let art = CmaFactory.create_metadata(&raw).unwrap();

        assert_eq!(art.id, "135382");
        assert_eq!(art.artist, "Claude Monet (French, 1840-1926)");
        assert_eq!(art.artist_birth_year, Some(1840));
        assert!((art.height_cm.unwrap() - 220.5).abs() < 1e-9);
        assert!(art.is_public_domain);
        assert_eq!(art.is_on_view, Some(true));
        assert_eq!(art.provenance.as_deref(), Some("Durand-Ruel Cleveland"));
        assert_eq!(art.inscriptions, vec!["Claude Monet"]);
        assert_eq!(
            art.image,
            Some(ImageReference::Url("https://openaccess-cdn.clevelandart.org/print.jpg".into()))
        );
    }

    #[test]
    fn test_copyrighted_record_is_not_public_domain() {
        let art = CmaFactory
            .create_metadata(&json!({"id": 1, "share_license_status": "Copyrighted"}))
            .unwrap();

        assert!(!art.is_public_domain);
        assert_eq!(art.title, UNTITLED);
        assert_eq!(art.artist, UNKNOWN_ARTIST);
        assert_eq!(art.is_on_view, Some(false));
        assert!(art.provenance.is_none());
    }
}
