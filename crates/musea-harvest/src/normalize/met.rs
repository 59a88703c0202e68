//! Metropolitan Museum of Art payloads

use serde_json::Value;

use super::{
    as_object, flag, number_value, required_id, string_list, text, text_or, year,
    MetadataFactory, UNTITLED,
};
use crate::error::Result;
use crate::model::{ImageReference, NormalizedArtwork};

pub const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default)]
pub struct MetFactory;

impl MetadataFactory for MetFactory {
    fn create_metadata(&self, raw: &Value) -> Result<NormalizedArtwork> {
        as_object(raw)?;
        let id = required_id(raw, "objectID")?;

        let overall = raw
            .get("measurements")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|m| m.get("elementName").and_then(Value::as_str) == Some("Overall"))
            })
            .and_then(|m| m.get("elementMeasurements"));
        let dim = |key: &str| overall.and_then(|m| number_value(m.get(key)));

        let artist_name = text(raw, "artistDisplayName");
        let artist_bio = text(raw, "artistDisplayBio");
        let artist_display = match (&artist_name, &artist_bio) {
            (Some(name), Some(bio)) => Some(format!("{}\n{}", name, bio)),
            (Some(name), None) => Some(name.clone()),
            _ => None,
        };

        Ok(NormalizedArtwork {
            id,
            accession_number: text(raw, "accessionNumber"),
            title: text_or(raw, "title", UNTITLED),
            artist: artist_name.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            artist_display,
            artist_bio,
            artist_nationality: text(raw, "artistNationality"),
            artist_birth_year: year(raw, "artistBeginDate"),
            artist_death_year: year(raw, "artistEndDate"),
            date_display: text(raw, "objectDate"),
            date_start: year(raw, "objectBeginDate"),
            date_end: year(raw, "objectEndDate"),
            medium: text(raw, "medium"),
            dimensions: text(raw, "dimensions"),
            height_cm: dim("Height"),
            width_cm: dim("Width"),
            depth_cm: dim("Depth"),
            diameter_cm: dim("Diameter"),
            department: text(raw, "department"),
            artwork_type: text(raw, "objectName"),
            culture: text(raw, "culture").into_iter().collect(),
            is_public_domain: flag(raw, "isPublicDomain").unwrap_or(false),
            credit_line: text(raw, "creditLine"),
            is_on_view: Some(text(raw, "GalleryNumber").is_some()),
            is_highlight: flag(raw, "isHighlight"),
            keywords: string_list(raw.get("tags"), Some("term")),
            image: text(raw, "primaryImage").map(ImageReference::Url),
            ..Default::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record() {
        let raw = json!({
            "objectID": 436535,
            "accessionNumber": "1993.132",
            "title": "Wheat Field with Cypresses",
            "artistDisplayName": "Vincent van Gogh",
            "artistDisplayBio": "Dutch, Zundert 1853-1890 Auvers-sur-Oise",
            "artistBeginDate": "1853",
            "artistEndDate": "1890",
            "objectBeginDate": 1889,
            "objectEndDate": 1889,
            "isPublicDomain": true,
            "isHighlight": true,
            "GalleryNumber": "822",
            "measurements": [
                {"elementName": "Frame", "elementMeasurements": {"Height": 95.0}},
                {"elementName": "Overall", "elementMeasurements": {"Height": 73.2, "Width": 93.4}}
            ],
            "tags": [{"term": "Landscapes"}, {"term": "Cypresses"}],
            "primaryImage": "https://images.metmuseum.org/CRDImages/ep/original/DT1567.jpg"
        });

        let art = MetFactory.create_metadata(&raw).unwrap();

        assert_eq!(art.id, "436535");
        assert_eq!(
            art.artist_display.as_deref(),
            Some("Vincent van Gogh\nDutch, Zundert 1853-1890 Auvers-sur-Oise")
        );
        assert_eq!(art.artist_birth_year, Some(1853));
        assert_eq!(art.height_cm, Some(73.2));
        assert_eq!(art.is_on_view, Some(true));
        assert_eq!(art.keywords, vec!["Landscapes", "Cypresses"]);
        assert!(matches!(art.image, Some(ImageReference::Url(ref u)) if u.ends_with("DT1567.jpg")));
    }

    #[test]
    fn test_empty_primary_image_means_no_image() {
        let art = MetFactory
            .create_metadata(&json!({"objectID": "7", "primaryImage": "", "GalleryNumber": ""}))
            .unwrap();

        assert!(art.image.is_none());
        assert_eq!(art.artist, UNKNOWN_ARTIST);
        assert_eq!(art.is_on_view, Some(false));
    }
}
