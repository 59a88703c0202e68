//! On-disk progress document
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "processed_ids": ["101", "102"],
//!   "success_ids": ["101"],
//!   "failed_ids": ["102"],
//!   "error_log": { "network_error": { "102": "connection reset" } },
//!   "updated_at": "2024-05-01T12:00:00Z",
//!   "last_page": 3
//! }
//! ```
//!
//! Files written before versioning (no `schema_version`) load as version 0.
//! The earliest AIC layout (`all`, `success`, `failed`, `other_error`,
//! integer ids) is accepted through field aliases.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};

use crate::model::compare_ids;

pub const SCHEMA_VERSION: u32 = 1;

/// Category -> id -> message
pub type ErrorLog = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned + Default"))]
pub struct ProgressState<C> {
    #[serde(default)]
    pub schema_version: u32,

    #[serde(default, alias = "all", with = "id_set")]
    pub processed_ids: HashSet<String>,

    #[serde(default, alias = "success", with = "id_set")]
    pub success_ids: HashSet<String>,

    #[serde(default, alias = "failed", with = "id_set")]
    pub failed_ids: HashSet<String>,

    #[serde(default, alias = "other_error")]
    pub error_log: ErrorLog,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub cursor: C,
}

impl<C: Default> Default for ProgressState<C> {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            processed_ids: HashSet::new(),
            success_ids: HashSet::new(),
            failed_ids: HashSet::new(),
            error_log: ErrorLog::new(),
            updated_at: None,
            cursor: C::default(),
        }
    }
}

impl<C> ProgressState<C> {
    /// Restore set invariants on a freshly loaded document.
    ///
    /// Older writers could leave an id in `success` without `all`, or in both
    /// `success` and `failed` after a retry.
    pub fn repair(&mut self) {
        self.failed_ids.retain(|id| !self.success_ids.contains(id));
        self.processed_ids.extend(self.success_ids.iter().cloned());
        self.processed_ids.extend(self.failed_ids.iter().cloned());
        self.error_log.retain(|_, entries| !entries.is_empty());
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(serde_json::Number),
    Text(String),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Number(n) => n.to_string(),
            IdRepr::Text(s) => s,
        }
    }
}

/// Id sets serialize as sorted arrays and accept integer ids on input
pub(crate) mod id_set {
    use super::*;

    pub fn serialize<S: Serializer>(ids: &HashSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort_by(|a, b| compare_ids(a, b));
        sorted.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashSet<String>, D::Error> {
        let raw: Option<Vec<IdRepr>> = Option::deserialize(deserializer)?;
        Ok(raw.unwrap_or_default().into_iter().map(String::from).collect())
    }
}

pub(crate) fn optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::cursor::{ObjectCursor, PageCursor};

    #[test]
    fn test_serializes_sorted_arrays_and_flat_cursor() {
        let mut state = ProgressState::<PageCursor>::default();
        state.processed_ids.extend(["20".to_string(), "3".to_string(), "100".to_string()]);
        state.cursor.last_page = 7;

        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["processed_ids"], serde_json::json!(["3", "20", "100"]));
        assert_eq!(value["last_page"], 7);
    }

    #[test]
    fn test_loads_legacy_aic_layout() {
        let legacy = r#"{
            "success": [101, 102],
            "failed": [103],
            "network_error": [],
            "image_processing_error": [],
            "other_error": {"skipped": {"103": "not public domain"}},
            "all": [101, 102, 103],
            "last_page": 12
        }"#;

        let mut state: ProgressState<PageCursor> = serde_json::from_str(legacy).unwrap();
        state.repair();

        assert_eq!(state.schema_version, 0);
        assert!(state.processed_ids.contains("101"));
        assert!(state.failed_ids.contains("103"));
        assert_eq!(state.error_log["skipped"]["103"], "not public domain");
        assert_eq!(state.cursor.last_page, 12);
    }

    #[test]
    fn test_loads_object_cursor_with_numeric_id() {
        let doc = r#"{"processed_ids": ["5"], "last_object_id": 5, "total_objects": 40}"#;
        let state: ProgressState<ObjectCursor> = serde_json::from_str(doc).unwrap();

        assert_eq!(state.cursor.last_object_id.as_deref(), Some("5"));
        assert_eq!(state.cursor.total_objects, 40);
    }

    #[test]
    fn test_repair_restores_superset_invariant() {
        let doc = r#"{"processed_ids": [], "success_ids": ["1"], "failed_ids": ["1", "2"]}"#;
        let mut state: ProgressState<PageCursor> = serde_json::from_str(doc).unwrap();
        state.repair();

        assert!(state.processed_ids.contains("1") && state.processed_ids.contains("2"));
        assert!(!state.failed_ids.contains("1"));
    }
}
