//! Persistent key-value memory, organized by a fixed set of categories,
//! one JSON file per category with atomic writes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;
use crate::util::now_iso;

pub const VALID_CATEGORIES: [&str; 4] = ["general", "preferences", "projects", "tasks"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub value: String,
    pub created: String,
    pub updated: String,
}

pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(memory_dir: PathBuf) -> Self {
        Self { dir: memory_dir }
    }

    fn check_category(category: &str) -> Result<()> {
        if VALID_CATEGORIES.contains(&category) {
            Ok(())
        } else {
            Err(ToolError::invalid(format!(
                "Invalid category '{category}'. Valid: {}",
                VALID_CATEGORIES.join(", ")
            )))
        }
    }

    fn category_path(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{category}.json"))
    }

    fn load_category(&self, category: &str) -> BTreeMap<String, MemoryRecord> {
        match std::fs::read_to_string(self.category_path(category)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failed to parse memory category {category}: {e}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Write the whole category through a temp file so a crash mid-write
    /// never corrupts the store.
    fn save_category(
        &self,
        category: &str,
        data: &BTreeMap<String, MemoryRecord>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_string_pretty(data)?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(tmp.path(), raw)?;
        tmp.persist(self.category_path(category))
            .map_err(|e| ToolError::internal(format!("atomic save failed: {e}")))?;
        Ok(())
    }

    pub fn save(&self, key: &str, value: &str, category: &str) -> Result<JsonValue> {
        Self::check_category(category)?;
        if key.trim().is_empty() {
            return Err(ToolError::invalid("Key cannot be empty"));
        }

        let mut data = self.load_category(category);
        let is_update = data.contains_key(key);
        let created = data
            .get(key)
            .map(|r| r.created.clone())
            .unwrap_or_else(now_iso);
        data.insert(
            key.to_string(),
            MemoryRecord {
                value: value.to_string(),
                created,
                updated: now_iso(),
            },
        );
        self.save_category(category, &data)?;

        Ok(json!({
            "success": true,
            "key": key,
            "category": category,
            "action": if is_update { "updated" } else { "saved" },
        }))
    }

    /// Recall semantics mirror the lookup forms:
    /// key+category → one record; category → its keys; key → search all
    /// categories; neither → a full listing.
    pub fn recall(&self, key: Option<&str>, category: Option<&str>) -> Result<JsonValue> {
        match (key, category) {
            (Some(key), Some(category)) => {
                Self::check_category(category)?;
                let data = self.load_category(category);
                let record = data.get(key).ok_or_else(|| {
                    ToolError::invalid(format!(
                        "Key '{key}' not found in category '{category}'"
                    ))
                })?;
                Ok(json!({
                    "success": true,
                    "key": key,
                    "category": category,
                    "value": record.value,
                    "created": record.created,
                    "updated": record.updated,
                }))
            }
            (None, Some(category)) => {
                Self::check_category(category)?;
                let data = self.load_category(category);
                Ok(json!({
                    "success": true,
                    "category": category,
                    "keys": data.keys().collect::<Vec<_>>(),
                    "count": data.len(),
                }))
            }
            (Some(key), None) => {
                for category in VALID_CATEGORIES {
                    let data = self.load_category(category);
                    if let Some(record) = data.get(key) {
                        return Ok(json!({
                            "success": true,
                            "key": key,
                            "category": category,
                            "value": record.value,
                            "created": record.created,
                            "updated": record.updated,
                        }));
                    }
                }
                Err(ToolError::invalid(format!(
                    "Key '{key}' not found in any category"
                )))
            }
            (None, None) => {
                let mut categories = serde_json::Map::new();
                for category in VALID_CATEGORIES {
                    let data = self.load_category(category);
                    if !data.is_empty() {
                        categories.insert(
                            category.to_string(),
                            json!({
                                "keys": data.keys().collect::<Vec<_>>(),
                                "count": data.len(),
                            }),
                        );
                    }
                }
                Ok(json!({
                    "success": true,
                    "total_categories": categories.len(),
                    "categories": categories,
                }))
            }
        }
    }

    pub fn delete(&self, key: &str, category: &str) -> Result<JsonValue> {
        Self::check_category(category)?;
        let mut data = self.load_category(category);
        if data.remove(key).is_none() {
            return Err(ToolError::invalid(format!(
                "Key '{key}' not found in category '{category}'"
            )));
        }
        self.save_category(category, &data)?;
        Ok(json!({
            "success": true,
            "key": key,
            "category": category,
            "action": "deleted",
        }))
    }

    pub fn list(&self) -> Result<JsonValue> {
        self.recall(None, None)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn save_recall_delete_round_trip() {
        let (_dir, store) = store();
        store.save("proj/path", "/tmp/x", "projects").unwrap();
        let recalled = store.recall(Some("proj/path"), Some("projects")).unwrap();
        assert_eq!(recalled["value"], json!("/tmp/x"));

        store.delete("proj/path", "projects").unwrap();
        let err = store
            .recall(Some("proj/path"), Some("projects"))
            .unwrap_err();
        assert!(err.message.contains("not found"));

        let listing = store.recall(None, Some("projects")).unwrap();
        assert!(
            !listing["keys"]
                .as_array()
                .unwrap()
                .iter()
                .any(|k| k == "proj/path")
        );
    }

    #[test]
    fn update_preserves_created_timestamp() {
        let (_dir, store) = store();
        store.save("k", "v1", "general").unwrap();
        let first = store.recall(Some("k"), Some("general")).unwrap();
        let result = store.save("k", "v2", "general").unwrap();
        assert_eq!(result["action"], json!("updated"));
        let second = store.recall(Some("k"), Some("general")).unwrap();
        assert_eq!(second["created"], first["created"]);
        assert_eq!(second["value"], json!("v2"));
    }

    #[test]
    fn key_search_spans_categories() {
        let (_dir, store) = store();
        store.save("style", "dark", "preferences").unwrap();
        let found = store.recall(Some("style"), None).unwrap();
        assert_eq!(found["category"], json!("preferences"));
    }

    #[test]
    fn invalid_category_is_rejected() {
        let (_dir, store) = store();
        let err = store.save("k", "v", "secrets").unwrap_err();
        assert!(err.message.contains("Invalid category"));
        let err = store.recall(None, Some("secrets")).unwrap_err();
        assert!(err.message.contains("Invalid category"));
    }
}
