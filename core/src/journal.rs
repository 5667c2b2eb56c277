//! Persistent per-(tool, app) diary of method failures and successes.
//!
//! When a silent method fails on a specific application the journal
//! remembers it, so later calls can skip straight to the method that
//! works. Stored at `memory/error_journal.json`, capped at 500 entries;
//! eviction keeps high `success_count` entries, then the most recent.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::util::now_iso;

const MAX_ENTRIES: usize = 500;

/// Parameter keys retained in journal entries; everything else is noise.
const KEPT_PARAM_KEYS: [&str; 3] = ["element_name", "window_title", "target"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub tool: String,
    /// Normalized app key derived from the window title.
    pub app: String,
    pub window: String,
    pub method_failed: String,
    pub method_worked: Option<String>,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
    pub timestamp: String,
    pub success_count: u32,
    pub failure_count: u32,
}

pub struct ErrorJournal {
    path: PathBuf,
    cache: Mutex<Option<Vec<JournalEntry>>>,
}

/// Normalize a window identifier to an app key: the segment after the
/// last " - " separator (e.g. "Document - Notepad" → "notepad"),
/// lowercased; missing windows map to "unknown".
pub fn normalize_window(window: Option<&str>) -> String {
    let Some(window) = window else {
        return "unknown".to_string();
    };
    let w = window.trim();
    if w.is_empty() {
        return "unknown".to_string();
    }
    let w = match w.rsplit_once(" - ") {
        Some((_, suffix)) => suffix,
        None => w,
    };
    w.trim().to_lowercase()
}

impl ErrorJournal {
    pub fn new(memory_dir: PathBuf) -> Self {
        Self {
            path: memory_dir.join("error_journal.json"),
            cache: Mutex::new(None),
        }
    }

    fn load(&self) -> Vec<JournalEntry> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(entries) = cache.as_ref() {
                return entries.clone();
            }
        }
        let entries = match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<Vec<JournalEntry>>(&raw).unwrap_or_else(|e| {
                warn!("failed to parse error journal: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(entries.clone());
        }
        entries
    }

    fn save(&self, entries: Vec<JournalEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&self.path, raw)?;
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(entries);
        }
        Ok(())
    }

    /// Trim to the cap, keeping high success_count entries and breaking
    /// ties by recency.
    fn evict(mut entries: Vec<JournalEntry>) -> Vec<JournalEntry> {
        if entries.len() <= MAX_ENTRIES {
            return entries;
        }
        entries.sort_by(|a, b| {
            b.success_count
                .cmp(&a.success_count)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        entries.truncate(MAX_ENTRIES);
        entries
    }

    /// Record that `method` failed for a tool+app combination. Repeated
    /// identical failures update the existing entry in place.
    pub fn record_failure(
        &self,
        tool: &str,
        window: Option<&str>,
        method: &str,
        error: &str,
        params: Option<&JsonValue>,
    ) {
        let app = normalize_window(window);
        let mut entries = self.load();

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.tool == tool && e.app == app && e.method_failed == method)
        {
            entry.error_message = error.to_string();
            entry.timestamp = now_iso();
            entry.failure_count += 1;
        } else {
            let kept_params = params.and_then(JsonValue::as_object).map(|map| {
                JsonValue::Object(
                    map.iter()
                        .filter(|(k, v)| KEPT_PARAM_KEYS.contains(&k.as_str()) && !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )
            });
            entries.push(JournalEntry {
                tool: tool.to_string(),
                app,
                window: window.unwrap_or("unknown").to_string(),
                method_failed: method.to_string(),
                method_worked: None,
                error_message: error.to_string(),
                params: kept_params.filter(|p| p.as_object().is_some_and(|m| !m.is_empty())),
                timestamp: now_iso(),
                success_count: 0,
                failure_count: 1,
            });
            entries = Self::evict(entries);
        }

        // Journal bookkeeping must never fail the tool call.
        if let Err(e) = self.save(entries) {
            warn!("failed to persist error journal: {e}");
        }
    }

    /// Record that `method` worked for a tool+app, linking it to the most
    /// recent failure of a *different* method that has no solution yet.
    pub fn record_success(&self, tool: &str, window: Option<&str>, method: &str) {
        let app = normalize_window(window);
        let mut entries = self.load();

        let Some(entry) = entries
            .iter_mut()
            .rev()
            .find(|e| e.tool == tool && e.app == app && e.method_failed != method)
        else {
            // No failure to link; nothing worth persisting.
            return;
        };
        entry.method_worked = Some(method.to_string());
        entry.success_count += 1;
        entry.timestamp = now_iso();

        if let Err(e) = self.save(entries) {
            warn!("failed to persist error journal: {e}");
        }
    }

    /// The historically best method for a tool+app: the worked method of
    /// the entry with the highest success count, if any.
    pub fn best_method(&self, tool: &str, window: Option<&str>) -> Option<String> {
        let app = normalize_window(window);
        self.load()
            .into_iter()
            .filter(|e| e.tool == tool && e.app == app && e.success_count > 0)
            .filter(|e| e.method_worked.is_some())
            .max_by_key(|e| e.success_count)
            .and_then(|e| e.method_worked)
    }

    pub fn known_issues(&self, window: Option<&str>) -> Vec<JournalEntry> {
        let entries = self.load();
        match window {
            Some(w) => {
                let app = normalize_window(Some(w));
                entries.into_iter().filter(|e| e.app == app).collect()
            }
            None => entries,
        }
    }

    /// Clear entries for one app, or everything.
    pub fn clear(&self, window: Option<&str>) -> Result<JsonValue> {
        let entries = self.load();
        let before = entries.len();
        let remaining = match window {
            Some(w) => {
                let app = normalize_window(Some(w));
                entries.into_iter().filter(|e| e.app != app).collect()
            }
            None => Vec::new(),
        };
        let after = remaining.len();
        self.save(remaining)?;
        Ok(json!({
            "success": true,
            "cleared": before - after,
            "remaining": after,
            "filter": window.unwrap_or("all"),
        }))
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn show(&self, window: Option<&str>) -> Result<JsonValue> {
        let issues = self.known_issues(window);
        let summaries: Vec<JsonValue> = issues
            .iter()
            .map(|e| {
                json!({
                    "tool": e.tool,
                    "app": e.app,
                    "method_failed": e.method_failed,
                    "method_worked": e.method_worked,
                    "error_message": e.error_message,
                    "success_count": e.success_count,
                    "failure_count": e.failure_count,
                    "timestamp": e.timestamp,
                })
            })
            .collect();
        Ok(json!({
            "success": true,
            "total": summaries.len(),
            "entries": summaries,
            "filter": window.unwrap_or("all"),
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn journal() -> (tempfile::TempDir, ErrorJournal) {
        let dir = tempfile::tempdir().unwrap();
        let journal = ErrorJournal::new(dir.path().to_path_buf());
        (dir, journal)
    }

    #[test]
    fn window_normalization_takes_title_suffix() {
        assert_eq!(normalize_window(Some("Document - Notepad")), "notepad");
        assert_eq!(normalize_window(Some("Spotify")), "spotify");
        assert_eq!(normalize_window(None), "unknown");
        assert_eq!(normalize_window(Some("   ")), "unknown");
    }

    #[test]
    fn failure_then_success_links_the_working_method() {
        let (_dir, journal) = journal();
        journal.record_failure(
            "smart_find",
            Some("Login - MyApp"),
            "ui_automation",
            "element not found",
            None,
        );
        journal.record_success("smart_find", Some("Login - MyApp"), "ocr");

        assert_eq!(
            journal.best_method("smart_find", Some("Other - MyApp")),
            Some("ocr".to_string())
        );
        assert_eq!(journal.best_method("smart_find", Some("Elsewhere")), None);
    }

    #[test]
    fn repeated_failures_update_in_place() {
        let (_dir, journal) = journal();
        for i in 0..3 {
            journal.record_failure(
                "type_text",
                Some("Notepad"),
                "set_text_silent",
                &format!("attempt {i}"),
                None,
            );
        }
        let issues = journal.known_issues(Some("Notepad"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].failure_count, 3);
        assert_eq!(issues[0].error_message, "attempt 2");
    }

    #[test]
    fn eviction_keeps_high_success_entries() {
        let mut entries: Vec<JournalEntry> = (0..MAX_ENTRIES + 10)
            .map(|i| JournalEntry {
                tool: "click".to_string(),
                app: format!("app{i}"),
                window: format!("app{i}"),
                method_failed: "invoke".to_string(),
                method_worked: Some("click_input".to_string()),
                error_message: String::new(),
                params: None,
                timestamp: format!("2025-01-01T00:00:{:02}", i % 60),
                success_count: if i < 5 { 50 } else { 0 },
                failure_count: 1,
            })
            .collect();
        entries = ErrorJournal::evict(entries);
        assert_eq!(entries.len(), MAX_ENTRIES);
        let high_value = entries.iter().filter(|e| e.success_count == 50).count();
        assert_eq!(high_value, 5);
    }

    #[test]
    fn success_without_prior_failure_is_not_recorded() {
        let (_dir, journal) = journal();
        journal.record_success("click", Some("Notepad"), "invoke");
        assert!(journal.is_empty());
    }

    #[test]
    fn clear_filters_by_app() {
        let (_dir, journal) = journal();
        journal.record_failure("click", Some("A - One"), "invoke", "x", None);
        journal.record_failure("click", Some("B - Two"), "invoke", "x", None);
        let result = journal.clear(Some("One")).unwrap();
        assert_eq!(result["cleared"], serde_json::json!(1));
        assert_eq!(journal.len(), 1);
        journal.clear(None).unwrap();
        assert!(journal.is_empty());
    }
}
