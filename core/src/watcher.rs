//! Folder watchers: OS change observers feeding a shared bounded event
//! ring. Observer callbacks and tool-call readers share one lock.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher as _;
use notify::event::ModifyKind;
use notify::event::RenameMode;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::error::ToolError;
use crate::util::now_iso;

const MAX_EVENTS: usize = 500;

const ALL_EVENT_TYPES: [&str; 4] = ["created", "modified", "deleted", "moved"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WatchEvent {
    pub watch_id: String,
    pub event: String,
    pub path: String,
    pub filename: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_filename: Option<String>,
}

struct WatchEntry {
    path: String,
    events: Vec<String>,
    recursive: bool,
    started: String,
    // Dropping the watcher stops the observer thread.
    _watcher: RecommendedWatcher,
}

#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<String, WatchEntry>>,
    ring: Arc<Mutex<VecDeque<WatchEvent>>>,
}

fn classify(kind: &EventKind) -> Option<(&'static str, bool)> {
    // (event name, carries a rename destination)
    match kind {
        EventKind::Create(_) => Some(("created", false)),
        EventKind::Remove(_) => Some(("deleted", false)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(("moved", true)),
        EventKind::Modify(ModifyKind::Name(_)) => Some(("moved", false)),
        EventKind::Modify(_) => Some(("modified", false)),
        _ => None,
    }
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_folder(
        &self,
        path: &str,
        events: Option<Vec<String>>,
        recursive: bool,
    ) -> Result<JsonValue> {
        let folder = Path::new(path);
        if !folder.exists() {
            return Err(ToolError::invalid(format!("Folder not found: {path}")));
        }
        if !folder.is_dir() {
            return Err(ToolError::invalid(format!("Not a folder: {path}")));
        }

        let wanted: Vec<String> = match events {
            Some(events) if !events.is_empty() => {
                for event in &events {
                    if !ALL_EVENT_TYPES.contains(&event.as_str()) {
                        return Err(ToolError::invalid(format!(
                            "Unknown event type '{event}'"
                        ))
                        .with_hint(format!("Valid: {}", ALL_EVENT_TYPES.join(", "))));
                    }
                }
                events
            }
            _ => ALL_EVENT_TYPES.iter().map(|s| s.to_string()).collect(),
        };

        let watch_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let ring = Arc::clone(&self.ring);
        let id_for_handler = watch_id.clone();
        let wanted_for_handler = wanted.clone();

        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<notify::Event, notify::Error>| {
                let Ok(event) = event else { return };
                let Some((name, has_dest)) = classify(&event.kind) else {
                    return;
                };
                if !wanted_for_handler.iter().any(|w| w == name) {
                    return;
                }
                let Some(src) = event.paths.first() else { return };
                // Directory churn is noise; only report files.
                if src.is_dir() {
                    return;
                }
                let dest = has_dest.then(|| event.paths.get(1)).flatten();
                let entry = WatchEvent {
                    watch_id: id_for_handler.clone(),
                    event: name.to_string(),
                    path: src.display().to_string(),
                    filename: src
                        .file_name()
                        .map(|f| f.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    timestamp: now_iso(),
                    dest_path: dest.map(|d| d.display().to_string()),
                    dest_filename: dest.and_then(|d| {
                        d.file_name().map(|f| f.to_string_lossy().to_string())
                    }),
                };
                if let Ok(mut ring) = ring.lock() {
                    ring.push_back(entry);
                    while ring.len() > MAX_EVENTS {
                        ring.pop_front();
                    }
                }
            },
        )
        .map_err(|e| ToolError::external(format!("failed to start folder observer: {e}")))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(folder, mode)
            .map_err(|e| ToolError::external(format!("failed to watch {path}: {e}")))?;

        info!("started watching folder {path} (id={watch_id})");
        let entry = WatchEntry {
            path: folder.display().to_string(),
            events: wanted.clone(),
            recursive,
            started: now_iso(),
            _watcher: watcher,
        };
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.insert(watch_id.clone(), entry);
        }

        Ok(json!({
            "success": true,
            "watch_id": watch_id,
            "path": folder.display().to_string(),
            "events": wanted,
            "recursive": recursive,
        }))
    }

    pub fn unwatch_folder(&self, watch_id: &str) -> Result<JsonValue> {
        let removed = self
            .watchers
            .lock()
            .ok()
            .and_then(|mut watchers| watchers.remove(watch_id));
        let Some(entry) = removed else {
            return Err(ToolError::invalid(format!("Watcher '{watch_id}' not found")));
        };
        info!("stopped watching folder {} (id={watch_id})", entry.path);
        Ok(json!({
            "success": true,
            "watch_id": watch_id,
            "path": entry.path,
            "action": "stopped",
        }))
    }

    pub fn get_events(
        &self,
        watch_id: Option<&str>,
        limit: usize,
        since: Option<&str>,
    ) -> Result<JsonValue> {
        let snapshot: Vec<WatchEvent> = self
            .ring
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default();

        let filtered: Vec<&WatchEvent> = snapshot
            .iter()
            .filter(|e| watch_id.map(|id| e.watch_id == id).unwrap_or(true))
            .filter(|e| since.map(|s| e.timestamp.as_str() > s).unwrap_or(true))
            .collect();
        let total = filtered.len();
        let tail: Vec<&WatchEvent> = filtered
            .into_iter()
            .skip(total.saturating_sub(limit))
            .collect();

        Ok(json!({
            "events": tail,
            "total": total,
            "watchers_active": self.watchers.lock().map(|w| w.len()).unwrap_or(0),
        }))
    }

    pub fn list_watchers(&self) -> Result<JsonValue> {
        let listed: Vec<JsonValue> = self
            .watchers
            .lock()
            .map(|watchers| {
                watchers
                    .iter()
                    .map(|(id, entry)| {
                        json!({
                            "watch_id": id,
                            "path": entry.path,
                            "events": entry.events,
                            "recursive": entry.recursive,
                            "started": entry.started,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({
            "watchers": listed,
            "count": listed.len(),
        }))
    }

    pub fn active_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Stop every observer; wired to kill-state shutdown.
    pub fn stop_all(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            if !watchers.is_empty() {
                warn!("stopping {} folder watcher(s)", watchers.len());
            }
            watchers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::time::Duration;
    use std::time::Instant;

    fn wait_for_event(registry: &WatcherRegistry, watch_id: &str, kind: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let events = registry.get_events(Some(watch_id), 50, None).unwrap();
            let hit = events["events"]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["event"] == kind);
            if hit {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn create_events_land_in_the_ring() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WatcherRegistry::new();
        let result = registry
            .watch_folder(dir.path().to_str().unwrap(), None, false)
            .unwrap();
        let watch_id = result["watch_id"].as_str().unwrap().to_string();
        assert_eq!(watch_id.len(), 8);

        std::fs::write(dir.path().join("hello.txt"), "content").unwrap();
        assert!(wait_for_event(&registry, &watch_id, "created"));

        let listing = registry.list_watchers().unwrap();
        assert_eq!(listing["count"], json!(1));

        registry.unwatch_folder(&watch_id).unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn event_filter_excludes_unwanted_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WatcherRegistry::new();
        let result = registry
            .watch_folder(
                dir.path().to_str().unwrap(),
                Some(vec!["deleted".to_string()]),
                false,
            )
            .unwrap();
        let watch_id = result["watch_id"].as_str().unwrap().to_string();

        let file = dir.path().join("gone.txt");
        std::fs::write(&file, "x").unwrap();
        std::fs::remove_file(&file).unwrap();

        assert!(wait_for_event(&registry, &watch_id, "deleted"));
        let events = registry.get_events(Some(&watch_id), 50, None).unwrap();
        assert!(
            events["events"]
                .as_array()
                .unwrap()
                .iter()
                .all(|e| e["event"] == "deleted")
        );
    }

    #[test]
    fn missing_folder_is_an_input_error() {
        let registry = WatcherRegistry::new();
        let err = registry
            .watch_folder("/definitely/not/here", None, false)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WatcherRegistry::new();
        let err = registry
            .watch_folder(
                dir.path().to_str().unwrap(),
                Some(vec!["exploded".to_string()]),
                false,
            )
            .unwrap_err();
        assert!(err.message.contains("exploded"));
    }
}
