//! Adaptive pattern detection: a rolling buffer of recent tool calls is
//! scanned for repeating subsequences, which become persisted pattern
//! candidates the user can accept or dismiss.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::error::ToolError;
use crate::util::now_iso;

/// Only identity-bearing parameters take part in a signature.
const KEY_PARAMS: [&str; 5] = ["window_title", "app_name", "element_name", "text", "command"];

const MIN_SEQ: usize = 2;
const MAX_SEQ: usize = 10;
const MIN_FREQUENCY: usize = 3;
const MAX_BUFFER: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternStep {
    pub tool: String,
    pub params: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pattern {
    pub id: String,
    pub sequence: Vec<PatternStep>,
    pub frequency: usize,
    pub first_seen: String,
    pub last_seen: String,
    pub dismissed: bool,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    tool: String,
    params: Vec<(String, String)>,
}

pub struct AdaptiveRecorder {
    path: PathBuf,
    buffer: Mutex<Vec<Signature>>,
}

impl AdaptiveRecorder {
    pub fn new(memory_dir: PathBuf) -> Self {
        Self {
            path: memory_dir.join("patterns.json"),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Record one tool call. Only key-identifying params are retained;
    /// recording never fails the call it observes.
    pub fn record_action(&self, tool: &str, params: &JsonValue) {
        let kept: Vec<(String, String)> = params
            .as_object()
            .map(|map| {
                let mut kept: Vec<(String, String)> = map
                    .iter()
                    .filter(|(k, _)| KEY_PARAMS.contains(&k.as_str()))
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .filter(|(_, v)| !v.is_empty())
                    .collect();
                kept.sort();
                kept
            })
            .unwrap_or_default();
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(Signature {
                tool: tool.to_string(),
                params: kept,
            });
            let overflow = buffer.len().saturating_sub(MAX_BUFFER);
            if overflow > 0 {
                buffer.drain(..overflow);
            }
        }
    }

    pub fn actions_recorded(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn load_patterns(&self) -> Vec<Pattern> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failed to parse patterns: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn save_patterns(&self, patterns: &[Pattern]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(patterns)?)?;
        Ok(())
    }

    fn pattern_signature(pattern: &Pattern) -> Vec<Signature> {
        pattern
            .sequence
            .iter()
            .map(|step| Signature {
                tool: step.tool.clone(),
                params: step
                    .params
                    .as_object()
                    .map(|map| {
                        let mut kept: Vec<(String, String)> = map
                            .iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect();
                        kept.sort();
                        kept
                    })
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Scan every window of length 2..=10 over the buffer; sequences
    /// seen at least three times become candidates. Trivial same-tool
    /// pairs are excluded.
    fn analyze(&self) -> Result<Vec<Pattern>> {
        let signatures: Vec<Signature> = self
            .buffer
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        let mut existing = self.load_patterns();

        if signatures.len() < MIN_SEQ * MIN_FREQUENCY {
            return Ok(existing);
        }

        let mut found: HashMap<Vec<Signature>, usize> = HashMap::new();
        for window_size in MIN_SEQ..=MAX_SEQ.min(signatures.len()) {
            for window in signatures.windows(window_size) {
                *found.entry(window.to_vec()).or_insert(0) += 1;
            }
        }

        let existing_signatures: Vec<Vec<Signature>> =
            existing.iter().map(Self::pattern_signature).collect();

        let mut changed = false;
        for (sequence, count) in found {
            if count < MIN_FREQUENCY {
                continue;
            }
            // A pair of identical signatures is just a repeated action.
            if sequence.len() == 2 && sequence[0] == sequence[1] {
                continue;
            }
            if let Some(position) = existing_signatures.iter().position(|s| *s == sequence) {
                let pattern = &mut existing[position];
                if pattern.frequency != count {
                    pattern.frequency = count;
                    pattern.last_seen = now_iso();
                    changed = true;
                }
                continue;
            }
            existing.push(Pattern {
                id: Uuid::new_v4().simple().to_string()[..8].to_string(),
                sequence: sequence
                    .iter()
                    .map(|s| PatternStep {
                        tool: s.tool.clone(),
                        params: JsonValue::Object(
                            s.params
                                .iter()
                                .map(|(k, v)| (k.clone(), json!(v)))
                                .collect(),
                        ),
                    })
                    .collect(),
                frequency: count,
                first_seen: now_iso(),
                last_seen: now_iso(),
                dismissed: false,
                accepted: false,
            });
            changed = true;
        }

        if changed {
            self.save_patterns(&existing)?;
        }
        Ok(existing)
    }

    /// The `get_suggestions` tool body: analyze and report, with
    /// dismissed patterns suppressed.
    pub fn suggestions(&self) -> Result<JsonValue> {
        let patterns = self.analyze()?;
        let suggestions: Vec<&Pattern> = patterns.iter().filter(|p| !p.dismissed).collect();
        Ok(json!({
            "success": true,
            "suggestions": suggestions,
            "total_patterns": patterns.len(),
            "actions_recorded": self.actions_recorded(),
        }))
    }

    fn update_pattern(&self, pattern_id: &str, accept: bool) -> Result<JsonValue> {
        let mut patterns = self.load_patterns();
        let Some(pattern) = patterns.iter_mut().find(|p| p.id == pattern_id) else {
            return Err(ToolError::invalid(format!(
                "Pattern not found: {pattern_id}"
            )));
        };
        if accept {
            pattern.accepted = true;
        } else {
            pattern.dismissed = true;
        }
        self.save_patterns(&patterns)?;
        Ok(json!({
            "success": true,
            "pattern_id": pattern_id,
            "status": if accept { "accepted" } else { "dismissed" },
        }))
    }

    pub fn accept(&self, pattern_id: &str) -> Result<JsonValue> {
        self.update_pattern(pattern_id, true)
    }

    pub fn dismiss(&self, pattern_id: &str) -> Result<JsonValue> {
        self.update_pattern(pattern_id, false)
    }
}
