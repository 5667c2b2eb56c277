//! Workflow recording and replay. One recording can be active at a
//! time; replay re-checks the kill switch and the safety gate before
//! every step and stops at the first block or failure with partial
//! results.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;
use crate::safety::SafetyEngine;
use crate::util::now_iso;

const MIN_STEP_DELAY: Duration = Duration::from_millis(100);
const MAX_STEP_DELAY: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub tool: String,
    pub params: JsonValue,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub steps: Vec<WorkflowStep>,
    pub created: String,
    pub step_count: usize,
}

struct Recording {
    name: String,
    steps: Vec<WorkflowStep>,
    last_step: Option<Instant>,
}

/// Callback that routes one replayed step back through the dispatcher.
pub type StepRunner<'a> = &'a (dyn Fn(
    String,
    JsonValue,
) -> Pin<Box<dyn Future<Output = JsonValue> + Send>>
             + Send
             + Sync);

pub struct WorkflowManager {
    path: PathBuf,
    recording: Mutex<Option<Recording>>,
}

impl WorkflowManager {
    pub fn new(workflows_dir: PathBuf) -> Self {
        Self {
            path: workflows_dir.join("workflows.json"),
            recording: Mutex::new(None),
        }
    }

    fn load(&self) -> serde_json::Map<String, JsonValue> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failed to parse workflows: {e}");
                serde_json::Map::new()
            }),
            Err(_) => serde_json::Map::new(),
        }
    }

    fn save(&self, workflows: &serde_json::Map<String, JsonValue>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(workflows)?)?;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// Append a step to the active recording. Meta tools and failed
    /// calls are never recorded; absence of a recording is a no-op.
    pub fn record_step(&self, tool: &str, params: &JsonValue, success: bool, is_meta: bool) {
        if is_meta || !success {
            return;
        }
        let Ok(mut slot) = self.recording.lock() else {
            return;
        };
        let Some(recording) = slot.as_mut() else {
            return;
        };
        let now = Instant::now();
        let delay_ms = recording
            .last_step
            .map(|last| now.duration_since(last).as_millis() as u64)
            .unwrap_or(0);
        recording.last_step = Some(now);
        recording.steps.push(WorkflowStep {
            tool: tool.to_string(),
            params: params.clone(),
            delay_ms,
        });
    }

    pub fn start_recording(&self, name: &str) -> Result<JsonValue> {
        let mut slot = self.recording.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(active) = slot.as_ref() {
            return Err(ToolError::invalid(format!(
                "Already recording workflow '{}'. Call workflow_stop first.",
                active.name
            )));
        }
        if self.load().contains_key(name) {
            return Err(ToolError::invalid(format!(
                "Workflow '{name}' already exists. Delete it first or use a different name."
            )));
        }
        *slot = Some(Recording {
            name: name.to_string(),
            steps: Vec::new(),
            last_step: None,
        });
        Ok(json!({
            "success": true,
            "recording": true,
            "workflow_name": name,
            "message": format!("Recording workflow '{name}'. Perform actions, then call workflow_stop."),
        }))
    }

    pub fn stop_recording(&self) -> Result<JsonValue> {
        let recording = {
            let mut slot = self.recording.lock().unwrap_or_else(|p| p.into_inner());
            slot.take()
        };
        let Some(recording) = recording else {
            return Err(ToolError::invalid("Not currently recording any workflow."));
        };

        if recording.steps.is_empty() {
            return Ok(json!({
                "success": true,
                "workflow_name": recording.name,
                "steps": 0,
                "message": "No steps recorded - workflow not saved.",
            }));
        }

        let mut workflows = self.load();
        let step_count = recording.steps.len();
        workflows.insert(
            recording.name.clone(),
            serde_json::to_value(Workflow {
                steps: recording.steps,
                created: now_iso(),
                step_count,
            })?,
        );
        self.save(&workflows)?;

        Ok(json!({
            "success": true,
            "workflow_name": recording.name,
            "steps": step_count,
            "message": format!("Workflow '{}' saved with {step_count} steps.", recording.name),
        }))
    }

    /// Replay a saved workflow strictly sequentially. Every step passes
    /// the kill check and the safety gate; the first rejection or
    /// failure stops the run and the partial results are returned.
    pub async fn run(
        &self,
        name: &str,
        safety: &SafetyEngine,
        dispatch: StepRunner<'_>,
    ) -> Result<JsonValue> {
        let workflows = self.load();
        let Some(raw) = workflows.get(name) else {
            let available: Vec<&String> = workflows.keys().collect();
            return Err(ToolError::invalid(format!(
                "Workflow '{name}' not found. Available: {available:?}"
            )));
        };
        let workflow: Workflow = serde_json::from_value(raw.clone())?;
        let total_steps = workflow.steps.len();
        let mut results: Vec<JsonValue> = Vec::new();

        for (index, step) in workflow.steps.iter().enumerate() {
            if safety.is_killed() {
                results.push(json!({
                    "step": index + 1,
                    "tool": step.tool,
                    "status": "skipped",
                    "reason": "kill_switch_active",
                }));
                return Ok(json!({
                    "success": false,
                    "workflow_name": name,
                    "completed_steps": index,
                    "total_steps": total_steps,
                    "results": results,
                    "stopped_reason": "kill_switch",
                }));
            }

            let (approved, reason) = safety.approve(&step.tool, &step.params);
            if !approved {
                results.push(json!({
                    "step": index + 1,
                    "tool": step.tool,
                    "status": "blocked",
                    "reason": reason,
                }));
                return Ok(json!({
                    "success": false,
                    "workflow_name": name,
                    "completed_steps": index,
                    "total_steps": total_steps,
                    "results": results,
                    "stopped_reason": "safety_blocked",
                }));
            }

            let result = dispatch(step.tool.clone(), step.params.clone()).await;
            let step_ok = result.get("error").is_none();
            results.push(json!({
                "step": index + 1,
                "tool": step.tool,
                "status": if step_ok { "ok" } else { "error" },
                "result": result,
            }));
            if !step_ok {
                return Ok(json!({
                    "success": false,
                    "workflow_name": name,
                    "completed_steps": index,
                    "total_steps": total_steps,
                    "results": results,
                    "stopped_reason": "step_failed",
                }));
            }

            let delay = Duration::from_millis(step.delay_ms).clamp(MIN_STEP_DELAY, MAX_STEP_DELAY);
            tokio::time::sleep(delay).await;
        }

        Ok(json!({
            "success": true,
            "workflow_name": name,
            "completed_steps": total_steps,
            "total_steps": total_steps,
            "results": results,
        }))
    }

    pub fn list(&self) -> Result<JsonValue> {
        let workflows = self.load();
        let items: Vec<JsonValue> = workflows
            .iter()
            .filter_map(|(name, raw)| {
                let workflow: Workflow = serde_json::from_value(raw.clone()).ok()?;
                Some(json!({
                    "name": name,
                    "step_count": workflow.step_count,
                    "created": workflow.created,
                    "tools": workflow.steps.iter().map(|s| s.tool.clone()).collect::<Vec<_>>(),
                }))
            })
            .collect();
        Ok(json!({
            "success": true,
            "workflows": items,
            "total": items.len(),
        }))
    }

    pub fn delete(&self, name: &str) -> Result<JsonValue> {
        let mut workflows = self.load();
        if workflows.remove(name).is_none() {
            return Err(ToolError::invalid(format!("Workflow '{name}' not found.")));
        }
        self.save(&workflows)?;
        Ok(json!({
            "success": true,
            "deleted": name,
            "remaining": workflows.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::Config;
    use deskpilot_protocol::ConfirmationMode;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::RwLock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn manager() -> (tempfile::TempDir, WorkflowManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkflowManager::new(dir.path().to_path_buf());
        (dir, manager)
    }

    fn safety(mode: ConfirmationMode) -> SafetyEngine {
        let mut config = Config::default();
        config.security.confirmation_mode = mode;
        SafetyEngine::new(Arc::new(RwLock::new(config)))
    }

    fn record_three_steps(manager: &WorkflowManager, name: &str) {
        manager.start_recording(name).unwrap();
        manager.record_step("click", &json!({"x": 1, "y": 2}), true, false);
        manager.record_step("type_text", &json!({"text": "hi"}), true, false);
        manager.record_step("press_key", &json!({"key": "enter"}), true, false);
        manager.stop_recording().unwrap();
    }

    #[test]
    fn only_one_recording_at_a_time() {
        let (_dir, manager) = manager();
        manager.start_recording("first").unwrap();
        let err = manager.start_recording("second").unwrap_err();
        assert!(err.message.contains("Already recording"));
        manager.stop_recording().unwrap();
    }

    #[test]
    fn meta_and_failed_steps_are_not_recorded() {
        let (_dir, manager) = manager();
        manager.start_recording("wf").unwrap();
        manager.record_step("workflow_list", &json!({}), true, true);
        manager.record_step("click", &json!({}), false, false);
        manager.record_step("click", &json!({"x": 1}), true, false);
        let result = manager.stop_recording().unwrap();
        assert_eq!(result["steps"], json!(1));
    }

    #[test]
    fn empty_recording_is_not_saved() {
        let (_dir, manager) = manager();
        manager.start_recording("empty").unwrap();
        let result = manager.stop_recording().unwrap();
        assert_eq!(result["steps"], json!(0));
        assert_eq!(manager.list().unwrap()["total"], json!(0));
    }

    #[tokio::test]
    async fn replay_executes_all_steps_in_order() {
        let (_dir, manager) = manager();
        record_three_steps(&manager, "wf");
        let safety = safety(ConfirmationMode::Autonomous);

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_ref = Arc::clone(&order);
        let dispatch = move |tool: String, _params: JsonValue| {
            let order_ref = Arc::clone(&order_ref);
            Box::pin(async move {
                order_ref.lock().unwrap().push(tool);
                json!({"success": true})
            }) as Pin<Box<dyn Future<Output = JsonValue> + Send>>
        };

        let result = manager.run("wf", &safety, &dispatch).await.unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["completed_steps"], json!(3));
        assert_eq!(
            *order.lock().unwrap(),
            vec!["click".to_string(), "type_text".to_string(), "press_key".to_string()]
        );
    }

    #[tokio::test]
    async fn replay_stops_at_first_blocked_step() {
        let (_dir, manager) = manager();
        manager.start_recording("guarded").unwrap();
        manager.record_step("click", &json!({"x": 1}), true, false);
        manager.record_step(
            "run_command",
            &json!({"command": "format C:"}),
            true,
            false,
        );
        manager.record_step("click", &json!({"x": 2}), true, false);
        manager.stop_recording().unwrap();

        let safety = safety(ConfirmationMode::Autonomous);
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_ref = Arc::clone(&executed);
        let dispatch = move |_tool: String, _params: JsonValue| {
            let executed_ref = Arc::clone(&executed_ref);
            Box::pin(async move {
                executed_ref.fetch_add(1, Ordering::SeqCst);
                json!({"success": true})
            }) as Pin<Box<dyn Future<Output = JsonValue> + Send>>
        };

        let result = manager.run("guarded", &safety, &dispatch).await.unwrap();
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["stopped_reason"], json!("safety_blocked"));
        // Executed steps equals the index of the blocked step.
        assert_eq!(result["completed_steps"], json!(1));
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replay_halts_when_killed() {
        let (_dir, manager) = manager();
        record_three_steps(&manager, "wf");
        let safety = safety(ConfirmationMode::Autonomous);
        safety.activate_kill();

        let dispatch = move |_tool: String, _params: JsonValue| {
            Box::pin(async move { json!({"success": true}) })
                as Pin<Box<dyn Future<Output = JsonValue> + Send>>
        };
        let result = manager.run("wf", &safety, &dispatch).await.unwrap();
        assert_eq!(result["stopped_reason"], json!("kill_switch"));
        assert_eq!(result["completed_steps"], json!(0));
    }

    #[tokio::test]
    async fn replay_stops_on_step_error() {
        let (_dir, manager) = manager();
        record_three_steps(&manager, "wf");
        let safety = safety(ConfirmationMode::Autonomous);

        let dispatch = move |tool: String, _params: JsonValue| {
            Box::pin(async move {
                if tool == "type_text" {
                    json!({"error": "element vanished"})
                } else {
                    json!({"success": true})
                }
            }) as Pin<Box<dyn Future<Output = JsonValue> + Send>>
        };
        let result = manager.run("wf", &safety, &dispatch).await.unwrap();
        assert_eq!(result["stopped_reason"], json!("step_failed"));
        assert_eq!(result["completed_steps"], json!(1));
        assert_eq!(result["results"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn delete_removes_from_disk() {
        let (_dir, manager) = manager();
        record_three_steps(&manager, "wf");
        assert_eq!(manager.list().unwrap()["total"], json!(1));
        manager.delete("wf").unwrap();
        assert_eq!(manager.list().unwrap()["total"], json!(0));
        assert!(manager.delete("wf").is_err());
    }
}
