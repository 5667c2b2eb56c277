//! Central safety gate. Every tool call passes through [`SafetyEngine::approve`]
//! before its body runs; if the gate says no, the action does not happen.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use deskpilot_protocol::ConfirmationMode;
use deskpilot_protocol::ResultClass;

use crate::config::Config;
use crate::util::now_iso;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Bound on the audit ring; oldest entries are evicted first.
const MAX_ACTION_LOG: usize = 1_000;

/// Parameter keys that may carry an application identity worth checking
/// against the blocked-apps list.
const APP_PARAM_KEYS: [&str; 5] = ["window_title", "app_name", "process_name", "title", "name"];

/// Parameter keys holding binary blobs that must never land in the audit log.
const BINARY_PARAM_KEYS: [&str; 2] = ["screenshot_data", "image_data"];

/// Tools considered sensitive under `confirmation_mode = sensitive`.
const SENSITIVE_TOOLS: [&str; 9] = [
    "run_command",
    "open_application",
    "manage_window",
    "type_text",
    "clipboard",
    "run_app_script",
    "schedule_task",
    "watch_folder",
    "workflow_run",
];

const SENSITIVE_KEYWORDS: [&str; 8] = [
    "close",
    "delete",
    "remove",
    "kill",
    "terminate",
    "write",
    "paste",
    "send",
];

/// One entry in the audit ring.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub timestamp: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
    pub approved: bool,
    pub result: ResultClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct SafetyEngine {
    config: Arc<RwLock<Config>>,
    killed: Mutex<bool>,
    action_log: Mutex<VecDeque<ActionRecord>>,
    rate_window: Mutex<VecDeque<Instant>>,
}

impl SafetyEngine {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            config,
            killed: Mutex::new(false),
            action_log: Mutex::new(VecDeque::new()),
            rate_window: Mutex::new(VecDeque::new()),
        }
    }

    // ── Kill switch ──────────────────────────────────────────────

    pub fn activate_kill(&self) {
        if let Ok(mut killed) = self.killed.lock() {
            *killed = true;
        }
        error!("KILL SWITCH ACTIVATED - all automation stopped");
    }

    pub fn reset_kill(&self) {
        if let Ok(mut killed) = self.killed.lock() {
            *killed = false;
        }
        info!("kill switch reset - automation can resume");
    }

    pub fn is_killed(&self) -> bool {
        self.killed.lock().map(|k| *k).unwrap_or(true)
    }

    // ── Approval ─────────────────────────────────────────────────

    /// Apply the gate predicates in strict order, stopping at the first
    /// rejection. On approval the call is counted against the rate limit
    /// and logged.
    pub fn approve(&self, tool: &str, params: &JsonValue) -> (bool, String) {
        // 1. Kill switch.
        if self.is_killed() {
            self.log_action(tool, params, false, ResultClass::Killed, Some("kill switch is active"));
            return (
                false,
                "Kill switch is active. Use kill_switch(action='reset') to resume.".to_string(),
            );
        }

        let (mode, max_per_minute) = {
            let config = self.config.read().unwrap_or_else(|p| p.into_inner());
            (
                config.security.confirmation_mode,
                config.security.max_actions_per_minute,
            )
        };

        // 2. Blocked applications.
        if let Some(blocked) = self.blocked_app_match(tool, params) {
            self.log_action(
                tool,
                params,
                false,
                ResultClass::Blocked,
                Some(&format!("blocked app: {blocked}")),
            );
            return (
                false,
                format!(
                    "Blocked: '{blocked}' is a protected application. The engine never interacts \
                     with banking, password managers, or security software."
                ),
            );
        }

        // 3. Blocked commands.
        if let Some(blocked) = self.blocked_command_match(params) {
            self.log_action(
                tool,
                params,
                false,
                ResultClass::Blocked,
                Some(&format!("blocked command: {blocked}")),
            );
            return (
                false,
                format!("Blocked: '{blocked}' is a destructive command and is not allowed."),
            );
        }

        // 4. Rate limit.
        if !self.within_rate_limit(max_per_minute) {
            self.log_action(tool, params, false, ResultClass::Blocked, Some("rate limit exceeded"));
            return (
                false,
                format!(
                    "Rate limit: maximum {max_per_minute} actions/minute exceeded. Wait a moment."
                ),
            );
        }

        // 5. Confirmation mode.
        match mode {
            ConfirmationMode::Block => {
                self.log_action(
                    tool,
                    params,
                    false,
                    ResultClass::Blocked,
                    Some("block mode active - all automation disabled"),
                );
                return (
                    false,
                    "Block mode active - all automation is disabled. Change confirmation_mode to \
                     'all', 'sensitive', or 'autonomous' to allow actions."
                        .to_string(),
                );
            }
            ConfirmationMode::All => {
                // The transport client surfaces the call to the user; we
                // record that the confirmation layer saw it and proceed.
                self.log_action(
                    tool,
                    params,
                    true,
                    ResultClass::Confirmed,
                    Some("confirmation mode 'all' - action shown to user by the client"),
                );
            }
            ConfirmationMode::Sensitive => {
                if self.is_sensitive(tool, params) {
                    self.log_action(
                        tool,
                        params,
                        true,
                        ResultClass::Confirmed,
                        Some("confirmation mode 'sensitive' - action shown to user by the client"),
                    );
                }
            }
            ConfirmationMode::Autonomous => {}
        }

        // 6. All clear.
        self.record_rate_timestamp();
        self.log_action(tool, params, true, ResultClass::Success, None);
        (true, "Approved".to_string())
    }

    fn blocked_app_match(&self, tool: &str, params: &JsonValue) -> Option<String> {
        let blocked_apps: Vec<String> = match self.config.read() {
            Ok(c) => c.security.blocked_apps.clone(),
            Err(_) => return None,
        };

        let mut haystacks: Vec<String> = Vec::new();
        if let Some(map) = params.as_object() {
            for key in APP_PARAM_KEYS {
                if let Some(value) = map.get(key).and_then(JsonValue::as_str) {
                    if !value.is_empty() {
                        haystacks.push(value.to_lowercase());
                    }
                }
            }
        }
        haystacks.push(tool.to_lowercase());

        for haystack in &haystacks {
            for blocked in &blocked_apps {
                if haystack.contains(&blocked.to_lowercase()) {
                    return Some(blocked.clone());
                }
            }
        }
        None
    }

    fn blocked_command_match(&self, params: &JsonValue) -> Option<String> {
        let command = params
            .as_object()
            .and_then(|m| m.get("command"))
            .and_then(JsonValue::as_str)?;
        let command = command.trim().to_lowercase();
        if command.is_empty() {
            return None;
        }

        let blocked_commands: Vec<String> = match self.config.read() {
            Ok(c) => c.security.blocked_commands.clone(),
            Err(_) => return None,
        };
        blocked_commands
            .into_iter()
            .find(|blocked| command.contains(&blocked.to_lowercase()))
    }

    fn is_sensitive(&self, tool: &str, params: &JsonValue) -> bool {
        if SENSITIVE_TOOLS.contains(&tool) {
            return true;
        }
        let action = params
            .as_object()
            .and_then(|m| m.get("action"))
            .and_then(JsonValue::as_str)
            .unwrap_or("")
            .to_lowercase();
        SENSITIVE_KEYWORDS.iter().any(|s| action.contains(s))
    }

    // ── Rate limiter ─────────────────────────────────────────────

    fn within_rate_limit(&self, max_per_minute: u32) -> bool {
        let now = Instant::now();
        let Ok(mut window) = self.rate_window.lock() else {
            return false;
        };
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        (window.len() as u32) < max_per_minute
    }

    fn record_rate_timestamp(&self) {
        if let Ok(mut window) = self.rate_window.lock() {
            window.push_back(Instant::now());
        }
    }

    fn actions_this_minute(&self) -> usize {
        let now = Instant::now();
        self.rate_window
            .lock()
            .map(|w| {
                w.iter()
                    .filter(|t| now.duration_since(**t) < RATE_WINDOW)
                    .count()
            })
            .unwrap_or(0)
    }

    // ── Audit log ────────────────────────────────────────────────

    fn log_action(
        &self,
        tool: &str,
        params: &JsonValue,
        approved: bool,
        result: ResultClass,
        reason: Option<&str>,
    ) {
        let params = params.as_object().map(|map| {
            JsonValue::Object(
                map.iter()
                    .filter(|(k, _)| !BINARY_PARAM_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        });

        let record = ActionRecord {
            timestamp: now_iso(),
            tool: tool.to_string(),
            params,
            approved,
            result,
            reason: reason.map(str::to_string),
        };

        match result {
            ResultClass::Killed => error!("KILLED: {tool}"),
            ResultClass::Blocked => warn!("BLOCKED: {tool} - {}", reason.unwrap_or("")),
            ResultClass::Denied => info!("DENIED: {tool} - {}", reason.unwrap_or("")),
            _ => debug!("OK: {tool}"),
        }

        if let Ok(mut log) = self.action_log.lock() {
            log.push_back(record);
            while log.len() > MAX_ACTION_LOG {
                log.pop_front();
            }
        }
    }

    pub fn action_log(&self, last_n: usize) -> Vec<ActionRecord> {
        self.action_log
            .lock()
            .map(|log| log.iter().rev().take(last_n).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> JsonValue {
        let (mode, max_per_minute, blocked_apps, blocked_commands) = match self.config.read() {
            Ok(c) => (
                c.security.confirmation_mode,
                c.security.max_actions_per_minute,
                c.security.blocked_apps.len(),
                c.security.blocked_commands.len(),
            ),
            Err(_) => (ConfirmationMode::All, 0, 0, 0),
        };
        json!({
            "kill_switch_active": self.is_killed(),
            "confirmation_mode": mode.to_string(),
            "actions_this_minute": self.actions_this_minute(),
            "max_actions_per_minute": max_per_minute,
            "blocked_apps_count": blocked_apps,
            "blocked_commands_count": blocked_commands,
            "total_actions_logged": self.action_log.lock().map(|l| l.len()).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine_with(mode: ConfirmationMode, max_per_minute: u32) -> SafetyEngine {
        let mut config = Config::default();
        config.security.confirmation_mode = mode;
        config.security.max_actions_per_minute = max_per_minute;
        SafetyEngine::new(Arc::new(RwLock::new(config)))
    }

    #[test]
    fn kill_switch_short_circuits_everything() {
        let engine = engine_with(ConfirmationMode::Autonomous, 30);
        engine.activate_kill();
        let (approved, reason) = engine.approve("click", &json!({"x": 1, "y": 2}));
        assert!(!approved);
        assert!(reason.contains("Kill switch"));

        engine.reset_kill();
        let (approved, _) = engine.approve("click", &json!({"x": 1, "y": 2}));
        assert!(approved);
    }

    #[test]
    fn blocked_command_is_substring_case_insensitive() {
        let engine = engine_with(ConfirmationMode::Autonomous, 30);
        let (approved, reason) =
            engine.approve("run_command", &json!({"command": "echo x && FORMAT C:"}));
        assert!(!approved);
        assert!(reason.contains("format"));

        let (approved, _) = engine.approve("run_command", &json!({"command": "echo safe"}));
        assert!(approved);
    }

    #[test]
    fn blocked_app_matches_any_identity_key() {
        let engine = engine_with(ConfirmationMode::Autonomous, 30);
        let (approved, reason) =
            engine.approve("click", &json!({"window_title": "1Password - Vault"}));
        assert!(!approved);
        assert!(reason.contains("1password"));
    }

    #[test]
    fn rate_limit_blocks_call_n_plus_one() {
        let engine = engine_with(ConfirmationMode::Autonomous, 3);
        for _ in 0..3 {
            let (approved, _) = engine.approve("click", &json!({}));
            assert!(approved);
        }
        let (approved, reason) = engine.approve("click", &json!({}));
        assert!(!approved);
        assert!(reason.contains("Rate limit"));
    }

    #[test]
    fn block_mode_rejects_unconditionally() {
        let engine = engine_with(ConfirmationMode::Block, 30);
        let (approved, reason) = engine.approve("list_windows", &json!({}));
        assert!(!approved);
        assert!(reason.contains("Block mode"));
    }

    #[test]
    fn sensitive_mode_logs_confirmation_for_sensitive_tools() {
        let engine = engine_with(ConfirmationMode::Sensitive, 30);
        let (approved, _) = engine.approve("run_command", &json!({"command": "echo hi"}));
        assert!(approved);
        let log = engine.action_log(10);
        assert!(
            log.iter()
                .any(|r| r.result == ResultClass::Confirmed && r.tool == "run_command")
        );
    }

    #[test]
    fn audit_log_never_stores_binary_params() {
        let engine = engine_with(ConfirmationMode::Autonomous, 30);
        let (approved, _) = engine.approve(
            "click",
            &json!({"x": 1, "image_data": "aGVsbG8=", "window_title": "Notes"}),
        );
        assert!(approved);
        let log = engine.action_log(1);
        let params = log[0].params.as_ref().unwrap().as_object().unwrap();
        assert!(!params.contains_key("image_data"));
        assert!(params.contains_key("window_title"));
    }

    #[test]
    fn status_reports_counts() {
        let engine = engine_with(ConfirmationMode::Autonomous, 30);
        engine.approve("click", &json!({}));
        let status = engine.status();
        assert_eq!(status["kill_switch_active"], json!(false));
        assert_eq!(status["actions_this_minute"], json!(1));
    }
}
