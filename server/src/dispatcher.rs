//! Per-request pipeline: save the user's focus, run the safety gate,
//! route to the tool body, post-process, redact, record, restore focus,
//! and encode the response. Tool bodies never raise out of here.

use std::sync::Arc;
use std::time::Duration;

use deskpilot_core::Engine;
use deskpilot_protocol::ContentItem;
use deskpilot_protocol::ToolCallRequest;
use deskpilot_protocol::ToolCallResponse;
use deskpilot_protocol::ToolRequest;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::warn;

/// Window-appearance polling after `open_application` under
/// background-only policy: six half-second probes.
const REDIRECT_POLLS: u32 = 6;
const REDIRECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ToolDispatcher {
    engine: Arc<Engine>,
}

impl ToolDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, request: ToolCallRequest) -> ToolCallResponse {
        let ToolCallRequest { id, tool, params } = request;

        let mut typed = match ToolRequest::parse(&tool, params.clone()) {
            Ok(typed) => typed,
            Err(e) => {
                let result = json!({
                    "error": e.to_string(),
                    "hint": "Use get_capabilities to list recognized tools and their groups.",
                });
                return ToolCallResponse::error(id, pretty(&result));
            }
        };

        // Kill-switch management is the one tool that is always
        // permitted; it neither saves focus nor passes the gate.
        let manages_focus = typed.manages_focus();
        if !manages_focus {
            let engine = Arc::clone(&self.engine);
            let _ = tokio::task::spawn_blocking(move || engine.focus.save()).await;
        }

        let response = self.gated_call(&mut typed, &params).await;

        if !manages_focus {
            // Best-effort: restoration failure is logged, never fatal.
            let engine = Arc::clone(&self.engine);
            let _ = tokio::task::spawn_blocking(move || engine.focus.restore()).await;
        }

        match response {
            GatedOutcome::Rejected(reason) => {
                ToolCallResponse::ok(id, vec![ContentItem::text(reason)])
            }
            GatedOutcome::Completed(result) => ToolCallResponse::ok(id, encode(&typed, result)),
        }
    }

    async fn gated_call(&self, typed: &mut ToolRequest, params: &JsonValue) -> GatedOutcome {
        if let ToolRequest::KillSwitch(p) = typed {
            let result = self
                .engine
                .kill_switch_tool(&p.action)
                .unwrap_or_else(|e| e.to_value());
            return GatedOutcome::Completed(result);
        }

        let tool_name = typed.name();
        let (approved, reason) = self.engine.safety.approve(tool_name, params);
        if !approved {
            return GatedOutcome::Rejected(reason);
        }

        // Background-only policy: a move that would land a window on the
        // user's monitor is rewritten to the agent area before it runs.
        self.redirect_move(typed);

        let result = match self.engine.execute(typed).await {
            Ok(value) => value,
            Err(e) => e.to_value(),
        };
        let success = result.get("error").is_none();

        if success {
            self.post_open_application(typed).await;
        }

        // Bookkeeping never fails the call it observes.
        self.engine.adaptive.record_action(tool_name, params);
        self.engine
            .workflows
            .record_step(tool_name, params, success, typed.is_meta());

        GatedOutcome::Completed(self.engine.redactor.sanitize_value(result))
    }

    fn redirect_move(&self, typed: &mut ToolRequest) {
        let ToolRequest::ManageWindow(p) = typed else {
            return;
        };
        if p.action != "move" {
            return;
        }
        let agent_screen_only = self
            .engine
            .config
            .read()
            .map(|c| c.automation.agent_screen_only)
            .unwrap_or(false);
        if !agent_screen_only || !self.engine.background.is_active() {
            return;
        }
        let (Some(x), Some(y)) = (p.x, p.y) else {
            return;
        };
        if self.engine.background.is_on_user_screen(x, y) {
            if let Some((agent_x, agent_y)) = self.engine.background.agent_placement() {
                debug!("redirecting window move from ({x},{y}) to agent screen");
                p.x = Some(agent_x);
                p.y = Some(agent_y);
            }
        }
    }

    /// After a successful `open_application` under background-only
    /// policy, wait briefly for the new window and park it on the agent
    /// screen.
    async fn post_open_application(&self, typed: &ToolRequest) {
        let ToolRequest::OpenApplication(p) = typed else {
            return;
        };
        let agent_screen_only = self
            .engine
            .config
            .read()
            .map(|c| c.automation.agent_screen_only)
            .unwrap_or(false);
        if !agent_screen_only || !self.engine.background.is_active() {
            return;
        }
        let Some(fragment) = p.app_name.clone().or_else(|| {
            p.app_path.as_ref().and_then(|path| {
                std::path::Path::new(path)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
        }) else {
            return;
        };

        for _ in 0..REDIRECT_POLLS {
            tokio::time::sleep(REDIRECT_POLL_INTERVAL).await;
            let engine = Arc::clone(&self.engine);
            let fragment_probe = fragment.clone();
            let appeared = tokio::task::spawn_blocking(move || {
                engine
                    .desktop
                    .find_window(&fragment_probe)
                    .ok()
                    .flatten()
                    .map(|w| w.title)
            })
            .await
            .ok()
            .flatten();

            if let Some(title) = appeared {
                let engine = Arc::clone(&self.engine);
                let moved = tokio::task::spawn_blocking(move || {
                    engine.background.move_to_agent_screen(&title)
                })
                .await;
                match moved {
                    Ok(Ok(_)) => debug!("redirected '{fragment}' to the agent screen"),
                    Ok(Err(e)) => warn!("could not redirect '{fragment}': {e}"),
                    Err(e) => warn!("redirect worker failed: {e}"),
                }
                return;
            }
        }
        warn!("'{fragment}' never presented a window to redirect");
    }
}

enum GatedOutcome {
    Rejected(String),
    Completed(JsonValue),
}

fn pretty(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Encode a tool result into content items. Captures and vision
/// fallbacks ship the image as its own item; everything else is text.
fn encode(typed: &ToolRequest, mut result: JsonValue) -> Vec<ContentItem> {
    match typed {
        ToolRequest::TakeScreenshot(_) => {
            if let Some(image) = result
                .get("image_base64")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
            {
                let summary = format!(
                    "Screenshot: {}x{} ({}KB) - Source: {}",
                    result["width"],
                    result["height"],
                    result["size_kb"],
                    result["source"].as_str().unwrap_or("unknown"),
                );
                return vec![ContentItem::jpeg(image), ContentItem::text(summary)];
            }
        }
        ToolRequest::SmartFind(_) => {
            let requires_vision = result["requires_vision"].as_bool().unwrap_or(false);
            if requires_vision {
                if let Some(image) = result
                    .as_object_mut()
                    .and_then(|map| map.remove("image_base64"))
                    .and_then(|v| v.as_str().map(str::to_string))
                {
                    return vec![ContentItem::jpeg(image), ContentItem::text(pretty(&result))];
                }
            }
        }
        _ => {}
    }
    vec![ContentItem::text(pretty(&result))]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use deskpilot_core::Config;
    use deskpilot_core::platform::Bounds;
    use deskpilot_core::platform::Desktop;
    use deskpilot_core::platform::sim::SimDesktop;
    use deskpilot_protocol::ConfirmationMode;
    use pretty_assertions::assert_eq;

    fn fixture(mode: ConfirmationMode) -> (tempfile::TempDir, Arc<SimDesktop>, ToolDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.security.confirmation_mode = mode;
        config.automation.agent_screen_only = false;
        config.save(dir.path()).unwrap();

        let sim = Arc::new(SimDesktop::new());
        let engine = Engine::new(dir.path().to_path_buf(), sim.clone());
        (dir, sim, ToolDispatcher::new(engine))
    }

    fn request(id: i64, tool: &str, params: JsonValue) -> ToolCallRequest {
        ToolCallRequest {
            id: json!(id),
            tool: tool.to_string(),
            params,
        }
    }

    fn text_of(response: &ToolCallResponse) -> String {
        response
            .content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.clone()),
                ContentItem::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn destructive_command_is_blocked_and_safe_command_runs() {
        let (_dir, _sim, dispatcher) = fixture(ConfirmationMode::Autonomous);

        let blocked = dispatcher
            .handle(request(1, "run_command", json!({"command": "format C:"})))
            .await;
        let text = text_of(&blocked);
        assert!(text.contains("Blocked"), "unexpected: {text}");
        assert!(text.to_lowercase().contains("format"));

        let ok = dispatcher
            .handle(request(
                2,
                "run_command",
                json!({"command": "echo safe", "shell": "sh"}),
            ))
            .await;
        let text = text_of(&ok);
        assert!(text.contains("safe"), "unexpected: {text}");
    }

    #[tokio::test]
    async fn kill_switch_gates_everything_until_reset() {
        let (_dir, _sim, dispatcher) = fixture(ConfirmationMode::Autonomous);

        dispatcher
            .handle(request(1, "kill_switch", json!({"action": "activate"})))
            .await;

        let killed = dispatcher
            .handle(request(2, "list_windows", JsonValue::Null))
            .await;
        assert!(text_of(&killed).contains("Kill switch is active"));

        // Kill management itself stays reachable.
        let status = dispatcher
            .handle(request(3, "kill_switch", json!({"action": "status"})))
            .await;
        assert!(text_of(&status).contains("kill_switch_active"));

        dispatcher
            .handle(request(4, "kill_switch", json!({"action": "reset"})))
            .await;
        let after = dispatcher
            .handle(request(5, "list_windows", JsonValue::Null))
            .await;
        assert!(text_of(&after).contains("count"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_error() {
        let (_dir, _sim, dispatcher) = fixture(ConfirmationMode::Autonomous);
        let response = dispatcher
            .handle(request(1, "frobnicate", JsonValue::Null))
            .await;
        assert_eq!(response.is_error, Some(true));
        assert!(text_of(&response).contains("unknown tool"));
    }

    #[tokio::test]
    async fn screenshot_returns_image_plus_text() {
        let (_dir, sim, dispatcher) = fixture(ConfirmationMode::Autonomous);
        sim.add_window(
            "Canvas",
            Bounds {
                x: 0,
                y: 0,
                width: 100,
                height: 80,
            },
            1,
        );

        let response = dispatcher
            .handle(request(
                1,
                "take_screenshot",
                json!({"window_title": "Canvas"}),
            ))
            .await;
        assert_eq!(response.content.len(), 2);
        assert!(matches!(response.content[0], ContentItem::Image { .. }));
        assert!(text_of(&response).contains("Screenshot"));
    }

    #[tokio::test]
    async fn smart_find_vision_fallback_ships_the_image() {
        let (_dir, sim, dispatcher) = fixture(ConfirmationMode::Autonomous);
        sim.add_window(
            "Empty",
            Bounds {
                x: 0,
                y: 0,
                width: 100,
                height: 80,
            },
            1,
        );

        let response = dispatcher
            .handle(request(
                1,
                "smart_find",
                json!({"target": "Nothing Here", "window_title": "Empty"}),
            ))
            .await;
        assert!(matches!(response.content[0], ContentItem::Image { .. }));
        let text = text_of(&response);
        assert!(text.contains("requires_vision"));
        assert!(!text.contains("image_base64"));
    }

    #[tokio::test]
    async fn sensitive_output_is_redacted() {
        let (_dir, _sim, dispatcher) = fixture(ConfirmationMode::Autonomous);
        dispatcher
            .handle(request(
                1,
                "clipboard",
                json!({"action": "write", "text": "card 4111 1111 1111 1111"}),
            ))
            .await;
        let read = dispatcher
            .handle(request(2, "clipboard", json!({"action": "read"})))
            .await;
        let text = text_of(&read);
        assert!(text.contains("[CREDIT-CARD-REDACTED]"), "unexpected: {text}");
        assert!(!text.contains("4111"));
    }

    #[tokio::test]
    async fn focus_is_restored_after_a_gated_call() {
        let (_dir, sim, dispatcher) = fixture(ConfirmationMode::Autonomous);
        let user = sim.add_window(
            "User Editor",
            Bounds {
                x: 0,
                y: 0,
                width: 50,
                height: 50,
            },
            1,
        );
        let agent = sim.add_window(
            "Agent Target",
            Bounds {
                x: 0,
                y: 0,
                width: 50,
                height: 50,
            },
            2,
        );
        sim.set_foreground_window(user);

        dispatcher
            .handle(request(1, "click", json!({"x": 10, "y": 10})))
            .await;
        assert_eq!(sim.foreground_window().unwrap().id, user);

        // focus_window intentionally changes focus and is exempt.
        dispatcher
            .handle(request(2, "focus_window", json!({"window_title": "Agent"})))
            .await;
        assert_eq!(sim.foreground_window().unwrap().id, agent);
    }

    #[tokio::test]
    async fn workflow_records_only_successful_non_meta_calls() {
        let (_dir, _sim, dispatcher) = fixture(ConfirmationMode::Autonomous);

        dispatcher
            .handle(request(1, "workflow_record", json!({"name": "demo"})))
            .await;
        dispatcher
            .handle(request(2, "click", json!({"x": 5, "y": 5})))
            .await;
        // Meta tool: must not be recorded.
        dispatcher
            .handle(request(3, "get_capabilities", JsonValue::Null))
            .await;
        // Failing tool: must not be recorded.
        dispatcher
            .handle(request(4, "click", json!({"element_name": "Missing"})))
            .await;
        let stopped = dispatcher
            .handle(request(5, "workflow_stop", JsonValue::Null))
            .await;
        assert!(text_of(&stopped).contains("\"steps\": 1"));
    }

    #[tokio::test]
    async fn background_move_redirection_rewrites_user_screen_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.security.confirmation_mode = ConfirmationMode::Autonomous;
        config.automation.agent_screen_only = true;
        config.save(dir.path()).unwrap();

        let sim = Arc::new(SimDesktop::new());
        sim.set_monitors(vec![
            deskpilot_core::platform::MonitorInfo {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
                is_primary: true,
            },
            deskpilot_core::platform::MonitorInfo {
                left: 1920,
                top: 0,
                right: 3840,
                bottom: 1080,
                is_primary: false,
            },
        ]);
        let win = sim.add_window(
            "Workbench",
            Bounds {
                x: 2000,
                y: 100,
                width: 400,
                height: 300,
            },
            1,
        );
        let engine = Engine::new(dir.path().to_path_buf(), sim.clone());
        let dispatcher = ToolDispatcher::new(engine);

        dispatcher
            .handle(request(1, "setup_background_mode", JsonValue::Null))
            .await;
        dispatcher
            .handle(request(
                2,
                "manage_window",
                json!({
                    "window_title": "Workbench",
                    "action": "move",
                    "x": 100,
                    "y": 100,
                }),
            ))
            .await;

        // The user-screen target was rewritten onto the agent monitor.
        let info = sim.window_info(win).unwrap();
        assert!(info.bounds.x >= 1920, "window at {:?}", info.bounds);
    }
}
