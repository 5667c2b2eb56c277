//! Background mode: keep automation off the user's screen by moving
//! target windows to a second monitor, or to a synthetic off-screen
//! rectangle when only one monitor exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Bounds;
use crate::platform::Desktop;
use crate::platform::MonitorInfo;
use crate::uia::resolve_window;

/// Margin applied when parking a window on the agent screen.
const PLACEMENT_MARGIN: i32 = 50;

/// Gap between the primary display and the synthetic off-screen area.
const OFFSCREEN_GAP: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundModeKind {
    DualMonitor,
    Offscreen,
}

impl BackgroundModeKind {
    fn as_str(&self) -> &'static str {
        match self {
            BackgroundModeKind::DualMonitor => "dual_monitor",
            BackgroundModeKind::Offscreen => "offscreen",
        }
    }
}

#[derive(Default)]
struct BackgroundState {
    mode: Option<BackgroundModeKind>,
    primary: Option<MonitorInfo>,
    agent_area: Option<MonitorInfo>,
    /// Window title → rectangle before it was parked.
    moved_windows: HashMap<String, Bounds>,
}

pub struct BackgroundManager {
    desktop: Arc<dyn Desktop>,
    state: Mutex<BackgroundState>,
}

impl BackgroundManager {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            state: Mutex::new(BackgroundState::default()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.mode.is_some())
            .unwrap_or(false)
    }

    fn agent_area(&self) -> Option<MonitorInfo> {
        self.state.lock().ok().and_then(|s| s.agent_area)
    }

    /// Whether screen coordinates land on the user's (primary) monitor.
    /// Backs the dispatcher's move redirection.
    pub fn is_on_user_screen(&self, x: i32, y: i32) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        let Some(primary) = state.primary else {
            return false;
        };
        x >= primary.left && x < primary.right && y >= primary.top && y < primary.bottom
    }

    /// Where the dispatcher should rewrite a user-screen move to.
    pub fn agent_placement(&self) -> Option<(i32, i32)> {
        self.agent_area()
            .map(|area| (area.left + PLACEMENT_MARGIN, area.top + PLACEMENT_MARGIN))
    }

    pub fn setup(&self, preferred_mode: Option<&str>) -> Result<JsonValue> {
        let monitors = self.desktop.monitors()?;
        if monitors.is_empty() {
            return Err(ToolError::external("No monitors detected"));
        }
        let primary = monitors
            .iter()
            .copied()
            .find(|m| m.is_primary)
            .unwrap_or(monitors[0]);

        let mode = match preferred_mode {
            Some("dual_monitor") => BackgroundModeKind::DualMonitor,
            Some("offscreen") => BackgroundModeKind::Offscreen,
            Some(other) => {
                return Err(ToolError::invalid(format!(
                    "Unknown background mode '{other}'"
                ))
                .with_hint("Valid modes: dual_monitor, offscreen"));
            }
            None if monitors.len() >= 2 => BackgroundModeKind::DualMonitor,
            None => BackgroundModeKind::Offscreen,
        };

        let agent_area = match mode {
            BackgroundModeKind::DualMonitor => monitors
                .iter()
                .copied()
                .find(|m| !m.is_primary)
                .or_else(|| monitors.get(1).copied())
                .ok_or_else(|| {
                    ToolError::invalid("dual_monitor mode needs a second monitor")
                        .with_hint("Use offscreen mode on single-monitor hosts.")
                })?,
            BackgroundModeKind::Offscreen => {
                let left = primary.right + OFFSCREEN_GAP;
                MonitorInfo {
                    left,
                    top: 0,
                    right: left + primary.width(),
                    bottom: primary.height(),
                    is_primary: false,
                }
            }
        };

        if let Ok(mut state) = self.state.lock() {
            state.mode = Some(mode);
            state.primary = Some(primary);
            state.agent_area = Some(agent_area);
        }

        Ok(json!({
            "success": true,
            "mode": mode.as_str(),
            "monitors_detected": monitors.len(),
            "primary_monitor": {
                "left": primary.left,
                "top": primary.top,
                "width": primary.width(),
                "height": primary.height(),
            },
            "agent_area": {
                "left": agent_area.left,
                "top": agent_area.top,
                "width": agent_area.width(),
                "height": agent_area.height(),
            },
            "hint": match mode {
                BackgroundModeKind::DualMonitor =>
                    "Use move_to_agent_screen to move windows to the agent workspace.",
                BackgroundModeKind::Offscreen =>
                    "Offscreen mode: windows are moved beyond the screen edge; the engine still \
                     reaches them through the accessibility tree.",
            },
        }))
    }

    pub fn move_to_agent_screen(&self, window_title: &str) -> Result<JsonValue> {
        let agent = self.agent_area().ok_or_else(|| {
            ToolError::invalid("Background mode not set up. Call setup_background_mode first.")
        })?;
        let window = resolve_window(self.desktop.as_ref(), Some(window_title))?;

        // Remember where it was so move_to_user_screen can undo this.
        if let Ok(mut state) = self.state.lock() {
            state
                .moved_windows
                .insert(window.title.clone(), window.bounds);
        }

        let width = window.bounds.width.min(agent.width() - PLACEMENT_MARGIN);
        let height = window.bounds.height.min(agent.height() - PLACEMENT_MARGIN);
        let target = Bounds {
            x: agent.left + PLACEMENT_MARGIN,
            y: agent.top + PLACEMENT_MARGIN,
            width,
            height,
        };
        self.desktop.move_window(window.id, target)?;

        let mode = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.mode)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok(json!({
            "success": true,
            "window": window.title,
            "moved_to": mode,
            "new_position": {"x": target.x, "y": target.y},
            "original_position": {
                "x": window.bounds.x,
                "y": window.bounds.y,
                "width": window.bounds.width,
                "height": window.bounds.height,
            },
        }))
    }

    pub fn move_to_user_screen(&self, window_title: &str) -> Result<JsonValue> {
        let primary = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.primary)
            .ok_or_else(|| {
                ToolError::invalid(
                    "Background mode not set up. Call setup_background_mode first.",
                )
            })?;
        let window = resolve_window(self.desktop.as_ref(), Some(window_title))?;

        let original = self
            .state
            .lock()
            .ok()
            .and_then(|mut s| s.moved_windows.remove(&window.title));

        let target = match original {
            Some(original) => original,
            None => Bounds {
                x: primary.left + primary.width() / 4,
                y: primary.top + primary.height() / 4,
                width: window.bounds.width,
                height: window.bounds.height,
            },
        };
        self.desktop.move_window(window.id, target)?;

        Ok(json!({
            "success": true,
            "window": window.title,
            "moved_to": "primary_monitor",
            "new_position": {"x": target.x, "y": target.y},
            "restored_original": original.is_some(),
        }))
    }

    pub fn agent_screen_state(&self) -> Result<JsonValue> {
        let agent = self.agent_area().ok_or_else(|| {
            ToolError::invalid("Background mode not set up. Call setup_background_mode first.")
        })?;
        let mode = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.mode)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let windows: Vec<JsonValue> = self
            .desktop
            .list_windows()?
            .into_iter()
            .filter(|w| !w.is_minimized)
            .filter(|w| {
                let x = w.bounds.x;
                let y = w.bounds.y;
                x >= agent.left && x < agent.right && y >= agent.top && y < agent.bottom
            })
            .map(|w| {
                json!({
                    "title": w.title,
                    "position": {"x": w.bounds.x, "y": w.bounds.y},
                    "size": {"width": w.bounds.width, "height": w.bounds.height},
                })
            })
            .collect();

        let tracked: Vec<String> = self
            .state
            .lock()
            .map(|s| s.moved_windows.keys().cloned().collect())
            .unwrap_or_default();

        Ok(json!({
            "mode": mode,
            "agent_area": {
                "left": agent.left,
                "top": agent.top,
                "width": agent.width(),
                "height": agent.height(),
            },
            "windows": windows,
            "window_count": windows.len(),
            "tracked_windows": tracked,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn dual_monitor_sim() -> Arc<SimDesktop> {
        let sim = Arc::new(SimDesktop::new());
        sim.set_monitors(vec![
            MonitorInfo {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
                is_primary: true,
            },
            MonitorInfo {
                left: 1920,
                top: 0,
                right: 3840,
                bottom: 1080,
                is_primary: false,
            },
        ]);
        sim
    }

    #[test]
    fn two_monitors_choose_dual_mode() {
        let sim = dual_monitor_sim();
        let manager = BackgroundManager::new(sim);
        let result = manager.setup(None).unwrap();
        assert_eq!(result["mode"], json!("dual_monitor"));
        assert_eq!(result["agent_area"]["left"], json!(1920));
    }

    #[test]
    fn single_monitor_falls_back_to_offscreen() {
        let sim = Arc::new(SimDesktop::new());
        let manager = BackgroundManager::new(sim);
        let result = manager.setup(None).unwrap();
        assert_eq!(result["mode"], json!("offscreen"));
        // Synthetic rectangle sits past the right edge with a gap.
        assert_eq!(result["agent_area"]["left"], json!(1920 + OFFSCREEN_GAP));
    }

    #[test]
    fn move_and_restore_round_trip() {
        let sim = dual_monitor_sim();
        let win = sim.add_window(
            "Report - Editor",
            Bounds {
                x: 100,
                y: 100,
                width: 800,
                height: 600,
            },
            1,
        );
        let manager = BackgroundManager::new(sim.clone());
        manager.setup(None).unwrap();

        let moved = manager.move_to_agent_screen("Report").unwrap();
        assert_eq!(moved["new_position"]["x"], json!(1920 + PLACEMENT_MARGIN));
        let info = sim.window_info(win).unwrap();
        assert!(info.bounds.x >= 1920);

        let state = manager.agent_screen_state().unwrap();
        assert_eq!(state["window_count"], json!(1));
        assert_eq!(state["tracked_windows"][0], json!("Report - Editor"));

        let restored = manager.move_to_user_screen("Report").unwrap();
        assert_eq!(restored["restored_original"], json!(true));
        let info = sim.window_info(win).unwrap();
        assert_eq!((info.bounds.x, info.bounds.y), (100, 100));
    }

    #[test]
    fn user_screen_test_backs_redirection() {
        let sim = dual_monitor_sim();
        let manager = BackgroundManager::new(sim);
        manager.setup(None).unwrap();
        assert!(manager.is_on_user_screen(500, 500));
        assert!(!manager.is_on_user_screen(2500, 500));
        assert_eq!(
            manager.agent_placement(),
            Some((1920 + PLACEMENT_MARGIN, PLACEMENT_MARGIN))
        );
    }

    #[test]
    fn tools_require_setup_first() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window(
            "W",
            Bounds {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
            1,
        );
        let manager = BackgroundManager::new(sim);
        assert!(manager.move_to_agent_screen("W").is_err());
        assert!(manager.agent_screen_state().is_err());
    }
}
