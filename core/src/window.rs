//! Window management: enumerate, focus, and manipulate top-level
//! windows. Minimize/maximize/restore/close go through the window's own
//! affordances; move/resize use the direct OS call so unchanged
//! dimensions are preserved.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use serde_json::json;

use deskpilot_protocol::ManageWindowParams;

use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Bounds;
use crate::platform::Desktop;
use crate::uia::resolve_window;

pub struct WindowManager {
    desktop: Arc<dyn Desktop>,
}

impl WindowManager {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self { desktop }
    }

    pub fn list_windows(&self, include_minimized: bool) -> Result<JsonValue> {
        let windows: Vec<JsonValue> = self
            .desktop
            .list_windows()?
            .into_iter()
            .filter(|w| include_minimized || !w.is_minimized)
            .map(|w| {
                json!({
                    "title": w.title,
                    "position": {"x": w.bounds.x, "y": w.bounds.y},
                    "size": {
                        "width": if w.is_minimized { 0 } else { w.bounds.width },
                        "height": if w.is_minimized { 0 } else { w.bounds.height },
                    },
                    "is_minimized": w.is_minimized,
                    "is_active": w.is_active,
                    "process_id": w.pid,
                })
            })
            .collect();
        Ok(json!({
            "windows": windows,
            "count": windows.len(),
        }))
    }

    pub fn focus_window(&self, window_title: &str) -> Result<JsonValue> {
        let window = resolve_window(self.desktop.as_ref(), Some(window_title))?;
        if !self.desktop.set_foreground(window.id) && !self.desktop.force_set_foreground(window.id)
        {
            return Err(ToolError::external(format!(
                "could not focus window '{}'",
                window.title
            )));
        }
        Ok(json!({
            "success": true,
            "window": window.title,
            "action": "focused",
        }))
    }

    pub fn manage_window(&self, params: &ManageWindowParams) -> Result<JsonValue> {
        const VALID: [&str; 6] = ["minimize", "maximize", "restore", "close", "move", "resize"];
        if !VALID.contains(&params.action.as_str()) {
            return Err(
                ToolError::invalid(format!("Invalid action '{}'", params.action))
                    .with_hint(format!("Valid actions: {}", VALID.join(", "))),
            );
        }

        let window = resolve_window(self.desktop.as_ref(), Some(&params.window_title))?;
        match params.action.as_str() {
            "minimize" => self.desktop.minimize(window.id)?,
            "maximize" => self.desktop.maximize(window.id)?,
            "restore" => self.desktop.restore(window.id)?,
            "close" => self.desktop.close(window.id)?,
            "move" => {
                let (Some(x), Some(y)) = (params.x, params.y) else {
                    return Err(ToolError::invalid("move requires x and y parameters"));
                };
                self.desktop.move_window(
                    window.id,
                    Bounds {
                        x,
                        y,
                        width: window.bounds.width,
                        height: window.bounds.height,
                    },
                )?;
            }
            "resize" => {
                let (Some(width), Some(height)) = (params.width, params.height) else {
                    return Err(ToolError::invalid(
                        "resize requires width and height parameters",
                    ));
                };
                self.desktop.move_window(
                    window.id,
                    Bounds {
                        x: window.bounds.x,
                        y: window.bounds.y,
                        width,
                        height,
                    },
                )?;
            }
            _ => unreachable!("validated above"),
        }

        Ok(json!({
            "success": true,
            "window": window.title,
            "action": params.action,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn bounds() -> Bounds {
        Bounds {
            x: 50,
            y: 60,
            width: 400,
            height: 300,
        }
    }

    #[test]
    fn minimized_windows_report_zero_size() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Mail", bounds(), 1);
        sim.minimize(win).unwrap();
        let manager = WindowManager::new(sim);

        let listing = manager.list_windows(true).unwrap();
        assert_eq!(listing["count"], json!(1));
        assert_eq!(listing["windows"][0]["size"]["width"], json!(0));
        assert_eq!(listing["windows"][0]["is_minimized"], json!(true));

        let listing = manager.list_windows(false).unwrap();
        assert_eq!(listing["count"], json!(0));
    }

    #[test]
    fn move_preserves_size_and_resize_preserves_position() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Editor", bounds(), 1);
        let manager = WindowManager::new(sim.clone());

        manager
            .manage_window(&ManageWindowParams {
                window_title: "Editor".to_string(),
                action: "move".to_string(),
                x: Some(10),
                y: Some(20),
                ..Default::default()
            })
            .unwrap();
        let info = sim.window_info(win).unwrap();
        assert_eq!((info.bounds.x, info.bounds.y), (10, 20));
        assert_eq!((info.bounds.width, info.bounds.height), (400, 300));

        manager
            .manage_window(&ManageWindowParams {
                window_title: "Editor".to_string(),
                action: "resize".to_string(),
                width: Some(640),
                height: Some(480),
                ..Default::default()
            })
            .unwrap();
        let info = sim.window_info(win).unwrap();
        assert_eq!((info.bounds.x, info.bounds.y), (10, 20));
        assert_eq!((info.bounds.width, info.bounds.height), (640, 480));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window("Editor", bounds(), 1);
        let manager = WindowManager::new(sim);
        let err = manager
            .manage_window(&ManageWindowParams {
                window_title: "Editor".to_string(),
                action: "teleport".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }

    #[test]
    fn missing_window_lists_alternatives() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window("Only Window", bounds(), 1);
        let manager = WindowManager::new(sim);
        let err = manager.focus_window("Ghost").unwrap_err();
        assert!(err.hint.unwrap().contains("Only Window"));
    }
}
