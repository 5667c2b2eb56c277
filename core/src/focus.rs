//! Focus guard: remembers the user's foreground window before a gated
//! action and puts it back afterwards, so automation never strands the
//! user in the wrong window. Restoration is best-effort by design.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::platform::Desktop;
use crate::platform::WindowId;

/// Delay between a focus-stealing operation and the restore attempt, so
/// the operation's own window activation settles first.
const RESTORE_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct SavedFocus {
    window: WindowId,
    title: String,
}

pub struct FocusGuard {
    desktop: Arc<dyn Desktop>,
    saved: Mutex<Option<SavedFocus>>,
}

impl FocusGuard {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            saved: Mutex::new(None),
        }
    }

    /// Record the current foreground window. Called by the dispatcher
    /// before the safety gate runs.
    pub fn save(&self) {
        let current = self.desktop.foreground_window();
        if let Ok(mut saved) = self.saved.lock() {
            *saved = current.map(|info| {
                debug!("saved user focus: '{}'", info.title);
                SavedFocus {
                    window: info.id,
                    title: info.title,
                }
            });
        }
    }

    /// Restore the saved foreground window. Failure is logged, never
    /// fatal: the window may be gone, or the OS may refuse the change.
    pub fn restore(&self) -> JsonValue {
        let saved = match self.saved.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(saved) = saved else {
            return json!({"restored": false, "reason": "No saved user focus"});
        };

        if !self.desktop.window_exists(saved.window) {
            return json!({"restored": false, "reason": "Saved window no longer exists"});
        }

        if let Some(current) = self.desktop.foreground_window() {
            if current.id == saved.window {
                return json!({
                    "restored": true,
                    "window": saved.title,
                    "already_focused": true,
                });
            }
        }

        std::thread::sleep(RESTORE_SETTLE);

        if self.desktop.force_set_foreground(saved.window) {
            debug!("restored user focus: '{}'", saved.title);
            json!({"restored": true, "window": saved.title})
        } else {
            warn!("could not restore focus to '{}'", saved.title);
            json!({
                "restored": false,
                "window": saved.title,
                "reason": "SetForegroundWindow failed",
            })
        }
    }

    /// The `restore_user_focus` tool: restore and report what ended up
    /// in the foreground.
    pub fn restore_tool(&self) -> JsonValue {
        let mut result = self.restore();
        let current = self
            .desktop
            .foreground_window()
            .map(|w| w.title)
            .unwrap_or_default();
        result["current_foreground"] = json!(current);
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::Bounds;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn bounds() -> Bounds {
        Bounds {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        }
    }

    #[test]
    fn save_and_restore_round_trip() {
        let sim = Arc::new(SimDesktop::new());
        let user_win = sim.add_window("User Doc - Editor", bounds(), 100);
        let agent_win = sim.add_window("Agent Target", bounds(), 200);

        let guard = FocusGuard::new(sim.clone());
        guard.save();

        // Automation steals focus.
        sim.set_foreground_window(agent_win);

        let result = guard.restore();
        assert_eq!(result["restored"], serde_json::json!(true));
        assert_eq!(sim.foreground_window().unwrap().id, user_win);
    }

    #[test]
    fn restore_without_save_is_harmless() {
        let sim = Arc::new(SimDesktop::new());
        let guard = FocusGuard::new(sim);
        let result = guard.restore();
        assert_eq!(result["restored"], serde_json::json!(false));
    }

    #[test]
    fn vanished_window_is_reported_not_fatal() {
        let sim = Arc::new(SimDesktop::new());
        let user_win = sim.add_window("Ephemeral", bounds(), 100);
        sim.add_window("Other", bounds(), 200);

        let guard = FocusGuard::new(sim.clone());
        guard.save();
        sim.remove_window(user_win);

        let result = guard.restore();
        assert_eq!(result["restored"], serde_json::json!(false));
        assert_eq!(
            result["reason"],
            serde_json::json!("Saved window no longer exists")
        );
    }

    #[test]
    fn already_focused_skips_the_forced_path() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window("Stable", bounds(), 100);
        let guard = FocusGuard::new(sim);
        guard.save();
        let result = guard.restore();
        assert_eq!(result["already_focused"], serde_json::json!(true));
    }
}
