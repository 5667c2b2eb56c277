//! Click, type, and key input with silent-first escalation.
//!
//! Accessibility-pattern methods are tried before any input synthesis,
//! and the outcome of every attempt feeds the error journal so future
//! calls on the same application can skip a path that is known to fail.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use deskpilot_protocol::ClickParams;
use deskpilot_protocol::HotkeyParams;
use deskpilot_protocol::PressKeyParams;
use deskpilot_protocol::TypeTextParams;

use crate::error::Result;
use crate::error::ToolError;
use crate::journal::ErrorJournal;
use crate::platform::Desktop;
use crate::platform::ElementId;
use crate::platform::MouseButton;
use crate::platform::WindowId;
use crate::uia;
use crate::uia::resolve_window;

/// Wait for a freshly created editor tab to initialize.
const NEW_TAB_SETTLE: Duration = Duration::from_millis(500);

const ELEMENT_SEARCH_DEPTH: u32 = 5;
const EDITOR_SEARCH_DEPTH: u32 = 6;

pub struct InputDispatcher {
    desktop: Arc<dyn Desktop>,
    journal: Arc<ErrorJournal>,
}

impl InputDispatcher {
    pub fn new(desktop: Arc<dyn Desktop>, journal: Arc<ErrorJournal>) -> Self {
        Self { desktop, journal }
    }

    // ── Click ───────────────────────────────────────────────────

    pub fn click(&self, params: &ClickParams) -> Result<JsonValue> {
        if let (Some(x), Some(y)) = (params.x, params.y) {
            let button = MouseButton::parse(params.button.as_deref());
            self.desktop.click_at(x, y, button, params.double_click)?;
            return Ok(json!({
                "success": true,
                "method": "coordinate_input",
                "x": x,
                "y": y,
            }));
        }

        let Some(element_name) = params.element_name.as_deref() else {
            return Err(ToolError::invalid(
                "click needs either element_name or x/y coordinates",
            ));
        };

        let window = resolve_window(self.desktop.as_ref(), params.window_title.as_deref())?;
        let root = self.desktop.root_element(window.id)?;
        let matches = uia::find_elements(
            self.desktop.as_ref(),
            root,
            element_name,
            None,
            ELEMENT_SEARCH_DEPTH,
            1,
        );
        let Some(best) = matches.first() else {
            return Err(
                ToolError::invalid(format!("Element '{element_name}' not found"))
                    .with_hint("Use get_ui_tree or find_elements to inspect the window."),
            );
        };

        let button = MouseButton::parse(params.button.as_deref());
        let plain_left = button == MouseButton::Left && !params.double_click;

        // Journal: if the silent invoke is known to fail here, go
        // straight to input synthesis.
        let skip_silent = !plain_left
            || self.journal.best_method("click", Some(&window.title)).as_deref()
                == Some("click_input");

        if !skip_silent {
            match self.desktop.invoke(best.element) {
                Ok(()) => {
                    self.journal.record_success("click", Some(&window.title), "invoke");
                    return Ok(json!({
                        "success": true,
                        "method": "invoke (silent)",
                        "element": best.name,
                        "window": window.title,
                    }));
                }
                Err(e) => {
                    self.journal.record_failure(
                        "click",
                        Some(&window.title),
                        "invoke",
                        &e.to_string(),
                        None,
                    );
                    debug!("silent invoke failed for '{element_name}': {e}");
                }
            }
        }

        self.desktop
            .click_element(best.element, button, params.double_click)?;
        if plain_left {
            self.journal
                .record_success("click", Some(&window.title), "click_input");
        }
        Ok(json!({
            "success": true,
            "method": "click_input",
            "element": best.name,
            "window": window.title,
            "journal_skipped_silent": skip_silent && plain_left,
        }))
    }

    // ── Type ────────────────────────────────────────────────────

    pub fn type_text(&self, params: &TypeTextParams) -> Result<JsonValue> {
        if params.element_name.is_some() {
            self.type_by_name(params)
        } else if params.window_title.is_some() {
            self.type_into_window(params)
        } else {
            self.desktop.send_text(&params.text)?;
            Ok(json!({
                "success": true,
                "method": "send_text (direct keyboard)",
                "text_length": params.text.chars().count(),
            }))
        }
    }

    fn type_by_name(&self, params: &TypeTextParams) -> Result<JsonValue> {
        let element_name = params.element_name.as_deref().unwrap_or_default();
        let window = resolve_window(self.desktop.as_ref(), params.window_title.as_deref())?;
        let root = self.desktop.root_element(window.id)?;

        let named = uia::find_elements(
            self.desktop.as_ref(),
            root,
            element_name,
            None,
            ELEMENT_SEARCH_DEPTH,
            1,
        )
        .first()
        .map(|m| m.element);

        // Fall back to the main editable area when the name misses.
        let (element, auto_detected) = match named {
            Some(element) => (element, false),
            None => {
                let editor =
                    uia::find_editable_element(self.desktop.as_ref(), root, EDITOR_SEARCH_DEPTH)
                        .ok_or_else(|| {
                            ToolError::invalid(format!("Element '{element_name}' not found"))
                                .with_hint("Use get_ui_tree to see available elements.")
                        })?;
                (editor, true)
            }
        };

        // Only protect the editor when we auto-detected it; a named
        // field is exactly where the caller asked to write.
        let tab_info = if auto_detected {
            self.ensure_safe_editor_tab(window.id)?
        } else {
            None
        };
        let element = if tab_info.is_some() {
            uia::find_editable_element(self.desktop.as_ref(), root, EDITOR_SEARCH_DEPTH)
                .ok_or_else(|| ToolError::external("editor not found after creating new tab"))?
        } else {
            element
        };

        let mut result =
            self.write_with_escalation(&window.title, element, &params.text, params)?;
        result["element"] = json!(element_name);
        if let Some(tab_info) = tab_info {
            result["notepad_protection"] = tab_info;
        }
        Ok(result)
    }

    fn type_into_window(&self, params: &TypeTextParams) -> Result<JsonValue> {
        let window = resolve_window(self.desktop.as_ref(), params.window_title.as_deref())?;
        let root = self.desktop.root_element(window.id)?;

        let tab_info = self.ensure_safe_editor_tab(window.id)?;

        let element = uia::find_editable_element(self.desktop.as_ref(), root, EDITOR_SEARCH_DEPTH)
            .ok_or_else(|| {
                ToolError::invalid(format!(
                    "No editable element found in '{}'",
                    window.title
                ))
                .with_hint("Use get_ui_tree to inspect the window structure.")
            })?;

        let props = self.desktop.element_props(element)?;
        let mut result =
            self.write_with_escalation(&window.title, element, &params.text, params)?;
        result["window"] = json!(window.title);
        result["control"] = json!(format!("{} ({})", props.control_type, props.class_name));
        if let Some(tab_info) = tab_info {
            result["notepad_protection"] = tab_info;
        }
        Ok(result)
    }

    /// Silent ladder (`set_edit_text`, then the Value pattern), then the
    /// focus-stealing keyboard path. The journal can veto the silent
    /// ladder outright.
    fn write_with_escalation(
        &self,
        window_title: &str,
        element: ElementId,
        text: &str,
        params: &TypeTextParams,
    ) -> Result<JsonValue> {
        let skip_silent = self
            .journal
            .best_method("type_text", Some(window_title))
            .as_deref()
            == Some("type_keys");

        if params.use_silent && !skip_silent {
            if let Some(method) = self.try_silent_write(element, text, params.clear_first) {
                self.journal
                    .record_success("type_text", Some(window_title), "set_text_silent");
                return Ok(json!({
                    "success": true,
                    "method": method,
                    "text_length": text.chars().count(),
                }));
            }
            self.journal.record_failure(
                "type_text",
                Some(window_title),
                "set_text_silent",
                "silent text methods failed",
                None,
            );
            debug!("silent text methods failed in '{window_title}', falling back");
        } else if skip_silent {
            debug!("journal says silent typing fails in '{window_title}', using type_keys");
        }

        // Focus the element, optionally clear it, then synthesize keys.
        // The dispatcher's focus guard restores the user afterwards.
        self.desktop
            .click_element(element, MouseButton::Left, false)?;
        if params.clear_first {
            self.desktop
                .hotkey(&["ctrl".to_string(), "a".to_string()])?;
            self.desktop.press_key("delete")?;
        }
        self.desktop.type_keys(element, text)?;

        self.journal
            .record_success("type_text", Some(window_title), "type_keys");
        let mut result = json!({
            "success": true,
            "method": "type_keys (keyboard simulation)",
            "text_length": text.chars().count(),
        });
        if skip_silent {
            result["journal_hint"] =
                json!("Skipped silent methods - journal knows they fail on this app");
        }
        Ok(result)
    }

    fn try_silent_write(
        &self,
        element: ElementId,
        text: &str,
        clear_first: bool,
    ) -> Option<&'static str> {
        if self.silent_attempt(element, text, clear_first, true).is_ok() {
            return Some("set_edit_text (silent)");
        }
        if self.silent_attempt(element, text, clear_first, false).is_ok() {
            return Some("value_pattern (silent)");
        }
        None
    }

    fn silent_attempt(
        &self,
        element: ElementId,
        text: &str,
        clear_first: bool,
        edit_text: bool,
    ) -> std::result::Result<(), crate::error::PlatformError> {
        let write = |t: &str| {
            if edit_text {
                self.desktop.set_edit_text(element, t)
            } else {
                self.desktop.set_value(element, t)
            }
        };
        if clear_first {
            write("")?;
        }
        write(text)
    }

    // ── Tabbed-editor data protection ───────────────────────────

    /// If the window is the tabbed plain-text editor and the current tab
    /// holds content, open a new tab before writing so user data is
    /// never overwritten. Returns the protection report when a tab was
    /// created.
    fn ensure_safe_editor_tab(&self, window: WindowId) -> Result<Option<JsonValue>> {
        let root = self.desktop.root_element(window)?;
        let root_props = self.desktop.element_props(root)?;
        if root_props.class_name != "Notepad" {
            return Ok(None);
        }
        let Some(editor) =
            uia::find_editable_element(self.desktop.as_ref(), root, EDITOR_SEARCH_DEPTH)
        else {
            return Ok(None);
        };
        let editor_props = self.desktop.element_props(editor)?;
        if editor_props.class_name != "RichEditD2DPT" {
            return Ok(None);
        }
        let content = editor_props.value.unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(None);
        }

        debug!("editor tab has existing content, opening a new tab to protect user data");
        let add_button = uia::find_elements(
            self.desktop.as_ref(),
            root,
            "Add New Tab",
            None,
            EDITOR_SEARCH_DEPTH,
            1,
        )
        .first()
        .map(|m| m.element)
        .or_else(|| {
            uia::find_by_automation_id(
                self.desktop.as_ref(),
                root,
                "AddButton",
                EDITOR_SEARCH_DEPTH,
            )
        });

        let Some(add_button) = add_button else {
            warn!("could not find the editor's add-tab control; writing is unsafe");
            return Ok(None);
        };

        if let Err(e) = self.desktop.invoke(add_button) {
            warn!("failed to open a new editor tab: {e}");
            return Ok(None);
        }
        std::thread::sleep(NEW_TAB_SETTLE);

        Ok(Some(json!({
            "new_tab_created": true,
            "reason": "Existing tab had content - opened new tab to protect user data",
            "preserved_content_length": content.chars().count(),
        })))
    }

    // ── Keys ────────────────────────────────────────────────────

    pub fn press_key(&self, params: &PressKeyParams) -> Result<JsonValue> {
        for _ in 0..params.times.max(1) {
            self.desktop.press_key(&params.key)?;
        }
        Ok(json!({
            "success": true,
            "key": params.key,
            "times": params.times.max(1),
        }))
    }

    pub fn hotkey(&self, params: &HotkeyParams) -> Result<JsonValue> {
        if params.keys.is_empty() {
            return Err(ToolError::invalid("hotkey needs at least one key"));
        }
        self.desktop.hotkey(&params.keys)?;
        Ok(json!({
            "success": true,
            "keys": params.keys,
            "combination": params.keys.join("+"),
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::Bounds;
    use crate::platform::ElementProps;
    use crate::platform::sim::SimDesktop;
    use crate::platform::sim::SimEvent;
    use pretty_assertions::assert_eq;

    fn bounds() -> Bounds {
        Bounds {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        }
    }

    fn button_props(name: &str) -> ElementProps {
        ElementProps {
            name: name.to_string(),
            control_type: "Button".to_string(),
            is_enabled: true,
            is_visible: true,
            bounds: Some(Bounds {
                x: 10,
                y: 10,
                width: 60,
                height: 20,
            }),
            ..Default::default()
        }
    }

    fn editor_props(class: &str, value: &str) -> ElementProps {
        ElementProps {
            name: "Text editor".to_string(),
            control_type: "Document".to_string(),
            class_name: class.to_string(),
            is_enabled: true,
            is_visible: true,
            value: Some(value.to_string()),
            patterns: vec!["Value".to_string()],
            ..Default::default()
        }
    }

    fn dispatcher(sim: &Arc<SimDesktop>) -> (InputDispatcher, Arc<ErrorJournal>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(ErrorJournal::new(dir.path().to_path_buf()));
        (
            InputDispatcher::new(sim.clone(), journal.clone()),
            journal,
            dir,
        )
    }

    #[test]
    fn coordinate_click_bypasses_element_search() {
        let sim = Arc::new(SimDesktop::new());
        let (input, _journal, _dir) = dispatcher(&sim);
        let result = input
            .click(&ClickParams {
                x: Some(100),
                y: Some(150),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result["method"], json!("coordinate_input"));
        assert_eq!(sim.events(), vec![SimEvent::ClickAt(100, 150)]);
    }

    #[test]
    fn click_prefers_silent_invoke() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("App", bounds(), 1);
        sim.add_element(win, None, button_props("Submit"));
        let (input, _journal, _dir) = dispatcher(&sim);

        let result = input
            .click(&ClickParams {
                element_name: Some("Submit".to_string()),
                window_title: Some("App".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result["method"], json!("invoke (silent)"));
        assert!(sim.events().iter().any(|e| matches!(e, SimEvent::Invoke(_))));
    }

    #[test]
    fn failed_invoke_escalates_and_journal_learns() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Sketch - Editor", bounds(), 1);
        let button = sim.add_element(win, None, button_props("Draw"));
        sim.set_invoke_fails(button, "no invoke pattern");
        let (input, journal, _dir) = dispatcher(&sim);

        let params = ClickParams {
            element_name: Some("Draw".to_string()),
            window_title: Some("Editor".to_string()),
            ..Default::default()
        };
        let result = input.click(&params).unwrap();
        assert_eq!(result["method"], json!("click_input"));
        assert_eq!(
            journal.best_method("click", Some("Sketch - Editor")),
            Some("click_input".to_string())
        );

        // Second call: the journal skips the silent path outright.
        let before = sim.events().len();
        let result = input.click(&params).unwrap();
        assert_eq!(result["journal_skipped_silent"], json!(true));
        let new_events = &sim.events()[before..];
        assert!(!new_events.iter().any(|e| matches!(e, SimEvent::Invoke(_))));
    }

    #[test]
    fn silent_typing_wins_when_it_works() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Form", bounds(), 1);
        let field = sim.add_element(win, None, editor_props("Edit", ""));
        let (input, _journal, _dir) = dispatcher(&sim);

        let result = input
            .type_text(&TypeTextParams {
                text: "hello".to_string(),
                window_title: Some("Form".to_string()),
                use_silent: true,
                ..Default::default()
            })
            .unwrap();
        assert!(result["method"].as_str().unwrap().contains("silent"));
        assert_eq!(sim.element_value(field).as_deref(), Some("hello"));
    }

    #[test]
    fn silent_failure_falls_back_to_type_keys() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Legacy - App", bounds(), 1);
        let field = sim.add_element(win, None, editor_props("CustomEdit", ""));
        sim.set_silent_text_fails(field);
        let (input, journal, _dir) = dispatcher(&sim);

        let params = TypeTextParams {
            text: "abc".to_string(),
            window_title: Some("App".to_string()),
            use_silent: true,
            ..Default::default()
        };
        let result = input.type_text(&params).unwrap();
        assert!(result["method"].as_str().unwrap().contains("type_keys"));
        assert_eq!(
            journal.best_method("type_text", Some("Legacy - App")),
            Some("type_keys".to_string())
        );

        // Journal-informed second call reports the skip.
        let result = input.type_text(&params).unwrap();
        assert!(result["journal_hint"].is_string());
    }

    #[test]
    fn tabbed_editor_with_content_gets_a_new_tab() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("user data - Notepad", bounds(), 1);
        sim.set_window_class(win, "Notepad");
        let editor = sim.add_element(win, None, editor_props("RichEditD2DPT", ""));
        let add_button = sim.add_element(
            win,
            None,
            ElementProps {
                name: "Add New Tab".to_string(),
                control_type: "Button".to_string(),
                is_enabled: true,
                is_visible: true,
                ..Default::default()
            },
        );
        sim.enable_tabs(win, editor, add_button, "user data");
        let (input, _journal, _dir) = dispatcher(&sim);

        let result = input
            .type_text(&TypeTextParams {
                text: "integration".to_string(),
                window_title: Some("Notepad".to_string()),
                use_silent: true,
                ..Default::default()
            })
            .unwrap();

        let protection = &result["notepad_protection"];
        assert_eq!(protection["new_tab_created"], json!(true));
        assert_eq!(protection["preserved_content_length"], json!(9));
        assert_eq!(
            sim.tab_contents(win),
            vec!["user data".to_string(), "integration".to_string()]
        );
    }

    #[test]
    fn empty_editor_tab_needs_no_protection() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Untitled - Notepad", bounds(), 1);
        sim.set_window_class(win, "Notepad");
        let editor = sim.add_element(win, None, editor_props("RichEditD2DPT", ""));
        let add_button = sim.add_element(win, None, button_props("Add New Tab"));
        sim.enable_tabs(win, editor, add_button, "");
        let (input, _journal, _dir) = dispatcher(&sim);

        let result = input
            .type_text(&TypeTextParams {
                text: "fresh".to_string(),
                window_title: Some("Notepad".to_string()),
                use_silent: true,
                ..Default::default()
            })
            .unwrap();
        assert!(result.get("notepad_protection").is_none());
        assert_eq!(sim.tab_contents(win), vec!["fresh".to_string()]);
    }

    #[test]
    fn hotkey_presses_all_keys() {
        let sim = Arc::new(SimDesktop::new());
        let (input, _journal, _dir) = dispatcher(&sim);
        input
            .hotkey(&HotkeyParams {
                keys: vec!["ctrl".to_string(), "s".to_string()],
            })
            .unwrap();
        assert_eq!(
            sim.events(),
            vec![SimEvent::Hotkey(vec!["ctrl".to_string(), "s".to_string()])]
        );
    }
}
