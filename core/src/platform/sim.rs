//! Scripted in-memory desktop backend.
//!
//! Drives the engine in tests (and dry runs) without a real Windows
//! session: windows, accessibility nodes, monitors, OCR words, and the
//! clipboard are all plain data, and every synthesized input is recorded
//! so assertions can check exactly what the engine did.

use std::collections::HashMap;
use std::sync::Mutex;

use super::*;

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Invoke(ElementId),
    SetValue(ElementId, String),
    SetEditText(ElementId, String),
    TypeKeys(ElementId, String),
    ClickElement(ElementId),
    ClickAt(i32, i32),
    SendText(String),
    PressKey(String),
    Hotkey(Vec<String>),
    Foreground(WindowId),
    Moved(WindowId, Bounds),
    ClipboardWrite(String),
}

#[derive(Debug, Clone)]
struct SimNode {
    id: ElementId,
    props: ElementProps,
    children: Vec<ElementId>,
    invoke_fails: Option<String>,
    silent_text_fails: bool,
}

#[derive(Debug, Clone)]
struct SimTabs {
    tabs: Vec<String>,
    active: usize,
    editor: ElementId,
    add_button: ElementId,
}

#[derive(Debug, Clone)]
struct SimWindow {
    info: WindowInfo,
    root: ElementId,
    modules: Vec<String>,
    exe: Option<String>,
    cmdline: Option<String>,
    tabs: Option<SimTabs>,
}

#[derive(Default)]
struct SimState {
    windows: Vec<SimWindow>,
    nodes: HashMap<ElementId, SimNode>,
    element_window: HashMap<ElementId, WindowId>,
    foreground: Option<WindowId>,
    monitors: Vec<MonitorInfo>,
    clipboard: String,
    ocr_words: Vec<OcrWord>,
    ocr_languages: Vec<String>,
    events: Vec<SimEvent>,
    next_id: u64,
}

#[derive(Default)]
pub struct SimDesktop {
    state: Mutex<SimState>,
}

impl SimDesktop {
    pub fn new() -> Self {
        let desktop = Self::default();
        if let Ok(mut state) = desktop.state.lock() {
            state.next_id = 1;
            state.monitors.push(MonitorInfo {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
                is_primary: true,
            });
            state.ocr_languages.push("en-US".to_string());
        }
        desktop
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── Scenario builders ───────────────────────────────────────

    pub fn add_window(&self, title: &str, bounds: Bounds, pid: u32) -> WindowId {
        let mut state = self.lock();
        let window_id = WindowId(state.next_id);
        let root_id = ElementId(state.next_id + 1);
        state.next_id += 2;
        state.nodes.insert(
            root_id,
            SimNode {
                id: root_id,
                props: ElementProps {
                    name: title.to_string(),
                    control_type: "Window".to_string(),
                    class_name: String::new(),
                    is_enabled: true,
                    is_visible: true,
                    bounds: Some(bounds),
                    ..Default::default()
                },
                children: Vec::new(),
                invoke_fails: None,
                silent_text_fails: false,
            },
        );
        state.element_window.insert(root_id, window_id);
        let is_active = state.foreground.is_none();
        state.windows.push(SimWindow {
            info: WindowInfo {
                id: window_id,
                title: title.to_string(),
                bounds,
                is_minimized: false,
                is_active,
                pid,
            },
            root: root_id,
            modules: Vec::new(),
            exe: None,
            cmdline: None,
            tabs: None,
        });
        if state.foreground.is_none() {
            state.foreground = Some(window_id);
        }
        window_id
    }

    pub fn set_window_class(&self, window: WindowId, class_name: &str) {
        let mut state = self.lock();
        if let Some(win) = state.windows.iter().find(|w| w.info.id == window) {
            let root = win.root;
            if let Some(node) = state.nodes.get_mut(&root) {
                node.props.class_name = class_name.to_string();
            }
        }
    }

    pub fn add_element(
        &self,
        window: WindowId,
        parent: Option<ElementId>,
        props: ElementProps,
    ) -> ElementId {
        let mut state = self.lock();
        let id = ElementId(state.next_id);
        state.next_id += 1;
        let parent = parent.or_else(|| {
            state
                .windows
                .iter()
                .find(|w| w.info.id == window)
                .map(|w| w.root)
        });
        state.nodes.insert(
            id,
            SimNode {
                id,
                props,
                children: Vec::new(),
                invoke_fails: None,
                silent_text_fails: false,
            },
        );
        state.element_window.insert(id, window);
        if let Some(parent) = parent {
            if let Some(node) = state.nodes.get_mut(&parent) {
                node.children.push(id);
            }
        }
        id
    }

    pub fn set_invoke_fails(&self, element: ElementId, error: &str) {
        if let Some(node) = self.lock().nodes.get_mut(&element) {
            node.invoke_fails = Some(error.to_string());
        }
    }

    pub fn set_silent_text_fails(&self, element: ElementId) {
        if let Some(node) = self.lock().nodes.get_mut(&element) {
            node.silent_text_fails = true;
        }
    }

    /// Model the tabbed-editor behavior: the editor element reads and
    /// writes the active tab, and invoking the add button opens a fresh
    /// empty tab.
    pub fn enable_tabs(
        &self,
        window: WindowId,
        editor: ElementId,
        add_button: ElementId,
        initial_content: &str,
    ) {
        let mut state = self.lock();
        if let Some(win) = state.windows.iter_mut().find(|w| w.info.id == window) {
            win.tabs = Some(SimTabs {
                tabs: vec![initial_content.to_string()],
                active: 0,
                editor,
                add_button,
            });
        }
    }

    pub fn tab_contents(&self, window: WindowId) -> Vec<String> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.id == window)
            .and_then(|w| w.tabs.as_ref())
            .map(|t| t.tabs.clone())
            .unwrap_or_default()
    }

    pub fn set_monitors(&self, monitors: Vec<MonitorInfo>) {
        self.lock().monitors = monitors;
    }

    pub fn set_ocr_words(&self, words: Vec<OcrWord>) {
        self.lock().ocr_words = words;
    }

    pub fn set_process_modules(&self, window: WindowId, modules: Vec<String>) {
        let mut state = self.lock();
        if let Some(win) = state.windows.iter_mut().find(|w| w.info.id == window) {
            win.modules = modules;
        }
    }

    pub fn set_process_identity(&self, window: WindowId, exe: &str, cmdline: &str) {
        let mut state = self.lock();
        if let Some(win) = state.windows.iter_mut().find(|w| w.info.id == window) {
            win.exe = Some(exe.to_string());
            win.cmdline = Some(cmdline.to_string());
        }
    }

    pub fn set_foreground_window(&self, window: WindowId) {
        let mut state = self.lock();
        state.foreground = Some(window);
        for win in &mut state.windows {
            win.info.is_active = win.info.id == window;
        }
    }

    pub fn remove_window(&self, window: WindowId) {
        let mut state = self.lock();
        state.windows.retain(|w| w.info.id != window);
        if state.foreground == Some(window) {
            state.foreground = state.windows.first().map(|w| w.info.id);
        }
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn element_value(&self, element: ElementId) -> Option<String> {
        let state = self.lock();
        // Tabbed editors answer from the active tab.
        for win in &state.windows {
            if let Some(tabs) = &win.tabs {
                if tabs.editor == element {
                    return tabs.tabs.get(tabs.active).cloned();
                }
            }
        }
        state.nodes.get(&element).and_then(|n| n.props.value.clone())
    }

    fn record(&self, event: SimEvent) {
        self.lock().events.push(event);
    }

    fn write_editor(&self, element: ElementId, text: &str, append: bool) -> PlatformResult<()> {
        let mut state = self.lock();
        for win in &mut state.windows {
            if let Some(tabs) = &mut win.tabs {
                if tabs.editor == element {
                    let active = tabs.active;
                    if let Some(slot) = tabs.tabs.get_mut(active) {
                        if append {
                            slot.push_str(text);
                        } else {
                            *slot = text.to_string();
                        }
                    }
                    return Ok(());
                }
            }
        }
        match state.nodes.get_mut(&element) {
            Some(node) => {
                let current = node.props.value.take().unwrap_or_default();
                node.props.value = Some(if append {
                    format!("{current}{text}")
                } else {
                    text.to_string()
                });
                Ok(())
            }
            None => Err(PlatformError::StaleElement),
        }
    }
}

impl Desktop for SimDesktop {
    fn list_windows(&self) -> PlatformResult<Vec<WindowInfo>> {
        Ok(self.lock().windows.iter().map(|w| w.info.clone()).collect())
    }

    fn find_window(&self, fragment: &str) -> PlatformResult<Option<WindowInfo>> {
        let fragment = fragment.to_lowercase();
        Ok(self
            .lock()
            .windows
            .iter()
            .find(|w| w.info.title.to_lowercase().contains(&fragment))
            .map(|w| w.info.clone()))
    }

    fn window_info(&self, window: WindowId) -> PlatformResult<WindowInfo> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.id == window)
            .map(|w| w.info.clone())
            .ok_or(PlatformError::WindowNotFound)
    }

    fn window_exists(&self, window: WindowId) -> bool {
        self.lock().windows.iter().any(|w| w.info.id == window)
    }

    fn foreground_window(&self) -> Option<WindowInfo> {
        let state = self.lock();
        let id = state.foreground?;
        state
            .windows
            .iter()
            .find(|w| w.info.id == id)
            .map(|w| w.info.clone())
    }

    fn set_foreground(&self, window: WindowId) -> bool {
        if !self.window_exists(window) {
            return false;
        }
        self.record(SimEvent::Foreground(window));
        self.set_foreground_window(window);
        true
    }

    fn force_set_foreground(&self, window: WindowId) -> bool {
        self.set_foreground(window)
    }

    fn move_window(&self, window: WindowId, bounds: Bounds) -> PlatformResult<()> {
        let mut state = self.lock();
        let win = state
            .windows
            .iter_mut()
            .find(|w| w.info.id == window)
            .ok_or(PlatformError::WindowNotFound)?;
        win.info.bounds = bounds;
        state.events.push(SimEvent::Moved(window, bounds));
        Ok(())
    }

    fn minimize(&self, window: WindowId) -> PlatformResult<()> {
        let mut state = self.lock();
        let win = state
            .windows
            .iter_mut()
            .find(|w| w.info.id == window)
            .ok_or(PlatformError::WindowNotFound)?;
        win.info.is_minimized = true;
        Ok(())
    }

    fn maximize(&self, window: WindowId) -> PlatformResult<()> {
        self.restore(window)
    }

    fn restore(&self, window: WindowId) -> PlatformResult<()> {
        let mut state = self.lock();
        let win = state
            .windows
            .iter_mut()
            .find(|w| w.info.id == window)
            .ok_or(PlatformError::WindowNotFound)?;
        win.info.is_minimized = false;
        Ok(())
    }

    fn close(&self, window: WindowId) -> PlatformResult<()> {
        if !self.window_exists(window) {
            return Err(PlatformError::WindowNotFound);
        }
        self.remove_window(window);
        Ok(())
    }

    fn monitors(&self) -> PlatformResult<Vec<MonitorInfo>> {
        Ok(self.lock().monitors.clone())
    }

    fn root_element(&self, window: WindowId) -> PlatformResult<ElementId> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.id == window)
            .map(|w| w.root)
            .ok_or(PlatformError::WindowNotFound)
    }

    fn element_props(&self, element: ElementId) -> PlatformResult<ElementProps> {
        let mut props = self
            .lock()
            .nodes
            .get(&element)
            .map(|n| n.props.clone())
            .ok_or(PlatformError::StaleElement)?;
        // Tabbed editors read the active tab as their value.
        if let Some(value) = self.element_value(element) {
            props.value = Some(value);
        }
        Ok(props)
    }

    fn children(&self, element: ElementId) -> PlatformResult<Vec<ElementId>> {
        self.lock()
            .nodes
            .get(&element)
            .map(|n| n.children.clone())
            .ok_or(PlatformError::StaleElement)
    }

    fn invoke(&self, element: ElementId) -> PlatformResult<()> {
        self.record(SimEvent::Invoke(element));
        let failure = self
            .lock()
            .nodes
            .get(&element)
            .ok_or(PlatformError::StaleElement)?
            .invoke_fails
            .clone();
        if let Some(message) = failure {
            return Err(PlatformError::PatternNotSupported(message));
        }
        // Add-tab buttons open a fresh empty tab.
        let mut state = self.lock();
        for win in &mut state.windows {
            if let Some(tabs) = &mut win.tabs {
                if tabs.add_button == element {
                    tabs.tabs.push(String::new());
                    tabs.active = tabs.tabs.len() - 1;
                }
            }
        }
        Ok(())
    }

    fn set_value(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        self.record(SimEvent::SetValue(element, text.to_string()));
        let fails = self
            .lock()
            .nodes
            .get(&element)
            .ok_or(PlatformError::StaleElement)?
            .silent_text_fails;
        if fails {
            return Err(PlatformError::PatternNotSupported("Value".to_string()));
        }
        self.write_editor(element, text, false)
    }

    fn set_edit_text(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        self.record(SimEvent::SetEditText(element, text.to_string()));
        let fails = self
            .lock()
            .nodes
            .get(&element)
            .ok_or(PlatformError::StaleElement)?
            .silent_text_fails;
        if fails {
            return Err(PlatformError::PatternNotSupported("EditText".to_string()));
        }
        self.write_editor(element, text, false)
    }

    fn click_element(
        &self,
        element: ElementId,
        _button: MouseButton,
        _double: bool,
    ) -> PlatformResult<()> {
        if !self.lock().nodes.contains_key(&element) {
            return Err(PlatformError::StaleElement);
        }
        self.record(SimEvent::ClickElement(element));
        Ok(())
    }

    fn type_keys(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        self.record(SimEvent::TypeKeys(element, text.to_string()));
        self.write_editor(element, text, true)
    }

    fn click_at(&self, x: i32, y: i32, _button: MouseButton, _double: bool) -> PlatformResult<()> {
        self.record(SimEvent::ClickAt(x, y));
        Ok(())
    }

    fn send_text(&self, text: &str) -> PlatformResult<()> {
        self.record(SimEvent::SendText(text.to_string()));
        Ok(())
    }

    fn press_key(&self, key: &str) -> PlatformResult<()> {
        self.record(SimEvent::PressKey(key.to_string()));
        Ok(())
    }

    fn hotkey(&self, keys: &[String]) -> PlatformResult<()> {
        self.record(SimEvent::Hotkey(keys.to_vec()));
        Ok(())
    }

    fn capture_screen(&self) -> PlatformResult<RasterImage> {
        Ok(solid_image(1920, 1080))
    }

    fn capture_window(&self, window: WindowId) -> PlatformResult<RasterImage> {
        let info = self.window_info(window)?;
        Ok(solid_image(
            info.bounds.width.max(1) as u32,
            info.bounds.height.max(1) as u32,
        ))
    }

    fn capture_region(&self, bounds: Bounds) -> PlatformResult<RasterImage> {
        Ok(solid_image(
            bounds.width.max(1) as u32,
            bounds.height.max(1) as u32,
        ))
    }

    fn native_ocr_available(&self) -> bool {
        true
    }

    fn native_ocr_languages(&self) -> Vec<String> {
        self.lock().ocr_languages.clone()
    }

    fn native_ocr(&self, _image: &RasterImage, _language: &str) -> PlatformResult<Vec<OcrWord>> {
        Ok(self.lock().ocr_words.clone())
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.pid == pid)
            .map(|w| format!("process-{pid}.exe"))
    }

    fn process_exe(&self, pid: u32) -> Option<String> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.pid == pid)
            .and_then(|w| w.exe.clone())
    }

    fn process_cmdline(&self, pid: u32) -> Option<String> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.info.pid == pid)
            .and_then(|w| w.cmdline.clone())
    }

    fn process_modules(&self, pid: u32) -> PlatformResult<Vec<String>> {
        Ok(self
            .lock()
            .windows
            .iter()
            .find(|w| w.info.pid == pid)
            .map(|w| w.modules.clone())
            .unwrap_or_default())
    }

    fn clipboard_read(&self) -> PlatformResult<String> {
        Ok(self.lock().clipboard.clone())
    }

    fn clipboard_write(&self, text: &str) -> PlatformResult<()> {
        self.record(SimEvent::ClipboardWrite(text.to_string()));
        self.lock().clipboard = text.to_string();
        Ok(())
    }
}

fn solid_image(width: u32, height: u32) -> RasterImage {
    RasterImage {
        width,
        height,
        rgba: vec![0xF0; (width * height * 4) as usize],
    }
}
