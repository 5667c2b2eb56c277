//! Desktop backend seam.
//!
//! Everything that touches the OS (window handles, the accessibility
//! tree, input synthesis, raster capture, the clipboard, process module
//! lists) goes through the [`Desktop`] trait. The engine never calls an
//! OS API directly, which keeps every gate, resolver, and recorder
//! testable off-Windows. Handles are opaque capabilities; parent/child
//! relations are navigational queries, never ownership.

use serde::Serialize;

use crate::error::PlatformError;

pub mod sim;
#[cfg(not(target_os = "windows"))]
mod unsupported;
#[cfg(target_os = "windows")]
mod windows_impl;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Opaque top-level window capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowId(pub u64);

/// Opaque accessibility-element capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ElementId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub bounds: Bounds,
    pub is_minimized: bool,
    pub is_active: bool,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorInfo {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub is_primary: bool,
}

impl MonitorInfo {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Accessibility properties of one element, read in a single call so a
/// traversal touches each node once.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElementProps {
    pub name: String,
    pub automation_id: String,
    pub help_text: String,
    pub class_name: String,
    pub control_type: String,
    pub is_enabled: bool,
    pub is_visible: bool,
    /// Readable value (Value pattern), when the element exposes one.
    pub value: Option<String>,
    /// Accessibility pattern capabilities (Invoke, Value, Toggle, ...).
    pub patterns: Vec<String>,
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(name: Option<&str>) -> Self {
        match name.unwrap_or("left") {
            "right" => MouseButton::Right,
            "middle" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// Raw captured pixels, RGBA8 row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A word recognized by the native OCR backend, with a flat bounding box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrWord {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// The desktop backend. All methods are blocking; tool bodies call them
/// from worker threads.
pub trait Desktop: Send + Sync {
    // ── Windows ─────────────────────────────────────────────────
    fn list_windows(&self) -> PlatformResult<Vec<WindowInfo>>;
    /// First visible window whose title contains `fragment`
    /// (case-insensitive, fragment treated literally).
    fn find_window(&self, fragment: &str) -> PlatformResult<Option<WindowInfo>>;
    fn window_info(&self, window: WindowId) -> PlatformResult<WindowInfo>;
    fn window_exists(&self, window: WindowId) -> bool;
    fn foreground_window(&self) -> Option<WindowInfo>;
    fn set_foreground(&self, window: WindowId) -> bool;
    /// AttachThreadInput + BringWindowToTop fallback for when the OS
    /// refuses a plain SetForegroundWindow.
    fn force_set_foreground(&self, window: WindowId) -> bool;
    fn move_window(&self, window: WindowId, bounds: Bounds) -> PlatformResult<()>;
    fn minimize(&self, window: WindowId) -> PlatformResult<()>;
    fn maximize(&self, window: WindowId) -> PlatformResult<()>;
    fn restore(&self, window: WindowId) -> PlatformResult<()>;
    fn close(&self, window: WindowId) -> PlatformResult<()>;
    fn monitors(&self) -> PlatformResult<Vec<MonitorInfo>>;

    // ── Accessibility tree ──────────────────────────────────────
    fn root_element(&self, window: WindowId) -> PlatformResult<ElementId>;
    fn element_props(&self, element: ElementId) -> PlatformResult<ElementProps>;
    fn children(&self, element: ElementId) -> PlatformResult<Vec<ElementId>>;
    /// Silent click via the Invoke pattern; no focus change, no cursor.
    fn invoke(&self, element: ElementId) -> PlatformResult<()>;
    /// Silent text write via the Value pattern.
    fn set_value(&self, element: ElementId, text: &str) -> PlatformResult<()>;
    /// Silent text write via the classic Edit-control message path.
    fn set_edit_text(&self, element: ElementId, text: &str) -> PlatformResult<()>;
    /// Input-synthesis click on the element's center.
    fn click_element(
        &self,
        element: ElementId,
        button: MouseButton,
        double: bool,
    ) -> PlatformResult<()>;
    /// Focus the element and send keystrokes, `{` sequences expanded.
    fn type_keys(&self, element: ElementId, text: &str) -> PlatformResult<()>;

    // ── Input synthesis ─────────────────────────────────────────
    fn click_at(&self, x: i32, y: i32, button: MouseButton, double: bool) -> PlatformResult<()>;
    fn send_text(&self, text: &str) -> PlatformResult<()>;
    fn press_key(&self, key: &str) -> PlatformResult<()>;
    fn hotkey(&self, keys: &[String]) -> PlatformResult<()>;

    // ── Capture ─────────────────────────────────────────────────
    fn capture_screen(&self) -> PlatformResult<RasterImage>;
    /// Capture a window's pixels without activating it; works occluded.
    fn capture_window(&self, window: WindowId) -> PlatformResult<RasterImage>;
    fn capture_region(&self, bounds: Bounds) -> PlatformResult<RasterImage>;

    // ── Native OCR ──────────────────────────────────────────────
    fn native_ocr_available(&self) -> bool;
    fn native_ocr_languages(&self) -> Vec<String>;
    /// Run the OS OCR engine with a BCP-47 language tag.
    fn native_ocr(&self, image: &RasterImage, language: &str) -> PlatformResult<Vec<OcrWord>>;

    // ── Processes ───────────────────────────────────────────────
    fn process_name(&self, pid: u32) -> Option<String>;
    fn process_exe(&self, pid: u32) -> Option<String>;
    fn process_cmdline(&self, pid: u32) -> Option<String>;
    /// Basenames of native libraries loaded by the process, lowercased.
    fn process_modules(&self, pid: u32) -> PlatformResult<Vec<String>>;

    // ── Clipboard ───────────────────────────────────────────────
    fn clipboard_read(&self) -> PlatformResult<String>;
    fn clipboard_write(&self, text: &str) -> PlatformResult<()>;
}

/// The backend for this build target.
pub fn native_desktop() -> std::sync::Arc<dyn Desktop> {
    #[cfg(target_os = "windows")]
    {
        std::sync::Arc::new(windows_impl::WindowsDesktop::new())
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::sync::Arc::new(unsupported::UnsupportedDesktop)
    }
}
