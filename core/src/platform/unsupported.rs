//! Backend used on hosts without a Windows desktop. Every OS-touching
//! call returns a structured "unavailable" error; the gate, journal,
//! scheduler, and transport keep working.

use super::*;

pub(super) struct UnsupportedDesktop;

fn unavailable<T>() -> PlatformResult<T> {
    Err(PlatformError::Unavailable(
        "this build has no desktop automation backend".to_string(),
    ))
}

impl Desktop for UnsupportedDesktop {
    fn list_windows(&self) -> PlatformResult<Vec<WindowInfo>> {
        unavailable()
    }

    fn find_window(&self, _fragment: &str) -> PlatformResult<Option<WindowInfo>> {
        unavailable()
    }

    fn window_info(&self, _window: WindowId) -> PlatformResult<WindowInfo> {
        unavailable()
    }

    fn window_exists(&self, _window: WindowId) -> bool {
        false
    }

    fn foreground_window(&self) -> Option<WindowInfo> {
        None
    }

    fn set_foreground(&self, _window: WindowId) -> bool {
        false
    }

    fn force_set_foreground(&self, _window: WindowId) -> bool {
        false
    }

    fn move_window(&self, _window: WindowId, _bounds: Bounds) -> PlatformResult<()> {
        unavailable()
    }

    fn minimize(&self, _window: WindowId) -> PlatformResult<()> {
        unavailable()
    }

    fn maximize(&self, _window: WindowId) -> PlatformResult<()> {
        unavailable()
    }

    fn restore(&self, _window: WindowId) -> PlatformResult<()> {
        unavailable()
    }

    fn close(&self, _window: WindowId) -> PlatformResult<()> {
        unavailable()
    }

    fn monitors(&self) -> PlatformResult<Vec<MonitorInfo>> {
        unavailable()
    }

    fn root_element(&self, _window: WindowId) -> PlatformResult<ElementId> {
        unavailable()
    }

    fn element_props(&self, _element: ElementId) -> PlatformResult<ElementProps> {
        unavailable()
    }

    fn children(&self, _element: ElementId) -> PlatformResult<Vec<ElementId>> {
        unavailable()
    }

    fn invoke(&self, _element: ElementId) -> PlatformResult<()> {
        unavailable()
    }

    fn set_value(&self, _element: ElementId, _text: &str) -> PlatformResult<()> {
        unavailable()
    }

    fn set_edit_text(&self, _element: ElementId, _text: &str) -> PlatformResult<()> {
        unavailable()
    }

    fn click_element(
        &self,
        _element: ElementId,
        _button: MouseButton,
        _double: bool,
    ) -> PlatformResult<()> {
        unavailable()
    }

    fn type_keys(&self, _element: ElementId, _text: &str) -> PlatformResult<()> {
        unavailable()
    }

    fn click_at(&self, _x: i32, _y: i32, _button: MouseButton, _double: bool) -> PlatformResult<()> {
        unavailable()
    }

    fn send_text(&self, _text: &str) -> PlatformResult<()> {
        unavailable()
    }

    fn press_key(&self, _key: &str) -> PlatformResult<()> {
        unavailable()
    }

    fn hotkey(&self, _keys: &[String]) -> PlatformResult<()> {
        unavailable()
    }

    fn capture_screen(&self) -> PlatformResult<RasterImage> {
        unavailable()
    }

    fn capture_window(&self, _window: WindowId) -> PlatformResult<RasterImage> {
        unavailable()
    }

    fn capture_region(&self, _bounds: Bounds) -> PlatformResult<RasterImage> {
        unavailable()
    }

    fn native_ocr_available(&self) -> bool {
        false
    }

    fn native_ocr_languages(&self) -> Vec<String> {
        Vec::new()
    }

    fn native_ocr(&self, _image: &RasterImage, _language: &str) -> PlatformResult<Vec<OcrWord>> {
        unavailable()
    }

    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }

    fn process_exe(&self, _pid: u32) -> Option<String> {
        None
    }

    fn process_cmdline(&self, _pid: u32) -> Option<String> {
        None
    }

    fn process_modules(&self, _pid: u32) -> PlatformResult<Vec<String>> {
        unavailable()
    }

    fn clipboard_read(&self) -> PlatformResult<String> {
        unavailable()
    }

    fn clipboard_write(&self, _text: &str) -> PlatformResult<()> {
        unavailable()
    }
}
