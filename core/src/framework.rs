//! UI-framework detection from a process's loaded native libraries.
//!
//! The result drives automation strategy: Electron/CEF apps have thin
//! accessibility trees and respond far better over the devtools bridge,
//! while XAML/WPF/Win32 apps are fully reachable through UIA. Results
//! are cached per process id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::Result;
use crate::platform::Desktop;
use crate::uia::resolve_window;

/// Marker module → framework. Order matters: more specific first.
const FRAMEWORK_RULES: [(&str, &str, &str, bool, &str); 11] = [
    ("electron.dll", "electron", "high", true, "electron.dll loaded - Electron app"),
    ("libcef.dll", "cef", "high", true, "libcef.dll loaded - Chromium Embedded Framework"),
    ("msedge_elf.dll", "edge_webview2", "high", false, "msedge_elf.dll loaded - Edge WebView2"),
    ("chrome_elf.dll", "chromium", "high", false, "chrome_elf.dll loaded - Chromium-based browser"),
    ("microsoft.ui.xaml.dll", "winui3", "high", false, "Microsoft.UI.Xaml.dll loaded - WinUI 3 app"),
    ("windows.ui.xaml.dll", "uwp", "medium", false, "Windows.UI.Xaml.dll loaded - UWP/XAML app"),
    ("wpfgfx_cor3.dll", "wpf", "high", false, "wpfgfx_cor3.dll loaded - WPF (.NET Core) app"),
    ("wpfgfx_v0400.dll", "wpf", "high", false, "wpfgfx_v0400.dll loaded - WPF (.NET Framework) app"),
    ("presentationframework.dll", "wpf", "high", false, "PresentationFramework.dll loaded - WPF app"),
    ("clrjit.dll", "winforms", "medium", false, ".NET runtime loaded - likely WinForms"),
    ("mscorlib.dll", "winforms", "medium", false, ".NET Framework loaded - likely WinForms"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameworkInfo {
    pub framework: String,
    pub confidence: String,
    pub details: String,
    pub cdp_recommended: bool,
    pub pid: u32,
    pub process_name: String,
}

pub struct FrameworkDetector {
    desktop: Arc<dyn Desktop>,
    cache: Mutex<HashMap<u32, FrameworkInfo>>,
}

impl FrameworkDetector {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn detect(&self, pid: u32) -> FrameworkInfo {
        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&pid) {
                return cached.clone();
            }
        }
        let info = self.detect_uncached(pid);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(pid, info.clone());
        }
        info
    }

    fn detect_uncached(&self, pid: u32) -> FrameworkInfo {
        let process_name = self.desktop.process_name(pid).unwrap_or_default();
        let make = |framework: &str, confidence: &str, details: String, cdp: bool| FrameworkInfo {
            framework: framework.to_string(),
            confidence: confidence.to_string(),
            details,
            cdp_recommended: cdp,
            pid,
            process_name: process_name.clone(),
        };

        let modules = match self.desktop.process_modules(pid) {
            Ok(modules) => modules,
            Err(_) => {
                return make(
                    "unknown",
                    "none",
                    "Cannot read process modules (access denied or process exited)".to_string(),
                    false,
                );
            }
        };

        for (marker, framework, confidence, cdp, details) in FRAMEWORK_RULES {
            if !modules.iter().any(|m| m == marker) {
                continue;
            }
            // chrome_elf on its own means a plain Chromium browser, but
            // Electron apps load it too; prefer the Electron verdict.
            if framework == "chromium"
                && (modules.iter().any(|m| m == "electron.dll") || self.electron_by_exe(pid))
            {
                continue;
            }
            return make(framework, confidence, details.to_string(), cdp);
        }

        if self.electron_by_exe(pid) || self.electron_by_cmdline(pid) {
            return make(
                "electron",
                "medium",
                "Electron detected via executable path or command line".to_string(),
                true,
            );
        }

        make(
            "win32",
            "low",
            "No known framework modules found - native Win32 app".to_string(),
            false,
        )
    }

    fn electron_by_exe(&self, pid: u32) -> bool {
        self.desktop
            .process_exe(pid)
            .map(|exe| exe.to_lowercase().contains("electron"))
            .unwrap_or(false)
    }

    fn electron_by_cmdline(&self, pid: u32) -> bool {
        self.desktop
            .process_cmdline(pid)
            .map(|cmdline| {
                let cmdline = cmdline.to_lowercase();
                cmdline.contains("--type=")
                    && (cmdline.contains("electron") || cmdline.contains("app"))
            })
            .unwrap_or(false)
    }

    /// Framework-aware default traversal depth for `get_ui_tree`.
    /// Embedded-browser trees are huge and mostly opaque; native trees
    /// reward going deep.
    pub fn auto_tree_depth(&self, pid: u32) -> u32 {
        match self.detect(pid).framework.as_str() {
            "electron" | "cef" => 5,
            "edge_webview2" | "chromium" => 8,
            "winforms" | "wpf" => 12,
            _ => 15,
        }
    }

    /// Hint attached to resolver results for apps where UIA coverage is
    /// known to be poor.
    pub fn hint(&self, pid: u32) -> Option<String> {
        match self.detect(pid).framework.as_str() {
            "electron" => Some(
                "This app is Electron. UIA has limited coverage; consider connecting the \
                 devtools bridge for full access to the DOM."
                    .to_string(),
            ),
            "cef" => Some(
                "This app uses Chromium Embedded Framework. UIA has limited coverage; consider \
                 connecting the devtools bridge."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// The `detect_app_framework` tool body.
    pub fn detect_tool(&self, window_title: Option<&str>) -> Result<JsonValue> {
        match window_title {
            Some(title) => {
                let window = resolve_window(self.desktop.as_ref(), Some(title))?;
                let info = self.detect(window.pid);
                let mut result = serde_json::to_value(&info)?;
                result["success"] = json!(true);
                result["window_title"] = json!(window.title);
                Ok(result)
            }
            None => {
                let windows = self.desktop.list_windows()?;
                let mut results = Vec::new();
                for window in windows {
                    if window.title.trim().is_empty() {
                        continue;
                    }
                    let info = self.detect(window.pid);
                    let mut entry = serde_json::to_value(&info)?;
                    entry["window_title"] = json!(window.title);
                    results.push(entry);
                }
                Ok(json!({
                    "success": true,
                    "count": results.len(),
                    "windows": results,
                }))
            }
        }
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
            width: 100,
            height: 100,
        }
    }

    #[test]
    fn electron_markers_win_over_chromium() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Chat", bounds(), 42);
        sim.set_process_modules(
            win,
            vec!["chrome_elf.dll".to_string(), "electron.dll".to_string()],
        );
        let detector = FrameworkDetector::new(sim);
        let info = detector.detect(42);
        assert_eq!(info.framework, "electron");
        assert!(info.cdp_recommended);
    }

    #[test]
    fn wpf_is_detected_and_cached() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Designer", bounds(), 7);
        sim.set_process_modules(win, vec!["wpfgfx_cor3.dll".to_string()]);
        let detector = FrameworkDetector::new(sim.clone());
        assert_eq!(detector.detect(7).framework, "wpf");

        // Cached verdict survives the process modules changing.
        sim.set_process_modules(win, vec![]);
        assert_eq!(detector.detect(7).framework, "wpf");
    }

    #[test]
    fn no_markers_defaults_to_win32() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window("Old Tool", bounds(), 9);
        let detector = FrameworkDetector::new(sim);
        let info = detector.detect(9);
        assert_eq!(info.framework, "win32");
        assert_eq!(info.confidence, "low");
    }

    #[test]
    fn exe_path_fallback_detects_electron() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Notes", bounds(), 11);
        sim.set_process_identity(win, r"C:\apps\electron\notes.exe", "notes.exe");
        let detector = FrameworkDetector::new(sim);
        assert_eq!(detector.detect(11).framework, "electron");
    }

    #[test]
    fn auto_depth_matches_framework_family() {
        let sim = Arc::new(SimDesktop::new());
        let electron = sim.add_window("A", bounds(), 1);
        sim.set_process_modules(electron, vec!["electron.dll".to_string()]);
        let wpf = sim.add_window("B", bounds(), 2);
        sim.set_process_modules(wpf, vec!["presentationframework.dll".to_string()]);
        sim.add_window("C", bounds(), 3);

        let detector = FrameworkDetector::new(sim);
        assert_eq!(detector.auto_tree_depth(1), 5);
        assert_eq!(detector.auto_tree_depth(2), 12);
        assert_eq!(detector.auto_tree_depth(3), 15);
    }
}
