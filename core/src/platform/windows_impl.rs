//! Windows desktop backend: Win32 + UI Automation + WinRT OCR.
//!
//! COM runs in the multithreaded apartment; element handles are COM
//! interface pointers kept in a registry so the rest of the engine only
//! sees opaque [`ElementId`] capabilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tracing::debug;
use windows::Foundation::IAsyncOperation;
use windows::Globalization::Language;
use windows::Graphics::Imaging::BitmapPixelFormat;
use windows::Graphics::Imaging::SoftwareBitmap;
use windows::Media::Ocr::OcrEngine;
use windows::Storage::Streams::DataWriter;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Foundation::HGLOBAL;
use windows::Win32::Foundation::HWND;
use windows::Win32::Foundation::LPARAM;
use windows::Win32::Foundation::RECT;
use windows::Win32::Foundation::WPARAM;
use windows::Win32::Graphics::Gdi::BITMAPINFO;
use windows::Win32::Graphics::Gdi::BITMAPINFOHEADER;
use windows::Win32::Graphics::Gdi::BI_RGB;
use windows::Win32::Graphics::Gdi::BitBlt;
use windows::Win32::Graphics::Gdi::CreateCompatibleBitmap;
use windows::Win32::Graphics::Gdi::CreateCompatibleDC;
use windows::Win32::Graphics::Gdi::DIB_RGB_COLORS;
use windows::Win32::Graphics::Gdi::DeleteDC;
use windows::Win32::Graphics::Gdi::DeleteObject;
use windows::Win32::Graphics::Gdi::GetDC;
use windows::Win32::Graphics::Gdi::GetDIBits;
use windows::Win32::Graphics::Gdi::HDC;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::Graphics::Gdi::ReleaseDC;
use windows::Win32::Graphics::Gdi::SRCCOPY;
use windows::Win32::Graphics::Gdi::SelectObject;
use windows::Win32::System::Com::CLSCTX_INPROC_SERVER;
use windows::Win32::System::Com::COINIT_MULTITHREADED;
use windows::Win32::System::Com::CoCreateInstance;
use windows::Win32::System::Com::CoInitializeEx;
use windows::Win32::System::DataExchange::CloseClipboard;
use windows::Win32::System::DataExchange::EmptyClipboard;
use windows::Win32::System::DataExchange::GetClipboardData;
use windows::Win32::System::DataExchange::OpenClipboard;
use windows::Win32::System::DataExchange::SetClipboardData;
use windows::Win32::System::Memory::GMEM_MOVEABLE;
use windows::Win32::System::Memory::GlobalAlloc;
use windows::Win32::System::Memory::GlobalLock;
use windows::Win32::System::Memory::GlobalUnlock;
use windows::Win32::System::ProcessStatus::K32EnumProcessModules;
use windows::Win32::System::ProcessStatus::K32GetModuleBaseNameW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::System::Threading::OpenProcess;
use windows::Win32::System::Threading::PROCESS_NAME_WIN32;
use windows::Win32::System::Threading::PROCESS_QUERY_INFORMATION;
use windows::Win32::System::Threading::PROCESS_VM_READ;
use windows::Win32::System::Threading::QueryFullProcessImageNameW;
use windows::Win32::UI::Accessibility::CUIAutomation;
use windows::Win32::UI::Accessibility::IUIAutomation;
use windows::Win32::UI::Accessibility::IUIAutomationElement;
use windows::Win32::UI::Accessibility::IUIAutomationElementArray;
use windows::Win32::UI::Accessibility::IUIAutomationInvokePattern;
use windows::Win32::UI::Accessibility::IUIAutomationValuePattern;
use windows::Win32::UI::Accessibility::TreeScope_Children;
use windows::Win32::UI::Accessibility::UIA_InvokePatternId;
use windows::Win32::UI::Accessibility::UIA_TogglePatternId;
use windows::Win32::UI::Accessibility::UIA_ValuePatternId;
use windows::Win32::UI::Input::KeyboardAndMouse::AttachThreadInput;
use windows::Win32::UI::Input::KeyboardAndMouse::INPUT;
use windows::Win32::UI::Input::KeyboardAndMouse::INPUT_0;
use windows::Win32::UI::Input::KeyboardAndMouse::INPUT_KEYBOARD;
use windows::Win32::UI::Input::KeyboardAndMouse::INPUT_MOUSE;
use windows::Win32::UI::Input::KeyboardAndMouse::KEYBD_EVENT_FLAGS;
use windows::Win32::UI::Input::KeyboardAndMouse::KEYBDINPUT;
use windows::Win32::UI::Input::KeyboardAndMouse::KEYEVENTF_KEYUP;
use windows::Win32::UI::Input::KeyboardAndMouse::KEYEVENTF_UNICODE;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_LEFTDOWN;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_LEFTUP;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_MIDDLEDOWN;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_MIDDLEUP;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_RIGHTDOWN;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEEVENTF_RIGHTUP;
use windows::Win32::UI::Input::KeyboardAndMouse::MOUSEINPUT;
use windows::Win32::UI::Input::KeyboardAndMouse::SendInput;
use windows::Win32::UI::Input::KeyboardAndMouse::VIRTUAL_KEY;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_BACK;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_CONTROL;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_DELETE;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_DOWN;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_END;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_ESCAPE;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_F1;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_HOME;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_LEFT;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_LWIN;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_MENU;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_NEXT;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_PRIOR;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_RETURN;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_RIGHT;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_SHIFT;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_SPACE;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_TAB;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_UP;
use windows::Win32::UI::Input::KeyboardAndMouse::VkKeyScanW;
use windows::Win32::UI::WindowsAndMessaging::BringWindowToTop;
use windows::Win32::UI::WindowsAndMessaging::EnumWindows;
use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;
use windows::Win32::UI::WindowsAndMessaging::GetSystemMetrics;
use windows::Win32::UI::WindowsAndMessaging::GetWindowRect;
use windows::Win32::UI::WindowsAndMessaging::GetWindowTextW;
use windows::Win32::UI::WindowsAndMessaging::GetWindowThreadProcessId;
use windows::Win32::UI::WindowsAndMessaging::IsIconic;
use windows::Win32::UI::WindowsAndMessaging::IsWindow;
use windows::Win32::UI::WindowsAndMessaging::IsWindowVisible;
use windows::Win32::UI::WindowsAndMessaging::MoveWindow;
use windows::Win32::UI::WindowsAndMessaging::PostMessageW;
use windows::Win32::UI::WindowsAndMessaging::PrintWindow;
use windows::Win32::UI::WindowsAndMessaging::SM_CXVIRTUALSCREEN;
use windows::Win32::UI::WindowsAndMessaging::SM_CYVIRTUALSCREEN;
use windows::Win32::UI::WindowsAndMessaging::SM_XVIRTUALSCREEN;
use windows::Win32::UI::WindowsAndMessaging::SM_YVIRTUALSCREEN;
use windows::Win32::UI::WindowsAndMessaging::SW_MAXIMIZE;
use windows::Win32::UI::WindowsAndMessaging::SW_MINIMIZE;
use windows::Win32::UI::WindowsAndMessaging::SW_RESTORE;
use windows::Win32::UI::WindowsAndMessaging::SendMessageW;
use windows::Win32::UI::WindowsAndMessaging::SetCursorPos;
use windows::Win32::UI::WindowsAndMessaging::SetForegroundWindow;
use windows::Win32::UI::WindowsAndMessaging::ShowWindow;
use windows::Win32::UI::WindowsAndMessaging::WM_CLOSE;
use windows::Win32::UI::WindowsAndMessaging::WM_SETTEXT;
use windows::core::BSTR;
use windows::core::HSTRING;
use windows::core::Interface;
use windows::core::PWSTR;

use super::*;

/// COM interface pointer pinned into the element registry. The process
/// joins the multithreaded apartment, where cross-thread interface use
/// is permitted.
struct ElementRef(IUIAutomationElement);
unsafe impl Send for ElementRef {}
unsafe impl Sync for ElementRef {}

struct AutomationRef(IUIAutomation);
unsafe impl Send for AutomationRef {}
unsafe impl Sync for AutomationRef {}

pub(super) struct WindowsDesktop {
    automation: Mutex<Option<AutomationRef>>,
    elements: Mutex<HashMap<u64, ElementRef>>,
    next_element_id: AtomicU64,
}

fn os_err(context: &str, err: impl std::fmt::Display) -> PlatformError {
    PlatformError::Os(format!("{context}: {err}"))
}

fn ensure_com() {
    // S_FALSE (already initialized) is fine; anything else will surface
    // as a failure on the first real COM call.
    unsafe {
        let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
    }
}

impl WindowsDesktop {
    pub(super) fn new() -> Self {
        Self {
            automation: Mutex::new(None),
            elements: Mutex::new(HashMap::new()),
            next_element_id: AtomicU64::new(1),
        }
    }

    fn automation(&self) -> PlatformResult<IUIAutomation> {
        ensure_com();
        let mut slot = self
            .automation
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.0.clone());
        }
        let automation: IUIAutomation =
            unsafe { CoCreateInstance(&CUIAutomation, None, CLSCTX_INPROC_SERVER) }
                .map_err(|e| os_err("CoCreateInstance(CUIAutomation)", e))?;
        *slot = Some(AutomationRef(automation.clone()));
        Ok(automation)
    }

    fn register(&self, element: IUIAutomationElement) -> ElementId {
        let id = self.next_element_id.fetch_add(1, Ordering::Relaxed);
        self.elements
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, ElementRef(element));
        ElementId(id)
    }

    fn element(&self, id: ElementId) -> PlatformResult<IUIAutomationElement> {
        self.elements
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id.0)
            .map(|e| e.0.clone())
            .ok_or(PlatformError::StaleElement)
    }

    fn window_info_from_hwnd(&self, hwnd: HWND) -> Option<WindowInfo> {
        unsafe {
            if !IsWindow(hwnd).as_bool() {
                return None;
            }
            let mut buf = [0u16; 512];
            let len = GetWindowTextW(hwnd, &mut buf);
            let title = String::from_utf16_lossy(&buf[..len as usize]);

            let mut rect = RECT::default();
            if GetWindowRect(hwnd, &mut rect).is_err() {
                return None;
            }
            let minimized = IsIconic(hwnd).as_bool();

            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid));

            Some(WindowInfo {
                id: WindowId(hwnd.0 as u64),
                title,
                bounds: Bounds {
                    x: rect.left,
                    y: rect.top,
                    width: if minimized { 0 } else { rect.right - rect.left },
                    height: if minimized { 0 } else { rect.bottom - rect.top },
                },
                is_minimized: minimized,
                is_active: GetForegroundWindow() == hwnd,
                pid,
            })
        }
    }

    fn capture_dc_region(&self, x: i32, y: i32, width: i32, height: i32) -> PlatformResult<RasterImage> {
        if width <= 0 || height <= 0 {
            return Err(PlatformError::Os("empty capture region".to_string()));
        }
        unsafe {
            let screen_dc = GetDC(None);
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, bitmap);

            let blit = BitBlt(mem_dc, 0, 0, width, height, screen_dc, x, y, SRCCOPY);

            let result = if blit.is_ok() {
                read_dib(mem_dc, bitmap, width, height)
            } else {
                Err(os_err("BitBlt", "screen copy failed"))
            };

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(None, screen_dc);
            result
        }
    }
}

/// Read a 32-bit top-down DIB out of the given bitmap as RGBA8.
unsafe fn read_dib(
    dc: HDC,
    bitmap: windows::Win32::Graphics::Gdi::HBITMAP,
    width: i32,
    height: i32,
) -> PlatformResult<RasterImage> {
    let mut info = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width,
            biHeight: -height, // top-down
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut pixels = vec![0u8; (width * height * 4) as usize];
    let rows = unsafe {
        GetDIBits(
            dc,
            bitmap,
            0,
            height as u32,
            Some(pixels.as_mut_ptr().cast()),
            &mut info,
            DIB_RGB_COLORS,
        )
    };
    if rows == 0 {
        return Err(PlatformError::Os("GetDIBits failed".to_string()));
    }
    // BGRA → RGBA in place.
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
        px[3] = 0xFF;
    }
    Ok(RasterImage {
        width: width as u32,
        height: height as u32,
        rgba: pixels,
    })
}

fn send_inputs(inputs: &[INPUT]) -> PlatformResult<()> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(PlatformError::Os("SendInput was partially blocked".to_string()));
    }
    Ok(())
}

fn mouse_input(flags: windows::Win32::UI::Input::KeyboardAndMouse::MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn key_input(vk: VIRTUAL_KEY, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn unicode_input(unit: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wScan: unit,
                dwFlags: KEYEVENTF_UNICODE | flags,
                ..Default::default()
            },
        },
    }
}

/// Resolve a key name ("enter", "f5", "a", ...) to a virtual-key code.
fn lookup_vk(key: &str) -> Option<VIRTUAL_KEY> {
    let key = key.trim().to_lowercase();
    let vk = match key.as_str() {
        "enter" | "return" => VK_RETURN,
        "tab" => VK_TAB,
        "escape" | "esc" => VK_ESCAPE,
        "backspace" => VK_BACK,
        "delete" | "del" => VK_DELETE,
        "space" => VK_SPACE,
        "up" => VK_UP,
        "down" => VK_DOWN,
        "left" => VK_LEFT,
        "right" => VK_RIGHT,
        "home" => VK_HOME,
        "end" => VK_END,
        "pageup" => VK_PRIOR,
        "pagedown" => VK_NEXT,
        "ctrl" | "control" => VK_CONTROL,
        "alt" => VK_MENU,
        "shift" => VK_SHIFT,
        "win" | "super" => VK_LWIN,
        _ => {
            if let Some(n) = key.strip_prefix('f').and_then(|n| n.parse::<u16>().ok()) {
                if (1..=12).contains(&n) {
                    return Some(VIRTUAL_KEY(VK_F1.0 + n - 1));
                }
                return None;
            }
            let mut chars = key.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return None;
            };
            let scan = unsafe { VkKeyScanW(c as u16) };
            if scan == -1 {
                return None;
            }
            VIRTUAL_KEY((scan & 0xFF) as u16)
        }
    };
    Some(vk)
}

fn control_type_name(id: i32) -> String {
    // UIA_*ControlTypeId constants, 50000-50040.
    const NAMES: [(i32, &str); 25] = [
        (50000, "Button"),
        (50001, "Calendar"),
        (50002, "CheckBox"),
        (50003, "ComboBox"),
        (50004, "Edit"),
        (50005, "Hyperlink"),
        (50006, "Image"),
        (50007, "ListItem"),
        (50008, "List"),
        (50009, "Menu"),
        (50010, "MenuBar"),
        (50011, "MenuItem"),
        (50012, "ProgressBar"),
        (50013, "RadioButton"),
        (50014, "ScrollBar"),
        (50015, "Slider"),
        (50018, "Tab"),
        (50019, "TabItem"),
        (50020, "Text"),
        (50021, "ToolBar"),
        (50023, "Tree"),
        (50025, "Custom"),
        (50026, "Group"),
        (50030, "Document"),
        (50032, "Window"),
    ];
    NAMES
        .iter()
        .find(|(code, _)| *code == id)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("ControlType({id})"))
}

impl Desktop for WindowsDesktop {
    fn list_windows(&self) -> PlatformResult<Vec<WindowInfo>> {
        unsafe extern "system" fn enum_proc(hwnd: HWND, lparam: LPARAM) -> windows::Win32::Foundation::BOOL {
            let handles = unsafe { &mut *(lparam.0 as *mut Vec<HWND>) };
            if unsafe { IsWindowVisible(hwnd) }.as_bool() {
                handles.push(hwnd);
            }
            true.into()
        }

        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(Some(enum_proc), LPARAM(&mut handles as *mut _ as isize))
                .map_err(|e| os_err("EnumWindows", e))?;
        }

        Ok(handles
            .into_iter()
            .filter_map(|hwnd| self.window_info_from_hwnd(hwnd))
            .filter(|info| !info.title.trim().is_empty())
            .collect())
    }

    fn find_window(&self, fragment: &str) -> PlatformResult<Option<WindowInfo>> {
        let fragment = fragment.to_lowercase();
        Ok(self
            .list_windows()?
            .into_iter()
            .find(|w| w.title.to_lowercase().contains(&fragment)))
    }

    fn window_info(&self, window: WindowId) -> PlatformResult<WindowInfo> {
        self.window_info_from_hwnd(HWND(window.0 as *mut _))
            .ok_or(PlatformError::WindowNotFound)
    }

    fn window_exists(&self, window: WindowId) -> bool {
        unsafe { IsWindow(HWND(window.0 as *mut _)).as_bool() }
    }

    fn foreground_window(&self) -> Option<WindowInfo> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() {
            return None;
        }
        self.window_info_from_hwnd(hwnd)
    }

    fn set_foreground(&self, window: WindowId) -> bool {
        unsafe { SetForegroundWindow(HWND(window.0 as *mut _)).as_bool() }
    }

    fn force_set_foreground(&self, window: WindowId) -> bool {
        let hwnd = HWND(window.0 as *mut _);
        unsafe {
            if SetForegroundWindow(hwnd).as_bool() {
                return true;
            }
            // The OS refuses SetForegroundWindow from a background
            // process; attach to the current foreground thread first.
            let foreground = GetForegroundWindow();
            if foreground.is_invalid() {
                return false;
            }
            let foreground_tid = GetWindowThreadProcessId(foreground, None);
            let our_tid = GetCurrentThreadId();
            let attached = foreground_tid != our_tid
                && AttachThreadInput(our_tid, foreground_tid, true).as_bool();
            let _ = BringWindowToTop(hwnd);
            let result = SetForegroundWindow(hwnd).as_bool();
            if attached {
                let _ = AttachThreadInput(our_tid, foreground_tid, false);
            }
            result
        }
    }

    fn move_window(&self, window: WindowId, bounds: Bounds) -> PlatformResult<()> {
        unsafe {
            MoveWindow(
                HWND(window.0 as *mut _),
                bounds.x,
                bounds.y,
                bounds.width,
                bounds.height,
                true,
            )
            .map_err(|e| os_err("MoveWindow", e))
        }
    }

    fn minimize(&self, window: WindowId) -> PlatformResult<()> {
        unsafe {
            let _ = ShowWindow(HWND(window.0 as *mut _), SW_MINIMIZE);
        }
        Ok(())
    }

    fn maximize(&self, window: WindowId) -> PlatformResult<()> {
        unsafe {
            let _ = ShowWindow(HWND(window.0 as *mut _), SW_MAXIMIZE);
        }
        Ok(())
    }

    fn restore(&self, window: WindowId) -> PlatformResult<()> {
        unsafe {
            let _ = ShowWindow(HWND(window.0 as *mut _), SW_RESTORE);
        }
        Ok(())
    }

    fn close(&self, window: WindowId) -> PlatformResult<()> {
        unsafe {
            PostMessageW(HWND(window.0 as *mut _), WM_CLOSE, WPARAM(0), LPARAM(0))
                .map_err(|e| os_err("PostMessageW(WM_CLOSE)", e))
        }
    }

    fn monitors(&self) -> PlatformResult<Vec<MonitorInfo>> {
        unsafe extern "system" fn monitor_proc(
            _monitor: HMONITOR,
            _dc: HDC,
            rect: *mut RECT,
            lparam: LPARAM,
        ) -> windows::Win32::Foundation::BOOL {
            let monitors = unsafe { &mut *(lparam.0 as *mut Vec<MonitorInfo>) };
            let rect = unsafe { *rect };
            monitors.push(MonitorInfo {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
                is_primary: rect.left == 0 && rect.top == 0,
            });
            true.into()
        }

        let mut monitors: Vec<MonitorInfo> = Vec::new();
        let ok = unsafe {
            windows::Win32::Graphics::Gdi::EnumDisplayMonitors(
                None,
                None,
                Some(monitor_proc),
                LPARAM(&mut monitors as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            return Err(PlatformError::Os("EnumDisplayMonitors failed".to_string()));
        }
        Ok(monitors)
    }

    fn root_element(&self, window: WindowId) -> PlatformResult<ElementId> {
        let automation = self.automation()?;
        let element = unsafe { automation.ElementFromHandle(HWND(window.0 as *mut _)) }
            .map_err(|e| os_err("ElementFromHandle", e))?;
        Ok(self.register(element))
    }

    fn element_props(&self, element: ElementId) -> PlatformResult<ElementProps> {
        let el = self.element(element)?;
        unsafe {
            let name = el.CurrentName().map(|s| s.to_string()).unwrap_or_default();
            let automation_id = el
                .CurrentAutomationId()
                .map(|s| s.to_string())
                .unwrap_or_default();
            let help_text = el
                .CurrentHelpText()
                .map(|s| s.to_string())
                .unwrap_or_default();
            let class_name = el
                .CurrentClassName()
                .map(|s| s.to_string())
                .unwrap_or_default();
            let control_type = el
                .CurrentControlType()
                .map(|id| control_type_name(id.0))
                .unwrap_or_default();
            let is_enabled = el.CurrentIsEnabled().map(|b| b.as_bool()).unwrap_or(false);
            let is_visible = el
                .CurrentIsOffscreen()
                .map(|b| !b.as_bool())
                .unwrap_or(true);
            let bounds = el.CurrentBoundingRectangle().ok().map(|r| Bounds {
                x: r.left,
                y: r.top,
                width: r.right - r.left,
                height: r.bottom - r.top,
            });

            let mut patterns = Vec::new();
            let mut value = None;
            if let Ok(pattern) = el.GetCurrentPattern(UIA_ValuePatternId) {
                if let Ok(value_pattern) = pattern.cast::<IUIAutomationValuePattern>() {
                    patterns.push("Value".to_string());
                    value = value_pattern.CurrentValue().ok().map(|v| v.to_string());
                }
            }
            if el.GetCurrentPattern(UIA_InvokePatternId).is_ok() {
                patterns.push("Invoke".to_string());
            }
            if el.GetCurrentPattern(UIA_TogglePatternId).is_ok() {
                patterns.push("Toggle".to_string());
            }

            Ok(ElementProps {
                name,
                automation_id,
                help_text,
                class_name,
                control_type,
                is_enabled,
                is_visible,
                value,
                patterns,
                bounds,
            })
        }
    }

    fn children(&self, element: ElementId) -> PlatformResult<Vec<ElementId>> {
        let el = self.element(element)?;
        let automation = self.automation()?;
        unsafe {
            let condition = automation
                .CreateTrueCondition()
                .map_err(|e| os_err("CreateTrueCondition", e))?;
            let found: IUIAutomationElementArray = el
                .FindAll(TreeScope_Children, &condition)
                .map_err(|e| os_err("FindAll", e))?;
            let count = found.Length().map_err(|e| os_err("Length", e))?;
            let mut ids = Vec::with_capacity(count as usize);
            for i in 0..count {
                if let Ok(child) = found.GetElement(i) {
                    ids.push(self.register(child));
                }
            }
            Ok(ids)
        }
    }

    fn invoke(&self, element: ElementId) -> PlatformResult<()> {
        let el = self.element(element)?;
        unsafe {
            let pattern = el
                .GetCurrentPattern(UIA_InvokePatternId)
                .map_err(|_| PlatformError::PatternNotSupported("Invoke".to_string()))?;
            let invoke: IUIAutomationInvokePattern = pattern
                .cast()
                .map_err(|_| PlatformError::PatternNotSupported("Invoke".to_string()))?;
            invoke.Invoke().map_err(|e| os_err("Invoke", e))
        }
    }

    fn set_value(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        let el = self.element(element)?;
        unsafe {
            let pattern = el
                .GetCurrentPattern(UIA_ValuePatternId)
                .map_err(|_| PlatformError::PatternNotSupported("Value".to_string()))?;
            let value: IUIAutomationValuePattern = pattern
                .cast()
                .map_err(|_| PlatformError::PatternNotSupported("Value".to_string()))?;
            value
                .SetValue(&BSTR::from(text))
                .map_err(|e| os_err("ValuePattern.SetValue", e))
        }
    }

    fn set_edit_text(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        let el = self.element(element)?;
        unsafe {
            let hwnd = el
                .CurrentNativeWindowHandle()
                .map_err(|_| PlatformError::PatternNotSupported("EditText".to_string()))?;
            if hwnd.is_invalid() {
                return Err(PlatformError::PatternNotSupported("EditText".to_string()));
            }
            let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
            SendMessageW(
                hwnd,
                WM_SETTEXT,
                WPARAM(0),
                LPARAM(wide.as_ptr() as isize),
            );
        }
        Ok(())
    }

    fn click_element(
        &self,
        element: ElementId,
        button: MouseButton,
        double: bool,
    ) -> PlatformResult<()> {
        let props = self.element_props(element)?;
        let bounds = props.bounds.ok_or_else(|| {
            PlatformError::Os("element has no bounding rectangle".to_string())
        })?;
        let (x, y) = bounds.center();
        self.click_at(x, y, button, double)
    }

    fn type_keys(&self, element: ElementId, text: &str) -> PlatformResult<()> {
        let el = self.element(element)?;
        unsafe {
            el.SetFocus().map_err(|e| os_err("SetFocus", e))?;
        }
        self.send_text(text)
    }

    fn click_at(&self, x: i32, y: i32, button: MouseButton, double: bool) -> PlatformResult<()> {
        unsafe {
            SetCursorPos(x, y).map_err(|e| os_err("SetCursorPos", e))?;
        }
        let (down, up) = match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        };
        let clicks = if double { 2 } else { 1 };
        for _ in 0..clicks {
            send_inputs(&[mouse_input(down), mouse_input(up)])?;
        }
        Ok(())
    }

    fn send_text(&self, text: &str) -> PlatformResult<()> {
        let mut inputs = Vec::with_capacity(text.len() * 2);
        for unit in text.encode_utf16() {
            inputs.push(unicode_input(unit, KEYBD_EVENT_FLAGS(0)));
            inputs.push(unicode_input(unit, KEYEVENTF_KEYUP));
        }
        send_inputs(&inputs)
    }

    fn press_key(&self, key: &str) -> PlatformResult<()> {
        let vk = lookup_vk(key)
            .ok_or_else(|| PlatformError::Os(format!("unknown key: {key}")))?;
        send_inputs(&[
            key_input(vk, KEYBD_EVENT_FLAGS(0)),
            key_input(vk, KEYEVENTF_KEYUP),
        ])
    }

    fn hotkey(&self, keys: &[String]) -> PlatformResult<()> {
        let vks: Vec<VIRTUAL_KEY> = keys
            .iter()
            .map(|k| lookup_vk(k).ok_or_else(|| PlatformError::Os(format!("unknown key: {k}"))))
            .collect::<PlatformResult<_>>()?;
        let mut inputs = Vec::with_capacity(vks.len() * 2);
        for vk in &vks {
            inputs.push(key_input(*vk, KEYBD_EVENT_FLAGS(0)));
        }
        for vk in vks.iter().rev() {
            inputs.push(key_input(*vk, KEYEVENTF_KEYUP));
        }
        send_inputs(&inputs)
    }

    fn capture_screen(&self) -> PlatformResult<RasterImage> {
        unsafe {
            let x = GetSystemMetrics(SM_XVIRTUALSCREEN);
            let y = GetSystemMetrics(SM_YVIRTUALSCREEN);
            let width = GetSystemMetrics(SM_CXVIRTUALSCREEN);
            let height = GetSystemMetrics(SM_CYVIRTUALSCREEN);
            self.capture_dc_region(x, y, width, height)
        }
    }

    fn capture_window(&self, window: WindowId) -> PlatformResult<RasterImage> {
        let info = self.window_info(window)?;
        let width = info.bounds.width;
        let height = info.bounds.height;
        if width <= 0 || height <= 0 {
            return Err(PlatformError::Os("window has no visible area".to_string()));
        }
        let hwnd = HWND(window.0 as *mut _);
        unsafe {
            let window_dc = GetDC(hwnd);
            let mem_dc = CreateCompatibleDC(window_dc);
            let bitmap = CreateCompatibleBitmap(window_dc, width, height);
            let previous = SelectObject(mem_dc, bitmap);

            // PW_RENDERFULLCONTENT copies pixels even when the window is
            // occluded or on another virtual desktop.
            let printed = PrintWindow(
                hwnd,
                mem_dc,
                windows::Win32::UI::WindowsAndMessaging::PRINT_WINDOW_FLAGS(2),
            );

            let result = if printed.as_bool() {
                read_dib(mem_dc, bitmap, width, height)
            } else {
                Err(PlatformError::Os("PrintWindow failed".to_string()))
            };

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(hwnd, window_dc);
            result
        }
    }

    fn capture_region(&self, bounds: Bounds) -> PlatformResult<RasterImage> {
        self.capture_dc_region(bounds.x, bounds.y, bounds.width, bounds.height)
    }

    fn native_ocr_available(&self) -> bool {
        OcrEngine::AvailableRecognizerLanguages()
            .map(|langs| langs.Size().unwrap_or(0) > 0)
            .unwrap_or(false)
    }

    fn native_ocr_languages(&self) -> Vec<String> {
        let Ok(languages) = OcrEngine::AvailableRecognizerLanguages() else {
            return Vec::new();
        };
        let mut tags = Vec::new();
        let count = languages.Size().unwrap_or(0);
        for i in 0..count {
            if let Ok(lang) = languages.GetAt(i) {
                if let Ok(tag) = lang.LanguageTag() {
                    tags.push(tag.to_string());
                }
            }
        }
        tags
    }

    fn native_ocr(&self, image: &RasterImage, language: &str) -> PlatformResult<Vec<OcrWord>> {
        let language = Language::CreateLanguage(&HSTRING::from(language))
            .map_err(|e| os_err("CreateLanguage", e))?;
        let engine = OcrEngine::TryCreateFromLanguage(&language)
            .map_err(|e| os_err("OcrEngine::TryCreateFromLanguage", e))?;

        // RGBA → BGRA pixel buffer for SoftwareBitmap.
        let mut bgra = image.rgba.clone();
        for px in bgra.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        let writer = DataWriter::new().map_err(|e| os_err("DataWriter", e))?;
        writer
            .WriteBytes(&bgra)
            .map_err(|e| os_err("WriteBytes", e))?;
        let buffer = writer
            .DetachBuffer()
            .map_err(|e| os_err("DetachBuffer", e))?;
        let bitmap = SoftwareBitmap::CreateCopyFromBuffer(
            &buffer,
            BitmapPixelFormat::Bgra8,
            image.width as i32,
            image.height as i32,
        )
        .map_err(|e| os_err("SoftwareBitmap::CreateCopyFromBuffer", e))?;

        let operation: IAsyncOperation<windows::Media::Ocr::OcrResult> = engine
            .RecognizeAsync(&bitmap)
            .map_err(|e| os_err("RecognizeAsync", e))?;
        let result = operation.get().map_err(|e| os_err("OCR wait", e))?;

        let mut words = Vec::new();
        let lines = result.Lines().map_err(|e| os_err("Lines", e))?;
        let line_count = lines.Size().unwrap_or(0);
        for i in 0..line_count {
            let Ok(line) = lines.GetAt(i) else { continue };
            let Ok(line_words) = line.Words() else { continue };
            let word_count = line_words.Size().unwrap_or(0);
            for j in 0..word_count {
                let Ok(word) = line_words.GetAt(j) else { continue };
                let text = word.Text().map(|t| t.to_string()).unwrap_or_default();
                let rect = word.BoundingRect().unwrap_or_default();
                words.push(OcrWord {
                    text,
                    x: rect.X as i32,
                    y: rect.Y as i32,
                    width: rect.Width as i32,
                    height: rect.Height as i32,
                    confidence: None,
                });
            }
        }
        debug!("native OCR recognized {} words", words.len());
        Ok(words)
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.process_exe(pid).map(|exe| {
            std::path::Path::new(&exe)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or(exe)
        })
    }

    fn process_exe(&self, pid: u32) -> Option<String> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_INFORMATION, false, pid).ok()?;
            let mut buf = [0u16; 1024];
            let mut len = buf.len() as u32;
            let result = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
            );
            let _ = CloseHandle(handle);
            result.ok()?;
            Some(String::from_utf16_lossy(&buf[..len as usize]))
        }
    }

    fn process_cmdline(&self, _pid: u32) -> Option<String> {
        // Reading another process's command line needs an NT information
        // query; the framework detector treats a missing command line as
        // "no Electron hint".
        None
    }

    fn process_modules(&self, pid: u32) -> PlatformResult<Vec<String>> {
        unsafe {
            let handle: HANDLE =
                OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid)
                    .map_err(|e| os_err("OpenProcess", e))?;

            let mut modules = [windows::Win32::Foundation::HMODULE::default(); 1024];
            let mut needed = 0u32;
            let enumerated = K32EnumProcessModules(
                handle,
                modules.as_mut_ptr(),
                std::mem::size_of_val(&modules) as u32,
                &mut needed,
            );
            if !enumerated.as_bool() {
                let _ = CloseHandle(handle);
                return Err(PlatformError::Os("EnumProcessModules failed".to_string()));
            }

            let count =
                (needed as usize / std::mem::size_of::<windows::Win32::Foundation::HMODULE>())
                    .min(modules.len());
            let mut names = Vec::with_capacity(count);
            for module in modules.iter().take(count) {
                let mut buf = [0u16; 256];
                let len = K32GetModuleBaseNameW(handle, *module, &mut buf);
                if len > 0 {
                    names.push(String::from_utf16_lossy(&buf[..len as usize]).to_lowercase());
                }
            }
            let _ = CloseHandle(handle);
            Ok(names)
        }
    }

    fn clipboard_read(&self) -> PlatformResult<String> {
        const CF_UNICODETEXT: u32 = 13;
        unsafe {
            OpenClipboard(None).map_err(|e| os_err("OpenClipboard", e))?;
            let result = (|| {
                let handle = GetClipboardData(CF_UNICODETEXT)
                    .map_err(|e| os_err("GetClipboardData", e))?;
                let global = HGLOBAL(handle.0);
                let ptr = GlobalLock(global) as *const u16;
                if ptr.is_null() {
                    return Err(PlatformError::Os("GlobalLock failed".to_string()));
                }
                let mut len = 0usize;
                while *ptr.add(len) != 0 {
                    len += 1;
                }
                let text = String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len));
                let _ = GlobalUnlock(global);
                Ok(text)
            })();
            let _ = CloseClipboard();
            result
        }
    }

    fn clipboard_write(&self, text: &str) -> PlatformResult<()> {
        const CF_UNICODETEXT: u32 = 13;
        unsafe {
            OpenClipboard(None).map_err(|e| os_err("OpenClipboard", e))?;
            let result = (|| {
                EmptyClipboard().map_err(|e| os_err("EmptyClipboard", e))?;
                let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
                let bytes = wide.len() * 2;
                let global = GlobalAlloc(GMEM_MOVEABLE, bytes)
                    .map_err(|e| os_err("GlobalAlloc", e))?;
                let ptr = GlobalLock(global) as *mut u16;
                if ptr.is_null() {
                    return Err(PlatformError::Os("GlobalLock failed".to_string()));
                }
                std::ptr::copy_nonoverlapping(wide.as_ptr(), ptr, wide.len());
                let _ = GlobalUnlock(global);
                SetClipboardData(CF_UNICODETEXT, HANDLE(global.0))
                    .map_err(|e| os_err("SetClipboardData", e))?;
                Ok(())
            })();
            let _ = CloseClipboard();
            result
        }
    }
}
