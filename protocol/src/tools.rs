//! Typed tool-call surface.
//!
//! Every recognized tool has a parameter struct with explicit serde
//! defaults; [`ToolRequest::parse`] converts the wire-level
//! `(tool, params)` pair into the tagged variant the dispatcher routes on.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::ShellKind;

fn default_true() -> bool {
    true
}

fn default_quality() -> u8 {
    85
}

fn default_times() -> u32 {
    1
}

fn default_command_timeout() -> u64 {
    30
}

fn default_script_timeout() -> u64 {
    30
}

fn default_capture_seconds() -> u64 {
    10
}

fn default_model_size() -> String {
    "base".to_string()
}

fn default_language_auto() -> String {
    "auto".to_string()
}

fn default_port_start() -> u16 {
    9222
}

fn default_port_end() -> u16 {
    9250
}

fn default_png() -> String {
    "png".to_string()
}

fn default_dom_depth() -> i32 {
    -1
}

fn default_category() -> String {
    "general".to_string()
}

fn default_event_limit() -> usize {
    50
}

fn default_history_limit() -> usize {
    20
}

fn default_log_limit() -> usize {
    50
}

fn default_schedule_interval() -> u64 {
    300
}

fn default_wait_timeout() -> u64 {
    10
}

fn default_extract() -> String {
    "text".to_string()
}

fn default_clipboard_action() -> String {
    "read".to_string()
}

fn default_kill_action() -> String {
    "status".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct UiTreeParams {
    #[serde(default)]
    pub window_title: Option<String>,
    /// `None` selects a framework-aware depth.
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub include_invisible: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ScreenshotParams {
    #[serde(default)]
    pub window_title: Option<String>,
    /// `[x, y, width, height]` in screen coordinates.
    #[serde(default)]
    pub region: Option<[i32; 4]>,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ClickParams {
    #[serde(default)]
    pub element_name: Option<String>,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub button: Option<String>,
    #[serde(default)]
    pub double_click: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TypeTextParams {
    pub text: String,
    #[serde(default)]
    pub element_name: Option<String>,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default = "default_true")]
    pub use_silent: bool,
    #[serde(default)]
    pub clear_first: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PressKeyParams {
    pub key: String,
    #[serde(default = "default_times")]
    pub times: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct HotkeyParams {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListWindowsParams {
    #[serde(default = "default_true")]
    pub include_minimized: bool,
}

impl Default for ListWindowsParams {
    fn default() -> Self {
        Self {
            include_minimized: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct FocusWindowParams {
    pub window_title: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ManageWindowParams {
    pub window_title: String,
    /// minimize | maximize | restore | close | move | resize
    pub action: String,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RunCommandParams {
    pub command: String,
    #[serde(default)]
    pub shell: ShellKind,
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OpenApplicationParams {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub app_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClipboardParams {
    /// read | write
    #[serde(default = "default_clipboard_action")]
    pub action: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl Default for ClipboardParams {
    fn default() -> Self {
        Self {
            action: default_clipboard_action(),
            text: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClipboardHistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for ClipboardHistoryParams {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OcrRegionParams {
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default)]
    pub region: Option<[i32; 4]>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SmartFindParams {
    pub target: String,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default)]
    pub click_if_found: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct FindElementsParams {
    pub query: String,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default)]
    pub control_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct DetectFrameworkParams {
    #[serde(default)]
    pub window_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SetupBackgroundParams {
    /// dual_monitor | offscreen; auto-detected when omitted.
    #[serde(default)]
    pub preferred_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MoveWindowScreenParams {
    pub window_title: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentScreenOnlyParams {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CaptureAudioParams {
    #[serde(default = "default_capture_seconds")]
    pub duration_seconds: u64,
}

impl Default for CaptureAudioParams {
    fn default() -> Self {
        Self {
            duration_seconds: default_capture_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TranscribeParams {
    pub audio_path: String,
    #[serde(default = "default_language_auto")]
    pub language: String,
    #[serde(default = "default_model_size")]
    pub model_size: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DownloadModelParams {
    #[serde(default = "default_model_size")]
    pub model_size: String,
}

impl Default for DownloadModelParams {
    fn default() -> Self {
        Self {
            model_size: default_model_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListenParams {
    #[serde(default = "default_capture_seconds")]
    pub duration_seconds: u64,
    #[serde(default = "default_language_auto")]
    pub language: String,
    #[serde(default = "default_model_size")]
    pub model_size: String,
}

impl Default for ListenParams {
    fn default() -> Self {
        Self {
            duration_seconds: default_capture_seconds(),
            language: default_language_auto(),
            model_size: default_model_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SpeakParams {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub rate: Option<f32>,
    #[serde(default = "default_language_auto")]
    pub language: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SpeakAndListenParams {
    pub text: String,
    #[serde(default = "default_capture_seconds")]
    pub listen_seconds: u64,
    #[serde(default = "default_language_auto")]
    pub language: String,
    #[serde(default = "default_model_size")]
    pub model_size: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CdpDiscoverParams {
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

impl Default for CdpDiscoverParams {
    fn default() -> Self {
        Self {
            port_start: default_port_start(),
            port_end: default_port_end(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpPortParams {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpSendParams {
    pub port: u16,
    pub method: String,
    #[serde(default)]
    pub params: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpClickParams {
    pub port: u16,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpTypeParams {
    pub port: u16,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpKeyParams {
    pub port: u16,
    pub key: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CdpScreenshotParams {
    pub port: u16,
    #[serde(default = "default_png")]
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpEvaluateParams {
    pub port: u16,
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CdpGetDomParams {
    pub port: u16,
    #[serde(default = "default_dom_depth")]
    pub depth: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CdpSelectorParams {
    pub port: u16,
    pub css_selector: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct VisualDiffParams {
    #[serde(default)]
    pub window_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct VisualDiffCompareParams {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MemorySaveParams {
    pub key: String,
    pub value: String,
    #[serde(default = "default_category")]
    pub category: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MemoryRecallParams {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MemoryDeleteParams {
    pub key: String,
    #[serde(default = "default_category")]
    pub category: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScrapeUrlParams {
    pub url: String,
    /// text | links | tables | html
    #[serde(default = "default_extract")]
    pub extract: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct InstallExtensionParams {
    pub manifest: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct UninstallExtensionParams {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct WatchFolderParams {
    pub path: String,
    /// created | modified | deleted | moved; all four when omitted.
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct UnwatchFolderParams {
    pub watch_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WatchEventsParams {
    #[serde(default)]
    pub watch_id: Option<String>,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
    /// RFC 3339 timestamp; only newer events are returned.
    #[serde(default)]
    pub since: Option<String>,
}

impl Default for WatchEventsParams {
    fn default() -> Self {
        Self {
            watch_id: None,
            limit: default_event_limit(),
            since: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScheduleTaskParams {
    pub name: String,
    pub command: String,
    #[serde(default = "default_schedule_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub shell: ShellKind,
    #[serde(default)]
    pub max_runs: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoveTaskParams {
    pub task_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TaskHistoryParams {
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for TaskHistoryParams {
    fn default() -> Self {
        Self {
            task_name: None,
            limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct JournalParams {
    #[serde(default)]
    pub window: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WaitForElementParams {
    pub element_name: String,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WaitForTextParams {
    pub text: String,
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WaitForWindowParams {
    pub window_title: String,
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WaitForIdleParams {
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct VoiceOverlayParams {
    /// show | hide
    pub action: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KillSwitchParams {
    /// activate | reset | status
    #[serde(default = "default_kill_action")]
    pub action: String,
}

impl Default for KillSwitchParams {
    fn default() -> Self {
        Self {
            action: default_kill_action(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionLogParams {
    #[serde(default = "default_log_limit")]
    pub last_n: usize,
}

impl Default for ActionLogParams {
    fn default() -> Self {
        Self {
            last_n: default_log_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct WorkflowNameParams {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PatternIdParams {
    pub pattern_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunAppScriptParams {
    pub app_name: String,
    pub script: String,
    #[serde(default = "default_script_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub visible: bool,
}

/// The complete tool surface, routed statically by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum ToolRequest {
    GetUiTree(UiTreeParams),
    TakeScreenshot(ScreenshotParams),
    Click(ClickParams),
    TypeText(TypeTextParams),
    PressKey(PressKeyParams),
    Hotkey(HotkeyParams),
    ListWindows(ListWindowsParams),
    FocusWindow(FocusWindowParams),
    ManageWindow(ManageWindowParams),
    RunCommand(RunCommandParams),
    OpenApplication(OpenApplicationParams),
    Clipboard(ClipboardParams),
    ClipboardHistory(ClipboardHistoryParams),
    SystemInfo,
    OcrRegion(OcrRegionParams),
    OcrLanguages,
    SmartFind(SmartFindParams),
    FindElements(FindElementsParams),
    DetectAppFramework(DetectFrameworkParams),
    SetupBackgroundMode(SetupBackgroundParams),
    MoveToAgentScreen(MoveWindowScreenParams),
    MoveToUserScreen(MoveWindowScreenParams),
    GetAgentScreenState,
    SetAgentScreenOnly(AgentScreenOnlyParams),
    CaptureSystemAudio(CaptureAudioParams),
    CaptureMicAudio(CaptureAudioParams),
    TranscribeAudio(TranscribeParams),
    DownloadWhisperModel(DownloadModelParams),
    ListenForCommand(ListenParams),
    Speak(SpeakParams),
    SpeakAndListen(SpeakAndListenParams),
    CdpDiscover(CdpDiscoverParams),
    CdpConnect(CdpPortParams),
    CdpDisconnect(CdpPortParams),
    CdpListConnections,
    CdpSend(CdpSendParams),
    CdpClick(CdpClickParams),
    CdpTypeText(CdpTypeParams),
    CdpKeyCombo(CdpKeyParams),
    CdpScreenshot(CdpScreenshotParams),
    CdpEvaluate(CdpEvaluateParams),
    CdpGetDom(CdpGetDomParams),
    CdpClickSelector(CdpSelectorParams),
    VisualDiff(VisualDiffParams),
    VisualDiffCompare(VisualDiffCompareParams),
    MemorySave(MemorySaveParams),
    MemoryRecall(MemoryRecallParams),
    MemoryDelete(MemoryDeleteParams),
    MemoryList,
    ScrapeUrl(ScrapeUrlParams),
    ListExtensions,
    InstallExtension(InstallExtensionParams),
    UninstallExtension(UninstallExtensionParams),
    AuditExtensions,
    WatchFolder(WatchFolderParams),
    UnwatchFolder(UnwatchFolderParams),
    GetWatchEvents(WatchEventsParams),
    ListWatchers,
    ScheduleTask(ScheduleTaskParams),
    ListScheduledTasks,
    RemoveTask(RemoveTaskParams),
    GetTaskHistory(TaskHistoryParams),
    GetErrorJournal(JournalParams),
    ClearErrorJournal(JournalParams),
    WaitForElement(WaitForElementParams),
    WaitForText(WaitForTextParams),
    WaitForWindow(WaitForWindowParams),
    WaitForIdle(WaitForIdleParams),
    VoiceOverlay(VoiceOverlayParams),
    VoiceHotkeyStatus,
    GetCapabilities,
    GetVersion,
    GetDiagnostics,
    GetInspiration,
    KillSwitch(KillSwitchParams),
    GetActionLog(ActionLogParams),
    RestoreUserFocus,
    WorkflowRecord(WorkflowNameParams),
    WorkflowStop,
    WorkflowRun(WorkflowNameParams),
    WorkflowList,
    WorkflowDelete(WorkflowNameParams),
    GetSuggestions,
    AcceptSuggestion(PatternIdParams),
    DismissSuggestion(PatternIdParams),
    RunAppScript(RunAppScriptParams),
}

/// Error produced when a wire request cannot be mapped onto [`ToolRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnknownTool(String),
    InvalidParams { tool: String, message: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            ParseError::InvalidParams { tool, message } => {
                write!(f, "invalid parameters for {tool}: {message}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

macro_rules! tool_table {
    ( $( $name:literal => $variant:ident $( ( $params:ty ) )? ),+ $(,)? ) => {
        impl ToolRequest {
            /// Map a wire-level `(tool, params)` pair to a typed request.
            pub fn parse(tool: &str, params: JsonValue) -> Result<Self, ParseError> {
                // Tools with all-default parameters accept a missing mapping.
                let params = if params.is_null() {
                    JsonValue::Object(serde_json::Map::new())
                } else {
                    params
                };
                match tool {
                    $(
                        $name => tool_table!(@build tool, params, $variant $( ( $params ) )?),
                    )+
                    other => Err(ParseError::UnknownTool(other.to_string())),
                }
            }

            /// The wire name of this tool; part of the public contract.
            pub fn name(&self) -> &'static str {
                match self {
                    $(
                        tool_table!(@pattern $variant $( ( $params ) )?) => $name,
                    )+
                }
            }
        }
    };
    (@build $tool:ident, $params:ident, $variant:ident ( $ty:ty )) => {
        serde_json::from_value::<$ty>($params)
            .map(ToolRequest::$variant)
            .map_err(|e| ParseError::InvalidParams {
                tool: $tool.to_string(),
                message: e.to_string(),
            })
    };
    (@build $tool:ident, $params:ident, $variant:ident) => {{
        let _ = $params;
        Ok(ToolRequest::$variant)
    }};
    (@pattern $variant:ident ( $ty:ty )) => {
        ToolRequest::$variant(_)
    };
    (@pattern $variant:ident) => {
        ToolRequest::$variant
    };
}

tool_table! {
    "get_ui_tree" => GetUiTree(UiTreeParams),
    "take_screenshot" => TakeScreenshot(ScreenshotParams),
    "click" => Click(ClickParams),
    "type_text" => TypeText(TypeTextParams),
    "press_key" => PressKey(PressKeyParams),
    "hotkey" => Hotkey(HotkeyParams),
    "list_windows" => ListWindows(ListWindowsParams),
    "focus_window" => FocusWindow(FocusWindowParams),
    "manage_window" => ManageWindow(ManageWindowParams),
    "run_command" => RunCommand(RunCommandParams),
    "open_application" => OpenApplication(OpenApplicationParams),
    "clipboard" => Clipboard(ClipboardParams),
    "clipboard_history" => ClipboardHistory(ClipboardHistoryParams),
    "system_info" => SystemInfo,
    "ocr_region" => OcrRegion(OcrRegionParams),
    "ocr_languages" => OcrLanguages,
    "smart_find" => SmartFind(SmartFindParams),
    "find_elements" => FindElements(FindElementsParams),
    "detect_app_framework" => DetectAppFramework(DetectFrameworkParams),
    "setup_background_mode" => SetupBackgroundMode(SetupBackgroundParams),
    "move_to_agent_screen" => MoveToAgentScreen(MoveWindowScreenParams),
    "move_to_user_screen" => MoveToUserScreen(MoveWindowScreenParams),
    "get_agent_screen_state" => GetAgentScreenState,
    "set_agent_screen_only" => SetAgentScreenOnly(AgentScreenOnlyParams),
    "capture_system_audio" => CaptureSystemAudio(CaptureAudioParams),
    "capture_mic_audio" => CaptureMicAudio(CaptureAudioParams),
    "transcribe_audio" => TranscribeAudio(TranscribeParams),
    "download_whisper_model" => DownloadWhisperModel(DownloadModelParams),
    "listen_for_command" => ListenForCommand(ListenParams),
    "speak" => Speak(SpeakParams),
    "speak_and_listen" => SpeakAndListen(SpeakAndListenParams),
    "cdp_discover" => CdpDiscover(CdpDiscoverParams),
    "cdp_connect" => CdpConnect(CdpPortParams),
    "cdp_disconnect" => CdpDisconnect(CdpPortParams),
    "cdp_list_connections" => CdpListConnections,
    "cdp_send" => CdpSend(CdpSendParams),
    "cdp_click" => CdpClick(CdpClickParams),
    "cdp_type_text" => CdpTypeText(CdpTypeParams),
    "cdp_key_combo" => CdpKeyCombo(CdpKeyParams),
    "cdp_screenshot" => CdpScreenshot(CdpScreenshotParams),
    "cdp_evaluate" => CdpEvaluate(CdpEvaluateParams),
    "cdp_get_dom" => CdpGetDom(CdpGetDomParams),
    "cdp_click_selector" => CdpClickSelector(CdpSelectorParams),
    "visual_diff" => VisualDiff(VisualDiffParams),
    "visual_diff_compare" => VisualDiffCompare(VisualDiffCompareParams),
    "memory_save" => MemorySave(MemorySaveParams),
    "memory_recall" => MemoryRecall(MemoryRecallParams),
    "memory_delete" => MemoryDelete(MemoryDeleteParams),
    "memory_list" => MemoryList,
    "scrape_url" => ScrapeUrl(ScrapeUrlParams),
    "list_extensions" => ListExtensions,
    "install_extension" => InstallExtension(InstallExtensionParams),
    "uninstall_extension" => UninstallExtension(UninstallExtensionParams),
    "audit_extensions" => AuditExtensions,
    "watch_folder" => WatchFolder(WatchFolderParams),
    "unwatch_folder" => UnwatchFolder(UnwatchFolderParams),
    "get_watch_events" => GetWatchEvents(WatchEventsParams),
    "list_watchers" => ListWatchers,
    "schedule_task" => ScheduleTask(ScheduleTaskParams),
    "list_scheduled_tasks" => ListScheduledTasks,
    "remove_task" => RemoveTask(RemoveTaskParams),
    "get_task_history" => GetTaskHistory(TaskHistoryParams),
    "get_error_journal" => GetErrorJournal(JournalParams),
    "clear_error_journal" => ClearErrorJournal(JournalParams),
    "wait_for_element" => WaitForElement(WaitForElementParams),
    "wait_for_text" => WaitForText(WaitForTextParams),
    "wait_for_window" => WaitForWindow(WaitForWindowParams),
    "wait_for_idle" => WaitForIdle(WaitForIdleParams),
    "voice_overlay" => VoiceOverlay(VoiceOverlayParams),
    "voice_hotkey_status" => VoiceHotkeyStatus,
    "get_capabilities" => GetCapabilities,
    "get_version" => GetVersion,
    "get_diagnostics" => GetDiagnostics,
    "get_inspiration" => GetInspiration,
    "kill_switch" => KillSwitch(KillSwitchParams),
    "get_action_log" => GetActionLog(ActionLogParams),
    "restore_user_focus" => RestoreUserFocus,
    "workflow_record" => WorkflowRecord(WorkflowNameParams),
    "workflow_stop" => WorkflowStop,
    "workflow_run" => WorkflowRun(WorkflowNameParams),
    "workflow_list" => WorkflowList,
    "workflow_delete" => WorkflowDelete(WorkflowNameParams),
    "get_suggestions" => GetSuggestions,
    "accept_suggestion" => AcceptSuggestion(PatternIdParams),
    "dismiss_suggestion" => DismissSuggestion(PatternIdParams),
    "run_app_script" => RunAppScript(RunAppScriptParams),
}

impl ToolRequest {
    /// Meta tools are never recorded into workflows or the adaptive buffer.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            ToolRequest::KillSwitch(_)
                | ToolRequest::GetActionLog(_)
                | ToolRequest::WorkflowRecord(_)
                | ToolRequest::WorkflowStop
                | ToolRequest::WorkflowRun(_)
                | ToolRequest::WorkflowList
                | ToolRequest::WorkflowDelete(_)
                | ToolRequest::GetSuggestions
                | ToolRequest::AcceptSuggestion(_)
                | ToolRequest::DismissSuggestion(_)
                | ToolRequest::GetCapabilities
                | ToolRequest::GetVersion
                | ToolRequest::GetDiagnostics
                | ToolRequest::GetInspiration
        )
    }

    /// Tools that intentionally change or restore focus themselves; the
    /// dispatcher must not wrap them in the focus guard.
    pub fn manages_focus(&self) -> bool {
        matches!(
            self,
            ToolRequest::KillSwitch(_) | ToolRequest::FocusWindow(_) | ToolRequest::RestoreUserFocus
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_typed_params_with_defaults() {
        let req = ToolRequest::parse("take_screenshot", json!({"window_title": "Notepad"}))
            .unwrap();
        match req {
            ToolRequest::TakeScreenshot(p) => {
                assert_eq!(p.window_title.as_deref(), Some("Notepad"));
                assert_eq!(p.quality, 85);
                assert_eq!(p.region, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn null_params_parse_as_empty_mapping() {
        let req = ToolRequest::parse("kill_switch", JsonValue::Null).unwrap();
        assert_eq!(req, ToolRequest::KillSwitch(KillSwitchParams::default()));
        assert_eq!(req.name(), "kill_switch");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = ToolRequest::parse("frobnicate", JsonValue::Null).unwrap_err();
        assert_eq!(err, ParseError::UnknownTool("frobnicate".to_string()));
    }

    #[test]
    fn missing_required_param_is_an_error() {
        let err = ToolRequest::parse("type_text", json!({})).unwrap_err();
        match err {
            ParseError::InvalidParams { tool, .. } => assert_eq!(tool, "type_text"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn workflow_tools_are_meta() {
        let req = ToolRequest::parse("workflow_list", JsonValue::Null).unwrap();
        assert!(req.is_meta());
        let req = ToolRequest::parse("click", json!({"x": 1, "y": 2})).unwrap();
        assert!(!req.is_meta());
    }
}
