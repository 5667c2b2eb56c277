//! The engine: one value owning every subsystem, plus the static
//! routing layer that maps a typed [`ToolRequest`] onto a tool body.
//! Gating, redaction, and focus preservation live in the dispatcher
//! that wraps [`Engine::execute`]; the bodies here assume the gate has
//! already said yes.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use serde_json::json;

use deskpilot_protocol::ToolRequest;

use crate::adaptive::AdaptiveRecorder;
use crate::audio::AudioCapture;
use crate::audio::CaptureSource;
use crate::background::BackgroundManager;
use crate::capture::CaptureSubsystem;
use crate::cdp::CdpManager;
use crate::config::Config;
use crate::error::Result;
use crate::error::ToolError;
use crate::focus::FocusGuard;
use crate::framework::FrameworkDetector;
use crate::input::InputDispatcher;
use crate::journal::ErrorJournal;
use crate::memory::MemoryStore;
use crate::ocr::OcrEngine;
use crate::platform::Desktop;
use crate::redact::OutputRedactor;
use crate::resolver::EscalatingResolver;
use crate::safety::SafetyEngine;
use crate::scheduler::TaskScheduler;
use crate::scraper::UrlScraper;
use crate::script::ScriptRunner;
use crate::speech::SpeechEngine;
use crate::system::SystemTools;
use crate::uia;
use crate::visual::VisualDiff;
use crate::voice::VoiceHotkey;
use crate::watcher::WatcherRegistry;
use crate::window::WindowManager;
use crate::workflow::WorkflowManager;

pub struct Engine {
    pub config: Arc<RwLock<Config>>,
    pub config_dir: PathBuf,
    pub desktop: Arc<dyn Desktop>,
    pub safety: Arc<SafetyEngine>,
    pub journal: Arc<ErrorJournal>,
    pub redactor: Arc<OutputRedactor>,
    pub focus: Arc<FocusGuard>,
    pub framework: Arc<FrameworkDetector>,
    pub capture: Arc<CaptureSubsystem>,
    pub ocr: Arc<OcrEngine>,
    pub input: Arc<InputDispatcher>,
    pub windows: Arc<WindowManager>,
    pub resolver: Arc<EscalatingResolver>,
    pub cdp: Arc<CdpManager>,
    pub watchers: Arc<WatcherRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub audio: Arc<AudioCapture>,
    pub speech: Arc<SpeechEngine>,
    pub voice: Arc<VoiceHotkey>,
    pub memory: Arc<MemoryStore>,
    pub workflows: Arc<WorkflowManager>,
    pub adaptive: Arc<AdaptiveRecorder>,
    pub background: Arc<BackgroundManager>,
    pub scripts: Arc<ScriptRunner>,
    pub scraper: Arc<UrlScraper>,
    pub system: Arc<SystemTools>,
    pub visual: Arc<VisualDiff>,
    pub waits: Arc<crate::wait::WaitTools>,
}

impl Engine {
    /// Wire every subsystem against a desktop backend and a config
    /// directory. The config is loaded (and defaulted) from disk here.
    pub fn new(config_dir: PathBuf, desktop: Arc<dyn Desktop>) -> Arc<Self> {
        let config = Arc::new(RwLock::new(Config::load(&config_dir)));
        let memory_dir = config_dir.join("memory");

        let safety = Arc::new(SafetyEngine::new(Arc::clone(&config)));
        let journal = Arc::new(ErrorJournal::new(memory_dir.clone()));
        let redactor = Arc::new(OutputRedactor::new(&config));
        let focus = Arc::new(FocusGuard::new(Arc::clone(&desktop)));
        let framework = Arc::new(FrameworkDetector::new(Arc::clone(&desktop)));
        let capture = Arc::new(CaptureSubsystem::new(Arc::clone(&desktop)));
        let ocr = Arc::new(OcrEngine::new(Arc::clone(&desktop)));
        let input = Arc::new(InputDispatcher::new(
            Arc::clone(&desktop),
            Arc::clone(&journal),
        ));
        let windows = Arc::new(WindowManager::new(Arc::clone(&desktop)));
        let resolver = Arc::new(EscalatingResolver::new(
            Arc::clone(&desktop),
            Arc::clone(&journal),
            Arc::clone(&framework),
        ));
        let scheduler = Arc::new(TaskScheduler::new(Arc::clone(&safety)));
        let audio = Arc::new(AudioCapture::new(config_dir.join("audio")));
        let speech = Arc::new(SpeechEngine::new(
            config_dir.join("models"),
            config_dir.join("audio"),
        ));
        let voice = Arc::new(VoiceHotkey::new(
            Arc::clone(&desktop),
            Arc::clone(&safety),
            "ctrl+shift+space".to_string(),
        ));
        let system = Arc::new(SystemTools::new(Arc::clone(&desktop)));
        let visual = Arc::new(VisualDiff::new(Arc::clone(&capture)));
        let waits = Arc::new(crate::wait::WaitTools::new(Arc::clone(&desktop)));

        Arc::new(Self {
            safety,
            journal,
            redactor,
            focus,
            framework,
            capture,
            ocr,
            input,
            windows,
            resolver,
            cdp: Arc::new(CdpManager::new()),
            watchers: Arc::new(WatcherRegistry::new()),
            scheduler,
            audio,
            speech,
            voice,
            memory: Arc::new(MemoryStore::new(memory_dir.clone())),
            workflows: Arc::new(WorkflowManager::new(config_dir.join("workflows"))),
            adaptive: Arc::new(AdaptiveRecorder::new(memory_dir)),
            background: Arc::new(BackgroundManager::new(Arc::clone(&desktop))),
            scripts: Arc::new(ScriptRunner::new()),
            scraper: Arc::new(UrlScraper::new()),
            system,
            visual,
            waits,
            config,
            config_dir,
            desktop,
        })
    }

    /// Route one approved request to its body. Blocking OS work runs on
    /// the worker pool; the caller owns gating and post-processing.
    pub async fn execute(self: &Arc<Self>, request: &ToolRequest) -> Result<JsonValue> {
        match request {
            // ── Accessibility / input / windows ──
            ToolRequest::GetUiTree(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || {
                    let window =
                        uia::resolve_window(engine.desktop.as_ref(), p.window_title.as_deref())?;
                    let depth = match p.max_depth {
                        Some(depth) => depth,
                        None => engine.framework.auto_tree_depth(window.pid),
                    };
                    let root = engine.desktop.root_element(window.id)?;
                    let tree =
                        uia::build_tree(engine.desktop.as_ref(), root, depth, p.include_invisible, 0)
                            .unwrap_or(json!({}));
                    Ok(json!({
                        "window": {
                            "title": window.title,
                            "position": {"x": window.bounds.x, "y": window.bounds.y},
                            "size": {"width": window.bounds.width, "height": window.bounds.height},
                            "process_id": window.pid,
                            "is_active": window.is_active,
                        },
                        "max_depth": depth,
                        "element_count": uia::count_elements(&tree),
                        "elements": tree,
                    }))
                })
                .await
            }
            ToolRequest::TakeScreenshot(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || {
                    engine
                        .capture
                        .screenshot_tool(p.window_title.as_deref(), p.region, p.quality)
                })
                .await
            }
            ToolRequest::Click(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.input.click(&p)).await
            }
            ToolRequest::TypeText(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.input.type_text(&p)).await
            }
            ToolRequest::PressKey(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.input.press_key(&p)).await
            }
            ToolRequest::Hotkey(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.input.hotkey(&p)).await
            }
            ToolRequest::ListWindows(p) => {
                let engine = Arc::clone(self);
                let include_minimized = p.include_minimized;
                blocking(move || engine.windows.list_windows(include_minimized)).await
            }
            ToolRequest::FocusWindow(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.windows.focus_window(&p.window_title)).await
            }
            ToolRequest::ManageWindow(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.windows.manage_window(&p)).await
            }

            // ── System ──
            ToolRequest::RunCommand(p) => {
                self.system.run_command(&p.command, p.shell, p.timeout).await
            }
            ToolRequest::OpenApplication(p) => {
                self.system
                    .open_application(p.app_name.as_deref(), p.app_path.as_deref())
                    .await
            }
            ToolRequest::Clipboard(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.system.clipboard(&p.action, p.text.as_deref())).await
            }
            ToolRequest::ClipboardHistory(p) => self.system.clipboard_history(p.limit),
            ToolRequest::SystemInfo => self.system.system_info(),

            // ── OCR / find ──
            ToolRequest::OcrRegion(p) => {
                self.ocr
                    .ocr_region_tool(
                        &self.capture,
                        p.window_title.as_deref(),
                        p.region,
                        p.language.as_deref(),
                    )
                    .await
            }
            ToolRequest::OcrLanguages => self.ocr.languages_tool().await,
            ToolRequest::SmartFind(p) => {
                self.resolver.smart_find(&self.capture, &self.ocr, p).await
            }
            ToolRequest::FindElements(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.resolver.find_elements_tool(&p)).await
            }
            ToolRequest::DetectAppFramework(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.framework.detect_tool(p.window_title.as_deref())).await
            }

            // ── Background mode ──
            ToolRequest::SetupBackgroundMode(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.background.setup(p.preferred_mode.as_deref())).await
            }
            ToolRequest::MoveToAgentScreen(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.background.move_to_agent_screen(&p.window_title)).await
            }
            ToolRequest::MoveToUserScreen(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.background.move_to_user_screen(&p.window_title)).await
            }
            ToolRequest::GetAgentScreenState => {
                let engine = Arc::clone(self);
                blocking(move || engine.background.agent_screen_state()).await
            }
            ToolRequest::SetAgentScreenOnly(p) => {
                let enabled = p.enabled;
                {
                    let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
                    config.automation.agent_screen_only = enabled;
                    if let Err(e) = config.save(&self.config_dir) {
                        return Err(ToolError::external(format!(
                            "failed to persist config: {e}"
                        )));
                    }
                }
                Ok(json!({"success": true, "agent_screen_only": enabled}))
            }

            // ── Audio / speech ──
            ToolRequest::CaptureSystemAudio(p) => {
                let engine = Arc::clone(self);
                let duration = std::time::Duration::from_secs(p.duration_seconds);
                blocking(move || engine.audio.capture(CaptureSource::System, duration)).await
            }
            ToolRequest::CaptureMicAudio(p) => {
                let engine = Arc::clone(self);
                let duration = std::time::Duration::from_secs(p.duration_seconds);
                blocking(move || engine.audio.capture(CaptureSource::Microphone, duration)).await
            }
            ToolRequest::TranscribeAudio(p) => {
                let language = self.effective_language(&p.language);
                self.speech
                    .transcribe(&p.audio_path, &language, &p.model_size)
                    .await
            }
            ToolRequest::DownloadWhisperModel(p) => self.speech.download_model(&p.model_size).await,
            ToolRequest::ListenForCommand(p) => {
                let engine = Arc::clone(self);
                let duration = std::time::Duration::from_secs(p.duration_seconds);
                let captured =
                    blocking(move || engine.audio.capture(CaptureSource::Microphone, duration))
                        .await?;
                let path = captured["path"]
                    .as_str()
                    .ok_or_else(|| ToolError::internal("capture returned no path"))?;
                let language = self.effective_language(&p.language);
                self.speech
                    .transcribe(path, &language, &p.model_size)
                    .await
            }
            ToolRequest::Speak(p) => {
                let language = self.effective_language(&p.language);
                self.speech
                    .speak(&p.text, p.voice.as_deref(), p.rate, &language)
                    .await
            }
            ToolRequest::SpeakAndListen(p) => {
                let language = self.effective_language(&p.language);
                self.speech
                    .speak(&p.text, None, None, &language)
                    .await?;
                let engine = Arc::clone(self);
                let duration = std::time::Duration::from_secs(p.listen_seconds);
                let captured =
                    blocking(move || engine.audio.capture(CaptureSource::Microphone, duration))
                        .await?;
                let path = captured["path"]
                    .as_str()
                    .ok_or_else(|| ToolError::internal("capture returned no path"))?;
                self.speech
                    .transcribe(path, &language, &p.model_size)
                    .await
            }

            // ── Devtools bridge ──
            ToolRequest::CdpDiscover(p) => self.cdp.discover(p.port_start, p.port_end).await,
            ToolRequest::CdpConnect(p) => self.cdp.connect(p.port).await,
            ToolRequest::CdpDisconnect(p) => self.cdp.disconnect(p.port).await,
            ToolRequest::CdpListConnections => self.cdp.list_connections().await,
            ToolRequest::CdpSend(p) => self.cdp.send(p.port, &p.method, p.params.clone()).await,
            ToolRequest::CdpClick(p) => self.cdp.click(p.port, p.x, p.y).await,
            ToolRequest::CdpTypeText(p) => self.cdp.type_text(p.port, &p.text).await,
            ToolRequest::CdpKeyCombo(p) => self.cdp.key_combo(p.port, &p.key, &p.modifiers).await,
            ToolRequest::CdpScreenshot(p) => self.cdp.screenshot(p.port, &p.format).await,
            ToolRequest::CdpEvaluate(p) => self.cdp.evaluate(p.port, &p.expression).await,
            ToolRequest::CdpGetDom(p) => self.cdp.get_dom(p.port, p.depth).await,
            ToolRequest::CdpClickSelector(p) => {
                self.cdp.click_selector(p.port, &p.css_selector).await
            }

            // ── Visual diff ──
            ToolRequest::VisualDiff(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.visual.snapshot(p.window_title.as_deref())).await
            }
            ToolRequest::VisualDiffCompare(p) => {
                let engine = Arc::clone(self);
                let p = p.clone();
                blocking(move || engine.visual.compare(&p.snapshot_id)).await
            }

            // ── Memory ──
            ToolRequest::MemorySave(p) => self.memory.save(&p.key, &p.value, &p.category),
            ToolRequest::MemoryRecall(p) => {
                self.memory.recall(p.key.as_deref(), p.category.as_deref())
            }
            ToolRequest::MemoryDelete(p) => self.memory.delete(&p.key, &p.category),
            ToolRequest::MemoryList => self.memory.list(),

            // ── Scraper / extensions ──
            ToolRequest::ScrapeUrl(p) => self.scraper.scrape(&p.url, &p.extract).await,
            ToolRequest::ListExtensions => self.extensions().list(),
            ToolRequest::InstallExtension(p) => self.extensions().install(&p.manifest),
            ToolRequest::UninstallExtension(p) => self.extensions().uninstall(&p.name),
            ToolRequest::AuditExtensions => self.extensions().audit(),

            // ── Watchers / scheduler ──
            ToolRequest::WatchFolder(p) => {
                self.watchers
                    .watch_folder(&p.path, p.events.clone(), p.recursive)
            }
            ToolRequest::UnwatchFolder(p) => self.watchers.unwatch_folder(&p.watch_id),
            ToolRequest::GetWatchEvents(p) => {
                self.watchers
                    .get_events(p.watch_id.as_deref(), p.limit, p.since.as_deref())
            }
            ToolRequest::ListWatchers => self.watchers.list_watchers(),
            ToolRequest::ScheduleTask(p) => self.scheduler.schedule(p),
            ToolRequest::ListScheduledTasks => self.scheduler.list(),
            ToolRequest::RemoveTask(p) => self.scheduler.remove(&p.task_name),
            ToolRequest::GetTaskHistory(p) => {
                self.scheduler.history(p.task_name.as_deref(), p.limit)
            }

            // ── Journal ──
            ToolRequest::GetErrorJournal(p) => self.journal.show(p.window.as_deref()),
            ToolRequest::ClearErrorJournal(p) => self.journal.clear(p.window.as_deref()),

            // ── Waits ──
            ToolRequest::WaitForElement(p) => {
                self.waits
                    .wait_for_element(&p.element_name, p.window_title.as_deref(), p.timeout)
                    .await
            }
            ToolRequest::WaitForText(p) => {
                self.waits
                    .wait_for_text(
                        &self.capture,
                        &self.ocr,
                        &p.text,
                        p.window_title.as_deref(),
                        p.timeout,
                    )
                    .await
            }
            ToolRequest::WaitForWindow(p) => {
                self.waits.wait_for_window(&p.window_title, p.timeout).await
            }
            ToolRequest::WaitForIdle(p) => {
                self.waits
                    .wait_for_idle(&self.capture, p.window_title.as_deref(), p.timeout)
                    .await
            }

            // ── Voice ──
            ToolRequest::VoiceOverlay(p) => match p.action.as_str() {
                "show" => {
                    self.voice.set_overlay_visible(true);
                    Ok(json!({"success": true, "overlay": "shown"}))
                }
                "hide" => {
                    self.voice.set_overlay_visible(false);
                    Ok(json!({"success": true, "overlay": "hidden"}))
                }
                other => Err(ToolError::invalid(format!(
                    "Unknown overlay action '{other}'"
                ))
                .with_hint("Valid actions: show, hide")),
            },
            ToolRequest::VoiceHotkeyStatus => Ok(self.voice.status()),

            // ── Meta / safety ──
            ToolRequest::GetCapabilities => Ok(capabilities()),
            ToolRequest::GetVersion => Ok(json!({
                "success": true,
                "name": "deskpilot",
                "version": env!("CARGO_PKG_VERSION"),
            })),
            ToolRequest::GetDiagnostics => Ok(self.diagnostics().await),
            ToolRequest::GetInspiration => Ok(inspiration()),
            ToolRequest::KillSwitch(p) => self.kill_switch_tool(&p.action),
            ToolRequest::GetActionLog(p) => {
                let records = self.safety.action_log(p.last_n);
                Ok(json!({
                    "success": true,
                    "entries": records,
                    "count": records.len(),
                }))
            }
            ToolRequest::RestoreUserFocus => {
                let engine = Arc::clone(self);
                blocking(move || Ok(engine.focus.restore_tool())).await
            }

            // ── Workflows / adaptive ──
            ToolRequest::WorkflowRecord(p) => self.workflows.start_recording(&p.name),
            ToolRequest::WorkflowStop => self.workflows.stop_recording(),
            ToolRequest::WorkflowRun(p) => {
                let engine = Arc::clone(self);
                let step_runner = move |tool: String, params: JsonValue| {
                    engine.dispatch_step(&tool, params)
                };
                self.workflows.run(&p.name, &self.safety, &step_runner).await
            }
            ToolRequest::WorkflowList => self.workflows.list(),
            ToolRequest::WorkflowDelete(p) => self.workflows.delete(&p.name),
            ToolRequest::GetSuggestions => self.adaptive.suggestions(),
            ToolRequest::AcceptSuggestion(p) => self.adaptive.accept(&p.pattern_id),
            ToolRequest::DismissSuggestion(p) => self.adaptive.dismiss(&p.pattern_id),

            // ── Sandboxed app scripting ──
            ToolRequest::RunAppScript(p) => {
                self.scripts
                    .run(&p.app_name, &p.script, p.timeout, p.visible)
                    .await
            }
        }
    }

    /// Workflow replay entry: parse and execute one recorded step,
    /// converting every failure into the `{error}` result shape.
    ///
    /// Returns an explicitly boxed future (rather than `async fn`) so the
    /// compiler doesn't need to prove `Send` for a self-referential opaque
    /// type: this method awaits `execute`, which in turn boxes this same
    /// method's future for `WorkflowRun`.
    fn dispatch_step(
        self: &Arc<Self>,
        tool: &str,
        params: JsonValue,
    ) -> Pin<Box<dyn Future<Output = JsonValue> + Send>> {
        let engine = Arc::clone(self);
        let tool = tool.to_string();
        Box::pin(async move {
            match ToolRequest::parse(&tool, params) {
                Ok(request) => match engine.execute(&request).await {
                    Ok(value) => value,
                    Err(e) => e.to_value(),
                },
                Err(e) => json!({"error": e.to_string()}),
            }
        })
    }

    fn extensions(&self) -> crate::extensions::ExtensionRegistry {
        crate::extensions::ExtensionRegistry::new(self.config_dir.join("extensions"))
    }

    /// A call's own language parameter wins; "auto" falls back to the
    /// configured default, and a configured "auto" keeps detection on.
    fn effective_language(&self, requested: &str) -> String {
        if !requested.is_empty() && requested != "auto" {
            return requested.to_string();
        }
        let configured = self
            .config
            .read()
            .map(|c| c.language.clone())
            .unwrap_or_default();
        match configured.as_str() {
            "" | "auto" => "auto".to_string(),
            other => other.to_string(),
        }
    }

    /// Kill-switch management: the single tool that is always
    /// permitted, and the dispatcher's direct entry for it.
    pub fn kill_switch_tool(&self, action: &str) -> Result<JsonValue> {
        match action {
            "activate" => {
                self.safety.activate_kill();
                self.scheduler.stop_all();
                self.watchers.stop_all();
                Ok(json!({
                    "success": true,
                    "kill_switch": "activated",
                    "message": "All automation has been stopped. Use kill_switch(action='reset') to resume.",
                }))
            }
            "reset" => {
                self.safety.reset_kill();
                Ok(json!({
                    "success": true,
                    "kill_switch": "reset",
                    "message": "Automation can resume.",
                }))
            }
            "status" => Ok(self.safety.status()),
            other => Err(ToolError::invalid(format!(
                "Unknown kill_switch action '{other}'"
            ))
            .with_hint("Valid actions: activate, reset, status")),
        }
    }

    async fn diagnostics(&self) -> JsonValue {
        json!({
            "success": true,
            "kill_switch_active": self.safety.is_killed(),
            "redactions_total": self.redactor.total_redactions(),
            "journal_entries": self.journal.len(),
            "watchers_active": self.watchers.active_count(),
            "tasks_active": self.scheduler.active_count(),
            "cdp_connections": self.cdp.connection_count().await,
            "workflow_recording": self.workflows.is_recording(),
            "adaptive_actions_buffered": self.adaptive.actions_recorded(),
            "background_mode_active": self.background.is_active(),
        })
    }
}

/// Run a blocking tool body on the worker pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn capabilities() -> JsonValue {
    json!({
        "success": true,
        "groups": {
            "accessibility": ["get_ui_tree", "find_elements", "smart_find", "detect_app_framework"],
            "input": ["click", "type_text", "press_key", "hotkey"],
            "windows": ["list_windows", "focus_window", "manage_window"],
            "capture": ["take_screenshot", "ocr_region", "ocr_languages", "visual_diff", "visual_diff_compare"],
            "system": ["run_command", "open_application", "clipboard", "clipboard_history", "system_info", "scrape_url"],
            "background": ["setup_background_mode", "move_to_agent_screen", "move_to_user_screen", "get_agent_screen_state", "set_agent_screen_only"],
            "audio": ["capture_mic_audio", "capture_system_audio", "transcribe_audio", "download_whisper_model", "listen_for_command", "speak", "speak_and_listen"],
            "devtools": ["cdp_discover", "cdp_connect", "cdp_disconnect", "cdp_list_connections", "cdp_send", "cdp_click", "cdp_type_text", "cdp_key_combo", "cdp_screenshot", "cdp_evaluate", "cdp_get_dom", "cdp_click_selector"],
            "memory": ["memory_save", "memory_recall", "memory_delete", "memory_list"],
            "watchers": ["watch_folder", "unwatch_folder", "get_watch_events", "list_watchers"],
            "scheduler": ["schedule_task", "list_scheduled_tasks", "remove_task", "get_task_history"],
            "workflows": ["workflow_record", "workflow_stop", "workflow_run", "workflow_list", "workflow_delete"],
            "adaptive": ["get_suggestions", "accept_suggestion", "dismiss_suggestion"],
            "journal": ["get_error_journal", "clear_error_journal"],
            "waits": ["wait_for_element", "wait_for_text", "wait_for_window", "wait_for_idle"],
            "extensions": ["list_extensions", "install_extension", "uninstall_extension", "audit_extensions"],
            "voice": ["voice_overlay", "voice_hotkey_status"],
            "scripting": ["run_app_script"],
            "safety": ["kill_switch", "get_action_log", "restore_user_focus"],
            "meta": ["get_capabilities", "get_version", "get_diagnostics", "get_inspiration"],
        },
    })
}

fn inspiration() -> JsonValue {
    json!({
        "success": true,
        "suggestions": [
            "Use get_ui_tree before clicking - the accessibility tree is faster and cheaper than a screenshot.",
            "smart_find escalates UIA -> OCR -> screenshot and remembers which method works per app.",
            "Electron apps automate best over the devtools bridge; run detect_app_framework to check.",
            "Record a workflow once with workflow_record, then replay it with workflow_run.",
            "watch_folder plus get_watch_events turns file drops into triggers.",
            "setup_background_mode keeps automation off the user's screen entirely.",
        ],
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn engine_with_language(language: &str) -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.language = language.to_string();
        config.save(dir.path()).unwrap();
        let engine = Engine::new(dir.path().to_path_buf(), Arc::new(SimDesktop::new()));
        (dir, engine)
    }

    #[test]
    fn configured_language_backs_auto_requests() {
        let (_dir, engine) = engine_with_language("es");
        assert_eq!(engine.effective_language("auto"), "es");
        assert_eq!(engine.effective_language(""), "es");
        // An explicit per-call language always wins.
        assert_eq!(engine.effective_language("en"), "en");
    }

    #[test]
    fn configured_auto_keeps_detection_on() {
        let (_dir, engine) = engine_with_language("auto");
        assert_eq!(engine.effective_language("auto"), "auto");
    }
}

