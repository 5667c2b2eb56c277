//! Voice hot-key unit: a background worker that, when triggered,
//! records speech until silence (or a second trigger), transcribes it,
//! and types the text into whatever window was foreground at the
//! trigger. The kill switch is honored between capture chunks.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cpal::traits::DeviceTrait;
use cpal::traits::HostTrait;
use cpal::traits::StreamTrait;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::audio::rms;
use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Desktop;
use crate::safety::SafetyEngine;
use crate::speech::SpeechEngine;

/// Capture is chunked so the silence detector and the kill switch both
/// get a say twice a second.
const CHUNK: Duration = Duration::from_millis(500);

/// Trailing silence that ends a capture.
const SILENCE_STOP: Duration = Duration::from_secs(2);

/// Absolute cap on one voice capture.
const MAX_LISTEN: Duration = Duration::from_secs(60);

/// RMS floor below which a chunk counts as silence.
const SILENCE_RMS: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Idle,
    Recording,
    Transcribing,
}

impl VoiceState {
    fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Recording => "recording",
            VoiceState::Transcribing => "transcribing",
        }
    }
}

pub struct VoiceHotkey {
    desktop: Arc<dyn Desktop>,
    safety: Arc<SafetyEngine>,
    hotkey: String,
    state: Mutex<VoiceState>,
    stop_requested: AtomicBool,
    last_transcript: Mutex<Option<String>>,
    /// The overlay process watches this flag; the engine only flips it.
    overlay_visible: AtomicBool,
}

impl VoiceHotkey {
    pub fn new(desktop: Arc<dyn Desktop>, safety: Arc<SafetyEngine>, hotkey: String) -> Self {
        Self {
            desktop,
            safety,
            hotkey,
            state: Mutex::new(VoiceState::Idle),
            stop_requested: AtomicBool::new(false),
            last_transcript: Mutex::new(None),
            overlay_visible: AtomicBool::new(false),
        }
    }

    fn state(&self) -> VoiceState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(VoiceState::Idle)
    }

    fn set_state(&self, state: VoiceState) {
        if let Ok(mut slot) = self.state.lock() {
            *slot = state;
        }
    }

    pub fn status(&self) -> JsonValue {
        json!({
            "success": true,
            "hotkey": self.hotkey,
            "state": self.state().as_str(),
            "overlay_visible": self.overlay_visible.load(Ordering::Relaxed),
            "last_transcript": self
                .last_transcript
                .lock()
                .ok()
                .and_then(|t| t.clone()),
        })
    }

    pub fn set_overlay_visible(&self, visible: bool) {
        self.overlay_visible.store(visible, Ordering::Relaxed);
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible.load(Ordering::Relaxed)
    }

    /// Hot-key handler. First press starts a capture session; a second
    /// press while recording stops it early.
    pub async fn trigger(self: &Arc<Self>, speech: Arc<SpeechEngine>) -> Result<JsonValue> {
        match self.state() {
            VoiceState::Recording => {
                self.stop_requested.store(true, Ordering::Relaxed);
                return Ok(json!({"success": true, "action": "stop_requested"}));
            }
            VoiceState::Transcribing => {
                return Err(ToolError::invalid(
                    "a previous capture is still transcribing",
                ));
            }
            VoiceState::Idle => {}
        }

        // The text goes to the window that was focused when the user
        // pressed the key, even if focus wanders meanwhile.
        let target = self.desktop.foreground_window();
        info!(
            "voice capture triggered; target window: {:?}",
            target.as_ref().map(|w| w.title.clone()),
        );

        self.set_state(VoiceState::Recording);
        self.stop_requested.store(false, Ordering::Relaxed);

        let unit = Arc::clone(self);
        let samples = tokio::task::spawn_blocking(move || unit.record_until_silence()).await?;
        let samples = match samples {
            Ok(samples) => samples,
            Err(e) => {
                self.set_state(VoiceState::Idle);
                return Err(e);
            }
        };

        if self.safety.is_killed() {
            self.set_state(VoiceState::Idle);
            return Err(ToolError::external("kill switch active - capture discarded"));
        }

        self.set_state(VoiceState::Transcribing);
        let result = self.transcribe_and_type(speech, samples, target).await;
        self.set_state(VoiceState::Idle);
        result
    }

    /// Blocking capture loop: 0.5 s chunks, ending after two seconds of
    /// trailing silence, an explicit stop, the kill switch, or the cap.
    fn record_until_silence(&self) -> Result<Vec<f32>> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            ToolError::external("no microphone available")
                .with_hint("Check that a microphone is connected and enabled.")
        })?;
        let config = device
            .default_input_config()
            .map_err(|e| ToolError::external(format!("no usable microphone config: {e}")))?;

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(data);
                    }
                },
                |e| warn!("voice stream error: {e}"),
                None,
            )
            .map_err(|e| ToolError::external(format!("failed to open microphone: {e}")))?;
        stream
            .play()
            .map_err(|e| ToolError::external(format!("failed to start microphone: {e}")))?;

        let mut collected: Vec<f32> = Vec::new();
        let mut trailing_silence = Duration::ZERO;
        let mut heard_speech = false;
        let mut elapsed = Duration::ZERO;

        while elapsed < MAX_LISTEN {
            std::thread::sleep(CHUNK);
            elapsed += CHUNK;

            if self.safety.is_killed() {
                debug!("kill switch tripped mid-capture");
                break;
            }
            if self.stop_requested.load(Ordering::Relaxed) {
                debug!("voice capture stopped by second trigger");
                break;
            }

            let chunk: Vec<f32> = {
                let Ok(mut buffer) = buffer.lock() else { break };
                std::mem::take(&mut *buffer)
            };
            let level = rms(&chunk);
            collected.extend(chunk);

            if level < SILENCE_RMS {
                trailing_silence += CHUNK;
                if heard_speech && trailing_silence >= SILENCE_STOP {
                    debug!("trailing silence reached, stopping capture");
                    break;
                }
            } else {
                heard_speech = true;
                trailing_silence = Duration::ZERO;
            }
        }

        drop(stream);
        Ok(collected)
    }

    async fn transcribe_and_type(
        &self,
        speech: Arc<SpeechEngine>,
        samples: Vec<f32>,
        target: Option<crate::platform::WindowInfo>,
    ) -> Result<JsonValue> {
        if samples.is_empty() {
            return Ok(json!({
                "success": true,
                "text": "",
                "typed": false,
                "reason": "no audio captured",
            }));
        }

        // Stage the capture as a WAV for the recognizer.
        let dir = tempfile::tempdir()?;
        let wav = dir.path().join("voice.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav, spec)
            .map_err(|e| ToolError::external(format!("failed to stage capture: {e}")))?;
        for sample in &samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| ToolError::external(format!("failed to stage capture: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ToolError::external(format!("failed to stage capture: {e}")))?;

        let transcript = speech
            .transcribe(&wav.display().to_string(), "auto", "base")
            .await?;
        let text = transcript["text"].as_str().unwrap_or("").to_string();
        if let Ok(mut last) = self.last_transcript.lock() {
            *last = Some(text.clone());
        }

        let mut typed = false;
        if !text.is_empty() {
            if let Some(target) = target {
                if self.desktop.set_foreground(target.id)
                    || self.desktop.force_set_foreground(target.id)
                {
                    self.desktop.send_text(&text)?;
                    typed = true;
                }
            }
        }

        Ok(json!({
            "success": true,
            "text": text,
            "typed": typed,
            "language": transcript["language"],
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::Config;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;
    use std::sync::RwLock;

    fn unit() -> Arc<VoiceHotkey> {
        let sim = Arc::new(SimDesktop::new());
        let safety = Arc::new(SafetyEngine::new(Arc::new(RwLock::new(Config::default()))));
        Arc::new(VoiceHotkey::new(
            sim,
            safety,
            "ctrl+shift+space".to_string(),
        ))
    }

    #[test]
    fn status_reports_idle_initially() {
        let unit = unit();
        let status = unit.status();
        assert_eq!(status["state"], json!("idle"));
        assert_eq!(status["hotkey"], json!("ctrl+shift+space"));
        assert_eq!(status["overlay_visible"], json!(false));
    }

    #[test]
    fn overlay_flag_round_trips() {
        let unit = unit();
        unit.set_overlay_visible(true);
        assert!(unit.overlay_visible());
        assert_eq!(unit.status()["overlay_visible"], json!(true));
        unit.set_overlay_visible(false);
        assert!(!unit.overlay_visible());
    }
}
