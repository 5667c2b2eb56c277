//! Speech-to-text and text-to-speech.
//!
//! Transcription runs a quantized recognizer model through an external
//! whisper.cpp-style binary; models are fetched on demand into the
//! config directory and cached across calls. Speech synthesis prefers
//! an online neural voice (MP3, played locally) and falls back to the
//! OS synthesizer.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use deskpilot_protocol::ShellKind;

use crate::error::Result;
use crate::error::ToolError;
use crate::system::run_shell_command;

/// Covers the first-call model download and load.
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

const TTS_TIMEOUT: Duration = Duration::from_secs(30);

const MODEL_REPO: &str = "ggerganov/whisper.cpp";

const MODEL_SIZES: [&str; 5] = ["tiny", "base", "small", "medium", "large-v3"];

/// Spanish markers for the language auto-detect heuristic.
const SPANISH_CHARS: [char; 8] = ['á', 'é', 'í', 'ó', 'ú', 'ñ', '¿', '¡'];
const SPANISH_WORDS: [&str; 12] = [
    "el", "la", "los", "las", "de", "que", "es", "una", "hola", "gracias", "por", "para",
];

/// Crude but effective: Spanish text carries either its characters or a
/// density of its function words.
pub fn detect_language(text: &str) -> &'static str {
    if text.chars().any(|c| SPANISH_CHARS.contains(&c)) {
        return "es";
    }
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .collect();
    if words.is_empty() {
        return "en";
    }
    let spanish = words
        .iter()
        .filter(|w| SPANISH_WORDS.contains(&w.as_str()))
        .count();
    if spanish * 4 >= words.len() { "es" } else { "en" }
}

pub struct SpeechEngine {
    models_dir: PathBuf,
    audio_dir: PathBuf,
    /// Model paths already resolved this session, keyed by size.
    model_cache: Mutex<std::collections::HashMap<String, PathBuf>>,
}

impl SpeechEngine {
    pub fn new(models_dir: PathBuf, audio_dir: PathBuf) -> Self {
        Self {
            models_dir,
            audio_dir,
            model_cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn model_file(size: &str) -> Result<String> {
        if !MODEL_SIZES.contains(&size) {
            return Err(ToolError::invalid(format!(
                "Unknown model size '{size}'"
            ))
            .with_hint(format!("Valid sizes: {}", MODEL_SIZES.join(", "))));
        }
        Ok(format!("ggml-{size}.bin"))
    }

    /// Resolve (downloading if necessary) the recognizer model for a
    /// size. The hub cache lives under the engine's config directory.
    pub async fn ensure_model(&self, size: &str) -> Result<PathBuf> {
        if let Ok(cache) = self.model_cache.lock() {
            if let Some(path) = cache.get(size) {
                return Ok(path.clone());
            }
        }

        let file = Self::model_file(size)?;
        let local = self.models_dir.join(&file);
        if !local.exists() {
            info!("downloading recognizer model {file}");
            std::fs::create_dir_all(&self.models_dir)?;
            let api = hf_hub::api::tokio::ApiBuilder::new()
                .with_cache_dir(self.models_dir.join("hub"))
                .build()
                .map_err(|e| ToolError::external(format!("model hub unavailable: {e}")))?;
            let fetched = api
                .model(MODEL_REPO.to_string())
                .get(&file)
                .await
                .map_err(|e| {
                    ToolError::external(format!("model download failed: {e}"))
                        .with_hint("Run download_whisper_model first, or check connectivity.")
                })?;
            std::fs::copy(&fetched, &local)?;
        }

        if let Ok(mut cache) = self.model_cache.lock() {
            cache.insert(size.to_string(), local.clone());
        }
        Ok(local)
    }

    pub async fn download_model(&self, size: &str) -> Result<JsonValue> {
        let path = self.ensure_model(size).await?;
        let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(json!({
            "success": true,
            "model_size": size,
            "path": path.display().to_string(),
            "bytes": bytes,
        }))
    }

    /// Transcribe a WAV file. `language` may be "auto" for detection by
    /// the recognizer.
    pub async fn transcribe(
        &self,
        audio_path: &str,
        language: &str,
        model_size: &str,
    ) -> Result<JsonValue> {
        let audio = Path::new(audio_path);
        if !audio.exists() {
            return Err(ToolError::invalid(format!(
                "Audio file not found: {audio_path}"
            )));
        }
        let start = Instant::now();
        let model = self.ensure_model(model_size).await?;

        let out_dir = tempfile::tempdir()?;
        let out_prefix = out_dir.path().join("transcript");
        let child = Command::new("whisper-cli")
            .arg("-m")
            .arg(&model)
            .arg("-f")
            .arg(audio)
            .args(["-l", if language.is_empty() { "auto" } else { language }])
            .arg("-oj")
            .arg("-of")
            .arg(&out_prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::external("whisper-cli binary not found")
                    .with_hint("Install whisper.cpp and put whisper-cli on PATH.")
                    .with_install_options(vec![
                        "winget install ggerganov.whisper-cpp".to_string(),
                        "https://github.com/ggerganov/whisper.cpp/releases".to_string(),
                    ]));
            }
            Err(e) => return Err(e.into()),
        };

        let output = tokio::time::timeout(TRANSCRIBE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ToolError::timeout("transcription", TRANSCRIBE_TIMEOUT))??;
        if !output.status.success() {
            return Err(ToolError::external(format!(
                "recognizer exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }

        let raw = tokio::fs::read_to_string(out_prefix.with_extension("json"))
            .await
            .map_err(|e| ToolError::external(format!("recognizer wrote no output: {e}")))?;
        let parsed: JsonValue = serde_json::from_str(&raw)?;
        let (text, segments, detected) = parse_recognizer_output(&parsed);

        Ok(json!({
            "success": true,
            "text": text,
            "segments": segments,
            "language": detected.unwrap_or_else(|| language.to_string()),
            "model_size": model_size,
            "elapsed_ms": start.elapsed().as_millis() as u64,
        }))
    }

    /// Speak text aloud. The online neural voice produces an MP3 played
    /// locally; failures fall back to the OS synthesizer.
    pub async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        rate: Option<f32>,
        language: &str,
    ) -> Result<JsonValue> {
        let language = match language {
            "auto" | "" => detect_language(text),
            other => other,
        };

        match self.speak_online(text, language).await {
            Ok(()) => Ok(json!({
                "success": true,
                "engine": "online_neural",
                "language": language,
                "length": text.chars().count(),
            })),
            Err(e) => {
                warn!("online speech failed ({}); using offline synthesizer", e.message);
                self.speak_offline(text, voice, rate).await?;
                Ok(json!({
                    "success": true,
                    "engine": "offline_synthesizer",
                    "language": language,
                    "length": text.chars().count(),
                }))
            }
        }
    }

    async fn speak_online(&self, text: &str, language: &str) -> Result<()> {
        let url = format!(
            "https://translate.google.com/translate_tts?ie=UTF-8&client=tw-ob&tl={language}&q={}",
            urlencode(text),
        );
        let response = tokio::time::timeout(TTS_TIMEOUT, reqwest::get(&url))
            .await
            .map_err(|_| ToolError::timeout("speech synthesis", TTS_TIMEOUT))??;
        if !response.status().is_success() {
            return Err(ToolError::external(format!(
                "speech endpoint returned HTTP {}",
                response.status(),
            )));
        }
        let bytes = response.bytes().await?;

        std::fs::create_dir_all(&self.audio_dir)?;
        let path = self
            .audio_dir
            .join(format!("speech_{}.mp3", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, &bytes).await?;
        debug!("synthesized speech to {}", path.display());

        let playback_path = path.clone();
        tokio::task::spawn_blocking(move || play_mp3(&playback_path)).await??;
        Ok(())
    }

    async fn speak_offline(&self, text: &str, voice: Option<&str>, rate: Option<f32>) -> Result<()> {
        let escaped = text.replace('\'', "''");
        let mut script = String::from(
            "Add-Type -AssemblyName System.Speech; \
             $synth = New-Object System.Speech.Synthesis.SpeechSynthesizer;",
        );
        if let Some(voice) = voice {
            script.push_str(&format!(" $synth.SelectVoice('{}');", voice.replace('\'', "''")));
        }
        if let Some(rate) = rate {
            let clamped = rate.clamp(-10.0, 10.0) as i32;
            script.push_str(&format!(" $synth.Rate = {clamped};"));
        }
        script.push_str(&format!(" $synth.Speak('{escaped}')"));

        let output = run_shell_command(ShellKind::Powershell, &script, TTS_TIMEOUT).await?;
        if output.exit_code != 0 {
            return Err(ToolError::external(format!(
                "offline synthesizer failed: {}",
                output.stderr.trim(),
            )));
        }
        Ok(())
    }
}

/// whisper.cpp JSON output: `transcription` is a list of segments with
/// `offsets` in milliseconds and a `text` field.
fn parse_recognizer_output(parsed: &JsonValue) -> (String, Vec<JsonValue>, Option<String>) {
    let detected = parsed["result"]["language"]
        .as_str()
        .map(str::to_string);
    let mut text = String::new();
    let mut segments = Vec::new();
    if let Some(items) = parsed["transcription"].as_array() {
        for item in items {
            let segment_text = item["text"].as_str().unwrap_or("").trim().to_string();
            if segment_text.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&segment_text);
            segments.push(json!({
                "text": segment_text,
                "start_ms": item["offsets"]["from"].as_u64().unwrap_or(0),
                "end_ms": item["offsets"]["to"].as_u64().unwrap_or(0),
            }));
        }
    }
    (text, segments, detected)
}

fn play_mp3(path: &Path) -> Result<()> {
    let (_stream, handle) = rodio::OutputStream::try_default()
        .map_err(|e| ToolError::external(format!("no audio output: {e}")))?;
    let sink = rodio::Sink::try_new(&handle)
        .map_err(|e| ToolError::external(format!("audio sink failed: {e}")))?;
    let file = std::fs::File::open(path)?;
    let source = rodio::Decoder::new(std::io::BufReader::new(file))
        .map_err(|e| ToolError::external(format!("could not decode speech audio: {e}")))?;
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 3);
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
