//! Audio capture to WAV files in the per-user audio directory, with
//! automatic purging of stale captures.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use cpal::traits::DeviceTrait;
use cpal::traits::HostTrait;
use cpal::traits::StreamTrait;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::error::ToolError;

/// Hard cap on one capture.
pub const MAX_CAPTURE: Duration = Duration::from_secs(300);

/// Captured WAVs are purged after an hour, synthesized speech after ten
/// minutes.
const WAV_RETENTION: Duration = Duration::from_secs(60 * 60);
const MP3_RETENTION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Microphone,
    /// System output loopback.
    System,
}

pub struct AudioCapture {
    dir: PathBuf,
}

impl AudioCapture {
    pub fn new(audio_dir: PathBuf) -> Self {
        Self { dir: audio_dir }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.dir
    }

    /// Record from the requested source for `duration`, blocking the
    /// calling worker thread. Returns the written WAV path.
    pub fn capture(&self, source: CaptureSource, duration: Duration) -> Result<JsonValue> {
        if duration > MAX_CAPTURE {
            return Err(ToolError::invalid(format!(
                "duration is capped at {} seconds",
                MAX_CAPTURE.as_secs()
            )));
        }
        self.purge_stale();

        let host = cpal::default_host();
        let device = match source {
            CaptureSource::Microphone => host.default_input_device(),
            // WASAPI opens output devices in loopback mode for capture.
            CaptureSource::System => host.default_output_device(),
        }
        .ok_or_else(|| {
            ToolError::external("no audio device available")
                .with_hint("Check that an audio device is connected and enabled.")
        })?;

        let config = match source {
            CaptureSource::Microphone => device.default_input_config(),
            CaptureSource::System => device
                .default_output_config()
                .or_else(|_| device.default_input_config()),
        }
        .map_err(|e| ToolError::external(format!("no usable audio config: {e}")))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let samples: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(data);
                    }
                },
                |e| warn!("audio stream error: {e}"),
                None,
            )
            .map_err(|e| ToolError::external(format!("failed to open audio stream: {e}")))?;

        stream
            .play()
            .map_err(|e| ToolError::external(format!("failed to start audio stream: {e}")))?;
        std::thread::sleep(duration);
        drop(stream);

        let samples = samples.lock().map(|s| s.clone()).unwrap_or_default();
        let path = self.write_wav(&samples, sample_rate, channels)?;
        debug!("captured {} samples to {}", samples.len(), path.display());

        Ok(json!({
            "success": true,
            "path": path.display().to_string(),
            "duration_seconds": duration.as_secs(),
            "sample_rate": sample_rate,
            "channels": channels,
            "source": match source {
                CaptureSource::Microphone => "microphone",
                CaptureSource::System => "system_loopback",
            },
        }))
    }

    fn write_wav(&self, samples: &[f32], sample_rate: u32, channels: u16) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!("capture_{}.wav", Uuid::new_v4().simple());
        let path = self.dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| ToolError::external(format!("failed to create WAV: {e}")))?;
        for sample in samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| ToolError::external(format!("failed to write WAV: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ToolError::external(format!("failed to finalize WAV: {e}")))?;
        Ok(path)
    }

    /// Drop stale audio artifacts; capture should never accumulate a
    /// library of the user's sound.
    pub fn purge_stale(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        let now = SystemTime::now();
        for entry in entries.flatten() {
            let path = entry.path();
            let retention = match path.extension().and_then(|e| e.to_str()) {
                Some("wav") => WAV_RETENTION,
                Some("mp3") => MP3_RETENTION,
                _ => continue,
            };
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age > retention)
                .unwrap_or(false);
            if stale {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("failed to purge {}: {e}", path.display());
                }
            }
        }
    }
}

/// Root-mean-square level of a sample chunk; the voice unit's activity
/// detector runs on this.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
