//! Polling waits: block (on a worker) until an element, text, or
//! window appears, or until a window's pixels settle.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value as JsonValue;
use serde_json::json;

use crate::capture::CaptureSubsystem;
use crate::error::Result;
use crate::error::ToolError;
use crate::ocr::OcrEngine;
use crate::platform::Desktop;
use crate::uia;
use crate::uia::resolve_window;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const SEARCH_DEPTH: u32 = 5;

/// Cap any wait at five minutes regardless of the requested timeout.
const MAX_WAIT: Duration = Duration::from_secs(300);

pub struct WaitTools {
    desktop: Arc<dyn Desktop>,
}

impl WaitTools {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self { desktop }
    }

    fn deadline(timeout_secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(timeout_secs).min(MAX_WAIT)
    }

    pub async fn wait_for_window(&self, window_title: &str, timeout_secs: u64) -> Result<JsonValue> {
        let start = Instant::now();
        let deadline = Self::deadline(timeout_secs);
        loop {
            if let Some(window) = self.desktop.find_window(window_title)? {
                return Ok(json!({
                    "success": true,
                    "found": true,
                    "window": window.title,
                    "waited_ms": start.elapsed().as_millis() as u64,
                }));
            }
            if Instant::now() >= deadline {
                return Err(ToolError::timeout(
                    format!("waiting for window '{window_title}'"),
                    Duration::from_secs(timeout_secs),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_element(
        &self,
        element_name: &str,
        window_title: Option<&str>,
        timeout_secs: u64,
    ) -> Result<JsonValue> {
        let start = Instant::now();
        let deadline = Self::deadline(timeout_secs);
        loop {
            let found = resolve_window(self.desktop.as_ref(), window_title)
                .ok()
                .and_then(|window| self.desktop.root_element(window.id).ok())
                .and_then(|root| {
                    uia::find_elements(
                        self.desktop.as_ref(),
                        root,
                        element_name,
                        None,
                        SEARCH_DEPTH,
                        1,
                    )
                    .into_iter()
                    .next()
                });
            if let Some(found) = found {
                return Ok(json!({
                    "success": true,
                    "found": true,
                    "element": found.name,
                    "score": found.score,
                    "waited_ms": start.elapsed().as_millis() as u64,
                }));
            }
            if Instant::now() >= deadline {
                return Err(ToolError::timeout(
                    format!("waiting for element '{element_name}'"),
                    Duration::from_secs(timeout_secs),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until OCR sees the text in the window (or screen).
    pub async fn wait_for_text(
        &self,
        capture: &CaptureSubsystem,
        ocr: &OcrEngine,
        text: &str,
        window_title: Option<&str>,
        timeout_secs: u64,
    ) -> Result<JsonValue> {
        let needle = text.to_lowercase();
        let start = Instant::now();
        let deadline = Self::deadline(timeout_secs);
        loop {
            if let Ok((image, _)) = capture.grab(window_title, None) {
                if let Ok(output) = ocr.recognize(&image, "auto").await {
                    let haystack = output
                        .words
                        .iter()
                        .map(|w| w.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                        .to_lowercase();
                    if haystack.contains(&needle) {
                        return Ok(json!({
                            "success": true,
                            "found": true,
                            "text": text,
                            "waited_ms": start.elapsed().as_millis() as u64,
                        }));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(ToolError::timeout(
                    format!("waiting for text '{text}'"),
                    Duration::from_secs(timeout_secs),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until two consecutive captures of the window are identical,
    /// meaning the UI has stopped repainting.
    pub async fn wait_for_idle(
        &self,
        capture: &CaptureSubsystem,
        window_title: Option<&str>,
        timeout_secs: u64,
    ) -> Result<JsonValue> {
        let start = Instant::now();
        let deadline = Self::deadline(timeout_secs);
        let mut previous: Option<Vec<u8>> = None;
        loop {
            if let Ok((image, _)) = capture.grab(window_title, None) {
                if let Some(previous) = &previous {
                    if *previous == image.rgba {
                        return Ok(json!({
                            "success": true,
                            "idle": true,
                            "waited_ms": start.elapsed().as_millis() as u64,
                        }));
                    }
                }
                previous = Some(image.rgba);
            }
            if Instant::now() >= deadline {
                return Err(ToolError::timeout(
                    "waiting for idle UI",
                    Duration::from_secs(timeout_secs),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::Bounds;
    use crate::platform::ElementProps;
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

    #[tokio::test]
    async fn window_wait_returns_once_present() {
        let sim = Arc::new(SimDesktop::new());
        let waits = WaitTools::new(sim.clone());

        let sim_spawner = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            sim_spawner.add_window("Late Arrival", bounds(), 1);
        });

        let result = waits.wait_for_window("Late", 5).await.unwrap();
        assert_eq!(result["found"], json!(true));
    }

    #[tokio::test]
    async fn window_wait_times_out_with_structured_error() {
        let sim = Arc::new(SimDesktop::new());
        let waits = WaitTools::new(sim);
        let err = waits.wait_for_window("Never", 1).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::Timeout);
        assert!(err.hint.is_some());
    }

    #[tokio::test]
    async fn element_wait_finds_fuzzy_matches() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window("Form", bounds(), 1);
        sim.add_element(
            win,
            None,
            ElementProps {
                name: "Submit Order".to_string(),
                control_type: "Button".to_string(),
                is_enabled: true,
                is_visible: true,
                ..Default::default()
            },
        );
        let waits = WaitTools::new(sim);
        let result = waits
            .wait_for_element("submit", Some("Form"), 2)
            .await
            .unwrap();
        assert_eq!(result["found"], json!(true));
        assert_eq!(result["element"], json!("Submit Order"));
    }

    #[tokio::test]
    async fn idle_wait_settles_on_static_pixels() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window("Calm", bounds(), 1);
        let capture = CaptureSubsystem::new(sim.clone());
        let waits = WaitTools::new(sim);
        let result = waits.wait_for_idle(&capture, Some("Calm"), 5).await.unwrap();
        assert_eq!(result["idle"], json!(true));
    }
}
