//! Escalating element resolver: accessibility tree first, OCR second,
//! raw screenshot for the caller's vision as the last resort. Each tier
//! is timed, every outcome feeds the error journal, and the journal can
//! reorder future escalations for an application it already knows.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::debug;

use deskpilot_protocol::FindElementsParams;
use deskpilot_protocol::SmartFindParams;

use crate::capture::CaptureSubsystem;
use crate::error::Result;
use crate::framework::FrameworkDetector;
use crate::journal::ErrorJournal;
use crate::ocr::OcrEngine;
use crate::platform::Desktop;
use crate::platform::MouseButton;
use crate::uia;
use crate::uia::ElementMatch;
use crate::uia::resolve_window;

const STRONG_MATCH: f64 = 0.8;
const PARTIAL_MATCH: f64 = 0.6;
const SEARCH_DEPTH: u32 = 5;
const MAX_CANDIDATES: usize = 5;

pub struct EscalatingResolver {
    desktop: Arc<dyn Desktop>,
    journal: Arc<ErrorJournal>,
    framework: Arc<FrameworkDetector>,
}

fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 10_000.0).round() / 10.0
}

fn candidate_json(m: &ElementMatch) -> JsonValue {
    json!({
        "name": m.name,
        "automation_id": m.automation_id,
        "control_type": m.control_type,
        "property_matched": m.property_matched,
        "score": m.score,
        "bbox": m.bbox,
    })
}

impl EscalatingResolver {
    pub fn new(
        desktop: Arc<dyn Desktop>,
        journal: Arc<ErrorJournal>,
        framework: Arc<FrameworkDetector>,
    ) -> Self {
        Self {
            desktop,
            journal,
            framework,
        }
    }

    /// The `smart_find` tool body.
    pub async fn smart_find(
        &self,
        capture: &CaptureSubsystem,
        ocr: &OcrEngine,
        params: &SmartFindParams,
    ) -> Result<JsonValue> {
        let target = params.target.to_lowercase();
        let window_title = params.window_title.as_deref();
        let mut methods_tried: Vec<JsonValue> = Vec::new();

        // Journal: does UIA fail on this app?
        let skip_uia = self
            .journal
            .best_method("smart_find", window_title)
            .as_deref()
            == Some("ocr");

        // ── Tier 1: accessibility tree ──
        if skip_uia {
            methods_tried.push(json!({
                "method": "ui_automation",
                "skipped": true,
                "reason": "journal_says_uia_fails_on_this_app",
            }));
            debug!("journal says UIA fails on {window_title:?}, starting at OCR");
        } else {
            let step = Instant::now();
            let uia_result = self.try_uia(&target, window_title);
            let found = uia_result.is_some();
            methods_tried.push(json!({
                "method": "ui_automation",
                "success": found,
                "time_ms": elapsed_ms(step),
            }));

            if let Some((best, partials)) = uia_result {
                self.journal
                    .record_success("smart_find", window_title, "ui_automation");
                let mut result = json!({
                    "success": true,
                    "found": true,
                    "method": "ui_automation",
                    "element": candidate_json(&best),
                    "methods_tried": methods_tried,
                    "tokens_cost": 0,
                });
                if let Some(partials) = partials {
                    result["partial_matches"] =
                        json!(partials.iter().map(candidate_json).collect::<Vec<_>>());
                    result["hint"] = json!(format!(
                        "Best match score {} - partial matches included for review.",
                        best.score
                    ));
                }
                if let Some(hint) = self.framework_hint(window_title) {
                    result["framework_hint"] = json!(hint);
                }
                if params.click_if_found {
                    result["clicked"] = self.click_element_silent_first(&best);
                }
                return Ok(result);
            }
            self.journal.record_failure(
                "smart_find",
                window_title,
                "ui_automation",
                &format!("Element '{}' not found via UIA", params.target),
                None,
            );
        }

        // ── Tier 2: OCR ──
        let step = Instant::now();
        let ocr_result = self.try_ocr(capture, ocr, &target, window_title).await;
        match &ocr_result {
            OcrTier::Found { word, click } => {
                methods_tried.push(json!({
                    "method": "ocr",
                    "success": true,
                    "time_ms": elapsed_ms(step),
                }));
                self.journal.record_success("smart_find", window_title, "ocr");
                let mut result = json!({
                    "success": true,
                    "found": true,
                    "method": "ocr",
                    "element": word,
                    "methods_tried": methods_tried,
                    "tokens_cost": 0,
                });
                if skip_uia {
                    result["journal_hint"] =
                        json!("Skipped UIA - journal knows it fails on this app");
                }
                if params.click_if_found {
                    if let Some((x, y)) = click {
                        let clicked = self.desktop.click_at(*x, *y, MouseButton::Left, false);
                        result["clicked"] = json!({
                            "success": clicked.is_ok(),
                            "method": "coordinate_input",
                            "x": x,
                            "y": y,
                        });
                    }
                }
                return Ok(result);
            }
            OcrTier::NotFound => {
                methods_tried.push(json!({
                    "method": "ocr",
                    "success": false,
                    "time_ms": elapsed_ms(step),
                }));
            }
            OcrTier::Skipped(reason) => {
                methods_tried.push(json!({
                    "method": "ocr",
                    "success": false,
                    "skipped": true,
                    "reason": reason,
                    "time_ms": elapsed_ms(step),
                }));
            }
        }

        // ── Tier 3: screenshot for the caller's vision ──
        let step = Instant::now();
        let quality = 85;
        match capture.capture(window_title, None, quality) {
            Ok(shot) => {
                methods_tried.push(json!({
                    "method": "screenshot",
                    "success": true,
                    "time_ms": elapsed_ms(step),
                }));
                Ok(json!({
                    "success": true,
                    "found": false,
                    "method": "screenshot",
                    "requires_vision": true,
                    "image_base64": shot.image_base64,
                    "image_width": shot.width,
                    "image_height": shot.height,
                    "hint": format!(
                        "UIA and OCR couldn't find '{}'. Showing screenshot for visual inspection.",
                        params.target
                    ),
                    "methods_tried": methods_tried,
                    "tokens_cost": 1500,
                }))
            }
            Err(e) => {
                methods_tried.push(json!({
                    "method": "screenshot",
                    "success": false,
                    "time_ms": elapsed_ms(step),
                }));
                Ok(json!({
                    "success": false,
                    "found": false,
                    "error": e.message,
                    "methods_tried": methods_tried,
                }))
            }
        }
    }

    /// UIA tier. A strong match returns alone; a partial band match
    /// returns the full candidate list for the caller to disambiguate.
    fn try_uia(
        &self,
        target: &str,
        window_title: Option<&str>,
    ) -> Option<(ElementMatch, Option<Vec<ElementMatch>>)> {
        let window = resolve_window(self.desktop.as_ref(), window_title).ok()?;
        let root = self.desktop.root_element(window.id).ok()?;
        let candidates = uia::find_elements(
            self.desktop.as_ref(),
            root,
            target,
            None,
            SEARCH_DEPTH,
            MAX_CANDIDATES,
        );
        let best = candidates.first()?.clone();
        if best.score > STRONG_MATCH {
            Some((best, None))
        } else if best.score >= PARTIAL_MATCH {
            Some((best, Some(candidates)))
        } else {
            None
        }
    }

    async fn try_ocr(
        &self,
        capture: &CaptureSubsystem,
        ocr: &OcrEngine,
        target: &str,
        window_title: Option<&str>,
    ) -> OcrTier {
        let (image, _source) = match capture.grab(window_title, None) {
            Ok(grabbed) => grabbed,
            Err(e) => return OcrTier::Skipped(e.message),
        };
        let output = match ocr.recognize(&image, "auto").await {
            Ok(output) => output,
            Err(e) => return OcrTier::Skipped(e.message),
        };

        // OCR coordinates are relative to the captured surface; clicking
        // a window capture needs the window origin added back.
        let (offset_x, offset_y) = window_title
            .and_then(|t| self.desktop.find_window(t).ok().flatten())
            .map(|w| (w.bounds.x, w.bounds.y))
            .unwrap_or((0, 0));

        for word in &output.words {
            if word.text.to_lowercase().contains(target) {
                let click_x = offset_x + word.x + word.width / 2;
                let click_y = offset_y + word.y + word.height / 2;
                let mut info = json!({
                    "text": word.text,
                    "x": word.x,
                    "y": word.y,
                    "width": word.width,
                    "height": word.height,
                });
                if let Some(confidence) = word.confidence {
                    info["confidence"] = json!(confidence);
                }
                return OcrTier::Found {
                    word: info,
                    click: Some((click_x, click_y)),
                };
            }
        }

        // The target may span word boundaries; check the joined text too.
        let full_text = output
            .words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if full_text.contains(target) {
            return OcrTier::Found {
                word: json!({"text": target, "in_full_text": true}),
                click: None,
            };
        }
        OcrTier::NotFound
    }

    fn click_element_silent_first(&self, best: &ElementMatch) -> JsonValue {
        match self.desktop.invoke(best.element) {
            Ok(()) => json!({"success": true, "method": "invoke (silent)"}),
            Err(_) => match self
                .desktop
                .click_element(best.element, MouseButton::Left, false)
            {
                Ok(()) => json!({"success": true, "method": "click_input"}),
                Err(e) => json!({"success": false, "error": e.to_string()}),
            },
        }
    }

    fn framework_hint(&self, window_title: Option<&str>) -> Option<String> {
        let window = resolve_window(self.desktop.as_ref(), window_title).ok()?;
        self.framework.hint(window.pid)
    }

    /// The `find_elements` tool body: ranked multi-property search.
    pub fn find_elements_tool(&self, params: &FindElementsParams) -> Result<JsonValue> {
        let window = resolve_window(self.desktop.as_ref(), params.window_title.as_deref())?;
        let root = self.desktop.root_element(window.id)?;
        let candidates = uia::find_elements(
            self.desktop.as_ref(),
            root,
            &params.query,
            params.control_type.as_deref(),
            SEARCH_DEPTH,
            MAX_CANDIDATES,
        );
        Ok(json!({
            "success": true,
            "query": params.query,
            "control_type_filter": params.control_type,
            "candidates": candidates.iter().map(candidate_json).collect::<Vec<_>>(),
            "count": candidates.len(),
            "window": window.title,
        }))
    }
}

enum OcrTier {
    Found { word: JsonValue, click: Option<(i32, i32)> },
    NotFound,
    Skipped(String),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::Bounds;
    use crate::platform::ElementProps;
    use crate::platform::OcrWord;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn bounds() -> Bounds {
        Bounds {
            x: 100,
            y: 50,
            width: 640,
            height: 480,
        }
    }

    struct Fixture {
        sim: Arc<SimDesktop>,
        resolver: EscalatingResolver,
        capture: CaptureSubsystem,
        ocr: OcrEngine,
        journal: Arc<ErrorJournal>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimDesktop::new());
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(ErrorJournal::new(dir.path().to_path_buf()));
        let framework = Arc::new(FrameworkDetector::new(sim.clone()));
        Fixture {
            resolver: EscalatingResolver::new(sim.clone(), journal.clone(), framework),
            capture: CaptureSubsystem::new(sim.clone()),
            ocr: OcrEngine::new(sim.clone()),
            journal,
            sim,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn strong_uia_match_returns_immediately() {
        let f = fixture();
        let win = f.sim.add_window("Portal - App", bounds(), 1);
        f.sim.add_element(
            win,
            None,
            ElementProps {
                name: "Sign In".to_string(),
                control_type: "Button".to_string(),
                is_enabled: true,
                is_visible: true,
                ..Default::default()
            },
        );

        let result = f
            .resolver
            .smart_find(
                &f.capture,
                &f.ocr,
                &SmartFindParams {
                    target: "Sign In".to_string(),
                    window_title: Some("App".to_string()),
                    click_if_found: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(result["method"], json!("ui_automation"));
        assert_eq!(result["found"], json!(true));
        assert_eq!(result["methods_tried"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn uia_miss_escalates_to_ocr_and_journal_learns() {
        let f = fixture();
        f.sim.add_window("Portal - App", bounds(), 1);
        f.sim.set_ocr_words(vec![OcrWord {
            text: "Sign In".to_string(),
            x: 200,
            y: 100,
            width: 60,
            height: 16,
            confidence: Some(95.0),
        }]);

        let params = SmartFindParams {
            target: "Sign In".to_string(),
            window_title: Some("App".to_string()),
            click_if_found: false,
        };
        let result = f
            .resolver
            .smart_find(&f.capture, &f.ocr, &params)
            .await
            .unwrap();

        assert_eq!(result["method"], json!("ocr"));
        let methods = result["methods_tried"].as_array().unwrap();
        assert_eq!(methods[0]["method"], json!("ui_automation"));
        assert_eq!(methods[0]["success"], json!(false));
        assert_eq!(methods[1]["method"], json!("ocr"));
        assert_eq!(methods[1]["success"], json!(true));

        // The journal now records OCR as the method that works here.
        assert_eq!(
            f.journal.best_method("smart_find", Some("Portal - App")),
            Some("ocr".to_string())
        );

        // Second call within the session skips UIA outright.
        let result = f
            .resolver
            .smart_find(&f.capture, &f.ocr, &params)
            .await
            .unwrap();
        let methods = result["methods_tried"].as_array().unwrap();
        assert_eq!(methods[0]["skipped"], json!(true));
        assert_eq!(
            methods[0]["reason"],
            json!("journal_says_uia_fails_on_this_app")
        );
        assert_eq!(result["journal_hint"].as_str().unwrap().contains("Skipped UIA"), true);
    }

    #[tokio::test]
    async fn ocr_click_coordinates_include_window_offset() {
        let f = fixture();
        f.sim.add_window("Portal - App", bounds(), 1);
        f.sim.set_ocr_words(vec![OcrWord {
            text: "Submit".to_string(),
            x: 10,
            y: 20,
            width: 40,
            height: 10,
            confidence: None,
        }]);

        let result = f
            .resolver
            .smart_find(
                &f.capture,
                &f.ocr,
                &SmartFindParams {
                    target: "submit".to_string(),
                    window_title: Some("App".to_string()),
                    click_if_found: true,
                },
            )
            .await
            .unwrap();

        // Window origin (100, 50) plus word center (30, 25).
        assert_eq!(result["clicked"]["x"], json!(130));
        assert_eq!(result["clicked"]["y"], json!(75));
        assert!(
            f.sim
                .events()
                .contains(&crate::platform::sim::SimEvent::ClickAt(130, 75))
        );
    }

    #[tokio::test]
    async fn both_tiers_missing_returns_vision_fallback() {
        let f = fixture();
        f.sim.add_window("Portal - App", bounds(), 1);

        let result = f
            .resolver
            .smart_find(
                &f.capture,
                &f.ocr,
                &SmartFindParams {
                    target: "Nowhere".to_string(),
                    window_title: Some("App".to_string()),
                    click_if_found: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(result["requires_vision"], json!(true));
        assert_eq!(result["found"], json!(false));
        assert!(result["image_base64"].as_str().unwrap().len() > 100);
        assert_eq!(result["methods_tried"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn partial_band_returns_candidate_list() {
        let f = fixture();
        let win = f.sim.add_window("Portal - App", bounds(), 1);
        // "sign-in page" vs query "sign in paging": similar but not
        // exact/word/prefix; lands in the 0.6..0.8 band.
        f.sim.add_element(
            win,
            None,
            ElementProps {
                name: "sign in paging".to_string(),
                control_type: "Text".to_string(),
                is_enabled: true,
                is_visible: true,
                ..Default::default()
            },
        );

        let result = f
            .resolver
            .smart_find(
                &f.capture,
                &f.ocr,
                &SmartFindParams {
                    target: "sign-in page".to_string(),
                    window_title: Some("App".to_string()),
                    click_if_found: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(result["method"], json!("ui_automation"));
        assert!(result["partial_matches"].is_array());
        assert!(result["hint"].as_str().unwrap().contains("partial matches"));
    }
}
