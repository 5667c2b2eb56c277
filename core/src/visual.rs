//! Visual diff: snapshot a window or the screen, then compare a later
//! capture against it and report whether anything changed beyond a
//! small pixel threshold.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use serde_json::json;
use uuid::Uuid;

use crate::capture::CaptureSubsystem;
use crate::error::Result;
use crate::error::ToolError;
use crate::platform::RasterImage;
use crate::util::now_iso;

/// Fraction of differing pixels below which two captures count as
/// unchanged; absorbs cursor blinks and clock ticks.
const CHANGE_THRESHOLD: f64 = 0.002;

/// Per-channel delta below which a pixel counts as identical.
const PIXEL_TOLERANCE: u8 = 8;

const MAX_SNAPSHOTS: usize = 20;

struct Snapshot {
    window_title: Option<String>,
    image: RasterImage,
    taken: String,
}

pub struct VisualDiff {
    capture: Arc<CaptureSubsystem>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl VisualDiff {
    pub fn new(capture: Arc<CaptureSubsystem>) -> Self {
        Self {
            capture,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Take a baseline snapshot; returns an id for later comparison.
    pub fn snapshot(&self, window_title: Option<&str>) -> Result<JsonValue> {
        let (image, source) = self.capture.grab(window_title, None)?;
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();

        if let Ok(mut snapshots) = self.snapshots.lock() {
            // Oldest snapshots age out; this is a short-lived scratch
            // space, not an archive.
            if snapshots.len() >= MAX_SNAPSHOTS {
                if let Some(oldest) = snapshots
                    .iter()
                    .min_by(|a, b| a.1.taken.cmp(&b.1.taken))
                    .map(|(k, _)| k.clone())
                {
                    snapshots.remove(&oldest);
                }
            }
            snapshots.insert(
                id.clone(),
                Snapshot {
                    window_title: window_title.map(str::to_string),
                    image,
                    taken: now_iso(),
                },
            );
        }

        Ok(json!({
            "success": true,
            "snapshot_id": id,
            "source": source,
        }))
    }

    /// Re-capture the same source and compare against the baseline.
    pub fn compare(&self, snapshot_id: &str) -> Result<JsonValue> {
        let (window_title, baseline, taken) = {
            let snapshots = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
            let snapshot = snapshots.get(snapshot_id).ok_or_else(|| {
                ToolError::invalid(format!("Snapshot '{snapshot_id}' not found"))
            })?;
            (
                snapshot.window_title.clone(),
                snapshot.image.clone(),
                snapshot.taken.clone(),
            )
        };

        let (current, _source) = self.capture.grab(window_title.as_deref(), None)?;

        if current.width != baseline.width || current.height != baseline.height {
            return Ok(json!({
                "success": true,
                "snapshot_id": snapshot_id,
                "changed": true,
                "reason": "dimensions changed",
                "baseline": {"width": baseline.width, "height": baseline.height},
                "current": {"width": current.width, "height": current.height},
                "baseline_taken": taken,
            }));
        }

        let ratio = changed_ratio(&baseline, &current);
        Ok(json!({
            "success": true,
            "snapshot_id": snapshot_id,
            "changed": ratio > CHANGE_THRESHOLD,
            "changed_pixel_ratio": (ratio * 10_000.0).round() / 10_000.0,
            "baseline_taken": taken,
        }))
    }
}

fn changed_ratio(a: &RasterImage, b: &RasterImage) -> f64 {
    let pixels = (a.width * a.height) as usize;
    if pixels == 0 {
        return 0.0;
    }
    let mut changed = 0usize;
    for (pa, pb) in a.rgba.chunks_exact(4).zip(b.rgba.chunks_exact(4)) {
        let differs = pa
            .iter()
            .zip(pb.iter())
            .take(3)
            .any(|(ca, cb)| ca.abs_diff(*cb) > PIXEL_TOLERANCE);
        if differs {
            changed += 1;
        }
    }
    changed as f64 / pixels as f64
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::Bounds;
    use crate::platform::Desktop;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    #[test]
    fn unchanged_capture_compares_equal() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window(
            "Static",
            Bounds {
                x: 0,
                y: 0,
                width: 64,
                height: 64,
            },
            1,
        );
        let diff = VisualDiff::new(Arc::new(CaptureSubsystem::new(sim)));
        let snap = diff.snapshot(Some("Static")).unwrap();
        let id = snap["snapshot_id"].as_str().unwrap();

        let result = diff.compare(id).unwrap();
        assert_eq!(result["changed"], json!(false));
        assert_eq!(result["changed_pixel_ratio"], json!(0.0));
    }

    #[test]
    fn resized_window_reports_changed() {
        let sim = Arc::new(SimDesktop::new());
        let win = sim.add_window(
            "Growing",
            Bounds {
                x: 0,
                y: 0,
                width: 64,
                height: 64,
            },
            1,
        );
        let diff = VisualDiff::new(Arc::new(CaptureSubsystem::new(sim.clone())));
        let snap = diff.snapshot(Some("Growing")).unwrap();
        let id = snap["snapshot_id"].as_str().unwrap();

        sim.move_window(
            win,
            Bounds {
                x: 0,
                y: 0,
                width: 128,
                height: 64,
            },
        )
        .unwrap();

        let result = diff.compare(id).unwrap();
        assert_eq!(result["changed"], json!(true));
        assert_eq!(result["reason"], json!("dimensions changed"));
    }

    #[test]
    fn unknown_snapshot_is_an_input_error() {
        let sim = Arc::new(SimDesktop::new());
        let diff = VisualDiff::new(Arc::new(CaptureSubsystem::new(sim)));
        let err = diff.compare("missing").unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }

    #[test]
    fn pixel_ratio_counts_material_differences() {
        let a = RasterImage {
            width: 2,
            height: 2,
            rgba: vec![10; 16],
        };
        let mut b = a.clone();
        // One pixel shifted well past tolerance.
        b.rgba[0] = 200;
        let ratio = changed_ratio(&a, &b);
        assert_eq!(ratio, 0.25);

        // A shift inside the tolerance is ignored.
        let mut c = a.clone();
        c.rgba[4] = 14;
        assert_eq!(changed_ratio(&a, &c), 0.0);
    }
}
