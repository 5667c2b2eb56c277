//! Raster capture: full display, a specific window (without activating
//! it), or an explicit rectangle. Output is base64 JPEG at the
//! configured quality.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Bounds;
use crate::platform::Desktop;
use crate::platform::RasterImage;
use crate::uia::resolve_window;

#[derive(Debug, Clone)]
pub struct Capture {
    pub image_base64: String,
    pub width: u32,
    pub height: u32,
    pub size_kb: usize,
    pub source: String,
}

pub struct CaptureSubsystem {
    desktop: Arc<dyn Desktop>,
}

impl CaptureSubsystem {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self { desktop }
    }

    /// Grab raw pixels for the requested source. Window capture goes
    /// through the window's own surface and works while occluded.
    pub fn grab(
        &self,
        window_title: Option<&str>,
        region: Option<[i32; 4]>,
    ) -> Result<(RasterImage, String)> {
        if let Some([x, y, width, height]) = region {
            if width <= 0 || height <= 0 {
                return Err(ToolError::invalid("region width/height must be positive"));
            }
            let image = self.desktop.capture_region(Bounds {
                x,
                y,
                width,
                height,
            })?;
            return Ok((image, format!("region {x},{y} {width}x{height}")));
        }
        if let Some(title) = window_title {
            let window = resolve_window(self.desktop.as_ref(), Some(title))?;
            let image = self.desktop.capture_window(window.id)?;
            return Ok((image, format!("window '{}'", window.title)));
        }
        let image = self.desktop.capture_screen()?;
        Ok((image, "full screen".to_string()))
    }

    pub fn capture(
        &self,
        window_title: Option<&str>,
        region: Option<[i32; 4]>,
        quality: u8,
    ) -> Result<Capture> {
        let (image, source) = self.grab(window_title, region)?;
        encode_jpeg(&image, quality, source)
    }

    /// The `take_screenshot` tool body.
    pub fn screenshot_tool(
        &self,
        window_title: Option<&str>,
        region: Option<[i32; 4]>,
        quality: u8,
    ) -> Result<JsonValue> {
        let capture = self.capture(window_title, region, quality)?;
        Ok(json!({
            "success": true,
            "image_base64": capture.image_base64,
            "width": capture.width,
            "height": capture.height,
            "size_kb": capture.size_kb,
            "source": capture.source,
        }))
    }
}

/// Encode RGBA pixels as a base64 JPEG, dropping alpha.
pub fn encode_jpeg(image: &RasterImage, quality: u8, source: String) -> Result<Capture> {
    let mut rgb = Vec::with_capacity((image.width * image.height * 3) as usize);
    for px in image.rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(
            &rgb,
            image.width,
            image.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| ToolError::internal(format!("JPEG encoding failed: {e}")))?;

    let size_kb = jpeg.len() / 1024;
    Ok(Capture {
        image_base64: BASE64.encode(&jpeg),
        width: image.width,
        height: image.height,
        size_kb,
        source,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    #[test]
    fn window_capture_reports_dimensions() {
        let sim = Arc::new(SimDesktop::new());
        sim.add_window(
            "Paint",
            Bounds {
                x: 10,
                y: 10,
                width: 320,
                height: 200,
            },
            5,
        );
        let capture = CaptureSubsystem::new(sim);
        let result = capture.screenshot_tool(Some("Paint"), None, 85).unwrap();
        assert_eq!(result["width"], json!(320));
        assert_eq!(result["height"], json!(200));
        assert!(result["image_base64"].as_str().unwrap().len() > 100);
        assert!(result["source"].as_str().unwrap().contains("Paint"));
    }

    #[test]
    fn bad_region_is_an_input_error() {
        let sim = Arc::new(SimDesktop::new());
        let capture = CaptureSubsystem::new(sim);
        let err = capture.capture(None, Some([0, 0, -5, 10]), 85).unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }

    #[test]
    fn encoded_jpeg_round_trips_through_base64() {
        let image = RasterImage {
            width: 8,
            height: 8,
            rgba: vec![0x80; 8 * 8 * 4],
        };
        let capture = encode_jpeg(&image, 85, "test".to_string()).unwrap();
        let decoded = BASE64.decode(capture.image_base64).unwrap();
        // JPEG SOI marker.
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }
}
