//! Two-backend OCR: the native OS recognizer first, an external
//! `tesseract` binary as the fallback. Either way the result is the
//! same flat word list with bounding boxes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use image::ImageEncoder;
use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use crate::capture::CaptureSubsystem;
use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Desktop;
use crate::platform::OcrWord;
use crate::platform::RasterImage;

const TESSERACT_TIMEOUT: Duration = Duration::from_secs(30);

/// Map a BCP-47 tag to the ISO-639-3 code tesseract expects.
fn tesseract_language(tag: &str) -> &str {
    let primary = tag.split(['-', '_']).next().unwrap_or(tag);
    match primary.to_lowercase().as_str() {
        "en" => "eng",
        "es" => "spa",
        "fr" => "fra",
        "de" => "deu",
        "it" => "ita",
        "pt" => "por",
        "nl" => "nld",
        "ja" => "jpn",
        "ko" => "kor",
        "zh" => "chi_sim",
        "ru" => "rus",
        _ => "eng",
    }
}

pub struct OcrEngine {
    desktop: Arc<dyn Desktop>,
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub engine: &'static str,
    pub words: Vec<OcrWord>,
    pub language: String,
}

impl OcrEngine {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self { desktop }
    }

    /// Run OCR over an already-captured image: native first, external
    /// fallback when the native backend is missing or rejects the
    /// request.
    pub async fn recognize(&self, image: &RasterImage, language: &str) -> Result<OcrOutput> {
        let tag = if language.is_empty() || language == "auto" {
            "en-US"
        } else {
            language
        };

        if self.desktop.native_ocr_available() {
            match self.desktop.native_ocr(image, tag) {
                Ok(words) => {
                    return Ok(OcrOutput {
                        engine: "native",
                        words,
                        language: tag.to_string(),
                    });
                }
                Err(e) => debug!("native OCR failed ({e}); falling back to tesseract"),
            }
        }

        let code = tesseract_language(tag);
        let words = run_tesseract(image, code).await?;
        Ok(OcrOutput {
            engine: "tesseract",
            words,
            language: code.to_string(),
        })
    }

    /// The `ocr_region` tool body: capture, recognize, report.
    pub async fn ocr_region_tool(
        &self,
        capture: &CaptureSubsystem,
        window_title: Option<&str>,
        region: Option<[i32; 4]>,
        language: Option<&str>,
    ) -> Result<JsonValue> {
        let start = Instant::now();
        let (image, source) = capture.grab(window_title, region)?;
        let output = self
            .recognize(&image, language.unwrap_or("auto"))
            .await?;
        let text = output
            .words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let word_count = output.words.len();
        Ok(json!({
            "success": true,
            "engine": output.engine,
            "text": text,
            "words": output.words,
            "word_count": word_count,
            "language": output.language,
            "elapsed_ms": start.elapsed().as_millis() as u64,
            "source": source,
            "source_size": {"width": image.width, "height": image.height},
        }))
    }

    /// The `ocr_languages` tool body: which backends exist and what
    /// languages each can read.
    pub async fn languages_tool(&self) -> Result<JsonValue> {
        let native_available = self.desktop.native_ocr_available();
        let native_languages = self.desktop.native_ocr_languages();

        let tesseract = Command::new("tesseract")
            .arg("--list-langs")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;
        let (tesseract_available, tesseract_languages) = match tesseract {
            Ok(output) if output.status.success() => {
                let langs: Vec<String> = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .skip(1) // header line
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                (true, langs)
            }
            _ => (false, Vec::new()),
        };

        Ok(json!({
            "success": true,
            "native": {"available": native_available, "languages": native_languages},
            "tesseract": {"available": tesseract_available, "languages": tesseract_languages},
        }))
    }
}

/// Run the external tesseract binary in TSV mode and parse word boxes.
async fn run_tesseract(image: &RasterImage, language: &str) -> Result<Vec<OcrWord>> {
    // Tesseract reads files, not pipes, for image input; hand it a
    // temporary PNG.
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("capture.png");
    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png)
        .write_image(
            &image.rgba,
            image.width,
            image.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| ToolError::internal(format!("PNG encoding failed: {e}")))?;
    tokio::fs::write(&input, png).await?;

    let child = Command::new("tesseract")
        .arg(&input)
        .arg("stdout")
        .args(["-l", language, "tsv"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::external("tesseract binary not found")
                .with_hint("Install tesseract and make sure it is on PATH.")
                .with_install_options(vec![
                    "winget install UB-Mannheim.TesseractOCR".to_string(),
                    "choco install tesseract".to_string(),
                ]));
        }
        Err(e) => return Err(e.into()),
    };

    let output = tokio::time::timeout(TESSERACT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| ToolError::timeout("tesseract", TESSERACT_TIMEOUT))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::external(format!(
            "tesseract exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        )));
    }

    Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse tesseract TSV output into words. Level 5 rows are words; the
/// columns are fixed: level, page, block, par, line, word, left, top,
/// width, height, conf, text.
fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let parse = |s: &str| s.parse::<i32>().unwrap_or(0);
        let confidence = cols[10].parse::<f32>().ok().filter(|c| *c >= 0.0);
        words.push(OcrWord {
            text: text.to_string(),
            x: parse(cols[6]),
            y: parse(cols[7]),
            width: parse(cols[8]),
            height: parse(cols[9]),
            confidence,
        });
    }
    words
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bcp47_maps_to_tesseract_codes() {
        assert_eq!(tesseract_language("en-US"), "eng");
        assert_eq!(tesseract_language("es"), "spa");
        assert_eq!(tesseract_language("zh-CN"), "chi_sim");
        assert_eq!(tesseract_language("unknown"), "eng");
    }

    #[test]
    fn tsv_word_rows_are_parsed() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t20\t50\t14\t96.5\tSign\n\
                   5\t1\t1\t1\t1\t2\t66\t20\t30\t14\t91.0\tIn\n";
        let words = parse_tsv(tsv);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Sign");
        assert_eq!(words[0].x, 10);
        assert_eq!(words[1].confidence, Some(91.0));
    }

    #[tokio::test]
    async fn sim_backend_uses_native_engine() {
        use crate::platform::sim::SimDesktop;
        let sim = Arc::new(SimDesktop::new());
        sim.set_ocr_words(vec![OcrWord {
            text: "Hello".to_string(),
            x: 1,
            y: 2,
            width: 30,
            height: 10,
            confidence: None,
        }]);
        let engine = OcrEngine::new(sim);
        let image = RasterImage {
            width: 4,
            height: 4,
            rgba: vec![0; 64],
        };
        let output = engine.recognize(&image, "auto").await.unwrap();
        assert_eq!(output.engine, "native");
        assert_eq!(output.words[0].text, "Hello");
    }
}
