//! Local OCR through the `tesseract` command-line tool.
//!
//! Two modes are used by the local backend's fallback chain:
//!
//! * **layout**: automatic page segmentation (`--psm 3`) with TSV output.
//!   Each TSV row at level 5 is one word with its pixel box and its
//!   block / paragraph / line numbers, from which reading-order text is
//!   rebuilt.
//! * **plain**: the page treated as one uniform block (`--psm 6`), text only.
//!
//! TSV columns:
//! `level page_num block_num par_num line_num word_num left top width height conf text`

use crate::error::OcrError;
use crate::pipeline::encode::png_bytes;
use image::DynamicImage;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// One recognised word in raster pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// Words of one page, in engine reading order.
#[derive(Debug, Clone, Default)]
pub struct LayoutResult {
    pub words: Vec<OcrWord>,
}

impl LayoutResult {
    /// Rebuild text from the layout: words on a line joined by spaces, lines
    /// by newlines, paragraphs and blocks by a blank line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut prev: Option<(u32, u32, u32)> = None;
        for w in &self.words {
            let key = (w.block, w.paragraph, w.line);
            match prev {
                None => {}
                Some((b, p, _)) if (b, p) != (key.0, key.1) => out.push_str("\n\n"),
                Some(k) if k != key => out.push('\n'),
                Some(_) => out.push(' '),
            }
            out.push_str(&w.text);
            prev = Some(key);
        }
        out
    }
}

/// A blocking OCR engine over single page images.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Layout-aware recognition with word boxes.
    fn recognize_layout(&self, image: &DynamicImage) -> Result<LayoutResult, OcrError>;

    /// Whole-image recognition, text only.
    fn recognize_plain(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// [`OcrEngine`] that shells out to `tesseract`.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    language: String,
}

impl TesseractEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            binary: std::env::var("TESSERACT_CMD").unwrap_or_else(|_| "tesseract".to_string()),
            language: language.into(),
        }
    }

    /// True when the binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run(&self, image: &DynamicImage, psm: u8, tsv: bool) -> Result<String, OcrError> {
        let mut tmp = tempfile::Builder::new()
            .prefix("pdfocr-page-")
            .suffix(".png")
            .tempfile()?;
        let png = png_bytes(image).map_err(|e| OcrError::OcrFailed(e.to_string()))?;
        tmp.write_all(&png)?;
        tmp.flush()?;

        self.invoke(tmp.path(), psm, tsv)
    }

    fn invoke(&self, image_path: &Path, psm: u8, tsv: bool) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(psm.to_string());
        if tsv {
            cmd.arg("tsv");
        }
        debug!(
            "Running {} --psm {} -l {}{}",
            self.binary,
            psm,
            self.language,
            if tsv { " tsv" } else { "" }
        );

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::EngineNotAvailable(format!("'{}' not found on PATH", self.binary))
            } else {
                OcrError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::OcrFailed(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize_layout(&self, image: &DynamicImage) -> Result<LayoutResult, OcrError> {
        let tsv = self.run(image, 3, true)?;
        let words = parse_tsv(&tsv);
        if words.is_empty() {
            return Err(OcrError::EmptyOutput);
        }
        Ok(LayoutResult { words })
    }

    fn recognize_plain(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let text = self.run(image, 6, false)?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(OcrError::EmptyOutput);
        }
        Ok(text)
    }
}

/// Parse word rows (level 5) out of tesseract TSV output.
///
/// Rows that are short, unparsable, blank or have negative confidence are
/// skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines().skip(1).filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<OcrWord> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 12 || cols[0].trim() != "5" {
        return None;
    }
    let text = cols[11].trim();
    let confidence: f32 = cols[10].trim().parse().ok()?;
    if text.is_empty() || confidence < 0.0 {
        return None;
    }
    let num = |i: usize| cols[i].trim().parse::<f32>().ok();
    let int = |i: usize| cols[i].trim().parse::<u32>().ok();

    Some(OcrWord {
        text: text.to_string(),
        block: int(2)?,
        paragraph: int(3)?,
        line: int(4)?,
        left: num(6)?,
        top: num(7)?,
        width: num(8)?,
        height: num(9)?,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1224\t1584\t-1\t
2\t1\t1\t0\t0\t0\t100\t120\t400\t60\t-1\t
5\t1\t1\t1\t1\t1\t100\t120\t180\t40\t96.2\tQuarterly
5\t1\t1\t1\t1\t2\t300\t120\t200\t40\t95.0\treport
5\t1\t1\t1\t2\t1\t100\t170\t90\t40\t91.7\t2019
5\t1\t2\t1\t1\t1\t100\t300\t120\t40\t88.0\tRevenue
5\t1\t2\t1\t1\t2\t230\t300\t40\t40\t-1\t
5\t1\t2\t1\t1\t3\t280\t300\t40\t40\t12.5\t   ";

    #[test]
    fn parses_word_rows_only() {
        let words = parse_tsv(TSV);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Quarterly", "report", "2019", "Revenue"]);
        assert_eq!(words[1].left, 300.0);
        assert_eq!(words[1].height, 40.0);
        assert_eq!(words[3].block, 2);
    }

    #[test]
    fn layout_text_respects_lines_and_blocks() {
        let result = LayoutResult {
            words: parse_tsv(TSV),
        };
        assert_eq!(result.text(), "Quarterly report\n2019\n\nRevenue");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let tsv = "header\n5\t1\t1\t1\t1\t1\tx\t0\t1\t1\t90\tbad\n5\t1\t1";
        assert!(parse_tsv(tsv).is_empty());
    }

    #[test]
    fn missing_binary_is_engine_not_available() {
        let engine = TesseractEngine {
            binary: "definitely-not-a-real-ocr-binary".into(),
            language: "eng".into(),
        };
        assert!(!engine.is_available());
        let img = DynamicImage::new_luma8(4, 4);
        assert!(matches!(
            engine.recognize_plain(&img),
            Err(OcrError::EngineNotAvailable(_))
        ));
    }
}
