//! Read-result payload returned by the vision OCR service. Stored verbatim
//! as `text.json` so a page can be re-matched without another OCR call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrWord {
    pub text: String,
    /// 0.0 to 1.0 as reported by the service.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub bounding_polygon: Vec<Point>,
}

impl OcrWord {
    pub fn flattened_polygon(&self) -> Vec<f64> {
        self.bounding_polygon
            .iter()
            .flat_map(|point| [point.x, point.y])
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    #[serde(default)]
    pub words: Vec<OcrWord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    #[serde(default)]
    pub lines: Vec<OcrLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrPayload {
    #[serde(default)]
    pub read_result: ReadResult,
}

impl OcrPayload {
    pub fn lines(&self) -> impl Iterator<Item = &OcrLine> {
        self.read_result.blocks.iter().flat_map(|block| block.lines.iter())
    }

    pub fn words(&self) -> impl Iterator<Item = &OcrWord> {
        self.lines().flat_map(|line| line.words.iter())
    }

    /// Line texts joined by a single space.
    pub fn page_text(&self) -> String {
        self.lines()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
