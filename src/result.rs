use serde::Serialize;

use crate::geometry::QuadBox;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResult {
    pub text: String,
    pub bbox: QuadBox,
    /// Mean per-character confidence; 0 when nothing was decoded.
    pub score: f32,
    /// Present only when the orientation classifier ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextLine {
    pub text: String,
    pub score: f32,
    pub character_scores: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Direction {
    /// 0 is upright, 1 is rotated by 180 degrees.
    pub label: usize,
    pub score: f32,
}

impl Direction {
    pub fn is_upside_down(&self) -> bool {
        self.label % 2 == 1
    }
}
