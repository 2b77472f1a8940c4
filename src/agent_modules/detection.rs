use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates, top-left `(x1, y1)` to bottom-right `(x2, y2)`.
/// On the wire it is the array `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One labelled, scored box reported by the vision model for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox: bbox.into(),
        }
    }
}

/// Decides which detections are fire-relevant. Holds no state beyond its vocabulary.
#[derive(Debug, Clone)]
pub struct DetectionClassifier {
    vocabulary: Vec<String>,
}

impl Default for DetectionClassifier {
    fn default() -> Self {
        Self::new(["fire", "smoke", "flame"])
    }
}

impl DetectionClassifier {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary = vocabulary
            .into_iter()
            .map(|term| term.as_ref().trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        Self { vocabulary }
    }

    /// True when `label` contains any vocabulary term, ignoring case.
    pub fn is_fire_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.vocabulary.iter().any(|term| label.contains(term.as_str()))
    }

    /// Keeps the fire-relevant detections whose confidence reaches `confidence_threshold`.
    pub fn classify(&self, detections: &[Detection], confidence_threshold: f32) -> Vec<Detection> {
        detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold && self.is_fire_label(&d.label))
            .cloned()
            .collect()
    }
}
