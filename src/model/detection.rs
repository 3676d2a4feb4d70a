//! Detection results as produced by inference and stored on a tracking record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::NormalizedBox;

/// Class id given to boxes drawn by hand.
pub const MANUAL_CLASS_ID: i32 = -1;

/// Confidence given to boxes drawn by hand.
pub const MANUAL_CONFIDENCE: f32 = 1.0;

/// One photographed angle of a compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Top,
    Bottom,
    Side,
    Behind,
    Front,
    Other,
}

impl ViewKind {
    /// Get the wire name for this view.
    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::Top => "top",
            ViewKind::Bottom => "bottom",
            ViewKind::Side => "side",
            ViewKind::Behind => "behind",
            ViewKind::Front => "front",
            ViewKind::Other => "other",
        }
    }

    /// Get all views in display order.
    pub fn all() -> &'static [ViewKind] {
        &[
            ViewKind::Top,
            ViewKind::Bottom,
            ViewKind::Side,
            ViewKind::Behind,
            ViewKind::Front,
            ViewKind::Other,
        ]
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.name() == name)
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single detected (or hand-drawn) box with its predicted part class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
}

impl DetectionBox {
    pub fn new(bbox: NormalizedBox, confidence: f32, class_id: i32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
        }
    }

    /// A box the operator drew and labelled by hand.
    pub fn manual(bbox: NormalizedBox, class_name: impl Into<String>) -> Self {
        Self::new(bbox, MANUAL_CONFIDENCE, MANUAL_CLASS_ID, class_name)
    }
}

/// Per-class summary computed by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub class_name: String,
    pub quantity: u32,
    #[serde(default)]
    pub avg_confidence: f32,
    /// Encoded crop images, one per detected box.
    #[serde(default)]
    pub crops: Vec<String>,
}

/// Response of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub summary: Vec<DetectionSummary>,
    /// Annotated source image, embedded.
    pub original_image: String,
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
}

impl PredictionResponse {
    /// The detection the model is most confident about.
    pub fn top_detection(&self) -> Option<&DetectionBox> {
        self.detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Detection output for one photographed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDetectionResult {
    pub view: ViewKind,
    /// Reference to the source image (URL or embedded data).
    pub original_image: String,
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
    /// Precomputed summary, valid while the view has not been re-edited locally.
    #[serde(default)]
    pub summary: Vec<DetectionSummary>,
}

impl ViewDetectionResult {
    pub fn new(view: ViewKind, original_image: impl Into<String>) -> Self {
        Self {
            view,
            original_image: original_image.into(),
            detections: Vec::new(),
            summary: Vec::new(),
        }
    }

    /// Build a view result from an inference response.
    pub fn from_prediction(view: ViewKind, prediction: PredictionResponse) -> Self {
        Self {
            view,
            original_image: prediction.original_image,
            detections: prediction.detections,
            summary: prediction.summary,
        }
    }

    /// Count detections per class name, in order of first appearance.
    pub fn count_by_class(&self) -> Vec<(String, u32)> {
        let mut counts: Vec<(String, u32)> = Vec::new();
        for det in &self.detections {
            match counts.iter_mut().find(|(name, _)| *name == det.class_name) {
                Some((_, count)) => *count += 1,
                None => counts.push((det.class_name.clone(), 1)),
            }
        }
        counts
    }

    /// Rebuild the summary from the current detections.
    ///
    /// Crops of classes that are still present are kept, capped at the new
    /// quantity; boxes drawn by hand have no crop.
    pub fn refresh_summary(&mut self) {
        let mut previous = std::mem::take(&mut self.summary);
        for (class_name, quantity) in self.count_by_class() {
            let (sum, n) = self
                .detections
                .iter()
                .filter(|d| d.class_name == class_name)
                .fold((0.0_f32, 0_u32), |(sum, n), d| (sum + d.confidence, n + 1));
            let mut crops = previous
                .iter_mut()
                .find(|s| s.class_name == class_name)
                .map(|s| std::mem::take(&mut s.crops))
                .unwrap_or_default();
            crops.truncate(quantity as usize);
            self.summary.push(DetectionSummary {
                class_name,
                quantity,
                avg_confidence: if n > 0 { sum / n as f32 } else { 0.0 },
                crops,
            });
        }
    }
}

/// Thresholds passed to the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    pub confidence: f32,
    pub iou: f32,
}

impl DetectionSettings {
    pub const DEFAULT_CONFIDENCE: f32 = 0.25;
    pub const DEFAULT_IOU: f32 = 0.7;

    pub fn new(confidence: f32, iou: f32) -> Self {
        Self { confidence, iou }
    }

    /// Replace unset (zero) thresholds with those from `defaults`.
    pub fn or_defaults(self, defaults: DetectionSettings) -> Self {
        Self {
            confidence: if self.confidence > 0.0 {
                self.confidence
            } else {
                defaults.confidence
            },
            iou: if self.iou > 0.0 { self.iou } else { defaults.iou },
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONFIDENCE, Self::DEFAULT_IOU)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_result_wire_format() {
        let json = r#"{
            "view": "side",
            "originalImage": "data:image/jpeg;base64,AAAA",
            "detections": [
                {"box": [0.5, 0.5, 0.1, 0.2], "confidence": 0.91, "class_id": 3, "class_name": "MCB-16A"}
            ],
            "summary": [
                {"class_name": "MCB-16A", "quantity": 1, "avg_confidence": 0.91, "crops": ["c0"]}
            ]
        }"#;
        let result: ViewDetectionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.view, ViewKind::Side);
        assert_eq!(result.detections[0].bbox, NormalizedBox::new(0.5, 0.5, 0.1, 0.2));
        assert_eq!(result.detections[0].class_id, 3);
        assert_eq!(result.summary[0].crops, vec!["c0".to_string()]);

        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("originalImage").is_some());
        assert!(value["detections"][0].get("box").is_some());
    }

    #[test]
    fn test_count_by_class_first_appearance_order() {
        let mut result = ViewDetectionResult::new(ViewKind::Top, "img");
        let b = NormalizedBox::new(0.5, 0.5, 0.1, 0.1);
        for name in ["B", "A", "B", "C", "A", "B"] {
            result.detections.push(DetectionBox::new(b, 0.8, 0, name));
        }
        assert_eq!(
            result.count_by_class(),
            vec![("B".to_string(), 3), ("A".to_string(), 2), ("C".to_string(), 1)]
        );
    }

    #[test]
    fn test_refresh_summary_follows_edits() {
        let b = NormalizedBox::new(0.5, 0.5, 0.1, 0.1);
        let mut result = ViewDetectionResult::new(ViewKind::Front, "img");
        result.detections = vec![
            DetectionBox::new(b, 0.8, 1, "Relay"),
            DetectionBox::new(b, 0.6, 2, "Fuse"),
        ];
        result.summary = vec![
            DetectionSummary {
                class_name: "Relay".to_string(),
                quantity: 2,
                avg_confidence: 0.7,
                crops: vec!["r0".to_string(), "r1".to_string()],
            },
            DetectionSummary {
                class_name: "Fuse".to_string(),
                quantity: 1,
                avg_confidence: 0.6,
                crops: vec!["f0".to_string()],
            },
        ];
        result.detections.push(DetectionBox::manual(b, "Relay"));
        result.detections.remove(1);

        result.refresh_summary();
        assert_eq!(result.summary.len(), 1);
        let relay = &result.summary[0];
        assert_eq!(relay.quantity, 2);
        assert!((relay.avg_confidence - 0.9).abs() < 1e-6);
        assert_eq!(relay.crops, vec!["r0".to_string(), "r1".to_string()]);
    }

    #[test]
    fn test_top_detection() {
        let b = NormalizedBox::new(0.5, 0.5, 0.1, 0.1);
        let prediction = PredictionResponse {
            summary: Vec::new(),
            original_image: String::new(),
            detections: vec![
                DetectionBox::new(b, 0.4, 1, "Relay"),
                DetectionBox::new(b, 0.9, 2, "Contactor"),
                DetectionBox::new(b, 0.6, 3, "Fuse"),
            ],
        };
        assert_eq!(prediction.top_detection().unwrap().class_name, "Contactor");
    }

    #[test]
    fn test_settings_or_defaults() {
        let settings = DetectionSettings::new(0.0, 0.5).or_defaults(DetectionSettings::default());
        assert_eq!(settings, DetectionSettings::new(0.25, 0.5));
    }

    #[test]
    fn test_view_names_round_trip() {
        for view in ViewKind::all() {
            assert_eq!(ViewKind::from_name(view.name()), Some(*view));
        }
        assert_eq!(ViewKind::from_name("diagonal"), None);
    }
}
