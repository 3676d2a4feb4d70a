//! Data models shared by the reconciliation engine and its collaborators.

mod detection;
mod part;
mod tracking;

pub use detection::{
    DetectionBox, DetectionSettings, DetectionSummary, PredictionResponse, ViewDetectionResult,
    ViewKind, MANUAL_CLASS_ID, MANUAL_CONFIDENCE,
};
pub use part::ActualPart;
pub use tracking::{
    DetectionResultsPayload, NullInt64, NullString, NullTime, TestStatus, TrackingPayload,
    TrackingRecord,
};
