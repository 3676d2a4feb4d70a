//! Remote collaborators the tracking session talks to.
//!
//! The traits describe the calls only. Transport, authentication headers and
//! retries belong to the implementations; the session never retries on its
//! own.

use std::future::Future;

use serde::de::DeserializeOwned;

use crate::catalog::BomMaterial;
use crate::error::ServiceError;
use crate::model::{
    DetectionResultsPayload, DetectionSettings, PredictionResponse, TrackingPayload, TrackingRecord,
};

/// What the caller is allowed to do.
///
/// `role` is forwarded untouched; only `can_edit` is interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub role: String,
    pub can_edit: bool,
}

impl Capabilities {
    pub fn editor(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            can_edit: true,
        }
    }

    pub fn read_only(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            can_edit: false,
        }
    }
}

/// Object-detection model endpoint.
pub trait InferenceService {
    /// Run detection on one encoded image.
    fn predict(
        &self,
        image: &[u8],
        settings: DetectionSettings,
    ) -> impl Future<Output = Result<PredictionResponse, ServiceError>>;
}

/// Persistence of tracking records.
pub trait TrackingStore {
    /// `GET` the full record.
    fn get_record(&self, id: i64) -> impl Future<Output = Result<TrackingRecord, ServiceError>>;

    /// `PUT` general fields and actual parts.
    fn put_record(
        &self,
        id: i64,
        payload: &TrackingPayload,
    ) -> impl Future<Output = Result<(), ServiceError>>;

    /// `PUT .../detection-results` with settings and every view result.
    fn put_detection_results(
        &self,
        id: i64,
        payload: &DetectionResultsPayload,
    ) -> impl Future<Output = Result<(), ServiceError>>;

    /// `DELETE .../detection-results`. Actual parts are left alone.
    fn delete_detection_results(&self, id: i64) -> impl Future<Output = Result<(), ServiceError>>;
}

/// Read-only list of known materials.
pub trait MaterialsCatalog {
    fn list_materials(&self) -> impl Future<Output = Result<Vec<BomMaterial>, ServiceError>>;
}

/// Decode a JSON response body.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_prediction_response() {
        let body = r#"{
            "summary": [{"class_name": "MCB-16A", "quantity": 2, "avg_confidence": 0.8, "crops": ["c1", "c2"]}],
            "original_image": "data:image/jpeg;base64,AAAA",
            "detections": [
                {"box": [0.5, 0.5, 0.1, 0.2], "confidence": 0.9, "class_id": 3, "class_name": "MCB-16A"},
                {"box": [0.2, 0.3, 0.1, 0.2], "confidence": 0.7, "class_id": 3, "class_name": "MCB-16A"}
            ]
        }"#;
        let response: PredictionResponse = decode_json(body).unwrap();
        assert_eq!(response.detections.len(), 2);
        assert_eq!(response.summary[0].quantity, 2);
        assert_eq!(response.top_detection().unwrap().confidence, 0.9);
    }

    #[test]
    fn test_decode_error_is_reported() {
        let err = decode_json::<TrackingRecord>("{not json").unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
    }
}
