//! Tracking record of one equipment compartment, as stored remotely.
//!
//! Nullable columns travel in the store's `{ "String": .., "Valid": .. }`
//! envelope, so they are modelled explicitly rather than as `Option<String>`.

use serde::{Deserialize, Serialize};

use super::{ActualPart, DetectionSettings, ViewDetectionResult};

/// Nullable string column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NullString {
    #[serde(rename = "String")]
    pub string: String,
    #[serde(rename = "Valid")]
    pub valid: bool,
}

impl NullString {
    /// Wrap a value; blank strings become null.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        Self {
            string: trimmed.to_string(),
            valid: !trimmed.is_empty(),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.valid.then_some(self.string.as_str())
    }
}

/// Nullable timestamp column (RFC 3339 text).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NullTime {
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Valid")]
    pub valid: bool,
}

impl NullTime {
    pub fn at(time: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            valid: true,
        }
    }
}

/// Nullable integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NullInt64 {
    #[serde(rename = "Int64")]
    pub int64: i64,
    #[serde(rename = "Valid")]
    pub valid: bool,
}

/// Test progress of a compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestStatus {
    #[default]
    Waiting,
    Tested,
    #[serde(rename = "Already Compared with BOM")]
    ComparedWithBom,
}

impl TestStatus {
    /// Whether the compartment has been through testing.
    pub fn is_tested(&self) -> bool {
        !matches!(self, TestStatus::Waiting)
    }
}

/// Full tracking record as returned by `GET /api/tracking/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub id: i64,
    #[serde(default)]
    pub project_id: Option<NullInt64>,
    #[serde(default)]
    pub project_name: Option<NullString>,
    #[serde(default)]
    pub wbs_number: Option<NullString>,
    pub switchboard_name: String,
    pub compartment_number: String,
    #[serde(default)]
    pub mech_assembly_by: Option<NullString>,
    #[serde(default)]
    pub wiring_type: Option<NullString>,
    #[serde(default)]
    pub wiring_by: Option<NullString>,
    #[serde(default)]
    pub status_test: TestStatus,
    #[serde(default)]
    pub tested_by: Option<NullString>,
    #[serde(default)]
    pub date_tested: Option<NullTime>,
    #[serde(default)]
    pub actual_parts: Option<Vec<ActualPart>>,
    #[serde(default)]
    pub detection_settings: Option<DetectionSettings>,
    #[serde(default)]
    pub detection_results: Option<Vec<ViewDetectionResult>>,
}

impl TrackingRecord {
    /// Change the test status.
    ///
    /// Entering a tested state fills in the tester and date when they are
    /// still empty; going back to `Waiting` clears both.
    pub fn set_status(&mut self, status: TestStatus, username: &str, now: &str) {
        self.status_test = status;
        if status.is_tested() {
            let has_tester = self
                .tested_by
                .as_ref()
                .is_some_and(|t| t.as_str().is_some());
            if !has_tester {
                self.tested_by = Some(NullString::from_text(username));
            }
            let has_date = self.date_tested.as_ref().is_some_and(|d| d.valid);
            if !has_date {
                self.date_tested = Some(NullTime::at(now));
            }
        } else {
            self.tested_by = None;
            self.date_tested = None;
        }
    }

    /// Detection results, or an empty slice when none were saved.
    pub fn results(&self) -> &[ViewDetectionResult] {
        self.detection_results.as_deref().unwrap_or_default()
    }
}

/// Body of `PUT /api/tracking/{id}`: general fields plus the actual parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingPayload {
    pub project_id: Option<NullInt64>,
    pub switchboard_name: String,
    pub compartment_number: String,
    pub mech_assembly_by: Option<NullString>,
    pub wiring_type: Option<NullString>,
    pub wiring_by: Option<NullString>,
    pub status_test: TestStatus,
    pub tested_by: Option<NullString>,
    pub date_tested: Option<NullTime>,
    /// `null` when the list is empty.
    pub actual_parts: Option<Vec<ActualPart>>,
}

impl TrackingPayload {
    pub fn new(record: &TrackingRecord, actual_parts: &[ActualPart]) -> Self {
        Self {
            project_id: record.project_id,
            switchboard_name: record.switchboard_name.clone(),
            compartment_number: record.compartment_number.clone(),
            mech_assembly_by: record.mech_assembly_by.clone(),
            wiring_type: record.wiring_type.clone(),
            wiring_by: record.wiring_by.clone(),
            status_test: record.status_test,
            tested_by: record.tested_by.clone(),
            date_tested: record.date_tested.clone(),
            actual_parts: (!actual_parts.is_empty()).then(|| actual_parts.to_vec()),
        }
    }
}

/// Body of `PUT /api/tracking/{id}/detection-results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResultsPayload {
    pub settings: DetectionSettings,
    pub results: Vec<ViewDetectionResult>,
}
