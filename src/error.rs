//! Error types for tracking and reconciliation operations.

use thiserror::Error;

use crate::model::ViewKind;

/// Operator input that was rejected locally. No state is mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Part name is empty after trimming
    #[error("Part name must not be empty")]
    EmptyPartName,

    /// Part already present in the actual list (case-insensitive)
    #[error("Part '{name}' is already in the list")]
    DuplicatePart {
        /// The rejected name
        name: String,
    },

    /// Part not present in the actual list
    #[error("Part '{name}' is not in the list")]
    UnknownPart {
        /// The missing name
        name: String,
    },

    /// Quantity must be greater than zero
    #[error("Quantity for '{name}' must be greater than 0")]
    NonPositiveQuantity {
        /// Part the quantity was meant for
        name: String,
    },

    /// Part has no detection aggregate to migrate from
    #[error("Part '{name}' was not detected in any view")]
    NotDetected {
        /// The undetected part name
        name: String,
    },

    /// Part already committed to the actual list
    #[error("Part '{name}' has already been migrated")]
    AlreadyMigrated {
        /// The migrated part name
        name: String,
    },

    /// Part is not migrated, so there is nothing to revert
    #[error("Part '{name}' has not been migrated")]
    NotMigrated {
        /// The part name
        name: String,
    },

    /// Migrate-all found no part with a positive pending quantity
    #[error("No parts to migrate (make sure quantities are greater than 0)")]
    NothingToMigrate,

    /// Revert-all found no detected part in the actual list
    #[error("No detected parts to revert")]
    NothingToRevert,

    /// No images were uploaded before starting detection
    #[error("No images uploaded")]
    NoUploads,

    /// An upload has no view tag or no image data
    #[error("Upload #{index} needs a view and image data before detection")]
    MissingView {
        /// Position of the offending upload
        index: usize,
    },

    /// Saved detections must be reset before uploading again
    #[error("Reset saved detections before uploading new images")]
    DetectionsLocked,

    /// View has no detection result
    #[error("No detection result for view '{view}'")]
    UnknownView {
        /// The requested view
        view: ViewKind,
    },

    /// Edit operation without an open annotation session
    #[error("No annotation edit session is open")]
    NoEditSession,

    /// Detection index out of range for the open view
    #[error("Detection index {index} out of range ({len} detections)")]
    DetectionIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of detections in the view
        len: usize,
    },

    /// Manually drawn box waiting for a label is missing
    #[error("No drawn box is waiting for a part name")]
    NoPendingBox,

    /// Part name is not in the materials catalog
    #[error("Part '{name}' is not a known material")]
    UnknownMaterial {
        /// The rejected name
        name: String,
    },

    /// Caller lacks the edit capability
    #[error("Editing is not permitted for role '{role}'")]
    EditNotPermitted {
        /// The caller's role
        role: String,
    },

    /// Another save on the same record has not resolved yet
    #[error("A save is already in progress")]
    SaveInProgress,
}

/// Failure of a remote collaborator call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Connection or transport failure
    #[error("Request failed: {0}")]
    Transport(String),

    /// Non-success response
    #[error("Server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Create a status error with a message.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }
}

/// Errors surfaced by tracking operations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Rejected operator input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Remote call failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Image decode/encode failure
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Whether this error came from local validation (shown as a warning).
    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }
}

/// Convenience alias for tracker results.
pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
