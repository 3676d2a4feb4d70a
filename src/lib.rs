//! Part Tracker - multi-view detection reconciliation
//!
//! Aggregates object-detection results from several photographed views of a
//! compartment, lets an operator correct the boxes on a zoomable canvas, and
//! commits the detected quantities into an editable actual-parts list that is
//! saved back with a debounced autosave.

pub mod aggregate;
pub mod annotation;
pub mod autosave;
pub mod catalog;
pub mod color_utils;
pub mod config;
pub mod error;
pub mod geometry;
pub mod migration;
pub mod model;
pub mod parts;
pub mod service;
pub mod session;

pub use aggregate::{DetectionAggregate, PartAggregate, ViewBreakdown, aggregate};
pub use annotation::{AnnotationEditor, DrawnBox, EditMode};
pub use autosave::{AutoSaveCoordinator, Clock, DebounceTimer, ManualClock, SaveGate, SystemClock};
pub use config::TrackerConfig;
pub use error::{Result, ServiceError, TrackerError, ValidationError};
pub use migration::{MigrationReport, MigrationState, PartStage};
pub use parts::ActualPartsList;
pub use service::{Capabilities, InferenceService, MaterialsCatalog, TrackingStore};
pub use session::{DetectionRunReport, TrackingSession, Upload};
