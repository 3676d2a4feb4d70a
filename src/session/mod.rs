//! A tracking record opened for reconciliation.

mod tracking;

#[cfg(test)]
mod tests;

pub use tracking::{DetectionRunReport, FailedView, TrackingSession, Upload};
