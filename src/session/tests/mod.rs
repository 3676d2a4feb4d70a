//! Scenario tests for tracking sessions.
//!
//! The collaborators are in-memory fakes driven with
//! `futures::executor::block_on`, and time is a `ManualClock`.
