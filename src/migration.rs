//! Committing detected quantities into the actual-parts list, and reverting.
//!
//! Per part name the stages are `Undetected -> Detected -> Migrated`, with
//! revert taking a migrated part back to `Detected`. A migrated name always
//! exists in the actual list.

use std::collections::{HashMap, HashSet};

use crate::aggregate::{DetectionAggregate, PartAggregate};
use crate::error::ValidationError;
use crate::model::ActualPart;
use crate::parts::ActualPartsList;

/// Where a part name stands relative to detection and the actual list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStage {
    /// Not present in any aggregate; only manual entry applies.
    Undetected,
    /// Detected and waiting to be committed.
    Detected,
    /// Committed into the actual list.
    Migrated,
}

/// Outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Parts that changed, in processing order.
    pub applied: Vec<String>,
    /// Parts passed over (pending quantity of zero).
    pub skipped: Vec<String>,
}

impl MigrationReport {
    pub fn count(&self) -> usize {
        self.applied.len()
    }
}

/// Migrated names plus the operator-chosen quantity per part.
#[derive(Debug, Clone, Default)]
pub struct MigrationState {
    migrated: HashSet<String>,
    pending_qty: HashMap<String, u32>,
}

impl MigrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn migrated(&self) -> &HashSet<String> {
        &self.migrated
    }

    pub fn is_migrated(&self, name: &str) -> bool {
        self.migrated.contains(name)
    }

    pub fn stage(&self, name: &str, aggregate: &DetectionAggregate) -> PartStage {
        if !aggregate.contains(name) {
            PartStage::Undetected
        } else if self.is_migrated(name) {
            PartStage::Migrated
        } else {
            PartStage::Detected
        }
    }

    /// Quantity that will be committed for `name`, if one has been chosen.
    pub fn pending_qty(&self, name: &str) -> Option<u32> {
        self.pending_qty.get(name).copied()
    }

    /// Override the quantity to commit. Zero is accepted but blocks migration.
    pub fn set_pending_qty(&mut self, name: &str, qty: u32) {
        self.pending_qty.insert(name.to_string(), qty);
    }

    fn pending_for(&self, part: &PartAggregate) -> u32 {
        self.pending_qty(&part.name)
            .unwrap_or_else(|| part.max_view_qty())
    }

    /// Give every newly seen part its default quantity, the largest
    /// single-view count. Existing choices are kept.
    pub fn sync_defaults(&mut self, aggregate: &DetectionAggregate) {
        for part in aggregate.parts() {
            self.pending_qty
                .entry(part.name.clone())
                .or_insert_with(|| part.max_view_qty());
        }
    }

    /// Rebuild the migrated set after hydration: a detected part already in
    /// the actual list counts as migrated.
    pub fn reconcile(&mut self, aggregate: &DetectionAggregate, parts: &ActualPartsList) {
        self.migrated = aggregate
            .names()
            .filter(|name| parts.contains(name))
            .map(str::to_string)
            .collect();
        self.sync_defaults(aggregate);
    }

    /// Drop migrated names whose actual entry no longer exists.
    pub fn retain_existing(&mut self, parts: &ActualPartsList) {
        self.migrated.retain(|name| parts.contains(name));
    }

    /// Forget everything (new detection run or reset).
    pub fn clear(&mut self) {
        self.migrated.clear();
        self.pending_qty.clear();
    }

    /// Commit one detected part. Returns the quantity added.
    pub fn migrate_one(
        &mut self,
        name: &str,
        aggregate: &DetectionAggregate,
        parts: &mut ActualPartsList,
    ) -> Result<u32, ValidationError> {
        let part = aggregate.get(name).ok_or_else(|| ValidationError::NotDetected {
            name: name.to_string(),
        })?;
        if self.is_migrated(name) {
            return Err(ValidationError::AlreadyMigrated {
                name: name.to_string(),
            });
        }
        let qty = self.pending_for(part);
        if qty == 0 {
            return Err(ValidationError::NonPositiveQuantity {
                name: name.to_string(),
            });
        }

        parts.merge_detected(name, qty, part.views());
        self.migrated.insert(name.to_string());
        log::info!("Migrated {} (qty {})", name, qty);
        Ok(qty)
    }

    /// Commit every detected part that is not migrated yet.
    ///
    /// Parts with a pending quantity of zero are skipped. Migrating nothing at
    /// all is reported as [`ValidationError::NothingToMigrate`].
    pub fn migrate_all(
        &mut self,
        aggregate: &DetectionAggregate,
        parts: &mut ActualPartsList,
    ) -> Result<MigrationReport, ValidationError> {
        let mut report = MigrationReport::default();
        for part in aggregate.parts() {
            if self.is_migrated(&part.name) {
                continue;
            }
            let qty = self.pending_for(part);
            if qty == 0 {
                report.skipped.push(part.name.clone());
                continue;
            }
            parts.merge_detected(&part.name, qty, part.views());
            self.migrated.insert(part.name.clone());
            report.applied.push(part.name.clone());
        }

        if report.applied.is_empty() {
            return Err(ValidationError::NothingToMigrate);
        }
        log::info!(
            "Migrated {} parts ({} skipped)",
            report.count(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Take a detected part back out of the actual list.
    ///
    /// The entry is removed entirely, including any quantity edited by hand
    /// after migration. The pending quantity resets to the detected total.
    pub fn revert_one(
        &mut self,
        name: &str,
        aggregate: &DetectionAggregate,
        parts: &mut ActualPartsList,
    ) -> Result<ActualPart, ValidationError> {
        let part = aggregate.get(name).ok_or_else(|| ValidationError::NotDetected {
            name: name.to_string(),
        })?;
        let removed = parts.remove(name).ok_or_else(|| ValidationError::NotMigrated {
            name: name.to_string(),
        })?;
        self.migrated.remove(name);
        self.pending_qty.insert(name.to_string(), part.total_detected);
        log::info!("Reverted {} to detection results", name);
        Ok(removed)
    }

    /// Revert every actual part whose material is a detected part name.
    /// Manually entered parts are untouched.
    pub fn revert_all(
        &mut self,
        aggregate: &DetectionAggregate,
        parts: &mut ActualPartsList,
    ) -> Result<MigrationReport, ValidationError> {
        let targets: Vec<String> = parts
            .parts()
            .iter()
            .filter(|p| aggregate.contains(&p.material))
            .map(|p| p.material.clone())
            .collect();
        if targets.is_empty() {
            return Err(ValidationError::NothingToRevert);
        }

        let mut report = MigrationReport::default();
        for name in targets {
            self.revert_one(&name, aggregate, parts)?;
            report.applied.push(name);
        }
        log::info!("Reverted {} parts", report.count());
        Ok(report)
    }

    /// Number of actual parts that revert-all would remove.
    pub fn revertable_count(&self, aggregate: &DetectionAggregate, parts: &ActualPartsList) -> usize {
        parts
            .parts()
            .iter()
            .filter(|p| aggregate.contains(&p.material))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::model::{DetectionSummary, ViewDetectionResult, ViewKind};

    fn view(view: ViewKind, items: &[(&str, u32)]) -> ViewDetectionResult {
        let mut r = ViewDetectionResult::new(view, "img");
        r.summary = items
            .iter()
            .map(|(n, q)| DetectionSummary {
                class_name: n.to_string(),
                quantity: *q,
                avg_confidence: 0.9,
                crops: Vec::new(),
            })
            .collect();
        r
    }

    fn setup() -> (DetectionAggregate, MigrationState, ActualPartsList) {
        let agg = aggregate(
            &[
                view(ViewKind::Top, &[("PartA", 2), ("PartB", 1)]),
                view(ViewKind::Side, &[("PartA", 3)]),
            ],
            None,
        );
        let mut state = MigrationState::new();
        state.sync_defaults(&agg);
        (agg, state, ActualPartsList::new())
    }

    #[test]
    fn test_default_pending_is_max_single_view() {
        let (agg, state, _) = setup();
        assert_eq!(agg.get("PartA").unwrap().total_detected, 5);
        assert_eq!(state.pending_qty("PartA"), Some(3));
        assert_eq!(state.pending_qty("PartB"), Some(1));
    }

    #[test]
    fn test_sync_defaults_keeps_overrides() {
        let (agg, mut state, _) = setup();
        state.set_pending_qty("PartA", 7);
        state.sync_defaults(&agg);
        assert_eq!(state.pending_qty("PartA"), Some(7));
    }

    #[test]
    fn test_migrate_one_creates_entry_with_views() {
        let (agg, mut state, mut parts) = setup();
        assert_eq!(state.migrate_one("PartA", &agg, &mut parts), Ok(3));
        let entry = parts.get("PartA").unwrap();
        assert_eq!(entry.qty, 3);
        assert!(entry.views.contains(&ViewKind::Top));
        assert!(entry.views.contains(&ViewKind::Side));
        assert_eq!(state.stage("PartA", &agg), PartStage::Migrated);
        assert_eq!(state.stage("Manual", &agg), PartStage::Undetected);
    }

    #[test]
    fn test_migrate_one_adds_to_existing_entry() {
        let (agg, mut state, _) = setup();
        let mut parts = ActualPartsList::from_parts(vec![
            ActualPart::new("PartA", 4).with_views([ViewKind::Front]),
        ]);
        state.migrate_one("PartA", &agg, &mut parts).unwrap();
        let entry = parts.get("PartA").unwrap();
        assert_eq!(entry.qty, 7);
        assert_eq!(entry.views.len(), 3);
    }

    #[test]
    fn test_migrate_one_rejections_leave_state_untouched() {
        let (agg, mut state, mut parts) = setup();
        state.set_pending_qty("PartB", 0);
        assert!(matches!(
            state.migrate_one("PartB", &agg, &mut parts),
            Err(ValidationError::NonPositiveQuantity { .. })
        ));
        assert!(matches!(
            state.migrate_one("Nope", &agg, &mut parts),
            Err(ValidationError::NotDetected { .. })
        ));
        assert!(parts.is_empty());
        assert_eq!(parts.revision(), 0);

        state.migrate_one("PartA", &agg, &mut parts).unwrap();
        let rev = parts.revision();
        assert!(matches!(
            state.migrate_one("PartA", &agg, &mut parts),
            Err(ValidationError::AlreadyMigrated { .. })
        ));
        assert_eq!(parts.get("PartA").unwrap().qty, 3);
        assert_eq!(parts.revision(), rev);
    }

    #[test]
    fn test_migrate_all_skips_zero_and_counts_changes() {
        let (agg, mut state, mut parts) = setup();
        state.set_pending_qty("PartB", 0);
        let before = parts.clone();
        let report = state.migrate_all(&agg, &mut parts).unwrap();
        assert_eq!(report.applied, vec!["PartA".to_string()]);
        assert_eq!(report.skipped, vec!["PartB".to_string()]);

        let changed = parts
            .parts()
            .iter()
            .filter(|p| before.get(&p.material) != Some(p))
            .count();
        assert_eq!(report.count(), changed);
        assert!(!parts.contains("PartB"));
    }

    #[test]
    fn test_migrate_all_nothing_left() {
        let (agg, mut state, mut parts) = setup();
        state.migrate_all(&agg, &mut parts).unwrap();
        assert_eq!(
            state.migrate_all(&agg, &mut parts),
            Err(ValidationError::NothingToMigrate)
        );
    }

    #[test]
    fn test_revert_removes_entry_regardless_of_increments() {
        let (agg, mut state, mut parts) = setup();
        for _ in 0..3 {
            state.migrate_one("PartA", &agg, &mut parts).unwrap();
            // Re-enable migration by dropping the migrated flag
            state.migrated.remove("PartA");
        }
        assert_eq!(parts.get("PartA").unwrap().qty, 9);
        state.migrated.insert("PartA".to_string());

        let removed = state.revert_one("PartA", &agg, &mut parts).unwrap();
        assert_eq!(removed.qty, 9);
        assert!(!parts.contains("PartA"));
        assert!(!state.is_migrated("PartA"));
        assert_eq!(state.pending_qty("PartA"), Some(5));
    }

    #[test]
    fn test_revert_all_leaves_manual_parts() {
        let (agg, mut state, _) = setup();
        let mut parts = ActualPartsList::from_parts(vec![ActualPart::new("Cable Duct", 2)]);
        state.migrate_all(&agg, &mut parts).unwrap();
        assert_eq!(state.revertable_count(&agg, &parts), 2);

        let report = state.revert_all(&agg, &mut parts).unwrap();
        assert_eq!(report.count(), 2);
        assert_eq!(parts.len(), 1);
        assert!(parts.contains("Cable Duct"));
        assert!(state.migrated().is_empty());
        assert_eq!(
            state.revert_all(&agg, &mut parts),
            Err(ValidationError::NothingToRevert)
        );
    }

    #[test]
    fn test_reconcile_marks_existing_detected_parts() {
        let (agg, mut state, _) = setup();
        let parts = ActualPartsList::from_parts(vec![
            ActualPart::new("PartB", 1),
            ActualPart::new("Manual", 1),
        ]);
        state.reconcile(&agg, &parts);
        assert!(state.is_migrated("PartB"));
        assert!(!state.is_migrated("PartA"));
        assert!(!state.is_migrated("Manual"));
    }
}
