//! Consolidation of per-view detection results into per-part totals.
//!
//! The aggregate is derived data. It is recomputed from the view results (and
//! the view currently open for editing, if any) and never persisted.

use std::collections::{HashMap, HashSet};

use crate::model::{ViewDetectionResult, ViewKind};

/// Detections of one part within one view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewBreakdown {
    pub view: ViewKind,
    /// Source image of the view.
    pub image: String,
    /// Crop images; empty for counts taken from a live edit.
    pub crops: Vec<String>,
    pub qty: u32,
}

/// Consolidated detections of one part across all views.
#[derive(Debug, Clone, PartialEq)]
pub struct PartAggregate {
    pub name: String,
    pub is_multi_view: bool,
    pub total_detected: u32,
    /// One entry per view, in result order.
    pub by_view: Vec<ViewBreakdown>,
}

impl PartAggregate {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_multi_view: false,
            total_detected: 0,
            by_view: Vec::new(),
        }
    }

    fn add(&mut self, view: ViewKind, image: &str, qty: u32, crops: &[String]) {
        match self.by_view.iter_mut().find(|b| b.view == view) {
            Some(existing) => {
                existing.qty = existing.qty.saturating_add(qty);
                existing.crops.extend_from_slice(crops);
            }
            None => self.by_view.push(ViewBreakdown {
                view,
                image: image.to_string(),
                crops: crops.to_vec(),
                qty,
            }),
        }
        self.total_detected = self.total_detected.saturating_add(qty);
        self.is_multi_view = self.by_view.len() > 1;
    }

    /// Views this part was detected in.
    pub fn views(&self) -> impl Iterator<Item = ViewKind> + '_ {
        self.by_view.iter().map(|b| b.view)
    }

    /// Largest quantity seen in a single view.
    ///
    /// Used as the default commit quantity, since several views usually show
    /// the same physical items.
    pub fn max_view_qty(&self) -> u32 {
        self.by_view.iter().map(|b| b.qty).max().unwrap_or(0)
    }

    pub fn breakdown(&self, view: ViewKind) -> Option<&ViewBreakdown> {
        self.by_view.iter().find(|b| b.view == view)
    }
}

/// Per-part aggregate over all views, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionAggregate {
    parts: Vec<PartAggregate>,
    index: HashMap<String, usize>,
}

impl DetectionAggregate {
    fn entry(&mut self, name: &str) -> &mut PartAggregate {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.parts.push(PartAggregate::new(name));
                let idx = self.parts.len() - 1;
                self.index.insert(name.to_string(), idx);
                idx
            }
        };
        &mut self.parts[idx]
    }

    pub fn get(&self, name: &str) -> Option<&PartAggregate> {
        self.index.get(name).map(|&idx| &self.parts[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn parts(&self) -> &[PartAggregate] {
        &self.parts
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Parts for display: not-yet-migrated first, otherwise stable.
    pub fn ordered<'a>(&'a self, migrated: &HashSet<String>) -> Vec<&'a PartAggregate> {
        let mut parts: Vec<&PartAggregate> = self.parts.iter().collect();
        parts.sort_by_key(|p| migrated.contains(&p.name));
        parts
    }

    /// Number of parts not yet migrated.
    pub fn unmigrated_count(&self, migrated: &HashSet<String>) -> usize {
        self.parts.iter().filter(|p| !migrated.contains(&p.name)).count()
    }
}

/// Build the per-part aggregate.
///
/// The view matching `edited` is counted from its live detection list instead
/// of its stored summary. Entries with a zero count are ignored.
pub fn aggregate(results: &[ViewDetectionResult], edited: Option<&ViewDetectionResult>) -> DetectionAggregate {
    let mut agg = DetectionAggregate::default();

    for result in results {
        match edited {
            Some(live) if live.view == result.view => {
                for (name, qty) in live.count_by_class() {
                    agg.entry(&name).add(result.view, &result.original_image, qty, &[]);
                }
            }
            _ => {
                for item in result.summary.iter().filter(|s| s.quantity > 0) {
                    agg.entry(&item.class_name).add(
                        result.view,
                        &result.original_image,
                        item.quantity,
                        &item.crops,
                    );
                }
            }
        }
    }

    log::trace!("Aggregated {} parts from {} views", agg.len(), results.len());
    agg
}

/// Inputs an aggregate was computed from, identified by revision counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateKey {
    pub results_revision: u64,
    /// Revision of the open edit session, `None` when nothing is being edited.
    pub edit_revision: Option<u64>,
}

/// Memoizes [`aggregate`] for one key.
#[derive(Debug, Default)]
pub struct AggregateCache {
    entry: Option<(AggregateKey, DetectionAggregate)>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached aggregate for `key`, recomputing on a key change.
    pub fn get_or_compute(
        &mut self,
        key: AggregateKey,
        results: &[ViewDetectionResult],
        edited: Option<&ViewDetectionResult>,
    ) -> &DetectionAggregate {
        if !self.is_cached(key) {
            self.entry = None;
        }
        let (_, agg) = self
            .entry
            .get_or_insert_with(|| (key, aggregate(results, edited)));
        agg
    }

    /// Whether an aggregate for `key` is cached.
    pub fn is_cached(&self, key: AggregateKey) -> bool {
        matches!(&self.entry, Some((cached, _)) if *cached == key)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBox;
    use crate::model::{DetectionBox, DetectionSummary};

    fn summary(name: &str, qty: u32) -> DetectionSummary {
        DetectionSummary {
            class_name: name.to_string(),
            quantity: qty,
            avg_confidence: 0.8,
            crops: (0..qty).map(|i| format!("{name}-crop{i}")).collect(),
        }
    }

    fn view(view: ViewKind, items: &[(&str, u32)]) -> ViewDetectionResult {
        let mut r = ViewDetectionResult::new(view, format!("{view}.jpg"));
        r.summary = items.iter().map(|(n, q)| summary(n, *q)).collect();
        r
    }

    #[test]
    fn test_two_views_sum_and_multi_view() {
        let results = vec![
            view(ViewKind::Top, &[("PartA", 2)]),
            view(ViewKind::Side, &[("PartA", 3)]),
        ];
        let agg = aggregate(&results, None);
        let a = agg.get("PartA").unwrap();
        assert_eq!(a.total_detected, 5);
        assert!(a.is_multi_view);
        assert_eq!(a.max_view_qty(), 3);
        assert_eq!(a.breakdown(ViewKind::Top).unwrap().crops.len(), 2);
        assert_eq!(a.breakdown(ViewKind::Side).unwrap().image, "side.jpg");
    }

    #[test]
    fn test_total_is_sum_of_views_and_multi_view_iff_many() {
        let results = vec![
            view(ViewKind::Top, &[("A", 1), ("B", 4)]),
            view(ViewKind::Front, &[("B", 2), ("C", 7)]),
            view(ViewKind::Behind, &[("A", 5)]),
        ];
        let agg = aggregate(&results, None);
        for part in agg.parts() {
            let sum: u32 = part.by_view.iter().map(|b| b.qty).sum();
            assert_eq!(part.total_detected, sum);
            assert_eq!(part.is_multi_view, part.by_view.len() > 1);
        }
        assert!(!agg.get("C").unwrap().is_multi_view);
        let names: Vec<_> = agg.names().collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_zero_quantity_parts_never_appear() {
        let results = vec![view(ViewKind::Top, &[("Ghost", 0)]), view(ViewKind::Side, &[])];
        let agg = aggregate(&results, None);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_edited_view_counts_live_detections() {
        let results = vec![
            view(ViewKind::Top, &[("A", 2)]),
            view(ViewKind::Side, &[("A", 3)]),
        ];
        let mut live = results[1].clone();
        let b = NormalizedBox::new(0.5, 0.5, 0.1, 0.1);
        live.detections = vec![
            DetectionBox::new(b, 0.9, 0, "A"),
            DetectionBox::manual(b, "B"),
        ];

        let agg = aggregate(&results, Some(&live));
        let a = agg.get("A").unwrap();
        assert_eq!(a.total_detected, 3);
        assert!(a.breakdown(ViewKind::Side).unwrap().crops.is_empty());
        assert_eq!(agg.get("B").unwrap().total_detected, 1);
    }

    #[test]
    fn test_duplicate_view_tags_merge_into_one_breakdown() {
        let results = vec![
            view(ViewKind::Top, &[("A", 2)]),
            view(ViewKind::Top, &[("A", 1)]),
        ];
        let a = aggregate(&results, None).get("A").cloned().unwrap();
        assert_eq!(a.by_view.len(), 1);
        assert_eq!(a.total_detected, 3);
        assert!(!a.is_multi_view);
    }

    #[test]
    fn test_ordered_puts_migrated_last_stably() {
        let results = vec![view(
            ViewKind::Top,
            &[("A", 1), ("B", 1), ("C", 1), ("D", 1)],
        )];
        let agg = aggregate(&results, None);
        let migrated: HashSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
        let names: Vec<_> = agg.ordered(&migrated).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["B", "D", "A", "C"]);
        assert_eq!(agg.unmigrated_count(&migrated), 2);
    }

    #[test]
    fn test_cache_recomputes_on_key_change() {
        let mut results = vec![view(ViewKind::Top, &[("A", 1)])];
        let mut cache = AggregateCache::new();
        let key = AggregateKey {
            results_revision: 1,
            edit_revision: None,
        };
        assert_eq!(cache.get_or_compute(key, &results, None).len(), 1);
        assert!(cache.is_cached(key));

        // Same key: stale inputs are not re-read
        results.push(view(ViewKind::Side, &[("B", 1)]));
        assert_eq!(cache.get_or_compute(key, &results, None).len(), 1);

        let next = AggregateKey {
            results_revision: 2,
            edit_revision: None,
        };
        assert_eq!(cache.get_or_compute(next, &results, None).len(), 2);
        assert!(!cache.is_cached(key));
    }

    #[test]
    fn test_huge_summaries_saturate() {
        let mut huge = view(ViewKind::Top, &[]);
        huge.summary.push(DetectionSummary {
            class_name: "A".to_string(),
            quantity: u32::MAX,
            avg_confidence: 0.8,
            crops: Vec::new(),
        });
        let results = vec![
            huge,
            view(ViewKind::Top, &[("A", 3)]),
            view(ViewKind::Side, &[("A", 2)]),
        ];
        let agg = aggregate(&results, None);
        let a = agg.get("A").unwrap();
        assert_eq!(a.breakdown(ViewKind::Top).unwrap().qty, u32::MAX);
        assert_eq!(a.total_detected, u32::MAX);
    }
}
