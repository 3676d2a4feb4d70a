//! Confirmed parts physically present in a compartment.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ViewKind;

/// A confirmed part entry, unique by `material` within a tracking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualPart {
    pub material: String,
    pub qty: u32,
    /// Views the part was seen in.
    #[serde(default)]
    pub views: BTreeSet<ViewKind>,
}

impl ActualPart {
    pub fn new(material: impl Into<String>, qty: u32) -> Self {
        Self {
            material: material.into(),
            qty,
            views: BTreeSet::new(),
        }
    }

    pub fn with_views(mut self, views: impl IntoIterator<Item = ViewKind>) -> Self {
        self.views.extend(views);
        self
    }
}
