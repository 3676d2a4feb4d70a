//! The user-editable list of actual parts.
//!
//! Every successful mutation bumps a revision counter. The autosave
//! coordinator watches that counter instead of diffing the list.

use crate::error::ValidationError;
use crate::model::{ActualPart, ViewKind};

/// Ordered list of actual parts, unique by material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActualPartsList {
    parts: Vec<ActualPart>,
    revision: u64,
}

impl ActualPartsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries. Later duplicates of a material are dropped.
    pub fn from_parts(parts: Vec<ActualPart>) -> Self {
        let mut list = Self::new();
        for part in parts {
            if list.get(&part.material).is_some() {
                log::warn!("Dropping duplicate actual part '{}'", part.material);
                continue;
            }
            list.parts.push(part);
        }
        list
    }

    /// Replace the contents (hydration). Counts as one revision.
    pub fn replace(&mut self, parts: Vec<ActualPart>) {
        let revision = self.revision + 1;
        *self = Self::from_parts(parts);
        self.revision = revision;
    }

    pub fn parts(&self) -> &[ActualPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Monotonic counter of applied mutations.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, material: &str) -> Option<&ActualPart> {
        self.parts.iter().find(|p| p.material == material)
    }

    pub fn contains(&self, material: &str) -> bool {
        self.get(material).is_some()
    }

    fn get_mut(&mut self, material: &str) -> Option<&mut ActualPart> {
        self.parts.iter_mut().find(|p| p.material == material)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Add a manually typed part with quantity 1.
    pub fn add_manual(&mut self, name: &str) -> Result<&ActualPart, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyPartName);
        }
        let lower = name.to_lowercase();
        if self.parts.iter().any(|p| p.material.to_lowercase() == lower) {
            return Err(ValidationError::DuplicatePart {
                name: name.to_string(),
            });
        }
        self.parts.push(ActualPart::new(name, 1));
        self.touch();
        log::debug!("Added manual part '{}'", name);
        Ok(&self.parts[self.parts.len() - 1])
    }

    /// Remove a part. Returns the removed entry.
    pub fn remove(&mut self, material: &str) -> Option<ActualPart> {
        let index = self.parts.iter().position(|p| p.material == material)?;
        let removed = self.parts.remove(index);
        self.touch();
        Some(removed)
    }

    /// Set the quantity of an existing part.
    pub fn set_qty(&mut self, material: &str, qty: u32) -> Result<(), ValidationError> {
        if qty == 0 {
            return Err(ValidationError::NonPositiveQuantity {
                name: material.to_string(),
            });
        }
        let part = self
            .get_mut(material)
            .ok_or_else(|| ValidationError::UnknownPart {
                name: material.to_string(),
            })?;
        if part.qty != qty {
            part.qty = qty;
            self.touch();
        }
        Ok(())
    }

    /// Tag or untag a view on an existing part.
    pub fn set_view(&mut self, material: &str, view: ViewKind, tagged: bool) -> Result<(), ValidationError> {
        let part = self
            .get_mut(material)
            .ok_or_else(|| ValidationError::UnknownPart {
                name: material.to_string(),
            })?;
        let changed = if tagged {
            part.views.insert(view)
        } else {
            part.views.remove(&view)
        };
        if changed {
            self.touch();
        }
        Ok(())
    }

    /// Commit a detected quantity.
    ///
    /// An existing entry has `qty` added and its views unioned; otherwise a
    /// new entry is created with exactly `qty`.
    pub(crate) fn merge_detected(&mut self, material: &str, qty: u32, views: impl IntoIterator<Item = ViewKind>) {
        match self.get_mut(material) {
            Some(part) => {
                part.qty = part.qty.saturating_add(qty);
                part.views.extend(views);
            }
            None => self
                .parts
                .push(ActualPart::new(material, qty).with_views(views)),
        }
        self.touch();
    }
}
