//! Read-only materials catalog used to validate and suggest part names.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One catalog entry as served by the materials endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomMaterial {
    pub material: String,
    #[serde(default)]
    pub material_description: String,
}

impl BomMaterial {
    pub fn new(material: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            material: material.into(),
            material_description: description.into(),
        }
    }
}

/// Materials unique by name, in the order first served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialCatalog {
    materials: Vec<BomMaterial>,
}

impl MaterialCatalog {
    /// Build a catalog; later duplicates of a material are dropped.
    pub fn new(materials: Vec<BomMaterial>) -> Self {
        let mut seen = HashSet::new();
        let before = materials.len();
        let materials: Vec<BomMaterial> = materials
            .into_iter()
            .filter(|m| seen.insert(m.material.clone()))
            .collect();
        if materials.len() < before {
            log::debug!(
                "Collapsed {} duplicate catalog entries",
                before - materials.len()
            );
        }
        Self { materials }
    }

    pub fn materials(&self) -> &[BomMaterial] {
        &self.materials
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Exact lookup by material name.
    pub fn find(&self, material: &str) -> Option<&BomMaterial> {
        self.materials.iter().find(|m| m.material == material)
    }

    pub fn contains(&self, material: &str) -> bool {
        self.find(material).is_some()
    }

    /// Entries whose name or description contains `query`, ignoring case.
    /// An empty query matches everything.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<&BomMaterial> {
        let query = query.trim().to_lowercase();
        self.materials
            .iter()
            .filter(|m| {
                query.is_empty()
                    || m.material.to_lowercase().contains(&query)
                    || m.material_description.to_lowercase().contains(&query)
            })
            .take(limit)
            .collect()
    }
}
