use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Display metadata the component catalog publishes for a `componentId`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Read-only lookup into the external component catalog.
pub trait ComponentCatalog {
    fn resolve(&self, component_id: &str) -> Option<&ComponentInfo>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCatalog {
    entries: BTreeMap<String, ComponentInfo>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component_id: impl Into<String>, info: ComponentInfo) {
        self.entries.insert(component_id.into(), info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a `{ "<componentId>": { "label": ..., "tags": [...] } }` file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = serde_json::from_str(&contents)?;
        Ok(catalog)
    }
}

impl ComponentCatalog for StaticCatalog {
    fn resolve(&self, component_id: &str) -> Option<&ComponentInfo> {
        self.entries.get(component_id)
    }
}
