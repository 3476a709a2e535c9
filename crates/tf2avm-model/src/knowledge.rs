//! Module registry knowledge

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One verified module known to the knowledge source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeEntry {
    /// Registry module name, e.g. `avm-res-network-virtualnetwork`
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resource types the module manages
    #[serde(default)]
    pub resource_types: Vec<String>,
}

impl KnowledgeEntry {
    /// Registry source string used in `module` blocks
    #[inline]
    #[must_use]
    pub fn registry_source(&self) -> String {
        registry_source(&self.name)
    }
}

/// Knowledge index: candidate modules per resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeIndex {
    pub modules: Vec<KnowledgeEntry>,
}

impl KnowledgeIndex {
    /// Modules that manage `resource_type`, in index order
    #[must_use]
    pub fn candidates_for(&self, resource_type: &str) -> Vec<&KnowledgeEntry> {
        self.modules
            .iter()
            .filter(|m| m.resource_types.iter().any(|t| t == resource_type))
            .collect()
    }

    /// Module by name
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&KnowledgeEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Module whose registry source is exactly `source`
    #[must_use]
    pub fn module_by_source(&self, source: &str) -> Option<&KnowledgeEntry> {
        self.modules.iter().find(|m| m.registry_source() == source)
    }

    /// Keep only modules relevant to `resource_types`
    #[must_use]
    pub fn restricted_to(&self, resource_types: &BTreeSet<String>) -> Self {
        Self {
            modules: self
                .modules
                .iter()
                .filter(|m| m.resource_types.iter().any(|t| resource_types.contains(t)))
                .cloned()
                .collect(),
        }
    }
}

/// Input/output schema of one module version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleDetail {
    pub module_name: String,
    pub version: String,
    /// Explicit registry source; derived from the name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub required_inputs: BTreeSet<String>,
    #[serde(default)]
    pub optional_inputs: BTreeSet<String>,
    #[serde(default)]
    pub outputs: BTreeSet<String>,
}

impl ModuleDetail {
    /// Registry source string
    #[must_use]
    pub fn registry_source(&self) -> String {
        self.source
            .clone()
            .unwrap_or_else(|| registry_source(&self.module_name))
    }

    /// Whether `name` is a declared input (required or optional)
    #[inline]
    #[must_use]
    pub fn has_input(&self, name: &str) -> bool {
        self.required_inputs.contains(name) || self.optional_inputs.contains(name)
    }

    /// `<name>@<version>`
    #[inline]
    #[must_use]
    pub fn key(&self) -> String {
        module_key(&self.module_name, &self.version)
    }
}

/// `Azure/<name>/azurerm`
#[must_use]
pub fn registry_source(module_name: &str) -> String {
    format!("Azure/{module_name}/azurerm")
}

/// `<name>@<version>`
#[must_use]
pub fn module_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}
