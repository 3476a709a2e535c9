//! Mapping decisions

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-resource mapping status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// A target module was chosen
    Mapped,
    /// No suitable module; resource is left as original
    Unmapped,
    /// A module was suggested but the proposer is unsure
    NeedsReview,
    /// An existing module call already points at a verified module
    AlreadyCompliant,
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mapped => "mapped",
            Self::Unmapped => "unmapped",
            Self::NeedsReview => "needs_review",
            Self::AlreadyCompliant => "already_compliant",
        };
        f.write_str(s)
    }
}

/// Mapping decision for one resource (or one existing module call)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingCandidate {
    pub resource_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    /// Collaborator-supplied score in `[0, 1]`
    pub confidence: f64,
    pub status: MappingStatus,
    #[serde(default)]
    pub rationale: String,
}

impl MappingCandidate {
    /// Mapped candidate
    #[must_use]
    pub fn mapped(
        address: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            resource_address: address.into(),
            target_module: Some(module.into()),
            target_version: Some(version.into()),
            confidence,
            status: MappingStatus::Mapped,
            rationale: String::new(),
        }
    }

    /// Unmapped candidate
    #[must_use]
    pub fn unmapped(address: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            resource_address: address.into(),
            target_module: None,
            target_version: None,
            confidence: 0.0,
            status: MappingStatus::Unmapped,
            rationale: rationale.into(),
        }
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: MappingStatus) -> Self {
        self.status = status;
        self
    }

    /// With rationale
    #[inline]
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// `(module, version)` when both are present
    #[must_use]
    pub fn target(&self) -> Option<(&str, &str)> {
        match (&self.target_module, &self.target_version) {
            (Some(m), Some(v)) => Some((m.as_str(), v.as_str())),
            _ => None,
        }
    }

    /// Demote to Unmapped, keeping the reason
    pub fn demote(&mut self, reason: impl Into<String>) {
        self.status = MappingStatus::Unmapped;
        self.target_module = None;
        self.target_version = None;
        self.confidence = 0.0;
        self.rationale = reason.into();
    }
}

/// Complete mapping decision set for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingResult {
    pub candidates: Vec<MappingCandidate>,
    /// Addresses left as original
    #[serde(default)]
    pub unmapped: Vec<String>,
}

impl MappingResult {
    /// Build from candidates, deriving the unmapped list
    #[must_use]
    pub fn from_candidates(candidates: Vec<MappingCandidate>) -> Self {
        let mut result = Self {
            candidates,
            unmapped: Vec::new(),
        };
        result.refresh_unmapped();
        result
    }

    /// Recompute `unmapped` from candidate statuses
    pub fn refresh_unmapped(&mut self) {
        self.unmapped = self
            .candidates
            .iter()
            .filter(|c| c.status == MappingStatus::Unmapped)
            .map(|c| c.resource_address.clone())
            .collect();
    }

    /// Candidate for an address
    #[must_use]
    pub fn candidate(&self, address: &str) -> Option<&MappingCandidate> {
        self.candidates.iter().find(|c| c.resource_address == address)
    }

    /// Candidates with the given status
    pub fn with_status(&self, status: MappingStatus) -> impl Iterator<Item = &MappingCandidate> {
        self.candidates.iter().filter(move |c| c.status == status)
    }

    /// Distinct `(module, version)` pairs referenced by Mapped or NeedsReview candidates
    #[must_use]
    pub fn referenced_modules(&self) -> Vec<(String, String)> {
        let mut seen = std::collections::BTreeSet::new();
        self.candidates
            .iter()
            .filter(|c| matches!(c.status, MappingStatus::Mapped | MappingStatus::NeedsReview))
            .filter_map(|c| c.target())
            .filter(|(m, v)| seen.insert((m.to_string(), v.to_string())))
            .map(|(m, v)| (m.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unmapped_list_tracks_statuses() {
        let mut result = MappingResult::from_candidates(vec![
            MappingCandidate::mapped("azurerm_virtual_network.vnet1", "avm-res-network-virtualnetwork", "0.7.1", 0.95),
            MappingCandidate::unmapped("azurerm_foo.bar", "no module"),
        ]);
        assert_eq!(result.unmapped, vec!["azurerm_foo.bar".to_string()]);

        result.candidates[0].demote("module not found");
        result.refresh_unmapped();
        assert_eq!(result.unmapped.len(), 2);
        assert!(result.candidates[0].target().is_none());
    }

    #[test]
    fn referenced_modules_are_distinct_and_skip_unmapped() {
        let result = MappingResult::from_candidates(vec![
            MappingCandidate::mapped("azurerm_virtual_network.a", "vnet", "1.0.0", 0.9),
            MappingCandidate::mapped("azurerm_virtual_network.b", "vnet", "1.0.0", 0.9),
            MappingCandidate::mapped("azurerm_storage_account.s", "storage", "2.0.0", 0.5)
                .with_status(MappingStatus::NeedsReview),
            MappingCandidate::unmapped("azurerm_foo.bar", ""),
        ]);
        assert_eq!(
            result.referenced_modules(),
            vec![
                ("vnet".to_string(), "1.0.0".to_string()),
                ("storage".to_string(), "2.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&MappingStatus::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
    }
}
