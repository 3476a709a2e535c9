//! Per-resource conversion plans

use crate::manifest::{OutputDecl, VariableDecl};
use crate::mapping::MappingCandidate;
use crate::knowledge::ModuleDetail;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a source attribute goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeTarget {
    /// Bound to a module input; `value` overrides the original expression
    Input {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// No module input could be found
    Unresolved { reason: String },
}

/// One entry of a plan's attribute map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttributeMapping {
    pub source_attribute: String,
    pub target: AttributeTarget,
}

impl AttributeMapping {
    /// Map to a same-named or renamed input
    #[must_use]
    pub fn input(source: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            source_attribute: source.into(),
            target: AttributeTarget::Input {
                name: input.into(),
                value: None,
            },
        }
    }

    /// Leave unresolved
    #[must_use]
    pub fn unresolved(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_attribute: source.into(),
            target: AttributeTarget::Unresolved {
                reason: reason.into(),
            },
        }
    }

    #[inline]
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self.target, AttributeTarget::Unresolved { .. })
    }
}

/// An input with no source attribute (usually `var.<name>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InputBinding {
    pub input: String,
    pub expression: String,
}

/// `original_expression -> new_expression` inside outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputRewrite {
    pub original_expression: String,
    pub new_expression: String,
}

/// Why a plan was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanningErrorKind {
    /// Proposal failed transiently until retries ran out
    RetriesExhausted,
    /// Proposal call timed out until retries ran out
    Timeout,
    /// Proposal response failed validation
    Malformed,
    /// Proposer declined to plan the resource
    Rejected,
    /// Run was cancelled before the item completed
    Cancelled,
    /// The planning task itself failed
    WorkerFailed,
}

impl fmt::Display for PlanningErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RetriesExhausted => "retries exhausted",
            Self::Timeout => "timed out",
            Self::Malformed => "malformed proposal",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::WorkerFailed => "worker failed",
        };
        f.write_str(s)
    }
}

/// Conversion plan for one mapped resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConversionPlan {
    pub resource_address: String,
    pub target_module: String,
    pub target_version: String,
    /// Label of the generated `module` block
    pub module_label: String,
    #[serde(default)]
    pub attribute_map: Vec<AttributeMapping>,
    #[serde(default)]
    pub generated_inputs: Vec<InputBinding>,
    #[serde(default)]
    pub new_variables: Vec<VariableDecl>,
    #[serde(default)]
    pub output_rewrites: Vec<OutputRewrite>,
    #[serde(default)]
    pub unresolved_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_error: Option<PlanningErrorKind>,
    /// Detail for a failed plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ConversionPlan {
    /// Empty plan for a request
    #[must_use]
    pub fn empty(request: &PlanRequest) -> Self {
        Self {
            resource_address: request.candidate.resource_address.clone(),
            target_module: request.detail.module_name.clone(),
            target_version: request.detail.version.clone(),
            module_label: request.module_label.clone(),
            attribute_map: Vec::new(),
            generated_inputs: Vec::new(),
            new_variables: Vec::new(),
            output_rewrites: Vec::new(),
            unresolved_items: Vec::new(),
            planning_error: None,
            error_message: None,
        }
    }

    /// Discarded plan recording why planning failed
    #[must_use]
    pub fn failed(request: &PlanRequest, kind: PlanningErrorKind, message: impl Into<String>) -> Self {
        Self {
            planning_error: Some(kind),
            error_message: Some(message.into()),
            ..Self::empty(request)
        }
    }

    /// Usable plans have no planning error
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.planning_error.is_none()
    }

    /// `module.<label>`
    #[inline]
    #[must_use]
    pub fn module_address(&self) -> String {
        format!("module.{}", self.module_label)
    }

    /// Unresolved attribute entries
    pub fn unresolved_attributes(&self) -> impl Iterator<Item = &AttributeMapping> {
        self.attribute_map.iter().filter(|m| m.is_unresolved())
    }
}

/// Everything one planning call needs; owned so it can move into a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanRequest {
    pub detail: ModuleDetail,
    pub candidate: MappingCandidate,
    /// Byte-exact text of the original resource block
    pub original_text: String,
    /// Top-level attributes of the original resource, in source order
    pub attributes: Vec<(String, String)>,
    /// Outputs whose expression references the resource
    pub referencing_outputs: Vec<OutputDecl>,
    /// Label assigned to the generated module block
    pub module_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn request() -> PlanRequest {
        PlanRequest {
            detail: ModuleDetail {
                module_name: "avm-res-network-virtualnetwork".into(),
                version: "0.7.1".into(),
                source: None,
                required_inputs: BTreeSet::new(),
                optional_inputs: BTreeSet::new(),
                outputs: BTreeSet::new(),
            },
            candidate: MappingCandidate::mapped(
                "azurerm_virtual_network.vnet1",
                "avm-res-network-virtualnetwork",
                "0.7.1",
                0.95,
            ),
            original_text: String::new(),
            attributes: Vec::new(),
            referencing_outputs: Vec::new(),
            module_label: "vnet1".into(),
        }
    }

    #[test]
    fn failed_plan_is_not_usable() {
        let plan = ConversionPlan::failed(&request(), PlanningErrorKind::Timeout, "deadline");
        assert!(!plan.is_usable());
        assert_eq!(plan.module_address(), "module.vnet1");
        assert_eq!(plan.target_module, "avm-res-network-virtualnetwork");
    }

    #[test]
    fn attribute_target_serializes_tagged() {
        let mapping = AttributeMapping::unresolved("dns_servers", "no input");
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["target"]["kind"], "unresolved");
        assert!(mapping.is_unresolved());
        assert!(!AttributeMapping::input("name", "name").is_unresolved());
    }
}
