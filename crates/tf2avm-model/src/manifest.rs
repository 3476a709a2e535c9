//! Source manifest
//!
//! The scanner's view of the input repository: every top-level block with
//! its byte-exact source text, so anything the pipeline does not convert can
//! be copied back unchanged.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where a block came from and its exact text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceSpan {
    /// Source file, relative to the repository root
    pub file: String,
    /// Position of the block within its file
    pub ordinal: usize,
    /// Byte-exact text of the block, including leading comments
    pub text: String,
}

/// `resource "<type>" "<name>" { ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceDecl {
    /// `<type>.<name>`
    pub address: String,
    pub resource_type: String,
    pub name: String,
    /// Top-level attributes: name -> value expression (source text)
    pub attributes: IndexMap<String, String>,
    pub span: SourceSpan,
}

impl ResourceDecl {
    /// Provider prefix of the resource type (`azurerm_subnet` -> `azurerm`)
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &str {
        provider_of(&self.resource_type)
    }
}

/// `variable "<name>" { ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` for variables proposed by a conversion plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
}

impl VariableDecl {
    /// Proposed variable with no source location
    #[must_use]
    pub fn proposed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            var_type: None,
            default: None,
            description: None,
            span: None,
        }
    }

    /// With type expression
    #[inline]
    #[must_use]
    pub fn with_type(mut self, var_type: impl Into<String>) -> Self {
        self.var_type = Some(var_type.into());
        self
    }

    /// With default expression
    #[inline]
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Two declarations have the same shape when type and default agree
    /// (ignoring whitespace).
    #[must_use]
    pub fn same_shape(&self, other: &VariableDecl) -> bool {
        fn norm(v: &Option<String>) -> Option<String> {
            v.as_ref()
                .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        norm(&self.var_type) == norm(&other.var_type) && norm(&self.default) == norm(&other.default)
    }
}

/// `output "<name>" { value = ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputDecl {
    pub name: String,
    /// The `value` expression
    pub expression: String,
    pub span: SourceSpan,
}

impl OutputDecl {
    /// Whether the expression references `address` (as `address.` or the bare address)
    #[must_use]
    pub fn references(&self, address: &str) -> bool {
        references_address(&self.expression, address)
    }
}

/// `module "<label>" { source = ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleCallDecl {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub span: SourceSpan,
}

impl ModuleCallDecl {
    /// `module.<label>`
    #[inline]
    #[must_use]
    pub fn address(&self) -> String {
        format!("module.{}", self.label)
    }
}

/// Any other top-level block (provider, terraform, data, locals, trailing comments)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RawBlock {
    /// Block keyword, or `"trivia"` for comments after the last block
    pub kind: String,
    pub labels: Vec<String>,
    pub span: SourceSpan,
}

/// Everything the scanner found in the repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Source files in scan order
    pub files: Vec<String>,
    pub resources: Vec<ResourceDecl>,
    pub variables: Vec<VariableDecl>,
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub module_calls: Vec<ModuleCallDecl>,
    #[serde(default)]
    pub other_blocks: Vec<RawBlock>,
    pub providers: BTreeSet<String>,
}

impl Manifest {
    /// Resource by address
    #[must_use]
    pub fn resource(&self, address: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.address == address)
    }

    /// Manifest variable by name
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableDecl> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Resources belonging to `provider`, in manifest order
    pub fn resources_for_provider<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = &'a ResourceDecl> + 'a {
        self.resources.iter().filter(move |r| r.provider() == provider)
    }

    /// Distinct resource types of `provider`
    #[must_use]
    pub fn resource_types(&self, provider: &str) -> BTreeSet<String> {
        self.resources_for_provider(provider)
            .map(|r| r.resource_type.clone())
            .collect()
    }

    /// Outputs whose expression references `address`
    #[must_use]
    pub fn outputs_referencing(&self, address: &str) -> Vec<OutputDecl> {
        self.outputs
            .iter()
            .filter(|o| o.references(address))
            .cloned()
            .collect()
    }

    /// Position of a resource in manifest order
    #[must_use]
    pub fn resource_index(&self, address: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.address == address)
    }
}

/// Provider prefix of a resource type
#[must_use]
pub fn provider_of(resource_type: &str) -> &str {
    resource_type
        .split_once('_')
        .map_or(resource_type, |(prefix, _)| prefix)
}

/// Whether `expression` references `address` as a whole token
/// (`azurerm_subnet.a.id` references `azurerm_subnet.a`, `azurerm_subnet.ab` does not).
#[must_use]
pub fn references_address(expression: &str, address: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut start = 0;
    while let Some(pos) = expression[start..].find(address) {
        let begin = start + pos;
        let end = begin + address.len();
        let before_ok = expression[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident(c) && c != '.');
        let after_ok = expression[end..].chars().next().map_or(true, |c| !is_ident(c));
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}
