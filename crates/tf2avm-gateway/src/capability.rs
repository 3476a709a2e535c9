//! Capability traits
//!
//! The pipeline core only sees these contracts. Implementations may parse
//! files, read a registry, shell out to a reasoning backend, or return
//! scripted answers in tests.

use crate::error::GatewayError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tf2avm_model::{
    ConversionPlan, FixProposal, KnowledgeIndex, Manifest, MappingResult, ModuleDetail,
    ModuleDetails, PlanRequest, ValidationOutcome,
};

/// Turns source files into a manifest
#[async_trait::async_trait]
pub trait ManifestScanner: Send + Sync {
    /// Scan `files` (relative path -> text)
    async fn scan(&self, files: &BTreeMap<String, String>) -> Result<Manifest, GatewayError>;
}

/// Registry of verified modules
#[async_trait::async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Candidate modules for `resource_types`
    async fn lookup_knowledge(
        &self,
        resource_types: &BTreeSet<String>,
        use_cache: bool,
    ) -> Result<KnowledgeIndex, GatewayError>;

    /// Input/output schema of one module version
    async fn fetch_module_detail(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModuleDetail, GatewayError>;
}

/// Structured-proposal generator
///
/// Every response is untrusted; callers validate it before use.
#[async_trait::async_trait]
pub trait ProposalEngine: Send + Sync {
    /// Pick target modules. With `prior` and `details` this is the review pass.
    async fn propose_mapping(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        prior: Option<&MappingResult>,
        details: Option<&ModuleDetails>,
    ) -> Result<MappingResult, GatewayError>;

    /// Write a conversion plan for one resource
    async fn propose_plan(&self, request: &PlanRequest) -> Result<ConversionPlan, GatewayError>;

    /// Suggest fixes for a failed validation
    async fn propose_fixes(
        &self,
        outcome: &ValidationOutcome,
        output_dir: &Path,
        plans: &[ConversionPlan],
    ) -> Result<Vec<FixProposal>, GatewayError>;
}

/// Opaque syntax/policy checker for the written output
#[async_trait::async_trait]
pub trait OutputChecker: Send + Sync {
    /// Check the tree rooted at `output_dir`
    async fn check_output(&self, output_dir: &Path) -> Result<ValidationOutcome, GatewayError>;
}
