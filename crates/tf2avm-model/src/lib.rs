//! tf2avm Data Model
//!
//! Types exchanged between the pipeline stages and the external
//! collaborators. Every type is serialisable (persisted as a stage artifact)
//! and carries a JSON schema used to validate untrusted proposals.
//!
//! Collections in persisted types are ordered (`Vec`, `BTreeSet`,
//! `IndexMap`) so an artifact hashes the same after a reload.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod fix;
mod knowledge;
mod manifest;
mod mapping;
mod plan;
mod validation;

pub use fix::{Complexity, FixConfidence, FixPriority, FixProposal};
pub use knowledge::{module_key, registry_source, KnowledgeEntry, KnowledgeIndex, ModuleDetail};
pub use manifest::{
    provider_of, references_address, Manifest, ModuleCallDecl, OutputDecl, RawBlock,
    ResourceDecl, SourceSpan, VariableDecl,
};
pub use mapping::{MappingCandidate, MappingResult, MappingStatus};
pub use plan::{
    AttributeMapping, AttributeTarget, ConversionPlan, InputBinding, OutputRewrite,
    PlanRequest, PlanningErrorKind,
};
pub use validation::{ErrorCategory, ValidationError, ValidationOutcome, TOOL_KIND_UNAVAILABLE};

/// Module details keyed by `<name>@<version>`
pub type ModuleDetails = std::collections::BTreeMap<String, ModuleDetail>;
