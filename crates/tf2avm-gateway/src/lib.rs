//! tf2avm Capability Gateway
//!
//! Typed contracts for the collaborators the pipeline depends on, plus the
//! implementations shipped with the tool:
//!
//! - [`ManifestScanner`] / [`HclScanner`]: Terraform files to a manifest
//! - [`KnowledgeSource`] / [`FileKnowledgeSource`], [`CachedKnowledgeSource`]
//! - [`ProposalEngine`] / [`RuleBasedProposer`], [`CommandProposer`]
//! - [`OutputChecker`] / [`TerraformChecker`]
//!
//! [`with_retry`] applies a [`CallPolicy`] (deadline, bounded retries,
//! cooperative cancellation) to any capability call.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod capability;
mod command;
mod error;
mod hcl;
mod knowledge;
mod retry;
mod rule_based;
mod terraform;

pub use capability::{KnowledgeSource, ManifestScanner, OutputChecker, ProposalEngine};
pub use command::{decode_checked, CommandProposer, EXIT_REJECTED};
pub use error::{GatewayError, ProposalError};
pub use hcl::HclScanner;
pub use knowledge::{detail_file_name, write_detail_file, CachedKnowledgeSource, FileKnowledgeSource};
pub use retry::{with_retry, CallPolicy};
pub use rule_based::RuleBasedProposer;
pub use terraform::{parse_validate_json, TerraformChecker};
