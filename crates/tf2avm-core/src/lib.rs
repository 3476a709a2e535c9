//! tf2avm Core - conversion pipeline
//!
//! Turns a Terraform repository that declares raw `azurerm` resources into
//! an equivalent tree that calls Azure Verified Modules:
//! - Scans the sources into a manifest and looks up candidate modules
//! - Maps resources to modules, with a schema-aware review pass when any
//!   mapping falls below the confidence threshold
//! - Plans each conversion in a bounded worker pool
//! - Writes the converted tree, validates it and plans fixes on failure
//! - Persists every stage under `<artifact_root>/<run id>/` and always
//!   finishes with a Markdown report
//!
//! # Example
//!
//! ```rust,ignore
//! use tf2avm_core::{read_sources, Capabilities, Pipeline, PipelineConfig};
//!
//! # async fn example(caps: Capabilities) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new().with_artifact_root("output");
//! let pipeline = Pipeline::new(config, caps)?;
//!
//! let files = read_sources("infra".as_ref()).await?;
//! let outcome = pipeline.run(files).await?;
//! println!("{} -> {}", outcome.run_id, outcome.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod fix;
pub mod mapping;
pub mod orchestrator;
pub mod planning;
pub mod report;
pub mod state;
pub mod validation;
pub mod writer;

pub use config::{CheckerConfig, ConfigError, KnowledgeConfig, PipelineConfig};
pub use error::PipelineError;
pub use fix::plan_fixes;
pub use mapping::{DetailFetch, MappingEngine};
pub use orchestrator::{read_sources, Capabilities, FinalDetails, Pipeline, RunOutcome};
pub use planning::{PlanningEngine, PlanningOutcome};
pub use report::render_report;
pub use state::{keys, Issue, IssueKind, RunState, RunStatus, Stage, StageRecord};
pub use validation::{validate, validation_issues};
pub use writer::{Placement, RenderedTree, WriteSummary};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
