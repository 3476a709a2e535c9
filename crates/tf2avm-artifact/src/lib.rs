//! tf2avm Artifact Store
//!
//! Write-once, stage-keyed persistence for pipeline runs.
//!
//! # Core Concepts
//!
//! - [`RunId`]: ULID identifying one pipeline run (one directory)
//! - [`StageKey`]: contractual `<sequence>_<slug>` address of a stage output
//! - [`RunArtifacts`]: handle used by the orchestrator to persist and reload
//!   stage outputs; every key can be written exactly once
//! - [`ContentHash`]: Blake3 hash stored in each artifact envelope
//!
//! # Example
//!
//! ```rust,ignore
//! use tf2avm_artifact::{ArtifactKind, ArtifactStore, RunId, StageKey};
//!
//! let store = ArtifactStore::new("output");
//! let run = store.create_run(RunId::new()).await?;
//! let key = StageKey::new("01", "scan", ArtifactKind::Json)?;
//! let reference = run.put_json(&key, &manifest).await?;
//! println!("{} -> {}", reference.stage, reference.content_hash.short());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod key;
mod store;

pub use hash::{ContentHash, HashError};
pub use key::{ArtifactKind, KeyError, RunId, StageKey};
pub use store::{ArtifactRef, ArtifactStore, Envelope, RunArtifacts, StoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
