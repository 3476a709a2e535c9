//! Pipeline errors
//!
//! Everything here is stage-fatal: the run ends `Failed`. Item-local
//! problems (a missing module, a failed plan, a variable collision) never
//! become a `PipelineError`; they are recorded as [`Issue`](crate::Issue)s.

use crate::config::ConfigError;
use crate::state::Stage;
use std::path::PathBuf;
use tf2avm_artifact::{KeyError, StoreError};
use tf2avm_gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A collaborator failed in a way the stage cannot recover from
    #[error("{stage} failed: {source}")]
    Gateway {
        stage: Stage,
        #[source]
        source: GatewayError,
    },

    /// Artifact persistence failed
    #[error("artifact store: {0}")]
    Store(#[from] StoreError),

    /// Invalid stage key
    #[error("stage key: {0}")]
    Key(#[from] KeyError),

    /// Output tree could not be written
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0} s")]
    TimedOut(u64),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Wrap a collaborator error raised in `stage`
    pub fn gateway(stage: Stage, source: GatewayError) -> Self {
        match source {
            GatewayError::Cancelled => Self::Cancelled,
            source => Self::Gateway { stage, source },
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the run stopped because of cancellation or its deadline
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_gateway_error_becomes_cancellation() {
        let err = PipelineError::gateway(Stage::Planning, GatewayError::Cancelled);
        assert!(err.is_cancellation());

        let err = PipelineError::gateway(
            Stage::KnowledgeFetch,
            GatewayError::KnowledgeUnavailable("index offline".into()),
        );
        assert!(!err.is_cancellation());
        assert_eq!(
            err.to_string(),
            "knowledge_fetch failed: knowledge source unavailable: index offline"
        );
    }
}
