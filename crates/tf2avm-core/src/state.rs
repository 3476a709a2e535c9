//! Run state machine
//!
//! The orchestrator is the only writer of [`RunState`]. Stage changes go
//! through [`validate_transition`]; there are no backward edges, so no stage
//! ever re-runs within a run.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tf2avm_artifact::{ArtifactKind, ArtifactRef, KeyError, RunId, StageKey};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scanning,
    KnowledgeFetch,
    Mapping,
    /// Detail fetch for first-pass candidates (review branch only)
    DetailFetch,
    ReviewMapping,
    DetailFetchFinal,
    Planning,
    Writing,
    Validating,
    FixPlanning,
    Terminal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scanning => "scanning",
            Self::KnowledgeFetch => "knowledge_fetch",
            Self::Mapping => "mapping",
            Self::DetailFetch => "detail_fetch",
            Self::ReviewMapping => "review_mapping",
            Self::DetailFetchFinal => "detail_fetch_final",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Validating => "validating",
            Self::FixPlanning => "fix_planning",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Stages reachable from `from`
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    use Stage::*;
    match from {
        Scanning => vec![KnowledgeFetch, Terminal],
        KnowledgeFetch => vec![Mapping, Terminal],
        Mapping => vec![DetailFetch, DetailFetchFinal, Terminal],
        DetailFetch => vec![ReviewMapping, Terminal],
        ReviewMapping => vec![DetailFetchFinal, Terminal],
        DetailFetchFinal => vec![Planning, Terminal],
        Planning => vec![Writing, Terminal],
        Writing => vec![Validating, Terminal],
        Validating => vec![FixPlanning, Terminal],
        FixPlanning => vec![Terminal],
        Terminal => vec![],
    }
}

/// Validate a stage transition
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), PipelineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PipelineError::IllegalTransition { from, to })
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Validation passed with zero errors
    Succeeded,
    /// Output written, validation failed, fix plan produced
    PartiallySucceeded,
    Failed,
}

impl RunStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::PartiallySucceeded => "PartiallySucceeded",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// What an issue is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// No module could be chosen for the resource
    Unmapped,
    /// Proposer was unsure and review did not settle it
    NeedsReview,
    /// Chosen module has no detail in the knowledge source
    ModuleNotFound,
    /// Planning failed; the resource was left as original
    PlanningFailed,
    /// Attribute or input without a module counterpart
    Unresolved,
    /// Variable name collision resolved by suffixing
    WriteConflict,
    /// Error reported by the checker
    Validation,
    /// Run-ending error
    Fatal,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unmapped => "unmapped",
            Self::NeedsReview => "needs review",
            Self::ModuleNotFound => "module not found",
            Self::PlanningFailed => "planning failed",
            Self::Unresolved => "unresolved",
            Self::WriteConflict => "write conflict",
            Self::Validation => "validation",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Item-local problem surfaced in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Resource address (or file) the issue is tied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub message: String,
}

impl Issue {
    #[must_use]
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            address: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn at(kind: IssueKind, address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            address: Some(address.into()),
            message: message.into(),
        }
    }
}

/// One completed stage and the artifact it left behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub artifact: ArtifactRef,
}

/// The orchestrator-owned record of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub current_stage: Stage,
    pub stage_history: Vec<StageRecord>,
    pub status: RunStatus,
    pub issues: Vec<Issue>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            current_stage: Stage::Scanning,
            stage_history: Vec::new(),
            status: RunStatus::Running,
            issues: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `to`, rejecting illegal or backward transitions
    pub fn advance(&mut self, to: Stage) -> Result<(), PipelineError> {
        validate_transition(self.current_stage, to)?;
        tracing::debug!(run_id = %self.run_id, from = %self.current_stage, to = %to, "stage transition");
        self.current_stage = to;
        Ok(())
    }

    /// Record the artifact persisted by the current stage
    pub fn record(&mut self, artifact: ArtifactRef) {
        self.stage_history.push(StageRecord {
            stage: self.current_stage,
            artifact,
        });
    }

    pub fn push_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn extend_issues(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    /// Enter `Terminal` with a final status
    pub fn finish(&mut self, status: RunStatus) {
        if self.current_stage != Stage::Terminal {
            self.current_stage = Stage::Terminal;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Issues of one kind
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

/// Contractual stage artifact keys of a run directory
pub mod keys {
    use super::*;

    fn json(seq: &str, slug: &str) -> Result<StageKey, KeyError> {
        StageKey::new(seq, slug, ArtifactKind::Json)
    }

    pub fn scan() -> Result<StageKey, KeyError> {
        json("01", "scan")
    }

    pub fn knowledge() -> Result<StageKey, KeyError> {
        json("02", "knowledge")
    }

    pub fn mappings() -> Result<StageKey, KeyError> {
        json("03", "mappings")
    }

    pub fn module_details_pass1() -> Result<StageKey, KeyError> {
        json("04", "module_details_pass1")
    }

    pub fn retry_mappings() -> Result<StageKey, KeyError> {
        json("04_01", "retry_mappings")
    }

    pub fn module_details_final() -> Result<StageKey, KeyError> {
        json("05", "module_details_final")
    }

    pub fn plans() -> Result<StageKey, KeyError> {
        StageKey::new("06", "plans", ArtifactKind::Directory)
    }

    /// `06_plans/<NNN>_<address>.json`, `index` counted from zero
    pub fn plan(index: usize, address: &str) -> Result<StageKey, KeyError> {
        plans()?.child(
            format!("{:03}", index + 1),
            StageKey::sanitize_slug(address),
            ArtifactKind::Json,
        )
    }

    pub fn conversion_summary() -> Result<StageKey, KeyError> {
        json("07", "conversion_summary")
    }

    pub fn migrated() -> Result<StageKey, KeyError> {
        StageKey::new("08", "migrated", ArtifactKind::Directory)
    }

    pub fn validation() -> Result<StageKey, KeyError> {
        json("09", "validation")
    }

    pub fn fix_plan() -> Result<StageKey, KeyError> {
        json("10", "fix_plan")
    }

    pub fn report() -> Result<StageKey, KeyError> {
        StageKey::new("11", "report", ArtifactKind::Markdown)
    }

    pub fn run_state() -> Result<StageKey, KeyError> {
        json("12", "run_state")
    }
}
