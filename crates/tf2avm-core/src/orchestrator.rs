//! Pipeline orchestrator
//!
//! Drives one run through the stage machine. Every stage persists its
//! artifact first and then continues from the copy read back out of the
//! store, so a run directory always explains the decisions that were taken.
//! The report and the final run state are written on every exit path.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fix::plan_fixes;
use crate::mapping::{downgrade_missing, unconverted_issues, DetailFetch, MappingEngine};
use crate::planning::PlanningEngine;
use crate::report::{render_report, ReportInput};
use crate::state::{keys, Issue, IssueKind, RunState, RunStatus, Stage};
use crate::validation::{validate, validation_issues};
use crate::writer::{self, WriteSummary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tf2avm_artifact::{ArtifactStore, RunArtifacts, RunId, StageKey};
use tf2avm_gateway::{GatewayError, KnowledgeSource, ManifestScanner, OutputChecker, ProposalEngine};
use tf2avm_model::{ConversionPlan, FixProposal, MappingResult, ModuleDetails};
use tokio_util::sync::CancellationToken;

/// The collaborators a run talks to
#[derive(Clone)]
pub struct Capabilities {
    pub scanner: Arc<dyn ManifestScanner>,
    pub knowledge: Arc<dyn KnowledgeSource>,
    pub proposer: Arc<dyn ProposalEngine>,
    pub checker: Arc<dyn OutputChecker>,
}

/// Payload of `05_module_details_final.json`
///
/// `mapping` is the mapping planning works from, after candidates pointing
/// at unknown modules were demoted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalDetails {
    pub details: ModuleDetails,
    pub missing: Vec<(String, String)>,
    pub mapping: MappingResult,
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub run_dir: PathBuf,
    /// Converted tree, when the writer got that far
    pub migrated_dir: Option<PathBuf>,
    pub report: String,
    pub state: RunState,
}

/// One run in flight; everything the report may need survives a fatal error
struct Run {
    artifacts: RunArtifacts,
    state: RunState,
    mapping: Option<MappingResult>,
    summary: Option<WriteSummary>,
    fixes: Vec<FixProposal>,
    migrated_dir: Option<PathBuf>,
}

impl Run {
    /// Leave the current stage, unless the run was cancelled meanwhile
    fn enter(&mut self, stage: Stage, cancel: &CancellationToken) -> Result<(), PipelineError> {
        checkpoint(cancel)?;
        self.state.advance(stage)
    }

    /// Write a stage artifact, record it, and hand back the stored copy
    async fn persist<T>(&mut self, key: StageKey, payload: &T) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned,
    {
        let artifact = self.artifacts.put_json(&key, payload).await?;
        self.state.record(artifact);
        Ok(self.artifacts.get_json::<T>(&key).await?.payload)
    }
}

/// Conversion pipeline
pub struct Pipeline {
    config: PipelineConfig,
    caps: Capabilities,
    store: ArtifactStore,
    mapping: MappingEngine,
    planning: PlanningEngine,
}

impl Pipeline {
    /// Build a pipeline over validated configuration
    ///
    /// # Errors
    /// Returns `PipelineError::Config` if the configuration is invalid
    pub fn new(config: PipelineConfig, caps: Capabilities) -> Result<Self, PipelineError> {
        config.validate()?;
        let policy = config.call_policy();
        let mapping = MappingEngine::new(
            Arc::clone(&caps.proposer),
            Arc::clone(&caps.knowledge),
            policy,
            config.source_provider.clone(),
            config.confidence_threshold,
        );
        let planning = PlanningEngine::new(Arc::clone(&caps.proposer), policy, config.max_parallel_plans);
        let store = ArtifactStore::new(&config.artifact_root);
        Ok(Self {
            config,
            caps,
            store,
            mapping,
            planning,
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Convert `files` (relative path -> text) in a fresh run
    ///
    /// # Errors
    /// Only when the run directory, the report, or the final run state cannot
    /// be written. Every other failure ends the run `Failed` with a report.
    pub async fn run(&self, files: BTreeMap<String, String>) -> Result<RunOutcome, PipelineError> {
        self.run_with_cancel(files, CancellationToken::new()).await
    }

    /// Like [`Pipeline::run`], stopping cooperatively once `cancel` fires
    pub async fn run_with_cancel(
        &self,
        files: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = RunId::new();
        let artifacts = self.store.create_run(run_id).await?;
        tracing::info!(
            run_id = %run_id,
            files = files.len(),
            dir = %artifacts.dir().display(),
            "run started"
        );

        let run_cancel = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.config.run_timeout().map(|limit| {
            let token = run_cancel.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });

        let mut run = Run {
            artifacts,
            state: RunState::new(run_id),
            mapping: None,
            summary: None,
            fixes: Vec::new(),
            migrated_dir: None,
        };
        let result = self.drive(&mut run, &files, &run_cancel).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                let e = match (e.is_cancellation(), timed_out.load(Ordering::SeqCst)) {
                    (true, true) => PipelineError::TimedOut(self.config.run_timeout_secs.unwrap_or_default()),
                    _ => e,
                };
                tracing::error!(
                    run_id = %run_id,
                    stage = %run.state.current_stage,
                    error = %e,
                    "run failed"
                );
                run.state.push_issue(Issue::new(IssueKind::Fatal, e.to_string()));
                RunStatus::Failed
            }
        };
        run.state.finish(status);

        let report = render_report(&ReportInput {
            state: &run.state,
            mapping: run.mapping.as_ref(),
            summary: run.summary.as_ref(),
            fixes: &run.fixes,
            run_dir: run.artifacts.dir(),
            migrated_dir: run.migrated_dir.as_deref(),
        });
        let report_ref = run.artifacts.put_markdown(&keys::report()?, &report).await?;
        run.state.record(report_ref);
        run.artifacts.put_json(&keys::run_state()?, &run.state).await?;

        tracing::info!(
            run_id = %run_id,
            status = %status,
            issues = run.state.issues.len(),
            "run finished"
        );
        Ok(RunOutcome {
            run_id,
            status,
            run_dir: run.artifacts.dir().to_path_buf(),
            migrated_dir: run.migrated_dir,
            report,
            state: run.state,
        })
    }

    async fn drive(
        &self,
        run: &mut Run,
        files: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, PipelineError> {
        let policy = self.config.call_policy();

        let manifest = cancellable(cancel, async {
            self.caps
                .scanner
                .scan(files)
                .await
                .map_err(|e| PipelineError::gateway(Stage::Scanning, e))
        })
        .await?;
        let manifest = run.persist(keys::scan()?, &manifest).await?;
        tracing::info!(
            resources = manifest.resources.len(),
            module_calls = manifest.module_calls.len(),
            "manifest scanned"
        );

        run.enter(Stage::KnowledgeFetch, cancel)?;
        let resource_types = manifest.resource_types(&self.config.source_provider);
        let knowledge = cancellable(cancel, async {
            let lookup = self
                .caps
                .knowledge
                .lookup_knowledge(&resource_types, self.config.knowledge.use_cache);
            match tokio::time::timeout(policy.timeout, lookup).await {
                Ok(result) => result.map_err(|e| PipelineError::gateway(Stage::KnowledgeFetch, e)),
                Err(_) => Err(PipelineError::gateway(
                    Stage::KnowledgeFetch,
                    GatewayError::KnowledgeUnavailable(format!(
                        "lookup exceeded {} s",
                        policy.timeout.as_secs()
                    )),
                )),
            }
        })
        .await?;
        let knowledge = run.persist(keys::knowledge()?, &knowledge).await?;

        run.enter(Stage::Mapping, cancel)?;
        let initial = self
            .mapping
            .map_initial(&manifest, &knowledge, cancel)
            .await
            .map_err(|e| PipelineError::gateway(Stage::Mapping, e))?;
        let mut mapping = run.persist(keys::mappings()?, &initial).await?;
        run.mapping = Some(mapping.clone());

        let mut reuse = ModuleDetails::new();
        if self.mapping.needs_review(&mapping) {
            tracing::info!(threshold = self.config.confidence_threshold, "mapping below threshold; reviewing");
            run.enter(Stage::DetailFetch, cancel)?;
            let pass1 = self
                .mapping
                .fetch_details(&mapping, &ModuleDetails::new(), cancel)
                .await
                .map_err(|e| PipelineError::gateway(Stage::DetailFetch, e))?;
            let pass1: DetailFetch = run.persist(keys::module_details_pass1()?, &pass1).await?;

            run.enter(Stage::ReviewMapping, cancel)?;
            let reviewed = self
                .mapping
                .review_mappings(&manifest, &knowledge, &mapping, &pass1.details, cancel)
                .await
                .map_err(|e| PipelineError::gateway(Stage::ReviewMapping, e))?;
            mapping = run.persist(keys::retry_mappings()?, &reviewed).await?;
            run.mapping = Some(mapping.clone());
            reuse = pass1.details;
        }

        run.enter(Stage::DetailFetchFinal, cancel)?;
        let fetch = self
            .mapping
            .fetch_details(&mapping, &reuse, cancel)
            .await
            .map_err(|e| PipelineError::gateway(Stage::DetailFetchFinal, e))?;
        let demoted = downgrade_missing(&mut mapping, &fetch.missing);
        let demoted_addresses: BTreeSet<String> = demoted.iter().filter_map(|i| i.address.clone()).collect();
        run.state.extend_issues(demoted);
        run.state.extend_issues(unconverted_issues(&mapping).into_iter().filter(|i| {
            i.address
                .as_ref()
                .map_or(true, |address| !demoted_addresses.contains(address))
        }));
        let final_details = run
            .persist(
                keys::module_details_final()?,
                &FinalDetails {
                    details: fetch.details,
                    missing: fetch.missing,
                    mapping,
                },
            )
            .await?;
        run.mapping = Some(final_details.mapping.clone());

        run.enter(Stage::Planning, cancel)?;
        let outcome = self
            .planning
            .plan_all(&final_details.details, &final_details.mapping, &manifest, cancel)
            .await;
        let plans_key = keys::plans()?;
        run.artifacts.claim_dir(&plans_key).await?;
        let mut plan_keys = Vec::with_capacity(outcome.plans.len());
        for (index, plan) in outcome.plans.iter().enumerate() {
            let key = keys::plan(index, &plan.resource_address)?;
            run.artifacts.put_json(&key, plan).await?;
            plan_keys.push(key);
        }
        let plans_ref = run.artifacts.dir_ref(&plans_key);
        run.state.record(plans_ref);
        checkpoint(cancel)?;
        run.state.extend_issues(outcome.issues);

        let mut plans: Vec<ConversionPlan> = Vec::with_capacity(plan_keys.len());
        for key in &plan_keys {
            plans.push(run.artifacts.get_json::<ConversionPlan>(key).await?.payload);
        }

        run.enter(Stage::Writing, cancel)?;
        let tree = writer::render(&plans, &outcome.passthrough, &manifest);
        let summary = run.persist(keys::conversion_summary()?, &tree.summary).await?;
        run.state.extend_issues(summary.issues.iter().cloned());
        run.summary = Some(summary);
        let migrated_key = keys::migrated()?;
        let migrated = run.artifacts.claim_dir(&migrated_key).await?;
        writer::write_tree(&tree, &migrated).await?;
        let migrated_ref = run.artifacts.dir_ref(&migrated_key);
        run.state.record(migrated_ref);
        run.migrated_dir = Some(migrated.clone());

        run.enter(Stage::Validating, cancel)?;
        let checked = cancellable(cancel, async {
            validate(self.caps.checker.as_ref(), &migrated)
                .await
                .map_err(|e| PipelineError::gateway(Stage::Validating, e))
        })
        .await?;
        let checked = run.persist(keys::validation()?, &checked).await?;
        run.state.extend_issues(validation_issues(&checked));
        if checked.success {
            return Ok(RunStatus::Succeeded);
        }

        run.enter(Stage::FixPlanning, cancel)?;
        let fixes = plan_fixes(self.caps.proposer.as_ref(), &policy, cancel, &checked, &migrated, &plans)
            .await
            .map_err(|e| PipelineError::gateway(Stage::FixPlanning, e))?;
        run.fixes = run.persist(keys::fix_plan()?, &fixes).await?;
        Ok(RunStatus::PartiallySucceeded)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Race `work` against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = work => result,
    }
}

/// Collect every `*.tf` file below `root`, keyed by `/`-separated relative path
///
/// Hidden directories (`.terraform`, `.git`) are skipped.
pub async fn read_sources(root: &Path) -> Result<BTreeMap<String, String>, PipelineError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| PipelineError::io(&dir, e))? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await.map_err(|e| PipelineError::io(&path, e))?;
            if file_type.is_dir() {
                if !name.starts_with('.') {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() || !name.ends_with(".tf") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PipelineError::io(&path, e))?;
            files.insert(key, text);
        }
    }
    tracing::debug!(root = %root.display(), files = files.len(), "sources collected");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn read_sources_walks_tree_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("modules/net")).await.unwrap();
        tokio::fs::create_dir_all(root.join(".terraform/providers")).await.unwrap();
        tokio::fs::write(root.join("main.tf"), "# main\n").await.unwrap();
        tokio::fs::write(root.join("README.md"), "docs").await.unwrap();
        tokio::fs::write(root.join("modules/net/vnet.tf"), "# vnet\n").await.unwrap();
        tokio::fs::write(root.join(".terraform/providers/x.tf"), "# cached\n").await.unwrap();

        let files = read_sources(root).await.unwrap();
        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["main.tf", "modules/net/vnet.tf"]);
        assert_eq!(files["modules/net/vnet.tf"], "# vnet\n");
    }

    #[tokio::test]
    async fn missing_root_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_sources(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { Ok::<_, PipelineError>(1) }).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
