//! Testing utilities for the tf2avm workspace
//!
//! Scripted capabilities with call counters, plus the network fixtures used
//! by the pipeline scenarios.

#![allow(missing_docs)]

pub mod fixtures;

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tf2avm_gateway::{
    GatewayError, KnowledgeSource, OutputChecker, ProposalEngine, ProposalError, RuleBasedProposer,
};
use tf2avm_model::{
    module_key, ConversionPlan, FixProposal, KnowledgeIndex, Manifest, MappingResult,
    ModuleDetail, ModuleDetails, PlanRequest, ValidationOutcome,
};

/// Proposal engine with scripted answers
///
/// Anything not scripted is answered by [`RuleBasedProposer`].
#[derive(Debug, Default)]
pub struct ScriptedProposer {
    rules: RuleBasedProposer,
    first_mapping: Option<MappingResult>,
    review_mapping: Option<MappingResult>,
    mapping_error: Option<GatewayError>,
    failing_plans: BTreeSet<String>,
    plan_delay: Option<Duration>,
    fixes: Option<Result<Vec<FixProposal>, GatewayError>>,
    mapping_calls: AtomicUsize,
    review_calls: AtomicUsize,
    plan_calls: AtomicUsize,
    fix_calls: AtomicUsize,
    planned: Mutex<Vec<String>>,
}

impl ScriptedProposer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for the first mapping pass
    #[must_use]
    pub fn with_first_mapping(mut self, mapping: MappingResult) -> Self {
        self.first_mapping = Some(mapping);
        self
    }

    /// Answer for the review pass
    #[must_use]
    pub fn with_review_mapping(mut self, mapping: MappingResult) -> Self {
        self.review_mapping = Some(mapping);
        self
    }

    /// Every mapping call fails with `error`
    #[must_use]
    pub fn with_mapping_error(mut self, error: GatewayError) -> Self {
        self.mapping_error = Some(error);
        self
    }

    /// Planning `address` is rejected
    #[must_use]
    pub fn failing_plan(mut self, address: impl Into<String>) -> Self {
        self.failing_plans.insert(address.into());
        self
    }

    /// Each plan takes `delay` to produce
    #[must_use]
    pub fn with_plan_delay(mut self, delay: Duration) -> Self {
        self.plan_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_fixes(mut self, fixes: Result<Vec<FixProposal>, GatewayError>) -> Self {
        self.fixes = Some(fixes);
        self
    }

    pub fn mapping_calls(&self) -> usize {
        self.mapping_calls.load(Ordering::SeqCst)
    }

    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn fix_calls(&self) -> usize {
        self.fix_calls.load(Ordering::SeqCst)
    }

    /// Addresses planned so far, in call order
    pub fn planned(&self) -> Vec<String> {
        self.planned.lock().clone()
    }
}

#[async_trait::async_trait]
impl ProposalEngine for ScriptedProposer {
    async fn propose_mapping(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        prior: Option<&MappingResult>,
        details: Option<&ModuleDetails>,
    ) -> Result<MappingResult, GatewayError> {
        let review = prior.is_some();
        if review {
            self.review_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.mapping_calls.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(error) = &self.mapping_error {
            return Err(error.clone());
        }
        let scripted = if review {
            &self.review_mapping
        } else {
            &self.first_mapping
        };
        match scripted {
            Some(mapping) => Ok(mapping.clone()),
            None => {
                self.rules
                    .propose_mapping(manifest, knowledge, prior, details)
                    .await
            }
        }
    }

    async fn propose_plan(&self, request: &PlanRequest) -> Result<ConversionPlan, GatewayError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let address = request.candidate.resource_address.clone();
        self.planned.lock().push(address.clone());
        if let Some(delay) = self.plan_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_plans.contains(&address) {
            return Err(ProposalError::Rejected(format!("scripted failure for {address}")).into());
        }
        self.rules.propose_plan(request).await
    }

    async fn propose_fixes(
        &self,
        outcome: &ValidationOutcome,
        output_dir: &Path,
        plans: &[ConversionPlan],
    ) -> Result<Vec<FixProposal>, GatewayError> {
        self.fix_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fixes {
            Some(fixes) => fixes.clone(),
            None => self.rules.propose_fixes(outcome, output_dir, plans).await,
        }
    }
}

/// In-memory knowledge source
#[derive(Debug, Default)]
pub struct StaticKnowledge {
    index: KnowledgeIndex,
    details: BTreeMap<String, ModuleDetail>,
    unavailable: Option<String>,
    lookup_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl StaticKnowledge {
    #[must_use]
    pub fn new(index: KnowledgeIndex, details: impl IntoIterator<Item = ModuleDetail>) -> Self {
        Self {
            index,
            details: details.into_iter().map(|d| (d.key(), d)).collect(),
            ..Self::default()
        }
    }

    /// Every call fails with `KnowledgeUnavailable(reason)`
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Forget the detail of `name@version`
    #[must_use]
    pub fn without_detail(mut self, name: &str, version: &str) -> Self {
        self.details.remove(&module_key(name, version));
        self
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn lookup_knowledge(
        &self,
        resource_types: &BTreeSet<String>,
        _use_cache: bool,
    ) -> Result<KnowledgeIndex, GatewayError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.unavailable {
            return Err(GatewayError::KnowledgeUnavailable(reason.clone()));
        }
        Ok(self.index.restricted_to(resource_types))
    }

    async fn fetch_module_detail(&self, name: &str, version: &str) -> Result<ModuleDetail, GatewayError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.unavailable {
            return Err(GatewayError::KnowledgeUnavailable(reason.clone()));
        }
        self.details
            .get(&module_key(name, version))
            .cloned()
            .ok_or_else(|| GatewayError::module_not_found(name, version))
    }
}

/// Checker with a fixed answer
#[derive(Debug)]
pub struct ScriptedChecker {
    answer: Result<ValidationOutcome, GatewayError>,
    calls: AtomicUsize,
}

impl ScriptedChecker {
    #[must_use]
    pub fn passing() -> Self {
        Self::answering(Ok(ValidationOutcome::passed()))
    }

    #[must_use]
    pub fn failing(outcome: ValidationOutcome) -> Self {
        Self::answering(Ok(outcome))
    }

    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::answering(Err(GatewayError::CheckerUnavailable(reason.into())))
    }

    #[must_use]
    pub fn answering(answer: Result<ValidationOutcome, GatewayError>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OutputChecker for ScriptedChecker {
    async fn check_output(&self, _output_dir: &Path) -> Result<ValidationOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}
