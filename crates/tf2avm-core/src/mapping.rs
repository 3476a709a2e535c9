//! Mapping engine
//!
//! Asks the proposal capability for per-resource mapping decisions,
//! admits the answer only if it is a bijection with the source-provider
//! resources, and applies the confidence gate that decides whether a
//! second, schema-aware review pass is needed.

use crate::state::{Issue, IssueKind};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tf2avm_gateway::{with_retry, CallPolicy, GatewayError, KnowledgeSource, ProposalEngine};
use tf2avm_model::{
    module_key, KnowledgeIndex, Manifest, MappingCandidate, MappingResult, MappingStatus,
    ModuleDetails,
};
use tokio_util::sync::CancellationToken;

/// Result of a module detail fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailFetch {
    pub details: ModuleDetails,
    /// `(module, version)` pairs the knowledge source does not know
    pub missing: Vec<(String, String)>,
}

pub struct MappingEngine {
    proposer: Arc<dyn ProposalEngine>,
    knowledge: Arc<dyn KnowledgeSource>,
    policy: CallPolicy,
    source_provider: String,
    threshold: f64,
}

impl MappingEngine {
    #[must_use]
    pub fn new(
        proposer: Arc<dyn ProposalEngine>,
        knowledge: Arc<dyn KnowledgeSource>,
        policy: CallPolicy,
        source_provider: impl Into<String>,
        threshold: f64,
    ) -> Self {
        Self {
            proposer,
            knowledge,
            policy,
            source_provider: source_provider.into(),
            threshold,
        }
    }

    /// First mapping pass
    ///
    /// Only source-provider resources reach the proposer. Module calls whose
    /// source is the registry source of an indexed module are appended as
    /// `AlreadyCompliant`.
    pub async fn map_initial(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        cancel: &CancellationToken,
    ) -> Result<MappingResult, GatewayError> {
        let scoped = scoped_manifest(manifest, &self.source_provider);
        let proposed = with_retry(&self.policy, cancel, "propose_mapping", || {
            self.proposer.propose_mapping(&scoped, knowledge, None, None)
        })
        .await?;
        let mut result = admit_mapping(&scoped, &self.source_provider, proposed)?;
        result.candidates.extend(already_compliant(manifest, knowledge));
        result.refresh_unmapped();

        tracing::info!(
            candidates = result.candidates.len(),
            unmapped = result.unmapped.len(),
            "initial mapping admitted"
        );
        Ok(result)
    }

    /// Schema-aware second pass; its result replaces `prior`
    pub async fn review_mappings(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        prior: &MappingResult,
        details: &ModuleDetails,
        cancel: &CancellationToken,
    ) -> Result<MappingResult, GatewayError> {
        let scoped = scoped_manifest(manifest, &self.source_provider);
        let (compliant, reviewable): (Vec<_>, Vec<_>) = prior
            .candidates
            .iter()
            .cloned()
            .partition(|c| c.status == MappingStatus::AlreadyCompliant);
        let reviewable = MappingResult::from_candidates(reviewable);

        let proposed = with_retry(&self.policy, cancel, "review_mappings", || {
            self.proposer
                .propose_mapping(&scoped, knowledge, Some(&reviewable), Some(details))
        })
        .await?;
        let mut result = admit_mapping(&scoped, &self.source_provider, proposed)?;
        result.candidates.extend(compliant);
        result.refresh_unmapped();

        tracing::info!(
            candidates = result.candidates.len(),
            unmapped = result.unmapped.len(),
            "review mapping admitted"
        );
        Ok(result)
    }

    /// Confidence gate
    #[must_use]
    pub fn needs_review(&self, result: &MappingResult) -> bool {
        needs_review(result, self.threshold)
    }

    /// Fetch details for every module referenced by Mapped or NeedsReview
    /// candidates, reusing entries already present in `reuse`
    ///
    /// Unknown modules are reported in [`DetailFetch::missing`]; any other
    /// knowledge failure is returned as an error.
    pub async fn fetch_details(
        &self,
        result: &MappingResult,
        reuse: &ModuleDetails,
        cancel: &CancellationToken,
    ) -> Result<DetailFetch, GatewayError> {
        let mut fetch = DetailFetch::default();
        let mut pending = Vec::new();
        for (name, version) in result.referenced_modules() {
            match reuse.get(&module_key(&name, &version)) {
                Some(detail) => {
                    fetch.details.insert(detail.key(), detail.clone());
                }
                None => pending.push((name, version)),
            }
        }
        if pending.is_empty() {
            return Ok(fetch);
        }
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let timeout = self.policy.timeout;
        let lookups = pending.iter().map(|(name, version)| {
            let knowledge = Arc::clone(&self.knowledge);
            async move { fetch_one(knowledge.as_ref(), name, version, timeout).await }
        });
        let fetched = tokio::select! {
            fetched = join_all(lookups) => fetched,
            () = cancel.cancelled() => return Err(GatewayError::Cancelled),
        };

        for ((name, version), outcome) in pending.into_iter().zip(fetched) {
            match outcome {
                Ok(detail) => {
                    fetch.details.insert(module_key(&name, &version), detail);
                }
                Err(GatewayError::ModuleNotFound { .. }) => {
                    tracing::warn!(module = %name, version = %version, "module detail not found");
                    fetch.missing.push((name, version));
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            fetched = fetch.details.len(),
            missing = fetch.missing.len(),
            "module details fetched"
        );
        Ok(fetch)
    }
}

async fn fetch_one(
    knowledge: &dyn KnowledgeSource,
    name: &str,
    version: &str,
    timeout: Duration,
) -> Result<tf2avm_model::ModuleDetail, GatewayError> {
    match tokio::time::timeout(timeout, knowledge.fetch_module_detail(name, version)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::KnowledgeUnavailable(format!(
            "detail lookup for {name}@{version} exceeded {} s",
            timeout.as_secs()
        ))),
    }
}

/// True if any candidate is NeedsReview or Unmapped, or any Mapped candidate
/// is below `threshold`
#[must_use]
pub fn needs_review(result: &MappingResult, threshold: f64) -> bool {
    result.candidates.iter().any(|c| match c.status {
        MappingStatus::NeedsReview | MappingStatus::Unmapped => true,
        MappingStatus::Mapped => c.confidence < threshold,
        MappingStatus::AlreadyCompliant => false,
    })
}

/// Demote candidates pointing at missing modules and describe each demotion
pub fn downgrade_missing(result: &mut MappingResult, missing: &[(String, String)]) -> Vec<Issue> {
    if missing.is_empty() {
        return Vec::new();
    }
    let missing: BTreeSet<String> = missing.iter().map(|(m, v)| module_key(m, v)).collect();
    let mut issues = Vec::new();
    for candidate in &mut result.candidates {
        let Some(key) = candidate.target().map(|(m, v)| module_key(m, v)) else {
            continue;
        };
        if candidate.status == MappingStatus::AlreadyCompliant || !missing.contains(&key) {
            continue;
        }
        let message = format!("module {key} not found in the knowledge source; left as original");
        candidate.demote(message.clone());
        issues.push(Issue::at(IssueKind::ModuleNotFound, &candidate.resource_address, message));
    }
    result.refresh_unmapped();
    issues
}

/// Manifest restricted to resources of `provider`
#[must_use]
pub fn scoped_manifest(manifest: &Manifest, provider: &str) -> Manifest {
    let mut scoped = manifest.clone();
    scoped.resources.retain(|r| r.provider() == provider);
    scoped
}

/// Existing module calls whose `source` is exactly the registry source
/// (`Azure/<module>/azurerm`) of a module in `knowledge`
#[must_use]
pub fn already_compliant(manifest: &Manifest, knowledge: &KnowledgeIndex) -> Vec<MappingCandidate> {
    manifest
        .module_calls
        .iter()
        .filter_map(|call| {
            let source = call.source.as_deref()?;
            let name = knowledge.module_by_source(source)?.name.as_str();
            let mut candidate = MappingCandidate::mapped(
                call.address(),
                name,
                call.version.clone().unwrap_or_default(),
                1.0,
            )
            .with_status(MappingStatus::AlreadyCompliant)
            .with_rationale(format!("module call already uses {source}"));
            if call.version.is_none() {
                candidate.target_version = None;
            }
            Some(candidate)
        })
        .collect()
}

/// Validate a proposed mapping against the scoped manifest
///
/// The response must contain exactly one candidate per resource, no unknown
/// addresses, confidences in `[0, 1]`, and a target for every Mapped or
/// NeedsReview candidate. The admitted result is reordered into manifest order.
pub fn admit_mapping(
    scoped: &Manifest,
    provider: &str,
    proposed: MappingResult,
) -> Result<MappingResult, GatewayError> {
    let mut by_address: BTreeMap<String, MappingCandidate> = BTreeMap::new();
    for candidate in proposed.candidates {
        let address = candidate.resource_address.clone();
        let Some(resource) = scoped.resource(&address) else {
            return Err(GatewayError::malformed(format!(
                "candidate references unknown resource {address}"
            )));
        };
        if resource.provider() != provider {
            return Err(GatewayError::malformed(format!(
                "candidate references {address} outside provider {provider}"
            )));
        }
        if !candidate.confidence.is_finite() || !(0.0..=1.0).contains(&candidate.confidence) {
            return Err(GatewayError::malformed(format!(
                "confidence {} for {address} is outside [0, 1]",
                candidate.confidence
            )));
        }
        match candidate.status {
            MappingStatus::Mapped | MappingStatus::NeedsReview if candidate.target().is_none() => {
                return Err(GatewayError::malformed(format!(
                    "{} candidate {address} names no target module",
                    candidate.status
                )));
            }
            MappingStatus::AlreadyCompliant => {
                return Err(GatewayError::malformed(format!(
                    "{address} cannot be proposed as already compliant"
                )));
            }
            _ => {}
        }
        if by_address.insert(address.clone(), candidate).is_some() {
            return Err(GatewayError::malformed(format!("duplicate candidate for {address}")));
        }
    }

    let mut candidates = Vec::with_capacity(by_address.len());
    for resource in scoped.resources_for_provider(provider) {
        match by_address.remove(&resource.address) {
            Some(candidate) => candidates.push(candidate),
            None => {
                return Err(GatewayError::malformed(format!(
                    "no candidate for resource {}",
                    resource.address
                )));
            }
        }
    }
    Ok(MappingResult::from_candidates(candidates))
}

/// Issues for candidates that stay unconverted after the final pass
#[must_use]
pub fn unconverted_issues(result: &MappingResult) -> Vec<Issue> {
    result
        .candidates
        .iter()
        .filter_map(|c| match c.status {
            MappingStatus::Unmapped => Some(Issue::at(
                IssueKind::Unmapped,
                &c.resource_address,
                if c.rationale.is_empty() {
                    "no verified module selected; left as original".to_string()
                } else {
                    format!("{}; left as original", c.rationale)
                },
            )),
            MappingStatus::NeedsReview => Some(Issue::at(
                IssueKind::NeedsReview,
                &c.resource_address,
                format!(
                    "suggested {} at confidence {:.2} needs manual review; left as original",
                    c.target_module.as_deref().unwrap_or("no module"),
                    c.confidence
                ),
            )),
            _ => None,
        })
        .collect()
}
