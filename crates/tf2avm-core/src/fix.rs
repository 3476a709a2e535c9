//! Fix planner
//!
//! Turns a failed validation into per-file remediation proposals. Plans are
//! used only to explain why something is missing; mapping and planning are
//! never re-run, and validation is not retried.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tf2avm_gateway::{with_retry, CallPolicy, GatewayError, ProposalEngine};
use tf2avm_model::{ConversionPlan, FixProposal, ValidationError, ValidationOutcome};
use tokio_util::sync::CancellationToken;

/// File recorded for errors the checker did not attribute to a file
pub const UNATTRIBUTED_FILE: &str = ".";

/// Fix proposals grouped by file, most urgent first within a file
///
/// Never empty for a failed outcome: files the proposer skipped, or every
/// file when the proposer fails, get low-confidence manual-review entries.
pub async fn plan_fixes(
    proposer: &dyn ProposalEngine,
    policy: &CallPolicy,
    cancel: &CancellationToken,
    outcome: &ValidationOutcome,
    output_dir: &Path,
    plans: &[ConversionPlan],
) -> Result<Vec<FixProposal>, GatewayError> {
    if outcome.success {
        return Ok(Vec::new());
    }

    let proposed = match with_retry(policy, cancel, "propose_fixes", || {
        proposer.propose_fixes(outcome, output_dir, plans)
    })
    .await
    {
        Ok(proposals) => proposals,
        Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
        Err(e) => {
            tracing::warn!(error = %e, "fix proposal failed; falling back to manual review");
            Vec::new()
        }
    };

    let (mut proposals, malformed): (Vec<FixProposal>, Vec<FixProposal>) = proposed
        .into_iter()
        .partition(|p| !p.file.trim().is_empty() && !p.error_summary.trim().is_empty());
    if !malformed.is_empty() {
        tracing::warn!(dropped = malformed.len(), "fix proposals without file or summary discarded");
    }
    let admitted = proposals.len();

    let covered: BTreeSet<String> = proposals.iter().map(|p| p.file.clone()).collect();
    for error in &outcome.errors {
        let file = error.file.as_deref().unwrap_or(UNATTRIBUTED_FILE);
        if !covered.contains(file) {
            proposals.push(fallback(error, file, plans));
        }
    }
    if proposals.is_empty() {
        proposals.push(FixProposal::manual_review(
            UNATTRIBUTED_FILE,
            "Validation failed without diagnostics",
        ));
    }
    proposals.sort_by(|a, b| a.file.cmp(&b.file).then(a.priority.cmp(&b.priority)));

    tracing::info!(
        proposals = proposals.len(),
        fallbacks = proposals.len() - admitted,
        "fix plan ready"
    );
    Ok(proposals)
}

fn fallback(error: &ValidationError, file: &str, plans: &[ConversionPlan]) -> FixProposal {
    let category = error.category();
    let mut proposal = FixProposal::manual_review(file, &error.message);
    proposal.priority = category.fix_priority();
    proposal.estimated_complexity = category.fix_complexity();
    proposal.root_cause_analysis = match related_plan(&error.message, plans) {
        Some((plan, subject)) => format!(
            "{category} error; converting {} to {} left \"{subject}\" unresolved",
            plan.resource_address, plan.target_module
        ),
        None => format!("{category} error reported by {}", error.tool_kind),
    };
    proposal
}

/// Plan whose unresolved items mention a name quoted in `message`
fn related_plan<'a>(message: &str, plans: &'a [ConversionPlan]) -> Option<(&'a ConversionPlan, String)> {
    let quoted = Regex::new(r#"'([^']+)'|"([^"]+)""#).ok()?;
    let related = quoted
        .captures_iter(message)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .find_map(|subject| {
            plans
                .iter()
                .filter(|p| p.is_usable())
                .find(|p| {
                    p.unresolved_items.iter().any(|u| u.contains(subject.as_str()))
                        || p.unresolved_attributes().any(|m| m.source_attribute == subject)
                })
                .map(|p| (p, subject))
        });
    related
}
