//! Planning engine
//!
//! One planning task per mapped resource, bounded by a semaphore. Workers
//! own their request and return their own plan; the only aggregation is the
//! fan-in after the `JoinSet` drains, which puts every plan back into
//! manifest order.

use crate::state::{Issue, IssueKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tf2avm_gateway::{with_retry, CallPolicy, GatewayError, ProposalEngine, ProposalError};
use tf2avm_model::{
    module_key, AttributeTarget, ConversionPlan, Manifest, MappingResult, MappingStatus,
    ModuleDetails, PlanRequest, PlanningErrorKind,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Aggregated planning result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanningOutcome {
    /// Every plan, failed ones included, in manifest order
    pub plans: Vec<ConversionPlan>,
    /// Resources left as original, in manifest order
    pub passthrough: Vec<String>,
    pub issues: Vec<Issue>,
}

impl PlanningOutcome {
    /// Plans that will be written as module calls
    pub fn usable(&self) -> impl Iterator<Item = &ConversionPlan> {
        self.plans.iter().filter(|p| p.is_usable())
    }
}

pub struct PlanningEngine {
    proposer: Arc<dyn ProposalEngine>,
    policy: CallPolicy,
    max_parallel: usize,
}

impl PlanningEngine {
    #[must_use]
    pub fn new(proposer: Arc<dyn ProposalEngine>, policy: CallPolicy, max_parallel: usize) -> Self {
        Self {
            proposer,
            policy,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Plan every Mapped candidate that has a module detail
    pub async fn plan_all(
        &self,
        details: &ModuleDetails,
        mapping: &MappingResult,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> PlanningOutcome {
        let labels = assign_labels(manifest, mapping);
        let (requests, mut issues) = build_requests(manifest, mapping, details, &labels);
        tracing::info!(
            items = requests.len(),
            max_parallel = self.max_parallel,
            "planning started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut set = JoinSet::new();
        for (index, request) in requests.iter().cloned().enumerate() {
            let proposer = Arc::clone(&self.proposer);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let policy = self.policy;
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        index,
                        ConversionPlan::failed(&request, PlanningErrorKind::Cancelled, "worker pool closed"),
                    );
                };
                if cancel.is_cancelled() {
                    return (
                        index,
                        ConversionPlan::failed(
                            &request,
                            PlanningErrorKind::Cancelled,
                            "run cancelled before planning started",
                        ),
                    );
                }
                let plan = plan_one(proposer.as_ref(), &policy, &request, &cancel).await;
                (index, plan)
            });
        }

        let mut slots: Vec<Option<ConversionPlan>> = vec![None; requests.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, plan)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(plan);
                    }
                }
                Err(e) => tracing::error!(error = %e, "planning task failed"),
            }
        }

        let plans: Vec<ConversionPlan> = slots
            .into_iter()
            .zip(&requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ConversionPlan::failed(request, PlanningErrorKind::WorkerFailed, "planning task aborted")
                })
            })
            .collect();

        for plan in &plans {
            match plan.planning_error {
                Some(kind) => issues.push(Issue::at(
                    IssueKind::PlanningFailed,
                    &plan.resource_address,
                    format!(
                        "planning {kind}: {}; left as original",
                        plan.error_message.as_deref().unwrap_or("no detail")
                    ),
                )),
                None => issues.extend(
                    plan.unresolved_items
                        .iter()
                        .map(|item| Issue::at(IssueKind::Unresolved, &plan.resource_address, item.clone())),
                ),
            }
        }

        let converted: BTreeSet<String> = plans
            .iter()
            .filter(|p| p.is_usable())
            .map(|p| p.resource_address.clone())
            .collect();
        let passthrough = manifest
            .resources
            .iter()
            .filter(|r| !converted.contains(&r.address))
            .map(|r| r.address.clone())
            .collect();

        let outcome = PlanningOutcome {
            plans,
            passthrough,
            issues,
        };
        tracing::info!(
            converted = converted.len(),
            failed = outcome.plans.len() - converted.len(),
            passthrough = outcome.passthrough.len(),
            "planning finished"
        );
        outcome
    }
}

/// Plan one resource; never fails, a failure is recorded in the plan
pub async fn plan_one(
    proposer: &dyn ProposalEngine,
    policy: &CallPolicy,
    request: &PlanRequest,
    cancel: &CancellationToken,
) -> ConversionPlan {
    let address = &request.candidate.resource_address;
    let proposed = with_retry(policy, cancel, "propose_plan", || proposer.propose_plan(request)).await;
    match proposed.and_then(|plan| admit_plan(request, plan)) {
        Ok(plan) => {
            tracing::debug!(resource = %address, unresolved = plan.unresolved_items.len(), "plan admitted");
            plan
        }
        Err(err) => {
            let kind = planning_error_kind(&err);
            tracing::warn!(resource = %address, error = %err, kind = %kind, "planning failed");
            ConversionPlan::failed(request, kind, err.to_string())
        }
    }
}

fn planning_error_kind(err: &GatewayError) -> PlanningErrorKind {
    match err {
        GatewayError::Proposal(ProposalError::Transient(_)) => PlanningErrorKind::RetriesExhausted,
        GatewayError::Proposal(ProposalError::Timeout(_)) => PlanningErrorKind::Timeout,
        GatewayError::Proposal(ProposalError::Malformed(_)) => PlanningErrorKind::Malformed,
        GatewayError::Proposal(ProposalError::Rejected(_)) => PlanningErrorKind::Rejected,
        GatewayError::Cancelled => PlanningErrorKind::Cancelled,
        _ => PlanningErrorKind::WorkerFailed,
    }
}

/// Validate a proposed plan against its request
///
/// Identity fields must match, every source attribute must exist on the
/// resource and every bound input must exist in the module schema.
/// Unresolved attributes, dropped attributes and unbound required inputs
/// are appended to `unresolved_items`.
pub fn admit_plan(request: &PlanRequest, mut plan: ConversionPlan) -> Result<ConversionPlan, GatewayError> {
    let detail = &request.detail;
    let address = &request.candidate.resource_address;

    if plan.resource_address != *address {
        return Err(GatewayError::malformed(format!(
            "plan for {address} names resource {}",
            plan.resource_address
        )));
    }
    if plan.target_module != detail.module_name || plan.target_version != detail.version {
        return Err(GatewayError::malformed(format!(
            "plan for {address} targets {}@{} instead of {}",
            plan.target_module,
            plan.target_version,
            detail.key()
        )));
    }
    if plan.module_label.is_empty() {
        plan.module_label = request.module_label.clone();
    } else if plan.module_label != request.module_label {
        return Err(GatewayError::malformed(format!(
            "plan for {address} uses label {} instead of {}",
            plan.module_label, request.module_label
        )));
    }
    if plan.planning_error.is_some() {
        return Err(GatewayError::malformed(format!("plan for {address} carries a planning error")));
    }

    let attributes: BTreeSet<&str> = request.attributes.iter().map(|(a, _)| a.as_str()).collect();
    let mut mapped_attributes: BTreeSet<String> = BTreeSet::new();
    let mut bound_inputs = BTreeSet::new();
    for mapping in &plan.attribute_map {
        let source = mapping.source_attribute.as_str();
        if !attributes.contains(source) {
            return Err(GatewayError::malformed(format!("{address} has no attribute {source}")));
        }
        if !mapped_attributes.insert(source.to_string()) {
            return Err(GatewayError::malformed(format!("attribute {source} of {address} mapped twice")));
        }
        if let AttributeTarget::Input { name, .. } = &mapping.target {
            if !detail.has_input(name) {
                return Err(GatewayError::malformed(format!(
                    "{} has no input {name}",
                    detail.module_name
                )));
            }
            if !bound_inputs.insert(name.clone()) {
                return Err(GatewayError::malformed(format!("input {name} bound twice")));
            }
        }
    }
    for binding in &plan.generated_inputs {
        if !detail.has_input(&binding.input) {
            return Err(GatewayError::malformed(format!(
                "{} has no input {}",
                detail.module_name, binding.input
            )));
        }
        if !bound_inputs.insert(binding.input.clone()) {
            return Err(GatewayError::malformed(format!("input {} bound twice", binding.input)));
        }
    }
    for variable in &plan.new_variables {
        if variable.name.trim().is_empty() {
            return Err(GatewayError::malformed(format!("plan for {address} declares an unnamed variable")));
        }
    }
    for rewrite in &plan.output_rewrites {
        let known = !rewrite.original_expression.is_empty()
            && request
                .referencing_outputs
                .iter()
                .any(|o| o.expression.contains(&rewrite.original_expression));
        if !known {
            return Err(GatewayError::malformed(format!(
                "rewrite of `{}` matches no output referencing {address}",
                rewrite.original_expression
            )));
        }
    }

    let mut unresolved = Vec::new();
    for mapping in &plan.attribute_map {
        if let AttributeTarget::Unresolved { reason } = &mapping.target {
            unresolved.push(format!("attribute {}: {reason}", mapping.source_attribute));
        }
    }
    for (attribute, _) in &request.attributes {
        if !mapped_attributes.contains(attribute.as_str()) {
            plan.attribute_map
                .push(tf2avm_model::AttributeMapping::unresolved(attribute, "not covered by the plan"));
            unresolved.push(format!("attribute {attribute}: not covered by the plan"));
        }
    }
    for required in &detail.required_inputs {
        if !bound_inputs.contains(required) {
            unresolved.push(format!("required input {required} of {} is not bound", detail.module_name));
        }
    }
    for item in unresolved {
        if !plan.unresolved_items.contains(&item) {
            plan.unresolved_items.push(item);
        }
    }
    Ok(plan)
}

/// Module labels for Mapped candidates, unique across the output tree
///
/// Labels derive from the resource name in manifest order; collisions with
/// existing module calls or earlier labels get `_2`, `_3`, ...
#[must_use]
pub fn assign_labels(manifest: &Manifest, mapping: &MappingResult) -> BTreeMap<String, String> {
    let mut taken: BTreeSet<String> = manifest.module_calls.iter().map(|m| m.label.clone()).collect();
    let mut labels = BTreeMap::new();
    for resource in &manifest.resources {
        let mapped = mapping
            .candidate(&resource.address)
            .is_some_and(|c| c.status == MappingStatus::Mapped);
        if !mapped {
            continue;
        }
        let base = label_base(&resource.name);
        let mut label = base.clone();
        let mut n = 2;
        while taken.contains(&label) {
            label = format!("{base}_{n}");
            n += 1;
        }
        taken.insert(label.clone());
        labels.insert(resource.address.clone(), label);
    }
    labels
}

fn label_base(name: &str) -> String {
    let mut label: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if !label.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        label.insert(0, '_');
    }
    label
}

/// Planning requests in manifest order
///
/// Mapped candidates whose module detail is missing are reported and left
/// as original.
#[must_use]
pub fn build_requests(
    manifest: &Manifest,
    mapping: &MappingResult,
    details: &ModuleDetails,
    labels: &BTreeMap<String, String>,
) -> (Vec<PlanRequest>, Vec<Issue>) {
    let mut requests = Vec::new();
    let mut issues = Vec::new();
    for resource in &manifest.resources {
        let Some(candidate) = mapping.candidate(&resource.address) else {
            continue;
        };
        if candidate.status != MappingStatus::Mapped {
            continue;
        }
        let detail = candidate
            .target()
            .and_then(|(m, v)| details.get(&module_key(m, v)));
        let (Some(detail), Some(label)) = (detail, labels.get(&resource.address)) else {
            issues.push(Issue::at(
                IssueKind::ModuleNotFound,
                &resource.address,
                "no module detail available for planning; left as original",
            ));
            continue;
        };
        requests.push(PlanRequest {
            detail: detail.clone(),
            candidate: candidate.clone(),
            original_text: resource.span.text.clone(),
            attributes: resource
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            referencing_outputs: manifest.outputs_referencing(&resource.address),
            module_label: label.clone(),
        });
    }
    (requests, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tf2avm_model::{
        AttributeMapping, InputBinding, MappingCandidate, ModuleCallDecl, ModuleDetail, OutputDecl,
        OutputRewrite, ResourceDecl, SourceSpan,
    };

    fn span(text: &str) -> SourceSpan {
        SourceSpan {
            file: "main.tf".into(),
            ordinal: 0,
            text: text.into(),
        }
    }

    fn detail() -> ModuleDetail {
        ModuleDetail {
            module_name: "avm-res-network-virtualnetwork".into(),
            version: "0.7.1".into(),
            source: None,
            required_inputs: ["location", "resource_group_name"].map(String::from).into(),
            optional_inputs: ["name", "address_space"].map(String::from).into(),
            outputs: ["resource_id", "name"].map(String::from).into(),
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            detail: detail(),
            candidate: MappingCandidate::mapped(
                "azurerm_virtual_network.vnet1",
                "avm-res-network-virtualnetwork",
                "0.7.1",
                0.95,
            ),
            original_text: String::new(),
            attributes: vec![
                ("name".into(), "\"vnet1\"".into()),
                ("location".into(), "var.location".into()),
                ("dns_servers".into(), "[\"10.0.0.4\"]".into()),
            ],
            referencing_outputs: vec![OutputDecl {
                name: "vnet_id".into(),
                expression: "azurerm_virtual_network.vnet1.id".into(),
                span: span(""),
            }],
            module_label: "vnet1".into(),
        }
    }

    #[test]
    fn admission_fills_unresolved_items() {
        let request = request();
        let mut plan = ConversionPlan::empty(&request);
        plan.attribute_map = vec![
            AttributeMapping::input("name", "name"),
            AttributeMapping::input("location", "location"),
        ];
        let admitted = admit_plan(&request, plan).unwrap();
        assert_eq!(
            admitted.unresolved_items,
            vec![
                "attribute dns_servers: not covered by the plan".to_string(),
                "required input resource_group_name of avm-res-network-virtualnetwork is not bound"
                    .to_string(),
            ]
        );
        assert!(admitted.attribute_map.iter().any(|m| m.source_attribute == "dns_servers" && m.is_unresolved()));
    }

    #[test]
    fn admission_rejects_unknown_inputs_and_attributes() {
        let request = request();

        let mut unknown_input = ConversionPlan::empty(&request);
        unknown_input.attribute_map = vec![AttributeMapping::input("dns_servers", "dns_servers")];
        assert!(admit_plan(&request, unknown_input).is_err());

        let mut unknown_attribute = ConversionPlan::empty(&request);
        unknown_attribute.attribute_map = vec![AttributeMapping::input("tags", "name")];
        assert!(admit_plan(&request, unknown_attribute).is_err());

        let mut double_bound = ConversionPlan::empty(&request);
        double_bound.attribute_map = vec![AttributeMapping::input("location", "location")];
        double_bound.generated_inputs = vec![InputBinding {
            input: "location".into(),
            expression: "var.loc".into(),
        }];
        assert!(admit_plan(&request, double_bound).is_err());
    }

    #[test]
    fn admission_rejects_foreign_identity_and_rewrites() {
        let request = request();

        let mut wrong_address = ConversionPlan::empty(&request);
        wrong_address.resource_address = "azurerm_subnet.subnet1".into();
        assert!(admit_plan(&request, wrong_address).is_err());

        let mut wrong_rewrite = ConversionPlan::empty(&request);
        wrong_rewrite.output_rewrites = vec![OutputRewrite {
            original_expression: "azurerm_subnet.other.id".into(),
            new_expression: "module.vnet1.resource_id".into(),
        }];
        assert!(admit_plan(&request, wrong_rewrite).is_err());
    }

    #[test]
    fn labels_are_unique_and_avoid_existing_modules() {
        let resource = |address: &str| {
            let (t, n) = address.split_once('.').unwrap();
            ResourceDecl {
                address: address.into(),
                resource_type: t.into(),
                name: n.into(),
                attributes: Default::default(),
                span: span(""),
            }
        };
        let manifest = Manifest {
            resources: vec![
                resource("azurerm_virtual_network.main"),
                resource("azurerm_subnet.main"),
                resource("azurerm_key_vault.kv"),
            ],
            module_calls: vec![ModuleCallDecl {
                label: "kv".into(),
                source: Some("./kv".into()),
                version: None,
                span: span(""),
            }],
            ..Manifest::default()
        };
        let mapping = MappingResult::from_candidates(
            manifest
                .resources
                .iter()
                .map(|r| MappingCandidate::mapped(&r.address, "m", "1", 0.9))
                .collect(),
        );
        let labels = assign_labels(&manifest, &mapping);
        assert_eq!(labels["azurerm_virtual_network.main"], "main");
        assert_eq!(labels["azurerm_subnet.main"], "main_2");
        assert_eq!(labels["azurerm_key_vault.kv"], "kv_2");
    }

    #[test]
    fn requests_skip_candidates_without_details() {
        let manifest = Manifest {
            resources: vec![ResourceDecl {
                address: "azurerm_virtual_network.vnet1".into(),
                resource_type: "azurerm_virtual_network".into(),
                name: "vnet1".into(),
                attributes: Default::default(),
                span: span("resource \"azurerm_virtual_network\" \"vnet1\" {}"),
            }],
            ..Manifest::default()
        };
        let mapping = MappingResult::from_candidates(vec![MappingCandidate::mapped(
            "azurerm_virtual_network.vnet1",
            "avm-res-network-virtualnetwork",
            "0.7.1",
            0.9,
        )]);
        let labels = assign_labels(&manifest, &mapping);

        let (requests, issues) = build_requests(&manifest, &mapping, &ModuleDetails::new(), &labels);
        assert!(requests.is_empty());
        assert_eq!(issues[0].kind, IssueKind::ModuleNotFound);

        let details: ModuleDetails = [(detail().key(), detail())].into();
        let (requests, issues) = build_requests(&manifest, &mapping, &details, &labels);
        assert!(issues.is_empty());
        assert_eq!(requests[0].module_label, "vnet1");
        assert_eq!(requests[0].original_text, "resource \"azurerm_virtual_network\" \"vnet1\" {}");
    }

    #[test]
    fn error_kinds_follow_the_failure() {
        assert_eq!(
            planning_error_kind(&ProposalError::Transient("503".into()).into()),
            PlanningErrorKind::RetriesExhausted
        );
        assert_eq!(planning_error_kind(&GatewayError::malformed("x")), PlanningErrorKind::Malformed);
        assert_eq!(planning_error_kind(&GatewayError::Cancelled), PlanningErrorKind::Cancelled);
    }
}
