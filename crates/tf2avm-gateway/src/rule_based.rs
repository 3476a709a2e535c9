//! Deterministic proposal engine
//!
//! Maps by resource type, plans by attribute/input name equality, and
//! derives fix proposals from the error category. Useful offline and as a
//! baseline to compare reasoning backends against.

use crate::capability::ProposalEngine;
use crate::error::GatewayError;
use regex::Regex;
use std::path::Path;
use tf2avm_model::{
    module_key, AttributeMapping, ConversionPlan, ErrorCategory, FixConfidence, FixProposal,
    InputBinding, KnowledgeIndex, Manifest, MappingCandidate, MappingResult, MappingStatus,
    ModuleDetails, OutputRewrite, PlanRequest, ValidationOutcome, VariableDecl,
};

/// Meta-arguments that have no module input counterpart
const META_ARGUMENTS: &[&str] = &["count", "for_each", "depends_on", "lifecycle", "provider"];

/// Confidence of a single-candidate match
const SINGLE_MATCH_CONFIDENCE: f64 = 0.9;
/// Confidence when several modules compete
const AMBIGUOUS_CONFIDENCE: f64 = 0.6;
/// Input coverage needed to accept a module in the review pass
const REVIEW_MIN_COVERAGE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct RuleBasedProposer {
    source_provider: String,
}

impl Default for RuleBasedProposer {
    fn default() -> Self {
        Self::new("azurerm")
    }
}

impl RuleBasedProposer {
    #[must_use]
    pub fn new(source_provider: impl Into<String>) -> Self {
        Self {
            source_provider: source_provider.into(),
        }
    }

    fn first_pass(&self, manifest: &Manifest, knowledge: &KnowledgeIndex) -> MappingResult {
        let candidates = manifest
            .resources_for_provider(&self.source_provider)
            .map(|resource| {
                let modules = knowledge.candidates_for(&resource.resource_type);
                match modules.as_slice() {
                    [] => MappingCandidate::unmapped(
                        &resource.address,
                        format!("no verified module manages {}", resource.resource_type),
                    ),
                    [only] => MappingCandidate::mapped(
                        &resource.address,
                        &only.name,
                        &only.version,
                        SINGLE_MATCH_CONFIDENCE,
                    )
                    .with_rationale(format!("{} manages {}", only.name, resource.resource_type)),
                    [first, ..] => MappingCandidate::mapped(
                        &resource.address,
                        &first.name,
                        &first.version,
                        AMBIGUOUS_CONFIDENCE,
                    )
                    .with_status(MappingStatus::NeedsReview)
                    .with_rationale(format!(
                        "{} modules manage {}",
                        modules.len(),
                        resource.resource_type
                    )),
                }
            })
            .collect();
        MappingResult::from_candidates(candidates)
    }

    fn review(
        &self,
        manifest: &Manifest,
        prior: &MappingResult,
        details: &ModuleDetails,
    ) -> MappingResult {
        let candidates = prior
            .candidates
            .iter()
            .map(|candidate| {
                if candidate.status == MappingStatus::Mapped || candidate.status == MappingStatus::AlreadyCompliant {
                    return candidate.clone();
                }
                let detail = candidate
                    .target()
                    .and_then(|(m, v)| details.get(&module_key(m, v)));
                let (Some(detail), Some(resource)) =
                    (detail, manifest.resource(&candidate.resource_address))
                else {
                    return MappingCandidate::unmapped(
                        &candidate.resource_address,
                        "no module schema available for review",
                    );
                };
                let considered: Vec<&String> = resource
                    .attributes
                    .keys()
                    .filter(|k| !META_ARGUMENTS.contains(&k.as_str()))
                    .collect();
                let covered = considered.iter().filter(|k| detail.has_input(k)).count();
                let coverage = if considered.is_empty() {
                    0.0
                } else {
                    covered as f64 / considered.len() as f64
                };
                if coverage >= REVIEW_MIN_COVERAGE {
                    MappingCandidate::mapped(
                        &candidate.resource_address,
                        &detail.module_name,
                        &detail.version,
                        coverage,
                    )
                    .with_rationale(format!(
                        "{covered} of {} attributes are module inputs",
                        considered.len()
                    ))
                } else {
                    MappingCandidate::unmapped(
                        &candidate.resource_address,
                        format!(
                            "only {covered} of {} attributes are inputs of {}",
                            considered.len(),
                            detail.module_name
                        ),
                    )
                }
            })
            .collect();
        MappingResult::from_candidates(candidates)
    }

    fn plan(&self, request: &PlanRequest) -> Result<ConversionPlan, GatewayError> {
        let address = &request.candidate.resource_address;
        let detail = &request.detail;
        let label = &request.module_label;
        let mut plan = ConversionPlan::empty(request);

        for (attribute, _) in &request.attributes {
            let mapping = if META_ARGUMENTS.contains(&attribute.as_str()) {
                AttributeMapping::unresolved(attribute, "meta-argument must be reviewed by hand")
            } else if detail.has_input(attribute) {
                AttributeMapping::input(attribute, attribute)
            } else {
                AttributeMapping::unresolved(
                    attribute,
                    format!("{} has no input named {attribute}", detail.module_name),
                )
            };
            plan.attribute_map.push(mapping);
        }

        for required in &detail.required_inputs {
            let bound = request.attributes.iter().any(|(a, _)| a == required);
            if !bound {
                let variable = format!("{label}_{required}");
                plan.generated_inputs.push(InputBinding {
                    input: required.clone(),
                    expression: format!("var.{variable}"),
                });
                plan.new_variables.push(
                    VariableDecl::proposed(variable)
                        .with_description(format!("{required} for {}", plan.module_address())),
                );
            }
        }

        let reference = Regex::new(&format!(r"{}\.([A-Za-z0-9_]+)", regex::escape(address)))
            .map_err(|e| GatewayError::malformed(e.to_string()))?;
        for output in &request.referencing_outputs {
            let mut missing = Vec::new();
            let rewritten = reference.replace_all(&output.expression, |caps: &regex::Captures<'_>| {
                let attribute = &caps[1];
                let target = if attribute == "id" && detail.outputs.contains("resource_id") {
                    Some("resource_id")
                } else if detail.outputs.contains(attribute) {
                    Some(attribute)
                } else {
                    None
                };
                match target {
                    Some(t) => format!("module.{label}.{t}"),
                    None => {
                        missing.push(attribute.to_string());
                        caps[0].to_string()
                    }
                }
            });
            for attribute in missing {
                plan.unresolved_items.push(format!(
                    "output \"{}\" references {address}.{attribute}, which {} does not export",
                    output.name, detail.module_name
                ));
            }
            if rewritten != output.expression {
                plan.output_rewrites.push(OutputRewrite {
                    original_expression: output.expression.clone(),
                    new_expression: rewritten.into_owned(),
                });
            }
        }
        Ok(plan)
    }

    fn fixes(&self, outcome: &ValidationOutcome, plans: &[ConversionPlan]) -> Vec<FixProposal> {
        let quoted = Regex::new(r"'([^']+)'|\x22([^\x22]+)\x22").ok();
        outcome
            .errors
            .iter()
            .map(|error| {
                let category = error.category();
                let subject = quoted
                    .as_ref()
                    .and_then(|re| re.captures(&error.message))
                    .and_then(|c| c.get(1).or_else(|| c.get(2)))
                    .map(|m| m.as_str().to_string());
                let related = subject.as_ref().and_then(|s| {
                    plans
                        .iter()
                        .find(|p| p.unresolved_items.iter().any(|u| u.contains(s.as_str())))
                });
                let root_cause = match related {
                    Some(plan) => format!(
                        "{category} error; the conversion of {} left this unresolved",
                        plan.resource_address
                    ),
                    None => format!("{category} error reported by {}", error.tool_kind),
                };
                let (fix, confidence) = match (category, &subject) {
                    (ErrorCategory::Reference, Some(name)) => (
                        format!("Declare variable \"{name}\" in variables.tf or pass it to the module call"),
                        FixConfidence::Medium,
                    ),
                    (ErrorCategory::Resource, Some(name)) => (
                        format!("Remove or rename \"{name}\" to match a module input"),
                        FixConfidence::Medium,
                    ),
                    (ErrorCategory::Unavailable, _) => (
                        "Install the checker and re-run validation".to_string(),
                        FixConfidence::High,
                    ),
                    _ => (
                        format!("Inspect the {category} error at the reported location"),
                        FixConfidence::Low,
                    ),
                };
                FixProposal {
                    file: error.file.clone().unwrap_or_else(|| ".".into()),
                    error_summary: error.message.clone(),
                    root_cause_analysis: root_cause,
                    proposed_fix_text: fix,
                    requires_manual_review: confidence != FixConfidence::High,
                    confidence,
                    priority: category.fix_priority(),
                    estimated_complexity: category.fix_complexity(),
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ProposalEngine for RuleBasedProposer {
    async fn propose_mapping(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        prior: Option<&MappingResult>,
        details: Option<&ModuleDetails>,
    ) -> Result<MappingResult, GatewayError> {
        Ok(match (prior, details) {
            (Some(prior), Some(details)) => self.review(manifest, prior, details),
            _ => self.first_pass(manifest, knowledge),
        })
    }

    async fn propose_plan(&self, request: &PlanRequest) -> Result<ConversionPlan, GatewayError> {
        self.plan(request)
    }

    async fn propose_fixes(
        &self,
        outcome: &ValidationOutcome,
        _output_dir: &Path,
        plans: &[ConversionPlan],
    ) -> Result<Vec<FixProposal>, GatewayError> {
        Ok(self.fixes(outcome, plans))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tf2avm_model::{
        AttributeTarget, KnowledgeEntry, ModuleDetail, OutputDecl, ResourceDecl, SourceSpan,
        ValidationError,
    };

    fn span() -> SourceSpan {
        SourceSpan {
            file: "main.tf".into(),
            ordinal: 0,
            text: String::new(),
        }
    }

    fn resource(resource_type: &str, name: &str, attrs: &[&str]) -> ResourceDecl {
        ResourceDecl {
            address: format!("{resource_type}.{name}"),
            resource_type: resource_type.into(),
            name: name.into(),
            attributes: attrs
                .iter()
                .map(|a| (a.to_string(), "\"x\"".to_string()))
                .collect::<IndexMap<_, _>>(),
            span: span(),
        }
    }

    fn entry(name: &str, types: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            name: name.into(),
            version: "1.0.0".into(),
            display_name: None,
            description: None,
            resource_types: types.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn vnet_detail() -> ModuleDetail {
        ModuleDetail {
            module_name: "avm-res-network-virtualnetwork".into(),
            version: "1.0.0".into(),
            source: None,
            required_inputs: ["location", "name", "resource_group_name", "address_space"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            optional_inputs: BTreeSet::from(["tags".to_string()]),
            outputs: BTreeSet::from(["resource_id".to_string(), "name".to_string()]),
        }
    }

    #[tokio::test]
    async fn first_pass_scores_by_candidate_count() {
        let manifest = Manifest {
            resources: vec![
                resource("azurerm_virtual_network", "vnet1", &["name"]),
                resource("azurerm_storage_account", "sa", &["name"]),
                resource("azurerm_key_vault", "kv", &["name"]),
                resource("random_string", "suffix", &["length"]),
            ],
            ..Manifest::default()
        };
        let knowledge = KnowledgeIndex {
            modules: vec![
                entry("avm-res-network-virtualnetwork", &["azurerm_virtual_network"]),
                entry("avm-res-storage-storageaccount", &["azurerm_storage_account"]),
                entry("avm-ptn-storage", &["azurerm_storage_account"]),
            ],
        };
        let result = RuleBasedProposer::default()
            .propose_mapping(&manifest, &knowledge, None, None)
            .await
            .unwrap();

        let statuses: Vec<_> = result.candidates.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![MappingStatus::Mapped, MappingStatus::NeedsReview, MappingStatus::Unmapped]
        );
        assert_eq!(result.unmapped, vec!["azurerm_key_vault.kv".to_string()]);
    }

    #[tokio::test]
    async fn review_accepts_modules_with_enough_coverage() {
        let manifest = Manifest {
            resources: vec![resource(
                "azurerm_virtual_network",
                "vnet1",
                &["name", "location", "dns_servers"],
            )],
            ..Manifest::default()
        };
        let prior = MappingResult::from_candidates(vec![MappingCandidate::mapped(
            "azurerm_virtual_network.vnet1",
            "avm-res-network-virtualnetwork",
            "1.0.0",
            0.6,
        )
        .with_status(MappingStatus::NeedsReview)]);
        let detail = vnet_detail();
        let details = ModuleDetails::from([(detail.key(), detail)]);

        let reviewed = RuleBasedProposer::default()
            .propose_mapping(&manifest, &KnowledgeIndex::default(), Some(&prior), Some(&details))
            .await
            .unwrap();
        let candidate = &reviewed.candidates[0];
        assert_eq!(candidate.status, MappingStatus::Mapped);
        assert!((candidate.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn plan_binds_inputs_and_rewrites_outputs() {
        let request = PlanRequest {
            detail: vnet_detail(),
            candidate: MappingCandidate::mapped(
                "azurerm_virtual_network.vnet1",
                "avm-res-network-virtualnetwork",
                "1.0.0",
                0.95,
            ),
            original_text: String::new(),
            attributes: vec![
                ("name".into(), "\"vnet1\"".into()),
                ("location".into(), "var.location".into()),
                ("resource_group_name".into(), "\"rg\"".into()),
                ("dns_servers".into(), "[\"10.0.0.4\"]".into()),
            ],
            referencing_outputs: vec![OutputDecl {
                name: "vnet".into(),
                expression: "[azurerm_virtual_network.vnet1.id, azurerm_virtual_network.vnet1.guid]".into(),
                span: span(),
            }],
            module_label: "vnet1".into(),
        };
        let plan = RuleBasedProposer::default().propose_plan(&request).await.unwrap();

        assert_eq!(plan.attribute_map.len(), 4);
        assert!(matches!(
            &plan.attribute_map[3].target,
            AttributeTarget::Unresolved { .. }
        ));
        assert_eq!(plan.generated_inputs[0].input, "address_space");
        assert_eq!(plan.generated_inputs[0].expression, "var.vnet1_address_space");
        assert_eq!(plan.new_variables[0].name, "vnet1_address_space");
        assert_eq!(
            plan.output_rewrites[0].new_expression,
            "[module.vnet1.resource_id, azurerm_virtual_network.vnet1.guid]"
        );
        assert_eq!(plan.unresolved_items.len(), 1);
        assert!(plan.unresolved_items[0].contains("guid"));
    }

    #[tokio::test]
    async fn fixes_follow_error_category() {
        let outcome = ValidationOutcome::failed(vec![ValidationError::new(
            "Missing required variable 'dns_servers'",
            "terraform validate",
        )
        .with_file("main.tf")]);
        let fixes = RuleBasedProposer::default()
            .propose_fixes(&outcome, Path::new("out"), &[])
            .await
            .unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].file, "main.tf");
        assert!(fixes[0].proposed_fix_text.contains("dns_servers"));
        assert_eq!(fixes[0].confidence, FixConfidence::Medium);
    }
}
