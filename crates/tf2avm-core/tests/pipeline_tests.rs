//! End-to-end pipeline runs against scripted capabilities

use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tf2avm_artifact::{ArtifactKind, RunArtifacts};
use tf2avm_core::report::{ISSUES_FOUND, OUTPUT_LOCATION, SUCCESSFUL_MAPPINGS};
use tf2avm_core::{Capabilities, IssueKind, Pipeline, PipelineConfig, RunOutcome, RunStatus};
use tf2avm_gateway::{GatewayError, HclScanner};
use tf2avm_model::{ConversionPlan, ValidationError, ValidationOutcome};
use tf2avm_test_utils::fixtures::{self, NSG_ADDRESS, STORAGE_ADDRESS, SUBNET_ADDRESS, VNET_ADDRESS};
use tf2avm_test_utils::{ScriptedChecker, ScriptedProposer, StaticKnowledge};
use tokio_util::sync::CancellationToken;

struct Harness {
    proposer: Arc<ScriptedProposer>,
    knowledge: Arc<StaticKnowledge>,
    checker: Arc<ScriptedChecker>,
    root: tempfile::TempDir,
}

impl Harness {
    fn new(proposer: ScriptedProposer, knowledge: StaticKnowledge, checker: ScriptedChecker) -> Self {
        Self {
            proposer: Arc::new(proposer),
            knowledge: Arc::new(knowledge),
            checker: Arc::new(checker),
            root: tempfile::tempdir().unwrap(),
        }
    }

    fn network(proposer: ScriptedProposer, checker: ScriptedChecker) -> Self {
        Self::new(
            proposer,
            StaticKnowledge::new(fixtures::network_index(), fixtures::network_details()),
            checker,
        )
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_artifact_root(self.root.path())
            .with_retry_backoff_ms(1)
    }

    fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        let caps = Capabilities {
            scanner: Arc::new(HclScanner::new()),
            knowledge: self.knowledge.clone(),
            proposer: self.proposer.clone(),
            checker: self.checker.clone(),
        };
        Pipeline::new(config, caps).unwrap()
    }

    async fn run(&self, files: std::collections::BTreeMap<String, String>) -> RunOutcome {
        self.pipeline(self.config()).run(files).await.unwrap()
    }
}

async fn stages(outcome: &RunOutcome) -> Vec<String> {
    RunArtifacts::from_dir(&outcome.run_dir)
        .unwrap()
        .list()
        .await
        .unwrap()
}

fn migrated(outcome: &RunOutcome, file: &str) -> String {
    let dir = outcome.migrated_dir.as_deref().unwrap();
    std::fs::read_to_string(dir.join(file)).unwrap()
}

fn issue_kinds(outcome: &RunOutcome) -> Vec<(IssueKind, Option<String>)> {
    outcome
        .state
        .issues
        .iter()
        .map(|i| (i.kind, i.address.clone()))
        .collect()
}

fn dns_failure() -> ValidationOutcome {
    ValidationOutcome::failed(vec![ValidationError::new(
        "Missing required variable 'dns_servers'",
        "terraform validate",
    )
    .with_file("main.tf")
    .with_line(3)])
}

#[tokio::test]
async fn confident_network_converts_cleanly() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.state.issues, Vec::new());
    assert_eq!(harness.proposer.mapping_calls(), 1);
    assert_eq!(harness.proposer.review_calls(), 0);
    assert_eq!(harness.proposer.plan_calls(), 2);
    assert_eq!(harness.proposer.fix_calls(), 0);
    assert_eq!(harness.checker.calls(), 1);

    let main = migrated(&outcome, "main.tf");
    assert!(main.contains("module \"vnet1\" {"));
    assert!(main.contains("module \"subnet1\" {"));
    assert!(main.contains("source  = \"Azure/avm-res-network-virtualnetwork/azurerm\""));
    assert!(main.contains("source  = \"Azure/avm-res-network-virtualnetwork-subnet/azurerm\""));
    assert!(main.contains("version = \"0.7.1\""));
    assert!(main.contains("# Core network\n# tf2avm: converted from azurerm_virtual_network.vnet1"));
    assert!(!main.contains("resource \"azurerm_"));
    assert!(migrated(&outcome, "outputs.tf").contains("value = module.vnet1.resource_id"));

    assert!(outcome.report.contains(SUCCESSFUL_MAPPINGS));
    assert!(outcome.report.contains(
        "| `azurerm_virtual_network.vnet1` | `avm-res-network-virtualnetwork` | `0.7.1` | 0.95 | `module.vnet1` |"
    ));
    assert!(outcome.report.contains(
        "| `azurerm_subnet.subnet1` | `avm-res-network-virtualnetwork-subnet` | `0.7.1` | 0.90 | `module.subnet1` |"
    ));
    assert!(!outcome.report.contains(ISSUES_FOUND));
    assert!(outcome.report.contains(OUTPUT_LOCATION));

    assert_eq!(
        stages(&outcome).await,
        vec![
            "01_scan.json",
            "02_knowledge.json",
            "03_mappings.json",
            "05_module_details_final.json",
            "06_plans",
            "07_conversion_summary.json",
            "08_migrated",
            "09_validation.json",
            "11_report.md",
            "12_run_state.json",
        ]
    );
}

#[tokio::test]
async fn low_confidence_runs_one_review_pass() {
    let harness = Harness::network(
        ScriptedProposer::new()
            .with_first_mapping(fixtures::hesitant_mapping())
            .with_review_mapping(fixtures::confident_mapping()),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(harness.proposer.mapping_calls(), 1);
    assert_eq!(harness.proposer.review_calls(), 1);
    // The final fetch reuses everything the first pass already loaded
    assert_eq!(harness.knowledge.detail_calls(), 2);

    let stages = stages(&outcome).await;
    assert!(stages.contains(&"04_module_details_pass1.json".to_string()));
    assert!(stages.contains(&"04_01_retry_mappings.json".to_string()));
    assert!(outcome
        .report
        .contains("| `azurerm_subnet.subnet1` | `avm-res-network-virtualnetwork-subnet` | `0.7.1` | 0.90 |"));
}

#[tokio::test]
async fn confidence_at_threshold_skips_review() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::hesitant_mapping()),
        ScriptedChecker::passing(),
    );
    let config = harness.config().with_confidence_threshold(0.4);
    let outcome = harness
        .pipeline(config)
        .run(fixtures::network_files())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(harness.proposer.review_calls(), 0);
}

#[tokio::test]
async fn missing_dns_variable_yields_fix_plan() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        ScriptedChecker::failing(dns_failure()),
    );
    let outcome = harness.run(fixtures::network_files_with_dns()).await;

    assert_eq!(outcome.status, RunStatus::PartiallySucceeded);
    assert_eq!(harness.proposer.fix_calls(), 1);
    assert!(outcome.report.contains("Missing required variable 'dns_servers'"));
    assert!(!outcome.report.contains(OUTPUT_LOCATION));

    let kinds = issue_kinds(&outcome);
    assert!(kinds.contains(&(IssueKind::Unresolved, Some(VNET_ADDRESS.to_string()))));
    assert!(kinds.contains(&(IssueKind::Validation, Some("main.tf:3".to_string()))));

    let main = migrated(&outcome, "main.tf");
    assert!(main.contains("# TODO(tf2avm): unresolved dns_servers"));

    assert!(stages(&outcome).await.contains(&"10_fix_plan.json".to_string()));
    let fixes: Vec<tf2avm_model::FixProposal> = RunArtifacts::from_dir(&outcome.run_dir)
        .unwrap()
        .get_json(&tf2avm_core::keys::fix_plan().unwrap())
        .await
        .unwrap()
        .payload;
    assert!(!fixes.is_empty());
    assert_eq!(fixes[0].file, "main.tf");
    assert_eq!(fixes[0].error_summary, "Missing required variable 'dns_servers'");
}

#[tokio::test]
async fn unavailable_checker_is_a_partial_success() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        ScriptedChecker::unavailable("Terraform CLI not found"),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::PartiallySucceeded);
    assert_eq!(harness.proposer.fix_calls(), 1);
    assert!(outcome.migrated_dir.is_some());
}

#[tokio::test]
async fn failed_plan_is_isolated() {
    let harness = Harness::network(
        ScriptedProposer::new()
            .with_first_mapping(fixtures::confident_mapping())
            .failing_plan(SUBNET_ADDRESS),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_ne!(outcome.status, RunStatus::Failed);
    assert_eq!(
        issue_kinds(&outcome),
        vec![(IssueKind::PlanningFailed, Some(SUBNET_ADDRESS.to_string()))]
    );
    let main = migrated(&outcome, "main.tf");
    assert!(main.contains("module \"vnet1\" {"));
    assert!(main.contains(fixtures::SUBNET_BLOCK));
    assert!(!main.contains("module \"subnet1\""));
}

#[tokio::test]
async fn unmapped_resource_is_copied_verbatim() {
    let harness = Harness::network(ScriptedProposer::new(), ScriptedChecker::passing());
    let outcome = harness.run(fixtures::network_files_with_storage()).await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert!(migrated(&outcome, "main.tf").contains(fixtures::STORAGE_BLOCK));
    assert!(issue_kinds(&outcome).contains(&(IssueKind::Unmapped, Some(STORAGE_ADDRESS.to_string()))));

    let summary = outcome.state.issues.iter().find(|i| i.kind == IssueKind::Unmapped).unwrap();
    assert!(summary.message.ends_with("left as original"));
}

#[tokio::test]
async fn references_to_converted_resources_are_reported() {
    let harness = Harness::network(ScriptedProposer::new(), ScriptedChecker::passing());
    let outcome = harness.run(fixtures::network_files_with_nsg()).await;

    let main = migrated(&outcome, "main.tf");
    assert!(main.contains("module \"vnet1\" {"));
    assert!(main.contains(fixtures::NSG_BLOCK));

    let kinds = issue_kinds(&outcome);
    assert!(kinds.contains(&(IssueKind::Unmapped, Some(NSG_ADDRESS.to_string()))));
    let dangling: Vec<&str> = outcome
        .state
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::Unresolved && i.address.as_deref() == Some(VNET_ADDRESS))
        .map(|i| i.message.as_str())
        .collect();
    assert_eq!(
        dangling,
        vec!["azurerm_network_security_group.nsg still references the converted resource"]
    );
    assert!(outcome.report.contains(ISSUES_FOUND));
    assert!(outcome
        .report
        .contains("still references the converted resource"));
}

#[tokio::test]
async fn missing_module_detail_downgrades_once() {
    let harness = Harness::new(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        StaticKnowledge::new(fixtures::network_index(), fixtures::network_details())
            .without_detail(fixtures::SUBNET_MODULE, fixtures::MODULE_VERSION),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(
        issue_kinds(&outcome),
        vec![(IssueKind::ModuleNotFound, Some(SUBNET_ADDRESS.to_string()))]
    );
    assert!(migrated(&outcome, "main.tf").contains(fixtures::SUBNET_BLOCK));
    assert_eq!(harness.proposer.plan_calls(), 1);
}

#[tokio::test]
async fn knowledge_outage_fails_with_report() {
    let harness = Harness::new(
        ScriptedProposer::new(),
        StaticKnowledge::unavailable("index offline"),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(harness.proposer.mapping_calls(), 0);
    assert!(outcome.migrated_dir.is_none());
    assert!(outcome
        .report
        .contains("knowledge_fetch failed: knowledge source unavailable: index offline"));
    assert!(!outcome.report.contains(SUCCESSFUL_MAPPINGS));
    assert_eq!(
        stages(&outcome).await,
        vec!["01_scan.json", "11_report.md", "12_run_state.json"]
    );
}

#[tokio::test]
async fn malformed_mapping_is_fatal() {
    let harness = Harness::network(
        ScriptedProposer::new().with_mapping_error(GatewayError::malformed("not json")),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(harness.proposer.plan_calls(), 0);
    assert_eq!(harness.checker.calls(), 0);
    let fatal: Vec<_> = outcome.state.issues_of(IssueKind::Fatal).collect();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].message.starts_with("mapping failed"));
}

#[tokio::test]
async fn scan_errors_are_fatal() {
    let harness = Harness::network(ScriptedProposer::new(), ScriptedChecker::passing());
    let files = std::collections::BTreeMap::from([(
        "main.tf".to_string(),
        "resource \"azurerm_virtual_network\" \"vnet1\" {\n  name = \"vnet1\n".to_string(),
    )]);
    let outcome = harness.run(files).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(harness.knowledge.lookup_calls(), 0);
    assert!(outcome.report.contains("scanning failed: parse error in main.tf"));
}

#[tokio::test]
async fn cancellation_keeps_artifacts() {
    let harness = Harness::network(
        ScriptedProposer::new()
            .with_first_mapping(fixtures::confident_mapping())
            .with_plan_delay(Duration::from_millis(300)),
        ScriptedChecker::passing(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let outcome = harness
        .pipeline(harness.config())
        .run_with_cancel(fixtures::network_files(), cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(harness.checker.calls(), 0);
    assert!(outcome.report.contains("run cancelled"));
    let stages = stages(&outcome).await;
    assert!(stages.contains(&"01_scan.json".to_string()));
    assert!(stages.contains(&"11_report.md".to_string()));
    assert!(stages.contains(&"12_run_state.json".to_string()));
    assert!(!stages.contains(&"08_migrated".to_string()));
}

#[tokio::test]
async fn run_timeout_fails_the_run() {
    let harness = Harness::network(
        ScriptedProposer::new()
            .with_first_mapping(fixtures::confident_mapping())
            .with_plan_delay(Duration::from_millis(1_500)),
        ScriptedChecker::passing(),
    );
    let config = harness.config().with_run_timeout_secs(Some(1));
    let outcome = harness
        .pipeline(config)
        .run(fixtures::network_files())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.report.contains("run timed out after 1 s"));
}

#[tokio::test]
async fn runs_are_deterministic() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        ScriptedChecker::failing(dns_failure()),
    );
    let first = harness.run(fixtures::network_files_with_dns()).await;
    let second = harness.run(fixtures::network_files_with_dns()).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(plan_files(&first), plan_files(&second));
    let plans = plan_payloads(&first).await;
    assert!(!plans.is_empty());
    assert_eq!(plans, plan_payloads(&second).await);
    for file in ["main.tf", "outputs.tf"] {
        assert_eq!(migrated(&first, file), migrated(&second, file));
    }
    assert_eq!(first.state.issues, second.state.issues);
}

fn plan_files(outcome: &RunOutcome) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(outcome.run_dir.join("06_plans"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

async fn plan_payloads(outcome: &RunOutcome) -> Vec<ConversionPlan> {
    let run = RunArtifacts::from_dir(&outcome.run_dir).unwrap();
    let mut plans = Vec::new();
    for name in plan_files(outcome) {
        let stem = name.strip_suffix(".json").unwrap();
        let (sequence, slug) = stem.split_once('_').unwrap();
        let key = tf2avm_core::keys::plans()
            .unwrap()
            .child(sequence, slug, ArtifactKind::Json)
            .unwrap();
        plans.push(run.get_json::<ConversionPlan>(&key).await.unwrap().payload);
    }
    plans
}

#[tokio::test]
async fn stage_artifacts_reload_with_valid_hashes() {
    let harness = Harness::network(
        ScriptedProposer::new().with_first_mapping(fixtures::confident_mapping()),
        ScriptedChecker::passing(),
    );
    let outcome = harness.run(fixtures::network_files()).await;
    let run = RunArtifacts::from_dir(&outcome.run_dir).unwrap();

    let state: tf2avm_core::RunState = run
        .get_json(&tf2avm_core::keys::run_state().unwrap())
        .await
        .unwrap()
        .payload;
    assert_eq!(state.status, RunStatus::Succeeded);
    assert_eq!(state.stage_history.last().unwrap().artifact.stage, "11_report.md");

    let report = std::fs::read_to_string(Path::new(&outcome.run_dir).join("11_report.md")).unwrap();
    assert_eq!(report, outcome.report);
}
