//! Scanner, file knowledge and rule-based proposer working together

use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tf2avm_gateway::{
    write_detail_file, CachedKnowledgeSource, FileKnowledgeSource, HclScanner, KnowledgeSource,
    ManifestScanner, ProposalEngine, RuleBasedProposer,
};
use tf2avm_model::{
    AttributeTarget, KnowledgeEntry, KnowledgeIndex, MappingStatus, ModuleDetail, PlanRequest,
};

const MAIN_TF: &str = r#"provider "azurerm" {
  features {}
}

# Hub network
resource "azurerm_virtual_network" "hub" {
  name                = "vnet-hub"
  location            = "westeurope"
  resource_group_name = "rg-hub"
  address_space       = ["10.0.0.0/16"]
}

output "hub_id" {
  value = azurerm_virtual_network.hub.id
}
"#;

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn knowledge_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let index = KnowledgeIndex {
        modules: vec![KnowledgeEntry {
            name: "avm-res-network-virtualnetwork".into(),
            version: "0.7.1".into(),
            display_name: Some("Virtual Network".into()),
            description: None,
            resource_types: vec!["azurerm_virtual_network".into()],
        }],
    };
    tokio::fs::write(dir.path().join("index.json"), serde_json::to_vec_pretty(&index).unwrap())
        .await
        .unwrap();
    let detail = ModuleDetail {
        module_name: "avm-res-network-virtualnetwork".into(),
        version: "0.7.1".into(),
        source: None,
        required_inputs: names(&["location", "name", "resource_group_name"]),
        optional_inputs: names(&["address_space"]),
        outputs: names(&["resource_id"]),
    };
    write_detail_file(dir.path(), &detail).await.unwrap();
    dir
}

#[tokio::test]
async fn scan_map_and_plan_without_a_backend() {
    let dir = knowledge_dir().await;
    let files = BTreeMap::from([("main.tf".to_string(), MAIN_TF.to_string())]);
    let manifest = HclScanner::new().scan(&files).await.unwrap();
    assert_eq!(manifest.resources.len(), 1);
    assert!(manifest.providers.contains("azurerm"));

    let source: Arc<dyn KnowledgeSource> =
        Arc::new(FileKnowledgeSource::new(dir.path().join("index.json"), dir.path()));
    let knowledge = CachedKnowledgeSource::new(source, 16, Duration::from_secs(60));
    let index = knowledge
        .lookup_knowledge(&manifest.resource_types("azurerm"), true)
        .await
        .unwrap();

    let proposer = RuleBasedProposer::default();
    let mapping = proposer
        .propose_mapping(&manifest, &index, None, None)
        .await
        .unwrap();
    let candidate = mapping.candidate("azurerm_virtual_network.hub").unwrap().clone();
    assert_eq!(candidate.status, MappingStatus::Mapped);

    let detail = knowledge
        .fetch_module_detail("avm-res-network-virtualnetwork", "0.7.1")
        .await
        .unwrap();
    let resource = manifest.resource("azurerm_virtual_network.hub").unwrap();
    let request = PlanRequest {
        detail,
        candidate,
        original_text: resource.span.text.clone(),
        attributes: resource
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        referencing_outputs: manifest.outputs_referencing(&resource.address),
        module_label: "hub".into(),
    };
    let plan = proposer.propose_plan(&request).await.unwrap();

    assert!(plan.is_usable());
    assert!(plan.unresolved_items.is_empty());
    assert!(plan
        .attribute_map
        .iter()
        .all(|m| matches!(m.target, AttributeTarget::Input { .. })));
    assert_eq!(plan.output_rewrites.len(), 1);
    assert_eq!(plan.output_rewrites[0].new_expression, "module.hub.resource_id");
}
