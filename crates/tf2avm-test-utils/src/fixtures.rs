//! Network fixtures
//!
//! A virtual network with one subnet, the modules that convert them, and a
//! storage account that no verified module manages.

use std::collections::{BTreeMap, BTreeSet};
use tf2avm_model::{KnowledgeEntry, KnowledgeIndex, MappingCandidate, MappingResult, ModuleDetail};

pub const VNET_ADDRESS: &str = "azurerm_virtual_network.vnet1";
pub const SUBNET_ADDRESS: &str = "azurerm_subnet.subnet1";
pub const STORAGE_ADDRESS: &str = "azurerm_storage_account.logs";
pub const NSG_ADDRESS: &str = "azurerm_network_security_group.nsg";

pub const VNET_MODULE: &str = "avm-res-network-virtualnetwork";
pub const SUBNET_MODULE: &str = "avm-res-network-virtualnetwork-subnet";
pub const MODULE_VERSION: &str = "0.7.1";

pub const VNET_BLOCK: &str = r#"# Core network
resource "azurerm_virtual_network" "vnet1" {
  name                = "vnet1"
  location            = "westeurope"
  resource_group_name = "rg-network"
  address_space       = ["10.0.0.0/16"]
}"#;

pub const VNET_WITH_DNS_BLOCK: &str = r#"# Core network
resource "azurerm_virtual_network" "vnet1" {
  name                = "vnet1"
  location            = "westeurope"
  resource_group_name = "rg-network"
  address_space       = ["10.0.0.0/16"]
  dns_servers         = ["10.0.0.4"]
}"#;

pub const SUBNET_BLOCK: &str = r#"resource "azurerm_subnet" "subnet1" {
  name                 = "subnet1"
  resource_group_name  = "rg-network"
  virtual_network_name = "vnet1"
  address_prefixes     = ["10.0.1.0/24"]
}"#;

pub const STORAGE_BLOCK: &str = r#"# Diagnostics sink, kept as is
resource "azurerm_storage_account" "logs" {
  name                     = "stlogs001"
  resource_group_name      = "rg-network"
  location                 = "westeurope"
  account_tier             = "Standard"
  account_replication_type = "LRS"
}"#;

/// Unmanaged, and pointing at the vnet by reference
pub const NSG_BLOCK: &str = r#"resource "azurerm_network_security_group" "nsg" {
  name                = "nsg-core"
  resource_group_name = "rg-network"
  location            = "westeurope"
  tags                = { vnet = azurerm_virtual_network.vnet1.name }
}"#;

pub const OUTPUTS_TF: &str = r#"output "vnet_id" {
  value = azurerm_virtual_network.vnet1.id
}
"#;

/// `main.tf` + `outputs.tf` with the vnet and subnet
#[must_use]
pub fn network_files() -> BTreeMap<String, String> {
    files(&[VNET_BLOCK, SUBNET_BLOCK])
}

/// Like [`network_files`], with `dns_servers` set on the vnet
#[must_use]
pub fn network_files_with_dns() -> BTreeMap<String, String> {
    files(&[VNET_WITH_DNS_BLOCK, SUBNET_BLOCK])
}

/// Network files plus an unmanaged storage account
#[must_use]
pub fn network_files_with_storage() -> BTreeMap<String, String> {
    files(&[VNET_BLOCK, SUBNET_BLOCK, STORAGE_BLOCK])
}

/// Network files plus an unmanaged security group that references the vnet
#[must_use]
pub fn network_files_with_nsg() -> BTreeMap<String, String> {
    files(&[VNET_BLOCK, SUBNET_BLOCK, NSG_BLOCK])
}

fn files(blocks: &[&str]) -> BTreeMap<String, String> {
    let mut main = blocks.join("\n\n");
    main.push('\n');
    BTreeMap::from([
        ("main.tf".to_string(), main),
        ("outputs.tf".to_string(), OUTPUTS_TF.to_string()),
    ])
}

fn entry(name: &str, resource_type: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        name: name.into(),
        version: MODULE_VERSION.into(),
        display_name: None,
        description: None,
        resource_types: vec![resource_type.into()],
    }
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Index knowing the vnet and subnet modules
#[must_use]
pub fn network_index() -> KnowledgeIndex {
    KnowledgeIndex {
        modules: vec![
            entry(VNET_MODULE, "azurerm_virtual_network"),
            entry(SUBNET_MODULE, "azurerm_subnet"),
        ],
    }
}

#[must_use]
pub fn vnet_detail() -> ModuleDetail {
    ModuleDetail {
        module_name: VNET_MODULE.into(),
        version: MODULE_VERSION.into(),
        source: None,
        required_inputs: names(&["location", "name", "resource_group_name"]),
        optional_inputs: names(&["address_space", "tags"]),
        outputs: names(&["name", "resource_id"]),
    }
}

#[must_use]
pub fn subnet_detail() -> ModuleDetail {
    ModuleDetail {
        module_name: SUBNET_MODULE.into(),
        version: MODULE_VERSION.into(),
        source: None,
        required_inputs: names(&["name", "resource_group_name", "virtual_network_name"]),
        optional_inputs: names(&["address_prefixes"]),
        outputs: names(&["name", "resource_id"]),
    }
}

#[must_use]
pub fn network_details() -> Vec<ModuleDetail> {
    vec![vnet_detail(), subnet_detail()]
}

/// Vnet at 0.95, subnet at 0.90
#[must_use]
pub fn confident_mapping() -> MappingResult {
    MappingResult::from_candidates(vec![
        MappingCandidate::mapped(VNET_ADDRESS, VNET_MODULE, MODULE_VERSION, 0.95),
        MappingCandidate::mapped(SUBNET_ADDRESS, SUBNET_MODULE, MODULE_VERSION, 0.90),
    ])
}

/// Vnet at 0.95, subnet below any sensible threshold
#[must_use]
pub fn hesitant_mapping() -> MappingResult {
    MappingResult::from_candidates(vec![
        MappingCandidate::mapped(VNET_ADDRESS, VNET_MODULE, MODULE_VERSION, 0.95),
        MappingCandidate::mapped(SUBNET_ADDRESS, SUBNET_MODULE, MODULE_VERSION, 0.40),
    ])
}
