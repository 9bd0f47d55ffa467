//! Azure Resource Manager and Blob Storage operations used by the task
//! resources
//!
//! Every resource except the group itself is addressed through the task's
//! resource group. Missing objects surface as `CloudError::NotFound`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use taskfleet_cloud::{Event, FirewallRule, Result, Spot, StorageCredentials};

#[async_trait]
pub trait AzApi: Send + Sync {
    /// Native location of the client
    fn location(&self) -> &str;

    async fn create_resource_group(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    async fn show_resource_group(&self, name: &str) -> Result<()>;
    async fn delete_resource_group(&self, name: &str) -> Result<()>;
    async fn list_resource_groups(&self) -> Result<Vec<String>>;

    async fn create_storage_account(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    /// Primary access key of the account
    async fn storage_account_key(&self, group: &str, name: &str) -> Result<String>;
    async fn delete_storage_account(&self, group: &str, name: &str) -> Result<()>;

    async fn create_container(&self, account: &str, key: &str, name: &str) -> Result<()>;
    async fn show_container(&self, account: &str, key: &str, name: &str) -> Result<()>;
    async fn delete_container(&self, account: &str, key: &str, name: &str) -> Result<()>;
    /// Remote URI and worker environment for one container
    async fn storage_credentials(&self, account: &str, key: &str, container: &str) -> Result<StorageCredentials>;

    async fn create_virtual_network(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    async fn show_virtual_network(&self, group: &str, name: &str) -> Result<()>;
    async fn delete_virtual_network(&self, group: &str, name: &str) -> Result<()>;

    async fn create_security_group(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    async fn create_security_rule(&self, group: &str, security_group: &str, rule: &SecurityRule) -> Result<()>;
    async fn show_security_group(&self, group: &str, name: &str) -> Result<String>;
    async fn delete_security_group(&self, group: &str, name: &str) -> Result<()>;

    async fn create_subnet(&self, group: &str, network: &str, name: &str, security_group: &str) -> Result<()>;
    /// Resource id of the subnet
    async fn show_subnet(&self, group: &str, network: &str, name: &str) -> Result<String>;
    async fn delete_subnet(&self, group: &str, network: &str, name: &str) -> Result<()>;

    /// Scale set with zero instances
    async fn create_scale_set(&self, spec: &ScaleSetSpec) -> Result<()>;
    async fn show_scale_set(&self, group: &str, name: &str) -> Result<ScaleSetInfo>;
    async fn scale(&self, group: &str, name: &str, capacity: u16) -> Result<()>;
    async fn delete_scale_set(&self, group: &str, name: &str) -> Result<()>;
    async fn activity(&self, group: &str) -> Result<Vec<Event>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One network security group rule
#[derive(Debug, Clone)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u16,
    pub direction: Direction,
    /// `true` allows matching traffic, `false` denies it
    pub allow: bool,
    pub rule: FirewallRule,
}

#[derive(Debug, Clone)]
pub struct ScaleSetSpec {
    pub group: String,
    pub name: String,
    pub image: String,
    pub size: String,
    pub disk_size: u32,
    pub subnet_id: String,
    pub admin_user: String,
    pub public_key: String,
    /// Plain startup script, passed as custom data
    pub custom_data: String,
    pub identities: Vec<String>,
    pub spot: Spot,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleSetInfo {
    pub capacity: u16,
    pub instances: Vec<ScaleSetInstance>,
    pub addresses: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSetInstance {
    pub name: String,
    pub provisioning_state: String,
}

impl ScaleSetInstance {
    pub fn is_active(&self) -> bool {
        matches!(
            self.provisioning_state.as_str(),
            "Creating" | "Updating" | "Succeeded"
        )
    }
}
