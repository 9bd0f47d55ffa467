//! Compute Engine and Cloud Storage operations used by the task resources
//!
//! Missing objects surface as `CloudError::NotFound` and conflicting creates
//! as `CloudError::AlreadyExists`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use taskfleet_cloud::{Event, FirewallRule, Result, Spot, StorageCredentials};

#[async_trait]
pub trait GcpApi: Send + Sync {
    /// Self link of the project's `default` network
    async fn default_network(&self) -> Result<String>;

    /// Self link of the newest image in `family`
    async fn find_image(&self, project: &str, family: &str) -> Result<String>;

    async fn create_bucket(&self, name: &str) -> Result<()>;
    async fn describe_bucket(&self, name: &str) -> Result<()>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Connection string and worker credentials for `bucket`
    async fn storage_credentials(&self, bucket: &str) -> Result<StorageCredentials>;

    async fn create_firewall(&self, spec: &FirewallSpec) -> Result<()>;
    async fn describe_firewall(&self, name: &str) -> Result<()>;
    async fn delete_firewall(&self, name: &str) -> Result<()>;

    async fn create_instance_template(&self, spec: &InstanceTemplateSpec) -> Result<()>;
    async fn describe_instance_template(&self, name: &str) -> Result<String>;
    async fn delete_instance_template(&self, name: &str) -> Result<()>;

    /// Managed instance group of size zero
    async fn create_instance_group(&self, name: &str, template: &str) -> Result<()>;
    async fn describe_instance_group(&self, name: &str) -> Result<GroupInfo>;
    async fn resize_instance_group(&self, name: &str, size: u16) -> Result<()>;
    async fn delete_instance_group(&self, name: &str) -> Result<()>;
    async fn instance_group_errors(&self, name: &str) -> Result<Vec<Event>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ingress => "INGRESS",
            Direction::Egress => "EGRESS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FirewallSpec {
    pub name: String,
    pub network: String,
    pub direction: Direction,
    pub rule: FirewallRule,
    /// Network tag of the instances the rule applies to
    pub target_tag: String,
}

/// Service account attached to every worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub email: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accelerator {
    pub kind: String,
    pub count: u16,
}

#[derive(Debug, Clone)]
pub struct InstanceTemplateSpec {
    pub name: String,
    pub machine_type: String,
    pub accelerator: Option<Accelerator>,
    pub image: String,
    pub disk_size: u32,
    pub network: String,
    pub network_tag: String,
    pub service_account: Option<ServiceAccount>,
    pub spot: Spot,
    pub startup_script: String,
    /// `user:public-key` line for the `ssh-keys` metadata entry
    pub ssh_keys: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub target_size: u16,
    pub instances: Vec<GroupInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInstance {
    pub name: String,
    pub status: String,
    pub address: Option<IpAddr>,
}

impl GroupInstance {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "PROVISIONING" | "STAGING" | "RUNNING")
    }
}
