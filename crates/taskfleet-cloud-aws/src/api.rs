//! AWS operations used by the task resources
//!
//! Every call reports a missing object as `CloudError::NotFound` and a
//! conflicting create as `CloudError::AlreadyExists`, whatever the backend.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use taskfleet_cloud::{Event, FirewallRule, Result, Spot, StorageCredentials};

/// Client for the EC2, S3 and Auto Scaling APIs
#[async_trait]
pub trait AwsApi: Send + Sync {
    /// Id of the region's default VPC
    async fn default_vpc(&self) -> Result<String>;

    /// Default subnets of `vpc_id` that assign public addresses
    async fn default_subnets(&self, vpc_id: &str) -> Result<Vec<String>>;

    /// Newest available image matching the filter
    async fn find_image(&self, owner: &str, architecture: &str, name: &str) -> Result<ImageInfo>;

    async fn create_bucket(&self, name: &str) -> Result<()>;
    async fn head_bucket(&self, name: &str) -> Result<()>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Connection string and worker credentials for `bucket`
    async fn storage_credentials(&self, bucket: &str) -> Result<StorageCredentials>;

    async fn create_security_group(&self, name: &str, vpc_id: &str, tags: &BTreeMap<String, String>) -> Result<String>;
    async fn find_security_group(&self, name: &str, vpc_id: &str) -> Result<String>;
    async fn authorize(&self, group_id: &str, direction: Direction, rule: &FirewallRule) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    async fn import_key_pair(&self, name: &str, public_key: &str) -> Result<()>;
    async fn describe_key_pair(&self, name: &str) -> Result<String>;
    async fn delete_key_pair(&self, name: &str) -> Result<()>;

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> Result<String>;
    async fn describe_launch_template(&self, name: &str) -> Result<String>;
    async fn delete_launch_template(&self, name: &str) -> Result<()>;

    async fn create_auto_scaling_group(&self, spec: &GroupSpec) -> Result<()>;
    async fn describe_auto_scaling_group(&self, name: &str) -> Result<GroupInfo>;
    async fn set_desired_capacity(&self, name: &str, desired: u16) -> Result<()>;
    /// Force-delete the group and wait until it is gone
    async fn delete_auto_scaling_group(&self, name: &str) -> Result<()>;
    async fn scaling_activities(&self, name: &str) -> Result<Vec<Event>>;

    /// Public addresses of running instances
    async fn instance_addresses(&self, instance_ids: &[String]) -> Result<Vec<IpAddr>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub root_device: String,
}

#[derive(Debug, Clone)]
pub struct LaunchTemplateSpec {
    pub name: String,
    pub image_id: String,
    pub root_device: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    /// Plain startup script, encoded by the client
    pub user_data: String,
    pub disk_size: u32,
    pub instance_profile: Option<String>,
    pub spot: Spot,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub launch_template: String,
    pub subnets: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub desired_capacity: u16,
    pub instances: Vec<GroupInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInstance {
    pub id: String,
    pub lifecycle_state: String,
    pub health_status: String,
}

impl GroupInstance {
    pub fn is_active(&self) -> bool {
        self.health_status == "Healthy"
            && matches!(self.lifecycle_state.as_str(), "Pending" | "InService")
    }
}
