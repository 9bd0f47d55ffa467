//! Image, identity, key pair, launch template and auto scaling group

use crate::api::{AwsApi, GroupSpec, ImageInfo, LaunchTemplateSpec};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use taskfleet_cloud::machine::startup_script;
use taskfleet_cloud::{
    Cloud, CloudError, DataSource, Environment, Event, Identifier, Resource, Result, Size, Slot, Spot,
    SshKeyPair, Status, StatusCode, ignore_not_found,
};

use super::network::{DefaultSubnets, SecurityGroup};
use super::storage::Credentials;

static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^@]+)@([^:]+):([^:]+):(.+)$").expect("image pattern is valid")
});

static INSTANCE_PROFILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws:iam::\d*:instance-profile/\S+$").expect("instance profile pattern is valid")
});

/// Instance type for a generic machine size; unknown sizes pass through
pub fn instance_type(machine: &str) -> &str {
    match machine {
        "s" => "t2.micro",
        "m" => "m5.2xlarge",
        "l" => "m5.8xlarge",
        "xl" => "m5.16xlarge",
        "m+k80" => "p2.xlarge",
        "l+k80" => "p2.8xlarge",
        "xl+k80" => "p2.16xlarge",
        "m+v100" => "p3.2xlarge",
        "l+v100" => "p3.8xlarge",
        "xl+v100" => "p3.16xlarge",
        other => other,
    }
}

fn image_alias(image: &str) -> &str {
    match image {
        "ubuntu" => "ubuntu@099720109477:x86_64:*ubuntu/images/hvm-ssd/ubuntu-focal-20.04-amd64-server-*",
        "nvidia" => "ubuntu@898082745236:x86_64:Deep Learning AMI GPU CUDA 11.2.1 (Ubuntu 20.04)*",
        other => other,
    }
}

/// Machine image given as `user@owner:architecture:name-pattern`
pub struct Image {
    client: Arc<dyn AwsApi>,
    reference: String,
    pub info: Slot<ImageInfo>,
    pub ssh_user: Slot<String>,
}

impl Image {
    pub fn new(client: Arc<dyn AwsApi>, reference: String) -> Self {
        Self {
            client,
            reference,
            info: Slot::new("image"),
            ssh_user: Slot::new("image user"),
        }
    }
}

#[async_trait]
impl DataSource for Image {
    async fn read(&self) -> Result<()> {
        let reference = image_alias(&self.reference);
        let captures = IMAGE_REFERENCE.captures(reference).ok_or_else(|| {
            CloudError::Validation(format!(
                "invalid image {reference}: expected user@owner:architecture:name"
            ))
        })?;
        let info = self
            .client
            .find_image(&captures[2], &captures[3], &captures[4])
            .await?;
        self.ssh_user.set(captures[1].to_string());
        self.info.set(info);
        Ok(())
    }
}

/// Instance profile ARN, or nothing
pub struct PermissionSet {
    reference: String,
    pub profile: Slot<Option<String>>,
}

impl PermissionSet {
    pub fn new(reference: String) -> Self {
        Self {
            reference,
            profile: Slot::new("permission set"),
        }
    }
}

#[async_trait]
impl DataSource for PermissionSet {
    async fn read(&self) -> Result<()> {
        if self.reference.is_empty() {
            self.profile.set(None);
            return Ok(());
        }
        if !INSTANCE_PROFILE.is_match(&self.reference) {
            return Err(CloudError::Validation(format!(
                "invalid IAM instance profile: {}",
                self.reference
            )));
        }
        self.profile.set(Some(self.reference.clone()));
        Ok(())
    }
}

/// Imported public half of the task's derived key pair
pub struct KeyPair {
    client: Arc<dyn AwsApi>,
    cloud: Cloud,
    identifier: Identifier,
    pub id: Slot<String>,
}

impl KeyPair {
    pub fn new(client: Arc<dyn AwsApi>, cloud: Cloud, identifier: Identifier) -> Self {
        Self {
            client,
            cloud,
            identifier,
            id: Slot::new("key pair"),
        }
    }

    pub fn name(&self) -> String {
        self.identifier.long()
    }

    pub fn material(&self) -> Result<SshKeyPair> {
        SshKeyPair::for_task(&self.cloud, &self.identifier)
    }
}

#[async_trait]
impl Resource for KeyPair {
    async fn create(&self) -> Result<()> {
        let keys = self.material()?;
        match self.client.import_key_pair(&self.name(), &keys.public_key).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        self.id.set(self.client.describe_key_pair(&self.name()).await?);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_key_pair(&self.name()).await)?;
        self.id.clear();
        Ok(())
    }
}

/// Launch template dependencies
pub struct LaunchTemplateInputs {
    pub image: Arc<Image>,
    pub permission_set: Arc<PermissionSet>,
    pub security_group: Arc<SecurityGroup>,
    pub key_pair: Arc<KeyPair>,
    pub credentials: Arc<Credentials>,
}

pub struct LaunchTemplate {
    client: Arc<dyn AwsApi>,
    pub name: String,
    environment: Environment,
    size: Size,
    spot: Spot,
    tags: BTreeMap<String, String>,
    inputs: LaunchTemplateInputs,
    pub id: Slot<String>,
}

impl LaunchTemplate {
    pub fn new(
        client: Arc<dyn AwsApi>,
        name: String,
        environment: Environment,
        size: Size,
        spot: Spot,
        tags: BTreeMap<String, String>,
        inputs: LaunchTemplateInputs,
    ) -> Self {
        Self {
            client,
            name,
            environment,
            size,
            spot,
            tags,
            inputs,
            id: Slot::new("launch template"),
        }
    }

    fn spec(&self) -> Result<LaunchTemplateSpec> {
        let image = self.inputs.image.info.get()?;
        let credentials = self.inputs.credentials.value.get()?;
        Ok(LaunchTemplateSpec {
            name: self.name.clone(),
            image_id: image.id,
            root_device: image.root_device,
            instance_type: instance_type(&self.size.machine).to_string(),
            key_name: self.inputs.key_pair.name(),
            security_group_id: self.inputs.security_group.id.get()?,
            user_data: startup_script(&self.environment, &credentials.env),
            disk_size: self.size.storage,
            instance_profile: self.inputs.permission_set.profile.get()?,
            spot: self.spot,
            tags: self.tags.clone(),
        })
    }
}

#[async_trait]
impl Resource for LaunchTemplate {
    async fn create(&self) -> Result<()> {
        let spec = self.spec()?;
        let id = match self.client.create_launch_template(&spec).await {
            Ok(id) => id,
            Err(err) if err.is_already_exists() => {
                self.client.describe_launch_template(&self.name).await?
            }
            Err(err) => return Err(err),
        };
        self.id.set(id);
        Ok(())
    }

    async fn read(&self) -> Result<()> {
        self.id
            .set(self.client.describe_launch_template(&self.name).await?);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_launch_template(&self.name).await)?;
        self.id.clear();
        Ok(())
    }
}

/// Observed state of the worker fleet
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    pub desired: u16,
    pub status: Status,
    pub addresses: Vec<IpAddr>,
    pub events: Vec<Event>,
}

pub struct AutoScalingGroup {
    client: Arc<dyn AwsApi>,
    pub name: String,
    tags: BTreeMap<String, String>,
    subnets: Arc<DefaultSubnets>,
    launch_template: Arc<LaunchTemplate>,
    pub fleet: Slot<Fleet>,
}

impl AutoScalingGroup {
    pub fn new(
        client: Arc<dyn AwsApi>,
        name: String,
        tags: BTreeMap<String, String>,
        subnets: Arc<DefaultSubnets>,
        launch_template: Arc<LaunchTemplate>,
    ) -> Self {
        Self {
            client,
            name,
            tags,
            subnets,
            launch_template,
            fleet: Slot::new("auto scaling group"),
        }
    }

    /// Apply a desired worker count
    pub async fn update(&self, desired: u16) -> Result<()> {
        self.client.set_desired_capacity(&self.name, desired).await
    }
}

#[async_trait]
impl Resource for AutoScalingGroup {
    async fn create(&self) -> Result<()> {
        // Fail before creating anything if the template was never resolved
        self.launch_template.id.get()?;
        let spec = GroupSpec {
            name: self.name.clone(),
            launch_template: self.launch_template.name.clone(),
            subnets: self.subnets.ids.get()?,
            tags: self.tags.clone(),
        };
        match self.client.create_auto_scaling_group(&spec).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let group = self.client.describe_auto_scaling_group(&self.name).await?;
        let active: Vec<String> = group
            .instances
            .iter()
            .filter(|instance| instance.is_active())
            .map(|instance| instance.id.clone())
            .collect();

        let status = Status::new().with(StatusCode::Active, active.len() as u32);
        let addresses = self.client.instance_addresses(&active).await?;
        let events = self.client.scaling_activities(&self.name).await?;
        self.fleet.set(Fleet {
            desired: group.desired_capacity,
            status,
            addresses,
            events,
        });
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_auto_scaling_group(&self.name).await)?;
        self.fleet.clear();
        Ok(())
    }
}
