//! Image, service account, instance template and managed group

use crate::api::{Accelerator, GcpApi, InstanceTemplateSpec, ServiceAccount};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use taskfleet_cloud::machine::startup_script;
use taskfleet_cloud::{
    CloudError, DataSource, Environment, Event, KeyMaterial, Resource, Result, Size, Slot, Spot,
    Status, StatusCode, ignore_not_found,
};

use super::network::DefaultNetwork;
use super::storage::Credentials;

static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^@]+)@([^/]+)/([^/]+)$").expect("image pattern is valid")
});

static MACHINE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^+]+)(?:\+([^*]+)\*([1-9]\d*))?$").expect("machine type pattern is valid")
});

static SERVICE_ACCOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\s,@]+@[^\s,@]+)(?:,scopes=(\S+))?$").expect("service account pattern is valid")
});

const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

fn machine_alias(machine: &str) -> &str {
    match machine {
        "s" => "g1-small",
        "m" => "e2-custom-8-32768",
        "l" => "e2-custom-32-131072",
        "xl" => "n2-custom-64-262144",
        "m+k80" => "custom-8-53248+nvidia-tesla-k80*1",
        "l+k80" => "custom-32-131072+nvidia-tesla-k80*4",
        "xl+k80" => "custom-64-212992-ext+nvidia-tesla-k80*8",
        "m+v100" => "custom-8-65536-ext+nvidia-tesla-v100*1",
        "l+v100" => "custom-32-262144-ext+nvidia-tesla-v100*4",
        "xl+v100" => "custom-64-524288-ext+nvidia-tesla-v100*8",
        other => other,
    }
}

/// Machine type and optional accelerator for a generic size or a
/// `type[+accelerator*count]` string
pub fn machine_type(machine: &str) -> Result<(String, Option<Accelerator>)> {
    let machine = machine_alias(machine);
    let captures = MACHINE_TYPE
        .captures(machine)
        .ok_or_else(|| CloudError::Validation(format!("invalid machine type: {machine}")))?;
    let accelerator = match (captures.get(2), captures.get(3)) {
        (Some(kind), Some(count)) => Some(Accelerator {
            kind: kind.as_str().to_string(),
            count: count
                .as_str()
                .parse()
                .map_err(|_| CloudError::Validation(format!("invalid accelerator count: {machine}")))?,
        }),
        _ => None,
    };
    Ok((captures[1].to_string(), accelerator))
}

fn image_alias(image: &str) -> &str {
    match image {
        "ubuntu" => "ubuntu@ubuntu-os-cloud/ubuntu-2004-lts",
        "nvidia" => "ubuntu@deeplearning-platform-release/common-cu113-ubuntu-2004",
        other => other,
    }
}

/// Boot image given as `user@project/family`
pub struct Image {
    client: Arc<dyn GcpApi>,
    reference: String,
    pub link: Slot<String>,
    pub ssh_user: Slot<String>,
}

impl Image {
    pub fn new(client: Arc<dyn GcpApi>, reference: String) -> Self {
        Self {
            client,
            reference,
            link: Slot::new("image"),
            ssh_user: Slot::new("image user"),
        }
    }
}

#[async_trait]
impl DataSource for Image {
    async fn read(&self) -> Result<()> {
        let reference = image_alias(&self.reference);
        let captures = IMAGE_REFERENCE.captures(reference).ok_or_else(|| {
            CloudError::Validation(format!("invalid image {reference}: expected user@project/family"))
        })?;
        let link = self.client.find_image(&captures[2], &captures[3]).await?;
        self.ssh_user.set(captures[1].to_string());
        self.link.set(link);
        Ok(())
    }
}

/// Service account email, optionally followed by `,scopes=a,b`
pub struct PermissionSet {
    reference: String,
    pub account: Slot<Option<ServiceAccount>>,
}

impl PermissionSet {
    pub fn new(reference: String) -> Self {
        Self {
            reference,
            account: Slot::new("permission set"),
        }
    }
}

#[async_trait]
impl DataSource for PermissionSet {
    async fn read(&self) -> Result<()> {
        if self.reference.is_empty() {
            self.account.set(None);
            return Ok(());
        }
        let captures = SERVICE_ACCOUNT.captures(&self.reference).ok_or_else(|| {
            CloudError::Validation(format!("invalid service account: {}", self.reference))
        })?;
        let scopes = match captures.get(2) {
            Some(scopes) => scopes
                .as_str()
                .split(',')
                .filter(|scope| !scope.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![DEFAULT_SCOPE.to_string()],
        };
        self.account.set(Some(ServiceAccount {
            email: captures[1].to_string(),
            scopes,
        }));
        Ok(())
    }
}

/// Instance template dependencies
pub struct InstanceTemplateInputs {
    pub network: Arc<DefaultNetwork>,
    pub image: Arc<Image>,
    pub permission_set: Arc<PermissionSet>,
    pub keys: Arc<KeyMaterial>,
    pub credentials: Arc<Credentials>,
}

pub struct InstanceTemplate {
    client: Arc<dyn GcpApi>,
    pub name: String,
    environment: Environment,
    size: Size,
    spot: Spot,
    labels: BTreeMap<String, String>,
    inputs: InstanceTemplateInputs,
    pub link: Slot<String>,
}

impl InstanceTemplate {
    pub fn new(
        client: Arc<dyn GcpApi>,
        name: String,
        environment: Environment,
        size: Size,
        spot: Spot,
        labels: BTreeMap<String, String>,
        inputs: InstanceTemplateInputs,
    ) -> Self {
        Self {
            client,
            name,
            environment,
            size,
            spot,
            labels,
            inputs,
            link: Slot::new("instance template"),
        }
    }

    fn spec(&self) -> Result<InstanceTemplateSpec> {
        if self.spot.max_price().is_some() {
            return Err(CloudError::Unsupported(
                "Google Cloud spot instances have no maximum price; use 0 for the market price"
                    .to_string(),
            ));
        }
        let (machine_type, accelerator) = machine_type(&self.size.machine)?;
        let credentials = self.inputs.credentials.value.get()?;
        let keys = self.inputs.keys.value.get()?;
        Ok(InstanceTemplateSpec {
            name: self.name.clone(),
            machine_type,
            accelerator,
            image: self.inputs.image.link.get()?,
            disk_size: self.size.storage,
            network: self.inputs.network.link.get()?,
            network_tag: self.name.clone(),
            service_account: self.inputs.permission_set.account.get()?,
            spot: self.spot,
            startup_script: startup_script(&self.environment, &credentials.env),
            ssh_keys: format!("{}:{}", self.inputs.image.ssh_user.get()?, keys.public_key),
            labels: self.labels.clone(),
        })
    }
}

#[async_trait]
impl Resource for InstanceTemplate {
    async fn create(&self) -> Result<()> {
        let spec = self.spec()?;
        match self.client.create_instance_template(&spec).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        self.link
            .set(self.client.describe_instance_template(&self.name).await?);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_instance_template(&self.name).await)?;
        self.link.clear();
        Ok(())
    }
}

/// Observed state of the worker fleet
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    pub target_size: u16,
    pub status: Status,
    pub addresses: Vec<IpAddr>,
    pub events: Vec<Event>,
}

pub struct InstanceGroup {
    client: Arc<dyn GcpApi>,
    pub name: String,
    template: Arc<InstanceTemplate>,
    pub fleet: Slot<Fleet>,
}

impl InstanceGroup {
    pub fn new(client: Arc<dyn GcpApi>, name: String, template: Arc<InstanceTemplate>) -> Self {
        Self {
            client,
            name,
            template,
            fleet: Slot::new("instance group"),
        }
    }

    /// Apply a target worker count
    pub async fn update(&self, size: u16) -> Result<()> {
        self.client.resize_instance_group(&self.name, size).await
    }
}

#[async_trait]
impl Resource for InstanceGroup {
    async fn create(&self) -> Result<()> {
        let template = self.template.link.get()?;
        match self.client.create_instance_group(&self.name, &template).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let group = self.client.describe_instance_group(&self.name).await?;
        let active: Vec<_> = group
            .instances
            .iter()
            .filter(|instance| instance.is_active())
            .collect();
        let fleet = Fleet {
            target_size: group.target_size,
            status: Status::new().with(StatusCode::Active, active.len() as u32),
            addresses: active.iter().filter_map(|instance| instance.address).collect(),
            events: self.client.instance_group_errors(&self.name).await?,
        };
        self.fleet.set(fleet);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_instance_group(&self.name).await)?;
        self.fleet.clear();
        Ok(())
    }
}
