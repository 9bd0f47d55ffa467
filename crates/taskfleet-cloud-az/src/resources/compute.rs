//! Image, managed identities and the worker scale set

use crate::api::{AzApi, ScaleSetSpec};
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

use super::network::Subnet;
use super::storage::{Credentials, ResourceGroup};

static IMAGE_URN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^@]+)@([^:]+:[^:]+:[^:]+:[^:]+)$").expect("image pattern is valid")
});

static IDENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^/subscriptions/[^/]+/resourcegroups/[^/]+/providers/microsoft\.managedidentity/userassignedidentities/[^/]+$",
    )
    .expect("identity pattern is valid")
});

/// Instance size for a generic size, other values pass through
pub fn vm_size(machine: &str) -> &str {
    match machine {
        "s" => "Standard_B1s",
        "m" => "Standard_F8s_v2",
        "l" => "Standard_F32s_v2",
        "xl" => "Standard_F64s_v2",
        "m+k80" => "Standard_NC6",
        "l+k80" => "Standard_NC12",
        "xl+k80" => "Standard_NC24",
        "m+v100" => "Standard_NC6s_v3",
        "l+v100" => "Standard_NC12s_v3",
        "xl+v100" => "Standard_NC24s_v3",
        other => other,
    }
}

fn image_alias(image: &str) -> &str {
    match image {
        "ubuntu" => "ubuntu@Canonical:0001-com-ubuntu-server-focal:20_04-lts:latest",
        "nvidia" => "ubuntu@microsoft-dsvm:ubuntu-2004:2004-gen2:latest",
        other => other,
    }
}

/// Marketplace image given as `user@publisher:offer:sku:version`
pub struct Image {
    reference: String,
    pub urn: Slot<String>,
    pub ssh_user: Slot<String>,
}

impl Image {
    pub fn new(reference: String) -> Self {
        Self {
            reference,
            urn: Slot::new("image"),
            ssh_user: Slot::new("image user"),
        }
    }
}

#[async_trait]
impl DataSource for Image {
    async fn read(&self) -> Result<()> {
        let reference = image_alias(&self.reference);
        let captures = IMAGE_URN.captures(reference).ok_or_else(|| {
            CloudError::Validation(format!(
                "invalid image {reference}: expected user@publisher:offer:sku:version"
            ))
        })?;
        self.ssh_user.set(captures[1].to_string());
        self.urn.set(captures[2].to_string());
        Ok(())
    }
}

/// Comma-separated user-assigned identity resource IDs
pub struct PermissionSet {
    reference: String,
    pub identities: Slot<Vec<String>>,
}

impl PermissionSet {
    pub fn new(reference: String) -> Self {
        Self {
            reference,
            identities: Slot::new("permission set"),
        }
    }
}

#[async_trait]
impl DataSource for PermissionSet {
    async fn read(&self) -> Result<()> {
        let identities: Vec<String> = self
            .reference
            .split(',')
            .map(str::trim)
            .filter(|identity| !identity.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(invalid) = identities.iter().find(|identity| !IDENTITY.is_match(identity)) {
            return Err(CloudError::Validation(format!(
                "invalid user-assigned identity: {invalid}"
            )));
        }
        self.identities.set(identities);
        Ok(())
    }
}

/// Scale set dependencies
pub struct ScaleSetInputs {
    pub group: Arc<ResourceGroup>,
    pub subnet: Arc<Subnet>,
    pub image: Arc<Image>,
    pub permission_set: Arc<PermissionSet>,
    pub keys: Arc<KeyMaterial>,
    pub credentials: Arc<Credentials>,
}

/// Observed state of the worker fleet
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    pub capacity: u16,
    pub status: Status,
    pub addresses: Vec<IpAddr>,
    pub events: Vec<Event>,
}

pub struct ScaleSet {
    client: Arc<dyn AzApi>,
    pub name: String,
    environment: Environment,
    size: Size,
    spot: Spot,
    tags: BTreeMap<String, String>,
    inputs: ScaleSetInputs,
    pub fleet: Slot<Fleet>,
}

impl ScaleSet {
    pub fn new(
        client: Arc<dyn AzApi>,
        name: String,
        environment: Environment,
        size: Size,
        spot: Spot,
        tags: BTreeMap<String, String>,
        inputs: ScaleSetInputs,
    ) -> Self {
        Self {
            client,
            name,
            environment,
            size,
            spot,
            tags,
            inputs,
            fleet: Slot::new("scale set"),
        }
    }

    fn spec(&self) -> Result<ScaleSetSpec> {
        let credentials = self.inputs.credentials.value.get()?;
        Ok(ScaleSetSpec {
            group: self.inputs.group.name.clone(),
            name: self.name.clone(),
            image: self.inputs.image.urn.get()?,
            size: vm_size(&self.size.machine).to_string(),
            disk_size: self.size.storage,
            subnet_id: self.inputs.subnet.id.get()?,
            admin_user: self.inputs.image.ssh_user.get()?,
            public_key: self.inputs.keys.value.get()?.public_key,
            custom_data: startup_script(&self.environment, &credentials.env),
            identities: self.inputs.permission_set.identities.get()?,
            spot: self.spot,
            tags: self.tags.clone(),
        })
    }

    /// Apply a target worker count
    pub async fn update(&self, capacity: u16) -> Result<()> {
        self.client
            .scale(&self.inputs.group.name, &self.name, capacity)
            .await
    }
}

#[async_trait]
impl Resource for ScaleSet {
    async fn create(&self) -> Result<()> {
        let spec = self.spec()?;
        match self.client.create_scale_set(&spec).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let group = &self.inputs.group.name;
        let scale_set = self.client.show_scale_set(group, &self.name).await?;
        let active = scale_set
            .instances
            .iter()
            .filter(|instance| instance.is_active())
            .count();
        self.fleet.set(Fleet {
            capacity: scale_set.capacity,
            status: Status::new().with(StatusCode::Active, active as u32),
            addresses: scale_set.addresses,
            events: self.client.activity(group).await?,
        });
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete_scale_set(&self.inputs.group.name, &self.name)
                .await,
        )?;
        self.fleet.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_sizes() {
        assert_eq!(vm_size("m"), "Standard_F8s_v2");
        assert_eq!(vm_size("xl+v100"), "Standard_NC24s_v3");
        assert_eq!(vm_size("Standard_D4s_v5"), "Standard_D4s_v5");
    }

    #[tokio::test]
    async fn test_image_aliases() {
        let image = Image::new("ubuntu".into());
        image.read().await.unwrap();
        assert_eq!(image.ssh_user.get().unwrap(), "ubuntu");
        assert_eq!(
            image.urn.get().unwrap(),
            "Canonical:0001-com-ubuntu-server-focal:20_04-lts:latest"
        );

        let invalid = Image::new("Canonical:UbuntuServer".into());
        assert!(invalid.read().await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_permission_sets() {
        let empty = PermissionSet::new(String::new());
        empty.read().await.unwrap();
        assert!(empty.identities.get().unwrap().is_empty());

        let first = "/subscriptions/0000/resourceGroups/ops/providers/Microsoft.ManagedIdentity/userAssignedIdentities/worker";
        let second = "/subscriptions/0000/resourcegroups/ops/providers/microsoft.managedidentity/userassignedidentities/reader";
        let pair = PermissionSet::new(format!("{first}, {second}"));
        pair.read().await.unwrap();
        assert_eq!(pair.identities.get().unwrap(), vec![first, second]);

        let invalid = PermissionSet::new("worker".into());
        assert!(invalid.read().await.unwrap_err().is_validation());
    }
}
