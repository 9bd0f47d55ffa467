//! Azure task: a virtual machine scale set inside a dedicated resource group

use crate::api::AzApi;
use crate::cli::AzCli;
use crate::resources::{
    BlobContainer, Credentials, Image, PermissionSet, ResourceGroup, ScaleSet, ScaleSetInputs,
    SecurityGroup, StorageAccount, Subnet, VirtualNetwork,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskfleet_cloud::{
    Cloud, DataSource, Event, Identifier, KeyMaterial, Resource, Result, SshKeyPair, Status, Step,
    Task, TaskAttributes, run_steps,
};

const STORAGE_ACCOUNT_MAX: usize = 24;

pub struct AzTask {
    cloud: Cloud,
    identifier: Identifier,
    attributes: TaskAttributes,

    image: Arc<Image>,
    permission_set: Arc<PermissionSet>,
    keys: Arc<KeyMaterial>,

    group: Arc<ResourceGroup>,
    account: Arc<StorageAccount>,
    container: Arc<BlobContainer>,
    credentials: Arc<Credentials>,
    network: Arc<VirtualNetwork>,
    security_group: Arc<SecurityGroup>,
    subnet: Arc<Subnet>,
    scale_set: Arc<ScaleSet>,
}

impl AzTask {
    /// Task driven through the `az` CLI
    pub fn new(cloud: Cloud, identifier: Identifier, attributes: TaskAttributes) -> Result<Self> {
        let client = Arc::new(AzCli::new(&cloud)?);
        Ok(Self::with_client(client, cloud, identifier, attributes))
    }

    pub fn with_client(
        client: Arc<dyn AzApi>,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Self {
        let name = identifier.long();
        let mut tags: BTreeMap<String, String> = cloud.tags.clone();
        tags.extend(attributes.tags.clone());
        tags.insert("taskfleet".to_string(), name.clone());

        let image = Arc::new(Image::new(attributes.environment.image.clone()));
        let permission_set = Arc::new(PermissionSet::new(attributes.permission_set.clone()));
        let keys = Arc::new(KeyMaterial::new(cloud.clone(), identifier.clone()));

        let group = Arc::new(ResourceGroup::new(client.clone(), name.clone(), tags.clone()));
        let account = Arc::new(StorageAccount::new(
            client.clone(),
            identifier.compact(STORAGE_ACCOUNT_MAX),
            group.clone(),
            tags.clone(),
        ));
        let container = Arc::new(BlobContainer::new(
            client.clone(),
            name.clone(),
            account.clone(),
        ));
        let credentials = Arc::new(Credentials::new(
            client.clone(),
            cloud.clone(),
            identifier.clone(),
            account.clone(),
            container.clone(),
        ));
        let network = Arc::new(VirtualNetwork::new(
            client.clone(),
            name.clone(),
            group.clone(),
            tags.clone(),
        ));
        let security_group = Arc::new(SecurityGroup::new(
            client.clone(),
            name.clone(),
            group.clone(),
            attributes.firewall.clone(),
            tags.clone(),
        ));
        let subnet = Arc::new(Subnet::new(
            client.clone(),
            name.clone(),
            group.clone(),
            network.clone(),
            security_group.clone(),
        ));
        let scale_set = Arc::new(ScaleSet::new(
            client,
            name,
            attributes.environment.clone(),
            attributes.size.clone(),
            attributes.spot,
            tags,
            ScaleSetInputs {
                group: group.clone(),
                subnet: subnet.clone(),
                image: image.clone(),
                permission_set: permission_set.clone(),
                keys: keys.clone(),
                credentials: credentials.clone(),
            },
        ));

        Self {
            cloud,
            identifier,
            attributes,
            image,
            permission_set,
            keys,
            group,
            account,
            container,
            credentials,
            network,
            security_group,
            subnet,
            scale_set,
        }
    }

    pub fn attributes(&self) -> &TaskAttributes {
        &self.attributes
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    fn data_dir(&self) -> Result<String> {
        Ok(taskfleet_storage::join(&self.credentials.remote()?, "data")?)
    }

    fn sync_observed(&mut self) {
        if let Some(fleet) = self.scale_set.fleet.try_get() {
            self.attributes.addresses = fleet.addresses;
            self.attributes.status = fleet.status;
            self.attributes.events = fleet.events;
        }
    }

    async fn purge_storage(&self) -> Result<()> {
        if self.credentials.value.try_get().is_none() {
            self.credentials.read().await?;
        }
        taskfleet_storage::delete(&self.credentials.remote()?).await?;
        Ok(())
    }
}

#[async_trait]
impl Task for AzTask {
    async fn create(&mut self) -> Result<()> {
        let directory = PathBuf::from(&self.attributes.environment.directory);
        let mut steps = vec![
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Reading SSH key", self.keys.read()),
            Step::new("Creating resource group", self.group.create()),
            Step::new("Creating storage account", self.account.create()),
            Step::new("Creating blob container", self.container.create()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Creating virtual network", self.network.create()),
            Step::new("Creating security group", self.security_group.create()),
            Step::new("Creating subnet", self.subnet.create()),
            Step::new("Creating scale set", self.scale_set.create()),
        ];
        if !self.attributes.environment.directory.is_empty() {
            steps.push(Step::new("Uploading directory", self.push(&directory)));
        }
        steps.push(Step::new(
            "Starting task",
            self.scale_set.update(self.attributes.parallelism),
        ));
        run_steps(steps).await?;

        self.read().await
    }

    async fn read(&mut self) -> Result<()> {
        run_steps(vec![
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Reading resource group", self.group.read()),
            Step::new("Reading storage account", self.account.read()),
            Step::new("Reading blob container", self.container.read()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Reading virtual network", self.network.read()),
            Step::new("Reading security group", self.security_group.read()),
            Step::new("Reading subnet", self.subnet.read()),
            Step::new("Reading scale set", self.scale_set.read()),
        ])
        .await?;
        self.sync_observed();
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        let readable = match self.read().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Task {} is not fully readable: {}", self.identifier, err);
                false
            }
        };

        let directory = PathBuf::from(&self.attributes.environment.directory);
        let mut steps = Vec::new();
        if readable
            && !self.attributes.environment.directory.is_empty()
            && !self.attributes.environment.directory_out.is_empty()
        {
            steps.push(Step::teardown("Downloading output directory", self.pull(&directory)));
        }
        steps.extend([
            Step::teardown("Emptying container", self.purge_storage()),
            Step::teardown("Deleting scale set", self.scale_set.delete()),
            Step::teardown("Deleting subnet", self.subnet.delete()),
            Step::teardown("Deleting security group", self.security_group.delete()),
            Step::teardown("Deleting virtual network", self.network.delete()),
            Step::teardown("Deleting blob container", self.container.delete()),
            Step::teardown("Deleting storage account", self.account.delete()),
            Step::teardown("Deleting resource group", self.group.delete()),
        ]);
        run_steps(steps).await?;

        self.attributes.addresses.clear();
        self.attributes.status = Status::new();
        Ok(())
    }

    async fn push(&self, source: &Path) -> Result<()> {
        let source = source.to_string_lossy();
        taskfleet_storage::transfer(&source, &self.data_dir()?, ".").await?;
        Ok(())
    }

    async fn pull(&self, destination: &Path) -> Result<()> {
        let include = match self.attributes.environment.directory_out.as_str() {
            "" => ".",
            out => out,
        };
        let destination = destination.to_string_lossy();
        taskfleet_storage::transfer(&self.data_dir()?, &destination, include).await?;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.scale_set.update(self.attributes.parallelism).await
    }

    async fn stop(&mut self) -> Result<()> {
        let saved = self.attributes.suspend_parallelism();
        let result = self.scale_set.update(self.attributes.parallelism).await;
        self.attributes.restore_parallelism(saved);
        result
    }

    async fn status(&mut self) -> Result<Status> {
        self.read().await?;
        let baseline = self.attributes.status.clone();
        Ok(taskfleet_storage::status(&self.credentials.remote()?, baseline).await?)
    }

    async fn logs(&mut self) -> Result<Vec<String>> {
        self.read().await?;
        Ok(taskfleet_storage::logs(&self.credentials.remote()?).await?)
    }

    fn addresses(&self) -> Vec<IpAddr> {
        self.attributes.addresses.clone()
    }

    fn events(&self) -> Vec<Event> {
        self.attributes.events.clone()
    }

    async fn key_pair(&self) -> Result<SshKeyPair> {
        self.scale_set.read().await?;
        self.keys.pair().await
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// Identifiers of every task with a resource group in this subscription
pub async fn list(client: &dyn AzApi) -> Result<Vec<Identifier>> {
    Ok(client
        .list_resource_groups()
        .await?
        .iter()
        .filter_map(|name| Identifier::parse(name).ok())
        .collect())
}

/// [`list`] through the `az` CLI
pub async fn list_tasks(cloud: &Cloud) -> Result<Vec<Identifier>> {
    list(&AzCli::new(cloud)?).await
}
