//! Google Cloud task: a managed instance group of identical workers backed by
//! Cloud Storage

use crate::api::{Direction, GcpApi};
use crate::cli::GcloudCli;
use crate::resources::{
    Bucket, Credentials, DefaultNetwork, Firewall, Image, InstanceGroup, InstanceTemplate,
    InstanceTemplateInputs, PermissionSet,
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

pub struct GcpTask {
    cloud: Cloud,
    identifier: Identifier,
    attributes: TaskAttributes,

    network: Arc<DefaultNetwork>,
    image: Arc<Image>,
    permission_set: Arc<PermissionSet>,
    keys: Arc<KeyMaterial>,
    credentials: Arc<Credentials>,

    bucket: Arc<Bucket>,
    ingress: Arc<Firewall>,
    egress: Arc<Firewall>,
    template: Arc<InstanceTemplate>,
    group: Arc<InstanceGroup>,
}

impl GcpTask {
    /// Task driven through the `gcloud` CLI
    pub fn new(cloud: Cloud, identifier: Identifier, attributes: TaskAttributes) -> Result<Self> {
        let client = Arc::new(GcloudCli::new(&cloud)?);
        Ok(Self::with_client(client, cloud, identifier, attributes))
    }

    pub fn with_client(
        client: Arc<dyn GcpApi>,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Self {
        let name = identifier.long();
        let mut labels: BTreeMap<String, String> = cloud.tags.clone();
        labels.extend(attributes.tags.clone());
        labels.insert("taskfleet".to_string(), name.clone());

        let network = Arc::new(DefaultNetwork::new(client.clone()));
        let image = Arc::new(Image::new(
            client.clone(),
            attributes.environment.image.clone(),
        ));
        let permission_set = Arc::new(PermissionSet::new(attributes.permission_set.clone()));
        let keys = Arc::new(KeyMaterial::new(cloud.clone(), identifier.clone()));

        let bucket = Arc::new(Bucket::new(client.clone(), name.clone()));
        let credentials = Arc::new(Credentials::new(
            client.clone(),
            cloud.clone(),
            identifier.clone(),
            bucket.clone(),
        ));
        let ingress = Arc::new(Firewall::new(
            client.clone(),
            &name,
            Direction::Ingress,
            attributes.firewall.ingress.clone(),
            network.clone(),
        ));
        let egress = Arc::new(Firewall::new(
            client.clone(),
            &name,
            Direction::Egress,
            attributes.firewall.egress.clone(),
            network.clone(),
        ));
        let template = Arc::new(InstanceTemplate::new(
            client.clone(),
            name.clone(),
            attributes.environment.clone(),
            attributes.size.clone(),
            attributes.spot,
            labels,
            InstanceTemplateInputs {
                network: network.clone(),
                image: image.clone(),
                permission_set: permission_set.clone(),
                keys: keys.clone(),
                credentials: credentials.clone(),
            },
        ));
        let group = Arc::new(InstanceGroup::new(client, name, template.clone()));

        Self {
            cloud,
            identifier,
            attributes,
            network,
            image,
            permission_set,
            keys,
            credentials,
            bucket,
            ingress,
            egress,
            template,
            group,
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
        if let Some(fleet) = self.group.fleet.try_get() {
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
impl Task for GcpTask {
    async fn create(&mut self) -> Result<()> {
        let directory = PathBuf::from(&self.attributes.environment.directory);
        let mut steps = vec![
            Step::new("Reading default network", self.network.read()),
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Reading SSH key", self.keys.read()),
            Step::new("Creating bucket", self.bucket.create()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Creating ingress firewall rule", self.ingress.create()),
            Step::new("Creating egress firewall rule", self.egress.create()),
            Step::new("Creating instance template", self.template.create()),
            Step::new("Creating instance group", self.group.create()),
        ];
        if !self.attributes.environment.directory.is_empty() {
            steps.push(Step::new("Uploading directory", self.push(&directory)));
        }
        steps.push(Step::new(
            "Starting task",
            self.group.update(self.attributes.parallelism),
        ));
        run_steps(steps).await?;

        self.read().await
    }

    async fn read(&mut self) -> Result<()> {
        run_steps(vec![
            Step::new("Reading default network", self.network.read()),
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Reading bucket", self.bucket.read()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Reading ingress firewall rule", self.ingress.read()),
            Step::new("Reading egress firewall rule", self.egress.read()),
            Step::new("Reading instance template", self.template.read()),
            Step::new("Reading instance group", self.group.read()),
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
            Step::teardown("Emptying bucket", self.purge_storage()),
            Step::teardown("Deleting instance group", self.group.delete()),
            Step::teardown("Deleting instance template", self.template.delete()),
            Step::teardown("Deleting egress firewall rule", self.egress.delete()),
            Step::teardown("Deleting ingress firewall rule", self.ingress.delete()),
            Step::teardown("Deleting bucket", self.bucket.delete()),
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
        self.group.update(self.attributes.parallelism).await
    }

    async fn stop(&mut self) -> Result<()> {
        let saved = self.attributes.suspend_parallelism();
        let result = self.group.update(self.attributes.parallelism).await;
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
        // Keys only exist for tasks whose template was created
        self.template.read().await?;
        self.keys.pair().await
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// Identifiers of every task with a bucket in this project
pub async fn list(client: &dyn GcpApi) -> Result<Vec<Identifier>> {
    Ok(client
        .list_buckets()
        .await?
        .iter()
        .filter_map(|name| Identifier::parse(name).ok())
        .collect())
}

/// [`list`] through the `gcloud` CLI
pub async fn list_tasks(cloud: &Cloud) -> Result<Vec<Identifier>> {
    list(&GcloudCli::new(cloud)?).await
}
