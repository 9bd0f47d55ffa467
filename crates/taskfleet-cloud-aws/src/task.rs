//! AWS task: an auto scaling group of identical EC2 workers backed by S3

use crate::api::AwsApi;
use crate::resources::{
    AutoScalingGroup, Bucket, Credentials, DefaultSubnets, DefaultVpc, Image, KeyPair,
    LaunchTemplate, LaunchTemplateInputs, PermissionSet, SecurityGroup,
};
use crate::sdk::AwsSdk;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskfleet_cloud::{
    Cloud, DataSource, Event, Identifier, Resource, Result, SshKeyPair, Status, Step, Task,
    TaskAttributes, run_steps,
};

pub struct AwsTask {
    cloud: Cloud,
    identifier: Identifier,
    attributes: TaskAttributes,

    vpc: Arc<DefaultVpc>,
    subnets: Arc<DefaultSubnets>,
    image: Arc<Image>,
    permission_set: Arc<PermissionSet>,
    credentials: Arc<Credentials>,

    bucket: Arc<Bucket>,
    security_group: Arc<SecurityGroup>,
    key_pair: Arc<KeyPair>,
    launch_template: Arc<LaunchTemplate>,
    group: Arc<AutoScalingGroup>,
}

impl AwsTask {
    /// Task driven through the AWS SDK
    pub fn new(cloud: Cloud, identifier: Identifier, attributes: TaskAttributes) -> Result<Self> {
        let client = Arc::new(AwsSdk::new(&cloud));
        Ok(Self::with_client(client, cloud, identifier, attributes))
    }

    pub fn with_client(
        client: Arc<dyn AwsApi>,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Self {
        let name = identifier.long();
        let mut tags: BTreeMap<String, String> = cloud.tags.clone();
        tags.extend(attributes.tags.clone());
        tags.insert("taskfleet".to_string(), name.clone());

        let vpc = Arc::new(DefaultVpc::new(client.clone()));
        let subnets = Arc::new(DefaultSubnets::new(client.clone(), vpc.clone()));
        let image = Arc::new(Image::new(
            client.clone(),
            attributes.environment.image.clone(),
        ));
        let permission_set = Arc::new(PermissionSet::new(attributes.permission_set.clone()));

        let bucket = Arc::new(Bucket::new(client.clone(), name.clone()));
        let credentials = Arc::new(Credentials::new(
            client.clone(),
            cloud.clone(),
            identifier.clone(),
            bucket.clone(),
        ));
        let security_group = Arc::new(SecurityGroup::new(
            client.clone(),
            name.clone(),
            attributes.firewall.clone(),
            tags.clone(),
            vpc.clone(),
        ));
        let key_pair = Arc::new(KeyPair::new(
            client.clone(),
            cloud.clone(),
            identifier.clone(),
        ));
        let launch_template = Arc::new(LaunchTemplate::new(
            client.clone(),
            name.clone(),
            attributes.environment.clone(),
            attributes.size.clone(),
            attributes.spot,
            tags.clone(),
            LaunchTemplateInputs {
                image: image.clone(),
                permission_set: permission_set.clone(),
                security_group: security_group.clone(),
                key_pair: key_pair.clone(),
                credentials: credentials.clone(),
            },
        ));
        let group = Arc::new(AutoScalingGroup::new(
            client,
            name,
            tags,
            subnets.clone(),
            launch_template.clone(),
        ));

        Self {
            cloud,
            identifier,
            attributes,
            vpc,
            subnets,
            image,
            permission_set,
            credentials,
            bucket,
            security_group,
            key_pair,
            launch_template,
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
impl Task for AwsTask {
    async fn create(&mut self) -> Result<()> {
        let directory = PathBuf::from(&self.attributes.environment.directory);
        let mut steps = vec![
            Step::new("Reading default VPC", self.vpc.read()),
            Step::new("Reading default subnets", self.subnets.read()),
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Creating bucket", self.bucket.create()),
            Step::new("Creating security group", self.security_group.create()),
            Step::new("Importing key pair", self.key_pair.create()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Creating launch template", self.launch_template.create()),
            Step::new("Creating auto scaling group", self.group.create()),
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
            Step::new("Reading default VPC", self.vpc.read()),
            Step::new("Reading default subnets", self.subnets.read()),
            Step::new("Reading image", self.image.read()),
            Step::new("Reading permission set", self.permission_set.read()),
            Step::new("Reading bucket", self.bucket.read()),
            Step::new("Reading security group", self.security_group.read()),
            Step::new("Reading key pair", self.key_pair.read()),
            Step::new("Reading credentials", self.credentials.read()),
            Step::new("Reading launch template", self.launch_template.read()),
            Step::new("Reading auto scaling group", self.group.read()),
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
            Step::new("Reading default VPC", self.vpc.read()),
            Step::teardown("Deleting auto scaling group", self.group.delete()),
            Step::teardown("Deleting launch template", self.launch_template.delete()),
            Step::teardown("Deleting key pair", self.key_pair.delete()),
            Step::teardown("Deleting security group", self.security_group.delete()),
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
        self.key_pair.read().await?;
        self.key_pair.material()
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// Identifiers of every task with a bucket in this account
pub async fn list(client: &dyn AwsApi) -> Result<Vec<Identifier>> {
    Ok(client
        .list_buckets()
        .await?
        .iter()
        .filter_map(|name| Identifier::parse(name).ok())
        .collect())
}

/// [`list`] through the AWS SDK
pub async fn list_tasks(cloud: &Cloud) -> Result<Vec<Identifier>> {
    list(&AwsSdk::new(cloud)).await
}
