//! Kubernetes task: a job sharing one persistent volume across its pods

use crate::api::KubernetesApi;
use crate::cli::KubectlCli;
use crate::resources::{Job, PersistentVolumeClaim, TASK_DIRECTORY, VolumeSpec, Workload};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskfleet_cloud::{
    Cloud, CloudError, Event, Identifier, Resource, Result, SshKeyPair, Status, Step, Task,
    TaskAttributes, run_steps,
};

/// Label carried by every object the provider creates
pub const TASK_LABEL: &str = "taskfleet";

pub struct K8sTask {
    cloud: Cloud,
    client: Arc<dyn KubernetesApi>,
    identifier: Identifier,
    attributes: TaskAttributes,
    volume: VolumeSpec,

    claim: Arc<PersistentVolumeClaim>,
    job: Arc<Job>,
    /// Same job name, sleeping, used to reach the volume after the task ran
    idle_job: Arc<Job>,
}

impl K8sTask {
    /// Task driven through `kubectl`
    pub fn new(cloud: Cloud, identifier: Identifier, attributes: TaskAttributes) -> Result<Self> {
        let client = Arc::new(KubectlCli::new(&cloud)?);
        Self::with_client(client, cloud, identifier, attributes)
    }

    pub fn with_client(
        client: Arc<dyn KubernetesApi>,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Result<Self> {
        let volume = VolumeSpec::parse(&attributes.environment.directory)?;
        if !attributes.spot.is_on_demand() {
            tracing::warn!("Spot pricing is not available on Kubernetes; running on demand");
        }

        let name = identifier.long();
        let labels = BTreeMap::from([(TASK_LABEL.to_string(), name.clone())]);
        let mut annotations: BTreeMap<String, String> = cloud.tags.clone();
        annotations.extend(attributes.tags.clone());

        let claim = Arc::new(PersistentVolumeClaim::new(
            client.clone(),
            name.clone(),
            volume.clone(),
            attributes.parallelism > 1,
            labels.clone(),
        ));
        let job = Arc::new(Job::new(
            client.clone(),
            name.clone(),
            attributes.environment.clone(),
            attributes.size.machine.clone(),
            attributes.parallelism,
            labels.clone(),
            annotations.clone(),
            claim.clone(),
            Workload::Script,
        ));
        let idle_job = Arc::new(Job::new(
            client.clone(),
            name,
            attributes.environment.clone(),
            attributes.size.machine.clone(),
            1,
            labels,
            annotations,
            claim.clone(),
            Workload::Idle,
        ));

        Ok(Self {
            cloud,
            client,
            identifier,
            attributes,
            volume,
            claim,
            job,
            idle_job,
        })
    }

    pub fn attributes(&self) -> &TaskAttributes {
        &self.attributes
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    fn sync_observed(&mut self) {
        if let Some(state) = self.job.state.try_get() {
            self.attributes.addresses = state.addresses;
            self.attributes.status = state.status;
            self.attributes.events = state.events;
        }
    }

    async fn copy_out(&self, job: &Job, destination: &Path) -> Result<()> {
        let pod = job.wait_for_pod(self.cloud.timeouts.delete).await?;
        let (source, destination) = match self.attributes.environment.directory_out.as_str() {
            "" => (format!("{TASK_DIRECTORY}/."), destination.to_path_buf()),
            out => (format!("{TASK_DIRECTORY}/{out}/."), destination.join(out)),
        };
        tokio::fs::create_dir_all(&destination).await?;
        self.client
            .copy(
                &format!("{}/{pod}:{source}", self.client.namespace()),
                &destination.to_string_lossy(),
            )
            .await
    }
}

#[async_trait]
impl Task for K8sTask {
    async fn create(&mut self) -> Result<()> {
        let directory = PathBuf::from(&self.volume.directory);
        let mut steps = vec![
            Step::new("Creating persistent volume claim", self.claim.create()),
            Step::new("Creating job", self.job.create()),
        ];
        if !self.volume.directory.is_empty() {
            steps.push(Step::new("Uploading directory", self.push(&directory)));
        }
        run_steps(steps).await?;

        self.read().await
    }

    async fn read(&mut self) -> Result<()> {
        run_steps(vec![
            Step::new("Reading persistent volume claim", self.claim.read()),
            Step::new("Reading job", self.job.read()),
        ])
        .await?;
        self.sync_observed();
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        let readable = if self.volume.directory.is_empty() {
            false
        } else {
            match self.read().await {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!("Task {} is not fully readable: {}", self.identifier, err);
                    false
                }
            }
        };

        let directory = PathBuf::from(&self.volume.directory);
        let mut steps = Vec::new();
        if readable {
            steps.extend([
                Step::teardown("Deleting completed job", self.job.delete()),
                Step::new("Creating ephemeral job", self.idle_job.create()),
                Step::new(
                    "Downloading directory",
                    self.copy_out(&self.idle_job, &directory),
                ),
            ]);
        }
        steps.extend([
            Step::teardown("Deleting job", self.job.delete()),
            Step::teardown("Deleting persistent volume claim", self.claim.delete()),
        ]);
        run_steps(steps).await?;

        self.attributes.addresses.clear();
        self.attributes.status = Status::new();
        Ok(())
    }

    async fn push(&self, source: &Path) -> Result<()> {
        let pod = self.job.wait_for_pod(self.cloud.timeouts.create).await?;
        self.client
            .copy(
                &format!("{}/.", source.to_string_lossy()),
                &format!("{}/{pod}:{TASK_DIRECTORY}", self.client.namespace()),
            )
            .await
    }

    async fn pull(&self, destination: &Path) -> Result<()> {
        self.copy_out(&self.job, destination).await
    }

    async fn start(&mut self) -> Result<()> {
        self.job.update(self.attributes.parallelism).await
    }

    async fn stop(&mut self) -> Result<()> {
        Err(CloudError::Unsupported(
            "stop is only available on virtual machine providers".to_string(),
        ))
    }

    async fn status(&mut self) -> Result<Status> {
        self.read().await?;
        Ok(self.attributes.status.clone())
    }

    async fn logs(&mut self) -> Result<Vec<String>> {
        self.read().await?;
        self.job.logs().await
    }

    fn addresses(&self) -> Vec<IpAddr> {
        self.attributes.addresses.clone()
    }

    fn events(&self) -> Vec<Event> {
        self.attributes.events.clone()
    }

    async fn key_pair(&self) -> Result<SshKeyPair> {
        Err(CloudError::NotFound(
            "Kubernetes tasks have no SSH key pair".to_string(),
        ))
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// Identifiers of every task with a job in the namespace
pub async fn list(client: &dyn KubernetesApi) -> Result<Vec<Identifier>> {
    Ok(client
        .list_jobs(TASK_LABEL)
        .await?
        .iter()
        .filter_map(|name| Identifier::parse(name).ok())
        .collect())
}

/// [`list`] through `kubectl`
pub async fn list_tasks(cloud: &Cloud) -> Result<Vec<Identifier>> {
    list(&KubectlCli::new(cloud)?).await
}
