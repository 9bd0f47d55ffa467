//! Provider dispatch

use async_trait::async_trait;
use taskfleet_cloud::{
    Bounded, Cloud, Identifier, Provider, Result, Task, TaskAttributes, with_timeout,
};
use taskfleet_cloud_aws::AwsTask;
use taskfleet_cloud_az::AzTask;
use taskfleet_cloud_gcp::GcpTask;
use taskfleet_cloud_k8s::K8sTask;

/// Builds the task implementation for a cloud
#[async_trait]
pub trait TaskFactory: Send + Sync {
    fn task(
        &self,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Result<Box<dyn Task>>;

    async fn list(&self, cloud: &Cloud) -> Result<Vec<Identifier>>;
}

/// Real provider adapters, every operation bounded by the cloud's timeouts
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudTaskFactory;

#[async_trait]
impl TaskFactory for CloudTaskFactory {
    fn task(
        &self,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Result<Box<dyn Task>> {
        let timeouts = cloud.timeouts;
        let inner: Box<dyn Task> = match cloud.provider {
            Provider::Aws => Box::new(AwsTask::new(cloud, identifier, attributes)?),
            Provider::Gcp => Box::new(GcpTask::new(cloud, identifier, attributes)?),
            Provider::Az => Box::new(AzTask::new(cloud, identifier, attributes)?),
            Provider::K8s => Box::new(K8sTask::new(cloud, identifier, attributes)?),
        };
        Ok(Box::new(Bounded::new(inner, timeouts)))
    }

    async fn list(&self, cloud: &Cloud) -> Result<Vec<Identifier>> {
        with_timeout("list", cloud.timeouts.read, async {
            match cloud.provider {
                Provider::Aws => taskfleet_cloud_aws::list_tasks(cloud).await,
                Provider::Gcp => taskfleet_cloud_gcp::list_tasks(cloud).await,
                Provider::Az => taskfleet_cloud_az::list_tasks(cloud).await,
                Provider::K8s => taskfleet_cloud_k8s::list_tasks(cloud).await,
            }
        })
        .await
    }
}
