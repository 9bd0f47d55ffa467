//! S3 bucket and the credentials workers use to reach it

use crate::api::AwsApi;
use async_trait::async_trait;
use std::sync::Arc;
use taskfleet_cloud::machine::task_variables;
use taskfleet_cloud::{
    Cloud, CloudError, DataSource, Identifier, Resource, Result, Slot, StorageCredentials,
    ignore_not_found,
};

pub struct Bucket {
    client: Arc<dyn AwsApi>,
    pub name: String,
}

impl Bucket {
    pub fn new(client: Arc<dyn AwsApi>, name: String) -> Self {
        Self { client, name }
    }
}

#[async_trait]
impl Resource for Bucket {
    async fn create(&self) -> Result<()> {
        match self.client.create_bucket(&self.name).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        self.client.head_bucket(&self.name).await
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_bucket(&self.name).await)
    }
}

pub struct Credentials {
    client: Arc<dyn AwsApi>,
    cloud: Cloud,
    identifier: Identifier,
    bucket: Arc<Bucket>,
    pub value: Slot<StorageCredentials>,
}

impl Credentials {
    pub fn new(client: Arc<dyn AwsApi>, cloud: Cloud, identifier: Identifier, bucket: Arc<Bucket>) -> Self {
        Self {
            client,
            cloud,
            identifier,
            bucket,
            value: Slot::new("storage credentials"),
        }
    }

    pub fn remote(&self) -> Result<String> {
        Ok(self.value.get()?.remote)
    }
}

#[async_trait]
impl DataSource for Credentials {
    async fn read(&self) -> Result<()> {
        let mut credentials = self.client.storage_credentials(&self.bucket.name).await?;
        if credentials.remote.is_empty() {
            return Err(CloudError::AuthenticationFailed(
                "no storage credentials available".to_string(),
            ));
        }
        credentials.env.extend(task_variables(
            &self.cloud,
            &self.identifier,
            &credentials.remote,
        ));
        self.value.set(credentials);
        Ok(())
    }
}
