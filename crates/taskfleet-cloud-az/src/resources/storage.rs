//! Resource group, storage account, blob container and worker credentials

use crate::api::AzApi;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskfleet_cloud::machine::task_variables;
use taskfleet_cloud::{
    Cloud, DataSource, Identifier, Resource, Result, Slot, StorageCredentials, ignore_not_found,
};

/// Group holding every other resource of the task
pub struct ResourceGroup {
    client: Arc<dyn AzApi>,
    pub name: String,
    tags: BTreeMap<String, String>,
}

impl ResourceGroup {
    pub fn new(client: Arc<dyn AzApi>, name: String, tags: BTreeMap<String, String>) -> Self {
        Self { client, name, tags }
    }
}

#[async_trait]
impl Resource for ResourceGroup {
    async fn create(&self) -> Result<()> {
        match self.client.create_resource_group(&self.name, &self.tags).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        self.client.show_resource_group(&self.name).await
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_resource_group(&self.name).await)
    }
}

pub struct StorageAccount {
    client: Arc<dyn AzApi>,
    pub name: String,
    group: Arc<ResourceGroup>,
    tags: BTreeMap<String, String>,
    pub key: Slot<String>,
}

impl StorageAccount {
    pub fn new(
        client: Arc<dyn AzApi>,
        name: String,
        group: Arc<ResourceGroup>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            name,
            group,
            tags,
            key: Slot::new("storage account key"),
        }
    }
}

#[async_trait]
impl Resource for StorageAccount {
    async fn create(&self) -> Result<()> {
        match self
            .client
            .create_storage_account(&self.group.name, &self.name, &self.tags)
            .await
        {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let key = self
            .client
            .storage_account_key(&self.group.name, &self.name)
            .await?;
        self.key.set(key);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete_storage_account(&self.group.name, &self.name)
                .await,
        )?;
        self.key.clear();
        Ok(())
    }
}

pub struct BlobContainer {
    client: Arc<dyn AzApi>,
    pub name: String,
    account: Arc<StorageAccount>,
}

impl BlobContainer {
    pub fn new(client: Arc<dyn AzApi>, name: String, account: Arc<StorageAccount>) -> Self {
        Self {
            client,
            name,
            account,
        }
    }
}

#[async_trait]
impl Resource for BlobContainer {
    async fn create(&self) -> Result<()> {
        let key = self.account.key.get()?;
        match self
            .client
            .create_container(&self.account.name, &key, &self.name)
            .await
        {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let key = self.account.key.get()?;
        self.client
            .show_container(&self.account.name, &key, &self.name)
            .await
    }

    async fn delete(&self) -> Result<()> {
        // Without a key the account, and with it the container, is already gone
        let Some(key) = self.account.key.try_get() else {
            return Ok(());
        };
        ignore_not_found(
            self.client
                .delete_container(&self.account.name, &key, &self.name)
                .await,
        )
    }
}

/// Storage location and environment handed to the workers
pub struct Credentials {
    client: Arc<dyn AzApi>,
    cloud: Cloud,
    identifier: Identifier,
    account: Arc<StorageAccount>,
    container: Arc<BlobContainer>,
    pub value: Slot<StorageCredentials>,
}

impl Credentials {
    pub fn new(
        client: Arc<dyn AzApi>,
        cloud: Cloud,
        identifier: Identifier,
        account: Arc<StorageAccount>,
        container: Arc<BlobContainer>,
    ) -> Self {
        Self {
            client,
            cloud,
            identifier,
            account,
            container,
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
        if self.account.key.try_get().is_none() {
            self.account.read().await?;
        }
        let key = self.account.key.get()?;
        let mut credentials = self
            .client
            .storage_credentials(&self.account.name, &key, &self.container.name)
            .await?;
        credentials.env.extend(task_variables(
            &self.cloud,
            &self.identifier,
            &credentials.remote,
        ));
        self.value.set(credentials);
        Ok(())
    }
}
