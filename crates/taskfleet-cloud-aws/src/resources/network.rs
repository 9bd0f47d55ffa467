//! VPC, subnets and security group

use crate::api::{AwsApi, Direction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskfleet_cloud::{DataSource, Firewall, Resource, Result, Slot, ignore_not_found};

pub struct DefaultVpc {
    client: Arc<dyn AwsApi>,
    pub id: Slot<String>,
}

impl DefaultVpc {
    pub fn new(client: Arc<dyn AwsApi>) -> Self {
        Self {
            client,
            id: Slot::new("default VPC"),
        }
    }
}

#[async_trait]
impl DataSource for DefaultVpc {
    async fn read(&self) -> Result<()> {
        self.id.set(self.client.default_vpc().await?);
        Ok(())
    }
}

pub struct DefaultSubnets {
    client: Arc<dyn AwsApi>,
    vpc: Arc<DefaultVpc>,
    pub ids: Slot<Vec<String>>,
}

impl DefaultSubnets {
    pub fn new(client: Arc<dyn AwsApi>, vpc: Arc<DefaultVpc>) -> Self {
        Self {
            client,
            vpc,
            ids: Slot::new("default subnets"),
        }
    }
}

#[async_trait]
impl DataSource for DefaultSubnets {
    async fn read(&self) -> Result<()> {
        let vpc = self.vpc.id.get()?;
        self.ids.set(self.client.default_subnets(&vpc).await?);
        Ok(())
    }
}

pub struct SecurityGroup {
    client: Arc<dyn AwsApi>,
    name: String,
    firewall: Firewall,
    tags: BTreeMap<String, String>,
    vpc: Arc<DefaultVpc>,
    pub id: Slot<String>,
}

impl SecurityGroup {
    pub fn new(
        client: Arc<dyn AwsApi>,
        name: String,
        firewall: Firewall,
        tags: BTreeMap<String, String>,
        vpc: Arc<DefaultVpc>,
    ) -> Self {
        Self {
            client,
            name,
            firewall,
            tags,
            vpc,
            id: Slot::new("security group"),
        }
    }

    async fn authorize(&self, group_id: &str) -> Result<()> {
        let ingress = self
            .client
            .authorize(group_id, Direction::Ingress, &self.firewall.ingress)
            .await;
        tolerate_duplicate(ingress)?;

        // New groups already allow all outbound traffic
        let egress = &self.firewall.egress;
        if !egress.ports.is_empty() || !egress.nets.is_empty() {
            let egress = self
                .client
                .authorize(group_id, Direction::Egress, egress)
                .await;
            tolerate_duplicate(egress)?;
        }
        Ok(())
    }
}

fn tolerate_duplicate(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_already_exists() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Resource for SecurityGroup {
    async fn create(&self) -> Result<()> {
        let vpc = self.vpc.id.get()?;
        let id = match self
            .client
            .create_security_group(&self.name, &vpc, &self.tags)
            .await
        {
            Ok(id) => id,
            Err(err) if err.is_already_exists() => {
                self.client.find_security_group(&self.name, &vpc).await?
            }
            Err(err) => return Err(err),
        };
        self.authorize(&id).await?;
        self.id.set(id);
        Ok(())
    }

    async fn read(&self) -> Result<()> {
        let vpc = self.vpc.id.get()?;
        self.id
            .set(self.client.find_security_group(&self.name, &vpc).await?);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let vpc = self.vpc.id.get()?;
        let id = match self.client.find_security_group(&self.name, &vpc).await {
            Ok(id) => id,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        ignore_not_found(self.client.delete_security_group(&id).await)?;
        self.id.clear();
        Ok(())
    }
}
