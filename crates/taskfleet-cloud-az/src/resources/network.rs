//! Virtual network, security group and subnet

use crate::api::{AzApi, Direction, SecurityRule};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskfleet_cloud::{Firewall, FirewallRule, Resource, Result, Slot, ignore_not_found};

use super::storage::ResourceGroup;

const ALLOW_PRIORITY: u16 = 100;
const DENY_PRIORITY: u16 = 4096;

pub struct VirtualNetwork {
    client: Arc<dyn AzApi>,
    pub name: String,
    group: Arc<ResourceGroup>,
    tags: BTreeMap<String, String>,
}

impl VirtualNetwork {
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
        }
    }
}

#[async_trait]
impl Resource for VirtualNetwork {
    async fn create(&self) -> Result<()> {
        match self
            .client
            .create_virtual_network(&self.group.name, &self.name, &self.tags)
            .await
        {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        self.client
            .show_virtual_network(&self.group.name, &self.name)
            .await
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete_virtual_network(&self.group.name, &self.name)
                .await,
        )
    }
}

/// Network security group with the task firewall rules
pub struct SecurityGroup {
    client: Arc<dyn AzApi>,
    pub name: String,
    group: Arc<ResourceGroup>,
    firewall: Firewall,
    tags: BTreeMap<String, String>,
    pub id: Slot<String>,
}

impl SecurityGroup {
    pub fn new(
        client: Arc<dyn AzApi>,
        name: String,
        group: Arc<ResourceGroup>,
        firewall: Firewall,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            name,
            group,
            firewall,
            tags,
            id: Slot::new("security group"),
        }
    }
}

/// Rules to install; an empty direction keeps the Azure default
pub fn security_rules(firewall: &Firewall) -> Vec<SecurityRule> {
    let mut rules = Vec::new();
    if !is_open(&firewall.ingress) {
        rules.push(SecurityRule {
            name: "ingress".to_string(),
            priority: ALLOW_PRIORITY,
            direction: Direction::Inbound,
            allow: true,
            rule: firewall.ingress.clone(),
        });
    }
    if !is_open(&firewall.egress) {
        rules.push(SecurityRule {
            name: "egress".to_string(),
            priority: ALLOW_PRIORITY,
            direction: Direction::Outbound,
            allow: true,
            rule: firewall.egress.clone(),
        });
        rules.push(SecurityRule {
            name: "egress-deny".to_string(),
            priority: DENY_PRIORITY,
            direction: Direction::Outbound,
            allow: false,
            rule: FirewallRule::default(),
        });
    }
    rules
}

fn is_open(rule: &FirewallRule) -> bool {
    rule.ports.is_empty() && rule.nets.is_empty()
}

#[async_trait]
impl Resource for SecurityGroup {
    async fn create(&self) -> Result<()> {
        match self
            .client
            .create_security_group(&self.group.name, &self.name, &self.tags)
            .await
        {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        for rule in security_rules(&self.firewall) {
            tracing::debug!("Adding rule {} to {}", rule.name, self.name);
            match self
                .client
                .create_security_rule(&self.group.name, &self.name, &rule)
                .await
            {
                Err(err) if !err.is_already_exists() => return Err(err),
                _ => {}
            }
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let id = self
            .client
            .show_security_group(&self.group.name, &self.name)
            .await?;
        self.id.set(id);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete_security_group(&self.group.name, &self.name)
                .await,
        )?;
        self.id.clear();
        Ok(())
    }
}

pub struct Subnet {
    client: Arc<dyn AzApi>,
    pub name: String,
    group: Arc<ResourceGroup>,
    network: Arc<VirtualNetwork>,
    security_group: Arc<SecurityGroup>,
    pub id: Slot<String>,
}

impl Subnet {
    pub fn new(
        client: Arc<dyn AzApi>,
        name: String,
        group: Arc<ResourceGroup>,
        network: Arc<VirtualNetwork>,
        security_group: Arc<SecurityGroup>,
    ) -> Self {
        Self {
            client,
            name,
            group,
            network,
            security_group,
            id: Slot::new("subnet"),
        }
    }
}

#[async_trait]
impl Resource for Subnet {
    async fn create(&self) -> Result<()> {
        let security_group = self.security_group.id.get()?;
        match self
            .client
            .create_subnet(
                &self.group.name,
                &self.network.name,
                &self.name,
                &security_group,
            )
            .await
        {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let id = self
            .client
            .show_subnet(&self.group.name, &self.network.name, &self.name)
            .await?;
        self.id.set(id);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete_subnet(&self.group.name, &self.network.name, &self.name)
                .await,
        )?;
        self.id.clear();
        Ok(())
    }
}
