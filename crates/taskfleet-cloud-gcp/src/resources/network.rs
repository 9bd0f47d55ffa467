//! Default network and per-task firewall rules

use crate::api::{Direction, FirewallSpec, GcpApi};
use async_trait::async_trait;
use std::sync::Arc;
use taskfleet_cloud::{DataSource, FirewallRule, Resource, Result, Slot, ignore_not_found};

pub struct DefaultNetwork {
    client: Arc<dyn GcpApi>,
    pub link: Slot<String>,
}

impl DefaultNetwork {
    pub fn new(client: Arc<dyn GcpApi>) -> Self {
        Self {
            client,
            link: Slot::new("default network"),
        }
    }
}

#[async_trait]
impl DataSource for DefaultNetwork {
    async fn read(&self) -> Result<()> {
        self.link.set(self.client.default_network().await?);
        Ok(())
    }
}

/// One direction of the task firewall, applied to instances tagged with the
/// task identifier
pub struct Firewall {
    client: Arc<dyn GcpApi>,
    pub name: String,
    target_tag: String,
    direction: Direction,
    rule: FirewallRule,
    network: Arc<DefaultNetwork>,
}

impl Firewall {
    pub fn new(
        client: Arc<dyn GcpApi>,
        identifier: &str,
        direction: Direction,
        rule: FirewallRule,
        network: Arc<DefaultNetwork>,
    ) -> Self {
        let suffix = match direction {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        };
        Self {
            client,
            name: format!("{identifier}-{suffix}"),
            target_tag: identifier.to_string(),
            direction,
            rule,
            network,
        }
    }

    /// Nothing to open: egress defaults to allow-all and an empty ingress
    /// rule exposes nothing
    fn is_empty(&self) -> bool {
        self.rule.ports.is_empty() && self.rule.nets.is_empty()
    }
}

#[async_trait]
impl Resource for Firewall {
    async fn create(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let spec = FirewallSpec {
            name: self.name.clone(),
            network: self.network.link.get()?,
            direction: self.direction,
            rule: self.rule.clone(),
            target_tag: self.target_tag.clone(),
        };
        match self.client.create_firewall(&spec).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.client.describe_firewall(&self.name).await
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete_firewall(&self.name).await)
    }
}
