//! Common task surface implemented by every provider

use crate::cloud::{Timeouts, with_timeout};
use crate::error::Result;
use crate::identifier::Identifier;
use crate::model::{Event, Status};
use crate::ssh::SshKeyPair;
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;

/// A worker fleet running one user script
///
/// Instances are rebuilt from the identifier for every operation; nothing is
/// cached between calls beyond what [`Task::read`] fetched.
#[async_trait]
pub trait Task: Send + Sync {
    /// Provision every resource, push the input directory and start workers
    async fn create(&mut self) -> Result<()>;

    /// Re-read every data source and resource without changing cloud state
    async fn read(&mut self) -> Result<()>;

    /// Pull outputs if possible and tear everything down; safe to repeat
    async fn delete(&mut self) -> Result<()>;

    /// Upload `source` into the task's remote storage
    async fn push(&self, source: &Path) -> Result<()>;

    /// Download the task's remote storage into `destination`
    async fn pull(&self, destination: &Path) -> Result<()>;

    /// Scale the fleet to the configured parallelism
    async fn start(&mut self) -> Result<()>;

    /// Scale the fleet to zero; the configured parallelism is kept
    async fn stop(&mut self) -> Result<()>;

    async fn status(&mut self) -> Result<Status>;

    async fn logs(&mut self) -> Result<Vec<String>>;

    fn addresses(&self) -> Vec<IpAddr>;

    fn events(&self) -> Vec<Event>;

    /// SSH key material for the workers, `NotFound` where the provider has none
    async fn key_pair(&self) -> Result<SshKeyPair>;

    fn identifier(&self) -> &Identifier;
}

/// Enforces per-operation deadlines around another task
///
/// Expired operations are cancelled without rollback; a later `delete`
/// cleans up whatever was left behind.
pub struct Bounded {
    inner: Box<dyn Task>,
    timeouts: Timeouts,
}

impl Bounded {
    pub fn new(inner: Box<dyn Task>, timeouts: Timeouts) -> Self {
        Self { inner, timeouts }
    }
}

#[async_trait]
impl Task for Bounded {
    async fn create(&mut self) -> Result<()> {
        with_timeout("create", self.timeouts.create, self.inner.create()).await
    }

    async fn read(&mut self) -> Result<()> {
        with_timeout("read", self.timeouts.read, self.inner.read()).await
    }

    async fn delete(&mut self) -> Result<()> {
        with_timeout("delete", self.timeouts.delete, self.inner.delete()).await
    }

    async fn push(&self, source: &Path) -> Result<()> {
        with_timeout("push", self.timeouts.update, self.inner.push(source)).await
    }

    async fn pull(&self, destination: &Path) -> Result<()> {
        with_timeout("pull", self.timeouts.update, self.inner.pull(destination)).await
    }

    async fn start(&mut self) -> Result<()> {
        with_timeout("start", self.timeouts.update, self.inner.start()).await
    }

    async fn stop(&mut self) -> Result<()> {
        with_timeout("stop", self.timeouts.update, self.inner.stop()).await
    }

    async fn status(&mut self) -> Result<Status> {
        with_timeout("status", self.timeouts.read, self.inner.status()).await
    }

    async fn logs(&mut self) -> Result<Vec<String>> {
        with_timeout("logs", self.timeouts.read, self.inner.logs()).await
    }

    fn addresses(&self) -> Vec<IpAddr> {
        self.inner.addresses()
    }

    fn events(&self) -> Vec<Event> {
        self.inner.events()
    }

    async fn key_pair(&self) -> Result<SshKeyPair> {
        with_timeout("key pair", self.timeouts.read, self.inner.key_pair()).await
    }

    fn identifier(&self) -> &Identifier {
        self.inner.identifier()
    }
}
