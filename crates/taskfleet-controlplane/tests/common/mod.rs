//! In-memory task backend for API tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use taskfleet_cloud::{
    Cloud, CloudError, Event, Identifier, Result, SshKeyPair, Status, StatusCode, Task,
    TaskAttributes,
};
use taskfleet_controlplane::TaskFactory;
use tokio::sync::Semaphore;

/// Name whose status calls always fail
pub const BROKEN: &str = "broken";

/// Name whose resources were never created
pub const MISSING: &str = "missing";

pub struct Backend {
    calls: Mutex<Vec<String>>,
    /// Live tasks and their parallelism, by long identifier
    tasks: Mutex<BTreeMap<String, u16>>,
    /// Every create waits for a permit
    gate: Semaphore,
}

impl Backend {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().unwrap().keys().cloned().collect()
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct FakeFactory {
    pub backend: Arc<Backend>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Creates block until [`Backend::release`] hands out permits
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            backend: Arc::new(Backend {
                calls: Mutex::new(Vec::new()),
                tasks: Mutex::new(BTreeMap::new()),
                gate: Semaphore::new(permits),
            }),
        }
    }
}

#[async_trait]
impl TaskFactory for FakeFactory {
    fn task(
        &self,
        cloud: Cloud,
        identifier: Identifier,
        attributes: TaskAttributes,
    ) -> Result<Box<dyn Task>> {
        self.backend
            .record(format!("task:{}:{}", cloud.provider, identifier.long()));
        Ok(Box::new(FakeTask {
            backend: self.backend.clone(),
            identifier,
            attributes,
        }))
    }

    async fn list(&self, cloud: &Cloud) -> Result<Vec<Identifier>> {
        self.backend.record(format!("list:{}", cloud.provider));
        self.backend
            .tasks()
            .iter()
            .map(|name| Identifier::parse(name))
            .collect()
    }
}

struct FakeTask {
    backend: Arc<Backend>,
    identifier: Identifier,
    attributes: TaskAttributes,
}

#[async_trait]
impl Task for FakeTask {
    async fn create(&mut self) -> Result<()> {
        let _permit = self
            .backend
            .gate
            .acquire()
            .await
            .map_err(|err| CloudError::Api(err.to_string()))?;
        self.backend.record(format!("create:{}", self.identifier.long()));
        self.backend
            .tasks
            .lock()
            .unwrap()
            .insert(self.identifier.long(), self.attributes.parallelism);
        Ok(())
    }

    async fn read(&mut self) -> Result<()> {
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        self.backend.record(format!("delete:{}", self.identifier.long()));
        self.backend
            .tasks
            .lock()
            .unwrap()
            .remove(&self.identifier.long());
        Ok(())
    }

    async fn push(&self, _source: &Path) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, _destination: &Path) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn status(&mut self) -> Result<Status> {
        if self.identifier.short() == BROKEN {
            return Err(CloudError::Api("bucket unreachable".to_string()));
        }
        if self.identifier.short() == MISSING {
            return Err(CloudError::NotFound(format!("bucket {}", self.identifier)));
        }
        let active = self
            .backend
            .tasks
            .lock()
            .unwrap()
            .get(&self.identifier.long())
            .copied()
            .unwrap_or(0);
        Ok(Status::new().with(StatusCode::Active, active as u32))
    }

    async fn logs(&mut self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn addresses(&self) -> Vec<IpAddr> {
        Vec::new()
    }

    fn events(&self) -> Vec<Event> {
        Vec::new()
    }

    async fn key_pair(&self) -> Result<SshKeyPair> {
        Err(CloudError::NotFound("no key pair".to_string()))
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}
