//! Cluster operations used by the task resources
//!
//! Objects live in the client's namespace. Missing objects surface as
//! `CloudError::NotFound`.

use async_trait::async_trait;
use serde_json::Value;
use std::net::IpAddr;
use taskfleet_cloud::{Event, Result};

#[async_trait]
pub trait KubernetesApi: Send + Sync {
    fn namespace(&self) -> &str;

    /// Create an object from its manifest
    async fn create(&self, manifest: &Value) -> Result<()>;
    /// Delete an object and wait for its dependents to go away
    async fn delete(&self, kind: Kind, name: &str) -> Result<()>;

    async fn get_claim(&self, name: &str) -> Result<ClaimInfo>;
    async fn get_job(&self, name: &str) -> Result<JobInfo>;
    async fn set_parallelism(&self, job: &str, parallelism: u16) -> Result<()>;
    /// Names of the jobs matching a label selector
    async fn list_jobs(&self, selector: &str) -> Result<Vec<String>>;

    async fn pods(&self, selector: &str) -> Result<Vec<PodInfo>>;
    /// Events about the named object
    async fn events(&self, name: &str) -> Result<Vec<Event>>;
    async fn logs(&self, pod: &str) -> Result<String>;
    /// `kubectl cp` semantics: remote paths are `<namespace>/<pod>:<path>`
    async fn copy(&self, source: &str, destination: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Job,
    PersistentVolumeClaim,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Job => "job",
            Kind::PersistentVolumeClaim => "persistentvolumeclaim",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimInfo {
    pub phase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub parallelism: u16,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Label selector matching the job's pods
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
    pub address: Option<IpAddr>,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}
