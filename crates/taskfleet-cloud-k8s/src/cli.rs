//! kubectl client
//!
//! A kubeconfig passed inline as `KUBECONFIG_DATA` is written to a private
//! temporary file for the lifetime of the client; otherwise `kubectl` uses
//! its usual discovery.

use crate::api::{ClaimInfo, JobInfo, Kind, KubernetesApi, PodInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use tempfile::NamedTempFile;
use taskfleet_cloud::{Cloud, CloudError, CommandRunner, Event, Result};

pub const KUBECONFIG_VARIABLE: &str = "KUBECONFIG_DATA";

const DEFAULT_NAMESPACE: &str = "default";

const NOT_FOUND: &[&str] = &["NotFound", "not found"];

const ALREADY_EXISTS: &[&str] = &["AlreadyExists", "already exists"];

const UNAUTHORIZED: &[&str] = &["Unauthorized", "You must be logged in"];

/// `kubectl` wrapper bound to one namespace
pub struct KubectlCli {
    runner: CommandRunner,
    namespace: String,
    _kubeconfig: Option<NamedTempFile>,
}

impl KubectlCli {
    pub fn new(cloud: &Cloud) -> Result<Self> {
        let namespace = DEFAULT_NAMESPACE.to_string();
        let mut runner = CommandRunner::new("kubectl")
            .with_args(["--namespace", namespace.as_str()])
            .with_envs(&cloud.credentials);

        let kubeconfig = match cloud.credential(KUBECONFIG_VARIABLE) {
            Some(data) => {
                let mut file = NamedTempFile::new()?;
                file.write_all(data.as_bytes())?;
                runner = runner.with_env("KUBECONFIG", file.path().to_string_lossy());
                Some(file)
            }
            None => None,
        };

        Ok(Self {
            runner,
            namespace,
            _kubeconfig: kubeconfig,
        })
    }

    async fn call(&self, args: &[&str]) -> Result<String> {
        self.runner.run(args).await.map_err(classify)
    }

    async fn call_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.call(args).await?;
        Ok(serde_json::from_str(&output)?)
    }
}

/// Map kubectl errors to the shared error taxonomy
pub fn classify(err: CloudError) -> CloudError {
    let (program, stderr) = match err {
        CloudError::CommandFailed { program, stderr } => (program, stderr),
        other => return other,
    };
    if NOT_FOUND.iter().any(|marker| stderr.contains(marker)) {
        CloudError::NotFound(stderr)
    } else if ALREADY_EXISTS.iter().any(|marker| stderr.contains(marker)) {
        CloudError::AlreadyExists(stderr)
    } else if UNAUTHORIZED.iter().any(|marker| stderr.contains(marker)) {
        CloudError::AuthenticationFailed(stderr)
    } else {
        CloudError::CommandFailed { program, stderr }
    }
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
struct Metadata {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Named {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct Claim {
    #[serde(default)]
    status: ClaimStatus,
}

#[derive(Deserialize, Default)]
struct ClaimStatus {
    #[serde(default)]
    phase: String,
}

#[derive(Deserialize)]
struct Job {
    spec: JobSpec,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSpec {
    #[serde(default)]
    parallelism: u16,
    #[serde(default)]
    selector: Selector,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Selector {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct JobStatus {
    #[serde(default)]
    active: u32,
    #[serde(default)]
    succeeded: u32,
    #[serde(default)]
    failed: u32,
}

#[derive(Deserialize)]
struct Pod {
    metadata: Metadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    pod_ip: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterEvent {
    last_timestamp: Option<DateTime<Utc>>,
    event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn job_info(job: Job) -> JobInfo {
    JobInfo {
        parallelism: job.spec.parallelism,
        active: job.status.active,
        succeeded: job.status.succeeded,
        failed: job.status.failed,
        selector: job
            .spec
            .selector
            .match_labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn cluster_events(events: Vec<ClusterEvent>) -> Vec<Event> {
    events
        .into_iter()
        .filter_map(|event| {
            Some(Event {
                time: event.last_timestamp.or(event.event_time)?,
                code: event.reason,
                description: vec![event.message],
            })
        })
        .collect()
}

#[async_trait]
impl KubernetesApi for KubectlCli {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create(&self, manifest: &Value) -> Result<()> {
        self.runner
            .run_with_input(&["create", "--filename", "-"], &manifest.to_string())
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, kind: Kind, name: &str) -> Result<()> {
        self.call(&["delete", kind.as_str(), name, "--cascade=foreground", "--wait=true"])
            .await?;
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<ClaimInfo> {
        let claim: Claim = self
            .call_json(&["get", "persistentvolumeclaim", name, "--output", "json"])
            .await?;
        Ok(ClaimInfo {
            phase: claim.status.phase,
        })
    }

    async fn get_job(&self, name: &str) -> Result<JobInfo> {
        let job: Job = self
            .call_json(&["get", "job", name, "--output", "json"])
            .await?;
        Ok(job_info(job))
    }

    async fn set_parallelism(&self, job: &str, parallelism: u16) -> Result<()> {
        let patch = json!({"spec": {"parallelism": parallelism}}).to_string();
        self.call(&["patch", "job", job, "--type", "merge", "--patch", &patch])
            .await?;
        Ok(())
    }

    async fn list_jobs(&self, selector: &str) -> Result<Vec<String>> {
        let jobs: List<Named> = self
            .call_json(&["get", "jobs", "--selector", selector, "--output", "json"])
            .await?;
        Ok(jobs.items.into_iter().map(|job| job.metadata.name).collect())
    }

    async fn pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let pods: List<Pod> = self
            .call_json(&["get", "pods", "--selector", selector, "--output", "json"])
            .await?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| PodInfo {
                name: pod.metadata.name,
                phase: pod.status.phase,
                address: pod
                    .status
                    .pod_ip
                    .and_then(|ip| ip.parse::<IpAddr>().ok()),
            })
            .collect())
    }

    async fn events(&self, name: &str) -> Result<Vec<Event>> {
        let selector = format!("involvedObject.name={name}");
        let events: List<ClusterEvent> = self
            .call_json(&["get", "events", "--field-selector", &selector, "--output", "json"])
            .await?;
        Ok(cluster_events(events.items))
    }

    async fn logs(&self, pod: &str) -> Result<String> {
        self.call(&["logs", pod]).await
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<()> {
        self.call(&["cp", source, destination]).await?;
        Ok(())
    }
}
