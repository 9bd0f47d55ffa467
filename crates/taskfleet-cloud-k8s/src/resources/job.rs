//! Worker job and the pods it runs

use crate::api::{Kind, KubernetesApi};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use taskfleet_cloud::{
    CloudError, Environment, Event, Resource, Result, Slot, Status, StatusCode, ignore_not_found,
    with_timeout,
};

use super::claim::PersistentVolumeClaim;

/// Mount point of the task volume inside every pod
pub const TASK_DIRECTORY: &str = "/task";

const VOLUME: &str = "task";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

static MACHINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)-(\d+)(?:\+([^*]+)\*([1-9]\d*))?$").expect("machine pattern is valid")
});

fn machine_alias(machine: &str) -> &str {
    match machine {
        "s" => "1-1000",
        "m" => "8-32000",
        "l" => "32-128000",
        "xl" => "64-256000",
        "m+t4" => "4-16000+nvidia-tesla-t4*1",
        "m+k80" => "4-64000+nvidia-tesla-k80*1",
        "l+k80" => "32-512000+nvidia-tesla-k80*8",
        "xl+k80" => "64-768000+nvidia-tesla-k80*16",
        "m+v100" => "8-64000+nvidia-tesla-v100*1",
        "l+v100" => "32-256000+nvidia-tesla-v100*4",
        "xl+v100" => "64-512000+nvidia-tesla-v100*8",
        other => other,
    }
}

/// Container limits for one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub cpu: u32,
    pub memory_mb: u32,
    pub accelerator: Option<(String, u16)>,
}

impl Machine {
    /// Generic size or `<cpu>-<memoryMB>[+<accelerator>*<count>]`
    pub fn parse(machine: &str) -> Result<Self> {
        let machine = machine_alias(machine);
        let invalid = || {
            CloudError::Validation(format!(
                "invalid machine {machine}: expected cpu-memoryMB[+accelerator*count]"
            ))
        };
        let captures = MACHINE.captures(machine).ok_or_else(invalid)?;
        let accelerator = match (captures.get(3), captures.get(4)) {
            (Some(kind), Some(count)) => Some((
                kind.as_str().to_string(),
                count.as_str().parse().map_err(|_| invalid())?,
            )),
            _ => None,
        };
        Ok(Self {
            cpu: captures[1].parse().map_err(|_| invalid())?,
            memory_mb: captures[2].parse().map_err(|_| invalid())?,
            accelerator,
        })
    }
}

/// What the job's pods run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// The user script
    Script,
    /// A single sleeping pod keeping the volume mounted for file copies
    Idle,
}

/// Observed state of the job
#[derive(Debug, Clone, Default)]
pub struct JobState {
    pub selector: String,
    pub status: Status,
    pub addresses: Vec<IpAddr>,
    pub events: Vec<Event>,
}

pub struct Job {
    client: Arc<dyn KubernetesApi>,
    pub name: String,
    environment: Environment,
    machine: String,
    parallelism: u16,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    claim: Arc<PersistentVolumeClaim>,
    workload: Workload,
    pub state: Slot<JobState>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn KubernetesApi>,
        name: String,
        environment: Environment,
        machine: String,
        parallelism: u16,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        claim: Arc<PersistentVolumeClaim>,
        workload: Workload,
    ) -> Self {
        Self {
            client,
            name,
            environment,
            machine,
            parallelism,
            labels,
            annotations,
            claim,
            workload,
            state: Slot::new("job"),
        }
    }

    pub fn manifest(&self) -> Result<Value> {
        let machine = Machine::parse(&self.machine)?;
        let mut limits = json!({
            "cpu": machine.cpu.to_string(),
            "memory": format!("{}M", machine.memory_mb),
        });
        let mut node_selector = json!({});
        if let Some((kind, count)) = &machine.accelerator {
            limits["nvidia.com/gpu"] = json!(count.to_string());
            node_selector["accelerator"] = json!(kind);
        }

        let mut env: Vec<Value> = self
            .environment
            .resolved_variables()
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();

        let (command, parallelism, deadline) = match self.workload {
            Workload::Script => {
                env.push(json!({"name": "TASKFLEET_SCRIPT", "value": self.environment.script}));
                (
                    json!([
                        "sh",
                        "-c",
                        "printf '%s' \"$TASKFLEET_SCRIPT\" > /tmp/taskfleet-script && chmod +x /tmp/taskfleet-script && exec /tmp/taskfleet-script"
                    ]),
                    self.parallelism,
                    json!(self.environment.timeout.as_secs()),
                )
            }
            Workload::Idle => (json!(["sleep", "infinity"]), 1, Value::Null),
        };

        let mut spec = json!({
            "parallelism": parallelism,
            "backoffLimit": 0,
            "template": {
                "metadata": {"labels": self.labels},
                "spec": {
                    "restartPolicy": "Never",
                    "nodeSelector": node_selector,
                    "containers": [{
                        "name": "task",
                        "image": self.environment.image,
                        "command": command,
                        "workingDir": TASK_DIRECTORY,
                        "env": env,
                        "resources": {"limits": limits},
                        "volumeMounts": [{"name": VOLUME, "mountPath": TASK_DIRECTORY}],
                    }],
                    "volumes": [{
                        "name": VOLUME,
                        "persistentVolumeClaim": {"claimName": self.claim.name},
                    }],
                },
            },
        });
        if !deadline.is_null() {
            spec["activeDeadlineSeconds"] = deadline;
        }

        Ok(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": self.client.namespace(),
                "labels": self.labels,
                "annotations": self.annotations,
            },
            "spec": spec,
        }))
    }

    /// Apply a target pod count
    pub async fn update(&self, parallelism: u16) -> Result<()> {
        self.client.set_parallelism(&self.name, parallelism).await
    }

    /// First running pod of the job, polling until `limit`
    pub async fn wait_for_pod(&self, limit: Duration) -> Result<String> {
        let selector = self.state.get()?.selector;
        with_timeout("waiting for pods", limit, async {
            loop {
                let pods = self.client.pods(&selector).await?;
                if let Some(pod) = pods.into_iter().find(|pod| pod.is_running()) {
                    return Ok(pod.name);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
    }

    /// Logs of every pod, ordered by pod name
    pub async fn logs(&self) -> Result<Vec<String>> {
        let selector = self.state.get()?.selector;
        let mut pods = self.client.pods(&selector).await?;
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        let mut logs = Vec::with_capacity(pods.len());
        for pod in pods {
            logs.push(self.client.logs(&pod.name).await?);
        }
        Ok(logs)
    }
}

#[async_trait]
impl Resource for Job {
    async fn create(&self) -> Result<()> {
        let manifest = self.manifest()?;
        match self.client.create(&manifest).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let job = self.client.get_job(&self.name).await?;
        let pods = self.client.pods(&job.selector).await?;
        let status = Status::new()
            .with(StatusCode::Active, job.active)
            .with(StatusCode::Succeeded, job.succeeded)
            .with(StatusCode::Failed, job.failed);
        self.state.set(JobState {
            addresses: pods
                .iter()
                .filter(|pod| pod.is_running())
                .filter_map(|pod| pod.address)
                .collect(),
            events: self.client.events(&self.name).await?,
            selector: job.selector,
            status,
        });
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(self.client.delete(Kind::Job, &self.name).await)?;
        self.state.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machines() {
        assert_eq!(
            Machine::parse("m").unwrap(),
            Machine {
                cpu: 8,
                memory_mb: 32000,
                accelerator: None
            }
        );
        assert_eq!(
            Machine::parse("m+t4").unwrap().accelerator,
            Some(("nvidia-tesla-t4".to_string(), 1))
        );
        assert_eq!(Machine::parse("2-4096").unwrap().memory_mb, 4096);
        assert!(Machine::parse("n1-standard-4").unwrap_err().is_validation());
        assert!(Machine::parse("2-4096+gpu*0").unwrap_err().is_validation());
    }
}
