//! In-memory cluster double; every claim is backed by a local directory

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskfleet_cloud::{CloudError, Event, Result};
use taskfleet_cloud_k8s::api::{ClaimInfo, JobInfo, Kind, KubernetesApi, PodInfo};

const NAMESPACE: &str = "default";

#[derive(Default)]
struct State {
    calls: Vec<String>,
    claims: BTreeMap<String, Value>,
    jobs: BTreeMap<String, Value>,
    created_jobs: Vec<Value>,
}

pub struct FakeCluster {
    root: PathBuf,
    state: Mutex<State>,
}

fn not_found(kind: &str, name: &str) -> CloudError {
    CloudError::NotFound(format!(r#"Error from server (NotFound): {kind} "{name}" not found"#))
}

fn parallelism(job: &Value) -> u16 {
    job["spec"]["parallelism"].as_u64().unwrap_or(0) as u16
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl FakeCluster {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(State::default()),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Local directory standing in for the claim's volume
    pub fn volume(&self, claim: &str) -> PathBuf {
        self.root.join(claim)
    }

    pub fn claim(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().claims.get(name).cloned()
    }

    pub fn job(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().jobs.get(name).cloned()
    }

    pub fn created_jobs(&self) -> Vec<Value> {
        self.state.lock().unwrap().created_jobs.clone()
    }

    pub fn add_job(&self, name: &str, manifest: Value) {
        self.state
            .lock()
            .unwrap()
            .jobs
            .insert(name.to_string(), manifest);
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.claims.is_empty() && state.jobs.is_empty()
    }

    /// `<namespace>/<job>-<n>:/task/<path>` to the backing directory
    fn resolve(&self, location: &str) -> PathBuf {
        let Some((pod, path)) = location
            .strip_prefix(&format!("{NAMESPACE}/"))
            .and_then(|rest| rest.split_once(':'))
        else {
            return PathBuf::from(location);
        };
        let (job, _) = pod.rsplit_once('-').expect("pod names end with an index");
        let claim = self
            .job(job)
            .and_then(|job| {
                job["spec"]["template"]["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"]
                    .as_str()
                    .map(str::to_string)
            })
            .expect("pod belongs to a job with a volume");
        let relative = path
            .strip_prefix("/task")
            .expect("copies stay inside the task volume")
            .trim_start_matches('/');
        self.volume(&claim).join(relative)
    }
}

#[async_trait]
impl KubernetesApi for FakeCluster {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    async fn create(&self, manifest: &Value) -> Result<()> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .expect("manifests are named")
            .to_string();
        assert_eq!(manifest["metadata"]["namespace"], NAMESPACE);
        match manifest["kind"].as_str() {
            Some("PersistentVolumeClaim") => {
                self.record("create:claim");
                let mut state = self.state.lock().unwrap();
                if state.claims.contains_key(&name) {
                    return Err(CloudError::AlreadyExists(name));
                }
                state.claims.insert(name.clone(), manifest.clone());
                drop(state);
                std::fs::create_dir_all(self.volume(&name))?;
                Ok(())
            }
            Some("Job") => {
                self.record("create:job");
                let mut state = self.state.lock().unwrap();
                if state.jobs.contains_key(&name) {
                    return Err(CloudError::AlreadyExists(name));
                }
                state.jobs.insert(name, manifest.clone());
                state.created_jobs.push(manifest.clone());
                Ok(())
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    async fn delete(&self, kind: Kind, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let removed = match kind {
            Kind::Job => {
                state.calls.push("delete:job".to_string());
                state.jobs.remove(name).is_some()
            }
            Kind::PersistentVolumeClaim => {
                state.calls.push("delete:claim".to_string());
                state.claims.remove(name).is_some()
            }
        };
        if !removed {
            return Err(not_found(kind.as_str(), name));
        }
        if kind == Kind::PersistentVolumeClaim {
            drop(state);
            std::fs::remove_dir_all(self.volume(name))?;
        }
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<ClaimInfo> {
        self.record("read:claim");
        self.claim(name)
            .map(|_| ClaimInfo {
                phase: "Bound".to_string(),
            })
            .ok_or_else(|| not_found("persistentvolumeclaims", name))
    }

    async fn get_job(&self, name: &str) -> Result<JobInfo> {
        self.record("read:job");
        let job = self.job(name).ok_or_else(|| not_found("jobs.batch", name))?;
        Ok(JobInfo {
            parallelism: parallelism(&job),
            active: parallelism(&job) as u32,
            succeeded: 0,
            failed: 0,
            selector: format!("controller-uid={name}"),
        })
    }

    async fn set_parallelism(&self, job: &str, value: u16) -> Result<()> {
        self.record(format!("update:job:{value}"));
        let mut state = self.state.lock().unwrap();
        let manifest = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| not_found("jobs.batch", job))?;
        manifest["spec"]["parallelism"] = Value::from(value);
        Ok(())
    }

    async fn list_jobs(&self, selector: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|(_, job)| !job["metadata"]["labels"][selector].is_null())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let Some(name) = selector.strip_prefix("controller-uid=") else {
            return Ok(Vec::new());
        };
        let Some(job) = self.job(name) else {
            return Ok(Vec::new());
        };
        // Reverse order to exercise sorting
        Ok((0..parallelism(&job))
            .rev()
            .map(|n| PodInfo {
                name: format!("{name}-{n}"),
                phase: "Running".to_string(),
                address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n as u8 + 1))),
            })
            .collect())
    }

    async fn events(&self, _name: &str) -> Result<Vec<Event>> {
        Ok(Vec::new())
    }

    async fn logs(&self, pod: &str) -> Result<String> {
        Ok(format!("output of {pod}\n"))
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<()> {
        self.record("copy");
        copy_tree(&self.resolve(source), &self.resolve(destination))?;
        Ok(())
    }
}
