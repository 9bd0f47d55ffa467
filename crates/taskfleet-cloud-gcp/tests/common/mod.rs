//! In-memory Google Cloud double with local directories standing in for buckets

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskfleet_cloud::{CloudError, Event, Result, StorageCredentials};
use taskfleet_cloud_gcp::api::{
    FirewallSpec, GcpApi, GroupInfo, GroupInstance, InstanceTemplateSpec,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    buckets: BTreeSet<String>,
    firewalls: BTreeMap<String, FirewallSpec>,
    templates: BTreeMap<String, InstanceTemplateSpec>,
    groups: BTreeMap<String, u16>,
}

pub struct FakeGcp {
    root: PathBuf,
    state: Mutex<State>,
}

fn not_found(what: &str) -> CloudError {
    CloudError::NotFound(format!("The resource '{what}' was not found"))
}

impl FakeGcp {
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

    pub fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn target_size(&self, group: &str) -> Option<u16> {
        self.state.lock().unwrap().groups.get(group).copied()
    }

    pub fn template(&self, name: &str) -> Option<InstanceTemplateSpec> {
        self.state.lock().unwrap().templates.get(name).cloned()
    }

    pub fn firewall_names(&self) -> Vec<String> {
        self.state.lock().unwrap().firewalls.keys().cloned().collect()
    }

    pub fn add_bucket(&self, name: &str) {
        self.state.lock().unwrap().buckets.insert(name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.buckets.is_empty()
            && state.firewalls.is_empty()
            && state.templates.is_empty()
            && state.groups.is_empty()
    }
}

#[async_trait]
impl GcpApi for FakeGcp {
    async fn default_network(&self) -> Result<String> {
        self.record("read:network");
        Ok("global/networks/default".to_string())
    }

    async fn find_image(&self, project: &str, family: &str) -> Result<String> {
        self.record("read:image");
        Ok(format!("projects/{project}/global/images/{family}-v1"))
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        self.record("create:bucket");
        if !self.state.lock().unwrap().buckets.insert(name.to_string()) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(self.bucket_dir(name))?;
        Ok(())
    }

    async fn describe_bucket(&self, name: &str) -> Result<()> {
        self.record("read:bucket");
        if self.state.lock().unwrap().buckets.contains(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.record("delete:bucket");
        if !self.state.lock().unwrap().buckets.remove(name) {
            return Err(not_found(name));
        }
        let dir = self.bucket_dir(name);
        if dir.exists() {
            std::fs::remove_dir(&dir)
                .map_err(|e| CloudError::Api(format!("bucket not empty: {e}")))?;
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().buckets.iter().cloned().collect())
    }

    async fn storage_credentials(&self, bucket: &str) -> Result<StorageCredentials> {
        self.record("read:credentials");
        Ok(StorageCredentials {
            remote: self.bucket_dir(bucket).to_string_lossy().to_string(),
            env: BTreeMap::from([(
                "GOOGLE_APPLICATION_CREDENTIALS_DATA".to_string(),
                "{}".to_string(),
            )]),
        })
    }

    async fn create_firewall(&self, spec: &FirewallSpec) -> Result<()> {
        self.record(format!("create:firewall:{}", spec.direction.as_str()));
        let mut state = self.state.lock().unwrap();
        if state.firewalls.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        state.firewalls.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn describe_firewall(&self, name: &str) -> Result<()> {
        self.record("read:firewall");
        if self.state.lock().unwrap().firewalls.contains_key(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        let removed = self.state.lock().unwrap().firewalls.remove(name);
        match removed {
            Some(spec) => {
                self.record(format!("delete:firewall:{}", spec.direction.as_str()));
                Ok(())
            }
            None => Err(not_found(name)),
        }
    }

    async fn create_instance_template(&self, spec: &InstanceTemplateSpec) -> Result<()> {
        self.record("create:template");
        let mut state = self.state.lock().unwrap();
        if state.templates.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        state.templates.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn describe_instance_template(&self, name: &str) -> Result<String> {
        self.record("read:template");
        if self.state.lock().unwrap().templates.contains_key(name) {
            Ok(format!("global/instanceTemplates/{name}"))
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_instance_template(&self, name: &str) -> Result<()> {
        self.record("delete:template");
        self.state
            .lock()
            .unwrap()
            .templates
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_instance_group(&self, name: &str, template: &str) -> Result<()> {
        self.record("create:group");
        assert_eq!(template, format!("global/instanceTemplates/{name}"));
        let mut state = self.state.lock().unwrap();
        if state.groups.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        state.groups.insert(name.to_string(), 0);
        Ok(())
    }

    async fn describe_instance_group(&self, name: &str) -> Result<GroupInfo> {
        self.record("read:group");
        let size = self
            .state
            .lock()
            .unwrap()
            .groups
            .get(name)
            .copied()
            .ok_or_else(|| not_found(name))?;
        Ok(GroupInfo {
            target_size: size,
            instances: (0..size)
                .map(|n| GroupInstance {
                    name: format!("{name}-{n:04}"),
                    status: "RUNNING".to_string(),
                    address: Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, n as u8 + 1))),
                })
                .collect(),
        })
    }

    async fn resize_instance_group(&self, name: &str, size: u16) -> Result<()> {
        self.record(format!("update:group:{size}"));
        let mut state = self.state.lock().unwrap();
        let group = state.groups.get_mut(name).ok_or_else(|| not_found(name))?;
        *group = size;
        Ok(())
    }

    async fn delete_instance_group(&self, name: &str) -> Result<()> {
        self.record("delete:group");
        self.state
            .lock()
            .unwrap()
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn instance_group_errors(&self, _name: &str) -> Result<Vec<Event>> {
        Ok(Vec::new())
    }
}

pub fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}
