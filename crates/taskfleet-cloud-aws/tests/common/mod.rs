//! In-memory AWS double with local directories standing in for buckets

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskfleet_cloud::{CloudError, Event, FirewallRule, Result, StorageCredentials};
use taskfleet_cloud_aws::api::{
    AwsApi, Direction, GroupInfo, GroupInstance, GroupSpec, ImageInfo, LaunchTemplateSpec,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    buckets: BTreeSet<String>,
    security_groups: BTreeMap<String, String>,
    key_pairs: BTreeMap<String, String>,
    templates: BTreeMap<String, LaunchTemplateSpec>,
    groups: BTreeMap<String, u16>,
}

pub struct FakeAws {
    root: PathBuf,
    state: Mutex<State>,
}

impl FakeAws {
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

    pub fn desired(&self, group: &str) -> Option<u16> {
        self.state.lock().unwrap().groups.get(group).copied()
    }

    pub fn template(&self, name: &str) -> Option<LaunchTemplateSpec> {
        self.state.lock().unwrap().templates.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.buckets.is_empty()
            && state.security_groups.is_empty()
            && state.key_pairs.is_empty()
            && state.templates.is_empty()
            && state.groups.is_empty()
    }

    /// Public key material imported under `name`
    pub fn imported_key(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().key_pairs.get(name).cloned()
    }

    pub fn add_bucket(&self, name: &str) {
        self.state.lock().unwrap().buckets.insert(name.to_string());
    }
}

fn not_found(what: &str) -> CloudError {
    CloudError::NotFound(what.to_string())
}

#[async_trait]
impl AwsApi for FakeAws {
    async fn default_vpc(&self) -> Result<String> {
        self.record("read:vpc");
        Ok("vpc-1".to_string())
    }

    async fn default_subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        assert_eq!(vpc_id, "vpc-1");
        self.record("read:subnets");
        Ok(vec!["subnet-a".to_string(), "subnet-b".to_string()])
    }

    async fn find_image(&self, owner: &str, architecture: &str, _name: &str) -> Result<ImageInfo> {
        self.record("read:image");
        assert_eq!(owner, "099720109477");
        assert_eq!(architecture, "x86_64");
        Ok(ImageInfo {
            id: "ami-1".to_string(),
            root_device: "/dev/sda1".to_string(),
        })
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        self.record("create:bucket");
        let mut state = self.state.lock().unwrap();
        if !state.buckets.insert(name.to_string()) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(self.bucket_dir(name))?;
        Ok(())
    }

    async fn head_bucket(&self, name: &str) -> Result<()> {
        self.record("read:bucket");
        if self.state.lock().unwrap().buckets.contains(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.record("delete:bucket");
        let mut state = self.state.lock().unwrap();
        if !state.buckets.remove(name) {
            return Err(not_found(name));
        }
        let dir = self.bucket_dir(name);
        if dir.exists() {
            // S3 refuses to delete buckets that still hold objects
            std::fs::remove_dir(&dir).map_err(|e| CloudError::Api(format!("BucketNotEmpty: {e}")))?;
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
            env: BTreeMap::from([("AWS_ACCESS_KEY_ID".to_string(), "fake".to_string())]),
        })
    }

    async fn create_security_group(
        &self,
        name: &str,
        _vpc_id: &str,
        _tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.record("create:security-group");
        let mut state = self.state.lock().unwrap();
        if state.security_groups.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        state
            .security_groups
            .insert(name.to_string(), "sg-1".to_string());
        Ok("sg-1".to_string())
    }

    async fn find_security_group(&self, name: &str, _vpc_id: &str) -> Result<String> {
        self.record("read:security-group");
        self.state
            .lock()
            .unwrap()
            .security_groups
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn authorize(&self, group_id: &str, direction: Direction, rule: &FirewallRule) -> Result<()> {
        assert_eq!(group_id, "sg-1");
        assert_eq!(direction, Direction::Ingress);
        assert_eq!(rule.ports, vec![22, 80]);
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.record("delete:security-group");
        let mut state = self.state.lock().unwrap();
        let before = state.security_groups.len();
        state.security_groups.retain(|_, id| id != group_id);
        if state.security_groups.len() == before {
            return Err(not_found(group_id));
        }
        Ok(())
    }

    async fn import_key_pair(&self, name: &str, public_key: &str) -> Result<()> {
        self.record("create:key-pair");
        assert!(public_key.starts_with("ssh-ed25519 "));
        let mut state = self.state.lock().unwrap();
        if state.key_pairs.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        state.key_pairs.insert(name.to_string(), public_key.to_string());
        Ok(())
    }

    async fn describe_key_pair(&self, name: &str) -> Result<String> {
        self.record("read:key-pair");
        if self.state.lock().unwrap().key_pairs.contains_key(name) {
            Ok("key-1".to_string())
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_key_pair(&self, name: &str) -> Result<()> {
        self.record("delete:key-pair");
        // EC2 reports success for absent key pairs
        self.state.lock().unwrap().key_pairs.remove(name);
        Ok(())
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> Result<String> {
        self.record("create:launch-template");
        let mut state = self.state.lock().unwrap();
        if state.templates.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        state.templates.insert(spec.name.clone(), spec.clone());
        Ok("lt-1".to_string())
    }

    async fn describe_launch_template(&self, name: &str) -> Result<String> {
        self.record("read:launch-template");
        if self.state.lock().unwrap().templates.contains_key(name) {
            Ok("lt-1".to_string())
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_launch_template(&self, name: &str) -> Result<()> {
        self.record("delete:launch-template");
        self.state
            .lock()
            .unwrap()
            .templates
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_auto_scaling_group(&self, spec: &GroupSpec) -> Result<()> {
        self.record("create:group");
        assert_eq!(spec.subnets, vec!["subnet-a", "subnet-b"]);
        let mut state = self.state.lock().unwrap();
        if !state.templates.contains_key(&spec.launch_template) {
            return Err(CloudError::Api("launch template missing".to_string()));
        }
        if state.groups.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        state.groups.insert(spec.name.clone(), 0);
        Ok(())
    }

    async fn describe_auto_scaling_group(&self, name: &str) -> Result<GroupInfo> {
        self.record("read:group");
        let desired = self
            .state
            .lock()
            .unwrap()
            .groups
            .get(name)
            .copied()
            .ok_or_else(|| not_found(name))?;
        Ok(GroupInfo {
            desired_capacity: desired,
            instances: (0..desired)
                .map(|n| GroupInstance {
                    id: format!("i-{n}"),
                    lifecycle_state: "InService".to_string(),
                    health_status: "Healthy".to_string(),
                })
                .collect(),
        })
    }

    async fn set_desired_capacity(&self, name: &str, desired: u16) -> Result<()> {
        self.record(format!("update:group:{desired}"));
        let mut state = self.state.lock().unwrap();
        let group = state.groups.get_mut(name).ok_or_else(|| not_found(name))?;
        *group = desired;
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, name: &str) -> Result<()> {
        self.record("delete:group");
        self.state
            .lock()
            .unwrap()
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn scaling_activities(&self, _name: &str) -> Result<Vec<Event>> {
        Ok(Vec::new())
    }

    async fn instance_addresses(&self, instance_ids: &[String]) -> Result<Vec<IpAddr>> {
        Ok((0..instance_ids.len())
            .map(|n| IpAddr::V4(Ipv4Addr::new(192, 0, 2, n as u8 + 1)))
            .collect())
    }
}

/// Position of the first call equal to `call`
pub fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}
