//! In-memory Azure double with local directories standing in for containers

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskfleet_cloud::{CloudError, Event, Result, StorageCredentials};
use taskfleet_cloud_az::api::{AzApi, ScaleSetInfo, ScaleSetInstance, ScaleSetSpec, SecurityRule};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    groups: BTreeSet<String>,
    accounts: BTreeSet<String>,
    containers: BTreeSet<String>,
    networks: BTreeSet<String>,
    security_groups: BTreeMap<String, Vec<SecurityRule>>,
    subnets: BTreeSet<String>,
    scale_sets: BTreeMap<String, (ScaleSetSpec, u16)>,
}

pub struct FakeAz {
    root: PathBuf,
    state: Mutex<State>,
}

fn not_found(what: &str) -> CloudError {
    CloudError::NotFound(format!("(ResourceNotFound) '{what}' could not be found"))
}

fn key_of(account: &str) -> String {
    format!("key-{account}")
}

impl FakeAz {
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

    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn capacity(&self, scale_set: &str) -> Option<u16> {
        self.state
            .lock()
            .unwrap()
            .scale_sets
            .get(scale_set)
            .map(|(_, capacity)| *capacity)
    }

    pub fn scale_set(&self, name: &str) -> Option<ScaleSetSpec> {
        self.state
            .lock()
            .unwrap()
            .scale_sets
            .get(name)
            .map(|(spec, _)| spec.clone())
    }

    pub fn security_rules(&self, name: &str) -> Vec<SecurityRule> {
        self.state
            .lock()
            .unwrap()
            .security_groups
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_group(&self, name: &str) {
        self.state.lock().unwrap().groups.insert(name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.groups.is_empty()
            && state.accounts.is_empty()
            && state.containers.is_empty()
            && state.networks.is_empty()
            && state.security_groups.is_empty()
            && state.subnets.is_empty()
            && state.scale_sets.is_empty()
    }

    fn require_group(&self, group: &str) -> Result<()> {
        if self.state.lock().unwrap().groups.contains(group) {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!(
                "(ResourceGroupNotFound) Resource group '{group}' could not be found."
            )))
        }
    }

    fn check_key(&self, account: &str, key: &str) {
        assert_eq!(key, key_of(account), "wrong access key for {account}");
    }
}

fn insert(set: &mut BTreeSet<String>, name: &str) -> Result<()> {
    if set.insert(name.to_string()) {
        Ok(())
    } else {
        Err(CloudError::AlreadyExists(name.to_string()))
    }
}

fn contains(set: &BTreeSet<String>, name: &str) -> Result<()> {
    if set.contains(name) {
        Ok(())
    } else {
        Err(not_found(name))
    }
}

fn remove(set: &mut BTreeSet<String>, name: &str) -> Result<()> {
    if set.remove(name) {
        Ok(())
    } else {
        Err(not_found(name))
    }
}

#[async_trait]
impl AzApi for FakeAz {
    fn location(&self) -> &str {
        "westus2"
    }

    async fn create_resource_group(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.record("create:group");
        assert_eq!(tags.get("taskfleet").map(String::as_str), Some(name));
        insert(&mut self.state.lock().unwrap().groups, name)
    }

    async fn show_resource_group(&self, name: &str) -> Result<()> {
        self.record("read:group");
        self.require_group(name)
    }

    async fn delete_resource_group(&self, name: &str) -> Result<()> {
        self.record("delete:group");
        self.require_group(name)?;
        remove(&mut self.state.lock().unwrap().groups, name)
    }

    async fn list_resource_groups(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().groups.iter().cloned().collect())
    }

    async fn create_storage_account(&self, group: &str, name: &str, _tags: &BTreeMap<String, String>) -> Result<()> {
        self.record("create:account");
        self.require_group(group)?;
        assert!(name.len() <= 24 && name.chars().all(|c| c.is_ascii_alphanumeric()));
        insert(&mut self.state.lock().unwrap().accounts, name)
    }

    async fn storage_account_key(&self, group: &str, name: &str) -> Result<String> {
        self.record("read:account");
        self.require_group(group)?;
        contains(&self.state.lock().unwrap().accounts, name)?;
        Ok(key_of(name))
    }

    async fn delete_storage_account(&self, group: &str, name: &str) -> Result<()> {
        self.record("delete:account");
        self.require_group(group)?;
        remove(&mut self.state.lock().unwrap().accounts, name)
    }

    async fn create_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        self.record("create:container");
        self.check_key(account, key);
        insert(&mut self.state.lock().unwrap().containers, name)?;
        std::fs::create_dir_all(self.container_dir(name))?;
        Ok(())
    }

    async fn show_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        self.record("read:container");
        self.check_key(account, key);
        contains(&self.state.lock().unwrap().containers, name)
    }

    async fn delete_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        self.record("delete:container");
        self.check_key(account, key);
        remove(&mut self.state.lock().unwrap().containers, name)?;
        let dir = self.container_dir(name);
        if dir.exists() {
            std::fs::remove_dir(&dir)
                .map_err(|e| CloudError::Api(format!("container not empty: {e}")))?;
        }
        Ok(())
    }

    async fn storage_credentials(&self, account: &str, key: &str, container: &str) -> Result<StorageCredentials> {
        self.record("read:credentials");
        self.check_key(account, key);
        Ok(StorageCredentials {
            remote: self.container_dir(container).to_string_lossy().to_string(),
            env: BTreeMap::from([
                ("AZURE_STORAGE_ACCOUNT".to_string(), account.to_string()),
                ("AZURE_STORAGE_KEY".to_string(), key.to_string()),
            ]),
        })
    }

    async fn create_virtual_network(&self, group: &str, name: &str, _tags: &BTreeMap<String, String>) -> Result<()> {
        self.record("create:network");
        self.require_group(group)?;
        insert(&mut self.state.lock().unwrap().networks, name)
    }

    async fn show_virtual_network(&self, group: &str, name: &str) -> Result<()> {
        self.record("read:network");
        self.require_group(group)?;
        contains(&self.state.lock().unwrap().networks, name)
    }

    async fn delete_virtual_network(&self, group: &str, name: &str) -> Result<()> {
        self.record("delete:network");
        self.require_group(group)?;
        remove(&mut self.state.lock().unwrap().networks, name)
    }

    async fn create_security_group(&self, group: &str, name: &str, _tags: &BTreeMap<String, String>) -> Result<()> {
        self.record("create:security_group");
        self.require_group(group)?;
        let mut state = self.state.lock().unwrap();
        if state.security_groups.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        state.security_groups.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn create_security_rule(&self, _group: &str, security_group: &str, rule: &SecurityRule) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let rules = state
            .security_groups
            .get_mut(security_group)
            .ok_or_else(|| not_found(security_group))?;
        rules.push(rule.clone());
        Ok(())
    }

    async fn show_security_group(&self, group: &str, name: &str) -> Result<String> {
        self.record("read:security_group");
        self.require_group(group)?;
        if self.state.lock().unwrap().security_groups.contains_key(name) {
            Ok(format!("/subscriptions/0000/resourceGroups/{group}/providers/Microsoft.Network/networkSecurityGroups/{name}"))
        } else {
            Err(not_found(name))
        }
    }

    async fn delete_security_group(&self, group: &str, name: &str) -> Result<()> {
        self.record("delete:security_group");
        self.require_group(group)?;
        self.state
            .lock()
            .unwrap()
            .security_groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_subnet(&self, group: &str, network: &str, name: &str, security_group: &str) -> Result<()> {
        self.record("create:subnet");
        self.require_group(group)?;
        assert!(security_group.ends_with(&format!("/networkSecurityGroups/{name}")));
        contains(&self.state.lock().unwrap().networks, network)?;
        insert(&mut self.state.lock().unwrap().subnets, name)
    }

    async fn show_subnet(&self, group: &str, network: &str, name: &str) -> Result<String> {
        self.record("read:subnet");
        self.require_group(group)?;
        contains(&self.state.lock().unwrap().subnets, name)?;
        Ok(format!("/subscriptions/0000/resourceGroups/{group}/providers/Microsoft.Network/virtualNetworks/{network}/subnets/{name}"))
    }

    async fn delete_subnet(&self, group: &str, _network: &str, name: &str) -> Result<()> {
        self.record("delete:subnet");
        self.require_group(group)?;
        remove(&mut self.state.lock().unwrap().subnets, name)
    }

    async fn create_scale_set(&self, spec: &ScaleSetSpec) -> Result<()> {
        self.record("create:scale_set");
        self.require_group(&spec.group)?;
        let mut state = self.state.lock().unwrap();
        if state.scale_sets.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        state.scale_sets.insert(spec.name.clone(), (spec.clone(), 0));
        Ok(())
    }

    async fn show_scale_set(&self, group: &str, name: &str) -> Result<ScaleSetInfo> {
        self.record("read:scale_set");
        self.require_group(group)?;
        let capacity = self.capacity(name).ok_or_else(|| not_found(name))?;
        Ok(ScaleSetInfo {
            capacity,
            instances: (0..capacity)
                .map(|n| ScaleSetInstance {
                    name: format!("{name}_{n}"),
                    provisioning_state: "Succeeded".to_string(),
                })
                .collect(),
            addresses: (0..capacity)
                .map(|n| IpAddr::V4(Ipv4Addr::new(203, 0, 113, n as u8 + 1)))
                .collect(),
        })
    }

    async fn scale(&self, group: &str, name: &str, capacity: u16) -> Result<()> {
        self.record(format!("update:scale_set:{capacity}"));
        self.require_group(group)?;
        let mut state = self.state.lock().unwrap();
        let (_, current) = state.scale_sets.get_mut(name).ok_or_else(|| not_found(name))?;
        *current = capacity;
        Ok(())
    }

    async fn delete_scale_set(&self, group: &str, name: &str) -> Result<()> {
        self.record("delete:scale_set");
        self.require_group(group)?;
        self.state
            .lock()
            .unwrap()
            .scale_sets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn activity(&self, _group: &str) -> Result<Vec<Event>> {
        Ok(Vec::new())
    }
}

pub fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}
