//! Persistent volume shared by every pod of the task

use crate::api::{Kind, KubernetesApi};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use taskfleet_cloud::{CloudError, Resource, Result, Slot, ignore_not_found};

static DIRECTORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]+):(\d+)(?::(.+))?$").expect("directory pattern is valid")
});

/// `storageClass:sizeGiB[:path]` directory specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// `None` uses the cluster default storage class
    pub storage_class: Option<String>,
    pub size_gib: u32,
    /// Local directory synchronized with the volume, empty for none
    pub directory: String,
}

impl VolumeSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Ok(Self {
                storage_class: None,
                size_gib: 1,
                directory: String::new(),
            });
        }
        let captures = DIRECTORY.captures(spec).ok_or_else(|| {
            CloudError::Validation(format!(
                "invalid directory {spec}: expected storageClass:sizeGiB[:path]"
            ))
        })?;
        let size_gib = captures[2]
            .parse()
            .map_err(|_| CloudError::Validation(format!("invalid volume size in {spec}")))?;
        Ok(Self {
            storage_class: Some(captures[1].to_string()),
            size_gib,
            directory: captures
                .get(3)
                .map(|path| path.as_str().to_string())
                .unwrap_or_default(),
        })
    }
}

pub struct PersistentVolumeClaim {
    client: Arc<dyn KubernetesApi>,
    pub name: String,
    spec: VolumeSpec,
    /// Several pods mount the volume at once
    shared: bool,
    labels: BTreeMap<String, String>,
    pub phase: Slot<String>,
}

impl PersistentVolumeClaim {
    pub fn new(
        client: Arc<dyn KubernetesApi>,
        name: String,
        spec: VolumeSpec,
        shared: bool,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            name,
            spec,
            shared,
            labels,
            phase: Slot::new("persistent volume claim"),
        }
    }

    pub fn manifest(&self) -> Value {
        let access_mode = if self.shared {
            "ReadWriteMany"
        } else {
            "ReadWriteOnce"
        };
        let mut spec = json!({
            "accessModes": [access_mode],
            "resources": {"requests": {"storage": format!("{}Gi", self.spec.size_gib)}},
        });
        if let Some(class) = &self.spec.storage_class {
            spec["storageClassName"] = json!(class);
        }
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": self.name,
                "namespace": self.client.namespace(),
                "labels": self.labels,
            },
            "spec": spec,
        })
    }
}

#[async_trait]
impl Resource for PersistentVolumeClaim {
    async fn create(&self) -> Result<()> {
        match self.client.create(&self.manifest()).await {
            Err(err) if !err.is_already_exists() => return Err(err),
            _ => {}
        }
        self.read().await
    }

    async fn read(&self) -> Result<()> {
        let claim = self.client.get_claim(&self.name).await?;
        self.phase.set(claim.phase);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        ignore_not_found(
            self.client
                .delete(Kind::PersistentVolumeClaim, &self.name)
                .await,
        )?;
        self.phase.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_specs() {
        assert_eq!(
            VolumeSpec::parse("").unwrap(),
            VolumeSpec {
                storage_class: None,
                size_gib: 1,
                directory: String::new()
            }
        );
        assert_eq!(
            VolumeSpec::parse("standard:10").unwrap(),
            VolumeSpec {
                storage_class: Some("standard".into()),
                size_gib: 10,
                directory: String::new()
            }
        );
        let spec = VolumeSpec::parse("nfs:5:/home/user/work:dir").unwrap();
        assert_eq!(spec.directory, "/home/user/work:dir");
        assert_eq!(spec.size_gib, 5);

        assert!(VolumeSpec::parse("./data").unwrap_err().is_validation());
        assert!(VolumeSpec::parse("standard:big").unwrap_err().is_validation());
    }
}
