//! az CLI client
//!
//! With service principal credentials the client logs in once, lazily, into a
//! private `AZURE_CONFIG_DIR` so the user's own `az` session is left alone.
//! Without them it relies on whatever session `az` already has.

use crate::api::{AzApi, Direction, ScaleSetInfo, ScaleSetInstance, ScaleSetSpec, SecurityRule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::OnceCell;
use taskfleet_cloud::{Cloud, CloudError, CommandRunner, Event, Result, StorageCredentials};

pub const CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const TENANT_ID: &str = "AZURE_TENANT_ID";

const NOT_FOUND: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "ContainerNotFound",
    "NotFound",
    "could not be found",
    "was not found",
];

const ALREADY_EXISTS: &[&str] = &["AlreadyExists", "already exists"];

const UNAUTHORIZED: &[&str] = &[
    "AADSTS",
    "Please run 'az login'",
    "AuthorizationFailed",
    "InvalidAuthenticationToken",
];

const ADDRESS_SPACE: &str = "10.0.0.0/16";

struct ServicePrincipal {
    client_id: String,
    client_secret: String,
    tenant_id: String,
    subscription_id: String,
}

/// `az` wrapper bound to one location
pub struct AzCli {
    runner: CommandRunner,
    location: String,
    principal: Option<ServicePrincipal>,
    login: OnceCell<()>,
    _config_dir: Option<TempDir>,
}

impl AzCli {
    pub fn new(cloud: &Cloud) -> Result<Self> {
        let mut runner = CommandRunner::new("az")
            .with_args(["--output", "json", "--only-show-errors"])
            .with_envs(&cloud.credentials);

        let principal = match (
            cloud.credential(CLIENT_ID),
            cloud.credential(CLIENT_SECRET),
            cloud.credential(TENANT_ID),
            cloud.credential(SUBSCRIPTION_ID),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id), Some(subscription_id)) => {
                Some(ServicePrincipal {
                    client_id,
                    client_secret,
                    tenant_id,
                    subscription_id,
                })
            }
            _ => None,
        };
        let config_dir = match principal {
            Some(_) => {
                let dir = TempDir::new()?;
                runner = runner.with_env("AZURE_CONFIG_DIR", dir.path().to_string_lossy());
                Some(dir)
            }
            None => None,
        };

        Ok(Self {
            runner,
            location: cloud.native_region(),
            principal,
            login: OnceCell::new(),
            _config_dir: config_dir,
        })
    }

    async fn ensure_login(&self) -> Result<()> {
        self.login
            .get_or_try_init(|| async {
                let Some(principal) = &self.principal else {
                    return Ok(());
                };
                tracing::debug!("Logging in to Azure as {}", principal.client_id);
                self.runner
                    .run(&[
                        "login",
                        "--service-principal",
                        "--username",
                        &principal.client_id,
                        "--password",
                        &principal.client_secret,
                        "--tenant",
                        &principal.tenant_id,
                    ])
                    .await
                    .map_err(classify)?;
                self.runner
                    .run(&["account", "set", "--subscription", &principal.subscription_id])
                    .await
                    .map_err(classify)?;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn call(&self, args: &[&str]) -> Result<String> {
        self.ensure_login().await?;
        self.runner.run(args).await.map_err(classify)
    }

    async fn call_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.call(args).await?;
        Ok(serde_json::from_str(&output)?)
    }

    async fn call_owned(&self, args: &[String]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.call(&args).await
    }
}

/// Map az errors to the shared error taxonomy
pub fn classify(err: CloudError) -> CloudError {
    let (program, stderr) = match err {
        CloudError::CommandFailed { program, stderr } => (program, stderr),
        other => return other,
    };
    if UNAUTHORIZED.iter().any(|marker| stderr.contains(marker)) {
        CloudError::AuthenticationFailed(stderr)
    } else if NOT_FOUND.iter().any(|marker| stderr.contains(marker)) {
        CloudError::NotFound(stderr)
    } else if ALREADY_EXISTS.iter().any(|marker| stderr.contains(marker)) {
        CloudError::AlreadyExists(stderr)
    } else {
        CloudError::CommandFailed { program, stderr }
    }
}

fn tag_args(tags: &BTreeMap<String, String>) -> Vec<String> {
    if tags.is_empty() {
        return Vec::new();
    }
    std::iter::once("--tags".to_string())
        .chain(tags.iter().map(|(key, value)| format!("{key}={value}")))
        .collect()
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

#[derive(Deserialize)]
struct Id {
    id: String,
}

#[derive(Deserialize)]
struct Deleted {
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    name: String,
    #[serde(default)]
    provisioning_state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIp {
    ip_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityEntry {
    event_timestamp: DateTime<Utc>,
    status: LocalizedValue,
    operation_name: LocalizedValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalizedValue {
    #[serde(default)]
    value: String,
    #[serde(default)]
    localized_value: String,
}

fn activity_events(entries: Vec<ActivityEntry>) -> Vec<Event> {
    entries
        .into_iter()
        .map(|entry| Event {
            time: entry.event_timestamp,
            code: entry.status.value,
            description: vec![entry.operation_name.localized_value],
        })
        .collect()
}

#[async_trait]
impl AzApi for AzCli {
    fn location(&self) -> &str {
        &self.location
    }

    async fn create_resource_group(&self, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut args = owned(&["group", "create", "--name", name, "--location", &self.location]);
        args.extend(tag_args(tags));
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn show_resource_group(&self, name: &str) -> Result<()> {
        self.call(&["group", "show", "--name", name]).await?;
        Ok(())
    }

    async fn delete_resource_group(&self, name: &str) -> Result<()> {
        self.call(&["group", "delete", "--name", name, "--yes"]).await?;
        Ok(())
    }

    async fn list_resource_groups(&self) -> Result<Vec<String>> {
        self.call_json(&["group", "list", "--query", "[].name"]).await
    }

    async fn create_storage_account(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut args = owned(&[
            "storage",
            "account",
            "create",
            "--resource-group",
            group,
            "--name",
            name,
            "--location",
            &self.location,
            "--sku",
            "Standard_LRS",
            "--kind",
            "StorageV2",
        ]);
        args.extend(tag_args(tags));
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn storage_account_key(&self, group: &str, name: &str) -> Result<String> {
        let key: Option<String> = self
            .call_json(&[
                "storage",
                "account",
                "keys",
                "list",
                "--resource-group",
                group,
                "--account-name",
                name,
                "--query",
                "[0].value",
            ])
            .await?;
        key.ok_or_else(|| CloudError::NotFound(format!("keys of storage account {name}")))
    }

    async fn delete_storage_account(&self, group: &str, name: &str) -> Result<()> {
        self.call(&["storage", "account", "delete", "--resource-group", group, "--name", name, "--yes"])
            .await?;
        Ok(())
    }

    async fn create_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        self.call(&[
            "storage",
            "container",
            "create",
            "--name",
            name,
            "--account-name",
            account,
            "--account-key",
            key,
        ])
        .await?;
        Ok(())
    }

    async fn show_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        self.call(&[
            "storage",
            "container",
            "show",
            "--name",
            name,
            "--account-name",
            account,
            "--account-key",
            key,
        ])
        .await?;
        Ok(())
    }

    async fn delete_container(&self, account: &str, key: &str, name: &str) -> Result<()> {
        let deleted: Deleted = self
            .call_json(&[
                "storage",
                "container",
                "delete",
                "--name",
                name,
                "--account-name",
                account,
                "--account-key",
                key,
            ])
            .await?;
        if !deleted.deleted {
            return Err(CloudError::NotFound(format!("container {name}")));
        }
        Ok(())
    }

    async fn storage_credentials(&self, account: &str, key: &str, container: &str) -> Result<StorageCredentials> {
        let remote = taskfleet_storage::with_options(
            &format!("az://{container}"),
            [("account_name", account), ("access_key", key)],
        )?;
        let mut env = BTreeMap::from([
            ("AZURE_STORAGE_ACCOUNT".to_string(), account.to_string()),
            ("AZURE_STORAGE_KEY".to_string(), key.to_string()),
        ]);
        if let Some(principal) = &self.principal {
            env.extend([
                (CLIENT_ID.to_string(), principal.client_id.clone()),
                (CLIENT_SECRET.to_string(), principal.client_secret.clone()),
                (TENANT_ID.to_string(), principal.tenant_id.clone()),
                (SUBSCRIPTION_ID.to_string(), principal.subscription_id.clone()),
            ]);
        }
        Ok(StorageCredentials { remote, env })
    }

    async fn create_virtual_network(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut args = owned(&[
            "network",
            "vnet",
            "create",
            "--resource-group",
            group,
            "--name",
            name,
            "--location",
            &self.location,
            "--address-prefixes",
            ADDRESS_SPACE,
        ]);
        args.extend(tag_args(tags));
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn show_virtual_network(&self, group: &str, name: &str) -> Result<()> {
        self.call(&["network", "vnet", "show", "--resource-group", group, "--name", name])
            .await?;
        Ok(())
    }

    async fn delete_virtual_network(&self, group: &str, name: &str) -> Result<()> {
        self.call(&["network", "vnet", "delete", "--resource-group", group, "--name", name])
            .await?;
        Ok(())
    }

    async fn create_security_group(&self, group: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut args = owned(&[
            "network",
            "nsg",
            "create",
            "--resource-group",
            group,
            "--name",
            name,
            "--location",
            &self.location,
        ]);
        args.extend(tag_args(tags));
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn create_security_rule(&self, group: &str, security_group: &str, rule: &SecurityRule) -> Result<()> {
        let (direction, nets_flag) = match rule.direction {
            Direction::Inbound => ("Inbound", "--source-address-prefixes"),
            Direction::Outbound => ("Outbound", "--destination-address-prefixes"),
        };
        let priority = rule.priority.to_string();
        let mut args = owned(&[
            "network",
            "nsg",
            "rule",
            "create",
            "--resource-group",
            group,
            "--nsg-name",
            security_group,
            "--name",
            &rule.name,
            "--priority",
            &priority,
            "--direction",
            direction,
            "--access",
            if rule.allow { "Allow" } else { "Deny" },
            "--protocol",
            "*",
            nets_flag,
        ]);
        if rule.rule.nets.is_empty() {
            args.push("*".to_string());
        } else {
            args.extend(rule.rule.nets.iter().cloned());
        }
        args.push("--destination-port-ranges".to_string());
        if rule.rule.ports.is_empty() {
            args.push("*".to_string());
        } else {
            args.extend(rule.rule.ports.iter().map(u16::to_string));
        }
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn show_security_group(&self, group: &str, name: &str) -> Result<String> {
        let nsg: Id = self
            .call_json(&["network", "nsg", "show", "--resource-group", group, "--name", name])
            .await?;
        Ok(nsg.id)
    }

    async fn delete_security_group(&self, group: &str, name: &str) -> Result<()> {
        self.call(&["network", "nsg", "delete", "--resource-group", group, "--name", name])
            .await?;
        Ok(())
    }

    async fn create_subnet(&self, group: &str, network: &str, name: &str, security_group: &str) -> Result<()> {
        self.call(&[
            "network",
            "vnet",
            "subnet",
            "create",
            "--resource-group",
            group,
            "--vnet-name",
            network,
            "--name",
            name,
            "--address-prefixes",
            ADDRESS_SPACE,
            "--network-security-group",
            security_group,
        ])
        .await?;
        Ok(())
    }

    async fn show_subnet(&self, group: &str, network: &str, name: &str) -> Result<String> {
        let subnet: Id = self
            .call_json(&[
                "network",
                "vnet",
                "subnet",
                "show",
                "--resource-group",
                group,
                "--vnet-name",
                network,
                "--name",
                name,
            ])
            .await?;
        Ok(subnet.id)
    }

    async fn delete_subnet(&self, group: &str, network: &str, name: &str) -> Result<()> {
        self.call(&[
            "network",
            "vnet",
            "subnet",
            "delete",
            "--resource-group",
            group,
            "--vnet-name",
            network,
            "--name",
            name,
        ])
        .await?;
        Ok(())
    }

    async fn create_scale_set(&self, spec: &ScaleSetSpec) -> Result<()> {
        let mut custom_data = NamedTempFile::new()?;
        custom_data.write_all(spec.custom_data.as_bytes())?;
        let custom_data_path = custom_data.path().to_string_lossy().to_string();
        let disk_size = spec.disk_size.to_string();

        let mut args = owned(&[
            "vmss",
            "create",
            "--resource-group",
            &spec.group,
            "--name",
            &spec.name,
            "--location",
            &self.location,
            "--image",
            &spec.image,
            "--vm-sku",
            &spec.size,
            "--instance-count",
            "0",
            "--admin-username",
            &spec.admin_user,
            "--ssh-key-values",
            &spec.public_key,
            "--custom-data",
            &custom_data_path,
            "--subnet",
            &spec.subnet_id,
            "--os-disk-size-gb",
            &disk_size,
            "--public-ip-per-vm",
            "--upgrade-policy-mode",
            "Manual",
            "--lb",
            "",
        ]);
        if !spec.identities.is_empty() {
            args.push("--assign-identity".to_string());
            args.extend(spec.identities.iter().cloned());
        }
        if !spec.spot.is_on_demand() {
            let price = spec
                .spot
                .max_price()
                .map_or_else(|| "-1".to_string(), |price| format!("{price:.5}"));
            args.extend(owned(&[
                "--priority",
                "Spot",
                "--eviction-policy",
                "Delete",
                "--max-price",
                &price,
            ]));
        }
        args.extend(tag_args(&spec.tags));
        self.call_owned(&args).await?;
        Ok(())
    }

    async fn show_scale_set(&self, group: &str, name: &str) -> Result<ScaleSetInfo> {
        let capacity: u16 = self
            .call_json(&[
                "vmss",
                "show",
                "--resource-group",
                group,
                "--name",
                name,
                "--query",
                "sku.capacity",
            ])
            .await?;
        let instances: Vec<Instance> = self
            .call_json(&["vmss", "list-instances", "--resource-group", group, "--name", name])
            .await?;
        let addresses: Vec<PublicIp> = self
            .call_json(&[
                "vmss",
                "list-instance-public-ips",
                "--resource-group",
                group,
                "--name",
                name,
            ])
            .await?;
        Ok(ScaleSetInfo {
            capacity,
            instances: instances
                .into_iter()
                .map(|instance| ScaleSetInstance {
                    name: instance.name,
                    provisioning_state: instance.provisioning_state,
                })
                .collect(),
            addresses: addresses
                .into_iter()
                .filter_map(|ip| ip.ip_address?.parse::<IpAddr>().ok())
                .collect(),
        })
    }

    async fn scale(&self, group: &str, name: &str, capacity: u16) -> Result<()> {
        let capacity = capacity.to_string();
        self.call(&[
            "vmss",
            "scale",
            "--resource-group",
            group,
            "--name",
            name,
            "--new-capacity",
            &capacity,
        ])
        .await?;
        Ok(())
    }

    async fn delete_scale_set(&self, group: &str, name: &str) -> Result<()> {
        self.call(&["vmss", "delete", "--resource-group", group, "--name", name])
            .await?;
        Ok(())
    }

    async fn activity(&self, group: &str) -> Result<Vec<Event>> {
        let entries: Vec<ActivityEntry> = self
            .call_json(&[
                "monitor",
                "activity-log",
                "list",
                "--resource-group",
                group,
                "--offset",
                "1h",
            ])
            .await?;
        Ok(activity_events(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CloudError {
        CloudError::CommandFailed {
            program: "az".into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_classify() {
        assert!(classify(failed("(ResourceGroupNotFound) Resource group 'tfl-x' could not be found."))
            .is_not_found());
        assert!(classify(failed("(ContainerNotFound) The specified container does not exist."))
            .is_not_found());
        assert!(matches!(
            classify(failed("AADSTS7000215: Invalid client secret provided.")),
            CloudError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify(failed("(QuotaExceeded) Operation could not be completed")),
            CloudError::CommandFailed { .. }
        ));
    }

    #[test]
    fn test_tag_args() {
        let tags = BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        assert_eq!(tag_args(&tags), vec!["--tags", "a=1", "b=2"]);
        assert!(tag_args(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_activity_events() {
        let entries: Vec<ActivityEntry> = serde_json::from_str(
            r#"[{
                "eventTimestamp": "2024-05-01T10:00:00Z",
                "status": {"value": "Succeeded", "localizedValue": "Succeeded"},
                "operationName": {"value": "Microsoft.Compute/virtualMachineScaleSets/write", "localizedValue": "Create or Update Virtual Machine Scale Set"}
            }]"#,
        )
        .unwrap();

        let events = activity_events(entries);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "Succeeded");
        assert_eq!(
            events[0].description,
            vec!["Create or Update Virtual Machine Scale Set"]
        );
    }
}
