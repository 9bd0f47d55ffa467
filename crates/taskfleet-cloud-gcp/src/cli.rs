//! gcloud CLI client
//!
//! Service account credentials arrive as JSON in
//! `GOOGLE_APPLICATION_CREDENTIALS_DATA`; the client writes them to a private
//! temporary file and points `gcloud` at it for the lifetime of the client.

use crate::api::{Direction, FirewallSpec, GcpApi, GroupInfo, GroupInstance, InstanceTemplateSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use tempfile::NamedTempFile;
use taskfleet_cloud::{Cloud, CloudError, CommandRunner, Event, FirewallRule, Result, StorageCredentials};

pub const CREDENTIALS_VARIABLE: &str = "GOOGLE_APPLICATION_CREDENTIALS_DATA";

const NOT_FOUND: &[&str] = &["was not found", "HTTPError 404", "does not exist", "notFound"];

const ALREADY_EXISTS: &[&str] = &["already exists", "HTTPError 409", "alreadyExists"];

const UNAUTHORIZED: &[&str] = &[
    "HTTPError 401",
    "You do not currently have an active account",
    "Reauthentication required",
    "invalid_grant",
];

/// `gcloud` wrapper bound to one zone
pub struct GcloudCli {
    runner: CommandRunner,
    zone: String,
    credentials: String,
    _key_file: Option<NamedTempFile>,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    project_id: String,
}

impl GcloudCli {
    pub fn new(cloud: &Cloud) -> Result<Self> {
        let zone = cloud.native_region();
        let credentials = cloud.credential(CREDENTIALS_VARIABLE).unwrap_or_default();
        let mut runner = CommandRunner::new("gcloud")
            .with_args(["--format", "json", "--quiet"])
            .with_envs(&cloud.credentials);

        let key_file = if credentials.is_empty() {
            None
        } else {
            let key: ServiceAccountKey = serde_json::from_str(&credentials).map_err(|e| {
                CloudError::AuthenticationFailed(format!("invalid {CREDENTIALS_VARIABLE}: {e}"))
            })?;
            let mut file = NamedTempFile::new()?;
            file.write_all(credentials.as_bytes())?;
            runner = runner
                .with_args(["--project", key.project_id.as_str()])
                .with_env(
                    "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE",
                    file.path().to_string_lossy(),
                );
            Some(file)
        };

        Ok(Self {
            runner,
            zone,
            credentials,
            _key_file: key_file,
        })
    }

    /// Region holding the client's zone
    pub fn region(&self) -> &str {
        zone_region(&self.zone)
    }

    async fn call(&self, args: &[&str]) -> Result<String> {
        self.runner.run(args).await.map_err(classify)
    }

    async fn call_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.call(args).await?;
        Ok(serde_json::from_str(&output)?)
    }
}

/// `us-west1-b` → `us-west1`
pub fn zone_region(zone: &str) -> &str {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if suffix.len() == 1 => region,
        _ => zone,
    }
}

/// Map gcloud errors to the shared error taxonomy
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

/// Labels only allow lowercase letters, digits, `-` and `_`
fn label(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(63)
        .collect()
}

fn firewall_rules(rule: &FirewallRule) -> String {
    if rule.ports.is_empty() {
        return "all".to_string();
    }
    rule.ports
        .iter()
        .flat_map(|port| [format!("tcp:{port}"), format!("udp:{port}")])
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelfLink {
    self_link: String,
}

#[derive(Deserialize)]
struct Bucket {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceGroup {
    target_size: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedInstance {
    instance: String,
    #[serde(default)]
    instance_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    name: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    nat_i_p: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceError {
    timestamp: DateTime<Utc>,
    error: ErrorDetail,
    #[serde(default)]
    instance_action_details: Option<ActionDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ActionDetail {
    #[serde(default)]
    action: String,
}

fn instance_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn group_instances(members: Vec<ManagedInstance>, instances: Vec<Instance>) -> Vec<GroupInstance> {
    let addresses: BTreeMap<String, Option<IpAddr>> = instances
        .into_iter()
        .map(|instance| {
            let address = instance
                .network_interfaces
                .iter()
                .flat_map(|interface| &interface.access_configs)
                .find_map(|config| config.nat_i_p.as_deref()?.parse::<IpAddr>().ok());
            (instance.name, address)
        })
        .collect();

    members
        .into_iter()
        .map(|member| {
            let name = instance_name(&member.instance).to_string();
            GroupInstance {
                address: addresses.get(&name).copied().flatten(),
                name,
                status: member.instance_status,
            }
        })
        .collect()
}

#[async_trait]
impl GcpApi for GcloudCli {
    async fn default_network(&self) -> Result<String> {
        let network: SelfLink = self
            .call_json(&["compute", "networks", "describe", "default"])
            .await?;
        Ok(network.self_link)
    }

    async fn find_image(&self, project: &str, family: &str) -> Result<String> {
        let image: SelfLink = self
            .call_json(&[
                "compute",
                "images",
                "describe-from-family",
                family,
                "--project",
                project,
            ])
            .await?;
        Ok(image.self_link)
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        let url = format!("gs://{name}");
        self.call(&[
            "storage",
            "buckets",
            "create",
            &url,
            "--location",
            self.region(),
            "--uniform-bucket-level-access",
        ])
        .await?;
        Ok(())
    }

    async fn describe_bucket(&self, name: &str) -> Result<()> {
        let url = format!("gs://{name}");
        self.call(&["storage", "buckets", "describe", &url]).await?;
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let url = format!("gs://{name}");
        self.call(&["storage", "buckets", "delete", &url]).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let buckets: Vec<Bucket> = self.call_json(&["storage", "buckets", "list"]).await?;
        Ok(buckets.into_iter().map(|bucket| bucket.name).collect())
    }

    async fn storage_credentials(&self, bucket: &str) -> Result<StorageCredentials> {
        if self.credentials.is_empty() {
            return Err(CloudError::AuthenticationFailed(format!(
                "{CREDENTIALS_VARIABLE} is not set"
            )));
        }
        let remote = taskfleet_storage::with_options(
            &format!("gs://{bucket}"),
            [("service_account_key", self.credentials.as_str())],
        )?;
        Ok(StorageCredentials {
            remote,
            env: BTreeMap::from([(CREDENTIALS_VARIABLE.to_string(), self.credentials.clone())]),
        })
    }

    async fn create_firewall(&self, spec: &FirewallSpec) -> Result<()> {
        let rules = firewall_rules(&spec.rule);
        let nets = if spec.rule.nets.is_empty() {
            "0.0.0.0/0".to_string()
        } else {
            spec.rule.nets.join(",")
        };
        let ranges = match spec.direction {
            Direction::Ingress => "--source-ranges",
            Direction::Egress => "--destination-ranges",
        };
        self.call(&[
            "compute",
            "firewall-rules",
            "create",
            &spec.name,
            "--network",
            &spec.network,
            "--direction",
            spec.direction.as_str(),
            "--action",
            "ALLOW",
            "--rules",
            &rules,
            ranges,
            &nets,
            "--target-tags",
            &spec.target_tag,
        ])
        .await?;
        Ok(())
    }

    async fn describe_firewall(&self, name: &str) -> Result<()> {
        self.call(&["compute", "firewall-rules", "describe", name])
            .await?;
        Ok(())
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        self.call(&["compute", "firewall-rules", "delete", name])
            .await?;
        Ok(())
    }

    async fn create_instance_template(&self, spec: &InstanceTemplateSpec) -> Result<()> {
        let mut script = NamedTempFile::new()?;
        script.write_all(spec.startup_script.as_bytes())?;
        let script_metadata = format!("startup-script={}", script.path().to_string_lossy());
        let ssh_metadata = format!("ssh-keys={}", spec.ssh_keys);
        let disk_size = format!("{}GB", spec.disk_size);
        let labels = spec
            .labels
            .iter()
            .map(|(key, value)| format!("{}={}", label(key), label(value)))
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec![
            "compute".to_string(),
            "instance-templates".to_string(),
            "create".to_string(),
            spec.name.clone(),
            "--machine-type".to_string(),
            spec.machine_type.clone(),
            "--image".to_string(),
            spec.image.clone(),
            "--boot-disk-size".to_string(),
            disk_size,
            "--network".to_string(),
            spec.network.clone(),
            "--tags".to_string(),
            spec.network_tag.clone(),
            "--metadata-from-file".to_string(),
            script_metadata,
            "--metadata".to_string(),
            ssh_metadata,
        ];
        if !labels.is_empty() {
            args.extend(["--labels".to_string(), labels]);
        }
        if let Some(accelerator) = &spec.accelerator {
            args.extend([
                "--accelerator".to_string(),
                format!("type={},count={}", accelerator.kind, accelerator.count),
                "--maintenance-policy".to_string(),
                "TERMINATE".to_string(),
            ]);
        }
        match &spec.service_account {
            Some(account) => args.extend([
                "--service-account".to_string(),
                account.email.clone(),
                "--scopes".to_string(),
                account.scopes.join(","),
            ]),
            None => args.extend(["--no-service-account".to_string(), "--no-scopes".to_string()]),
        }
        if !spec.spot.is_on_demand() {
            args.extend([
                "--provisioning-model".to_string(),
                "SPOT".to_string(),
                "--instance-termination-action".to_string(),
                "DELETE".to_string(),
            ]);
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.call(&args).await?;
        Ok(())
    }

    async fn describe_instance_template(&self, name: &str) -> Result<String> {
        let template: SelfLink = self
            .call_json(&["compute", "instance-templates", "describe", name])
            .await?;
        Ok(template.self_link)
    }

    async fn delete_instance_template(&self, name: &str) -> Result<()> {
        self.call(&["compute", "instance-templates", "delete", name])
            .await?;
        Ok(())
    }

    async fn create_instance_group(&self, name: &str, template: &str) -> Result<()> {
        self.call(&[
            "compute",
            "instance-groups",
            "managed",
            "create",
            name,
            "--template",
            template,
            "--size",
            "0",
            "--zone",
            &self.zone,
        ])
        .await?;
        Ok(())
    }

    async fn describe_instance_group(&self, name: &str) -> Result<GroupInfo> {
        let group: InstanceGroup = self
            .call_json(&["compute", "instance-groups", "managed", "describe", name, "--zone", &self.zone])
            .await?;
        let members: Vec<ManagedInstance> = self
            .call_json(&[
                "compute",
                "instance-groups",
                "managed",
                "list-instances",
                name,
                "--zone",
                &self.zone,
            ])
            .await?;
        let instances: Vec<Instance> = if members.is_empty() {
            Vec::new()
        } else {
            let filter = format!("name~^{name}-");
            self.call_json(&[
                "compute",
                "instances",
                "list",
                "--filter",
                &filter,
                "--zones",
                &self.zone,
            ])
            .await?
        };
        Ok(GroupInfo {
            target_size: group.target_size,
            instances: group_instances(members, instances),
        })
    }

    async fn resize_instance_group(&self, name: &str, size: u16) -> Result<()> {
        let size = size.to_string();
        self.call(&[
            "compute",
            "instance-groups",
            "managed",
            "resize",
            name,
            "--size",
            &size,
            "--zone",
            &self.zone,
        ])
        .await?;
        Ok(())
    }

    async fn delete_instance_group(&self, name: &str) -> Result<()> {
        self.call(&["compute", "instance-groups", "managed", "delete", name, "--zone", &self.zone])
            .await?;
        Ok(())
    }

    async fn instance_group_errors(&self, name: &str) -> Result<Vec<Event>> {
        let errors: Vec<InstanceError> = self
            .call_json(&[
                "compute",
                "instance-groups",
                "managed",
                "list-errors",
                name,
                "--zone",
                &self.zone,
            ])
            .await?;
        Ok(errors
            .into_iter()
            .map(|error| Event {
                time: error.timestamp,
                code: error.error.code,
                description: vec![
                    error.error.message,
                    error
                        .instance_action_details
                        .map(|details| details.action)
                        .unwrap_or_default(),
                ],
            })
            .collect())
    }
}
