//! AWS SDK client
//!
//! Implements [`AwsApi`] with the EC2, Auto Scaling and S3 clients. The SDK
//! configuration is loaded on first use: explicit task credentials win,
//! otherwise the default chain (environment, profiles, instance roles) applies.

use crate::api::{
    AwsApi, Direction, GroupInfo, GroupInstance, GroupSpec, ImageInfo, LaunchTemplateSpec,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials as StaticCredentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_autoscaling::types::{LaunchTemplateSpecification, Tag as GroupTag};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::{
    Filter, InstanceType, IpPermission, IpRange, LaunchTemplateBlockDeviceMappingRequest,
    LaunchTemplateEbsBlockDeviceRequest, LaunchTemplateIamInstanceProfileSpecificationRequest,
    LaunchTemplateInstanceMarketOptionsRequest, LaunchTemplateSpotMarketOptionsRequest,
    LaunchTemplateTagSpecificationRequest, MarketType, RequestLaunchTemplateData, ResourceType,
    SpotInstanceType, Tag, TagSpecification, VolumeType,
};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use taskfleet_cloud::{Cloud, CloudError, Event, FirewallRule, Result, StorageCredentials};
use tokio::sync::OnceCell;

const UNAUTHORIZED: &[&str] = &[
    "AuthFailure",
    "InvalidClientTokenId",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "UnrecognizedClientException",
];

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

struct Clients {
    config: SdkConfig,
    ec2: aws_sdk_ec2::Client,
    autoscaling: aws_sdk_autoscaling::Client,
    s3: aws_sdk_s3::Client,
}

/// SDK clients bound to one region
pub struct AwsSdk {
    region: String,
    credentials: Option<StaticCredentials>,
    clients: OnceCell<Clients>,
}

impl AwsSdk {
    pub fn new(cloud: &Cloud) -> Self {
        let credentials = match (
            cloud.credentials.get("AWS_ACCESS_KEY_ID"),
            cloud.credentials.get("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(id), Some(secret)) => Some(StaticCredentials::new(
                id,
                secret,
                cloud.credentials.get("AWS_SESSION_TOKEN").cloned(),
                None,
                "taskfleet",
            )),
            _ => None,
        };
        Self {
            region: cloud.native_region(),
            credentials,
            clients: OnceCell::new(),
        }
    }

    async fn clients(&self) -> &Clients {
        self.clients
            .get_or_init(|| async {
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()));
                if let Some(credentials) = &self.credentials {
                    loader = loader.credentials_provider(credentials.clone());
                }
                let config = loader.load().await;
                tracing::debug!("Loaded AWS configuration for {}", self.region);
                Clients {
                    ec2: aws_sdk_ec2::Client::new(&config),
                    autoscaling: aws_sdk_autoscaling::Client::new(&config),
                    s3: aws_sdk_s3::Client::new(&config),
                    config,
                }
            })
            .await
    }

    async fn ec2(&self) -> &aws_sdk_ec2::Client {
        &self.clients().await.ec2
    }

    async fn autoscaling(&self) -> &aws_sdk_autoscaling::Client {
        &self.clients().await.autoscaling
    }

    async fn s3(&self) -> &aws_sdk_s3::Client {
        &self.clients().await.s3
    }
}

/// Map an SDK failure to the shared error taxonomy
fn classify<E>(err: SdkError<E>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    classify_code(code.as_deref(), DisplayErrorContext(&err).to_string())
}

fn classify_code(code: Option<&str>, message: String) -> CloudError {
    let code = code.unwrap_or_default();
    if code.contains("NotFound")
        || code == "NoSuchBucket"
        || (code == "ValidationError" && message.contains("not found"))
    {
        CloudError::NotFound(message)
    } else if code.contains("Duplicate")
        || code.contains("AlreadyExists")
        || code == "BucketAlreadyOwnedByYou"
    {
        CloudError::AlreadyExists(message)
    } else if UNAUTHORIZED.contains(&code)
        || (code.is_empty() && message.contains("credentials"))
    {
        CloudError::AuthenticationFailed(message)
    } else {
        CloudError::Api(message)
    }
}

/// Required and optional SDK members alike, as an `Option`
fn member<T>(value: impl Into<Option<T>>) -> Option<T> {
    value.into()
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

fn tag_list(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

fn permissions(rule: &FirewallRule) -> Vec<IpPermission> {
    let ranges: Vec<IpRange> = if rule.nets.is_empty() {
        vec![IpRange::builder().cidr_ip("0.0.0.0/0").build()]
    } else {
        rule.nets
            .iter()
            .map(|net| IpRange::builder().cidr_ip(net).build())
            .collect()
    };
    if rule.ports.is_empty() {
        return vec![
            IpPermission::builder()
                .ip_protocol("-1")
                .set_ip_ranges(Some(ranges))
                .build(),
        ];
    }
    rule.ports
        .iter()
        .flat_map(|port| {
            let ranges = ranges.clone();
            ["tcp", "udp"].map(move |protocol| {
                IpPermission::builder()
                    .ip_protocol(protocol)
                    .from_port(i32::from(*port))
                    .to_port(i32::from(*port))
                    .set_ip_ranges(Some(ranges.clone()))
                    .build()
            })
        })
        .collect()
}

fn launch_template_data(spec: &LaunchTemplateSpec) -> Result<RequestLaunchTemplateData> {
    let disk_size = i32::try_from(spec.disk_size)
        .map_err(|_| CloudError::Validation(format!("disk size {} is too large", spec.disk_size)))?;
    let mut data = RequestLaunchTemplateData::builder()
        .image_id(&spec.image_id)
        .instance_type(InstanceType::from(spec.instance_type.as_str()))
        .key_name(&spec.key_name)
        .security_group_ids(&spec.security_group_id)
        .user_data(STANDARD.encode(&spec.user_data))
        .block_device_mappings(
            LaunchTemplateBlockDeviceMappingRequest::builder()
                .device_name(&spec.root_device)
                .ebs(
                    LaunchTemplateEbsBlockDeviceRequest::builder()
                        .volume_size(disk_size)
                        .volume_type(VolumeType::Gp3)
                        .delete_on_termination(true)
                        .build(),
                )
                .build(),
        );
    for resource in [ResourceType::Instance, ResourceType::Volume] {
        data = data.tag_specifications(
            LaunchTemplateTagSpecificationRequest::builder()
                .resource_type(resource)
                .set_tags(Some(tag_list(&spec.tags)))
                .build(),
        );
    }
    if let Some(profile) = &spec.instance_profile {
        data = data.iam_instance_profile(
            LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                .arn(profile)
                .build(),
        );
    }
    if !spec.spot.is_on_demand() {
        let mut options =
            LaunchTemplateSpotMarketOptionsRequest::builder().spot_instance_type(SpotInstanceType::OneTime);
        if let Some(price) = spec.spot.max_price() {
            options = options.max_price(format!("{price:.5}"));
        }
        data = data.instance_market_options(
            LaunchTemplateInstanceMarketOptionsRequest::builder()
                .market_type(MarketType::Spot)
                .spot_options(options.build())
                .build(),
        );
    }
    Ok(data.build())
}

fn timestamp(value: &aws_sdk_autoscaling::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos()).unwrap_or_default()
}

#[async_trait]
impl AwsApi for AwsSdk {
    async fn default_vpc(&self) -> Result<String> {
        let output = self
            .ec2()
            .await
            .describe_vpcs()
            .filters(filter("is-default", "true"))
            .send()
            .await
            .map_err(classify)?;
        output
            .vpcs()
            .iter()
            .find_map(|vpc| vpc.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::NotFound(format!("default VPC in {}", self.region)))
    }

    async fn default_subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        let output = self
            .ec2()
            .await
            .describe_subnets()
            .filters(filter("vpc-id", vpc_id))
            .filters(filter("default-for-az", "true"))
            .send()
            .await
            .map_err(classify)?;
        let ids: Vec<String> = output
            .subnets()
            .iter()
            .filter(|subnet| subnet.map_public_ip_on_launch().unwrap_or(false))
            .filter_map(|subnet| subnet.subnet_id())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(CloudError::NotFound(format!("public default subnets in {vpc_id}")));
        }
        Ok(ids)
    }

    async fn find_image(&self, owner: &str, architecture: &str, name: &str) -> Result<ImageInfo> {
        let output = self
            .ec2()
            .await
            .describe_images()
            .owners(owner)
            .filters(filter("name", name))
            .filters(filter("architecture", architecture))
            .filters(filter("state", "available"))
            .send()
            .await
            .map_err(classify)?;
        output
            .images()
            .iter()
            .filter_map(|image| {
                Some((
                    image.creation_date().unwrap_or_default(),
                    ImageInfo {
                        id: image.image_id()?.to_string(),
                        root_device: image.root_device_name()?.to_string(),
                    },
                ))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, info)| info)
            .ok_or_else(|| CloudError::NotFound(format!("image {owner}:{architecture}:{name}")))
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        let mut request = self.s3().await.create_bucket().bucket(name);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.map_err(classify)?;
        Ok(())
    }

    async fn head_bucket(&self, name: &str) -> Result<()> {
        match self.s3().await.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Err(CloudError::NotFound(format!("bucket {name}")))
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.s3()
            .await
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .s3()
            .await
            .list_buckets()
            .send()
            .await
            .map_err(classify)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name())
            .map(str::to_string)
            .collect())
    }

    async fn storage_credentials(&self, bucket: &str) -> Result<StorageCredentials> {
        let provider = self
            .clients()
            .await
            .config
            .credentials_provider()
            .ok_or_else(|| CloudError::AuthenticationFailed("no AWS credentials".to_string()))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| CloudError::AuthenticationFailed(DisplayErrorContext(&e).to_string()))?;

        let mut options = vec![
            ("region", self.region.as_str()),
            ("access_key_id", credentials.access_key_id()),
            ("secret_access_key", credentials.secret_access_key()),
        ];
        let mut env = BTreeMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), credentials.access_key_id().to_string()),
            (
                "AWS_SECRET_ACCESS_KEY".to_string(),
                credentials.secret_access_key().to_string(),
            ),
            ("AWS_DEFAULT_REGION".to_string(), self.region.clone()),
        ]);
        if let Some(token) = credentials.session_token() {
            options.push(("session_token", token));
            env.insert("AWS_SESSION_TOKEN".to_string(), token.to_string());
        }

        let remote = taskfleet_storage::with_options(&format!("s3://{bucket}"), options)?;
        Ok(StorageCredentials { remote, env })
    }

    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        let output = self
            .ec2()
            .await
            .create_security_group()
            .group_name(name)
            .description(name)
            .vpc_id(vpc_id)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::SecurityGroup)
                    .set_tags(Some(tag_list(tags)))
                    .build(),
            )
            .send()
            .await
            .map_err(classify)?;
        output
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| CloudError::Api(format!("security group {name} has no id")))
    }

    async fn find_security_group(&self, name: &str, vpc_id: &str) -> Result<String> {
        let output = self
            .ec2()
            .await
            .describe_security_groups()
            .filters(filter("group-name", name))
            .filters(filter("vpc-id", vpc_id))
            .send()
            .await
            .map_err(classify)?;
        output
            .security_groups()
            .iter()
            .find_map(|group| group.group_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::NotFound(format!("security group {name}")))
    }

    async fn authorize(&self, group_id: &str, direction: Direction, rule: &FirewallRule) -> Result<()> {
        let ec2 = self.ec2().await;
        let permissions = Some(permissions(rule));
        match direction {
            Direction::Ingress => {
                ec2.authorize_security_group_ingress()
                    .group_id(group_id)
                    .set_ip_permissions(permissions)
                    .send()
                    .await
                    .map_err(classify)?;
            }
            Direction::Egress => {
                ec2.authorize_security_group_egress()
                    .group_id(group_id)
                    .set_ip_permissions(permissions)
                    .send()
                    .await
                    .map_err(classify)?;
            }
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.ec2()
            .await
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn import_key_pair(&self, name: &str, public_key: &str) -> Result<()> {
        self.ec2()
            .await
            .import_key_pair()
            .key_name(name)
            .public_key_material(Blob::new(public_key.as_bytes()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn describe_key_pair(&self, name: &str) -> Result<String> {
        let output = self
            .ec2()
            .await
            .describe_key_pairs()
            .key_names(name)
            .send()
            .await
            .map_err(classify)?;
        output
            .key_pairs()
            .iter()
            .find_map(|pair| pair.key_pair_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::NotFound(format!("key pair {name}")))
    }

    async fn delete_key_pair(&self, name: &str) -> Result<()> {
        self.ec2()
            .await
            .delete_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> Result<String> {
        let output = self
            .ec2()
            .await
            .create_launch_template()
            .launch_template_name(&spec.name)
            .launch_template_data(launch_template_data(spec)?)
            .send()
            .await
            .map_err(classify)?;
        output
            .launch_template()
            .and_then(|template| template.launch_template_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Api(format!("launch template {} has no id", spec.name)))
    }

    async fn describe_launch_template(&self, name: &str) -> Result<String> {
        let output = self
            .ec2()
            .await
            .describe_launch_templates()
            .launch_template_names(name)
            .send()
            .await
            .map_err(classify)?;
        output
            .launch_templates()
            .iter()
            .find_map(|template| template.launch_template_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::NotFound(format!("launch template {name}")))
    }

    async fn delete_launch_template(&self, name: &str) -> Result<()> {
        self.ec2()
            .await
            .delete_launch_template()
            .launch_template_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_auto_scaling_group(&self, spec: &GroupSpec) -> Result<()> {
        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| {
                GroupTag::builder()
                    .key(key)
                    .value(value)
                    .propagate_at_launch(true)
                    .resource_id(&spec.name)
                    .resource_type("auto-scaling-group")
                    .build()
                    .map_err(|e| CloudError::Validation(format!("tag {key}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.autoscaling()
            .await
            .create_auto_scaling_group()
            .auto_scaling_group_name(&spec.name)
            .launch_template(
                LaunchTemplateSpecification::builder()
                    .launch_template_name(&spec.launch_template)
                    .version("$Latest")
                    .build(),
            )
            .min_size(0)
            .max_size(0)
            .desired_capacity(0)
            .vpc_zone_identifier(spec.subnets.join(","))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn describe_auto_scaling_group(&self, name: &str) -> Result<GroupInfo> {
        let output = self
            .autoscaling()
            .await
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(classify)?;
        let group = output
            .auto_scaling_groups()
            .first()
            .ok_or_else(|| CloudError::NotFound(format!("auto scaling group {name}")))?;
        let desired = member::<i32>(group.desired_capacity()).unwrap_or_default();
        Ok(GroupInfo {
            desired_capacity: u16::try_from(desired).unwrap_or_default(),
            instances: group
                .instances()
                .iter()
                .map(|instance| GroupInstance {
                    id: member::<&str>(instance.instance_id())
                        .unwrap_or_default()
                        .to_string(),
                    lifecycle_state: member::<&aws_sdk_autoscaling::types::LifecycleState>(
                        instance.lifecycle_state(),
                    )
                    .map(|state| state.as_str().to_string())
                    .unwrap_or_default(),
                    health_status: member::<&str>(instance.health_status())
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect(),
        })
    }

    async fn set_desired_capacity(&self, name: &str, desired: u16) -> Result<()> {
        self.autoscaling()
            .await
            .update_auto_scaling_group()
            .auto_scaling_group_name(name)
            .min_size(0)
            .max_size(i32::from(desired))
            .desired_capacity(i32::from(desired))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, name: &str) -> Result<()> {
        self.autoscaling()
            .await
            .delete_auto_scaling_group()
            .auto_scaling_group_name(name)
            .force_delete(true)
            .send()
            .await
            .map_err(classify)?;

        loop {
            match self.describe_auto_scaling_group(name).await {
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
                Ok(_) => {
                    tracing::debug!("Waiting for auto scaling group {} to disappear", name);
                    tokio::time::sleep(DELETE_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn scaling_activities(&self, name: &str) -> Result<Vec<Event>> {
        let output = self
            .autoscaling()
            .await
            .describe_scaling_activities()
            .auto_scaling_group_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(output
            .activities()
            .iter()
            .map(|activity| Event {
                time: member::<&aws_sdk_autoscaling::primitives::DateTime>(activity.start_time())
                    .map(timestamp)
                    .unwrap_or_default(),
                code: member::<&aws_sdk_autoscaling::types::ScalingActivityStatusCode>(
                    activity.status_code(),
                )
                .map(|code| code.as_str().to_string())
                .unwrap_or_default(),
                description: vec![
                    activity.description().unwrap_or_default().to_string(),
                    member::<&str>(activity.cause()).unwrap_or_default().to_string(),
                ],
            })
            .collect())
    }

    async fn instance_addresses(&self, instance_ids: &[String]) -> Result<Vec<IpAddr>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let output = self
            .ec2()
            .await
            .describe_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .filter_map(|instance| instance.public_ip_address())
            .filter_map(|address| address.parse().ok())
            .collect())
    }
}
