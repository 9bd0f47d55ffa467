use anyhow::Context;
use std::collections::BTreeMap;
use taskfleet_cloud::{Cloud, Identifier, Provider, Region, Task, TaskAttributes};
use taskfleet_config::Settings;
use taskfleet_controlplane::{CloudTaskFactory, TaskFactory};

/// Cloud from the command line, falling back to the settings file
pub fn cloud(
    settings: &Settings,
    provider: Option<Provider>,
    region: Option<String>,
) -> anyhow::Result<Cloud> {
    let provider = provider.or(settings.provider).context(
        "no cloud provider: pass --cloud, set TASKFLEET_CLOUD or add `provider` to the settings file",
    )?;
    let mut cloud = settings.cloud(provider);
    if let Some(region) = region {
        cloud = cloud.with_region(Region::new(region));
    }
    tracing::debug!(
        "Using cloud provider {} in {}",
        cloud.provider,
        cloud.native_region()
    );
    Ok(cloud)
}

/// Accept either a task name or the long identifier printed by `list`
pub fn identifier(name: &str) -> Identifier {
    Identifier::parse(name).unwrap_or_else(|_| Identifier::new(name))
}

pub fn task(
    cloud: Cloud,
    identifier: Identifier,
    attributes: TaskAttributes,
) -> anyhow::Result<Box<dyn Task>> {
    tracing::debug!("Opening task {} on {}", identifier.long(), cloud.provider);
    Ok(CloudTaskFactory.task(cloud, identifier, attributes)?)
}

/// `NAME=VALUE` pins a value, a bare `NAME` inherits it from this process
pub fn parse_variables(raw: &[String]) -> BTreeMap<String, Option<String>> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (entry.clone(), None),
        })
        .collect()
}

pub fn parse_tags(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .with_context(|| format!("tag `{entry}` is not KEY=VALUE"))
        })
        .collect()
}
