use crate::CreateArgs;
use crate::utils;
use anyhow::Context;
use colored::Colorize;
use std::time::Duration;
use taskfleet_cloud::{
    Cloud, Environment, Firewall, FirewallRule, Size, Spot, TaskAttributes,
};

pub fn attributes(args: CreateArgs) -> anyhow::Result<TaskAttributes> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read script {}", args.script.display()))?;
    Ok(TaskAttributes {
        environment: Environment {
            image: args.image,
            script,
            variables: utils::parse_variables(&args.variables),
            directory: args.directory,
            directory_out: args.directory_out,
            timeout: Duration::from_secs(args.timeout),
        },
        size: Size {
            machine: args.machine,
            storage: args.disk_size,
        },
        firewall: Firewall {
            ingress: FirewallRule {
                ports: args.ports,
                nets: Vec::new(),
            },
            ..Firewall::default()
        },
        spot: Spot(args.spot),
        parallelism: args.parallelism,
        permission_set: args.permission_set,
        tags: utils::parse_tags(&args.tags)?,
        ..TaskAttributes::default()
    })
}

pub async fn handle(cloud: Cloud, args: CreateArgs) -> anyhow::Result<()> {
    let identifier = utils::identifier(&args.name);
    let attributes = attributes(args)?;
    tracing::debug!(
        "Task {} asks for {} workers of size {} (spot {})",
        identifier.long(),
        attributes.parallelism,
        attributes.size.machine,
        attributes.spot.0
    );
    println!(
        "{}",
        format!("Creating task {} on {}...", identifier, cloud.provider).yellow()
    );

    let mut task = utils::task(cloud, identifier.clone(), attributes)?;
    task.create().await?;
    tracing::info!("Task {} is running", identifier.long());

    println!();
    println!("{}", format!("✓ Task {} created", identifier).green().bold());
    for address in task.addresses() {
        println!("  • {}", address.to_string().cyan());
    }
    Ok(())
}
