use crate::utils;
use colored::Colorize;
use taskfleet_cloud::{Cloud, Environment, TaskAttributes};

pub async fn handle(
    cloud: Cloud,
    name: &str,
    directory: String,
    directory_out: String,
) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let attributes = TaskAttributes {
        environment: Environment {
            directory,
            directory_out,
            ..Environment::default()
        },
        ..TaskAttributes::default()
    };
    if !attributes.environment.directory_out.is_empty() {
        tracing::debug!(
            "Downloading {} into {}",
            attributes.environment.directory_out,
            attributes.environment.directory
        );
    }
    println!("{}", format!("Deleting task {}...", identifier).yellow());

    let mut task = utils::task(cloud, identifier.clone(), attributes)?;
    task.delete().await?;
    tracing::info!("Task {} deleted", identifier.long());

    println!();
    println!("{}", format!("✓ Task {} deleted", identifier).green().bold());
    Ok(())
}
