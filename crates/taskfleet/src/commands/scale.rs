use crate::utils;
use colored::Colorize;
use taskfleet_cloud::{Cloud, TaskAttributes};

pub async fn stop(cloud: Cloud, name: &str) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let mut task = utils::task(cloud, identifier.clone(), TaskAttributes::default())?;
    task.stop().await?;
    tracing::info!("Task {} scaled to zero", identifier.long());
    println!("{}", format!("✓ Task {} stopped", identifier).green().bold());
    Ok(())
}

pub async fn start(cloud: Cloud, name: &str, parallelism: u16) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let attributes = TaskAttributes {
        parallelism,
        ..TaskAttributes::default()
    };
    let mut task = utils::task(cloud, identifier.clone(), attributes)?;
    task.start().await?;
    tracing::info!("Task {} scaled to {}", identifier.long(), parallelism);
    println!(
        "{}",
        format!("✓ Task {} started with {} workers", identifier, parallelism)
            .green()
            .bold()
    );
    Ok(())
}
