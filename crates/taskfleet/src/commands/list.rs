use colored::Colorize;
use taskfleet_cloud::Cloud;
use taskfleet_controlplane::{CloudTaskFactory, TaskFactory};

pub async fn handle(cloud: Cloud) -> anyhow::Result<()> {
    let tasks = CloudTaskFactory.list(&cloud).await?;
    tracing::debug!("Found {} tasks on {}", tasks.len(), cloud.provider);
    if tasks.is_empty() {
        println!("{}", format!("No tasks on {}", cloud.provider).dimmed());
        return Ok(());
    }
    for identifier in tasks {
        println!("{}  {}", identifier.long(), identifier.short().cyan());
    }
    Ok(())
}
