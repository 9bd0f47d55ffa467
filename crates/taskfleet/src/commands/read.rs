use crate::utils;
use colored::Colorize;
use taskfleet_cloud::{Cloud, Status, StatusCode, TaskAttributes};

fn print_status(status: &Status) {
    println!(
        "  active: {}  succeeded: {}  failed: {}",
        status.get(StatusCode::Active).to_string().cyan(),
        status.get(StatusCode::Succeeded).to_string().green(),
        status.get(StatusCode::Failed).to_string().red(),
    );
}

pub async fn handle(cloud: Cloud, name: &str, json: bool) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let mut task = utils::task(cloud, identifier.clone(), TaskAttributes::default())?;
    let status = task.status().await?;
    tracing::debug!("Task {} has {} events", identifier.long(), task.events().len());

    if json {
        let report = serde_json::json!({
            "id": identifier.long(),
            "addresses": task.addresses(),
            "status": status,
            "events": task.events(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", format!("Task {}", identifier).bold());
    print_status(&status);
    let addresses = task.addresses();
    if !addresses.is_empty() {
        println!("Addresses:");
        for address in addresses {
            println!("  • {}", address.to_string().cyan());
        }
    }
    let events = task.events();
    if !events.is_empty() {
        println!("Events:");
        for event in events {
            println!(
                "  {} {} {}",
                event.time.to_rfc3339().dimmed(),
                event.code.yellow(),
                event.description.join(" ")
            );
        }
    }
    Ok(())
}

pub async fn status(cloud: Cloud, name: &str) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let mut task = utils::task(cloud, identifier.clone(), TaskAttributes::default())?;
    let status = task.status().await?;
    println!("{}", format!("Task {}", identifier).bold());
    print_status(&status);
    Ok(())
}

pub async fn logs(cloud: Cloud, name: &str) -> anyhow::Result<()> {
    let identifier = utils::identifier(name);
    let mut task = utils::task(cloud, identifier, TaskAttributes::default())?;
    for (index, log) in task.logs().await?.iter().enumerate() {
        println!("{}", format!("── worker {index} ──").dimmed());
        print!("{log}");
        if !log.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
