use colored::Colorize;
use std::sync::Arc;
use taskfleet_config::Settings;
use taskfleet_controlplane::CloudTaskFactory;

pub async fn handle(mut settings: Settings, listen: Option<String>) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        settings.listen = listen;
    }
    tracing::debug!("Control plane settings: {:?}", settings);
    println!(
        "{}",
        format!("Serving the taskfleet API on {}", settings.listen).cyan()
    );
    taskfleet_controlplane::serve(settings, Arc::new(CloudTaskFactory)).await?;
    Ok(())
}
