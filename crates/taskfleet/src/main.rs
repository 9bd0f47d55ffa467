mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use taskfleet_cloud::Provider;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskfleet")]
#[command(version, about = "Run a script on an ephemeral fleet of cloud workers", long_about = None)]
struct Cli {
    /// Cloud provider (aws, gcp, az, k8s)
    #[arg(long, global = true, env = "TASKFLEET_CLOUD")]
    cloud: Option<Provider>,

    /// Generic (us-east, us-west, eu-north, eu-west) or provider-native region
    #[arg(long, global = true, env = "TASKFLEET_REGION")]
    region: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a fleet and start the script on every worker
    Create(CreateArgs),
    /// Show addresses, status and events of a task
    Read {
        name: String,
        /// Print the task attributes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show worker counts per status
    Status { name: String },
    /// Print the logs written by every worker
    Logs { name: String },
    /// Scale the fleet down to zero workers
    Stop { name: String },
    /// Scale the fleet back up
    Start {
        name: String,
        #[arg(long, default_value_t = 1)]
        parallelism: u16,
    },
    /// Download outputs and remove every resource of a task
    Delete {
        name: String,
        /// Local directory receiving the task outputs
        #[arg(long, default_value = "")]
        directory: String,
        /// Subdirectory of the task directory to download
        #[arg(long, default_value = "")]
        directory_out: String,
    },
    /// List live tasks
    List,
    /// Serve the HTTP API
    Serve {
        /// Listen address, overriding the settings file
        #[arg(long)]
        listen: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Task name
    pub name: String,

    /// Script run on every worker; needs a shebang line
    #[arg(long)]
    pub script: PathBuf,

    #[arg(long, default_value = "ubuntu")]
    pub image: String,

    /// Generic size (s, m, l, xl, m+k80...) or a provider machine type
    #[arg(long, default_value = "m")]
    pub machine: String,

    /// Disk size in GB
    #[arg(long, default_value_t = 30)]
    pub disk_size: u32,

    /// Negative for on-demand, 0 for the spot market price, otherwise the bid
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    pub spot: f64,

    #[arg(long, default_value_t = 1)]
    pub parallelism: u16,

    /// Local directory uploaded before the script starts
    #[arg(long, default_value = "")]
    pub directory: String,

    /// Subdirectory of --directory downloaded on deletion
    #[arg(long, default_value = "")]
    pub directory_out: String,

    /// Worker variable; without a value it is copied from this environment
    #[arg(long = "env", value_name = "NAME[=VALUE]")]
    pub variables: Vec<String>,

    /// Script timeout in seconds
    #[arg(long, default_value_t = 24 * 60 * 60)]
    pub timeout: u64,

    /// Ingress ports open on every worker
    #[arg(long, value_delimiter = ',', default_value = "22,80")]
    pub ports: Vec<u16>,

    /// Provider identity the workers run as
    #[arg(long, default_value = "")]
    pub permission_set: String,

    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub tags: Vec<String>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = taskfleet_config::Settings::load()?;
    let cloud = || utils::cloud(&settings, cli.cloud, cli.region.clone());

    let result = match cli.command {
        Commands::Create(args) => commands::create::handle(cloud()?, args).await,
        Commands::Read { name, json } => commands::read::handle(cloud()?, &name, json).await,
        Commands::Status { name } => commands::read::status(cloud()?, &name).await,
        Commands::Logs { name } => commands::read::logs(cloud()?, &name).await,
        Commands::Stop { name } => commands::scale::stop(cloud()?, &name).await,
        Commands::Start { name, parallelism } => {
            commands::scale::start(cloud()?, &name, parallelism).await
        }
        Commands::Delete {
            name,
            directory,
            directory_out,
        } => commands::delete::handle(cloud()?, &name, directory, directory_out).await,
        Commands::List => commands::list::handle(cloud()?).await,
        Commands::Serve { listen } => commands::serve::handle(settings.clone(), listen).await,
    };

    if let Err(err) = &result {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
    Ok(())
}
