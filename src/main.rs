use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fleetcheck::config::{Credentials, FleetConfig};
use fleetcheck::instance::{InstanceDescriptor, InstanceDirectory, Protocol};
use fleetcheck::services::ServiceCatalog;
use fleetcheck::RunInputs;

#[derive(Parser)]
#[command(
    name = "fleetcheck",
    about = "Health checks and functional tests for a fleet of media-fetching API instances",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $FLEETCHECK_CONFIG, then ./fleetcheck.toml)
    #[arg(long, global = true, env = "FLEETCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe and test every listed instance, then write the report
    Run {
        /// Instance list: one `api,frontend,protocol` per line
        #[arg(long)]
        instances: PathBuf,

        /// JSON object of service name to test URL
        #[arg(long)]
        tests: PathBuf,

        /// JSON object of API host to API key
        #[arg(long, default_value = "apikeys.json")]
        api_keys: PathBuf,

        /// Report output path
        #[arg(long, default_value = "instances.json")]
        output: PathBuf,
    },

    /// Probe a single instance and print what was detected
    Probe {
        /// API host, e.g. api.example.com
        host: String,

        #[arg(long, default_value = "https")]
        protocol: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = FleetConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            instances,
            tests,
            api_keys,
            output,
        } => {
            let inputs = RunInputs {
                directory: InstanceDirectory::load(&instances)?,
                catalog: ServiceCatalog::import(&tests, &config).await?,
                credentials: Credentials::load(&api_keys)?,
            };
            let report = fleetcheck::run(&config, inputs).await?;
            report.write(&output)?;

            println!("\n=== fleetcheck ===");
            println!(
                "Instances: {} ({} online)",
                report.instances.len(),
                report.online_count()
            );
            for row in &report.instances {
                let rating = row
                    .rating
                    .map(|r| format!("{r:?}").to_lowercase())
                    .unwrap_or_else(|| "offline".to_string());
                println!("{:<40} | {:>6.1} | {}", row.api, row.score, rating);
            }
            if let Some(oldest) = &report.oldest {
                println!("Oldest instance: {} (started {})", oldest.api, oldest.start_time);
            }
            println!("Report written to {}", output.display());
        }
        Commands::Probe { host, protocol } => {
            let protocol: Protocol = protocol
                .parse()
                .map_err(|p| anyhow::anyhow!("unknown protocol: {p}"))?;
            let state = fleetcheck::probe_one(
                &config,
                InstanceDescriptor {
                    api: host,
                    front_end: None,
                    protocol,
                },
            )
            .await?;
            let json = serde_json::to_string_pretty(&state).context("failed to encode probe state")?;
            println!("{json}");
        }
    }

    Ok(())
}
