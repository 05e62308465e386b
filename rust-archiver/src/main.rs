use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use rust_archiver::config::AppConfig;
use rust_archiver::logging;
use rust_archiver::services::ServiceContainer;
use rust_archiver::status;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "RUST_ARCHIVER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log filter directive, overrides the configured one
    #[arg(long)]
    log_filter: Option<String>,

    /// Validate the configuration and probe the capture tool, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let filter = args.log_filter.as_deref().or(config.app.log_filter.as_deref());
    let _log_guard = logging::init_logging(filter, config.app.log_dir.as_deref())?;

    let container = ServiceContainer::from_config(&config)?;

    let version = container
        .recorder()
        .version()
        .await
        .context("Capture tool is not available")?;
    info!(version = %version, "Capture tool found");

    if args.check {
        info!("Configuration OK");
        return Ok(());
    }

    let cancel = container.cancellation_token();
    let registry = container.registry();
    let show_table = config.app.status_table;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        cancel.cancel();
        if show_table {
            println!("{}", status::render_table(&registry.list_all()));
        }
        info!("Waiting for all tasks to finish...");
        warn!("Press Ctrl+C again to force exit");

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(1);
        }
    });

    container.run().await;
    Ok(())
}
