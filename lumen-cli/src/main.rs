//! `lumen`: watch a remote job to completion, or pull a generated image
//! through the resilient loader.

mod fetch;
mod watch;

use clap::{Parser, Subcommand};
use lumen_core::Config;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(name = "lumen")]
#[clap(about = "Track remote image jobs and fetch their outputs")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a job until it completes, fails or is cancelled
    Watch(watch::WatchArgs),
    /// Load an image through the tiered retry pipeline
    Fetch(fetch::FetchArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.settings.logging.level.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        api_base_url = %config.settings.sync.api_base_url,
        push = config.push_url().is_some(),
        "Configuration loaded"
    );

    match args.command {
        Command::Watch(watch_args) => watch::run(&config, watch_args).await,
        Command::Fetch(fetch_args) => fetch::run(&config, fetch_args).await,
    }
}
