//! CLI entry point for humble-sync.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use humble_sync::Config;

mod cli;
mod commands;

use cli::{Args, Command};
use commands::DownloadOptions;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => humble_sync::config::default_config_path()?,
    };
    let config = Config::load(&config_path)?;
    debug!(path = %config_path.display(), "configuration loaded");

    match args.command {
        Command::Bundles => commands::bundles().await,
        Command::Details { bundle_key } => commands::details(&config, &bundle_key).await,
        Command::Download {
            bundle_key,
            format,
            items,
            concurrency,
            output_dir,
            force,
        } => {
            commands::download(
                &config,
                DownloadOptions {
                    bundle_key,
                    format,
                    items,
                    concurrency,
                    output_dir,
                    force,
                },
            )
            .await
        }
        Command::Stats { bundle_key } => commands::stats(&config, bundle_key.as_deref()).await,
    }
}
