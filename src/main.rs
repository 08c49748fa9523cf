use anyhow::{Context, Result};
use clap::Parser;
use pixelboard::config::{Config, Settings};
use pixelboard::server::Server;
use pixelboard::{console, Canvas};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pixelboard", version, about = "Shared collaborative pixel canvas")]
struct Cli {
    /// JSON settings file with update_duration_seconds, port and address
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Do not read admin commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(path) = &cli.settings {
        config.apply_settings(&Settings::load(path)?);
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pixelboard={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pixelboard");
    tracing::info!(
        "Configuration: bind_addr={}, base_image={}, update_interval={}s, rate_limit={}/s",
        config.bind_addr,
        config.base_image.display(),
        config.update_interval_secs,
        config.rate_limit
    );

    let canvas = Arc::new(Canvas::open(&config).context("Failed to start canvas")?);

    // Make sure a snapshot exists before the first tick so backups work.
    if let Err(e) = canvas.flush().await {
        tracing::error!(error = %e, "Initial flush failed");
    }
    let snapshot_task = canvas.spawn_snapshot_task(config.update_interval());
    let cleanup_task = canvas.spawn_cleanup_task(config.cleanup_interval());

    if !cli.no_console {
        match console::stdin_lines() {
            Ok(lines) => {
                let console_canvas = Arc::clone(&canvas);
                tokio::spawn(async move {
                    if let Err(e) = console::run(console_canvas, lines, tokio::io::stdout()).await {
                        tracing::error!(error = %e, "Admin console failed");
                    }
                });
            }
            Err(e) => tracing::error!(error = %e, "Failed to start admin console"),
        }
    }

    let server = Server::new(&config, Arc::clone(&canvas));
    let served = server.run().await;

    snapshot_task.abort();
    cleanup_task.abort();
    if let Err(e) = canvas.flush().await {
        tracing::error!(error = %e, "Final flush failed");
    }

    served.context("Server error")?;
    tracing::info!("Shutdown complete");
    Ok(())
}
