//! Pilosa - HTTP boundary for the bitmap index
//!
//! Serves the query and ingest endpoints, archives set-bit traffic to disk
//! and streams live cluster traffic to listeners.

use clap::{Parser, Subcommand};
use pilosa_core::{
    api::WebService, bus::LocalBus, collaborators::Collaborators, config::ServiceConfig,
    error::Result, EventBus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "pilosa")]
#[command(about = "Pilosa bitmap index HTTP service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// TOML configuration file
        #[arg(short, long, env = "PILOSA_CONFIG")]
        config: Option<PathBuf>,

        /// HTTP port (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective configuration
    ShowConfig {
        /// TOML configuration file
        #[arg(short, long, env = "PILOSA_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!(
        "pilosa={level},pilosa_core={level},tower_http={level},hyper=warn"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Pilosa v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { config, port } => {
            let mut config = ServiceConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.port_http = port;
                config.validate()?;
            }
            serve(config).await
        }
        Commands::ShowConfig { config } => {
            let config = ServiceConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());
    let collaborators = Collaborators::detached(&config, bus.clone());
    let service = WebService::new(config, collaborators, bus);

    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    service.serve().await
}

async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
