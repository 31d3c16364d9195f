//! medreason server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve with config/default.toml and MEDREASON__* overrides
//! medreason serve
//!
//! # Explicit config, custom port, load the model at startup
//! medreason serve --config /etc/medreason.toml --port 9000 --preload
//!
//! # Populate the volume cache with full snapshots of both repositories
//! medreason download
//!
//! # Verbose logging
//! RUST_LOG=debug medreason serve
//! ```
//!
//! Priority: CLI arguments > environment variables > config file > defaults.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use medreason_core::Config;
use medreason_llm::{GenerationService, ModelResolver};
use medreason_server::AppState;

#[derive(Debug, Parser)]
#[command(name = "medreason", version, about = "Medical reasoning model server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Download the base model and adapter into the volume cache.
    Download(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Path to a TOML configuration file.
    #[arg(long, env = "MEDREASON_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Bind address override.
    #[arg(long)]
    bind: Option<String>,

    /// Port override.
    #[arg(long)]
    port: Option<u16>,

    /// Load the model at startup instead of on the first request.
    #[arg(long)]
    preload: bool,

    /// Weight cache root override.
    #[arg(long)]
    cache_root: Option<PathBuf>,
}

fn load_config(args: &ConfigArgs) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Apply CLI overrides. Called after file and environment layering.
fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(ref bind) = args.bind {
        info!("CLI override: bind_address = {}", bind);
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        info!("CLI override: port = {}", port);
        config.server.port = port;
    }
    if let Some(ref root) = args.cache_root {
        info!("CLI override: cache_root = {}", root.display());
        config.model.cache_root = root.clone();
    }
    if args.preload {
        config.model.preload = true;
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(config.logging.include_target)
        .init();
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    init_logging(&config);
    apply_overrides(&mut config, &args);
    config.validate()?;

    info!(
        base_model = %config.model.base_model_id,
        adapter = %config.model.adapter_id,
        cache_root = %config.model.cache_root.display(),
        "medreason server starting"
    );

    let service = Arc::new(GenerationService::from_config(&config));

    if config.model.preload {
        let fatal = medreason_server::spawn_preload(Arc::clone(&service));
        tokio::select! {
            served = medreason_server::serve(&config.server, AppState::new(service)) => served?,
            Ok(e) = fatal => return Err(e.into()),
        }
    } else {
        medreason_server::serve(&config.server, AppState::new(service)).await?;
    }
    info!("medreason server stopped");
    Ok(())
}

async fn run_download(args: ConfigArgs) -> Result<()> {
    let config = load_config(&args)?;
    init_logging(&config);

    info!(
        cache_root = %config.model.cache_root.display(),
        "Downloading models to volume cache"
    );
    ModelResolver::new(config.model.clone()).download().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Download(args) => run_download(args).await,
    }
}
