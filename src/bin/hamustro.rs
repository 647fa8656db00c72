//! hamustro: collect signed analytics events and store them in batches.

use clap::{Parser, Subcommand};
use hamustro::config::{CONFIG_PATH_VAR, Config};
use hamustro::context::AppContext;
use hamustro::error::Error;
use hamustro::server;
use hamustro::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Hard limit for draining HTTP and stopping the worker pool after a
/// termination signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Parser)]
#[command(name = "hamustro", about = "Event-ingestion gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Config file (defaults to $HAMUSTRO_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Debug logging and error bodies in HTTP responses
        #[arg(long, short)]
        verbose: bool,
    },
    /// Load and validate a config file, then print the resolved pool settings
    CheckConfig {
        /// Config file (defaults to $HAMUSTRO_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, verbose } => cmd_serve(config, verbose).await,
        Command::CheckConfig { config } => cmd_check_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path,
        None => std::env::var(CONFIG_PATH_VAR).map(PathBuf::from).map_err(|_| {
            anyhow::anyhow!("no config file given (use --config or {CONFIG_PATH_VAR})")
        })?,
    };
    let config = Config::load(&path)?;
    config.validate()?;
    Ok(config)
}

async fn cmd_serve(path: Option<PathBuf>, verbose: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, verbose))?;

    let ctx = AppContext::start(config, verbose).await?;

    let listener = server::bind(&ctx.config.address()).await?;

    match server::run(ctx, listener, wait_for_signal(), SHUTDOWN_TIMEOUT).await {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(Error::ShutdownTimeout(timeout)) => {
            error!(
                timeout_secs = timeout.as_secs(),
                "shutdown did not finish in time, buffered events are lost"
            );
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_check_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let dispatcher = config.dispatcher_config();

    println!("dialect:         {}", config.dialect);
    println!("workers:         {}", dispatcher.max_workers);
    println!("queue size:      {}", config.max_queue_size());
    println!("retry attempts:  {}", dispatcher.worker.retry_attempt);
    let sizes: Vec<String> = (0..dispatcher.max_workers)
        .map(|n| dispatcher.buffer_size_for(n).to_string())
        .collect();
    println!("buffer sizes:    {}", sizes.join(", "));
    match dispatcher.auto_flush_interval {
        Some(interval) => println!("auto flush:      every {}s", interval.as_secs()),
        None => println!("auto flush:      disabled"),
    }
    println!("listen address:  {}", config.address());
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
