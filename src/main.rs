use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vecwatch::cluster::{
    Cluster, ClusterMonitor, ClusterState, EndpointRegistry, ProbeSet, RestWorkHandle, WorkHandle,
    EVENT_CHANNEL_CAPACITY,
};
use vecwatch::config::ClusterConfig;
use vecwatch::metrics;

#[derive(Parser)]
#[command(
    name = "vecwatch",
    version,
    about = "Health monitoring and master election for vector query service clusters",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every endpoint once and print the resulting cluster state
    Check {
        /// Cluster config file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run the monitor until Ctrl-C, printing cluster changes
    Watch {
        /// Cluster config file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Collect Prometheus metrics and print them on exit
        #[arg(long, default_value = "false")]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Check { config } => check(&config).await,
        Commands::Watch { config, metrics } => watch(&config, metrics).await,
    }
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("vecwatch=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("vecwatch=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Load the file, then apply `VECWATCH_*` overrides
fn load_config(path: &Path) -> Result<ClusterConfig> {
    let mut config = ClusterConfig::from_file(path)
        .with_context(|| format!("Failed to load cluster config: {}", path.display()))?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_cluster_parts(config: &ClusterConfig) -> Result<(EndpointRegistry, ProbeSet)> {
    // One connection pool shared by every endpoint handle
    let client = reqwest::Client::builder()
        .connect_timeout(config.monitor.capability_timeout())
        .timeout(config.monitor.capability_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let registry = config.build_registry(|ep| {
        let handle = RestWorkHandle::with_client(client.clone(), format!("http://{}", ep.address()));
        Some(Arc::new(handle) as Arc<dyn WorkHandle>)
    })?;

    let probes = ProbeSet::from_config(&config.monitor, config.probe_spec())
        .context("Failed to build probes")?;

    Ok((registry, probes))
}

async fn check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let (registry, probes) = build_cluster_parts(&config)?;

    let state = Arc::new(ClusterState::new(Arc::new(registry)));
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let monitor = ClusterMonitor::new(Arc::clone(&state), probes, config.monitor.clone(), events);

    let report = monitor.run_cycle().await?;
    tracing::info!(
        available = report.available.len(),
        master = %report.master,
        elapsed_ms = report.duration.as_millis() as u64,
        "Check complete"
    );

    println!("{}", serde_json::to_string_pretty(&state.snapshot())?);
    Ok(())
}

async fn watch(path: &Path, with_metrics: bool) -> Result<()> {
    if with_metrics {
        if let Err(e) = metrics::init_metrics() {
            eprintln!("Warning: Metrics initialization failed: {e}");
        }
    }

    let mut config = load_config(path)?;
    config.monitor.enabled = true;
    let (registry, probes) = build_cluster_parts(&config)?;

    let mut cluster = Cluster::connect(registry, probes, config.monitor.clone())?;
    let mut events = cluster.subscribe();
    println!("Watching {} endpoints, master {}", cluster.registry().len(), cluster.master());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}  {event}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cluster.close().await;

    let snapshot = cluster.snapshot();
    println!(
        "Final state: master {}, {}/{} available ({:.0}%)",
        snapshot.master,
        snapshot.available.len(),
        snapshot.all.len(),
        snapshot.availability()
    );

    if metrics::metrics_initialized() {
        match metrics::encode_metrics() {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Warning: Failed to encode metrics: {e}"),
        }
    }

    Ok(())
}
