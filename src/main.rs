//! WolfControl - Management Plane High Availability and Persistence
//!
//! Runs a management node against a shared store, or inspects the store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfcontrol::config::{LoggingConfig, StartMode, WolfControlConfig};
use wolfcontrol::persistence::MementoStore;
use wolfcontrol::plane::NodeRecordPublisher;
use wolfcontrol::rebind::{RebindEngine, RebindOptions, TypeRegistry};
use wolfcontrol::{store, ManagementNode};

/// WolfControl - Management Plane High Availability and Persistence
#[derive(Parser)]
#[command(name = "wolfcontrol")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfcontrol.toml")]
    config: PathBuf,

    /// Log level, overrides the configured level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the management node
    Start {
        /// Start mode (auto, standby, master, disabled); defaults to [ha] start_mode
        #[arg(long)]
        mode: Option<StartMode>,
    },

    /// Show the management plane
    Status,

    /// List the persisted objects
    Manifest,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfcontrol.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate the configuration and dry-run a rebind of the persisted state
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output, node_id } = &cli.command {
        init_logging(&LoggingConfig::default(), cli.log_level.as_deref());
        return run_init(output, node_id);
    }

    let config = WolfControlConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    init_logging(&config.logging, cli.log_level.as_deref());

    match cli.command {
        Commands::Start { mode } => run_start(config, mode).await,
        Commands::Status => run_status(config).await,
        Commands::Manifest => run_manifest(config).await,
        Commands::Validate => run_validate(config).await,
        Commands::Init { .. } => Ok(()),
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(logging.level.as_str());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the node and run until interrupted
async fn run_start(config: WolfControlConfig, mode: Option<StartMode>) -> anyhow::Result<()> {
    let mode = mode.unwrap_or(config.ha.start_mode);
    tracing::info!("Starting WolfControl node {}...", config.node.id);

    if config.persistence.backend != wolfcontrol::config::StoreBackend::Memory {
        std::fs::create_dir_all(config.data_dir()).with_context(|| {
            format!("failed to create data directory {}", config.data_dir().display())
        })?;
    }

    let node = ManagementNode::open(config).context("failed to open the shared store")?;
    node.start(mode)
        .await
        .with_context(|| format!("node {} failed to start in {} mode", node.node_id(), mode))?;

    if let Some(report) = node.last_report().await {
        println!("Rebind: {}", report.summary());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    node.shutdown().await?;
    tracing::info!("WolfControl node stopped");
    Ok(())
}

/// Print the management plane as seen in the store
async fn run_status(config: WolfControlConfig) -> anyhow::Result<()> {
    let store = store::open(&config.persistence)?;
    let publisher = NodeRecordPublisher::new(store.clone(), config.write_timeout());
    let plane = publisher
        .read_plane()
        .await?
        .with_awol_marked(chrono::Utc::now(), config.failure_timeout());
    let summary = plane.summary();

    println!("Management Plane ({})", store.summary_name());
    println!("  Master: {}", summary.master_id.as_deref().unwrap_or("(none)"));
    println!(
        "  Nodes: {} ({} master, {} standby, {} failed, {} terminated)",
        summary.total_nodes,
        summary.master_nodes,
        summary.standby_nodes,
        summary.failed_nodes,
        summary.terminated_nodes
    );
    for record in plane.nodes.values() {
        println!(
            "  {:<20} {:<13} priority {:<4} {} {}",
            record.node_id,
            record.status.to_string(),
            record.priority,
            record.timestamp_utc.to_rfc3339(),
            record.uri.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Print the persisted manifest
async fn run_manifest(config: WolfControlConfig) -> anyhow::Result<()> {
    let store = store::open(&config.persistence)?;
    let mementos = MementoStore::new(store, &config.persistence, config.write_timeout());
    let manifest = mementos.load_snapshot().await?.manifest;

    if manifest.is_empty() {
        println!("No persisted objects");
        return Ok(());
    }
    for (id, entry) in &manifest.entries {
        println!(
            "{:<10} {:<30} {:<40} {}",
            entry.kind.to_string(),
            id,
            entry.type_tag,
            entry.platform_version
        );
    }
    println!("{} objects", manifest.len());
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: &PathBuf, node_id: &str) -> anyhow::Result<()> {
    let config_content = format!(
        r#"# WolfControl Configuration
# Generated configuration file

[node]
id = "{node_id}"
# uri = "http://node-1.example.com:8081"

[ha]
start_mode = "auto"
poll_interval_ms = 1000
failure_timeout_ms = 5000
write_timeout_ms = 5000
priority = 0

[persistence]
backend = "file"
data_dir = "/var/lib/wolfcontrol"
compression = true
max_concurrent_writes = 10
queue_capacity = 10000
persist_period_ms = 1000
checkpoint_interval_ms = 300000

[rebind]
strict = false
fail_on_activation_error = false

[logging]
level = "info"
format = "pretty"
"#
    );

    WolfControlConfig::from_str(&config_content).context("generated configuration is invalid")?;
    std::fs::write(output, config_content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nPoint every node's [persistence] at the same shared store.");
    println!("Then start with: wolfcontrol start --config {}", output.display());

    Ok(())
}

/// Validate the configuration and rebind the persisted state without activating a node
async fn run_validate(config: WolfControlConfig) -> anyhow::Result<()> {
    println!("✓ Configuration is valid");
    println!("  Node ID: {}", config.node.id);
    println!("  Start mode: {}", config.ha.start_mode);
    println!(
        "  Poll / failure timeout: {:?} / {:?}",
        config.poll_interval(),
        config.failure_timeout()
    );

    let store = store::open(&config.persistence)?;
    println!("  Store: {}", store.summary_name());

    let mementos = MementoStore::new(store, &config.persistence, config.write_timeout());
    if !mementos.has_persisted_state().await? {
        println!("  No persisted state");
        return Ok(());
    }

    let engine = RebindEngine::new(
        std::sync::Arc::new(TypeRegistry::permissive()),
        RebindOptions::from(&config.rebind),
    );
    match engine.rebind(&mementos).await {
        Ok(outcome) => {
            println!("  Rebind: {}", outcome.report.summary());
            for issue in &outcome.report.issues {
                println!("    {}", issue);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Rebind failed: {}", e);
            Err(e.into())
        }
    }
}
