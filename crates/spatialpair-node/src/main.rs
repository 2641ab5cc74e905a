// ============================================
// File: crates/spatialpair-node/src/main.rs
// ============================================
//! # SpatialPair Entry Point
//!
//! ## Creation Reason
//! Command-line front end for pairing two devices with SpatialPair.
//! Handles CLI parsing, logging setup, configuration and node execution.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing (pretty or JSON)
//! - Configuration loading, validation and generation
//! - Listening for and initiating pairings
//!
//! ## Usage
//! ```bash
//! # Write a default config
//! spatialpair init-config spatialpair.toml
//!
//! # Device A waits for a peer
//! spatialpair listen --config spatialpair.toml --payload sample-a.bin
//!
//! # Device B pairs with it
//! spatialpair connect 192.168.1.20:54321 --config spatialpair.toml --payload sample-b.bin
//!
//! # Check a config file
//! spatialpair validate --config spatialpair.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The payload file stands in for the sensor: it is published into
//!   the payload slot every time a verification starts
//! - `RUST_LOG` overrides the configured log level
//! - Session keys are never printed
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spatialpair_common::RemoteParty;
use spatialpair_core::SessionKey;
use spatialpair_node::config::LogFormat;
use spatialpair_node::services::{oracle, PayloadSlot};
use spatialpair_node::{
    LoggingSink, Orchestrator, PairingConfig, PairingNode, ProtocolHooks, VerificationOutcome,
};
use spatialpair_transport::{PeerConnector, TcpPeerConnector};

// ============================================
// CLI Definition
// ============================================

/// SpatialPair device pairing
///
/// Quick Start:
///   1. Run: spatialpair init-config spatialpair.toml
///   2. On one device: spatialpair listen --payload <FILE>
///   3. On the other: spatialpair connect <ADDR> --payload <FILE>
#[derive(Parser, Debug)]
#[command(name = "spatialpair")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for peers and pair with each one that connects
    Listen {
        /// Path to configuration file
        #[arg(short, long, default_value = "spatialpair.toml")]
        config: PathBuf,

        /// File holding the local payload
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Pair with the peer listening at ADDR
    Connect {
        /// Peer address (e.g., 192.168.1.20:54321)
        addr: SocketAddr,

        /// Path to configuration file
        #[arg(short, long, default_value = "spatialpair.toml")]
        config: PathBuf,

        /// Parameter offered to the responder in the handshake
        #[arg(long)]
        param: Option<String>,

        /// File holding the local payload
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "spatialpair.toml")]
        config: PathBuf,
    },

    /// Write the default configuration to FILE
    InitConfig {
        /// Destination path
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Listen { config, payload } => cmd_listen(config, payload).await,
        Commands::Connect {
            addr,
            config,
            param,
            payload,
        } => cmd_connect(addr, config, param, payload).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::InitConfig { file, force } => cmd_init_config(file, force).await,
    };

    if let Err(e) = result {
        init_logging("info", LogFormat::Pretty);
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Runs a listening node until Ctrl+C.
async fn cmd_listen(config_path: PathBuf, payload_path: PathBuf) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    init_logging(&config.logging.level, config.logging.format);

    let orchestrator = build_orchestrator(config, &payload_path).await?;
    let node = Arc::new(PairingNode::bind_tcp(orchestrator).await?);

    {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
            node.shutdown();
        });
    }

    info!(addr = ?node.local_addr(), "Waiting for peers");
    node.run().await?;
    Ok(())
}

/// Pairs with one peer and reports the outcome.
async fn cmd_connect(
    addr: SocketAddr,
    config_path: PathBuf,
    param: Option<String>,
    payload_path: PathBuf,
) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    init_logging(&config.logging.level, config.logging.format);

    let connector = TcpPeerConnector::new(
        config.network.connect_timeout(),
        config.network.max_line_len,
    );
    let orchestrator = build_orchestrator(config, &payload_path).await?;

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.shutdown();
            }
        });
    }

    let conn = connector.connect(addr).await?;
    match orchestrator
        .initiate(RemoteParty::new(addr), conn, param)
        .await?
    {
        VerificationOutcome::Paired(paired) => {
            println!("✅ Paired with {addr}");
            if let Some(parameter) = paired.parameter {
                println!("   Parameter:  {parameter}");
            }
        }
        VerificationOutcome::Stopped { decisions, .. } => {
            println!("⏹  Continuous checking stopped after {decisions} decisions");
        }
    }
    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    init_logging("info", LogFormat::Pretty);

    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Defaults will be used.");
        return Ok(());
    }

    let config = PairingConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Handshake:");
    println!("   Protocol:        {}", config.handshake.protocol_name);
    println!("   Timeout:         {}ms", config.handshake.timeout_ms);
    println!(
        "   DH group:        {}",
        if config.handshake.dh_modulus_hex.is_some() { "custom" } else { "SKIP 1024" }
    );
    println!();
    println!("Interlock:");
    println!("   Rounds:          {}", config.interlock.rounds);
    println!("   Round timeout:   {}ms", config.interlock.round_timeout_ms);
    println!("   Mirror guard:    {}", config.interlock.mirror_attack_guard);
    println!();
    println!("Verification:");
    println!("   Payload grace:   {}ms", config.verification.payload_grace_ms);
    println!("   Status exchange: {}", config.verification.status_exchange);
    println!("   Continuous:      {}", config.verification.continuous_checking);
    println!("   Oracle:          {:?} (threshold {})", config.oracle.kind, config.oracle.threshold);
    println!();
    println!("Network:");
    println!("   Listen:          {}", config.network.listen_addr);
    println!();

    Ok(())
}

/// Writes the default configuration.
async fn cmd_init_config(file: PathBuf, force: bool) -> anyhow::Result<()> {
    if file.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", file.display());
    }
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&file, PairingConfig::default().to_toml()).await?;
    println!("✅ Wrote default configuration to {}", file.display());
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init().ok(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .ok(),
    };
}

/// Loads config, or the defaults if the file does not exist.
async fn load_or_default_config(path: &Path) -> anyhow::Result<PairingConfig> {
    if path.exists() {
        Ok(PairingConfig::load(path).await?)
    } else {
        Ok(PairingConfig::default())
    }
}

/// Builds the orchestrator with the file-backed payload hooks and a log sink.
async fn build_orchestrator(
    config: PairingConfig,
    payload_path: &Path,
) -> anyhow::Result<Arc<Orchestrator>> {
    let payload = tokio::fs::read(payload_path).await.map_err(|e| {
        anyhow::anyhow!("cannot read payload {}: {e}", payload_path.display())
    })?;
    if payload.is_empty() {
        anyhow::bail!("payload {} is empty", payload_path.display());
    }
    info!(bytes = payload.len(), "Local payload loaded");

    let oracle = oracle::from_config(&config.oracle)?;
    let orchestrator =
        Orchestrator::new(config, oracle)?.with_hooks(Arc::new(FilePayloadHooks { payload }));
    orchestrator.events().add(Arc::new(LoggingSink));
    Ok(Arc::new(orchestrator))
}

/// Publishes a fixed payload whenever a verification starts.
struct FilePayloadHooks {
    payload: Vec<u8>,
}

impl ProtocolHooks for FilePayloadHooks {
    fn start_verification(
        &self,
        remote: &RemoteParty,
        _parameter: Option<&str>,
        payload: &Arc<PayloadSlot>,
    ) {
        info!(remote = %remote, "Publishing local payload");
        payload.publish(self.payload.clone());
    }

    fn on_success(&self, remote: &RemoteParty, _session_key: &SessionKey) {
        info!(remote = %remote, "Session key established");
    }
}
