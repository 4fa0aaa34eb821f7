use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use txsync::{
    config::{self, Config},
    crypto::{self, NodeId},
    metrics::{self, PrometheusStatistics},
    simulation::{self, LocalNetwork, SimConfig},
};

const EMBEDDED_CONFIG: &str = include_str!("../config.toml");

#[derive(Parser)]
#[command(author, version, about = "txsync: peer transaction ingestion and tree-routed propagation")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run an in-process network and broadcast a batch along the routing tree
    Simulate {
        #[arg(long, default_value_t = 8)]
        nodes: usize,
        #[arg(long, default_value_t = 100)]
        txs: usize,
        /// Override router.branching from the config
        #[arg(long)]
        branching: Option<usize>,
        /// Node the batch is injected at (also the tree root)
        #[arg(long, default_value_t = 0)]
        entry: usize,
    },
    /// Generate a node identity and print it
    NodeId,
    /// Validate the config file and print the resolved settings
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config from the CLI path, else the embedded default
    let cfg = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) if matches!(cli.cmd, Cmd::CheckConfig) => return Err(e),
        Err(e) => {
            eprintln!("could not read config from '{}': {e:#}; using built-in defaults", cli.config);
            config::load_from_str(EMBEDDED_CONFIG).context("embedded default config is invalid")?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level)),
        )
        .init();

    match cli.cmd {
        Cmd::Simulate { nodes, txs, branching, entry } => simulate(&cfg, nodes, txs, branching, entry),
        Cmd::NodeId => {
            let (pk, _sk) = crypto::dilithium3_keypair();
            println!("{}", NodeId::from_pk(&pk).to_hex());
            Ok(())
        }
        Cmd::CheckConfig => {
            println!("{cfg:#?}");
            Ok(())
        }
    }
}

fn simulate(cfg: &Config, nodes: usize, txs: usize, branching: Option<usize>, entry: usize) -> Result<()> {
    anyhow::ensure!(nodes > 0, "need at least one node");
    anyhow::ensure!(entry < nodes, "entry node {entry} out of range for {nodes} nodes");

    let sim_cfg = SimConfig {
        nodes,
        branching: branching.unwrap_or(cfg.router.branching),
        protocol_version: cfg.sync.protocol_version,
        pool_capacity: cfg.pool.capacity,
        verify_chunk: cfg.sync.verify_chunk,
    };
    if !cfg.router.enabled {
        warn!("router.enabled is false; the simulation always routes by tree");
    }

    let stats = Arc::new(PrometheusStatistics::new()?);
    if cfg.metrics.enabled {
        metrics::serve(&cfg.metrics.bind, stats.registry().clone())?;
    }

    let mut network = LocalNetwork::with_statistics(&sim_cfg, stats.clone());
    let batch = simulation::generate_transactions(txs)?;
    let root = network
        .root_index_of(entry)
        .context("entry node missing from network")?;
    let message = simulation::tree_message(&batch, network.protocol_version(), root)?;
    info!(nodes, txs, branching = sim_cfg.branching, bytes = message.len(), "injecting batch");

    let started = Instant::now();
    network.inject(entry, message, NodeId::random());
    let report = network.run_until_quiescent(cfg.sync.signature_check, nodes.saturating_mul(2).max(4))?;

    println!("rounds:          {}", report.rounds);
    println!("messages routed: {}", report.messages_routed);
    println!("pool imports:    {}", report.imported);
    println!("received bytes:  {}", stats.received_bytes());
    println!("forwarded bytes: {}", stats.sent_bytes());
    println!("elapsed:         {:?}", started.elapsed());
    for (node, size) in network.nodes().iter().zip(&report.pool_sizes) {
        println!("  {} pool={}", node.id, size);
    }
    Ok(())
}
