//! `gwrs`: process wiring for the gateway engine. Parses CLI/env options,
//! loads the initial configuration, builds the reconciler and hands it the
//! initial config, starts the admin RPC listener, and waits for a shutdown
//! signal. Holds no engine logic itself — everything hard lives in
//! `gateway_core`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use gateway_core::accesslog::RingAccessLog;
use gateway_core::config::loader::{load_config_file, load_routes_dir, validate_unique_names};
use gateway_core::config::Configuration;
use gateway_core::reconcile::{Reconciler, ServiceIdentity};
use gateway_core::wasm_host::WasmHost;

#[derive(Parser)]
#[command(name = "gwrs")]
#[command(about = "L4/L7 reverse proxy and load balancer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the proxy until it receives a shutdown signal.
    Proxy(ProxyArgs),
}

#[derive(Parser, Debug)]
struct ProxyArgs {
    /// Bind address for the raw-TCP (L4) listener.
    #[arg(long, env = "TT_TCP_HOST_PORT", default_value = ":5700")]
    tcp_host_port: String,

    /// Bind address for the HTTP (L7) listener.
    #[arg(long, env = "TT_HTTP_HOST_PORT", default_value = ":5500")]
    http_host_port: String,

    /// Bind address for the admin RPC surface.
    #[arg(long, env = "TT_CONTROL_HOST_PORT", default_value = ":5600")]
    control_host_port: String,

    /// Bind address for cluster consensus traffic (delegated to the
    /// external consensus collaborator; accepted but unused locally).
    #[arg(long, env = "TT_RAFT_HOST_PORT", default_value = ":5800")]
    raft_host_port: String,

    /// Stable identifier for this node, surfaced on health-check routes.
    #[arg(long, env = "TT_NODE_ID", default_value_t = default_node_id())]
    node_id: String,

    /// Working directory for local state (snapshots, logs).
    #[arg(long, env = "TT_WORK_DIR", default_value = "./.tt")]
    work_dir: PathBuf,

    /// Ports a route is allowed to bind to.
    #[arg(long, env = "TT_ALLOWED_PORTS", value_delimiter = ',', default_values_t = [5500u16, 5600, 5700, 5800])]
    allowed_ports: Vec<u16>,

    /// Whether this node bootstraps a new cluster rather than joining one.
    #[arg(long, env = "TT_BOOTSTRAP", default_value_t = true)]
    bootstrap: bool,

    /// Address of an existing cluster member to join, if any.
    #[arg(long, env = "TT_JOIN", default_value = "")]
    join: String,

    /// Static labels attached to every connection's metadata, `key:value`.
    #[arg(long, env = "TT_LABELS", value_delimiter = ',')]
    labels: Vec<String>,

    /// Path to a top-level JSON configuration file.
    #[arg(long, env = "TT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of per-route JSON files, merged over `config`'s routes.
    #[arg(long, env = "TT_ROUTES_PATH")]
    routes_path: Option<PathBuf>,

    /// Enables the response-cache collaborator (delegated; accepted but
    /// unused locally — no in-process response cache is implemented here).
    #[arg(long, env = "TT_CACHE_ENABLED", default_value_t = false)]
    cache_enabled: bool,

    #[arg(long, env = "TT_CACHE_NUM_COUNTERS", default_value_t = 10_000_000)]
    cache_num_counters: u64,

    #[arg(long, env = "TT_CACHE_MAX_COST", default_value_t = 1 << 30)]
    cache_max_cost: u64,

    #[arg(long, env = "TT_CACHE_BUFFER_ITEMS", default_value_t = 64)]
    cache_buffer_items: u64,

    #[arg(long, env = "TT_CACHE_METRICS", default_value_t = false)]
    cache_metrics: bool,

    /// Enables the embedded wasm middleware host.
    #[arg(long, env = "TT_WASM_ENABLED", default_value_t = true)]
    wasm_enabled: bool,

    /// Directory `.wasm`/`.wat` plugin modules are loaded from.
    #[arg(long, env = "TT_WASM_MODULES_DIR", default_value = "./wasm")]
    wasm_modules_dir: PathBuf,

    #[arg(long, env = "TT_ACCESS_LOG_IN_BUFFER_SIZE", default_value_t = 100)]
    access_log_in_buffer_size: usize,

    #[arg(long, env = "TT_ACCESS_LOG_OUT_BUFFER_SIZE", default_value_t = 100)]
    access_log_out_buffer_size: usize,

    /// Release/version string surfaced on health-check routes.
    #[arg(long, env = "TT_RELEASE_ID", default_value = env!("CARGO_PKG_VERSION"))]
    release_id: String,
}

fn default_node_id() -> String {
    let mut seed = std::process::id() as u64;
    seed ^= std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    format!("node-{:04x}", (seed & 0xffff) as u16)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Proxy(args) => run_proxy(args).await,
    };

    if let Err(e) = &result {
        error!("fatal init error: {e:#}");
    }
    result
}

async fn run_proxy(args: &ProxyArgs) -> Result<()> {
    std::fs::create_dir_all(&args.work_dir)
        .with_context(|| format!("creating work directory {}", args.work_dir.display()))?;

    if args.cache_enabled {
        warn!(
            "cache-enabled requested (num_counters={}, max_cost={}, buffer_items={}, metrics={}) \
             but the response cache is delegated to an external collaborator not wired up in this process",
            args.cache_num_counters, args.cache_max_cost, args.cache_buffer_items, args.cache_metrics
        );
    }
    if !args.join.is_empty() || !args.bootstrap {
        warn!(
            "cluster join/bootstrap (join={:?}, bootstrap={}, raft_host_port={}) is delegated to \
             the external consensus collaborator; this node runs standalone",
            args.join, args.bootstrap, args.raft_host_port
        );
    }
    if !args.labels.is_empty() {
        info!("static labels configured: {:?}", args.labels);
    }

    let initial_config = load_initial_configuration(args)?;

    let identity = ServiceIdentity {
        version: env!("CARGO_PKG_VERSION").to_string(),
        release_id: args.release_id.clone(),
        service_id: args.node_id.clone(),
    };

    // The ring buffer has a single capacity; `access_log_in_buffer_size` is
    // accepted for interface parity with the out-of-scope shipping pipeline
    // (which has separate submit/drain-side buffers) but only the out-side
    // size shapes the in-process ring here.
    log::debug!(
        "access log buffers: in={} out={} (single ring, sized by out)",
        args.access_log_in_buffer_size, args.access_log_out_buffer_size
    );
    let access_log = Arc::new(RingAccessLog::new(args.access_log_out_buffer_size.max(1)));
    let wasm_host = WasmHost::new(args.wasm_modules_dir.clone());
    let shutdown = CancellationToken::new();

    let reconciler = Arc::new(Reconciler::new(
        args.tcp_host_port.clone(),
        args.http_host_port.clone(),
        args.allowed_ports.clone(),
        wasm_host,
        args.wasm_enabled,
        identity,
        access_log,
        shutdown.clone(),
    ));

    reconciler
        .apply(initial_config)
        .await
        .context("applying initial configuration")?;
    info!("initial configuration applied");

    let rpc_addr = args.control_host_port.clone();
    let rpc_reconciler = reconciler.clone();
    let rpc_cancel = shutdown.clone();
    let rpc_task = tokio::spawn(async move {
        if let Err(e) = gateway_core::rpc::run(rpc_addr, rpc_reconciler, rpc_cancel).await {
            error!("admin rpc surface exited: {e}");
        }
    });

    info!(
        "gwrs node {} running: tcp={} http={} control={}",
        args.node_id, args.tcp_host_port, args.http_host_port, args.control_host_port
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, stopping listeners");
    shutdown.cancel();

    let _ = rpc_task.await;
    Ok(())
}

fn load_initial_configuration(args: &ProxyArgs) -> Result<Configuration> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)
            .with_context(|| format!("loading configuration file {}", path.display()))?,
        None => Configuration::default(),
    };

    if let Some(dir) = &args.routes_path {
        load_routes_dir(&mut config, dir)
            .with_context(|| format!("loading routes directory {}", dir.display()))?;
    } else {
        validate_unique_names(&config).context("validating configuration")?;
    }

    Ok(config)
}
