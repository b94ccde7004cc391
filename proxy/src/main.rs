// XELIS Mining Proxy
//
// Stratum (TCP) and getwork (WebSocket) miners behind a single getwork pool
// connection.

use clap::Parser;
use mining_proxy::config::{Config, DEFAULT_CONFIG_FILE, PLACEHOLDER_WALLET};
use mining_proxy::upstream::GetworkPool;
use mining_proxy::MiningProxy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Your XELIS address
    #[arg(long)]
    wallet: Option<String>,

    /// Mining pool url
    #[arg(long)]
    url: Option<String>,

    /// Verbose logs
    #[arg(long)]
    debug: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(wallet) = args.wallet.filter(|w| w != PLACEHOLDER_WALLET) {
        config.wallet = wallet;
    }
    if let Some(url) = args.url {
        config.pool_url = url;
    }
    if args.debug {
        config.debug = true;
    }

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    if args.save_config {
        config.save(&args.config)?;
        tracing::info!("💾 Configuration saved to {}", args.config.display());
    }

    config.validate()?;

    tracing::info!("🚀 XELIS Mining Proxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "OS: {} arch: {} threads: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    );

    let (pool, events) = GetworkPool::new(&config.pool_url, &config.wallet, &config.worker);
    tracing::info!("Pool endpoint: {}", pool.url());
    tokio::spawn(Arc::clone(&pool).run_loop());

    let proxy = MiningProxy::new(pool, config.share_timeout());
    proxy.run(&config, events).await
}
