use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ProxyError, Result};

/// Read deadline for the first two messages of a stratum connection
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Read deadline once a stratum miner is past the handshake
pub const MINER_TIMEOUT: Duration = Duration::from_secs(60);
/// Miners are pinged this long before their read deadline expires
pub const PING_INTERVAL: Duration = Duration::from_secs(MINER_TIMEOUT.as_secs() - 5);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const PLACEHOLDER_WALLET: &str = "YOUR_WALLET_ADDRESS";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_wallet")]
    pub wallet: String,
    /// `host:port`, optionally with a `ws://` or `wss://` scheme
    #[serde(default = "default_pool_url")]
    pub pool_url: String,
    /// Worker name presented to the pool
    #[serde(default = "default_worker")]
    pub worker: String,
    #[serde(default = "default_stratum_port")]
    pub stratum_bind_port: u16,
    #[serde(default = "default_getwork_port")]
    pub getwork_bind_port: u16,
    #[serde(default = "default_share_timeout")]
    pub share_timeout_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_wallet() -> String { PLACEHOLDER_WALLET.to_string() }
fn default_pool_url() -> String { "127.0.0.1:8080".to_string() }
fn default_worker() -> String { "xelis-mining-proxy".to_string() }
fn default_stratum_port() -> u16 { 5209 }
fn default_getwork_port() -> u16 { 5210 }
fn default_share_timeout() -> u64 { 30 }

impl Default for Config {
    fn default() -> Self {
        Self {
            wallet: default_wallet(),
            pool_url: default_pool_url(),
            worker: default_worker(),
            stratum_bind_port: default_stratum_port(),
            getwork_bind_port: default_getwork_port(),
            share_timeout_secs: default_share_timeout(),
            debug: false,
        }
    }
}

impl Config {
    /// Load `path`, writing the defaults out when it does not exist yet,
    /// then apply `PROXY_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(txt) => serde_json::from_str::<Config>(&txt).map_err(|e| {
                ProxyError::Config(format!("failed to decode {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("⚠️ {} not found, writing defaults", path.display());
                let cfg = Config::default();
                if let Err(e) = cfg.save(path) {
                    tracing::warn!("failed to write default configuration: {}", e);
                }
                cfg
            }
            Err(e) => return Err(e.into()),
        };

        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(w) = lookup("PROXY_WALLET") { self.wallet = w; }
        if let Some(u) = lookup("PROXY_POOL_URL") { self.pool_url = u; }
        if let Some(p) = lookup("PROXY_STRATUM_PORT") {
            self.stratum_bind_port = p.parse().unwrap_or(self.stratum_bind_port);
        }
        if let Some(p) = lookup("PROXY_GETWORK_PORT") {
            self.getwork_bind_port = p.parse().unwrap_or(self.getwork_bind_port);
        }
        if let Some(d) = lookup("PROXY_DEBUG") {
            self.debug = matches!(d.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Refuse to start while the wallet is unset
    pub fn validate(&self) -> Result<()> {
        let wallet = self.wallet.trim();
        if wallet.is_empty() || wallet == PLACEHOLDER_WALLET {
            return Err(ProxyError::Config(
                "wallet address is not set, edit the configuration or pass --wallet".to_string(),
            ));
        }
        if self.stratum_bind_port == self.getwork_bind_port {
            return Err(ProxyError::Config(format!(
                "stratum and getwork servers can't share port {}",
                self.stratum_bind_port
            )));
        }
        Ok(())
    }

    pub fn share_timeout(&self) -> Duration {
        Duration::from_secs(self.share_timeout_secs.max(1))
    }
}
