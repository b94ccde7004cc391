pub mod config;
pub mod error;
pub mod jobs;
pub mod net;
pub mod proxy;
pub mod shares;
pub mod work;

// Miner-facing servers
pub mod getwork;
pub mod stratum;

// Pool-facing client
pub mod upstream;

pub use error::{ProxyError, Result};
pub use proxy::MiningProxy;
