/// Mining proxy - wires the pool connection to both miner-facing servers
///
/// Owns the job registry, the share tracker/relay and the two servers, and
/// consumes the pool's event stream.

use anyhow::Context;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::getwork::GetworkServer;
use crate::jobs::{Job, JobRegistry};
use crate::shares::{ShareRelay, ShareResult, ShareTracker};
use crate::stratum::protocol::StratumError;
use crate::stratum::StratumServer;
use crate::upstream::{PoolConnector, PoolEvent};

pub struct MiningProxy {
    registry: Arc<JobRegistry>,
    relay: Arc<ShareRelay>,
    stratum: Arc<StratumServer>,
    getwork: Arc<GetworkServer>,
}

impl MiningProxy {
    pub fn new(pool: Arc<dyn PoolConnector>, share_timeout: Duration) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(ShareTracker::new(share_timeout));
        let relay = Arc::new(ShareRelay::new(tracker, pool));

        Arc::new(Self {
            stratum: StratumServer::new(Arc::clone(&registry), Arc::clone(&relay)),
            getwork: GetworkServer::new(Arc::clone(&registry), Arc::clone(&relay)),
            registry,
            relay,
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<ShareRelay> {
        &self.relay
    }

    pub fn stratum(&self) -> &Arc<StratumServer> {
        &self.stratum
    }

    pub fn getwork(&self) -> &Arc<GetworkServer> {
        &self.getwork
    }

    pub async fn handle_event(&self, event: PoolEvent) {
        match event {
            PoolEvent::NewJob(template) => {
                let job = match Job::from_template(&template) {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::error!("invalid job from pool: {}", e);
                        return;
                    }
                };

                tracing::info!(
                    "📦 New job with difficulty {} for algorithm {} (height {})",
                    job.difficulty,
                    job.algorithm,
                    job.height
                );
                tracing::debug!(
                    "blob public key {}, target {}",
                    hex::encode(job.blob.public_key()),
                    hex::encode(job.target)
                );

                self.registry.install(job).await;
                self.stratum.broadcast_job().await;
                self.getwork.broadcast_job().await;
            }
            PoolEvent::Accepted { work } => {
                self.relay.handle_verdict(work, ShareResult::accepted());
            }
            PoolEvent::Rejected { work, reason } => {
                self.relay.handle_verdict(
                    work,
                    ShareResult::rejected(StratumError::rejected_by_pool(&reason)),
                );
            }
            PoolEvent::SubmitFailed { id } => {
                self.relay.submit_failed(&id);
            }
        }
    }

    /// Consume pool events until the connector drops its sender
    pub async fn run_events(&self, mut events: mpsc::UnboundedReceiver<PoolEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::warn!("pool event stream ended");
    }

    /// Start both servers and process pool events. Returns when any of them stops.
    pub async fn run(
        self: Arc<Self>,
        config: &Config,
        events: mpsc::UnboundedReceiver<PoolEvent>,
    ) -> anyhow::Result<()> {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let stratum_addr = SocketAddr::new(any, config.stratum_bind_port);
        let getwork_addr = SocketAddr::new(any, config.getwork_bind_port);

        let stratum = Arc::clone(&self.stratum);
        let getwork = Arc::clone(&self.getwork);
        tracing::info!(
            "Shares time out after {}s without a pool verdict",
            self.relay.tracker().timeout().as_secs()
        );

        tokio::select! {
            res = stratum.start(stratum_addr) => {
                res.with_context(|| format!("stratum server on {}", stratum_addr))
            }
            res = getwork.start(getwork_addr) => {
                res.with_context(|| format!("getwork server on {}", getwork_addr))
            }
            _ = self.run_events(events) => Ok(()),
        }
    }
}
