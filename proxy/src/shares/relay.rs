/// Share relay - registers shares and forwards them to the pool
///
/// Verdicts are matched back by recomputing the share id from the work item
/// the pool echoes.

use std::sync::Arc;
use tokio::task::JoinHandle;

use super::tracker::{ShareId, ShareResult, ShareTarget, ShareTracker};
use crate::stratum::protocol::StratumError;
use crate::upstream::{PoolConnector, PoolShare};
use crate::work::WorkItem;

pub struct ShareRelay {
    tracker: Arc<ShareTracker>,
    pool: Arc<dyn PoolConnector>,
}

impl ShareRelay {
    pub fn new(tracker: Arc<ShareTracker>, pool: Arc<dyn PoolConnector>) -> Self {
        Self { tracker, pool }
    }

    pub fn tracker(&self) -> &Arc<ShareTracker> {
        &self.tracker
    }

    /// Track `work` and hand it to the pool. Returns the waiter task when the
    /// share was registered.
    pub async fn submit(
        &self,
        work: WorkItem,
        target: ShareTarget,
    ) -> Option<JoinHandle<ShareResult>> {
        let share = PoolShare::new(work);

        let waiter = match self.tracker.register(share.id, target.clone()) {
            Ok(waiter) => waiter,
            Err(e) => {
                // the original entry still waits for its own verdict
                tracing::warn!("❌ Share not forwarded: {}", e);
                target
                    .deliver(&ShareResult::rejected(StratumError::submit_failed()))
                    .await;
                return None;
            }
        };

        tracing::info!("⛏️ Share found, submitting to pool");
        tracing::debug!(
            "Share ID: {}, hash: {}, Encoded: {}",
            share.id,
            hex::encode(work.digest()),
            work.to_hex()
        );

        if let Err(e) = self.pool.submit(share) {
            tracing::error!("failed to submit share to pool: {}", e);
            self.submit_failed(&share.id);
        }

        Some(waiter)
    }

    /// Route a pool verdict. Verdicts without an echoed block can't be
    /// matched and are dropped; the share then runs into its timeout.
    pub fn handle_verdict(&self, work: Option<WorkItem>, result: ShareResult) -> bool {
        match work {
            Some(work) => {
                if result.accepted {
                    tracing::info!("✅ Share accepted by pool");
                } else {
                    tracing::warn!(
                        "❌ Share rejected by pool: {}",
                        result.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
                    );
                }
                self.tracker.resolve(&ShareId::from_work(&work), result)
            }
            None => {
                tracing::warn!(
                    "pool verdict (accepted={}) without block data, cannot match it to a share",
                    result.accepted
                );
                false
            }
        }
    }

    pub fn submit_failed(&self, id: &ShareId) -> bool {
        self.tracker
            .resolve(id, ShareResult::rejected(StratumError::submit_failed()))
    }
}
