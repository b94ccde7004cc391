/// Share tracker - correlates in-flight shares with pool verdicts
///
/// Each pending share is resolved exactly once: either the pool's verdict
/// arrives through [`ShareTracker::resolve`] or the timeout waiter gives up.
/// Whoever removes the entry from the map owns the resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};
use crate::getwork::GetworkSession;
use crate::stratum::protocol::StratumError;
use crate::stratum::StratumSession;
use crate::work::WorkItem;

/// Default time to wait for a pool verdict
pub const SHARE_TIMEOUT: Duration = Duration::from_secs(30);

/// Getwork verdict tokens, sent as JSON string literals
pub const GETWORK_ACCEPTED: &str = "\"block_accepted\"";
pub const GETWORK_REJECTED: &str = "\"block_rejected\"";

/// extra_nonce(32) || nonce(8)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShareId([u8; 40]);

impl ShareId {
    pub fn new(extra_nonce: &[u8; 32], nonce: &[u8; 8]) -> Self {
        let mut id = [0u8; 40];
        id[..32].copy_from_slice(extra_nonce);
        id[32..].copy_from_slice(nonce);
        Self(id)
    }

    pub fn from_work(work: &WorkItem) -> Self {
        Self::new(&work.extra_nonce(), &work.nonce_bytes())
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareResult {
    pub accepted: bool,
    pub error: Option<StratumError>,
}

impl ShareResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(error: StratumError) -> Self {
        Self {
            accepted: false,
            error: Some(error),
        }
    }

    pub fn getwork_token(&self) -> &'static str {
        if self.accepted {
            GETWORK_ACCEPTED
        } else {
            GETWORK_REJECTED
        }
    }
}

/// Where the verdict for a share has to go
#[derive(Clone)]
pub enum ShareTarget {
    Stratum {
        session: Arc<StratumSession>,
        request_id: Value,
    },
    Getwork {
        session: Arc<GetworkSession>,
    },
}

impl ShareTarget {
    pub async fn deliver(&self, result: &ShareResult) {
        match self {
            ShareTarget::Stratum {
                session,
                request_id,
            } => session.deliver(request_id.clone(), result).await,
            ShareTarget::Getwork { session } => session.deliver(result).await,
        }
    }
}

struct PendingShare {
    submitted_at: Instant,
    resolver: oneshot::Sender<ShareResult>,
}

type PendingMap = HashMap<ShareId, PendingShare>;

pub struct ShareTracker {
    pending: Arc<Mutex<PendingMap>>,
    timeout: Duration,
}

impl Default for ShareTracker {
    fn default() -> Self {
        Self::new(SHARE_TIMEOUT)
    }
}

// A poisoned map is still consistent: entries are only inserted or removed.
fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ShareTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending share and arm its timeout waiter.
    ///
    /// The returned task finishes once the outcome was delivered to `target`.
    pub fn register(&self, id: ShareId, target: ShareTarget) -> Result<JoinHandle<ShareResult>> {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&id) {
                return Err(ProxyError::DuplicateShare(id));
            }
            pending.insert(
                id,
                PendingShare {
                    submitted_at: Instant::now(),
                    resolver: tx,
                },
            );
            tracing::debug!("Added pending share {} (total pending: {})", id, pending.len());
        }

        let pending = self.pending.clone();
        let timeout = self.timeout;

        Ok(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => ShareResult::rejected(StratumError::submit_failed()),
                Err(_) => {
                    let expired = lock(&pending).remove(&id).is_some();
                    if expired {
                        tracing::warn!(
                            "Share {} timed out after {:?} waiting for pool response",
                            id,
                            timeout
                        );
                        ShareResult::rejected(StratumError::pool_timeout())
                    } else {
                        // lost the race, the verdict is already on its way
                        rx.await
                            .unwrap_or_else(|_| ShareResult::rejected(StratumError::submit_failed()))
                    }
                }
            };

            tracing::debug!("Share {}: sending result (accepted={})", id, result.accepted);
            target.deliver(&result).await;
            result
        }))
    }

    /// Hand a verdict to a pending share. Returns false for unknown ids.
    pub fn resolve(&self, id: &ShareId, result: ShareResult) -> bool {
        let entry = {
            let mut pending = lock(&self.pending);
            let entry = pending.remove(id);
            if entry.is_some() {
                tracing::debug!("Removed pending share {} (total pending: {})", id, pending.len());
            }
            entry
        };

        match entry {
            Some(share) => {
                tracing::debug!(
                    "Share {} resolved after {:?}",
                    id,
                    share.submitted_at.elapsed()
                );
                // waiter gone means the runtime is shutting down
                let _ = share.resolver.send(result);
                true
            }
            None => {
                tracing::warn!("Received verdict for unknown or expired share: {}", id);
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn stratum_target(
        request_id: u64,
    ) -> (ShareTarget, mpsc::UnboundedReceiver<String>, Arc<StratumSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let session = StratumSession::new(addr, tx);
        (
            ShareTarget::Stratum {
                session: session.clone(),
                request_id: json!(request_id),
            },
            rx,
            session,
        )
    }

    fn id(byte: u8, nonce: u64) -> ShareId {
        ShareId::new(&[byte; 32], &nonce.to_be_bytes())
    }

    fn responses(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(serde_json::from_str(line.trim_end()).unwrap());
        }
        out
    }

    #[test]
    fn test_share_id_is_deterministic() {
        let mut work = WorkItem::new([1; 32], [0xEE; 32], [3; 32]);
        work.set_nonce(1);

        let a = ShareId::from_work(&work);
        let b = ShareId::new(&[0xEE; 32], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(a, b);

        let rendered = a.to_string();
        assert_eq!(rendered.len(), 80);
        assert!(rendered.starts_with(&"ee".repeat(32)));
        assert!(rendered.ends_with("0000000000000001"));
    }

    #[test]
    fn test_share_id_ignores_timestamp() {
        let mut a = WorkItem::new([1; 32], [2; 32], [3; 32]);
        let mut b = a;
        a.set_timestamp(1);
        b.set_timestamp(2);
        assert_eq!(ShareId::from_work(&a), ShareId::from_work(&b));
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let tracker = ShareTracker::default();
        let (target, mut rx, _session) = stratum_target(5);

        let handle = tracker.register(id(1, 1), target).unwrap();
        assert_eq!(tracker.pending_count(), 1);

        assert!(tracker.resolve(&id(1, 1), ShareResult::accepted()));
        assert!(!tracker.resolve(&id(1, 1), ShareResult::accepted()));

        assert_eq!(handle.await.unwrap(), ShareResult::accepted());
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(responses(&mut rx), vec![json!({"id": 5, "result": true})]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_refused() {
        let tracker = ShareTracker::default();
        let (first, _rx1, _s1) = stratum_target(1);
        let (second, _rx2, _s2) = stratum_target(2);

        let _handle = tracker.register(id(2, 2), first).unwrap();
        match tracker.register(id(2, 2), second) {
            Err(ProxyError::DuplicateShare(dup)) => assert_eq!(dup, id(2, 2)),
            other => panic!("expected duplicate error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(tracker.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_removes() {
        let tracker = ShareTracker::default();
        assert_eq!(tracker.timeout(), SHARE_TIMEOUT);
        let (target, mut rx, _session) = stratum_target(8);

        let handle = tracker.register(id(3, 3), target).unwrap();

        tokio::time::sleep(tracker.timeout() - Duration::from_secs(1)).await;
        assert_eq!(tracker.pending_count(), 1);

        let result = handle.await.unwrap();
        assert_eq!(result, ShareResult::rejected(StratumError::pool_timeout()));
        assert_eq!(tracker.pending_count(), 0);

        // late verdict is dropped
        assert!(!tracker.resolve(&id(3, 3), ShareResult::accepted()));

        assert_eq!(
            responses(&mut rx),
            vec![json!({"id": 8, "result": false, "error": {"code": -1, "message": "pool response timeout"}})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_verdict_before_timeout_wins() {
        let tracker = ShareTracker::default();
        let (target, mut rx, _session) = stratum_target(9);
        let handle = tracker.register(id(4, 4), target).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        tracker.resolve(
            &id(4, 4),
            ShareResult::rejected(StratumError::rejected_by_pool("low difficulty")),
        );

        let result = handle.await.unwrap();
        assert!(!result.accepted);

        // advancing past the deadline produces nothing more
        tokio::time::sleep(Duration::from_secs(60)).await;
        let sent = responses(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["error"]["message"], "rejected by pool: low difficulty");
    }

    #[tokio::test]
    async fn test_out_of_order_verdicts() {
        let tracker = ShareTracker::default();
        let (t1, mut rx1, _s1) = stratum_target(1);
        let (t2, mut rx2, _s2) = stratum_target(2);

        let h1 = tracker.register(id(0xA1, 1), t1).unwrap();
        let h2 = tracker.register(id(0xB2, 2), t2).unwrap();

        tracker.resolve(
            &id(0xB2, 2),
            ShareResult::rejected(StratumError::rejected_by_pool("stale")),
        );
        tracker.resolve(&id(0xA1, 1), ShareResult::accepted());

        assert!(h1.await.unwrap().accepted);
        assert!(!h2.await.unwrap().accepted);

        assert_eq!(responses(&mut rx1), vec![json!({"id": 1, "result": true})]);
        assert_eq!(responses(&mut rx2)[0]["result"], json!(false));
    }

    #[tokio::test]
    async fn test_closed_session_gets_nothing() {
        let tracker = ShareTracker::default();
        let (target, mut rx, session) = stratum_target(3);
        let handle = tracker.register(id(5, 5), target).unwrap();

        session.close().await;
        tracker.resolve(&id(5, 5), ShareResult::accepted());
        handle.await.unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_getwork_tokens() {
        assert_eq!(ShareResult::accepted().getwork_token(), "\"block_accepted\"");
        assert_eq!(
            ShareResult::rejected(StratumError::pool_timeout()).getwork_token(),
            "\"block_rejected\""
        );
    }
}
