/// Getwork WebSocket client for the upstream pool
///
/// Holds one connection to `ws://<pool>/getwork/<wallet>/<worker>`, forwards
/// queued shares as `{"miner_work": "<hex>"}` and turns incoming frames into
/// [`PoolEvent`]s. The connection is re-established forever.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{PoolConnector, PoolEvent, PoolShare};
use crate::config::RECONNECT_DELAY;
use crate::error::{ProxyError, Result};
use crate::jobs::JobTemplate;
use crate::work::WorkItem;

/// Shares waiting for the socket
const SUBMIT_QUEUE: usize = 64;

pub struct GetworkPool {
    url: String,
    submit_tx: mpsc::Sender<PoolShare>,
    submit_rx: Mutex<mpsc::Receiver<PoolShare>>,
    events: mpsc::UnboundedSender<PoolEvent>,
    connected: AtomicBool,
}

/// Build the getwork endpoint, prefixing `ws://` when no scheme is given
pub fn pool_endpoint(pool_url: &str, wallet: &str, worker: &str) -> String {
    let url = pool_url.trim().trim_end_matches('/');
    let url = if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        format!("ws://{}", url)
    };
    format!("{}/getwork/{}/{}", url, wallet, worker)
}

impl GetworkPool {
    pub fn new(
        pool_url: &str,
        wallet: &str,
        worker: &str,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PoolEvent>) {
        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE);
        let (events, events_rx) = mpsc::unbounded_channel();

        let pool = Arc::new(Self {
            url: pool_endpoint(pool_url, wallet, worker),
            submit_tx,
            submit_rx: Mutex::new(submit_rx),
            events,
            connected: AtomicBool::new(false),
        });
        (pool, events_rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn run_loop(self: Arc<Self>) {
        loop {
            tracing::info!("🔌 Starting a new connection to the pool {}", self.url);
            match self.connect_and_session().await {
                Ok(_) => tracing::warn!("Pool connection closed, reconnecting..."),
                Err(e) => tracing::error!("Pool connection error: {}", e),
            }
            if self.events.is_closed() {
                tracing::info!("Pool event consumer gone, stopping pool client");
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_and_session(&self) -> Result<()> {
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        self.connected.store(true, Ordering::Release);
        tracing::info!("✅ Connected to pool");

        let mut submit_rx = self.submit_rx.lock().await;

        let outcome = loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!("pool <<< {}", text);
                            match parse_message(&text) {
                                Ok(Some(event)) => self.emit(event),
                                Ok(None) => tracing::debug!("ignoring pool message: {}", text),
                                Err(e) => tracing::warn!("bad message from pool: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!("Pool closed the connection: {:?}", frame);
                            break Ok(());
                        }
                        // ping/pong is answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(ProxyError::from(e)),
                        None => break Ok(()),
                    }
                }

                share = submit_rx.recv() => {
                    let Some(share) = share else {
                        break Ok(());
                    };

                    let msg = json!({ "miner_work": share.work.to_hex() }).to_string();
                    tracing::debug!("pool >>> {}", msg);

                    if let Err(e) = write.send(Message::Text(msg)).await {
                        tracing::error!("failed to submit share {} to pool: {}", share.id, e);
                        self.emit(PoolEvent::SubmitFailed { id: share.id });
                        break Err(ProxyError::from(e));
                    }
                }
            }
        };

        self.connected.store(false, Ordering::Release);
        outcome
    }

    fn emit(&self, event: PoolEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("pool event dropped, no consumer");
        }
    }
}

impl PoolConnector for GetworkPool {
    fn submit(&self, share: PoolShare) -> Result<()> {
        if !self.is_connected() {
            return Err(ProxyError::PoolUnavailable("not connected".to_string()));
        }
        self.submit_tx.try_send(share).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProxyError::PoolUnavailable("submit queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ProxyError::PoolUnavailable("submit queue closed".to_string())
            }
        })
    }
}

fn echoed_work(value: Option<&Value>) -> Result<Option<WorkItem>> {
    match value.and_then(Value::as_str) {
        Some(hex) if !hex.is_empty() => Ok(Some(WorkItem::from_hex(hex)?)),
        _ => Ok(None),
    }
}

/// Decode one text frame from the pool. `Ok(None)` for messages the proxy
/// has no use for.
///
/// Verdicts are matched to shares by the block they echo
/// (`{"block_accepted": "<hex>"}`, `{"block_rejected": {"reason", "miner_work"}}`).
/// The bare forms (`"block_accepted"`, `{"block_rejected": "<reason>"}`)
/// decode with `work: None`; no share can be resolved from them, so against
/// a pool that only sends bare verdicts every share ends in
/// `pool response timeout`.
pub fn parse_message(text: &str) -> Result<Option<PoolEvent>> {
    let value: Value = serde_json::from_str(text.trim())?;

    let event = match value {
        Value::String(token) => match token.as_str() {
            "block_accepted" => PoolEvent::Accepted { work: None },
            "block_rejected" => PoolEvent::Rejected {
                work: None,
                reason: String::new(),
            },
            _ => return Ok(None),
        },
        Value::Object(map) => {
            if let Some(job) = map.get("new_job") {
                let template: JobTemplate = serde_json::from_value(job.clone())?;
                PoolEvent::NewJob(template)
            } else if let Some(accepted) = map.get("block_accepted") {
                PoolEvent::Accepted {
                    work: echoed_work(Some(accepted))?,
                }
            } else if let Some(rejected) = map.get("block_rejected") {
                match rejected {
                    Value::String(reason) => PoolEvent::Rejected {
                        work: None,
                        reason: reason.clone(),
                    },
                    Value::Object(details) => PoolEvent::Rejected {
                        work: echoed_work(details.get("miner_work"))?,
                        reason: details
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    other => {
                        return Err(ProxyError::Protocol(format!(
                            "unexpected block_rejected payload: {}",
                            other
                        )))
                    }
                }
            } else {
                return Ok(None);
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}
