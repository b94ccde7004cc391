/// Getwork server - WebSocket miners on `/getwork/<wallet>/<worker>`
///
/// Miners get `{"new_job": {...}}` with a private work item and answer with
/// `{"miner_work": "<hex>"}`. Verdicts come back as `"block_accepted"` or
/// `"block_rejected"`.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use super::session::GetworkSession;
use crate::config::{MINER_TIMEOUT, PING_INTERVAL, WRITE_TIMEOUT};
use crate::error::{ProxyError, Result};
use crate::jobs::JobRegistry;
use crate::net::bind_listener;
use crate::shares::{ShareRelay, ShareTarget};
use crate::work::{extra_nonce_prefix_matches, WorkItem};

const DEFAULT_WORKER: &str = "default";

#[derive(Debug, Deserialize)]
struct MinerWork {
    miner_work: String,
}

/// `/getwork/<wallet>/<worker>`; the worker segment is optional
pub fn parse_getwork_path(path: &str) -> Option<(String, String)> {
    let mut segments = path.trim_matches('/').split('/');
    if segments.next()? != "getwork" {
        return None;
    }
    let wallet = segments.next().filter(|w| !w.is_empty())?;
    let worker = segments
        .next()
        .filter(|w| !w.is_empty())
        .unwrap_or(DEFAULT_WORKER);
    if segments.next().is_some() {
        return None;
    }
    Some((wallet.to_string(), worker.to_string()))
}

pub struct GetworkServer {
    registry: Arc<JobRegistry>,
    relay: Arc<ShareRelay>,
    sessions: Mutex<Vec<Arc<GetworkSession>>>,
    miner_timeout: Duration,
}

impl GetworkServer {
    pub fn new(registry: Arc<JobRegistry>, relay: Arc<ShareRelay>) -> Arc<Self> {
        Self::with_timeout(registry, relay, MINER_TIMEOUT)
    }

    /// Miners silent for `miner_timeout` (no frame at all, pongs included)
    /// are dropped
    pub fn with_timeout(
        registry: Arc<JobRegistry>,
        relay: Arc<ShareRelay>,
        miner_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            relay,
            sessions: Mutex::new(Vec::new()),
            miner_timeout,
        })
    }

    pub async fn start(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = bind_listener(addr)?;
        tracing::info!("✅ Getwork server listening on {}", addr);

        let pinger = Arc::clone(&self);
        tokio::spawn(async move {
            pinger.ping_loop().await;
        });

        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer_addr).await {
                            tracing::warn!("Getwork connection error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let mut path = String::new();
        let ws = accept_hdr_async(socket, |req: &Request, resp: Response| {
            path = req.uri().path().to_string();
            Ok::<Response, ErrorResponse>(resp)
        })
        .await?;

        let (mut write, mut read) = ws.split();

        let Some((wallet, worker)) = parse_getwork_path(&path) else {
            tracing::warn!("Getwork miner {} used invalid path {}", peer_addr, path);
            let _ = write.send(Message::Close(None)).await;
            return Err(ProxyError::Protocol(format!("invalid getwork path {}", path)));
        };

        tracing::info!(
            "⛏️ Getwork miner with address {} worker {} IP {} connected",
            wallet,
            worker,
            peer_addr
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let session = GetworkSession::new(peer_addr, wallet, worker, tx);
        self.sessions.lock().await.push(Arc::clone(&session));

        let writer_session = Arc::clone(&session);
        let mut writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match tokio::time::timeout(WRITE_TIMEOUT, write.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Getwork miner {} disconnected: {}", writer_session.peer_addr, e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("Getwork miner {} write timed out", writer_session.peer_addr);
                        break;
                    }
                }
            }
            writer_session.mark_dead();
            let _ = write.close().await;
        });

        let job = self.registry.snapshot().await;
        if job.is_ready() {
            session.push_job(&job).await;
        }

        loop {
            tokio::select! {
                frame = tokio::time::timeout(self.miner_timeout, read.next()) => {
                    let Ok(frame) = frame else {
                        tracing::warn!("⏱️ Getwork miner {} timed out", peer_addr);
                        break;
                    };
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!("getwork <<< {}", text);
                            if let Err(e) = self.handle_message(&session, &text).await {
                                tracing::warn!("Getwork miner {} disconnected: {}", peer_addr, e);
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            tracing::warn!("Getwork miner {} sent a binary frame", peer_addr);
                            break;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("Getwork miner {} disconnected: {}", peer_addr, e);
                            break;
                        }
                    }
                }
                _ = &mut writer_task => break,
            }
        }

        session.close().await;
        self.sessions
            .lock()
            .await
            .retain(|s| !Arc::ptr_eq(s, &session));

        tracing::info!("🔌 Getwork miner {} disconnected", peer_addr);
        Ok(())
    }

    /// Handle one text frame. Errors close the session.
    pub async fn handle_message(&self, session: &Arc<GetworkSession>, text: &str) -> Result<()> {
        let submission: MinerWork = serde_json::from_str(text)?;
        let work = WorkItem::from_hex(submission.miner_work.trim())?;

        if session.find_work(&work).await.is_none() {
            let current = self.registry.snapshot().await;
            if extra_nonce_prefix_matches(&work.extra_nonce(), &current.blob.extra_nonce()) {
                tracing::warn!(
                    "Getwork miner {} sent unknown work {}, share is probably stale",
                    session.peer_addr,
                    hex::encode(work.work_hash())
                );
            } else {
                tracing::warn!(
                    "Getwork miner {} sent work with a foreign extra nonce {}",
                    session.peer_addr,
                    hex::encode(work.extra_nonce())
                );
            }
            session.reject().await;
            return Ok(());
        }

        tracing::info!(
            "💎 Getwork miner {} found a share, nonce {}",
            session.peer_addr,
            work.nonce()
        );

        self.relay
            .submit(
                work,
                ShareTarget::Getwork {
                    session: Arc::clone(session),
                },
            )
            .await;
        Ok(())
    }

    /// Push the current job to every live session, pruning closed ones
    pub async fn broadcast_job(&self) -> usize {
        let job = self.registry.snapshot().await;
        if !job.is_ready() {
            return 0;
        }

        let sessions = {
            let mut sessions = self.sessions.lock().await;
            sessions.retain(|s| s.is_alive());
            sessions.clone()
        };

        for session in &sessions {
            let session = Arc::clone(session);
            let job = job.clone();
            tokio::spawn(async move {
                session.push_job(&job).await;
            });
        }

        if !sessions.is_empty() {
            tracing::info!("📢 Sending job to {} getwork miners", sessions.len());
        }
        sessions.len()
    }

    /// WebSocket ping to every live session; the pong counts as activity
    pub async fn ping_all(&self) {
        let sessions = self.sessions.lock().await.clone();
        for session in sessions {
            tokio::spawn(async move {
                session.ping().await;
            });
        }
    }

    async fn ping_loop(&self) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.ping_all().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
