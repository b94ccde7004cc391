/// Getwork miner session
///
/// Same job bookkeeping as a stratum session, but miners receive whole work
/// items and return them solved, so stale detection matches on work hash and
/// extra-nonce instead of a job id.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::{ProxyError, Result};
use crate::jobs::{generate_job_id, Job, JobHistory, PastJob};
use crate::shares::tracker::GETWORK_REJECTED;
use crate::shares::ShareResult;
use crate::work::WorkItem;

pub struct GetworkSession {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub wallet: String,
    pub worker: String,
    alive: AtomicBool,
    inner: Mutex<GetworkState>,
}

struct GetworkState {
    jobs: JobHistory,
    /// Version of the newest job sent
    job_version: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl GetworkState {
    fn send_text(&self, text: String) -> Result<()> {
        tracing::debug!("getwork >>> {}", text);
        let tx = self.outbound.as_ref().ok_or(ProxyError::SessionClosed)?;
        tx.send(Message::Text(text))
            .map_err(|_| ProxyError::SessionClosed)
    }
}

impl GetworkSession {
    pub fn new(
        peer_addr: SocketAddr,
        wallet: String,
        worker: String,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            peer_addr,
            wallet,
            worker,
            alive: AtomicBool::new(true),
            inner: Mutex::new(GetworkState {
                jobs: JobHistory::default(),
                job_version: 0,
                outbound: Some(outbound),
            }),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        self.mark_dead();
        state.outbound = None;
    }

    /// Stamp a fresh extra-nonce on a copy of the job item and send it.
    /// A job older than the last one sent is dropped.
    pub async fn push_job(&self, job: &Job) -> Option<PastJob> {
        let mut state = self.inner.lock().await;
        if !self.is_alive() || job.version < state.job_version {
            return None;
        }
        state.job_version = job.version;

        let mut work = job.blob;
        work.generate_extra_nonce();
        let past = PastJob {
            job_id: generate_job_id(),
            work,
        };
        state.jobs.push(past);

        let message = json!({ "new_job": job.template_for(&work) }).to_string();
        if let Err(e) = state.send_text(message) {
            tracing::warn!("Getwork miner {} disconnected: {}", self.peer_addr, e);
            self.mark_dead();
            state.outbound = None;
            return None;
        }
        Some(past)
    }

    pub async fn ping(&self) {
        let mut state = self.inner.lock().await;
        if !self.is_alive() {
            return;
        }
        let sent = state
            .outbound
            .as_ref()
            .map(|tx| tx.send(Message::Ping(Vec::new())).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::debug!("ping to getwork miner {} failed", self.peer_addr);
            self.mark_dead();
            state.outbound = None;
        }
    }

    pub async fn find_work(&self, work: &WorkItem) -> Option<PastJob> {
        self.inner.lock().await.jobs.find_work(work).copied()
    }

    pub async fn reject(&self) {
        self.send_token(GETWORK_REJECTED).await;
    }

    /// Write the pool's verdict; skipped once closed
    pub async fn deliver(&self, result: &ShareResult) {
        self.send_token(result.getwork_token()).await;
    }

    async fn send_token(&self, token: &str) {
        let state = self.inner.lock().await;
        if !self.is_alive() {
            tracing::debug!("getwork session {} closed, skipping response", self.session_id);
            return;
        }
        if let Err(e) = state.send_text(token.to_string()) {
            tracing::warn!("failed to send getwork response to {}: {}", self.peer_addr, e);
        }
    }
}
