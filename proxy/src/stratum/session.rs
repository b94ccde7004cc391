/// Per-connection state for stratum miners
///
/// Tracks:
/// - Protocol state (subscribe/authorize)
/// - Outgoing message ids
/// - The last jobs sent, for stale-share detection
///
/// Every write happens while holding the session lock, so multi-message
/// sequences (difficulty, extra-nonce, notify) never interleave with a
/// concurrent broadcast to the same miner.

use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use uuid::Uuid;

use super::protocol::{
    RequestOut, ResponseOut, StratumError, EXTRA_NONCE_SIZE, METHOD_NOTIFY, METHOD_PING,
    METHOD_SET_DIFFICULTY, METHOD_SET_EXTRANONCE,
};
use crate::error::{ProxyError, Result};
use crate::jobs::{generate_job_id, stratum_algorithm, Job, JobHistory, PastJob};
use crate::shares::ShareResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state after connection
    Connected,
    /// After mining.subscribe
    Subscribed,
    /// After mining.authorize
    Authorized,
    Closed,
}

pub struct StratumSession {
    /// Internal id, only used in logs
    pub session_id: String,
    pub peer_addr: SocketAddr,
    alive: AtomicBool,
    inner: Mutex<SessionState>,
}

pub struct SessionState {
    pub state: ConnectionState,
    pub agent: Option<String>,
    pub wallet: Option<String>,
    pub worker: Option<String>,
    pub last_out_id: u32,
    pub jobs: JobHistory,
    /// Version of the newest job sent
    job_version: u64,
    /// Lines for the writer task; `None` once closed
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl StratumSession {
    pub fn new(peer_addr: SocketAddr, outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            peer_addr,
            alive: AtomicBool::new(true),
            inner: Mutex::new(SessionState {
                state: ConnectionState::Connected,
                agent: None,
                wallet: None,
                worker: None,
                last_out_id: 0,
                jobs: JobHistory::default(),
                job_version: 0,
                outbound: Some(outbound),
            }),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().await
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flag the session dead without taking the lock (writer task failure)
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Close while already holding the lock. Dropping the outbound sender
    /// lets the writer task drain and shut the socket.
    pub fn close_locked(&self, state: &mut SessionState) {
        self.mark_dead();
        state.state = ConnectionState::Closed;
        state.outbound = None;
    }

    pub async fn close(&self) {
        let mut state = self.lock().await;
        self.close_locked(&mut state);
    }

    /// Send a freshly stamped copy of `job`, unless the miner already has a
    /// newer one
    pub async fn push_job(&self, job: &Job) {
        let mut state = self.lock().await;
        if !self.is_alive() {
            return;
        }
        if state.is_superseded(job) {
            tracing::debug!(
                "skipping job version {} for {}, already sent {}",
                job.version,
                self.peer_addr,
                state.job_version
            );
            return;
        }
        if let Err(e) = state.send_job(job) {
            tracing::warn!("Miner {} disconnected while sending job: {}", self.peer_addr, e);
            self.close_locked(&mut state);
        }
    }

    pub async fn ping(&self) {
        let mut state = self.lock().await;
        if !self.is_alive() {
            return;
        }
        if let Err(e) = state.send_request(METHOD_PING, None) {
            tracing::debug!("ping to {} failed: {}", self.peer_addr, e);
            self.close_locked(&mut state);
        }
    }

    /// Write the pool's verdict for request `request_id`; skipped once closed
    pub async fn deliver(&self, request_id: Value, result: &ShareResult) {
        let mut state = self.lock().await;
        if !self.is_alive() {
            tracing::debug!(
                "stratum session {} closed, skipping share response",
                self.session_id
            );
            return;
        }

        let response = ResponseOut {
            id: request_id,
            result: json!(result.accepted),
            error: result.error.clone(),
        };
        if let Err(e) = state.write_json(&response) {
            tracing::warn!("failed to send share response to {}: {}", self.peer_addr, e);
        }
    }
}

impl SessionState {
    pub fn write_json<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        tracing::debug!("stratum >>> {}", line);
        line.push('\n');

        let tx = self.outbound.as_ref().ok_or(ProxyError::SessionClosed)?;
        tx.send(line).map_err(|_| ProxyError::SessionClosed)
    }

    pub fn respond(&mut self, id: Value, result: Value) -> Result<()> {
        self.write_json(&ResponseOut::success(id, result))
    }

    pub fn respond_error(&mut self, id: Value, result: Value, error: StratumError) -> Result<()> {
        self.write_json(&ResponseOut::error(id, result, error))
    }

    pub fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        self.last_out_id = self.last_out_id.wrapping_add(1);
        let request = RequestOut {
            id: self.last_out_id,
            method: method.to_string(),
            params,
        };
        self.write_json(&request)
    }

    /// Difficulty 0 means "accept anything" and goes out as u64::MAX
    pub fn send_difficulty(&mut self, difficulty: u64) -> Result<()> {
        let difficulty = if difficulty == 0 { u64::MAX } else { difficulty };
        self.send_request(METHOD_SET_DIFFICULTY, Some(json!([difficulty])))
    }

    pub fn is_superseded(&self, job: &Job) -> bool {
        job.version < self.job_version
    }

    /// Stamp a private copy of the job with a fresh extra-nonce, remember it
    /// and send difficulty, extra-nonce and notify.
    pub fn send_job(&mut self, job: &Job) -> Result<PastJob> {
        self.job_version = job.version;
        let mut work = job.blob;
        work.generate_extra_nonce();

        let past = PastJob {
            job_id: generate_job_id(),
            work,
        };
        self.jobs.push(past);

        tracing::debug!(
            "sending job {} (extra nonce {})",
            hex::encode(past.job_id),
            hex::encode(work.extra_nonce())
        );

        self.send_difficulty(job.difficulty)?;
        self.send_request(
            METHOD_SET_EXTRANONCE,
            Some(json!([hex::encode(work.extra_nonce()), EXTRA_NONCE_SIZE])),
        )?;
        self.send_request(
            METHOD_NOTIFY,
            Some(json!([
                hex::encode(past.job_id),
                format!("{:x}", work.timestamp()),
                hex::encode(work.work_hash()),
                stratum_algorithm(&job.algorithm),
                true,
            ])),
        )?;

        Ok(past)
    }
}
