/// Stratum Server - line-delimited JSON-RPC for XELIS stratum miners
///
/// Handles:
/// - Subscribe/authorize handshake
/// - Per-miner job stamping (fresh extra-nonce per job)
/// - Share submission and stale-job rejection
/// - Keepalive pings

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use super::protocol::{
    RequestIn, StratumError, EXTRA_NONCE_SIZE, METHOD_AUTHORIZE, METHOD_PONG, METHOD_SUBMIT,
    METHOD_SUBSCRIBE,
};
use super::session::{ConnectionState, StratumSession};
use crate::config::{HANDSHAKE_TIMEOUT, MINER_TIMEOUT, PING_INTERVAL, WRITE_TIMEOUT};
use crate::error::{ProxyError, Result};
use crate::jobs::{JobId, JobRegistry};
use crate::net::bind_listener;
use crate::shares::{ShareRelay, ShareTarget};

/// What the reader loop does after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct StratumServer {
    registry: Arc<JobRegistry>,
    relay: Arc<ShareRelay>,
    sessions: Mutex<Vec<Arc<StratumSession>>>,
    handshake_timeout: Duration,
    miner_timeout: Duration,
}

impl StratumServer {
    pub fn new(registry: Arc<JobRegistry>, relay: Arc<ShareRelay>) -> Arc<Self> {
        Self::with_timeouts(registry, relay, HANDSHAKE_TIMEOUT, MINER_TIMEOUT)
    }

    pub fn with_timeouts(
        registry: Arc<JobRegistry>,
        relay: Arc<ShareRelay>,
        handshake_timeout: Duration,
        miner_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            relay,
            sessions: Mutex::new(Vec::new()),
            handshake_timeout,
            miner_timeout,
        })
    }

    /// Bind, start the pinger and serve forever
    pub async fn start(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = bind_listener(addr)?;
        tracing::info!("✅ Stratum server listening on {}", addr);

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
                    tracing::info!("🔌 New stratum connection from {}", peer_addr);

                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer_addr).await {
                            tracing::error!("Connection error from {}: {}", peer_addr, e);
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
        let (reader, mut writer) = socket.into_split();
        let mut reader = BufReader::new(reader);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = StratumSession::new(peer_addr, tx);
        self.sessions.lock().await.push(Arc::clone(&session));

        tracing::debug!("📝 Session registered: {} ({})", session.session_id, peer_addr);

        // Writer task: drains the queue until the session drops its sender
        let writer_session = Arc::clone(&session);
        let mut writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(msg.as_bytes())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Miner {} disconnected: {}", writer_session.peer_addr, e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("Miner {} write timed out", writer_session.peer_addr);
                        break;
                    }
                }
            }
            writer_session.mark_dead();
            let _ = writer.shutdown().await;
        });

        let mut line = String::new();
        let mut received = 0usize;
        loop {
            line.clear();
            let deadline = if received < 2 {
                self.handshake_timeout
            } else {
                self.miner_timeout
            };

            tokio::select! {
                read = tokio::time::timeout(deadline, reader.read_line(&mut line)) => {
                    match read {
                        Ok(Ok(0)) => {
                            tracing::info!("📥 Connection closed by miner: {}", peer_addr);
                            break;
                        }
                        Ok(Ok(_)) => {
                            received += 1;
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            tracing::debug!("stratum <<< {}", trimmed);

                            match self.handle_message(&session, trimmed).await {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Close) => break,
                                Err(e) => {
                                    tracing::warn!("Miner {} disconnected: {}", peer_addr, e);
                                    break;
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("Miner {} disconnected: {}", peer_addr, e);
                            break;
                        }
                        Err(_) => {
                            tracing::warn!("⏱️ Miner {} timed out", peer_addr);
                            break;
                        }
                    }
                }
                _ = &mut writer_task => {
                    tracing::debug!("writer for {} stopped", peer_addr);
                    break;
                }
            }
        }

        session.close().await;
        self.sessions
            .lock()
            .await
            .retain(|s| !Arc::ptr_eq(s, &session));

        tracing::info!("🔌 Connection closed: {} ({})", session.session_id, peer_addr);
        Ok(())
    }

    /// Handle one decoded line. Errors close the session.
    pub async fn handle_message(&self, session: &Arc<StratumSession>, message: &str) -> Result<Flow> {
        let request: RequestIn = serde_json::from_str(message)?;

        match request.method.as_str() {
            METHOD_SUBSCRIBE => self.handle_subscribe(session, request).await,
            METHOD_AUTHORIZE => self.handle_authorize(session, request).await,
            METHOD_SUBMIT => self.handle_submit(session, request).await,
            METHOD_PONG => Ok(Flow::Continue),
            other => {
                tracing::warn!("Unknown stratum method {} from {}", other, session.peer_addr);
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_subscribe(
        &self,
        session: &Arc<StratumSession>,
        request: RequestIn,
    ) -> Result<Flow> {
        let agent = request
            .params
            .as_array()
            .and_then(|params| params.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::Protocol("mining.subscribe without agent".to_string()))?
            .to_string();

        tracing::info!(
            "⛏️ Stratum miner with agent {} and IP {} connected",
            agent,
            session.peer_addr
        );

        let mut job = self.registry.snapshot().await;
        job.blob.generate_extra_nonce();

        let mut state = session.lock().await;
        state.agent = Some(agent);

        let public_key = job.blob.public_key();
        if public_key == [0u8; 32] {
            state.respond_error(request.id, Value::Null, StratumError::no_job_yet())?;
            session.close_locked(&mut state);
            return Ok(Flow::Close);
        }

        state.respond(
            request.id,
            json!([
                "",
                hex::encode(job.blob.extra_nonce()),
                EXTRA_NONCE_SIZE,
                hex::encode(public_key),
            ]),
        )?;
        state.state = ConnectionState::Subscribed;
        Ok(Flow::Continue)
    }

    async fn handle_authorize(
        &self,
        session: &Arc<StratumSession>,
        request: RequestIn,
    ) -> Result<Flow> {
        let params: Vec<String> = serde_json::from_value(request.params.clone())?;
        if params.len() < 3 {
            return Err(ProxyError::Protocol(format!(
                "mining.authorize needs 3 params, got {}",
                params.len()
            )));
        }

        let account = params[0].replace('.', "+");
        let mut parts = account.split('+');
        let wallet = parts.next().unwrap_or_default().to_string();
        let worker = parts.next().map(str::to_string);

        tracing::info!(
            "⛏️ Stratum miner with address {} IP {} authorized",
            wallet,
            session.peer_addr
        );

        let job = self.registry.snapshot().await;

        let mut state = session.lock().await;
        state.wallet = Some(wallet);
        state.worker = worker;
        state.state = ConnectionState::Authorized;
        state.respond(request.id, json!(true))?;

        if state.is_superseded(&job) {
            tracing::debug!("{} already has a newer job", session.peer_addr);
        } else if job.is_ready() {
            state.send_job(&job)?;
        } else {
            tracing::debug!("no job yet for {}", session.peer_addr);
        }
        Ok(Flow::Continue)
    }

    async fn handle_submit(&self, session: &Arc<StratumSession>, request: RequestIn) -> Result<Flow> {
        let params: Vec<String> = serde_json::from_value(request.params.clone())?;
        if params.len() != 3 {
            return Err(ProxyError::Protocol(format!(
                "mining.submit needs exactly 3 params, got {}",
                params.len()
            )));
        }

        let job_id = hex::decode(&params[1])?;
        let nonce = hex::decode(&params[2])?;
        let (job_id, nonce): (JobId, [u8; 8]) = match (job_id.try_into(), nonce.try_into()) {
            (Ok(job_id), Ok(nonce)) => (job_id, nonce),
            _ => {
                return Err(ProxyError::Protocol(format!(
                    "job id {} nonce {} do not match expected length (16, 8)",
                    params[1], params[2]
                )))
            }
        };

        let mut state = session.lock().await;
        let Some(past) = state.jobs.find(&job_id).copied() else {
            tracing::warn!(
                "unknown job id {}, share is probably stale",
                hex::encode(job_id)
            );
            state.respond_error(request.id, json!(false), StratumError::stale_share())?;
            return Ok(Flow::Continue);
        };

        let mut work = past.work;
        work.set_nonce_bytes(nonce);
        state.respond(request.id.clone(), json!(true))?;
        drop(state);

        tracing::info!(
            "💎 Stratum miner with IP {} found a share for job id {} nonce {}",
            session.peer_addr,
            hex::encode(job_id),
            work.nonce()
        );

        self.relay
            .submit(
                work,
                ShareTarget::Stratum {
                    session: Arc::clone(session),
                    request_id: request.id,
                },
            )
            .await;
        Ok(Flow::Continue)
    }

    /// Push the current job to every live session, pruning closed ones
    pub async fn broadcast_job(&self) -> usize {
        let job = self.registry.snapshot().await;
        if !job.is_ready() {
            return 0;
        }

        let sessions = {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.retain(|s| s.is_alive());
            tracing::debug!("stratum broadcast: going from {} to {} miners", before, sessions.len());
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
            tracing::info!("📢 Sending job to {} stratum miners", sessions.len());
        }
        sessions.len()
    }

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
        // first tick completes immediately
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Job;
    use crate::shares::ShareTracker;
    use crate::upstream::{PoolConnector, PoolShare};
    use crate::work::WorkItem;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingPool {
        shares: StdMutex<Vec<PoolShare>>,
    }

    impl PoolConnector for RecordingPool {
        fn submit(&self, share: PoolShare) -> Result<()> {
            self.shares.lock().unwrap().push(share);
            Ok(())
        }
    }

    struct Harness {
        server: Arc<StratumServer>,
        registry: Arc<JobRegistry>,
        pool: Arc<RecordingPool>,
    }

    fn harness() -> Harness {
        harness_with_timeouts(HANDSHAKE_TIMEOUT, MINER_TIMEOUT)
    }

    fn harness_with_timeouts(handshake: Duration, miner: Duration) -> Harness {
        let registry = Arc::new(JobRegistry::new());
        let pool = Arc::new(RecordingPool::default());
        let relay = Arc::new(ShareRelay::new(Arc::new(ShareTracker::default()), pool.clone()));
        Harness {
            server: StratumServer::with_timeouts(registry.clone(), relay, handshake, miner),
            registry,
            pool,
        }
    }

    async fn wait_for_sessions(server: &StratumServer, count: usize) -> bool {
        for _ in 0..100 {
            if server.session_count().await == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn session() -> (Arc<StratumSession>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StratumSession::new("10.0.0.1:3000".parse().unwrap(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(serde_json::from_str(line.trim_end()).unwrap());
        }
        out
    }

    async fn install_job(registry: &JobRegistry) -> Job {
        let job = Job {
            blob: WorkItem::new([0x11; 32], [0x22; 32], [0x33; 32]),
            difficulty: 1000,
            algorithm: "xel/v2".to_string(),
            ..Job::default()
        };
        registry.install(job).await
    }

    #[tokio::test]
    async fn test_subscribe_without_job_closes() {
        let h = harness();
        let (s, mut rx) = session();

        let flow = h
            .server
            .handle_message(&s, r#"{"id":1,"method":"mining.subscribe","params":["miner/1.0"]}"#)
            .await
            .unwrap();

        assert_eq!(flow, Flow::Close);
        assert!(!s.is_alive());
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["error"]["message"], "no job yet");
    }

    #[tokio::test]
    async fn test_subscribe_reply() {
        let h = harness();
        install_job(&h.registry).await;
        let (s, mut rx) = session();

        h.server
            .handle_message(&s, r#"{"id":1,"method":"mining.subscribe","params":["miner/1.0"]}"#)
            .await
            .unwrap();

        let msgs = drain(&mut rx);
        let result = msgs[0]["result"].as_array().unwrap();
        assert_eq!(result[0], "");
        let xn = hex::decode(result[1].as_str().unwrap()).unwrap();
        assert_eq!(&xn[..28], &[0x22; 28]);
        assert_eq!(result[2], 32);
        assert_eq!(result[3], hex::encode([0x33; 32]));

        let state = s.lock().await;
        assert_eq!(state.state, ConnectionState::Subscribed);
        assert_eq!(state.agent.as_deref(), Some("miner/1.0"));
    }

    #[tokio::test]
    async fn test_bad_params_are_errors() {
        let h = harness();
        let (s, _rx) = session();

        for line in [
            r#"{"id":1,"method":"mining.subscribe","params":[]}"#,
            r#"{"id":1,"method":"mining.subscribe","params":[5]}"#,
            r#"{"id":2,"method":"mining.authorize","params":["wallet","x"]}"#,
            r#"{"id":3,"method":"mining.submit","params":["w","00"]}"#,
            r#"{"id":3,"method":"mining.submit","params":["w","0011","zz"]}"#,
            r#"{"id":3,"method":"mining.submit","params":["w","00112233","0000000000000001"]}"#,
            "not json",
        ] {
            assert!(h.server.handle_message(&s, line).await.is_err(), "{}", line);
        }
    }

    #[tokio::test]
    async fn test_authorize_pushes_job() {
        let h = harness();
        install_job(&h.registry).await;
        let (s, mut rx) = session();

        h.server
            .handle_message(
                &s,
                r#"{"id":2,"method":"mining.authorize","params":["xel:abc.rig1","x","y"]}"#,
            )
            .await
            .unwrap();

        let msgs = drain(&mut rx);
        assert_eq!(msgs[0], json!({"id": 2, "result": true}));
        assert_eq!(msgs[1]["method"], "mining.set_difficulty");
        assert_eq!(msgs[2]["method"], "mining.set_extranonce");
        assert_eq!(msgs[3]["method"], "mining.notify");

        let state = s.lock().await;
        assert_eq!(state.wallet.as_deref(), Some("xel:abc"));
        assert_eq!(state.worker.as_deref(), Some("rig1"));
        assert_eq!(state.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_share_stays_connected() {
        let h = harness();
        install_job(&h.registry).await;
        let (s, mut rx) = session();

        let flow = h
            .server
            .handle_message(
                &s,
                &json!({
                    "id": 7,
                    "method": "mining.submit",
                    "params": ["w", hex::encode([0xAA; 16]), "0000000000000001"]
                })
                .to_string(),
            )
            .await
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(s.is_alive());
        assert_eq!(
            drain(&mut rx),
            vec![json!({"id": 7, "result": false, "error": {"code": -1, "message": "stale share"}})]
        );
        assert!(h.pool.shares.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_known_job_reaches_pool() {
        let h = harness();
        let job = install_job(&h.registry).await;
        let (s, mut rx) = session();

        let past = s.lock().await.send_job(&job).unwrap();
        drain(&mut rx);

        h.server
            .handle_message(
                &s,
                &json!({
                    "id": 8,
                    "method": "mining.submit",
                    "params": ["w", hex::encode(past.job_id), "00000000000000ff"]
                })
                .to_string(),
            )
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec![json!({"id": 8, "result": true})]);

        let shares = h.pool.shares.lock().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].work.nonce(), 0xff);
        assert_eq!(shares[0].work.extra_nonce(), past.work.extra_nonce());
        assert_eq!(shares[0].work.work_hash(), [0x11; 32]);
    }

    #[tokio::test]
    async fn test_unknown_methods_ignored() {
        let h = harness();
        let (s, mut rx) = session();

        for line in [
            r#"{"id":1,"method":"mining.pong"}"#,
            r#"{"id":2,"method":"mining.extranonce.subscribe","params":[]}"#,
        ] {
            assert_eq!(h.server.handle_message(&s, line).await.unwrap(), Flow::Continue);
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_tcp_connection_gets_job_and_is_pruned() {
        let h = harness();
        install_job(&h.registry).await;

        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.server).serve(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[\"test\"]}\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], 1);

        writer
            .write_all(b"{\"id\":2,\"method\":\"mining.authorize\",\"params\":[\"w\",\"x\",\"y\"]}\n")
            .await
            .unwrap();
        let mut methods = Vec::new();
        for _ in 0..4 {
            let v: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            methods.push(v["method"].as_str().unwrap_or("response").to_string());
        }
        assert_eq!(
            methods,
            vec!["response", "mining.set_difficulty", "mining.set_extranonce", "mining.notify"]
        );
        assert_eq!(h.server.session_count().await, 1);

        drop(writer);
        drop(lines);
        for _ in 0..50 {
            if h.server.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_silent_client_dropped_after_handshake_window() {
        let h = harness_with_timeouts(Duration::from_millis(50), Duration::from_millis(200));
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.server).serve(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        assert!(wait_for_sessions(&h.server, 1).await);

        let mut lines = BufReader::new(stream).lines();
        let eof = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("server kept a silent client");
        assert!(matches!(eof, Ok(None) | Err(_)));
        assert!(wait_for_sessions(&h.server, 0).await);
    }

    #[tokio::test]
    async fn test_handshaken_client_gets_miner_timeout() {
        let h = harness_with_timeouts(Duration::from_millis(50), Duration::from_millis(400));
        install_job(&h.registry).await;
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&h.server).serve(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        writer
            .write_all(
                b"{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[\"test\"]}\n\
                  {\"id\":2,\"method\":\"mining.authorize\",\"params\":[\"w\",\"x\",\"y\"]}\n",
            )
            .await
            .unwrap();
        for _ in 0..5 {
            lines.next_line().await.unwrap().unwrap();
        }

        // well past the handshake window, inside the miner window
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.server.session_count().await, 1);

        let eof = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("server kept an idle miner");
        assert!(matches!(eof, Ok(None) | Err(_)));
        assert!(wait_for_sessions(&h.server, 0).await);
    }

    #[tokio::test]
    async fn test_ping_all_reaches_live_sessions() {
        let h = harness();
        let (s, mut rx) = session();
        s.lock().await.last_out_id = 6;
        h.server.sessions.lock().await.push(Arc::clone(&s));

        h.server.ping_all().await;

        let line = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let ping: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(ping, json!({"id": 7, "method": "mining.ping"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_loop_waits_one_interval() {
        let h = harness();
        let (s, mut rx) = session();
        h.server.sessions.lock().await.push(Arc::clone(&s));

        let server = Arc::clone(&h.server);
        tokio::spawn(async move { server.ping_loop().await });

        tokio::time::sleep(PING_INTERVAL - Duration::from_secs(1)).await;
        assert!(drain(&mut rx).is_empty());

        let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(line.contains("mining.ping"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_back_to_back_jobs_leave_newest_on_every_session() {
        let h = harness();
        let mut miners = Vec::new();
        for _ in 0..8 {
            let (s, rx) = session();
            h.server.sessions.lock().await.push(Arc::clone(&s));
            miners.push(rx);
        }

        let older = Job {
            blob: WorkItem::new([0xAA; 32], [0; 32], [0x33; 32]),
            difficulty: 10,
            ..Job::default()
        };
        let newer = Job {
            blob: WorkItem::new([0xBB; 32], [0; 32], [0x33; 32]),
            difficulty: 20,
            ..Job::default()
        };

        for _ in 0..50 {
            h.registry.install(older.clone()).await;
            h.server.broadcast_job().await;
            h.registry.install(newer.clone()).await;
            h.server.broadcast_job().await;
            tokio::time::sleep(Duration::from_millis(30)).await;

            for rx in miners.iter_mut() {
                let last_notify = drain(rx)
                    .into_iter()
                    .filter(|m| m["method"] == "mining.notify")
                    .last()
                    .unwrap();
                assert_eq!(last_notify["params"][2], hex::encode([0xBB; 32]));
            }
        }
    }
}
