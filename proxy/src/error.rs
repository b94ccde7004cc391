//! Error types shared by the proxy core.
//!
//! Server bootstrap code returns `anyhow::Result`; everything below it
//! (codec, sessions, share tracking, pool protocol) uses [`ProxyError`].

use thiserror::Error;

use crate::shares::ShareId;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Fixed-size buffer had the wrong length
    #[error("malformed work item: {0}")]
    Format(String),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Client broke the protocol; the session gets closed
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Outbound queue of a session is gone
    #[error("session closed")]
    SessionClosed,

    /// Two pending shares with the same id. Ids are built from a per-session
    /// extra-nonce, so this means corrupted state or a replayed nonce.
    #[error("share {0} is already pending")]
    DuplicateShare(ShareId),

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProxyError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ProxyError::WebSocket(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
