/// Stratum protocol message types and serialization
///
/// Line-delimited JSON-RPC as spoken by XELIS stratum miners.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_SUBSCRIBE: &str = "mining.subscribe";
pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_PING: &str = "mining.ping";
pub const METHOD_PONG: &str = "mining.pong";
pub const METHOD_SET_DIFFICULTY: &str = "mining.set_difficulty";
pub const METHOD_SET_EXTRANONCE: &str = "mining.set_extranonce";
pub const METHOD_NOTIFY: &str = "mining.notify";

/// Length of the extra-nonce as advertised to miners
pub const EXTRA_NONCE_SIZE: u32 = 32;

/// Request from a miner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIn {
    #[serde(default)]
    pub id: Value,

    pub method: String,

    #[serde(default)]
    pub params: Value,
}

/// Request or notification sent to a miner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOut {
    pub id: u32,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response to a miner request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseOut {
    pub id: Value,

    pub result: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StratumError>,
}

impl ResponseOut {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn error(id: Value, result: Value, error: StratumError) -> Self {
        Self {
            id,
            result,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumError {
    pub code: i32,
    pub message: String,
}

impl StratumError {
    pub const UNKNOWN: i32 = -1;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_job_yet() -> Self {
        Self::new(Self::UNKNOWN, "no job yet")
    }

    pub fn stale_share() -> Self {
        Self::new(Self::UNKNOWN, "stale share")
    }

    pub fn rejected_by_pool(reason: &str) -> Self {
        Self::new(Self::UNKNOWN, format!("rejected by pool: {}", reason))
    }

    pub fn pool_timeout() -> Self {
        Self::new(Self::UNKNOWN, "pool response timeout")
    }

    pub fn submit_failed() -> Self {
        Self::new(Self::UNKNOWN, "failed to submit to pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_in_defaults() {
        let req: RequestIn = serde_json::from_str(r#"{"method":"mining.pong"}"#).unwrap();
        assert_eq!(req.method, METHOD_PONG);
        assert!(req.id.is_null());
        assert!(req.params.is_null());
    }

    #[test]
    fn test_ping_omits_params() {
        let ping = RequestOut {
            id: 3,
            method: METHOD_PING.to_string(),
            params: None,
        };
        assert_eq!(
            serde_json::to_value(&ping).unwrap(),
            json!({"id": 3, "method": "mining.ping"})
        );
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ResponseOut::error(json!(7), json!(false), StratumError::stale_share());
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": 7, "result": false, "error": {"code": -1, "message": "stale share"}})
        );
    }

    #[test]
    fn test_success_response_omits_error() {
        let resp = ResponseOut::success(json!(1), json!(true));
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"id": 1, "result": true}));
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(
            StratumError::rejected_by_pool("low difficulty").message,
            "rejected by pool: low difficulty"
        );
    }
}
