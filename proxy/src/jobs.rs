/// Job registry - holds the single current job derived from the pool template
///
/// A job is never mutated in place; a new template installs a new value and
/// readers always work on their own copy.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::error::{ProxyError, Result};
use crate::work::{target_from_difficulty, WorkItem, WORK_BLOB_LENGTH, WORK_ITEM_LENGTH};

/// Job template as delivered by the pool (`new_job` payload)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTemplate {
    /// Hex encoded work item (112 bytes) or blob (96 bytes)
    pub template: String,
    /// Decimal difficulty
    pub difficulty: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub topoheight: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Job {
    /// Template-stage item, before any per-session extra-nonce
    pub blob: WorkItem,
    pub difficulty: u64,
    pub target: [u8; 32],
    /// Algorithm tag as the node reports it (`xel/v2`)
    pub algorithm: String,
    pub height: u64,
    pub topoheight: u64,
    /// Install order, assigned by [`JobRegistry::install`]
    pub version: u64,
}

impl Job {
    pub fn from_template(template: &JobTemplate) -> Result<Self> {
        let bytes = hex::decode(template.template.trim())?;
        let blob = match bytes.len() {
            WORK_ITEM_LENGTH => WorkItem::from_bytes(&bytes)?,
            WORK_BLOB_LENGTH => WorkItem::from_blob(&bytes)?,
            len => {
                return Err(ProxyError::Format(format!(
                    "template length {} is neither {} nor {}",
                    len, WORK_ITEM_LENGTH, WORK_BLOB_LENGTH
                )))
            }
        };

        let difficulty = template.difficulty.trim().parse::<u64>().map_err(|e| {
            ProxyError::Protocol(format!("invalid difficulty '{}': {}", template.difficulty, e))
        })?;

        Ok(Self {
            blob,
            difficulty,
            target: target_from_difficulty(difficulty),
            algorithm: template.algorithm.clone(),
            height: template.height,
            topoheight: template.topoheight,
            version: 0,
        })
    }

    /// A job is usable once the pool handed us a public key
    pub fn is_ready(&self) -> bool {
        self.blob.public_key() != [0u8; 32]
    }

    /// Template message for getwork miners, carrying a per-session item
    pub fn template_for(&self, item: &WorkItem) -> JobTemplate {
        JobTemplate {
            template: item.to_hex(),
            difficulty: self.difficulty.to_string(),
            algorithm: self.algorithm.clone(),
            height: self.height,
            topoheight: self.topoheight,
        }
    }
}

/// Node algorithm tags are 1-based (`xel/v1`), stratum miners expect 0-based
/// (`xel/0`). Unparseable tags fall back to `xel/0`.
pub fn stratum_algorithm(node_algorithm: &str) -> String {
    let version = node_algorithm
        .strip_prefix("xel/v")
        .and_then(|v| v.parse::<i64>().ok());

    match version {
        Some(v) => format!("xel/{}", v - 1),
        None => {
            tracing::warn!(
                "failed to parse version from algorithm '{}', defaulting to xel/0",
                node_algorithm
            );
            "xel/0".to_string()
        }
    }
}

/// Jobs a session remembers for stale-share detection
pub const JOBS_PAST: usize = 5;

pub type JobId = [u8; 16];

pub fn generate_job_id() -> JobId {
    let mut id = [0u8; 16];
    OsRng.fill_bytes(&mut id);
    id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PastJob {
    pub job_id: JobId,
    /// Item as sent, extra-nonce already randomized
    pub work: WorkItem,
}

/// Ring of the last [`JOBS_PAST`] jobs sent to one session
#[derive(Debug, Default)]
pub struct JobHistory {
    jobs: VecDeque<PastJob>,
}

impl JobHistory {
    pub fn push(&mut self, job: PastJob) {
        self.jobs.push_back(job);
        while self.jobs.len() > JOBS_PAST {
            self.jobs.pop_front();
        }
    }

    pub fn find(&self, job_id: &JobId) -> Option<&PastJob> {
        self.jobs.iter().find(|j| &j.job_id == job_id)
    }

    /// Match a full work item returned by a miner against what it was sent
    pub fn find_work(&self, work: &WorkItem) -> Option<&PastJob> {
        self.jobs.iter().find(|j| {
            j.work.work_hash() == work.work_hash() && j.work.extra_nonce() == work.extra_nonce()
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub struct JobRegistry {
    current: RwLock<Job>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Job::default()),
        }
    }

    /// Replace the current job; visible to every later snapshot. The job
    /// gets the next version, which sessions use to drop a superseded push.
    pub async fn install(&self, mut job: Job) -> Job {
        let mut current = self.current.write().await;
        job.version = current.version + 1;
        *current = job.clone();
        job
    }

    pub async fn snapshot(&self) -> Job {
        self.current.read().await.clone()
    }
}
