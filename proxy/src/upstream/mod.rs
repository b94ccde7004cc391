/// Upstream pool connection
///
/// The proxy only needs two things from a pool: a way to push a solved work
/// item and a stream of events (new jobs, verdicts). [`PoolConnector`] is the
/// push side; events arrive on an `mpsc` channel handed out at construction.

pub mod getwork;

use crate::error::Result;
use crate::jobs::JobTemplate;
use crate::shares::ShareId;
use crate::work::WorkItem;

pub use getwork::GetworkPool;

/// Solved work on its way to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolShare {
    pub id: ShareId,
    pub work: WorkItem,
}

impl PoolShare {
    pub fn new(work: WorkItem) -> Self {
        Self {
            id: ShareId::from_work(&work),
            work,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    NewJob(JobTemplate),
    /// `work` is the echoed block, when the pool sends one
    Accepted { work: Option<WorkItem> },
    Rejected {
        work: Option<WorkItem>,
        reason: String,
    },
    /// The share never made it onto the wire
    SubmitFailed { id: ShareId },
}

pub trait PoolConnector: Send + Sync {
    /// Queue a share for submission. Errors mean it was not queued.
    fn submit(&self, share: PoolShare) -> Result<()>;
}
