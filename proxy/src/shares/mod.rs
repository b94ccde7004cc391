/// Share correlation between downstream miners and the pool

pub mod relay;
pub mod tracker;

pub use relay::ShareRelay;
pub use tracker::{ShareId, ShareResult, ShareTarget, ShareTracker, SHARE_TIMEOUT};
