/// Work item codec and difficulty helpers

pub mod item;
pub mod target;

pub use item::{extra_nonce_prefix_matches, WorkItem, WORK_BLOB_LENGTH, WORK_ITEM_LENGTH};
pub use target::target_from_difficulty;
