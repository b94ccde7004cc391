pub mod protocol;
pub mod server;
pub mod session;

pub use server::{Flow, StratumServer};
pub use session::{ConnectionState, StratumSession};
