/// Getwork (WebSocket) downstream miners

pub mod server;
pub mod session;

pub use server::{parse_getwork_path, GetworkServer};
pub use session::GetworkSession;
