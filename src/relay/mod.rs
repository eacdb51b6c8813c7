//! WebSocket relay joining capture and playback endpoints

pub mod handlers;
pub mod hub;
pub mod server;

pub use hub::{ClientInfo, RelayHub, RelayStats};
pub use server::{router, RelayServer};
