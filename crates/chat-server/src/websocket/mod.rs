//! `WebSocket` side of the relay: token extraction and the per-socket adapter.

pub mod adapter;
pub mod token;

pub use adapter::run_connection;
pub use token::session_token;
