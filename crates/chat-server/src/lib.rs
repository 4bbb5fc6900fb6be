//! # chat-server
//!
//! Connection hub and network surface of the chat relay.
//!
//! - Broadcast hub: a single coordinator task that owns the session registry
//!   and history buffer, driven through [`hub::HubHandle`]
//! - `WebSocket` adapter: one pair of pumps per socket, detaching on exit
//! - Liveness sweeper feeding periodic sweep commands into the hub
//! - Archive and digest sinks for conversation records
//! - HTTP endpoints: `/ws`, `/m` message receiver, `/upload`, `/health`,
//!   `/metrics`
//! - Graceful shutdown: one `CancellationToken` plus drained, named tasks

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sink;
pub mod sweeper;
pub mod upload;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::HubError;
pub use hub::{Hub, HubConfig, HubHandle};
pub use server::ChatServer;
pub use shutdown::ShutdownCoordinator;
