//! # chat-core
//!
//! Foundation types shared by every chat crate.
//!
//! - [`envelope`]: the wire envelope (chat message, liveness ping, presence roster)
//! - [`render`]: HTML escaping, link markup, notification digests
//! - [`color`]: RGB to xterm-256 conversion for console clients
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod color;
pub mod envelope;
pub mod logging;
pub mod render;

pub use color::rgb_to_xterm256;
pub use envelope::{ChatMessage, CodecError, Envelope, LivenessPing, PresenceRoster};
