//! # chat-settings
//!
//! Configuration for the chat relay, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`ChatSettings::default()`]
//! 2. **User file**: `~/.config/chat/chatd.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CHAT_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
