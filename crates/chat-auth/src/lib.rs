//! # chat-auth
//!
//! The hub does not verify credentials itself. It hands the opaque session
//! token carried by a connection to an [`IdentityResolver`] and admits the
//! connection only if a display name comes back.
//!
//! [`TokenTable`] is the file-backed resolver used by the daemon: a JSON
//! object mapping issued tokens to user names, written by whatever service
//! performs the login.

#![deny(unsafe_code)]

pub mod errors;
pub mod resolver;

pub use errors::AuthError;
pub use resolver::{Identity, IdentityResolver, TokenTable};
