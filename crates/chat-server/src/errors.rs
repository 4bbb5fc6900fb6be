//! Hub error types.

use chat_auth::AuthError;
use thiserror::Error;

/// Errors observed by callers of [`HubHandle`](crate::hub::HubHandle).
#[derive(Debug, Error)]
pub enum HubError {
    /// The coordinator task is gone (shutdown or queue closed).
    #[error("hub is closed")]
    Closed,

    /// Identity resolution failed; the connection must be closed.
    #[error("attach rejected: {0}")]
    Rejected(#[from] AuthError),
}

impl HubError {
    /// Short category string for metric labels and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Rejected(_) => "rejected",
        }
    }
}
