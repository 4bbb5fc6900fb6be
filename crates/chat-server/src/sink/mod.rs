//! Where conversation records go besides the live clients.
//!
//! - [`ArchiveWriter`]: appends each chat record to `history.html`
//! - [`DigestSink`]: receives the block accumulated between sweeps

pub mod archive;
pub mod digest;

pub use archive::ArchiveWriter;
pub use digest::{DigestSink, LogSink, SendmailSink};

use thiserror::Error;

/// Errors from sink delivery. Always logged, never fatal to the hub.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `sendmail` exited unsuccessfully.
    #[error("sendmail exited with {status}: {output}")]
    Sendmail {
        /// Exit status as reported by the OS.
        status: String,
        /// Combined stdout/stderr.
        output: String,
    },
}
