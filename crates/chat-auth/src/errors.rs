//! Auth error types.

/// Errors that can occur while resolving a session token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is not known to the resolver.
    #[error("unknown session token")]
    UnknownToken,

    /// The token was empty.
    #[error("empty session token")]
    EmptyToken,

    /// Token table I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Token table was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_display() {
        assert_eq!(AuthError::UnknownToken.to_string(), "unknown session token");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = AuthError::from(io_err);
        assert!(err.to_string().contains("not found"));
    }
}
