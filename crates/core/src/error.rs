//! Unified error types for pixstash.
//!
//! The fetch family (`HttpError`, `FetchTimeout`, `FetchTooLarge`,
//! `EmptyResponse`) is what callers see as a failed fetch; disk errors are
//! masked inside a resolve and only surface from direct store calls.

/// Unified error type for the pixstash cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty or malformed request URL.
    #[error("INVALID_REQUEST: {0}")]
    InvalidRequest(String),

    /// HTTP error response or transport failure.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// The fetch succeeded but returned no bytes.
    #[error("EMPTY_RESPONSE: {0}")]
    EmptyResponse(String),

    /// The codec could not interpret the bytes.
    #[error("DECODE_ERROR: {0}")]
    DecodeFailed(String),

    /// The codec could not encode an artifact for persistence.
    #[error("ENCODE_ERROR: {0}")]
    EncodeFailed(String),

    /// Disk cache I/O failed.
    #[error("CACHE_IO: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A background task failed to complete.
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { context: context.into(), source }
    }

    /// Whether this error belongs to the fetch family.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Error::HttpError(_) | Error::FetchTimeout(_) | Error::FetchTooLarge(_) | Error::EmptyResponse(_)
        )
    }

    /// Stable machine-readable code, matching the `Display` prefix.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::FetchTimeout(_) => "FETCH_TIMEOUT",
            Error::FetchTooLarge(_) => "FETCH_TOO_LARGE",
            Error::EmptyResponse(_) => "EMPTY_RESPONSE",
            Error::DecodeFailed(_) => "DECODE_ERROR",
            Error::EncodeFailed(_) => "ENCODE_ERROR",
            Error::Io { .. } => "CACHE_IO",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("task failed: {err}"))
    }
}
