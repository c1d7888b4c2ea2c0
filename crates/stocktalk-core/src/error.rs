//! Error types shared across the stocktalk workspace

use thiserror::Error;

/// Result type alias for stocktalk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error taxonomy
///
/// Provider failures are normalized into these causes before they cross the
/// retry boundary; callers never see a raw transport error.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure (DNS, refused, reset)
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request exceeded its deadline
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Upstream asked us to slow down (429-equivalent)
    #[error("rate limited by {0}")]
    RateLimited(String),

    /// Upstream server error (5xx-equivalent)
    #[error("upstream server error: {0}")]
    Server(String),

    /// Our request was malformed or rejected (non-retryable 4xx)
    #[error("invalid request: {0}")]
    Client(String),

    /// Requested subject does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream authentication or authorization failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Persistent store read or write failure
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Messaging channel (reply/push) failure
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classification used by the retry wrapper
pub trait Retryable {
    /// Whether another attempt could plausibly succeed
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout(_) | Error::RateLimited(_) | Error::Server(_)
        )
    }
}

impl Error {
    /// Classify an HTTP status code read off an upstream response.
    ///
    /// Used by clients that inspect `resp.status()` themselves instead of
    /// relying on `reqwest`'s `error_for_status`.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            429 => Error::RateLimited(detail),
            401 | 403 => Error::Auth(detail),
            404 => Error::NotFound(detail),
            500..=599 => Error::Server(detail),
            _ => Error::Client(detail),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Error::Timeout(err.to_string());
        }
        if err.is_connect() {
            return Error::Connection(err.to_string());
        }
        match err.status() {
            Some(status) => Error::from_status(status.as_u16(), err.to_string()),
            None => Error::Connection(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("2330".to_string());
        assert_eq!(err.to_string(), "not found: 2330");

        let err = Error::RateLimited("market-data".to_string());
        assert_eq!(err.to_string(), "rate limited by market-data");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Connection("reset".into()).is_retryable());
        assert!(Error::Timeout("deadline".into()).is_retryable());
        assert!(Error::RateLimited("ai".into()).is_retryable());
        assert!(Error::Server("502".into()).is_retryable());

        assert!(!Error::Client("bad payload".into()).is_retryable());
        assert!(!Error::NotFound("9999".into()).is_retryable());
        assert!(!Error::Auth("expired token".into()).is_retryable());
        assert!(!Error::Config("missing secret".into()).is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(Error::from_status(429, ""), Error::RateLimited(_)));
        assert!(matches!(Error::from_status(503, ""), Error::Server(_)));
        assert!(matches!(Error::from_status(401, ""), Error::Auth(_)));
        assert!(matches!(Error::from_status(404, ""), Error::NotFound(_)));
        assert!(matches!(Error::from_status(422, ""), Error::Client(_)));
    }
}
