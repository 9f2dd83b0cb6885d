use std::time::Duration;

use thiserror::Error;

pub type DropsealResult<T> = Result<T, DropsealError>;

/// Outward error taxonomy.
///
/// Every cryptographic authentication failure (DEK unwrap, chunk tag, metadata
/// tag, unlock proof mismatch) collapses into [`DropsealError::Authentication`]
/// so callers cannot tell which internal step rejected the passphrase.
#[derive(Debug, Error)]
pub enum DropsealError {
    /// Bad configuration or parameters. Fatal, never retried.
    #[error("config error: {0}")]
    Config(String),

    /// A required cryptographic primitive is missing in this environment.
    #[error("cryptographic capability unavailable: {0} (try a different client environment)")]
    CapabilityUnavailable(String),

    #[error("incorrect passphrase")]
    Authentication,

    #[error("too many unlock attempts, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Stored artifact is malformed or has the wrong shape.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DropsealError {
    /// HTTP status a request handler should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            DropsealError::Authentication => 401,
            DropsealError::RateLimited { .. } => 429,
            DropsealError::InvalidRequest(_) => 400,
            DropsealError::Integrity(_) => 422,
            _ => 500,
        }
    }

    /// Wait duration to advertise in a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DropsealError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(DropsealError::Authentication.http_status(), 401);
        assert_eq!(
            DropsealError::RateLimited {
                retry_after: Duration::from_secs(30)
            }
            .http_status(),
            429
        );
        assert_eq!(DropsealError::InvalidRequest("x".into()).http_status(), 400);
        assert_eq!(DropsealError::Config("x".into()).http_status(), 500);
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        let err = DropsealError::RateLimited {
            retry_after: Duration::from_secs(90),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(90)));
        assert!(DropsealError::Authentication.retry_after().is_none());
    }

    #[test]
    fn authentication_message_is_uniform() {
        assert_eq!(DropsealError::Authentication.to_string(), "incorrect passphrase");
    }

    #[test]
    fn rate_limit_message_never_says_zero_seconds() {
        let err = DropsealError::RateLimited {
            retry_after: Duration::from_millis(200),
        };
        assert!(err.to_string().contains("retry in 1s"));
    }
}
