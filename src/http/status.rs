//! Which registry responses are final and which deserve another attempt.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Attempts made for one download before giving up.
pub const MAX_ATTEMPTS: usize = 3;

/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// A registry response that asking again will not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermanentError {
    /// The registry has no file at this URL (404 or 410).
    NotFound { url: String },
    /// The registry refused the request for another client-side reason.
    Rejected { url: String, status: StatusCode },
}

impl fmt::Display for PermanentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentError::NotFound { url } => write!(f, "registry has no file at {}", url),
            PermanentError::Rejected { url, status } => {
                write!(f, "registry rejected request for {}: HTTP {}", url, status)
            }
        }
    }
}

impl std::error::Error for PermanentError {}

/// Classify a non-success status. `None` means the failure may be transient.
///
/// Server errors, request timeouts and rate limiting are retried; every
/// other client error is final. Yanked or deleted versions come back as
/// 410 from some registries and count as missing.
pub fn permanent_error(url: &str, status: StatusCode) -> Option<PermanentError> {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(PermanentError::NotFound {
            url: url.to_string(),
        }),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => None,
        s if s.is_client_error() => Some(PermanentError::Rejected {
            url: url.to_string(),
            status: s,
        }),
        _ => None,
    }
}
