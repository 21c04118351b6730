use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request for {url} returned HTTP {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("segment {index}: {reason}")]
    Segment { index: usize, reason: String },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("state file integrity error: {reason}")]
    Integrity { reason: String },

    #[error("mux error: {reason}")]
    Mux { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn segment(index: usize, reason: impl Into<String>) -> Self {
        Self::Segment {
            index,
            reason: reason.into(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    /// Classify this error for retry decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Integrity { .. } => ErrorCategory::Integrity,
            Self::Network { source } => classify_transport(source),
            Self::HttpStatus { status, .. } => classify_status(*status),
            Self::InvalidUrl { .. }
            | Self::Io { .. }
            | Self::Playlist { .. }
            | Self::Segment { .. }
            | Self::Decryption { .. }
            | Self::Mux { .. }
            | Self::Internal { .. } => ErrorCategory::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().directive().max_attempts > 0
    }
}

/// Retry categories for everything the download pipeline can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport-level transient: timeout, reset, DNS, HTTP 408/429.
    RetryableNetwork,
    /// HTTP 5xx.
    RetryableServer,
    /// HTTP 4xx other than 401/403/408/429.
    NonRetryableClient,
    /// HTTP 401/403.
    NonRetryableAuth,
    /// Unclassified, 2xx-as-error, undecodable.
    Permanent,
    /// State-file magic/version/CRC mismatch; recovered internally.
    Integrity,
    /// Caller-initiated.
    Cancelled,
}

/// How a category is retried: attempt ceiling and base backoff delay.
/// `max_attempts` counts the whole chain including the initial attempt;
/// zero means fail immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryDirective {
    pub category: ErrorCategory,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ErrorCategory {
    pub fn directive(self) -> RetryDirective {
        let (max_attempts, base_delay) = match self {
            Self::RetryableNetwork => (5, Duration::from_secs(1)),
            Self::RetryableServer => (3, Duration::from_secs(2)),
            Self::NonRetryableClient
            | Self::NonRetryableAuth
            | Self::Permanent
            | Self::Integrity
            | Self::Cancelled => (0, Duration::ZERO),
        };
        RetryDirective {
            category: self,
            max_attempts,
            base_delay,
        }
    }
}

/// Map an HTTP status to a retry category.
pub fn classify_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        408 | 429 => ErrorCategory::RetryableNetwork,
        401 | 403 => ErrorCategory::NonRetryableAuth,
        500..=599 => ErrorCategory::RetryableServer,
        400..=499 => ErrorCategory::NonRetryableClient,
        // A 2xx/3xx that still surfaced as an error has no retry story.
        _ => ErrorCategory::Permanent,
    }
}

/// Classify a reqwest transport error.
///
/// Connect, timeout, request, body read and decode errors are transient;
/// redirect-policy and builder errors are not.
pub fn classify_transport(e: &reqwest::Error) -> ErrorCategory {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode() {
        ErrorCategory::RetryableNetwork
    } else {
        ErrorCategory::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_408_and_429_retryable_network() {
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            ErrorCategory::RetryableNetwork
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RetryableNetwork
        );
    }

    #[test]
    fn http_5xx_retryable_server() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorCategory::RetryableServer
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            ErrorCategory::RetryableServer
        );
    }

    #[test]
    fn http_auth_statuses_non_retryable() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            ErrorCategory::NonRetryableAuth
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            ErrorCategory::NonRetryableAuth
        );
    }

    #[test]
    fn other_4xx_non_retryable_client() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            ErrorCategory::NonRetryableClient
        );
        assert_eq!(
            classify_status(StatusCode::GONE),
            ErrorCategory::NonRetryableClient
        );
    }

    #[test]
    fn success_status_as_error_is_permanent() {
        assert_eq!(classify_status(StatusCode::OK), ErrorCategory::Permanent);
        assert_eq!(
            classify_status(StatusCode::NO_CONTENT),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn retry_directives_match_policy_table() {
        let net = ErrorCategory::RetryableNetwork.directive();
        assert_eq!(net.max_attempts, 5);
        assert_eq!(net.base_delay, Duration::from_secs(1));

        let server = ErrorCategory::RetryableServer.directive();
        assert_eq!(server.max_attempts, 3);
        assert_eq!(server.base_delay, Duration::from_secs(2));

        assert_eq!(ErrorCategory::NonRetryableAuth.directive().max_attempts, 0);
        assert_eq!(
            ErrorCategory::NonRetryableClient.directive().max_attempts,
            0
        );
        assert_eq!(ErrorCategory::Permanent.directive().max_attempts, 0);
    }

    #[test]
    fn cancelled_is_never_retryable() {
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn http_status_error_classifies_through_category() {
        let err = DownloadError::http_status(StatusCode::FORBIDDEN, "https://cdn.example/a.ts");
        assert_eq!(err.category(), ErrorCategory::NonRetryableAuth);
        assert!(!err.is_retryable());

        let err = DownloadError::http_status(StatusCode::SERVICE_UNAVAILABLE, "x");
        assert_eq!(err.category(), ErrorCategory::RetryableServer);
        assert!(err.is_retryable());
    }
}
