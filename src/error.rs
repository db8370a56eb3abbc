//! Application error types
//!
//! All error types use `thiserror`. `ProxyError` is the request-level error
//! for both proxy paths and maps onto the HTTP surface via `IntoResponse`;
//! upstream non-success statuses are not errors and pass through unchanged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Request-level proxy errors, in order of increasing severity.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// URL matched no classifier pattern.
    #[error("invalid input")]
    ClassifyMiss,

    /// Allow/deny list refused the subject.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Token bucket exhausted.
    #[error("rate limited")]
    RateLimited,

    /// HTML/XML served over the accelerator.
    #[error("content type not allowed: {0}")]
    ContentBlocked(String),

    /// Declared length over the configured cap.
    #[error("file size exceeds the {0} limit")]
    TooLarge(String),

    /// Redirect cap exceeded.
    #[error("too many redirects")]
    RedirectLoop,

    /// DNS, TCP, TLS, or read failure talking upstream.
    #[error("upstream request failed")]
    Upstream(#[source] reqwest::Error),

    /// Anything else that should surface as a 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ClassifyMiss => StatusCode::FORBIDDEN,
            ProxyError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::ContentBlocked(_) => StatusCode::FORBIDDEN,
            ProxyError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RedirectLoop => StatusCode::LOOP_DETECTED,
            ProxyError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(err)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Short message only; transport details stay in the logs.
            tracing::warn!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Human-readable byte size for error messages (e.g. "2.0 GB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Status mapping follows the wire contract
    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::ClassifyMiss.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ProxyError::AccessDenied("in deny list".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ProxyError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ProxyError::ContentBlocked("text/html".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::TooLarge("2.0 GB".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ProxyError::RedirectLoop.status(), StatusCode::LOOP_DETECTED);
        assert_eq!(
            ProxyError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // Test 2: Messages are short and leak nothing
    #[test]
    fn test_messages() {
        assert_eq!(ProxyError::ClassifyMiss.to_string(), "invalid input");
        assert_eq!(ProxyError::RateLimited.to_string(), "rate limited");
        assert_eq!(ProxyError::RedirectLoop.to_string(), "too many redirects");
        assert_eq!(
            ProxyError::AccessDenied("not in allow list".into()).to_string(),
            "access denied: not in allow list"
        );
        assert_eq!(
            ProxyError::ContentBlocked("text/html".into()).to_string(),
            "content type not allowed: text/html"
        );
        assert_eq!(
            ProxyError::TooLarge("2.0 GB".into()).to_string(),
            "file size exceeds the 2.0 GB limit"
        );
    }

    // Test 3: Size formatting picks sensible units
    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }
}
