//! Error taxonomy for the query pipeline.
//!
//! Every stage reports failures as a [`PipelineError`]. Per-article kinds
//! ([`PipelineError::Scrape`], [`PipelineError::SchemaViolation`]) are caught
//! by the orchestrator and the article is dropped; everything else aborts the
//! request and is rendered to the caller as an [`ErrorBody`].

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no articles found for \"{company}\"")]
    NotFound { company: String },

    #[error("failed to scrape {url}: {reason}")]
    Scrape { url: String, reason: String },

    #[error("{what} did not match the expected schema: {reason}")]
    SchemaViolation { what: &'static str, reason: String },

    #[error("no usable articles remained after filtering")]
    EmptyBatch,

    #[error("{service} is unavailable: {reason}")]
    UpstreamUnavailable {
        service: &'static str,
        reason: String,
        retryable: bool,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable machine-readable kind, used in error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::Scrape { .. } => "scrape",
            PipelineError::SchemaViolation { .. } => "schema_violation",
            PipelineError::EmptyBatch => "empty_batch",
            PipelineError::UpstreamUnavailable { .. } => "upstream_unavailable",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::Config(_) => "config",
        }
    }

    /// Whether the caller may reasonably try the same request again later.
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::UpstreamUnavailable { retryable, .. } => *retryable,
            PipelineError::Cancelled(_) => true,
            _ => false,
        }
    }

    /// HTTP status the server answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::NotFound { .. } => 404,
            PipelineError::Scrape { .. } | PipelineError::SchemaViolation { .. } => 502,
            PipelineError::EmptyBatch => 422,
            PipelineError::UpstreamUnavailable { .. } | PipelineError::Cancelled(_) => 503,
            PipelineError::InvalidRequest(_) => 400,
            PipelineError::Config(_) => 500,
        }
    }

    pub fn upstream(service: &'static str, reason: impl Into<String>, retryable: bool) -> Self {
        PipelineError::UpstreamUnavailable {
            service,
            reason: reason.into(),
            retryable,
        }
    }

    pub fn timed_out(service: &'static str, after: Duration) -> Self {
        PipelineError::upstream(service, format!("timed out after {}s", after.as_secs()), true)
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(service: &'static str, e: reqwest::Error) -> Self {
        let retryable = e.is_timeout() || e.is_connect();
        PipelineError::upstream(service, e.to_string(), retryable)
    }

    /// Classify a non-success HTTP status from an upstream service.
    pub fn from_status(service: &'static str, status: reqwest::StatusCode) -> Self {
        let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        PipelineError::upstream(service, format!("HTTP {status}"), retryable)
    }
}

/// Structured error object returned to callers instead of a trace.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&PipelineError> for ErrorBody {
    fn from(e: &PipelineError) -> Self {
        ErrorBody {
            error: ErrorDetail {
                kind: e.kind(),
                message: e.to_string(),
                retryable: e.retryable(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statuses_distinguish_not_found_from_unavailable() {
        let nf = PipelineError::NotFound {
            company: "Acme".into(),
        };
        let down = PipelineError::upstream("search", "HTTP 503", true);
        assert_eq!(nf.status_code(), 404);
        assert_eq!(down.status_code(), 503);
        assert_ne!(nf.kind(), down.kind());
    }

    #[test]
    fn test_error_body_shape() {
        let e = PipelineError::EmptyBatch;
        let json = serde_json::to_value(ErrorBody::from(&e)).unwrap();
        assert_eq!(json["error"]["kind"], "empty_batch");
        assert_eq!(json["error"]["retryable"], false);
        assert!(json["error"]["message"].as_str().unwrap().contains("no usable"));
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let e = PipelineError::from_status("search", reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert!(e.retryable());
        let e = PipelineError::from_status("search", reqwest::StatusCode::UNAUTHORIZED);
        assert!(!e.retryable());
    }

    #[test]
    fn test_timeout_message() {
        let e = PipelineError::timed_out("llm", Duration::from_secs(30));
        assert_eq!(e.to_string(), "llm is unavailable: timed out after 30s");
        assert!(e.retryable());
    }
}
