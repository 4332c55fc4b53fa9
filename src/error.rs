//! Error taxonomy for the external REST APIs.
//!
//! Transient failures are retried on the next poll/run; auth and
//! configuration failures are surfaced and skipped, never crash a service.

use thiserror::Error;

/// Errors produced by the cache service and metadata manager clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure: unreachable host, timeout, malformed body.
    #[error("{service}: transport error: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Unexpected HTTP status (5xx is treated as transient).
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// 401 from an external API. The call's effect is skipped; the calling
    /// service keeps running.
    #[error("{service} rejected the API key (401)")]
    Auth { service: &'static str },

    /// 400 from a metadata manager, typically a root-folder mismatch. Not
    /// retried until configuration changes.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),
}

impl ApiError {
    /// Whether the error is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Auth { .. } | Self::ConfigurationMismatch(_) => false,
        }
    }
}

/// Map a non-success response to an [ApiError], consuming the body.
pub(crate) async fn status_error(service: &'static str, response: reqwest::Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match status {
        401 => ApiError::Auth { service },
        400 => ApiError::ConfigurationMismatch(format!("{service} rejected the request: {body}")),
        _ => ApiError::Status {
            service,
            status,
            body,
        },
    }
}
