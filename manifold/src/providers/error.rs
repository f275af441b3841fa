//! Error types for provider operations.
//!
//! Each variant is a distinct failure mode so the retry helper and the
//! dispatcher can pattern-match instead of catching types: retries inspect
//! [`ProviderError::is_retryable`], the dispatcher maps variants onto the
//! structured error blocks returned to the host.

use std::collections::HashMap;

use crate::catalog::ModelCapabilities;

/// Error type for provider operations.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The model name resolves in no configured provider.
    #[error("unknown model '{model}'")]
    UnknownModel {
        /// The name as requested.
        model: String,
        /// Models the caller could use instead, best-ranked first.
        suggestions: Vec<String>,
    },

    /// The model resolved but the operator policy disallows it.
    #[error("model '{model}' is not allowed by the {provider} restriction policy")]
    Restricted {
        /// Provider tag whose policy refused the model.
        provider: &'static str,
        /// The name as requested.
        model: String,
        /// The allow-list tokens in effect.
        allowed: Vec<String>,
    },

    /// Non-retryable upstream HTTP failure.
    #[error("upstream HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Short excerpt of the response body.
        body: String,
        /// Numeric `Retry-After` header, when present.
        retry_after: Option<u64>,
    },

    /// Upstream returned HTTP 429. Never retried; surfaced immediately so
    /// the host sees the quota signal.
    #[error("upstream rate limited (HTTP 429)")]
    RateLimited {
        /// Numeric `Retry-After` header, when present.
        retry_after: Option<u64>,
    },

    /// The per-request deadline elapsed.
    #[error("upstream request timed out")]
    Timeout,

    /// The upstream refused to produce a completion (safety filter,
    /// blocked prompt).
    #[error("upstream refused the request: {0}")]
    Refused(String),

    /// The request cannot be expressed for this model.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection-level failure (reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Anything else: undecodable payloads, broken invariants.
    #[error("provider internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Build an [`ProviderError::UnknownModel`] with suggestions drawn from
    /// a capability map.
    #[must_use]
    pub fn unknown_model(name: &str, known: &HashMap<String, ModelCapabilities>) -> Self {
        let mut suggestions: Vec<String> = known.keys().cloned().collect();
        suggestions.sort();
        suggestions.truncate(8);
        Self::UnknownModel {
            model: name.to_owned(),
            suggestions,
        }
    }

    /// Whether the shared retry policy may retry this failure.
    ///
    /// 429 is deliberately non-retryable: upstream quota pressure is the
    /// backpressure signal and must reach the user on the first attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, body, .. } => match status {
                408 | 409 => true,
                501 => false,
                s if *s >= 500 => true,
                _ => body_indicates_overload(body),
            },
            Self::Network(_) | Self::Timeout => true,
            _ => false,
        }
    }

    /// The upstream's `Retry-After` hint, when one was sent.
    #[must_use]
    pub const fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Http { retry_after, .. } | Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short tag used in structured error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownModel { .. } => "unknown_model",
            Self::Restricted { .. } => "restricted",
            Self::Http { .. } => "upstream_http",
            Self::RateLimited { .. } => "upstream_rate_limited",
            Self::Timeout => "upstream_timeout",
            Self::Refused(_) => "upstream_refused",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Network(_) => "network",
            Self::Internal(_) => "internal",
        }
    }
}

/// Some gateways report overload with a 4xx status and an error body
/// instead of 503; treat those as transient.
fn body_indicates_overload(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("overloaded") || lower.contains("model is busy")
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}
