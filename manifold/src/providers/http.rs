//! Small HTTP helpers shared by the wire implementations.

use reqwest::header::{HeaderMap, RETRY_AFTER};

use super::error::ProviderError;

/// Longest body excerpt carried inside an error.
const BODY_EXCERPT_CHARS: usize = 300;

/// Numeric `Retry-After` value, when the header is present and parseable.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Trim an upstream body down to a loggable excerpt.
pub(crate) fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        return trimmed.to_owned();
    }
    let cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

/// Convert a non-success response into the matching [`ProviderError`].
///
/// 429 maps to [`ProviderError::RateLimited`] (never retried); everything
/// else becomes [`ProviderError::Http`] carrying the status, a body
/// excerpt, and any `Retry-After` hint for the backoff override.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited { retry_after };
    }
    ProviderError::Http {
        status: status.as_u16(),
        body: excerpt(&body),
        retry_after,
    }
}
