//! Error types for the reasoning-service client.
//!
//! The split matters downstream: [`ProviderError::retriable`] decides whether
//! the dispatcher refunds the budget reservation for a failed call.

use thiserror::Error;

/// Failures surfaced by a reasoning-service call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The service returned HTTP 429. `retry_after_ms` is how long the
    /// server asked us to back off.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The service rejected the request shape (HTTP 400/422). A caller
    /// defect: the budget stays consumed and the call is never retried.
    #[error("malformed request (status {status}): {message}")]
    Malformed { status: u16, message: String },

    /// Any other non-success response from the service.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The call exceeded the per-call deadline.
    #[error("request timed out")]
    Timeout,

    /// Underlying network failure (DNS, refused connection).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    /// Whether the failure is attributable to the provider rather than the
    /// caller, making the reserved budget refundable.
    pub fn retriable(&self) -> bool {
        !matches!(self, ProviderError::Malformed { .. })
    }
}
