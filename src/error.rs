//! Typed errors for the message-source fetch path.
//!
//! Calls against the message source API fail in ways the retry layer must
//! tell apart: a rate limit carries a provider-specified delay and is
//! retried in place, everything else is logged and handed back to the
//! caller. [`SourceError::RetryBudgetExhausted`] is surfaced once a call
//! has burned through its retry budget instead of looping forever.

use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for message source API calls.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The provider throttled the call and told us how long to wait.
    ///
    /// Handled transparently by [`crate::retry::call_with_retry`]; callers
    /// only see this if they bypass the retry wrapper.
    #[error("rate limited by message source, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The API answered with a non-rate-limit error payload.
    ///
    /// Not retried by this crate.
    #[error("message source API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure (connection, TLS, timeout).
    #[error("message source transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("unexpected message source response: {0}")]
    Decode(String),

    /// A rate-limited call exceeded its retry budget.
    #[error("retry budget exhausted after {attempts} attempts ({elapsed:?})")]
    RetryBudgetExhausted { attempts: u32, elapsed: Duration },
}
