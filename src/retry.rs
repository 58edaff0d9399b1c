//! Rate-limit-aware retry wrapper for message source calls.
//!
//! Every API call the ingestion pipeline makes (root page, reply page,
//! profile lookup) goes through [`call_with_retry`]: a rate-limit error
//! sleeps the provider-specified delay and retries the same call, up to a
//! capped attempt count and elapsed-time budget; anything else is logged
//! and handed straight back.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::config::IngestConfig;
use crate::error::SourceError;

/// Per-call ceiling on rate-limit retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

impl RetryBudget {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            max_elapsed: Duration::from_secs(config.retry_max_elapsed_secs),
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            max_elapsed: Duration::from_secs(300),
        }
    }
}

/// Run `call`, retrying on [`SourceError::RateLimited`] until the budget
/// is spent, then surface [`SourceError::RetryBudgetExhausted`].
///
/// Non-rate-limit errors are not retried: they are logged under
/// `operation` and propagated to the caller.
pub async fn call_with_retry<T, F, Fut>(
    budget: RetryBudget,
    operation: &str,
    mut call: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(SourceError::RateLimited { retry_after }) => {
                let elapsed = started.elapsed();
                if attempts >= budget.max_attempts || elapsed + retry_after > budget.max_elapsed {
                    warn!(
                        operation,
                        attempts,
                        ?elapsed,
                        "rate-limit retry budget exhausted"
                    );
                    return Err(SourceError::RetryBudgetExhausted { attempts, elapsed });
                }
                warn!(
                    operation,
                    attempt = attempts,
                    delay = ?retry_after,
                    "rate limited, backing off"
                );
                tokio::time::sleep(retry_after).await;
            }
            Err(e) => {
                error!(operation, error = %e, "message source call failed");
                return Err(e);
            }
        }
    }
}
