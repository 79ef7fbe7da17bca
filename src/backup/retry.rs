// databasebackup/src/backup/retry.rs
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// A `max_attempts` of zero still allows one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: BackupError },
    Cancelled { attempts: u32 },
}

/// Runs `attempt` until it succeeds, the policy runs out, or `cancel` fires.
///
/// `attempt` receives the 1-based attempt number. A `Cancelled` error from
/// the attempt stops immediately, as does cancellation during the delay
/// between attempts.
pub async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    database: &str,
    mut attempt: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt_no = 0;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: attempt_no };
        }
        attempt_no += 1;
        info!(database, attempt = attempt_no, max_attempts, "Attempt {}/{} for backup: {}", attempt_no, max_attempts, database);

        let error = match attempt(attempt_no).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt_no,
                };
            }
            Err(error) if error.is_cancelled() => {
                warn!(database, "Backup for {} was cancelled.", database);
                return RetryOutcome::Cancelled { attempts: attempt_no };
            }
            Err(error) => error,
        };
        warn!(database, attempt = attempt_no, %error, "Backup attempt failed");

        if attempt_no >= max_attempts {
            return RetryOutcome::Exhausted {
                attempts: attempt_no,
                last_error: error,
            };
        }

        info!("Retrying in {}ms...", policy.delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = cancel.cancelled() => {
                warn!(database, "Backup for {} was cancelled while waiting to retry.", database);
                return RetryOutcome::Cancelled { attempts: attempt_no };
            }
        }
    }
}
