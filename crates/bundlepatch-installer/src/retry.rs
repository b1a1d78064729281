use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-lock error, or the
/// attempt budget is spent. Only lock/permission-class errors are retried.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> io::Result<T>,
{
    with_retry_and_sleeper(policy, label, operation, thread::sleep)
}

pub(crate) fn with_retry_and_sleeper<T, F, S>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
    mut sleep: S,
) -> Result<T, RetryError>
where
    F: FnMut() -> io::Result<T>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %err,
                    "resource locked, retrying"
                );
                sleep(policy.backoff);
                attempt += 1;
            }
            Err(err) => return Err(RetryError::Failed(err)),
        }
    }
}

pub fn is_lock_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION on Windows; EBUSY, ETXTBSY elsewhere.
    let lock_codes: &[i32] = if cfg!(windows) { &[32, 33] } else { &[16, 26] };
    err.raw_os_error()
        .is_some_and(|code| lock_codes.contains(&code))
}
