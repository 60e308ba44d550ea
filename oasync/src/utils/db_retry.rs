//! Database lock retry
//!
//! Checkpoint writes race with scheduler ticks and control calls on the same
//! SQLite file. A "database is locked" failure is retried on a doubling delay
//! until the `db_max_lock_wait_ms` budget is spent.

use std::future::Future;
use std::time::{Duration, Instant};

use oasync_common::{Error, Result};
use tracing::{debug, error, warn};

const FIRST_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Doubling delays, capped at [`MAX_DELAY`]
#[derive(Debug, Clone)]
struct LockBackoff {
    next: Duration,
}

impl LockBackoff {
    fn new() -> Self {
        Self { next: FIRST_DELAY }
    }
}

impl Iterator for LockBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (current * 2).min(MAX_DELAY);
        Some(current)
    }
}

/// Run `write` until it succeeds, fails with something other than a lock
/// error, or `max_wait_ms` has elapsed.
pub async fn retry_on_lock<F, Fut, T>(what: &str, max_wait_ms: u64, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let budget = Duration::from_millis(max_wait_ms);
    let started = Instant::now();
    let mut delays = LockBackoff::new();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match write().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(what, attempts, "Write went through after lock contention");
                }
                return Ok(value);
            }
            Err(err) if is_locked(&err) => err,
            Err(err) => return Err(err),
        };

        if started.elapsed() >= budget {
            error!(what, attempts, max_wait_ms, error = %err, "Database stayed locked");
            return Err(Error::Internal(format!(
                "{what}: database locked for {} ms over {attempts} attempts",
                started.elapsed().as_millis()
            )));
        }

        let delay = delays.next().unwrap_or(MAX_DELAY);
        warn!(what, attempts, delay_ms = delay.as_millis() as u64, "Database locked, backing off");
        tokio::time::sleep(delay).await;
    }
}

fn is_locked(err: &Error) -> bool {
    matches!(err, Error::Database(db_err) if db_err.to_string().contains("database is locked"))
}
