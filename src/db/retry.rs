//! Retry-with-jitter for a busy store
//!
//! The cache file may be shared by several concurrent invocations. SQLite
//! reports `SQLITE_BUSY`/`SQLITE_LOCKED` while another connection holds the
//! write lock; such statements are retried after a short random sleep.

use super::DbError;
use rusqlite::ErrorCode;
use std::thread;
use std::time::Duration;

/// How busy statements are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many busy attempts; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Upper bound of a single randomized sleep
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: None, max_backoff: Duration::from_millis(100) }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying while the store is busy
    ///
    /// # Errors
    /// Returns `DbError::Busy` once the attempt budget is spent, or the
    /// underlying SQLite error for any non-busy failure.
    pub fn run<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T, DbError> {
        let mut attempts = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if is_busy(&error) => {
                    attempts += 1;
                    self.wait(attempts)?;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Sleep before busy attempt number `attempts`
    ///
    /// # Errors
    /// Returns `DbError::Busy` when `attempts` reached the budget.
    pub fn wait(&self, attempts: u32) -> Result<(), DbError> {
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(DbError::Busy { attempts });
        }
        let delay = jitter(self.max_backoff);
        log::warn!("database is busy, retrying in {}ms (attempt {attempts})", delay.as_millis());
        thread::sleep(delay);
        Ok(())
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn jitter(max: Duration) -> Duration {
    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(1);
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::from_millis(max_millis / 2);
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % max_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None)
    }

    #[test]
    fn test_retries_until_success() {
        let policy = RetryPolicy { max_attempts: Some(5), max_backoff: Duration::from_millis(1) };
        let mut calls = 0;
        let result = policy.run(|| {
            calls += 1;
            if calls < 3 { Err(busy_error()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let policy = RetryPolicy { max_attempts: Some(2), max_backoff: Duration::from_millis(1) };
        let result: Result<(), DbError> = policy.run(|| Err(busy_error()));
        assert!(matches!(result, Err(DbError::Busy { attempts: 2 })));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), DbError> = policy.run(|| {
            calls += 1;
            Err(rusqlite::Error::InvalidQuery)
        });
        assert!(matches!(result, Err(DbError::SqliteError(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_jitter_is_bounded() {
        for _ in 0..50 {
            assert!(jitter(Duration::from_millis(10)) < Duration::from_millis(10));
        }
    }
}
