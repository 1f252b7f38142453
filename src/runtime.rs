//! Execution-time budget for long-running operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use log::debug;
use crate::core::{Error, Result};

/// Default budget for work started from an interactive request.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 30;

/// Shared execution-time limit in seconds. `0` means unlimited.
///
/// Loops that can run for a long time call [`RuntimeLimit::check`] between
/// units of work (statements, pages, tables).
#[derive(Debug, Clone)]
pub struct RuntimeLimit {
    secs: Arc<AtomicU64>,
}

impl RuntimeLimit {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(secs)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn current(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }

    fn replace(&self, secs: u64) -> u64 {
        self.secs.swap(secs, Ordering::SeqCst)
    }

    pub fn check(&self, started: Instant) -> Result<()> {
        let limit = self.current();
        if limit > 0 && started.elapsed() > Duration::from_secs(limit) {
            return Err(Error::TimeLimitExceeded(limit));
        }
        Ok(())
    }

    /// Raise (or lift, with `0`) the limit until the guard is dropped.
    pub fn acquire(&self, secs: u64) -> MaxRuntimeGuard<'_> {
        MaxRuntimeGuard::acquire(self, secs)
    }
}

impl Default for RuntimeLimit {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_LIMIT_SECS)
    }
}

/// Restores the previous limit when dropped, including during unwinding.
#[must_use = "the previous limit is restored as soon as the guard is dropped"]
pub struct MaxRuntimeGuard<'a> {
    limit: &'a RuntimeLimit,
    previous: u64,
}

impl<'a> MaxRuntimeGuard<'a> {
    pub fn acquire(limit: &'a RuntimeLimit, secs: u64) -> Self {
        let previous = limit.replace(secs);
        debug!("Execution time limit {}s -> {}s", previous, secs);
        Self { limit, previous }
    }

    pub fn previous(&self) -> u64 {
        self.previous
    }
}

impl Drop for MaxRuntimeGuard<'_> {
    fn drop(&mut self) {
        self.limit.replace(self.previous);
        debug!("Execution time limit restored to {}s", self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_on_drop() {
        let limit = RuntimeLimit::new(30);
        {
            let guard = limit.acquire(0);
            assert_eq!(guard.previous(), 30);
            assert_eq!(limit.current(), 0);
        }
        assert_eq!(limit.current(), 30);
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        fn work(limit: &RuntimeLimit) -> Result<()> {
            let _guard = limit.acquire(0);
            Err(Error::Validation("boom".into()))
        }
        let limit = RuntimeLimit::new(45);
        assert!(work(&limit).is_err());
        assert_eq!(limit.current(), 45);
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let limit = RuntimeLimit::new(10);
        let cloned = limit.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.acquire(0);
            panic!("import blew up");
        });
        assert!(result.is_err());
        assert_eq!(limit.current(), 10);
    }

    #[test]
    fn test_nested_guards() {
        let limit = RuntimeLimit::new(30);
        let outer = limit.acquire(600);
        {
            let _inner = limit.acquire(0);
            assert_eq!(limit.current(), 0);
        }
        assert_eq!(limit.current(), 600);
        drop(outer);
        assert_eq!(limit.current(), 30);
    }

    #[test]
    fn test_check_respects_unlimited() {
        let started = Instant::now() - Duration::from_secs(5);
        assert!(RuntimeLimit::unlimited().check(started).is_ok());
        assert!(matches!(
            RuntimeLimit::new(1).check(started),
            Err(Error::TimeLimitExceeded(1))
        ));
    }
}
