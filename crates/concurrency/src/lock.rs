//! The per-store reader/writer lock.
//!
//! Readers proceed concurrently under the shared side and observe a snapshot
//! consistent as of acquisition; the writer holds the exclusive side for the
//! whole batch. `parking_lot`'s task-fair queuing bounds reader admission
//! behind a queued writer, so writers cannot starve.

use mercury_core::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Reader/writer lock with optional acquisition timeout.
///
/// With no timeout configured, acquisition blocks unbounded (the contract's
/// default). With one, expiry surfaces [`Error::LockTimeout`].
pub struct StoreLock<T> {
    inner: RwLock<T>,
    timeout: Option<Duration>,
}

impl<T> StoreLock<T> {
    /// Wrap a value; `timeout_ms = None` means wait unbounded.
    pub fn new(value: T, timeout_ms: Option<u64>) -> Self {
        StoreLock {
            inner: RwLock::new(value),
            timeout: timeout_ms.map(Duration::from_millis),
        }
    }

    /// Acquire the shared side.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        match self.timeout {
            None => Ok(self.inner.read()),
            Some(timeout) => self.inner.try_read_for(timeout).ok_or(Error::LockTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Acquire the exclusive side.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        match self.timeout {
            None => Ok(self.inner.write()),
            Some(timeout) => self.inner.try_write_for(timeout).ok_or(Error::LockTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Exclusive access without locking (requires `&mut self`).
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_then_write() {
        let lock = StoreLock::new(5u32, None);
        {
            let guard = lock.read().unwrap();
            assert_eq!(*guard, 5);
        }
        {
            let mut guard = lock.write().unwrap();
            *guard = 6;
        }
        assert_eq!(*lock.read().unwrap(), 6);
    }

    #[test]
    fn concurrent_readers_share() {
        let lock = Arc::new(StoreLock::new(0u32, Some(1_000)));
        let a = lock.read().unwrap();
        let b = lock.read().unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn writer_times_out_behind_reader() {
        let lock = Arc::new(StoreLock::new(0u32, Some(50)));
        let _reader = lock.read().unwrap();
        let lock2 = Arc::clone(&lock);
        let handle = thread::spawn(move || lock2.write().map(|_| ()));
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn reader_times_out_behind_writer() {
        let lock = Arc::new(StoreLock::new(0u32, Some(50)));
        let _writer = lock.write().unwrap();
        let lock2 = Arc::clone(&lock);
        let handle = thread::spawn(move || lock2.read().map(|_| ()));
        assert!(handle.join().unwrap().is_err());
    }
}
