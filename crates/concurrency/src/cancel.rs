//! Cooperative query cancellation.
//!
//! A cheap clonable flag. The executor consults it at pattern-scan
//! boundaries and every batch of emitted rows; a fired token surfaces
//! [`mercury_core::Error::QueryCancelled`] and the cursor releases its read
//! lock on drop.

use mercury_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Emitted-row stride between cancellation checks inside a scan loop.
pub const CANCEL_CHECK_STRIDE: u64 = 1024;

/// Clonable cancellation flag shared between a query and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    fired: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that never fires unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Has the token fired?
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Error if fired, `Ok(())` otherwise.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::QueryCancelled)
        } else {
            Ok(())
        }
    }
}
