//! The cross-process gate.
//!
//! A file-based counting semaphore in the user's cache directory bounding
//! the number of simultaneously-open stores per host. Each permit is an
//! exclusively-locked slot file (`slot-NN.lock`); acquisition sweeps the
//! slot files until one locks, retrying until the timeout. The OS drops the
//! lock if the process dies, so crashed holders never leak permits.
//!
//! Pools default to the process-wide gate but accept an injected one, which
//! is how tests isolate themselves from each other and from the host.

use fs2::FileExt;
use mercury_core::{Error, Result};
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default number of concurrently-open stores per host.
pub const DEFAULT_GATE_SLOTS: usize = 8;

/// Sleep between acquisition sweeps.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// The process-wide gate, initialised on first use.
static GLOBAL_GATE: Lazy<Arc<ProcessGate>> = Lazy::new(|| {
    Arc::new(ProcessGate::with_dir(
        default_gate_dir(),
        DEFAULT_GATE_SLOTS,
    ))
});

/// The cache directory hosting slot files: `$XDG_CACHE_HOME/mercury-gate`,
/// `$HOME/.cache/mercury-gate`, or the temp dir as a last resort.
fn default_gate_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("mercury-gate")
}

/// A held permit. Dropping it releases the slot.
#[derive(Debug)]
pub struct GateSlot {
    file: File,
    slot: usize,
}

impl GateSlot {
    /// Which slot this permit occupies.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(slot = self.slot, "gate slot released");
    }
}

/// File-based counting semaphore coordinating store opens across processes.
pub struct ProcessGate {
    dir: PathBuf,
    slots: usize,
}

impl ProcessGate {
    /// The host-wide gate shared by every pool in this process.
    pub fn global() -> Arc<ProcessGate> {
        Arc::clone(&GLOBAL_GATE)
    }

    /// A gate over a caller-chosen directory, for injection into pools.
    pub fn with_dir(dir: PathBuf, slots: usize) -> Self {
        ProcessGate { dir, slots }
    }

    /// Number of permits.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Directory holding the slot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire one permit, sweeping slot files until the timeout expires.
    pub fn acquire(&self, timeout: Duration) -> Result<GateSlot> {
        std::fs::create_dir_all(&self.dir)?;
        let deadline = Instant::now() + timeout;
        loop {
            for slot in 0..self.slots {
                let path = self.dir.join(format!("slot-{:02}.lock", slot));
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .open(&path)?;
                if file.try_lock_exclusive().is_ok() {
                    debug!(slot, "gate slot acquired");
                    return Ok(GateSlot { file, slot });
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(RETRY_INTERVAL.min(
                deadline.saturating_duration_since(Instant::now()),
            ));
        }
    }
}
