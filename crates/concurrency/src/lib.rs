//! Concurrency primitives for the Mercury quad store
//!
//! - [`StoreLock`]: shared-read / exclusive-write discipline per store, with
//!   optional acquisition timeouts
//! - [`CancellationToken`]: cooperative query cancellation
//! - [`ProcessGate`]: a file-based counting semaphore bounding the number of
//!   simultaneously-open stores across processes

pub mod cancel;
pub mod gate;
pub mod lock;

pub use cancel::CancellationToken;
pub use gate::{GateSlot, ProcessGate};
pub use lock::StoreLock;
