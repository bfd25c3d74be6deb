//! Durability layer for the Mercury quad store
//!
//! An append-only redo log in segment files, with commit markers for
//! atomic-per-batch replay and checkpoint markers that permit truncation.
//!
//! - [`record`]: self-delimiting, CRC-guarded record format
//! - [`segment`]: segment files with validated headers
//! - [`wal`]: the writer, the batch state machine, and recovery

pub mod record;
pub mod segment;
pub mod wal;

pub use record::{RecordPayload, WalRecord};
pub use segment::{SegmentHeader, WalSegment};
pub use wal::{RecoveryOutcome, Wal, WalState};
