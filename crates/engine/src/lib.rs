//! The Mercury quad store engine
//!
//! Composes the storage substrate (atoms, page cache, GSPO B+tree), the
//! write-ahead log and the locking discipline into the bitemporal store:
//!
//! - [`QuadStore`]: open/close, temporal add/delete, batches, checkpoints
//! - [`ReadSnapshot`]: shared-lock read view handing out streaming cursors
//! - [`prune`]: dual-instance copy-and-switch compaction
//! - [`StorePool`]: named store slots with scoped leases and the
//!   cross-process gate
//!
//! Write path: batch buffer → WAL append + fsync → B+tree apply → dirty
//! pages. Read path: snapshot → B+tree range scan → temporal resolution →
//! cursor.

pub mod batch;
pub mod pool;
pub mod prune;
pub mod snapshot;
pub mod store;
pub mod types;

pub use batch::Batch;
pub use pool::{StoreLease, StorePool};
pub use prune::{HistoryMode, PruneOptions, PruneReport, QuadRef, Verification};
pub use snapshot::{GraphCursor, QuadCursor, ReadSnapshot};
pub use store::QuadStore;
pub use types::{GraphScope, Quad, StoreStatistics, TemporalMode};
