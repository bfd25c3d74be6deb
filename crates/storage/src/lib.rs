//! Storage substrate for the Mercury quad store
//!
//! Three layers, bottom up:
//! - [`atoms`]: interning of RDF lexical terms into 64-bit ids, persisted
//!   append-only across three files
//! - [`cache`]: a fixed-frame page cache with clock eviction over the
//!   B+tree file
//! - [`btree`]: the GSPO-ordered temporal-key B+tree, the sole index
//!
//! Plus [`stats`], the per-predicate cardinality snapshot recomputed at each
//! checkpoint and consumed by the query planner.
//!
//! Everything here is single-writer: callers serialise mutation through the
//! store lock one level up. Readers may share the structures concurrently.

pub mod atoms;
pub mod btree;
pub mod cache;
pub mod fnv;
pub mod page;
pub mod stats;

pub use atoms::AtomStore;
pub use btree::{GspoTree, InsertOutcome, TreeCursor, TreeStats};
pub use cache::PageCache;
pub use fnv::fnv1a64;
pub use page::StoreHeader;
pub use stats::{PredicateStats, StatsSnapshot};
