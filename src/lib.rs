//! # Mercury
//!
//! An embedded bitemporal quad store with a streaming query engine.
//!
//! Every fact is a quad (graph, subject, predicate, object) carrying two
//! time dimensions: *valid time* (when the fact holds in the modelled
//! world) and *transaction time* (when the store learned it). History is
//! never destroyed in place; corrections add versions and deletions add
//! tombstones, and the whole timeline stays queryable.
//!
//! # Quick Start
//!
//! ```no_run
//! use mercury::{QuadStore, StoreOptions, Timestamp};
//!
//! fn main() -> mercury::Result<()> {
//!     let store = QuadStore::open("./my-data", StoreOptions::default())?;
//!
//!     // Facts valid from now on.
//!     store.add_current(None, "ex:alice", "foaf:name", "\"Alice\"")?;
//!
//!     // Bitemporal: an employment that ended.
//!     store.add(
//!         None,
//!         "ex:alice",
//!         "ex:worksFor",
//!         "ex:Acme",
//!         Timestamp::from_secs(1_577_836_800), // 2020-01-01
//!         Timestamp::from_secs(1_672_531_200), // 2023-01-01
//!     )?;
//!
//!     // Stream what is true right now.
//!     let snapshot = store.snapshot()?;
//!     let mut results = snapshot.query_current(None, None, Some("foaf:name"), None)?;
//!     while let Some(quad) = results.next()? {
//!         println!("{} has name {}",
//!             snapshot.resolve(quad.subject)?,
//!             snapshot.resolve(quad.object)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Storage is an atom-interning layer, a page cache and a single
//! GSPO-ordered B+tree over 56-byte bitemporal keys, fronted by an
//! append-only WAL with checkpoints. Queries run as a pull pipeline:
//! pattern scans feed a statistics-reordered nested-loop join with filter
//! pushdown, streaming borrowed views to the caller under a shared read
//! lock. Compaction is copy-and-switch: stream into a sibling store, then
//! atomically swap directories through a [`StorePool`].
//!
//! The internal crates (`mercury-storage`, `mercury-durability`, …) are
//! not exposed; only this facade is stable.

pub use mercury_core::{
    AtomId, Diagnostic, DiagnosticBag, Error, Result, Severity, Span, StoreOptions, TemporalKey,
    Timestamp,
};

pub use mercury_concurrency::{CancellationToken, ProcessGate};

pub use mercury_engine::{
    prune, Batch, GraphCursor, GraphScope, HistoryMode, PruneOptions, PruneReport, Quad,
    QuadCursor, QuadStore, QuadRef, ReadSnapshot, StoreLease, StorePool, StoreStatistics,
    TemporalMode, Verification,
};

pub use mercury_executor::{
    execute, var_id, BindingSet, FilterSpec, GraphPattern, PathPattern, Query, QueryOutcome,
    SolutionCursor, TemporalSpec, TermPattern, TriplePattern, TripleCursor, UnionPattern, VarId,
};
