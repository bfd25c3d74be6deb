//! Engine-level value types.

use mercury_core::{AtomId, TemporalKey, Timestamp};

/// One quad version emitted by a cursor: interned term positions plus the
/// temporal coordinates. Resolve ids to lexical terms through the snapshot
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quad {
    /// Graph; [`AtomId::NONE`] is the default graph.
    pub graph: AtomId,
    /// Subject.
    pub subject: AtomId,
    /// Predicate.
    pub predicate: AtomId,
    /// Object.
    pub object: AtomId,
    /// Start of the valid interval (inclusive).
    pub valid_from: Timestamp,
    /// End of the valid interval (exclusive).
    pub valid_to: Timestamp,
    /// When the store learned this version.
    pub tx_time: Timestamp,
}

impl Quad {
    pub(crate) fn from_key(key: &TemporalKey) -> Self {
        Quad {
            graph: key.graph,
            subject: key.subject,
            predicate: key.predicate,
            object: key.object,
            valid_from: key.valid_from,
            valid_to: key.valid_to,
            tx_time: key.tx_time,
        }
    }
}

/// Which graphs a scan examines.
///
/// A wildcard graph position examines only the default graph; named graphs
/// are reached explicitly or by enumerating
/// [`ReadSnapshot::named_graphs`](crate::ReadSnapshot::named_graphs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphScope {
    /// The default graph only (graph id 0).
    Default,
    /// One named graph.
    Named(AtomId),
    /// Every graph; used by pruning and DESCRIBE closures.
    All,
}

/// Temporal semantics of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalMode {
    /// Versions valid at the instant, tombstone-resolved: for each
    /// (g,s,p,o) the latest-transaction version wins, and a winning
    /// tombstone suppresses the group.
    AsOf(Timestamp),
    /// Non-tombstone versions whose valid interval overlaps `[t1, t2]`.
    Range(Timestamp, Timestamp),
    /// Every non-tombstone version, in ascending `valid_from` per group.
    Evolution,
    /// Every entry including tombstones; the audit view.
    AllVersions,
}

/// Figures reported by [`QuadStore::statistics`](crate::QuadStore::statistics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStatistics {
    /// Non-tombstone quad versions in the index.
    pub quads: u64,
    /// Interned atoms.
    pub atoms: u64,
    /// Bytes on disk across the tree, atom files and WAL.
    pub bytes: u64,
    /// Highest committed transaction id.
    pub wal_tx: u64,
    /// WAL bytes on disk.
    pub wal_size: u64,
}
