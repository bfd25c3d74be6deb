//! The quad store: composition of atoms, tree, cache and WAL.

use crate::batch::Batch;
use crate::snapshot::ReadSnapshot;
use crate::types::StoreStatistics;
use mercury_concurrency::StoreLock;
use mercury_core::{Error, Result, StoreOptions, TemporalKey, Timestamp};
use mercury_durability::{RecordPayload, Wal, WalState};
use mercury_storage::{AtomStore, GspoTree, PageCache, StatsSnapshot, TreeCursor};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything behind the store lock. Readers share it; the writer and
/// batches take it exclusively.
pub(crate) struct StoreInner {
    pub(crate) dir: PathBuf,
    pub(crate) options: StoreOptions,
    pub(crate) atoms: AtomStore,
    pub(crate) cache: Arc<PageCache>,
    pub(crate) tree: GspoTree,
    pub(crate) wal: Wal,
    pub(crate) stats: StatsSnapshot,
    /// Distinct non-default graph ids, kept sorted for the enumeration
    /// cursor. Rebuilt at open, maintained on commit.
    pub(crate) named_graphs: BTreeSet<u64>,
    /// Non-tombstone entries in the index.
    pub(crate) quad_count: u64,
    /// High-water mark for monotonic transaction-time assignment.
    pub(crate) last_tx_time: Timestamp,
    /// Tx id of the last completed checkpoint.
    pub(crate) checkpoint_tx: u64,
}

/// An embedded bitemporal quad store bound to one directory.
///
/// All mutation is serialised through the exclusive side of the store lock;
/// readers acquire [`QuadStore::snapshot`] and stream results while holding
/// the shared side.
pub struct QuadStore {
    pub(crate) lock: StoreLock<StoreInner>,
    read_only: bool,
    path: PathBuf,
}

impl std::fmt::Debug for QuadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadStore")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl QuadStore {
    /// Open or create a store in `path`.
    ///
    /// Recovery runs here: committed WAL records past the last checkpoint
    /// are replayed into the index before the store becomes visible.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        options
            .validate()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;
        std::fs::create_dir_all(&path)?;

        let cache = Arc::new(PageCache::open(
            &path.join("gspo.tdb"),
            options.page_size,
            options.page_cache_frames,
        )?);
        let mut tree = GspoTree::load(Arc::clone(&cache))?;
        let mut atoms = AtomStore::open(&path)?;
        let checkpoint_tx = cache.read_header()?.checkpoint_tx;

        let (wal, outcome) = Wal::open(
            &path,
            options.wal_flush_size,
            checkpoint_tx,
            |_tx, payload| match payload {
                RecordPayload::AtomAssign { atom_id, term } => {
                    atoms.intern_with_id(*atom_id, term)
                }
                RecordPayload::QuadInsert { key } => tree.insert(key, false).map(|_| ()),
                RecordPayload::QuadTombstone { key } => tree.insert(key, true).map(|_| ()),
                _ => Ok(()),
            },
        )?;

        // One pass over the index rebuilds the named-graph set, the live
        // quad count and the transaction-time high-water mark.
        let mut named_graphs = BTreeSet::new();
        let mut quad_count = 0u64;
        let mut last_tx_time = Timestamp::EPOCH;
        {
            let mut cursor = tree.range_scan(TemporalKey::MIN, TemporalKey::MAX)?;
            while let Some(v) = cursor.next()? {
                if !v.key.graph.is_none() {
                    named_graphs.insert(v.key.graph.raw());
                }
                if !v.tombstone {
                    quad_count += 1;
                }
                last_tx_time = last_tx_time.max(v.key.tx_time);
            }
        }

        let stats = StatsSnapshot::load(&path.join("stats.bin"));

        info!(
            path = %path.display(),
            quads = quad_count,
            atoms = atoms.count(),
            replayed = outcome.records_applied,
            "quad store opened"
        );

        let inner = StoreInner {
            dir: path.clone(),
            options: options.clone(),
            atoms,
            cache,
            tree,
            wal,
            stats,
            named_graphs,
            quad_count,
            last_tx_time,
            checkpoint_tx,
        };

        Ok(QuadStore {
            lock: StoreLock::new(inner, options.lock_timeout_ms),
            read_only: options.read_only,
            path,
        })
    }

    /// The directory this store owns.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the store was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Open a batch, taking the exclusive lock until commit or rollback.
    pub fn begin_batch(&self) -> Result<Batch<'_>> {
        if self.read_only {
            return Err(Error::read_only("store opened with read_only"));
        }
        let guard = self.lock.write()?;
        if guard.wal.state() == WalState::ReadOnlyFaulted {
            return Err(Error::read_only("write-ahead log faulted; reopen the store"));
        }
        Ok(Batch::new(guard))
    }

    /// Add one quad with an explicit valid interval, as a single-op batch.
    pub fn add(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<()> {
        let mut batch = self.begin_batch()?;
        batch.add(graph, subject, predicate, object, valid_from, valid_to)?;
        batch.commit()
    }

    /// Add one quad valid from now, open-ended.
    pub fn add_current(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        self.add(
            graph,
            subject,
            predicate,
            object,
            Timestamp::now(),
            Timestamp::MAX,
        )
    }

    /// Insert a tombstone: the quad stops being visible at `at_time`.
    pub fn delete(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        at_time: Timestamp,
    ) -> Result<()> {
        let mut batch = self.begin_batch()?;
        batch.delete(graph, subject, predicate, object, at_time)?;
        batch.commit()
    }

    /// Acquire the shared lock and return a consistent read view.
    pub fn snapshot(&self) -> Result<ReadSnapshot<'_>> {
        Ok(ReadSnapshot::new(self.lock.read()?))
    }

    /// Force a checkpoint: flush dirty state, persist statistics, truncate
    /// the WAL. A no-op when nothing was committed since the last one.
    pub fn checkpoint(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::read_only("store opened with read_only"));
        }
        let mut guard = self.lock.write()?;
        checkpoint_inner(&mut guard)
    }

    /// Store-level figures.
    pub fn statistics(&self) -> Result<StoreStatistics> {
        let guard = self.lock.read()?;
        let tree_bytes = guard.cache.page_count() * guard.options.page_size as u64;
        Ok(StoreStatistics {
            quads: guard.quad_count,
            atoms: guard.atoms.count(),
            bytes: tree_bytes + guard.atoms.bytes() + guard.wal.size(),
            wal_tx: guard.wal.last_committed_tx(),
            wal_size: guard.wal.size(),
        })
    }

    /// Flush everything and release the directory. Equivalent to drop, but
    /// surfaces errors.
    pub fn close(self) -> Result<()> {
        if !self.read_only {
            let mut guard = self.lock.write()?;
            checkpoint_inner(&mut guard)?;
        }
        Ok(())
    }
}

impl Drop for QuadStore {
    fn drop(&mut self) {
        if self.read_only {
            return;
        }
        // Best effort: push dirty state out so a clean shutdown needs no
        // replay. Failures here leave recovery to the WAL.
        if let Ok(mut guard) = self.lock.write() {
            let _ = checkpoint_inner(&mut guard);
        }
    }
}

/// The checkpoint protocol: statistics snapshot, atom sync, header update,
/// page flush, WAL marker + truncation, in that order.
pub(crate) fn checkpoint_inner(inner: &mut StoreInner) -> Result<()> {
    let last_tx = inner.wal.last_committed_tx();
    if last_tx == inner.checkpoint_tx {
        debug!("checkpoint skipped: nothing committed since the last one");
        return Ok(());
    }

    let snapshot = {
        let cursor = inner
            .tree
            .range_scan(TemporalKey::MIN, TemporalKey::MAX)?;
        StatsSnapshot::collect(CursorIter(cursor), last_tx)?
    };
    snapshot.save(&inner.dir.join("stats.bin"))?;
    inner.stats = snapshot;

    inner.atoms.sync()?;
    inner.tree.sync_header(last_tx)?;
    inner.cache.flush_all()?;
    inner.wal.checkpoint(last_tx)?;
    inner.checkpoint_tx = last_tx;
    info!(checkpoint_tx = last_tx, "checkpoint complete");
    Ok(())
}

/// Adapter: tree cursor as an iterator for statistics collection.
struct CursorIter<'a>(TreeCursor<'a>);

impl Iterator for CursorIter<'_> {
    type Item = Result<mercury_core::QuadVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts() -> StoreOptions {
        StoreOptions::for_testing()
    }

    #[test]
    fn open_fresh_store_is_empty() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.quads, 0);
        assert_eq!(stats.atoms, 0);
        assert_eq!(stats.wal_tx, 0);
    }

    #[test]
    fn add_and_count() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        store
            .add_current(None, "ex:alice", "foaf:name", "\"Alice\"")
            .unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.quads, 1);
        assert_eq!(stats.atoms, 3);
        assert_eq!(stats.wal_tx, 1);
    }

    #[test]
    fn reopen_after_clean_close() {
        let dir = tempdir().unwrap();
        {
            let store = QuadStore::open(dir.path(), opts()).unwrap();
            store.add_current(None, "ex:s", "ex:p", "ex:o").unwrap();
            store.close().unwrap();
        }
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.quads, 1);
        assert_eq!(stats.wal_tx, 1);
    }

    #[test]
    fn reopen_without_close_replays_wal() {
        let dir = tempdir().unwrap();
        {
            let store = QuadStore::open(dir.path(), opts()).unwrap();
            store.add_current(None, "ex:s", "ex:p", "ex:o").unwrap();
            // No close: drop runs a best-effort checkpoint, so defeat it by
            // leaking the store.
            std::mem::forget(store);
        }
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        assert_eq!(store.statistics().unwrap().quads, 1);
    }

    #[test]
    fn read_only_refuses_mutation() {
        let dir = tempdir().unwrap();
        {
            let store = QuadStore::open(dir.path(), opts()).unwrap();
            store.add_current(None, "ex:s", "ex:p", "ex:o").unwrap();
        }
        let store =
            QuadStore::open(dir.path(), opts().with_read_only(true)).unwrap();
        let err = store.add_current(None, "ex:s2", "ex:p", "ex:o").unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
        assert_eq!(store.statistics().unwrap().quads, 1);
    }

    #[test]
    fn invalid_options_rejected() {
        let dir = tempdir().unwrap();
        let err = QuadStore::open(dir.path(), opts().with_page_size(1000)).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn explicit_checkpoint_truncates_wal() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        for i in 0..10 {
            store
                .add_current(None, &format!("ex:s{}", i), "ex:p", "ex:o")
                .unwrap();
        }
        let before = store.statistics().unwrap().wal_size;
        store.checkpoint().unwrap();
        let after = store.statistics().unwrap().wal_size;
        assert!(after < before);
        // Checkpointing again is a no-op.
        store.checkpoint().unwrap();
        assert_eq!(store.statistics().unwrap().wal_size, after);
    }

    #[test]
    fn empty_checkpoint_is_noop() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path(), opts()).unwrap();
        store.checkpoint().unwrap();
        assert_eq!(store.statistics().unwrap().wal_tx, 0);
    }
}
