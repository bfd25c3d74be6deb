//! Batched mutation.
//!
//! A [`Batch`] holds the store's exclusive lock from creation to commit or
//! rollback. Nothing in the store mutates before commit: terms that need
//! interning are staged with their future ids, operations accumulate in a
//! buffer, and rollback is therefore simply dropping the batch.
//!
//! Commit runs in a fixed order: (1) append all records of the batch to
//! the WAL, (2) flush, (3) apply to the B+tree in memory, (4) dirty the
//! cache pages. A failure before the flush leaves the store observationally
//! unchanged; a failure after it faults the WAL and recovery redoes the
//! apply on reopen.

use crate::store::{checkpoint_inner, StoreInner};
use mercury_core::{AtomId, Error, Result, TemporalKey, Timestamp};
use mercury_durability::RecordPayload;
use mercury_storage::InsertOutcome;
use parking_lot::RwLockWriteGuard;
use rustc_hash::FxHashMap;
use tracing::debug;

/// An open group of mutations committed under one transaction id.
pub struct Batch<'a> {
    guard: RwLockWriteGuard<'a, StoreInner>,
    staged_terms: Vec<Vec<u8>>,
    staged_ids: FxHashMap<Vec<u8>, u64>,
    ops: Vec<(TemporalKey, bool)>,
    tx_time: Timestamp,
}

impl<'a> std::fmt::Debug for Batch<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("ops", &self.ops.len())
            .field("tx_time", &self.tx_time)
            .finish()
    }
}

impl<'a> Batch<'a> {
    pub(crate) fn new(guard: RwLockWriteGuard<'a, StoreInner>) -> Self {
        // Transaction time is monotonic even against a clock that stands
        // still or steps backwards.
        let tx_time = Timestamp::now().max(guard.last_tx_time.next());
        Batch {
            guard,
            staged_terms: Vec::new(),
            staged_ids: FxHashMap::default(),
            ops: Vec::new(),
            tx_time,
        }
    }

    /// Operations queued so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The transaction time every operation in this batch will carry.
    pub fn tx_time(&self) -> Timestamp {
        self.tx_time
    }

    /// Queue a quad with an explicit valid interval.
    pub fn add(
        &mut self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<()> {
        TemporalKey::check_interval(valid_from, valid_to)?;
        let key = TemporalKey {
            graph: self.graph_id(graph)?,
            subject: self.resolve_or_stage(subject)?,
            predicate: self.resolve_or_stage(predicate)?,
            object: self.resolve_or_stage(object)?,
            valid_from,
            valid_to,
            tx_time: self.tx_time,
        };
        self.ops.push((key, false));
        Ok(())
    }

    /// Queue a quad valid from now, open-ended.
    pub fn add_current(
        &mut self,
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

    /// Queue a tombstone that suppresses the quad from `at_time` on.
    pub fn delete(
        &mut self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        at_time: Timestamp,
    ) -> Result<()> {
        TemporalKey::check_interval(at_time, Timestamp::MAX)?;
        let key = TemporalKey {
            graph: self.graph_id(graph)?,
            subject: self.resolve_or_stage(subject)?,
            predicate: self.resolve_or_stage(predicate)?,
            object: self.resolve_or_stage(object)?,
            valid_from: at_time,
            valid_to: Timestamp::MAX,
            tx_time: self.tx_time,
        };
        self.ops.push((key, true));
        Ok(())
    }

    /// Commit: WAL append + flush, then index apply. Returns when the batch
    /// is durable and visible.
    pub fn commit(mut self) -> Result<()> {
        if self.ops.is_empty() && self.staged_terms.is_empty() {
            return Ok(());
        }

        self.check_free_disk()?;

        let base = self.guard.atoms.count();
        let mut records =
            Vec::with_capacity(self.staged_terms.len() + self.ops.len());
        for (i, term) in self.staged_terms.iter().enumerate() {
            records.push(RecordPayload::AtomAssign {
                atom_id: AtomId::from_raw(base + 1 + i as u64),
                term: term.clone(),
            });
        }
        for (key, tombstone) in &self.ops {
            records.push(if *tombstone {
                RecordPayload::QuadTombstone { key: *key }
            } else {
                RecordPayload::QuadInsert { key: *key }
            });
        }

        let tx = self.guard.wal.commit_batch(&records)?;

        // The batch is durable. Everything below must be redoable from the
        // WAL, and is: interning and index inserts are both idempotent.
        if let Err(e) = apply_ops(&mut self.guard, &self.staged_terms, &self.ops) {
            self.guard.wal.fault();
            return Err(e);
        }

        self.guard.wal.mark_applied();
        self.guard.last_tx_time = self.tx_time;
        debug!(tx, ops = self.ops.len(), "batch committed");

        let opts = self.guard.options.clone();
        if self
            .guard
            .wal
            .should_checkpoint(opts.checkpoint_size, opts.checkpoint_interval_secs)
        {
            checkpoint_inner(&mut self.guard)?;
        }
        Ok(())
    }

    /// Abandon the batch. Dropping without commit does the same.
    pub fn rollback(self) {
        // Nothing mutated before commit; releasing the lock is the whole of
        // the rollback.
    }

    fn graph_id(&mut self, graph: Option<&str>) -> Result<AtomId> {
        match graph {
            None => Ok(AtomId::NONE),
            Some(iri) => self.resolve_or_stage(iri),
        }
    }

    /// Id for a term: existing, already staged, or newly staged with the id
    /// it will receive at commit.
    fn resolve_or_stage(&mut self, term: &str) -> Result<AtomId> {
        let bytes = term.as_bytes();
        if let Some(id) = self.guard.atoms.lookup(bytes)? {
            return Ok(id);
        }
        if let Some(&id) = self.staged_ids.get(bytes) {
            return Ok(AtomId::from_raw(id));
        }
        let id = self.guard.atoms.count() + 1 + self.staged_terms.len() as u64;
        self.staged_terms.push(bytes.to_vec());
        self.staged_ids.insert(bytes.to_vec(), id);
        Ok(AtomId::from_raw(id))
    }

    fn check_free_disk(&self) -> Result<()> {
        let floor = self.guard.options.min_free_disk;
        if floor == 0 {
            return Ok(());
        }
        let staged: usize = self.staged_terms.iter().map(|t| t.len() + 32).sum();
        let required = (staged + self.ops.len() * 96) as u64;
        let available = fs2::available_space(&self.guard.dir)?;
        if available < floor.saturating_add(required) {
            return Err(Error::InsufficientDiskSpace {
                required,
                available,
            });
        }
        Ok(())
    }
}

/// Apply a durable batch to the in-memory structures.
fn apply_ops(
    inner: &mut StoreInner,
    staged_terms: &[Vec<u8>],
    ops: &[(TemporalKey, bool)],
) -> Result<()> {
    for term in staged_terms {
        inner.atoms.intern(term)?;
    }
    for (key, tombstone) in ops {
        let outcome = inner.tree.insert(key, *tombstone)?;
        if outcome == InsertOutcome::Inserted && !*tombstone {
            inner.quad_count += 1;
        }
        if !key.graph.is_none() {
            inner.named_graphs.insert(key.graph.raw());
        }
    }
    let checkpoint_tx = inner.checkpoint_tx;
    inner.tree.sync_header(checkpoint_tx)?;
    Ok(())
}
