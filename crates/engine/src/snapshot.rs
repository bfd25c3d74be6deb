//! Read snapshots and streaming quad cursors.
//!
//! A [`ReadSnapshot`] holds the shared side of the store lock; every cursor
//! it hands out borrows it, so the borrow checker enforces the contract
//! that readers hold the lock for the duration of cursor use. The snapshot
//! observes all batches committed before acquisition and nothing after.

use crate::store::StoreInner;
use crate::types::{GraphScope, Quad, TemporalMode};
use mercury_concurrency::cancel::{CancellationToken, CANCEL_CHECK_STRIDE};
use mercury_core::{AtomId, Error, KeyRange, QuadVersion, Result, Timestamp};
use mercury_storage::{PredicateStats, TreeCursor};
use parking_lot::RwLockReadGuard;

/// A consistent read view of the store.
pub struct ReadSnapshot<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
}

impl<'a> ReadSnapshot<'a> {
    pub(crate) fn new(inner: RwLockReadGuard<'a, StoreInner>) -> Self {
        ReadSnapshot { inner }
    }

    /// Resolve an atom id to its lexical term.
    pub fn resolve(&self, id: AtomId) -> Result<&str> {
        let bytes = self.inner.atoms.resolve(id)?;
        std::str::from_utf8(bytes)
            .map_err(|_| Error::corruption(format!("atom {} is not valid UTF-8", id)))
    }

    /// Resolve an atom id to raw bytes.
    pub fn resolve_bytes(&self, id: AtomId) -> Result<&[u8]> {
        self.inner.atoms.resolve(id)
    }

    /// Id for a term, if it has ever been interned.
    pub fn lookup(&self, term: &str) -> Result<Option<AtomId>> {
        self.inner.atoms.lookup(term.as_bytes())
    }

    /// Non-tombstone quad versions in the index.
    pub fn quad_count(&self) -> u64 {
        self.inner.quad_count
    }

    /// Planner statistics for a predicate, from the last checkpoint.
    pub fn predicate_stats(&self, predicate: AtomId) -> Option<PredicateStats> {
        self.inner.stats.predicate(predicate)
    }

    /// Total quads in the last statistics snapshot.
    pub fn stats_total_quads(&self) -> u64 {
        self.inner.stats.total_quads
    }

    /// Id-level scan: the core read primitive.
    ///
    /// Bound positions narrow the GSPO prefix range where contiguous and
    /// filter residually where not; the temporal mode decides which
    /// versions emerge. Results stream in index order.
    pub fn scan(
        &self,
        scope: GraphScope,
        subject: Option<AtomId>,
        predicate: Option<AtomId>,
        object: Option<AtomId>,
        mode: TemporalMode,
        cancel: Option<CancellationToken>,
    ) -> Result<QuadCursor<'_>> {
        let graph = match scope {
            GraphScope::Default => Some(AtomId::NONE),
            GraphScope::Named(id) => Some(id),
            GraphScope::All => None,
        };
        let range = KeyRange::from_prefix(graph, subject, predicate, object);
        let tree = self.inner.tree.range_scan(range.lower, range.upper)?;
        Ok(QuadCursor {
            tree: Some(tree),
            filter: [graph, subject, predicate, object],
            mode,
            cancel,
            scanned: 0,
            pending: None,
            current: None,
            current_tombstone: false,
        })
    }

    /// Quads valid at `t`, any position wildcardable. A `None` graph means
    /// the default graph; named graphs are queried explicitly.
    pub fn query_as_of(
        &self,
        graph: Option<&str>,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
        t: Timestamp,
    ) -> Result<QuadCursor<'_>> {
        self.query_terms(graph, subject, predicate, object, TemporalMode::AsOf(t))
    }

    /// Quads valid now.
    pub fn query_current(
        &self,
        graph: Option<&str>,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Result<QuadCursor<'_>> {
        self.query_as_of(graph, subject, predicate, object, Timestamp::now())
    }

    /// Versions whose valid interval overlaps `[t1, t2]`.
    pub fn query_changes(
        &self,
        graph: Option<&str>,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
        t1: Timestamp,
        t2: Timestamp,
    ) -> Result<QuadCursor<'_>> {
        if t1 > t2 {
            return Err(Error::invalid_argument(format!(
                "change range start {} after end {}",
                t1, t2
            )));
        }
        self.query_terms(graph, subject, predicate, object, TemporalMode::Range(t1, t2))
    }

    /// All non-tombstone versions, ascending `valid_from` per quad.
    pub fn query_evolution(
        &self,
        graph: Option<&str>,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Result<QuadCursor<'_>> {
        self.query_terms(graph, subject, predicate, object, TemporalMode::Evolution)
    }

    /// Deduplicated cursor over the named-graph IRIs, ascending by id.
    pub fn named_graphs(&self) -> GraphCursor<'_> {
        GraphCursor {
            snapshot: self,
            ids: self.inner.named_graphs.iter().copied().collect(),
            pos: 0,
        }
    }

    fn query_terms(
        &self,
        graph: Option<&str>,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
        mode: TemporalMode,
    ) -> Result<QuadCursor<'_>> {
        let scope = match graph {
            None => GraphScope::Default,
            Some(iri) => match self.lookup(iri)? {
                // A graph nothing was ever written to matches nothing.
                None => return Ok(QuadCursor::empty(mode)),
                Some(id) => GraphScope::Named(id),
            },
        };
        let mut ids = [None; 3];
        for (slot, term) in ids.iter_mut().zip([subject, predicate, object]) {
            if let Some(t) = term {
                match self.lookup(t)? {
                    None => return Ok(QuadCursor::empty(mode)),
                    some => *slot = some,
                }
            }
        }
        self.scan(scope, ids[0], ids[1], ids[2], mode, None)
    }
}

/// Streaming cursor over quad versions under a temporal mode.
///
/// `Unstarted → Active → Exhausted|Cancelled` per the cursor contract:
/// [`QuadCursor::current`] is valid from the first successful
/// [`QuadCursor::next`] until the next call; an error or the end of the
/// stream exhausts the cursor permanently.
pub struct QuadCursor<'s> {
    tree: Option<TreeCursor<'s>>,
    /// Residual position filters (graph, subject, predicate, object).
    filter: [Option<AtomId>; 4],
    mode: TemporalMode,
    cancel: Option<CancellationToken>,
    scanned: u64,
    /// Lookahead entry from the next group during as-of resolution.
    pending: Option<QuadVersion>,
    current: Option<Quad>,
    current_tombstone: bool,
}

impl<'s> QuadCursor<'s> {
    fn empty(mode: TemporalMode) -> Self {
        QuadCursor {
            tree: None,
            filter: [None; 4],
            mode,
            cancel: None,
            scanned: 0,
            pending: None,
            current: None,
            current_tombstone: false,
        }
    }

    /// The quad produced by the last successful [`next`](Self::next).
    pub fn current(&self) -> Option<&Quad> {
        self.current.as_ref()
    }

    /// Advance the cursor. `Ok(None)` means exhausted; errors (including
    /// cancellation) also exhaust it.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Quad>> {
        let result = match self.mode {
            TemporalMode::AsOf(t) => self.next_as_of(t),
            TemporalMode::Range(t1, t2) => {
                self.next_where(|v| !v.tombstone && v.key.overlaps(t1, t2))
            }
            TemporalMode::Evolution => self.next_where(|v| !v.tombstone),
            TemporalMode::AllVersions => self.next_where(|_| true),
        };
        match result {
            Ok(Some(quad)) => {
                self.current = Some(quad);
                Ok(Some(quad))
            }
            Ok(None) => {
                self.tree = None;
                self.current = None;
                Ok(None)
            }
            Err(e) => {
                self.tree = None;
                self.current = None;
                Err(e)
            }
        }
    }

    /// Tombstone flag of the version behind [`current`](Self::current);
    /// only meaningful in [`TemporalMode::AllVersions`].
    pub fn current_is_tombstone(&self) -> bool {
        self.current_tombstone
    }

    fn next_where(&mut self, keep: impl Fn(&QuadVersion) -> bool) -> Result<Option<Quad>> {
        loop {
            match self.raw_next()? {
                None => return Ok(None),
                Some(v) if keep(&v) => {
                    self.current_tombstone = v.tombstone;
                    return Ok(Some(Quad::from_key(&v.key)));
                }
                Some(_) => continue,
            }
        }
    }

    /// As-of semantics: within each (g,s,p,o) group the version with the
    /// greatest transaction time among those valid at `t` wins; a winning
    /// tombstone suppresses the group.
    fn next_as_of(&mut self, t: Timestamp) -> Result<Option<Quad>> {
        loop {
            let first = match self.take_pending_or_raw()? {
                Some(v) => v,
                None => return Ok(None),
            };
            let group = group_of(&first);
            let mut best = if first.key.valid_at(t) { Some(first) } else { None };
            loop {
                match self.raw_next()? {
                    Some(v) if group_of(&v) == group => {
                        if v.key.valid_at(t) {
                            best = match best {
                                Some(b) if b.key.tx_time > v.key.tx_time => Some(b),
                                _ => Some(v),
                            };
                        }
                    }
                    other => {
                        self.pending = other;
                        break;
                    }
                }
            }
            if let Some(winner) = best {
                if !winner.tombstone {
                    self.current_tombstone = false;
                    return Ok(Some(Quad::from_key(&winner.key)));
                }
            }
        }
    }

    fn take_pending_or_raw(&mut self) -> Result<Option<QuadVersion>> {
        match self.pending.take() {
            Some(v) => Ok(Some(v)),
            None => self.raw_next(),
        }
    }

    /// Next index entry passing the residual position filters.
    fn raw_next(&mut self) -> Result<Option<QuadVersion>> {
        let tree = match self.tree.as_mut() {
            Some(t) => t,
            None => return Ok(None),
        };
        loop {
            self.scanned += 1;
            if self.scanned % CANCEL_CHECK_STRIDE == 0 {
                if let Some(token) = &self.cancel {
                    token.check()?;
                }
            }
            let v = match tree.next()? {
                Some(v) => v,
                None => return Ok(None),
            };
            let positions = [
                v.key.graph,
                v.key.subject,
                v.key.predicate,
                v.key.object,
            ];
            let matches = self
                .filter
                .iter()
                .zip(positions)
                .all(|(f, p)| f.map_or(true, |want| want == p));
            if matches {
                return Ok(Some(v));
            }
        }
    }
}

/// Deduplicated cursor over named-graph IRIs.
pub struct GraphCursor<'s> {
    snapshot: &'s ReadSnapshot<'s>,
    ids: Vec<u64>,
    pos: usize,
}

impl<'s> GraphCursor<'s> {
    /// Next graph IRI, or `None` when exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<&'s str>> {
        match self.ids.get(self.pos) {
            None => Ok(None),
            Some(&id) => {
                self.pos += 1;
                self.snapshot.resolve(AtomId::from_raw(id)).map(Some)
            }
        }
    }

    /// How many named graphs the cursor will yield in total.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the store has no named graphs.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn group_of(v: &QuadVersion) -> (AtomId, AtomId, AtomId, AtomId) {
    (v.key.graph, v.key.subject, v.key.predicate, v.key.object)
}
