//! Dual-instance pruning: copy-and-switch compaction.
//!
//! Streams all or a filtered subset of quads from a source store into a
//! fresh target store, optionally flattening history and optionally hashing
//! both sides for verification. The source is never mutated; failure rolls
//! back only the in-flight target batch. Making the target the new primary
//! is the enclosing pool's job ([`crate::StorePool::switch`]).

use crate::store::QuadStore;
use crate::types::{GraphScope, TemporalMode};
use mercury_core::{Result, Timestamp};
use mercury_storage::fnv::{fnv1a64_continue, FNV_OFFSET};
use std::collections::HashSet;
use tracing::info;

/// Operations per target batch during transfer.
const TRANSFER_BATCH_SIZE: usize = 4096;

/// How much history the target receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Only quads valid at transfer time, rewritten as `[now, +∞)`.
    FlattenToCurrent,
    /// All non-tombstone versions with their original validity.
    PreserveVersions,
    /// Everything including tombstones; the full audit trail.
    PreserveAll,
}

/// A borrowed view of one source quad, handed to user filters.
#[derive(Debug, Clone, Copy)]
pub struct QuadRef<'a> {
    /// Graph IRI; `None` is the default graph.
    pub graph: Option<&'a str>,
    /// Subject term.
    pub subject: &'a str,
    /// Predicate term.
    pub predicate: &'a str,
    /// Object term.
    pub object: &'a str,
    /// Valid interval start.
    pub valid_from: Timestamp,
    /// Valid interval end.
    pub valid_to: Timestamp,
}

type UserFilter = Box<dyn Fn(&QuadRef<'_>) -> bool>;

/// Transfer configuration: history mode, composable filters, verification.
pub struct PruneOptions {
    mode: HistoryMode,
    exclude_graphs: HashSet<String>,
    exclude_predicates: HashSet<String>,
    user_filter: Option<UserFilter>,
    verify: bool,
    dry_run: bool,
}

impl PruneOptions {
    /// Options for a history mode, with no filters and no verification.
    pub fn new(mode: HistoryMode) -> Self {
        PruneOptions {
            mode,
            exclude_graphs: HashSet::new(),
            exclude_predicates: HashSet::new(),
            user_filter: None,
            verify: false,
            dry_run: false,
        }
    }

    /// Exclude every quad in this named graph.
    pub fn exclude_graph(mut self, iri: impl Into<String>) -> Self {
        self.exclude_graphs.insert(iri.into());
        self
    }

    /// Exclude every quad with this predicate.
    pub fn exclude_predicate(mut self, iri: impl Into<String>) -> Self {
        self.exclude_predicates.insert(iri.into());
        self
    }

    /// Keep only quads the predicate accepts. Evaluated over borrowed
    /// string views; the filter must not allocate to decide.
    pub fn with_filter(mut self, f: impl Fn(&QuadRef<'_>) -> bool + 'static) -> Self {
        self.user_filter = Some(Box::new(f));
        self
    }

    /// Hash written quads and re-scan the target to compare.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Scan, filter, count and hash, but never write to the target.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Verification figures from re-scanning the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Quads found in the target.
    pub target_count: u64,
    /// Order-independent hash over the target's quads.
    pub target_hash: u64,
    /// True iff counts and hashes both match the source side.
    pub matches: bool,
}

/// What the transfer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Source entries examined.
    pub scanned: u64,
    /// Quads written (or, in dry-run, that would have been written).
    pub written: u64,
    /// Quads dropped by filters.
    pub excluded: u64,
    /// Order-independent FNV-1a hash over written quads.
    pub source_hash: u64,
    /// Present when verification ran (never in dry-run).
    pub verification: Option<Verification>,
}

/// Stream quads from `source` into `target` per `options`.
pub fn transfer(
    source: &QuadStore,
    target: &QuadStore,
    options: &PruneOptions,
) -> Result<PruneReport> {
    let snap = source.snapshot()?;
    let now = Timestamp::now();
    let scan_mode = scan_mode_for(options.mode, now);

    let mut report = PruneReport {
        scanned: 0,
        written: 0,
        excluded: 0,
        source_hash: 0,
        verification: None,
    };

    let mut cursor = snap.scan(GraphScope::All, None, None, None, scan_mode, None)?;
    let mut batch = None;

    while let Some(quad) = cursor.next()? {
        report.scanned += 1;
        let tombstone = cursor.current_is_tombstone();

        let graph = if quad.graph.is_none() {
            None
        } else {
            Some(snap.resolve(quad.graph)?)
        };
        let quad_ref = QuadRef {
            graph,
            subject: snap.resolve(quad.subject)?,
            predicate: snap.resolve(quad.predicate)?,
            object: snap.resolve(quad.object)?,
            valid_from: quad.valid_from,
            valid_to: quad.valid_to,
        };

        if is_excluded(options, &quad_ref) {
            report.excluded += 1;
            continue;
        }

        report.source_hash = report.source_hash.wrapping_add(quad_hash(&quad_ref));
        report.written += 1;

        if options.dry_run {
            continue;
        }

        if batch.is_none() {
            batch = Some(target.begin_batch()?);
        }
        let open_batch = batch.as_mut().expect("batch just opened");
        match options.mode {
            HistoryMode::FlattenToCurrent => {
                open_batch.add(
                    quad_ref.graph,
                    quad_ref.subject,
                    quad_ref.predicate,
                    quad_ref.object,
                    now,
                    Timestamp::MAX,
                )?;
            }
            HistoryMode::PreserveVersions => {
                open_batch.add(
                    quad_ref.graph,
                    quad_ref.subject,
                    quad_ref.predicate,
                    quad_ref.object,
                    quad_ref.valid_from,
                    quad_ref.valid_to,
                )?;
            }
            HistoryMode::PreserveAll => {
                if tombstone {
                    open_batch.delete(
                        quad_ref.graph,
                        quad_ref.subject,
                        quad_ref.predicate,
                        quad_ref.object,
                        quad_ref.valid_from,
                    )?;
                } else {
                    open_batch.add(
                        quad_ref.graph,
                        quad_ref.subject,
                        quad_ref.predicate,
                        quad_ref.object,
                        quad_ref.valid_from,
                        quad_ref.valid_to,
                    )?;
                }
            }
        }
        if open_batch.len() >= TRANSFER_BATCH_SIZE {
            batch.take().unwrap().commit()?;
        }
    }
    if let Some(b) = batch.take() {
        b.commit()?;
    }

    if options.verify && !options.dry_run {
        report.verification = Some(verify_target(target, options.mode, &report)?);
    }

    info!(
        scanned = report.scanned,
        written = report.written,
        excluded = report.excluded,
        dry_run = options.dry_run,
        "pruning transfer complete"
    );
    Ok(report)
}

fn scan_mode_for(mode: HistoryMode, now: Timestamp) -> TemporalMode {
    match mode {
        HistoryMode::FlattenToCurrent => TemporalMode::AsOf(now),
        HistoryMode::PreserveVersions => TemporalMode::Evolution,
        HistoryMode::PreserveAll => TemporalMode::AllVersions,
    }
}

fn is_excluded(options: &PruneOptions, quad: &QuadRef<'_>) -> bool {
    if let Some(graph) = quad.graph {
        if options.exclude_graphs.contains(graph) {
            return true;
        }
    }
    if options.exclude_predicates.contains(quad.predicate) {
        return true;
    }
    if let Some(f) = &options.user_filter {
        if !f(quad) {
            return true;
        }
    }
    false
}

/// FNV-1a 64 over the concatenated UTF-8 of (g,s,p,o); the default graph
/// contributes nothing. Per-quad hashes combine by wrapping addition so the
/// aggregate is independent of scan order.
fn quad_hash(quad: &QuadRef<'_>) -> u64 {
    let mut h = FNV_OFFSET;
    if let Some(graph) = quad.graph {
        h = fnv1a64_continue(h, graph.as_bytes());
    }
    h = fnv1a64_continue(h, quad.subject.as_bytes());
    h = fnv1a64_continue(h, quad.predicate.as_bytes());
    fnv1a64_continue(h, quad.object.as_bytes())
}

/// Re-scan the target, recompute count and hash, compare. Reports without
/// guessing: a mismatch is stated, not repaired.
fn verify_target(
    target: &QuadStore,
    mode: HistoryMode,
    report: &PruneReport,
) -> Result<Verification> {
    let snap = target.snapshot()?;
    let scan_mode = match mode {
        HistoryMode::PreserveAll => TemporalMode::AllVersions,
        _ => TemporalMode::Evolution,
    };
    let mut cursor = snap.scan(GraphScope::All, None, None, None, scan_mode, None)?;
    let mut count = 0u64;
    let mut hash = 0u64;
    while let Some(quad) = cursor.next()? {
        count += 1;
        let graph = if quad.graph.is_none() {
            None
        } else {
            Some(snap.resolve(quad.graph)?)
        };
        let quad_ref = QuadRef {
            graph,
            subject: snap.resolve(quad.subject)?,
            predicate: snap.resolve(quad.predicate)?,
            object: snap.resolve(quad.object)?,
            valid_from: quad.valid_from,
            valid_to: quad.valid_to,
        };
        hash = hash.wrapping_add(quad_hash(&quad_ref));
    }
    Ok(Verification {
        target_count: count,
        target_hash: hash,
        matches: count == report.written && hash == report.source_hash,
    })
}
