//! Single-pattern scans.
//!
//! A [`PatternScan`] streams the matches of one triple pattern, extending a
//! caller-owned binding table row by row. Bound positions (constants, or
//! variables already bound by earlier operators) resolve before the scan
//! and narrow the index range; remaining variables bind per row with
//! repeat-occurrence consistency checks (`?x ex:p ?x` matches only
//! reflexive edges).
//!
//! Property paths (`^P`, `P*`, `P+`, `P?`) evaluate by repeated scanning
//! with a visited set per starting node, materialising their (graph,
//! subject, object) pairs into a buffer that is reused across re-opens.
//! Paths traverse existing quads only; they never create atoms.

use crate::algebra::{PathPattern, TermPattern, TriplePattern};
use crate::binding::{var_id, BindingSet, Mark, VarId};
use mercury_concurrency::CancellationToken;
use mercury_core::{AtomId, Result};
use mercury_engine::{GraphScope, QuadCursor, ReadSnapshot, TemporalMode};
use rustc_hash::FxHashSet;

/// Everything an operator needs besides the bindings.
pub struct ExecContext<'s> {
    /// The read view the whole query runs against.
    pub snap: &'s ReadSnapshot<'s>,
    /// Temporal semantics, fixed for the query.
    pub mode: TemporalMode,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

/// The operator contract: Volcano-style pull over a shared binding table.
///
/// `open` (re)starts the operator under the bindings produced upstream;
/// `next` extends them and returns `true`, or restores them and returns
/// `false` when exhausted.
pub(crate) trait Operator<'s> {
    fn open(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<()>;
    fn next(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<bool>;
}

/// A compiled pattern position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// A term resolved to its atom.
    Const(AtomId),
    /// A variable (bound or not at open time).
    Var(VarId),
    /// A term the store has never seen: the pattern cannot match.
    Impossible,
}

impl Slot {
    fn compile(term: &TermPattern, snap: &ReadSnapshot<'_>) -> Result<Slot> {
        Ok(match term {
            TermPattern::Var(name) => Slot::Var(var_id(name)),
            TermPattern::Term(t) => match snap.lookup(t)? {
                Some(id) => Slot::Const(id),
                None => Slot::Impossible,
            },
        })
    }

    /// The id this slot pins at open time, if any.
    fn resolved(&self, bindings: &BindingSet) -> Option<AtomId> {
        match self {
            Slot::Const(id) => Some(*id),
            Slot::Var(v) => bindings.get(*v),
            Slot::Impossible => None,
        }
    }
}

/// The graph position, with its wildcard-means-default semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GraphSlot {
    /// No graph qualifier: the default graph only.
    Default,
    /// A named graph constant.
    Const(AtomId),
    /// A graph variable: ranges over named graphs.
    Var(VarId),
    /// A graph IRI the store has never seen.
    Impossible,
}

impl GraphSlot {
    fn compile(graph: &Option<TermPattern>, snap: &ReadSnapshot<'_>) -> Result<GraphSlot> {
        Ok(match graph {
            None => GraphSlot::Default,
            Some(TermPattern::Var(name)) => GraphSlot::Var(var_id(name)),
            Some(TermPattern::Term(iri)) => match snap.lookup(iri)? {
                Some(id) => GraphSlot::Const(id),
                None => GraphSlot::Impossible,
            },
        })
    }
}

/// The compiled predicate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompiledPath {
    Direct(Slot),
    /// `^P`; `None` when P was never interned (no edges).
    Inverse(Option<AtomId>),
    ZeroOrMore(Option<AtomId>),
    OneOrMore(Option<AtomId>),
    ZeroOrOne(Option<AtomId>),
}

impl CompiledPath {
    fn compile(path: &PathPattern, snap: &ReadSnapshot<'_>) -> Result<CompiledPath> {
        let lookup = |p: &str| snap.lookup(p);
        Ok(match path {
            PathPattern::Direct(term) => CompiledPath::Direct(Slot::compile(term, snap)?),
            PathPattern::Inverse(p) => CompiledPath::Inverse(lookup(p)?),
            PathPattern::ZeroOrMore(p) => CompiledPath::ZeroOrMore(lookup(p)?),
            PathPattern::OneOrMore(p) => CompiledPath::OneOrMore(lookup(p)?),
            PathPattern::ZeroOrOne(p) => CompiledPath::ZeroOrOne(lookup(p)?),
        })
    }
}

/// A compiled triple pattern.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompiledPattern {
    pub graph: GraphSlot,
    pub subject: Slot,
    pub path: CompiledPath,
    pub object: Slot,
}

impl CompiledPattern {
    pub fn compile(pattern: &TriplePattern, snap: &ReadSnapshot<'_>) -> Result<Self> {
        Ok(CompiledPattern {
            graph: GraphSlot::compile(&pattern.graph, snap)?,
            subject: Slot::compile(&pattern.subject, snap)?,
            path: CompiledPath::compile(&pattern.path, snap)?,
            object: Slot::compile(&pattern.object, snap)?,
        })
    }

    /// Variables this pattern can bind.
    pub fn vars(&self) -> Vec<VarId> {
        let mut vars = Vec::new();
        if let GraphSlot::Var(v) = self.graph {
            vars.push(v);
        }
        for slot in [
            self.subject,
            match self.path {
                CompiledPath::Direct(s) => s,
                _ => Slot::Impossible,
            },
            self.object,
        ] {
            if let Slot::Var(v) = slot {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        vars
    }

    /// True when a position references a term the store has never seen.
    pub fn impossible(&self) -> bool {
        matches!(self.subject, Slot::Impossible)
            || matches!(self.object, Slot::Impossible)
            || matches!(self.graph, GraphSlot::Impossible)
            || matches!(self.path, CompiledPath::Direct(Slot::Impossible))
            // An inverse or one-or-more step over an unknown predicate has
            // no edges to follow. Zero-step paths still match.
            || matches!(self.path, CompiledPath::Inverse(None))
            || matches!(self.path, CompiledPath::OneOrMore(None))
    }
}

enum ScanState<'s> {
    Closed,
    /// Nothing can match.
    Empty,
    /// Streaming from an engine cursor; `swap` swaps subject/object roles
    /// (inverse paths).
    Direct { cursor: QuadCursor<'s>, swap: bool },
    /// Materialised path pairs (graph, subject, object) and a read index.
    Path(usize),
}

/// Streaming matches of one triple pattern.
pub(crate) struct PatternScan<'s> {
    pattern: CompiledPattern,
    state: ScanState<'s>,
    mark: Option<Mark>,
    /// Reused across re-opens; holds (graph, subject, object) path pairs.
    path_buf: Vec<(AtomId, AtomId, AtomId)>,
}

impl<'s> PatternScan<'s> {
    pub fn new(pattern: CompiledPattern) -> Self {
        PatternScan {
            pattern,
            state: ScanState::Closed,
            mark: None,
            path_buf: Vec::new(),
        }
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    fn scope_at_open(&self, bindings: &BindingSet) -> Option<GraphScope> {
        match self.pattern.graph {
            GraphSlot::Default => Some(GraphScope::Default),
            GraphSlot::Const(id) => Some(GraphScope::Named(id)),
            GraphSlot::Var(v) => match bindings.get(v) {
                Some(id) => Some(GraphScope::Named(id)),
                None => None, // ranges over named graphs
            },
            GraphSlot::Impossible => Some(GraphScope::Default),
        }
    }
}

impl<'s> Operator<'s> for PatternScan<'s> {
    fn open(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<()> {
        // Pattern-scan boundary: one cancellation check per (re)open.
        ctx.cancel.check()?;
        self.mark = Some(bindings.mark());
        if self.pattern.impossible() {
            self.state = ScanState::Empty;
            return Ok(());
        }

        let subject = self.pattern.subject.resolved(bindings);
        let object = self.pattern.object.resolved(bindings);

        match self.pattern.path {
            CompiledPath::Direct(pred_slot) => {
                let predicate = pred_slot.resolved(bindings);
                let scope = match self.scope_at_open(bindings) {
                    Some(scope) => scope,
                    None => GraphScope::All, // graph var: filter default below
                };
                let cursor =
                    ctx.snap
                        .scan(scope, subject, predicate, object, ctx.mode, Some(ctx.cancel.clone()))?;
                self.state = ScanState::Direct { cursor, swap: false };
            }
            CompiledPath::Inverse(pred) => {
                // ^P is P with subject and object roles exchanged.
                let scope = match self.scope_at_open(bindings) {
                    Some(scope) => scope,
                    None => GraphScope::All,
                };
                let cursor = ctx.snap.scan(
                    scope,
                    object,
                    pred,
                    subject,
                    ctx.mode,
                    Some(ctx.cancel.clone()),
                )?;
                self.state = ScanState::Direct { cursor, swap: true };
            }
            CompiledPath::ZeroOrMore(pred)
            | CompiledPath::OneOrMore(pred)
            | CompiledPath::ZeroOrOne(pred) => {
                self.materialize_path(ctx, bindings, pred, subject, object)?;
                self.state = ScanState::Path(0);
            }
        }
        Ok(())
    }

    fn next(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<bool> {
        let mark = self.mark.expect("next before open");
        loop {
            bindings.undo_to(mark);
            let (graph, subject, object) = match &mut self.state {
                ScanState::Closed | ScanState::Empty => return Ok(false),
                ScanState::Direct { cursor, swap } => match cursor.next()? {
                    None => return Ok(false),
                    Some(quad) => {
                        if *swap {
                            (quad.graph, quad.object, quad.subject)
                        } else {
                            // Bind the predicate variable if the pattern has
                            // one; constants were filtered by the cursor.
                            if let CompiledPath::Direct(Slot::Var(pv)) = self.pattern.path {
                                if !try_bind(bindings, pv, quad.predicate) {
                                    continue;
                                }
                            }
                            (quad.graph, quad.subject, quad.object)
                        }
                    }
                },
                ScanState::Path(idx) => {
                    ctx.cancel.check()?;
                    match self.path_buf.get(*idx) {
                        None => return Ok(false),
                        Some(&triple) => {
                            *idx += 1;
                            triple
                        }
                    }
                }
            };

            // Graph variable semantics: named graphs only.
            if let GraphSlot::Var(gv) = self.pattern.graph {
                if graph.is_none() {
                    continue;
                }
                if !try_bind(bindings, gv, graph) {
                    continue;
                }
            }
            if let Slot::Var(sv) = self.pattern.subject {
                if !try_bind(bindings, sv, subject) {
                    continue;
                }
            }
            if let Slot::Var(ov) = self.pattern.object {
                if !try_bind(bindings, ov, object) {
                    continue;
                }
            }
            return Ok(true);
        }
    }
}

/// Bind or verify: a variable already carrying a value must agree.
fn try_bind(bindings: &mut BindingSet, var: VarId, id: AtomId) -> bool {
    match bindings.get(var) {
        None => {
            bindings.bind(var, id);
            true
        }
        Some(existing) => existing == id,
    }
}

impl<'s> PatternScan<'s> {
    /// Materialise the (graph, subject, object) pairs of a closure path.
    fn materialize_path(
        &mut self,
        ctx: &ExecContext<'s>,
        bindings: &BindingSet,
        pred: Option<AtomId>,
        subject: Option<AtomId>,
        object: Option<AtomId>,
    ) -> Result<()> {
        self.path_buf.clear();
        let include_zero = matches!(
            self.pattern.path,
            CompiledPath::ZeroOrMore(_) | CompiledPath::ZeroOrOne(_)
        );
        let single_step = matches!(self.pattern.path, CompiledPath::ZeroOrOne(_));

        let scopes: Vec<(AtomId, GraphScope)> = match self.scope_at_open(bindings) {
            Some(GraphScope::Default) => vec![(AtomId::NONE, GraphScope::Default)],
            Some(GraphScope::Named(id)) => vec![(id, GraphScope::Named(id))],
            Some(GraphScope::All) => vec![(AtomId::NONE, GraphScope::All)],
            None => {
                // Graph variable: one closure per named graph.
                let mut graphs = Vec::new();
                let mut g = ctx.snap.named_graphs();
                while let Some(iri) = g.next()? {
                    if let Some(id) = ctx.snap.lookup(iri)? {
                        graphs.push((id, GraphScope::Named(id)));
                    }
                }
                graphs
            }
        };

        for (graph_id, scope) in scopes {
            match (subject, object) {
                (Some(start), _) => {
                    self.expand_forward(
                        ctx, scope, graph_id, pred, start, object, include_zero, single_step,
                    )?;
                }
                (None, Some(end)) => {
                    self.expand_backward(
                        ctx, scope, graph_id, pred, end, include_zero, single_step,
                    )?;
                }
                (None, None) => {
                    // Unbound on both sides: closure from every node
                    // incident to the predicate.
                    let starts = self.collect_starts(ctx, scope, pred)?;
                    for start in starts {
                        self.expand_forward(
                            ctx, scope, graph_id, pred, start, None, include_zero, single_step,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Breadth-first expansion from `start` following `pred`, with a
    /// visited set for cycle safety.
    #[allow(clippy::too_many_arguments)]
    fn expand_forward(
        &mut self,
        ctx: &ExecContext<'s>,
        scope: GraphScope,
        graph_id: AtomId,
        pred: Option<AtomId>,
        start: AtomId,
        required_object: Option<AtomId>,
        include_zero: bool,
        single_step: bool,
    ) -> Result<()> {
        // `visited` bounds expansion; `emitted` dedups targets. Kept
        // separate so a cycle back to the start still yields the
        // one-or-more solution (start, start).
        let mut visited: FxHashSet<AtomId> = FxHashSet::default();
        let mut emitted: FxHashSet<AtomId> = FxHashSet::default();
        let mut frontier = vec![start];
        visited.insert(start);
        if include_zero {
            emitted.insert(start);
            if required_object.map_or(true, |o| o == start) {
                self.path_buf.push((graph_id, start, start));
            }
        }

        while !frontier.is_empty() {
            ctx.cancel.check()?;
            let mut next_frontier = Vec::new();
            for node in frontier.drain(..) {
                if let Some(p) = pred {
                    let mut cursor =
                        ctx.snap
                            .scan(scope, Some(node), Some(p), None, ctx.mode, None)?;
                    while let Some(quad) = cursor.next()? {
                        if emitted.insert(quad.object)
                            && required_object.map_or(true, |o| o == quad.object)
                        {
                            self.path_buf.push((graph_id, start, quad.object));
                        }
                        if visited.insert(quad.object) {
                            next_frontier.push(quad.object);
                        }
                    }
                }
            }
            if single_step {
                break;
            }
            frontier = next_frontier;
        }
        Ok(())
    }

    /// Reverse expansion ending at `end`.
    fn expand_backward(
        &mut self,
        ctx: &ExecContext<'s>,
        scope: GraphScope,
        graph_id: AtomId,
        pred: Option<AtomId>,
        end: AtomId,
        include_zero: bool,
        single_step: bool,
    ) -> Result<()> {
        let mut visited: FxHashSet<AtomId> = FxHashSet::default();
        let mut emitted: FxHashSet<AtomId> = FxHashSet::default();
        let mut frontier = vec![end];
        visited.insert(end);
        if include_zero {
            emitted.insert(end);
            self.path_buf.push((graph_id, end, end));
        }

        while !frontier.is_empty() {
            ctx.cancel.check()?;
            let mut next_frontier = Vec::new();
            for node in frontier.drain(..) {
                if let Some(p) = pred {
                    let mut cursor =
                        ctx.snap
                            .scan(scope, None, Some(p), Some(node), ctx.mode, None)?;
                    while let Some(quad) = cursor.next()? {
                        if emitted.insert(quad.subject) {
                            self.path_buf.push((graph_id, quad.subject, end));
                        }
                        if visited.insert(quad.subject) {
                            next_frontier.push(quad.subject);
                        }
                    }
                }
            }
            if single_step {
                break;
            }
            frontier = next_frontier;
        }
        Ok(())
    }

    /// Distinct nodes incident to the predicate in this scope.
    fn collect_starts(
        &self,
        ctx: &ExecContext<'s>,
        scope: GraphScope,
        pred: Option<AtomId>,
    ) -> Result<Vec<AtomId>> {
        let mut nodes: FxHashSet<AtomId> = FxHashSet::default();
        if let Some(p) = pred {
            let mut cursor = ctx.snap.scan(scope, None, Some(p), None, ctx.mode, None)?;
            while let Some(quad) = cursor.next()? {
                nodes.insert(quad.subject);
                nodes.insert(quad.object);
            }
        }
        let mut out: Vec<AtomId> = nodes.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }
}
