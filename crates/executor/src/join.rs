//! Multi-pattern join pipeline.
//!
//! Builds a Volcano-style nested-loop pipeline from a graph pattern:
//!
//! 1. required patterns are reordered by estimated selectivity (statistics
//!    from the last checkpoint, declaration order breaking ties),
//! 2. each filter is pushed to the earliest level after which all of its
//!    variables are bound (EXISTS never pushes),
//! 3. subquery groups join like required patterns, UNION groups concatenate
//!    branch streams, OPTIONAL groups left-outer-join,
//! 4. whatever could not push runs after everything else.
//!
//! All operators mutate one caller-owned [`BindingSet`]; composition
//! allocates at build time, not per row.

use crate::algebra::{FilterSpec, GraphPattern};
use crate::analyzer;
use crate::binding::{BindingSet, Mark, VarId};
use crate::filter::CompiledFilter;
use crate::scan::{CompiledPath, CompiledPattern, ExecContext, Operator, PatternScan, Slot};
use mercury_core::diagnostics::{Span, I_FILTER_NOT_PUSHED};
use mercury_core::{DiagnosticBag, Result};
use mercury_engine::ReadSnapshot;
use rustc_hash::FxHashSet;
use tracing::debug;

const NOT_STARTED: i32 = -1;
const EXHAUSTED: i32 = -2;
const EMPTY_EMITTED: i32 = -3;

/// One stage of the pipeline.
enum Level<'s> {
    /// A pattern scan plus the filters pushed to this level.
    Scan {
        scan: PatternScan<'s>,
        filters: Vec<CompiledFilter>,
    },
    /// A left-outer-joined subpattern.
    Optional {
        inner: Pipeline<'s>,
        matched: bool,
        passed: bool,
    },
    /// Concatenated branches over a common projection.
    Union {
        branches: Vec<Pipeline<'s>>,
        current: usize,
    },
    /// A nested group joined like a required pattern.
    Group(Pipeline<'s>),
}

impl<'s> Level<'s> {
    fn open(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<()> {
        match self {
            Level::Scan { scan, .. } => scan.open(ctx, bindings),
            Level::Optional {
                inner,
                matched,
                passed,
            } => {
                *matched = false;
                *passed = false;
                inner.open(ctx, bindings)
            }
            Level::Union { branches, current } => {
                *current = 0;
                if let Some(first) = branches.first_mut() {
                    first.open(ctx, bindings)?;
                }
                Ok(())
            }
            Level::Group(inner) => inner.open(ctx, bindings),
        }
    }

    fn next(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<bool> {
        match self {
            Level::Scan { scan, filters } => loop {
                if !scan.next(ctx, bindings)? {
                    return Ok(false);
                }
                let mut pass = true;
                for f in filters.iter() {
                    if !f.eval(bindings, ctx.snap)? {
                        pass = false;
                        break;
                    }
                }
                if pass {
                    return Ok(true);
                }
            },
            Level::Optional {
                inner,
                matched,
                passed,
            } => {
                if inner.next(ctx, bindings)? {
                    *matched = true;
                    return Ok(true);
                }
                if !*matched && !*passed {
                    // No extension exists: emit the left side untouched.
                    *passed = true;
                    return Ok(true);
                }
                Ok(false)
            }
            Level::Union { branches, current } => loop {
                if *current >= branches.len() {
                    return Ok(false);
                }
                if branches[*current].next(ctx, bindings)? {
                    return Ok(true);
                }
                *current += 1;
                if let Some(branch) = branches.get_mut(*current) {
                    branch.open(ctx, bindings)?;
                }
            },
            Level::Group(inner) => inner.next(ctx, bindings),
        }
    }
}

/// An EXISTS / NOT EXISTS probe run against each full solution.
struct ExistsProbe<'s> {
    inner: Pipeline<'s>,
    negated: bool,
}

/// The compiled pipeline for one graph pattern.
pub(crate) struct Pipeline<'s> {
    levels: Vec<Level<'s>>,
    end_filters: Vec<CompiledFilter>,
    exists_probes: Vec<ExistsProbe<'s>>,
    depth: i32,
    base_mark: Option<Mark>,
    /// Variables this pipeline can bind, in a stable order.
    vars: Vec<VarId>,
}

impl<'s> Pipeline<'s> {
    /// Compile and order a graph pattern against a snapshot.
    pub fn build(
        snap: &'s ReadSnapshot<'s>,
        pattern: &GraphPattern,
        bag: &mut DiagnosticBag,
    ) -> Result<Self> {
        // Compile and reorder the required patterns.
        let compiled: Vec<CompiledPattern> = pattern
            .required
            .iter()
            .map(|p| CompiledPattern::compile(p, snap))
            .collect::<Result<_>>()?;

        let order = plan_order(&compiled, snap);
        let ordered: Vec<CompiledPattern> = order.iter().map(|&i| compiled[i]).collect();

        // Variables bound at or before each required level.
        let mut bound_after: Vec<FxHashSet<VarId>> = Vec::with_capacity(ordered.len());
        let mut running: FxHashSet<VarId> = FxHashSet::default();
        for p in &ordered {
            running.extend(p.vars());
            bound_after.push(running.clone());
        }

        let mut levels: Vec<Level<'s>> = ordered
            .into_iter()
            .map(|p| Level::Scan {
                scan: PatternScan::new(p),
                filters: Vec::new(),
            })
            .collect();

        let mut all_vars: Vec<VarId> = Vec::new();
        let push_vars = |vs: &[VarId], all: &mut Vec<VarId>| {
            for v in vs {
                if !all.contains(v) {
                    all.push(*v);
                }
            }
        };
        for level in &levels {
            if let Level::Scan { scan, .. } = level {
                push_vars(&scan.pattern().vars(), &mut all_vars);
            }
        }

        // Filters: push where bound, run at the end otherwise.
        let mut end_filters = Vec::new();
        let mut exists_probes = Vec::new();
        for spec in &pattern.filters {
            match spec {
                FilterSpec::Expr(text) => {
                    let filter = CompiledFilter::compile(text, bag)?;
                    let placement = if filter.pushable {
                        analyzer::insertion_level(&filter.vars, &bound_after)
                    } else {
                        None
                    };
                    match placement {
                        Some(level) => {
                            if let Level::Scan { filters, .. } = &mut levels[level] {
                                filters.push(filter);
                            }
                        }
                        None => {
                            bag.report(I_FILTER_NOT_PUSHED, Span::default());
                            end_filters.push(filter);
                        }
                    }
                }
                FilterSpec::Exists { pattern, negated } => {
                    let inner = Pipeline::build(snap, pattern, bag)?;
                    exists_probes.push(ExistsProbe {
                        inner,
                        negated: *negated,
                    });
                }
            }
        }

        // Nested structure: subqueries join, unions concatenate, optionals
        // left-outer-join, in that order after the required scans.
        for sub in &pattern.subqueries {
            let inner = Pipeline::build(snap, sub, bag)?;
            push_vars(&inner.vars, &mut all_vars);
            levels.push(Level::Group(inner));
        }
        for union in &pattern.unions {
            let branches: Vec<Pipeline<'s>> = union
                .branches
                .iter()
                .map(|b| Pipeline::build(snap, b, bag))
                .collect::<Result<_>>()?;
            for b in &branches {
                push_vars(&b.vars, &mut all_vars);
            }
            levels.push(Level::Union {
                branches,
                current: 0,
            });
        }
        for opt in &pattern.optionals {
            let inner = Pipeline::build(snap, opt, bag)?;
            push_vars(&inner.vars, &mut all_vars);
            levels.push(Level::Optional {
                inner,
                matched: false,
                passed: false,
            });
        }

        debug!(
            levels = levels.len(),
            end_filters = end_filters.len(),
            "pipeline built"
        );

        Ok(Pipeline {
            levels,
            end_filters,
            exists_probes,
            depth: NOT_STARTED,
            base_mark: None,
            vars: all_vars,
        })
    }

    /// Variables this pipeline can bind.
    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    fn eval_tail(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<bool> {
        for f in &self.end_filters {
            if !f.eval(bindings, ctx.snap)? {
                return Ok(false);
            }
        }
        for probe in &mut self.exists_probes {
            let mark = bindings.mark();
            probe.inner.open(ctx, bindings)?;
            let hit = probe.inner.next(ctx, bindings)?;
            bindings.undo_to(mark);
            if hit == probe.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<'s> Operator<'s> for Pipeline<'s> {
    fn open(&mut self, _ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<()> {
        self.depth = NOT_STARTED;
        self.base_mark = Some(bindings.mark());
        Ok(())
    }

    fn next(&mut self, ctx: &ExecContext<'s>, bindings: &mut BindingSet) -> Result<bool> {
        if self.depth == EXHAUSTED {
            return Ok(false);
        }
        if self.depth == EMPTY_EMITTED {
            self.depth = EXHAUSTED;
            if let Some(mark) = self.base_mark {
                bindings.undo_to(mark);
            }
            return Ok(false);
        }

        if self.depth == NOT_STARTED {
            if self.levels.is_empty() {
                // An empty pattern matches exactly once.
                self.depth = EMPTY_EMITTED;
                return self.eval_tail(ctx, bindings);
            }
            self.depth = 0;
            self.levels[0].open(ctx, bindings)?;
        }

        loop {
            if self.depth < 0 {
                self.depth = EXHAUSTED;
                if let Some(mark) = self.base_mark {
                    bindings.undo_to(mark);
                }
                return Ok(false);
            }
            let d = self.depth as usize;
            if self.levels[d].next(ctx, bindings)? {
                if d + 1 == self.levels.len() {
                    if self.eval_tail(ctx, bindings)? {
                        return Ok(true);
                    }
                    // Tail rejected this solution; continue at this level.
                } else {
                    self.depth += 1;
                    let nd = self.depth as usize;
                    self.levels[nd].open(ctx, bindings)?;
                }
            } else {
                self.depth -= 1;
            }
        }
    }
}

/// Greedy selectivity ordering. Returns indices into the original pattern
/// list, most selective first, declaration order breaking ties.
fn plan_order(patterns: &[CompiledPattern], snap: &ReadSnapshot<'_>) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..patterns.len()).collect();
    let mut order = Vec::with_capacity(patterns.len());
    let mut bound: FxHashSet<VarId> = FxHashSet::default();

    while !remaining.is_empty() {
        let mut best_pos = 0usize;
        let mut best_cost = f64::INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let cost = estimate(&patterns[idx], &bound, snap);
            if cost < best_cost {
                best_cost = cost;
                best_pos = pos;
            }
        }
        let idx = remaining.remove(best_pos);
        bound.extend(patterns[idx].vars());
        order.push(idx);
    }
    order
}

/// Expected rows from scanning one pattern given the already-bound vars.
/// Statistics come from the last checkpoint; this is advisory only.
fn estimate(pattern: &CompiledPattern, bound: &FxHashSet<VarId>, snap: &ReadSnapshot<'_>) -> f64 {
    if pattern.impossible() {
        return 0.0;
    }
    let total = snap.stats_total_quads().max(snap.quad_count()).max(1) as f64;

    let slot_bound = |slot: &Slot| match slot {
        Slot::Const(_) => true,
        Slot::Var(v) => bound.contains(v),
        Slot::Impossible => true,
    };

    let (mut est, pred_stats) = match pattern.path {
        CompiledPath::Direct(Slot::Const(p)) => match snap.predicate_stats(p) {
            Some(stats) => (stats.count.max(1) as f64, Some(stats)),
            None => (total / 10.0, None),
        },
        CompiledPath::Direct(_) => (total, None),
        // Closure paths touch a multiple of the predicate's edges.
        CompiledPath::Inverse(Some(p))
        | CompiledPath::ZeroOrMore(Some(p))
        | CompiledPath::OneOrMore(Some(p))
        | CompiledPath::ZeroOrOne(Some(p)) => match snap.predicate_stats(p) {
            Some(stats) => (stats.count.max(1) as f64 * 2.0, Some(stats)),
            None => (total / 10.0, None),
        },
        _ => (1.0, None),
    };

    if slot_bound(&pattern.subject) {
        let distinct = pred_stats
            .map(|s| s.distinct_subjects.max(1) as f64)
            .unwrap_or(10.0);
        est /= distinct;
    }
    if slot_bound(&pattern.object) {
        est /= 10.0;
    }
    est.max(0.001)
}
