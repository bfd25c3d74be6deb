//! Query orchestration: SELECT, ASK, CONSTRUCT, DESCRIBE.
//!
//! [`execute`] compiles a query against a [`ReadSnapshot`] and returns a
//! typed outcome: a bindings stream, a boolean, or a triple stream. The
//! snapshot (and with it the store's shared lock) stays held for the
//! query's lifetime because every cursor borrows it; `current` values are
//! borrowed views valid until the next `next`.

use crate::algebra::{GraphPattern, Query, TemporalSpec, TermPattern, TriplePattern};
use crate::binding::{var_id, BindingSet, VarId};
use crate::join::Pipeline;
use crate::scan::{ExecContext, Operator};
use mercury_concurrency::cancel::{CancellationToken, CANCEL_CHECK_STRIDE};
use mercury_core::{AtomId, DiagnosticBag, Result};
use mercury_engine::{GraphScope, QuadCursor, ReadSnapshot};
use rustc_hash::FxHashSet;
use std::fmt;
use tracing::debug;

/// The typed result of a query.
pub enum QueryOutcome<'s> {
    /// SELECT: a stream of projected bindings.
    Bindings(SolutionCursor<'s>),
    /// ASK: does a solution exist?
    Boolean(bool),
    /// CONSTRUCT / DESCRIBE: a stream of triples.
    Triples(TripleCursor<'s>),
}

impl<'s> fmt::Debug for QueryOutcome<'s> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutcome::Bindings(_) => f.write_str("QueryOutcome::Bindings(..)"),
            QueryOutcome::Boolean(b) => write!(f, "QueryOutcome::Boolean({b})"),
            QueryOutcome::Triples(_) => f.write_str("QueryOutcome::Triples(..)"),
        }
    }
}

/// Compile and run a query.
pub fn execute<'s>(
    snap: &'s ReadSnapshot<'s>,
    query: &Query,
    temporal: TemporalSpec,
    cancel: CancellationToken,
    bag: &mut DiagnosticBag,
) -> Result<QueryOutcome<'s>> {
    let ctx = ExecContext {
        snap,
        mode: temporal.resolve(),
        cancel,
    };

    match query {
        Query::Select {
            pattern,
            projection,
        } => {
            let pipeline = Pipeline::build(snap, pattern, bag)?;
            let projected = match projection {
                Some(names) => names
                    .iter()
                    .map(|n| (n.clone(), var_id(n)))
                    .collect(),
                None => {
                    let mut names = Vec::new();
                    collect_var_names(pattern, &mut names);
                    names.into_iter().map(|n| {
                        let id = var_id(&n);
                        (n, id)
                    }).collect()
                }
            };
            debug!(vars = pipeline.vars().len(), "select query compiled");
            Ok(QueryOutcome::Bindings(SolutionCursor {
                ctx,
                pipeline,
                bindings: BindingSet::new(),
                projected,
                started: false,
                rows: 0,
            }))
        }
        Query::Ask { pattern } => {
            let mut pipeline = Pipeline::build(snap, pattern, bag)?;
            let mut bindings = BindingSet::new();
            pipeline.open(&ctx, &mut bindings)?;
            let hit = pipeline.next(&ctx, &mut bindings)?;
            Ok(QueryOutcome::Boolean(hit))
        }
        Query::Construct { template, pattern } => {
            let pipeline = Pipeline::build(snap, pattern, bag)?;
            let compiled_template = template.iter().map(compile_template).collect();
            Ok(QueryOutcome::Triples(TripleCursor {
                ctx,
                kind: TripleKind::Construct {
                    pipeline,
                    bindings: BindingSet::new(),
                    template: compiled_template,
                    template_idx: 0,
                    started: false,
                },
                current: Default::default(),
            }))
        }
        Query::Describe { resources } => {
            let mut ids = Vec::new();
            for term in resources {
                if let Some(id) = snap.lookup(term)? {
                    ids.push(id);
                }
            }
            Ok(QueryOutcome::Triples(TripleCursor {
                ctx,
                kind: TripleKind::Describe {
                    resources: ids,
                    idx: 0,
                    as_object: false,
                    cursor: None,
                    seen: FxHashSet::default(),
                },
                current: Default::default(),
            }))
        }
    }
}

/// Every variable name mentioned in pattern positions, first appearance
/// order, recursively.
fn collect_var_names(pattern: &GraphPattern, out: &mut Vec<String>) {
    let mut push = |name: &str, out: &mut Vec<String>| {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    };
    for p in &pattern.required {
        for term in [&p.subject, &p.object] {
            if let Some(name) = term.as_var() {
                push(name, out);
            }
        }
        if let crate::algebra::PathPattern::Direct(TermPattern::Var(name)) = &p.path {
            push(name, out);
        }
        if let Some(TermPattern::Var(name)) = &p.graph {
            push(name, out);
        }
    }
    for sub in &pattern.subqueries {
        collect_var_names(sub, out);
    }
    for union in &pattern.unions {
        for branch in &union.branches {
            collect_var_names(branch, out);
        }
    }
    for opt in &pattern.optionals {
        collect_var_names(opt, out);
    }
}

/// Streaming SELECT results.
pub struct SolutionCursor<'s> {
    ctx: ExecContext<'s>,
    pipeline: Pipeline<'s>,
    bindings: BindingSet,
    projected: Vec<(String, VarId)>,
    started: bool,
    rows: u64,
}

impl<'s> SolutionCursor<'s> {
    /// Advance to the next solution.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            self.pipeline.open(&self.ctx, &mut self.bindings)?;
        }
        self.rows += 1;
        if self.rows % CANCEL_CHECK_STRIDE == 0 {
            self.ctx.cancel.check()?;
        }
        self.pipeline.next(&self.ctx, &mut self.bindings)
    }

    /// Projected variable names, in projection order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.projected.iter().map(|(n, _)| n.as_str())
    }

    /// The atom bound to a projected variable in the current solution.
    pub fn var(&self, name: &str) -> Option<AtomId> {
        let id = var_id(name);
        if !self.projected.iter().any(|(_, v)| *v == id) {
            return None;
        }
        self.bindings.get(id)
    }

    /// The lexical term bound to a projected variable, resolved.
    pub fn term(&self, name: &str) -> Result<Option<&str>> {
        match self.var(name) {
            None => Ok(None),
            Some(id) => self.ctx.snap.resolve(id).map(Some),
        }
    }

    /// Raw access to the current binding table.
    pub fn bindings(&self) -> &BindingSet {
        &self.bindings
    }
}

enum TemplateSlot {
    Text(String),
    Var(VarId),
}

struct CompiledTemplate {
    subject: TemplateSlot,
    predicate: TemplateSlot,
    object: TemplateSlot,
}

fn compile_template(t: &TriplePattern) -> CompiledTemplate {
    let slot = |term: &TermPattern| match term {
        TermPattern::Term(text) => TemplateSlot::Text(text.clone()),
        TermPattern::Var(name) => TemplateSlot::Var(var_id(name)),
    };
    let pred = match &t.path {
        crate::algebra::PathPattern::Direct(term) => slot(term),
        // Path operators make no sense in a template; take the operand
        // as a constant predicate.
        crate::algebra::PathPattern::Inverse(p)
        | crate::algebra::PathPattern::ZeroOrMore(p)
        | crate::algebra::PathPattern::OneOrMore(p)
        | crate::algebra::PathPattern::ZeroOrOne(p) => TemplateSlot::Text(p.clone()),
    };
    CompiledTemplate {
        subject: slot(&t.subject),
        predicate: pred,
        object: slot(&t.object),
    }
}

enum TripleKind<'s> {
    Construct {
        pipeline: Pipeline<'s>,
        bindings: BindingSet,
        template: Vec<CompiledTemplate>,
        template_idx: usize,
        started: bool,
    },
    Describe {
        resources: Vec<AtomId>,
        idx: usize,
        as_object: bool,
        cursor: Option<QuadCursor<'s>>,
        seen: FxHashSet<(u64, u64, u64)>,
    },
}

/// Streaming triples from CONSTRUCT or DESCRIBE.
///
/// The current triple's term buffers are reused between rows: borrow them
/// through [`TripleCursor::current`] only until the next `next`.
pub struct TripleCursor<'s> {
    ctx: ExecContext<'s>,
    kind: TripleKind<'s>,
    current: (String, String, String),
}

impl<'s> TripleCursor<'s> {
    /// Advance to the next triple.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        match &mut self.kind {
            TripleKind::Construct { .. } => self.next_construct(),
            TripleKind::Describe { .. } => self.next_describe(),
        }
    }

    /// The current (subject, predicate, object).
    pub fn current(&self) -> (&str, &str, &str) {
        (&self.current.0, &self.current.1, &self.current.2)
    }

    fn next_construct(&mut self) -> Result<bool> {
        loop {
            let (pipeline, bindings, template, template_idx, started) = match &mut self.kind {
                TripleKind::Construct {
                    pipeline,
                    bindings,
                    template,
                    template_idx,
                    started,
                } => (pipeline, bindings, template, template_idx, started),
                _ => unreachable!("construct state"),
            };

            if !*started {
                *started = true;
                pipeline.open(&self.ctx, bindings)?;
                if !pipeline.next(&self.ctx, bindings)? {
                    return Ok(false);
                }
                *template_idx = 0;
            }

            while *template_idx < template.len() {
                let t = &template[*template_idx];
                *template_idx += 1;
                let snap = self.ctx.snap;
                let resolve = |slot: &TemplateSlot,
                               buf: &mut String|
                 -> Result<bool> {
                    buf.clear();
                    match slot {
                        TemplateSlot::Text(text) => {
                            buf.push_str(text);
                            Ok(true)
                        }
                        TemplateSlot::Var(v) => match bindings.get(*v) {
                            None => Ok(false), // unbound: skip this triple
                            Some(id) => {
                                buf.push_str(snap.resolve(id)?);
                                Ok(true)
                            }
                        },
                    }
                };
                let ok = resolve(&t.subject, &mut self.current.0)?
                    && resolve(&t.predicate, &mut self.current.1)?
                    && resolve(&t.object, &mut self.current.2)?;
                if ok {
                    return Ok(true);
                }
            }

            if !pipeline.next(&self.ctx, bindings)? {
                return Ok(false);
            }
            *template_idx = 0;
        }
    }

    fn next_describe(&mut self) -> Result<bool> {
        loop {
            let snap = self.ctx.snap;
            let mode = self.ctx.mode;
            let (resources, idx, as_object, cursor, seen) = match &mut self.kind {
                TripleKind::Describe {
                    resources,
                    idx,
                    as_object,
                    cursor,
                    seen,
                } => (resources, idx, as_object, cursor, seen),
                _ => unreachable!("describe state"),
            };

            if cursor.is_none() {
                if *idx >= resources.len() {
                    return Ok(false);
                }
                let resource = resources[*idx];
                let next_cursor = if !*as_object {
                    snap.scan(GraphScope::All, Some(resource), None, None, mode, None)?
                } else {
                    snap.scan(GraphScope::All, None, None, Some(resource), mode, None)?
                };
                *cursor = Some(next_cursor);
            }

            match cursor.as_mut().expect("cursor set above").next()? {
                Some(quad) => {
                    let key = (
                        quad.subject.raw(),
                        quad.predicate.raw(),
                        quad.object.raw(),
                    );
                    if !seen.insert(key) {
                        continue;
                    }
                    self.current.0.clear();
                    self.current.0.push_str(snap.resolve(quad.subject)?);
                    self.current.1.clear();
                    self.current.1.push_str(snap.resolve(quad.predicate)?);
                    self.current.2.clear();
                    self.current.2.push_str(snap.resolve(quad.object)?);
                    return Ok(true);
                }
                None => {
                    // Exhausted one hop; move to the other direction or the
                    // next resource.
                    *cursor = None;
                    if !*as_object {
                        *as_object = true;
                    } else {
                        *as_object = false;
                        *idx += 1;
                    }
                }
            }
        }
    }
}
