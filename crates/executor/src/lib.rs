//! Streaming query pipeline for the Mercury quad store
//!
//! The execution side of the engine: graph-pattern algebra in, streaming
//! results out. SPARQL surface syntax stays external; collaborators hand
//! this crate an algebra tree and receive a typed result (a bindings
//! stream, a boolean, or a triple stream).
//!
//! - [`algebra`]: the query AST: patterns, property paths, filters, forms
//! - [`binding`]: caller-pooled binding tables with trail-based undo
//! - [`analyzer`]: textual filter dependency analysis for pushdown
//! - [`filter`]: the filter expression parser and evaluator
//! - [`scan`]: single-pattern scans, including property paths
//! - [`join`]: reordering, OPTIONAL/UNION/subqueries, the Volcano pipeline
//! - [`exec`]: SELECT / ASK / CONSTRUCT / DESCRIBE orchestration

pub mod algebra;
pub mod analyzer;
pub mod binding;
pub mod exec;
pub mod filter;
pub mod join;
pub mod scan;

pub use algebra::{
    FilterSpec, GraphPattern, PathPattern, Query, TemporalSpec, TermPattern, TriplePattern,
    UnionPattern,
};
pub use binding::{var_id, BindingSet, VarId};
pub use exec::{execute, QueryOutcome, SolutionCursor, TripleCursor};
