//! Binding tables.
//!
//! A [`BindingSet`] is the caller-owned table every operator mutates in
//! place. Storage is a small inline vector with stack discipline: operators
//! take a [`BindingSet::mark`] before binding and truncate back on
//! backtrack, so pipeline composition allocates once per query, not per
//! row.

use mercury_core::AtomId;
use mercury_storage::fnv1a64;
use smallvec::SmallVec;

/// Stable variable identifier: the FNV-1a 64 hash of the variable name.
pub type VarId = u64;

/// Hash a variable name (without the leading `?`) to its id.
#[inline]
pub fn var_id(name: &str) -> VarId {
    fnv1a64(name.as_bytes())
}

/// A mark into the binding stack, for trail-based undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// The mutable variable → atom table threaded through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct BindingSet {
    slots: SmallVec<[(VarId, AtomId); 8]>,
}

impl BindingSet {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The binding for a variable, if any.
    pub fn get(&self, var: VarId) -> Option<AtomId> {
        self.slots
            .iter()
            .rev()
            .find(|(v, _)| *v == var)
            .map(|(_, id)| *id)
    }

    /// Bind a variable. The caller keeps vars unique per scope; a rebind
    /// shadows until undone.
    pub fn bind(&mut self, var: VarId, id: AtomId) {
        self.slots.push((var, id));
    }

    /// Current stack position.
    pub fn mark(&self) -> Mark {
        Mark(self.slots.len())
    }

    /// Drop every binding made after `mark`.
    pub fn undo_to(&mut self, mark: Mark) {
        self.slots.truncate(mark.0);
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Iterate current bindings in binding order (shadowed entries
    /// included; use [`get`](Self::get) for resolution).
    pub fn iter(&self) -> impl Iterator<Item = (VarId, AtomId)> + '_ {
        self.slots.iter().copied()
    }
}
