//! The query algebra.
//!
//! What an external query parser produces and this crate consumes. Terms
//! are lexical strings here; compilation resolves them against the atom
//! store once per query.

use mercury_core::Timestamp;
use mercury_engine::TemporalMode;

/// A pattern position: a bound lexical term or a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermPattern {
    /// A bound term (IRI, blank node id, or literal lexical form).
    Term(String),
    /// A variable, named without the leading `?`.
    Var(String),
}

impl TermPattern {
    /// Convenience constructor for a bound term.
    pub fn term(t: impl Into<String>) -> Self {
        TermPattern::Term(t.into())
    }

    /// Convenience constructor for a variable.
    pub fn var(name: impl Into<String>) -> Self {
        TermPattern::Var(name.into())
    }

    /// The variable name, if this is one.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            TermPattern::Var(name) => Some(name),
            TermPattern::Term(_) => None,
        }
    }
}

/// The predicate position: plain, or one of the minimum property paths.
///
/// Path operands are bound predicate terms; paths traverse existing quads
/// and never create or emit new atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// An ordinary predicate position (term or variable).
    Direct(TermPattern),
    /// `^P`: follow P backwards.
    Inverse(String),
    /// `P*`: reflexive-transitive closure.
    ZeroOrMore(String),
    /// `P+`: transitive closure.
    OneOrMore(String),
    /// `P?`: zero or one step.
    ZeroOrOne(String),
}

impl PathPattern {
    /// Convenience constructor for a plain bound predicate.
    pub fn term(p: impl Into<String>) -> Self {
        PathPattern::Direct(TermPattern::term(p))
    }

    /// Convenience constructor for a predicate variable.
    pub fn var(name: impl Into<String>) -> Self {
        PathPattern::Direct(TermPattern::var(name))
    }
}

/// One triple pattern, optionally graph-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    /// Subject position.
    pub subject: TermPattern,
    /// Predicate position or property path.
    pub path: PathPattern,
    /// Object position.
    pub object: TermPattern,
    /// Graph qualifier; `None` examines the default graph only.
    pub graph: Option<TermPattern>,
}

impl TriplePattern {
    /// A default-graph pattern.
    pub fn new(subject: TermPattern, path: PathPattern, object: TermPattern) -> Self {
        TriplePattern {
            subject,
            path,
            object,
            graph: None,
        }
    }

    /// The same pattern scoped to a named graph.
    pub fn in_graph(mut self, graph: TermPattern) -> Self {
        self.graph = Some(graph);
        self
    }
}

/// A filter attached to a graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// A textual expression, e.g. `?age > 30 && BOUND(?name)`.
    Expr(String),
    /// EXISTS / NOT EXISTS over a subpattern. Never pushed down.
    Exists {
        /// The probed subpattern.
        pattern: GraphPattern,
        /// True for NOT EXISTS.
        negated: bool,
    },
}

/// A UNION group: branches whose result streams concatenate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnionPattern {
    /// Alternative subpatterns.
    pub branches: Vec<GraphPattern>,
}

/// A graph pattern: required patterns, OPTIONAL subpatterns, UNION groups,
/// FILTER expressions and subquery groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphPattern {
    /// Patterns every solution must satisfy.
    pub required: Vec<TriplePattern>,
    /// Left-outer-joined subpatterns.
    pub optionals: Vec<GraphPattern>,
    /// UNION groups, each joined into the solution stream.
    pub unions: Vec<UnionPattern>,
    /// Filters, pushed down where their variables allow.
    pub filters: Vec<FilterSpec>,
    /// Nested groups joined like required patterns.
    pub subqueries: Vec<GraphPattern>,
}

impl GraphPattern {
    /// An empty pattern (matches once, binding nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required pattern (builder).
    pub fn pattern(mut self, p: TriplePattern) -> Self {
        self.required.push(p);
        self
    }

    /// Add a textual filter (builder).
    pub fn filter(mut self, expr: impl Into<String>) -> Self {
        self.filters.push(FilterSpec::Expr(expr.into()));
        self
    }

    /// Add an OPTIONAL subpattern (builder).
    pub fn optional(mut self, p: GraphPattern) -> Self {
        self.optionals.push(p);
        self
    }

    /// Add a UNION group (builder).
    pub fn union(mut self, branches: Vec<GraphPattern>) -> Self {
        self.unions.push(UnionPattern { branches });
        self
    }

    /// Add a subquery group (builder).
    pub fn subquery(mut self, p: GraphPattern) -> Self {
        self.subqueries.push(p);
        self
    }
}

/// The temporal mode a query runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalSpec {
    /// Valid now (the default).
    Current,
    /// Valid at a given instant.
    AsOf(Timestamp),
    /// Versions overlapping a window.
    Range(Timestamp, Timestamp),
    /// Every non-tombstone version.
    Evolution,
}

impl Default for TemporalSpec {
    fn default() -> Self {
        TemporalSpec::Current
    }
}

impl TemporalSpec {
    /// Resolve to the engine's scan mode, pinning `Current` to one instant
    /// for the whole query.
    pub fn resolve(self) -> TemporalMode {
        match self {
            TemporalSpec::Current => TemporalMode::AsOf(Timestamp::now()),
            TemporalSpec::AsOf(t) => TemporalMode::AsOf(t),
            TemporalSpec::Range(t1, t2) => TemporalMode::Range(t1, t2),
            TemporalSpec::Evolution => TemporalMode::Evolution,
        }
    }
}

/// A query form over a graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Projected bindings.
    Select {
        /// The pattern to solve.
        pattern: GraphPattern,
        /// Variables to project; `None` projects everything bound.
        projection: Option<Vec<String>>,
    },
    /// Does at least one solution exist?
    Ask {
        /// The pattern to probe.
        pattern: GraphPattern,
    },
    /// Triples synthesised from a template per solution.
    Construct {
        /// Template triples; solutions instantiate their variables.
        template: Vec<TriplePattern>,
        /// The pattern to solve.
        pattern: GraphPattern,
    },
    /// One-hop closure of each resource: as subject and as object.
    Describe {
        /// Resources to describe (bound terms).
        resources: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let pattern = GraphPattern::new()
            .pattern(TriplePattern::new(
                TermPattern::var("p"),
                PathPattern::term("ex:age"),
                TermPattern::var("a"),
            ))
            .filter("?a > 30")
            .optional(GraphPattern::new().pattern(TriplePattern::new(
                TermPattern::var("p"),
                PathPattern::term("ex:email"),
                TermPattern::var("e"),
            )));
        assert_eq!(pattern.required.len(), 1);
        assert_eq!(pattern.filters.len(), 1);
        assert_eq!(pattern.optionals.len(), 1);
    }

    #[test]
    fn temporal_spec_resolution() {
        let t = Timestamp::from_secs(1000);
        assert_eq!(TemporalSpec::AsOf(t).resolve(), TemporalMode::AsOf(t));
        assert!(matches!(
            TemporalSpec::Current.resolve(),
            TemporalMode::AsOf(_)
        ));
        assert_eq!(
            TemporalSpec::Evolution.resolve(),
            TemporalMode::Evolution
        );
    }

    #[test]
    fn graph_qualification() {
        let p = TriplePattern::new(
            TermPattern::term("ex:s"),
            PathPattern::term("ex:p"),
            TermPattern::term("ex:o"),
        )
        .in_graph(TermPattern::term("http://g1"));
        assert_eq!(p.graph, Some(TermPattern::term("http://g1")));
    }
}
