//! Filter dependency analysis for pushdown.
//!
//! Works on the raw filter expression text: extracts the set of referenced
//! variables by scanning for `?name` lexemes (skipping the inside of string
//! literals) and detects EXISTS / NOT EXISTS with a case-insensitive
//! keyword scan under the same string-skipping rule. Does not evaluate
//! anything.
//!
//! The insertion point of a filter is the earliest pattern level after
//! which every referenced variable is bound; filters that reference a
//! variable nothing binds run at the end (and can only fail or pass on
//! BOUND-ness), and EXISTS filters never push.

use crate::binding::{var_id, VarId};
use rustc_hash::FxHashSet;

/// What the analyzer found in one filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAnalysis {
    /// Ids of the variables the expression references.
    pub vars: Vec<VarId>,
    /// False when the expression contains EXISTS / NOT EXISTS.
    pub pushable: bool,
}

/// Analyze a filter expression's variable references and pushability.
pub fn analyze(text: &str) -> FilterAnalysis {
    let bytes = text.as_bytes();
    let mut vars = Vec::new();
    let mut seen: FxHashSet<VarId> = FxHashSet::default();
    let mut has_exists = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'?' | b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_var_char(bytes[end]) {
                    end += 1;
                }
                if end > start {
                    let id = var_id(&text[start..end]);
                    if seen.insert(id) {
                        vars.push(id);
                    }
                }
                i = end;
            }
            c if c.eq_ignore_ascii_case(&b'e') => {
                if keyword_at(bytes, i, b"EXISTS") && word_boundary(bytes, i, 6) {
                    has_exists = true;
                    i += 6;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    FilterAnalysis {
        vars,
        pushable: !has_exists,
    }
}

/// Earliest level index after which all of `vars` are bound, given the set
/// of variables bound at or before each level. `None` means some variable
/// is never bound (the filter runs at the end).
pub fn insertion_level(vars: &[VarId], bound_after: &[FxHashSet<VarId>]) -> Option<usize> {
    if vars.is_empty() {
        // A constant filter can run as early as possible.
        return Some(0);
    }
    bound_after
        .iter()
        .position(|bound| vars.iter().all(|v| bound.contains(v)))
}

fn is_var_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Skip a quoted string starting at `i`; returns the index past the closing
/// quote (or the end of input for an unterminated literal).
fn skip_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        if bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

fn keyword_at(bytes: &[u8], i: usize, keyword: &[u8]) -> bool {
    bytes.len() >= i + keyword.len()
        && bytes[i..i + keyword.len()].eq_ignore_ascii_case(keyword)
}

/// True if the `len` bytes at `i` form a standalone word.
fn word_boundary(bytes: &[u8], i: usize, len: usize) -> bool {
    let before_ok = i == 0 || !is_var_char(bytes[i - 1]);
    let after_ok = i + len >= bytes.len() || !is_var_char(bytes[i + len]);
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_variables() {
        let a = analyze("?age > 30 && ?name != \"x\"");
        assert_eq!(a.vars, vec![var_id("age"), var_id("name")]);
        assert!(a.pushable);
    }

    #[test]
    fn dollar_variables_count_too() {
        let a = analyze("$x = $y");
        assert_eq!(a.vars, vec![var_id("x"), var_id("y")]);
    }

    #[test]
    fn duplicates_collapse() {
        let a = analyze("?a > 1 && ?a < 10");
        assert_eq!(a.vars, vec![var_id("a")]);
    }

    #[test]
    fn skips_variables_inside_strings() {
        let a = analyze("?real = \"?fake ?also_fake\"");
        assert_eq!(a.vars, vec![var_id("real")]);
    }

    #[test]
    fn skips_escaped_quotes() {
        let a = analyze(r#"?x = "a \" ?still_fake" && ?y > 0"#);
        assert_eq!(a.vars, vec![var_id("x"), var_id("y")]);
    }

    #[test]
    fn detects_exists_case_insensitive() {
        assert!(!analyze("EXISTS { ?s ?p ?o }").pushable);
        assert!(!analyze("exists { ?s ?p ?o }").pushable);
        assert!(!analyze("NOT eXiStS { ?s ?p ?o }").pushable);
    }

    #[test]
    fn exists_inside_string_does_not_count() {
        assert!(analyze("?x = \"EXISTS\"").pushable);
    }

    #[test]
    fn exists_as_substring_does_not_count() {
        assert!(analyze("?coexists > 1").pushable);
        assert!(analyze("?x = ?existsy").pushable);
    }

    #[test]
    fn insertion_level_earliest() {
        let a = var_id("a");
        let b = var_id("b");
        let c = var_id("c");
        let mut l0 = FxHashSet::default();
        l0.insert(a);
        let mut l1 = l0.clone();
        l1.insert(b);
        let mut l2 = l1.clone();
        l2.insert(c);
        let levels = vec![l0, l1, l2];

        assert_eq!(insertion_level(&[a], &levels), Some(0));
        assert_eq!(insertion_level(&[a, b], &levels), Some(1));
        assert_eq!(insertion_level(&[c], &levels), Some(2));
        assert_eq!(insertion_level(&[var_id("zzz")], &levels), None);
        assert_eq!(insertion_level(&[], &levels), Some(0));
    }
}
