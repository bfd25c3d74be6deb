//! Zero-alloc structured diagnostics.
//!
//! A [`DiagnosticBag`] collects diagnostics emitted during parsing and
//! execution without forcing argument strings onto the heap as independent
//! allocations: arguments are appended to a single backing buffer and stored
//! as ranges. Formatting is deferred; templates referenced by code use
//! positional placeholders `{0}..{2}`.
//!
//! Severity is derived from the code range:
//!
//! | Range       | Severity |
//! |-------------|----------|
//! | 1000..=1999 | Error    |
//! | 2000..=2999 | Warning  |
//! | 3000..=3999 | Info     |
//! | 4000..=4999 | Hint     |

use serde_json::{json, Value};

/// Maximum number of argument substrings per diagnostic.
pub const MAX_ARGS: usize = 3;

// Diagnostic codes used by the engine and the filter expression parser.
// Collaborating parsers may use any code in the documented ranges.

/// Unexpected token in a filter expression.
pub const E_UNEXPECTED_TOKEN: u32 = 1201;
/// Unterminated string literal.
pub const E_UNTERMINATED_STRING: u32 = 1202;
/// Malformed filter expression.
pub const E_MALFORMED_FILTER: u32 = 1203;
/// Type mismatch during filter evaluation.
pub const E_TYPE_MISMATCH: u32 = 1204;
/// Malformed temporal interval.
pub const E_BAD_INTERVAL: u32 = 1102;
/// Filter references a variable no pattern binds.
pub const W_UNBOUND_FILTER_VAR: u32 = 2201;
/// Filter could not be pushed down.
pub const I_FILTER_NOT_PUSHED: u32 = 3201;

/// A source location: offset + extent plus the line/column of the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset into the source.
    pub start: u32,
    /// Extent in bytes.
    pub length: u32,
    /// One-based line of `start`.
    pub line: u32,
    /// One-based column of `start`.
    pub column: u32,
}

impl Span {
    /// Create a span.
    pub const fn new(start: u32, length: u32, line: u32, column: u32) -> Self {
        Span {
            start,
            length,
            line,
            column,
        }
    }
}

/// Diagnostic severity, numbered to match LSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Severity {
    /// A hard failure.
    Error = 1,
    /// Suspicious but not fatal.
    Warning = 2,
    /// Informational.
    Info = 3,
    /// A hint.
    Hint = 4,
}

impl Severity {
    /// Derive severity from a diagnostic code's range.
    pub fn from_code(code: u32) -> Severity {
        match code {
            2000..=2999 => Severity::Warning,
            3000..=3999 => Severity::Info,
            4000..=4999 => Severity::Hint,
            _ => Severity::Error,
        }
    }
}

/// Argument range into the bag's backing buffer. Length 0 means absent.
#[derive(Debug, Clone, Copy, Default)]
struct ArgRange {
    start: u32,
    len: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    code: u32,
    span: Span,
    related: Option<Span>,
    args: [ArgRange; MAX_ARGS],
    arg_count: u8,
}

/// A borrowed view of one collected diagnostic.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostic<'a> {
    bag: &'a DiagnosticBag,
    idx: usize,
}

impl<'a> Diagnostic<'a> {
    /// Numeric code.
    pub fn code(&self) -> u32 {
        self.entry().code
    }

    /// Severity derived from the code range.
    pub fn severity(&self) -> Severity {
        Severity::from_code(self.entry().code)
    }

    /// Primary source span.
    pub fn span(&self) -> Span {
        self.entry().span
    }

    /// Optional related span.
    pub fn related(&self) -> Option<Span> {
        self.entry().related
    }

    /// Argument substring by position, if present.
    pub fn arg(&self, pos: usize) -> Option<&'a str> {
        let e = self.entry();
        if pos >= e.arg_count as usize {
            return None;
        }
        let r = e.args[pos];
        Some(&self.bag.buf[r.start as usize..(r.start + r.len) as usize])
    }

    /// Render the message from the code's template, substituting `{0}..{2}`.
    pub fn message(&self) -> String {
        let template = template_for(self.code()).unwrap_or("diagnostic {0}");
        let mut out = String::with_capacity(template.len() + 16);
        let mut chars = template.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if c == '{' {
                if let Some(&(_, d)) = chars.peek() {
                    if let Some(pos) = d.to_digit(10) {
                        chars.next();
                        if matches!(chars.peek(), Some(&(_, '}'))) {
                            chars.next();
                            match self.arg(pos as usize) {
                                Some(s) => out.push_str(s),
                                None => {
                                    if template_for(self.code()).is_none() {
                                        // Fallback template: show the code.
                                        out.push_str(&self.code().to_string());
                                    }
                                }
                            }
                            continue;
                        }
                    }
                }
            }
            out.push(c);
        }
        out
    }

    fn entry(&self) -> &'a Entry {
        &self.bag.entries[self.idx]
    }
}

/// Message template for a known code.
fn template_for(code: u32) -> Option<&'static str> {
    Some(match code {
        E_UNEXPECTED_TOKEN => "unexpected token '{0}'",
        E_UNTERMINATED_STRING => "unterminated string literal",
        E_MALFORMED_FILTER => "malformed filter expression: {0}",
        E_TYPE_MISMATCH => "type mismatch: cannot compare {0} with {1}",
        E_BAD_INTERVAL => "malformed temporal interval: {0} is not before {1}",
        W_UNBOUND_FILTER_VAR => "filter references variable ?{0} which no pattern binds",
        I_FILTER_NOT_PUSHED => "filter cannot be pushed down and will run last",
        _ => return None,
    })
}

/// Compact, growable, clearable container for structured diagnostics.
///
/// Argument substrings share one backing buffer; pushing a diagnostic
/// performs at most one buffer extension, not one allocation per argument.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    buf: String,
    entries: Vec<Entry>,
}

impl DiagnosticBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collected diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any collected diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|e| Severity::from_code(e.code) == Severity::Error)
    }

    /// Clear all diagnostics, keeping capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.entries.clear();
    }

    /// Report a diagnostic; attach arguments through the returned builder.
    pub fn report(&mut self, code: u32, span: Span) -> DiagnosticBuilder<'_> {
        self.entries.push(Entry {
            code,
            span,
            related: None,
            args: [ArgRange::default(); MAX_ARGS],
            arg_count: 0,
        });
        DiagnosticBuilder { bag: self }
    }

    /// Iterate collected diagnostics in report order.
    pub fn iter(&self) -> impl Iterator<Item = Diagnostic<'_>> {
        (0..self.entries.len()).map(move |idx| Diagnostic { bag: self, idx })
    }

    /// Render all diagnostics as an LSP-compatible JSON array.
    ///
    /// Severity mapping: 1=Error, 2=Warning, 3=Info, 4=Hint. Positions are
    /// zero-based per LSP; the bag stores one-based lines/columns.
    pub fn to_lsp_json(&self) -> Value {
        let items: Vec<Value> = self
            .iter()
            .map(|d| {
                let span = d.span();
                let line = span.line.saturating_sub(1);
                let character = span.column.saturating_sub(1);
                let mut v = json!({
                    "range": {
                        "start": { "line": line, "character": character },
                        "end": { "line": line, "character": character + span.length },
                    },
                    "severity": d.severity() as u8,
                    "code": d.code(),
                    "source": "mercury",
                    "message": d.message(),
                });
                if let Some(rel) = d.related() {
                    let rline = rel.line.saturating_sub(1);
                    let rchar = rel.column.saturating_sub(1);
                    v["relatedInformation"] = json!([{
                        "location": {
                            "range": {
                                "start": { "line": rline, "character": rchar },
                                "end": { "line": rline, "character": rchar + rel.length },
                            },
                        },
                        "message": "related location",
                    }]);
                }
                v
            })
            .collect();
        Value::Array(items)
    }
}

/// Builder returned by [`DiagnosticBag::report`]; attaches arguments and a
/// related span to the just-pushed diagnostic.
pub struct DiagnosticBuilder<'a> {
    bag: &'a mut DiagnosticBag,
}

impl DiagnosticBuilder<'_> {
    /// Attach an argument substring. Arguments beyond [`MAX_ARGS`] are
    /// silently dropped.
    pub fn with_arg(self, arg: &str) -> Self {
        let entry = self.bag.entries.last_mut().unwrap();
        if (entry.arg_count as usize) < MAX_ARGS {
            let start = self.bag.buf.len() as u32;
            self.bag.buf.push_str(arg);
            entry.args[entry.arg_count as usize] = ArgRange {
                start,
                len: arg.len() as u32,
            };
            entry.arg_count += 1;
        }
        self
    }

    /// Attach a related span.
    pub fn with_related(self, span: Span) -> Self {
        self.bag.entries.last_mut().unwrap().related = Some(span);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_from_code_ranges() {
        assert_eq!(Severity::from_code(1201), Severity::Error);
        assert_eq!(Severity::from_code(2201), Severity::Warning);
        assert_eq!(Severity::from_code(3201), Severity::Info);
        assert_eq!(Severity::from_code(4001), Severity::Hint);
        // Out-of-range codes default to errors.
        assert_eq!(Severity::from_code(99), Severity::Error);
    }

    #[test]
    fn report_and_read_back() {
        let mut bag = DiagnosticBag::new();
        bag.report(E_UNEXPECTED_TOKEN, Span::new(4, 2, 1, 5))
            .with_arg(">=");

        assert_eq!(bag.len(), 1);
        assert!(bag.has_errors());

        let d = bag.iter().next().unwrap();
        assert_eq!(d.code(), E_UNEXPECTED_TOKEN);
        assert_eq!(d.severity(), Severity::Error);
        assert_eq!(d.arg(0), Some(">="));
        assert_eq!(d.arg(1), None);
        assert_eq!(d.message(), "unexpected token '>='");
    }

    #[test]
    fn args_share_one_buffer() {
        let mut bag = DiagnosticBag::new();
        bag.report(E_TYPE_MISMATCH, Span::default())
            .with_arg("integer")
            .with_arg("string");
        bag.report(E_TYPE_MISMATCH, Span::default())
            .with_arg("boolean")
            .with_arg("iri");

        assert_eq!(bag.buf, "integerstringbooleaniri");
        let diags: Vec<_> = bag.iter().collect();
        assert_eq!(
            diags[0].message(),
            "type mismatch: cannot compare integer with string"
        );
        assert_eq!(
            diags[1].message(),
            "type mismatch: cannot compare boolean with iri"
        );
    }

    #[test]
    fn extra_args_are_dropped() {
        let mut bag = DiagnosticBag::new();
        bag.report(E_MALFORMED_FILTER, Span::default())
            .with_arg("a")
            .with_arg("b")
            .with_arg("c")
            .with_arg("d");
        let d = bag.iter().next().unwrap();
        assert_eq!(d.arg(2), Some("c"));
        assert_eq!(d.arg(3), None);
    }

    #[test]
    fn clear_keeps_nothing() {
        let mut bag = DiagnosticBag::new();
        bag.report(E_MALFORMED_FILTER, Span::default()).with_arg("x");
        bag.clear();
        assert!(bag.is_empty());
        assert!(!bag.has_errors());
        assert_eq!(bag.buf.len(), 0);
    }

    #[test]
    fn warnings_are_not_errors() {
        let mut bag = DiagnosticBag::new();
        bag.report(W_UNBOUND_FILTER_VAR, Span::default()).with_arg("x");
        assert!(!bag.has_errors());
        assert_eq!(
            bag.iter().next().unwrap().message(),
            "filter references variable ?x which no pattern binds"
        );
    }

    #[test]
    fn lsp_json_shape() {
        let mut bag = DiagnosticBag::new();
        bag.report(E_UNEXPECTED_TOKEN, Span::new(10, 3, 2, 7))
            .with_arg("&&")
            .with_related(Span::new(0, 1, 1, 1));

        let v = bag.to_lsp_json();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        let d = &arr[0];
        assert_eq!(d["severity"], 1);
        assert_eq!(d["code"], E_UNEXPECTED_TOKEN);
        // LSP positions are zero-based.
        assert_eq!(d["range"]["start"]["line"], 1);
        assert_eq!(d["range"]["start"]["character"], 6);
        assert_eq!(d["range"]["end"]["character"], 9);
        assert!(d["relatedInformation"].is_array());
    }
}
