//! Filter expression parsing and evaluation.
//!
//! A small recursive-descent parser over the textual expressions carried by
//! [`FilterSpec::Expr`](crate::algebra::FilterSpec): comparisons, boolean
//! connectives, arithmetic, `BOUND(?v)`, numeric/string/boolean literals.
//! Malformed input surfaces [`mercury_core::Error::Parse`] and lands in the
//! diagnostics bag with the offending span.
//!
//! Evaluation is three-valued in spirit but collapses to boolean: a
//! comparison touching an unbound variable or mismatched types is false
//! (`!=` of two bound values of different types is true). Literal terms
//! coming from the store are coerced by lexical form: quoted content first,
//! numeric if it parses, string otherwise.

use crate::analyzer;
use crate::binding::{var_id, BindingSet, VarId};
use mercury_core::diagnostics::{E_UNEXPECTED_TOKEN, E_UNTERMINATED_STRING};
use mercury_core::{DiagnosticBag, Error, Result, Span};
use mercury_engine::ReadSnapshot;

/// A compiled, pushdown-annotated filter.
#[derive(Debug)]
pub struct CompiledFilter {
    /// Original expression text.
    pub text: String,
    /// Referenced variable ids, in first-appearance order.
    pub vars: Vec<VarId>,
    /// False when the text contains EXISTS / NOT EXISTS.
    pub pushable: bool,
    expr: Expr,
}

impl CompiledFilter {
    /// Parse and analyze an expression.
    pub fn compile(text: &str, bag: &mut DiagnosticBag) -> Result<Self> {
        let analysis = analyzer::analyze(text);
        let tokens = tokenize(text, bag)?;
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
            bag,
        };
        let expr = parser.parse_or()?;
        parser.expect_end()?;
        Ok(CompiledFilter {
            text: text.to_string(),
            vars: analysis.vars,
            pushable: analysis.pushable,
            expr,
        })
    }

    /// Evaluate under the current bindings.
    pub fn eval(&self, bindings: &BindingSet, snap: &ReadSnapshot<'_>) -> Result<bool> {
        Ok(self.expr.eval(bindings, snap)?.truthy())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Var(VarId),
    Num(f64),
    Str(String),
    Bool(bool),
    Bound(VarId),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    Arith(Box<Expr>, ArithOp, Box<Expr>),
    Neg(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// An evaluated value. `Unbound` poisons comparisons to false.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<'a> {
    Num(f64),
    Str(&'a str),
    Bool(bool),
    Unbound,
}

impl Value<'_> {
    fn truthy(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Num(n) => n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Unbound => false,
        }
    }
}

impl Expr {
    fn eval<'a>(
        &'a self,
        bindings: &BindingSet,
        snap: &'a ReadSnapshot<'_>,
    ) -> Result<Value<'a>> {
        Ok(match self {
            Expr::Var(v) => match bindings.get(*v) {
                None => Value::Unbound,
                Some(id) => term_value(snap.resolve(id)?),
            },
            Expr::Num(n) => Value::Num(*n),
            Expr::Str(s) => Value::Str(s.as_str()),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Bound(v) => Value::Bool(bindings.get(*v).is_some()),
            Expr::Not(inner) => Value::Bool(!inner.eval(bindings, snap)?.truthy()),
            Expr::And(a, b) => Value::Bool(
                a.eval(bindings, snap)?.truthy() && b.eval(bindings, snap)?.truthy(),
            ),
            Expr::Or(a, b) => Value::Bool(
                a.eval(bindings, snap)?.truthy() || b.eval(bindings, snap)?.truthy(),
            ),
            Expr::Cmp(a, op, b) => {
                let left = a.eval(bindings, snap)?;
                let right = b.eval(bindings, snap)?;
                Value::Bool(compare(left, *op, right))
            }
            Expr::Arith(a, op, b) => {
                let left = a.eval(bindings, snap)?;
                let right = b.eval(bindings, snap)?;
                match (left, right) {
                    (Value::Num(x), Value::Num(y)) => Value::Num(match op {
                        ArithOp::Add => x + y,
                        ArithOp::Sub => x - y,
                        ArithOp::Mul => x * y,
                        ArithOp::Div => x / y,
                    }),
                    _ => Value::Unbound,
                }
            }
            Expr::Neg(inner) => match inner.eval(bindings, snap)? {
                Value::Num(n) => Value::Num(-n),
                _ => Value::Unbound,
            },
        })
    }
}

fn compare(left: Value<'_>, op: CmpOp, right: Value<'_>) -> bool {
    use std::cmp::Ordering;
    let ordering = match (left, right) {
        (Value::Unbound, _) | (_, Value::Unbound) => return false,
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(&b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(&b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(&b)),
        // Bound but of different kinds: only != holds.
        _ => return op == CmpOp::Neq,
    };
    let ordering = match ordering {
        Some(o) => o,
        None => return false, // NaN
    };
    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Neq => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    }
}

/// Coerce a stored lexical term: quoted content first (datatype/language
/// suffix ignored for value comparison), numeric if it parses.
fn term_value(term: &str) -> Value<'_> {
    let content = if let Some(rest) = term.strip_prefix('"') {
        match rest.find('"') {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        term
    };
    match content.parse::<f64>() {
        Ok(n) => Value::Num(n),
        Err(_) => Value::Str(content),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Var(String),
    Num(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: u32,
    len: u32,
}

fn span_of(token: &Token) -> Span {
    Span::new(token.start, token.len, 1, token.start + 1)
}

fn tokenize(text: &str, bag: &mut DiagnosticBag) -> Result<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    macro_rules! push {
        ($kind:expr, $start:expr, $len:expr) => {
            tokens.push(Token {
                kind: $kind,
                start: $start as u32,
                len: $len as u32,
            })
        };
    }

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                push!(TokenKind::LParen, i, 1);
                i += 1;
            }
            b')' => {
                push!(TokenKind::RParen, i, 1);
                i += 1;
            }
            b'+' => {
                push!(TokenKind::Plus, i, 1);
                i += 1;
            }
            b'-' => {
                push!(TokenKind::Minus, i, 1);
                i += 1;
            }
            b'*' => {
                push!(TokenKind::Star, i, 1);
                i += 1;
            }
            b'/' => {
                push!(TokenKind::Slash, i, 1);
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                push!(TokenKind::AndAnd, i, 2);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                push!(TokenKind::OrOr, i, 2);
                i += 2;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                push!(TokenKind::Neq, i, 2);
                i += 2;
            }
            b'!' => {
                push!(TokenKind::Bang, i, 1);
                i += 1;
            }
            b'=' => {
                push!(TokenKind::Eq, i, 1);
                i += 1;
            }
            b'<' if bytes.get(i + 1) == Some(&b'=') => {
                push!(TokenKind::Le, i, 2);
                i += 2;
            }
            b'<' => {
                push!(TokenKind::Lt, i, 1);
                i += 1;
            }
            b'>' if bytes.get(i + 1) == Some(&b'=') => {
                push!(TokenKind::Ge, i, 2);
                i += 2;
            }
            b'>' => {
                push!(TokenKind::Gt, i, 1);
                i += 1;
            }
            b'?' | b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                push!(TokenKind::Var(text[start..end].to_string()), i, end - i);
                i = end;
            }
            b'"' => {
                let mut j = i + 1;
                let mut raw: Vec<u8> = Vec::new();
                let mut closed = false;
                while j < bytes.len() {
                    match bytes[j] {
                        b'\\' if j + 1 < bytes.len() => {
                            raw.push(bytes[j + 1]);
                            j += 2;
                        }
                        b'"' => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        b => {
                            raw.push(b);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    let span = Span::new(i as u32, (j - i) as u32, 1, i as u32 + 1);
                    bag.report(E_UNTERMINATED_STRING, span);
                    return Err(Error::Parse {
                        code: E_UNTERMINATED_STRING,
                        message: "unterminated string literal".into(),
                        line: 1,
                        column: i as u32 + 1,
                    });
                }
                // The source is &str, so the bytes are valid UTF-8 except
                // possibly a split escape; lossy conversion is safe here.
                let value = String::from_utf8_lossy(&raw).into_owned();
                push!(TokenKind::Str(value), i, j - i);
                i = j;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut end = i;
                while end < bytes.len()
                    && (bytes[end].is_ascii_digit() || bytes[end] == b'.')
                {
                    end += 1;
                }
                let num: f64 = text[start..end].parse().unwrap_or(f64::NAN);
                push!(TokenKind::Num(num), start, end - start);
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                let mut end = i;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                push!(TokenKind::Ident(text[start..end].to_string()), start, end - start);
                i = end;
            }
            _ => {
                let span = Span::new(i as u32, 1, 1, i as u32 + 1);
                bag.report(E_UNEXPECTED_TOKEN, span)
                    .with_arg(&text[i..i + 1]);
                return Err(Error::Parse {
                    code: E_UNEXPECTED_TOKEN,
                    message: format!("unexpected character '{}'", &text[i..i + 1]),
                    line: 1,
                    column: i as u32 + 1,
                });
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    bag: &'a mut DiagnosticBag,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error_at(&mut self, token: Option<Token>, what: &str) -> Error {
        let (span, lexeme) = match &token {
            Some(t) => (
                span_of(t),
                self.text[t.start as usize..(t.start + t.len) as usize].to_string(),
            ),
            None => (
                Span::new(self.text.len() as u32, 0, 1, self.text.len() as u32 + 1),
                "<end>".to_string(),
            ),
        };
        self.bag.report(E_UNEXPECTED_TOKEN, span).with_arg(&lexeme);
        Error::Parse {
            code: E_UNEXPECTED_TOKEN,
            message: format!("expected {}, found '{}'", what, lexeme),
            line: span.line,
            column: span.column,
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            let t = self.advance();
            Err(self.error_at(t, "end of expression"))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(TokenKind::OrOr)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(TokenKind::AndAnd)) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(TokenKind::Bang)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(TokenKind::Eq) => CmpOp::Eq,
            Some(TokenKind::Neq) => CmpOp::Neq,
            Some(TokenKind::Lt) => CmpOp::Lt,
            Some(TokenKind::Le) => CmpOp::Le,
            Some(TokenKind::Gt) => CmpOp::Gt,
            Some(TokenKind::Ge) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_add()?;
        Ok(Expr::Cmp(Box::new(left), op, Box::new(right)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_mul()?;
            left = Expr::Arith(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arith(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(TokenKind::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.as_ref().map(|t| &t.kind) {
            Some(TokenKind::Var(name)) => Ok(Expr::Var(var_id(name))),
            Some(TokenKind::Num(n)) => Ok(Expr::Num(*n)),
            Some(TokenKind::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(TokenKind::Ident(name)) if name.eq_ignore_ascii_case("true") => {
                Ok(Expr::Bool(true))
            }
            Some(TokenKind::Ident(name)) if name.eq_ignore_ascii_case("false") => {
                Ok(Expr::Bool(false))
            }
            Some(TokenKind::Ident(name)) if name.eq_ignore_ascii_case("bound") => {
                let open = self.advance();
                if !matches!(open.as_ref().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    return Err(self.error_at(open, "'(' after BOUND"));
                }
                let var = self.advance();
                let id = match var.as_ref().map(|t| &t.kind) {
                    Some(TokenKind::Var(name)) => var_id(name),
                    _ => return Err(self.error_at(var, "a variable inside BOUND")),
                };
                let close = self.advance();
                if !matches!(close.as_ref().map(|t| &t.kind), Some(TokenKind::RParen)) {
                    return Err(self.error_at(close, "')' after BOUND variable"));
                }
                Ok(Expr::Bound(id))
            }
            Some(TokenKind::LParen) => {
                let inner = self.parse_or()?;
                let close = self.advance();
                if !matches!(close.as_ref().map(|t| &t.kind), Some(TokenKind::RParen)) {
                    return Err(self.error_at(close, "')'"));
                }
                Ok(inner)
            }
            _ => Err(self.error_at(token, "an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> CompiledFilter {
        let mut bag = DiagnosticBag::new();
        CompiledFilter::compile(text, &mut bag).unwrap()
    }

    #[test]
    fn parses_comparison() {
        let f = compile("?a > 30");
        assert_eq!(f.vars, vec![var_id("a")]);
        assert!(f.pushable);
    }

    #[test]
    fn parses_boolean_connectives() {
        compile("?a > 1 && ?b < 2 || !(?c = \"x\")");
        compile("BOUND(?x) && ?x != ?y");
        compile("-?a + 2 * 3 >= ?b / 4");
    }

    #[test]
    fn rejects_garbage() {
        let mut bag = DiagnosticBag::new();
        let err = CompiledFilter::compile("?a > > 30", &mut bag).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(bag.has_errors());
    }

    #[test]
    fn rejects_unterminated_string() {
        let mut bag = DiagnosticBag::new();
        let err = CompiledFilter::compile("?a = \"oops", &mut bag).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse {
                code: E_UNTERMINATED_STRING,
                ..
            }
        ));
    }

    #[test]
    fn rejects_trailing_tokens() {
        let mut bag = DiagnosticBag::new();
        assert!(CompiledFilter::compile("?a > 1 ?b", &mut bag).is_err());
    }

    #[test]
    fn term_value_coercion() {
        assert_eq!(term_value("30"), Value::Num(30.0));
        assert_eq!(term_value("\"30\""), Value::Num(30.0));
        assert_eq!(
            term_value("\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"),
            Value::Num(42.0)
        );
        assert_eq!(term_value("\"Alice\""), Value::Str("Alice"));
        assert_eq!(term_value("\"chat\"@fr"), Value::Str("chat"));
        assert_eq!(term_value("http://example.org/x"), Value::Str("http://example.org/x"));
    }

    #[test]
    fn comparison_semantics() {
        assert!(compare(Value::Num(31.0), CmpOp::Gt, Value::Num(30.0)));
        assert!(!compare(Value::Unbound, CmpOp::Eq, Value::Num(1.0)));
        assert!(compare(Value::Str("a"), CmpOp::Lt, Value::Str("b")));
        // Mixed bound types: only != holds.
        assert!(compare(Value::Str("1"), CmpOp::Neq, Value::Bool(true)));
        assert!(!compare(Value::Str("1"), CmpOp::Eq, Value::Bool(true)));
    }
}
