//! Expression mini-language for attribute bindings.
//!
//! Bound attributes (`when="{count > 3}"`, `source="{posts}"`) carry
//! expressions from a deliberately small grammar: literals, variable
//! references, dotted property access, indexing, unary and binary operators.
//! There is no call syntax and no way to reach host code, so evaluating a
//! template can never execute arbitrary logic.
//!
//! The same AST serves three phases: the parser embeds it in the template
//! AST, the prop precomputer folds its constant subtrees at compile time, and
//! the hydration runtime evaluates the rest against a [`ScopeArena`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scope::{EvalError, ScopeArena, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnOp {
    Not,
    Neg,
}

/// Expression AST. Serialized form appears inside prop descriptors in the
/// compiled artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Expr {
    Null,
    Bool { value: bool },
    Number { value: f64 },
    Str { value: String },
    Array { items: Vec<Expr> },
    Var { name: String },
    Path { base: Box<Expr>, property: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

/// Parse failure inside a `{...}` binding. `offset` is a character offset
/// into the expression text; the template parser rebases it onto the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENIZER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

fn tokenize(src: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let num = text
                .parse::<f64>()
                .map_err(|_| ExprError::new(format!("invalid number '{}'", text), start))?;
            tokens.push((Tok::Num(num), start));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start = i;
            i += 1;
            let mut s = String::new();
            loop {
                if i >= chars.len() {
                    return Err(ExprError::new("unterminated string literal", start));
                }
                let ch = chars[i];
                if ch == quote {
                    i += 1;
                    break;
                }
                if ch == '\\' && i + 1 < chars.len() {
                    i += 1;
                    s.push(match chars[i] {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
                i += 1;
            }
            tokens.push((Tok::Str(s), start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push((Tok::Ident(word), start));
            continue;
        }

        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let punct2 = ["==", "!=", "<=", ">=", "&&", "||"]
            .iter()
            .find(|p| two == **p)
            .copied();
        if let Some(p) = punct2 {
            tokens.push((Tok::Punct(p), i));
            i += 2;
            continue;
        }

        let punct1 = ["+", "-", "*", "/", "%", "<", ">", "!", "(", ")", "[", "]", ".", ","]
            .iter()
            .find(|p| p.chars().next() == Some(c))
            .copied();
        if let Some(p) = punct1 {
            tokens.push((Tok::Punct(p), i));
            i += 1;
            continue;
        }

        return Err(ExprError::new(format!("unexpected character '{}'", c), i));
    }

    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER (precedence climbing)
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    src_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.src_len)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        t
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ExprError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(ExprError::new(format!("expected '{}'", p), self.offset()))
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let (op, prec) = match self.peek() {
                Some(Tok::Punct("||")) => (BinOp::Or, 1),
                Some(Tok::Punct("&&")) => (BinOp::And, 2),
                Some(Tok::Punct("==")) => (BinOp::Eq, 3),
                Some(Tok::Punct("!=")) => (BinOp::Ne, 3),
                Some(Tok::Punct("<")) => (BinOp::Lt, 4),
                Some(Tok::Punct("<=")) => (BinOp::Le, 4),
                Some(Tok::Punct(">")) => (BinOp::Gt, 4),
                Some(Tok::Punct(">=")) => (BinOp::Ge, 4),
                Some(Tok::Punct("+")) => (BinOp::Add, 5),
                Some(Tok::Punct("-")) => (BinOp::Sub, 5),
                Some(Tok::Punct("*")) => (BinOp::Mul, 6),
                Some(Tok::Punct("/")) => (BinOp::Div, 6),
                Some(Tok::Punct("%")) => (BinOp::Mod, 6),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat_punct("!") {
            return Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(self.parse_unary()?),
            });
        }
        if self.eat_punct("-") {
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(self.parse_unary()?),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                match self.bump() {
                    Some(Tok::Ident(name)) => {
                        expr = Expr::Path {
                            base: Box::new(expr),
                            property: name,
                        };
                    }
                    _ => {
                        return Err(ExprError::new(
                            "expected property name after '.'",
                            self.offset(),
                        ))
                    }
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expr(1)?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Number { value: n }),
            Some(Tok::Str(s)) => Ok(Expr::Str { value: s }),
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Bool { value: true }),
                "false" => Ok(Expr::Bool { value: false }),
                "null" => Ok(Expr::Null),
                _ => Ok(Expr::Var { name: word }),
            },
            Some(Tok::Punct("(")) => {
                let inner = self.parse_expr(1)?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Tok::Punct("[")) => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.parse_expr(1)?);
                        if self.eat_punct("]") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array { items })
            }
            Some(Tok::Punct(p)) => Err(ExprError::new(format!("unexpected '{}'", p), offset)),
            None => Err(ExprError::new("empty expression", offset)),
        }
    }
}

/// Parse one expression. The whole input must be consumed.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(ExprError::new("empty expression", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        src_len: src.chars().count(),
    };
    let expr = parser.parse_expr(1)?;
    if parser.pos < parser.tokens.len() {
        return Err(ExprError::new(
            "unexpected trailing tokens",
            parser.offset(),
        ));
    }
    Ok(expr)
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Truthiness used by conditions: null and false are falsy, zero and the
/// empty string are falsy, everything else is truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value into text content.
pub fn display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Equality with numeric coercion (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Build a `Value` from a float, preferring integer representation so that
/// serialized output stays stable (`3`, not `3.0`).
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

/// Lift a JSON value back into a literal expression (used by partial
/// constant folding).
pub fn literal(value: Value) -> Expr {
    match value {
        Value::Null => Expr::Null,
        Value::Bool(b) => Expr::Bool { value: b },
        Value::Number(n) => Expr::Number {
            value: n.as_f64().unwrap_or(0.0),
        },
        Value::String(s) => Expr::Str { value: s },
        Value::Array(items) => Expr::Array {
            items: items.into_iter().map(literal).collect(),
        },
        // Objects have no literal syntax; keep them as a pre-rendered string.
        other @ Value::Object(_) => Expr::Str {
            value: serde_json::to_string(&other).unwrap_or_default(),
        },
    }
}

fn number_of(v: &Value, op: &'static str) -> Result<f64, EvalError> {
    v.as_f64().ok_or(EvalError::BadOperands { op })
}

fn apply_unary(op: UnOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!truthy(&v))),
        UnOp::Neg => Ok(number_value(-number_of(&v, "-")?)),
    }
}

fn apply_binary(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    let sym = op.symbol();
    match op {
        BinOp::Add => match (&a, &b) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", display(&a), display(&b))))
            }
            _ => Ok(number_value(number_of(&a, sym)? + number_of(&b, sym)?)),
        },
        BinOp::Sub => Ok(number_value(number_of(&a, sym)? - number_of(&b, sym)?)),
        BinOp::Mul => Ok(number_value(number_of(&a, sym)? * number_of(&b, sym)?)),
        BinOp::Div => {
            let rhs = number_of(&b, sym)?;
            if rhs == 0.0 {
                return Err(EvalError::BadOperands { op: "/" });
            }
            Ok(number_value(number_of(&a, sym)? / rhs))
        }
        BinOp::Mod => {
            let rhs = number_of(&b, sym)?;
            if rhs == 0.0 {
                return Err(EvalError::BadOperands { op: "%" });
            }
            Ok(number_value(number_of(&a, sym)? % rhs))
        }
        BinOp::Eq => Ok(Value::Bool(values_equal(&a, &b))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&a, &b))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&a, &b) {
                (Value::String(x), Value::String(y)) => x.partial_cmp(y),
                _ => number_of(&a, sym)?.partial_cmp(&number_of(&b, sym)?),
            }
            .ok_or(EvalError::BadOperands { op: sym })?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::And => Ok(Value::Bool(truthy(&a) && truthy(&b))),
        BinOp::Or => Ok(Value::Bool(truthy(&a) || truthy(&b))),
    }
}

fn access_property(base: &Value, property: &str) -> Result<Value, EvalError> {
    match base {
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        other => Err(EvalError::BadPropertyAccess {
            property: property.to_string(),
            value: display(other),
        }),
    }
}

fn access_index(base: &Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let idx = n.as_f64().unwrap_or(-1.0);
            if idx < 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(idx as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        _ => Err(EvalError::BadOperands { op: "[]" }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATION & FOLDING
// ═══════════════════════════════════════════════════════════════════════════════

impl Expr {
    /// Evaluate against a scope. Variable reads walk frames outward.
    pub fn eval(&self, scopes: &ScopeArena, scope: ScopeId) -> Result<Value, EvalError> {
        match self {
            Expr::Null => Ok(Value::Null),
            Expr::Bool { value } => Ok(Value::Bool(*value)),
            Expr::Number { value } => Ok(number_value(*value)),
            Expr::Str { value } => Ok(Value::String(value.clone())),
            Expr::Array { items } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.eval(scopes, scope)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Var { name } => scopes
                .get(scope, name)
                .cloned()
                .ok_or_else(|| EvalError::UndeclaredVariable(name.clone())),
            Expr::Path { base, property } => {
                access_property(&base.eval(scopes, scope)?, property)
            }
            Expr::Index { base, index } => {
                access_index(&base.eval(scopes, scope)?, &index.eval(scopes, scope)?)
            }
            Expr::Unary { op, operand } => apply_unary(*op, operand.eval(scopes, scope)?),
            Expr::Binary { op, lhs, rhs } => {
                apply_binary(*op, lhs.eval(scopes, scope)?, rhs.eval(scopes, scope)?)
            }
        }
    }

    /// Evaluate without any scope. `None` means the expression depends on
    /// runtime data (or would fail), so it cannot be precomputed.
    pub fn fold(&self) -> Option<Value> {
        match self {
            Expr::Null => Some(Value::Null),
            Expr::Bool { value } => Some(Value::Bool(*value)),
            Expr::Number { value } => Some(number_value(*value)),
            Expr::Str { value } => Some(Value::String(value.clone())),
            Expr::Array { items } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.fold()?);
                }
                Some(Value::Array(out))
            }
            Expr::Var { .. } => None,
            Expr::Path { base, property } => access_property(&base.fold()?, property).ok(),
            Expr::Index { base, index } => access_index(&base.fold()?, &index.fold()?).ok(),
            Expr::Unary { op, operand } => apply_unary(*op, operand.fold()?).ok(),
            Expr::Binary { op, lhs, rhs } => apply_binary(*op, lhs.fold()?, rhs.fold()?).ok(),
        }
    }

    /// Whether the expression is a compile-time constant.
    pub fn is_constant(&self) -> bool {
        self.fold().is_some()
    }

    /// Collapse constant subtrees, leaving runtime-dependent nodes in place.
    /// `"Hi " + name + "!"` becomes a single pending concat with the literal
    /// parts already materialized.
    pub fn fold_constants(&self) -> Expr {
        if let Some(v) = self.fold() {
            return literal(v);
        }
        match self {
            Expr::Array { items } => Expr::Array {
                items: items.iter().map(|i| i.fold_constants()).collect(),
            },
            Expr::Path { base, property } => Expr::Path {
                base: Box::new(base.fold_constants()),
                property: property.clone(),
            },
            Expr::Index { base, index } => Expr::Index {
                base: Box::new(base.fold_constants()),
                index: Box::new(index.fold_constants()),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.fold_constants()),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.fold_constants()),
                rhs: Box::new(rhs.fold_constants()),
            },
            other => other.clone(),
        }
    }

    /// Root variable names this expression reads, sorted and deduplicated.
    pub fn deps(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_deps(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_deps(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var { name } => out.push(name.clone()),
            Expr::Array { items } => {
                for item in items {
                    item.collect_deps(out);
                }
            }
            Expr::Path { base, .. } => base.collect_deps(out),
            Expr::Index { base, index } => {
                base.collect_deps(out);
                index.collect_deps(out);
            }
            Expr::Unary { operand, .. } => operand.collect_deps(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_deps(out);
                rhs.collect_deps(out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_str(src: &str) -> Value {
        parse(src).unwrap().fold().expect("constant expression")
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval_str("42"), json!(42));
        assert_eq!(eval_str("2.5"), json!(2.5));
        assert_eq!(eval_str("\"hello\""), json!("hello"));
        assert_eq!(eval_str("'world'"), json!("world"));
        assert_eq!(eval_str("true"), json!(true));
        assert_eq!(eval_str("null"), json!(null));
        assert_eq!(eval_str("[1, 2, 3]"), json!([1, 2, 3]));
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(eval_str("1 + 2 * 3"), json!(7));
        assert_eq!(eval_str("(1 + 2) * 3"), json!(9));
        assert_eq!(eval_str("10 % 3"), json!(1));
        assert_eq!(eval_str("1 + 1 == 2 && 3 > 2"), json!(true));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(eval_str("\"a\" + \"b\""), json!("ab"));
        assert_eq!(eval_str("\"n=\" + 3"), json!("n=3"));
    }

    #[test]
    fn test_constant_indexing() {
        assert_eq!(eval_str("[10, 20, 30][1]"), json!(20));
        assert_eq!(eval_str("[1, 2].length"), json!(2));
    }

    #[test]
    fn test_variables_are_not_constant() {
        let expr = parse("count + 1").unwrap();
        assert!(expr.fold().is_none());
        assert_eq!(expr.deps(), vec!["count".to_string()]);
    }

    #[test]
    fn test_eval_against_scope() {
        let mut arena = crate::scope::ScopeArena::new();
        let root = arena.push_root();
        arena.declare(root, "count", json!(4)).unwrap();
        arena
            .declare(root, "user", json!({ "handle": "mo" }))
            .unwrap();

        assert_eq!(
            parse("count * 2").unwrap().eval(&arena, root).unwrap(),
            json!(8)
        );
        assert_eq!(
            parse("user.handle").unwrap().eval(&arena, root).unwrap(),
            json!("mo")
        );
        assert_eq!(
            parse("missing").unwrap().eval(&arena, root),
            Err(EvalError::UndeclaredVariable("missing".into()))
        );
    }

    #[test]
    fn test_partial_folding() {
        let expr = parse("1 + 2 + count").unwrap().fold_constants();
        // The constant prefix collapsed into a single literal.
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::Number { value: 3.0 }),
                rhs: Box::new(Expr::Var {
                    name: "count".into()
                }),
            }
        );
    }

    #[test]
    fn test_parse_errors_have_offsets() {
        let err = parse("1 +").unwrap_err();
        assert_eq!(err.offset, 3);
        assert!(parse("").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("'open").is_err());
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert!(parse("1 / 0").unwrap().fold().is_none());
    }
}
