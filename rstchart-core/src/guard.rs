//! Transition guards.
//!
//! A guard is a named predicate from the machine's implementations, a
//! `stateIn` check, a `not`/`and`/`or` combination, or an inline expression.
//!
//! Inline expressions read fields from the context (`ctx.`) or from the
//! event being processed (`event.`; `event.type` is the event name):
//!
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := unary ("&&" unary)*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := field [("==" | "!=") literal | ("<" | "<=" | ">" | ">=") number]
//! field      := ("ctx." | "event.") name ("." name)*
//! literal    := string | number | true | false | null
//! ```
//!
//! A bare field is a truthiness check. Ordering comparisons against a
//! missing or non-numeric field are false.
//!
//! ```text
//! ctx.amount > 100 && !event.cancelled
//! event.type == "PAY" || ctx.retries <= 3
//! ```

use crate::error::{ActorError, CoreError};
use crate::event::Event;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a guard expression field is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Context,
    Event,
}

/// A field reference such as `ctx.order.paid` or `event.amount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub scope: FieldScope,
    pub path: String,
}

impl FieldRef {
    fn resolve(&self, ctx: &Value, event: &Event) -> Value {
        let root = match self.scope {
            FieldScope::Event if self.path == "type" => {
                return Value::String(event.name.clone());
            }
            FieldScope::Event => &event.data,
            FieldScope::Context => ctx,
        };
        self.path
            .split('.')
            .try_fold(root, |value, key| value.as_object()?.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Numeric ordering operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
        }
    }
}

/// Longer operators first so `<=` is not read as `<`.
const ORDERING_OPS: [(&str, CmpOp); 4] = [
    ("<=", CmpOp::Le),
    (">=", CmpOp::Ge),
    ("<", CmpOp::Lt),
    (">", CmpOp::Gt),
];

/// A parsed inline guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    Truthy(FieldRef),
    Eq(FieldRef, Value),
    Ne(FieldRef, Value),
    Compare(FieldRef, CmpOp, f64),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let mut cursor = Cursor { src: s, at: 0 };
        cursor.skip_ws();
        if cursor.done() {
            return Err(invalid("empty guard expression"));
        }
        let expr = cursor.or()?;
        cursor.skip_ws();
        if !cursor.done() {
            return Err(invalid(format!("unexpected input at '{}'", cursor.rest())));
        }
        Ok(expr)
    }

    pub fn evaluate(&self, ctx: &Value, event: &Event) -> bool {
        match self {
            GuardExpr::Truthy(field) => is_truthy(&field.resolve(ctx, event)),
            GuardExpr::Eq(field, literal) => same_value(&field.resolve(ctx, event), literal),
            GuardExpr::Ne(field, literal) => !same_value(&field.resolve(ctx, event), literal),
            GuardExpr::Compare(field, op, bound) => field
                .resolve(ctx, event)
                .as_f64()
                .is_some_and(|n| op.holds(n, *bound)),
            GuardExpr::And(a, b) => a.evaluate(ctx, event) && b.evaluate(ctx, event),
            GuardExpr::Or(a, b) => a.evaluate(ctx, event) || b.evaluate(ctx, event),
            GuardExpr::Not(inner) => !inner.evaluate(ctx, event),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Numbers compare by value, so `1 == 1.0`. Arrays and objects never match
/// a literal.
fn same_value(field: &Value, literal: &Value) -> bool {
    match (field, literal) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Array(_) | Value::Object(_), _) => false,
        _ => field == literal,
    }
}

/// Position in the expression source.
struct Cursor<'a> {
    src: &'a str,
    at: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.at..]
    }

    fn done(&self) -> bool {
        self.at >= self.src.len()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.at += rest.len() - rest.trim_start().len();
    }

    /// Consumes `token` after optional whitespace.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.at += token.len();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|c: char| !keep(c)).unwrap_or(rest.len());
        self.at += len;
        &rest[..len]
    }

    fn or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut expr = self.and()?;
        while self.eat("||") {
            expr = GuardExpr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut expr = self.unary()?;
        while self.eat("&&") {
            expr = GuardExpr::And(Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_ws();
        if self.rest().starts_with('!') && !self.rest().starts_with("!=") {
            self.at += 1;
            return Ok(GuardExpr::Not(Box::new(self.unary()?)));
        }
        if self.eat("(") {
            let inner = self.or()?;
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let field = self.field()?;
        if self.eat("==") {
            return Ok(GuardExpr::Eq(field, self.literal()?));
        }
        if self.eat("!=") {
            return Ok(GuardExpr::Ne(field, self.literal()?));
        }
        for (token, op) in ORDERING_OPS {
            if self.eat(token) {
                return Ok(GuardExpr::Compare(field, op, self.number()?));
            }
        }
        Ok(GuardExpr::Truthy(field))
    }

    fn field(&mut self) -> Result<FieldRef, CoreError> {
        self.skip_ws();
        let scope = if self.eat("ctx.") {
            FieldScope::Context
        } else if self.eat("event.") {
            FieldScope::Event
        } else {
            return Err(invalid(format!(
                "expected a 'ctx.' or 'event.' field at '{}'",
                self.rest()
            )));
        };
        let path = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '.');
        if path.is_empty() || path.ends_with('.') || path.contains("..") {
            return Err(invalid("empty field name"));
        }
        Ok(FieldRef {
            scope,
            path: path.to_string(),
        })
    }

    fn literal(&mut self) -> Result<Value, CoreError> {
        self.skip_ws();
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(word) {
                return Ok(value);
            }
        }
        if self.eat("\"") {
            return self.string();
        }
        let n = self.number()?;
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {n}")))
    }

    /// Reads a string body after the opening quote. `\` escapes the next
    /// character.
    fn string(&mut self) -> Result<Value, CoreError> {
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.at += i + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(invalid("unterminated string"))
    }

    fn number(&mut self) -> Result<f64, CoreError> {
        self.skip_ws();
        let start = self.at;
        self.eat("-");
        self.take_while(|c| c.is_ascii_digit());
        if self.rest().starts_with('.') {
            self.at += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        let text = &self.src[start..self.at];
        text.parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{text}'")))
    }
}

/// Arguments passed to guard predicates.
pub struct GuardArgs<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    /// Parameters attached to a named guard reference.
    pub params: &'a Value,
}

/// A guard predicate supplied by the embedder.
pub type GuardFn = Arc<dyn Fn(&GuardArgs<'_>) -> bool + Send + Sync>;

/// A transition guard.
#[derive(Clone)]
pub enum Guard {
    /// Looked up by name in the machine's implementations.
    Named { name: String, params: Value },
    /// Inline expression.
    Expr(GuardExpr),
    /// Inline predicate.
    Predicate(GuardFn),
    Not(Box<Guard>),
    And(Vec<Guard>),
    Or(Vec<Guard>),
    /// True while the state with this id is active.
    StateIn(String),
}

impl Guard {
    pub fn named(name: impl Into<String>) -> Self {
        Guard::Named {
            name: name.into(),
            params: Value::Null,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&GuardArgs<'_>) -> bool + Send + Sync + 'static,
    {
        Guard::Predicate(Arc::new(f))
    }

    pub fn expr(s: &str) -> Result<Self, CoreError> {
        Ok(Guard::Expr(GuardExpr::parse(s)?))
    }

    /// Evaluates the guard. A named guard that has no implementation is an
    /// error, never a silent pass or fail.
    pub(crate) fn evaluate(&self, scope: &GuardScope<'_>) -> Result<bool, ActorError> {
        match self {
            Guard::Named { name, params } => {
                let f = scope
                    .guards
                    .get(name)
                    .ok_or_else(|| ActorError::MissingImplementation {
                        kind: "guard",
                        name: name.clone(),
                    })?;
                Ok(f(&GuardArgs {
                    context: scope.context,
                    event: scope.event,
                    params,
                }))
            }
            Guard::Expr(expr) => Ok(expr.evaluate(scope.context, scope.event)),
            Guard::Predicate(f) => Ok(f(&GuardArgs {
                context: scope.context,
                event: scope.event,
                params: &Value::Null,
            })),
            Guard::Not(inner) => Ok(!inner.evaluate(scope)?),
            Guard::And(guards) => {
                for guard in guards {
                    if !guard.evaluate(scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Or(guards) => {
                for guard in guards {
                    if guard.evaluate(scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::StateIn(id) => Ok((scope.state_in)(id.trim_start_matches('#'))),
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Named { name, params } if params.is_null() => write!(f, "Named({name})"),
            Guard::Named { name, params } => write!(f, "Named({name}, {params})"),
            Guard::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Guard::Predicate(_) => f.write_str("Predicate(..)"),
            Guard::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Guard::And(guards) => f.debug_tuple("And").field(guards).finish(),
            Guard::Or(guards) => f.debug_tuple("Or").field(guards).finish(),
            Guard::StateIn(id) => write!(f, "StateIn({id})"),
        }
    }
}

/// Everything a guard can observe while it is evaluated.
pub(crate) struct GuardScope<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    pub guards: &'a HashMap<String, GuardFn>,
    pub state_in: &'a dyn Fn(&str) -> bool,
}

/// Guard evaluation helpers.
pub struct GuardEvaluator;

impl GuardEvaluator {
    /// Evaluates an inline expression against context and event.
    pub fn evaluate(guard: &GuardExpr, ctx: &Value, event: &Event) -> bool {
        guard.evaluate(ctx, event)
    }

    /// Evaluates an optional guard (None = always true).
    pub(crate) fn evaluate_opt(
        guard: Option<&Guard>,
        scope: &GuardScope<'_>,
    ) -> Result<bool, ActorError> {
        guard.map(|g| g.evaluate(scope)).unwrap_or(Ok(true))
    }
}
