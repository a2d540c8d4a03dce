//! Lazy expression trees over field operands.
//!
//! An [`Expression`] combines literal values, named context placeholders,
//! field references, and nested expressions with one operator. Nothing is
//! computed at construction time; [`Expression::eval`] resolves operands
//! against an [`EvalContext`] and applies the operator. When an operand
//! cannot be resolved (an unbound placeholder, an incompatible pairing),
//! evaluation does not fail — it returns a new, partially-resolved
//! expression that can be evaluated again once bindings are supplied.
//!
//! The textual rendering produced by [`Expression::render`] is a
//! debugging aid, never an SQL fragment: queries are built with bound
//! parameters elsewhere.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::Record;
use crate::value::Value;

/// Operator set for expression trees. `Length` and `Not` are unary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    Contains,
    Length,
    And,
    Or,
    Xor,
    Not,
    Add,
    Sub,
    Mul,
    Div,
}

impl ExprOp {
    pub fn is_unary(self) -> bool {
        matches!(self, ExprOp::Length | ExprOp::Not)
    }

    /// Display template. Whitespace is part of the contract.
    fn template(self) -> &'static str {
        match self {
            ExprOp::Eq => "{} == {}",
            ExprOp::Le => "{} <= {}",
            ExprOp::Lt => "{} <  {}",
            ExprOp::Ne => "{} <> {}",
            ExprOp::Gt => "{} >  {}",
            ExprOp::Ge => "{} >= {}",
            ExprOp::Contains => "{} in {}",
            ExprOp::Length => "count({})",
            ExprOp::And => "{} && {}",
            ExprOp::Or => "{} || {}",
            ExprOp::Xor => "{} ^ {}",
            ExprOp::Not => "~{}",
            ExprOp::Add => "{} + {}",
            ExprOp::Sub => "{} - {}",
            ExprOp::Mul => "{} * {}",
            ExprOp::Div => "{} / {}",
        }
    }
}

/// One leaf or branch position in an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A plain value.
    Literal(Value),
    /// A named placeholder, resolved from the evaluation context.
    Name(String),
    /// A field reference, resolved from the record bound to the context.
    Field(String),
    /// A nested expression, evaluated recursively.
    Expr(Box<Expression>),
}

impl Operand {
    pub fn name(n: impl Into<String>) -> Self {
        Operand::Name(n.into())
    }

    pub fn field(n: impl Into<String>) -> Self {
        Operand::Field(n.into())
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Literal(v)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Literal(Value::Integer(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Literal(Value::Integer(i64::from(v)))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Literal(Value::Real(v))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Literal(Value::Text(v.to_string()))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Literal(Value::Boolean(v))
    }
}

impl From<Expression> for Operand {
    fn from(e: Expression) -> Self {
        Operand::Expr(Box::new(e))
    }
}

/// Bindings available during evaluation: named values plus an optional
/// record supplying field operands.
#[derive(Debug, Default, Clone)]
pub struct EvalContext<'a> {
    vars: HashMap<String, Value>,
    record: Option<&'a Record>,
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named placeholder.
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Bind the record that field operands read from.
    pub fn with_record(mut self, record: &'a Record) -> Self {
        self.record = Some(record);
        self
    }
}

/// Outcome of [`Expression::eval`].
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    /// Every operand resolved; the operator was applied.
    Value(Value),
    /// At least one operand stayed unresolved; carries the
    /// partially-resolved tree for later re-evaluation.
    Partial(Expression),
}

impl Evaluated {
    pub fn value(self) -> Option<Value> {
        match self {
            Evaluated::Value(v) => Some(v),
            Evaluated::Partial(_) => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Evaluated::Partial(_))
    }
}

/// Immutable lazy expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    lhs: Operand,
    rhs: Option<Operand>,
    op: ExprOp,
    /// Bindings captured by partial evaluation; consulted on re-eval.
    context: HashMap<String, Value>,
}

impl Expression {
    /// Build a tree node, validating operand/operator arity.
    pub fn new(op: ExprOp, lhs: impl Into<Operand>, rhs: Option<Operand>) -> Result<Self> {
        if op.is_unary() && rhs.is_some() {
            return Err(Error::Expression(format!(
                "{op:?} takes only ONE argument, found two"
            )));
        }
        if !op.is_unary() && rhs.is_none() {
            return Err(Error::Expression(format!(
                "{op:?} takes exactly TWO arguments, found only one"
            )));
        }
        Ok(Expression {
            lhs: lhs.into(),
            rhs,
            op,
            context: HashMap::new(),
        })
    }

    fn binary(op: ExprOp, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Expression {
            lhs: lhs.into(),
            rhs: Some(rhs.into()),
            op,
            context: HashMap::new(),
        }
    }

    fn unary(op: ExprOp, lhs: impl Into<Operand>) -> Self {
        Expression {
            lhs: lhs.into(),
            rhs: None,
            op,
            context: HashMap::new(),
        }
    }

    pub fn op(&self) -> ExprOp {
        self.op
    }

    /// Evaluate against `ctx`. Returns [`Evaluated::Partial`] instead of
    /// an error when an operand stays unresolved or the operator does not
    /// apply to the resolved pairing.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Evaluated {
        let lhs = self.resolve(&self.lhs, ctx);
        let rhs = self.rhs.as_ref().map(|o| self.resolve(o, ctx));

        if let (Some(a), b) = (resolved_value(&lhs), rhs.as_ref().map(resolved_value)) {
            let b = match (&self.rhs, b) {
                (None, _) => None,
                (Some(_), Some(Some(v))) => Some(v),
                // rhs present but unresolved
                (Some(_), _) => return self.partial(lhs, rhs, ctx),
            };
            if let Some(v) = apply(self.op, a, b) {
                return Evaluated::Value(v);
            }
        }
        self.partial(lhs, rhs, ctx)
    }

    /// Parenthesized textual rendering via the per-operator templates.
    pub fn render(&self, ctx: &EvalContext<'_>) -> String {
        let lhs = self.render_operand(&self.lhs, ctx);
        let out = self.op.template().replacen("{}", &lhs, 1);
        match &self.rhs {
            Some(o) => out.replacen("{}", &self.render_operand(o, ctx), 1),
            None => out,
        }
    }

    fn render_operand(&self, operand: &Operand, ctx: &EvalContext<'_>) -> String {
        match operand {
            Operand::Literal(v) => v.to_string(),
            Operand::Name(n) => n.clone(),
            Operand::Field(n) => match ctx.record {
                Some(r) => format!("{}.{}", r.table(), n),
                None => n.clone(),
            },
            Operand::Expr(e) => format!("({})", e.render(ctx)),
        }
    }

    /// Resolve one operand; unresolvable operands are kept as-is so a
    /// partial expression can pick them up again later.
    fn resolve(&self, operand: &Operand, ctx: &EvalContext<'_>) -> Operand {
        match operand {
            Operand::Literal(_) => operand.clone(),
            Operand::Name(n) => match ctx.vars.get(n).or_else(|| self.context.get(n)) {
                Some(v) => Operand::Literal(v.clone()),
                None => operand.clone(),
            },
            Operand::Field(n) => match ctx.record.and_then(|r| r.get(n).ok()) {
                Some(v) => Operand::Literal(v),
                None => operand.clone(),
            },
            Operand::Expr(e) => match e.eval(ctx) {
                Evaluated::Value(v) => Operand::Literal(v),
                Evaluated::Partial(p) => Operand::Expr(Box::new(p)),
            },
        }
    }

    fn partial(&self, lhs: Operand, rhs: Option<Operand>, ctx: &EvalContext<'_>) -> Evaluated {
        let mut context = self.context.clone();
        for (k, v) in &ctx.vars {
            context.insert(k.clone(), v.clone());
        }
        Evaluated::Partial(Expression {
            lhs,
            rhs,
            op: self.op,
            context,
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&EvalContext::new()))
    }
}

fn resolved_value(operand: &Operand) -> Option<Value> {
    match operand {
        Operand::Literal(v) => Some(v.clone()),
        _ => None,
    }
}

/// Apply `op` to resolved values. `None` signals an incompatible pairing,
/// which the caller turns into a partial expression.
fn apply(op: ExprOp, a: Value, b: Option<Value>) -> Option<Value> {
    use Value::{Boolean, Integer, Real, Text};

    match op {
        ExprOp::Add | ExprOp::Sub | ExprOp::Mul | ExprOp::Div => {
            let b = b?;
            match (a, b) {
                (Integer(x), Integer(y)) => match op {
                    ExprOp::Add => Some(Integer(x + y)),
                    ExprOp::Sub => Some(Integer(x - y)),
                    ExprOp::Mul => Some(Integer(x * y)),
                    ExprOp::Div => x.checked_div(y).map(Integer),
                    _ => None,
                },
                (x, y) => {
                    if let (Some(x), Some(y)) = (as_real(&x), as_real(&y)) {
                        match op {
                            ExprOp::Add => Some(Real(x + y)),
                            ExprOp::Sub => Some(Real(x - y)),
                            ExprOp::Mul => Some(Real(x * y)),
                            ExprOp::Div => (y != 0.0).then(|| Real(x / y)),
                            _ => None,
                        }
                    } else if let (Text(x), Text(y), ExprOp::Add) = (&x, &y, op) {
                        Some(Text(format!("{x}{y}")))
                    } else {
                        None
                    }
                }
            }
        }
        ExprOp::Lt | ExprOp::Le | ExprOp::Gt | ExprOp::Ge => {
            let b = b?;
            let ordering = match (&a, &b) {
                (Text(x), Text(y)) => x.partial_cmp(y),
                (x, y) => match (as_real(x), as_real(y)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            }?;
            let out = match op {
                ExprOp::Lt => ordering.is_lt(),
                ExprOp::Le => ordering.is_le(),
                ExprOp::Gt => ordering.is_gt(),
                ExprOp::Ge => ordering.is_ge(),
                _ => return None,
            };
            Some(Boolean(out))
        }
        ExprOp::Eq | ExprOp::Ne => {
            let b = b?;
            let equal = match (&a, &b) {
                (Integer(_) | Real(_), Integer(_) | Real(_)) => {
                    as_real(&a).zip(as_real(&b)).map(|(x, y)| x == y)?
                }
                (x, y) => x == y,
            };
            Some(Boolean(if op == ExprOp::Eq { equal } else { !equal }))
        }
        ExprOp::Contains => {
            let b = b?;
            match (a, b) {
                (Text(hay), Text(needle)) => Some(Boolean(hay.contains(&needle))),
                _ => None,
            }
        }
        ExprOp::Length => match a {
            Text(s) => Some(Integer(s.chars().count() as i64)),
            Value::Blob(bytes) => Some(Integer(bytes.len() as i64)),
            _ => None,
        },
        ExprOp::And | ExprOp::Or | ExprOp::Xor => {
            let b = b?;
            match (a, b) {
                (Boolean(x), Boolean(y)) => Some(Boolean(match op {
                    ExprOp::And => x && y,
                    ExprOp::Or => x || y,
                    _ => x ^ y,
                })),
                (Integer(x), Integer(y)) => Some(Integer(match op {
                    ExprOp::And => x & y,
                    ExprOp::Or => x | y,
                    _ => x ^ y,
                })),
                _ => None,
            }
        }
        ExprOp::Not => match a {
            Boolean(x) => Some(Boolean(!x)),
            Integer(x) => Some(Integer(!x)),
            _ => None,
        },
    }
}

fn as_real(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(f) => Some(*f),
        _ => None,
    }
}

// Explicit combinators instead of operator overloading; arity is fixed
// by the signatures, so these cannot fail.

pub fn lt(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Lt, a, b)
}

pub fn le(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Le, a, b)
}

pub fn eq(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Eq, a, b)
}

pub fn ne(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Ne, a, b)
}

pub fn gt(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Gt, a, b)
}

pub fn ge(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Ge, a, b)
}

pub fn contains(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Contains, a, b)
}

pub fn length(a: impl Into<Operand>) -> Expression {
    Expression::unary(ExprOp::Length, a)
}

pub fn and_(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::And, a, b)
}

pub fn or_(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Or, a, b)
}

pub fn xor(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Xor, a, b)
}

pub fn not_(a: impl Into<Operand>) -> Expression {
    Expression::unary(ExprOp::Not, a)
}

pub fn add(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Add, a, b)
}

pub fn sub(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Sub, a, b)
}

pub fn mul(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Mul, a, b)
}

pub fn div(a: impl Into<Operand>, b: impl Into<Operand>) -> Expression {
    Expression::binary(ExprOp::Div, a, b)
}
