//! Tree-walking interpreter.
//!
//! Values reachable from the activation are borrowed, not cloned; only computed
//! values are owned. Every visited node is charged against a step budget.

use std::borrow::Cow;
use std::cmp::Ordering;

use crate::error::ExprError;
use crate::expr::activation::{entity_field, Activation};
use crate::expr::functions::{self, Builtin};
use crate::expr::parser::{BinaryOp, Expr, Root, UnaryOp};
use crate::value::Value;

type Eval<'a> = Result<Cow<'a, Value>, ExprError>;

pub(crate) struct Interp<'a> {
    act: &'a Activation,
    steps: usize,
    max_steps: usize,
    regex_size_limit: usize,
}

impl<'a> Interp<'a> {
    pub(crate) fn new(act: &'a Activation, max_steps: usize, regex_size_limit: usize) -> Self {
        Self { act, steps: 0, max_steps, regex_size_limit }
    }

    fn charge(&mut self, cost: usize) -> Result<(), ExprError> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.max_steps {
            return Err(ExprError::eval(format!(
                "evaluation step budget of {} exceeded",
                self.max_steps
            )));
        }
        Ok(())
    }

    pub(crate) fn eval(&mut self, expr: &'a Expr) -> Eval<'a> {
        self.charge(1)?;
        match expr {
            Expr::Literal(v) => Ok(Cow::Borrowed(v)),
            Expr::Root(root) => Ok(match root {
                Root::Principal => Cow::Borrowed(&self.act.principal),
                Root::Resource => Cow::Borrowed(&self.act.resource),
                Root::Request => Cow::Owned(self.act.request_value()),
                Root::AuxData => Cow::Borrowed(&self.act.aux_data),
                Root::Now => Cow::Owned(Value::Timestamp(self.act.now)),
            }),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?.into_owned());
                }
                Ok(Cow::Owned(Value::List(out)))
            }
            Expr::Select { operand, field } => {
                if let Expr::Root(Root::Request) = operand.as_ref() {
                    return self
                        .act
                        .request_field(field)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| ExprError::eval(format!("no such key: `{field}`")));
                }
                match self.eval(operand)? {
                    Cow::Borrowed(base) if self.act.is_entity(base) => entity_field(base, field)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| ExprError::eval(format!("no such key: `{field}`"))),
                    Cow::Borrowed(base) => select(base, field).map(Cow::Borrowed),
                    Cow::Owned(base) => select(&base, field).map(|v| Cow::Owned(v.clone())),
                }
            }
            Expr::Index { operand, index } => {
                let base = self.eval(operand)?;
                let index = self.eval(index)?;
                match (base, index.as_ref()) {
                    (Cow::Borrowed(base), Value::String(k)) if self.act.is_entity(base) => entity_field(base, k)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| ExprError::eval(format!("no such key: `{k}`"))),
                    (Cow::Borrowed(base), _) => index_into(base, &index).map(Cow::Borrowed),
                    (Cow::Owned(base), _) => index_into(&base, &index).map(|v| Cow::Owned(v.clone())),
                }
            }
            Expr::Has { operand, field } if matches!(operand.as_ref(), Expr::Root(Root::Request)) => {
                Ok(Cow::Owned(Value::Bool(self.act.request_field(field).is_some())))
            }
            Expr::Has { operand, field } => match self.eval(operand)?.as_ref() {
                v if self.act.is_entity(v) => Ok(Cow::Owned(Value::Bool(entity_field(v, field).is_some()))),
                Value::Map(m) => Ok(Cow::Owned(Value::Bool(m.contains_key(field)))),
                Value::Null => Err(ExprError::eval(format!("has(.{field}) on null"))),
                other => Err(ExprError::type_mismatch(format!(
                    "has(.{field}) requires a map, got {}",
                    other.type_name()
                ))),
            },
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                unary(*op, &v).map(Cow::Owned)
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                if !self.eval_bool(left, "&&")? {
                    return Ok(Cow::Owned(Value::Bool(false)));
                }
                self.eval_bool(right, "&&").map(|b| Cow::Owned(Value::Bool(b)))
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                if self.eval_bool(left, "||")? {
                    return Ok(Cow::Owned(Value::Bool(true)));
                }
                self.eval_bool(right, "||").map(|b| Cow::Owned(Value::Bool(b)))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                if *op == BinaryOp::In {
                    if let Value::List(items) = r.as_ref() {
                        self.charge(items.len())?;
                    }
                }
                binary(*op, &l, &r).map(Cow::Owned)
            }
            Expr::Conditional { cond, then, otherwise } => {
                if self.eval_bool(cond, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func: Builtin::Now, .. } => Ok(Cow::Owned(Value::Timestamp(self.act.now))),
            Expr::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.eval(arg)?.into_owned();
                    if let Value::List(items) = &v {
                        self.charge(items.len())?;
                    }
                    values.push(v);
                }
                functions::call(*func, &values, self.regex_size_limit).map(Cow::Owned)
            }
            Expr::MatchesLiteral { target, regex } => match self.eval(target)?.as_ref() {
                Value::String(s) => Ok(Cow::Owned(Value::Bool(regex.is_match(s)))),
                Value::Null => Err(ExprError::eval("matches() applied to null")),
                other => Err(ExprError::type_mismatch(format!(
                    "matches() requires a string, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn eval_bool(&mut self, expr: &'a Expr, op: &str) -> Result<bool, ExprError> {
        match self.eval(expr)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            Value::Null => Err(ExprError::eval(format!("`{op}` operand is null"))),
            other => Err(ExprError::type_mismatch(format!(
                "`{op}` requires bool operands, got {}",
                other.type_name()
            ))),
        }
    }
}

fn select<'v>(base: &'v Value, field: &str) -> Result<&'v Value, ExprError> {
    match base {
        Value::Map(m) => m
            .get(field)
            .ok_or_else(|| ExprError::eval(format!("no such key: `{field}`"))),
        Value::Null => Err(ExprError::eval(format!("cannot select `{field}` on null"))),
        other => Err(ExprError::type_mismatch(format!(
            "cannot select `{field}` on {}",
            other.type_name()
        ))),
    }
}

fn index_into<'v>(base: &'v Value, index: &Value) -> Result<&'v Value, ExprError> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .ok_or_else(|| ExprError::eval(format!("index {i} out of range (len {})", items.len()))),
        (Value::Map(m), Value::String(k)) => m
            .get(k)
            .ok_or_else(|| ExprError::eval(format!("no such key: `{k}`"))),
        (Value::Null, _) => Err(ExprError::eval("cannot index null")),
        (b, i) => Err(ExprError::type_mismatch(format!(
            "cannot index {} with {}",
            b.type_name(),
            i.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, ExprError> {
    match (op, v) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ExprError::eval("integer overflow")),
        (UnaryOp::Neg, Value::Double(f)) => Ok(Value::Double(-f)),
        (UnaryOp::Neg, Value::Duration(d)) => Ok(Value::Duration(-*d)),
        (_, Value::Null) => Err(ExprError::eval("unary operator applied to null")),
        (UnaryOp::Not, other) => Err(ExprError::type_mismatch(format!(
            "`!` requires bool, got {}",
            other.type_name()
        ))),
        (UnaryOp::Neg, other) => Err(ExprError::type_mismatch(format!(
            "`-` requires a number or duration, got {}",
            other.type_name()
        ))),
    }
}

/// Both operands numeric with at least one double.
fn mixed_numbers(l: &Value, r: &Value) -> Option<(f64, f64)> {
    match (l, r) {
        (Value::Int(_), Value::Int(_)) => None,
        _ => Some((l.as_f64()?, r.as_f64()?)),
    }
}

fn overflow() -> ExprError {
    ExprError::eval("arithmetic overflow")
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> ExprError {
    if l.is_null() || r.is_null() {
        return ExprError::eval(format!("{op:?} applied to null"));
    }
    ExprError::type_mismatch(format!(
        "no overload for {} {op:?} {}",
        l.type_name(),
        r.type_name()
    ))
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = mixed_numbers(l, r)?;
            a.partial_cmp(&b)
        }
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    let b = |x: bool| Ok(Value::Bool(x));
    match op {
        BinaryOp::Eq => b(l == r),
        BinaryOp::Ne => b(l != r),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(l, r).ok_or_else(|| mismatch(op, l, r))?;
            b(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        BinaryOp::In => match (l, r) {
            (item, Value::List(items)) => b(items.contains(item)),
            (Value::String(k), Value::Map(m)) => b(m.contains_key(k)),
            _ => Err(mismatch(op, l, r)),
        },
        BinaryOp::Add => match (l, r) {
            (Value::Int(a), Value::Int(c)) => a.checked_add(*c).map(Value::Int).ok_or_else(overflow),
            (Value::String(a), Value::String(c)) => Ok(Value::String(format!("{a}{c}"))),
            (Value::List(a), Value::List(c)) => Ok(Value::List(a.iter().chain(c).cloned().collect())),
            (Value::Timestamp(t), Value::Duration(d)) | (Value::Duration(d), Value::Timestamp(t)) => t
                .checked_add_signed(*d)
                .map(Value::Timestamp)
                .ok_or_else(overflow),
            (Value::Duration(a), Value::Duration(c)) => a.checked_add(c).map(Value::Duration).ok_or_else(overflow),
            _ => mixed_numbers(l, r)
                .map(|(a, c)| Value::Double(a + c))
                .ok_or_else(|| mismatch(op, l, r)),
        },
        BinaryOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(c)) => a.checked_sub(*c).map(Value::Int).ok_or_else(overflow),
            (Value::Timestamp(a), Value::Timestamp(c)) => Ok(Value::Duration(a.signed_duration_since(*c))),
            (Value::Timestamp(t), Value::Duration(d)) => t
                .checked_sub_signed(*d)
                .map(Value::Timestamp)
                .ok_or_else(overflow),
            (Value::Duration(a), Value::Duration(c)) => a.checked_sub(c).map(Value::Duration).ok_or_else(overflow),
            _ => mixed_numbers(l, r)
                .map(|(a, c)| Value::Double(a - c))
                .ok_or_else(|| mismatch(op, l, r)),
        },
        BinaryOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(c)) => a.checked_mul(*c).map(Value::Int).ok_or_else(overflow),
            _ => mixed_numbers(l, r)
                .map(|(a, c)| Value::Double(a * c))
                .ok_or_else(|| mismatch(op, l, r)),
        },
        BinaryOp::Div => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(ExprError::eval("division by zero")),
            (Value::Int(a), Value::Int(c)) => a.checked_div(*c).map(Value::Int).ok_or_else(overflow),
            _ => mixed_numbers(l, r)
                .map(|(a, c)| Value::Double(a / c))
                .ok_or_else(|| mismatch(op, l, r)),
        },
        BinaryOp::Rem => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(ExprError::eval("modulus by zero")),
            (Value::Int(a), Value::Int(c)) => a.checked_rem(*c).map(Value::Int).ok_or_else(overflow),
            _ => Err(mismatch(op, l, r)),
        },
        BinaryOp::And | BinaryOp::Or => Err(ExprError::unknown("logical operator reached strict evaluation")),
    }
}
