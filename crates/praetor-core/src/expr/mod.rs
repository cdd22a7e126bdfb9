//! Condition expression language.
//!
//! A small, side-effect-free CEL subset. Sources are compiled once into a
//! [`Program`] (name and arity checks, literal regex compilation, size and depth
//! limits) and then evaluated against an [`Activation`] any number of times.

mod activation;
mod eval;
mod functions;
mod lexer;
mod parser;

pub use activation::Activation;
pub use functions::Builtin;
pub use parser::{BinaryOp, Expr, Root, UnaryOp};

use crate::error::ExprError;
use crate::value::Value;

/// Compile and evaluation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum source length in bytes.
    pub max_len: usize,
    /// Maximum AST nesting depth.
    pub max_depth: usize,
    /// Evaluation step budget per call.
    pub max_steps: usize,
    /// Compiled size limit for `matches()` patterns.
    pub regex_size_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_len: 4096,
            max_depth: 64,
            max_steps: 10_000,
            regex_size_limit: 1 << 20,
        }
    }
}

/// A compiled, immutable expression.
#[derive(Debug)]
pub struct Program {
    source: String,
    expr: Expr,
    uses_now: bool,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Whether the result may depend on the evaluation timestamp.
    pub fn uses_now(&self) -> bool {
        self.uses_now
    }

    pub fn evaluate(&self, act: &Activation, limits: &Limits) -> Result<Value, ExprError> {
        let mut interp = eval::Interp::new(act, limits.max_steps, limits.regex_size_limit);
        interp.eval(&self.expr).map(|v| v.into_owned())
    }

    /// Evaluate and require a boolean result.
    pub fn evaluate_bool(&self, act: &Activation, limits: &Limits) -> Result<bool, ExprError> {
        match self.evaluate(act, limits)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::type_mismatch(format!(
                "condition must evaluate to bool, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Compile an expression source.
pub fn compile(source: &str, limits: &Limits) -> Result<Program, ExprError> {
    if source.trim().is_empty() {
        return Err(ExprError::parse("empty expression"));
    }
    if source.len() > limits.max_len {
        return Err(ExprError::parse(format!(
            "expression length {} exceeds limit {}",
            source.len(),
            limits.max_len
        )));
    }

    let tokens = lexer::tokenize(source)?;
    let mut parser = parser::Parser::new(tokens, limits.max_depth, limits.regex_size_limit);
    let expr = parser.parse()?;

    // Method chains and operator runs are flat in the parser but deep in the tree.
    let height = expr.height();
    if height > limits.max_depth {
        return Err(ExprError::parse(format!(
            "expression nesting {height} exceeds limit {}",
            limits.max_depth
        )));
    }

    Ok(Program {
        source: source.to_string(),
        expr,
        uses_now: parser.uses_now,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::error::ExprErrorKind;
    use crate::model::{CheckRequest, Principal, Resource};

    fn act() -> Activation {
        let principal = Principal::new("alice")
            .with_role("user")
            .with_attr("department", "engineering")
            .with_attr("level", 3i64);
        let resource = Resource::new("document", "doc-1")
            .with_attr("ownerId", "alice")
            .with_attr("tags", vec!["a", "b"]);
        let req = CheckRequest::new(principal, resource, ["view"]);
        Activation::new(&req, Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap())
    }

    fn eval(src: &str) -> Result<Value, ExprError> {
        compile(src, &Limits::default())?.evaluate(&act(), &Limits::default())
    }

    #[test]
    fn owner_and_attribute_access() {
        assert_eq!(eval("resource.attr.ownerId == principal.id").unwrap(), Value::Bool(true));
        assert_eq!(eval("resource.ownerId == principal.id").unwrap(), Value::Bool(true));
        assert_eq!(eval("request.principal.attr.level > 2").unwrap(), Value::Bool(true));
        assert_eq!(eval("'user' in principal.roles").unwrap(), Value::Bool(true));
        assert_eq!(eval("resource.attr.tags[1]").unwrap(), Value::from("b"));
    }

    #[test]
    fn missing_attribute_is_evaluation_error() {
        let err = eval("resource.attr.missing == 1").unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Evaluation);
        assert_eq!(eval("has(resource.attr.missing)").unwrap(), Value::Bool(false));
    }

    #[test]
    fn short_circuit_skips_errors() {
        assert_eq!(eval("false && resource.attr.missing").unwrap(), Value::Bool(false));
        assert_eq!(eval("true || resource.attr.missing").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 && true").unwrap_err().kind, ExprErrorKind::Type);
    }

    #[test]
    fn arithmetic_rules() {
        assert_eq!(eval("7 / 2").unwrap(), Value::Int(3));
        assert_eq!(eval("7 % 4 + 1").unwrap(), Value::Int(4));
        assert_eq!(eval("1 + 0.5").unwrap(), Value::Double(1.5));
        assert_eq!(eval("'a' + 'b'").unwrap(), Value::from("ab"));
        assert_eq!(eval("1 / 0").unwrap_err().kind, ExprErrorKind::Evaluation);
        assert_eq!(eval("9223372036854775807 + 1").unwrap_err().kind, ExprErrorKind::Evaluation);
        assert_eq!(eval("'a' + 1").unwrap_err().kind, ExprErrorKind::Type);
    }

    #[test]
    fn time_builtins_use_injected_now() {
        assert_eq!(eval("now().getHours()").unwrap(), Value::Int(9));
        assert_eq!(eval("now.getFullYear()").unwrap(), Value::Int(2026));
        assert_eq!(
            eval("now() - timestamp('2026-03-14T08:30:00Z') == duration('1h')").unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn uses_now_is_tracked() {
        let limits = Limits::default();
        assert!(compile("now().getHours() < 17", &limits).unwrap().uses_now());
        assert!(compile("now.getHours() < 17", &limits).unwrap().uses_now());
        assert!(!compile("principal.id == 'x'", &limits).unwrap().uses_now());
    }

    #[test]
    fn non_bool_condition_is_type_error() {
        let limits = Limits::default();
        let prog = compile("principal.id", &limits).unwrap();
        assert_eq!(prog.evaluate_bool(&act(), &limits).unwrap_err().kind, ExprErrorKind::Type);
    }

    #[test]
    fn limits_are_enforced() {
        let limits = Limits { max_len: 16, ..Limits::default() };
        assert_eq!(
            compile("principal.id == 'abcdefgh'", &limits).unwrap_err().kind,
            ExprErrorKind::Parse
        );

        let chain = vec!["1"; 100].join(" + ");
        assert_eq!(compile(&chain, &Limits::default()).unwrap_err().kind, ExprErrorKind::Parse);

        let limits = Limits { max_steps: 5, ..Limits::default() };
        let prog = compile("1 + 1 + 1 + 1 + 1 == 5", &limits).unwrap();
        assert_eq!(prog.evaluate(&act(), &limits).unwrap_err().kind, ExprErrorKind::Evaluation);

        assert_eq!(compile("   ", &Limits::default()).unwrap_err().kind, ExprErrorKind::Parse);
    }

    #[test]
    fn long_operator_chain_is_rejected_not_overflowed() {
        let limits = Limits { max_len: 1_048_576, max_depth: 512, ..Limits::default() };
        let src = format!("1{}", "+1".repeat(200_000));
        assert!(src.len() <= limits.max_len);
        assert_eq!(compile(&src, &limits).unwrap_err().kind, ExprErrorKind::Parse);

        let src = format!("principal{}", ".attr".repeat(150_000));
        assert_eq!(compile(&src, &limits).unwrap_err().kind, ExprErrorKind::Parse);

        let ok = format!("1{} == 201", "+1".repeat(200));
        assert_eq!(compile(&ok, &limits).unwrap().evaluate(&act(), &limits).unwrap(), Value::Bool(true));
    }
}
