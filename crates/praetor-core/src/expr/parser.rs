//! Recursive-descent parser producing the expression AST.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr      = or ("?" expr ":" expr)?
//! or        = and ("||" and)*
//! and       = relation ("&&" relation)*
//! relation  = additive (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") additive)?
//! additive  = mult (("+" | "-") mult)*
//! mult      = unary (("*" | "/" | "%") unary)*
//! unary     = ("!" | "-") unary | postfix
//! postfix   = primary ("." IDENT ("(" args ")")? | "[" expr "]")*
//! primary   = literal | "[" args "]" | "(" expr ")" | IDENT "(" args ")" | IDENT
//! ```
//!
//! Name resolution happens here: root identifiers and function names are checked
//! at compile time, so evaluation never meets an unknown name.

use std::sync::Arc;

use regex::Regex;

use crate::error::ExprError;
use crate::expr::functions::{compile_regex, Builtin};
use crate::expr::lexer::Token;
use crate::value::Value;

/// Root bindings available to every expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Principal,
    Resource,
    Request,
    AuxData,
    Now,
}

impl Root {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "principal" => Root::Principal,
            "resource" => Root::Resource,
            "request" => Root::Request,
            "auxData" => Root::AuxData,
            "now" => Root::Now,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Root(Root),
    List(Vec<Expr>),
    Select {
        operand: Box<Expr>,
        field: String,
    },
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    Has {
        operand: Box<Expr>,
        field: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    /// `matches` with a literal pattern, compiled once at parse time.
    MatchesLiteral {
        target: Box<Expr>,
        regex: Arc<Regex>,
    },
}

impl Expr {
    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Root(_) => vec![],
            Expr::List(items) | Expr::Call { args: items, .. } => items.iter().collect(),
            Expr::Select { operand, .. } | Expr::Has { operand, .. } | Expr::Unary { operand, .. } => {
                vec![&**operand]
            }
            Expr::MatchesLiteral { target, .. } => vec![&**target],
            Expr::Index { operand, index } => vec![&**operand, &**index],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Conditional { cond, then, otherwise } => vec![&**cond, &**then, &**otherwise],
        }
    }

    /// Tree height, computed without recursion.
    pub fn height(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            for child in node.children() {
                stack.push((child, depth + 1));
            }
        }
        max
    }
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    regex_size_limit: usize,
    pub(crate) uses_now: bool,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>, max_depth: usize, regex_size_limit: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
            regex_size_limit,
            uses_now: false,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), ExprError> {
        match self.advance() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(ExprError::parse(format!("expected {what}, found {t:?}"))),
            None => Err(ExprError::parse(format!("expected {what}, found end of input"))),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExprError::parse(format!(
                "expression nested deeper than {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Parse the whole token stream.
    pub(crate) fn parse(&mut self) -> Result<Expr, ExprError> {
        if self.tokens.is_empty() {
            return Err(ExprError::parse("empty expression"));
        }
        let expr = self.parse_expr()?;
        if let Some(tok) = self.peek() {
            return Err(ExprError::parse(format!("unexpected trailing token: {tok:?}")));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let cond = self.parse_or()?;
        let expr = if self.eat(&Token::Question) {
            let then = self.parse_expr()?;
            self.expect(Token::Colon, "`:` in conditional")?;
            let otherwise = self.parse_expr()?;
            Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    /// One more link in a left-nested operator or postfix chain. A chain nests
    /// the tree as deeply as parentheses do, so it counts against the same
    /// limit and is cut off before the next node is built.
    fn link(&mut self, links: &mut usize) -> Result<(), ExprError> {
        self.enter()?;
        *links += 1;
        Ok(())
    }

    fn unlink(&mut self, links: usize) {
        self.depth -= links;
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat(&Token::Or) {
            self.link(&mut links)?;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_relation()?;
        let mut links = 0;
        while self.eat(&Token::And) {
            self.link(&mut links)?;
            let right = self.parse_relation()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_relation(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::In) => BinaryOp::In,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_mult()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_mult()?;
            left = binary(op, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_mult(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();

        // Fold negative literals.
        Ok(match (op, operand) {
            (UnaryOp::Neg, Expr::Literal(Value::Int(n))) => Expr::Literal(Value::Int(-n)),
            (UnaryOp::Neg, Expr::Literal(Value::Double(f))) => Expr::Literal(Value::Double(-f)),
            (op, operand) => Expr::Unary { op, operand: Box::new(operand) },
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if self.eat(&Token::Dot) {
                self.link(&mut links)?;
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(ExprError::parse("expected identifier after `.`")),
                };
                if self.eat(&Token::LParen) {
                    let mut args = vec![expr];
                    args.extend(self.parse_args(Token::RParen)?);
                    expr = self.make_call(&name, args)?;
                } else {
                    expr = Expr::Select { operand: Box::new(expr), field: name };
                }
            } else if self.eat(&Token::LBracket) {
                self.link(&mut links)?;
                self.enter()?;
                let index = self.parse_expr()?;
                self.leave();
                self.expect(Token::RBracket, "`]`")?;
                expr = Expr::Index { operand: Box::new(expr), index: Box::new(index) };
            } else {
                self.unlink(links);
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Double(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LBracket) => Ok(Expr::List(self.parse_args(Token::RBracket)?)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    if name == "has" {
                        return self.parse_has();
                    }
                    let args = self.parse_args(Token::RParen)?;
                    return self.make_call(&name, args);
                }
                let root = Root::lookup(&name)
                    .ok_or_else(|| ExprError::parse(format!("unknown identifier `{name}`")))?;
                if root == Root::Now {
                    self.uses_now = true;
                }
                Ok(Expr::Root(root))
            }
            Some(other) => Err(ExprError::parse(format!("unexpected token: {other:?}"))),
            None => Err(ExprError::parse("unexpected end of input")),
        }
    }

    /// Comma-separated expressions up to (and consuming) `close`.
    fn parse_args(&mut self, close: Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        self.enter()?;
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(close.clone(), "`,` or closing delimiter")?;
            break;
        }
        self.leave();
        Ok(args)
    }

    /// `has(x.field)`; the argument must be a field selection.
    fn parse_has(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let arg = self.parse_expr()?;
        self.leave();
        self.expect(Token::RParen, "closing parenthesis `)`")?;
        match arg {
            Expr::Select { operand, field } => Ok(Expr::Has { operand, field }),
            _ => Err(ExprError::parse("has() requires a field selection like `has(x.field)`")),
        }
    }

    fn make_call(&mut self, name: &str, mut args: Vec<Expr>) -> Result<Expr, ExprError> {
        let func = Builtin::lookup(name)
            .ok_or_else(|| ExprError::parse(format!("unknown function `{name}`")))?;
        if args.len() != func.arity() {
            return Err(ExprError::parse(format!(
                "{}() expects {} argument(s), got {}",
                func.name(),
                func.arity(),
                args.len()
            )));
        }
        if func == Builtin::Now {
            self.uses_now = true;
        }
        if func == Builtin::Matches {
            if let Some(Expr::Literal(Value::String(pattern))) = args.get(1) {
                let regex = compile_regex(pattern, self.regex_size_limit)?;
                let target = args.swap_remove(0);
                return Ok(Expr::MatchesLiteral { target: Box::new(target), regex: Arc::new(regex) });
            }
        }
        Ok(Expr::Call { func, args })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}
