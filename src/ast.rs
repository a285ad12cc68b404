//! Abstract Syntax Tree (AST) node types for the Slang language.
//!
//! The AST is the output of the parser and the input to the type checker and
//! compiler.  Every node carries a [`Span`] so that later stages can produce
//! error messages that point back into the original source text.
//!
//! # Design Principles
//!
//! - **Completeness**: every syntactic construct in the language has a
//!   corresponding AST representation.
//! - **No lifetimes**: all strings are owned (`String`) so the AST can be
//!   freely moved and stored without tying its lifetime to the source text.
//! - **Span everywhere**: every node carries a `span: Span` field for
//!   diagnostics.
//!
//! The module also hosts [`free_vars`], the ordered free-variable analysis
//! that the compiler's closure-construction pass relies on.

use std::fmt;

use crate::token::Span;

// ─────────────────────────────────────────────────────────────────────────────
// Operators
// ─────────────────────────────────────────────────────────────────────────────

/// Unary operators.
///
/// `Read` consumes its (unit) operand and produces one integer from the
/// machine's input provider; the parser generates it from the `?` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Read,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "NOT"),
            UnaryOp::Neg => write!(f, "NEG"),
            UnaryOp::Read => write!(f, "READ"),
        }
    }
}

/// Binary operators.
///
/// Equality is split into [`BinOp::EqI`] (integers) and [`BinOp::EqB`]
/// (booleans).  The parser always emits `EqI` for `=`; the type checker
/// retags the node to `EqB` when both operands resolve to `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    And,
    Or,
    EqI,
    EqB,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Add => write!(f, "ADD"),
            BinOp::Sub => write!(f, "SUB"),
            BinOp::Mul => write!(f, "MUL"),
            BinOp::Div => write!(f, "DIV"),
            BinOp::Lt => write!(f, "LT"),
            BinOp::And => write!(f, "AND"),
            BinOp::Or => write!(f, "OR"),
            BinOp::EqI => write!(f, "EQI"),
            BinOp::EqB => write!(f, "EQB"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

/// A single-parameter function body, used by lambdas, `let fun` forms, case
/// arms, and `try` handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    /// The bound parameter name.
    pub param: String,
    /// The function body; `param` is in scope here.
    pub body: Box<Expr>,
}

/// A Slang expression: a kind plus the source span it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[inline]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every expression form in the Slang language.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `()`
    Unit,
    /// `true` / `false`
    Boolean(bool),
    /// An integer literal.
    Integer(i64),
    /// A variable reference.
    Var(String),
    /// `not e`, `-e`, or `?` (READ applied to a synthetic unit operand).
    Unary(UnaryOp, Box<Expr>),
    /// `e1 op e2`
    Op(Box<Expr>, BinOp, Box<Expr>),
    /// `(e1, e2)`
    Pair(Box<Expr>, Box<Expr>),
    /// `fst e`
    Fst(Box<Expr>),
    /// `snd e`
    Snd(Box<Expr>),
    /// `inl e`
    Inl(Box<Expr>),
    /// `inr e`
    Inr(Box<Expr>),
    /// `case e of inl x -> e1 | inr y -> e2`
    Case(Box<Expr>, Lambda, Lambda),
    /// `if e1 then e2 else e3`
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `(e1; e2; ...; en)` — evaluate left to right, keep the last value.
    Seq(Vec<Expr>),
    /// `ref e`
    Ref(Box<Expr>),
    /// `!e`
    Deref(Box<Expr>),
    /// `e1 := e2`
    Assign(Box<Expr>, Box<Expr>),
    /// `while e1 do e2` — evaluates to `()`.
    While(Box<Expr>, Box<Expr>),
    /// `e1 e2` — call-by-value application.
    App(Box<Expr>, Box<Expr>),
    /// `fun x -> e`
    Lambda(Lambda),
    /// `let f x = e1 in e2` — non-recursive function binding.
    LetFun(String, Lambda, Box<Expr>),
    /// `let rec f x = e1 in e2` — `f` is in scope inside `e1`.
    LetRecFun(String, Lambda, Box<Expr>),
    /// `try e1 with x -> e2` — the handler receives the raised value.
    Try(Box<Expr>, Lambda),
    /// `raise e`
    Raise(Box<Expr>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Free-variable analysis
// ─────────────────────────────────────────────────────────────────────────────

/// Compute the free variables of `expr`, excluding names in `bound`.
///
/// Variables are returned in order of first occurrence (left-to-right,
/// outside-in), with no duplicates.  The compiler depends on this ordering:
/// the closure layout assigns heap offsets by position in this list.
pub fn free_vars(bound: &[String], expr: &Expr) -> Vec<String> {
    let mut inner: Vec<String> = bound.to_vec();
    let mut out = Vec::new();
    walk(&mut inner, expr, &mut out);
    out
}

/// Accumulate free variables of `expr` into `out`, treating `bound` as the
/// current binding stack (pushed and popped around binders).
fn walk(bound: &mut Vec<String>, expr: &Expr, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Unit | ExprKind::Boolean(_) | ExprKind::Integer(_) => {}
        ExprKind::Var(x) => {
            if !bound.iter().any(|b| b == x) && !out.iter().any(|o| o == x) {
                out.push(x.clone());
            }
        }
        ExprKind::Unary(_, e)
        | ExprKind::Fst(e)
        | ExprKind::Snd(e)
        | ExprKind::Inl(e)
        | ExprKind::Inr(e)
        | ExprKind::Ref(e)
        | ExprKind::Deref(e)
        | ExprKind::Raise(e) => walk(bound, e, out),
        ExprKind::Op(e1, _, e2)
        | ExprKind::Pair(e1, e2)
        | ExprKind::Assign(e1, e2)
        | ExprKind::While(e1, e2)
        | ExprKind::App(e1, e2) => {
            walk(bound, e1, out);
            walk(bound, e2, out);
        }
        ExprKind::If(e1, e2, e3) => {
            walk(bound, e1, out);
            walk(bound, e2, out);
            walk(bound, e3, out);
        }
        ExprKind::Seq(es) => {
            for e in es {
                walk(bound, e, out);
            }
        }
        ExprKind::Case(scrutinee, left, right) => {
            walk(bound, scrutinee, out);
            walk_lambda(bound, left, out);
            walk_lambda(bound, right, out);
        }
        ExprKind::Lambda(lambda) => walk_lambda(bound, lambda, out),
        ExprKind::LetFun(f, lambda, body) => {
            walk_lambda(bound, lambda, out);
            bound.push(f.clone());
            walk(bound, body, out);
            bound.pop();
        }
        ExprKind::LetRecFun(f, lambda, body) => {
            bound.push(f.clone());
            walk_lambda(bound, lambda, out);
            walk(bound, body, out);
            bound.pop();
        }
        ExprKind::Try(e1, handler) => {
            walk(bound, e1, out);
            walk_lambda(bound, handler, out);
        }
    }
}

fn walk_lambda(bound: &mut Vec<String>, lambda: &Lambda, out: &mut Vec<String>) {
    bound.push(lambda.param.clone());
    walk(bound, &lambda.body, out);
    bound.pop();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::new(ExprKind::Var(name.into()), Span::dummy())
    }

    fn add(a: Expr, b: Expr) -> Expr {
        Expr::new(
            ExprKind::Op(Box::new(a), BinOp::Add, Box::new(b)),
            Span::dummy(),
        )
    }

    #[test]
    fn test_free_vars_order_and_dedup() {
        // b + (a + b) — first occurrence order, no duplicates.
        let e = add(var("b"), add(var("a"), var("b")));
        assert_eq!(free_vars(&[], &e), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_free_vars_respects_bound_set() {
        let e = add(var("x"), var("y"));
        assert_eq!(free_vars(&["x".to_string()], &e), vec!["y".to_string()]);
    }

    #[test]
    fn test_free_vars_lambda_binds_param() {
        // fun x -> x + y: only y is free.
        let lambda = Expr::new(
            ExprKind::Lambda(Lambda {
                param: "x".into(),
                body: Box::new(add(var("x"), var("y"))),
            }),
            Span::dummy(),
        );
        assert_eq!(free_vars(&[], &lambda), vec!["y".to_string()]);
    }

    #[test]
    fn test_free_vars_letrec_binds_self() {
        // let rec f x = f x in f — nothing free.
        let e = Expr::new(
            ExprKind::LetRecFun(
                "f".into(),
                Lambda {
                    param: "x".into(),
                    body: Box::new(Expr::new(
                        ExprKind::App(Box::new(var("f")), Box::new(var("x"))),
                        Span::dummy(),
                    )),
                },
                Box::new(var("f")),
            ),
            Span::dummy(),
        );
        assert!(free_vars(&[], &e).is_empty());
    }

    #[test]
    fn test_free_vars_case_arms_bind_params() {
        // case s of inl x -> x + k | inr y -> y: s and k free.
        let e = Expr::new(
            ExprKind::Case(
                Box::new(var("s")),
                Lambda {
                    param: "x".into(),
                    body: Box::new(add(var("x"), var("k"))),
                },
                Lambda {
                    param: "y".into(),
                    body: Box::new(var("y")),
                },
            ),
            Span::dummy(),
        );
        assert_eq!(free_vars(&[], &e), vec!["s".to_string(), "k".to_string()]);
    }
}
