//! Static type inference for the Slang language.
//!
//! This pass sits between the parser and the compiler:
//!
//!   lex → parse → **typecheck** → compile → load → run
//!
//! Slang is monomorphic, so inference is plain unification: every binder
//! gets a fresh inference variable, constraints are solved as they are
//! generated, and the occurs check rejects infinite types (`fun x -> x x`).
//!
//! # Operator retagging
//!
//! The surface syntax has a single equality operator `=`, but the VM contract
//! distinguishes integer equality (`EQI`) from boolean equality (`EQB`).
//! The parser emits [`BinOp::EqI`] unconditionally; this pass retags the node
//! to [`BinOp::EqB`] in place when both operands resolve to `bool` — which is
//! why [`check`] takes `&mut Expr`.
//!
//! # Exceptions
//!
//! Raised values are integers: `raise e` requires `e : int` and the handler
//! parameter of `try e1 with x -> e2` is bound at `int`.  The `raise`
//! expression itself takes a fresh result type since it never returns.

use std::fmt;

use crate::ast::{BinOp, Expr, ExprKind, Lambda, UnaryOp};
use crate::token::Span;

// ─────────────────────────────────────────────────────────────────────────────
// Type representation
// ─────────────────────────────────────────────────────────────────────────────

/// The internal type representation used by the inferencer.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Bool,
    Unit,
    /// `t1 * t2`
    Pair(Box<Type>, Box<Type>),
    /// `t1 + t2`
    Sum(Box<Type>, Box<Type>),
    /// `t ref`
    Ref(Box<Type>),
    /// `t1 -> t2`
    Arrow(Box<Type>, Box<Type>),
    /// An unsolved inference variable.
    Var(u32),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Unit => write!(f, "unit"),
            Type::Pair(a, b) => write!(f, "({a} * {b})"),
            Type::Sum(a, b) => write!(f, "({a} + {b})"),
            Type::Ref(t) => write!(f, "{t} ref"),
            Type::Arrow(a, b) => write!(f, "({a} -> {b})"),
            Type::Var(n) => write!(f, "'t{n}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A static type error.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.span, self.message)
    }
}

impl std::error::Error for TypeError {}

type TypeResult<T> = Result<T, TypeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Infer the type of a closed expression, retagging `=` nodes in place.
///
/// Returns the fully-resolved type of the whole program.  Types that remain
/// polymorphic (e.g. `fun x -> x`) keep their inference variables, rendered
/// as `'t0`-style names by the `Display` impl.
pub fn check(expr: &mut Expr) -> Result<Type, TypeError> {
    let mut inferencer = Inferencer { subst: Vec::new() };
    let mut env = Vec::new();
    let ty = inferencer.infer(&mut env, expr)?;
    Ok(inferencer.zonk(&ty))
}

// ─────────────────────────────────────────────────────────────────────────────
// Inferencer
// ─────────────────────────────────────────────────────────────────────────────

struct Inferencer {
    /// Solutions for inference variables, indexed by variable id.
    subst: Vec<Option<Type>>,
}

impl Inferencer {
    fn fresh(&mut self) -> Type {
        let id = self.subst.len() as u32;
        self.subst.push(None);
        Type::Var(id)
    }

    /// Follow the substitution one level: the result is either a non-variable
    /// type or an unsolved variable.
    fn prune(&self, ty: &Type) -> Type {
        if let Type::Var(v) = ty {
            if let Some(solved) = &self.subst[*v as usize] {
                return self.prune(&solved.clone());
            }
        }
        ty.clone()
    }

    /// Apply the substitution everywhere in `ty`.
    fn zonk(&self, ty: &Type) -> Type {
        match self.prune(ty) {
            Type::Pair(a, b) => Type::Pair(Box::new(self.zonk(&a)), Box::new(self.zonk(&b))),
            Type::Sum(a, b) => Type::Sum(Box::new(self.zonk(&a)), Box::new(self.zonk(&b))),
            Type::Ref(t) => Type::Ref(Box::new(self.zonk(&t))),
            Type::Arrow(a, b) => Type::Arrow(Box::new(self.zonk(&a)), Box::new(self.zonk(&b))),
            other => other,
        }
    }

    /// Does variable `v` occur in `ty` (after substitution)?
    fn occurs(&self, v: u32, ty: &Type) -> bool {
        match self.prune(ty) {
            Type::Var(w) => v == w,
            Type::Pair(a, b) | Type::Sum(a, b) | Type::Arrow(a, b) => {
                self.occurs(v, &a) || self.occurs(v, &b)
            }
            Type::Ref(t) => self.occurs(v, &t),
            _ => false,
        }
    }

    fn unify(&mut self, a: &Type, b: &Type, span: Span) -> TypeResult<()> {
        let a = self.prune(a);
        let b = self.prune(b);
        match (&a, &b) {
            (Type::Var(v), _) => {
                if a == b {
                    return Ok(());
                }
                if self.occurs(*v, &b) {
                    return Err(self.error(
                        format!("cannot construct the infinite type {} = {}", a, self.zonk(&b)),
                        span,
                    ));
                }
                self.subst[*v as usize] = Some(b.clone());
                Ok(())
            }
            (_, Type::Var(_)) => self.unify(&b, &a, span),
            (Type::Int, Type::Int) | (Type::Bool, Type::Bool) | (Type::Unit, Type::Unit) => Ok(()),
            (Type::Pair(a1, a2), Type::Pair(b1, b2))
            | (Type::Sum(a1, a2), Type::Sum(b1, b2))
            | (Type::Arrow(a1, a2), Type::Arrow(b1, b2)) => {
                self.unify(a1, b1, span)?;
                self.unify(a2, b2, span)
            }
            (Type::Ref(a1), Type::Ref(b1)) => self.unify(a1, b1, span),
            _ => Err(self.error(
                format!("type mismatch: expected {}, found {}", self.zonk(&a), self.zonk(&b)),
                span,
            )),
        }
    }

    fn error(&self, message: String, span: Span) -> TypeError {
        TypeError { message, span }
    }

    // ── Inference proper ─────────────────────────────────────────────────────

    fn infer(&mut self, env: &mut Vec<(String, Type)>, expr: &mut Expr) -> TypeResult<Type> {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Unit => Ok(Type::Unit),
            ExprKind::Boolean(_) => Ok(Type::Bool),
            ExprKind::Integer(_) => Ok(Type::Int),

            ExprKind::Var(name) => env
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| TypeError {
                    message: format!("unbound variable `{name}`"),
                    span,
                }),

            ExprKind::Unary(op, operand) => {
                let t = self.infer(env, operand)?;
                match op {
                    UnaryOp::Not => {
                        self.unify(&t, &Type::Bool, span)?;
                        Ok(Type::Bool)
                    }
                    UnaryOp::Neg => {
                        self.unify(&t, &Type::Int, span)?;
                        Ok(Type::Int)
                    }
                    UnaryOp::Read => {
                        self.unify(&t, &Type::Unit, span)?;
                        Ok(Type::Int)
                    }
                }
            }

            ExprKind::Op(lhs, op, rhs) => {
                let tl = self.infer(env, lhs)?;
                let tr = self.infer(env, rhs)?;
                match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                        self.unify(&tl, &Type::Int, span)?;
                        self.unify(&tr, &Type::Int, span)?;
                        Ok(Type::Int)
                    }
                    BinOp::Lt => {
                        self.unify(&tl, &Type::Int, span)?;
                        self.unify(&tr, &Type::Int, span)?;
                        Ok(Type::Bool)
                    }
                    BinOp::And | BinOp::Or => {
                        self.unify(&tl, &Type::Bool, span)?;
                        self.unify(&tr, &Type::Bool, span)?;
                        Ok(Type::Bool)
                    }
                    BinOp::EqI | BinOp::EqB => {
                        self.unify(&tl, &tr, span)?;
                        match self.prune(&tl) {
                            Type::Bool => {
                                *op = BinOp::EqB;
                                Ok(Type::Bool)
                            }
                            Type::Int => {
                                *op = BinOp::EqI;
                                Ok(Type::Bool)
                            }
                            // Unconstrained operands default to integers.
                            Type::Var(_) => {
                                self.unify(&tl, &Type::Int, span)?;
                                *op = BinOp::EqI;
                                Ok(Type::Bool)
                            }
                            other => Err(self.error(
                                format!(
                                    "`=` requires int or bool operands, found {}",
                                    self.zonk(&other)
                                ),
                                span,
                            )),
                        }
                    }
                }
            }

            ExprKind::Pair(e1, e2) => {
                let t1 = self.infer(env, e1)?;
                let t2 = self.infer(env, e2)?;
                Ok(Type::Pair(Box::new(t1), Box::new(t2)))
            }
            ExprKind::Fst(e) => {
                let t = self.infer(env, e)?;
                let a = self.fresh();
                let b = self.fresh();
                self.unify(&t, &Type::Pair(Box::new(a.clone()), Box::new(b)), span)?;
                Ok(a)
            }
            ExprKind::Snd(e) => {
                let t = self.infer(env, e)?;
                let a = self.fresh();
                let b = self.fresh();
                self.unify(&t, &Type::Pair(Box::new(a), Box::new(b.clone())), span)?;
                Ok(b)
            }

            ExprKind::Inl(e) => {
                let t = self.infer(env, e)?;
                let other = self.fresh();
                Ok(Type::Sum(Box::new(t), Box::new(other)))
            }
            ExprKind::Inr(e) => {
                let t = self.infer(env, e)?;
                let other = self.fresh();
                Ok(Type::Sum(Box::new(other), Box::new(t)))
            }
            ExprKind::Case(scrutinee, left, right) => {
                let ts = self.infer(env, scrutinee)?;
                let a = self.fresh();
                let b = self.fresh();
                self.unify(
                    &ts,
                    &Type::Sum(Box::new(a.clone()), Box::new(b.clone())),
                    span,
                )?;
                let tl = self.infer_lambda_body(env, left, a)?;
                let tr = self.infer_lambda_body(env, right, b)?;
                self.unify(&tl, &tr, span)?;
                Ok(tl)
            }

            ExprKind::If(cond, then_branch, else_branch) => {
                let tc = self.infer(env, cond)?;
                self.unify(&tc, &Type::Bool, span)?;
                let tt = self.infer(env, then_branch)?;
                let te = self.infer(env, else_branch)?;
                self.unify(&tt, &te, span)?;
                Ok(tt)
            }

            ExprKind::Seq(exprs) => {
                let mut last = Type::Unit;
                for e in exprs.iter_mut() {
                    last = self.infer(env, e)?;
                }
                Ok(last)
            }

            ExprKind::Ref(e) => {
                let t = self.infer(env, e)?;
                Ok(Type::Ref(Box::new(t)))
            }
            ExprKind::Deref(e) => {
                let t = self.infer(env, e)?;
                let a = self.fresh();
                self.unify(&t, &Type::Ref(Box::new(a.clone())), span)?;
                Ok(a)
            }
            ExprKind::Assign(target, value) => {
                let tt = self.infer(env, target)?;
                let tv = self.infer(env, value)?;
                self.unify(&tt, &Type::Ref(Box::new(tv)), span)?;
                Ok(Type::Unit)
            }

            ExprKind::While(cond, body) => {
                let tc = self.infer(env, cond)?;
                self.unify(&tc, &Type::Bool, span)?;
                // The body's value is discarded each iteration.
                self.infer(env, body)?;
                Ok(Type::Unit)
            }

            ExprKind::App(func, arg) => {
                let tf = self.infer(env, func)?;
                let ta = self.infer(env, arg)?;
                let result = self.fresh();
                self.unify(
                    &tf,
                    &Type::Arrow(Box::new(ta), Box::new(result.clone())),
                    span,
                )?;
                Ok(result)
            }

            ExprKind::Lambda(lambda) => {
                let param_ty = self.fresh();
                let result = self.infer_lambda_body(env, lambda, param_ty.clone())?;
                Ok(Type::Arrow(Box::new(param_ty), Box::new(result)))
            }

            ExprKind::LetFun(name, lambda, body) => {
                let param_ty = self.fresh();
                let result = self.infer_lambda_body(env, lambda, param_ty.clone())?;
                let fn_ty = Type::Arrow(Box::new(param_ty), Box::new(result));
                env.push((name.clone(), fn_ty));
                let t = self.infer(env, body);
                env.pop();
                t
            }

            ExprKind::LetRecFun(name, lambda, body) => {
                let fn_ty = self.fresh();
                env.push((name.clone(), fn_ty.clone()));
                let param_ty = self.fresh();
                let result = self.infer_lambda_body(env, lambda, param_ty.clone())?;
                self.unify(
                    &fn_ty,
                    &Type::Arrow(Box::new(param_ty), Box::new(result)),
                    span,
                )?;
                let t = self.infer(env, body);
                env.pop();
                t
            }

            ExprKind::Try(protected, handler) => {
                let tp = self.infer(env, protected)?;
                let th = self.infer_lambda_body(env, handler, Type::Int)?;
                self.unify(&tp, &th, span)?;
                Ok(tp)
            }
            ExprKind::Raise(e) => {
                let t = self.infer(env, e)?;
                self.unify(&t, &Type::Int, span)?;
                // `raise` never returns, so its type is unconstrained.
                Ok(self.fresh())
            }
        }
    }

    /// Infer a lambda body with its parameter bound at `param_ty`.
    fn infer_lambda_body(
        &mut self,
        env: &mut Vec<(String, Type)>,
        lambda: &mut Lambda,
        param_ty: Type,
    ) -> TypeResult<Type> {
        env.push((lambda.param.clone(), param_ty));
        let t = self.infer(env, &mut lambda.body);
        env.pop();
        t
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse_tokens;

    fn infer(src: &str) -> Result<(Type, Expr), TypeError> {
        let (tokens, errors) = lex(src);
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        let mut expr = parse_tokens(tokens).expect("parse failed");
        let ty = check(&mut expr)?;
        Ok((ty, expr))
    }

    fn type_of(src: &str) -> Type {
        infer(src).expect("type error").0
    }

    #[test]
    fn test_arithmetic_is_int() {
        assert_eq!(type_of("1 + 2 * 3"), Type::Int);
    }

    #[test]
    fn test_lambda_type() {
        assert_eq!(
            type_of("fun x -> x + 1"),
            Type::Arrow(Box::new(Type::Int), Box::new(Type::Int))
        );
    }

    #[test]
    fn test_fact_is_int() {
        assert_eq!(
            type_of("let rec fact n = if n = 0 then 1 else n * fact (n - 1) in fact 5"),
            Type::Int
        );
    }

    #[test]
    fn test_if_branch_mismatch() {
        let err = infer("if true then 1 else false").unwrap_err();
        assert!(err.message.contains("mismatch"), "got: {}", err.message);
    }

    #[test]
    fn test_eq_retagging() {
        // Boolean comparison retags to EQB.
        let (_, expr) = infer("true = false").unwrap();
        assert!(matches!(expr.kind, ExprKind::Op(_, BinOp::EqB, _)));
        // Integer comparison stays EQI.
        let (_, expr) = infer("1 = 2").unwrap();
        assert!(matches!(expr.kind, ExprKind::Op(_, BinOp::EqI, _)));
    }

    #[test]
    fn test_eq_rejects_structured_operands() {
        let err = infer("(1, 2) = (3, 4)").unwrap_err();
        assert!(err.message.contains("`=` requires"), "got: {}", err.message);
    }

    #[test]
    fn test_unbound_variable() {
        let err = infer("x + 1").unwrap_err();
        assert!(err.message.contains("unbound variable `x`"));
    }

    #[test]
    fn test_occurs_check() {
        let err = infer("fun x -> x x").unwrap_err();
        assert!(err.message.contains("infinite type"), "got: {}", err.message);
    }

    #[test]
    fn test_ref_cycle() {
        assert_eq!(type_of("let r = ref 0 in (r := !r + 1; !r)"), Type::Int);
    }

    #[test]
    fn test_assign_evaluates_to_unit() {
        assert_eq!(type_of("let r = ref 0 in r := 1"), Type::Unit);
    }

    #[test]
    fn test_case_unifies_arms() {
        assert_eq!(
            type_of("case inr 9 of inl x -> x + 1 | inr y -> y - 1"),
            Type::Int
        );
        let err = infer("case inl 1 of inl x -> x | inr y -> (y, y)").unwrap_err();
        assert!(err.message.contains("mismatch"));
    }

    #[test]
    fn test_try_handler_binds_int() {
        assert_eq!(type_of("try (raise 7) + 100 with e -> e * 2"), Type::Int);
        let err = infer("raise true").unwrap_err();
        assert!(err.message.contains("mismatch"));
    }

    #[test]
    fn test_pair_projections() {
        assert_eq!(type_of("fst (1, true)"), Type::Int);
        assert_eq!(type_of("snd (1, true)"), Type::Bool);
    }

    #[test]
    fn test_while_is_unit() {
        assert_eq!(
            type_of("let r = ref 0 in while !r < 10 do r := !r + 1"),
            Type::Unit
        );
    }

    #[test]
    fn test_polymorphic_identity_keeps_variable() {
        // `fun x -> x` stays 't0 -> 't0; no defaulting applies.
        let ty = type_of("fun x -> x");
        assert!(matches!(ty, Type::Arrow(ref a, ref b) if a == b));
    }
}
