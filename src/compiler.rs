//! AST-to-listing compiler for the Slang language.
//!
//! The compiler performs a single recursive walk of the typed AST and emits
//! two instruction streams:
//!
//! - **code** — the main stream, executed in order;
//! - **defs** — function bodies, placed after the final `HALT` and reached
//!   only through labels.
//!
//! Top-level compilation produces the flat listing `code ++ [HALT] ++ defs`.
//!
//! # Variable addressing
//!
//! A `vmap` (ordered association list, searched back to front so inner
//! bindings shadow outer ones) assigns every identifier a [`ValuePath`]:
//!
//! - the argument of the enclosing function is `STACK_LOCATION(-2)`;
//! - the enclosing function itself (when recursive) is `STACK_LOCATION(-1)`,
//!   the closure cell on the caller's stack;
//! - each captured free variable is `HEAP_LOCATION(i)`, a payload slot of
//!   the closure block.
//!
//! # Labels
//!
//! Fresh labels `L0, L1, …` come from a counter owned by the [`Compiler`];
//! [`Compiler::compile`] resets it so that independent compilations are
//! reproducible.

use std::fmt;

use crate::ast::{free_vars, Expr, ExprKind};
use crate::bytecode::{Instruction, Label, Location, ValuePath};
use crate::token::Span;
use crate::value::StackItem;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time error.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.span.line, self.span.col, self.message)
    }
}

impl std::error::Error for CompileError {}

type CompileResult<T> = Result<T, CompileError>;

/// The two streams produced for one sub-expression: `(defs, code)`.
type Streams = (Vec<Instruction>, Vec<Instruction>);

// ─────────────────────────────────────────────────────────────────────────────
// Label generation
// ─────────────────────────────────────────────────────────────────────────────

/// Fresh-label source.  Monotonically increments; resettable between
/// independent top-level compilations.
#[derive(Debug, Default)]
struct LabelGen {
    next: usize,
}

impl LabelGen {
    fn fresh(&mut self) -> Label {
        let label = format!("L{}", self.next);
        self.next += 1;
        label
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// The ordered identifier-to-address map threaded through compilation.
type VMap = Vec<(String, ValuePath)>;

/// The Slang-to-Jargon compiler.
///
/// Create one with [`Compiler::new`], then call [`Compiler::compile`] per
/// top-level expression.
#[derive(Debug, Default)]
pub struct Compiler {
    labels: LabelGen,
}

/// Compile a single top-level expression with a fresh [`Compiler`].
pub fn compile(expr: &Expr) -> CompileResult<Vec<Instruction>> {
    Compiler::new().compile(expr)
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a top-level expression into a complete listing:
    /// `code ++ [HALT] ++ defs`.  The label counter is reset first, so equal
    /// inputs produce equal listings.
    pub fn compile(&mut self, expr: &Expr) -> CompileResult<Vec<Instruction>> {
        self.labels.reset();
        let (defs, mut listing) = self.comp(&VMap::new(), expr)?;
        listing.push(Instruction::Halt);
        listing.extend(defs);
        Ok(listing)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn lookup(&self, vmap: &VMap, name: &str, span: Span) -> CompileResult<ValuePath> {
        vmap.iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, path)| *path)
            .ok_or_else(|| CompileError {
                message: format!("unknown identifier `{name}`"),
                span,
            })
    }

    fn fresh_location(&mut self) -> Location {
        Location::new(self.labels.fresh())
    }

    // ── Recursive translation ────────────────────────────────────────────────

    /// Translate `expr` under `vmap`, returning `(defs, code)`.
    fn comp(&mut self, vmap: &VMap, expr: &Expr) -> CompileResult<Streams> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Unit => Ok((vec![], vec![Instruction::Push(StackItem::Unit)])),
            ExprKind::Boolean(b) => Ok((vec![], vec![Instruction::Push(StackItem::Bool(*b))])),
            ExprKind::Integer(n) => Ok((vec![], vec![Instruction::Push(StackItem::Int(*n))])),

            ExprKind::Var(name) => {
                let path = self.lookup(vmap, name, span)?;
                Ok((vec![], vec![Instruction::Lookup(path)]))
            }

            ExprKind::Unary(op, operand) => {
                let (defs, mut code) = self.comp(vmap, operand)?;
                code.push(Instruction::Unary(*op));
                Ok((defs, code))
            }

            ExprKind::Op(lhs, op, rhs) => {
                let (mut defs, mut code) = self.comp(vmap, lhs)?;
                let (defs2, code2) = self.comp(vmap, rhs)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::Oper(*op));
                Ok((defs, code))
            }

            ExprKind::Pair(e1, e2) => {
                let (mut defs, mut code) = self.comp(vmap, e1)?;
                let (defs2, code2) = self.comp(vmap, e2)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::MkPair);
                Ok((defs, code))
            }
            ExprKind::Fst(e) => self.comp_postfix(vmap, e, Instruction::Fst),
            ExprKind::Snd(e) => self.comp_postfix(vmap, e, Instruction::Snd),
            ExprKind::Inl(e) => self.comp_postfix(vmap, e, Instruction::MkInl),
            ExprKind::Inr(e) => self.comp_postfix(vmap, e, Instruction::MkInr),
            ExprKind::Ref(e) => self.comp_postfix(vmap, e, Instruction::MkRef),
            ExprKind::Deref(e) => self.comp_postfix(vmap, e, Instruction::Deref),

            ExprKind::Assign(target, value) => {
                let (mut defs, mut code) = self.comp(vmap, target)?;
                let (defs2, code2) = self.comp(vmap, value)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::Assign);
                Ok((defs, code))
            }

            ExprKind::Seq(exprs) => {
                if exprs.is_empty() {
                    return Ok((vec![], vec![Instruction::Push(StackItem::Unit)]));
                }
                let mut defs = Vec::new();
                let mut code = Vec::new();
                for (i, e) in exprs.iter().enumerate() {
                    let (d, c) = self.comp(vmap, e)?;
                    defs.extend(d);
                    code.extend(c);
                    if i + 1 < exprs.len() {
                        code.push(Instruction::Pop);
                    }
                }
                Ok((defs, code))
            }

            ExprKind::If(cond, then_branch, else_branch) => {
                let else_loc = self.fresh_location();
                let end_loc = self.fresh_location();
                let (mut defs, mut code) = self.comp(vmap, cond)?;
                let (defs2, code2) = self.comp(vmap, then_branch)?;
                let (defs3, code3) = self.comp(vmap, else_branch)?;
                defs.extend(defs2);
                defs.extend(defs3);
                code.push(Instruction::Test(else_loc.clone()));
                code.extend(code2);
                code.push(Instruction::Goto(end_loc.clone()));
                code.push(Instruction::Label(else_loc.label));
                code.extend(code3);
                code.push(Instruction::Label(end_loc.label));
                Ok((defs, code))
            }

            ExprKind::While(cond, body) => {
                let test_loc = self.fresh_location();
                let end_loc = self.fresh_location();
                let (mut defs, cond_code) = self.comp(vmap, cond)?;
                let (defs2, body_code) = self.comp(vmap, body)?;
                defs.extend(defs2);
                let mut code = vec![Instruction::Label(test_loc.label.clone())];
                code.extend(cond_code);
                code.push(Instruction::Test(end_loc.clone()));
                code.extend(body_code);
                code.push(Instruction::Pop);
                code.push(Instruction::Goto(test_loc));
                code.push(Instruction::Label(end_loc.label));
                code.push(Instruction::Push(StackItem::Unit));
                Ok((defs, code))
            }

            ExprKind::Case(scrutinee, left, right) => {
                let inr_loc = self.fresh_location();
                let after_loc = self.fresh_location();
                let (mut defs, mut code) = self.comp(vmap, scrutinee)?;
                let (defs_l, code_l) =
                    self.comp_closure(vmap, None, &left.param, &left.body, span)?;
                let (defs_r, code_r) =
                    self.comp_closure(vmap, None, &right.param, &right.body, span)?;
                defs.extend(defs_l);
                defs.extend(defs_r);
                code.push(Instruction::Case(inr_loc.clone()));
                code.extend(code_l);
                code.push(Instruction::Apply);
                code.push(Instruction::Goto(after_loc.clone()));
                code.push(Instruction::Label(inr_loc.label));
                code.extend(code_r);
                code.push(Instruction::Apply);
                code.push(Instruction::Label(after_loc.label));
                Ok((defs, code))
            }

            // Argument first, then function: APPLY expects `… arg clo`.
            ExprKind::App(func, arg) => {
                let (mut defs, mut code) = self.comp(vmap, arg)?;
                let (defs2, code2) = self.comp(vmap, func)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::Apply);
                Ok((defs, code))
            }

            ExprKind::Lambda(lambda) => {
                self.comp_closure(vmap, None, &lambda.param, &lambda.body, span)
            }

            // let f x = e1 in e2  ≡  (fun f -> e2) (fun x -> e1)
            ExprKind::LetFun(name, lambda, body) => {
                let (mut defs, mut code) =
                    self.comp_closure(vmap, None, &lambda.param, &lambda.body, span)?;
                let (defs2, code2) = self.comp_closure(vmap, None, name, body, span)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::Apply);
                Ok((defs, code))
            }

            // As LetFun, but the bound function's closure also captures itself
            // through STACK_LOCATION(-1).
            ExprKind::LetRecFun(name, lambda, body) => {
                let (mut defs, mut code) =
                    self.comp_closure(vmap, Some(name), &lambda.param, &lambda.body, span)?;
                let (defs2, code2) = self.comp_closure(vmap, None, name, body, span)?;
                defs.extend(defs2);
                code.extend(code2);
                code.push(Instruction::Apply);
                Ok((defs, code))
            }

            ExprKind::Try(protected, handler) => {
                let handler_loc = self.fresh_location();
                let end_loc = self.fresh_location();
                let (mut defs, protected_code) = self.comp(vmap, protected)?;
                let (defs2, handler_code) =
                    self.comp_closure(vmap, None, &handler.param, &handler.body, span)?;
                defs.extend(defs2);
                let mut code = vec![Instruction::Try(handler_loc.clone())];
                code.extend(protected_code);
                code.push(Instruction::UnTry);
                code.push(Instruction::Goto(end_loc.clone()));
                code.push(Instruction::Label(handler_loc.label));
                code.extend(handler_code);
                code.push(Instruction::Apply);
                code.push(Instruction::Label(end_loc.label));
                Ok((defs, code))
            }

            ExprKind::Raise(e) => self.comp_postfix(vmap, e, Instruction::Raise),
        }
    }

    /// Common shape for the one-operand forms: `⟦e⟧; instr`.
    fn comp_postfix(
        &mut self,
        vmap: &VMap,
        operand: &Expr,
        instruction: Instruction,
    ) -> CompileResult<Streams> {
        let (defs, mut code) = self.comp(vmap, operand)?;
        code.push(instruction);
        Ok((defs, code))
    }

    /// Closure construction for `fun param -> body` (or a recursive function
    /// when `recursive` names it).
    ///
    /// The main stream looks up every free variable of the body — in
    /// *reversed* order, so that `fvᵢ` lands at `sp - i` — and then executes
    /// `MK_CLOSURE(entry, n)`.  The body itself goes to the defs stream under
    /// a fresh entry label, compiled in a fresh vmap:
    ///
    /// - `param` ↦ `STACK_LOCATION(-2)` (the argument below the closure),
    /// - the function itself ↦ `STACK_LOCATION(-1)` when recursive,
    /// - `fvᵢ` ↦ `HEAP_LOCATION(i)` (1-indexed payload slots).
    fn comp_closure(
        &mut self,
        vmap: &VMap,
        recursive: Option<&str>,
        param: &str,
        body: &Expr,
        span: Span,
    ) -> CompileResult<Streams> {
        let mut bound = vec![param.to_string()];
        if let Some(name) = recursive {
            bound.push(name.to_string());
        }
        let fvars = free_vars(&bound, body);
        let entry = self.fresh_location();

        let mut code = Vec::new();
        for fv in fvars.iter().rev() {
            let path = self.lookup(vmap, fv, span)?;
            code.push(Instruction::Lookup(path));
        }
        code.push(Instruction::MkClosure(entry.clone(), fvars.len()));

        // The body sees only its argument, itself (if recursive), and its
        // captured free variables; the param entry is pushed last so it
        // shadows a same-named recursive binding.
        let mut inner: VMap = Vec::new();
        if let Some(name) = recursive {
            inner.push((name.to_string(), ValuePath::StackLocation(-1)));
        }
        inner.push((param.to_string(), ValuePath::StackLocation(-2)));
        for (i, fv) in fvars.iter().enumerate() {
            inner.push((fv.clone(), ValuePath::HeapLocation(i + 1)));
        }

        let (body_defs, body_code) = self.comp(&inner, body)?;
        let mut defs = vec![Instruction::Label(entry.label)];
        defs.extend(body_code);
        defs.push(Instruction::Return);
        defs.extend(body_defs);

        Ok((defs, code))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use crate::lexer::lex;
    use crate::parser::parse_tokens;

    fn compile_src(src: &str) -> Vec<Instruction> {
        let (tokens, errors) = lex(src);
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        let expr = parse_tokens(tokens).expect("parse failed");
        compile(&expr).expect("compile failed")
    }

    #[test]
    fn test_compile_arithmetic() {
        assert_eq!(
            compile_src("1 + 2"),
            vec![
                Instruction::Push(StackItem::Int(1)),
                Instruction::Push(StackItem::Int(2)),
                Instruction::Oper(BinOp::Add),
                Instruction::Halt,
            ]
        );
    }

    #[test]
    fn test_compile_if_shape() {
        let listing = compile_src("if true then 1 else 2");
        assert_eq!(
            listing,
            vec![
                Instruction::Push(StackItem::Bool(true)),
                Instruction::Test(Location::new("L0")),
                Instruction::Push(StackItem::Int(1)),
                Instruction::Goto(Location::new("L1")),
                Instruction::Label("L0".into()),
                Instruction::Push(StackItem::Int(2)),
                Instruction::Label("L1".into()),
                Instruction::Halt,
            ]
        );
    }

    #[test]
    fn test_compile_while_pushes_unit() {
        let listing = compile_src("while false do 1");
        let halt_at = listing
            .iter()
            .position(|i| *i == Instruction::Halt)
            .unwrap();
        // The instruction immediately before HALT is the loop's unit result.
        assert_eq!(listing[halt_at - 1], Instruction::Push(StackItem::Unit));
        assert!(listing.contains(&Instruction::Pop));
    }

    #[test]
    fn test_lambda_body_lands_after_halt() {
        let listing = compile_src("fun x -> x + 1");
        let halt_at = listing
            .iter()
            .position(|i| *i == Instruction::Halt)
            .unwrap();
        // Main stream: build the closure, halt.
        assert_eq!(listing[0], Instruction::MkClosure(Location::new("L0"), 0));
        assert_eq!(halt_at, 1);
        // Defs stream: label, body, return.
        assert_eq!(listing[2], Instruction::Label("L0".into()));
        assert_eq!(
            listing[3],
            Instruction::Lookup(ValuePath::StackLocation(-2))
        );
        assert_eq!(*listing.last().unwrap(), Instruction::Return);
    }

    #[test]
    fn test_free_variables_captured_in_reverse_order() {
        // In `fun x -> a + b`, the free variables are [a, b]; the main stream
        // must look up b first so that a ends at sp - 1.
        let listing = compile_src("let a = 1 in let b = 2 in fun x -> a + b");
        let mk = listing
            .iter()
            .position(|i| matches!(i, Instruction::MkClosure(_, 2)))
            .expect("no 2-capture closure found");
        // b is bound innermost: STACK_LOCATION(-2) of the `let b` frame;
        // a was already captured by that frame: HEAP_LOCATION(1).
        assert_eq!(
            listing[mk - 2],
            Instruction::Lookup(ValuePath::StackLocation(-2))
        );
        assert_eq!(
            listing[mk - 1],
            Instruction::Lookup(ValuePath::HeapLocation(1))
        );
    }

    #[test]
    fn test_letrec_binds_self_at_minus_one() {
        let listing = compile_src("let rec f n = if n = 0 then 0 else f (n - 1) in f 3");
        // The recursive call inside the body resolves f to STACK_LOCATION(-1).
        assert!(listing
            .iter()
            .any(|i| *i == Instruction::Lookup(ValuePath::StackLocation(-1))));
    }

    #[test]
    fn test_try_shape() {
        let listing = compile_src("try 1 with e -> e");
        assert!(matches!(listing[0], Instruction::Try(_)));
        assert!(listing.contains(&Instruction::UnTry));
        // Handler closure is applied in the exceptional path.
        assert!(listing.contains(&Instruction::Apply));
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        let (tokens, _) = lex("x + 1");
        let expr = parse_tokens(tokens).unwrap();
        let err = compile(&expr).unwrap_err();
        assert!(err.message.contains("unknown identifier `x`"));
    }

    #[test]
    fn test_compilation_is_reproducible() {
        let (tokens, _) = lex("let rec fact n = if n = 0 then 1 else n * fact (n - 1) in fact 5");
        let expr = parse_tokens(tokens).unwrap();
        let mut compiler = Compiler::new();
        let first = compiler.compile(&expr).unwrap();
        let second = compiler.compile(&expr).unwrap();
        // The label counter resets per compilation, so listings are equal.
        assert_eq!(first, second);
    }
}
