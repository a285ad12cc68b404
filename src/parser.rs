//! Recursive-descent parser for the Slang language.
//!
//! The [`Parser`] consumes the token stream produced by the
//! [`lexer`](crate::lexer) and builds an [`Expr`] tree.  Binary operators are
//! handled with an explicit precedence ladder, one function per level
//! (loosest to tightest):
//!
//!   assign → or → and → cmp → add → mul → unary → application → atom
//!
//! Keyword-introduced forms (`fun`, `let`, `if`, `while`, `case`, `try`,
//! `raise`) sit above the ladder and may appear wherever a full expression is
//! expected.
//!
//! # Desugarings performed here
//!
//! - `let x = e1 in e2` (no parameters) becomes `App(Lambda(x, e2), e1)`.
//! - `let f x y = e1 in e2` curries into `LetFun(f, Lambda(x, fun y -> e1), e2)`;
//!   `fun x y -> e` and `let rec f x y = e1 in e2` curry the same way.
//! - `?` becomes `Unary(Read, ())`.
//!
//! The parser stops at the first error; at this grammar size there are no
//! useful recovery points.

use crate::ast::{BinOp, Expr, ExprKind, Lambda, UnaryOp};
use crate::token::{Span, Token, TokenKind};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A parse error: what went wrong and where.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.span, self.message)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a full token stream (as produced by [`crate::lexer::lex`]) into a
/// single expression.  The stream must contain exactly one expression
/// followed by `Eof`.
pub fn parse_tokens(tokens: Vec<Token>) -> ParseResult<Expr> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    let trailing = parser.current();
    if !trailing.is_eof() {
        return Err(ParseError {
            message: format!("expected end of input, found `{}`", trailing.kind),
            span: trailing.span,
        });
    }
    Ok(expr)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // ── Token-stream helpers ─────────────────────────────────────────────────

    /// The current (unconsumed) token.  The `Eof` sentinel guarantees there
    /// is always one.
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    /// Consume and return the current token.
    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    /// Consume the current token if it matches `kind`.
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume the current token, requiring it to match `kind`.
    fn expect(&mut self, kind: &TokenKind, context: &str) -> ParseResult<Token> {
        if self.kind() == kind {
            Ok(self.advance())
        } else {
            Err(ParseError {
                message: format!(
                    "expected `{}` {}, found `{}`",
                    kind,
                    context,
                    self.kind()
                ),
                span: self.current().span,
            })
        }
    }

    /// Consume an identifier token and return its name.
    fn expect_ident(&mut self, context: &str) -> ParseResult<(String, Span)> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            other => Err(ParseError {
                message: format!("expected an identifier {context}, found `{other}`"),
                span: self.current().span,
            }),
        }
    }

    /// Can the current token begin an atom?  Used to detect application
    /// arguments (`f x y` is juxtaposition).
    fn at_atom_start(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Int(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Ident(_)
                | TokenKind::Question
                | TokenKind::LParen
        )
    }

    // ── Expression forms ─────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        match self.kind() {
            TokenKind::Fun => self.parse_fun(),
            TokenKind::Let => self.parse_let(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Case => self.parse_case(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Raise => self.parse_raise(),
            _ => self.parse_assign(),
        }
    }

    /// `fun x y ... -> e`
    fn parse_fun(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `fun`
        let mut params = vec![self.expect_ident("after `fun`")?.0];
        while matches!(self.kind(), TokenKind::Ident(_)) {
            params.push(self.expect_ident("as a parameter")?.0);
        }
        self.expect(&TokenKind::Arrow, "after `fun` parameters")?;
        let body = self.parse_expr()?;
        let span = start.merge(body.span);
        Ok(curry(params, body, span))
    }

    /// `let [rec] name params* = e1 in e2`
    fn parse_let(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `let`
        let recursive = self.eat(&TokenKind::Rec);
        let (name, name_span) = self.expect_ident("after `let`")?;

        let mut params = Vec::new();
        while matches!(self.kind(), TokenKind::Ident(_)) {
            params.push(self.expect_ident("as a parameter")?.0);
        }

        self.expect(&TokenKind::Eq, "in `let` binding")?;
        let bound = self.parse_expr()?;
        self.expect(&TokenKind::In, "after `let` binding")?;
        let body = self.parse_expr()?;
        let span = start.merge(body.span);

        if recursive {
            if params.is_empty() {
                return Err(ParseError {
                    message: format!("`let rec {name}` must bind a function (missing parameters)"),
                    span: name_span,
                });
            }
            let lambda = curry_lambda(params, bound);
            return Ok(Expr::new(
                ExprKind::LetRecFun(name, lambda, Box::new(body)),
                span,
            ));
        }

        if params.is_empty() {
            // let x = e1 in e2  ≡  (fun x -> e2) e1
            let binder = Expr::new(
                ExprKind::Lambda(Lambda {
                    param: name,
                    body: Box::new(body),
                }),
                span,
            );
            return Ok(Expr::new(
                ExprKind::App(Box::new(binder), Box::new(bound)),
                span,
            ));
        }

        let lambda = curry_lambda(params, bound);
        Ok(Expr::new(
            ExprKind::LetFun(name, lambda, Box::new(body)),
            span,
        ))
    }

    /// `if e1 then e2 else e3`
    fn parse_if(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `if`
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Then, "after `if` condition")?;
        let then_branch = self.parse_expr()?;
        self.expect(&TokenKind::Else, "after `then` branch")?;
        let else_branch = self.parse_expr()?;
        let span = start.merge(else_branch.span);
        Ok(Expr::new(
            ExprKind::If(
                Box::new(cond),
                Box::new(then_branch),
                Box::new(else_branch),
            ),
            span,
        ))
    }

    /// `while e1 do e2`
    fn parse_while(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `while`
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Do, "after `while` condition")?;
        let body = self.parse_expr()?;
        let span = start.merge(body.span);
        Ok(Expr::new(
            ExprKind::While(Box::new(cond), Box::new(body)),
            span,
        ))
    }

    /// `case e of inl x -> e1 | inr y -> e2`
    fn parse_case(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `case`
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::Of, "after `case` scrutinee")?;

        self.expect(&TokenKind::Inl, "to open the first `case` arm")?;
        let (left_param, _) = self.expect_ident("after `inl`")?;
        self.expect(&TokenKind::Arrow, "in `case` arm")?;
        let left_body = self.parse_expr()?;

        self.expect(&TokenKind::Bar, "between `case` arms")?;
        self.expect(&TokenKind::Inr, "to open the second `case` arm")?;
        let (right_param, _) = self.expect_ident("after `inr`")?;
        self.expect(&TokenKind::Arrow, "in `case` arm")?;
        let right_body = self.parse_expr()?;

        let span = start.merge(right_body.span);
        Ok(Expr::new(
            ExprKind::Case(
                Box::new(scrutinee),
                Lambda {
                    param: left_param,
                    body: Box::new(left_body),
                },
                Lambda {
                    param: right_param,
                    body: Box::new(right_body),
                },
            ),
            span,
        ))
    }

    /// `try e1 with x -> e2`
    fn parse_try(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `try`
        let protected = self.parse_expr()?;
        self.expect(&TokenKind::With, "after `try` body")?;
        let (param, _) = self.expect_ident("after `with`")?;
        self.expect(&TokenKind::Arrow, "in `try` handler")?;
        let handler_body = self.parse_expr()?;
        let span = start.merge(handler_body.span);
        Ok(Expr::new(
            ExprKind::Try(
                Box::new(protected),
                Lambda {
                    param,
                    body: Box::new(handler_body),
                },
            ),
            span,
        ))
    }

    /// `raise e`
    fn parse_raise(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `raise`
        let value = self.parse_expr()?;
        let span = start.merge(value.span);
        Ok(Expr::new(ExprKind::Raise(Box::new(value)), span))
    }

    // ── Operator precedence ladder ───────────────────────────────────────────

    /// `e1 := e2` (right-associative, loosest binary operator).
    fn parse_assign(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_or()?;
        if self.eat(&TokenKind::Assign) {
            let rhs = self.parse_expr()?;
            let span = lhs.span.merge(rhs.span);
            return Ok(Expr::new(
                ExprKind::Assign(Box::new(lhs), Box::new(rhs)),
                span,
            ));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Op(Box::new(lhs), BinOp::Or, Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.parse_cmp()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Op(Box::new(lhs), BinOp::And, Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    /// `=` and `<` are non-associative.  The parser emits `=` as [`BinOp::EqI`];
    /// the type checker retags boolean comparisons.
    fn parse_cmp(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.kind() {
            TokenKind::Eq => BinOp::EqI,
            TokenKind::Lt => BinOp::Lt,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        let span = lhs.span.merge(rhs.span);
        Ok(Expr::new(ExprKind::Op(Box::new(lhs), op, Box::new(rhs)), span))
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Op(Box::new(lhs), op, Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Op(Box::new(lhs), op, Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    /// Prefix operators: `not`, unary `-`, `fst`, `snd`, `inl`, `inr`, `ref`, `!`.
    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let wrap = |kind: fn(Box<Expr>) -> ExprKind, start: Span, operand: Expr| {
            let span = start.merge(operand.span);
            Expr::new(kind(Box::new(operand)), span)
        };

        match self.kind() {
            TokenKind::Not => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary(UnaryOp::Not, Box::new(operand)),
                    span,
                ))
            }
            TokenKind::Minus => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary(UnaryOp::Neg, Box::new(operand)),
                    span,
                ))
            }
            TokenKind::Fst => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Fst, start, operand))
            }
            TokenKind::Snd => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Snd, start, operand))
            }
            TokenKind::Inl => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Inl, start, operand))
            }
            TokenKind::Inr => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Inr, start, operand))
            }
            TokenKind::Ref => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Ref, start, operand))
            }
            TokenKind::Bang => {
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                Ok(wrap(ExprKind::Deref, start, operand))
            }
            _ => self.parse_app(),
        }
    }

    /// Left-associative juxtaposition: `f x y` is `App(App(f, x), y)`.
    fn parse_app(&mut self) -> ParseResult<Expr> {
        let mut func = self.parse_atom()?;
        while self.at_atom_start() {
            let arg = self.parse_atom()?;
            let span = func.span.merge(arg.span);
            func = Expr::new(ExprKind::App(Box::new(func), Box::new(arg)), span);
        }
        Ok(func)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        match self.kind().clone() {
            TokenKind::Int(n) => {
                let span = self.advance().span;
                Ok(Expr::new(ExprKind::Integer(n), span))
            }
            TokenKind::True => {
                let span = self.advance().span;
                Ok(Expr::new(ExprKind::Boolean(true), span))
            }
            TokenKind::False => {
                let span = self.advance().span;
                Ok(Expr::new(ExprKind::Boolean(false), span))
            }
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok(Expr::new(ExprKind::Var(name), span))
            }
            TokenKind::Question => {
                // `?` reads one integer: READ applied to a synthetic unit.
                let span = self.advance().span;
                let unit = Expr::new(ExprKind::Unit, span);
                Ok(Expr::new(
                    ExprKind::Unary(UnaryOp::Read, Box::new(unit)),
                    span,
                ))
            }
            TokenKind::LParen => self.parse_parenthesized(),
            other => Err(ParseError {
                message: format!("expected an expression, found `{other}`"),
                span: self.current().span,
            }),
        }
    }

    /// Disambiguate the `(`-introduced forms: unit `()`, grouping `(e)`,
    /// pair `(e1, e2)`, and sequence `(e1; ...; en)`.
    fn parse_parenthesized(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span; // `(`

        if self.kind() == &TokenKind::RParen {
            let end = self.advance().span;
            return Ok(Expr::new(ExprKind::Unit, start.merge(end)));
        }

        let first = self.parse_expr()?;

        if self.eat(&TokenKind::Comma) {
            let second = self.parse_expr()?;
            let end = self.expect(&TokenKind::RParen, "to close the pair")?.span;
            return Ok(Expr::new(
                ExprKind::Pair(Box::new(first), Box::new(second)),
                start.merge(end),
            ));
        }

        if self.kind() == &TokenKind::Semicolon {
            let mut exprs = vec![first];
            while self.eat(&TokenKind::Semicolon) {
                exprs.push(self.parse_expr()?);
            }
            let end = self
                .expect(&TokenKind::RParen, "to close the sequence")?
                .span;
            return Ok(Expr::new(ExprKind::Seq(exprs), start.merge(end)));
        }

        self.expect(&TokenKind::RParen, "to close the expression")?;
        Ok(first)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Currying helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Build `fun p1 -> fun p2 -> ... -> body` as an expression.
fn curry(params: Vec<String>, body: Expr, span: Span) -> Expr {
    let lambda = curry_lambda(params, body);
    Expr::new(ExprKind::Lambda(lambda), span)
}

/// Build the [`Lambda`] for `p1` whose body nests the remaining parameters.
fn curry_lambda(mut params: Vec<String>, body: Expr) -> Lambda {
    let first = params.remove(0);
    let body = params.into_iter().rev().fold(body, |acc, param| {
        let span = acc.span;
        Expr::new(
            ExprKind::Lambda(Lambda {
                param,
                body: Box::new(acc),
            }),
            span,
        )
    });
    Lambda {
        param: first,
        body: Box::new(body),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse(src: &str) -> Expr {
        let (tokens, errors) = lex(src);
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        parse_tokens(tokens).expect("parse failed")
    }

    #[test]
    fn test_precedence_mul_over_add() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        let e = parse("1 + 2 * 3");
        let ExprKind::Op(lhs, BinOp::Add, rhs) = e.kind else {
            panic!("expected Add at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Integer(1)));
        assert!(matches!(rhs.kind, ExprKind::Op(_, BinOp::Mul, _)));
    }

    #[test]
    fn test_cmp_binds_looser_than_add() {
        let e = parse("n = 0");
        assert!(matches!(e.kind, ExprKind::Op(_, BinOp::EqI, _)));
        let e = parse("1 + 2 < 4");
        assert!(matches!(e.kind, ExprKind::Op(_, BinOp::Lt, _)));
    }

    #[test]
    fn test_application_is_left_associative() {
        let e = parse("f x y");
        let ExprKind::App(inner, arg_y) = e.kind else {
            panic!("expected App at the root");
        };
        assert!(matches!(arg_y.kind, ExprKind::Var(ref v) if v == "y"));
        assert!(matches!(inner.kind, ExprKind::App(_, _)));
    }

    #[test]
    fn test_let_value_desugars_to_application() {
        // let x = 1 in x  ≡  (fun x -> x) 1
        let e = parse("let x = 1 in x");
        let ExprKind::App(func, arg) = e.kind else {
            panic!("expected App at the root");
        };
        assert!(matches!(func.kind, ExprKind::Lambda(_)));
        assert!(matches!(arg.kind, ExprKind::Integer(1)));
    }

    #[test]
    fn test_let_fun_and_currying() {
        let e = parse("let add x y = x + y in add 1 2");
        let ExprKind::LetFun(name, lambda, _) = e.kind else {
            panic!("expected LetFun at the root");
        };
        assert_eq!(name, "add");
        assert_eq!(lambda.param, "x");
        assert!(matches!(lambda.body.kind, ExprKind::Lambda(ref inner) if inner.param == "y"));
    }

    #[test]
    fn test_let_rec_requires_parameters() {
        let (tokens, _) = lex("let rec x = 1 in x");
        let err = parse_tokens(tokens).unwrap_err();
        assert!(err.message.contains("must bind a function"));
    }

    #[test]
    fn test_let_rec_parses() {
        let e = parse("let rec fact n = if n = 0 then 1 else n * fact (n - 1) in fact 5");
        assert!(matches!(e.kind, ExprKind::LetRecFun(ref f, _, _) if f == "fact"));
    }

    #[test]
    fn test_unit_pair_seq_grouping() {
        assert!(matches!(parse("()").kind, ExprKind::Unit));
        assert!(matches!(parse("(1, 2)").kind, ExprKind::Pair(_, _)));
        let ExprKind::Seq(exprs) = parse("(1; 2; 3)").kind else {
            panic!("expected Seq");
        };
        assert_eq!(exprs.len(), 3);
        assert!(matches!(parse("(1 + 2)").kind, ExprKind::Op(_, _, _)));
    }

    #[test]
    fn test_case_form() {
        let e = parse("case inr 9 of inl x -> x + 1 | inr y -> y - 1");
        let ExprKind::Case(scrutinee, left, right) = e.kind else {
            panic!("expected Case");
        };
        assert!(matches!(scrutinee.kind, ExprKind::Inr(_)));
        assert_eq!(left.param, "x");
        assert_eq!(right.param, "y");
    }

    #[test]
    fn test_try_and_raise() {
        let e = parse("try (raise 7) + 100 with e -> e * 2");
        let ExprKind::Try(protected, handler) = e.kind else {
            panic!("expected Try");
        };
        assert!(matches!(protected.kind, ExprKind::Op(_, BinOp::Add, _)));
        assert_eq!(handler.param, "e");
    }

    #[test]
    fn test_read_form() {
        let e = parse("? + ?");
        let ExprKind::Op(lhs, BinOp::Add, _) = e.kind else {
            panic!("expected Add");
        };
        assert!(matches!(lhs.kind, ExprKind::Unary(UnaryOp::Read, _)));
    }

    #[test]
    fn test_deref_binds_tighter_than_cmp() {
        // !i < 11 parses as (!i) < 11.
        let e = parse("!i < 11");
        let ExprKind::Op(lhs, BinOp::Lt, _) = e.kind else {
            panic!("expected Lt at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Deref(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let (tokens, _) = lex("1 2");
        // `1 2` is an application of a non-function, but that is the type
        // checker's problem; `1 )` on the other hand is a parse error.
        assert!(parse_tokens(tokens).is_ok());
        let (tokens, _) = lex("1 )");
        assert!(parse_tokens(tokens).is_err());
    }
}
