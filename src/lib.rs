//! The Slang compiler and Jargon virtual machine library.
//!
//! This crate provides the complete Slang pipeline:
//!
//! 1. **Lexer** (`lexer`) — tokenises source text into a flat `Vec<Token>`.
//! 2. **Parser** (`parser`) — builds an [`ast::Expr`] from the token stream.
//! 3. **Type checker** (`typechecker`) — monomorphic unification inference.
//! 4. **Compiler** (`compiler`) — lowers the AST to a flat instruction
//!    listing (`main ++ HALT ++ defs`).
//! 5. **Loader** (`loader`) — resolves labels into an executable code array.
//! 6. **VM** (`vm`) — the Jargon machine: tagged stack and heap arrays, a
//!    register set, and a step function.
//! 7. **Values** (`value`) — stack/heap cell types and decoded results.
//!
//! # Entry point
//!
//! The simplest way to run a Slang program from Rust is:
//!
//! ```rust,ignore
//! use jargon::{config::Config, vm::StdinInput};
//! let value = jargon::run_source("1 + 2 * 3", &Config::default(), &mut StdinInput)?;
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod token;
pub mod typechecker;
pub mod value;
pub mod vm;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

use crate::bytecode::Instruction;
use crate::compiler::CompileError;
use crate::config::Config;
use crate::lexer::LexError;
use crate::loader::LoadError;
use crate::parser::ParseError;
use crate::typechecker::TypeError;
use crate::value::Value;
use crate::vm::{Input, RuntimeError, Status, Vm};

/// The unified error type for all pipeline stages.
///
/// Each variant wraps errors from the corresponding stage so that callers can
/// handle them uniformly or match on the specific stage.
#[derive(Debug, thiserror::Error)]
pub enum JargonError {
    /// One or more lexical errors.
    #[error("Lex error at {}: {}", .0.first().map(|e| e.span.to_string()).unwrap_or_default(), .0.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; "))]
    Lex(Vec<LexError>),

    /// A parse error.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A static type error.
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    /// A compile-time error (unknown identifier, malformed AST).
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A load-time error (unresolved or duplicate label).
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// A malformed-state runtime error raised by the VM.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The VM stopped with a terminal status other than `Halted`.
    #[error("VM stopped with status {0}")]
    Stopped(Status),

    /// An I/O error (file reading, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all pipeline operations.
pub type JargonResult<T> = Result<T, JargonError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Lex and parse a Slang source string, returning the expression tree.
///
/// Lex errors are promoted to [`JargonError`] if non-empty; parsing is not
/// attempted on a stream with lex errors.
pub fn parse_source(src: &str) -> JargonResult<ast::Expr> {
    let (tokens, lex_errors) = lexer::lex(src);
    if !lex_errors.is_empty() {
        return Err(JargonError::Lex(lex_errors));
    }
    Ok(parser::parse_tokens(tokens)?)
}

/// Parse, type-check, and compile a source string into a listing.
///
/// The type checker runs before the compiler both to reject ill-typed
/// programs and to retag `=` into the integer/boolean variant the VM
/// expects.
pub fn compile_source(src: &str) -> JargonResult<Vec<Instruction>> {
    let mut expr = parse_source(src)?;
    typechecker::check(&mut expr)?;
    Ok(compiler::compile(&expr)?)
}

/// Full pipeline: lex → parse → typecheck → compile → load → run → decode.
///
/// `input` feeds the `READ` primitive.  Under `config.verbose` the compiled
/// listing and every VM step are traced to stderr.
pub fn run_source(src: &str, config: &Config, input: &mut dyn Input) -> JargonResult<Value> {
    let listing = compile_source(src)?;
    if config.verbose {
        eprintln!("{}", bytecode::listing_to_string("listing", &listing));
    }
    let code = loader::load(&listing)?;
    let mut machine = Vm::new(code, config, input);
    let status = machine.run()?;
    if status != Status::Halted {
        return Err(JargonError::Stopped(status));
    }
    Ok(machine.result_value()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::ScriptedInput;

    fn run(src: &str) -> Value {
        let mut input = ScriptedInput::default();
        run_source(src, &Config::default(), &mut input).expect("pipeline failed")
    }

    // The eight end-to-end scenarios.

    #[test]
    fn test_scenario_arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Value::Int(7));
    }

    #[test]
    fn test_scenario_conditional_projection() {
        assert_eq!(run("if 3 < 4 then fst (1, 2) else snd (1, 2)"), Value::Int(1));
    }

    #[test]
    fn test_scenario_higher_order_function() {
        assert_eq!(run("let f = fun x -> x + 1 in f (f 10)"), Value::Int(12));
    }

    #[test]
    fn test_scenario_factorial() {
        assert_eq!(
            run("let rec fact n = if n = 0 then 1 else n * fact (n - 1) in fact 5"),
            Value::Int(120)
        );
    }

    #[test]
    fn test_scenario_references() {
        assert_eq!(
            run("let r = ref 0 in (r := !r + 41; r := !r + 1; !r)"),
            Value::Int(42)
        );
    }

    #[test]
    fn test_scenario_exceptions() {
        assert_eq!(run("try (raise 7) + 100 with e -> e * 2"), Value::Int(14));
    }

    #[test]
    fn test_scenario_case_analysis() {
        assert_eq!(
            run("case inr 9 of inl x -> x + 1 | inr y -> y - 1"),
            Value::Int(8)
        );
    }

    #[test]
    fn test_scenario_while_sum() {
        assert_eq!(
            run("let r = ref 0 in let i = ref 1 in \
                 (while !i < 11 do (r := !r + !i; i := !i + 1); !r)"),
            Value::Int(55)
        );
    }

    // Pipeline-level properties.

    #[test]
    fn test_determinism_without_read() {
        let src = "let rec fib n = if n < 2 then n else fib (n - 1) + fib (n - 2) in fib 10";
        let listings = (compile_source(src).unwrap(), compile_source(src).unwrap());
        assert_eq!(listings.0, listings.1);
        assert_eq!(run(src), run(src));
        assert_eq!(run(src), Value::Int(55));
    }

    #[test]
    fn test_read_threads_through_pipeline() {
        let mut input = ScriptedInput::new([20, 22]);
        let value = run_source("? + ?", &Config::default(), &mut input).unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_stage_errors_surface() {
        let mut input = ScriptedInput::default();
        let config = Config::default();

        let err = run_source("1 $ 2", &config, &mut input).unwrap_err();
        assert!(matches!(err, JargonError::Lex(_)));

        let err = run_source("let = 3 in x", &config, &mut input).unwrap_err();
        assert!(matches!(err, JargonError::Parse(_)));

        let err = run_source("1 + true", &config, &mut input).unwrap_err();
        assert!(matches!(err, JargonError::Type(_)));

        let err = run_source("raise 1", &config, &mut input).unwrap_err();
        assert!(matches!(err, JargonError::Runtime(_)));
    }

    #[test]
    fn test_capacity_exhaustion_reports_status() {
        let mut input = ScriptedInput::default();
        let config = Config {
            heap_max: 2,
            ..Config::default()
        };
        let err = run_source("(ref 1, ref 2)", &config, &mut input).unwrap_err();
        assert!(matches!(
            err,
            JargonError::Stopped(Status::HeapIndexOutOfBound)
        ));
    }

    #[test]
    fn test_decoded_display_forms() {
        assert_eq!(run("(1, inl true)").to_string(), "(1, inl(true))");
        assert_eq!(run("()").to_string(), "()");
        assert_eq!(run("fun x -> x").to_string(), "CLOSURE");
    }
}
