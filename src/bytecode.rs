//! Instruction set for the Jargon virtual machine.
//!
//! A compiled Slang program is a flat `Vec<Instruction>` — the *listing*:
//! the main stream, a `HALT`, then every function body (reached only through
//! labels).  Control-transfer instructions carry a [`Location`]: a textual
//! label plus, after loading, its resolved code index.
//!
//! The instruction set is the contract between the compiler and the VM;
//! either side can be reimplemented independently against it.  Stack effects
//! are documented per variant with the top of the stack on the right.

use std::fmt;

use crate::ast::{BinOp, UnaryOp};
use crate::value::StackItem;

// ─────────────────────────────────────────────────────────────────────────────
// Labels and locations
// ─────────────────────────────────────────────────────────────────────────────

/// A control-flow label, compared by equality.  The compiler emits fresh
/// labels `L0, L1, …` per compilation session.
pub type Label = String;

/// A labelled code position.  `address` is `None` as emitted by the compiler
/// and `Some(code index)` after the loader resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub label: Label,
    pub address: Option<usize>,
}

impl Location {
    /// A fresh, unresolved location for `label`.
    pub fn new(label: impl Into<Label>) -> Self {
        Self {
            label: label.into(),
            address: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{}@{}", self.label, addr),
            None => write!(f, "{}", self.label),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value paths
// ─────────────────────────────────────────────────────────────────────────────

/// The compile-time address of a variable, resolved by `LOOKUP` at runtime
/// relative to the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePath {
    /// The stack cell at `fp + offset`.  The argument of the current call
    /// sits at `-2`; the invoked closure itself at `-1`.
    StackLocation(i64),
    /// Payload cell `offset + 1` inside the closure block pointed to by the
    /// stack cell at `fp - 1`.  Free variables are numbered from 1.
    HeapLocation(usize),
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePath::StackLocation(off) => write!(f, "STACK_LOCATION({off})"),
            ValuePath::HeapLocation(off) => write!(f, "HEAP_LOCATION({off})"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instructions
// ─────────────────────────────────────────────────────────────────────────────

/// One Jargon VM instruction.
///
/// Every instruction occupies exactly one slot of the code array, `LABEL`
/// included (it is a runtime no-op kept for the loader).
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // ── Arithmetic / logic ───────────────────────────────────────────────────
    /// `… → … v` — push a literal (`INT`, `BOOL`, or `UNIT`).
    Push(StackItem),
    /// `… v → … op(v)`
    Unary(UnaryOp),
    /// `… l r → … op(l, r)`
    Oper(BinOp),

    // ── Stack plumbing ───────────────────────────────────────────────────────
    /// `… a b → … b a`
    Swap,
    /// `… v → …`
    Pop,
    /// Runtime no-op; position marker consumed by the loader.
    Label(Label),

    // ── Products, sums, references ───────────────────────────────────────────
    /// `… l r → … HI` — allocate `(HEADER(3, PAIR), l, r)`.
    MkPair,
    /// `… HI → … l`
    Fst,
    /// `… HI → … r`
    Snd,
    /// `… v → … HI` — allocate `(HEADER(2, INL), v)`.
    MkInl,
    /// `… v → … HI` — allocate `(HEADER(2, INR), v)`.
    MkInr,
    /// `… HI → … payload`; jump to the target when the block is `INR`,
    /// fall through when `INL`.
    Case(Location),
    /// `… v → … HI` — allocate a single headerless cell.
    MkRef,
    /// `… HI → … heap[HI]`
    Deref,
    /// `… HI v → … UNIT` — write `v` through the reference.
    Assign,

    // ── Control flow ─────────────────────────────────────────────────────────
    /// `… b → …`; jump to the target when `b` is `false`.
    Test(Location),
    /// Unconditional jump.
    Goto(Location),
    /// Stop the machine with status `Halted`.
    Halt,

    // ── Functions ────────────────────────────────────────────────────────────
    /// `… fvₙ … fv₁ → … HI` — allocate
    /// `(HEADER(2 + n, CLOSURE), CI entry, fv₁, …, fvₙ)`, consuming the top
    /// `n` cells (`fvᵢ` is the cell at `sp - i`).
    MkClosure(Location, usize),
    /// `… arg clo → … arg clo FP RA` — enter the closure: `fp := sp`, save
    /// the caller's `fp` and return address, jump to the closure's entry.
    Apply,
    /// Unwind the current frame, dropping argument and closure, and push the
    /// return value: `… arg clo FP RA … v → … v`.
    Return,
    /// Push the value at the given [`ValuePath`].
    Lookup(ValuePath),

    // ── Exceptions ───────────────────────────────────────────────────────────
    /// Push a handler frame `EP(ep) FP(fp) RA(target)` and point `ep` at it.
    Try(Location),
    /// `… EP FP RA v → … v` — leave a protected region normally, restoring
    /// the previous `ep`.
    UnTry,
    /// `… x → ` — unwind to the frame at `ep`, restore its registers, and
    /// push `x` for the handler.
    Raise,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Push(v) => write!(f, "PUSH {v}"),
            Instruction::Unary(op) => write!(f, "UNARY {op}"),
            Instruction::Oper(op) => write!(f, "OPER {op}"),
            Instruction::Swap => write!(f, "SWAP"),
            Instruction::Pop => write!(f, "POP"),
            Instruction::Label(l) => write!(f, "LABEL {l}"),
            Instruction::MkPair => write!(f, "MK_PAIR"),
            Instruction::Fst => write!(f, "FST"),
            Instruction::Snd => write!(f, "SND"),
            Instruction::MkInl => write!(f, "MK_INL"),
            Instruction::MkInr => write!(f, "MK_INR"),
            Instruction::Case(loc) => write!(f, "CASE {loc}"),
            Instruction::MkRef => write!(f, "MK_REF"),
            Instruction::Deref => write!(f, "DEREF"),
            Instruction::Assign => write!(f, "ASSIGN"),
            Instruction::Test(loc) => write!(f, "TEST {loc}"),
            Instruction::Goto(loc) => write!(f, "GOTO {loc}"),
            Instruction::Halt => write!(f, "HALT"),
            Instruction::MkClosure(loc, n) => write!(f, "MK_CLOSURE({loc}, {n})"),
            Instruction::Apply => write!(f, "APPLY"),
            Instruction::Return => write!(f, "RETURN"),
            Instruction::Lookup(path) => write!(f, "LOOKUP {path}"),
            Instruction::Try(loc) => write!(f, "TRY {loc}"),
            Instruction::UnTry => write!(f, "UNTRY"),
            Instruction::Raise => write!(f, "RAISE"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing pretty-printer
// ─────────────────────────────────────────────────────────────────────────────

/// Render a listing to a human-readable string, one numbered instruction per
/// line.  Used by the verbose driver and by tests; not used in normal
/// execution.
pub fn listing_to_string(name: &str, listing: &[Instruction]) -> String {
    let mut out = format!("=== {name} ===\n");
    for (i, instruction) in listing.iter().enumerate() {
        out.push_str(&format!("{i:4}: {instruction}\n"));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_display() {
        assert_eq!(Instruction::Push(StackItem::Int(7)).to_string(), "PUSH INT 7");
        assert_eq!(Instruction::Oper(BinOp::Add).to_string(), "OPER ADD");
        assert_eq!(
            Instruction::Lookup(ValuePath::StackLocation(-2)).to_string(),
            "LOOKUP STACK_LOCATION(-2)"
        );
        assert_eq!(
            Instruction::MkClosure(Location::new("L3"), 2).to_string(),
            "MK_CLOSURE(L3, 2)"
        );
    }

    #[test]
    fn test_location_display_tracks_resolution() {
        let mut loc = Location::new("L1");
        assert_eq!(loc.to_string(), "L1");
        loc.address = Some(17);
        assert_eq!(loc.to_string(), "L1@17");
    }

    #[test]
    fn test_listing_to_string_smoke() {
        let listing = vec![
            Instruction::Push(StackItem::Int(1)),
            Instruction::Push(StackItem::Int(2)),
            Instruction::Oper(BinOp::Add),
            Instruction::Halt,
        ];
        let text = listing_to_string("main", &listing);
        assert!(text.contains("=== main ==="));
        assert!(text.contains("   2: OPER ADD"));
        assert!(text.contains("   3: HALT"));
    }
}
