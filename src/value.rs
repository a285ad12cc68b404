//! Runtime data representation for the Jargon VM.
//!
//! The VM owns three arrays: the stack, the heap, and the code.  This module
//! defines the cell types of the first two, plus the [`Value`] type the
//! driver decodes a final result into.
//!
//! | Type | Lives in | Cells |
//! |------|----------|-------|
//! | [`StackItem`] | the stack | scalars, heap pointers, saved registers |
//! | [`HeapItem`] | the heap | scalars, heap/code pointers, block headers |
//! | [`Value`] | decoded results | fully-materialised trees |
//!
//! # Invariants
//!
//! - The stack never holds a `Header`; the heap never holds a saved
//!   `FramePointer` / `ExceptionPointer` / `ReturnAddress`.
//! - A `Header(n, kind)` begins an `n`-cell block: the header itself followed
//!   by `n - 1` payload cells.  No heap cell outside such a block is read,
//!   except single-cell reference cells, which carry no header.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Stack items
// ─────────────────────────────────────────────────────────────────────────────

/// One cell of the VM stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackItem {
    Int(i64),
    Bool(bool),
    Unit,
    /// A pointer into the heap.
    HeapIndex(usize),
    /// A saved code index, pushed by `APPLY` and `TRY`.
    ReturnAddress(usize),
    /// A saved frame pointer, pushed by `APPLY` and `TRY`.
    FramePointer(usize),
    /// A saved exception pointer, pushed by `TRY`.
    ExceptionPointer(usize),
}

impl fmt::Display for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackItem::Int(n) => write!(f, "INT {n}"),
            StackItem::Bool(b) => write!(f, "BOOL {b}"),
            StackItem::Unit => write!(f, "UNIT"),
            StackItem::HeapIndex(h) => write!(f, "HI {h}"),
            StackItem::ReturnAddress(c) => write!(f, "RA {c}"),
            StackItem::FramePointer(s) => write!(f, "FP {s}"),
            StackItem::ExceptionPointer(s) => write!(f, "EP {s}"),
        }
    }
}

impl StackItem {
    /// Convert a stack cell into a heap cell.
    ///
    /// Saved registers never move to the heap; attempting to store one is a
    /// malformed-state condition reported by the caller.
    pub fn to_heap(self) -> Result<HeapItem, String> {
        match self {
            StackItem::Int(n) => Ok(HeapItem::Int(n)),
            StackItem::Bool(b) => Ok(HeapItem::Bool(b)),
            StackItem::Unit => Ok(HeapItem::Unit),
            StackItem::HeapIndex(h) => Ok(HeapItem::HeapIndex(h)),
            other => Err(format!("cannot store {other} in the heap")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heap items
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of a heap block, recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    Pair,
    Inl,
    Inr,
    Closure,
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapKind::Pair => write!(f, "PAIR"),
            HeapKind::Inl => write!(f, "INL"),
            HeapKind::Inr => write!(f, "INR"),
            HeapKind::Closure => write!(f, "CLOSURE"),
        }
    }
}

/// One cell of the VM heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapItem {
    Int(i64),
    Bool(bool),
    Unit,
    /// A pointer to another heap cell.
    HeapIndex(usize),
    /// A code index; the entry point stored in a closure block.
    CodeIndex(usize),
    /// Block header: total block size in cells (header included) and kind.
    Header(usize, HeapKind),
}

impl fmt::Display for HeapItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapItem::Int(n) => write!(f, "INT {n}"),
            HeapItem::Bool(b) => write!(f, "BOOL {b}"),
            HeapItem::Unit => write!(f, "UNIT"),
            HeapItem::HeapIndex(h) => write!(f, "HI {h}"),
            HeapItem::CodeIndex(c) => write!(f, "CI {c}"),
            HeapItem::Header(n, kind) => write!(f, "HEADER({n}, {kind})"),
        }
    }
}

impl HeapItem {
    /// Convert a heap cell into a stack cell.
    ///
    /// Headers and code indices are internal to heap blocks; fetching one
    /// onto the stack is a malformed-state condition reported by the caller.
    pub fn to_stack(self) -> Result<StackItem, String> {
        match self {
            HeapItem::Int(n) => Ok(StackItem::Int(n)),
            HeapItem::Bool(b) => Ok(StackItem::Bool(b)),
            HeapItem::Unit => Ok(StackItem::Unit),
            HeapItem::HeapIndex(h) => Ok(StackItem::HeapIndex(h)),
            other => Err(format!("cannot fetch {other} onto the stack")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoded values
// ─────────────────────────────────────────────────────────────────────────────

/// A fully-decoded runtime value, produced from the stack and heap after the
/// VM halts.  This is what the driver prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Unit,
    Pair(Box<Value>, Box<Value>),
    Inl(Box<Value>),
    Inr(Box<Value>),
    /// Closures decode opaquely.
    Closure,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Unit => write!(f, "()"),
            Value::Pair(a, b) => write!(f, "({a}, {b})"),
            Value::Inl(v) => write!(f, "inl({v})"),
            Value::Inr(v) => write!(f, "inr({v})"),
            Value::Closure => write!(f, "CLOSURE"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_item_display() {
        assert_eq!(StackItem::Int(7).to_string(), "INT 7");
        assert_eq!(StackItem::HeapIndex(3).to_string(), "HI 3");
        assert_eq!(StackItem::FramePointer(0).to_string(), "FP 0");
    }

    #[test]
    fn test_heap_item_display() {
        assert_eq!(HeapItem::CodeIndex(17).to_string(), "CI 17");
        assert_eq!(
            HeapItem::Header(3, HeapKind::Pair).to_string(),
            "HEADER(3, PAIR)"
        );
    }

    #[test]
    fn test_saved_registers_never_reach_the_heap() {
        assert!(StackItem::Int(1).to_heap().is_ok());
        assert!(StackItem::FramePointer(2).to_heap().is_err());
        assert!(StackItem::ReturnAddress(2).to_heap().is_err());
        assert!(StackItem::ExceptionPointer(2).to_heap().is_err());
    }

    #[test]
    fn test_headers_never_reach_the_stack() {
        assert!(HeapItem::HeapIndex(0).to_stack().is_ok());
        assert!(HeapItem::Header(2, HeapKind::Inl).to_stack().is_err());
        assert!(HeapItem::CodeIndex(4).to_stack().is_err());
    }

    #[test]
    fn test_value_display() {
        let v = Value::Pair(
            Box::new(Value::Int(1)),
            Box::new(Value::Inr(Box::new(Value::Unit))),
        );
        assert_eq!(v.to_string(), "(1, inr(()))");
        assert_eq!(Value::Closure.to_string(), "CLOSURE");
    }
}
