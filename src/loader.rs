//! Listing loader for the Jargon VM.
//!
//! Loads and validates a compiled listing.  This layer performs label
//! resolution only: it builds a label-to-index map in one scan (every
//! instruction occupies one slot, `LABEL` markers included) and then
//! rewrites every control-transfer instruction so its [`Location`] carries a
//! concrete code index.  The result is the read-only code array the VM
//! executes; its length is the machine's `code_bound`.

use std::collections::HashMap;
use std::fmt;

use crate::bytecode::{Instruction, Location};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A load-time error.  Both variants indicate a compiler bug or a
/// hand-assembled listing gone wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A `GOTO`/`TEST`/`CASE`/`TRY`/`MK_CLOSURE` referenced a label that no
    /// `LABEL` instruction defines.
    UnresolvedLabel(String),
    /// Two `LABEL` instructions carry the same label.
    DuplicateLabel(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::UnresolvedLabel(l) => write!(f, "reference to unresolved label `{l}`"),
            LoadError::DuplicateLabel(l) => write!(f, "label `{l}` is defined twice"),
        }
    }
}

impl std::error::Error for LoadError {}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve every label in `listing` and return the executable code array.
pub fn load(listing: &[Instruction]) -> Result<Vec<Instruction>, LoadError> {
    // Pass 1: map each label to its own slot index.
    let mut targets: HashMap<&str, usize> = HashMap::new();
    for (index, instruction) in listing.iter().enumerate() {
        if let Instruction::Label(label) = instruction {
            if targets.insert(label.as_str(), index).is_some() {
                return Err(LoadError::DuplicateLabel(label.clone()));
            }
        }
    }

    // Pass 2: copy the listing, patching every embedded location.
    let resolve = |loc: &Location| -> Result<Location, LoadError> {
        let address = *targets
            .get(loc.label.as_str())
            .ok_or_else(|| LoadError::UnresolvedLabel(loc.label.clone()))?;
        Ok(Location {
            label: loc.label.clone(),
            address: Some(address),
        })
    };

    let mut code = Vec::with_capacity(listing.len());
    for instruction in listing {
        let patched = match instruction {
            Instruction::Goto(loc) => Instruction::Goto(resolve(loc)?),
            Instruction::Test(loc) => Instruction::Test(resolve(loc)?),
            Instruction::Case(loc) => Instruction::Case(resolve(loc)?),
            Instruction::Try(loc) => Instruction::Try(resolve(loc)?),
            Instruction::MkClosure(loc, n) => Instruction::MkClosure(resolve(loc)?, *n),
            other => other.clone(),
        };
        code.push(patched);
    }
    Ok(code)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use crate::value::StackItem;

    #[test]
    fn test_load_resolves_labels() {
        // 0: TEST L0   1: PUSH 1   2: GOTO L1   3: LABEL L0   4: PUSH 2
        // 5: LABEL L1  6: HALT
        let listing = vec![
            Instruction::Test(Location::new("L0")),
            Instruction::Push(StackItem::Int(1)),
            Instruction::Goto(Location::new("L1")),
            Instruction::Label("L0".into()),
            Instruction::Push(StackItem::Int(2)),
            Instruction::Label("L1".into()),
            Instruction::Halt,
        ];
        let code = load(&listing).unwrap();
        assert_eq!(code.len(), listing.len());
        let Instruction::Test(loc) = &code[0] else {
            panic!("expected TEST");
        };
        // LABEL instructions count as slots, so L0 resolves to index 3.
        assert_eq!(loc.address, Some(3));
        let Instruction::Goto(loc) = &code[2] else {
            panic!("expected GOTO");
        };
        assert_eq!(loc.address, Some(5));
    }

    #[test]
    fn test_load_resolves_closure_entries() {
        let listing = vec![
            Instruction::MkClosure(Location::new("L0"), 0),
            Instruction::Halt,
            Instruction::Label("L0".into()),
            Instruction::Oper(BinOp::Add),
            Instruction::Return,
        ];
        let code = load(&listing).unwrap();
        let Instruction::MkClosure(loc, 0) = &code[0] else {
            panic!("expected MK_CLOSURE");
        };
        assert_eq!(loc.address, Some(2));
    }

    #[test]
    fn test_unresolved_label_is_an_error() {
        let listing = vec![Instruction::Goto(Location::new("L9")), Instruction::Halt];
        assert_eq!(
            load(&listing),
            Err(LoadError::UnresolvedLabel("L9".into()))
        );
    }

    #[test]
    fn test_duplicate_label_is_an_error() {
        let listing = vec![
            Instruction::Label("L0".into()),
            Instruction::Label("L0".into()),
        ];
        assert_eq!(load(&listing), Err(LoadError::DuplicateLabel("L0".into())));
    }
}
