//! The Jargon virtual machine.
//!
//! The VM is a **stack-based interpreter** that executes a loaded code array
//! one [`Instruction`] at a time.  Unlike a call-frame interpreter, all
//! activation state lives in a single fixed-capacity stack of tagged cells;
//! structured data lives in a fixed-capacity heap of tagged cells managed by
//! a bump allocator.
//!
//! # Registers
//!
//! - `cp` — code pointer: index of the next instruction.
//! - `sp` — stack pointer: next free stack cell; live cells are `0..sp`.
//! - `fp` — frame pointer: base of the current activation record.
//!   `stack[fp]` holds the caller's saved `FP`, `stack[fp + 1]` the return
//!   address, `stack[fp - 1]` the invoked closure, `stack[fp - 2]` the
//!   argument.
//! - `ep` — exception pointer: base of the innermost handler frame, `0` when
//!   no handler is active (cells 0 and 1 always hold the synthetic first
//!   frame, so no real handler frame can start there).
//! - `hp` — heap pointer: next free heap cell; live cells are `0..hp`.
//!
//! # Stopping
//!
//! Execution ends in one of two ways:
//!
//! - a terminal [`Status`] (`Halted`, or a capacity violation), left in the
//!   machine and returned by [`Vm::run`];
//! - a [`RuntimeError`] for malformed state (an instruction's tag
//!   precondition failed, e.g. `APPLY` on a non-closure).  These indicate a
//!   compiler bug or a corrupted listing and are not catchable by `RAISE`.

use std::collections::VecDeque;
use std::fmt;

use crate::bytecode::{Instruction, Location, ValuePath};
use crate::config::Config;
use crate::value::{HeapItem, HeapKind, StackItem, Value};
use crate::ast::{BinOp, UnaryOp};

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// The machine's execution status.  Anything other than `Running` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Halted,
    /// `cp` advanced past the end of the code array.
    CodeIndexOutOfBound,
    /// A push would exceed the stack capacity.
    StackIndexOutOfBound,
    /// A heap write or allocation fell outside the heap capacity.
    HeapIndexOutOfBound,
    /// A pop from an empty stack.
    StackUnderflow,
}

impl Status {
    /// Process exit code for the driver: zero iff the machine halted cleanly.
    pub fn code(&self) -> i32 {
        match self {
            Status::Halted => 0,
            Status::Running => 1,
            Status::CodeIndexOutOfBound => 2,
            Status::StackIndexOutOfBound => 3,
            Status::HeapIndexOutOfBound => 4,
            Status::StackUnderflow => 5,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Running => "Running",
            Status::Halted => "Halted",
            Status::CodeIndexOutOfBound => "CodeIndexOutOfBound",
            Status::StackIndexOutOfBound => "StackIndexOutOfBound",
            Status::HeapIndexOutOfBound => "HeapIndexOutOfBound",
            Status::StackUnderflow => "StackUnderflow",
        };
        write!(f, "{name}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime error
// ─────────────────────────────────────────────────────────────────────────────

/// A malformed-state error: an instruction's precondition on stack or heap
/// tags did not hold.  Reified as a value (rather than a process abort) so
/// callers and tests can assert on it.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    /// Code index of the faulting instruction.
    pub cp: usize,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at code index {}: {}", self.cp, self.message)
    }
}

impl std::error::Error for RuntimeError {}

// ─────────────────────────────────────────────────────────────────────────────
// Input provider
// ─────────────────────────────────────────────────────────────────────────────

/// Source of integers for the `READ` primitive.
pub trait Input {
    /// Produce one integer, or `None` when the source is exhausted or
    /// malformed (which the VM reports as a runtime error).
    fn read_int(&mut self) -> Option<i64>;
}

/// Interactive input: prompts on stderr and reads one line from stdin.
pub struct StdinInput;

impl Input for StdinInput {
    fn read_int(&mut self) -> Option<i64> {
        eprint!("int> ");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok()?;
        line.trim().parse().ok()
    }
}

/// Scripted input for tests and batch runs: a fixed queue of integers.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    queue: VecDeque<i64>,
}

impl ScriptedInput {
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            queue: values.into_iter().collect(),
        }
    }
}

impl Input for ScriptedInput {
    fn read_int(&mut self) -> Option<i64> {
        self.queue.pop_front()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal stop signal
// ─────────────────────────────────────────────────────────────────────────────

/// Why a step could not complete normally.  `Status` stops are absorbed into
/// the machine state; `Fault`s propagate to the caller.
enum Stop {
    Status(Status),
    Fault(RuntimeError),
}

type Step<T> = Result<T, Stop>;

// ─────────────────────────────────────────────────────────────────────────────
// Vm
// ─────────────────────────────────────────────────────────────────────────────

/// The Jargon virtual machine.
pub struct Vm<'i> {
    /// Loaded, label-resolved code.  Read-only during execution.
    code: Vec<Instruction>,
    /// The stack array; `0..sp` are live.
    stack: Vec<StackItem>,
    /// The heap array; `0..hp` are live.
    heap: Vec<HeapItem>,
    sp: usize,
    fp: usize,
    ep: usize,
    cp: usize,
    hp: usize,
    status: Status,
    /// Print the machine state before every step.
    verbose: bool,
    /// Provider for the `READ` primitive.
    input: &'i mut dyn Input,
}

impl<'i> Vm<'i> {
    /// Create a machine over loaded code.
    ///
    /// The stack and heap are zero-initialised at their configured
    /// capacities, and a synthetic first frame `FP 0, RA 0` is installed so
    /// that a stray top-level `RETURN` lands on code index 0 instead of
    /// reading garbage.
    pub fn new(code: Vec<Instruction>, config: &Config, input: &'i mut dyn Input) -> Self {
        let mut vm = Vm {
            code,
            stack: vec![StackItem::Int(0); config.stack_max],
            heap: vec![HeapItem::Int(0); config.heap_max],
            sp: 0,
            fp: 0,
            ep: 0,
            cp: 0,
            hp: 0,
            status: Status::Running,
            verbose: config.verbose,
            input,
        };
        if vm.stack.len() >= 2 {
            vm.stack[0] = StackItem::FramePointer(0);
            vm.stack[1] = StackItem::ReturnAddress(0);
            vm.sp = 2;
        } else {
            vm.status = Status::StackIndexOutOfBound;
        }
        vm
    }

    /// The machine's current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Iterate [`Vm::step`] until the status leaves `Running`.
    pub fn run(&mut self) -> Result<Status, RuntimeError> {
        while self.status == Status::Running {
            if self.verbose {
                eprintln!("{}", self.state_to_string());
            }
            self.step()?;
        }
        Ok(self.status)
    }

    /// Execute one instruction.
    ///
    /// Terminal statuses are absorbed into the machine; malformed-state
    /// conditions are returned as [`RuntimeError`]s.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        match self.step_inner() {
            Ok(()) => Ok(()),
            Err(Stop::Status(status)) => {
                self.status = status;
                Ok(())
            }
            Err(Stop::Fault(error)) => Err(error),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    fn step_inner(&mut self) -> Step<()> {
        let instruction = match self.code.get(self.cp) {
            Some(instruction) => instruction.clone(),
            None => return Err(Stop::Status(Status::CodeIndexOutOfBound)),
        };

        match instruction {
            Instruction::Push(item) => {
                self.push(item)?;
                self.cp += 1;
            }

            Instruction::Unary(op) => {
                let operand = self.pop()?;
                let result = match (op, operand) {
                    (UnaryOp::Not, StackItem::Bool(b)) => StackItem::Bool(!b),
                    (UnaryOp::Neg, StackItem::Int(n)) => StackItem::Int(n.wrapping_neg()),
                    (UnaryOp::Read, StackItem::Unit) => match self.input.read_int() {
                        Some(n) => StackItem::Int(n),
                        None => {
                            return Err(self.fault("READ: input provider produced no integer"))
                        }
                    },
                    (op, v) => return Err(self.fault(format!("UNARY {op} applied to {v}"))),
                };
                self.push(result)?;
                self.cp += 1;
            }

            Instruction::Oper(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = match (left, op, right) {
                    (StackItem::Int(a), BinOp::Add, StackItem::Int(b)) => {
                        StackItem::Int(a.wrapping_add(b))
                    }
                    (StackItem::Int(a), BinOp::Sub, StackItem::Int(b)) => {
                        StackItem::Int(a.wrapping_sub(b))
                    }
                    (StackItem::Int(a), BinOp::Mul, StackItem::Int(b)) => {
                        StackItem::Int(a.wrapping_mul(b))
                    }
                    (StackItem::Int(a), BinOp::Div, StackItem::Int(b)) => {
                        if b == 0 {
                            return Err(self.fault("division by zero"));
                        }
                        StackItem::Int(a.wrapping_div(b))
                    }
                    (StackItem::Int(a), BinOp::Lt, StackItem::Int(b)) => StackItem::Bool(a < b),
                    (StackItem::Int(a), BinOp::EqI, StackItem::Int(b)) => StackItem::Bool(a == b),
                    (StackItem::Bool(a), BinOp::EqB, StackItem::Bool(b)) => StackItem::Bool(a == b),
                    (StackItem::Bool(a), BinOp::And, StackItem::Bool(b)) => StackItem::Bool(a && b),
                    (StackItem::Bool(a), BinOp::Or, StackItem::Bool(b)) => StackItem::Bool(a || b),
                    (l, op, r) => {
                        return Err(self.fault(format!("OPER {op} applied to {l} and {r}")))
                    }
                };
                self.push(result)?;
                self.cp += 1;
            }

            Instruction::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
                self.cp += 1;
            }

            Instruction::Pop => {
                self.pop()?;
                self.cp += 1;
            }

            Instruction::Label(_) => {
                self.cp += 1;
            }

            Instruction::MkPair => {
                let right = self.pop()?;
                let left = self.pop()?;
                let left = self.to_heap(left)?;
                let right = self.to_heap(right)?;
                let block = self.allocate(3)?;
                self.heap[block] = HeapItem::Header(3, HeapKind::Pair);
                self.heap[block + 1] = left;
                self.heap[block + 2] = right;
                self.push(StackItem::HeapIndex(block))?;
                self.cp += 1;
            }

            Instruction::Fst => self.project_pair(1)?,
            Instruction::Snd => self.project_pair(2)?,

            Instruction::MkInl => self.inject_sum(HeapKind::Inl)?,
            Instruction::MkInr => self.inject_sum(HeapKind::Inr)?,

            Instruction::Case(target) => {
                let block = self.pop_heap_index("CASE")?;
                let kind = match self.heap_get(block)? {
                    HeapItem::Header(_, kind @ (HeapKind::Inl | HeapKind::Inr)) => kind,
                    other => {
                        return Err(self.fault(format!("CASE applied to non-sum block {other}")))
                    }
                };
                let payload = self.heap_get(block + 1)?;
                let payload = self.to_stack(payload)?;
                self.push(payload)?;
                if kind == HeapKind::Inr {
                    self.cp = self.target(&target)?;
                } else {
                    self.cp += 1;
                }
            }

            Instruction::MkRef => {
                let value = self.pop()?;
                let value = self.to_heap(value)?;
                let cell = self.allocate(1)?;
                self.heap[cell] = value;
                self.push(StackItem::HeapIndex(cell))?;
                self.cp += 1;
            }

            Instruction::Deref => {
                let cell = self.pop_heap_index("DEREF")?;
                let value = self.heap_get(cell)?;
                let value = self.to_stack(value)?;
                self.push(value)?;
                self.cp += 1;
            }

            Instruction::Assign => {
                let value = self.pop()?;
                let target = self.pop()?;
                let StackItem::HeapIndex(cell) = target else {
                    return Err(self.fault(format!("ASSIGN target is {target}, not a reference")));
                };
                let item = self.to_heap(value)?;
                if cell >= self.hp {
                    return Err(Stop::Status(Status::HeapIndexOutOfBound));
                }
                self.heap[cell] = item;
                self.push(StackItem::Unit)?;
                self.cp += 1;
            }

            Instruction::Test(target) => {
                let condition = self.pop()?;
                match condition {
                    StackItem::Bool(false) => self.cp = self.target(&target)?,
                    StackItem::Bool(true) => self.cp += 1,
                    other => return Err(self.fault(format!("TEST applied to {other}"))),
                }
            }

            Instruction::Goto(target) => {
                self.cp = self.target(&target)?;
            }

            Instruction::Halt => {
                self.status = Status::Halted;
            }

            Instruction::MkClosure(entry, fv_count) => {
                let entry = self.target(&entry)?;
                if self.sp < fv_count {
                    return Err(Stop::Status(Status::StackUnderflow));
                }
                let block = self.allocate(2 + fv_count)?;
                self.heap[block] = HeapItem::Header(2 + fv_count, HeapKind::Closure);
                self.heap[block + 1] = HeapItem::CodeIndex(entry);
                // fvᵢ is the cell at sp - i; payload slots are 1-indexed.
                for i in 1..=fv_count {
                    let captured = self.stack[self.sp - i];
                    let captured = self.to_heap(captured)?;
                    self.heap[block + 1 + i] = captured;
                }
                self.sp -= fv_count;
                self.push(StackItem::HeapIndex(block))?;
                self.cp += 1;
            }

            Instruction::Apply => {
                if self.sp < 2 {
                    return Err(Stop::Status(Status::StackUnderflow));
                }
                let callee = self.stack[self.sp - 1];
                let StackItem::HeapIndex(block) = callee else {
                    return Err(self.fault(format!("APPLY to {callee}, not a closure")));
                };
                match self.heap_get(block)? {
                    HeapItem::Header(_, HeapKind::Closure) => {}
                    other => {
                        return Err(self.fault(format!("APPLY to non-closure block {other}")))
                    }
                }
                let HeapItem::CodeIndex(entry) = self.heap_get(block + 1)? else {
                    return Err(self.fault("closure block has no code pointer"));
                };
                let caller_fp = self.fp;
                self.fp = self.sp;
                self.push(StackItem::FramePointer(caller_fp))?;
                self.push(StackItem::ReturnAddress(self.cp + 1))?;
                self.cp = entry;
            }

            Instruction::Return => {
                let value = self.pop()?;
                let StackItem::FramePointer(caller_fp) = self.stack_get(self.fp)? else {
                    return Err(self.fault("RETURN: frame base does not hold a saved FP"));
                };
                let StackItem::ReturnAddress(return_to) = self.stack_get(self.fp + 1)? else {
                    return Err(self.fault("RETURN: frame does not hold a return address"));
                };
                // Drop the frame together with the argument and closure below it.
                let Some(new_sp) = self.fp.checked_sub(2) else {
                    return Err(Stop::Status(Status::StackUnderflow));
                };
                self.sp = new_sp;
                self.fp = caller_fp;
                self.cp = return_to;
                self.push(value)?;
            }

            Instruction::Lookup(path) => {
                let value = match path {
                    ValuePath::StackLocation(offset) => {
                        let index = self.fp as i64 + offset;
                        if index < 0 || index as usize >= self.sp {
                            return Err(
                                self.fault(format!("LOOKUP {path} outside the live stack"))
                            );
                        }
                        let item = self.stack[index as usize];
                        match item {
                            StackItem::Int(_)
                            | StackItem::Bool(_)
                            | StackItem::Unit
                            | StackItem::HeapIndex(_) => item,
                            other => {
                                return Err(
                                    self.fault(format!("LOOKUP {path} fetched {other}"))
                                )
                            }
                        }
                    }
                    ValuePath::HeapLocation(offset) => {
                        let Some(closure_slot) = self.fp.checked_sub(1) else {
                            return Err(self.fault("LOOKUP: no closure below the frame"));
                        };
                        let StackItem::HeapIndex(block) = self.stack_get(closure_slot)? else {
                            return Err(self.fault("LOOKUP: cell below the frame is not a closure"));
                        };
                        match self.heap_get(block)? {
                            HeapItem::Header(_, HeapKind::Closure) => {}
                            other => {
                                return Err(self.fault(format!(
                                    "LOOKUP {path} through non-closure block {other}"
                                )))
                            }
                        }
                        let item = self.heap_get(block + 1 + offset)?;
                        self.to_stack(item)?
                    }
                };
                self.push(value)?;
                self.cp += 1;
            }

            Instruction::Try(handler) => {
                let handler = self.target(&handler)?;
                let frame_base = self.sp;
                self.push(StackItem::ExceptionPointer(self.ep))?;
                self.push(StackItem::FramePointer(self.fp))?;
                self.push(StackItem::ReturnAddress(handler))?;
                self.ep = frame_base;
                self.cp += 1;
            }

            Instruction::UnTry => {
                let value = self.pop()?;
                let ra = self.pop()?;
                let fp = self.pop()?;
                let ep = self.pop()?;
                let (
                    StackItem::ReturnAddress(_),
                    StackItem::FramePointer(_),
                    StackItem::ExceptionPointer(saved_ep),
                ) = (ra, fp, ep)
                else {
                    return Err(self.fault(format!(
                        "UNTRY: expected a handler frame, found {ep}, {fp}, {ra}"
                    )));
                };
                self.ep = saved_ep;
                self.push(value)?;
                self.cp += 1;
            }

            Instruction::Raise => {
                let raised = self.pop()?;
                if self.ep == 0 {
                    return Err(self.fault(format!("no handler for raised value {raised}")));
                }
                let frame = self.ep;
                if frame + 2 >= self.sp {
                    return Err(self.fault("RAISE: handler frame above the stack pointer"));
                }
                let (
                    StackItem::ExceptionPointer(saved_ep),
                    StackItem::FramePointer(saved_fp),
                    StackItem::ReturnAddress(handler),
                ) = (self.stack[frame], self.stack[frame + 1], self.stack[frame + 2])
                else {
                    return Err(self.fault("RAISE: corrupted handler frame"));
                };
                // Unwind everything above the handler frame in one move.
                self.sp = frame;
                self.fp = saved_fp;
                self.ep = saved_ep;
                self.cp = handler;
                self.push(raised)?;
            }
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared instruction bodies
    // ─────────────────────────────────────────────────────────────────────────

    /// `FST` / `SND`: fetch payload cell `offset` of a pair block.
    fn project_pair(&mut self, offset: usize) -> Step<()> {
        let name = if offset == 1 { "FST" } else { "SND" };
        let block = self.pop_heap_index(name)?;
        match self.heap_get(block)? {
            HeapItem::Header(_, HeapKind::Pair) => {}
            other => return Err(self.fault(format!("{name} applied to non-pair block {other}"))),
        }
        let item = self.heap_get(block + offset)?;
        let item = self.to_stack(item)?;
        self.push(item)?;
        self.cp += 1;
        Ok(())
    }

    /// `MK_INL` / `MK_INR`: wrap the top of stack in a two-cell sum block.
    fn inject_sum(&mut self, kind: HeapKind) -> Step<()> {
        let value = self.pop()?;
        let value = self.to_heap(value)?;
        let block = self.allocate(2)?;
        self.heap[block] = HeapItem::Header(2, kind);
        self.heap[block + 1] = value;
        self.push(StackItem::HeapIndex(block))?;
        self.cp += 1;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack and heap primitives
    // ─────────────────────────────────────────────────────────────────────────

    fn push(&mut self, item: StackItem) -> Step<()> {
        if self.sp >= self.stack.len() {
            return Err(Stop::Status(Status::StackIndexOutOfBound));
        }
        self.stack[self.sp] = item;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Step<StackItem> {
        if self.sp == 0 {
            return Err(Stop::Status(Status::StackUnderflow));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    fn pop_heap_index(&mut self, instruction: &str) -> Step<usize> {
        match self.pop()? {
            StackItem::HeapIndex(h) => Ok(h),
            other => Err(self.fault(format!("{instruction} applied to {other}"))),
        }
    }

    /// Read a live stack cell.
    fn stack_get(&self, index: usize) -> Step<StackItem> {
        if index >= self.sp {
            return Err(self.fault(format!("stack read at {index} beyond sp={}", self.sp)));
        }
        Ok(self.stack[index])
    }

    /// Read a live heap cell.
    fn heap_get(&self, index: usize) -> Step<HeapItem> {
        if index >= self.hp {
            return Err(self.fault(format!("heap read at {index} beyond hp={}", self.hp)));
        }
        Ok(self.heap[index])
    }

    /// Bump-allocate `n` cells, returning the address of the first.
    ///
    /// On exhaustion the GC hook is consulted once; since it never makes
    /// progress in this design, exhaustion is terminal.
    fn allocate(&mut self, n: usize) -> Step<usize> {
        if self.hp + n >= self.heap.len() {
            // One shot at reclaiming space, then re-check the bound.
            if self.gc().is_none() || self.hp + n >= self.heap.len() {
                return Err(Stop::Status(Status::HeapIndexOutOfBound));
            }
        }
        let address = self.hp;
        self.hp += n;
        Ok(address)
    }

    /// Garbage-collection hook.
    ///
    /// Contract: either `None` (no progress; the failed allocation is fatal)
    /// or `Some(())` after compacting the heap so that `hp` has decreased and
    /// all heap invariants still hold.  The roots would be every `HI` cell on
    /// the stack plus reachable `HI` chains in the heap.
    fn gc(&mut self) -> Option<()> {
        None
    }

    fn to_heap(&self, item: StackItem) -> Step<HeapItem> {
        item.to_heap().map_err(|message| self.fault(message))
    }

    fn to_stack(&self, item: HeapItem) -> Step<StackItem> {
        item.to_stack().map_err(|message| self.fault(message))
    }

    /// The resolved address of a control-transfer target.
    fn target(&self, location: &Location) -> Step<usize> {
        location
            .address
            .ok_or_else(|| self.fault(format!("unresolved label `{}` at runtime", location.label)))
    }

    fn fault(&self, message: impl Into<String>) -> Stop {
        Stop::Fault(RuntimeError {
            message: message.into(),
            cp: self.cp,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Result decoding
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode the cell at `sp - 1` into a [`Value`], chasing heap pointers.
    ///
    /// Intended to be called after the machine halts; the driver prints the
    /// result.
    pub fn result_value(&self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError {
                message: "no result: the stack is empty".into(),
                cp: self.cp,
            });
        }
        self.decode_stack_item(self.stack[self.sp - 1])
    }

    fn decode_stack_item(&self, item: StackItem) -> Result<Value, RuntimeError> {
        match item {
            StackItem::Int(n) => Ok(Value::Int(n)),
            StackItem::Bool(b) => Ok(Value::Bool(b)),
            StackItem::Unit => Ok(Value::Unit),
            StackItem::HeapIndex(h) => self.decode_heap(h),
            other => Err(RuntimeError {
                message: format!("cannot decode {other} as a value"),
                cp: self.cp,
            }),
        }
    }

    fn decode_heap(&self, address: usize) -> Result<Value, RuntimeError> {
        let oob = |message: String| RuntimeError {
            message,
            cp: self.cp,
        };
        if address >= self.hp {
            return Err(oob(format!("decode: heap read at {address} beyond hp={}", self.hp)));
        }
        match self.heap[address] {
            HeapItem::Int(n) => Ok(Value::Int(n)),
            HeapItem::Bool(b) => Ok(Value::Bool(b)),
            HeapItem::Unit => Ok(Value::Unit),
            HeapItem::HeapIndex(h) => self.decode_heap(h),
            HeapItem::Header(_, HeapKind::Pair) => Ok(Value::Pair(
                Box::new(self.decode_heap(address + 1)?),
                Box::new(self.decode_heap(address + 2)?),
            )),
            HeapItem::Header(_, HeapKind::Inl) => {
                Ok(Value::Inl(Box::new(self.decode_heap(address + 1)?)))
            }
            HeapItem::Header(_, HeapKind::Inr) => {
                Ok(Value::Inr(Box::new(self.decode_heap(address + 1)?)))
            }
            HeapItem::Header(_, HeapKind::Closure) => Ok(Value::Closure),
            HeapItem::CodeIndex(c) => Err(oob(format!("cannot decode CI {c} as a value"))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State pretty-printing
    // ─────────────────────────────────────────────────────────────────────────

    /// One-line machine state: registers, next instruction, live stack.
    /// Emitted per step under the verbose flag.
    pub fn state_to_string(&self) -> String {
        let instruction = self
            .code
            .get(self.cp)
            .map(|i| i.to_string())
            .unwrap_or_else(|| "<out of code>".into());
        let cells: Vec<String> = self.stack[..self.sp].iter().map(|c| c.to_string()).collect();
        format!(
            "cp={:<3} [{}] sp={} fp={} ep={} hp={} stack=[{}]",
            self.cp,
            instruction,
            self.sp,
            self.fp,
            self.ep,
            self.hp,
            cells.join(", ")
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::lexer::lex;
    use crate::loader;
    use crate::parser::parse_tokens;
    use crate::typechecker;

    /// Full pipeline up to a loaded code array.
    fn compile_and_load(src: &str) -> Vec<Instruction> {
        let (tokens, errors) = lex(src);
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        let mut expr = parse_tokens(tokens).expect("parse failed");
        typechecker::check(&mut expr).expect("type error");
        let listing = compiler::compile(&expr).expect("compile failed");
        loader::load(&listing).expect("load failed")
    }

    fn run_to_value(src: &str) -> Value {
        let mut input = ScriptedInput::default();
        let code = compile_and_load(src);
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let status = vm.run().expect("runtime fault");
        assert_eq!(status, Status::Halted);
        vm.result_value().expect("decode failed")
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run_to_value("1 + 2 * 3"), Value::Int(7));
        assert_eq!(run_to_value("10 / 3 - 4"), Value::Int(-1));
    }

    #[test]
    fn test_conditional_and_projections() {
        assert_eq!(
            run_to_value("if 3 < 4 then fst (1, 2) else snd (1, 2)"),
            Value::Int(1)
        );
    }

    #[test]
    fn test_division_by_zero_is_a_fault() {
        let code = compile_and_load("1 / 0");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let err = vm.run().unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn test_swap_exchanges_top_two() {
        let listing = vec![
            Instruction::Push(StackItem::Int(1)),
            Instruction::Push(StackItem::Int(2)),
            Instruction::Swap,
            Instruction::Pop,
            Instruction::Halt,
        ];
        let code = loader::load(&listing).unwrap();
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        vm.run().unwrap();
        // After the swap the 1 is on top; popping it leaves the 2.
        assert_eq!(vm.result_value().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_function_call_and_stack_discipline() {
        let code = compile_and_load("let f = fun x -> x + 1 in f (f 10)");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let status = vm.run().unwrap();
        assert_eq!(status, Status::Halted);
        assert_eq!(vm.result_value().unwrap(), Value::Int(12));
        // Every call consumed its argument and closure: only the synthetic
        // first frame and the result remain.
        assert_eq!(vm.sp, 3);
    }

    #[test]
    fn test_recursion() {
        assert_eq!(
            run_to_value("let rec fact n = if n = 0 then 1 else n * fact (n - 1) in fact 5"),
            Value::Int(120)
        );
    }

    #[test]
    fn test_closure_self_containment() {
        // `make 3` captures x = 3 at construction time; the later call
        // `make 100` reuses the same stack cells and must not disturb it.
        assert_eq!(
            run_to_value(
                "let make = fun x -> fun y -> x + y in \
                 let add3 = make 3 in \
                 let junk = make 100 in add3 4"
            ),
            Value::Int(7)
        );
    }

    #[test]
    fn test_references() {
        assert_eq!(
            run_to_value("let r = ref 0 in (r := !r + 41; r := !r + 1; !r)"),
            Value::Int(42)
        );
    }

    #[test]
    fn test_while_loop_sums() {
        assert_eq!(
            run_to_value(
                "let r = ref 0 in let i = ref 1 in \
                 (while !i < 11 do (r := !r + !i; i := !i + 1); !r)"
            ),
            Value::Int(55)
        );
    }

    #[test]
    fn test_case_analysis() {
        assert_eq!(
            run_to_value("case inr 9 of inl x -> x + 1 | inr y -> y - 1"),
            Value::Int(8)
        );
        assert_eq!(
            run_to_value("case inl 9 of inl x -> x + 1 | inr y -> y - 1"),
            Value::Int(10)
        );
    }

    #[test]
    fn test_exception_unwinding() {
        let code = compile_and_load("try (raise 7) + 100 with e -> e * 2");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let status = vm.run().unwrap();
        assert_eq!(status, Status::Halted);
        assert_eq!(vm.result_value().unwrap(), Value::Int(14));
        // The handler frame is gone and the stack is back to its height at
        // the TRY entry plus one cell for the result.
        assert_eq!(vm.sp, 3);
        assert_eq!(vm.ep, 0);
    }

    #[test]
    fn test_try_without_raise_keeps_value() {
        assert_eq!(run_to_value("try 1 + 2 with e -> 0"), Value::Int(3));
    }

    #[test]
    fn test_nested_handlers_unwind_to_innermost() {
        assert_eq!(
            run_to_value("try (try raise 1 with a -> raise (a + 10)) with b -> b * 2"),
            Value::Int(22)
        );
    }

    #[test]
    fn test_raise_without_handler_is_a_fault() {
        let code = compile_and_load("(raise 3; 0)");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let err = vm.run().unwrap_err();
        assert!(err.message.contains("no handler"), "got: {}", err.message);
    }

    #[test]
    fn test_read_consumes_scripted_input() {
        let code = compile_and_load("? + ?");
        let mut input = ScriptedInput::new([20, 22]);
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        vm.run().unwrap();
        assert_eq!(vm.result_value().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_read_exhausted_input_is_a_fault() {
        let code = compile_and_load("?");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let err = vm.run().unwrap_err();
        assert!(err.message.contains("READ"));
    }

    #[test]
    fn test_stack_overflow_status() {
        // Unbounded recursion grows the stack by four cells per call.
        let code = compile_and_load("let rec spin n = spin n in spin 0");
        let mut input = ScriptedInput::default();
        let config = Config {
            stack_max: 64,
            ..Config::default()
        };
        let mut vm = Vm::new(code, &config, &mut input);
        let status = vm.run().unwrap();
        assert_eq!(status, Status::StackIndexOutOfBound);
    }

    #[test]
    fn test_heap_exhaustion_status() {
        let code = compile_and_load("ref (ref 0)");
        let mut input = ScriptedInput::default();
        let config = Config {
            heap_max: 2,
            ..Config::default()
        };
        let mut vm = Vm::new(code, &config, &mut input);
        let status = vm.run().unwrap();
        assert_eq!(status, Status::HeapIndexOutOfBound);
    }

    #[test]
    fn test_allocation_is_monotone() {
        let code = compile_and_load("let p = (1, 2) in (fst p, (snd p, inl 3))");
        let mut input = ScriptedInput::default();
        let mut vm = Vm::new(code, &Config::default(), &mut input);
        let mut last_hp = vm.hp;
        while vm.status() == Status::Running {
            vm.step().unwrap();
            assert!(vm.hp >= last_hp, "hp decreased");
            last_hp = vm.hp;
        }
    }

    #[test]
    fn test_decode_structured_values() {
        assert_eq!(
            run_to_value("(1, (true, ()))").to_string(),
            "(1, (true, ()))"
        );
        assert_eq!(run_to_value("inl (2, 3)").to_string(), "inl((2, 3))");
        // References decode through the pointer chain.
        assert_eq!(run_to_value("ref (ref 5)"), Value::Int(5));
        // Functions decode opaquely.
        assert_eq!(run_to_value("fun x -> x"), Value::Closure);
    }

    #[test]
    fn test_state_to_string_smoke() {
        let code = compile_and_load("1 + 1");
        let mut input = ScriptedInput::default();
        let vm = Vm::new(code, &Config::default(), &mut input);
        let state = vm.state_to_string();
        assert!(state.contains("cp=0"));
        assert!(state.contains("PUSH INT 1"));
        assert!(state.contains("FP 0, RA 0"));
    }
}
