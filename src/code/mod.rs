//! # Code
//!
//! In-memory model of a decoded method body: single instructions and the ordered sequence that makes up a body

pub mod label;

use std::fmt;
use std::ops::Index;
use std::slice;

use self::label::{LabelAllocator, LabelId};

/// Operation kind of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Does nothing
    Nop,
    /// Pushes a null value
    LoadNull,
    /// Pushes the constant operand
    LoadConst,
    /// Pushes an argument
    LoadArg,
    /// Pops into an argument
    StoreArg,
    /// Pushes a local
    LoadLocal,
    /// Pops into a local
    StoreLocal,
    /// Discards the top of the stack
    Pop,
    /// Duplicates the top of the stack
    Dup,
    /// Arithmetic addition
    Add,
    /// Arithmetic subtraction
    Sub,
    /// Arithmetic multiplication
    Mul,
    /// Arithmetic division
    Div,
    /// Pushes whether the two top values are equal
    CompareEq,
    /// Pushes whether the second value is less than the top value
    CompareLt,
    /// Unconditional jump
    Branch,
    /// Jumps if the popped value is truthy
    BranchTrue,
    /// Jumps if the popped value is falsy
    BranchFalse,
    /// Calls an external symbol
    Call,
    /// Returns from the body, with the top of the stack if there is one
    Return,
}
impl Opcode {
    /// Whether this opcode takes a label operand
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Branch | Self::BranchTrue | Self::BranchFalse)
    }
    /// Whether this opcode is a binary arithmetic operation
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }
    /// Mnemonic used when printing bodies
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::LoadNull => "ldnull",
            Self::LoadConst => "ldc",
            Self::LoadArg => "ldarg",
            Self::StoreArg => "starg",
            Self::LoadLocal => "ldloc",
            Self::StoreLocal => "stloc",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::CompareEq => "ceq",
            Self::CompareLt => "clt",
            Self::Branch => "br",
            Self::BranchTrue => "brtrue",
            Self::BranchFalse => "brfalse",
            Self::Call => "call",
            Self::Return => "ret",
        }
    }
}
impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Literal or reference data attached to an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Local variable slot
    Local(u16),
    /// Argument slot
    Arg(u16),
    /// 32-bit integer constant
    I32(i32),
    /// Single precision constant
    F32(f32),
    /// Double precision constant
    F64(f64),
    /// Boolean constant
    Bool(bool),
    /// Jump target
    Label(LabelId),
    /// Name of an external callable
    Symbol(String),
}
impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}
impl From<f32> for Operand {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}
impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}
impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(slot) => write!(f, "loc.{slot}"),
            Self::Arg(slot) => write!(f, "arg.{slot}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v:?}f"),
            Self::F64(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Label(l) => write!(f, "{l}"),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

/// One decoded operation
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Operation kind
    opcode: Opcode,
    /// Operand, if the opcode takes one
    operand: Option<Operand>,
    /// Labels that resolve to this instruction
    labels: Vec<LabelId>,
}
impl Instruction {
    /// Creates an instruction without an operand
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: None,
            labels: Vec::new(),
        }
    }
    /// Creates an instruction with an operand
    pub fn with_operand(opcode: Opcode, operand: impl Into<Operand>) -> Self {
        Self {
            opcode,
            operand: Some(operand.into()),
            labels: Vec::new(),
        }
    }

    /// `ldloc slot`
    pub fn load_local(slot: u16) -> Self {
        Self::with_operand(Opcode::LoadLocal, Operand::Local(slot))
    }
    /// `stloc slot`
    pub fn store_local(slot: u16) -> Self {
        Self::with_operand(Opcode::StoreLocal, Operand::Local(slot))
    }
    /// `ldarg slot`
    pub fn load_arg(slot: u16) -> Self {
        Self::with_operand(Opcode::LoadArg, Operand::Arg(slot))
    }
    /// `starg slot`
    pub fn store_arg(slot: u16) -> Self {
        Self::with_operand(Opcode::StoreArg, Operand::Arg(slot))
    }
    /// `ldc value`
    pub fn load_const(value: impl Into<Operand>) -> Self {
        Self::with_operand(Opcode::LoadConst, value)
    }
    /// `call symbol`
    pub fn call(symbol: impl Into<String>) -> Self {
        Self::with_operand(Opcode::Call, Operand::Symbol(symbol.into()))
    }
    /// `br label`
    pub fn branch(label: LabelId) -> Self {
        Self::with_operand(Opcode::Branch, Operand::Label(label))
    }
    /// `brtrue label`
    pub fn branch_true(label: LabelId) -> Self {
        Self::with_operand(Opcode::BranchTrue, Operand::Label(label))
    }
    /// `brfalse label`
    pub fn branch_false(label: LabelId) -> Self {
        Self::with_operand(Opcode::BranchFalse, Operand::Label(label))
    }
    /// `ret`
    pub fn ret() -> Self {
        Self::new(Opcode::Return)
    }

    /// Attaches `label`, builder style
    pub fn labelled(mut self, label: LabelId) -> Self {
        self.attach_label(label);
        self
    }

    /// Operation kind
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
    /// Operand, if any
    pub fn operand(&self) -> Option<&Operand> {
        self.operand.as_ref()
    }
    /// Labels resolving to this instruction, in the order they were attached
    pub fn labels(&self) -> &[LabelId] {
        &self.labels
    }
    /// Adds an incoming label. Existing labels are kept and attaching the same label twice is a no-op.
    pub fn attach_label(&mut self, label: LabelId) {
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }
    /// Removes and returns every incoming label
    pub(crate) fn take_labels(&mut self) -> Vec<LabelId> {
        std::mem::take(&mut self.labels)
    }

    /// Label this instruction jumps to, if it is a branch
    pub fn branch_target(&self) -> Option<LabelId> {
        match (self.opcode.is_branch(), &self.operand) {
            (true, Some(Operand::Label(label))) => Some(*label),
            _ => None,
        }
    }
    /// Local slot referenced by the operand, if any
    pub fn local(&self) -> Option<u16> {
        match self.operand {
            Some(Operand::Local(slot)) => Some(slot),
            _ => None,
        }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.labels {
            write!(f, "{label}: ")?;
        }
        write!(f, "{}", self.opcode)?;
        if let Some(operand) = &self.operand {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Ordered instructions of one method body, together with the allocator for its labels
#[derive(Debug, Clone, Default)]
pub struct InstructionSequence {
    /// Instructions in execution order
    instructions: Vec<Instruction>,
    /// Label allocator scoped to this body
    labels: LabelAllocator,
}
impl InstructionSequence {
    /// Wraps decoded instructions
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let labels = LabelAllocator::for_instructions(&instructions);
        Self {
            instructions,
            labels,
        }
    }
    /// Reassembles a sequence from an edited instruction list while keeping its allocator state
    pub(crate) fn from_parts(instructions: Vec<Instruction>, labels: LabelAllocator) -> Self {
        Self {
            instructions,
            labels,
        }
    }
    /// Splits the sequence into its instruction list and allocator
    pub(crate) fn into_parts(self) -> (Vec<Instruction>, LabelAllocator) {
        (self.instructions, self.labels)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    /// Whether the body has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
    /// Instruction at `index`
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }
    /// Iterates over the instructions in order
    pub fn iter(&self) -> slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }
    /// Borrows the instructions
    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }
    /// Consumes the sequence, returning the instructions
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Mints a label that is unused in this body
    pub fn new_label(&mut self) -> LabelId {
        self.labels.new_label()
    }
}
impl PartialEq for InstructionSequence {
    fn eq(&self, other: &Self) -> bool {
        self.instructions == other.instructions
    }
}
impl From<Vec<Instruction>> for InstructionSequence {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}
impl FromIterator<Instruction> for InstructionSequence {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
impl Index<usize> for InstructionSequence {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Self::Output {
        &self.instructions[index]
    }
}
impl<'a> IntoIterator for &'a InstructionSequence {
    type Item = &'a Instruction;
    type IntoIter = slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
impl fmt::Display for InstructionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{i:04}  {instr}")?;
        }
        Ok(())
    }
}
