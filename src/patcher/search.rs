//! # Search
//!
//! Predicate-based lookup of anchor instructions inside a body.
//!
//! The plain searches return [`None`] for "not found", which is never confused with index 0.
//! Rewrites should go through [`anchor_first`] and [`anchor_last`], which turn a missing anchor into a hard error.

use crate::code::{Instruction, Opcode, Operand};

use super::PatchError;

/// Shape test over a single instruction
pub trait Pattern {
    /// Whether `instr` matches
    fn matches(&self, instr: &Instruction) -> bool;
    /// Human readable description, used in error messages
    fn describe(&self) -> String;
}

/// Matches `stloc slot`
#[derive(Debug, Clone, Copy)]
pub struct StoresLocal(pub u16);
impl Pattern for StoresLocal {
    fn matches(&self, instr: &Instruction) -> bool {
        instr.opcode() == Opcode::StoreLocal && instr.local() == Some(self.0)
    }
    fn describe(&self) -> String {
        format!("stloc {}", self.0)
    }
}

/// Matches `ldloc slot`
#[derive(Debug, Clone, Copy)]
pub struct LoadsLocal(pub u16);
impl Pattern for LoadsLocal {
    fn matches(&self, instr: &Instruction) -> bool {
        instr.opcode() == Opcode::LoadLocal && instr.local() == Some(self.0)
    }
    fn describe(&self) -> String {
        format!("ldloc {}", self.0)
    }
}

/// Matches any instruction with the given opcode
#[derive(Debug, Clone, Copy)]
pub struct HasOpcode(pub Opcode);
impl Pattern for HasOpcode {
    fn matches(&self, instr: &Instruction) -> bool {
        instr.opcode() == self.0
    }
    fn describe(&self) -> String {
        self.0.to_string()
    }
}

/// Matches `call symbol`
#[derive(Debug, Clone)]
pub struct Calls(pub String);
impl Pattern for Calls {
    fn matches(&self, instr: &Instruction) -> bool {
        instr.opcode() == Opcode::Call
            && matches!(instr.operand(), Some(Operand::Symbol(s)) if *s == self.0)
    }
    fn describe(&self) -> String {
        format!("call {}", self.0)
    }
}

/// Pattern backed by a closure
pub struct Custom<F> {
    /// Description reported when the pattern is missing
    description: String,
    /// Predicate
    predicate: F,
}
impl<F: Fn(&Instruction) -> bool> Pattern for Custom<F> {
    fn matches(&self, instr: &Instruction) -> bool {
        (self.predicate)(instr)
    }
    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Pattern matching `stloc slot`
pub fn stores_local(slot: u16) -> StoresLocal {
    StoresLocal(slot)
}
/// Pattern matching `ldloc slot`
pub fn loads_local(slot: u16) -> LoadsLocal {
    LoadsLocal(slot)
}
/// Pattern matching an opcode regardless of operand
pub fn opcode(opcode: Opcode) -> HasOpcode {
    HasOpcode(opcode)
}
/// Pattern matching a call to `symbol`
pub fn calls(symbol: impl Into<String>) -> Calls {
    Calls(symbol.into())
}
/// Pattern from an arbitrary predicate
pub fn custom<F: Fn(&Instruction) -> bool>(description: impl Into<String>, predicate: F) -> Custom<F> {
    Custom {
        description: description.into(),
        predicate,
    }
}

/// Finds the first match at or after `from`
pub fn find_first(body: &[Instruction], pattern: &impl Pattern, from: usize) -> Option<usize> {
    body.iter()
        .enumerate()
        .skip(from)
        .find(|(_, instr)| pattern.matches(instr))
        .map(|(i, _)| i)
}

/// Finds the last match strictly before `before`, searching backwards.
///
/// `before` past the end of the body searches the whole body.
pub fn find_last(body: &[Instruction], pattern: &impl Pattern, before: usize) -> Option<usize> {
    let end = before.min(body.len());
    body[..end].iter().rposition(|instr| pattern.matches(instr))
}

/// [`find_first`] that fails with [`PatchError::AnchorNotFound`]
pub fn anchor_first(
    body: &[Instruction],
    pattern: &impl Pattern,
    from: usize,
) -> Result<usize, PatchError> {
    find_first(body, pattern, from).ok_or_else(|| {
        PatchError::AnchorNotFound(format!("{} at or after index {from}", pattern.describe()))
    })
}

/// [`find_last`] that fails with [`PatchError::AnchorNotFound`]
pub fn anchor_last(
    body: &[Instruction],
    pattern: &impl Pattern,
    before: usize,
) -> Result<usize, PatchError> {
    find_last(body, pattern, before).ok_or_else(|| {
        PatchError::AnchorNotFound(format!("{} before index {before}", pattern.describe()))
    })
}
