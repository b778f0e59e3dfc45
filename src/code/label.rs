//! # Label
//!
//! Jump targets inside a single method body and the allocator that mints them

use std::collections::HashSet;
use std::fmt;

use super::Instruction;

/// Opaque identifier of a jump target.
///
/// A label is only meaningful inside the body that minted it; ids from two different bodies may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(u32);
impl LabelId {
    /// Creates a label from a raw id, used when decoding a body that already carries labels
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }
    /// Raw numeric value of the label
    pub fn raw(self) -> u32 {
        self.0
    }
}
impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Mints labels for one method body
#[derive(Debug, Clone, Default)]
pub struct LabelAllocator {
    /// Where the search for the next free id starts
    next: u32,
    /// Ids used by the body or already handed out
    taken: HashSet<u32>,
}
impl LabelAllocator {
    /// Creates an allocator that will never hand out an id already used by `instructions`,
    /// either as an attached label or as a branch operand.
    ///
    /// Minting starts past the highest id in use. When that is `u32::MAX` it continues from the lowest free id.
    pub fn for_instructions(instructions: &[Instruction]) -> Self {
        let taken: HashSet<u32> = instructions
            .iter()
            .flat_map(|i| i.labels().iter().copied().chain(i.branch_target()))
            .map(LabelId::raw)
            .collect();
        let next = taken
            .iter()
            .max()
            .and_then(|max| max.checked_add(1))
            .unwrap_or(0);
        Self { next, taken }
    }

    /// Mints a label not used anywhere in the body and never returned before.
    ///
    /// Ids wrap around to the lowest free one, skipping every taken id.
    pub fn new_label(&mut self) -> LabelId {
        let mut id = self.next;
        while !self.taken.insert(id) {
            id = id.wrapping_add(1);
        }
        self.next = id.wrapping_add(1);
        LabelId(id)
    }

    /// Makes `instruction` reachable through `label`.
    ///
    /// Existing incoming labels are left where they are; the instruction just gains one more.
    pub fn retarget(instruction: &mut Instruction, label: LabelId) {
        instruction.attach_label(label);
    }
}

#[cfg(test)]
mod tests {
    use crate::code::{Instruction, Opcode};

    use super::{LabelAllocator, LabelId};

    #[test]
    /// Fresh allocators start past every id the body already uses
    fn test_seeded_past_existing() {
        let mut target = Instruction::new(Opcode::Nop);
        target.attach_label(LabelId::from_raw(4));
        let body = vec![Instruction::branch(LabelId::from_raw(9)), target];

        let mut alloc = LabelAllocator::for_instructions(&body);
        assert_eq!(alloc.new_label(), LabelId::from_raw(10));
        assert_eq!(alloc.new_label(), LabelId::from_raw(11));
    }

    #[test]
    /// The highest possible id in a body doesn't overflow and is never handed out again
    fn test_max_id_in_body() {
        let max = LabelId::from_raw(u32::MAX);
        let low = LabelId::from_raw(0);
        let body = vec![
            Instruction::branch(max),
            Instruction::branch(low),
            Instruction::ret().labelled(max).labelled(low),
        ];

        let mut alloc = LabelAllocator::for_instructions(&body);
        let minted: Vec<_> = (0..3).map(|_| alloc.new_label()).collect();
        assert_eq!(minted, [1, 2, 3].map(LabelId::from_raw).to_vec());
    }

    #[test]
    /// Minting up to `u32::MAX` wraps to free ids instead of reusing one
    fn test_wraps_without_reuse() {
        let body = vec![Instruction::branch(LabelId::from_raw(u32::MAX - 1))];
        let mut alloc = LabelAllocator::for_instructions(&body);
        assert_eq!(alloc.new_label(), LabelId::from_raw(u32::MAX));
        assert_eq!(alloc.new_label(), LabelId::from_raw(0));
        assert_eq!(alloc.new_label(), LabelId::from_raw(1));
    }

    #[test]
    /// Retargeting keeps the labels that were already there
    fn test_retarget_accumulates() {
        let mut alloc = LabelAllocator::default();
        let first = alloc.new_label();
        let second = alloc.new_label();

        let mut instr = Instruction::new(Opcode::Return);
        LabelAllocator::retarget(&mut instr, first);
        LabelAllocator::retarget(&mut instr, second);
        LabelAllocator::retarget(&mut instr, second);

        assert_eq!(instr.labels(), &[first, second]);
    }
}
