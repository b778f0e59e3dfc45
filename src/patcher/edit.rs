//! # Edit
//!
//! Range insertion and removal on a private copy of a body.
//! Nothing is visible to the caller until [`StreamEditor::finish`] validates the result.

use std::ops::Range;

use thiserror::Error;
use tracing::debug;

use crate::code::label::{LabelAllocator, LabelId};
use crate::code::{Instruction, InstructionSequence};

use super::validate::{validate_with, LabelGraphError};

/// Rejected edit operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    /// Index past the end of the body
    #[error("index {index} is out of bounds for a body of {len} instructions")]
    OutOfBounds {
        /// Requested index
        index: usize,
        /// Current length of the body
        len: usize,
    },
    /// Removing the range would leave its labels without an instruction to land on
    #[error("removing {start}..{end} orphans labels {labels:?}")]
    OrphanedLabels {
        /// Start of the removed range
        start: usize,
        /// End of the removed range
        end: usize,
        /// Labels that would be lost
        labels: Vec<LabelId>,
    },
}

/// Editor over a copy of one body
pub struct StreamEditor {
    /// Working copy
    instructions: Vec<Instruction>,
    /// Allocator continued from the source body
    labels: LabelAllocator,
    /// Labels minted by this editor, checked for placement on finish
    minted: Vec<LabelId>,
}
impl StreamEditor {
    /// Starts editing a copy of `body`
    pub fn new(body: &InstructionSequence) -> Self {
        let (instructions, labels) = body.clone().into_parts();
        Self {
            instructions,
            labels,
            minted: Vec::new(),
        }
    }

    /// Current instructions
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
    /// Current length
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    /// Whether the working copy is empty
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Mints a label that must be placed before [`finish`](Self::finish)
    pub fn new_label(&mut self) -> LabelId {
        let label = self.labels.new_label();
        self.minted.push(label);
        label
    }

    /// Makes the instruction at `index` reachable through `label`, keeping its existing labels
    pub fn retarget(&mut self, index: usize, label: LabelId) -> Result<(), EditError> {
        let len = self.instructions.len();
        let instr = self
            .instructions
            .get_mut(index)
            .ok_or(EditError::OutOfBounds { index, len })?;
        LabelAllocator::retarget(instr, label);
        Ok(())
    }

    /// Inserts `fragment` so that its first instruction ends up at `index`.
    ///
    /// Labels stay on the instructions that carried them, so branches into the old instruction at `index` skip the fragment.
    pub fn insert(
        &mut self,
        index: usize,
        fragment: impl IntoIterator<Item = Instruction>,
    ) -> Result<(), EditError> {
        let len = self.instructions.len();
        if index > len {
            return Err(EditError::OutOfBounds { index, len });
        }
        let before = self.instructions.len();
        self.instructions.splice(index..index, fragment);
        debug!(index, inserted = self.instructions.len() - before, "inserted fragment");
        Ok(())
    }

    /// Removes `range`, returning the removed instructions.
    ///
    /// Labels carried by removed instructions move to the instruction following the range.
    pub fn remove(&mut self, range: Range<usize>) -> Result<Vec<Instruction>, EditError> {
        let len = self.instructions.len();
        if range.start > range.end || range.end > len {
            return Err(EditError::OutOfBounds {
                index: range.end.max(range.start),
                len,
            });
        }
        let labels: Vec<LabelId> = self.instructions[range.clone()]
            .iter()
            .flat_map(|i| i.labels().iter().copied())
            .collect();
        if !labels.is_empty() && range.end == len {
            return Err(EditError::OrphanedLabels {
                start: range.start,
                end: range.end,
                labels,
            });
        }

        let mut removed: Vec<_> = self.instructions.drain(range.clone()).collect();
        for instr in &mut removed {
            instr.take_labels();
        }
        if let Some(next) = self.instructions.get_mut(range.start) {
            for label in labels {
                next.attach_label(label);
            }
        }
        debug!(start = range.start, end = range.end, "removed range");
        Ok(removed)
    }

    /// Validates the label graph and produces the edited body
    pub fn finish(self) -> Result<InstructionSequence, LabelGraphError> {
        validate_with(&self.instructions, &self.minted)?;
        Ok(InstructionSequence::from_parts(
            self.instructions,
            self.labels,
        ))
    }
}
