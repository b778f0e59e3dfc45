//! # Validate
//!
//! Post-edit check of a body's label graph

use std::collections::HashMap;

use thiserror::Error;

use crate::code::label::LabelId;
use crate::code::Instruction;

/// Broken label graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelGraphError {
    /// A branch jumps to a label that no instruction carries
    #[error("branch at {index} targets {label}, which is not attached to any instruction")]
    Dangling {
        /// Index of the branch
        index: usize,
        /// Missing label
        label: LabelId,
    },
    /// The same label is attached to more than one instruction
    #[error("{label} is attached to both {first} and {second}")]
    DuplicateTarget {
        /// Label attached twice
        label: LabelId,
        /// First instruction carrying it
        first: usize,
        /// Second instruction carrying it
        second: usize,
    },
    /// A label minted during an edit never landed on an instruction
    #[error("{0} was minted but never placed")]
    Unplaced(LabelId),
}

/// Maps every attached label to the index of the instruction carrying it
pub fn label_targets(body: &[Instruction]) -> Result<HashMap<LabelId, usize>, LabelGraphError> {
    let mut targets = HashMap::new();
    for (index, instr) in body.iter().enumerate() {
        for &label in instr.labels() {
            if let Some(first) = targets.insert(label, index) {
                return Err(LabelGraphError::DuplicateTarget {
                    label,
                    first,
                    second: index,
                });
            }
        }
    }
    Ok(targets)
}

/// Walks every branch and checks its label resolves to exactly one instruction
pub fn validate(body: &[Instruction]) -> Result<(), LabelGraphError> {
    let targets = label_targets(body)?;
    for (index, instr) in body.iter().enumerate() {
        if let Some(label) = instr.branch_target() {
            if !targets.contains_key(&label) {
                return Err(LabelGraphError::Dangling { index, label });
            }
        }
    }
    Ok(())
}

/// [`validate`], additionally requiring every label in `minted` to be placed
pub fn validate_with(body: &[Instruction], minted: &[LabelId]) -> Result<(), LabelGraphError> {
    validate(body)?;
    let placed = |label: &LabelId| body.iter().any(|i| i.labels().contains(label));
    match minted.iter().find(|l| !placed(l)) {
        Some(&label) => Err(LabelGraphError::Unplaced(label)),
        None => Ok(()),
    }
}
