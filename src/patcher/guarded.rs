//! # Guarded
//!
//! Guard-conditioned injection: scales a local right after it is computed, but only when an external predicate holds.
//!
//! The injected block looks like
//!
//! ```text
//!     call  <accessor>        ; push the active context
//!     call  <predicate>       ; context -> bool
//!     brfalse skip
//!     ldloc <slot>
//!     ldc   <factor>
//!     div
//!     stloc <slot>
//! skip:
//!     <instruction that originally followed the anchor>
//! ```

use tracing::debug;

use crate::code::{Instruction, InstructionSequence, Opcode, Operand};

use super::edit::StreamEditor;
use super::search::{anchor_first, anchor_last, stores_local};
use super::{PatchError, Patcher};

/// Rewrite that conditionally scales a local variable
#[derive(Debug, Clone)]
pub struct GuardedScale {
    /// Slot whose last store marks the insertion point
    anchor_slot: u16,
    /// Slot that gets scaled
    scaled_slot: u16,
    /// The anchor must come before the first store into this slot, if set
    bound_slot: Option<u16>,
    /// Zero-argument symbol returning the context
    accessor: String,
    /// Symbol taking the context and returning a bool
    predicate: String,
    /// Constant operand of the arithmetic
    factor: Operand,
    /// Arithmetic applied as `slot <op> factor`
    op: Opcode,
}
impl GuardedScale {
    /// Number of instructions injected by this rewrite
    pub const FRAGMENT_LEN: usize = 7;

    /// Divides `slot` by `factor` right after its last store, when `predicate(accessor())` is true
    pub fn new(
        slot: u16,
        accessor: impl Into<String>,
        predicate: impl Into<String>,
        factor: impl Into<Operand>,
    ) -> Self {
        Self {
            anchor_slot: slot,
            scaled_slot: slot,
            bound_slot: None,
            accessor: accessor.into(),
            predicate: predicate.into(),
            factor: factor.into(),
            op: Opcode::Div,
        }
    }
    /// Only consider stores of the anchor slot before the first store into `slot`
    pub fn before_store_to(mut self, slot: u16) -> Self {
        self.bound_slot = Some(slot);
        self
    }
    /// Scale `slot` instead of the anchor slot. `slot` must be stored to before the insertion point.
    pub fn scaling(mut self, slot: u16) -> Self {
        self.scaled_slot = slot;
        self
    }
    /// Use `op` instead of division. Only arithmetic opcodes are accepted.
    pub fn operation(mut self, op: Opcode) -> Result<Self, PatchError> {
        if !op.is_arithmetic() {
            return Err(PatchError::NotArithmetic(op));
        }
        self.op = op;
        Ok(self)
    }

    /// Index the fragment is inserted at
    fn insertion_point(&self, body: &[Instruction]) -> Result<usize, PatchError> {
        let reference = match self.bound_slot {
            Some(slot) => anchor_first(body, &stores_local(slot), 0)?,
            None => body.len(),
        };
        let anchor = anchor_last(body, &stores_local(self.anchor_slot), reference)?;
        debug!(reference, anchor, "located anchors");

        let insert_at = anchor + 1;
        if self.scaled_slot != self.anchor_slot {
            let computed = anchor_first(body, &stores_local(self.scaled_slot), 0)?;
            if computed >= insert_at {
                return Err(PatchError::AnchorNotFound(format!(
                    "stloc {} before index {insert_at}",
                    self.scaled_slot
                )));
            }
        }
        if insert_at >= body.len() {
            return Err(PatchError::AnchorNotFound(format!(
                "instruction following stloc {} at {anchor}",
                self.anchor_slot
            )));
        }
        Ok(insert_at)
    }
}

impl Patcher for GuardedScale {
    fn patch(&self, body: &InstructionSequence) -> Result<InstructionSequence, PatchError> {
        let insert_at = self.insertion_point(body.as_slice())?;

        let mut editor = StreamEditor::new(body);
        let skip = editor.new_label();
        editor.retarget(insert_at, skip)?;
        editor.insert(
            insert_at,
            [
                Instruction::call(self.accessor.as_str()),
                Instruction::call(self.predicate.as_str()),
                Instruction::branch_false(skip),
                Instruction::load_local(self.scaled_slot),
                Instruction::load_const(self.factor.clone()),
                Instruction::new(self.op),
                Instruction::store_local(self.scaled_slot),
            ],
        )?;
        Ok(editor.finish()?)
    }

    fn name(&self) -> &str {
        "guarded scale"
    }
}
