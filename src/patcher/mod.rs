//! # Patcher
//!
//! This module covers patchers, which build an edited copy of a method body.
//! A patcher never touches the body it is given; the caller decides whether the result gets installed.

pub mod edit;
pub mod guarded;
pub mod search;
pub mod validate;

use thiserror::Error;

use crate::code::{InstructionSequence, Opcode};

use self::edit::EditError;
use self::validate::LabelGraphError;

/// Errors raised while rewriting a body
#[derive(Debug, Error)]
pub enum PatchError {
    /// A pattern the rewrite relies on is not present in the body
    #[error("anchor not found: {0}")]
    AnchorNotFound(String),
    /// A rewrite was configured with an opcode that isn't arithmetic
    #[error("{0} is not an arithmetic opcode")]
    NotArithmetic(Opcode),
    /// An edit operation was rejected
    #[error("{0}")]
    Edit(#[from] EditError),
    /// The edited body failed label validation
    #[error("{0}")]
    LabelGraph(#[from] LabelGraphError),
    /// Custom error from a user supplied rewrite
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Rewrites method bodies.
///
/// Implementations must be pure with respect to their input and deterministic: the same body always produces the same result.
pub trait Patcher: Send + Sync {
    /// Builds the replacement body
    fn patch(&self, body: &InstructionSequence) -> Result<InstructionSequence, PatchError>;

    /// Name used when reporting on this patcher
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Patcher backed by a closure
///
/// See [`from_fn`].
pub struct FnPatcher<F> {
    /// Name reported in logs
    name: String,
    /// Rewrite function
    func: F,
}
impl<F> Patcher for FnPatcher<F>
where
    F: Fn(&InstructionSequence) -> Result<InstructionSequence, PatchError> + Send + Sync,
{
    fn patch(&self, body: &InstructionSequence) -> Result<InstructionSequence, PatchError> {
        (self.func)(body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Creates a patcher from a rewrite function
pub fn from_fn<F>(name: impl Into<String>, func: F) -> FnPatcher<F>
where
    F: Fn(&InstructionSequence) -> Result<InstructionSequence, PatchError> + Send + Sync,
{
    FnPatcher {
        name: name.into(),
        func,
    }
}
