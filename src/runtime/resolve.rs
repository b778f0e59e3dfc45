//! # Resolve
//!
//! Identities of host methods and their resolution to handles

use std::fmt;

use thiserror::Error;

/// Names one host method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodIdentity {
    /// Declaring type
    pub owner_type: String,
    /// Method name
    pub name: String,
    /// Parameter type names. `None` matches any overload.
    pub parameters: Option<Vec<String>>,
}
impl MethodIdentity {
    /// Identity matching any overload of `owner_type::name`
    pub fn new(owner_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            name: name.into(),
            parameters: None,
        }
    }
    /// Narrows the identity to one parameter list
    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a defined method satisfies this identity
    pub fn matches(&self, defined: &MethodIdentity) -> bool {
        self.owner_type == defined.owner_type
            && self.name == defined.name
            && match &self.parameters {
                None => true,
                Some(wanted) => defined.parameters.as_deref().unwrap_or(&[]) == wanted.as_slice(),
            }
    }
}
impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner_type, self.name)?;
        match &self.parameters {
            Some(params) => write!(f, "({})", params.join(", ")),
            None => f.write_str("(..)"),
        }
    }
}

/// Index of a method in a runtime's method table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(pub(crate) usize);

/// Failure to map an identity to exactly one method
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing matches
    #[error("no method matches {0}")]
    Missing(MethodIdentity),
    /// More than one method matches
    #[error("{wanted} is ambiguous between {candidates:?}")]
    Ambiguous {
        /// Requested identity
        wanted: MethodIdentity,
        /// Every match, formatted
        candidates: Vec<String>,
    },
}

/// Resolves `wanted` against a table of defined methods
pub fn resolve<'a>(
    table: impl IntoIterator<Item = &'a MethodIdentity>,
    wanted: &MethodIdentity,
) -> Result<MethodHandle, ResolutionError> {
    let mut hits = table
        .into_iter()
        .enumerate()
        .filter(|(_, defined)| wanted.matches(defined));
    match (hits.next(), hits.next()) {
        (None, _) => Err(ResolutionError::Missing(wanted.clone())),
        (Some((index, _)), None) => Ok(MethodHandle(index)),
        (Some(first), Some(second)) => Err(ResolutionError::Ambiguous {
            wanted: wanted.clone(),
            candidates: [first, second]
                .into_iter()
                .chain(hits)
                .map(|(_, m)| m.to_string())
                .collect(),
        }),
    }
}
