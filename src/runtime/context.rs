//! # Context
//!
//! Handle to the active global context that injected guard code consults.
//!
//! Lifecycle: the host installs its context once during startup with [`ContextHandle::install`].
//! Reads before that observe [`Value::Null`]; [`ContextHandle::clear`] returns the handle to that state.
//! The process-wide handle is [`ContextHandle::global`]; runtimes can be given a private handle instead.

use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;

use super::value::Value;

lazy_static! {
    /// Process-wide context shared by every runtime that doesn't get its own handle
    static ref GLOBAL: ContextHandle = ContextHandle::new();
}

/// Shared, replaceable context value
#[derive(Clone, Default)]
pub struct ContextHandle(Arc<RwLock<Value>>);
impl ContextHandle {
    /// Creates an empty handle, independent from the global one
    pub fn new() -> Self {
        Self::default()
    }
    /// The process-wide handle
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Installs `context`, returning the previous one
    pub fn install(&self, context: Value) -> Value {
        let mut slot = self.0.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, context)
    }
    /// Current context, [`Value::Null`] if none is installed
    pub fn get(&self) -> Value {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
    /// Removes the context, returning it
    pub fn clear(&self) -> Value {
        self.install(Value::Null)
    }
    /// Whether a context is installed
    pub fn is_installed(&self) -> bool {
        !matches!(self.get(), Value::Null)
    }
    /// Whether two handles share the same slot
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
