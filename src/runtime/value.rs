//! # Value
//!
//! Dynamically typed values flowing through arguments, locals and the evaluation stack

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::code::Operand;

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// Single precision float
    F32(f32),
    /// Double precision float
    F64(f64),
    /// Opaque host object, compared by identity
    Object(Arc<dyn Any + Send + Sync>),
}
impl Value {
    /// Wraps a host object
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }
    /// Converts a constant operand
    pub fn from_operand(operand: &Operand) -> Option<Self> {
        match *operand {
            Operand::I32(v) => Some(Self::I32(v)),
            Operand::F32(v) => Some(Self::F32(v)),
            Operand::F64(v) => Some(Self::F64(v)),
            Operand::Bool(v) => Some(Self::Bool(v)),
            _ => None,
        }
    }

    /// Truthiness used by conditional branches: null, `false` and zero are false
    pub fn is_truthy(&self) -> bool {
        match *self {
            Self::Null => false,
            Self::Bool(v) => v,
            Self::I32(v) => v != 0,
            Self::F32(v) => v != 0.0,
            Self::F64(v) => v != 0.0,
            Self::Object(_) => true,
        }
    }
    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }
    /// Integer payload
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }
    /// Single precision payload
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }
    /// Double precision payload
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F64(v) => Some(v),
            _ => None,
        }
    }
    /// Borrows the host object if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref(),
            _ => None,
        }
    }
}
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::I32(v) => f.debug_tuple("I32").field(v).finish(),
            Self::F32(v) => f.debug_tuple("F32").field(v).finish(),
            Self::F64(v) => f.debug_tuple("F64").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}
