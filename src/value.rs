//! Values crossing the boundary
//!
//! Language code sees wrapped objects as `Value::Object`; native code sees
//! them as `Value::Native` (an address plus the static type it was passed
//! as). The runtime converts between the two at every crossing.
//! `Value::Ref` is a shared cell: both sides observe mutations through it.

use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::registry::Wrapper;
use crate::types::TypeTag;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// How the language side may use a native object passed to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Ordinary pointer argument
    #[default]
    Borrowed,
    /// The object only lives for the duration of the call; its wrapper is
    /// invalidated when the override returns
    InvalidateAfterUse,
}

/// A native object reference as seen by native code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRef {
    pub handle: NativeHandle,
    pub static_type: TypeTag,
    pub policy: ArgPolicy,
}

impl NativeRef {
    pub fn new(handle: NativeHandle, static_type: TypeTag) -> Self {
        Self {
            handle,
            static_type,
            policy: ArgPolicy::Borrowed,
        }
    }

    pub fn invalidate_after_use(mut self) -> Self {
        self.policy = ArgPolicy::InvalidateAfterUse;
        self
    }
}

/// Pass-by-reference cell shared between both sides
#[derive(Clone, Default)]
pub struct ValueCell(Arc<Mutex<Value>>);

impl ValueCell {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    /// Read-modify-write under the cell lock
    pub fn update<F: FnOnce(&Value) -> Value>(&self, f: F) {
        let mut slot = self.0.lock();
        let next = f(&slot);
        *slot = next;
    }

    pub fn same_cell(&self, other: &ValueCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&*self.0.lock()).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Wrapped object (language side)
    Object(Wrapper),
    /// Native object reference (native side)
    Native(NativeRef),
    Ref(ValueCell),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Native(_) => "native",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(BindingError::type_mismatch("int", other.type_name())),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(BindingError::type_mismatch("float", other.type_name())),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(BindingError::type_mismatch("bool", other.type_name())),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(BindingError::type_mismatch("str", other.type_name())),
        }
    }

    pub fn as_object(&self) -> Result<&Wrapper> {
        match self {
            Value::Object(w) => Ok(w),
            other => Err(BindingError::type_mismatch("object", other.type_name())),
        }
    }

    pub fn as_native(&self) -> Result<NativeRef> {
        match self {
            Value::Native(r) => Ok(*r),
            other => Err(BindingError::type_mismatch("native", other.type_name())),
        }
    }

    pub fn as_ref_cell(&self) -> Result<&ValueCell> {
        match self {
            Value::Ref(cell) => Ok(cell),
            other => Err(BindingError::type_mismatch("ref", other.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.is(b),
            (Value::Native(a), Value::Native(b)) => a.handle == b.handle,
            (Value::Ref(a), Value::Ref(b)) => a.same_cell(b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Wrapper> for Value {
    fn from(w: Wrapper) -> Self {
        Value::Object(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_cell_shared() {
        let cell = ValueCell::new(Value::Int(1));
        let alias = cell.clone();
        alias.update(|v| Value::Int(v.as_int().unwrap_or(0) + 41));
        assert_eq!(cell.get(), Value::Int(42));
        assert!(cell.same_cell(&alias));
        assert_eq!(Value::Ref(cell), Value::Ref(alias));
    }

    #[test]
    fn test_accessors_report_mismatch() {
        let err = Value::Str("x".into()).as_int().unwrap_err();
        assert!(matches!(err, BindingError::TypeMismatch { .. }));
        assert_eq!(Value::Int(3).as_float().unwrap(), 3.0);
        assert!(Value::None.is_none());
    }
}
