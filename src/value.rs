//! Tagged runtime values.
//!
//! A [`Value`] is a lightweight runtime instance of a type. Scalar variants are
//! stored inline; container variants (strings, arrays, dicts) carry shared
//! handles and are mutated only by the process that owns the enclosing slot.
//! Passing a container across a process boundary deep-copies it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{RuntimeError, RuntimeResult};
use crate::function::Function;
use crate::process::Process;
use crate::promise::Promise;
use crate::types::TypeId;

/// Shared handle to an owned UTF-8 string.
pub type StrHandle = Arc<RwLock<String>>;
/// Shared handle to an ordered sequence of values.
pub type ArrayHandle = Arc<RwLock<Vec<Value>>>;
/// Shared handle to a string-keyed mapping.
pub type DictHandle = Arc<RwLock<HashMap<String, Value>>>;

/// A single stack slot's worth of runtime data.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Owned UTF-8 string.
    Str(StrHandle),
    /// Ordered sequence of values.
    Array(ArrayHandle),
    /// String-keyed mapping.
    Dict(DictHandle),
    /// Handle to a spawned process.
    Process(Arc<Process>),
    /// Handle to a promise cell.
    Promise(Arc<Promise>),
    /// Handle to a function descriptor.
    Function(Arc<Function>),
    /// A type descriptor.
    TypeDesc(TypeId),
    /// Signed instruction offset embedded in a constant pool.
    Jump(i32),
}

/// Discriminant of a [`Value`], used for coherence checks and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Array,
    Dict,
    Process,
    Promise,
    Function,
    TypeDesc,
    Jump,
}

impl ValueKind {
    /// Human-readable tag name.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Array => "array",
            ValueKind::Dict => "dict",
            ValueKind::Process => "process",
            ValueKind::Promise => "promise",
            ValueKind::Function => "function",
            ValueKind::TypeDesc => "type",
            ValueKind::Jump => "jump-offset",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Build an owned string value.
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Arc::new(RwLock::new(s.into())))
    }

    /// Build an array value from its elements.
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(elements)))
    }

    /// Build an empty dict value.
    pub fn dict() -> Self {
        Value::Dict(Arc::new(RwLock::new(HashMap::new())))
    }

    /// The tag of the inhabited variant.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Array(_) => ValueKind::Array,
            Value::Dict(_) => ValueKind::Dict,
            Value::Process(_) => ValueKind::Process,
            Value::Promise(_) => ValueKind::Promise,
            Value::Function(_) => ValueKind::Function,
            Value::TypeDesc(_) => ValueKind::TypeDesc,
            Value::Jump(_) => ValueKind::Jump,
        }
    }

    /// True for the nil variant.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    fn mismatch(&self, expected: ValueKind) -> RuntimeError {
        RuntimeError::type_mismatch(expected.name(), self.kind().name())
    }

    /// Read as an integer.
    pub fn as_int(&self) -> RuntimeResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch(ValueKind::Int)),
        }
    }

    /// Read as a float.
    pub fn as_float(&self) -> RuntimeResult<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch(ValueKind::Float)),
        }
    }

    /// Read as a boolean.
    pub fn as_bool(&self) -> RuntimeResult<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch(ValueKind::Bool)),
        }
    }

    /// Read as a string handle.
    pub fn as_str(&self) -> RuntimeResult<StrHandle> {
        match self {
            Value::Str(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Str)),
        }
    }

    /// Read as an array handle.
    pub fn as_array(&self) -> RuntimeResult<ArrayHandle> {
        match self {
            Value::Array(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Array)),
        }
    }

    /// Read as a dict handle.
    pub fn as_dict(&self) -> RuntimeResult<DictHandle> {
        match self {
            Value::Dict(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Dict)),
        }
    }

    /// Read as a process handle.
    pub fn as_process(&self) -> RuntimeResult<Arc<Process>> {
        match self {
            Value::Process(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Process)),
        }
    }

    /// Read as a promise handle.
    pub fn as_promise(&self) -> RuntimeResult<Arc<Promise>> {
        match self {
            Value::Promise(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Promise)),
        }
    }

    /// Read as a function handle.
    pub fn as_function(&self) -> RuntimeResult<Arc<Function>> {
        match self {
            Value::Function(v) => Ok(Arc::clone(v)),
            other => Err(other.mismatch(ValueKind::Function)),
        }
    }

    /// Read as a jump offset.
    pub fn as_jump(&self) -> RuntimeResult<i32> {
        match self {
            Value::Jump(v) => Ok(*v),
            other => Err(other.mismatch(ValueKind::Jump)),
        }
    }

    /// Copy that severs container sharing. Strings, arrays and dicts are
    /// cloned recursively; every other variant is a plain handle/scalar copy.
    /// Used at message-passing and promise-read boundaries to preserve the
    /// single-writer rule for container contents.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Str(s) => Value::str(s.read().clone()),
            Value::Array(a) => {
                let copied = a.read().iter().map(Value::deep_copy).collect();
                Value::array(copied)
            }
            Value::Dict(d) => {
                let copied = d
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                Value::Dict(Arc::new(RwLock::new(copied)))
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Process(a), Value::Process(b)) => Arc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::TypeDesc(a), Value::TypeDesc(b)) => a == b,
            (Value::Jump(a), Value::Jump(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{:?}", *v.read()),
            Value::Array(v) => write!(f, "{:?}", *v.read()),
            Value::Dict(v) => write!(f, "dict({} entries)", v.read().len()),
            Value::Process(p) => write!(f, "process#{}", p.id()),
            Value::Promise(_) => write!(f, "promise"),
            Value::Function(func) => write!(f, "function '{}'", func.name),
            Value::TypeDesc(t) => write!(f, "type#{}", t.index()),
            Value::Jump(v) => write!(f, "jump({v})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_tracks_variant() {
        assert_eq!(Value::Int(3).kind(), ValueKind::Int);
        assert_eq!(Value::str("x").kind(), ValueKind::Str);
        assert_eq!(Value::Nil.kind(), ValueKind::Nil);
        assert_eq!(Value::array(vec![]).kind(), ValueKind::Array);
    }

    #[test]
    fn accessor_mismatch_reports_both_kinds() {
        let err = Value::Int(1).as_bool().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::type_mismatch("bool", "int"),
        );
    }

    #[test]
    fn deep_copy_severs_sharing() {
        let original = Value::array(vec![Value::str("a"), Value::Int(1)]);
        let copy = original.deep_copy();

        if let (Value::Array(orig), Value::Array(copied)) = (&original, &copy) {
            assert!(!Arc::ptr_eq(orig, copied));
            copied.write().push(Value::Int(2));
            assert_eq!(orig.read().len(), 2);
            assert_eq!(copied.read().len(), 3);
        } else {
            unreachable!();
        }
    }
}
