//! Host-side values and interpreter-typed objects.
//!
//! `Value` is what host code hands to and receives from the bridge.
//! `TypedValue` is the interpreter's own tagged representation; it crosses the
//! bridge boundary intact so a value fetched from the interpreter can be
//! re-injected later without a string round-trip.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::codec;

/// A value in the host runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Ends an argument vector early when passed in a call argument list.
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// A wrapped interpreter object (see [`Obj`]).
    Obj(Obj),
}

impl Value {
    /// The interpreter-facing string form of this value.
    ///
    /// Lists render as interpreter list syntax with full quoting, so the
    /// result can be handed back to the interpreter verbatim.
    pub fn string_form(&self) -> Result<String, crate::BridgeError> {
        codec::value_string_form(self)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

/// The interpreter's tagged value representation.
///
/// Closed set of recognized tags plus an opaque fallback arm that preserves
/// the native payload untouched.
#[derive(Debug, Clone)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<TypedValue>),
    Opaque(Opaque),
}

impl TypedValue {
    /// The interpreter's name for this value's type tag.
    pub fn type_name(&self) -> &str {
        match self {
            TypedValue::Bool(_) => "boolean",
            TypedValue::Int(_) => "int",
            TypedValue::Double(_) => "double",
            TypedValue::Bytes(_) => "bytearray",
            TypedValue::Text(_) => "string",
            TypedValue::List(_) => "list",
            TypedValue::Opaque(o) => o.type_name(),
        }
    }

    /// The interpreter-facing string form.
    pub fn string_form(&self) -> String {
        codec::string_form(self)
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypedValue::Bool(a), TypedValue::Bool(b)) => a == b,
            (TypedValue::Int(a), TypedValue::Int(b)) => a == b,
            (TypedValue::Double(a), TypedValue::Double(b)) => a == b,
            (TypedValue::Bytes(a), TypedValue::Bytes(b)) => a == b,
            (TypedValue::Text(a), TypedValue::Text(b)) => a == b,
            (TypedValue::List(a), TypedValue::List(b)) => a == b,
            (TypedValue::Opaque(a), TypedValue::Opaque(b)) => a.same(b),
            _ => false,
        }
    }
}

/// An interpreter value whose type tag the codec does not recognize.
///
/// The native payload rides along untouched so re-injecting the value hands
/// the interpreter its own object back.
#[derive(Clone)]
pub struct Opaque {
    type_name: Arc<str>,
    payload: Arc<dyn Any + Send + Sync>,
    display: Arc<dyn Fn(&(dyn Any + Send + Sync)) -> String + Send + Sync>,
}

impl Opaque {
    pub fn new<T, F>(type_name: &str, payload: T, display: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Opaque {
            type_name: Arc::from(type_name),
            payload: Arc::new(payload),
            display: Arc::new(move |any: &(dyn Any + Send + Sync)| {
                match any.downcast_ref::<T>() {
                    Some(t) => display(t),
                    None => String::new(),
                }
            }),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &(dyn Any + Send + Sync) {
        &*self.payload
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// The interpreter's display string for the payload.
    pub fn display(&self) -> String {
        (self.display)(&*self.payload)
    }

    /// True when both wrap the same native object.
    pub fn same(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A host-side handle to an interpreter value, kept in its typed form.
///
/// Returned for results the codec cannot (or, with typed results disabled,
/// should not) translate. Holds one counted reference to the underlying
/// value and caches its string form on first use.
#[derive(Clone)]
pub struct Obj {
    inner: Arc<ObjInner>,
}

struct ObjInner {
    value: TypedValue,
    string: OnceLock<String>,
}

impl Obj {
    pub fn new(value: TypedValue) -> Self {
        Obj {
            inner: Arc::new(ObjInner {
                value,
                string: OnceLock::new(),
            }),
        }
    }

    pub fn value(&self) -> &TypedValue {
        &self.inner.value
    }

    pub fn type_name(&self) -> &str {
        self.inner.value.type_name()
    }

    /// The cached string form, computed on first access.
    pub fn string_form(&self) -> &str {
        self.inner
            .string
            .get_or_init(|| self.inner.value.string_form())
    }

    /// The value as host text, applying the byte-array decoding heuristic.
    pub fn as_text(&self) -> Value {
        match &self.inner.value {
            TypedValue::Bytes(b) => codec::text_from_bytes(b),
            _ => Value::Str(self.string_form().to_string()),
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.value == other.inner.value
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.string_form())
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object: {:?}>", self.type_name(), self.string_form())
    }
}
