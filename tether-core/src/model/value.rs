//! Dynamic Values
//!
//! The binding engine traverses object graphs through the [`Value`] enum
//! rather than through static types. Objects in the graph are trait objects
//! implementing [`Bindable`], which exposes a capability descriptor and an
//! optional change notifier.
//!
//! # Identity
//!
//! Objects and lists compare by pointer identity: two `Value::Object`s are
//! equal exactly when they refer to the same allocation. This is what
//! watcher bookkeeping (duplicate-safe collection tracking, re-attachment
//! checks) relies on.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::model::descriptor::TypeDescriptor;
use crate::model::list::ObservableList;
use crate::model::notify::ChangeNotifier;

/// An object that can participate in a bound graph.
///
/// Implementors expose a static capability descriptor (member accessors,
/// methods, indexer) and, if the object is mutable and observable, a
/// [`ChangeNotifier`]. An object without a notifier is still readable, but
/// the subtree below it stays static until an ancestor re-attaches it.
pub trait Bindable: Any + Send + Sync {
    /// The capability table for this object's concrete type.
    fn descriptor(&self) -> &'static TypeDescriptor;

    /// The member-changed event source, if this object can notify.
    fn notifier(&self) -> Option<&ChangeNotifier> {
        None
    }

    /// Upcast for accessor downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a bindable object.
pub type Obj = Arc<dyn Bindable>;

/// A value flowing through the binding engine.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value. Reference-like members read as `Null` when unset.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A bindable object, compared by identity.
    Object(Obj),
    /// An observable collection, compared by identity.
    List(Arc<ObservableList>),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// The declared kind of this value. `Null` reports [`ValueKind::Any`]
    /// since it inhabits every reference-like kind.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Any,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Object(_) => ValueKind::Object,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&Obj> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Arc<ObservableList>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Pointer identity for objects and lists; `None` for scalars.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(obj) => Some(Arc::as_ptr(obj) as *const () as usize),
            Value::List(list) => Some(Arc::as_ptr(list) as *const () as usize),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Object(obj) => write!(f, "<{}>", obj.descriptor().name()),
            Value::List(list) => write!(f, "[..{}]", list.len()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Value::Object(v)
    }
}

impl From<Arc<ObservableList>> for Value {
    fn from(v: Arc<ObservableList>) -> Self {
        Value::List(v)
    }
}

/// A captured indexer key: the constant argument of an indexed access in a
/// declared computation. Indexed members notify under the rendered form,
/// `[key]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Arc<str>),
    Int(i64),
}

impl Key {
    pub fn str(s: impl AsRef<str>) -> Self {
        Key::Str(Arc::from(s.as_ref()))
    }

    /// The member name this key notifies and registers under.
    pub fn notification_name(&self) -> String {
        format!("[{self}]")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::str(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

/// Declared kind of a member or expression, used for configuration-time
/// type checks and zero-value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
    Object,
    List,
    /// Statically unknown; every check against `Any` passes and fails at
    /// runtime instead, if at all.
    Any,
}

impl ValueKind {
    /// Whether a value of kind `source` may be assigned to a slot of this
    /// kind, applying widening (`Int -> Float`) automatically.
    pub fn accepts(self, source: ValueKind) -> bool {
        self == source
            || self == ValueKind::Any
            || source == ValueKind::Any
            || (self == ValueKind::Float && source == ValueKind::Int)
    }

    /// The zero value written when null propagation short-circuits into a
    /// slot of this kind. Value kinds zero out; reference-like kinds stay
    /// null, mirroring `default(T)` semantics.
    pub fn zero_value(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Str | ValueKind::Object | ValueKind::List | ValueKind::Any => Value::Null,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::Object => "object",
            ValueKind::List => "list",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// A memberless object for engine-internal tests.
#[cfg(test)]
pub(crate) fn test_object() -> Obj {
    struct Inert;
    impl Bindable for Inert {
        fn descriptor(&self) -> &'static TypeDescriptor {
            static DESC: std::sync::OnceLock<TypeDescriptor> = std::sync::OnceLock::new();
            DESC.get_or_init(|| TypeDescriptor::builder("Inert").build())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    Arc::new(Inert)
}
