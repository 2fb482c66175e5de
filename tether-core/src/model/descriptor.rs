//! Capability Descriptor Tables
//!
//! Rust has no runtime reflection, so every bindable type registers a
//! [`TypeDescriptor`]: a flattened table of member accessors, instance
//! methods, and an optional indexer. The table is built once per type
//! (typically behind a `OnceLock`) and handed around as `&'static`.
//!
//! # Declaring types
//!
//! Each [`Member`] records the name of the type that declares it. Deep or
//! composed hierarchies flatten their inherited members into the concrete
//! type's table at build time, so lookup is always a single map probe by
//! member name against the runtime instance's own table. No hierarchy is
//! ever walked at resolution time.
//!
//! # Static typing
//!
//! Members carry their declared [`ValueKind`], and object/collection
//! members point at the descriptor of their static value type. This is
//! what configuration-time chain resolution and type checking run on,
//! including collection-item-type discovery for aggregate analysis.

use indexmap::IndexMap;

use crate::error::{BindingError, EvalError};
use crate::model::value::{Bindable, Key, Value, ValueKind};

/// Reads a member off an instance. Resolution happens against the
/// instance's own descriptor, so the downcast inside never observes a
/// foreign type.
pub type GetFn = fn(&dyn Bindable) -> Value;

/// Writes a member. Implementations store the value and raise the
/// object's change notification, so the result carries any binding fault
/// triggered by the write.
pub type SetFn = fn(&dyn Bindable, Value) -> Result<(), BindingError>;

/// An instance method registered on a descriptor.
pub type MethodFn = fn(&dyn Bindable, &[Value]) -> Result<Value, EvalError>;

/// An indexer access with a captured key. A missing entry reads as null.
pub type IndexFn = fn(&dyn Bindable, &Key) -> Value;

/// Lazy link to another type's descriptor. Indirection through a
/// function keeps self-referential and mutually-referential graphs from
/// re-entering their own initialization.
pub type DescriptorFn = fn() -> &'static TypeDescriptor;

/// One entry of a capability table.
#[derive(Clone)]
pub struct Member {
    name: &'static str,
    declared_by: Option<&'static str>,
    kind: ValueKind,
    descriptor: Option<DescriptorFn>,
    item: Option<DescriptorFn>,
    get: GetFn,
    set: Option<SetFn>,
}

impl Member {
    /// A read-only member of scalar kind.
    pub fn readable(name: &'static str, kind: ValueKind, get: GetFn) -> Self {
        Self {
            name,
            declared_by: None,
            kind,
            descriptor: None,
            item: None,
            get,
            set: None,
        }
    }

    /// A read-write member of scalar kind.
    pub fn writable(name: &'static str, kind: ValueKind, get: GetFn, set: SetFn) -> Self {
        Self {
            set: Some(set),
            ..Self::readable(name, kind, get)
        }
    }

    /// Set the statically declared type of an object-kinded member.
    pub fn of_type(mut self, descriptor: DescriptorFn) -> Self {
        self.kind = ValueKind::Object;
        self.descriptor = Some(descriptor);
        self
    }

    /// Mark this member as a collection whose items carry `item`'s
    /// descriptor.
    pub fn of_items(mut self, item: DescriptorFn) -> Self {
        self.kind = ValueKind::List;
        self.item = Some(item);
        self
    }

    /// Record the type that declares this member, for flattened
    /// hierarchies. Defaults to the owning descriptor.
    pub fn declared_by(mut self, ty: &'static str) -> Self {
        self.declared_by = Some(ty);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Static descriptor of the member's value, when it is object-kinded.
    pub fn value_descriptor(&self) -> Option<&'static TypeDescriptor> {
        self.descriptor.map(|f| f())
    }

    /// Static descriptor of collection items, when list-kinded.
    pub fn item_descriptor(&self) -> Option<&'static TypeDescriptor> {
        self.item.map(|f| f())
    }

    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }

    pub(crate) fn get(&self, instance: &dyn Bindable) -> Value {
        (self.get)(instance)
    }

    pub(crate) fn set(&self, instance: &dyn Bindable, value: Value) -> Result<(), BindingError> {
        match self.set {
            Some(set) => set(instance, value),
            None => Err(EvalError::ReadOnly {
                ty: instance.descriptor().name().to_owned(),
                member: self.name.to_owned(),
            }
            .into()),
        }
    }
}

/// Flattened capability table for one bindable type.
pub struct TypeDescriptor {
    name: &'static str,
    members: IndexMap<&'static str, Member>,
    methods: IndexMap<&'static str, (ValueKind, MethodFn)>,
    indexer: Option<(ValueKind, IndexFn)>,
}

impl TypeDescriptor {
    pub fn builder(name: &'static str) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder {
            name,
            members: IndexMap::new(),
            methods: IndexMap::new(),
            indexer: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a member by name in the flattened table.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Look up an instance method and its declared return kind.
    pub fn method(&self, name: &str) -> Option<(ValueKind, MethodFn)> {
        self.methods.get(name).copied()
    }

    /// The indexer and its declared value kind, if the type has one.
    pub fn indexer(&self) -> Option<(ValueKind, IndexFn)> {
        self.indexer
    }
}

/// Builder for a [`TypeDescriptor`].
pub struct TypeDescriptorBuilder {
    name: &'static str,
    members: IndexMap<&'static str, Member>,
    methods: IndexMap<&'static str, (ValueKind, MethodFn)>,
    indexer: Option<(ValueKind, IndexFn)>,
}

impl TypeDescriptorBuilder {
    /// Add a member; later entries with the same name replace earlier
    /// ones, which is how a composed type shadows an inherited accessor.
    pub fn with(mut self, mut member: Member) -> Self {
        if member.declared_by.is_none() {
            member.declared_by = Some(self.name);
        }
        self.members.insert(member.name, member);
        self
    }

    /// Register an instance method with its declared return kind.
    pub fn method(mut self, name: &'static str, kind: ValueKind, f: MethodFn) -> Self {
        self.methods.insert(name, (kind, f));
        self
    }

    /// Register the type's indexer with its declared value kind.
    pub fn indexer(mut self, kind: ValueKind, f: IndexFn) -> Self {
        self.indexer = Some((kind, f));
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name,
            members: self.members,
            methods: self.methods,
            indexer: self.indexer,
        }
    }
}

impl Member {
    /// The type name this member was declared by.
    pub fn declaring_type(&self) -> &'static str {
        self.declared_by.unwrap_or("")
    }
}
