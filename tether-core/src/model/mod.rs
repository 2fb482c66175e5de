//! The bindable object model: dynamic values, change notification,
//! observable collections, and per-type capability descriptors.

pub mod descriptor;
pub mod list;
pub mod notify;
pub mod value;

pub use descriptor::{DescriptorFn, GetFn, IndexFn, Member, MethodFn, SetFn, TypeDescriptor};
pub use list::{ListChange, ListHandler, ObservableList};
pub use notify::{ChangeHandler, ChangeNotifier, HandlerId};
pub use value::{Bindable, Key, Obj, Value, ValueKind};
