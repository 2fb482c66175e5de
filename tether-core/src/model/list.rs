//! Observable collections.
//!
//! [`ObservableList`] is the list capability bindable values expose.
//! Mutations publish a [`ListChange`] to subscribers after the list lock
//! is released, so a handler may read the list (or even mutate it) while
//! the change is being dispatched.

use parking_lot::RwLock;

use crate::error::BindingError;
use crate::model::notify::HandlerId;
use crate::model::value::Value;

use std::sync::Arc;

/// A single collection mutation, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    Add(Value),
    Remove(Value),
    Replace { old: Value, new: Value },
    Reset,
}

/// Collection change subscriber.
pub type ListHandler = Arc<dyn Fn(&ListChange) -> Result<(), BindingError> + Send + Sync>;

/// A change-notifying list of [`Value`]s.
#[derive(Default)]
pub struct ObservableList {
    items: RwLock<Vec<Value>>,
    handlers: RwLock<Vec<(HandlerId, ListHandler)>>,
}

impl ObservableList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().collect()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.read().iter().any(|v| v == value)
    }

    /// Clone the current contents out from under the lock.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    pub fn push(&self, value: Value) -> Result<(), BindingError> {
        self.items.write().push(value.clone());
        self.raise(&ListChange::Add(value))
    }

    /// Remove the first occurrence of `value`. Returns whether anything
    /// was removed; no change is raised when the value was absent.
    pub fn remove(&self, value: &Value) -> Result<bool, BindingError> {
        let removed = {
            let mut items = self.items.write();
            match items.iter().position(|v| v == value) {
                Some(at) => {
                    items.remove(at);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.raise(&ListChange::Remove(value.clone()))?;
        }
        Ok(removed)
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), BindingError> {
        let old = {
            let mut items = self.items.write();
            std::mem::replace(&mut items[index], value.clone())
        };
        self.raise(&ListChange::Replace { old, new: value })
    }

    pub fn clear(&self) -> Result<(), BindingError> {
        self.items.write().clear();
        self.raise(&ListChange::Reset)
    }

    pub fn subscribe(&self, handler: ListHandler) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.write().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.write().retain(|(h, _)| *h != id);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn raise(&self, change: &ListChange) -> Result<(), BindingError> {
        let handlers: Vec<ListHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(change)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("len", &self.len())
            .finish()
    }
}
