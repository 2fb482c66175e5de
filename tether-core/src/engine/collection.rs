//! Collection watching.
//!
//! A [`CollectionWatcher`] subscribes to one observable list and keeps a
//! per-item watcher for every object currently in it, so rules that read
//! item members through an aggregate re-run when any item changes.
//! Membership changes schedule the aggregate rules themselves.
//!
//! Item bookkeeping is identity-keyed and duplicate-safe: removing one
//! occurrence of an object that appears twice keeps its watcher alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::engine::executor;
use crate::engine::map::BindingMap;
use crate::engine::node::CollectionNode;
use crate::engine::watcher::ObjectWatcher;
use crate::error::BindingError;
use crate::model::list::ListChange;
use crate::model::notify::HandlerId;
use crate::model::value::Value;

pub(crate) struct CollectionWatcher {
    node: Arc<CollectionNode>,
    map: Arc<BindingMap>,
    target: Mutex<Value>,
    subscription: Mutex<Option<HandlerId>>,
    /// Item watchers keyed by object identity.
    items: Mutex<HashMap<usize, Arc<ObjectWatcher>>>,
}

impl CollectionWatcher {
    pub(crate) fn create(node: Arc<CollectionNode>, map: Arc<BindingMap>) -> Arc<Self> {
        Arc::new(Self {
            node,
            map,
            target: Mutex::new(Value::Null),
            subscription: Mutex::new(None),
            items: Mutex::new(HashMap::new()),
        })
    }

    /// Point this watcher at `value`. Anything other than a list (a
    /// replaced-away or null collection) leaves it dormant.
    pub(crate) fn attach(self: &Arc<Self>, value: &Value) {
        let old = {
            let mut target = self.target.lock();
            std::mem::replace(&mut *target, value.clone())
        };
        if let Some(id) = self.subscription.lock().take() {
            if let Some(list) = old.as_list() {
                list.unsubscribe(id);
            }
        }
        self.detach_items();

        if let Some(list) = value.as_list() {
            let weak: Weak<CollectionWatcher> = Arc::downgrade(self);
            let id = list.subscribe(Arc::new(move |change| match weak.upgrade() {
                Some(watcher) => watcher.list_changed(change),
                None => Ok(()),
            }));
            *self.subscription.lock() = Some(id);

            for item in list.snapshot() {
                self.attach_item(&item);
            }
        }
    }

    fn list_changed(self: &Arc<Self>, change: &ListChange) -> Result<(), BindingError> {
        let target = self.target.lock().clone();
        let still_present =
            |v: &Value| target.as_list().map(|l| l.contains(v)).unwrap_or(false);

        match change {
            ListChange::Add(item) => self.attach_item(item),
            ListChange::Remove(item) => {
                if !still_present(item) {
                    self.detach_item(item);
                }
            }
            ListChange::Replace { old, new } => {
                if !still_present(old) {
                    self.detach_item(old);
                }
                self.attach_item(new);
            }
            ListChange::Reset => {
                self.detach_items();
                if let Some(list) = target.as_list() {
                    for item in list.snapshot() {
                        self.attach_item(&item);
                    }
                }
            }
        }

        if self.node.indices.is_empty() {
            Ok(())
        } else {
            executor::execute(&self.map, &self.node.indices)
        }
    }

    fn attach_item(&self, item: &Value) {
        let Some(node) = &self.node.item else {
            return;
        };
        let Some(identity) = item.identity() else {
            return;
        };
        if !matches!(item, Value::Object(_)) {
            return;
        }
        let mut items = self.items.lock();
        if items.contains_key(&identity) {
            return;
        }
        let watcher = ObjectWatcher::create(Arc::clone(node), Arc::clone(&self.map));
        watcher.attach(item);
        items.insert(identity, watcher);
    }

    fn detach_item(&self, item: &Value) {
        let Some(identity) = item.identity() else {
            return;
        };
        if let Some(watcher) = self.items.lock().remove(&identity) {
            watcher.attach(&Value::Null);
        }
    }

    fn detach_items(&self) {
        let items: Vec<_> = self.items.lock().drain().collect();
        for (_, watcher) in items {
            watcher.attach(&Value::Null);
        }
    }
}
