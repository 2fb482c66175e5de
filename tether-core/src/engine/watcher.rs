//! The live watcher tree.
//!
//! One [`ObjectWatcher`] per blueprint node mirrors the attached object
//! graph. Attachment resolves the node's live value, subscribes to its
//! change notifier, and recurses. When an intermediate object is
//! replaced, the affected subtree silently re-attaches to the new value
//! before any rule runs, so rules always read through current objects.
//!
//! Watchers hold their parents' values only through weak handler
//! captures; dropping the tree (or re-attaching it to null) severs every
//! subscription.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::engine::collection::CollectionWatcher;
use crate::engine::executor;
use crate::engine::map::BindingMap;
use crate::engine::node::Node;
use crate::error::BindingError;
use crate::model::notify::HandlerId;
use crate::model::value::Value;

pub(crate) struct ObjectWatcher {
    node: Arc<Node>,
    map: Arc<BindingMap>,
    /// The live value this watcher is currently subscribed to.
    target: Mutex<Value>,
    subscription: Mutex<Option<HandlerId>>,
    children: IndexMap<Arc<str>, Arc<ObjectWatcher>>,
    collection: Option<Arc<CollectionWatcher>>,
}

impl ObjectWatcher {
    pub(crate) fn create(node: Arc<Node>, map: Arc<BindingMap>) -> Arc<Self> {
        let children = node
            .children
            .iter()
            .map(|(name, child)| {
                (
                    Arc::clone(name),
                    ObjectWatcher::create(Arc::clone(child), Arc::clone(&map)),
                )
            })
            .collect();
        let collection = node
            .collection
            .as_ref()
            .map(|c| CollectionWatcher::create(Arc::clone(c), Arc::clone(&map)));
        Arc::new(Self {
            node,
            map,
            target: Mutex::new(Value::Null),
            subscription: Mutex::new(None),
            children,
            collection,
        })
    }

    /// Point this subtree at the node's value inside `parent`. Passing
    /// null detaches the subtree. Attachment itself never fails; nulls
    /// along the way just leave the subtree dormant.
    pub(crate) fn attach(self: &Arc<Self>, parent: &Value) {
        let value = self.node.selector.resolve(parent);

        let old = {
            let mut target = self.target.lock();
            std::mem::replace(&mut *target, value.clone())
        };
        if let Some(id) = self.subscription.lock().take() {
            if let Some(obj) = old.as_object() {
                if let Some(notifier) = obj.notifier() {
                    notifier.unsubscribe(id);
                }
            }
        }

        if let Some(obj) = value.as_object() {
            if let Some(notifier) = obj.notifier() {
                let weak: Weak<ObjectWatcher> = Arc::downgrade(self);
                let id = notifier.subscribe(Arc::new(move |member| match weak.upgrade() {
                    Some(watcher) => watcher.member_changed(member),
                    None => Ok(()),
                }));
                *self.subscription.lock() = Some(id);
            }
        }

        for child in self.children.values() {
            child.attach(&value);
        }
        if let Some(collection) = &self.collection {
            collection.attach(&value);
        }
    }

    /// Notification entry point. Re-attaches the changed member's
    /// subtree first, then schedules every rule registered under the
    /// member's name.
    fn member_changed(self: &Arc<Self>, member: &str) -> Result<(), BindingError> {
        let value = self.target.lock().clone();
        if let Some(child) = self.children.get(member) {
            child.attach(&value);
        }
        let indices = self.node.actions_for(member);
        if indices.is_empty() {
            Ok(())
        } else {
            executor::execute(&self.map, indices)
        }
    }
}
