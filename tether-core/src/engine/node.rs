//! The static watcher-tree blueprint.
//!
//! Every rule's dependency chains are merged into one tree per binder.
//! Each tree node corresponds to one step along some chain and records,
//! per notification name, which rules to schedule when that name is
//! raised on the node's live object. A rule appears at every prefix of
//! each of its chains, so replacing an intermediate object re-runs the
//! same rules a leaf change does.
//!
//! Builders are mutated while rules accumulate; freezing produces the
//! immutable, compacted form the watcher tree walks at attach time.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::expr::extract::{Chain, Step};
use crate::model::value::{Key, Value};

/// How a node locates its live object inside its parent's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selector {
    /// The attached value itself. Used by the tree root and by
    /// collection item nodes.
    Root,
    Member(Arc<str>),
    Index(Key),
}

impl Selector {
    /// Resolve against a live parent value. Absent members, missing
    /// keys, and nulls all read as null; attachment never fails.
    pub(crate) fn resolve(&self, parent: &Value) -> Value {
        match self {
            Selector::Root => parent.clone(),
            Selector::Member(name) => match parent {
                Value::Object(obj) => obj
                    .descriptor()
                    .member(name)
                    .map(|m| m.get(obj.as_ref()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Selector::Index(key) => match parent {
                Value::Object(obj) => obj
                    .descriptor()
                    .indexer()
                    .map(|(_, f)| f(obj.as_ref(), key))
                    .unwrap_or(Value::Null),
                Value::List(list) => match key {
                    Key::Int(i) if *i >= 0 => list.get(*i as usize).unwrap_or(Value::Null),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct CollectionNodeBuilder {
    /// Rules scheduled on membership changes.
    indices: Vec<usize>,
    /// Per-item subtree, present when some predicate reads item members.
    item: Option<Box<NodeBuilder>>,
}

/// One node of the blueprint under construction.
#[derive(Clone)]
pub(crate) struct NodeBuilder {
    selector: Selector,
    /// Rules to schedule, keyed by notification name.
    actions: IndexMap<Arc<str>, Vec<usize>>,
    children: IndexMap<Arc<str>, NodeBuilder>,
    collection: Option<CollectionNodeBuilder>,
}

impl NodeBuilder {
    pub(crate) fn root() -> Self {
        Self::new(Selector::Root)
    }

    fn new(selector: Selector) -> Self {
        Self {
            selector,
            actions: IndexMap::new(),
            children: IndexMap::new(),
            collection: None,
        }
    }

    /// Register rule `index` along `chain`, rooted at this node. The
    /// index lands in the action table of every step prefix.
    pub(crate) fn insert(&mut self, chain: &Chain, index: usize) {
        self.insert_steps(&chain.0, index);
    }

    fn insert_steps(&mut self, steps: &[Step], index: usize) {
        let Some((step, rest)) = steps.split_first() else {
            return;
        };
        match step {
            Step::Member(name) => {
                self.actions.entry(Arc::clone(name)).or_default().push(index);
                if !rest.is_empty() {
                    self.children
                        .entry(Arc::clone(name))
                        .or_insert_with(|| NodeBuilder::new(Selector::Member(Arc::clone(name))))
                        .insert_steps(rest, index);
                }
            }
            Step::Index(key) => {
                let name: Arc<str> = key.notification_name().into();
                self.actions.entry(Arc::clone(&name)).or_default().push(index);
                if !rest.is_empty() {
                    self.children
                        .entry(name)
                        .or_insert_with(|| NodeBuilder::new(Selector::Index(key.clone())))
                        .insert_steps(rest, index);
                }
            }
            Step::Items => {
                let collection = self.collection.get_or_insert_with(Default::default);
                collection.indices.push(index);
                if !rest.is_empty() {
                    collection
                        .item
                        .get_or_insert_with(|| Box::new(NodeBuilder::root()))
                        .insert_steps(rest, index);
                }
            }
        }
    }

    /// Produce the immutable form. `remap` translates original rule
    /// indices to compacted ones; rules removed by overrides map to
    /// `None` and drop out of every action table.
    pub(crate) fn freeze(&self, remap: &[Option<u32>]) -> Node {
        let remap_indices = |indices: &[usize]| -> Box<[u32]> {
            let mut out: Vec<u32> = indices.iter().filter_map(|&i| remap[i]).collect();
            out.dedup();
            out.into_boxed_slice()
        };

        let actions = self
            .actions
            .iter()
            .filter_map(|(name, indices)| {
                let indices = remap_indices(indices);
                (!indices.is_empty()).then(|| (Arc::clone(name), indices))
            })
            .collect();

        let children = self
            .children
            .iter()
            .filter_map(|(name, child)| {
                let child = child.freeze(remap);
                (!child.is_empty()).then(|| (Arc::clone(name), Arc::new(child)))
            })
            .collect();

        let collection = self.collection.as_ref().and_then(|c| {
            let indices = remap_indices(&c.indices);
            let item = c.item.as_ref().map(|n| n.freeze(remap));
            let item = item.filter(|n| !n.is_empty()).map(Arc::new);
            (!indices.is_empty() || item.is_some()).then(|| {
                Arc::new(CollectionNode { indices, item })
            })
        });

        Node {
            selector: self.selector.clone(),
            actions,
            children,
            collection,
        }
    }
}

pub(crate) struct CollectionNode {
    pub(crate) indices: Box<[u32]>,
    pub(crate) item: Option<Arc<Node>>,
}

/// Frozen blueprint node, shared by every attachment of the binder.
pub(crate) struct Node {
    pub(crate) selector: Selector,
    pub(crate) actions: IndexMap<Arc<str>, Box<[u32]>>,
    pub(crate) children: IndexMap<Arc<str>, Arc<Node>>,
    pub(crate) collection: Option<Arc<CollectionNode>>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.children.is_empty() && self.collection.is_none()
    }

    pub(crate) fn actions_for(&self, name: &str) -> &[u32] {
        self.actions.get(name).map(|a| &a[..]).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_remap(n: usize) -> Vec<Option<u32>> {
        (0..n).map(|i| Some(i as u32)).collect()
    }

    #[test]
    fn rule_lands_on_every_prefix() {
        let mut builder = NodeBuilder::root();
        builder.insert(
            &Chain(vec![
                Step::Member("nested".into()),
                Step::Member("flag".into()),
            ]),
            0,
        );
        let node = builder.freeze(&identity_remap(1));

        assert_eq!(node.actions_for("nested"), &[0]);
        let nested = node.children.get("nested").unwrap();
        assert_eq!(nested.actions_for("flag"), &[0]);
        assert_eq!(nested.selector, Selector::Member("nested".into()));
    }

    #[test]
    fn overridden_rules_drop_out() {
        let mut builder = NodeBuilder::root();
        builder.insert(&Chain(vec![Step::Member("a".into())]), 0);
        builder.insert(&Chain(vec![Step::Member("a".into())]), 1);

        let node = builder.freeze(&[None, Some(0)]);
        assert_eq!(node.actions_for("a"), &[0]);
    }

    #[test]
    fn items_step_builds_a_collection_node() {
        let mut builder = NodeBuilder::root();
        builder.insert(
            &Chain(vec![
                Step::Member("items".into()),
                Step::Items,
                Step::Member("flag".into()),
            ]),
            0,
        );
        let node = builder.freeze(&identity_remap(1));

        assert_eq!(node.actions_for("items"), &[0]);
        let items = node.children.get("items").unwrap();
        let collection = items.collection.as_ref().unwrap();
        assert_eq!(&collection.indices[..], &[0]);
        let item = collection.item.as_ref().unwrap();
        assert_eq!(item.actions_for("flag"), &[0]);
    }
}
