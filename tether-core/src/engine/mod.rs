//! Runtime machinery: the blueprint node tree, live watchers, per
//! attachment rule maps, and the thread-local execution queue.

pub(crate) mod collection;
pub(crate) mod executor;
pub(crate) mod map;
pub(crate) mod node;
pub(crate) mod watcher;
