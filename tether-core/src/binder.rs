//! The binder: rule declaration, freezing, and attachment.
//!
//! A [`Binder`] accumulates rules against one context type, then freezes
//! at first attach into an immutable blueprint shared by every
//! attachment. Attaching produces a [`BindingHandle`]; dropping it (or
//! calling [`detach`](BindingHandle::detach)) severs every subscription
//! and, when reuse is enabled, parks the watcher tree for the next
//! attach.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::diagnostics::{self, BindingFault, FaultHandler};
use crate::engine::executor;
use crate::engine::map::BindingMap;
use crate::engine::node::{Node, NodeBuilder};
use crate::engine::watcher::ObjectWatcher;
use crate::error::{BinderError, BindingError};
use crate::expr::ast::Expr;
use crate::expr::extract::Chain;
use crate::model::descriptor::TypeDescriptor;
use crate::model::value::{Obj, Value};
use crate::rule::{AssignmentHook, Rule, RuleAction, RuleBuilder};

type Pool = Mutex<Vec<(Arc<BindingMap>, Arc<ObjectWatcher>)>>;

/// Blueprint produced at first attach. Shared by all attachments and by
/// the pool of detached watcher trees.
struct Frozen {
    rules: Arc<[Rule]>,
    node: Arc<Node>,
    pool: Arc<Pool>,
}

/// Declares binding rules for one context type and attaches them to
/// live instances.
pub struct Binder {
    context: &'static TypeDescriptor,
    root: NodeBuilder,
    /// Declaration-order slots; overridden rules are nulled in place and
    /// compacted away at freeze.
    rules: Vec<Option<Rule>>,
    frozen: OnceLock<Frozen>,
    fault_handler: Option<FaultHandler>,
    assignment_hook: Option<AssignmentHook>,
    reuse_watchers: bool,
}

impl Binder {
    pub fn new(context: &'static TypeDescriptor) -> Self {
        Self {
            context,
            root: NodeBuilder::root(),
            rules: Vec::new(),
            frozen: OnceLock::new(),
            fault_handler: None,
            assignment_hook: None,
            reuse_watchers: true,
        }
    }

    /// Consulted before the process-wide handler when a rule of this
    /// binder faults.
    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.fault_handler = Some(handler);
        self
    }

    /// Wrap every assignment this binder performs. A rule-level hook
    /// supersedes this one.
    pub fn with_assignment_hook(mut self, hook: AssignmentHook) -> Self {
        self.assignment_hook = Some(hook);
        self
    }

    /// Control pooling of detached watcher trees. Enabled by default.
    pub fn reuse_watchers(mut self, reuse: bool) -> Self {
        self.reuse_watchers = reuse;
        self
    }

    /// Start declaring a rule computing `source`.
    pub fn bind(&mut self, source: Expr) -> RuleBuilder<'_> {
        RuleBuilder::new(self, source)
    }

    /// Start declaring a callback-only rule. Its dependencies come from
    /// `with_dependency` declarations; finish with `register()`.
    pub fn bind_action<F>(&mut self, f: F) -> RuleBuilder<'_>
    where
        F: Fn(&Obj) -> Result<(), BindingError> + Send + Sync + 'static,
    {
        RuleBuilder::with_callback(self, Arc::new(f) as RuleAction)
    }

    /// Remove every overridable rule declared under `key`.
    pub fn remove_rule(&mut self, key: &str) -> Result<(), BinderError> {
        if self.frozen.get().is_some() {
            return Err(BinderError::Frozen);
        }
        for slot in &mut self.rules {
            if let Some(rule) = slot {
                if rule.overridable && rule.key.as_deref() == Some(key) {
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    /// A combined runner over every surviving rule declared under `key`,
    /// in declaration order.
    pub fn action_by_key(
        &self,
        key: &str,
    ) -> Option<impl Fn(&Obj) -> Result<(), BindingError>> {
        let actions: Vec<RuleAction> = self
            .rules
            .iter()
            .flatten()
            .filter(|rule| rule.key.as_deref() == Some(key))
            .map(|rule| Arc::clone(&rule.action))
            .collect();
        (!actions.is_empty()).then_some(move |ctx: &Obj| {
            for action in &actions {
                action(ctx)?;
            }
            Ok(())
        })
    }

    pub(crate) fn context_descriptor(&self) -> &'static TypeDescriptor {
        self.context
    }

    pub(crate) fn assignment_hook(&self) -> Option<AssignmentHook> {
        self.assignment_hook.clone()
    }

    pub(crate) fn push_rule(&mut self, rule: Rule, chains: Vec<Chain>) -> Result<(), BinderError> {
        if self.frozen.get().is_some() {
            return Err(BinderError::Frozen);
        }
        if let Some(key) = rule.key.as_deref().filter(|_| rule.overridable) {
            for slot in &mut self.rules {
                if let Some(prior) = slot {
                    if prior.overridable && prior.key.as_deref() == Some(key) {
                        *slot = None;
                    }
                }
            }
        }
        let index = self.rules.len();
        for chain in &chains {
            self.root.insert(chain, index);
        }
        tracing::trace!(rule = %rule.description, chains = chains.len(), "rule declared");
        self.rules.push(Some(rule));
        Ok(())
    }

    fn freeze(&self) -> Frozen {
        let mut remap: Vec<Option<u32>> = Vec::with_capacity(self.rules.len());
        let mut compacted = Vec::new();
        for slot in &self.rules {
            match slot {
                Some(rule) => {
                    remap.push(Some(compacted.len() as u32));
                    compacted.push(rule.clone());
                }
                None => remap.push(None),
            }
        }
        tracing::debug!(rules = compacted.len(), "binder frozen");
        Frozen {
            rules: compacted.into(),
            node: Arc::new(self.root.freeze(&remap)),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach every rule to `context`. Run-on-attach rules execute
    /// immediately in declaration order; an unhandled fault aborts the
    /// attach and detaches what was built.
    pub fn attach(&self, context: &Obj) -> Result<BindingHandle, BindingError> {
        let frozen = self.frozen.get_or_init(|| self.freeze());

        let (map, watcher) = frozen.pool.lock().pop().unwrap_or_else(|| {
            let map = Arc::new(BindingMap::new(
                Arc::clone(&frozen.rules),
                self.fault_handler.clone(),
            ));
            let watcher = ObjectWatcher::create(Arc::clone(&frozen.node), Arc::clone(&map));
            (map, watcher)
        });

        map.set_context(Some(Arc::clone(context)));
        watcher.attach(&Value::Object(Arc::clone(context)));

        for index in 0..map.rules().len() as u32 {
            if !map.rules()[index as usize].run_on_attach {
                continue;
            }
            if let Err(error) = map.execute(index) {
                let mut fault = BindingFault {
                    error,
                    description: map.description(index),
                    stamp: map.stamp(index),
                    trail: Vec::new(),
                    handled: false,
                };
                if let Some(handler) = map.fault_handler() {
                    handler(&mut fault);
                }
                if !fault.handled {
                    if let Some(handler) = diagnostics::fault_handler() {
                        handler(&mut fault);
                    }
                }
                if !fault.handled {
                    watcher.attach(&Value::Null);
                    map.set_context(None);
                    return Err(BindingError::Execution {
                        description: fault.description,
                        stamp: fault.stamp,
                        trail: fault.trail,
                        source: Box::new(fault.error),
                    });
                }
            }
        }

        Ok(BindingHandle {
            map,
            watcher,
            pool: self.reuse_watchers.then(|| Arc::clone(&frozen.pool)),
            detached: false,
        })
    }

    /// A suspend/resume guard over this thread's execution queue.
    pub fn transaction(&self) -> Transaction {
        Transaction::begin()
    }
}

// Cloning reopens a frozen binder for further declaration.
impl Clone for Binder {
    fn clone(&self) -> Self {
        Self {
            context: self.context,
            root: self.root.clone(),
            rules: self.rules.clone(),
            frozen: OnceLock::new(),
            fault_handler: self.fault_handler.clone(),
            assignment_hook: self.assignment_hook.clone(),
            reuse_watchers: self.reuse_watchers,
        }
    }
}

/// A live attachment. Dropping the handle detaches.
pub struct BindingHandle {
    map: Arc<BindingMap>,
    watcher: Arc<ObjectWatcher>,
    pool: Option<Arc<Pool>>,
    detached: bool,
}

impl BindingHandle {
    /// Sever every subscription and stop all rule execution. Executions
    /// already queued become no-ops.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.watcher.attach(&Value::Null);
        self.map.set_context(None);
        if let Some(pool) = &self.pool {
            pool.lock()
                .push((Arc::clone(&self.map), Arc::clone(&self.watcher)));
        }
    }
}

impl Drop for BindingHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Suspends rule execution on the current thread until committed or
/// dropped; everything scheduled meanwhile runs in one drain.
pub struct Transaction {
    committed: bool,
}

impl Transaction {
    pub fn begin() -> Self {
        executor::suspend();
        Self { committed: false }
    }

    /// Resume and drain. Surfaces any unhandled fault from the deferred
    /// executions.
    pub fn commit(mut self) -> Result<(), BindingError> {
        self.committed = true;
        executor::resume()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(error) = executor::resume() {
                tracing::error!(%error, "fault while draining abandoned transaction");
            }
        }
    }
}
