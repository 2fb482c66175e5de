//! Per-attachment rule state.
//!
//! A [`BindingMap`] pairs one attachment's context object with the
//! binder's compacted rule table and the per-rule scheduling bits. The
//! scheduler holds maps by `Arc`, so a map outlives its attachment; a
//! detached map simply has its context cleared, which turns any still
//! queued execution into a no-op.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::diagnostics::FaultHandler;
use crate::error::BindingError;
use crate::model::value::Obj;
use crate::rule::Rule;

pub(crate) struct BindingMap {
    rules: Arc<[Rule]>,
    /// One bit per rule; set while the rule sits in the queue.
    schedule: Mutex<Box<[bool]>>,
    context: RwLock<Option<Obj>>,
    fault_handler: Option<FaultHandler>,
}

impl BindingMap {
    pub(crate) fn new(rules: Arc<[Rule]>, fault_handler: Option<FaultHandler>) -> Self {
        let len = rules.len();
        Self {
            rules,
            schedule: Mutex::new(vec![false; len].into_boxed_slice()),
            context: RwLock::new(None),
            fault_handler,
        }
    }

    pub(crate) fn set_context(&self, context: Option<Obj>) {
        *self.context.write() = context;
    }

    pub(crate) fn context(&self) -> Option<Obj> {
        self.context.read().clone()
    }

    /// Mark rule `index` scheduled. Returns false when it already is,
    /// collapsing redundant schedule requests into one execution.
    pub(crate) fn try_schedule(&self, index: u32) -> bool {
        let mut schedule = self.schedule.lock();
        if schedule[index as usize] {
            false
        } else {
            schedule[index as usize] = true;
            true
        }
    }

    pub(crate) fn unschedule(&self, index: u32) {
        self.schedule.lock()[index as usize] = false;
    }

    /// Run rule `index` against the current context. A cleared context
    /// is a successful no-op.
    pub(crate) fn execute(&self, index: u32) -> Result<(), BindingError> {
        let Some(context) = self.context() else {
            return Ok(());
        };
        (self.rules[index as usize].action)(&context)
    }

    pub(crate) fn description(&self, index: u32) -> Arc<str> {
        Arc::clone(&self.rules[index as usize].description)
    }

    /// Render the rule's current source value for fault reports.
    pub(crate) fn stamp(&self, index: u32) -> String {
        match self.context() {
            Some(context) => (self.rules[index as usize].stamp)(&context),
            None => "<detached>".to_owned(),
        }
    }

    pub(crate) fn fault_handler(&self) -> Option<&FaultHandler> {
        self.fault_handler.as_ref()
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }
}
