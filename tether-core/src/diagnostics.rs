//! Fault handling and execution tracing hooks.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::BindingError;

/// A fault raised by a rule execution, offered to handlers before it
/// aborts the drain. A handler that sets `handled` swallows the fault
/// and lets the remaining scheduled rules run.
pub struct BindingFault {
    pub error: BindingError,
    /// Human-readable rule description.
    pub description: Arc<str>,
    /// Source value stamp at fault time.
    pub stamp: String,
    /// Descriptions of the rules whose writes triggered this one,
    /// outermost first.
    pub trail: Vec<Arc<str>>,
    pub handled: bool,
}

impl BindingFault {
    pub fn handle(&mut self) {
        self.handled = true;
    }
}

/// Observes scheduling and execution of individual rules. All methods
/// default to no-ops so implementors override only what they watch.
pub trait BindingTracer: Send + Sync {
    fn scheduled(&self, _description: &str) {}
    /// A schedule request collapsed into an already-queued execution.
    fn ignored(&self, _description: &str) {}
    fn started(&self, _description: &str) {}
    fn ended(&self, _description: &str) {}
    fn exception(&self, _error: &BindingError) {}
}

pub type FaultHandler = Arc<dyn Fn(&mut BindingFault) + Send + Sync>;

static FAULT_HANDLER: RwLock<Option<FaultHandler>> = RwLock::new(None);
static TRACER: RwLock<Option<Arc<dyn BindingTracer>>> = RwLock::new(None);

/// Install a process-wide fault handler, consulted after any per-binder
/// handler declines a fault. Pass `None` to clear.
pub fn set_fault_handler(handler: Option<FaultHandler>) {
    *FAULT_HANDLER.write() = handler;
}

/// Install a process-wide execution tracer. Pass `None` to clear.
pub fn set_tracer(tracer: Option<Arc<dyn BindingTracer>>) {
    *TRACER.write() = tracer;
}

pub(crate) fn fault_handler() -> Option<FaultHandler> {
    FAULT_HANDLER.read().clone()
}

pub(crate) fn tracer() -> Option<Arc<dyn BindingTracer>> {
    TRACER.read().clone()
}
