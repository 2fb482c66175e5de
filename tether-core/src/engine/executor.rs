//! The thread-local execution queue.
//!
//! All rule executions for a thread funnel through one FIFO queue.
//! Scheduling while the queue is draining, or while execution is
//! suspended, only enqueues; the outermost call drains to empty. Each
//! map's schedule bits collapse repeated requests for a rule into a
//! single queued execution, so a batch of notifications runs every
//! affected rule exactly once.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::diagnostics::{self, BindingFault};
use crate::engine::map::BindingMap;
use crate::error::BindingError;

struct ScheduledBinding {
    map: Arc<BindingMap>,
    index: u32,
    /// Descriptions of the rules whose writes led here, outermost first.
    trail: SmallVec<[Arc<str>; 4]>,
}

#[derive(Default)]
struct Scheduler {
    queue: VecDeque<ScheduledBinding>,
    suspend_depth: usize,
    draining: bool,
    /// Trail of the rule currently executing on this thread.
    stack: Vec<Arc<str>>,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Schedule `indices` on `map` and drain unless a drain or suspension is
/// already in progress above us on the stack.
pub(crate) fn execute(map: &Arc<BindingMap>, indices: &[u32]) -> Result<(), BindingError> {
    let tracer = diagnostics::tracer();
    let should_drain = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        for &index in indices {
            if map.try_schedule(index) {
                if let Some(tracer) = &tracer {
                    tracer.scheduled(&map.description(index));
                }
                let trail: SmallVec<[Arc<str>; 4]> = s.stack.iter().cloned().collect();
                s.queue.push_back(ScheduledBinding {
                    map: Arc::clone(map),
                    index,
                    trail,
                });
            } else if let Some(tracer) = &tracer {
                tracer.ignored(&map.description(index));
            }
        }
        !s.draining && s.suspend_depth == 0
    });

    if should_drain {
        drain()
    } else {
        Ok(())
    }
}

fn drain() -> Result<(), BindingError> {
    loop {
        let next = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            match s.queue.pop_front() {
                Some(item) => {
                    s.draining = true;
                    Some(item)
                }
                None => {
                    s.draining = false;
                    None
                }
            }
        });
        let Some(item) = next else {
            return Ok(());
        };

        // Clear the bit before running so writes made by this execution
        // can schedule the rule again.
        item.map.unschedule(item.index);

        let description = item.map.description(item.index);
        tracing::trace!(rule = %description, "executing");

        SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            s.stack.clear();
            s.stack.extend(item.trail.iter().cloned());
            s.stack.push(Arc::clone(&description));
        });

        let tracer = diagnostics::tracer();
        if let Some(tracer) = &tracer {
            tracer.started(&description);
        }
        let result = item.map.execute(item.index);
        if let Some(tracer) = &tracer {
            tracer.ended(&description);
        }

        SCHEDULER.with(|s| s.borrow_mut().stack.clear());

        if let Err(error) = result {
            if let Some(tracer) = &tracer {
                tracer.exception(&error);
            }
            let mut fault = BindingFault {
                error,
                description: Arc::clone(&description),
                stamp: item.map.stamp(item.index),
                trail: item.trail.to_vec(),
                handled: false,
            };
            if let Some(handler) = item.map.fault_handler() {
                handler(&mut fault);
            }
            if !fault.handled {
                if let Some(handler) = diagnostics::fault_handler() {
                    handler(&mut fault);
                }
            }
            if !fault.handled {
                tracing::debug!(rule = %description, error = %fault.error, "unhandled binding fault");
                abandon();
                return Err(BindingError::Execution {
                    description: fault.description,
                    stamp: fault.stamp,
                    trail: fault.trail,
                    source: Box::new(fault.error),
                });
            }
        }
    }
}

/// Unschedule and drop everything still queued on this thread.
fn abandon() {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        for item in s.queue.drain(..) {
            item.map.unschedule(item.index);
        }
        s.draining = false;
        s.stack.clear();
    });
}

/// Defer execution: scheduled rules queue up until the matching
/// [`resume`]. Nests.
pub(crate) fn suspend() {
    SCHEDULER.with(|s| s.borrow_mut().suspend_depth += 1);
}

/// Undo one [`suspend`]; the outermost resume drains the queue.
pub(crate) fn resume() -> Result<(), BindingError> {
    let drain_now = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.suspend_depth == 0 {
            return Err(BindingError::NotSuspended);
        }
        s.suspend_depth -= 1;
        Ok(s.suspend_depth == 0 && !s.draining)
    })?;
    if drain_now {
        drain()
    } else {
        Ok(())
    }
}

/// Discard all queued executions and suspensions on this thread.
pub(crate) fn reset() {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        for item in s.queue.drain(..) {
            item.map.unschedule(item.index);
        }
        s.suspend_depth = 0;
        s.draining = false;
        s.stack.clear();
    });
}
