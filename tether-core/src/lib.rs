//! Tether Core
//!
//! This crate provides a declarative property-binding engine for mutable,
//! change-notifying object graphs. It implements:
//!
//! - A dynamic value model with per-type capability descriptors
//! - Explicit computation ASTs with configuration-time dependency
//!   extraction and type checking
//! - A live watcher tree that re-subscribes through object replacement
//! - A thread-local scheduler with duplicate collapse, FIFO draining,
//!   and suspend/resume batching
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `model`: Values, change notification, observable lists, descriptors
//! - `expr`: The expression AST, evaluator, and dependency extractor
//! - `binder`: Rule declaration, freezing, attachment, and pooling
//! - `diagnostics`: Fault handlers and execution tracing
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{Binder, Expr};
//!
//! let mut binder = Binder::new(MyContext::descriptor_static());
//!
//! // label tracks count
//! binder
//!     .bind(Expr::context().member("count").method("to_string", vec![]))
//!     .to(Expr::context().member("label"))?;
//!
//! let handle = binder.attach(&context)?;
//! // context mutations now update `label`; dropping `handle` stops them
//! ```

pub mod binder;
pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod model;
pub mod rule;

pub(crate) mod engine;

pub use binder::{Binder, BindingHandle, Transaction};
pub use diagnostics::{set_fault_handler, set_tracer, BindingFault, BindingTracer, FaultHandler};
pub use error::{BinderError, BindingError, EvalError};
pub use expr::Expr;
pub use model::{
    Bindable, ChangeNotifier, Key, ListChange, Member, Obj, ObservableList, TypeDescriptor, Value,
    ValueKind,
};
pub use rule::{AssignmentHook, DebugHook, RuleBuilder};

/// Discard all queued executions and suspensions on the current thread.
/// Intended for recovery after an unhandled fault unwound past the
/// caller that triggered a drain.
pub fn reset_scheduler() {
    engine::executor::reset();
}
