//! Error types for configuration and runtime failures.
//!
//! Three layers:
//!
//! - [`BinderError`]: configuration-time failures, synchronous to the
//!   configuration call that caused them.
//! - [`EvalError`]: a declared computation faulted while evaluating.
//! - [`BindingError`]: what surfaces to the caller that triggered a drain
//!   (a mutation site, a transaction resume, or an attach call).

use std::sync::Arc;

use thiserror::Error;

use crate::model::ValueKind;

/// Configuration-time error. Fatal and synchronous to the call site.
#[derive(Debug, Error)]
pub enum BinderError {
    /// The binder already has attached watchers and is frozen.
    #[error("binder already has attached watchers; clone it and modify the clone instead")]
    Frozen,

    /// A declared computation reads a member the descriptor does not carry.
    #[error("type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: String },

    /// A declared computation calls a method the descriptor does not carry.
    #[error("type `{ty}` has no method `{method}`")]
    UnknownMethod { ty: String, method: String },

    /// Members were accessed on a value that cannot have any.
    #[error("kind `{kind}` has no members (while resolving `{member}`)")]
    NotAnObject { kind: ValueKind, member: String },

    /// An aggregate was declared over a non-collection source.
    #[error("aggregate source has kind `{kind}`, expected a collection")]
    NotACollection { kind: ValueKind },

    /// The computed kind cannot be assigned to the target member's kind.
    #[error("cannot assign `{found}` to member `{member}` of kind `{target}`")]
    TypeMismatch {
        found: ValueKind,
        target: ValueKind,
        member: String,
    },

    /// The target expression does not end in a writable member.
    #[error("target `{target}` is not a writable member path")]
    UnwritableTarget { target: String },
}

/// A declared computation faulted at runtime.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A member was read through a null intermediate with null propagation
    /// disabled.
    #[error("null value encountered while reading `{member}`")]
    NullIntermediate { member: String },

    /// The live instance's descriptor does not carry the member.
    #[error("type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: String },

    /// The live instance's descriptor does not carry the method.
    #[error("type `{ty}` has no method `{method}`")]
    UnknownMethod { ty: String, method: String },

    /// The assignment target resolved to a read-only member.
    #[error("member `{member}` of `{ty}` is read-only")]
    ReadOnly { ty: String, member: String },

    /// An operator was applied to operands it does not support.
    #[error("cannot apply `{op}` to `{lhs}` and `{rhs}`")]
    InvalidOperands {
        op: &'static str,
        lhs: ValueKind,
        rhs: ValueKind,
    },

    /// A setter or descriptor method rejected its input.
    #[error("{0}")]
    Invalid(String),
}

/// Runtime binding failure, surfaced to whichever call triggered the drain.
#[derive(Debug, Error)]
pub enum BindingError {
    /// Evaluation fault bubbling out of a compiled action.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// A rule faulted and no handler in the diagnostic chain claimed it.
    /// `stamp` is a best-effort snapshot of the rule's inputs at the time
    /// of the fault; `trail` lists the descriptions of the rules that were
    /// executing when the faulting rule was scheduled, outermost first.
    #[error("binding `{description}` failed (stamp: {stamp}): {source}")]
    Execution {
        description: Arc<str>,
        stamp: String,
        trail: Vec<Arc<str>>,
        #[source]
        source: Box<BindingError>,
    },

    /// `resume` was called without a matching `suspend`.
    #[error("scheduler is not currently suspended")]
    NotSuspended,
}
