//! Rule declaration.
//!
//! [`RuleBuilder`] is the fluent surface behind [`Binder::bind`]: it
//! carries a source computation and per-rule options, and its terminal
//! methods compile the computation into an executable action, extract
//! its dependency chains, and hand the finished rule to the binder.
//!
//! [`Binder::bind`]: crate::binder::Binder::bind

use std::sync::Arc;

use crate::binder::Binder;
use crate::error::{BinderError, BindingError};
use crate::expr::ast::Expr;
use crate::expr::eval::{coerce, eval};
use crate::expr::extract::{extract, extract_target, Chain};
use crate::model::value::{Obj, Value};

/// Compiled execution body of a rule.
pub(crate) type RuleAction = Arc<dyn Fn(&Obj) -> Result<(), BindingError> + Send + Sync>;

/// Renders the rule's current source value for fault reports.
pub(crate) type StampFn = Arc<dyn Fn(&Obj) -> String + Send + Sync>;

/// Observes the context just before a rule's computation runs.
pub type DebugHook = Arc<dyn Fn(&Obj) + Send + Sync>;

/// Wraps every assignment a binder performs. The hook receives the
/// context and the write itself as a thunk, and decides when (and
/// whether) to invoke it.
pub type AssignmentHook =
    Arc<dyn Fn(&Obj, &dyn Fn() -> Result<(), BindingError>) -> Result<(), BindingError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Rule {
    pub(crate) action: RuleAction,
    pub(crate) key: Option<Arc<str>>,
    pub(crate) description: Arc<str>,
    pub(crate) run_on_attach: bool,
    pub(crate) overridable: bool,
    pub(crate) stamp: StampFn,
}

#[cfg(test)]
impl Rule {
    pub(crate) fn for_tests(action: RuleAction) -> Self {
        Self {
            action,
            key: None,
            description: "<test>".into(),
            run_on_attach: false,
            overridable: true,
            stamp: Arc::new(|_| String::new()),
        }
    }
}

/// Fluent builder for one rule. Obtained from [`Binder::bind`]; a
/// terminal method ([`to`](Self::to) or [`to_action`](Self::to_action))
/// consumes it and registers the rule.
///
/// [`Binder::bind`]: crate::binder::Binder::bind
pub struct RuleBuilder<'b> {
    binder: &'b mut Binder,
    source: Expr,
    extra_dependencies: Vec<Expr>,
    key: Option<Arc<str>>,
    run_on_attach: bool,
    overridable: bool,
    propagate_nulls: bool,
    debug_hook: Option<DebugHook>,
    assignment_hook: Option<AssignmentHook>,
    /// Present only for callback-only rules made by `bind_action`.
    callback: Option<RuleAction>,
}

impl<'b> RuleBuilder<'b> {
    pub(crate) fn new(binder: &'b mut Binder, source: Expr) -> Self {
        Self {
            binder,
            source,
            extra_dependencies: Vec::new(),
            key: None,
            run_on_attach: true,
            overridable: true,
            propagate_nulls: false,
            debug_hook: None,
            assignment_hook: None,
            callback: None,
        }
    }

    pub(crate) fn with_callback(binder: &'b mut Binder, callback: RuleAction) -> Self {
        let mut builder = Self::new(binder, Expr::context());
        builder.callback = Some(callback);
        builder
    }

    /// Replace the default override key (the rendered target path).
    /// Rules added later with the same key supersede this one.
    pub fn override_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Skip the initial execution when a context attaches; the rule
    /// still runs on every subsequent change.
    pub fn do_not_run_on_attach(mut self) -> Self {
        self.run_on_attach = false;
        self
    }

    /// Exempt this rule from key-based overriding.
    pub fn do_not_override(mut self) -> Self {
        self.overridable = false;
        self
    }

    /// Evaluate the source with null propagation: nulls flow through
    /// chains and operators instead of faulting, and scalar targets
    /// receive their zero value.
    pub fn propagate_null_values(mut self) -> Self {
        self.propagate_nulls = true;
        self
    }

    /// Observe an additional computation's dependencies without using
    /// its value.
    pub fn with_dependency(mut self, expr: Expr) -> Self {
        self.extra_dependencies.push(expr);
        self
    }

    /// Invoke `hook` with the context every time this rule runs, before
    /// the computation is evaluated.
    pub fn debug(mut self, hook: DebugHook) -> Self {
        self.debug_hook = Some(hook);
        self
    }

    /// Wrap this rule's assignment, superseding any binder-level hook.
    pub fn with_assignment_hook(mut self, hook: AssignmentHook) -> Self {
        self.assignment_hook = Some(hook);
        self
    }

    /// Assign the computed value to a writable member path whenever any
    /// dependency changes.
    pub fn to(self, target: Expr) -> Result<(), BinderError> {
        let root = self.binder.context_descriptor();
        let source_info = extract(&self.source, root)?;
        let target_info = extract_target(&target, root)?;

        if !target_info.kind.accepts(source_info.kind) {
            return Err(BinderError::TypeMismatch {
                found: source_info.kind,
                target: target_info.kind,
                member: target_info.member.to_string(),
            });
        }

        let mut chains = source_info.chains;
        self.collect_extra_chains(&mut chains, root)?;
        chains.extend(target_info.chains.iter().cloned());

        let description: Arc<str> = format!("{} => {}", self.source, target_info.path).into();
        let key = self
            .key
            .clone()
            .unwrap_or_else(|| Arc::from(target_info.path.as_str()));

        let source = self.source.clone();
        let parent = target_info.parent;
        let member = Arc::clone(&target_info.member);
        let kind = target_info.kind;
        let propagate = self.propagate_nulls;
        let debug_hook = self.debug_hook.clone();
        let assignment_hook = self
            .assignment_hook
            .clone()
            .or_else(|| self.binder.assignment_hook());

        let action: RuleAction = Arc::new(move |ctx: &Obj| {
            if let Some(hook) = &debug_hook {
                hook(ctx);
            }
            let root = Value::Object(Arc::clone(ctx));
            let value = coerce(eval(&source, &root, propagate)?, kind);
            let owner = eval(&parent, &root, false)?;
            let Some(owner) = owner.as_object() else {
                return Err(crate::error::EvalError::NullIntermediate {
                    member: member.to_string(),
                }
                .into());
            };
            let slot = owner
                .descriptor()
                .member(&member)
                .ok_or_else(|| crate::error::EvalError::UnknownMember {
                    ty: owner.descriptor().name().to_owned(),
                    member: member.to_string(),
                })?;
            let write = || slot.set(owner.as_ref(), value.clone());
            match &assignment_hook {
                Some(hook) => hook(ctx, &write),
                None => write(),
            }
        });

        let stamp = self.make_stamp();
        self.binder.push_rule(
            Rule {
                action,
                key: Some(key),
                description,
                run_on_attach: self.run_on_attach,
                overridable: self.overridable,
                stamp,
            },
            chains,
        )
    }

    /// Feed the computed value to a callback whenever any dependency
    /// changes. Callback rules participate in overriding only when an
    /// explicit key is set.
    pub fn to_action<F>(self, f: F) -> Result<(), BinderError>
    where
        F: Fn(&Obj, Value) -> Result<(), BindingError> + Send + Sync + 'static,
    {
        let root = self.binder.context_descriptor();
        let source_info = extract(&self.source, root)?;

        let mut chains = source_info.chains;
        self.collect_extra_chains(&mut chains, root)?;

        let description: Arc<str> = format!("{} => <action>", self.source).into();
        let source = self.source.clone();
        let propagate = self.propagate_nulls;
        let debug_hook = self.debug_hook.clone();

        let action: RuleAction = Arc::new(move |ctx: &Obj| {
            if let Some(hook) = &debug_hook {
                hook(ctx);
            }
            let root = Value::Object(Arc::clone(ctx));
            let value = eval(&source, &root, propagate)?;
            f(ctx, value)
        });

        let stamp = self.make_stamp();
        self.binder.push_rule(
            Rule {
                action,
                key: self.key.clone(),
                description,
                run_on_attach: self.run_on_attach,
                overridable: self.overridable,
                stamp,
            },
            chains,
        )
    }

    /// Terminal for callback-only rules started with
    /// [`Binder::bind_action`]. Dependencies come solely from
    /// [`with_dependency`](Self::with_dependency) declarations.
    ///
    /// [`Binder::bind_action`]: crate::binder::Binder::bind_action
    pub fn register(self) -> Result<(), BinderError> {
        let root = self.binder.context_descriptor();
        let Some(callback) = self.callback.clone() else {
            return Err(BinderError::UnwritableTarget {
                target: self.source.to_string(),
            });
        };

        let mut chains = Vec::new();
        self.collect_extra_chains(&mut chains, root)?;

        let debug_hook = self.debug_hook.clone();
        let action: RuleAction = match debug_hook {
            Some(hook) => Arc::new(move |ctx: &Obj| {
                hook(ctx);
                callback(ctx)
            }),
            None => callback,
        };

        self.binder.push_rule(
            Rule {
                action,
                key: self.key.clone(),
                description: "<action>".into(),
                run_on_attach: self.run_on_attach,
                overridable: self.overridable,
                stamp: Arc::new(|_| "<action>".to_owned()),
            },
            chains,
        )
    }

    fn collect_extra_chains(
        &self,
        chains: &mut Vec<Chain>,
        root: &'static crate::model::descriptor::TypeDescriptor,
    ) -> Result<(), BinderError> {
        for dep in &self.extra_dependencies {
            chains.extend(extract(dep, root)?.chains);
        }
        Ok(())
    }

    fn make_stamp(&self) -> StampFn {
        let source = self.source.clone();
        let propagate = self.propagate_nulls;
        Arc::new(move |ctx: &Obj| {
            let root = Value::Object(Arc::clone(ctx));
            match eval(&source, &root, propagate) {
                Ok(value) => value.to_string(),
                Err(e) => format!("<failed: {e}>"),
            }
        })
    }
}
