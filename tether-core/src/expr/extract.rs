//! Configuration-time dependency extraction.
//!
//! Walking a declared computation against the context's capability table
//! yields every observable access chain the computation reads. A chain is
//! a path of steps from the context root; the watcher tree is built from
//! the union of all rules' chains, so a change anywhere along a chain
//! re-runs exactly the rules that read through it.
//!
//! The walk simultaneously resolves static typing through the descriptor
//! tables, rejecting unknown members and methods and recording the kind a
//! computation produces so assignments can be checked before any object
//! exists.

use std::sync::Arc;

use crate::error::BinderError;
use crate::expr::ast::{AggregateOp, BinaryOp, Expr, UnaryOp};
use crate::model::descriptor::TypeDescriptor;
use crate::model::value::{Key, ValueKind};

/// One step along an observable access chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    Member(Arc<str>),
    Index(Key),
    /// Collection membership and per-item observation boundary.
    Items,
}

/// An access chain from the context root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub(crate) struct Chain(pub Vec<Step>);

impl Chain {
    fn push(&mut self, step: Step) {
        self.0.push(step);
    }
}

/// Everything the extractor learned about one computation.
pub(crate) struct Extraction {
    pub chains: Vec<Chain>,
    pub kind: ValueKind,
}

/// The write target of an assignment rule, decomposed into its final
/// member and the parent path it hangs off.
pub(crate) struct Target {
    pub parent: Expr,
    pub member: Arc<str>,
    pub kind: ValueKind,
    /// The parent chain, observed so a replaced parent re-assigns.
    pub chains: Vec<Chain>,
    /// Rendered target path, the default override key.
    pub path: String,
}

/// Static type knowledge carried through the walk. `desc` and `item` are
/// populated only where descriptors reach; an untyped intermediate
/// degrades to [`ValueKind::Any`] and disables checks below it.
#[derive(Clone, Copy)]
struct Typing {
    kind: ValueKind,
    desc: Option<&'static TypeDescriptor>,
    item: Option<&'static TypeDescriptor>,
}

impl Typing {
    fn any() -> Self {
        Self {
            kind: ValueKind::Any,
            desc: None,
            item: None,
        }
    }

    fn of(kind: ValueKind) -> Self {
        Self {
            kind,
            desc: None,
            item: None,
        }
    }
}

struct Walked {
    typing: Typing,
    /// Chain still under construction, extended by further member or
    /// index steps and flushed where the value is consumed.
    pending: Option<Chain>,
}

struct Walker {
    root: Typing,
    /// Prefix applied to every flushed chain. Non-empty only inside
    /// aggregate predicates, where chains are rooted at the item.
    prefix: Chain,
    chains: Vec<Chain>,
}

pub(crate) fn extract(expr: &Expr, root: &'static TypeDescriptor) -> Result<Extraction, BinderError> {
    let mut walker = Walker::new(root);
    let walked = walker.walk(expr)?;
    walker.flush(walked.pending);
    walker.dedup();
    Ok(Extraction {
        chains: walker.chains,
        kind: walked.typing.kind,
    })
}

/// Decompose the target path of an assignment. The outermost node must
/// be a member access, and the member must be writable where the static
/// type is known.
pub(crate) fn extract_target(expr: &Expr, root: &'static TypeDescriptor) -> Result<Target, BinderError> {
    let path = expr.to_string();
    let Expr::Member { parent, name } = expr else {
        return Err(BinderError::UnwritableTarget { target: path });
    };

    let mut walker = Walker::new(root);
    let walked = walker.walk(parent)?;
    walker.flush(walked.pending);
    walker.dedup();

    let kind = match walked.typing.desc {
        Some(desc) => {
            let member = desc.member(name).ok_or_else(|| BinderError::UnknownMember {
                ty: desc.name().to_owned(),
                member: name.to_string(),
            })?;
            if !member.is_writable() {
                return Err(BinderError::UnwritableTarget { target: path });
            }
            member.kind()
        }
        None if walked.typing.kind == ValueKind::Any
            || walked.typing.kind == ValueKind::Object =>
        {
            ValueKind::Any
        }
        None => {
            return Err(BinderError::NotAnObject {
                kind: walked.typing.kind,
                member: name.to_string(),
            })
        }
    };

    Ok(Target {
        parent: (**parent).clone(),
        member: Arc::clone(name),
        kind,
        chains: walker.chains,
        path,
    })
}

impl Walker {
    fn new(root: &'static TypeDescriptor) -> Self {
        Self {
            root: Typing {
                kind: ValueKind::Object,
                desc: Some(root),
                item: None,
            },
            prefix: Chain::default(),
            chains: Vec::new(),
        }
    }

    fn flush(&mut self, pending: Option<Chain>) {
        if let Some(chain) = pending {
            if !chain.0.is_empty() || !self.prefix.0.is_empty() {
                let mut full = self.prefix.clone();
                full.0.extend(chain.0);
                self.chains.push(full);
            }
        }
    }

    fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.chains.retain(|c| seen.insert(c.clone()));
    }

    fn walk(&mut self, expr: &Expr) -> Result<Walked, BinderError> {
        match expr {
            Expr::Context => Ok(Walked {
                typing: self.root,
                pending: Some(Chain::default()),
            }),

            Expr::Const(v) => Ok(Walked {
                typing: Typing::of(v.kind()),
                pending: None,
            }),

            Expr::Member { parent, name } => {
                let parent = self.walk(parent)?;
                let typing = self.member_typing(parent.typing, name)?;
                let pending = parent.pending.map(|mut c| {
                    c.push(Step::Member(Arc::clone(name)));
                    c
                });
                Ok(Walked { typing, pending })
            }

            Expr::Index { parent, key } => {
                let parent = self.walk(parent)?;
                let typing = match parent.typing.kind {
                    ValueKind::List => Typing {
                        kind: parent
                            .typing
                            .item
                            .map(|_| ValueKind::Object)
                            .unwrap_or(ValueKind::Any),
                        desc: parent.typing.item,
                        item: None,
                    },
                    ValueKind::Object => match parent.typing.desc.and_then(|d| d.indexer()) {
                        Some((kind, _)) => Typing::of(kind),
                        None => Typing::any(),
                    },
                    _ => Typing::any(),
                };
                let pending = parent.pending.map(|mut c| {
                    c.push(Step::Index(key.clone()));
                    c
                });
                Ok(Walked { typing, pending })
            }

            Expr::Method { recv, name, args } => {
                let recv = self.walk(recv)?;
                self.flush(recv.pending);
                for arg in args {
                    let arg = self.walk(arg)?;
                    self.flush(arg.pending);
                }
                let typing = match recv.typing.desc {
                    Some(desc) => match desc.method(name) {
                        Some((kind, _)) => Typing::of(kind),
                        None => {
                            return Err(BinderError::UnknownMethod {
                                ty: desc.name().to_owned(),
                                method: name.to_string(),
                            })
                        }
                    },
                    None => Typing::any(),
                };
                Ok(Walked {
                    typing,
                    pending: None,
                })
            }

            Expr::Call { args, .. } => {
                for arg in args {
                    let arg = self.walk(arg)?;
                    self.flush(arg.pending);
                }
                Ok(Walked {
                    typing: Typing::any(),
                    pending: None,
                })
            }

            Expr::Unary { op, operand } => {
                let operand = self.walk(operand)?;
                self.flush(operand.pending);
                let kind = match op {
                    UnaryOp::Not => ValueKind::Bool,
                    UnaryOp::Neg => operand.typing.kind,
                };
                Ok(Walked {
                    typing: Typing::of(kind),
                    pending: None,
                })
            }

            Expr::Binary { op, lhs, rhs } => {
                let l = self.walk(lhs)?;
                self.flush(l.pending);
                let r = self.walk(rhs)?;
                self.flush(r.pending);
                let kind = match op {
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::And
                    | BinaryOp::Or => ValueKind::Bool,
                    BinaryOp::Add
                        if l.typing.kind == ValueKind::Str || r.typing.kind == ValueKind::Str =>
                    {
                        ValueKind::Str
                    }
                    _ => match (l.typing.kind, r.typing.kind) {
                        (ValueKind::Int, ValueKind::Int) => ValueKind::Int,
                        (ValueKind::Int | ValueKind::Float, ValueKind::Int | ValueKind::Float) => {
                            ValueKind::Float
                        }
                        _ => ValueKind::Any,
                    },
                };
                Ok(Walked {
                    typing: Typing::of(kind),
                    pending: None,
                })
            }

            Expr::Cond {
                test,
                then,
                otherwise,
            } => {
                let t = self.walk(test)?;
                self.flush(t.pending);
                let a = self.walk(then)?;
                self.flush(a.pending);
                let b = self.walk(otherwise)?;
                self.flush(b.pending);
                let typing = if a.typing.kind == b.typing.kind {
                    a.typing
                } else {
                    Typing::any()
                };
                Ok(Walked {
                    typing,
                    pending: None,
                })
            }

            Expr::Coalesce { lhs, rhs } => {
                let l = self.walk(lhs)?;
                self.flush(l.pending);
                let r = self.walk(rhs)?;
                self.flush(r.pending);
                let typing = if l.typing.kind == r.typing.kind {
                    l.typing
                } else {
                    Typing::any()
                };
                Ok(Walked {
                    typing,
                    pending: None,
                })
            }

            Expr::Aggregate {
                op,
                source,
                predicate,
            } => {
                let source = self.walk(source)?;
                if source.typing.kind != ValueKind::List && source.typing.kind != ValueKind::Any {
                    return Err(BinderError::NotACollection {
                        kind: source.typing.kind,
                    });
                }

                // Membership is observed via the collection boundary.
                let membership = source.pending.map(|mut c| {
                    c.push(Step::Items);
                    c
                });
                self.flush(membership.clone());

                if let Some(predicate) = predicate {
                    let item = Typing {
                        kind: source
                            .typing
                            .item
                            .map(|_| ValueKind::Object)
                            .unwrap_or(ValueKind::Any),
                        desc: source.typing.item,
                        item: None,
                    };
                    let mut prefix = self.prefix.clone();
                    if let Some(m) = &membership {
                        prefix.0.extend(m.0.iter().cloned());
                    }
                    let mut sub = Walker {
                        root: item,
                        prefix,
                        chains: Vec::new(),
                    };
                    let walked = sub.walk(predicate)?;
                    sub.flush(walked.pending);
                    self.chains.extend(sub.chains);
                }

                let typing = match op {
                    AggregateOp::Count => Typing::of(ValueKind::Int),
                    AggregateOp::Any | AggregateOp::All => Typing::of(ValueKind::Bool),
                    AggregateOp::Sum => Typing::any(),
                    AggregateOp::First => Typing {
                        kind: source
                            .typing
                            .item
                            .map(|_| ValueKind::Object)
                            .unwrap_or(ValueKind::Any),
                        desc: source.typing.item,
                        item: None,
                    },
                };
                // A matched item is itself observable, so selections off
                // the winner keep extending through the boundary.
                let pending = match op {
                    AggregateOp::First => membership,
                    _ => None,
                };
                Ok(Walked { typing, pending })
            }
        }
    }

    fn member_typing(&self, parent: Typing, name: &str) -> Result<Typing, BinderError> {
        match parent.desc {
            Some(desc) => {
                let member = desc.member(name).ok_or_else(|| BinderError::UnknownMember {
                    ty: desc.name().to_owned(),
                    member: name.to_owned(),
                })?;
                Ok(Typing {
                    kind: member.kind(),
                    desc: member.value_descriptor(),
                    item: member.item_descriptor(),
                })
            }
            None => match parent.kind {
                ValueKind::Object | ValueKind::Any => Ok(Typing::any()),
                kind => Err(BinderError::NotAnObject {
                    kind,
                    member: name.to_owned(),
                }),
            },
        }
    }
}

// Chains render like their notification names, for diagnostics.
impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                Step::Member(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Step::Index(key) => write!(f, "[{key}]")?,
                Step::Items => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::{Member, TypeDescriptor};
    use crate::model::value::Value;
    use std::sync::OnceLock;

    fn null_get(_: &dyn crate::model::value::Bindable) -> Value {
        Value::Null
    }

    fn leaf() -> &'static TypeDescriptor {
        static DESC: OnceLock<TypeDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            TypeDescriptor::builder("Leaf")
                .with(Member::readable("flag", ValueKind::Bool, null_get))
                .build()
        })
    }

    fn root() -> &'static TypeDescriptor {
        static DESC: OnceLock<TypeDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            TypeDescriptor::builder("Root")
                .with(Member::readable("int", ValueKind::Int, null_get))
                .with(Member::readable("nested", ValueKind::Object, null_get).of_type(leaf))
                .with(Member::readable("items", ValueKind::List, null_get).of_items(leaf))
                .build()
        })
    }

    fn chains_of(expr: &Expr) -> Vec<String> {
        extract(expr, root())
            .unwrap()
            .chains
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn simple_chain() {
        let e = Expr::context().member("nested").member("flag");
        assert_eq!(chains_of(&e), vec!["nested.flag"]);
    }

    #[test]
    fn operators_flush_both_sides_once() {
        let e = Expr::context()
            .member("int")
            .add(Expr::context().member("int"));
        assert_eq!(chains_of(&e), vec!["int"]);
    }

    #[test]
    fn aggregate_observes_membership_and_predicate_members() {
        let e = Expr::context()
            .member("items")
            .any(Expr::context().member("flag"));
        assert_eq!(chains_of(&e), vec!["items[*]", "items[*].flag"]);
    }

    #[test]
    fn first_extends_through_the_boundary() {
        let e = Expr::context()
            .member("items")
            .first(Expr::context().member("flag"))
            .member("flag");
        let chains = chains_of(&e);
        assert!(chains.contains(&"items[*].flag".to_owned()));
    }

    #[test]
    fn unknown_member_is_a_config_error() {
        let e = Expr::context().member("nope");
        assert!(matches!(
            extract(&e, root()),
            Err(BinderError::UnknownMember { .. })
        ));
    }

    #[test]
    fn target_must_be_writable() {
        let e = Expr::context().member("int");
        assert!(matches!(
            extract_target(&e, root()),
            Err(BinderError::UnwritableTarget { .. })
        ));
    }
}
