//! Declared computation ASTs.
//!
//! Rules are declared as explicit [`Expr`] trees rooted at the binding
//! context. The same tree serves three purposes: dependency extraction at
//! configuration time, evaluation at execution time, and human-readable
//! rule descriptions via [`Display`](std::fmt::Display).

use std::sync::Arc;

use crate::error::EvalError;
use crate::model::value::{Key, Value};

/// A free function callable from an expression. Arguments are evaluated
/// values; the function observes no object graph and so contributes no
/// dependencies of its own.
pub type StaticFn = fn(&[Value]) -> Result<Value, EvalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Collection aggregates. Each observes the source collection's
/// membership; predicated forms additionally observe the members the
/// predicate reads on every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Any,
    All,
    First,
    Sum,
}

/// One node of a declared computation.
#[derive(Clone)]
pub enum Expr {
    /// The binding context object itself.
    Context,
    Const(Value),
    Member {
        parent: Box<Expr>,
        name: Arc<str>,
    },
    Index {
        parent: Box<Expr>,
        key: Key,
    },
    Method {
        recv: Box<Expr>,
        name: Arc<str>,
        args: Vec<Expr>,
    },
    Call {
        name: Arc<str>,
        f: StaticFn,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Coalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// An aggregate over a collection-valued `source`. The predicate,
    /// when present, is rooted at the collection item.
    Aggregate {
        op: AggregateOp,
        source: Box<Expr>,
        predicate: Option<Box<Expr>>,
    },
}

impl Expr {
    /// The binding context root.
    pub fn context() -> Expr {
        Expr::Context
    }

    pub fn constant(value: impl Into<Value>) -> Expr {
        Expr::Const(value.into())
    }

    pub fn member(self, name: impl Into<Arc<str>>) -> Expr {
        Expr::Member {
            parent: Box::new(self),
            name: name.into(),
        }
    }

    pub fn index(self, key: impl Into<Key>) -> Expr {
        Expr::Index {
            parent: Box::new(self),
            key: key.into(),
        }
    }

    pub fn method(self, name: impl Into<Arc<str>>, args: Vec<Expr>) -> Expr {
        Expr::Method {
            recv: Box::new(self),
            name: name.into(),
            args,
        }
    }

    pub fn call(name: impl Into<Arc<str>>, f: StaticFn, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            f,
            args,
        }
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn cond(test: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Cond {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn coalesce(self, rhs: Expr) -> Expr {
        Expr::Coalesce {
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    fn aggregate(self, op: AggregateOp, predicate: Option<Expr>) -> Expr {
        Expr::Aggregate {
            op,
            source: Box::new(self),
            predicate: predicate.map(Box::new),
        }
    }

    pub fn count(self) -> Expr {
        self.aggregate(AggregateOp::Count, None)
    }

    pub fn sum(self) -> Expr {
        self.aggregate(AggregateOp::Sum, None)
    }

    /// True when `predicate` holds for at least one item. The predicate
    /// is rooted at the item via [`Expr::context`].
    pub fn any(self, predicate: Expr) -> Expr {
        self.aggregate(AggregateOp::Any, Some(predicate))
    }

    pub fn all(self, predicate: Expr) -> Expr {
        self.aggregate(AggregateOp::All, Some(predicate))
    }

    /// First item matching `predicate`, or null when none does.
    pub fn first(self, predicate: Expr) -> Expr {
        self.aggregate(AggregateOp::First, Some(predicate))
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Context => write!(f, "ctx"),
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Member { parent, name } => write!(f, "{parent}.{name}"),
            Expr::Index { parent, key } => write!(f, "{parent}[{key}]"),
            Expr::Method { recv, name, args } => {
                write!(f, "{recv}.{name}(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::Unary { op, operand } => {
                let sym = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                write!(f, "{sym}{operand}")
            }
            Expr::Binary { op, lhs, rhs } => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Eq => "==",
                    BinaryOp::Ne => "!=",
                    BinaryOp::Lt => "<",
                    BinaryOp::Le => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::Ge => ">=",
                    BinaryOp::And => "&&",
                    BinaryOp::Or => "||",
                };
                write!(f, "({lhs} {sym} {rhs})")
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => write!(f, "({test} ? {then} : {otherwise})"),
            Expr::Coalesce { lhs, rhs } => write!(f, "({lhs} ?? {rhs})"),
            Expr::Aggregate {
                op,
                source,
                predicate,
            } => {
                let name = match op {
                    AggregateOp::Count => "count",
                    AggregateOp::Any => "any",
                    AggregateOp::All => "all",
                    AggregateOp::First => "first",
                    AggregateOp::Sum => "sum",
                };
                match predicate {
                    Some(p) => write!(f, "{source}.{name}({p})"),
                    None => write!(f, "{source}.{name}()"),
                }
            }
        }
    }
}

fn fmt_args(f: &mut std::fmt::Formatter<'_>, args: &[Expr]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}
