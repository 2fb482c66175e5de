//! Declared computations: the expression AST, its evaluator, and the
//! configuration-time dependency extractor.

pub mod ast;
pub(crate) mod eval;
pub(crate) mod extract;

pub use ast::{AggregateOp, BinaryOp, Expr, StaticFn, UnaryOp};
