//! Expression evaluation against a live context.
//!
//! Evaluation runs in one of two null modes. In strict mode a null
//! intermediate anywhere along a chain is an error; in propagating mode
//! nulls flow through member access, indexing, calls and arithmetic, a
//! null conditional test reads as false, and string concatenation treats
//! null as the empty string.

use crate::error::EvalError;
use crate::expr::ast::{AggregateOp, BinaryOp, Expr, UnaryOp};
use crate::model::value::{Value, ValueKind};

pub(crate) fn eval(expr: &Expr, ctx: &Value, propagate_nulls: bool) -> Result<Value, EvalError> {
    match expr {
        Expr::Context => Ok(ctx.clone()),
        Expr::Const(v) => Ok(v.clone()),

        Expr::Member { parent, name } => {
            let parent = eval(parent, ctx, propagate_nulls)?;
            match &parent {
                Value::Null if propagate_nulls => Ok(Value::Null),
                Value::Null => Err(EvalError::NullIntermediate {
                    member: name.to_string(),
                }),
                Value::Object(obj) => {
                    let desc = obj.descriptor();
                    match desc.member(name) {
                        Some(member) => Ok(member.get(obj.as_ref())),
                        None => Err(EvalError::UnknownMember {
                            ty: desc.name().to_owned(),
                            member: name.to_string(),
                        }),
                    }
                }
                other => Err(EvalError::Invalid(format!(
                    "cannot read member `{name}` of {:?} value",
                    other.kind()
                ))),
            }
        }

        Expr::Index { parent, key } => {
            let parent = eval(parent, ctx, propagate_nulls)?;
            match &parent {
                Value::Null if propagate_nulls => Ok(Value::Null),
                Value::Null => Err(EvalError::NullIntermediate {
                    member: key.notification_name(),
                }),
                Value::Object(obj) => match obj.descriptor().indexer() {
                    Some((_, index)) => Ok(index(obj.as_ref(), key)),
                    None => Err(EvalError::Invalid(format!(
                        "type `{}` has no indexer",
                        obj.descriptor().name()
                    ))),
                },
                Value::List(list) => match key {
                    crate::model::value::Key::Int(i) if *i >= 0 => {
                        Ok(list.get(*i as usize).unwrap_or(Value::Null))
                    }
                    _ => Ok(Value::Null),
                },
                other => Err(EvalError::Invalid(format!(
                    "cannot index a {:?} value",
                    other.kind()
                ))),
            }
        }

        Expr::Method { recv, name, args } => {
            let recv = eval(recv, ctx, propagate_nulls)?;
            if recv.is_null() {
                return if propagate_nulls {
                    Ok(Value::Null)
                } else {
                    Err(EvalError::NullIntermediate {
                        member: name.to_string(),
                    })
                };
            }
            let args = eval_args(args, ctx, propagate_nulls)?;
            call_method(&recv, name, &args)
        }

        Expr::Call { name, f, args } => {
            let args = eval_args(args, ctx, propagate_nulls)?;
            if propagate_nulls && args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let _ = name;
            f(&args)
        }

        Expr::Unary { op, operand } => {
            let v = eval(operand, ctx, propagate_nulls)?;
            match (op, &v) {
                (_, Value::Null) if propagate_nulls => Ok(Value::Null),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnaryOp::Not, _) => Err(invalid_operands("!", &v, &Value::Null)),
                (UnaryOp::Neg, _) => Err(invalid_operands("-", &v, &Value::Null)),
            }
        }

        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx, propagate_nulls),

        Expr::Cond {
            test,
            then,
            otherwise,
        } => {
            let test = eval(test, ctx, propagate_nulls)?;
            if truthy(&test, propagate_nulls)? {
                eval(then, ctx, propagate_nulls)
            } else {
                eval(otherwise, ctx, propagate_nulls)
            }
        }

        Expr::Coalesce { lhs, rhs } => {
            // Only a null result falls through; a null intermediate on the
            // left side still faults in strict mode.
            let lhs = eval(lhs, ctx, propagate_nulls)?;
            if lhs.is_null() {
                eval(rhs, ctx, propagate_nulls)
            } else {
                Ok(lhs)
            }
        }

        Expr::Aggregate {
            op,
            source,
            predicate,
        } => {
            let source = eval(source, ctx, propagate_nulls)?;
            match &source {
                Value::Null if propagate_nulls => Ok(Value::Null),
                Value::Null => Err(EvalError::NullIntermediate {
                    member: "items".to_owned(),
                }),
                Value::List(list) => {
                    eval_aggregate(*op, &list.snapshot(), predicate.as_deref(), propagate_nulls)
                }
                other => Err(EvalError::Invalid(format!(
                    "cannot aggregate over a {:?} value",
                    other.kind()
                ))),
            }
        }
    }
}

fn eval_args(args: &[Expr], ctx: &Value, propagate_nulls: bool) -> Result<Vec<Value>, EvalError> {
    args.iter()
        .map(|a| eval(a, ctx, propagate_nulls))
        .collect()
}

fn call_method(recv: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match (recv, name) {
        (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_), "to_string") => {
            Ok(Value::Str(recv.to_string().into()))
        }
        (Value::Str(s), "len") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::List(l), "len") => Ok(Value::Int(l.len() as i64)),
        (Value::Object(obj), _) => match obj.descriptor().method(name) {
            Some((_, f)) => f(obj.as_ref(), args),
            None => Err(EvalError::UnknownMethod {
                ty: obj.descriptor().name().to_owned(),
                method: name.to_owned(),
            }),
        },
        _ => Err(EvalError::UnknownMethod {
            ty: recv.kind().to_string(),
            method: name.to_owned(),
        }),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &Value,
    propagate_nulls: bool,
) -> Result<Value, EvalError> {
    // Logical operators short-circuit.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let l = eval(lhs, ctx, propagate_nulls)?;
        let l = truthy(&l, propagate_nulls)?;
        return match (op, l) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let r = eval(rhs, ctx, propagate_nulls)?;
                Ok(Value::Bool(truthy(&r, propagate_nulls)?))
            }
        };
    }

    let l = eval(lhs, ctx, propagate_nulls)?;
    let r = eval(rhs, ctx, propagate_nulls)?;

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(l == r)),
        BinaryOp::Ne => return Ok(Value::Bool(l != r)),
        _ => {}
    }

    // String concatenation treats null as the empty string.
    if op == BinaryOp::Add && (matches!(l, Value::Str(_)) || matches!(r, Value::Str(_))) {
        return Ok(Value::Str(format!("{}{}", str_part(&l), str_part(&r)).into()));
    }

    if propagate_nulls && (l.is_null() || r.is_null()) {
        return Ok(Value::Null);
    }

    let sym = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => unreachable!(),
    };

    if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
        let ord = a.cmp(b);
        return match op {
            BinaryOp::Lt => Ok(Value::Bool(ord.is_lt())),
            BinaryOp::Le => Ok(Value::Bool(ord.is_le())),
            BinaryOp::Gt => Ok(Value::Bool(ord.is_gt())),
            BinaryOp::Ge => Ok(Value::Bool(ord.is_ge())),
            _ => Err(invalid_operands(sym, &l, &r)),
        };
    }

    match (numeric(&l), numeric(&r)) {
        (Some(a), Some(b)) => {
            let int = matches!((&l, &r), (Value::Int(_), Value::Int(_)));
            match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div if int => {
                    let (a, b) = (a as i64, b as i64);
                    match op {
                        BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                        BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                        BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                        BinaryOp::Div if b != 0 => Ok(Value::Int(a / b)),
                        BinaryOp::Div => Err(EvalError::Invalid("division by zero".to_owned())),
                        _ => unreachable!(),
                    }
                }
                BinaryOp::Add => Ok(Value::Float(a + b)),
                BinaryOp::Sub => Ok(Value::Float(a - b)),
                BinaryOp::Mul => Ok(Value::Float(a * b)),
                BinaryOp::Div => Ok(Value::Float(a / b)),
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Le => Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                BinaryOp::Ge => Ok(Value::Bool(a >= b)),
                _ => unreachable!(),
            }
        }
        _ => Err(invalid_operands(sym, &l, &r)),
    }
}

fn eval_aggregate(
    op: AggregateOp,
    items: &[Value],
    predicate: Option<&Expr>,
    propagate_nulls: bool,
) -> Result<Value, EvalError> {
    let matched = |item: &Value| -> Result<bool, EvalError> {
        match predicate {
            Some(p) => {
                let v = eval(p, item, propagate_nulls)?;
                truthy(&v, propagate_nulls)
            }
            None => Ok(true),
        }
    };

    match op {
        AggregateOp::Count => {
            let mut n = 0i64;
            for item in items {
                if matched(item)? {
                    n += 1;
                }
            }
            Ok(Value::Int(n))
        }
        AggregateOp::Any => {
            for item in items {
                if matched(item)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        AggregateOp::All => {
            for item in items {
                if !matched(item)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        AggregateOp::First => {
            for item in items {
                if matched(item)? {
                    return Ok(item.clone());
                }
            }
            Ok(Value::Null)
        }
        AggregateOp::Sum => {
            let mut int_sum = 0i64;
            let mut float_sum = 0f64;
            let mut float = false;
            for item in items {
                if !matched(item)? {
                    continue;
                }
                match item {
                    Value::Int(i) => {
                        int_sum = int_sum.wrapping_add(*i);
                        float_sum += *i as f64;
                    }
                    Value::Float(x) => {
                        float = true;
                        float_sum += *x;
                    }
                    Value::Null if propagate_nulls => {}
                    other => {
                        return Err(EvalError::Invalid(format!(
                            "cannot sum a {:?} value",
                            other.kind()
                        )))
                    }
                }
            }
            Ok(if float {
                Value::Float(float_sum)
            } else {
                Value::Int(int_sum)
            })
        }
    }
}

/// A null test reads as false when nulls propagate.
fn truthy(v: &Value, propagate_nulls: bool) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Null if propagate_nulls => Ok(false),
        _ => Err(EvalError::Invalid(format!(
            "expected a boolean, got {:?}",
            v.kind()
        ))),
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn str_part(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn invalid_operands(op: &'static str, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::InvalidOperands {
        op,
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    }
}

/// Coerce an evaluated value to the kind a write target declares.
/// Integers widen to floats; a propagated null collapses to the target
/// kind's zero value so scalar targets never receive null.
pub(crate) fn coerce(value: Value, target: ValueKind) -> Value {
    match (&value, target) {
        (Value::Null, ValueKind::Bool | ValueKind::Int | ValueKind::Float) => target.zero_value(),
        (Value::Int(i), ValueKind::Float) => Value::Float(*i as f64),
        _ => value,
    }
}
