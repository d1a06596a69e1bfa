//! Condition-driven type refinement.
//!
//! Applied to an `if` condition to narrow the then/else branch environments:
//! `isinstance` checks, `None` tests, and their `and`/`or`/`not`
//! compositions. Anything else leaves both environments untouched.

use crate::ast::{BinaryOp, CmpOp, Expr, ExprNode, TypeKind, UnaryOp};
use crate::sema::types::TypeEnv;

/// Narrow `then_env` and `else_env` according to `cond`.
pub fn refine_condition(cond: &Expr, then_env: &mut TypeEnv, else_env: &mut TypeEnv) {
    match &cond.node {
        // isinstance(x, T)
        ExprNode::Call { func, args, .. } => {
            if func.as_name() == Some("isinstance")
                && args.len() == 2
                && let Some(var) = args[0].as_name()
                && let Some(kind) = type_name_kind(&args[1])
            {
                then_env.restrict_to_kind(var, kind);
                else_env.exclude_kind(var, kind);
            }
        }
        // x == None / x != None / x is None / x is not None
        ExprNode::Compare {
            left,
            ops,
            comparators,
        } => {
            if ops.len() != 1 || comparators.len() != 1 {
                return;
            }
            let (var, other) = match (left.as_name(), comparators[0].as_name()) {
                (Some(v), _) => (v, &comparators[0]),
                (None, Some(v)) => (v, left.as_ref()),
                _ => return,
            };
            if !matches!(other.node, ExprNode::NoneLit) {
                return;
            }
            match ops[0] {
                CmpOp::Eq | CmpOp::Is => {
                    then_env.restrict_to_kind(var, TypeKind::NoneType);
                    else_env.mark_non_none(var);
                }
                CmpOp::NotEq | CmpOp::IsNot => {
                    then_env.mark_non_none(var);
                    else_env.restrict_to_kind(var, TypeKind::NoneType);
                }
                _ => {}
            }
        }
        ExprNode::Binary { op, lhs, rhs } => match op {
            // A and B: both refinements hold in the then branch.
            BinaryOp::And => {
                let mut scratch = else_env.clone();
                refine_condition(lhs, then_env, &mut scratch);
                let mut scratch2 = else_env.clone();
                refine_condition(rhs, then_env, &mut scratch2);
            }
            // A or B: both negations hold in the else branch.
            BinaryOp::Or => {
                let mut scratch = then_env.clone();
                refine_condition(lhs, &mut scratch, else_env);
                let mut scratch2 = then_env.clone();
                refine_condition(rhs, &mut scratch2, else_env);
            }
            _ => {}
        },
        // not E: swap the refinements E would produce.
        ExprNode::Unary {
            op: UnaryOp::Not,
            operand,
        } => {
            refine_condition(operand, else_env, then_env);
        }
        _ => {}
    }
}

/// Concrete type kind for a type-literal expression in `isinstance`.
fn type_name_kind(e: &Expr) -> Option<TypeKind> {
    let name = e.as_name()?;
    Some(match name {
        "int" => TypeKind::Int,
        "float" => TypeKind::Float,
        "bool" => TypeKind::Bool,
        "str" => TypeKind::Str,
        "list" => TypeKind::List,
        "tuple" => TypeKind::Tuple,
        "dict" => TypeKind::Dict,
        "set" => TypeKind::Set,
        "bytes" => TypeKind::Bytes,
        "bytearray" => TypeKind::ByteArray,
        _ => return None,
    })
}
