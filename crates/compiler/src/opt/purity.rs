//! Effect and alias classification shared by the optimizer passes.
//!
//! A pure expression is a literal, a bare name read, an attribute or
//! subscript on an immutable literal, a unary/binary over pure operands, or
//! an aggregate literal of pure elements. Calls, comprehensions, and
//! accesses on mutable bases are effectful or unknown, so impure.

use crate::ast::{walk_expr, Expr, ExprNode, NodeKind, Stmt, StmtNode};
use std::collections::HashSet;

pub fn is_pure_expr(e: &Expr) -> bool {
    match &e.node {
        ExprNode::Int(_)
        | ExprNode::Float(_)
        | ExprNode::Bool(_)
        | ExprNode::Str(_)
        | ExprNode::Bytes(_)
        | ExprNode::NoneLit
        | ExprNode::Name { .. } => true,
        ExprNode::Attribute { value, .. } => is_immutable_literal(value),
        ExprNode::Subscript { value, index, .. } => {
            is_immutable_literal(value) && is_pure_expr(index)
        }
        ExprNode::Unary { operand, .. } => is_pure_expr(operand),
        ExprNode::Binary { lhs, rhs, .. } => is_pure_expr(lhs) && is_pure_expr(rhs),
        ExprNode::Compare {
            left, comparators, ..
        } => is_pure_expr(left) && comparators.iter().all(is_pure_expr),
        ExprNode::Tuple(els) | ExprNode::List(els) => els.iter().all(is_pure_expr),
        _ => false,
    }
}

fn is_immutable_literal(e: &Expr) -> bool {
    matches!(
        e.node_kind(),
        NodeKind::StringLiteral | NodeKind::TupleLiteral | NodeKind::BytesLiteral
    )
}

/// Statement-level effect test: assignments and returns mutate program
/// state; control flow is conservatively effectful.
pub fn is_effectful_stmt(s: &Stmt) -> bool {
    match &s.node {
        StmtNode::Expr(e) => !is_pure_expr(e),
        StmtNode::Pass => false,
        _ => true,
    }
}

/// Operator-node count, the cost measure used by CSE's extraction threshold.
pub fn expr_complexity(e: &Expr) -> usize {
    let mut n = 0;
    walk_expr(e, &mut |x| {
        if matches!(
            x.node,
            ExprNode::Unary { .. }
                | ExprNode::Binary { .. }
                | ExprNode::Compare { .. }
                | ExprNode::Subscript { .. }
                | ExprNode::Attribute { .. }
        ) {
            n += 1;
        }
    });
    n
}

/// Names read anywhere inside `e`.
pub fn names_read(e: &Expr, out: &mut HashSet<String>) {
    walk_expr(e, &mut |x| {
        if let ExprNode::Name { id, .. } = &x.node {
            out.insert(id.clone());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ExprCtx, Span};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
    }

    fn int(v: i64) -> Expr {
        Expr::new(ExprNode::Int(v), sp())
    }

    fn name(id: &str) -> Expr {
        Expr::new(
            ExprNode::Name {
                id: id.to_string(),
                ctx: ExprCtx::Load,
            },
            sp(),
        )
    }

    #[test]
    fn test_literals_and_operators_are_pure() {
        let e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(name("x")),
                rhs: Box::new(int(1)),
            },
            sp(),
        );
        assert!(is_pure_expr(&e));
        assert_eq!(expr_complexity(&e), 1);
    }

    #[test]
    fn test_calls_are_impure() {
        let e = Expr::new(
            ExprNode::Call {
                func: Box::new(name("f")),
                args: vec![],
                keywords: vec![],
            },
            sp(),
        );
        assert!(!is_pure_expr(&e));
    }

    #[test]
    fn test_subscript_purity_depends_on_base() {
        let on_literal = Expr::new(
            ExprNode::Subscript {
                value: Box::new(Expr::new(ExprNode::Str("abc".into()), sp())),
                index: Box::new(int(0)),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        assert!(is_pure_expr(&on_literal));

        let on_name = Expr::new(
            ExprNode::Subscript {
                value: Box::new(name("xs")),
                index: Box::new(int(0)),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        assert!(!is_pure_expr(&on_name));
    }

    #[test]
    fn test_names_read() {
        let e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(name("a")),
                rhs: Box::new(name("b")),
            },
            sp(),
        );
        let mut out = HashSet::new();
        names_read(&e, &mut out);
        assert!(out.contains("a") && out.contains("b"));
    }
}
