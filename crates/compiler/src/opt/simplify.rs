//! Control-flow and scope cleanups.
//!
//! `SimplifyCfg` folds `if CONST` into the selected branch. `SimplifyScopes`
//! drops redundant `pass` statements and hoists a return shared by both
//! branches of an if.

use crate::ast::{Expr, ExprNode, Module, Stmt, StmtNode};
use crate::opt::{rewrite_bodies, Pass};

pub struct SimplifyCfg;

/// Constant truth value of a condition expression, when decidable.
fn const_truth(e: &Expr) -> Option<bool> {
    match &e.node {
        ExprNode::Bool(b) => Some(*b),
        ExprNode::Int(v) => Some(*v != 0),
        ExprNode::Float(v) => Some(*v != 0.0),
        ExprNode::Str(s) => Some(!s.is_empty()),
        ExprNode::NoneLit => Some(false),
        _ => None,
    }
}

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "SimplifyCFG"
    }

    fn run(&self, module: &mut Module) -> usize {
        rewrite_bodies(module, &mut |stmts| {
            let mut changes = 0;
            let mut out: Vec<Stmt> = Vec::with_capacity(stmts.len());
            for s in stmts.drain(..) {
                if let StmtNode::If {
                    cond,
                    body: then_body,
                    orelse,
                } = &s.node
                    && let Some(truth) = const_truth(cond)
                {
                    out.extend(if truth {
                        then_body.clone()
                    } else {
                        orelse.clone()
                    });
                    changes += 1;
                    continue;
                }
                out.push(s);
            }
            *stmts = out;
            changes
        })
    }
}

pub struct SimplifyScopes;

impl Pass for SimplifyScopes {
    fn name(&self) -> &'static str {
        "SimplifyScopes"
    }

    fn run(&self, module: &mut Module) -> usize {
        rewrite_bodies(module, &mut |body| {
            let mut changes = 0;

            // Drop pass statements that carry no weight (keep one if the
            // body would otherwise be empty).
            let non_pass = body
                .iter()
                .filter(|s| !matches!(s.node, StmtNode::Pass))
                .count();
            if non_pass > 0 {
                let before = body.len();
                body.retain(|s| !matches!(s.node, StmtNode::Pass));
                changes += before - body.len();
            } else if body.len() > 1 {
                let dropped = body.len() - 1;
                body.truncate(1);
                changes += dropped;
            }

            // if c: return E else: return E  ->  return E
            for s in body.iter_mut() {
                if let StmtNode::If {
                    body: then_body,
                    orelse,
                    ..
                } = &s.node
                    && then_body.len() == 1
                    && orelse.len() == 1
                    && let (StmtNode::Return(a), StmtNode::Return(b)) =
                        (&then_body[0].node, &orelse[0].node)
                    && returns_equal(a.as_ref(), b.as_ref())
                {
                    let hoisted = then_body[0].clone();
                    *s = hoisted;
                    changes += 1;
                }
            }
            changes
        })
    }
}

/// Structural equality of return expressions, via canonical keys when both
/// are pure, falling back to node equality.
fn returns_equal(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (&a.ckey, &b.ckey) {
            (Some(ka), Some(kb)) => ka == kb,
            _ => a.node == b.node,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprCtx, Span};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
    }

    fn int(v: i64) -> Expr {
        Expr::new(ExprNode::Int(v), sp())
    }

    fn assign(target: &str, value: Expr) -> Stmt {
        Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: target.to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value,
            },
            sp(),
        )
    }

    #[test]
    fn test_if_true_keeps_then_branch_exactly() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![assign("a", int(1)), assign("b", int(2))],
                orelse: vec![assign("a", int(9))],
            },
            sp(),
        ));
        let n = SimplifyCfg.run(&mut m);
        assert_eq!(n, 1);
        assert_eq!(m.body.len(), 2);
        assert!(matches!(&m.body[0].node, StmtNode::Assign { value, .. }
            if matches!(value.node, ExprNode::Int(1))));
        assert_eq!(SimplifyCfg.run(&mut m), 0);
    }

    #[test]
    fn test_if_false_keeps_else_branch() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Int(0), sp()),
                body: vec![assign("a", int(1))],
                orelse: vec![assign("a", int(2))],
            },
            sp(),
        ));
        SimplifyCfg.run(&mut m);
        assert_eq!(m.body.len(), 1);
        assert!(matches!(&m.body[0].node, StmtNode::Assign { value, .. }
            if matches!(value.node, ExprNode::Int(2))));
    }

    #[test]
    fn test_redundant_pass_dropped() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("a", int(1)));
        m.body.push(Stmt::new(StmtNode::Pass, sp()));
        let n = SimplifyScopes.run(&mut m);
        assert_eq!(n, 1);
        assert_eq!(m.body.len(), 1);
        // A lone pass survives.
        let mut m2 = Module::new("m", "m.py");
        m2.body.push(Stmt::new(StmtNode::Pass, sp()));
        assert_eq!(SimplifyScopes.run(&mut m2), 0);
        assert_eq!(m2.body.len(), 1);
    }

    #[test]
    fn test_identical_returns_hoisted() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![Stmt::new(StmtNode::Return(Some(int(1))), sp())],
                orelse: vec![Stmt::new(StmtNode::Return(Some(int(1))), sp())],
            },
            sp(),
        ));
        let n = SimplifyScopes.run(&mut m);
        assert_eq!(n, 1);
        assert!(matches!(m.body[0].node, StmtNode::Return(_)));
        assert_eq!(SimplifyScopes.run(&mut m), 0);
    }

    #[test]
    fn test_different_returns_not_merged() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![Stmt::new(StmtNode::Return(Some(int(0))), sp())],
                orelse: vec![Stmt::new(StmtNode::Return(Some(int(1))), sp())],
            },
            sp(),
        ));
        assert_eq!(SimplifyScopes.run(&mut m), 0);
        assert!(matches!(m.body[0].node, StmtNode::If { .. }));
    }
}
