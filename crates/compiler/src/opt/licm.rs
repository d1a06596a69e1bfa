//! Loop-invariant code motion for while loops.
//!
//! An assignment `name = pure-expr` in a loop body is hoisted before the
//! loop header when the right side reads no name written anywhere in the
//! loop, the left side is not read earlier in the loop, and the left side
//! is written exactly once in the loop.

use crate::ast::{Expr, Module, Stmt, StmtNode};
use crate::opt::purity::{is_pure_expr, names_read};
use crate::opt::{rewrite_bodies, Pass};
use crate::sema::stmt::collect_assigned_names;
use std::collections::HashSet;

pub struct Licm;

impl Pass for Licm {
    fn name(&self) -> &'static str {
        "LICM"
    }

    fn run(&self, module: &mut Module) -> usize {
        rewrite_bodies(module, &mut |body| {
            let mut changes = 0;
            let mut i = 0;
            while i < body.len() {
                if matches!(body[i].node, StmtNode::While { .. }) {
                    let hoisted = hoist_from_while(&mut body[i]);
                    let count = hoisted.len();
                    for (offset, stmt) in hoisted.into_iter().enumerate() {
                        body.insert(i + offset, stmt);
                    }
                    i += count;
                    changes += count;
                }
                i += 1;
            }
            changes
        })
    }
}

/// Pull invariant assignments out of one while statement's body.
fn hoist_from_while(loop_stmt: &mut Stmt) -> Vec<Stmt> {
    let StmtNode::While { cond, body, .. } = &mut loop_stmt.node else {
        return Vec::new();
    };

    let mut written: HashSet<String> = HashSet::new();
    collect_assigned_names(body, &mut written);

    // Names the condition reads count as reads-before for every body
    // statement (the header runs first).
    let mut cond_reads = HashSet::new();
    names_read(cond, &mut cond_reads);

    let mut hoist_indices: Vec<usize> = Vec::new();
    let mut reads_so_far: HashSet<String> = cond_reads;
    for (i, s) in body.iter().enumerate() {
        let candidate = invariant_target(s, &written, &reads_so_far);
        // Record this statement's reads for later candidates, whatever the
        // verdict was.
        record_stmt_reads(s, &mut reads_so_far);
        if let Some(target) = candidate {
            // Written exactly once in the loop.
            let write_count = count_writes(body, &target);
            if write_count == 1 {
                hoist_indices.push(i);
            }
        }
    }

    let mut hoisted = Vec::with_capacity(hoist_indices.len());
    for &i in hoist_indices.iter().rev() {
        hoisted.push(body.remove(i));
    }
    hoisted.reverse();
    hoisted
}

/// If `s` is `name = pure-expr` whose RHS reads nothing written in the loop
/// and whose LHS was not read before it, return the target name.
fn invariant_target(
    s: &Stmt,
    written_in_loop: &HashSet<String>,
    reads_before: &HashSet<String>,
) -> Option<String> {
    let StmtNode::Assign { targets, value } = &s.node else {
        return None;
    };
    if targets.len() != 1 {
        return None;
    }
    let target = targets[0].as_name()?;
    if !is_pure_expr(value) {
        return None;
    }
    let mut rhs_reads = HashSet::new();
    names_read(value, &mut rhs_reads);
    if rhs_reads.iter().any(|n| written_in_loop.contains(n)) {
        return None;
    }
    if reads_before.contains(target) {
        return None;
    }
    Some(target.to_string())
}

fn record_stmt_reads(s: &Stmt, out: &mut HashSet<String>) {
    let mut record = |e: &Expr| names_read(e, out);
    crate::ast::stmt_exprs(s, &mut record);
    for b in crate::ast::child_bodies(s) {
        for child in b {
            record_stmt_reads(child, out);
        }
    }
}

fn count_writes(body: &[Stmt], name: &str) -> usize {
    let mut counts = 0;
    for s in body {
        match &s.node {
            StmtNode::Assign { targets, .. } => {
                for t in targets {
                    let mut names = HashSet::new();
                    collect_assigned_names(
                        std::slice::from_ref(&Stmt::new(
                            StmtNode::Assign {
                                targets: vec![t.clone()],
                                value: t.clone(),
                            },
                            s.span.clone(),
                        )),
                        &mut names,
                    );
                    if names.contains(name) {
                        counts += 1;
                    }
                }
            }
            StmtNode::AugAssign { target, .. } | StmtNode::For { target, .. } => {
                if target.as_name() == Some(name) {
                    counts += 1;
                }
            }
            _ => {}
        }
        if !matches!(s.node, StmtNode::Assign { .. }) {
            for b in crate::ast::child_bodies(s) {
                counts += count_writes(b, name);
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ExprCtx, ExprNode, Span};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
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

    fn mul(a: Expr, b: Expr) -> Expr {
        Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(a),
                rhs: Box::new(b),
            },
            sp(),
        )
    }

    fn while_loop(cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(
            StmtNode::While {
                cond,
                body,
                orelse: vec![],
            },
            sp(),
        )
    }

    #[test]
    fn test_invariant_hoisted_before_loop() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("n", int(10)));
        m.body.push(assign("i", int(0)));
        m.body.push(while_loop(
            Expr::new(
                ExprNode::Compare {
                    left: Box::new(name("i")),
                    ops: vec![crate::ast::CmpOp::Lt],
                    comparators: vec![name("n")],
                },
                sp(),
            ),
            vec![
                assign("k", mul(name("n"), int(2))),
                Stmt::new(
                    StmtNode::AugAssign {
                        target: name("i"),
                        op: BinaryOp::Add,
                        value: name("k"),
                    },
                    sp(),
                ),
            ],
        ));
        let changes = Licm.run(&mut m);
        assert_eq!(changes, 1);
        // k's assignment now sits directly before the while.
        assert!(matches!(&m.body[2].node, StmtNode::Assign { targets, .. }
            if targets[0].as_name() == Some("k")));
        assert!(matches!(&m.body[3].node, StmtNode::While { body, .. } if body.len() == 1));
        assert_eq!(Licm.run(&mut m), 0);
    }

    #[test]
    fn test_rhs_reading_loop_written_name_stays() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("i", int(0)));
        m.body.push(while_loop(
            name("c"),
            vec![
                // k = i * 2 reads the loop counter: not invariant.
                assign("k", mul(name("i"), int(2))),
                Stmt::new(
                    StmtNode::AugAssign {
                        target: name("i"),
                        op: BinaryOp::Add,
                        value: int(1),
                    },
                    sp(),
                ),
            ],
        ));
        assert_eq!(Licm.run(&mut m), 0);
    }

    #[test]
    fn test_lhs_read_before_assignment_stays() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("k", int(0)));
        m.body.push(while_loop(
            name("c"),
            vec![
                // use k, then redefine it: hoisting would change the first read.
                Stmt::new(StmtNode::Expr(mul(name("k"), int(2))), sp()),
                assign("k", int(7)),
            ],
        ));
        assert_eq!(Licm.run(&mut m), 0);
    }

    #[test]
    fn test_double_write_stays() {
        let mut m = Module::new("m", "m.py");
        m.body.push(while_loop(
            name("c"),
            vec![assign("k", int(1)), assign("k", int(2))],
        ));
        assert_eq!(Licm.run(&mut m), 0);
    }
}
