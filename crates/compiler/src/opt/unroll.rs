//! Full unrolling of constant-trip-count range loops.
//!
//! Matches `for <name> in range(start, stop, step)` with constant
//! arguments. When the trip count is at most 8 and the body is small and
//! pure, the loop is replaced by N copies of the body, each preceded by
//! `target = start + k*step`.

use crate::ast::{Expr, ExprCtx, ExprNode, Module, Span, Stmt, StmtNode};
use crate::opt::purity::is_pure_expr;
use crate::opt::{rewrite_bodies, Pass};

const MAX_TRIP_COUNT: i64 = 8;
/// Statement-count x iteration-count budget for a profitable unroll.
const MAX_COST: usize = 24;

pub struct LoopUnroll;

impl Pass for LoopUnroll {
    fn name(&self) -> &'static str {
        "LoopUnroll"
    }

    fn run(&self, module: &mut Module) -> usize {
        rewrite_bodies(module, &mut |body| {
            let mut changes = 0;
            let mut out: Vec<Stmt> = Vec::with_capacity(body.len());
            for s in body.drain(..) {
                match try_unroll(&s) {
                    Some(stmts) => {
                        out.extend(stmts);
                        changes += 1;
                    }
                    None => out.push(s),
                }
            }
            *body = out;
            changes
        })
    }
}

/// Constant `(start, stop, step)` of a `range(...)` call, following the
/// one-, two-, and three-argument forms.
fn const_range(call: &Expr) -> Option<(i64, i64, i64)> {
    let ExprNode::Call {
        func,
        args,
        keywords,
    } = &call.node
    else {
        return None;
    };
    if func.as_name() != Some("range") || !keywords.is_empty() {
        return None;
    }
    let consts: Option<Vec<i64>> = args.iter().map(Expr::as_const_int).collect();
    let consts = consts?;
    match consts.as_slice() {
        [stop] => Some((0, *stop, 1)),
        [start, stop] => Some((*start, *stop, 1)),
        [start, stop, step] if *step != 0 => Some((*start, *stop, *step)),
        _ => None,
    }
}

fn trip_count(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 {
        if stop <= start {
            0
        } else {
            (stop - start + step - 1) / step
        }
    } else {
        let step = -step;
        if start <= stop {
            0
        } else {
            (start - stop + step - 1) / step
        }
    }
}

/// Body is unrollable when every statement is a simple pure one: pass,
/// pure expression statements, and assignments/augmented assignments of
/// pure right-hand sides to simple names.
fn body_is_simple(body: &[Stmt]) -> bool {
    body.iter().all(|s| match &s.node {
        StmtNode::Pass => true,
        StmtNode::Expr(e) => is_pure_expr(e),
        StmtNode::Assign { targets, value } => {
            targets.len() == 1 && targets[0].as_name().is_some() && is_pure_expr(value)
        }
        StmtNode::AugAssign { target, value, .. } => {
            target.as_name().is_some() && is_pure_expr(value)
        }
        _ => false,
    })
}

fn try_unroll(s: &Stmt) -> Option<Vec<Stmt>> {
    let StmtNode::For {
        target,
        iter,
        body,
        orelse,
    } = &s.node
    else {
        return None;
    };
    let target_name = target.as_name()?;
    let (start, stop, step) = const_range(iter)?;
    let n = trip_count(start, stop, step);
    if n > MAX_TRIP_COUNT {
        return None;
    }
    if !body_is_simple(body) {
        return None;
    }
    if (n as usize) * body.len() > MAX_COST {
        return None;
    }

    let mut out = Vec::with_capacity((n as usize) * (body.len() + 1) + orelse.len());
    for k in 0..n {
        let value = start + k * step;
        out.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: target_name.to_string(),
                        ctx: ExprCtx::Store,
                    },
                    target.span.clone(),
                )],
                value: Expr::new(ExprNode::Int(value), Span::synthetic()),
            },
            s.span.clone(),
        ));
        out.extend(body.iter().cloned());
    }
    // Normal exit always happens on a constant range: the else body runs.
    out.extend(orelse.iter().cloned());
    Some(out)
}
