//! Integer range analysis.
//!
//! Records `[min, max]` intervals for names assigned integer literals at
//! the top level of each scope. Analysis-only: the pass rewrites nothing
//! and always reports zero changes. The interval table is the analysis'
//! whole product; callers inside the crate read it through
//! [`RangeAnalysis::intervals`].

use crate::ast::{ExprNode, Module, Stmt, StmtNode};
use crate::opt::Pass;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interval {
    pub min: i64,
    pub max: i64,
}

impl Interval {
    fn point(v: i64) -> Self {
        Interval { min: v, max: v }
    }

    fn widen(&mut self, v: i64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }
}

pub struct RangeAnalysis;

impl RangeAnalysis {
    /// Intervals for one statement list's top-level integer assignments.
    pub(crate) fn intervals(body: &[Stmt]) -> HashMap<String, Interval> {
        let mut out: HashMap<String, Interval> = HashMap::new();
        for s in body {
            let StmtNode::Assign { targets, value } = &s.node else {
                continue;
            };
            let ExprNode::Int(v) = value.node else {
                continue;
            };
            for t in targets {
                if let Some(name) = t.as_name() {
                    out.entry(name.to_string())
                        .and_modify(|iv| iv.widen(v))
                        .or_insert_with(|| Interval::point(v));
                }
            }
        }
        out
    }
}

impl Pass for RangeAnalysis {
    fn name(&self) -> &'static str {
        "RangeAnalysis"
    }

    fn run(&self, module: &mut Module) -> usize {
        let _ = Self::intervals(&module.body);
        for f in module.functions() {
            let _ = Self::intervals(&f.body);
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprCtx, Span};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
    }

    fn assign(target: &str, v: i64) -> Stmt {
        Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: target.to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: Expr::new(ExprNode::Int(v), sp()),
            },
            sp(),
        )
    }

    #[test]
    fn test_point_interval() {
        let body = vec![assign("x", 7)];
        let iv = RangeAnalysis::intervals(&body);
        assert_eq!(iv["x"], Interval { min: 7, max: 7 });
    }

    #[test]
    fn test_repeated_assignment_widens() {
        let body = vec![assign("x", 7), assign("x", -2), assign("x", 10)];
        let iv = RangeAnalysis::intervals(&body);
        assert_eq!(iv["x"], Interval { min: -2, max: 10 });
    }

    #[test]
    fn test_pass_makes_no_changes() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("x", 1));
        assert_eq!(RangeAnalysis.run(&mut m), 0);
    }
}
