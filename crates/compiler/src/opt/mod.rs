//! AST-level optimizer passes.
//!
//! Every pass rewrites function bodies in place and returns the number of
//! changes it made. Passes are idempotent: a second run over a pass's own
//! output reports zero changes. Purity questions go through the
//! [`purity`] oracle; nothing else may guess at effects.

pub mod cse;
pub mod gvn;
pub mod licm;
pub mod local_prop;
pub mod purity;
pub mod range;
pub mod simplify;
pub mod unroll;

use crate::ast::Module;

pub use cse::Cse;
pub use gvn::{Gvn, SsaGvn};
pub use licm::Licm;
pub use local_prop::LocalProp;
pub use range::RangeAnalysis;
pub use simplify::{SimplifyCfg, SimplifyScopes};
pub use unroll::LoopUnroll;

use crate::ast::{Stmt, StmtNode};

/// Apply `f` to every statement list in the module (the top level, function
/// bodies, and every nested control-flow body), outermost first.
pub(crate) fn rewrite_bodies(
    module: &mut Module,
    f: &mut dyn FnMut(&mut Vec<Stmt>) -> usize,
) -> usize {
    rewrite_body(&mut module.body, f)
}

fn rewrite_body(body: &mut Vec<Stmt>, f: &mut dyn FnMut(&mut Vec<Stmt>) -> usize) -> usize {
    let mut n = f(body);
    for s in body.iter_mut() {
        n += rewrite_children(s, f);
    }
    n
}

fn rewrite_children(s: &mut Stmt, f: &mut dyn FnMut(&mut Vec<Stmt>) -> usize) -> usize {
    let mut n = 0;
    match &mut s.node {
        StmtNode::If { body, orelse, .. }
        | StmtNode::While { body, orelse, .. }
        | StmtNode::For { body, orelse, .. } => {
            n += rewrite_body(body, f);
            n += rewrite_body(orelse, f);
        }
        StmtNode::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            n += rewrite_body(body, f);
            for h in handlers {
                n += rewrite_body(&mut h.body, f);
            }
            n += rewrite_body(orelse, f);
            n += rewrite_body(finalbody, f);
        }
        StmtNode::With { body, .. } => n += rewrite_body(body, f),
        StmtNode::Match { cases, .. } => {
            for c in cases {
                n += rewrite_body(&mut c.body, f);
            }
        }
        StmtNode::FunctionDef(func) => n += rewrite_body(&mut func.body, f),
        StmtNode::ClassDef(c) => n += rewrite_body(&mut c.body, f),
        _ => {}
    }
    n
}

/// One rewrite pass over a module.
pub trait Pass {
    fn name(&self) -> &'static str;
    /// Rewrite the module; returns the number of changes made.
    fn run(&self, module: &mut Module) -> usize;
}

/// Per-pass change counts from one optimizer run.
#[derive(Debug, Default)]
pub struct PassStats {
    pub changes: Vec<(&'static str, usize)>,
}

impl PassStats {
    pub fn total(&self) -> usize {
        self.changes.iter().map(|(_, n)| n).sum()
    }
}

/// The standard pipeline in its fixed order.
pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer {
            passes: vec![
                Box::new(SimplifyCfg),
                Box::new(SimplifyScopes),
                Box::new(LocalProp),
                Box::new(Cse),
                Box::new(Gvn),
                Box::new(SsaGvn),
                Box::new(Licm),
                Box::new(LoopUnroll),
                Box::new(RangeAnalysis),
            ],
        }
    }

    /// Build a pipeline keeping only the passes `enabled` admits by name.
    pub fn with_filter(enabled: impl Fn(&str) -> bool) -> Self {
        let mut opt = Self::new();
        opt.passes.retain(|p| enabled(p.name()));
        opt
    }

    pub fn run(&self, module: &mut Module) -> PassStats {
        let mut stats = PassStats::default();
        for pass in &self.passes {
            let n = pass.run(module);
            stats.changes.push((pass.name(), n));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprCtx, ExprNode, Span, Stmt, StmtNode};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
    }

    #[test]
    fn test_every_pass_is_idempotent() {
        // A module exercising folds, duplicate pure statements, copies, and
        // a constant-range loop.
        let mut m = Module::new("m", "m.py");
        let assign = |t: &str, v: Expr| {
            Stmt::new(
                StmtNode::Assign {
                    targets: vec![Expr::new(
                        ExprNode::Name {
                            id: t.to_string(),
                            ctx: ExprCtx::Store,
                        },
                        sp(),
                    )],
                    value: v,
                },
                sp(),
            )
        };
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![assign("a", Expr::new(ExprNode::Int(1), sp()))],
                orelse: vec![assign("a", Expr::new(ExprNode::Int(2), sp()))],
            },
            sp(),
        ));
        m.body.push(assign("b", Expr::new(ExprNode::Int(3), sp())));
        m.body.push(assign(
            "c",
            Expr::new(
                ExprNode::Name {
                    id: "b".to_string(),
                    ctx: ExprCtx::Load,
                },
                sp(),
            ),
        ));
        // Sema stamps ckeys used by CSE/GVN.
        let _ = crate::sema::analyze_module(&mut m);

        let opt = Optimizer::new();
        let _first = opt.run(&mut m);
        let second = opt.run(&mut m);
        assert_eq!(
            second.total(),
            0,
            "second run must be change-free: {:?}",
            second.changes
        );
    }
}
