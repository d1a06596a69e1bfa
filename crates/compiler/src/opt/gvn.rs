//! Global value numbering.
//!
//! `Gvn` hashes pure right-hand sides by canonical key inside each
//! statement list and rewrites a repeated definition to reuse the class
//! representative. `SsaGvn` extends the reuse across blocks by walking the
//! dominator tree of the SSA scaffold; both are restricted to names
//! assigned exactly once in their scope, which makes the reuse safe without
//! full dataflow.

use crate::ast::{Expr, ExprCtx, ExprNode, Module, Stmt, StmtNode};
use crate::opt::purity::{expr_complexity, is_pure_expr};
use crate::opt::Pass;
use crate::sema::stmt::collect_assigned_names;
use crate::ssa::{SsaBuilder, SsaFunction};
use std::collections::{HashMap, HashSet};

pub struct Gvn;

impl Pass for Gvn {
    fn name(&self) -> &'static str {
        "GVN"
    }

    fn run(&self, module: &mut Module) -> usize {
        let mut total = 0;
        total += gvn_scope(&mut module.body);
        for f in module.functions_mut() {
            total += gvn_scope(&mut f.body);
        }
        total
    }
}

/// Names assigned exactly once anywhere in `body`.
fn single_assignment_names(body: &[Stmt]) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    count_assignments(body, &mut counts);
    counts
        .into_iter()
        .filter(|(_, n)| *n == 1)
        .map(|(name, _)| name)
        .collect()
}

fn count_assignments(body: &[Stmt], counts: &mut HashMap<String, usize>) {
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
                    for n in names {
                        *counts.entry(n).or_default() += 1;
                    }
                }
            }
            StmtNode::AugAssign { target, .. } => {
                if let Some(n) = target.as_name() {
                    *counts.entry(n.to_string()).or_default() += 2; // read+write
                }
            }
            StmtNode::For { target, .. } => {
                if let Some(n) = target.as_name() {
                    *counts.entry(n.to_string()).or_default() += 2; // loop-carried
                }
            }
            StmtNode::FunctionDef(_) | StmtNode::ClassDef(_) => continue,
            _ => {}
        }
        for b in crate::ast::child_bodies(s) {
            count_assignments(b, counts);
        }
    }
}

/// Straight-line GVN inside one scope (module top level or function body):
/// assignments in the same statement list share value numbers.
fn gvn_scope(body: &mut [Stmt]) -> usize {
    let single = single_assignment_names(body);
    gvn_body(body, &single)
}

/// Number one statement list, then recurse into control-flow children
/// (each with its own table). Nested defs are separate scopes and skipped.
fn gvn_body(stmts: &mut [Stmt], single: &HashSet<String>) -> usize {
    let mut reps: HashMap<String, String> = HashMap::new(); // ckey -> rep name
    let mut changes = 0;
    for s in stmts.iter_mut() {
        if let StmtNode::Assign { targets, value } = &mut s.node
            && targets.len() == 1
            && let Some(target) = targets[0].as_name()
            && single.contains(target)
            && is_pure_expr(value)
            && expr_complexity(value) >= 1
            && let Some(key) = value.ckey.clone()
        {
            match reps.get(&key) {
                Some(rep) if rep.as_str() != target => {
                    let rep = rep.clone();
                    let span = value.span.clone();
                    *value = Expr::new(
                        ExprNode::Name {
                            id: rep,
                            ctx: ExprCtx::Load,
                        },
                        span,
                    );
                    changes += 1;
                }
                Some(_) => {}
                None => {
                    reps.insert(key, target.to_string());
                }
            }
        }
        if !matches!(s.node, StmtNode::FunctionDef(_) | StmtNode::ClassDef(_)) {
            for b in child_bodies_mut(s) {
                changes += gvn_body(b, single);
            }
        }
    }
    changes
}

pub struct SsaGvn;

impl Pass for SsaGvn {
    fn name(&self) -> &'static str {
        "SSAGVN"
    }

    fn run(&self, module: &mut Module) -> usize {
        let mut total = 0;
        total += ssa_gvn_scope(&mut module.body);
        for f in module.functions_mut() {
            total += ssa_gvn_scope(&mut f.body);
        }
        total
    }
}

fn ssa_gvn_scope(body: &mut Vec<Stmt>) -> usize {
    let single = single_assignment_names(body);
    // Phase 1: value-number over the dominator tree, collecting
    // name -> representative substitutions. Single-assignment names make
    // the mapping unambiguous when applied back to the AST.
    let replacements: HashMap<String, String> = {
        let f = SsaBuilder::build(body);
        let dt = SsaBuilder::compute_dominators(&f);
        let mut replacements = HashMap::new();
        let mut table: HashMap<String, String> = HashMap::new();
        walk_dom_tree(&f, &dt.children, f.entry, &single, &mut table, &mut replacements);
        replacements
    };
    if replacements.is_empty() {
        return 0;
    }
    // Phase 2: apply to the AST.
    let mut changes = 0;
    apply_replacements(body, &replacements, &mut changes);
    changes
}

fn walk_dom_tree(
    f: &SsaFunction<'_>,
    children: &[Vec<usize>],
    block: usize,
    single: &HashSet<String>,
    table: &mut HashMap<String, String>,
    replacements: &mut HashMap<String, String>,
) {
    let added: Vec<String> = {
        let mut added = Vec::new();
        for &si in &f.blocks[block].stmts {
            let s = f.stmts[si];
            let StmtNode::Assign { targets, value } = &s.node else {
                continue;
            };
            if targets.len() != 1 {
                continue;
            }
            let Some(target) = targets[0].as_name() else {
                continue;
            };
            if !single.contains(target) || !is_pure_expr(value) {
                continue;
            }
            // Bare literals and name copies are cheaper than a reuse.
            if expr_complexity(value) < 1 {
                continue;
            }
            let Some(key) = &value.ckey else { continue };
            match table.get(key) {
                Some(rep) if rep.as_str() != target && single.contains(rep) => {
                    replacements.insert(target.to_string(), rep.clone());
                }
                Some(_) => {}
                None => {
                    table.insert(key.clone(), target.to_string());
                    added.push(key.clone());
                }
            }
        }
        added
    };
    for &c in &children[block] {
        walk_dom_tree(f, children, c, single, table, replacements);
    }
    // Scope the table to the dominator subtree.
    for key in added {
        table.remove(&key);
    }
}

fn apply_replacements(
    body: &mut [Stmt],
    replacements: &HashMap<String, String>,
    changes: &mut usize,
) {
    for s in body.iter_mut() {
        if let StmtNode::Assign { targets, value } = &mut s.node
            && targets.len() == 1
            && let Some(target) = targets[0].as_name()
            && let Some(rep) = replacements.get(target)
            && value.as_name() != Some(rep.as_str())
        {
            let span = value.span.clone();
            *value = Expr::new(
                ExprNode::Name {
                    id: rep.clone(),
                    ctx: ExprCtx::Load,
                },
                span,
            );
            *changes += 1;
        }
        for b in child_bodies_mut(s) {
            apply_replacements(b, replacements, changes);
        }
    }
}

fn child_bodies_mut(s: &mut Stmt) -> Vec<&mut [Stmt]> {
    match &mut s.node {
        StmtNode::If { body, orelse, .. }
        | StmtNode::While { body, orelse, .. }
        | StmtNode::For { body, orelse, .. } => vec![body, orelse],
        StmtNode::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let mut out: Vec<&mut [Stmt]> = vec![body];
            for h in handlers {
                out.push(&mut h.body);
            }
            out.push(orelse);
            out.push(finalbody);
            out
        }
        StmtNode::With { body, .. } => vec![body],
        StmtNode::Match { cases, .. } => cases.iter_mut().map(|c| c.body.as_mut_slice()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Span};

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

    #[test]
    fn test_gvn_reuses_representative() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("n", Expr::new(ExprNode::Int(3), sp())));
        m.body.push(assign("a", mul(name("n"), name("n"))));
        m.body.push(assign("b", mul(name("n"), name("n"))));
        let _ = crate::sema::analyze_module(&mut m);
        let changes = Gvn.run(&mut m);
        assert_eq!(changes, 1);
        if let StmtNode::Assign { value, .. } = &m.body[2].node {
            assert_eq!(value.as_name(), Some("a"));
        } else {
            unreachable!();
        }
        assert_eq!(Gvn.run(&mut m), 0);
    }

    #[test]
    fn test_gvn_skips_reassigned_names() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("n", Expr::new(ExprNode::Int(3), sp())));
        m.body.push(assign("a", mul(name("n"), name("n"))));
        m.body.push(assign("a", Expr::new(ExprNode::Int(0), sp())));
        m.body.push(assign("b", mul(name("n"), name("n"))));
        let _ = crate::sema::analyze_module(&mut m);
        // `a` is assigned twice: not a safe representative.
        assert_eq!(Gvn.run(&mut m), 0);
    }

    #[test]
    fn test_ssa_gvn_reuses_dominating_definition() {
        // x = n*n before an if; both branches recompute n*n into y/z.
        // The definition of x dominates both branch blocks.
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("n", Expr::new(ExprNode::Int(3), sp())));
        m.body.push(assign("x", mul(name("n"), name("n"))));
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: name("c"),
                body: vec![assign("y", mul(name("n"), name("n")))],
                orelse: vec![assign("z", mul(name("n"), name("n")))],
            },
            sp(),
        ));
        let _ = crate::sema::analyze_module(&mut m);
        let changes = SsaGvn.run(&mut m);
        assert_eq!(changes, 2);
        if let StmtNode::If { body, orelse, .. } = &m.body[2].node {
            let StmtNode::Assign { value, .. } = &body[0].node else {
                unreachable!();
            };
            assert_eq!(value.as_name(), Some("x"));
            let StmtNode::Assign { value, .. } = &orelse[0].node else {
                unreachable!();
            };
            assert_eq!(value.as_name(), Some("x"));
        } else {
            unreachable!();
        }
        assert_eq!(SsaGvn.run(&mut m), 0);
    }

    #[test]
    fn test_ssa_gvn_does_not_cross_siblings() {
        // The two branch blocks do not dominate each other: a definition in
        // the then branch must not serve the else branch.
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("n", Expr::new(ExprNode::Int(3), sp())));
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: name("c"),
                body: vec![assign("y", mul(name("n"), name("n")))],
                orelse: vec![assign("z", mul(name("n"), name("n")))],
            },
            sp(),
        ));
        let _ = crate::sema::analyze_module(&mut m);
        assert_eq!(SsaGvn.run(&mut m), 0);
    }
}
