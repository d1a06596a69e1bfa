//! Forward copy/constant propagation over straight-line regions.
//!
//! Tracks simple-name assignments whose right side is a literal or another
//! name, and rewrites later reads. Entries die on any non-trivial write;
//! class, import, raise, and global/nonlocal boundaries clear the whole
//! environment. Branch bodies propagate under per-branch copies that are
//! not merged back.

use crate::ast::{
    DictEntry, Expr, ExprCtx, ExprNode, FStringPart, Module, Stmt, StmtNode,
};
use crate::opt::purity::names_read;
use crate::opt::Pass;
use crate::sema::stmt::collect_assigned_names;
use std::collections::{HashMap, HashSet};

pub struct LocalProp;

impl Pass for LocalProp {
    fn name(&self) -> &'static str {
        "LocalProp"
    }

    fn run(&self, module: &mut Module) -> usize {
        let mut env = HashMap::new();
        prop_body(&mut module.body, &mut env)
    }
}

/// A replacement is trivial when it is a literal or a bare name.
fn is_trivial(e: &Expr) -> bool {
    matches!(
        e.node,
        ExprNode::Int(_)
            | ExprNode::Float(_)
            | ExprNode::Bool(_)
            | ExprNode::Str(_)
            | ExprNode::NoneLit
            | ExprNode::Name { .. }
    )
}

fn kill_name(env: &mut HashMap<String, Expr>, name: &str) {
    env.remove(name);
    env.retain(|_, rep| {
        let mut reads = HashSet::new();
        names_read(rep, &mut reads);
        !reads.contains(name)
    });
}

fn kill_assigned_in(env: &mut HashMap<String, Expr>, body: &[Stmt]) {
    let mut assigned = HashSet::new();
    collect_assigned_names(body, &mut assigned);
    for n in assigned {
        kill_name(env, &n);
    }
}

fn prop_body(body: &mut [Stmt], env: &mut HashMap<String, Expr>) -> usize {
    let mut changes = 0;
    for s in body.iter_mut() {
        changes += prop_stmt(s, env);
    }
    changes
}

fn prop_stmt(s: &mut Stmt, env: &mut HashMap<String, Expr>) -> usize {
    let mut changes = 0;
    match &mut s.node {
        StmtNode::Expr(e) => changes += subst(e, env),
        StmtNode::Assign { targets, value } => {
            changes += subst(value, env);
            for t in targets.iter_mut() {
                changes += subst_store_target(t, env);
            }
            if targets.len() == 1
                && let Some(name) = targets[0].as_name()
            {
                let name = name.to_string();
                kill_name(env, &name);
                if is_trivial(value) && value.as_name() != Some(name.as_str()) {
                    env.insert(name, value.clone());
                }
            } else {
                let mut assigned = HashSet::new();
                for t in targets.iter() {
                    let mut one = HashSet::new();
                    names_read(t, &mut one);
                    assigned.extend(one);
                }
                for n in assigned {
                    kill_name(env, &n);
                }
            }
        }
        StmtNode::AugAssign { target, value, .. } => {
            changes += subst(value, env);
            if let Some(name) = target.as_name() {
                let name = name.to_string();
                kill_name(env, &name);
            }
        }
        StmtNode::Return(v) => {
            if let Some(v) = v {
                changes += subst(v, env);
            }
        }
        StmtNode::If { cond, body, orelse } => {
            changes += subst(cond, env);
            let mut then_env = env.clone();
            changes += prop_body(body, &mut then_env);
            let mut else_env = env.clone();
            changes += prop_body(orelse, &mut else_env);
            kill_assigned_in(env, body);
            kill_assigned_in(env, orelse);
        }
        StmtNode::While { cond, body, orelse } => {
            // Loop-carried writes invalidate entries before the body runs.
            kill_assigned_in(env, body);
            changes += subst(cond, env);
            let mut loop_env = env.clone();
            changes += prop_body(body, &mut loop_env);
            changes += prop_body(orelse, env);
        }
        StmtNode::For {
            target,
            iter,
            body,
            orelse,
        } => {
            changes += subst(iter, env);
            if let Some(name) = target.as_name() {
                let name = name.to_string();
                kill_name(env, &name);
            }
            kill_assigned_in(env, body);
            let mut loop_env = env.clone();
            changes += prop_body(body, &mut loop_env);
            changes += prop_body(orelse, env);
        }
        StmtNode::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let mut try_env = env.clone();
            changes += prop_body(body, &mut try_env);
            for h in handlers.iter_mut() {
                let mut h_env = env.clone();
                changes += prop_body(&mut h.body, &mut h_env);
            }
            let mut o_env = env.clone();
            changes += prop_body(orelse, &mut o_env);
            let mut f_env = env.clone();
            changes += prop_body(finalbody, &mut f_env);
            kill_assigned_in(env, body);
            for h in handlers.iter() {
                kill_assigned_in(env, &h.body);
            }
            kill_assigned_in(env, orelse);
            kill_assigned_in(env, finalbody);
        }
        StmtNode::With { items, body } => {
            for item in items.iter_mut() {
                changes += subst(&mut item.context, env);
            }
            let mut w_env = env.clone();
            changes += prop_body(body, &mut w_env);
            kill_assigned_in(env, body);
        }
        StmtNode::Assert { test, msg } => {
            changes += subst(test, env);
            if let Some(m) = msg {
                changes += subst(m, env);
            }
        }
        StmtNode::Del(targets) => {
            for t in targets.iter() {
                if let Some(n) = t.as_name() {
                    let n = n.to_string();
                    kill_name(env, &n);
                }
            }
        }
        StmtNode::Match { subject, cases } => {
            changes += subst(subject, env);
            for c in cases.iter_mut() {
                let mut c_env = env.clone();
                changes += prop_body(&mut c.body, &mut c_env);
                kill_assigned_in(env, &c.body);
            }
        }
        // Environment boundaries.
        StmtNode::ClassDef(_)
        | StmtNode::Import(_)
        | StmtNode::ImportFrom { .. }
        | StmtNode::Raise { .. }
        | StmtNode::Global(_)
        | StmtNode::Nonlocal(_) => env.clear(),
        StmtNode::FunctionDef(f) => {
            // Separate scope: fresh environment, outer entries untouched.
            let mut f_env = HashMap::new();
            changes += prop_body(&mut f.body, &mut f_env);
        }
        StmtNode::Break | StmtNode::Continue | StmtNode::Pass => {}
    }
    changes
}

/// Substitute inside the loadable parts of a store target (subscript bases
/// and indices, attribute bases), leaving the stored name itself alone.
fn subst_store_target(t: &mut Expr, env: &HashMap<String, Expr>) -> usize {
    match &mut t.node {
        ExprNode::Subscript { value, index, .. } => subst(value, env) + subst(index, env),
        ExprNode::Attribute { value, .. } => subst(value, env),
        ExprNode::Tuple(els) | ExprNode::List(els) => {
            els.iter_mut().map(|e| subst_store_target(e, env)).sum()
        }
        _ => 0,
    }
}

/// Replace name loads with their tracked trivial values.
fn subst(e: &mut Expr, env: &HashMap<String, Expr>) -> usize {
    if let ExprNode::Name { id, ctx } = &e.node {
        if *ctx != ExprCtx::Load {
            return 0;
        }
        if let Some(rep) = env.get(id) {
            let span = e.span.clone();
            *e = rep.clone();
            e.span = span;
            return 1;
        }
        return 0;
    }
    let mut n = 0;
    match &mut e.node {
        ExprNode::Unary { operand, .. } => n += subst(operand, env),
        ExprNode::Binary { lhs, rhs, .. } => {
            n += subst(lhs, env);
            n += subst(rhs, env);
        }
        ExprNode::Compare {
            left, comparators, ..
        } => {
            n += subst(left, env);
            for c in comparators {
                n += subst(c, env);
            }
        }
        ExprNode::Tuple(els) | ExprNode::List(els) | ExprNode::Set(els) | ExprNode::Object(els) => {
            for el in els {
                n += subst(el, env);
            }
        }
        ExprNode::Dict(entries) => {
            for entry in entries {
                match entry {
                    DictEntry::KeyValue { key, value } => {
                        n += subst(key, env);
                        n += subst(value, env);
                    }
                    DictEntry::Unpack { value } => n += subst(value, env),
                }
            }
        }
        ExprNode::Subscript { value, index, .. } => {
            n += subst(value, env);
            n += subst(index, env);
        }
        ExprNode::Attribute { value, .. } => n += subst(value, env),
        ExprNode::Call {
            func,
            args,
            keywords,
        } => {
            // The callee name is not a value read; arguments are.
            if !matches!(func.node, ExprNode::Name { .. }) {
                n += subst(func, env);
            }
            for a in args {
                n += subst(a, env);
            }
            for k in keywords {
                n += subst(&mut k.value, env);
            }
        }
        ExprNode::IfExpr { cond, then, orelse } => {
            n += subst(cond, env);
            n += subst(then, env);
            n += subst(orelse, env);
        }
        ExprNode::NamedExpr { value, .. } => n += subst(value, env),
        ExprNode::FString(parts) => {
            for p in parts {
                if let FStringPart::Expr(x) = p {
                    n += subst(x, env);
                }
            }
        }
        ExprNode::Await(x) => n += subst(x, env),
        ExprNode::Yield { value, .. } => {
            if let Some(v) = value {
                n += subst(v, env);
            }
        }
        _ => {}
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Span};

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
    fn test_constant_propagates_forward() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("x", int(5)));
        m.body.push(assign(
            "y",
            Expr::new(
                ExprNode::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(name("x")),
                    rhs: Box::new(int(1)),
                },
                sp(),
            ),
        ));
        let n = LocalProp.run(&mut m);
        assert_eq!(n, 1);
        if let StmtNode::Assign { value, .. } = &m.body[1].node
            && let ExprNode::Binary { lhs, .. } = &value.node
        {
            assert!(matches!(lhs.node, ExprNode::Int(5)));
        } else {
            unreachable!();
        }
        assert_eq!(LocalProp.run(&mut m), 0);
    }

    #[test]
    fn test_kill_on_reassignment() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("x", int(5)));
        m.body.push(assign(
            "x",
            Expr::new(
                ExprNode::Call {
                    func: Box::new(name("f")),
                    args: vec![],
                    keywords: vec![],
                },
                sp(),
            ),
        ));
        m.body.push(assign("y", name("x")));
        let n = LocalProp.run(&mut m);
        // x's constant died at the call assignment; y = x records a copy
        // but nothing is substituted.
        assert_eq!(n, 0);
        if let StmtNode::Assign { value, .. } = &m.body[2].node {
            assert!(value.as_name() == Some("x"));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_branchy_code_uses_per_branch_envs() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("x", int(1)));
        m.body.push(Stmt::new(
            StmtNode::If {
                cond: name("c"),
                body: vec![assign("y", name("x"))],
                orelse: vec![assign("x", int(2)), assign("z", name("x"))],
            },
            sp(),
        ));
        m.body.push(assign("w", name("x")));
        let n = LocalProp.run(&mut m);
        // y <- 1, z <- 2 propagate inside their branches; w keeps the name
        // read because the else branch rewrote x.
        assert_eq!(n, 2);
        if let StmtNode::Assign { value, .. } = &m.body[2].node {
            assert_eq!(value.as_name(), Some("x"));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_import_clears_environment() {
        let mut m = Module::new("m", "m.py");
        m.body.push(assign("x", int(1)));
        m.body.push(Stmt::new(
            StmtNode::Import(vec![crate::ast::Alias {
                name: "os".to_string(),
                asname: None,
            }]),
            sp(),
        ));
        m.body.push(assign("y", name("x")));
        assert_eq!(LocalProp.run(&mut m), 0);
    }
}
