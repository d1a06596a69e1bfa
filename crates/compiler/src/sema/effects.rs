//! Effect and trait scans.
//!
//! Secondary visitors over a checked module:
//! - `stmt_may_raise`: whether a statement can raise at runtime (any call,
//!   attribute access, subscript, division/modulo, or explicit raise;
//!   compound statements are raising when any part is)
//! - `scan_fn_traits`: generator/coroutine detection per function
//! - `scan_return_param`: detects functions whose every return returns the
//!   same parameter, enabling interprocedural pointer-tag forwarding

use crate::ast::{
    walk_expr, BinaryOp, Expr, ExprNode, FunctionDef, Module, Stmt, StmtNode,
};
use std::collections::HashMap;

/// Generator/coroutine traits of one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnFlags {
    pub is_generator: bool,
    pub is_coroutine: bool,
}

/// True when evaluating `e` may raise.
pub fn expr_may_raise(e: &Expr) -> bool {
    let mut found = false;
    walk_expr(e, &mut |x| match &x.node {
        ExprNode::Call { .. } | ExprNode::Attribute { .. } | ExprNode::Subscript { .. } => {
            found = true;
        }
        ExprNode::Binary { op, .. } if matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod) => {
            found = true;
        }
        _ => {}
    });
    found
}

/// True when executing `s` may raise. Conservative for compound statements.
pub fn stmt_may_raise(s: &Stmt) -> bool {
    match &s.node {
        StmtNode::Raise { .. } | StmtNode::Assert { .. } => true,
        StmtNode::Expr(e) => expr_may_raise(e),
        StmtNode::Assign { targets, value } => {
            targets.iter().any(expr_may_raise) || expr_may_raise(value)
        }
        StmtNode::AugAssign { target, op, value } => {
            matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod)
                || expr_may_raise(target)
                || expr_may_raise(value)
        }
        StmtNode::Return(v) => v.as_ref().is_some_and(expr_may_raise),
        StmtNode::If { cond, body, orelse } => {
            expr_may_raise(cond)
                || body.iter().any(stmt_may_raise)
                || orelse.iter().any(stmt_may_raise)
        }
        StmtNode::While { cond, body, orelse } => {
            expr_may_raise(cond)
                || body.iter().any(stmt_may_raise)
                || orelse.iter().any(stmt_may_raise)
        }
        StmtNode::For {
            target,
            iter,
            body,
            orelse,
        } => {
            expr_may_raise(target)
                || expr_may_raise(iter)
                || body.iter().any(stmt_may_raise)
                || orelse.iter().any(stmt_may_raise)
        }
        StmtNode::Try { .. } | StmtNode::With { .. } | StmtNode::Match { .. } => true,
        StmtNode::Del(targets) => targets.iter().any(expr_may_raise),
        StmtNode::Break
        | StmtNode::Continue
        | StmtNode::Pass
        | StmtNode::Global(_)
        | StmtNode::Nonlocal(_)
        | StmtNode::Import(_)
        | StmtNode::ImportFrom { .. }
        | StmtNode::ClassDef(_)
        | StmtNode::FunctionDef(_) => false,
    }
}

/// Scan generator/coroutine traits for every function in the module.
/// The scan does not cross into nested function bodies.
pub fn scan_fn_traits(module: &Module) -> HashMap<String, FnFlags> {
    let mut out = HashMap::new();
    for f in module.functions() {
        out.insert(f.name.clone(), fn_traits(f));
    }
    for c in module.classes() {
        for s in &c.body {
            if let StmtNode::FunctionDef(f) = &s.node {
                out.insert(format!("{}.{}", c.name, f.name), fn_traits(f));
            }
        }
    }
    out
}

fn fn_traits(f: &FunctionDef) -> FnFlags {
    let mut flags = FnFlags::default();
    for s in &f.body {
        scan_stmt_traits(s, &mut flags);
    }
    flags
}

fn scan_stmt_traits(s: &Stmt, flags: &mut FnFlags) {
    // Nested defs have their own traits.
    if matches!(s.node, StmtNode::FunctionDef(_)) {
        return;
    }
    let mut visit = |e: &Expr| {
        walk_expr(e, &mut |x| match &x.node {
            ExprNode::Yield { .. } => flags.is_generator = true,
            ExprNode::Await(_) => flags.is_coroutine = true,
            _ => {}
        });
    };
    crate::ast::stmt_exprs(s, &mut visit);
    for body in crate::ast::child_bodies(s) {
        for child in body {
            scan_stmt_traits(child, flags);
        }
    }
}

/// For each function whose every `return` statement returns the same
/// parameter (and nothing else), record that parameter's index.
pub fn scan_return_param(module: &Module) -> HashMap<String, usize> {
    let mut out = HashMap::new();
    for f in module.functions() {
        if let Some(idx) = return_param_idx(f) {
            out.insert(f.name.clone(), idx);
        }
    }
    out
}

fn return_param_idx(f: &FunctionDef) -> Option<usize> {
    let mut candidate: Option<usize> = None;
    let mut saw_return = false;
    let mut uniform = true;
    visit_returns(&f.body, &mut |value| {
        saw_return = true;
        let Some(v) = value else {
            uniform = false;
            return;
        };
        let Some(name) = v.as_name() else {
            uniform = false;
            return;
        };
        let Some(idx) = f.params.iter().position(|p| p.name == name) else {
            uniform = false;
            return;
        };
        match candidate {
            None => candidate = Some(idx),
            Some(c) if c == idx => {}
            Some(_) => uniform = false,
        }
    });
    if saw_return && uniform { candidate } else { None }
}

fn visit_returns(body: &[Stmt], f: &mut dyn FnMut(Option<&Expr>)) {
    for s in body {
        match &s.node {
            StmtNode::Return(v) => f(v.as_ref()),
            StmtNode::FunctionDef(_) => {} // inner function's returns are its own
            _ => {
                for child in crate::ast::child_bodies(s) {
                    visit_returns(child, f);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprCtx, ParamDecl, Span};

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

    fn ret(value: Option<Expr>) -> Stmt {
        Stmt::new(StmtNode::Return(value), sp())
    }

    fn func(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            params: params.iter().map(|p| ParamDecl::simple(*p, None)).collect(),
            body,
            returns: None,
            decorators: vec![],
            is_async: false,
            span: sp(),
        }
    }

    #[test]
    fn test_may_raise_on_division() {
        let s = Stmt::new(
            StmtNode::Expr(Expr::new(
                ExprNode::Binary {
                    op: BinaryOp::Div,
                    lhs: Box::new(name("a")),
                    rhs: Box::new(name("b")),
                },
                sp(),
            )),
            sp(),
        );
        assert!(stmt_may_raise(&s));
        let pure = Stmt::new(StmtNode::Expr(Expr::new(ExprNode::Int(1), sp())), sp());
        assert!(!stmt_may_raise(&pure));
    }

    #[test]
    fn test_may_raise_propagates_from_body() {
        let raising = Stmt::new(
            StmtNode::Raise {
                exc: Some(name("e")),
                cause: None,
            },
            sp(),
        );
        let s = Stmt::new(
            StmtNode::While {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![raising],
                orelse: vec![],
            },
            sp(),
        );
        assert!(stmt_may_raise(&s));
    }

    #[test]
    fn test_generator_trait_detected() {
        let y = Stmt::new(
            StmtNode::Expr(Expr::new(
                ExprNode::Yield {
                    value: Some(Box::new(Expr::new(ExprNode::Int(1), sp()))),
                    from: false,
                },
                sp(),
            )),
            sp(),
        );
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(func("gen", &[], vec![y])),
            sp(),
        ));
        let traits = scan_fn_traits(&m);
        assert!(traits["gen"].is_generator);
        assert!(!traits["gen"].is_coroutine);
    }

    #[test]
    fn test_trait_scan_does_not_cross_nested_defs() {
        let inner_yield = Stmt::new(
            StmtNode::Expr(Expr::new(
                ExprNode::Yield {
                    value: None,
                    from: false,
                },
                sp(),
            )),
            sp(),
        );
        let inner = Stmt::new(
            StmtNode::FunctionDef(func("inner", &[], vec![inner_yield])),
            sp(),
        );
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(func("outer", &[], vec![inner])),
            sp(),
        ));
        let traits = scan_fn_traits(&m);
        assert!(!traits["outer"].is_generator);
    }

    #[test]
    fn test_return_param_idx_uniform() {
        let body = vec![
            Stmt::new(
                StmtNode::If {
                    cond: Expr::new(ExprNode::Bool(true), sp()),
                    body: vec![ret(Some(name("b")))],
                    orelse: vec![],
                },
                sp(),
            ),
            ret(Some(name("b"))),
        ];
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(func("fwd", &["a", "b"], body)),
            sp(),
        ));
        let map = scan_return_param(&m);
        assert_eq!(map.get("fwd"), Some(&1));
    }

    #[test]
    fn test_return_param_idx_mixed_returns_excluded() {
        let body = vec![
            ret(Some(name("a"))),
            ret(Some(Expr::new(ExprNode::Int(0), sp()))),
        ];
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(func("f", &["a"], body)),
            sp(),
        ));
        assert!(scan_return_param(&m).is_empty());
    }
}
