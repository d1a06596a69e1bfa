//! Common-subexpression elimination.
//!
//! Two rewrites, both keyed by canonical keys stamped during sema:
//! - a pure expression-statement whose key duplicates an earlier one in the
//!   same body is removed
//! - within a single statement, a pure subexpression with complexity >= 2
//!   repeated >= 2 times is extracted into a fresh `_cseN` temp and later
//!   occurrences rewritten to the temp

use crate::ast::{Expr, ExprCtx, ExprNode, Module, Span, Stmt, StmtNode};
use crate::opt::purity::{expr_complexity, is_pure_expr};
use crate::opt::{rewrite_bodies, Pass};
use std::collections::{HashMap, HashSet};

const MIN_COMPLEXITY: usize = 2;
const MIN_FREQUENCY: usize = 2;

pub struct Cse;

impl Pass for Cse {
    fn name(&self) -> &'static str {
        "CSE"
    }

    fn run(&self, module: &mut Module) -> usize {
        // Temp numbering continues past any `_cseN` already present so a
        // rerun cannot collide with earlier extractions.
        let mut counter = next_temp_index(module);
        rewrite_bodies(module, &mut |body| {
            let mut changes = 0;
            let mut seen: HashSet<String> = HashSet::new();
            let mut out: Vec<Stmt> = Vec::with_capacity(body.len());
            for mut s in body.drain(..) {
                if let StmtNode::Expr(e) = &s.node
                    && is_pure_expr(e)
                    && let Some(k) = &e.ckey
                {
                    if seen.contains(k) {
                        changes += 1;
                        continue; // redundant pure expression-statement
                    }
                    seen.insert(k.clone());
                }
                if let Some((key, template)) = extraction_candidate(&s) {
                    let temp = format!("_cse{}", counter);
                    counter += 1;
                    replace_in_stmt(&mut s, &key, &temp);
                    out.push(Stmt::new(
                        StmtNode::Assign {
                            targets: vec![Expr::new(
                                ExprNode::Name {
                                    id: temp,
                                    ctx: ExprCtx::Store,
                                },
                                Span::synthetic(),
                            )],
                            value: template,
                        },
                        s.span.clone(),
                    ));
                    changes += 1;
                }
                out.push(s);
            }
            *body = out;
            changes
        })
    }
}

fn next_temp_index(module: &Module) -> usize {
    let mut max = 0;
    let mut assigned = HashSet::new();
    crate::sema::stmt::collect_assigned_names(&module.body, &mut assigned);
    for f in module.functions() {
        crate::sema::stmt::collect_assigned_names(&f.body, &mut assigned);
    }
    for name in assigned {
        if let Some(rest) = name.strip_prefix("_cse")
            && let Ok(n) = rest.parse::<usize>()
        {
            max = max.max(n + 1);
        }
    }
    max
}

/// Best repeated pure subexpression in one statement: highest complexity
/// among keys with frequency >= 2 and complexity >= 2. Returns the key and
/// a clone of one occurrence.
fn extraction_candidate(s: &Stmt) -> Option<(String, Expr)> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new(); // key -> (freq, complexity)
    let mut templates: HashMap<String, Expr> = HashMap::new();
    let mut scan = |e: &Expr| {
        crate::ast::walk_expr(e, &mut |x| {
            if !is_pure_expr(x) {
                return;
            }
            let Some(k) = &x.ckey else { return };
            let c = expr_complexity(x);
            if c < MIN_COMPLEXITY {
                return;
            }
            let entry = counts.entry(k.clone()).or_insert((0, c));
            entry.0 += 1;
            templates.entry(k.clone()).or_insert_with(|| x.clone());
        });
    };
    crate::ast::stmt_exprs(s, &mut scan);

    counts
        .into_iter()
        .filter(|(_, (freq, _))| *freq >= MIN_FREQUENCY)
        .max_by_key(|(_, (_, complexity))| *complexity)
        .map(|(k, _)| {
            let template = templates.remove(&k).expect("template recorded");
            (k, template)
        })
}

fn replace_in_stmt(s: &mut Stmt, key: &str, temp: &str) {
    match &mut s.node {
        StmtNode::Expr(e) => {
            replace_by_key(e, key, temp);
        }
        StmtNode::Assign { targets, value } => {
            replace_by_key(value, key, temp);
            for t in targets {
                if let ExprNode::Subscript { value, index, .. } = &mut t.node {
                    replace_by_key(value, key, temp);
                    replace_by_key(index, key, temp);
                }
            }
        }
        StmtNode::AugAssign { value, .. } => {
            replace_by_key(value, key, temp);
        }
        StmtNode::Return(Some(v)) => {
            replace_by_key(v, key, temp);
        }
        StmtNode::If { cond, .. } | StmtNode::While { cond, .. } => {
            replace_by_key(cond, key, temp);
        }
        StmtNode::Assert { test, msg } => {
            replace_by_key(test, key, temp);
            if let Some(m) = msg {
                replace_by_key(m, key, temp);
            }
        }
        _ => {}
    }
}

/// Replace every subexpression whose canonical key equals `key` with a read
/// of `temp`. Ancestors of a replacement lose their stale keys.
fn replace_by_key(e: &mut Expr, key: &str, temp: &str) -> bool {
    if e.ckey.as_deref() == Some(key) {
        let span = e.span.clone();
        *e = Expr::new(
            ExprNode::Name {
                id: temp.to_string(),
                ctx: ExprCtx::Load,
            },
            span,
        );
        return true;
    }
    let mut replaced = false;
    match &mut e.node {
        ExprNode::Unary { operand, .. } => replaced |= replace_by_key(operand, key, temp),
        ExprNode::Binary { lhs, rhs, .. } => {
            replaced |= replace_by_key(lhs, key, temp);
            replaced |= replace_by_key(rhs, key, temp);
        }
        ExprNode::Compare {
            left, comparators, ..
        } => {
            replaced |= replace_by_key(left, key, temp);
            for c in comparators {
                replaced |= replace_by_key(c, key, temp);
            }
        }
        ExprNode::Tuple(els) | ExprNode::List(els) | ExprNode::Set(els) => {
            for el in els {
                replaced |= replace_by_key(el, key, temp);
            }
        }
        ExprNode::Subscript { value, index, .. } => {
            replaced |= replace_by_key(value, key, temp);
            replaced |= replace_by_key(index, key, temp);
        }
        ExprNode::Attribute { value, .. } => replaced |= replace_by_key(value, key, temp),
        ExprNode::Call { args, keywords, .. } => {
            for a in args {
                replaced |= replace_by_key(a, key, temp);
            }
            for k in keywords {
                replaced |= replace_by_key(&mut k.value, key, temp);
            }
        }
        ExprNode::IfExpr { cond, then, orelse } => {
            replaced |= replace_by_key(cond, key, temp);
            replaced |= replace_by_key(then, key, temp);
            replaced |= replace_by_key(orelse, key, temp);
        }
        _ => {}
    }
    if replaced {
        e.ckey = None; // shape changed underneath
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

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

    fn add(a: Expr, b: Expr) -> Expr {
        Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(a),
                rhs: Box::new(b),
            },
            sp(),
        )
    }

    fn analyzed(mut m: Module) -> Module {
        // CSE keys come from sema.
        let _ = crate::sema::analyze_module(&mut m);
        m
    }

    #[test]
    fn test_repeated_subexpression_extracted() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "x".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: Expr::new(ExprNode::Int(2), sp()),
            },
            sp(),
        ));
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "y".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                // (x*2 + 1) + (x*2 + 1)
                value: add(
                    add(
                        mul(name("x"), Expr::new(ExprNode::Int(2), sp())),
                        Expr::new(ExprNode::Int(1), sp()),
                    ),
                    add(
                        mul(name("x"), Expr::new(ExprNode::Int(2), sp())),
                        Expr::new(ExprNode::Int(1), sp()),
                    ),
                ),
            },
            sp(),
        ));
        let mut m = analyzed(m);
        let n = Cse.run(&mut m);
        assert_eq!(n, 1);
        assert_eq!(m.body.len(), 3);
        // A _cse0 assignment precedes the rewritten statement.
        let StmtNode::Assign { targets, .. } = &m.body[1].node else {
            panic!("expected temp assignment");
        };
        assert_eq!(targets[0].as_name(), Some("_cse0"));
        if let StmtNode::Assign { value, .. } = &m.body[2].node
            && let ExprNode::Binary { lhs, rhs, .. } = &value.node
        {
            assert_eq!(lhs.as_name(), Some("_cse0"));
            assert_eq!(rhs.as_name(), Some("_cse0"));
        } else {
            panic!("expected rewritten addition");
        }
        // Idempotent.
        assert_eq!(Cse.run(&mut m), 0);
    }

    #[test]
    fn test_duplicate_pure_statement_removed() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "a".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: Expr::new(ExprNode::Int(1), sp()),
            },
            sp(),
        ));
        m.body.push(Stmt::new(
            StmtNode::Expr(add(name("a"), name("a"))),
            sp(),
        ));
        m.body.push(Stmt::new(
            StmtNode::Expr(add(name("a"), name("a"))),
            sp(),
        ));
        let mut m = analyzed(m);
        let before = m.body.len();
        let n = Cse.run(&mut m);
        assert!(n >= 1);
        assert!(m.body.len() < before);
        assert_eq!(Cse.run(&mut m), 0);
    }

    #[test]
    fn test_low_complexity_not_extracted() {
        let mut m = Module::new("m", "m.py");
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "a".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: Expr::new(ExprNode::Int(3), sp()),
            },
            sp(),
        ));
        // a + a: each operand is complexity 0; whole expr appears once.
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "b".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: add(name("a"), name("a")),
            },
            sp(),
        ));
        let mut m = analyzed(m);
        assert_eq!(Cse.run(&mut m), 0);
    }
}
