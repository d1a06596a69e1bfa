//! SSA scaffolding: basic-block CFG over structured statement lists, phi
//! placeholders at joins, and an iterative dominator computation.
//!
//! The scaffold is ephemeral: blocks hold indices into a statement table
//! borrowed from the AST, the AST itself is never mutated, and the whole
//! structure is consumed by a single analysis pass.

use crate::ast::{Stmt, StmtNode};
use crate::sema::stmt::collect_assigned_names;
use std::collections::HashSet;

/// Phi placeholder: `var` has one incoming definition per predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsaPhi {
    pub var: String,
    pub incomings: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct SsaBlock {
    pub id: usize,
    /// Indices into [`SsaFunction::stmts`].
    pub stmts: Vec<usize>,
    pub succ: Vec<usize>,
    pub pred: Vec<usize>,
    /// Simple names assigned by this block's statements.
    pub defs: HashSet<String>,
    pub phis: Vec<SsaPhi>,
}

#[derive(Debug)]
pub struct SsaFunction<'a> {
    pub stmts: Vec<&'a Stmt>,
    pub blocks: Vec<SsaBlock>,
    pub entry: usize,
}

impl<'a> SsaFunction<'a> {
    pub fn block(&self, id: usize) -> &SsaBlock {
        &self.blocks[id]
    }

    /// The statement owned by `block`'s slot `i`.
    pub fn stmt_of(&self, block: usize, i: usize) -> &'a Stmt {
        self.stmts[self.blocks[block].stmts[i]]
    }
}

/// Dominator tree: `idom[n]` is the immediate dominator of block `n`, or
/// `-1` for the entry and unreachable blocks.
#[derive(Debug)]
pub struct DomTree {
    pub idom: Vec<isize>,
    pub children: Vec<Vec<usize>>,
}

pub struct SsaBuilder;

impl SsaBuilder {
    /// Build the block CFG for one function body and place phis at joins.
    pub fn build<'a>(body: &'a [Stmt]) -> SsaFunction<'a> {
        let mut b = BuildState {
            f: SsaFunction {
                stmts: Vec::new(),
                blocks: Vec::new(),
                entry: 0,
            },
        };
        let entry = b.new_block();
        b.f.entry = entry;
        b.build_body(body, entry);
        place_phis(&mut b.f);
        b.f
    }

    /// Iterative data-flow dominators over the scaffold CFG.
    pub fn compute_dominators(f: &SsaFunction<'_>) -> DomTree {
        let n = f.blocks.len();
        let all: HashSet<usize> = (0..n).collect();
        let mut dom: Vec<HashSet<usize>> = vec![all; n];
        dom[f.entry] = HashSet::from([f.entry]);

        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if i == f.entry {
                    continue;
                }
                let preds = &f.blocks[i].pred;
                let mut new_dom: Option<HashSet<usize>> = None;
                for &p in preds {
                    new_dom = Some(match new_dom {
                        None => dom[p].clone(),
                        Some(acc) => acc.intersection(&dom[p]).copied().collect(),
                    });
                }
                let mut new_dom = new_dom.unwrap_or_default();
                new_dom.insert(i);
                if new_dom != dom[i] {
                    dom[i] = new_dom;
                    changed = true;
                }
            }
        }

        // idom[n]: the strict dominator that every other strict dominator
        // dominates.
        let mut idom: Vec<isize> = vec![-1; n];
        for i in 0..n {
            if i == f.entry {
                continue;
            }
            if f.blocks[i].pred.is_empty() {
                continue; // unreachable
            }
            let strict: Vec<usize> = dom[i].iter().copied().filter(|&d| d != i).collect();
            for &cand in &strict {
                if strict.iter().all(|&other| dom[cand].contains(&other)) {
                    idom[i] = cand as isize;
                    break;
                }
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, &d) in idom.iter().enumerate() {
            if d >= 0 {
                children[d as usize].push(i);
            }
        }
        DomTree { idom, children }
    }
}

struct BuildState<'a> {
    f: SsaFunction<'a>,
}

impl<'a> BuildState<'a> {
    fn new_block(&mut self) -> usize {
        let id = self.f.blocks.len();
        self.f.blocks.push(SsaBlock {
            id,
            ..SsaBlock::default()
        });
        id
    }

    fn connect(&mut self, from: usize, to: usize) {
        self.f.blocks[from].succ.push(to);
        self.f.blocks[to].pred.push(from);
    }

    fn place(&mut self, block: usize, stmt: &'a Stmt) {
        let idx = self.f.stmts.len();
        self.f.stmts.push(stmt);
        self.f.blocks[block].stmts.push(idx);
        let mut defs = HashSet::new();
        collect_assigned_names(std::slice::from_ref(stmt), &mut defs);
        // Only this statement's own targets count, not nested bodies', for
        // compound headers; the bodies' blocks record their own defs.
        match &stmt.node {
            StmtNode::If { .. }
            | StmtNode::While { .. }
            | StmtNode::Try { .. }
            | StmtNode::Match { .. }
            | StmtNode::With { .. } => {}
            StmtNode::For { target, .. } => {
                let mut ds = HashSet::new();
                collect_assigned_names(
                    std::slice::from_ref(&Stmt::new(
                        StmtNode::Assign {
                            targets: vec![target.clone()],
                            value: target.clone(),
                        },
                        stmt.span.clone(),
                    )),
                    &mut ds,
                );
                self.f.blocks[block].defs.extend(ds);
            }
            _ => {
                self.f.blocks[block].defs.extend(defs);
            }
        }
    }

    /// Build blocks for `body`, chaining from `cur`. Returns the fall-through
    /// exit block, or None when every path terminated (return/raise).
    fn build_body(&mut self, body: &'a [Stmt], mut cur: usize) -> Option<usize> {
        for s in body {
            match &s.node {
                StmtNode::If { body, orelse, .. } => {
                    // Condition block owns the if statement.
                    let cond = self.new_block();
                    self.place(cond, s);
                    self.connect(cur, cond);

                    let then_entry = self.new_block();
                    self.connect(cond, then_entry);
                    let then_exit = self.build_body(body, then_entry);

                    let join = self.new_block();
                    if orelse.is_empty() {
                        self.connect(cond, join);
                    } else {
                        let else_entry = self.new_block();
                        self.connect(cond, else_entry);
                        if let Some(e) = self.build_body(orelse, else_entry) {
                            self.connect(e, join);
                        }
                    }
                    if let Some(t) = then_exit {
                        self.connect(t, join);
                    }
                    cur = join;
                }
                StmtNode::While { body, orelse, .. } | StmtNode::For { body, orelse, .. } => {
                    // Header owns the loop statement; body loops back.
                    let header = self.new_block();
                    self.place(header, s);
                    self.connect(cur, header);

                    let body_entry = self.new_block();
                    self.connect(header, body_entry);
                    if let Some(exit) = self.build_body(body, body_entry) {
                        self.connect(exit, header); // back-edge
                    }

                    let follow = self.new_block();
                    self.connect(header, follow);
                    cur = match self.build_body(orelse, follow) {
                        Some(b) => b,
                        None => return None,
                    };
                }
                StmtNode::Return(_) | StmtNode::Raise { .. } => {
                    let b = self.new_block();
                    self.place(b, s);
                    self.connect(cur, b);
                    // No successors; the rest of this body is unreachable.
                    return None;
                }
                _ => {
                    // Simple statements (try is a single-block placeholder in
                    // this scaffold; exception edges are modeled in codegen).
                    let b = self.new_block();
                    self.place(b, s);
                    self.connect(cur, b);
                    cur = b;
                }
            }
        }
        Some(cur)
    }
}

/// At each join (>= 2 predecessors), place a phi placeholder for every
/// variable defined by two or more of its predecessors.
fn place_phis(f: &mut SsaFunction<'_>) {
    let n = f.blocks.len();
    for i in 0..n {
        if f.blocks[i].pred.len() < 2 {
            continue;
        }
        let preds = f.blocks[i].pred.clone();
        let mut vars: Vec<String> = Vec::new();
        {
            let mut seen: HashSet<&String> = HashSet::new();
            for &p in &preds {
                for v in &f.blocks[p].defs {
                    if !seen.insert(v) && !vars.contains(v) {
                        vars.push(v.clone());
                    }
                }
            }
        }
        for var in vars {
            let defined_in = preds
                .iter()
                .filter(|&&p| f.blocks[p].defs.contains(&var))
                .count();
            if defined_in >= 2 {
                f.blocks[i].phis.push(SsaPhi {
                    var,
                    incomings: preds.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprCtx, ExprNode, Span};

    fn sp() -> Span {
        Span::new("<test>", 1, 1)
    }

    fn name_store(id: &str) -> Expr {
        Expr::new(
            ExprNode::Name {
                id: id.to_string(),
                ctx: ExprCtx::Store,
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
                targets: vec![name_store(target)],
                value,
            },
            sp(),
        )
    }

    fn diamond(var: &str) -> Stmt {
        Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![assign(var, int(1))],
                orelse: vec![assign(var, int(2))],
            },
            sp(),
        )
    }

    fn reachable_join_ids(f: &SsaFunction<'_>) -> Vec<usize> {
        f.blocks
            .iter()
            .filter(|b| b.pred.len() >= 2)
            .map(|b| b.id)
            .collect()
    }

    #[test]
    fn test_entry_has_no_predecessors() {
        let body = vec![assign("x", int(1)), assign("y", int(2))];
        let f = SsaBuilder::build(&body);
        assert!(f.blocks[f.entry].pred.is_empty());
        for b in &f.blocks {
            if b.id != f.entry {
                assert!(!b.pred.is_empty(), "block {} unreachable", b.id);
            }
        }
    }

    #[test]
    fn test_if_join_has_two_predecessors_and_phi() {
        let body = vec![diamond("x")];
        let f = SsaBuilder::build(&body);
        let joins = reachable_join_ids(&f);
        assert_eq!(joins.len(), 1);
        let join = &f.blocks[joins[0]];
        assert_eq!(join.pred.len(), 2);
        assert_eq!(join.phis.len(), 1);
        assert_eq!(join.phis[0].var, "x");
        assert_eq!(join.phis[0].incomings, join.pred);
    }

    #[test]
    fn test_while_header_has_back_edge() {
        let body = vec![Stmt::new(
            StmtNode::While {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![assign("x", int(1))],
                orelse: vec![],
            },
            sp(),
        )];
        let f = SsaBuilder::build(&body);
        // The header owns the while statement; at least one of its preds must
        // appear later in block order (the back-edge source).
        let header = f
            .blocks
            .iter()
            .find(|b| !b.stmts.is_empty() && matches!(f.stmts[b.stmts[0]].node, StmtNode::While { .. }))
            .expect("header exists");
        assert!(
            header.pred.iter().any(|&p| p > header.id),
            "loop header must have a back-edge"
        );
        assert_eq!(header.succ.len(), 2); // body entry and follow
    }

    #[test]
    fn test_return_block_has_no_successors() {
        let body = vec![Stmt::new(StmtNode::Return(Some(int(0))), sp())];
        let f = SsaBuilder::build(&body);
        let ret = f.blocks.last().unwrap();
        assert!(ret.succ.is_empty());
    }

    #[test]
    fn test_double_diamond_phis_and_dominators() {
        // Two sequential if-else blocks both assigning x.
        let body = vec![diamond("x"), diamond("x")];
        let f = SsaBuilder::build(&body);
        let joins = reachable_join_ids(&f);
        assert_eq!(joins.len(), 2);
        let second = joins[1];
        assert!(
            f.blocks[second].phis.iter().any(|p| p.var == "x"),
            "second join needs a phi for x"
        );

        let dt = SsaBuilder::compute_dominators(&f);
        assert_eq!(dt.idom[f.entry], -1);
        // Both merge blocks are dominated by entry: walking idoms from each
        // join reaches the entry.
        for &j in &joins {
            let mut cur = j as isize;
            let mut hit_entry = false;
            while cur >= 0 {
                if cur as usize == f.entry {
                    hit_entry = true;
                    break;
                }
                cur = dt.idom[cur as usize];
            }
            assert!(hit_entry);
        }
        // Neither merge block dominates the other: the first join dominates
        // the second (flow passes through it), but not vice versa.
        let first = joins[0];
        let mut cur = dt.idom[first];
        while cur >= 0 {
            assert_ne!(cur as usize, second, "second join must not dominate the first");
            cur = dt.idom[cur as usize];
        }
    }

    #[test]
    fn test_idom_parent_dominates_child() {
        let body = vec![
            assign("a", int(1)),
            diamond("x"),
            Stmt::new(
                StmtNode::While {
                    cond: Expr::new(ExprNode::Bool(true), sp()),
                    body: vec![assign("x", int(3))],
                    orelse: vec![],
                },
                sp(),
            ),
            assign("z", int(4)),
        ];
        let f = SsaBuilder::build(&body);
        let dt = SsaBuilder::compute_dominators(&f);
        // Every reachable non-entry block's idom chain terminates at entry.
        for b in &f.blocks {
            if b.id == f.entry || b.pred.is_empty() {
                continue;
            }
            let mut cur = dt.idom[b.id];
            let mut steps = 0;
            while cur >= 0 && cur as usize != f.entry {
                cur = dt.idom[cur as usize];
                steps += 1;
                assert!(steps <= f.blocks.len(), "idom chain cycles");
            }
            assert_eq!(cur as usize, f.entry);
        }
        // Dominator-tree children agree with idom.
        for (parent, kids) in dt.children.iter().enumerate() {
            for &k in kids {
                assert_eq!(dt.idom[k], parent as isize);
            }
        }
    }
}
