//! Statement checking under a mutable type environment.

use crate::ast::{
    ClassDef, Expr, ExprCtx, ExprNode, FunctionDef, Pattern, Span, Stmt, StmtNode, TypeKind,
};
use crate::diag::Diagnostics;
use crate::sema::expr::ExprTyper;
use crate::sema::refine::refine_condition;
use crate::sema::types::{TypeEnv, TypeMask};
use crate::sema::SemaContext;
use std::collections::HashSet;

/// Checks one function body (or the module top level) statement by
/// statement, threading a [`TypeEnv`] through branches and joins.
pub struct StmtChecker<'a> {
    pub ctx: &'a SemaContext,
    pub diags: &'a mut Diagnostics,
    pub env: TypeEnv,
    /// Names assigned anywhere in the scope, collected up front so reads of
    /// not-yet-bound locals do not diagnose as unknown names.
    pub locals_assigned: HashSet<String>,
    /// Declared return union; empty for unannotated functions.
    pub return_mask: TypeMask,
    /// Names declared `global`/`nonlocal` in this scope.
    globals: HashSet<String>,
}

impl<'a> StmtChecker<'a> {
    pub fn new(ctx: &'a SemaContext, diags: &'a mut Diagnostics, env: TypeEnv) -> Self {
        StmtChecker {
            ctx,
            diags,
            env,
            locals_assigned: HashSet::new(),
            return_mask: TypeMask::EMPTY,
            globals: HashSet::new(),
        }
    }

    pub fn collect_assigned(&mut self, body: &[Stmt]) {
        collect_assigned_names(body, &mut self.locals_assigned);
    }

    fn type_expr(&mut self, e: &mut Expr) -> crate::sema::expr::Typed {
        ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned).type_expr(e)
    }

    pub fn check_body(&mut self, body: &mut [Stmt]) {
        for s in body {
            self.check_stmt(s);
        }
    }

    pub fn check_stmt(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        match &mut s.node {
            StmtNode::Expr(e) => {
                self.type_expr_owned(e);
            }
            StmtNode::Assign { .. } => self.check_assign(s),
            StmtNode::AugAssign { .. } => self.check_aug_assign(s),
            StmtNode::Return(_) => self.check_return(s),
            StmtNode::If { .. } => self.check_if(s),
            StmtNode::While { .. } => self.check_while(s),
            StmtNode::For { .. } => self.check_for(s),
            StmtNode::Break | StmtNode::Continue | StmtNode::Pass => {}
            StmtNode::Try { .. } => self.check_try(s),
            StmtNode::With { items, body } => {
                let mut binds = Vec::new();
                for item in items.iter_mut() {
                    self.type_expr_owned(&mut item.context);
                    if let Some(b) = &item.bind {
                        binds.push(b.clone());
                    }
                }
                for b in binds {
                    // Context-manager enter type is opaque in the general case.
                    self.env.define(&b, TypeKind::Opaque, span.clone());
                }
                self.check_body(body.as_mut_slice());
            }
            StmtNode::Raise { exc, cause } => {
                if let Some(e) = exc {
                    self.type_expr_owned(e);
                }
                if let Some(c) = cause {
                    self.type_expr_owned(c);
                }
            }
            StmtNode::Global(names) | StmtNode::Nonlocal(names) => {
                for n in names.clone() {
                    self.globals.insert(n.clone());
                    if self.env.lookup(&n).is_none() {
                        self.env.define(&n, TypeKind::Opaque, span.clone());
                    }
                }
            }
            StmtNode::Assert { test, msg } => {
                self.type_expr_owned(test);
                if let Some(m) = msg {
                    self.type_expr_owned(m);
                }
            }
            StmtNode::Del(targets) => {
                let mut dropped = Vec::new();
                for t in targets.iter_mut() {
                    self.type_expr_owned(t);
                    if let Some(n) = t.as_name() {
                        dropped.push(n.to_string());
                    }
                }
                for n in dropped {
                    self.env.remove(&n);
                }
            }
            StmtNode::Import(aliases) => {
                // Module bindings are opaque; the surface table types
                // module.attr uses.
                let _ = aliases;
            }
            StmtNode::ImportFrom { names, .. } => {
                for a in names.clone() {
                    let bound = a.asname.unwrap_or(a.name);
                    self.env.define(&bound, TypeKind::Opaque, span.clone());
                }
            }
            StmtNode::ClassDef(c) => self.check_class_body(c),
            StmtNode::FunctionDef(f) => {
                check_function(self.ctx, self.diags, f, &self.env);
            }
            StmtNode::Match { .. } => self.check_match(s),
        }
    }

    fn type_expr_owned(&mut self, e: &mut Expr) {
        self.type_expr(e);
        // Named expressions bind as a side effect of evaluation.
        if let ExprNode::NamedExpr { target, value } = &e.node {
            let mask = value
                .inferred
                .map(TypeMask::of)
                .unwrap_or(TypeMask::of(TypeKind::Opaque));
            self.env.union_set(target, mask, e.span.clone());
        }
    }

    fn check_assign(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::Assign { targets, value } = &mut s.node else {
            unreachable!();
        };
        let vt = ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned)
            .type_expr(value);
        let value_snapshot = value.clone();
        let targets_len = targets.len();
        for i in 0..targets_len {
            let target = &mut targets[i];
            self.bind_target(target, vt.mask, &value_snapshot, &span);
        }
    }

    /// Bind one assignment target (name, attribute, subscript, or
    /// destructuring tuple/list) to the value's union.
    fn bind_target(&mut self, target: &mut Expr, mask: TypeMask, value: &Expr, span: &Span) {
        match &mut target.node {
            ExprNode::Name { id, .. } => {
                let id = id.clone();
                target.inferred = Some(mask.dominant_kind());
                self.env.union_set(&id, mask, span.clone());
                self.record_aggregate_detail(&id, value);
            }
            ExprNode::Attribute { .. } => self.check_attr_store(target, mask, span),
            ExprNode::Subscript { .. } => self.check_subscript_store(target, mask, span),
            ExprNode::Tuple(els) | ExprNode::List(els) => {
                // Destructuring distributes element masks positionally.
                let elem_masks: Vec<TypeMask> = match &value.node {
                    ExprNode::Tuple(vals) | ExprNode::List(vals) => vals
                        .iter()
                        .map(|v| {
                            v.inferred
                                .map(TypeMask::of)
                                .unwrap_or(TypeMask::of(TypeKind::Opaque))
                        })
                        .collect(),
                    _ => {
                        if let Some(name) = value.as_name()
                            && let Some(elems) = self.env.tuple_elems.get(name)
                        {
                            elems.clone()
                        } else {
                            vec![TypeMask::of(TypeKind::Opaque); els.len()]
                        }
                    }
                };
                if elem_masks.len() != els.len() {
                    self.diags.error(
                        span,
                        format!(
                            "cannot unpack {} values into {} targets",
                            elem_masks.len(),
                            els.len()
                        ),
                    );
                    return;
                }
                let mut els_taken = std::mem::take(els);
                for (el, m) in els_taken.iter_mut().zip(elem_masks) {
                    let placeholder = Expr::new(ExprNode::NoneLit, span.clone());
                    self.bind_target(el, m, &placeholder, span);
                }
                if let (ExprNode::Tuple(slot) | ExprNode::List(slot)) = &mut target.node {
                    *slot = els_taken;
                }
            }
            _ => {
                self.diags
                    .error(span, "invalid assignment target".to_string());
            }
        }
    }

    /// Track element/value/class detail for aggregate bindings.
    fn record_aggregate_detail(&mut self, name: &str, value: &Expr) {
        match &value.node {
            ExprNode::List(els) => {
                let mut mask = TypeMask::EMPTY;
                for el in els {
                    if let Some(k) = el.inferred {
                        mask = mask.union(TypeMask::of(k));
                    }
                }
                if !mask.is_empty() {
                    let prev = self
                        .env
                        .list_elems
                        .get(name)
                        .copied()
                        .unwrap_or(TypeMask::EMPTY);
                    self.env.list_elems.insert(name.to_string(), prev.union(mask));
                }
            }
            ExprNode::Tuple(els) => {
                let elems: Vec<TypeMask> = els
                    .iter()
                    .map(|el| {
                        el.inferred
                            .map(TypeMask::of)
                            .unwrap_or(TypeMask::of(TypeKind::Opaque))
                    })
                    .collect();
                self.env.tuple_elems.insert(name.to_string(), elems);
            }
            ExprNode::Dict(entries) => {
                let mut mask = TypeMask::EMPTY;
                for entry in entries {
                    if let crate::ast::DictEntry::KeyValue { value, .. } = entry
                        && let Some(k) = value.inferred
                    {
                        mask = mask.union(TypeMask::of(k));
                    }
                }
                if !mask.is_empty() {
                    self.env.dict_values.insert(name.to_string(), mask);
                }
            }
            ExprNode::Call { func, .. } => {
                if let Some(cname) = func.as_name()
                    && self.ctx.classes.contains_key(cname)
                {
                    self.env.class_of.insert(name.to_string(), cname.to_string());
                }
            }
            ExprNode::Name { id, .. } => {
                if let Some(cname) = self.env.class_of.get(id).cloned() {
                    self.env.class_of.insert(name.to_string(), cname);
                }
                if let Some(elem) = self.env.list_elems.get(id).copied() {
                    self.env.list_elems.insert(name.to_string(), elem);
                }
                if let Some(elems) = self.env.tuple_elems.get(id).cloned() {
                    self.env.tuple_elems.insert(name.to_string(), elems);
                }
            }
            _ => {}
        }
    }

    fn check_attr_store(&mut self, target: &mut Expr, mask: TypeMask, span: &Span) {
        let ExprNode::Attribute { value, attr, .. } = &mut target.node else {
            unreachable!();
        };
        let attr = attr.clone();
        if let Some(base) = value.as_name()
            && let Some(class_name) = self.env.class_of.get(base).cloned()
            && let Some(info) = self.ctx.classes.get(&class_name)
            && let Some(declared) = info.attribute_kinds.get(&attr)
            && !mask.contains(TypeKind::Opaque)
            && !mask.is_subset_of(*declared)
        {
            self.diags.error(
                span,
                format!(
                    "attribute '{}.{}' holds {}, cannot store {}",
                    class_name,
                    attr,
                    declared.describe(),
                    mask.describe()
                ),
            );
        }
    }

    fn check_subscript_store(&mut self, target: &mut Expr, mask: TypeMask, span: &Span) {
        let ExprNode::Subscript { value, index, .. } = &mut target.node else {
            unreachable!();
        };
        self.type_expr_pair(value, index);
        if let Some(base) = value.as_name()
            && let Some(elem) = self.env.list_elems.get(base).copied()
            && !mask.contains(TypeKind::Opaque)
            && !mask.is_subset_of(elem)
        {
            self.diags.error(
                span,
                format!(
                    "list '{}' holds {}, cannot store {}",
                    base,
                    elem.describe(),
                    mask.describe()
                ),
            );
        }
    }

    fn type_expr_pair(&mut self, a: &mut Expr, b: &mut Expr) {
        let mut typer =
            ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned);
        typer.type_expr(a);
        typer.type_expr(b);
    }

    fn check_aug_assign(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::AugAssign { target, op, value } = &mut s.node else {
            unreachable!();
        };
        // Read + binop + write: surface errors through the binop rule.
        let mut synthetic = Expr::new(
            ExprNode::Binary {
                op: *op,
                lhs: Box::new(target.clone()),
                rhs: Box::new(value.clone()),
            },
            span.clone(),
        );
        let t = self.type_expr(&mut synthetic);
        self.type_expr(value);
        if t.ok
            && let Some(name) = target.as_name()
        {
            let name = name.to_string();
            self.env.union_set(&name, t.mask, span);
            target.inferred = Some(t.kind);
        }
    }

    fn check_return(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::Return(value) = &mut s.node else {
            unreachable!();
        };
        let mask = match value {
            Some(v) => {
                let t = ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned)
                    .type_expr(v);
                if !t.ok {
                    return;
                }
                t.mask
            }
            None => TypeMask::of(TypeKind::NoneType),
        };
        if self.return_mask.is_empty() {
            return; // unannotated function
        }
        // None returns are always legal for None-returning functions.
        if mask == TypeMask::of(TypeKind::NoneType)
            && self.return_mask.contains(TypeKind::NoneType)
        {
            return;
        }
        if !mask.contains(TypeKind::Opaque) && !mask.is_subset_of(self.return_mask) {
            self.diags.error(
                &span,
                format!(
                    "return type mismatch: declared {}, got {}",
                    self.return_mask.describe(),
                    mask.describe()
                ),
            );
        }
    }

    fn check_if(&mut self, s: &mut Stmt) {
        let StmtNode::If { cond, body, orelse } = &mut s.node else {
            unreachable!();
        };
        self.type_expr(cond);

        // Branch-copied environments, refined by the condition.
        let mut then_env = self.env.clone();
        let mut else_env = self.env.clone();
        refine_condition(cond, &mut then_env, &mut else_env);

        let saved = std::mem::replace(&mut self.env, then_env);
        self.check_body(body.as_mut_slice());
        let then_out = std::mem::replace(&mut self.env, else_env);
        self.check_body(orelse.as_mut_slice());
        let else_out = std::mem::replace(&mut self.env, saved);

        // A branch that cannot fall through contributes nothing to the join.
        let merged = match (body_terminates(body), body_terminates(orelse)) {
            (true, false) => else_out,
            (false, true) => then_out,
            _ => TypeEnv::intersect_from(&then_out, &else_out),
        };
        self.env.apply_merged(merged);
    }

    fn check_while(&mut self, s: &mut Stmt) {
        let StmtNode::While { cond, body, orelse } = &mut s.node else {
            unreachable!();
        };
        self.type_expr(cond);
        let before = self.env.clone();
        self.check_body(body.as_mut_slice());
        // The loop may run zero times: join the post-body environment with
        // the pre-loop one so zero-iteration paths stay sound.
        let after_body = std::mem::replace(&mut self.env, before);
        for name in after_body.names() {
            if let Some(b) = after_body.lookup(name) {
                self.env.union_set(name, b.mask, b.provenance.clone());
            }
        }
        // The else body runs only on normal exit.
        self.check_body(orelse.as_mut_slice());
    }

    fn check_for(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::For {
            target,
            iter,
            body,
            orelse,
        } = &mut s.node
        else {
            unreachable!();
        };
        let it = ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned)
            .type_expr(iter);

        // Element union of the iterable.
        let elem_mask = if let Some(name) = iter.as_name() {
            self.env
                .list_elems
                .get(name)
                .copied()
                .unwrap_or(TypeMask::of(TypeKind::Opaque))
        } else if let ExprNode::Call { func, .. } = &iter.node {
            if func.as_name() == Some("range") {
                TypeMask::of(TypeKind::Int)
            } else {
                TypeMask::of(TypeKind::Opaque)
            }
        } else if it.mask.is_subset_of(TypeMask::of(TypeKind::Str)) {
            TypeMask::of(TypeKind::Str)
        } else {
            TypeMask::of(TypeKind::Opaque)
        };

        let iter_snapshot = iter.clone();
        self.bind_target(target, elem_mask, &iter_snapshot, &span);

        let before = self.env.clone();
        self.check_body(body.as_mut_slice());
        let after_body = std::mem::replace(&mut self.env, before);
        for name in after_body.names() {
            if let Some(b) = after_body.lookup(name) {
                self.env.union_set(name, b.mask, b.provenance.clone());
            }
        }
        self.check_body(orelse.as_mut_slice());
    }

    fn check_try(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } = &mut s.node
        else {
            unreachable!();
        };
        // Body runs under a fresh copy; bindings may be partial on the
        // exception path, so they do not leak out.
        let before = self.env.clone();
        self.check_body(body.as_mut_slice());
        self.env = before;

        for h in handlers.iter_mut() {
            let mut handler_env = self.env.clone();
            if let Some(bind) = &h.bind {
                handler_env.define(bind, TypeKind::Class, span.clone());
                if let Some(tn) = &h.type_name {
                    handler_env.class_of.insert(bind.clone(), tn.clone());
                }
            }
            let saved = std::mem::replace(&mut self.env, handler_env);
            self.check_body(h.body.as_mut_slice());
            self.env = saved;
        }

        // orelse only on the non-exception path, finally unconditionally.
        self.check_body(orelse.as_mut_slice());
        self.check_body(finalbody.as_mut_slice());
    }

    fn check_match(&mut self, s: &mut Stmt) {
        let span = s.span.clone();
        let StmtNode::Match { subject, cases } = &mut s.node else {
            unreachable!();
        };
        let st = ExprTyper::new(&self.env, self.ctx, self.diags, &self.locals_assigned)
            .type_expr(subject);
        let subject_name = subject.as_name().map(str::to_string);

        for case in cases.iter_mut() {
            let mut case_env = self.env.clone();
            refine_pattern(&case.pattern, subject_name.as_deref(), st.mask, &mut case_env, &span);
            let saved = std::mem::replace(&mut self.env, case_env);
            if let Some(guard) = &mut case.guard {
                let gt = self.type_expr(guard);
                if gt.ok && !gt.mask.is_subset_of(TypeMask::of(TypeKind::Bool)) {
                    self.diags.error(
                        &guard.span.clone(),
                        format!("match guard must be bool, got {}", gt.mask.describe()),
                    );
                }
            }
            self.check_body(case.body.as_mut_slice());
            self.env = saved;
        }
    }

    fn check_class_body(&mut self, c: &mut ClassDef) {
        // Methods were collected up front; here each method body is checked
        // and decorators are typed (non-fatal).
        for s in &mut c.body {
            if let StmtNode::FunctionDef(f) = &mut s.node {
                for d in &mut f.decorators {
                    self.type_expr(d);
                }
                check_function(self.ctx, self.diags, f, &self.env);
            }
        }
    }
}

/// True when the body's last statement unconditionally leaves the scope.
fn body_terminates(body: &[Stmt]) -> bool {
    body.last().is_some_and(|s| {
        matches!(
            s.node,
            StmtNode::Return(_) | StmtNode::Raise { .. } | StmtNode::Break | StmtNode::Continue
        )
    })
}

/// Pattern refinement inside a match case body.
fn refine_pattern(
    pattern: &Pattern,
    subject: Option<&str>,
    subject_mask: TypeMask,
    env: &mut TypeEnv,
    span: &Span,
) {
    match pattern {
        Pattern::Wildcard | Pattern::Star(_) => {}
        Pattern::Capture { name, sub } => {
            env.define_set(name, subject_mask, span.clone());
            if let Some(sub) = sub {
                refine_pattern(sub, subject, subject_mask, env, span);
            }
        }
        Pattern::Literal(lit) => {
            if let Some(name) = subject {
                let kind = match &lit.node {
                    ExprNode::Int(_) => Some(TypeKind::Int),
                    ExprNode::Float(_) => Some(TypeKind::Float),
                    ExprNode::Bool(_) => Some(TypeKind::Bool),
                    ExprNode::Str(_) => Some(TypeKind::Str),
                    ExprNode::NoneLit => Some(TypeKind::NoneType),
                    _ => None,
                };
                if let Some(k) = kind {
                    env.restrict_to_kind(name, k);
                }
            }
        }
        Pattern::Or(subs) => {
            for sub in subs {
                refine_pattern(sub, subject, subject_mask, env, span);
            }
        }
        Pattern::Class { name, args } => {
            if let Some(subj) = subject {
                env.restrict_to_kind(subj, TypeKind::Class);
                env.class_of.insert(subj.to_string(), name.clone());
            }
            for a in args {
                refine_pattern(a, None, TypeMask::of(TypeKind::Opaque), env, span);
            }
        }
        Pattern::Sequence(subs) => {
            if let Some(subj) = subject {
                env.restrict_to_kind(subj, TypeKind::List);
            }
            for sub in subs {
                refine_pattern(sub, None, TypeMask::of(TypeKind::Opaque), env, span);
            }
        }
        Pattern::Mapping { patterns, .. } => {
            if let Some(subj) = subject {
                env.restrict_to_kind(subj, TypeKind::Dict);
            }
            for sub in patterns {
                refine_pattern(sub, None, TypeMask::of(TypeKind::Opaque), env, span);
            }
        }
    }
}

/// Check one function definition under `outer` (the enclosing scope's
/// environment, used for reads of outer bindings).
pub fn check_function(
    ctx: &SemaContext,
    diags: &mut Diagnostics,
    f: &mut FunctionDef,
    outer: &TypeEnv,
) {
    let mut env = outer.clone();
    // Parameters enter the environment with their declared unions.
    if let Some(sig) = ctx.signatures.get(&f.name)
        && let Some(params) = &sig.params
    {
        for p in params {
            let mask = if p.union_mask.is_empty() {
                TypeMask::of(TypeKind::Opaque)
            } else {
                p.union_mask
            };
            env.define_set(&p.name, mask, f.span.clone());
            if let Some(elem) = p.list_elem_mask {
                env.list_elems.insert(p.name.clone(), elem);
            }
        }
    } else {
        for p in &f.params {
            env.define(&p.name, TypeKind::Opaque, f.span.clone());
        }
    }

    let mut checker = StmtChecker::new(ctx, diags, env);
    checker.collect_assigned(&f.body);
    if let Some(sig) = ctx.signatures.get(&f.name) {
        checker.return_mask = sig.return_mask;
    }
    checker.check_body(&mut f.body);
}

/// Collect every simple name assigned anywhere in `body` (including nested
/// control flow, excluding nested defs and classes).
pub fn collect_assigned_names(body: &[Stmt], out: &mut HashSet<String>) {
    for s in body {
        match &s.node {
            StmtNode::Assign { targets, .. } => {
                for t in targets {
                    collect_target_names(t, out);
                }
            }
            StmtNode::AugAssign { target, .. } => collect_target_names(target, out),
            StmtNode::For { target, .. } => {
                collect_target_names(target, out);
                for b in crate::ast::child_bodies(s) {
                    collect_assigned_names(b, out);
                }
                continue;
            }
            StmtNode::FunctionDef(_) | StmtNode::ClassDef(_) => continue,
            _ => {}
        }
        for b in crate::ast::child_bodies(s) {
            collect_assigned_names(b, out);
        }
    }
}

fn collect_target_names(t: &Expr, out: &mut HashSet<String>) {
    match &t.node {
        ExprNode::Name { id, ctx } if *ctx != ExprCtx::Del => {
            out.insert(id.clone());
        }
        ExprNode::Tuple(els) | ExprNode::List(els) => {
            for el in els {
                collect_target_names(el, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CmpOp, ParamDecl};
    use crate::sema::sig::{Param, Signature};

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
                targets: vec![name_store(target)],
                value,
            },
            sp(),
        )
    }

    #[test]
    fn test_assign_widens_across_rebinding() {
        let ctx = SemaContext::default();
        let mut diags = Diagnostics::new();
        let mut checker = StmtChecker::new(&ctx, &mut diags, TypeEnv::new());
        let mut body = vec![
            assign("x", int(1)),
            assign("x", Expr::new(ExprNode::Float(2.0), sp())),
        ];
        checker.collect_assigned(&body);
        checker.check_body(&mut body);
        let mask = checker.env.lookup("x").unwrap().mask;
        assert!(mask.contains(TypeKind::Int));
        assert!(mask.contains(TypeKind::Float));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_if_branches_merge_by_intersection() {
        let ctx = SemaContext::default();
        let mut diags = Diagnostics::new();
        let mut checker = StmtChecker::new(&ctx, &mut diags, TypeEnv::new());
        // if c: y = 1 else: y = "s"  -> y: int|str after the join
        // then-only binding z must not survive.
        let mut body = vec![Stmt::new(
            StmtNode::If {
                cond: Expr::new(ExprNode::Bool(true), sp()),
                body: vec![
                    assign("y", int(1)),
                    assign("z", int(2)),
                ],
                orelse: vec![assign("y", Expr::new(ExprNode::Str("s".into()), sp()))],
            },
            sp(),
        )];
        checker.collect_assigned(&body);
        checker.check_body(&mut body);
        let y = checker.env.lookup("y").unwrap().mask;
        assert!(y.contains(TypeKind::Int));
        assert!(y.contains(TypeKind::Str));
        assert!(checker.env.lookup("z").is_none());
    }

    #[test]
    fn test_refined_then_else_masks() {
        let mut ctx = SemaContext::default();
        ctx.signatures.insert(
            "f".to_string(),
            Signature {
                return_kind: TypeKind::Int,
                return_mask: TypeMask::of(TypeKind::Int),
                param_kinds: vec![TypeKind::Int],
                params: Some(vec![{
                    let mut p = Param::positional("x", TypeKind::Int);
                    p.union_mask = TypeMask::of_all(&[TypeKind::Int, TypeKind::NoneType]);
                    p
                }]),
                return_tuple_elems: None,
            },
        );
        let mut diags = Diagnostics::new();
        // def f(x: int|None) -> int:
        //   if x is None: return 0
        //   return x + 1
        let is_none = Expr::new(
            ExprNode::Compare {
                left: Box::new(name("x")),
                ops: vec![CmpOp::Is],
                comparators: vec![Expr::new(ExprNode::NoneLit, sp())],
            },
            sp(),
        );
        let mut f = FunctionDef {
            name: "f".to_string(),
            params: vec![ParamDecl::simple("x", None)],
            body: vec![
                Stmt::new(
                    StmtNode::If {
                        cond: is_none,
                        body: vec![Stmt::new(StmtNode::Return(Some(int(0))), sp())],
                        orelse: vec![],
                    },
                    sp(),
                ),
                Stmt::new(
                    StmtNode::Return(Some(Expr::new(
                        ExprNode::Binary {
                            op: crate::ast::BinaryOp::Add,
                            lhs: Box::new(name("x")),
                            rhs: Box::new(int(1)),
                        },
                        sp(),
                    ))),
                    sp(),
                ),
            ],
            returns: None,
            decorators: vec![],
            is_async: false,
            span: sp(),
        };
        check_function(&ctx, &mut diags, &mut f, &TypeEnv::new());
        // x + 1 after the None-return is int + int: no diagnostics.
        assert!(diags.is_empty(), "diags: {:?}", diags.items());
    }

    #[test]
    fn test_return_type_mismatch() {
        let mut ctx = SemaContext::default();
        ctx.signatures.insert(
            "f".to_string(),
            Signature::simple(vec![], TypeKind::Int),
        );
        let mut diags = Diagnostics::new();
        let mut f = FunctionDef {
            name: "f".to_string(),
            params: vec![],
            body: vec![Stmt::new(
                StmtNode::Return(Some(Expr::new(ExprNode::Str("no".into()), sp()))),
                sp(),
            )],
            returns: None,
            decorators: vec![],
            is_async: false,
            span: sp(),
        };
        check_function(&ctx, &mut diags, &mut f, &TypeEnv::new());
        assert_eq!(diags.len(), 1);
        assert!(diags.items()[0].message.contains("return type mismatch"));
    }

    #[test]
    fn test_for_range_binds_int_target() {
        let ctx = SemaContext::default();
        let mut diags = Diagnostics::new();
        let mut checker = StmtChecker::new(&ctx, &mut diags, TypeEnv::new());
        let mut body = vec![Stmt::new(
            StmtNode::For {
                target: name_store("i"),
                iter: Expr::new(
                    ExprNode::Call {
                        func: Box::new(name("range")),
                        args: vec![int(3)],
                        keywords: vec![],
                    },
                    sp(),
                ),
                body: vec![assign("acc", name("i"))],
                orelse: vec![],
            },
            sp(),
        )];
        checker.collect_assigned(&body);
        checker.check_body(&mut body);
        assert!(checker
            .env
            .lookup("i")
            .unwrap()
            .mask
            .contains(TypeKind::Int));
        assert!(diags.is_empty(), "diags: {:?}", diags.items());
    }

    #[test]
    fn test_try_handler_binds_exception_name() {
        let ctx = SemaContext::default();
        let mut diags = Diagnostics::new();
        let mut checker = StmtChecker::new(&ctx, &mut diags, TypeEnv::new());
        let handler = crate::ast::ExceptHandler {
            type_name: Some("ValueError".to_string()),
            bind: Some("e".to_string()),
            body: vec![Stmt::new(StmtNode::Expr(name("e")), sp())],
            span: sp(),
        };
        let mut body = vec![Stmt::new(
            StmtNode::Try {
                body: vec![Stmt::new(StmtNode::Pass, sp())],
                handlers: vec![handler],
                orelse: vec![],
                finalbody: vec![],
            },
            sp(),
        )];
        checker.collect_assigned(&body);
        checker.check_body(&mut body);
        assert!(diags.is_empty(), "diags: {:?}", diags.items());
    }

    #[test]
    fn test_list_subscript_store_checks_element_kind() {
        let ctx = SemaContext::default();
        let mut diags = Diagnostics::new();
        let mut env = TypeEnv::new();
        env.define("xs", TypeKind::List, sp());
        env.list_elems
            .insert("xs".to_string(), TypeMask::of(TypeKind::Int));
        let mut checker = StmtChecker::new(&ctx, &mut diags, env);
        let mut body = vec![Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Subscript {
                        value: Box::new(name("xs")),
                        index: Box::new(int(0)),
                        ctx: ExprCtx::Store,
                    },
                    sp(),
                )],
                value: Expr::new(ExprNode::Str("bad".into()), sp()),
            },
            sp(),
        )];
        checker.collect_assigned(&body);
        checker.check_body(&mut body);
        assert_eq!(diags.len(), 1);
        assert!(diags.items()[0].message.contains("cannot store"));
    }
}
