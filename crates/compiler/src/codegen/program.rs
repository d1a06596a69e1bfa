//! Module and function emission: the define list, parameter and local
//! slots, and the `pycc_module_init` stub.

use crate::ast::{
    walk_expr, Expr, ExprNode, FunctionDef, Module, Stmt, StmtNode, TypeKind,
};
use crate::sema::sig::Signature;
use super::runtime::emit_runtime_decls;
use super::state::{CodeGen, PtrTag, Slot, ValueKind};
use super::stmt::tuple_struct_type;
use super::CodeGenError;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Host target triple for the module header.
pub fn get_target_triple() -> &'static str {
    if cfg!(all(target_arch = "x86_64", target_os = "linux")) {
        "x86_64-unknown-linux-gnu"
    } else if cfg!(all(target_arch = "aarch64", target_os = "linux")) {
        "aarch64-unknown-linux-gnu"
    } else if cfg!(all(target_arch = "aarch64", target_os = "macos")) {
        "arm64-apple-darwin"
    } else if cfg!(all(target_arch = "x86_64", target_os = "macos")) {
        "x86_64-apple-darwin"
    } else {
        "x86_64-unknown-linux-gnu"
    }
}

impl CodeGen<'_> {
    /// Lower a checked module to IR text.
    pub fn emit_module(&mut self, module: &Module) -> Result<String, CodeGenError> {
        self.dbg_init(&module.file);

        for s in &module.body {
            match &s.node {
                StmtNode::FunctionDef(f) => {
                    let sig = self
                        .ctx
                        .signatures
                        .get(&f.name)
                        .cloned()
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!("no signature for '{}'", f.name))
                        })?;
                    self.emit_function(f, &f.name, &sig)?;
                }
                StmtNode::ClassDef(c) => {
                    for ms in &c.body {
                        if let StmtNode::FunctionDef(m) = &ms.node {
                            let label = format!("{}.{}", c.name, m.name);
                            let sig = self.ctx.classes[&c.name].methods[&m.name].clone();
                            self.emit_function(m, &label, &sig)?;
                        }
                    }
                }
                // Module-level statements are not lowered; the init stub is
                // a fixed no-op.
                _ => {}
            }
        }

        let mut ir = String::new();
        writeln!(ir, "; ModuleID = '{}'", module.name)?;
        writeln!(ir, "source_filename = \"{}\"", module.file)?;
        writeln!(ir, "target triple = \"{}\"", get_target_triple())?;
        writeln!(ir)?;
        emit_runtime_decls(&mut ir)?;
        if !self.string_globals.is_empty() {
            ir.push_str(&self.string_globals);
            writeln!(ir)?;
        }
        ir.push_str(&self.output);
        writeln!(ir, "define i32 @pycc_module_init() {{\n  ret i32 0\n}}")?;
        writeln!(ir)?;
        self.dbg_flush(&mut ir)?;
        Ok(ir)
    }

    fn emit_function(
        &mut self,
        f: &FunctionDef,
        label: &str,
        sig: &Signature,
    ) -> Result<(), CodeGenError> {
        if let Some(traits) = self.analysis.fn_traits.get(label) {
            if traits.is_generator {
                return Err(CodeGenError::Logic(format!(
                    "'{}' is a generator; generator bodies are not lowered",
                    label
                )));
            }
            if traits.is_coroutine {
                return Err(CodeGenError::Logic(format!(
                    "'{}' is a coroutine; coroutine bodies are not lowered",
                    label
                )));
            }
        }

        // Per-function counters and tables.
        self.temp_counter = 0;
        self.label_counter = 0;
        self.slots.clear();
        self.class_bindings.clear();
        self.try_stack.clear();
        self.break_labels.clear();
        self.continue_labels.clear();
        self.current_handler_exc = None;
        self.current_fn = label.to_string();

        // Return shape.
        self.current_return_tuple = sig
            .return_tuple_elems
            .as_ref()
            .map(|elems| elems.iter().map(|k| ValueKind::of(*k)).collect());
        self.current_return_void =
            sig.return_kind == TypeKind::NoneType && self.current_return_tuple.is_none();
        self.current_return = ValueKind::of(sig.return_kind);

        let ret_ty = if let Some(kinds) = &self.current_return_tuple {
            tuple_struct_type(kinds)
        } else if self.current_return_void {
            "void".to_string()
        } else {
            self.current_return.ir_type().to_string()
        };

        // Parameter kinds come from the declared unions: a multi-kind
        // union is a boxed pointer.
        let mut param_decls: Vec<(String, ValueKind, PtrTag)> = Vec::new();
        if let Some(params) = &sig.params {
            for p in params {
                let (kind, tag) = match p.union_mask.single_kind() {
                    Some(k) => (ValueKind::of(k), PtrTag::of(k)),
                    None => (ValueKind::Ptr, PtrTag::Unknown),
                };
                param_decls.push((p.name.clone(), kind, tag));
            }
        } else {
            for p in &f.params {
                param_decls.push((p.name.clone(), ValueKind::Ptr, PtrTag::Unknown));
            }
        }

        let sub_id = self.dbg_subprogram(label, f.span.line.max(1));
        self.current_scope_id = sub_id;

        let mut body_ir = String::new();
        let params_text: Vec<String> = param_decls
            .iter()
            .map(|(name, kind, _)| format!("{} %arg.{}", kind.ir_type(), name))
            .collect();
        writeln!(
            body_ir,
            "define {} @{}({}) gc \"shadow-stack\" personality ptr @__gxx_personality_v0 !dbg !{} {{",
            ret_ty,
            Self::mangle(label),
            params_text.join(", "),
            sub_id
        )?;
        writeln!(body_ir, "entry:")?;
        self.block_terminated = false;

        // Parameter slots: alloca, GC root for pointers, store, debug
        // declare.
        for (name, kind, tag) in &param_decls {
            let slot_ptr = format!("%{}.slot", name);
            writeln!(body_ir, "  {} = alloca {}", slot_ptr, kind.ir_type())?;
            if *kind == ValueKind::Ptr {
                writeln!(
                    body_ir,
                    "  call void @llvm.gcroot(ptr {}, ptr null)",
                    slot_ptr
                )?;
            }
            writeln!(
                body_ir,
                "  store {} %arg.{}, ptr {}",
                kind.ir_type(),
                name,
                slot_ptr
            )?;
            self.slots.insert(
                name.clone(),
                Slot {
                    ptr: slot_ptr.clone(),
                    kind: *kind,
                    tag: *tag,
                },
            );
            self.dbg_declare_local(&mut body_ir, name, &slot_ptr, *kind, f.span.line.max(1))?;
        }

        // Local slots, zero-initialized.
        let locals = collect_local_kinds(&f.body);
        for (name, kinds) in locals {
            if self.slots.contains_key(&name) {
                continue;
            }
            let (kind, tag) = resolve_slot_kind(&kinds);
            let slot_ptr = format!("%{}.slot", name);
            writeln!(body_ir, "  {} = alloca {}", slot_ptr, kind.ir_type())?;
            if kind == ValueKind::Ptr {
                writeln!(
                    body_ir,
                    "  call void @llvm.gcroot(ptr {}, ptr null)",
                    slot_ptr
                )?;
            }
            writeln!(
                body_ir,
                "  store {} {}, ptr {}",
                kind.ir_type(),
                kind.default_value(),
                slot_ptr
            )?;
            self.slots.insert(
                name.clone(),
                Slot {
                    ptr: slot_ptr.clone(),
                    kind,
                    tag,
                },
            );
            self.dbg_declare_local(&mut body_ir, &name, &slot_ptr, kind, f.span.line.max(1))?;
        }

        self.emit_body(&f.body, &mut body_ir)?;
        if !self.block_terminated {
            // Type-appropriate default return on fallthrough.
            self.emit_default_return(&mut body_ir)?;
        }
        writeln!(body_ir, "}}")?;
        writeln!(body_ir)?;
        self.output.push_str(&body_ir);
        Ok(())
    }
}

/// Gather every locally assigned name with the type kinds sema stamped on
/// its binding sites. Does not descend into nested defs or classes.
fn collect_local_kinds(body: &[Stmt]) -> HashMap<String, Vec<TypeKind>> {
    let mut out: HashMap<String, Vec<TypeKind>> = HashMap::new();
    collect_in(body, &mut out);
    out
}

fn note(out: &mut HashMap<String, Vec<TypeKind>>, name: &str, kind: Option<TypeKind>) {
    out.entry(name.to_string())
        .or_default()
        .push(kind.unwrap_or(TypeKind::Opaque));
}

fn note_target(out: &mut HashMap<String, Vec<TypeKind>>, t: &Expr) {
    match &t.node {
        ExprNode::Name { id, .. } => note(out, id, t.inferred),
        ExprNode::Tuple(els) | ExprNode::List(els) => {
            for el in els {
                note_target(out, el);
            }
        }
        _ => {}
    }
}

fn collect_in(body: &[Stmt], out: &mut HashMap<String, Vec<TypeKind>>) {
    for s in body {
        match &s.node {
            StmtNode::Assign { targets, .. } => {
                for t in targets {
                    note_target(out, t);
                }
            }
            StmtNode::AugAssign { target, .. } => note_target(out, target),
            StmtNode::For { target, .. } => note_target(out, target),
            StmtNode::With { items, .. } => {
                for item in items {
                    if let Some(bind) = &item.bind {
                        note(out, bind, Some(TypeKind::Opaque));
                    }
                }
            }
            StmtNode::Try { handlers, .. } => {
                for h in handlers {
                    if let Some(bind) = &h.bind {
                        note(out, bind, Some(TypeKind::Class));
                    }
                }
            }
            StmtNode::Match { cases, .. } => {
                for c in cases {
                    note_captures(&c.pattern, out);
                }
            }
            StmtNode::FunctionDef(_) | StmtNode::ClassDef(_) => continue,
            _ => {}
        }
        // Walrus targets bind wherever they appear.
        let mut scan = |e: &Expr| {
            walk_expr(e, &mut |x| {
                if let ExprNode::NamedExpr { target, value } = &x.node {
                    note(out, target, value.inferred);
                }
            });
        };
        crate::ast::stmt_exprs(s, &mut scan);
        for b in crate::ast::child_bodies(s) {
            collect_in(b, out);
        }
    }
}

fn note_captures(p: &crate::ast::Pattern, out: &mut HashMap<String, Vec<TypeKind>>) {
    match p {
        crate::ast::Pattern::Capture { name, sub } => {
            note(out, name, Some(TypeKind::Opaque));
            if let Some(sub) = sub {
                note_captures(sub, out);
            }
        }
        crate::ast::Pattern::Or(subs) | crate::ast::Pattern::Sequence(subs) => {
            for sub in subs {
                note_captures(sub, out);
            }
        }
        crate::ast::Pattern::Mapping { patterns, .. } => {
            for sub in patterns {
                note_captures(sub, out);
            }
        }
        crate::ast::Pattern::Class { args, .. } => {
            for sub in args {
                note_captures(sub, out);
            }
        }
        crate::ast::Pattern::Star(Some(name)) => note(out, name, Some(TypeKind::Opaque)),
        _ => {}
    }
}

/// Slot kind for a set of binding kinds: a single concrete kind keeps its
/// unboxed representation; anything mixed boxes to a pointer.
fn resolve_slot_kind(kinds: &[TypeKind]) -> (ValueKind, PtrTag) {
    let mut unique: Vec<TypeKind> = Vec::new();
    for k in kinds {
        if !unique.contains(k) {
            unique.push(*k);
        }
    }
    match unique.as_slice() {
        [k] => (ValueKind::of(*k), PtrTag::of(*k)),
        _ => (ValueKind::Ptr, PtrTag::Unknown),
    }
}
