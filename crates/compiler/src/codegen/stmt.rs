//! Statement lowering.
//!
//! Maintains the break/continue label stacks and the try-context stack
//! (landing-pad and exception-check labels). Control-flow blocks use
//! unique labels from the per-function counter; raise forwarding branches
//! to the innermost exception-check block.

use crate::ast::{Expr, ExprNode, Pattern, Stmt, StmtNode};
use super::state::{CodeGen, PtrTag, TryContext, Value, ValueKind};
use super::CodeGenError;
use std::fmt::Write as _;

impl CodeGen<'_> {
    /// Open a new basic block.
    pub(super) fn start_block(&mut self, ir: &mut String, label: &str) -> Result<(), CodeGenError> {
        writeln!(ir, "{}:", label)?;
        self.block_terminated = false;
        Ok(())
    }

    pub(super) fn emit_br(&mut self, ir: &mut String, label: &str) -> Result<(), CodeGenError> {
        writeln!(ir, "  br label %{}", label)?;
        self.block_terminated = true;
        Ok(())
    }

    pub(super) fn emit_body(&mut self, body: &[Stmt], ir: &mut String) -> Result<(), CodeGenError> {
        for s in body {
            if self.block_terminated {
                // Unreachable tail: open a fresh block so the IR stays
                // well-formed.
                let l = self.fresh_label("dead");
                self.start_block(ir, &l)?;
            }
            self.emit_stmt(s, ir)?;
        }
        Ok(())
    }

    pub(super) fn emit_stmt(&mut self, s: &Stmt, ir: &mut String) -> Result<(), CodeGenError> {
        self.emit_stmt_location(s, ir)?;
        match &s.node {
            StmtNode::Pass
            | StmtNode::Import(_)
            | StmtNode::ImportFrom { .. }
            | StmtNode::Global(_)
            | StmtNode::Nonlocal(_) => Ok(()),
            StmtNode::Expr(e) => {
                self.lower_expr(e, ir)?;
                Ok(())
            }
            StmtNode::Assign { targets, value } => self.emit_assign(ir, targets, value),
            StmtNode::AugAssign { target, op, value } => {
                let synthetic = Expr::new(
                    ExprNode::Binary {
                        op: *op,
                        lhs: Box::new(target.clone()),
                        rhs: Box::new(value.clone()),
                    },
                    s.span.clone(),
                );
                let v = self.lower_expr(&synthetic, ir)?;
                let name = target
                    .as_name()
                    .ok_or_else(|| {
                        CodeGenError::Logic("augmented assignment to non-name".to_string())
                    })?
                    .to_string();
                self.store_local(ir, &name, &v)
            }
            StmtNode::Return(value) => self.emit_return(ir, value.as_ref()),
            StmtNode::If { cond, body, orelse } => self.emit_if(ir, cond, body, orelse),
            StmtNode::While { cond, body, orelse } => self.emit_while(ir, cond, body, orelse),
            StmtNode::For {
                target,
                iter,
                body,
                orelse,
            } => self.emit_for(ir, target, iter, body, orelse),
            StmtNode::Break => {
                let label = self
                    .break_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| CodeGenError::Logic("break outside loop".to_string()))?;
                self.emit_br(ir, &label)
            }
            StmtNode::Continue => {
                let label = self
                    .continue_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| CodeGenError::Logic("continue outside loop".to_string()))?;
                self.emit_br(ir, &label)
            }
            StmtNode::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.emit_try(ir, body, handlers, orelse, finalbody),
            StmtNode::Raise { exc, cause } => self.emit_raise(ir, exc.as_ref(), cause.as_ref()),
            StmtNode::Assert { test, msg } => self.emit_assert(ir, test, msg.as_ref()),
            StmtNode::Del(targets) => {
                for t in targets {
                    if let Some(name) = t.as_name() {
                        let slot = self.slots.get(name).cloned().ok_or_else(|| {
                            CodeGenError::Logic(format!("del of unknown name '{}'", name))
                        })?;
                        writeln!(
                            ir,
                            "  store {} {}, ptr {}",
                            slot.kind.ir_type(),
                            slot.kind.default_value(),
                            slot.ptr
                        )?;
                    }
                }
                Ok(())
            }
            StmtNode::With { items, body } => {
                for item in items {
                    let v = self.lower_expr(&item.context, ir)?;
                    if let Some(bind) = &item.bind {
                        let bind = bind.clone();
                        self.store_local(ir, &bind, &v)?;
                    }
                }
                self.emit_body(body, ir)
            }
            StmtNode::Match { subject, cases } => self.emit_match(ir, subject, cases),
            StmtNode::FunctionDef(_) | StmtNode::ClassDef(_) => Err(CodeGenError::Logic(
                "nested definitions are lowered at module level".to_string(),
            )),
        }
    }

    fn emit_assign(
        &mut self,
        ir: &mut String,
        targets: &[Expr],
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let v = self.lower_expr(value, ir)?;
        for target in targets {
            match &target.node {
                ExprNode::Name { id, .. } => {
                    let id = id.clone();
                    self.store_local(ir, &id, &v)?;
                    // Track constructor results for method dispatch.
                    if let ExprNode::Call { func, .. } = &value.node
                        && let Some(cname) = func.as_name()
                        && self.ctx.classes.contains_key(cname)
                    {
                        self.class_bindings.insert(id, cname.to_string());
                    }
                }
                ExprNode::Subscript {
                    value: base,
                    index,
                    ..
                } => {
                    self.emit_subscript_store(ir, base, index, &v)?;
                }
                ExprNode::Attribute { value: base, attr, .. } => {
                    let obj = self.lower_expr(base, ir)?;
                    let key = self.string_object(ir, attr)?;
                    let boxed = self.box_value(ir, &v)?;
                    self.rt_call(
                        ir,
                        "void",
                        "@pycc_object_set_attr",
                        &format!("ptr {}, ptr {}, ptr {}", obj.repr, key.repr, boxed.repr),
                    )?;
                }
                ExprNode::Tuple(els) | ExprNode::List(els) => {
                    // Destructure positionally from the aggregate.
                    for (i, el) in els.iter().enumerate() {
                        let Some(name) = el.as_name() else {
                            return Err(CodeGenError::Logic(
                                "nested destructuring target".to_string(),
                            ));
                        };
                        let name = name.to_string();
                        let elem = self
                            .rt_call(
                                ir,
                                "ptr",
                                "@pycc_list_get",
                                &format!("ptr {}, i64 {}", v.repr, i),
                            )?
                            .expect("ptr");
                        let elem_v = Value::new(elem, ValueKind::Ptr);
                        let want = self
                            .slots
                            .get(&name)
                            .map(|s| s.kind)
                            .unwrap_or(ValueKind::Ptr);
                        let narrowed = if want == ValueKind::Ptr {
                            elem_v
                        } else {
                            self.unbox_value(ir, &elem_v, want)?
                        };
                        self.store_local(ir, &name, &narrowed)?;
                    }
                }
                _ => {
                    return Err(CodeGenError::Logic(
                        "invalid assignment target".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn emit_subscript_store(
        &mut self,
        ir: &mut String,
        base: &Expr,
        index: &Expr,
        v: &Value,
    ) -> Result<(), CodeGenError> {
        let base_v = self.lower_expr(base, ir)?;
        let boxed = self.box_value(ir, v)?;
        match base_v.tag {
            PtrTag::Dict => {
                // dict_set needs the slot address so a rehash can move the
                // table.
                let slot = if let Some(name) = base.as_name() {
                    self.slots
                        .get(name)
                        .map(|s| s.ptr.clone())
                        .ok_or_else(|| CodeGenError::Logic(format!("no slot for '{}'", name)))?
                } else {
                    let s = self.scoped_root(ir)?;
                    self.store_rooted(ir, &s, &base_v.repr)?;
                    s
                };
                let key = self.lower_expr(index, ir)?;
                self.rt_call(
                    ir,
                    "void",
                    "@pycc_dict_set",
                    &format!("ptr {}, ptr {}, ptr {}", slot, key.repr, boxed.repr),
                )?;
            }
            _ => {
                let idx = self.lower_expr(index, ir)?;
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", wide, idx.repr)?;
                self.rt_call(
                    ir,
                    "void",
                    "@pycc_list_set",
                    &format!("ptr {}, i64 {}, ptr {}", base_v.repr, wide, boxed.repr),
                )?;
            }
        }
        Ok(())
    }

    /// Store a value into a named local's slot, boxing or unboxing to the
    /// slot's kind, with the write barrier on pointer slots.
    pub(super) fn store_local(
        &mut self,
        ir: &mut String,
        name: &str,
        v: &Value,
    ) -> Result<(), CodeGenError> {
        let slot = self
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| CodeGenError::Logic(format!("no slot for name '{}'", name)))?;
        let coerced = if slot.kind == ValueKind::Ptr && v.kind != ValueKind::Ptr {
            self.box_value(ir, v)?
        } else if slot.kind != ValueKind::Ptr && v.kind == ValueKind::Ptr {
            self.unbox_value(ir, v, slot.kind)?
        } else {
            v.clone()
        };
        writeln!(
            ir,
            "  store {} {}, ptr {}",
            slot.kind.ir_type(),
            coerced.repr,
            slot.ptr
        )?;
        if slot.kind == ValueKind::Ptr {
            writeln!(
                ir,
                "  call void @pycc_gc_write_barrier(ptr {}, ptr {})",
                slot.ptr, coerced.repr
            )?;
        }
        Ok(())
    }

    fn emit_return(&mut self, ir: &mut String, value: Option<&Expr>) -> Result<(), CodeGenError> {
        // Tuple-returning functions build their struct value inline.
        if let Some(kinds) = self.current_return_tuple.clone()
            && let Some(Expr {
                node: ExprNode::Tuple(els),
                ..
            }) = value
            && els.len() == kinds.len()
        {
            let struct_ty = tuple_struct_type(&kinds);
            let mut cur = "undef".to_string();
            for (i, (el, kind)) in els.iter().zip(&kinds).enumerate() {
                let v = self.lower_expr(el, ir)?;
                let coerced = if v.kind == *kind {
                    v
                } else {
                    self.unbox_value(ir, &v, *kind)?
                };
                let t = self.fresh_temp();
                writeln!(
                    ir,
                    "  {} = insertvalue {} {}, {} {}, {}",
                    t,
                    struct_ty,
                    cur,
                    kind.ir_type(),
                    coerced.repr,
                    i
                )?;
                cur = t;
            }
            writeln!(ir, "  ret {} {}", struct_ty, cur)?;
            self.block_terminated = true;
            return Ok(());
        }

        match value {
            None => {
                if self.current_return_void {
                    writeln!(ir, "  ret void")?;
                } else {
                    writeln!(
                        ir,
                        "  ret {} {}",
                        self.current_return.ir_type(),
                        self.current_return.default_value()
                    )?;
                }
            }
            Some(e) => {
                if self.current_return_void {
                    // Evaluate for effect, drop the value.
                    self.lower_expr(e, ir)?;
                    writeln!(ir, "  ret void")?;
                } else {
                    let v = self.lower_expr(e, ir)?;
                    let want = self.current_return;
                    let coerced = if v.kind == want {
                        v
                    } else if want == ValueKind::Ptr {
                        self.box_value(ir, &v)?
                    } else {
                        self.unbox_value(ir, &v, want)?
                    };
                    writeln!(ir, "  ret {} {}", want.ir_type(), coerced.repr)?;
                }
            }
        }
        self.block_terminated = true;
        Ok(())
    }

    fn emit_if(
        &mut self,
        ir: &mut String,
        cond: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let c = self.lower_expr(cond, ir)?;
        let ct = self.truthy(ir, &c)?;
        let then_label = self.fresh_label("if.then");
        let end_label = self.fresh_label("if.end");
        let else_label = if orelse.is_empty() {
            end_label.clone()
        } else {
            self.fresh_label("if.else")
        };
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            ct, then_label, else_label
        )?;
        self.start_block(ir, &then_label)?;
        self.emit_body(body, ir)?;
        if !self.block_terminated {
            self.emit_br(ir, &end_label)?;
        }
        if !orelse.is_empty() {
            self.start_block(ir, &else_label)?;
            self.emit_body(orelse, ir)?;
            if !self.block_terminated {
                self.emit_br(ir, &end_label)?;
            }
        }
        self.start_block(ir, &end_label)
    }

    fn emit_while(
        &mut self,
        ir: &mut String,
        cond: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let head = self.fresh_label("loop.head");
        let body_label = self.fresh_label("loop.body");
        let else_label = self.fresh_label("loop.else");
        let end_label = self.fresh_label("loop.end");

        self.emit_br(ir, &head)?;
        self.start_block(ir, &head)?;
        let c = self.lower_expr(cond, ir)?;
        let ct = self.truthy(ir, &c)?;
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            ct, body_label, else_label
        )?;

        self.start_block(ir, &body_label)?;
        self.break_labels.push(end_label.clone());
        self.continue_labels.push(head.clone());
        self.emit_body(body, ir)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        if !self.block_terminated {
            self.emit_br(ir, &head)?;
        }

        // The else body runs only on normal exit; break skips it.
        self.start_block(ir, &else_label)?;
        self.emit_body(orelse, ir)?;
        if !self.block_terminated {
            self.emit_br(ir, &end_label)?;
        }
        self.start_block(ir, &end_label)
    }

    fn emit_for(
        &mut self,
        ir: &mut String,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let target_name = target
            .as_name()
            .ok_or_else(|| CodeGenError::Logic("structured for-targets are rewritten upstream".to_string()))?
            .to_string();

        // range(...) iteration compiles to a counted loop.
        if let ExprNode::Call { func, args, .. } = &iter.node
            && func.as_name() == Some("range")
        {
            return self.emit_range_for(ir, &target_name, args, body, orelse);
        }

        // General iterable: index over a list-tagged pointer.
        let seq = self.lower_expr(iter, ir)?;
        let seq_slot = self.scoped_root(ir)?;
        self.store_rooted(ir, &seq_slot, &seq.repr)?;
        let idx_slot = format!("%for.idx{}", self.temp_counter);
        self.temp_counter += 1;
        writeln!(ir, "  {} = alloca i64", idx_slot)?;
        writeln!(ir, "  store i64 0, ptr {}", idx_slot)?;
        let len = self
            .rt_call(ir, "i64", "@pycc_list_len", &format!("ptr {}", seq.repr))?
            .expect("i64");

        let head = self.fresh_label("for.head");
        let body_label = self.fresh_label("for.body");
        let incr = self.fresh_label("for.incr");
        let else_label = self.fresh_label("for.else");
        let end_label = self.fresh_label("for.end");

        self.emit_br(ir, &head)?;
        self.start_block(ir, &head)?;
        let i = self.fresh_temp();
        writeln!(ir, "  {} = load i64, ptr {}", i, idx_slot)?;
        let c = self.fresh_temp();
        writeln!(ir, "  {} = icmp slt i64 {}, {}", c, i, len)?;
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            c, body_label, else_label
        )?;

        self.start_block(ir, &body_label)?;
        let cur_seq = self.fresh_temp();
        writeln!(ir, "  {} = load ptr, ptr {}", cur_seq, seq_slot)?;
        let i2 = self.fresh_temp();
        writeln!(ir, "  {} = load i64, ptr {}", i2, idx_slot)?;
        let elem = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_list_get",
                &format!("ptr {}, i64 {}", cur_seq, i2),
            )?
            .expect("ptr");
        let want = self
            .slots
            .get(&target_name)
            .map(|s| s.kind)
            .unwrap_or(ValueKind::Ptr);
        let elem_v = Value::new(elem, ValueKind::Ptr);
        let narrowed = if want == ValueKind::Ptr {
            elem_v
        } else {
            self.unbox_value(ir, &elem_v, want)?
        };
        self.store_local(ir, &target_name, &narrowed)?;

        self.break_labels.push(end_label.clone());
        self.continue_labels.push(incr.clone());
        self.emit_body(body, ir)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        if !self.block_terminated {
            self.emit_br(ir, &incr)?;
        }

        self.start_block(ir, &incr)?;
        let i3 = self.fresh_temp();
        writeln!(ir, "  {} = load i64, ptr {}", i3, idx_slot)?;
        let i4 = self.fresh_temp();
        writeln!(ir, "  {} = add i64 {}, 1", i4, i3)?;
        writeln!(ir, "  store i64 {}, ptr {}", i4, idx_slot)?;
        self.emit_br(ir, &head)?;

        self.start_block(ir, &else_label)?;
        self.emit_body(orelse, ir)?;
        if !self.block_terminated {
            self.emit_br(ir, &end_label)?;
        }
        self.start_block(ir, &end_label)
    }

    fn emit_range_for(
        &mut self,
        ir: &mut String,
        target: &str,
        args: &[Expr],
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let (start, stop, step_const) = match args.len() {
            1 => (None, &args[0], 1),
            2 => (Some(&args[0]), &args[1], 1),
            3 => {
                let step = args[2].as_const_int().ok_or_else(|| {
                    CodeGenError::Logic("range() step must be a constant".to_string())
                })?;
                if step == 0 {
                    return Err(CodeGenError::Logic("range() step of zero".to_string()));
                }
                (Some(&args[0]), &args[1], step)
            }
            _ => return Err(CodeGenError::Logic("range() arity".to_string())),
        };

        let start_v = match start {
            Some(e) => self.lower_expr(e, ir)?,
            None => Value::new("0", ValueKind::I32),
        };
        let stop_v = self.lower_expr(stop, ir)?;
        self.store_local(ir, target, &start_v)?;

        let head = self.fresh_label("for.head");
        let body_label = self.fresh_label("for.body");
        let incr = self.fresh_label("for.incr");
        let else_label = self.fresh_label("for.else");
        let end_label = self.fresh_label("for.end");

        let slot = self.slots[target].clone();
        self.emit_br(ir, &head)?;
        self.start_block(ir, &head)?;
        let i = self.fresh_temp();
        writeln!(ir, "  {} = load i32, ptr {}", i, slot.ptr)?;
        let c = self.fresh_temp();
        let cmp = if step_const > 0 { "slt" } else { "sgt" };
        writeln!(ir, "  {} = icmp {} i32 {}, {}", c, cmp, i, stop_v.repr)?;
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            c, body_label, else_label
        )?;

        self.start_block(ir, &body_label)?;
        self.break_labels.push(end_label.clone());
        self.continue_labels.push(incr.clone());
        self.emit_body(body, ir)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        if !self.block_terminated {
            self.emit_br(ir, &incr)?;
        }

        self.start_block(ir, &incr)?;
        let i2 = self.fresh_temp();
        writeln!(ir, "  {} = load i32, ptr {}", i2, slot.ptr)?;
        let i3 = self.fresh_temp();
        writeln!(ir, "  {} = add i32 {}, {}", i3, i2, step_const)?;
        writeln!(ir, "  store i32 {}, ptr {}", i3, slot.ptr)?;
        self.emit_br(ir, &head)?;

        self.start_block(ir, &else_label)?;
        self.emit_body(orelse, ir)?;
        if !self.block_terminated {
            self.emit_br(ir, &end_label)?;
        }
        self.start_block(ir, &end_label)
    }

    fn emit_try(
        &mut self,
        ir: &mut String,
        body: &[Stmt],
        handlers: &[crate::ast::ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let lpad = self.fresh_label("lpad");
        let check = self.fresh_label("exc.check");
        let body_label = self.fresh_label("try.body");
        let else_label = self.fresh_label("try.else");
        let finally_label = self.fresh_label("try.finally");
        let unwind_label = self.fresh_label("try.unwind");
        let join = self.fresh_label("try.join");

        self.emit_br(ir, &body_label)?;
        self.start_block(ir, &body_label)?;
        self.try_stack.push(TryContext {
            lpad_label: lpad.clone(),
            check_label: check.clone(),
        });
        self.emit_body(body, ir)?;
        self.try_stack.pop();
        if !self.block_terminated {
            self.emit_br(ir, &else_label)?;
        }

        // Landing pad translates native unwinds into the check block.
        self.start_block(ir, &lpad)?;
        let lp = self.fresh_temp();
        writeln!(ir, "  {} = landingpad {{ ptr, i32 }} cleanup", lp)?;
        self.emit_br(ir, &check)?;

        // Exception-check: dispatch when the thread-local slot is set.
        self.start_block(ir, &check)?;
        let has = self.fresh_temp();
        writeln!(ir, "  {} = call i1 @pycc_rt_has_exception()", has)?;
        let first_dispatch = if handlers.is_empty() {
            finally_label.clone()
        } else {
            self.fresh_label("exc.dispatch")
        };
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            has, first_dispatch, finally_label
        )?;
        self.block_terminated = true;

        // Handler dispatch chain: compare the runtime type name against
        // each declared handler type.
        let mut dispatch = first_dispatch.clone();
        for (i, handler) in handlers.iter().enumerate() {
            let next = if i + 1 < handlers.len() {
                self.fresh_label("exc.dispatch")
            } else {
                finally_label.clone()
            };
            let handler_label = self.fresh_label("exc.handler");
            self.start_block(ir, &dispatch)?;
            match &handler.type_name {
                Some(type_name) => {
                    let exc = self
                        .rt_call_nounwind(ir, "ptr", "@pycc_rt_current_exception", "")?;
                    let ty = self.rt_call_nounwind(
                        ir,
                        "ptr",
                        "@pycc_rt_exception_type",
                        &format!("ptr {}", exc),
                    )?;
                    let expected = self.string_object_nounwind(ir, type_name)?;
                    let m = self.rt_call_nounwind(
                        ir,
                        "i1",
                        "@pycc_string_eq",
                        &format!("ptr {}, ptr {}", ty, expected),
                    )?;
                    writeln!(
                        ir,
                        "  br i1 {}, label %{}, label %{}",
                        m, handler_label, next
                    )?;
                    self.block_terminated = true;
                }
                None => {
                    // Bare except catches everything.
                    self.emit_br(ir, &handler_label)?;
                }
            }

            self.start_block(ir, &handler_label)?;
            let exc = self.rt_call_nounwind(ir, "ptr", "@pycc_rt_current_exception", "")?;
            let saved_handler = self.current_handler_exc.clone();
            if let Some(bind) = &handler.bind {
                let bind = bind.clone();
                let v = Value::tagged(exc.clone(), PtrTag::Object);
                self.store_local(ir, &bind, &v)?;
                self.current_handler_exc = self.slots.get(&bind).map(|s| s.ptr.clone());
            } else {
                // Keep the object reachable for bare raise.
                let tmp_slot = self.scoped_root(ir)?;
                self.store_rooted(ir, &tmp_slot, &exc)?;
                self.current_handler_exc = Some(tmp_slot);
            }
            writeln!(ir, "  call void @pycc_rt_clear_exception()")?;
            self.emit_body(&handler.body, ir)?;
            self.current_handler_exc = saved_handler;
            if !self.block_terminated {
                self.emit_br(ir, &finally_label)?;
            }
            dispatch = next;
        }

        // Normal completion path: else body, unprotected.
        self.start_block(ir, &else_label)?;
        self.emit_body(orelse, ir)?;
        if !self.block_terminated {
            self.emit_br(ir, &finally_label)?;
        }

        // Finally runs on every path, then re-checks the slot to decide
        // whether to continue unwinding.
        self.start_block(ir, &finally_label)?;
        self.emit_body(finalbody, ir)?;
        if !self.block_terminated {
            let h2 = self.fresh_temp();
            writeln!(ir, "  {} = call i1 @pycc_rt_has_exception()", h2)?;
            writeln!(
                ir,
                "  br i1 {}, label %{}, label %{}",
                h2, unwind_label, join
            )?;
            self.block_terminated = true;
        }

        self.start_block(ir, &unwind_label)?;
        match self.try_stack.last().cloned() {
            Some(outer) => self.emit_br(ir, &outer.check_label)?,
            None => {
                // Propagate by returning; the caller's check sees the slot.
                self.emit_default_return(ir)?;
            }
        }

        self.start_block(ir, &join)
    }

    /// A runtime call that never unwinds (used inside dispatch blocks,
    /// where the try context is already popped).
    fn rt_call_nounwind(
        &mut self,
        ir: &mut String,
        ret: &str,
        callee: &str,
        args: &str,
    ) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        writeln!(ir, "  {} = call {} {}({})", t, ret, callee, args)?;
        Ok(t)
    }

    fn string_object_nounwind(
        &mut self,
        ir: &mut String,
        s: &str,
    ) -> Result<String, CodeGenError> {
        let data = self.cstr_ptr(ir, s)?;
        self.rt_call_nounwind(
            ir,
            "ptr",
            "@pycc_string_new",
            &format!("ptr {}, i64 {}", data, s.len()),
        )
    }

    pub(super) fn emit_default_return(&mut self, ir: &mut String) -> Result<(), CodeGenError> {
        if let Some(kinds) = &self.current_return_tuple {
            let ty = tuple_struct_type(kinds);
            writeln!(ir, "  ret {} zeroinitializer", ty)?;
        } else if self.current_return_void {
            writeln!(ir, "  ret void")?;
        } else {
            writeln!(
                ir,
                "  ret {} {}",
                self.current_return.ir_type(),
                self.current_return.default_value()
            )?;
        }
        self.block_terminated = true;
        Ok(())
    }

    fn emit_raise(
        &mut self,
        ir: &mut String,
        exc: Option<&Expr>,
        cause: Option<&Expr>,
    ) -> Result<(), CodeGenError> {
        let (type_ptr, msg_ptr) = match exc {
            // raise TypeName("message")
            Some(Expr {
                node: ExprNode::Call { func, args, .. },
                ..
            }) if func.as_name().is_some() => {
                let type_name = func.as_name().expect("checked").to_string();
                let tp = self.cstr_ptr(ir, &type_name)?;
                let mp = match args.first() {
                    Some(Expr {
                        node: ExprNode::Str(m),
                        ..
                    }) => {
                        let m = m.clone();
                        self.cstr_ptr(ir, &m)?
                    }
                    Some(other) => {
                        let v = self.lower_expr(other, ir)?;
                        let s = self.stringify(ir, &v)?;
                        self.rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", s.repr))?
                            .expect("ptr")
                    }
                    None => self.cstr_ptr(ir, "")?,
                };
                (tp, mp)
            }
            // raise e  (a bound exception object)
            Some(e) if e.as_name().is_some() => {
                let v = self.lower_expr(e, ir)?;
                let ty = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_rt_exception_type",
                        &format!("ptr {}", v.repr),
                    )?
                    .expect("ptr");
                let tp = self
                    .rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", ty))?
                    .expect("ptr");
                let msg = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_rt_exception_message",
                        &format!("ptr {}", v.repr),
                    )?
                    .expect("ptr");
                let mp = self
                    .rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", msg))?
                    .expect("ptr");
                (tp, mp)
            }
            // bare raise: re-raise the handler's exception
            None => {
                let slot = self.current_handler_exc.clone().ok_or_else(|| {
                    CodeGenError::Logic("bare raise outside an except handler".to_string())
                })?;
                let obj = self.fresh_temp();
                writeln!(ir, "  {} = load ptr, ptr {}", obj, slot)?;
                let ty = self
                    .rt_call(ir, "ptr", "@pycc_rt_exception_type", &format!("ptr {}", obj))?
                    .expect("ptr");
                let tp = self
                    .rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", ty))?
                    .expect("ptr");
                let msg = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_rt_exception_message",
                        &format!("ptr {}", obj),
                    )?
                    .expect("ptr");
                let mp = self
                    .rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", msg))?
                    .expect("ptr");
                (tp, mp)
            }
            Some(_) => {
                return Err(CodeGenError::Logic(
                    "raise operand must be a type call or bound name".to_string(),
                ))
            }
        };

        self.rt_call(
            ir,
            "void",
            "@pycc_rt_raise",
            &format!("ptr {}, ptr {}", type_ptr, msg_ptr),
        )?;
        if let Some(cause_expr) = cause {
            let cv = self.lower_expr(cause_expr, ir)?;
            let cur = self
                .rt_call(ir, "ptr", "@pycc_rt_current_exception", "")?
                .expect("ptr");
            self.rt_call(
                ir,
                "void",
                "@pycc_rt_exception_set_cause",
                &format!("ptr {}, ptr {}", cur, cv.repr),
            )?;
        }

        match self.try_stack.last().cloned() {
            Some(tc) => self.emit_br(ir, &tc.check_label)?,
            None => self.emit_default_return(ir)?,
        }
        Ok(())
    }

    fn emit_assert(
        &mut self,
        ir: &mut String,
        test: &Expr,
        msg: Option<&Expr>,
    ) -> Result<(), CodeGenError> {
        let v = self.lower_expr(test, ir)?;
        let c = self.truthy(ir, &v)?;
        let ok = self.fresh_label("assert.ok");
        let fail = self.fresh_label("assert.fail");
        writeln!(ir, "  br i1 {}, label %{}, label %{}", c, ok, fail)?;
        self.start_block(ir, &fail)?;
        let tp = self.cstr_ptr(ir, "AssertionError")?;
        let mp = match msg {
            Some(Expr {
                node: ExprNode::Str(m),
                ..
            }) => {
                let m = m.clone();
                self.cstr_ptr(ir, &m)?
            }
            _ => self.cstr_ptr(ir, "assertion failed")?,
        };
        self.rt_call(
            ir,
            "void",
            "@pycc_rt_raise",
            &format!("ptr {}, ptr {}", tp, mp),
        )?;
        match self.try_stack.last().cloned() {
            Some(tc) => self.emit_br(ir, &tc.check_label)?,
            None => self.emit_default_return(ir)?,
        }
        self.start_block(ir, &ok)
    }

    fn emit_match(
        &mut self,
        ir: &mut String,
        subject: &Expr,
        cases: &[crate::ast::MatchCase],
    ) -> Result<(), CodeGenError> {
        let subj = self.lower_expr(subject, ir)?;
        let end_label = self.fresh_label("match.end");
        for case in cases {
            let body_label = self.fresh_label("match.body");
            let next_label = self.fresh_label("match.next");
            match &case.pattern {
                Pattern::Wildcard => {
                    self.emit_br(ir, &body_label)?;
                }
                Pattern::Capture { name, sub: None } => {
                    let name = name.clone();
                    self.store_local(ir, &name, &subj)?;
                    self.emit_br(ir, &body_label)?;
                }
                Pattern::Literal(lit) => {
                    let lv = self.lower_expr(lit, ir)?;
                    let eq = self.lower_match_eq(ir, &subj, &lv)?;
                    writeln!(
                        ir,
                        "  br i1 {}, label %{}, label %{}",
                        eq, body_label, next_label
                    )?;
                    self.block_terminated = true;
                }
                _ => {
                    return Err(CodeGenError::Logic(
                        "structural match patterns are not lowered".to_string(),
                    ))
                }
            }
            self.start_block(ir, &body_label)?;
            if let Some(guard) = &case.guard {
                let gv = self.lower_expr(guard, ir)?;
                let gc = self.truthy(ir, &gv)?;
                let guard_ok = self.fresh_label("match.guard");
                writeln!(
                    ir,
                    "  br i1 {}, label %{}, label %{}",
                    gc, guard_ok, next_label
                )?;
                self.start_block(ir, &guard_ok)?;
            }
            self.emit_body(&case.body, ir)?;
            if !self.block_terminated {
                self.emit_br(ir, &end_label)?;
            }
            self.start_block(ir, &next_label)?;
        }
        self.emit_br(ir, &end_label)?;
        self.start_block(ir, &end_label)
    }

    fn lower_match_eq(
        &mut self,
        ir: &mut String,
        subj: &Value,
        lit: &Value,
    ) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        match (subj.kind, lit.kind) {
            (ValueKind::I32, ValueKind::I32) => {
                writeln!(ir, "  {} = icmp eq i32 {}, {}", t, subj.repr, lit.repr)?
            }
            (ValueKind::I1, ValueKind::I1) => {
                writeln!(ir, "  {} = icmp eq i1 {}, {}", t, subj.repr, lit.repr)?
            }
            (ValueKind::F64, ValueKind::F64) => {
                writeln!(ir, "  {} = fcmp oeq double {}, {}", t, subj.repr, lit.repr)?
            }
            (ValueKind::Ptr, ValueKind::Ptr) => {
                return Ok(self
                    .rt_call_nounwind(
                        ir,
                        "i1",
                        "@pycc_string_eq",
                        &format!("ptr {}, ptr {}", subj.repr, lit.repr),
                    )?);
            }
            _ => {
                return Err(CodeGenError::Logic(
                    "match literal kind disagrees with subject".to_string(),
                ))
            }
        }
        Ok(t)
    }
}

/// IR struct type for a tuple of value kinds, e.g. `{ i32, i1, double }`.
pub(super) fn tuple_struct_type(kinds: &[ValueKind]) -> String {
    let parts: Vec<&str> = kinds.iter().map(|k| k.ir_type()).collect();
    format!("{{ {} }}", parts.join(", "))
}
