//! Expression lowering.
//!
//! Produces `(ssa-name, value-kind)` pairs. Aggregate literals are built
//! through GC-rooted scoped slots; every pointer store into a rooted slot
//! is followed by a write-barrier call. Any effectful runtime call emitted
//! while a try region is open becomes an `invoke` with an unwind edge to
//! the region's landing pad.

use crate::ast::{
    BinaryOp, CmpOp, DictEntry, Expr, ExprNode, FStringPart, TypeKind, UnaryOp,
};
use crate::sema::sig::errno_value;
use super::state::{CodeGen, PtrTag, Value, ValueKind};
use super::CodeGenError;
use std::fmt::Write as _;

impl CodeGen<'_> {
    /// Emit a runtime call, honoring the invoke discipline inside try
    /// regions. `ret` is the IR return type or "void".
    pub(super) fn rt_call(
        &mut self,
        ir: &mut String,
        ret: &str,
        callee: &str,
        args: &str,
    ) -> Result<Option<String>, CodeGenError> {
        let dest = if ret == "void" {
            None
        } else {
            Some(self.fresh_temp())
        };
        if let Some(tc) = self.try_stack.last().cloned() {
            let cont = self.fresh_label("cont");
            match &dest {
                Some(d) => writeln!(
                    ir,
                    "  {} = invoke {} {}({}) to label %{} unwind label %{}",
                    d, ret, callee, args, cont, tc.lpad_label
                )?,
                None => writeln!(
                    ir,
                    "  invoke void {}({}) to label %{} unwind label %{}",
                    callee, args, cont, tc.lpad_label
                )?,
            }
            writeln!(ir, "{}:", cont)?;
        } else {
            match &dest {
                Some(d) => writeln!(ir, "  {} = call {} {}({})", d, ret, callee, args)?,
                None => writeln!(ir, "  call void {}({})", callee, args)?,
            }
        }
        Ok(dest)
    }

    /// After a call that may set the thread-local exception, branch to the
    /// enclosing try's check block when the flag is set.
    pub(super) fn emit_exception_forward(&mut self, ir: &mut String) -> Result<(), CodeGenError> {
        let Some(tc) = self.try_stack.last().cloned() else {
            return Ok(());
        };
        let flag = self.fresh_temp();
        let cont = self.fresh_label("nothrow");
        writeln!(ir, "  {} = call i1 @pycc_rt_has_exception()", flag)?;
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            flag, tc.check_label, cont
        )?;
        writeln!(ir, "{}:", cont)?;
        Ok(())
    }

    /// Materialize a NUL-terminated global for `s` and return a ptr to its
    /// first byte.
    pub(super) fn cstr_ptr(&mut self, ir: &mut String, s: &str) -> Result<String, CodeGenError> {
        let (global, len) = self.string_global(s)?;
        let t = self.fresh_temp();
        writeln!(
            ir,
            "  {} = getelementptr inbounds [{} x i8], ptr {}, i64 0, i64 0",
            t, len, global
        )?;
        Ok(t)
    }

    /// Build a runtime string object from a literal.
    pub(super) fn string_object(&mut self, ir: &mut String, s: &str) -> Result<Value, CodeGenError> {
        let data = self.cstr_ptr(ir, s)?;
        let t = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_string_new",
                &format!("ptr {}, i64 {}", data, s.len()),
            )?
            .expect("ptr return");
        Ok(Value::tagged(t, PtrTag::Str))
    }

    /// Allocate a fresh GC-rooted pointer slot for aggregate construction.
    pub(super) fn scoped_root(&mut self, ir: &mut String) -> Result<String, CodeGenError> {
        let slot = format!("%agg.slot{}", self.temp_counter);
        self.temp_counter += 1;
        writeln!(ir, "  {} = alloca ptr", slot)?;
        writeln!(ir, "  call void @llvm.gcroot(ptr {}, ptr null)", slot)?;
        writeln!(ir, "  store ptr null, ptr {}", slot)?;
        Ok(slot)
    }

    /// Store a pointer into a rooted slot with the write barrier.
    pub(super) fn store_rooted(
        &mut self,
        ir: &mut String,
        slot: &str,
        value: &str,
    ) -> Result<(), CodeGenError> {
        writeln!(ir, "  store ptr {}, ptr {}", value, slot)?;
        writeln!(
            ir,
            "  call void @pycc_gc_write_barrier(ptr {}, ptr {})",
            slot, value
        )?;
        Ok(())
    }

    /// Box a primitive into a heap pointer; pointers pass through.
    pub(super) fn box_value(&mut self, ir: &mut String, v: &Value) -> Result<Value, CodeGenError> {
        match v.kind {
            ValueKind::Ptr => Ok(v.clone()),
            ValueKind::I32 => {
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", wide, v.repr)?;
                let t = self
                    .rt_call(ir, "ptr", "@pycc_box_int", &format!("i64 {}", wide))?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
            ValueKind::F64 => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_box_float", &format!("double {}", v.repr))?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
            ValueKind::I1 => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_box_bool", &format!("i1 {}", v.repr))?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
        }
    }

    /// Unbox a heap pointer into `want`; non-pointer values pass through
    /// unchanged when kinds already agree.
    pub(super) fn unbox_value(
        &mut self,
        ir: &mut String,
        v: &Value,
        want: ValueKind,
    ) -> Result<Value, CodeGenError> {
        if v.kind == want {
            return Ok(v.clone());
        }
        if v.kind != ValueKind::Ptr {
            return Err(CodeGenError::Logic(format!(
                "cannot convert {} to {}",
                v.kind.ir_type(),
                want.ir_type()
            )));
        }
        match want {
            ValueKind::I32 => {
                let wide = self
                    .rt_call(ir, "i64", "@pycc_box_int_value", &format!("ptr {}", v.repr))?
                    .expect("i64");
                let t = self.fresh_temp();
                writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            ValueKind::F64 => {
                let t = self
                    .rt_call(
                        ir,
                        "double",
                        "@pycc_box_float_value",
                        &format!("ptr {}", v.repr),
                    )?
                    .expect("double");
                Ok(Value::new(t, ValueKind::F64))
            }
            ValueKind::I1 => {
                let t = self
                    .rt_call(ir, "i1", "@pycc_box_bool_value", &format!("ptr {}", v.repr))?
                    .expect("i1");
                Ok(Value::new(t, ValueKind::I1))
            }
            ValueKind::Ptr => Ok(v.clone()),
        }
    }

    /// Coerce `v` to an `i1` truth value.
    pub(super) fn truthy(&mut self, ir: &mut String, v: &Value) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        match v.kind {
            ValueKind::I1 => return Ok(v.repr.clone()),
            ValueKind::I32 => writeln!(ir, "  {} = icmp ne i32 {}, 0", t, v.repr)?,
            ValueKind::F64 => writeln!(ir, "  {} = fcmp one double {}, 0.0", t, v.repr)?,
            ValueKind::Ptr => writeln!(ir, "  {} = icmp ne ptr {}, null", t, v.repr)?,
        }
        Ok(t)
    }

    pub(super) fn lower_expr(&mut self, e: &Expr, ir: &mut String) -> Result<Value, CodeGenError> {
        match &e.node {
            ExprNode::Int(v) => Ok(Value::new(v.to_string(), ValueKind::I32)),
            ExprNode::Float(v) => Ok(Value::new(format_f64(*v), ValueKind::F64)),
            ExprNode::Bool(v) => Ok(Value::new(if *v { "true" } else { "false" }, ValueKind::I1)),
            ExprNode::NoneLit => Ok(Value::new("null", ValueKind::Ptr)),
            ExprNode::Str(s) => {
                let s = s.clone();
                self.string_object(ir, &s)
            }
            ExprNode::Bytes(b) => {
                if !b.iter().all(u8::is_ascii) {
                    return Err(CodeGenError::Logic(
                        "non-ASCII bytes literals are not lowered".to_string(),
                    ));
                }
                let b = b.clone();
                let text: String = b.iter().map(|c| *c as char).collect();
                let data = self.cstr_ptr(ir, &text)?;
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_bytes_new",
                        &format!("ptr {}, i64 {}", data, b.len()),
                    )?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
            ExprNode::Name { id, .. } => self.lower_name(ir, id, e.inferred),
            ExprNode::Unary { op, operand } => {
                let op = *op;
                let v = self.lower_expr(operand, ir)?;
                self.lower_unary(ir, op, &v)
            }
            ExprNode::Binary { op, lhs, rhs } => self.lower_binary(ir, *op, lhs, rhs),
            ExprNode::Compare {
                left,
                ops,
                comparators,
            } => self.lower_compare(ir, left, ops, comparators),
            ExprNode::List(els) | ExprNode::Tuple(els) | ExprNode::Set(els) => {
                self.lower_list_literal(ir, els)
            }
            ExprNode::Dict(entries) => self.lower_dict_literal(ir, entries),
            ExprNode::Object(fields) => self.lower_object_literal(ir, fields),
            ExprNode::Subscript { value, index, .. } => {
                self.lower_subscript(ir, value, index, e.inferred)
            }
            ExprNode::Attribute { value, attr, .. } => self.lower_attribute(ir, value, attr),
            ExprNode::Call {
                func,
                args,
                keywords,
            } => {
                if !keywords.is_empty() {
                    return Err(CodeGenError::Logic(
                        "keyword arguments are bound at analysis time; lowering expects positional form".to_string(),
                    ));
                }
                self.lower_call(ir, func, args, e.inferred)
            }
            ExprNode::FString(parts) => self.lower_fstring(ir, parts),
            ExprNode::IfExpr { cond, then, orelse } => self.lower_if_expr(ir, cond, then, orelse),
            ExprNode::NamedExpr { target, value } => {
                let v = self.lower_expr(value, ir)?;
                let target = target.clone();
                self.store_local(ir, &target, &v)?;
                Ok(v)
            }
            ExprNode::Yield { .. } | ExprNode::Await(_) => Err(CodeGenError::Logic(
                "generator and coroutine bodies are not lowered".to_string(),
            )),
            ExprNode::Lambda { .. } | ExprNode::Comprehension { .. } => Err(CodeGenError::Logic(
                "lambda and comprehension lowering is not supported".to_string(),
            )),
            ExprNode::Ellipsis | ExprNode::Imag(_) => Err(CodeGenError::Logic(
                "ellipsis/imaginary literals have no lowering".to_string(),
            )),
        }
    }

    fn lower_name(
        &mut self,
        ir: &mut String,
        id: &str,
        inferred: Option<TypeKind>,
    ) -> Result<Value, CodeGenError> {
        let slot = self
            .slots
            .get(id)
            .cloned()
            .ok_or_else(|| CodeGenError::Logic(format!("no slot for name '{}'", id)))?;
        let t = self.fresh_temp();
        writeln!(ir, "  {} = load {}, ptr {}", t, slot.kind.ir_type(), slot.ptr)?;
        let mut v = Value::new(t, slot.kind);
        v.tag = slot.tag;
        // A union-typed slot is a boxed pointer; a refined use site reads it
        // back at the refined kind.
        if slot.kind == ValueKind::Ptr
            && let Some(k) = inferred
        {
            let want = ValueKind::of(k);
            if want != ValueKind::Ptr {
                return self.unbox_value(ir, &v, want);
            }
            if v.tag == PtrTag::Unknown {
                v.tag = PtrTag::of(k);
            }
        }
        Ok(v)
    }

    fn lower_unary(
        &mut self,
        ir: &mut String,
        op: UnaryOp,
        v: &Value,
    ) -> Result<Value, CodeGenError> {
        let t = self.fresh_temp();
        match (op, v.kind) {
            (UnaryOp::Neg, ValueKind::I32) => writeln!(ir, "  {} = sub i32 0, {}", t, v.repr)?,
            (UnaryOp::Neg, ValueKind::F64) => writeln!(ir, "  {} = fneg double {}", t, v.repr)?,
            (UnaryOp::Pos, _) => return Ok(v.clone()),
            (UnaryOp::BitNot, ValueKind::I32) => {
                writeln!(ir, "  {} = xor i32 {}, -1", t, v.repr)?
            }
            (UnaryOp::Not, _) => {
                let truth = self.truthy(ir, v)?;
                let t2 = self.fresh_temp();
                writeln!(ir, "  {} = xor i1 {}, true", t2, truth)?;
                return Ok(Value::new(t2, ValueKind::I1));
            }
            _ => {
                return Err(CodeGenError::Logic(format!(
                    "unary operator on {}",
                    v.kind.ir_type()
                )))
            }
        }
        Ok(Value::new(t, v.kind))
    }

    fn lower_binary(
        &mut self,
        ir: &mut String,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, CodeGenError> {
        // Short-circuit logic first; operands must not pre-evaluate.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.lower_logic(ir, op, lhs, rhs);
        }
        let l = self.lower_expr(lhs, ir)?;
        let r = self.lower_expr(rhs, ir)?;

        // String forms.
        if l.kind == ValueKind::Ptr && r.kind == ValueKind::Ptr && op == BinaryOp::Add {
            let t = self
                .rt_call(
                    ir,
                    "ptr",
                    "@pycc_string_concat",
                    &format!("ptr {}, ptr {}", l.repr, r.repr),
                )?
                .expect("ptr");
            return Ok(Value::tagged(t, PtrTag::Str));
        }
        if op == BinaryOp::Mul && (l.kind == ValueKind::Ptr) != (r.kind == ValueKind::Ptr) {
            let (s, n) = if l.kind == ValueKind::Ptr { (&l, &r) } else { (&r, &l) };
            let wide = self.fresh_temp();
            writeln!(ir, "  {} = sext i32 {} to i64", wide, n.repr)?;
            let t = self
                .rt_call(
                    ir,
                    "ptr",
                    "@pycc_string_repeat",
                    &format!("ptr {}, i64 {}", s.repr, wide),
                )?
                .expect("ptr");
            return Ok(Value::tagged(t, PtrTag::Str));
        }

        let t = self.fresh_temp();
        match (l.kind, r.kind) {
            (ValueKind::I32, ValueKind::I32) => {
                let inst = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::Mul => "mul",
                    BinaryOp::Div | BinaryOp::FloorDiv => "sdiv",
                    BinaryOp::Mod => "srem",
                    BinaryOp::BitAnd => "and",
                    BinaryOp::BitOr => "or",
                    BinaryOp::BitXor => "xor",
                    BinaryOp::Shl => "shl",
                    BinaryOp::Shr => "ashr",
                    BinaryOp::Pow => {
                        return self.lower_int_pow(ir, &l, &r);
                    }
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                };
                writeln!(ir, "  {} = {} i32 {}, {}", t, inst, l.repr, r.repr)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            (ValueKind::F64, ValueKind::F64) => {
                let inst = match op {
                    BinaryOp::Add => "fadd",
                    BinaryOp::Sub => "fsub",
                    BinaryOp::Mul => "fmul",
                    BinaryOp::Div => "fdiv",
                    BinaryOp::Pow => {
                        writeln!(
                            ir,
                            "  {} = call double @llvm.pow.f64(double {}, double {})",
                            t, l.repr, r.repr
                        )?;
                        return Ok(Value::new(t, ValueKind::F64));
                    }
                    BinaryOp::FloorDiv => {
                        writeln!(ir, "  {} = fdiv double {}, {}", t, l.repr, r.repr)?;
                        let t2 = self.fresh_temp();
                        writeln!(ir, "  {} = call double @llvm.floor.f64(double {})", t2, t)?;
                        return Ok(Value::new(t2, ValueKind::F64));
                    }
                    _ => {
                        return Err(CodeGenError::Logic(format!(
                            "float operator '{}'",
                            op.symbol()
                        )))
                    }
                };
                writeln!(ir, "  {} = {} double {}, {}", t, inst, l.repr, r.repr)?;
                Ok(Value::new(t, ValueKind::F64))
            }
            _ => Err(CodeGenError::Logic(format!(
                "operator '{}' on {} and {}",
                op.symbol(),
                l.kind.ir_type(),
                r.kind.ir_type()
            ))),
        }
    }

    fn lower_int_pow(
        &mut self,
        ir: &mut String,
        l: &Value,
        r: &Value,
    ) -> Result<Value, CodeGenError> {
        let base = self.fresh_temp();
        writeln!(ir, "  {} = sitofp i32 {} to double", base, l.repr)?;
        let powed = self.fresh_temp();
        writeln!(
            ir,
            "  {} = call double @llvm.powi.f64.i32(double {}, i32 {})",
            powed, base, r.repr
        )?;
        let t = self.fresh_temp();
        writeln!(ir, "  {} = fptosi double {} to i32", t, powed)?;
        Ok(Value::new(t, ValueKind::I32))
    }

    fn lower_logic(
        &mut self,
        ir: &mut String,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, CodeGenError> {
        let l = self.lower_expr(lhs, ir)?;
        let lt = self.truthy(ir, &l)?;
        let rhs_label = self.fresh_label("logic.rhs");
        let end_label = self.fresh_label("logic.end");
        let entry = self.fresh_label("logic.lhs");
        // Pin the incoming block name so the phi edge is well-defined.
        writeln!(ir, "  br label %{}", entry)?;
        writeln!(ir, "{}:", entry)?;
        match op {
            BinaryOp::And => writeln!(
                ir,
                "  br i1 {}, label %{}, label %{}",
                lt, rhs_label, end_label
            )?,
            BinaryOp::Or => writeln!(
                ir,
                "  br i1 {}, label %{}, label %{}",
                lt, end_label, rhs_label
            )?,
            _ => unreachable!(),
        }
        writeln!(ir, "{}:", rhs_label)?;
        let r = self.lower_expr(rhs, ir)?;
        let rt = self.truthy(ir, &r)?;
        let rhs_exit = self.fresh_label("logic.rhs.end");
        writeln!(ir, "  br label %{}", rhs_exit)?;
        writeln!(ir, "{}:", rhs_exit)?;
        writeln!(ir, "  br label %{}", end_label)?;
        writeln!(ir, "{}:", end_label)?;
        let t = self.fresh_temp();
        let short_val = if op == BinaryOp::And { "false" } else { "true" };
        writeln!(
            ir,
            "  {} = phi i1 [ {}, %{} ], [ {}, %{} ]",
            t, short_val, entry, rt, rhs_exit
        )?;
        Ok(Value::new(t, ValueKind::I1))
    }

    fn lower_compare(
        &mut self,
        ir: &mut String,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let mut prev = self.lower_expr(left, ir)?;
        let mut acc: Option<String> = None;
        for (op, rhs) in ops.iter().zip(comparators) {
            let cur = self.lower_expr(rhs, ir)?;
            let pair = self.lower_compare_pair(ir, *op, &prev, &cur)?;
            acc = Some(match acc {
                None => pair,
                Some(a) => {
                    let t = self.fresh_temp();
                    writeln!(ir, "  {} = and i1 {}, {}", t, a, pair)?;
                    t
                }
            });
            prev = cur;
        }
        Ok(Value::new(acc.expect("non-empty chain"), ValueKind::I1))
    }

    fn lower_compare_pair(
        &mut self,
        ir: &mut String,
        op: CmpOp,
        l: &Value,
        r: &Value,
    ) -> Result<String, CodeGenError> {
        // Membership over strings is substring containment.
        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            if l.kind == ValueKind::Ptr && r.kind == ValueKind::Ptr {
                let t = self
                    .rt_call(
                        ir,
                        "i1",
                        "@pycc_string_contains",
                        &format!("ptr {}, ptr {}", r.repr, l.repr),
                    )?
                    .expect("i1");
                if op == CmpOp::NotIn {
                    let t2 = self.fresh_temp();
                    writeln!(ir, "  {} = xor i1 {}, true", t2, t)?;
                    return Ok(t2);
                }
                return Ok(t);
            }
            // Unsupported membership form degrades to constant false.
            let t = self.fresh_temp();
            writeln!(ir, "  {} = add i1 false, false", t)?;
            return Ok(t);
        }

        let t = self.fresh_temp();
        match (l.kind, r.kind) {
            (ValueKind::I32, ValueKind::I32) | (ValueKind::I1, ValueKind::I1) => {
                let cond = match op {
                    CmpOp::Eq | CmpOp::Is => "eq",
                    CmpOp::NotEq | CmpOp::IsNot => "ne",
                    CmpOp::Lt => "slt",
                    CmpOp::LtE => "sle",
                    CmpOp::Gt => "sgt",
                    CmpOp::GtE => "sge",
                    _ => unreachable!(),
                };
                let ty = l.kind.ir_type();
                writeln!(ir, "  {} = icmp {} {} {}, {}", t, cond, ty, l.repr, r.repr)?;
            }
            (ValueKind::F64, ValueKind::F64) => {
                let cond = match op {
                    CmpOp::Eq | CmpOp::Is => "oeq",
                    CmpOp::NotEq | CmpOp::IsNot => "one",
                    CmpOp::Lt => "olt",
                    CmpOp::LtE => "ole",
                    CmpOp::Gt => "ogt",
                    CmpOp::GtE => "oge",
                    _ => unreachable!(),
                };
                writeln!(ir, "  {} = fcmp {} double {}, {}", t, cond, l.repr, r.repr)?;
            }
            (ValueKind::Ptr, ValueKind::Ptr) => {
                // String equality is by content when both sides carry the
                // string tag; identity otherwise.
                if matches!(op, CmpOp::Eq | CmpOp::NotEq)
                    && l.tag == PtrTag::Str
                    && r.tag == PtrTag::Str
                {
                    let eq = self
                        .rt_call(
                            ir,
                            "i1",
                            "@pycc_string_eq",
                            &format!("ptr {}, ptr {}", l.repr, r.repr),
                        )?
                        .expect("i1");
                    if op == CmpOp::NotEq {
                        let t2 = self.fresh_temp();
                        writeln!(ir, "  {} = xor i1 {}, true", t2, eq)?;
                        return Ok(t2);
                    }
                    return Ok(eq);
                }
                let cond = match op {
                    CmpOp::Eq | CmpOp::Is => "eq",
                    CmpOp::NotEq | CmpOp::IsNot => "ne",
                    _ => {
                        return Err(CodeGenError::Logic(
                            "ordered comparison on pointers".to_string(),
                        ))
                    }
                };
                writeln!(ir, "  {} = icmp {} ptr {}, {}", t, cond, l.repr, r.repr)?;
            }
            // None tests against a primitive refine to a constant.
            (ValueKind::Ptr, _) | (_, ValueKind::Ptr) => {
                let (p, _) = if l.kind == ValueKind::Ptr { (l, r) } else { (r, l) };
                let cond = match op {
                    CmpOp::Eq | CmpOp::Is => "eq",
                    CmpOp::NotEq | CmpOp::IsNot => "ne",
                    _ => {
                        return Err(CodeGenError::Logic(
                            "mixed pointer/primitive comparison".to_string(),
                        ))
                    }
                };
                writeln!(ir, "  {} = icmp {} ptr {}, null", t, cond, p.repr)?;
            }
            _ => {
                return Err(CodeGenError::Logic(format!(
                    "comparison between {} and {}",
                    l.kind.ir_type(),
                    r.kind.ir_type()
                )))
            }
        }
        Ok(t)
    }

    fn lower_list_literal(
        &mut self,
        ir: &mut String,
        els: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let list = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_list_new",
                &format!("i64 {}", els.len().max(4)),
            )?
            .expect("ptr");
        let slot = self.scoped_root(ir)?;
        self.store_rooted(ir, &slot, &list)?;
        for el in els {
            let v = self.lower_expr(el, ir)?;
            let boxed = self.box_value(ir, &v)?;
            self.rt_call(
                ir,
                "void",
                "@pycc_list_push",
                &format!("ptr {}, ptr {}", slot, boxed.repr),
            )?;
        }
        let t = self.fresh_temp();
        writeln!(ir, "  {} = load ptr, ptr {}", t, slot)?;
        Ok(Value::tagged(t, PtrTag::List))
    }

    fn lower_dict_literal(
        &mut self,
        ir: &mut String,
        entries: &[DictEntry],
    ) -> Result<Value, CodeGenError> {
        let dict = self
            .rt_call(ir, "ptr", "@pycc_dict_new", "i64 8")?
            .expect("ptr");
        let slot = self.scoped_root(ir)?;
        self.store_rooted(ir, &slot, &dict)?;
        for entry in entries {
            let DictEntry::KeyValue { key, value } = entry else {
                return Err(CodeGenError::Logic(
                    "dict unpack entries are not lowered".to_string(),
                ));
            };
            let k = self.lower_expr(key, ir)?;
            let v = self.lower_expr(value, ir)?;
            let boxed = self.box_value(ir, &v)?;
            self.rt_call(
                ir,
                "void",
                "@pycc_dict_set",
                &format!("ptr {}, ptr {}, ptr {}", slot, k.repr, boxed.repr),
            )?;
        }
        let t = self.fresh_temp();
        writeln!(ir, "  {} = load ptr, ptr {}", t, slot)?;
        Ok(Value::tagged(t, PtrTag::Dict))
    }

    fn lower_object_literal(
        &mut self,
        ir: &mut String,
        fields: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let obj = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_object_new",
                &format!("i64 {}", fields.len()),
            )?
            .expect("ptr");
        let slot = self.scoped_root(ir)?;
        self.store_rooted(ir, &slot, &obj)?;
        for (i, field) in fields.iter().enumerate() {
            let v = self.lower_expr(field, ir)?;
            let boxed = self.box_value(ir, &v)?;
            let cur = self.fresh_temp();
            writeln!(ir, "  {} = load ptr, ptr {}", cur, slot)?;
            self.rt_call(
                ir,
                "void",
                "@pycc_object_set",
                &format!("ptr {}, i64 {}, ptr {}", cur, i, boxed.repr),
            )?;
        }
        let t = self.fresh_temp();
        writeln!(ir, "  {} = load ptr, ptr {}", t, slot)?;
        Ok(Value::tagged(t, PtrTag::Object))
    }

    fn lower_subscript(
        &mut self,
        ir: &mut String,
        value: &Expr,
        index: &Expr,
        inferred: Option<TypeKind>,
    ) -> Result<Value, CodeGenError> {
        let base = self.lower_expr(value, ir)?;
        match base.tag {
            PtrTag::Str => {
                let idx = self.lower_expr(index, ir)?;
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", wide, idx.repr)?;
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_string_slice",
                        &format!("ptr {}, i64 {}, i64 1", base.repr, wide),
                    )?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            PtrTag::Dict => {
                let key = self.lower_expr(index, ir)?;
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_dict_get",
                        &format!("ptr {}, ptr {}", base.repr, key.repr),
                    )?
                    .expect("ptr");
                let v = Value::new(t, ValueKind::Ptr);
                self.narrow_to_inferred(ir, v, inferred)
            }
            _ => {
                // Lists, tuples, and unknown-tagged pointers go through the
                // list path.
                let idx = self.lower_expr(index, ir)?;
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", wide, idx.repr)?;
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_list_get",
                        &format!("ptr {}, i64 {}", base.repr, wide),
                    )?
                    .expect("ptr");
                let v = Value::new(t, ValueKind::Ptr);
                self.narrow_to_inferred(ir, v, inferred)
            }
        }
    }

    /// Unbox a freshly loaded element down to the kind sema inferred for
    /// the expression, when it is a primitive.
    fn narrow_to_inferred(
        &mut self,
        ir: &mut String,
        v: Value,
        inferred: Option<TypeKind>,
    ) -> Result<Value, CodeGenError> {
        match inferred {
            Some(k) => {
                let want = ValueKind::of(k);
                if want == ValueKind::Ptr {
                    let mut out = v;
                    out.tag = PtrTag::of(k);
                    Ok(out)
                } else {
                    self.unbox_value(ir, &v, want)
                }
            }
            None => Ok(v),
        }
    }

    fn lower_attribute(
        &mut self,
        ir: &mut String,
        value: &Expr,
        attr: &str,
    ) -> Result<Value, CodeGenError> {
        // Typed module attributes have constant or shim lowerings.
        if let Some(module) = value.as_name()
            && self.ctx.modules.contains(module)
        {
            return self.lower_module_attr(ir, module, attr);
        }
        let base = self.lower_expr(value, ir)?;
        let key = self.string_object(ir, attr)?;
        let t = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_object_get_attr",
                &format!("ptr {}, ptr {}", base.repr, key.repr),
            )?
            .expect("ptr");
        Ok(Value::new(t, ValueKind::Ptr))
    }

    fn lower_module_attr(
        &mut self,
        ir: &mut String,
        module: &str,
        attr: &str,
    ) -> Result<Value, CodeGenError> {
        match (module, attr) {
            ("math", "pi") => Ok(Value::new("0x400921FB54442D18", ValueKind::F64)),
            ("math", "e") => Ok(Value::new("0x4005BF0A8B145769", ValueKind::F64)),
            ("math", "tau") => Ok(Value::new("0x401921FB54442D18", ValueKind::F64)),
            ("math", "inf") => Ok(Value::new("0x7FF0000000000000", ValueKind::F64)),
            ("math", "nan") => Ok(Value::new("0x7FF8000000000000", ValueKind::F64)),
            ("sys", "maxsize") => {
                let wide = self
                    .rt_call(ir, "i64", "@pycc_sys_maxsize", "")?
                    .expect("i64");
                let t = self.fresh_temp();
                writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            ("sys", "platform") => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_sys_platform", "")?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("sys", "version") => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_sys_version", "")?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("errno", name) => match errno_value(name) {
                Some(v) => Ok(Value::new(v.to_string(), ValueKind::I32)),
                None => Err(CodeGenError::Logic(format!(
                    "unknown errno constant '{}'",
                    name
                ))),
            },
            _ => Err(CodeGenError::Logic(format!(
                "module attribute {}.{} has no lowering",
                module, attr
            ))),
        }
    }

    fn lower_if_expr(
        &mut self,
        ir: &mut String,
        cond: &Expr,
        then: &Expr,
        orelse: &Expr,
    ) -> Result<Value, CodeGenError> {
        let c = self.lower_expr(cond, ir)?;
        let ct = self.truthy(ir, &c)?;
        let then_label = self.fresh_label("sel.then");
        let else_label = self.fresh_label("sel.else");
        let end_label = self.fresh_label("sel.end");
        writeln!(
            ir,
            "  br i1 {}, label %{}, label %{}",
            ct, then_label, else_label
        )?;
        writeln!(ir, "{}:", then_label)?;
        let tv = self.lower_expr(then, ir)?;
        let then_exit = self.fresh_label("sel.then.end");
        writeln!(ir, "  br label %{}", then_exit)?;
        writeln!(ir, "{}:", then_exit)?;
        writeln!(ir, "  br label %{}", end_label)?;
        writeln!(ir, "{}:", else_label)?;
        let ev = self.lower_expr(orelse, ir)?;
        let else_exit = self.fresh_label("sel.else.end");
        writeln!(ir, "  br label %{}", else_exit)?;
        writeln!(ir, "{}:", else_exit)?;
        writeln!(ir, "  br label %{}", end_label)?;
        writeln!(ir, "{}:", end_label)?;
        if tv.kind != ev.kind {
            return Err(CodeGenError::Logic(
                "conditional expression branches disagree on kind".to_string(),
            ));
        }
        let t = self.fresh_temp();
        writeln!(
            ir,
            "  {} = phi {} [ {}, %{} ], [ {}, %{} ]",
            t,
            tv.kind.ir_type(),
            tv.repr,
            then_exit,
            ev.repr,
            else_exit
        )?;
        Ok(Value::new(t, tv.kind))
    }

    fn lower_fstring(
        &mut self,
        ir: &mut String,
        parts: &[FStringPart],
    ) -> Result<Value, CodeGenError> {
        let mut acc: Option<Value> = None;
        for part in parts {
            let piece = match part {
                FStringPart::Text(text) => {
                    let text = text.clone();
                    self.string_object(ir, &text)?
                }
                FStringPart::Expr(e) => {
                    let v = self.lower_expr(e, ir)?;
                    self.stringify(ir, &v)?
                }
            };
            acc = Some(match acc {
                None => piece,
                Some(prev) => {
                    let t = self
                        .rt_call(
                            ir,
                            "ptr",
                            "@pycc_string_concat",
                            &format!("ptr {}, ptr {}", prev.repr, piece.repr),
                        )?
                        .expect("ptr");
                    Value::tagged(t, PtrTag::Str)
                }
            });
        }
        match acc {
            Some(v) => Ok(v),
            None => self.string_object(ir, ""),
        }
    }

    /// Convert a value to a runtime string object.
    pub(super) fn stringify(&mut self, ir: &mut String, v: &Value) -> Result<Value, CodeGenError> {
        match v.kind {
            ValueKind::Ptr => Ok(v.clone()),
            ValueKind::I32 => {
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", wide, v.repr)?;
                let t = self
                    .rt_call(ir, "ptr", "@pycc_int_to_string", &format!("i64 {}", wide))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ValueKind::I1 => {
                let wide = self.fresh_temp();
                writeln!(ir, "  {} = zext i1 {} to i64", wide, v.repr)?;
                let t = self
                    .rt_call(ir, "ptr", "@pycc_int_to_string", &format!("i64 {}", wide))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ValueKind::F64 => {
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_float_to_string",
                        &format!("double {}", v.repr),
                    )?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
        }
    }
}

/// Format an f64 so LLVM parses it back exactly.
pub(super) fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.is_finite() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("0x{:016X}", v.to_bits())
    }
}
