//! Call-site lowering: builtins, user functions, class constructors,
//! method calls, and the typed stdlib shim surface.

use crate::ast::{Expr, TypeKind};
use super::state::{CodeGen, PtrTag, Value, ValueKind};
use super::CodeGenError;
use crate::sema::sig::Signature;
use std::fmt::Write as _;

impl CodeGen<'_> {
    pub(super) fn lower_call(
        &mut self,
        ir: &mut String,
        func: &Expr,
        args: &[Expr],
        inferred: Option<TypeKind>,
    ) -> Result<Value, CodeGenError> {
        if let Some(name) = func.as_name() {
            if let Some(v) = self.lower_builtin_call(ir, name, args)? {
                return Ok(v);
            }
            if self.ctx.signatures.contains_key(name) {
                let name = name.to_string();
                return self.lower_user_call(ir, &name, args);
            }
            if let Some(candidates) = self.ctx.poly_aliases.get(name) {
                let resolved: Vec<String> = candidates
                    .iter()
                    .filter(|c| self.ctx.signatures.contains_key(*c))
                    .cloned()
                    .collect();
                if resolved.len() == 1 {
                    return self.lower_user_call(ir, &resolved[0], args);
                }
                return Err(CodeGenError::Logic(format!(
                    "call through ambiguous alias '{}'",
                    name
                )));
            }
            if self.ctx.classes.contains_key(name) {
                let name = name.to_string();
                return self.lower_constructor(ir, &name, args);
            }
            return Err(CodeGenError::Logic(format!(
                "call to unknown function '{}'",
                name
            )));
        }

        if let crate::ast::ExprNode::Attribute { value, attr, .. } = &func.node {
            if let Some(base) = value.as_name() {
                if self.ctx.modules.contains(base) {
                    let (base, attr) = (base.to_string(), attr.clone());
                    return self.lower_module_call(ir, &base, &attr, args, inferred);
                }
                // ClassName.method(receiver, ...) direct dispatch.
                if self.ctx.classes.contains_key(base) {
                    let label = format!("{}.{}", base, attr);
                    return self.lower_method_call(ir, base, attr, &label, None, args);
                }
                // receiver.method(...) through a tracked class binding.
                if let Some(class_name) = self.class_bindings.get(base).cloned() {
                    let attr = attr.clone();
                    let label = format!("{}.{}", class_name, attr);
                    let receiver = value.as_ref().clone();
                    return self.lower_method_call(
                        ir,
                        &class_name,
                        &attr,
                        &label,
                        Some(&receiver),
                        args,
                    );
                }
            }
            return Err(CodeGenError::Logic(format!(
                "attribute call '{}' has no static target",
                attr
            )));
        }

        Err(CodeGenError::Logic("unsupported call target".to_string()))
    }

    fn lower_builtin_call(
        &mut self,
        ir: &mut String,
        name: &str,
        args: &[Expr],
    ) -> Result<Option<Value>, CodeGenError> {
        match name {
            "len" => {
                let v = self.lower_expr(&args[0], ir)?;
                let callee = match v.tag {
                    PtrTag::List => "@pycc_list_len",
                    PtrTag::Dict => "@pycc_dict_len",
                    _ => "@pycc_string_len",
                };
                let wide = self
                    .rt_call(ir, "i64", callee, &format!("ptr {}", v.repr))?
                    .expect("i64");
                let t = self.fresh_temp();
                writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                Ok(Some(Value::new(t, ValueKind::I32)))
            }
            "print" => {
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        let sep = self.string_object(ir, " ")?;
                        self.rt_call(
                            ir,
                            "void",
                            "@pycc_io_write_stdout",
                            &format!("ptr {}", sep.repr),
                        )?;
                    }
                    let v = self.lower_expr(a, ir)?;
                    let s = self.stringify(ir, &v)?;
                    self.rt_call(
                        ir,
                        "void",
                        "@pycc_io_write_stdout",
                        &format!("ptr {}", s.repr),
                    )?;
                }
                let nl = self.string_object(ir, "\n")?;
                self.rt_call(
                    ir,
                    "void",
                    "@pycc_io_write_stdout",
                    &format!("ptr {}", nl.repr),
                )?;
                Ok(Some(Value::new("null", ValueKind::Ptr)))
            }
            "str" => {
                let v = self.lower_expr(&args[0], ir)?;
                Ok(Some(self.stringify(ir, &v)?))
            }
            "int" => {
                let v = self.lower_expr(&args[0], ir)?;
                let t = self.fresh_temp();
                match v.kind {
                    ValueKind::I32 => Ok(Some(v)),
                    ValueKind::F64 => {
                        writeln!(ir, "  {} = fptosi double {} to i32", t, v.repr)?;
                        Ok(Some(Value::new(t, ValueKind::I32)))
                    }
                    ValueKind::I1 => {
                        writeln!(ir, "  {} = zext i1 {} to i32", t, v.repr)?;
                        Ok(Some(Value::new(t, ValueKind::I32)))
                    }
                    ValueKind::Ptr => {
                        let wide = self
                            .rt_call(
                                ir,
                                "i64",
                                "@pycc_string_to_int",
                                &format!("ptr {}", v.repr),
                            )?
                            .expect("i64");
                        writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                        Ok(Some(Value::new(t, ValueKind::I32)))
                    }
                }
            }
            "float" => {
                let v = self.lower_expr(&args[0], ir)?;
                match v.kind {
                    ValueKind::F64 => Ok(Some(v)),
                    ValueKind::I32 => {
                        let t = self.fresh_temp();
                        writeln!(ir, "  {} = sitofp i32 {} to double", t, v.repr)?;
                        Ok(Some(Value::new(t, ValueKind::F64)))
                    }
                    _ => Err(CodeGenError::Logic("float() of non-numeric".to_string())),
                }
            }
            "bool" => {
                let v = self.lower_expr(&args[0], ir)?;
                let t = self.truthy(ir, &v)?;
                Ok(Some(Value::new(t, ValueKind::I1)))
            }
            "abs" => {
                let v = self.lower_expr(&args[0], ir)?;
                match v.kind {
                    ValueKind::I32 => {
                        let neg = self.fresh_temp();
                        writeln!(ir, "  {} = sub i32 0, {}", neg, v.repr)?;
                        let is_neg = self.fresh_temp();
                        writeln!(ir, "  {} = icmp slt i32 {}, 0", is_neg, v.repr)?;
                        let t = self.fresh_temp();
                        writeln!(
                            ir,
                            "  {} = select i1 {}, i32 {}, i32 {}",
                            t, is_neg, neg, v.repr
                        )?;
                        Ok(Some(Value::new(t, ValueKind::I32)))
                    }
                    ValueKind::F64 => {
                        let neg = self.fresh_temp();
                        writeln!(ir, "  {} = fneg double {}", neg, v.repr)?;
                        let is_neg = self.fresh_temp();
                        writeln!(ir, "  {} = fcmp olt double {}, 0.0", is_neg, v.repr)?;
                        let t = self.fresh_temp();
                        writeln!(
                            ir,
                            "  {} = select i1 {}, double {}, double {}",
                            t, is_neg, neg, v.repr
                        )?;
                        Ok(Some(Value::new(t, ValueKind::F64)))
                    }
                    _ => Err(CodeGenError::Logic("abs() of non-numeric".to_string())),
                }
            }
            "isinstance" => {
                // Sema already refined; the residual value is static.
                let inferred = args[0].inferred;
                let check = args[1].as_name().unwrap_or("");
                let result = match (inferred, check) {
                    (Some(k), name) => k.name() == name,
                    _ => {
                        return Err(CodeGenError::Logic(
                            "dynamic isinstance is not lowered".to_string(),
                        ))
                    }
                };
                Ok(Some(Value::new(
                    if result { "true" } else { "false" },
                    ValueKind::I1,
                )))
            }
            "range" => Err(CodeGenError::Logic(
                "range() outside a for-loop header".to_string(),
            )),
            _ => Ok(None),
        }
    }

    pub(super) fn lower_user_call(
        &mut self,
        ir: &mut String,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let sig = self.ctx.signatures[name].clone();
        let (arg_list, arg_tags) = self.lower_call_args(ir, &sig, args, None)?;
        let symbol = format!("@{}", Self::mangle(name));
        let ret_kind = ValueKind::of(sig.return_kind);
        let ret_ty = if sig.return_kind == TypeKind::NoneType {
            "void"
        } else {
            ret_kind.ir_type()
        };
        let dest = self.rt_call(ir, ret_ty, &symbol, &arg_list)?;
        self.emit_exception_forward(ir)?;
        let mut out = match dest {
            Some(d) => Value::new(d, ret_kind),
            None => Value::new("null", ValueKind::Ptr),
        };
        // Interprocedural pointer-tag forwarding: a function returning its
        // own parameter hands back that argument's tag.
        if out.kind == ValueKind::Ptr {
            out.tag = PtrTag::of(sig.return_kind);
            if let Some(&idx) = self.analysis.return_param_idx.get(name)
                && let Some(tag) = arg_tags.get(idx)
                && *tag != PtrTag::Unknown
            {
                out.tag = *tag;
            }
        }
        Ok(out)
    }

    fn lower_method_call(
        &mut self,
        ir: &mut String,
        class_name: &str,
        method: &str,
        label: &str,
        receiver: Option<&Expr>,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let info = self
            .ctx
            .classes
            .get(class_name)
            .ok_or_else(|| CodeGenError::Logic(format!("unknown class '{}'", class_name)))?;
        let sig = info
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| CodeGenError::Logic(format!("unknown method '{}'", label)))?;
        let recv_val = match receiver {
            Some(r) => Some(self.lower_expr(r, ir)?),
            None => None,
        };
        let (arg_list, _) = self.lower_call_args(ir, &sig, args, recv_val)?;
        let symbol = format!("@{}", Self::mangle(label));
        let ret_kind = ValueKind::of(sig.return_kind);
        let ret_ty = if sig.return_kind == TypeKind::NoneType {
            "void"
        } else {
            ret_kind.ir_type()
        };
        let dest = self.rt_call(ir, ret_ty, &symbol, &arg_list)?;
        self.emit_exception_forward(ir)?;
        Ok(match dest {
            Some(d) => {
                let mut v = Value::new(d, ret_kind);
                if v.kind == ValueKind::Ptr {
                    v.tag = PtrTag::of(sig.return_kind);
                }
                v
            }
            None => Value::new("null", ValueKind::Ptr),
        })
    }

    fn lower_constructor(
        &mut self,
        ir: &mut String,
        class_name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let info = self.ctx.classes[class_name].clone();
        let obj = self
            .rt_call(
                ir,
                "ptr",
                "@pycc_object_new",
                &format!("i64 {}", info.attribute_kinds.len()),
            )?
            .expect("ptr");
        let slot = self.scoped_root(ir)?;
        self.store_rooted(ir, &slot, &obj)?;
        if info.methods.contains_key("__init__") {
            let sig = info.methods["__init__"].clone();
            let recv = Value::tagged(obj.clone(), PtrTag::Object);
            let (arg_list, _) = self.lower_call_args(ir, &sig, args, Some(recv))?;
            let symbol = format!("@{}", Self::mangle(&format!("{}.__init__", class_name)));
            self.rt_call(ir, "void", &symbol, &arg_list)?;
            self.emit_exception_forward(ir)?;
        }
        let t = self.fresh_temp();
        writeln!(ir, "  {} = load ptr, ptr {}", t, slot)?;
        Ok(Value::tagged(t, PtrTag::Object))
    }

    /// Lower positional arguments, coercing each to its declared parameter
    /// kind. `receiver` is prepended when present (method calls).
    fn lower_call_args(
        &mut self,
        ir: &mut String,
        sig: &Signature,
        args: &[Expr],
        receiver: Option<Value>,
    ) -> Result<(String, Vec<PtrTag>), CodeGenError> {
        let mut parts: Vec<String> = Vec::new();
        let mut tags: Vec<PtrTag> = Vec::new();
        let skip = usize::from(receiver.is_some());
        if let Some(r) = receiver {
            parts.push(format!("ptr {}", r.repr));
            tags.push(r.tag);
        }
        for (i, a) in args.iter().enumerate() {
            let v = self.lower_expr(a, ir)?;
            let want = sig
                .param_kinds
                .get(i + skip)
                .copied()
                .map(ValueKind::of)
                .unwrap_or(v.kind);
            let coerced = if want == ValueKind::Ptr && v.kind != ValueKind::Ptr {
                self.box_value(ir, &v)?
            } else if want != ValueKind::Ptr && v.kind == ValueKind::Ptr {
                self.unbox_value(ir, &v, want)?
            } else {
                v
            };
            tags.push(coerced.tag);
            parts.push(format!("{} {}", coerced.kind.ir_type(), coerced.repr));
        }
        Ok((parts.join(", "), tags))
    }

    fn lower_module_call(
        &mut self,
        ir: &mut String,
        module: &str,
        func: &str,
        args: &[Expr],
        _inferred: Option<TypeKind>,
    ) -> Result<Value, CodeGenError> {
        match (module, func) {
            ("math", "sqrt") => self.f64_intrinsic(ir, "@llvm.sqrt.f64", args),
            ("math", "pow") => {
                let a = self.lower_f64_arg(ir, &args[0])?;
                let b = self.lower_f64_arg(ir, &args[1])?;
                let t = self.fresh_temp();
                writeln!(
                    ir,
                    "  {} = call double @llvm.pow.f64(double {}, double {})",
                    t, a, b
                )?;
                Ok(Value::new(t, ValueKind::F64))
            }
            ("math", "floor") | ("math", "ceil") => {
                let intrinsic = if func == "floor" {
                    "@llvm.floor.f64"
                } else {
                    "@llvm.ceil.f64"
                };
                let v = self.f64_intrinsic(ir, intrinsic, args)?;
                let t = self.fresh_temp();
                writeln!(ir, "  {} = fptosi double {} to i32", t, v.repr)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            ("subprocess", "run" | "call" | "check_call") => {
                let cmd = self.lower_expr(&args[0], ir)?;
                let symbol = format!("@pycc_subprocess_{}", func);
                let t = self
                    .rt_call(ir, "i32", &symbol, &format!("ptr {}", cmd.repr))?
                    .expect("i32");
                if func == "check_call" {
                    self.emit_exception_forward(ir)?;
                }
                Ok(Value::new(t, ValueKind::I32))
            }
            ("sys", "exit") => {
                let code = self.lower_expr(&args[0], ir)?;
                self.rt_call(ir, "void", "@pycc_sys_exit", &format!("i32 {}", code.repr))?;
                Ok(Value::new("null", ValueKind::Ptr))
            }
            ("time", "sleep") => {
                let secs = self.lower_f64_arg(ir, &args[0])?;
                self.rt_call(
                    ir,
                    "void",
                    "@pycc_time_sleep",
                    &format!("double {}", secs),
                )?;
                Ok(Value::new("null", ValueKind::Ptr))
            }
            ("time", "time") => {
                let ms = self
                    .rt_call(ir, "i64", "@pycc_os_time_ms", "")?
                    .expect("i64");
                let f = self.fresh_temp();
                writeln!(ir, "  {} = sitofp i64 {} to double", f, ms)?;
                let t = self.fresh_temp();
                writeln!(ir, "  {} = fdiv double {}, 1.0e3", t, f)?;
                Ok(Value::new(t, ValueKind::F64))
            }
            ("os", "getcwd") => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_os_getcwd", "")?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("os", "getenv") => {
                let name = self.lower_cstr_arg(ir, &args[0])?;
                let t = self
                    .rt_call(ir, "ptr", "@pycc_os_getenv", &format!("ptr {}", name))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("os", "mkdir") => {
                let path = self.lower_cstr_arg(ir, &args[0])?;
                let t = self
                    .rt_call(
                        ir,
                        "i1",
                        "@pycc_os_mkdir",
                        &format!("ptr {}, i32 511", path),
                    )?
                    .expect("i1");
                Ok(Value::new(t, ValueKind::I1))
            }
            ("os", "remove") => {
                let path = self.lower_cstr_arg(ir, &args[0])?;
                let t = self
                    .rt_call(ir, "i1", "@pycc_os_remove", &format!("ptr {}", path))?
                    .expect("i1");
                Ok(Value::new(t, ValueKind::I1))
            }
            ("os", "rename") => {
                let src = self.lower_cstr_arg(ir, &args[0])?;
                let dst = self.lower_cstr_arg(ir, &args[1])?;
                let t = self
                    .rt_call(
                        ir,
                        "i1",
                        "@pycc_os_rename",
                        &format!("ptr {}, ptr {}", src, dst),
                    )?
                    .expect("i1");
                Ok(Value::new(t, ValueKind::I1))
            }
            ("random", "random") => {
                let t = self
                    .rt_call(ir, "double", "@pycc_random_random", "")?
                    .expect("double");
                Ok(Value::new(t, ValueKind::F64))
            }
            ("random", "randint") => {
                let a = self.lower_i64_arg(ir, &args[0])?;
                let b = self.lower_i64_arg(ir, &args[1])?;
                let wide = self
                    .rt_call(
                        ir,
                        "i64",
                        "@pycc_random_randint",
                        &format!("i64 {}, i64 {}", a, b),
                    )?
                    .expect("i64");
                let t = self.fresh_temp();
                writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            ("secrets", "token_hex") => {
                let n = self.lower_i64_arg(ir, &args[0])?;
                let t = self
                    .rt_call(ir, "ptr", "@pycc_secrets_token_hex", &format!("i64 {}", n))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("uuid", "uuid4") => {
                let t = self
                    .rt_call(ir, "ptr", "@pycc_uuid_uuid4", "")?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("base64", "b64encode" | "b64decode") | ("binascii", "hexlify" | "unhexlify") => {
                let v = self.lower_expr(&args[0], ir)?;
                let symbol = format!("@pycc_{}_{}", module, func);
                let t = self
                    .rt_call(ir, "ptr", &symbol, &format!("ptr {}", v.repr))?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
            ("hashlib", "sha256" | "sha512") => {
                let v = self.lower_expr(&args[0], ir)?;
                let symbol = format!("@pycc_hashlib_{}", func);
                let t = self
                    .rt_call(ir, "ptr", &symbol, &format!("ptr {}", v.repr))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("hmac", "digest") => {
                let k = self.lower_expr(&args[0], ir)?;
                let m = self.lower_expr(&args[1], ir)?;
                let d = self.lower_expr(&args[2], ir)?;
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        "@pycc_hmac_digest",
                        &format!("ptr {}, ptr {}, ptr {}", k.repr, m.repr, d.repr),
                    )?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("json", "dumps") => {
                let v = self.lower_expr(&args[0], ir)?;
                let callee = match v.tag {
                    PtrTag::Dict => "@pycc_json_dump_dict",
                    _ => "@pycc_json_dump_list",
                };
                let t = self
                    .rt_call(ir, "ptr", callee, &format!("ptr {}", v.repr))?
                    .expect("ptr");
                Ok(Value::tagged(t, PtrTag::Str))
            }
            ("struct", "calcsize") => {
                let fmt = self.lower_expr(&args[0], ir)?;
                let wide = self
                    .rt_call(
                        ir,
                        "i64",
                        "@pycc_struct_calcsize",
                        &format!("ptr {}", fmt.repr),
                    )?
                    .expect("i64");
                let t = self.fresh_temp();
                writeln!(ir, "  {} = trunc i64 {} to i32", t, wide)?;
                Ok(Value::new(t, ValueKind::I32))
            }
            ("struct", "pack" | "unpack") => {
                let fmt = self.lower_expr(&args[0], ir)?;
                let payload = self.lower_expr(&args[1], ir)?;
                let boxed = self.box_value(ir, &payload)?;
                let symbol = format!("@pycc_struct_{}", func);
                let t = self
                    .rt_call(
                        ir,
                        "ptr",
                        &symbol,
                        &format!("ptr {}, ptr {}", fmt.repr, boxed.repr),
                    )?
                    .expect("ptr");
                Ok(Value::new(t, ValueKind::Ptr))
            }
            _ => Err(CodeGenError::Logic(format!(
                "no lowering for {}.{}()",
                module, func
            ))),
        }
    }

    fn f64_intrinsic(
        &mut self,
        ir: &mut String,
        intrinsic: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let a = self.lower_f64_arg(ir, &args[0])?;
        let t = self.fresh_temp();
        writeln!(ir, "  {} = call double {}(double {})", t, intrinsic, a)?;
        Ok(Value::new(t, ValueKind::F64))
    }

    fn lower_f64_arg(&mut self, ir: &mut String, e: &Expr) -> Result<String, CodeGenError> {
        let v = self.lower_expr(e, ir)?;
        match v.kind {
            ValueKind::F64 => Ok(v.repr),
            ValueKind::I32 => {
                let t = self.fresh_temp();
                writeln!(ir, "  {} = sitofp i32 {} to double", t, v.repr)?;
                Ok(t)
            }
            _ => Err(CodeGenError::Logic("expected a numeric argument".to_string())),
        }
    }

    fn lower_i64_arg(&mut self, ir: &mut String, e: &Expr) -> Result<String, CodeGenError> {
        let v = self.lower_expr(e, ir)?;
        match v.kind {
            ValueKind::I32 => {
                let t = self.fresh_temp();
                writeln!(ir, "  {} = sext i32 {} to i64", t, v.repr)?;
                Ok(t)
            }
            _ => Err(CodeGenError::Logic("expected an int argument".to_string())),
        }
    }

    /// Raw C-string pointer for a string-object argument.
    fn lower_cstr_arg(&mut self, ir: &mut String, e: &Expr) -> Result<String, CodeGenError> {
        if let crate::ast::ExprNode::Str(s) = &e.node {
            let s = s.clone();
            return self.cstr_ptr(ir, &s);
        }
        let v = self.lower_expr(e, ir)?;
        let t = self
            .rt_call(ir, "ptr", "@pycc_string_data", &format!("ptr {}", v.repr))?
            .expect("ptr");
        Ok(t)
    }
}
