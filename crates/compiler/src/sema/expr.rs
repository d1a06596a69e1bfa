//! Expression typing.
//!
//! The typer is a match over [`NodeKind`]-tagged expressions. Each case
//! returns a [`Typed`] triple (representative kind, union mask, ok flag),
//! records the kind into the node's `inferred` slot, and, for pure
//! expressions, stamps a canonical key into `ckey`.

use crate::ast::{
    BinaryOp, CmpOp, CompKind, DictEntry, Expr, ExprNode, FStringPart, Keyword, TypeKind, UnaryOp,
};
use crate::diag::Diagnostics;
use crate::sema::sig::{stdlib_attr, stdlib_fn, Param, Signature};
use crate::sema::types::{numeric_mask, TypeEnv, TypeMask};
use crate::sema::SemaContext;
use std::collections::HashSet;

/// Result of typing one expression.
#[derive(Debug, Clone, Copy)]
pub struct Typed {
    pub kind: TypeKind,
    pub mask: TypeMask,
    pub ok: bool,
}

impl Typed {
    pub fn of(kind: TypeKind) -> Self {
        Typed {
            kind,
            mask: TypeMask::of(kind),
            ok: true,
        }
    }

    pub fn with_mask(mask: TypeMask) -> Self {
        Typed {
            kind: mask.dominant_kind(),
            mask,
            ok: true,
        }
    }

    pub fn failed() -> Self {
        Typed {
            kind: TypeKind::Opaque,
            mask: TypeMask::of(TypeKind::Opaque),
            ok: false,
        }
    }

    pub fn opaque() -> Self {
        Typed::of(TypeKind::Opaque)
    }
}

/// Builtin callables with fixed result kinds. `None` arity means variadic.
pub fn builtin_fn(name: &str) -> Option<(Option<usize>, TypeKind)> {
    let entry = match name {
        "len" => (Some(1), TypeKind::Int),
        "abs" => (Some(1), TypeKind::Int),
        "print" => (None, TypeKind::NoneType),
        "range" => (None, TypeKind::List),
        "int" => (Some(1), TypeKind::Int),
        "float" => (Some(1), TypeKind::Float),
        "bool" => (Some(1), TypeKind::Bool),
        "str" => (Some(1), TypeKind::Str),
        "isinstance" => (Some(2), TypeKind::Bool),
        "min" | "max" => (None, TypeKind::Int),
        "ord" => (Some(1), TypeKind::Int),
        "chr" => (Some(1), TypeKind::Str),
        _ => return None,
    };
    Some(entry)
}

pub struct ExprTyper<'a> {
    pub env: &'a TypeEnv,
    pub ctx: &'a SemaContext,
    pub diags: &'a mut Diagnostics,
    /// Names assigned anywhere in the enclosing function; reads of these
    /// before their first assignment are not "undefined name" (flow handles
    /// them), so only truly unknown names diagnose.
    pub locals_assigned: &'a HashSet<String>,
}

impl<'a> ExprTyper<'a> {
    pub fn new(
        env: &'a TypeEnv,
        ctx: &'a SemaContext,
        diags: &'a mut Diagnostics,
        locals_assigned: &'a HashSet<String>,
    ) -> Self {
        ExprTyper {
            env,
            ctx,
            diags,
            locals_assigned,
        }
    }

    /// Type `e`, recording the kind (and canonical key for pure shapes).
    pub fn type_expr(&mut self, e: &mut Expr) -> Typed {
        let t = self.type_expr_inner(e);
        e.inferred = Some(t.kind);
        t
    }

    fn type_expr_inner(&mut self, e: &mut Expr) -> Typed {
        match &mut e.node {
            ExprNode::Int(v) => {
                let v = *v;
                e.ckey = Some(format!("i:{}", v));
                Typed::of(TypeKind::Int)
            }
            ExprNode::Float(v) => {
                let v = *v;
                e.ckey = Some(format!("f:{}", v));
                Typed::of(TypeKind::Float)
            }
            ExprNode::Bool(v) => {
                e.ckey = Some(format!("b:{}", i32::from(*v)));
                Typed::of(TypeKind::Bool)
            }
            ExprNode::Str(s) => {
                e.ckey = Some(format!("s:{}:{}", s.len(), s));
                Typed::of(TypeKind::Str)
            }
            ExprNode::Bytes(b) => {
                e.ckey = Some(format!("y:{}:{}", b.len(), fnv1a(b)));
                Typed::of(TypeKind::Bytes)
            }
            ExprNode::NoneLit => {
                e.ckey = Some("n".to_string());
                Typed::of(TypeKind::NoneType)
            }
            ExprNode::Ellipsis => {
                e.ckey = Some("el".to_string());
                Typed::opaque()
            }
            ExprNode::Imag(_) => Typed::opaque(),
            ExprNode::FString(_) => self.type_fstring(e),
            ExprNode::Name { .. } => self.type_name(e),
            ExprNode::Unary { .. } => self.type_unary(e),
            ExprNode::Binary { .. } => self.type_binary(e),
            ExprNode::Compare { .. } => self.type_compare(e),
            ExprNode::Tuple(_) | ExprNode::List(_) | ExprNode::Set(_) => self.type_sequence(e),
            ExprNode::Dict(_) => self.type_dict(e),
            ExprNode::Object(_) => self.type_object(e),
            ExprNode::NamedExpr { .. } => self.type_named_expr(e),
            ExprNode::Lambda { body, .. } => {
                self.type_expr(body);
                Typed::opaque()
            }
            ExprNode::IfExpr { .. } => self.type_if_expr(e),
            ExprNode::Await(inner) => {
                self.type_expr(inner);
                Typed::opaque()
            }
            ExprNode::Yield { value, .. } => {
                if let Some(v) = value {
                    self.type_expr(v);
                }
                Typed::opaque()
            }
            ExprNode::Comprehension { .. } => self.type_comprehension(e),
            ExprNode::Attribute { .. } => self.type_attribute(e),
            ExprNode::Subscript { .. } => self.type_subscript(e),
            ExprNode::Call { .. } => self.type_call(e),
        }
    }

    fn type_fstring(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::FString(parts) = &mut e.node else {
            unreachable!();
        };
        let mut ok = true;
        for p in parts {
            if let FStringPart::Expr(inner) = p {
                ok &= self.type_expr(inner).ok;
            }
        }
        Typed {
            ok,
            ..Typed::of(TypeKind::Str)
        }
    }

    fn type_name(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::Name { id, .. } = &e.node else {
            unreachable!();
        };
        // Builtin callables and type literals (isinstance arguments,
        // annotations that leak into expression position) are known names.
        if builtin_fn(id).is_some() || is_builtin_type_name(id) {
            return Typed::opaque();
        }
        if let Some(binding) = self.env.lookup(id) {
            e.ckey = Some(format!("v:{}", id));
            return Typed {
                kind: binding.mask.dominant_kind(),
                mask: binding.mask,
                ok: true,
            };
        }
        if self.ctx.modules.contains(id)
            || self.ctx.signatures.contains_key(id)
            || self.ctx.classes.contains_key(id)
            || self.ctx.poly_aliases.contains_key(id)
        {
            return Typed::opaque();
        }
        if self.locals_assigned.contains(id) {
            // Assigned later in the function; flow-sensitive checking will
            // bind it before any real use.
            return Typed::opaque();
        }
        self.diags
            .error(&e.span, format!("undefined name '{}'", id));
        Typed::failed()
    }

    fn type_unary(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Unary { op, operand } = &mut e.node else {
            unreachable!();
        };
        let op = *op;
        let t = self.type_expr(operand);
        if !t.ok {
            return Typed::failed();
        }
        let result = match op {
            UnaryOp::Neg | UnaryOp::Pos => {
                if !t.mask.is_subset_of(numeric_mask()) {
                    self.diags.error(
                        &span,
                        format!("unary '{}' requires a numeric operand, got {}",
                            if op == UnaryOp::Neg { "-" } else { "+" },
                            t.mask.describe()),
                    );
                    return Typed::failed();
                }
                Typed::with_mask(t.mask)
            }
            UnaryOp::BitNot => {
                if !t.mask.is_subset_of(TypeMask::of(TypeKind::Int)) {
                    self.diags
                        .error(&span, format!("unary '~' requires int, got {}", t.mask.describe()));
                    return Typed::failed();
                }
                Typed::of(TypeKind::Int)
            }
            UnaryOp::Not => Typed::of(TypeKind::Bool),
        };
        if let Some(opk) = operand.ckey.clone() {
            e.ckey = Some(format!("u:{}:{}", unary_tag(op), opk));
        }
        result
    }

    fn type_binary(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Binary { op, lhs, rhs } = &mut e.node else {
            unreachable!();
        };
        let op = *op;
        let lt = self.type_expr(lhs);
        let rt = self.type_expr(rhs);
        if !lt.ok || !rt.ok {
            return Typed::failed();
        }
        let lkey = lhs.ckey.clone();
        let rkey = rhs.ckey.clone();

        let int_m = TypeMask::of(TypeKind::Int);
        let float_m = TypeMask::of(TypeKind::Float);
        let str_m = TypeMask::of(TypeKind::Str);
        let both_int = lt.mask.is_subset_of(int_m) && rt.mask.is_subset_of(int_m);
        let both_float = lt.mask.is_subset_of(float_m) && rt.mask.is_subset_of(float_m);

        let result = match op {
            BinaryOp::Add => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else if both_float {
                    Typed::of(TypeKind::Float)
                } else if lt.mask.is_subset_of(str_m) && rt.mask.is_subset_of(str_m) {
                    Typed::of(TypeKind::Str)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::Sub | BinaryOp::Div => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else if both_float {
                    Typed::of(TypeKind::Float)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::Mul => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else if both_float {
                    Typed::of(TypeKind::Float)
                } else if (lt.mask.is_subset_of(str_m) && rt.mask.is_subset_of(int_m))
                    || (lt.mask.is_subset_of(int_m) && rt.mask.is_subset_of(str_m))
                {
                    // String repetition.
                    Typed::of(TypeKind::Str)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::Mod => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::Pow | BinaryOp::FloorDiv => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else if lt.mask.is_subset_of(float_m)
                    && rt.mask.is_subset_of(numeric_mask())
                {
                    Typed::of(TypeKind::Float)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => {
                if both_int {
                    Typed::of(TypeKind::Int)
                } else {
                    return self.binop_mismatch(&span, op, lt, rt);
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                // Short-circuit logic coerces via truthiness.
                if !self.truthy_ok(lt.mask) || !self.truthy_ok(rt.mask) {
                    self.diags.error(
                        &span,
                        format!(
                            "'{}' operands must be truth-testable, got {} and {}",
                            op.symbol(),
                            lt.mask.describe(),
                            rt.mask.describe()
                        ),
                    );
                    return Typed::failed();
                }
                Typed::of(TypeKind::Bool)
            }
        };
        if let (Some(lk), Some(rk)) = (lkey, rkey) {
            e.ckey = Some(format!("b:{}:{}:{}", op.symbol(), lk, rk));
        }
        result
    }

    fn binop_mismatch(
        &mut self,
        span: &crate::ast::Span,
        op: BinaryOp,
        lt: Typed,
        rt: Typed,
    ) -> Typed {
        let both_numeric = lt.mask.is_subset_of(numeric_mask())
            && rt.mask.is_subset_of(numeric_mask());
        let msg = if both_numeric {
            // Mixed int/float stays a diagnostic to keep lowering deterministic.
            format!(
                "ambiguous mixed-type arithmetic: '{}' on {} and {}",
                op.symbol(),
                lt.mask.describe(),
                rt.mask.describe()
            )
        } else {
            format!(
                "unsupported operand types for '{}': {} and {}",
                op.symbol(),
                lt.mask.describe(),
                rt.mask.describe()
            )
        };
        self.diags.error(span, msg);
        Typed::failed()
    }

    fn truthy_ok(&self, mask: TypeMask) -> bool {
        // Every concrete kind has a truthiness predicate; only an empty
        // (never) union cannot be tested.
        !mask.is_empty()
    }

    fn type_compare(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Compare {
            left,
            ops,
            comparators,
        } = &mut e.node
        else {
            unreachable!();
        };
        if ops.len() != comparators.len() {
            self.diags
                .error(&span, "malformed comparison chain".to_string());
            return Typed::failed();
        }
        let ops = ops.clone();
        let lt = self.type_expr(left);
        let mut ok = lt.ok;
        let mut prev = lt;
        let mut keys: Vec<String> = Vec::new();
        if let Some(k) = left.ckey.clone() {
            keys.push(k);
        }
        for (op, rhs) in ops.iter().zip(comparators.iter_mut()) {
            let rt = self.type_expr(rhs);
            ok &= rt.ok;
            if ok {
                ok &= self.check_compare_pair(&span, *op, prev, rt);
            }
            if let Some(k) = rhs.ckey.clone() {
                keys.push(k);
            }
            prev = rt;
        }
        if ok && keys.len() == comparators.len() + 1 {
            let opstr: Vec<&str> = ops.iter().map(|o| o.symbol()).collect();
            e.ckey = Some(format!("c:{}:{}", opstr.join(","), keys.join(":")));
        }
        if ok {
            Typed::of(TypeKind::Bool)
        } else {
            Typed::failed()
        }
    }

    fn check_compare_pair(
        &mut self,
        span: &crate::ast::Span,
        op: CmpOp,
        lt: Typed,
        rt: Typed,
    ) -> bool {
        let int_m = TypeMask::of(TypeKind::Int);
        let float_m = TypeMask::of(TypeKind::Float);
        let none_m = TypeMask::of(TypeKind::NoneType);
        match op {
            CmpOp::Is | CmpOp::IsNot => true,
            CmpOp::Eq | CmpOp::NotEq => {
                // Equality against None is always valid and feeds refinement.
                if lt.mask == none_m || rt.mask == none_m {
                    return true;
                }
                if lt.mask.contains(TypeKind::NoneType) || rt.mask.contains(TypeKind::NoneType) {
                    return true;
                }
                self.comparable_pair(span, op, lt, rt)
            }
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                let both_int = lt.mask.is_subset_of(int_m) && rt.mask.is_subset_of(int_m);
                let both_float = lt.mask.is_subset_of(float_m) && rt.mask.is_subset_of(float_m);
                let both_str = lt.mask.is_subset_of(TypeMask::of(TypeKind::Str))
                    && rt.mask.is_subset_of(TypeMask::of(TypeKind::Str));
                if both_int || both_float || both_str {
                    true
                } else {
                    self.diags.error(
                        span,
                        format!(
                            "ordered comparison '{}' requires matching numeric or string operands, got {} and {}",
                            op.symbol(),
                            lt.mask.describe(),
                            rt.mask.describe()
                        ),
                    );
                    false
                }
            }
            CmpOp::In | CmpOp::NotIn => {
                // Membership over unsupported container forms degrades to a
                // constant-false test rather than a diagnostic.
                let _ = (lt, rt);
                true
            }
        }
    }

    fn comparable_pair(
        &mut self,
        span: &crate::ast::Span,
        op: CmpOp,
        lt: Typed,
        rt: Typed,
    ) -> bool {
        let same_single = lt.mask.is_single() && lt.mask == rt.mask;
        let both_numeric = lt.mask.is_subset_of(TypeMask::of(TypeKind::Int))
            && rt.mask.is_subset_of(TypeMask::of(TypeKind::Int))
            || lt.mask.is_subset_of(TypeMask::of(TypeKind::Float))
                && rt.mask.is_subset_of(TypeMask::of(TypeKind::Float));
        if same_single || both_numeric || !lt.mask.intersect(rt.mask).is_empty() {
            true
        } else {
            self.diags.error(
                span,
                format!(
                    "'{}' between unrelated types {} and {}",
                    op.symbol(),
                    lt.mask.describe(),
                    rt.mask.describe()
                ),
            );
            false
        }
    }

    fn type_sequence(&mut self, e: &mut Expr) -> Typed {
        let (kind, tag) = match &e.node {
            ExprNode::Tuple(_) => (TypeKind::Tuple, "t"),
            ExprNode::List(_) => (TypeKind::List, "l"),
            ExprNode::Set(_) => (TypeKind::Set, "st"),
            _ => unreachable!(),
        };
        let (ExprNode::Tuple(els) | ExprNode::List(els) | ExprNode::Set(els)) = &mut e.node else {
            unreachable!();
        };
        let mut ok = true;
        let mut keys = Vec::with_capacity(els.len());
        for el in els.iter_mut() {
            let t = self.type_expr(el);
            ok &= t.ok;
            keys.push(el.ckey.clone());
        }
        if ok && keys.iter().all(Option::is_some) {
            let joined: Vec<String> = keys.into_iter().map(Option::unwrap).collect();
            e.ckey = Some(format!("{}:({})", tag, joined.join(",")));
        }
        Typed {
            ok,
            ..Typed::of(kind)
        }
    }

    fn type_dict(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::Dict(entries) = &mut e.node else {
            unreachable!();
        };
        let mut ok = true;
        for entry in entries.iter_mut() {
            match entry {
                DictEntry::KeyValue { key, value } => {
                    ok &= self.type_expr(key).ok;
                    ok &= self.type_expr(value).ok;
                }
                DictEntry::Unpack { value } => {
                    let t = self.type_expr(value);
                    ok &= t.ok;
                    if t.ok && !t.mask.is_subset_of(TypeMask::of(TypeKind::Dict)) {
                        self.diags.error(
                            &value.span,
                            format!("'**' unpack requires a dict, got {}", t.mask.describe()),
                        );
                        ok = false;
                    }
                }
            }
        }
        Typed {
            ok,
            ..Typed::of(TypeKind::Dict)
        }
    }

    fn type_object(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::Object(fields) = &mut e.node else {
            unreachable!();
        };
        let mut ok = true;
        for f in fields.iter_mut() {
            ok &= self.type_expr(f).ok;
        }
        Typed {
            ok,
            ..Typed::of(TypeKind::Class)
        }
    }

    fn type_named_expr(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::NamedExpr { value, .. } = &mut e.node else {
            unreachable!();
        };
        // The binding side is handled by the statement checker; the
        // expression's type is its value's type.
        self.type_expr(value)
    }

    fn type_if_expr(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::IfExpr { cond, then, orelse } = &mut e.node else {
            unreachable!();
        };
        let ct = self.type_expr(cond);
        let tt = self.type_expr(then);
        let et = self.type_expr(orelse);
        if !ct.ok || !tt.ok || !et.ok {
            return Typed::failed();
        }
        Typed::with_mask(tt.mask.union(et.mask))
    }

    fn type_comprehension(&mut self, e: &mut Expr) -> Typed {
        let ExprNode::Comprehension {
            kind,
            element,
            value,
            clauses,
        } = &mut e.node
        else {
            unreachable!();
        };
        let kind = kind.clone();
        let mut ok = true;
        for c in clauses.iter_mut() {
            ok &= self.type_expr(&mut c.iter).ok;
            for cond in &mut c.ifs {
                ok &= self.type_expr(cond).ok;
            }
        }
        // Comprehension targets shadow; element typing is best-effort under
        // the outer environment.
        ok &= self.type_expr(element).ok;
        if let Some(v) = value {
            ok &= self.type_expr(v).ok;
        }
        let result_kind = match kind {
            CompKind::List => TypeKind::List,
            CompKind::Set => TypeKind::Set,
            CompKind::Dict => TypeKind::Dict,
            CompKind::Generator => TypeKind::Opaque,
        };
        Typed {
            ok,
            ..Typed::of(result_kind)
        }
    }

    fn type_attribute(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Attribute { value, attr, .. } = &mut e.node else {
            unreachable!();
        };
        let attr = attr.clone();

        // Module attribute: consult the stdlib surface.
        if let Some(module) = value.as_name()
            && self.ctx.modules.contains(module)
        {
            if let Some(kind) = stdlib_attr(module, &attr) {
                return Typed::of(kind);
            }
            return Typed::opaque();
        }

        let base = self.type_expr(value);
        if !base.ok {
            return Typed::failed();
        }

        // Class-typed base: attribute table first, then methods.
        if base.mask.is_subset_of(TypeMask::of(TypeKind::Class))
            && let Some(name) = value.as_name()
            && let Some(class_name) = self.env.class_of.get(name)
        {
            if let Some(info) = self.ctx.classes.get(class_name) {
                if let Some(mask) = info.attribute_kinds.get(&attr) {
                    return Typed::with_mask(*mask);
                }
                if info.methods.contains_key(&attr) {
                    return Typed::opaque();
                }
                self.diags.error(
                    &span,
                    format!("class '{}' has no attribute '{}'", class_name, attr),
                );
                return Typed::failed();
            }
        }

        // Attribute on an immutable literal is pure; give it a key.
        if matches!(
            value.node_kind(),
            crate::ast::NodeKind::StringLiteral
                | crate::ast::NodeKind::TupleLiteral
                | crate::ast::NodeKind::BytesLiteral
        ) && let Some(bk) = value.ckey.clone()
        {
            e.ckey = Some(format!("a:{}:{}", attr, bk));
        }

        // Unknown attribute on an opaque base defers to runtime.
        Typed::opaque()
    }

    fn type_subscript(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Subscript { value, index, .. } = &mut e.node else {
            unreachable!();
        };
        let base = self.type_expr(value);
        let idx = self.type_expr(index);
        if !base.ok || !idx.ok {
            return Typed::failed();
        }

        // Subscript on an immutable literal base stays pure.
        if matches!(
            value.node_kind(),
            crate::ast::NodeKind::StringLiteral
                | crate::ast::NodeKind::TupleLiteral
                | crate::ast::NodeKind::BytesLiteral
        ) && let (Some(bk), Some(ik)) = (value.ckey.clone(), index.ckey.clone())
        {
            e.ckey = Some(format!("x:{}:{}", bk, ik));
        }

        match base.mask.dominant_kind() {
            TypeKind::Str => Typed::of(TypeKind::Str),
            TypeKind::Bytes | TypeKind::ByteArray => Typed::of(TypeKind::Int),
            TypeKind::List => {
                if let Some(name) = value.as_name()
                    && let Some(elem) = self.env.list_elems.get(name)
                {
                    return Typed::with_mask(*elem);
                }
                if let ExprNode::List(els) = &value.node {
                    let mut mask = TypeMask::EMPTY;
                    for el in els {
                        if let Some(k) = el.inferred {
                            mask = mask.union(TypeMask::of(k));
                        }
                    }
                    if !mask.is_empty() {
                        return Typed::with_mask(mask);
                    }
                }
                Typed::opaque()
            }
            TypeKind::Tuple => self.type_tuple_subscript(value, index),
            TypeKind::Dict => {
                if let Some(name) = value.as_name()
                    && let Some(vmask) = self.env.dict_values.get(name)
                {
                    return Typed::with_mask(*vmask);
                }
                Typed::opaque()
            }
            TypeKind::Set => {
                self.diags
                    .error(&span, "'set' object is not subscriptable".to_string());
                Typed::failed()
            }
            _ => Typed::opaque(),
        }
    }

    fn type_tuple_subscript(&mut self, value: &Expr, index: &Expr) -> Typed {
        let elems: Option<Vec<TypeMask>> = if let Some(name) = value.as_name() {
            self.env.tuple_elems.get(name).cloned()
        } else if let ExprNode::Tuple(els) = &value.node {
            Some(
                els.iter()
                    .map(|el| {
                        el.inferred
                            .map(TypeMask::of)
                            .unwrap_or(TypeMask::of(TypeKind::Opaque))
                    })
                    .collect(),
            )
        } else {
            None
        };
        let Some(elems) = elems else {
            return Typed::opaque();
        };
        // Constant non-negative in-bounds index picks the element; anything
        // else unions over all elements.
        if let Some(i) = index.as_const_int()
            && i >= 0
            && (i as usize) < elems.len()
        {
            return Typed::with_mask(elems[i as usize]);
        }
        let mut mask = TypeMask::EMPTY;
        for m in &elems {
            mask = mask.union(*m);
        }
        Typed::with_mask(mask)
    }

    fn type_call(&mut self, e: &mut Expr) -> Typed {
        let span = e.span.clone();
        let ExprNode::Call {
            func,
            args,
            keywords,
        } = &mut e.node
        else {
            unreachable!();
        };

        // Type arguments first; binding checks need their masks.
        let mut arg_types = Vec::with_capacity(args.len());
        let mut ok = true;
        for a in args.iter_mut() {
            let t = self.type_expr(a);
            ok &= t.ok;
            arg_types.push(t);
        }
        let mut kw_types = Vec::with_capacity(keywords.len());
        for k in keywords.iter_mut() {
            let t = self.type_expr(&mut k.value);
            ok &= t.ok;
            kw_types.push(t);
        }
        if !ok {
            return Typed::failed();
        }

        // 1. Direct name: signature table, then polymorphic aliases.
        if let Some(name) = func.as_name() {
            if let Some((arity, kind)) = builtin_fn(name) {
                if let Some(n) = arity
                    && args.len() != n
                {
                    self.diags.error(
                        &span,
                        format!("{}() takes {} argument(s), got {}", name, n, args.len()),
                    );
                    return Typed::failed();
                }
                return Typed::of(kind);
            }
            if let Some(sig) = self.ctx.signatures.get(name) {
                return self.bind_call(&span, name, &sig.clone(), &arg_types, keywords, &kw_types);
            }
            if let Some(candidates) = self.ctx.poly_aliases.get(name) {
                let resolved: Vec<&String> = candidates
                    .iter()
                    .filter(|c| self.ctx.signatures.contains_key(*c))
                    .collect();
                if resolved.len() == 1 {
                    let sig = self.ctx.signatures[resolved[0]].clone();
                    let fname = resolved[0].clone();
                    return self.bind_call(&span, &fname, &sig, &arg_types, keywords, &kw_types);
                }
                // Still ambiguous: opaque result, no diagnostic.
                return Typed::opaque();
            }
            if self.ctx.classes.contains_key(name) {
                // Constructor call; the statement checker records the class
                // binding for the assigned name.
                return Typed::of(TypeKind::Class);
            }
            self.diags
                .error(&span, format!("call to unknown function '{}'", name));
            return Typed::failed();
        }

        // 2-3. module.attr and ClassName.method.
        if let ExprNode::Attribute { value, attr, .. } = &func.node {
            if let Some(base) = value.as_name() {
                if self.ctx.modules.contains(base) {
                    if let Some((arity, kind)) = stdlib_fn(base, attr) {
                        if args.len() != arity {
                            self.diags.error(
                                &span,
                                format!(
                                    "{}.{}() takes {} argument(s), got {}",
                                    base,
                                    attr,
                                    arity,
                                    args.len()
                                ),
                            );
                            return Typed::failed();
                        }
                        return Typed::of(kind);
                    }
                    return Typed::opaque();
                }
                if let Some(info) = self.ctx.classes.get(base) {
                    if let Some(sig) = info.methods.get(attr) {
                        let sig = sig.clone();
                        let label = format!("{}.{}", base, attr);
                        return self.bind_call(&span, &label, &sig, &arg_types, keywords, &kw_types);
                    }
                    self.diags.error(
                        &span,
                        format!("class '{}' has no method '{}'", base, attr),
                    );
                    return Typed::failed();
                }
                // Method call through an instance variable.
                if let Some(class_name) = self.env.class_of.get(base).cloned()
                    && let Some(info) = self.ctx.classes.get(&class_name)
                {
                    if let Some(sig) = info.methods.get(attr) {
                        let sig = sig.clone();
                        let label = format!("{}.{}", class_name, attr);
                        return self.bind_call(&span, &label, &sig, &arg_types, keywords, &kw_types);
                    }
                    self.diags.error(
                        &span,
                        format!("class '{}' has no method '{}'", class_name, attr),
                    );
                    return Typed::failed();
                }
            }
            // 4. Attribute call on an unknown target.
            self.diags
                .error(&span, format!("call to unknown attribute '{}'", attr));
            return Typed::failed();
        }

        self.diags
            .error(&span, "unsupported call target".to_string());
        Typed::failed()
    }

    /// Bind a call site against a signature: positional then keyword then
    /// defaults, honoring `*args`, `**kwargs`, keyword-only, and
    /// positional-only markers.
    fn bind_call(
        &mut self,
        span: &crate::ast::Span,
        fname: &str,
        sig: &Signature,
        arg_types: &[Typed],
        keywords: &[Keyword],
        kw_types: &[Typed],
    ) -> Typed {
        let Some(params) = &sig.params else {
            // Positional-only fast path.
            if keywords.is_empty() && arg_types.len() == sig.param_kinds.len() {
                for (i, (t, expect)) in arg_types.iter().zip(&sig.param_kinds).enumerate() {
                    if !self.arg_matches(t.mask, TypeMask::of(*expect)) {
                        self.diags.error(
                            span,
                            format!(
                                "{}(): argument {} expects {}, got {}",
                                fname,
                                i + 1,
                                expect.name(),
                                t.mask.describe()
                            ),
                        );
                        return Typed::failed();
                    }
                }
                return self.call_result(sig);
            }
            self.diags.error(
                span,
                format!(
                    "{}() takes {} positional argument(s), got {}",
                    fname,
                    sig.param_kinds.len(),
                    arg_types.len()
                ),
            );
            return Typed::failed();
        };

        let mut bound: Vec<bool> = vec![false; params.len()];
        let vararg_idx = params.iter().position(|p| p.is_vararg);
        let kwvararg_idx = params.iter().position(|p| p.is_kwvararg);

        // Positional arguments flow into non-kw-only, non-star parameters.
        let positional: Vec<(usize, &Param)> = params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_kwonly && !p.is_vararg && !p.is_kwvararg)
            .collect();
        for (ai, at) in arg_types.iter().enumerate() {
            if ai < positional.len() {
                let (pi, p) = positional[ai];
                if !self.param_accepts(p, *at) {
                    self.diags.error(
                        span,
                        format!(
                            "{}(): argument '{}' expects {}, got {}",
                            fname,
                            p.name,
                            p.union_mask.describe(),
                            at.mask.describe()
                        ),
                    );
                    return Typed::failed();
                }
                bound[pi] = true;
            } else if vararg_idx.is_some() {
                // Overflow into *args.
            } else {
                self.diags.error(
                    span,
                    format!(
                        "{}() takes {} positional argument(s), got {}",
                        fname,
                        positional.len(),
                        arg_types.len()
                    ),
                );
                return Typed::failed();
            }
        }

        // Keyword arguments bind by name.
        for (kw, kt) in keywords.iter().zip(kw_types) {
            let Some(kw_name) = &kw.name else {
                // `**spread` at the call site: accepted without per-name checks.
                continue;
            };
            match params.iter().position(|p| &p.name == kw_name) {
                Some(pi) => {
                    let p = &params[pi];
                    if p.is_posonly {
                        self.diags.error(
                            span,
                            format!(
                                "{}(): parameter '{}' is positional-only",
                                fname, kw_name
                            ),
                        );
                        return Typed::failed();
                    }
                    if bound[pi] {
                        self.diags.error(
                            span,
                            format!("{}(): duplicate argument '{}'", fname, kw_name),
                        );
                        return Typed::failed();
                    }
                    if !self.param_accepts(p, *kt) {
                        self.diags.error(
                            span,
                            format!(
                                "{}(): argument '{}' expects {}, got {}",
                                fname,
                                p.name,
                                p.union_mask.describe(),
                                kt.mask.describe()
                            ),
                        );
                        return Typed::failed();
                    }
                    bound[pi] = true;
                }
                None => {
                    if kwvararg_idx.is_none() {
                        self.diags.error(
                            span,
                            format!("{}(): unexpected keyword argument '{}'", fname, kw_name),
                        );
                        return Typed::failed();
                    }
                }
            }
        }

        // Defaults fill the rest; anything still unbound is missing.
        for (pi, p) in params.iter().enumerate() {
            if !bound[pi] && !p.has_default && !p.is_vararg && !p.is_kwvararg {
                self.diags.error(
                    span,
                    format!("{}(): missing required argument '{}'", fname, p.name),
                );
                return Typed::failed();
            }
        }

        self.call_result(sig)
    }

    fn call_result(&self, sig: &Signature) -> Typed {
        Typed {
            kind: sig.return_kind,
            mask: sig.return_mask,
            ok: true,
        }
    }

    fn param_accepts(&self, p: &Param, arg: Typed) -> bool {
        if p.union_mask.is_empty() {
            return true; // unannotated accepts anything
        }
        if arg.mask.contains(TypeKind::Opaque) {
            return true; // dynamic values defer to runtime
        }
        self.arg_matches(arg.mask, p.union_mask)
    }

    fn arg_matches(&self, arg: TypeMask, expected: TypeMask) -> bool {
        if expected.contains(TypeKind::Opaque) || arg.contains(TypeKind::Opaque) {
            return true;
        }
        arg.is_subset_of(expected)
    }
}

fn is_builtin_type_name(id: &str) -> bool {
    matches!(
        id,
        "int" | "float" | "bool" | "str" | "list" | "tuple" | "dict" | "set" | "bytes" | "bytearray"
    )
}

fn unary_tag(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprCtx, Span};

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

    fn typer_fixture() -> (TypeEnv, SemaContext, Diagnostics, HashSet<String>) {
        (
            TypeEnv::new(),
            SemaContext::default(),
            Diagnostics::new(),
            HashSet::new(),
        )
    }

    #[test]
    fn test_int_literal_key() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = int(42);
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert_eq!(t.kind, TypeKind::Int);
        assert_eq!(e.ckey.as_deref(), Some("i:42"));
        assert_eq!(e.inferred, Some(TypeKind::Int));
    }

    #[test]
    fn test_undefined_name() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = name("ghost");
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(!t.ok);
        assert_eq!(diags.len(), 1);
        assert!(diags.items()[0].message.contains("undefined name 'ghost'"));
    }

    #[test]
    fn test_mixed_arithmetic_rejected() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int(1)),
                rhs: Box::new(Expr::new(ExprNode::Float(2.0), sp())),
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(!t.ok);
        assert!(diags.items()[0].message.contains("ambiguous mixed-type"));
    }

    #[test]
    fn test_string_repetition() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(Expr::new(ExprNode::Str("ab".to_string()), sp())),
                rhs: Box::new(int(3)),
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok);
        assert_eq!(t.kind, TypeKind::Str);
    }

    #[test]
    fn test_binary_canonical_key_composes() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int(1)),
                rhs: Box::new(int(2)),
            },
            sp(),
        );
        ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert_eq!(e.ckey.as_deref(), Some("b:+:i:1:i:2"));
    }

    #[test]
    fn test_compare_chain() {
        let (env, ctx, mut diags, locals) = typer_fixture();
        let mut e = Expr::new(
            ExprNode::Compare {
                left: Box::new(int(1)),
                ops: vec![CmpOp::Lt, CmpOp::Lt],
                comparators: vec![int(2), int(3)],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok);
        assert_eq!(t.kind, TypeKind::Bool);
    }

    #[test]
    fn test_none_equality_always_valid() {
        let (mut env, ctx, mut diags, locals) = typer_fixture();
        env.define_set(
            "x",
            TypeMask::of_all(&[TypeKind::Int, TypeKind::NoneType]),
            sp(),
        );
        let mut e = Expr::new(
            ExprNode::Compare {
                left: Box::new(name("x")),
                ops: vec![CmpOp::Eq],
                comparators: vec![Expr::new(ExprNode::NoneLit, sp())],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_set_subscript_rejected() {
        let (mut env, ctx, mut diags, locals) = typer_fixture();
        env.define("s", TypeKind::Set, sp());
        let mut e = Expr::new(
            ExprNode::Subscript {
                value: Box::new(name("s")),
                index: Box::new(int(0)),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(!t.ok);
        assert!(diags.items()[0].message.contains("not subscriptable"));
    }

    #[test]
    fn test_tuple_constant_subscript_picks_element() {
        let (mut env, ctx, mut diags, locals) = typer_fixture();
        env.define("t", TypeKind::Tuple, sp());
        env.tuple_elems.insert(
            "t".to_string(),
            vec![
                TypeMask::of(TypeKind::Int),
                TypeMask::of(TypeKind::Bool),
                TypeMask::of(TypeKind::Float),
            ],
        );
        let mut e = Expr::new(
            ExprNode::Subscript {
                value: Box::new(name("t")),
                index: Box::new(int(1)),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert_eq!(t.kind, TypeKind::Bool);

        // Out-of-range constant unions all elements.
        let mut e2 = Expr::new(
            ExprNode::Subscript {
                value: Box::new(name("t")),
                index: Box::new(int(9)),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        let t2 = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e2);
        assert!(t2.mask.contains(TypeKind::Int));
        assert!(t2.mask.contains(TypeKind::Bool));
        assert!(t2.mask.contains(TypeKind::Float));
    }

    #[test]
    fn test_call_binding_missing_argument() {
        let (env, mut ctx, mut diags, locals) = typer_fixture();
        let sig = Signature {
            return_kind: TypeKind::Int,
            return_mask: TypeMask::of(TypeKind::Int),
            param_kinds: vec![TypeKind::Int, TypeKind::Int],
            params: Some(vec![
                Param::positional("a", TypeKind::Int),
                Param::positional("b", TypeKind::Int),
            ]),
            return_tuple_elems: None,
        };
        ctx.signatures.insert("f".to_string(), sig);
        let mut e = Expr::new(
            ExprNode::Call {
                func: Box::new(name("f")),
                args: vec![int(1)],
                keywords: vec![],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(!t.ok);
        assert!(diags.items()[0].message.contains("missing required argument 'b'"));
    }

    #[test]
    fn test_call_keyword_positional_only_rejected() {
        let (env, mut ctx, mut diags, locals) = typer_fixture();
        let mut p = Param::positional("a", TypeKind::Int);
        p.is_posonly = true;
        let sig = Signature {
            return_kind: TypeKind::Int,
            return_mask: TypeMask::of(TypeKind::Int),
            param_kinds: vec![TypeKind::Int],
            params: Some(vec![p]),
            return_tuple_elems: None,
        };
        ctx.signatures.insert("f".to_string(), sig);
        let mut e = Expr::new(
            ExprNode::Call {
                func: Box::new(name("f")),
                args: vec![],
                keywords: vec![Keyword {
                    name: Some("a".to_string()),
                    value: int(1),
                }],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(!t.ok);
        assert!(diags.items()[0].message.contains("positional-only"));
    }

    #[test]
    fn test_call_vararg_overflow_accepted() {
        let (env, mut ctx, mut diags, locals) = typer_fixture();
        let mut star = Param::positional("rest", TypeKind::Opaque);
        star.is_vararg = true;
        star.union_mask = TypeMask::EMPTY;
        let sig = Signature {
            return_kind: TypeKind::Int,
            return_mask: TypeMask::of(TypeKind::Int),
            param_kinds: vec![TypeKind::Int],
            params: Some(vec![Param::positional("a", TypeKind::Int), star]),
            return_tuple_elems: None,
        };
        ctx.signatures.insert("f".to_string(), sig);
        let mut e = Expr::new(
            ExprNode::Call {
                func: Box::new(name("f")),
                args: vec![int(1), int(2), int(3)],
                keywords: vec![],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok, "diags: {:?}", diags.items());
    }

    #[test]
    fn test_stdlib_module_call() {
        let (env, mut ctx, mut diags, locals) = typer_fixture();
        ctx.modules.insert("math".to_string());
        let mut e = Expr::new(
            ExprNode::Call {
                func: Box::new(Expr::new(
                    ExprNode::Attribute {
                        value: Box::new(name("math")),
                        attr: "sqrt".to_string(),
                        ctx: ExprCtx::Load,
                    },
                    sp(),
                )),
                args: vec![Expr::new(ExprNode::Float(2.0), sp())],
                keywords: vec![],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok);
        assert_eq!(t.kind, TypeKind::Float);
    }

    #[test]
    fn test_poly_alias_single_candidate_binds() {
        let (env, mut ctx, mut diags, locals) = typer_fixture();
        ctx.signatures.insert(
            "impl_a".to_string(),
            Signature::simple(vec![TypeKind::Int], TypeKind::Int),
        );
        ctx.poly_aliases
            .insert("handler".to_string(), vec!["impl_a".to_string()]);
        let mut e = Expr::new(
            ExprNode::Call {
                func: Box::new(name("handler")),
                args: vec![int(1)],
                keywords: vec![],
            },
            sp(),
        );
        let t = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e);
        assert!(t.ok);
        assert_eq!(t.kind, TypeKind::Int);

        // Two candidates stay opaque.
        ctx.signatures.insert(
            "impl_b".to_string(),
            Signature::simple(vec![TypeKind::Int], TypeKind::Float),
        );
        ctx.poly_aliases.insert(
            "handler2".to_string(),
            vec!["impl_a".to_string(), "impl_b".to_string()],
        );
        let mut e2 = Expr::new(
            ExprNode::Call {
                func: Box::new(name("handler2")),
                args: vec![int(1)],
                keywords: vec![],
            },
            sp(),
        );
        let t2 = ExprTyper::new(&env, &ctx, &mut diags, &locals).type_expr(&mut e2);
        assert!(t2.ok);
        assert_eq!(t2.kind, TypeKind::Opaque);
    }
}
