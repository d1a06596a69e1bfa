//! Semantic analysis: type/flow checking, class and signature collection,
//! and the effect/trait scans consumed by the optimizer and codegen.
//!
//! The analyzer walks a [`Module`], annotates every expression with a type
//! kind (and canonical key where pure), validates statements, and returns
//! success only when no diagnostics were produced. There is no guessing:
//! ambiguous constructs produce a diagnostic citing the ambiguity.

pub mod effects;
pub mod expr;
pub mod refine;
pub mod sig;
pub mod stmt;
pub mod types;

use crate::ast::{
    BinaryOp, ClassDef, Expr, ExprNode, FunctionDef, Module, ParamKind, Stmt, StmtNode, TypeKind,
};
use crate::diag::{Diagnostic, Diagnostics};
use effects::{scan_fn_traits, scan_return_param, FnFlags};
use sig::{linearize_bases, ClassInfo, Param, Signature};
use std::collections::{HashMap, HashSet};
use types::{TypeEnv, TypeMask};

/// Module-wide tables shared by the expression typer and statement checker.
#[derive(Debug, Default)]
pub struct SemaContext {
    pub signatures: HashMap<String, Signature>,
    pub classes: HashMap<String, ClassInfo>,
    /// Variables that may resolve to more than one function.
    pub poly_aliases: HashMap<String, Vec<String>>,
    /// Imported module names with a typed stdlib surface.
    pub modules: HashSet<String>,
}

/// Analysis products consumed downstream.
#[derive(Debug, Default)]
pub struct SemaResult {
    pub fn_traits: HashMap<String, FnFlags>,
    pub return_param_idx: HashMap<String, usize>,
}

/// Interpreted type annotation.
#[derive(Debug, Clone, Default)]
pub struct AnnotInfo {
    pub mask: TypeMask,
    pub list_elem: Option<TypeMask>,
    pub tuple_elems: Option<Vec<TypeKind>>,
}

/// Interpret an annotation expression: plain names (`int`), `X | Y` unions,
/// `None`, and `list[T]` / `tuple[A, B]` subscripts.
pub fn annotation_info(e: &Expr) -> AnnotInfo {
    match &e.node {
        ExprNode::NoneLit => AnnotInfo {
            mask: TypeMask::of(TypeKind::NoneType),
            ..AnnotInfo::default()
        },
        ExprNode::Name { id, .. } => {
            let kind = match id.as_str() {
                "int" => TypeKind::Int,
                "float" => TypeKind::Float,
                "bool" => TypeKind::Bool,
                "str" => TypeKind::Str,
                "list" => TypeKind::List,
                "tuple" => TypeKind::Tuple,
                "dict" => TypeKind::Dict,
                "set" => TypeKind::Set,
                "bytes" => TypeKind::Bytes,
                "bytearray" => TypeKind::ByteArray,
                "None" => TypeKind::NoneType,
                _ => TypeKind::Opaque,
            };
            AnnotInfo {
                mask: TypeMask::of(kind),
                ..AnnotInfo::default()
            }
        }
        ExprNode::Binary {
            op: BinaryOp::BitOr,
            lhs,
            rhs,
        } => {
            let l = annotation_info(lhs);
            let r = annotation_info(rhs);
            AnnotInfo {
                mask: l.mask.union(r.mask),
                list_elem: l.list_elem.or(r.list_elem),
                tuple_elems: l.tuple_elems.or(r.tuple_elems),
            }
        }
        ExprNode::Subscript { value, index, .. } => match value.as_name() {
            Some("list") => AnnotInfo {
                mask: TypeMask::of(TypeKind::List),
                list_elem: Some(annotation_info(index).mask),
                tuple_elems: None,
            },
            Some("tuple") => {
                let elems = match &index.node {
                    ExprNode::Tuple(els) => els
                        .iter()
                        .map(|el| annotation_info(el).mask.dominant_kind())
                        .collect(),
                    _ => vec![annotation_info(index).mask.dominant_kind()],
                };
                AnnotInfo {
                    mask: TypeMask::of(TypeKind::Tuple),
                    list_elem: None,
                    tuple_elems: Some(elems),
                }
            }
            _ => AnnotInfo {
                mask: TypeMask::of(TypeKind::Opaque),
                ..AnnotInfo::default()
            },
        },
        _ => AnnotInfo {
            mask: TypeMask::of(TypeKind::Opaque),
            ..AnnotInfo::default()
        },
    }
}

/// Build a [`Signature`] from a function definition's declared shape.
pub fn signature_of(f: &FunctionDef) -> Signature {
    let mut param_kinds = Vec::new();
    let mut params = Vec::new();
    for decl in &f.params {
        let info = decl
            .annotation
            .as_ref()
            .map(annotation_info)
            .unwrap_or_default();
        let kind = if info.mask.is_empty() {
            TypeKind::Opaque
        } else {
            info.mask.dominant_kind()
        };
        if decl.kind == ParamKind::Positional || decl.kind == ParamKind::PosOnly {
            param_kinds.push(kind);
        }
        params.push(Param {
            name: decl.name.clone(),
            kind,
            is_vararg: decl.kind == ParamKind::VarArg,
            is_kwvararg: decl.kind == ParamKind::KwVarArg,
            is_kwonly: decl.kind == ParamKind::KwOnly,
            is_posonly: decl.kind == ParamKind::PosOnly,
            has_default: decl.default.is_some(),
            union_mask: info.mask,
            list_elem_mask: info.list_elem,
        });
    }
    let ret = f
        .returns
        .as_ref()
        .map(annotation_info)
        .unwrap_or_default();
    let (return_kind, return_mask) = if ret.mask.is_empty() {
        (TypeKind::NoneType, TypeMask::EMPTY)
    } else {
        (ret.mask.dominant_kind(), ret.mask)
    };
    Signature {
        return_kind,
        return_mask,
        param_kinds,
        params: Some(params),
        return_tuple_elems: ret.tuple_elems,
    }
}

fn collect_class(c: &ClassDef) -> ClassInfo {
    let mut info = ClassInfo {
        bases: c.bases.clone(),
        ..ClassInfo::default()
    };
    for s in &c.body {
        match &s.node {
            StmtNode::FunctionDef(f) => {
                info.methods.insert(f.name.clone(), signature_of(f));
                // `self.attr = <literal>` stores in method bodies declare
                // instance attributes.
                collect_self_attrs(&f.body, &mut info);
            }
            StmtNode::Assign { targets, value } => {
                for t in targets {
                    if let Some(attr) = t.as_name() {
                        info.attribute_kinds
                            .insert(attr.to_string(), literal_mask(value));
                    }
                }
            }
            _ => {}
        }
    }
    info
}

fn collect_self_attrs(body: &[Stmt], info: &mut ClassInfo) {
    for s in body {
        if let StmtNode::Assign { targets, value } = &s.node {
            for t in targets {
                if let ExprNode::Attribute { value: base, attr, .. } = &t.node
                    && base.as_name() == Some("self")
                {
                    info.attribute_kinds
                        .entry(attr.clone())
                        .or_insert_with(|| literal_mask(value));
                }
            }
        }
        for b in crate::ast::child_bodies(s) {
            collect_self_attrs(b, info);
        }
    }
}

fn literal_mask(e: &Expr) -> TypeMask {
    let kind = match &e.node {
        ExprNode::Int(_) => TypeKind::Int,
        ExprNode::Float(_) => TypeKind::Float,
        ExprNode::Bool(_) => TypeKind::Bool,
        ExprNode::Str(_) => TypeKind::Str,
        ExprNode::Bytes(_) => TypeKind::Bytes,
        ExprNode::NoneLit => TypeKind::NoneType,
        ExprNode::List(_) => TypeKind::List,
        ExprNode::Tuple(_) => TypeKind::Tuple,
        ExprNode::Dict(_) => TypeKind::Dict,
        ExprNode::Set(_) => TypeKind::Set,
        _ => TypeKind::Opaque,
    };
    TypeMask::of(kind)
}

/// First pass: populate the context tables from module-level definitions.
fn collect(module: &Module, ctx: &mut SemaContext) {
    collect_in_body(&module.body, ctx);
    linearize_bases(&mut ctx.classes);
}

fn collect_in_body(body: &[Stmt], ctx: &mut SemaContext) {
    for s in body {
        match &s.node {
            StmtNode::FunctionDef(f) => {
                ctx.signatures.insert(f.name.clone(), signature_of(f));
            }
            StmtNode::ClassDef(c) => {
                ctx.classes.insert(c.name.clone(), collect_class(c));
            }
            StmtNode::Import(aliases) => {
                for a in aliases {
                    let bound = a.asname.clone().unwrap_or_else(|| a.name.clone());
                    ctx.modules.insert(bound);
                }
            }
            StmtNode::Assign { targets, value } => {
                // `handler = some_function` may alias one of several
                // functions across branches.
                if let ExprNode::Name { id: rhs, .. } = &value.node {
                    for t in targets {
                        if let Some(lhs) = t.as_name() {
                            ctx.poly_aliases
                                .entry(lhs.to_string())
                                .or_default()
                                .push(rhs.clone());
                        }
                    }
                }
            }
            _ => {}
        }
        for b in crate::ast::child_bodies(s) {
            // Only branch bodies contribute aliases; nested defs keep their
            // own scope.
            if !matches!(s.node, StmtNode::FunctionDef(_) | StmtNode::ClassDef(_)) {
                collect_in_body(b, ctx);
            }
        }
    }
}

/// Run semantic analysis over a module.
///
/// On success the module's expressions carry inferred kinds and canonical
/// keys; on failure the accumulated diagnostics are returned.
pub fn analyze_module(module: &mut Module) -> Result<(SemaContext, SemaResult), Vec<Diagnostic>> {
    let mut ctx = SemaContext::default();
    collect(module, &mut ctx);

    // Keep only aliases that resolved to known functions.
    ctx.poly_aliases.retain(|_, candidates| {
        candidates.retain(|c| c != "range" && c != "len");
        candidates.iter().any(|c| ctx.signatures.contains_key(c))
    });

    let mut diags = Diagnostics::new();
    let mut checker = stmt::StmtChecker::new(&ctx, &mut diags, TypeEnv::new());
    checker.collect_assigned(&module.body);
    checker.check_body(&mut module.body);

    if !diags.is_empty() {
        return Err(diags.into_items());
    }

    // Tuple-returning functions without an element annotation get their
    // element kinds from the (now typed) return literals.
    let inferred_tuples: Vec<(String, Vec<TypeKind>)> = module
        .functions()
        .filter(|f| {
            ctx.signatures
                .get(&f.name)
                .is_some_and(|s| s.return_kind == TypeKind::Tuple && s.return_tuple_elems.is_none())
        })
        .filter_map(|f| tuple_return_elems(&f.body).map(|elems| (f.name.clone(), elems)))
        .collect();
    for (name, elems) in inferred_tuples {
        if let Some(sig) = ctx.signatures.get_mut(&name) {
            sig.return_tuple_elems = Some(elems);
        }
    }

    let result = SemaResult {
        fn_traits: scan_fn_traits(module),
        return_param_idx: scan_return_param(module),
    };
    Ok((ctx, result))
}

/// Element kinds shared by every tuple-literal return in `body`, if they
/// agree; None when returns disagree or are not tuple literals.
fn tuple_return_elems(body: &[Stmt]) -> Option<Vec<TypeKind>> {
    let mut agreed: Option<Vec<TypeKind>> = None;
    let mut consistent = true;
    visit_returns_shallow(body, &mut |value| {
        let Some(Expr {
            node: ExprNode::Tuple(els),
            ..
        }) = value
        else {
            consistent = false;
            return;
        };
        let kinds: Option<Vec<TypeKind>> = els.iter().map(|e| e.inferred).collect();
        let Some(kinds) = kinds else {
            consistent = false;
            return;
        };
        match &agreed {
            None => agreed = Some(kinds),
            Some(prev) if *prev == kinds => {}
            Some(_) => consistent = false,
        }
    });
    if consistent { agreed } else { None }
}

fn visit_returns_shallow(body: &[Stmt], f: &mut dyn FnMut(Option<&Expr>)) {
    for s in body {
        match &s.node {
            StmtNode::Return(v) => f(v.as_ref()),
            StmtNode::FunctionDef(_) | StmtNode::ClassDef(_) => {}
            _ => {
                for b in crate::ast::child_bodies(s) {
                    visit_returns_shallow(b, f);
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

    #[test]
    fn test_annotation_union() {
        // int | None
        let ann = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::BitOr,
                lhs: Box::new(name("int")),
                rhs: Box::new(Expr::new(ExprNode::NoneLit, sp())),
            },
            sp(),
        );
        let info = annotation_info(&ann);
        assert!(info.mask.contains(TypeKind::Int));
        assert!(info.mask.contains(TypeKind::NoneType));
    }

    #[test]
    fn test_annotation_list_elem() {
        // list[int]
        let ann = Expr::new(
            ExprNode::Subscript {
                value: Box::new(name("list")),
                index: Box::new(name("int")),
                ctx: ExprCtx::Load,
            },
            sp(),
        );
        let info = annotation_info(&ann);
        assert!(info.mask.contains(TypeKind::List));
        assert_eq!(info.list_elem, Some(TypeMask::of(TypeKind::Int)));
    }

    #[test]
    fn test_signature_from_def() {
        let f = FunctionDef {
            name: "add".to_string(),
            params: vec![
                ParamDecl::simple("a", Some(name("int"))),
                ParamDecl::simple("b", Some(name("int"))),
            ],
            body: vec![],
            returns: Some(name("int")),
            decorators: vec![],
            is_async: false,
            span: sp(),
        };
        let sig = signature_of(&f);
        assert_eq!(sig.param_kinds, vec![TypeKind::Int, TypeKind::Int]);
        assert_eq!(sig.return_kind, TypeKind::Int);
    }

    #[test]
    fn test_analyze_simple_module() {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(FunctionDef {
                name: "f".to_string(),
                params: vec![ParamDecl::simple("a", Some(name("int")))],
                body: vec![Stmt::new(StmtNode::Return(Some(name("a"))), sp())],
                returns: Some(name("int")),
                decorators: vec![],
                is_async: false,
                span: sp(),
            }),
            sp(),
        ));
        let (ctx, result) = analyze_module(&mut m).expect("analysis should pass");
        assert!(ctx.signatures.contains_key("f"));
        assert_eq!(result.return_param_idx.get("f"), Some(&0));
    }

    #[test]
    fn test_analyze_reports_undefined_name() {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(StmtNode::Expr(name("ghost")), sp()));
        let err = analyze_module(&mut m).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].message.contains("undefined name"));
    }

    #[test]
    fn test_class_collection_with_inheritance() {
        let base = ClassDef {
            name: "Base".to_string(),
            bases: vec![],
            decorators: vec![],
            body: vec![Stmt::new(
                StmtNode::FunctionDef(FunctionDef {
                    name: "ping".to_string(),
                    params: vec![ParamDecl::simple("self", None)],
                    body: vec![Stmt::new(StmtNode::Return(None), sp())],
                    returns: None,
                    decorators: vec![],
                    is_async: false,
                    span: sp(),
                }),
                sp(),
            )],
            span: sp(),
        };
        let derived = ClassDef {
            name: "Derived".to_string(),
            bases: vec!["Base".to_string()],
            decorators: vec![],
            body: vec![],
            span: sp(),
        };
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(StmtNode::ClassDef(base), sp()));
        m.body.push(Stmt::new(StmtNode::ClassDef(derived), sp()));
        let (ctx, _) = analyze_module(&mut m).expect("analysis should pass");
        assert!(ctx.classes["Derived"].methods.contains_key("ping"));
    }
}
