//! Function signatures, class tables, and the typed stdlib surface.

use crate::ast::TypeKind;
use crate::sema::types::TypeMask;
use std::collections::HashMap;

/// Full description of one declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: TypeKind,
    pub is_vararg: bool,
    pub is_kwvararg: bool,
    pub is_kwonly: bool,
    pub is_posonly: bool,
    pub has_default: bool,
    /// Declared union for the parameter; `EMPTY` means unannotated.
    pub union_mask: TypeMask,
    /// Element union for `list[T]`-annotated parameters.
    pub list_elem_mask: Option<TypeMask>,
}

impl Param {
    pub fn positional(name: impl Into<String>, kind: TypeKind) -> Self {
        Param {
            name: name.into(),
            kind,
            is_vararg: false,
            is_kwvararg: false,
            is_kwonly: false,
            is_posonly: false,
            has_default: false,
            union_mask: TypeMask::of(kind),
            list_elem_mask: None,
        }
    }
}

/// One function's callable surface.
///
/// `param_kinds` is the positional-only fast path used when no keyword or
/// star parameters are involved; `params` is the full list used for
/// keyword/vararg binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub return_kind: TypeKind,
    pub return_mask: TypeMask,
    pub param_kinds: Vec<TypeKind>,
    pub params: Option<Vec<Param>>,
    /// Element kinds for tuple-returning functions, when declared.
    pub return_tuple_elems: Option<Vec<TypeKind>>,
}

impl Signature {
    pub fn simple(param_kinds: Vec<TypeKind>, return_kind: TypeKind) -> Self {
        Signature {
            return_kind,
            return_mask: TypeMask::of(return_kind),
            param_kinds,
            params: None,
            return_tuple_elems: None,
        }
    }

    pub fn arity(&self) -> usize {
        self.param_kinds.len()
    }
}

/// Per-class method and attribute tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassInfo {
    pub methods: HashMap<String, Signature>,
    pub bases: Vec<String>,
    pub attribute_kinds: HashMap<String, TypeMask>,
}

/// Merge base classes into each derived class: left-to-right linearization,
/// base members inherited only when not overridden.
pub fn linearize_bases(classes: &mut HashMap<String, ClassInfo>) {
    let names: Vec<String> = classes.keys().cloned().collect();
    for name in names {
        let bases = classes.get(&name).map(|c| c.bases.clone()).unwrap_or_default();
        for base in bases {
            let Some(base_info) = classes.get(&base).cloned() else {
                continue;
            };
            let derived = classes.get_mut(&name).expect("class present");
            for (m, sig) in base_info.methods {
                derived.methods.entry(m).or_insert(sig);
            }
            for (a, mask) in base_info.attribute_kinds {
                derived.attribute_kinds.entry(a).or_insert(mask);
            }
        }
    }
}

/// Typed fast path for a recognized stdlib module function: expected arity
/// and return kind. Unlisted functions fall back to an opaque result.
pub fn stdlib_fn(module: &str, func: &str) -> Option<(usize, TypeKind)> {
    let entry = match (module, func) {
        ("math", "sqrt" | "sin" | "cos" | "tan" | "log" | "exp" | "fabs") => (1, TypeKind::Float),
        ("math", "pow") => (2, TypeKind::Float),
        ("math", "floor" | "ceil") => (1, TypeKind::Int),
        ("subprocess", "run" | "call" | "check_call") => (1, TypeKind::Int),
        ("sys", "exit") => (1, TypeKind::NoneType),
        ("time", "time") => (0, TypeKind::Float),
        ("time", "sleep") => (1, TypeKind::NoneType),
        ("os", "getcwd") => (0, TypeKind::Str),
        ("os", "getenv") => (1, TypeKind::Str),
        ("os", "mkdir" | "remove") => (1, TypeKind::Bool),
        ("os", "rename") => (2, TypeKind::Bool),
        ("random", "random") => (0, TypeKind::Float),
        ("random", "randint") => (2, TypeKind::Int),
        ("secrets", "token_hex") => (1, TypeKind::Str),
        ("uuid", "uuid4") => (0, TypeKind::Str),
        ("base64", "b64encode" | "b64decode") => (1, TypeKind::Bytes),
        ("binascii", "hexlify") => (1, TypeKind::Bytes),
        ("binascii", "unhexlify") => (1, TypeKind::Bytes),
        ("hashlib", "sha256" | "sha512") => (1, TypeKind::Str),
        ("hmac", "digest") => (3, TypeKind::Str),
        ("json", "dumps") => (1, TypeKind::Str),
        ("struct", "calcsize") => (1, TypeKind::Int),
        ("struct", "pack") => (2, TypeKind::Bytes),
        ("struct", "unpack") => (2, TypeKind::Tuple),
        _ => return None,
    };
    Some(entry)
}

/// Typed module-level attribute (non-call), e.g. `sys.maxsize`. Every name
/// accepted here has a constant or shim lowering in codegen.
pub fn stdlib_attr(module: &str, attr: &str) -> Option<TypeKind> {
    let kind = match (module, attr) {
        ("sys", "platform" | "version") => TypeKind::Str,
        ("sys", "maxsize") => TypeKind::Int,
        ("math", "pi" | "e" | "tau" | "inf" | "nan") => TypeKind::Float,
        ("errno", name) if errno_value(name).is_some() => TypeKind::Int,
        _ => return None,
    };
    Some(kind)
}

/// POSIX errno constants recognized by the typed surface; codegen lowers
/// them to immediate ints from this same table.
pub fn errno_value(name: &str) -> Option<i32> {
    Some(match name {
        "EPERM" => 1,
        "ENOENT" => 2,
        "ESRCH" => 3,
        "EINTR" => 4,
        "EIO" => 5,
        "ENXIO" => 6,
        "E2BIG" => 7,
        "ENOEXEC" => 8,
        "EBADF" => 9,
        "ECHILD" => 10,
        "EAGAIN" => 11,
        "ENOMEM" => 12,
        "EACCES" => 13,
        "EFAULT" => 14,
        "EBUSY" => 16,
        "EEXIST" => 17,
        "EXDEV" => 18,
        "ENODEV" => 19,
        "ENOTDIR" => 20,
        "EISDIR" => 21,
        "EINVAL" => 22,
        "ENFILE" => 23,
        "EMFILE" => 24,
        "ENOTTY" => 25,
        "EFBIG" => 27,
        "ENOSPC" => 28,
        "ESPIPE" => 29,
        "EROFS" => 30,
        "EMLINK" => 31,
        "EPIPE" => 32,
        "EDOM" => 33,
        "ERANGE" => 34,
        _ => return None,
    })
}

/// True when `name` is a module the analyzer carries a typed surface for.
pub fn is_stdlib_module(name: &str) -> bool {
    matches!(
        name,
        "math"
            | "subprocess"
            | "sys"
            | "time"
            | "os"
            | "random"
            | "secrets"
            | "uuid"
            | "base64"
            | "binascii"
            | "hashlib"
            | "hmac"
            | "json"
            | "struct"
            | "errno"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_simple() {
        let sig = Signature::simple(vec![TypeKind::Int, TypeKind::Int], TypeKind::Int);
        assert_eq!(sig.arity(), 2);
        assert_eq!(sig.return_kind, TypeKind::Int);
        assert!(sig.params.is_none());
    }

    #[test]
    fn test_linearize_inherits_unoverridden() {
        let mut classes = HashMap::new();
        let mut base = ClassInfo::default();
        base.methods
            .insert("area".to_string(), Signature::simple(vec![], TypeKind::Int));
        base.attribute_kinds
            .insert("tag".to_string(), TypeMask::of(TypeKind::Str));
        classes.insert("Base".to_string(), base);

        let mut derived = ClassInfo {
            bases: vec!["Base".to_string()],
            ..ClassInfo::default()
        };
        derived.methods.insert(
            "area".to_string(),
            Signature::simple(vec![], TypeKind::Float),
        );
        classes.insert("Derived".to_string(), derived);

        linearize_bases(&mut classes);
        let d = &classes["Derived"];
        // Override wins; unoverridden attribute flows down.
        assert_eq!(d.methods["area"].return_kind, TypeKind::Float);
        assert_eq!(d.attribute_kinds["tag"], TypeMask::of(TypeKind::Str));
    }

    #[test]
    fn test_stdlib_surface() {
        assert_eq!(stdlib_fn("math", "sqrt"), Some((1, TypeKind::Float)));
        assert_eq!(stdlib_fn("subprocess", "run"), Some((1, TypeKind::Int)));
        assert_eq!(stdlib_fn("math", "no_such"), None);
        assert_eq!(stdlib_attr("sys", "maxsize"), Some(TypeKind::Int));
        assert!(is_stdlib_module("hashlib"));
        assert!(!is_stdlib_module("collections_ext"));
    }

    #[test]
    fn test_errno_surface_is_closed() {
        assert_eq!(errno_value("ENOENT"), Some(2));
        assert_eq!(errno_value("EINVAL"), Some(22));
        assert_eq!(errno_value("ENOTREAL"), None);
        // Only tabled names type-check as errno attributes.
        assert_eq!(stdlib_attr("errno", "EPIPE"), Some(TypeKind::Int));
        assert_eq!(stdlib_attr("errno", "ENOTREAL"), None);
    }
}
