//! CodeGen state and core value types.

use crate::ast::TypeKind;
use crate::sema::{SemaContext, SemaResult};
use std::collections::HashMap;

/// Kind of an SSA value carried through lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    I32,
    I1,
    F64,
    Ptr,
}

impl ValueKind {
    pub fn ir_type(self) -> &'static str {
        match self {
            ValueKind::I32 => "i32",
            ValueKind::I1 => "i1",
            ValueKind::F64 => "double",
            ValueKind::Ptr => "ptr",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            ValueKind::I32 => "0",
            ValueKind::I1 => "false",
            ValueKind::F64 => "0.0",
            ValueKind::Ptr => "null",
        }
    }

    pub fn of(kind: TypeKind) -> ValueKind {
        match kind {
            TypeKind::Int => ValueKind::I32,
            TypeKind::Bool => ValueKind::I1,
            TypeKind::Float => ValueKind::F64,
            _ => ValueKind::Ptr,
        }
    }
}

/// Compile-time heap-kind hint for pointer values; picks the runtime
/// function family at dispatch sites (e.g. `len`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrTag {
    Unknown,
    Str,
    List,
    Dict,
    Object,
}

impl PtrTag {
    pub fn of(kind: TypeKind) -> PtrTag {
        match kind {
            TypeKind::Str => PtrTag::Str,
            TypeKind::List | TypeKind::Tuple | TypeKind::Set => PtrTag::List,
            TypeKind::Dict => PtrTag::Dict,
            TypeKind::Class => PtrTag::Object,
            _ => PtrTag::Unknown,
        }
    }
}

/// One lowered SSA value: its printable IR name (register or literal), its
/// kind, and the pointer tag when `kind == Ptr`.
#[derive(Debug, Clone)]
pub struct Value {
    pub repr: String,
    pub kind: ValueKind,
    pub tag: PtrTag,
}

impl Value {
    pub fn new(repr: impl Into<String>, kind: ValueKind) -> Self {
        Value {
            repr: repr.into(),
            kind,
            tag: PtrTag::Unknown,
        }
    }

    pub fn tagged(repr: impl Into<String>, tag: PtrTag) -> Self {
        Value {
            repr: repr.into(),
            kind: ValueKind::Ptr,
            tag,
        }
    }
}

/// A local variable's stack slot.
#[derive(Debug, Clone)]
pub struct Slot {
    /// The alloca register, e.g. `%x.slot`.
    pub ptr: String,
    pub kind: ValueKind,
    pub tag: PtrTag,
}

/// Exception context of an open `try` region: where invokes unwind to and
/// where raise forwarding branches.
#[derive(Debug, Clone)]
pub struct TryContext {
    pub lpad_label: String,
    pub check_label: String,
}

/// Debug-info interning state; flushed as the trailing metadata block.
#[derive(Debug, Default)]
pub struct DebugInfo {
    pub next_id: usize,
    /// Lines of the trailing metadata block, in id order.
    pub entries: Vec<String>,
    /// (line, col, scope-id) -> location id
    pub locations: HashMap<(u32, u32, usize), usize>,
    pub file_id: Option<usize>,
    pub cu_id: Option<usize>,
    pub expr_id: Option<usize>,
    /// kind name -> basic type id
    pub basic_types: HashMap<&'static str, usize>,
    pub subprograms: Vec<usize>,
}

impl DebugInfo {
    pub fn fresh_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// LLVM-IR text generator for one module.
pub struct CodeGen<'a> {
    pub(super) ctx: &'a SemaContext,
    pub(super) analysis: &'a SemaResult,
    pub(super) output: String,
    pub(super) string_globals: String,
    pub(super) string_constants: HashMap<String, String>, // content -> global name
    pub(super) temp_counter: usize,
    pub(super) label_counter: usize,
    pub(super) slots: HashMap<String, Slot>,
    /// Local name -> class, for instance method dispatch.
    pub(super) class_bindings: HashMap<String, String>,
    pub(super) break_labels: Vec<String>,
    pub(super) continue_labels: Vec<String>,
    pub(super) try_stack: Vec<TryContext>,
    pub(super) current_return: ValueKind,
    pub(super) current_return_void: bool,
    pub(super) current_return_tuple: Option<Vec<ValueKind>>,
    /// Slot holding the exception object bound by the innermost handler,
    /// for bare `raise`.
    pub(super) current_handler_exc: Option<String>,
    pub(super) current_fn: String,
    pub(super) current_scope_id: usize,
    pub(super) dbg: DebugInfo,
    /// True once the current basic block has been terminated (ret/br).
    pub(super) block_terminated: bool,
}

impl<'a> CodeGen<'a> {
    pub fn new(ctx: &'a SemaContext, analysis: &'a SemaResult) -> Self {
        CodeGen {
            ctx,
            analysis,
            output: String::new(),
            string_globals: String::new(),
            string_constants: HashMap::new(),
            temp_counter: 0,
            label_counter: 0,
            slots: HashMap::new(),
            class_bindings: HashMap::new(),
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            try_stack: Vec::new(),
            current_return: ValueKind::I32,
            current_return_void: false,
            current_return_tuple: None,
            current_handler_exc: None,
            current_fn: String::new(),
            current_scope_id: 0,
            dbg: DebugInfo::default(),
            block_terminated: false,
        }
    }

    /// Fresh SSA temp, `%tN`.
    pub(super) fn fresh_temp(&mut self) -> String {
        let t = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    /// Fresh block label with a readable prefix.
    pub(super) fn fresh_label(&mut self, prefix: &str) -> String {
        let l = format!("{}{}", prefix, self.label_counter);
        self.label_counter += 1;
        l
    }

    /// Mangle a source-level function name into an IR symbol.
    pub(super) fn mangle(name: &str) -> String {
        let mut out = String::from("pycc_fn_");
        for c in name.chars() {
            if c.is_alphanumeric() || c == '_' {
                out.push(c);
            } else {
                out.push_str(&format!("_x{:02X}_", c as u32));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_mapping() {
        assert_eq!(ValueKind::of(TypeKind::Int), ValueKind::I32);
        assert_eq!(ValueKind::of(TypeKind::Bool), ValueKind::I1);
        assert_eq!(ValueKind::of(TypeKind::Float), ValueKind::F64);
        assert_eq!(ValueKind::of(TypeKind::Str), ValueKind::Ptr);
        assert_eq!(ValueKind::I32.ir_type(), "i32");
        assert_eq!(ValueKind::Ptr.default_value(), "null");
    }

    #[test]
    fn test_ptr_tag_mapping() {
        assert_eq!(PtrTag::of(TypeKind::Str), PtrTag::Str);
        assert_eq!(PtrTag::of(TypeKind::List), PtrTag::List);
        assert_eq!(PtrTag::of(TypeKind::Dict), PtrTag::Dict);
        assert_eq!(PtrTag::of(TypeKind::Class), PtrTag::Object);
        assert_eq!(PtrTag::of(TypeKind::Int), PtrTag::Unknown);
    }

    #[test]
    fn test_mangle() {
        assert_eq!(CodeGen::mangle("main"), "pycc_fn_main");
        assert_eq!(CodeGen::mangle("outer.inner"), "pycc_fn_outer_x2E_inner");
    }
}
