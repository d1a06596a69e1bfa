//! Debug-info metadata: compilation unit, file, basic types, subprograms,
//! local variables, and interned source locations. Everything renders into
//! a trailing metadata block after the last function.

use crate::ast::Stmt;
use super::state::{CodeGen, ValueKind};
use super::CodeGenError;
use std::fmt::Write as _;

impl CodeGen<'_> {
    /// Create the per-module metadata roots: file, compile unit, the four
    /// basic types, and the shared empty DIExpression.
    pub(super) fn dbg_init(&mut self, file: &str) {
        let file_id = self.dbg.fresh_id();
        self.dbg
            .entries
            .push(format!("!{} = !DIFile(filename: \"{}\", directory: \".\")", file_id, file));
        self.dbg.file_id = Some(file_id);

        let cu_id = self.dbg.fresh_id();
        self.dbg.entries.push(format!(
            "!{} = distinct !DICompileUnit(language: DW_LANG_C, file: !{}, producer: \"pycc\", isOptimized: false, runtimeVersion: 0, emissionKind: FullDebug)",
            cu_id, file_id
        ));
        self.dbg.cu_id = Some(cu_id);

        for (name, size, encoding) in [
            ("int", 32, "DW_ATE_signed"),
            ("bool", 8, "DW_ATE_boolean"),
            ("double", 64, "DW_ATE_float"),
        ] {
            let id = self.dbg.fresh_id();
            self.dbg.entries.push(format!(
                "!{} = !DIBasicType(name: \"{}\", size: {}, encoding: {})",
                id, name, size, encoding
            ));
            self.dbg.basic_types.insert(name, id);
        }
        let ptr_id = self.dbg.fresh_id();
        self.dbg.entries.push(format!(
            "!{} = !DIDerivedType(tag: DW_TAG_pointer_type, baseType: null, size: 64)",
            ptr_id
        ));
        self.dbg.basic_types.insert("ptr", ptr_id);

        let expr_id = self.dbg.fresh_id();
        self.dbg
            .entries
            .push(format!("!{} = !DIExpression()", expr_id));
        self.dbg.expr_id = Some(expr_id);
    }

    /// Subprogram node for one function; becomes the scope of its
    /// locations and variables.
    pub(super) fn dbg_subprogram(&mut self, name: &str, line: u32) -> usize {
        let id = self.dbg.fresh_id();
        let file = self.dbg.file_id.expect("dbg_init first");
        let cu = self.dbg.cu_id.expect("dbg_init first");
        self.dbg.entries.push(format!(
            "!{} = distinct !DISubprogram(name: \"{}\", scope: !{}, file: !{}, line: {}, unit: !{}, spFlags: DISPFlagDefinition)",
            id, name, file, file, line, cu
        ));
        self.dbg.subprograms.push(id);
        id
    }

    /// Interned location id for a (line, col) under the current scope.
    pub(super) fn dbg_location(&mut self, line: u32, col: u32) -> usize {
        let scope = self.current_scope_id;
        if let Some(&id) = self.dbg.locations.get(&(line, col, scope)) {
            return id;
        }
        let id = self.dbg.fresh_id();
        self.dbg.entries.push(format!(
            "!{} = !DILocation(line: {}, column: {}, scope: !{})",
            id, line, col, scope
        ));
        self.dbg.locations.insert((line, col, scope), id);
        id
    }

    /// DILocalVariable node plus the `llvm.dbg.declare` call tying it to a
    /// slot.
    pub(super) fn dbg_declare_local(
        &mut self,
        ir: &mut String,
        name: &str,
        slot_ptr: &str,
        kind: ValueKind,
        line: u32,
    ) -> Result<(), CodeGenError> {
        let ty_name = match kind {
            ValueKind::I32 => "int",
            ValueKind::I1 => "bool",
            ValueKind::F64 => "double",
            ValueKind::Ptr => "ptr",
        };
        let ty = self.dbg.basic_types[ty_name];
        let file = self.dbg.file_id.expect("dbg_init first");
        let var_id = self.dbg.fresh_id();
        self.dbg.entries.push(format!(
            "!{} = !DILocalVariable(name: \"{}\", scope: !{}, file: !{}, line: {}, type: !{})",
            var_id, name, self.current_scope_id, file, line, ty
        ));
        let expr = self.dbg.expr_id.expect("dbg_init first");
        let loc = self.dbg_location(line.max(1), 1);
        writeln!(
            ir,
            "  call void @llvm.dbg.declare(metadata ptr {}, metadata !{}, metadata !{}), !dbg !{}",
            slot_ptr, var_id, expr, loc
        )?;
        Ok(())
    }

    /// Statement-level location marker: every statement with a non-zero
    /// source line carries a `!dbg` reference.
    pub(super) fn emit_stmt_location(
        &mut self,
        s: &Stmt,
        ir: &mut String,
    ) -> Result<(), CodeGenError> {
        if s.span.line == 0 || self.dbg.file_id.is_none() {
            return Ok(());
        }
        let loc = self.dbg_location(s.span.line, s.span.col.max(1));
        writeln!(ir, "  call void @llvm.donothing(), !dbg !{}", loc)?;
        Ok(())
    }

    /// Render the trailing metadata block.
    pub(super) fn dbg_flush(&mut self, ir: &mut String) -> Result<(), CodeGenError> {
        if let Some(cu) = self.dbg.cu_id {
            writeln!(ir, "!llvm.dbg.cu = !{{!{}}}", cu)?;
            let flags_id = self.dbg.fresh_id();
            writeln!(ir, "!llvm.module.flags = !{{!{}}}", flags_id)?;
            self.dbg.entries.push(format!(
                "!{} = !{{i32 2, !\"Debug Info Version\", i32 3}}",
                flags_id
            ));
        }
        for entry in &self.dbg.entries {
            writeln!(ir, "{}", entry)?;
        }
        Ok(())
    }
}
