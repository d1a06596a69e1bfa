//! pycc compiler library.
//!
//! Compiles a statically-typable subset of an indentation-structured
//! scripting language to native binaries. The external front end hands
//! this crate an AST module (JSON wire format, see [`ast::Module`]); the
//! pipeline is semantic analysis, AST-level optimization, LLVM-IR text
//! emission, and an external toolchain drive that links against the
//! `pycc-runtime` staticlib.
//!
//! ```rust,ignore
//! use pycc::{compile_file, CompilerConfig};
//!
//! let config = CompilerConfig::default();
//! compile_file(Path::new("main.ast.json"), Path::new("main"), &config)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod opt;
pub mod sema;
pub mod ssa;

pub use ast::Module;
pub use codegen::{CodeGen, CodeGenError, DriverOptions, EmitResult};
pub use config::{ColorMode, CompilerConfig};
pub use diag::Diagnostic;
pub use opt::{Optimizer, PassStats};

use std::fs;
use std::path::Path;

/// Run the front-end pipeline over an AST module and return IR text.
///
/// Sema runs twice: once to validate and annotate, and once after the
/// optimizer so rewritten nodes carry fresh kinds and canonical keys.
pub fn compile_module_to_ir(
    module: &mut Module,
    config: &CompilerConfig,
) -> Result<String, Vec<Diagnostic>> {
    sema::analyze_module(module)?;

    let optimizer = Optimizer::with_filter(|name| config.pass_enabled(name));
    let _stats = optimizer.run(module);

    let (ctx, analysis) = sema::analyze_module(module)?;
    let mut cg = CodeGen::new(&ctx, &analysis);
    cg.emit_module(module).map_err(|e| {
        vec![Diagnostic {
            message: e.to_string(),
            file: module.file.clone(),
            line: 0,
            col: 0,
        }]
    })
}

/// Compile a serialized AST module from disk into a native executable.
pub fn compile_file(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<EmitResult, Vec<Diagnostic>> {
    let text = fs::read_to_string(input).map_err(|e| {
        vec![Diagnostic {
            message: format!("failed to read {}: {}", input.display(), e),
            file: input.display().to_string(),
            line: 0,
            col: 0,
        }]
    })?;
    let mut module = Module::from_json(&text).map_err(|e| {
        vec![Diagnostic {
            message: e,
            file: input.display().to_string(),
            line: 0,
            col: 0,
        }]
    })?;

    let ir = compile_module_to_ir(&mut module, config)?;

    let ll_path = output.with_extension("ll");
    fs::write(&ll_path, &ir).map_err(|e| {
        vec![Diagnostic {
            message: format!("failed to write {}: {}", ll_path.display(), e),
            file: module.file.clone(),
            line: 0,
            col: 0,
        }]
    })?;

    if config.emit_ir_only {
        return Ok(EmitResult {
            ll_path,
            ..EmitResult::default()
        });
    }

    let opts = DriverOptions {
        optimize: config.optimize,
        runtime_lib_dir: config.runtime_lib_dir.clone(),
        ..DriverOptions::default()
    };
    let result = codegen::drive_toolchain(&ll_path, output, &opts).map_err(|e| {
        vec![Diagnostic {
            message: e.to_string(),
            file: module.file.clone(),
            line: 0,
            col: 0,
        }]
    })?;

    if !config.keep_ir {
        // The .ll is transient unless asked for; other artifacts stay for
        // inspection.
        let _ = fs::remove_file(&result.ll_path);
    }
    Ok(result)
}

/// Type-check a serialized AST module without generating code.
pub fn check_file(input: &Path) -> Result<(), Vec<Diagnostic>> {
    let text = fs::read_to_string(input).map_err(|e| {
        vec![Diagnostic {
            message: format!("failed to read {}: {}", input.display(), e),
            file: input.display().to_string(),
            line: 0,
            col: 0,
        }]
    })?;
    let mut module = Module::from_json(&text).map_err(|e| {
        vec![Diagnostic {
            message: e,
            file: input.display().to_string(),
            line: 0,
            col: 0,
        }]
    })?;
    sema::analyze_module(&mut module).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn sp(line: u32) -> Span {
        Span::new("main.py", line, 1)
    }

    fn int_fn() -> Module {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(FunctionDef {
                name: "answer".to_string(),
                params: vec![],
                body: vec![Stmt::new(
                    StmtNode::Return(Some(Expr::new(ExprNode::Int(42), sp(2)))),
                    sp(2),
                )],
                returns: Some(Expr::new(
                    ExprNode::Name {
                        id: "int".to_string(),
                        ctx: ExprCtx::Load,
                    },
                    sp(1),
                )),
                decorators: vec![],
                is_async: false,
                span: sp(1),
            }),
            sp(1),
        ));
        m
    }

    #[test]
    fn test_compile_module_to_ir() {
        let mut m = int_fn();
        let ir = compile_module_to_ir(&mut m, &CompilerConfig::default()).unwrap();
        assert!(ir.contains("define i32 @pycc_fn_answer()"));
        assert!(ir.contains("ret i32 42"));
        assert!(ir.contains("@pycc_module_init"));
    }

    #[test]
    fn test_compile_reports_diagnostics() {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(
            StmtNode::Expr(Expr::new(
                ExprNode::Name {
                    id: "ghost".to_string(),
                    ctx: ExprCtx::Load,
                },
                sp(1),
            )),
            sp(1),
        ));
        let err = compile_module_to_ir(&mut m, &CompilerConfig::default()).unwrap_err();
        assert!(err[0].message.contains("undefined name"));
    }

    #[test]
    fn test_emit_ir_only_writes_ll() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("main.ast.json");
        std::fs::write(&input, int_fn().to_json().unwrap()).unwrap();
        let output = dir.path().join("main");
        let config = CompilerConfig {
            emit_ir_only: true,
            ..CompilerConfig::default()
        };
        let result = compile_file(&input, &output, &config).unwrap();
        let ir = std::fs::read_to_string(&result.ll_path).unwrap();
        assert!(ir.contains("@pycc_fn_answer"));
    }

    #[test]
    fn test_check_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("main.ast.json");
        std::fs::write(&input, int_fn().to_json().unwrap()).unwrap();
        assert!(check_file(&input).is_ok());
    }
}
