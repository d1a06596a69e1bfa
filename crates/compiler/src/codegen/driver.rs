//! External toolchain driver.
//!
//! Runs up to three stages over the emitted `.ll` text: an optional `opt`
//! pass, compile-to-object, and the final link against the runtime
//! staticlib. A failing stage captures its full command line and exit
//! status; intermediate artifacts are retained for inspection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Output paths produced by a successful drive.
#[derive(Debug, Clone, Default)]
pub struct EmitResult {
    pub ll_path: PathBuf,
    pub asm_path: Option<PathBuf>,
    pub obj_path: PathBuf,
    pub bin_path: PathBuf,
}

/// A toolchain stage that exited non-zero (or failed to start).
#[derive(Debug)]
pub struct ToolchainError {
    pub command: String,
    pub status: Option<i32>,
    pub stderr: String,
}

impl fmt::Display for ToolchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(
                f,
                "toolchain stage failed (exit {}): {}\n{}",
                code, self.command, self.stderr
            ),
            None => write!(f, "toolchain stage failed to start: {}", self.command),
        }
    }
}

impl std::error::Error for ToolchainError {}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Run `opt` before compiling (also enabled by `PYCC_OPT=1`).
    pub optimize: bool,
    pub opt_level: String,
    /// Directory containing `libpycc_runtime.a`; falls back to the
    /// `PYCC_RUNTIME_LIB` environment variable.
    pub runtime_lib_dir: Option<PathBuf>,
    pub extra_lib_dirs: Vec<PathBuf>,
    pub extra_libs: Vec<String>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            optimize: false,
            opt_level: "-O2".to_string(),
            runtime_lib_dir: None,
            extra_lib_dirs: Vec::new(),
            extra_libs: Vec::new(),
        }
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn run_stage(mut cmd: Command) -> Result<(), ToolchainError> {
    let command = describe(&cmd);
    let output = cmd.output().map_err(|_| ToolchainError {
        command: command.clone(),
        status: None,
        stderr: String::new(),
    })?;
    if !output.status.success() {
        return Err(ToolchainError {
            command,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Compile `.ll` text already on disk into a native binary.
pub fn drive_toolchain(
    ll_path: &Path,
    bin_path: &Path,
    opts: &DriverOptions,
) -> Result<EmitResult, ToolchainError> {
    let mut result = EmitResult {
        ll_path: ll_path.to_path_buf(),
        asm_path: None,
        obj_path: bin_path.with_extension("o"),
        bin_path: bin_path.to_path_buf(),
    };

    // Stage 1: optional IR-level optimization.
    let optimize = opts.optimize || std::env::var("PYCC_OPT").is_ok_and(|v| v == "1");
    let compile_input = if optimize {
        let opted = ll_path.with_extension("opt.ll");
        let mut cmd = Command::new("opt");
        cmd.arg("-S")
            .arg(&opts.opt_level)
            .arg(ll_path)
            .arg("-o")
            .arg(&opted);
        run_stage(cmd)?;
        result.asm_path = Some(opted.clone());
        opted
    } else {
        ll_path.to_path_buf()
    };

    // Stage 2: compile to object.
    let mut compile = Command::new("clang");
    compile
        .arg("-c")
        .arg(&compile_input)
        .arg("-o")
        .arg(&result.obj_path);
    run_stage(compile)?;

    // Stage 3: link with the runtime library.
    let mut link = Command::new("clang");
    link.arg(&result.obj_path).arg("-o").arg(bin_path);
    let runtime_dir = opts
        .runtime_lib_dir
        .clone()
        .or_else(|| std::env::var("PYCC_RUNTIME_LIB").ok().map(PathBuf::from));
    if let Some(dir) = runtime_dir {
        link.arg("-L").arg(dir);
    }
    link.arg("-lpycc_runtime").arg("-lpthread").arg("-lm");
    for dir in &opts.extra_lib_dirs {
        link.arg("-L").arg(dir);
    }
    for lib in &opts.extra_libs {
        link.arg("-l").arg(lib);
    }
    run_stage(link)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_stage_captures_command() {
        let mut cmd = Command::new("pycc-no-such-toolchain-binary");
        cmd.arg("-c").arg("x.ll");
        let err = run_stage(cmd).unwrap_err();
        assert!(err.status.is_none());
        assert!(err.command.contains("pycc-no-such-toolchain-binary -c x.ll"));
        let rendered = err.to_string();
        assert!(rendered.contains("failed to start"));
    }

    #[test]
    fn test_default_options() {
        let opts = DriverOptions::default();
        assert!(!opts.optimize);
        assert_eq!(opts.opt_level, "-O2");
    }
}
