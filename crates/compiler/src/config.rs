//! Compiler configuration.
//!
//! The CLI builds a [`CompilerConfig`] from flags; a `pycc.toml` at the
//! project root supplies defaults. The core consumes the record as-is and
//! never parses arguments itself.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl Default for ColorMode {
    fn default() -> Self {
        ColorMode::Auto
    }
}

fn default_context_width() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Optimizer passes to skip, by pass name (e.g. "LoopUnroll").
    pub disabled_passes: Vec<String>,
    /// Run the external `opt` stage before compiling.
    pub optimize: bool,
    /// Keep the intermediate `.ll` file next to the output binary.
    pub keep_ir: bool,
    /// Stop after writing IR; skip the toolchain.
    pub emit_ir_only: bool,
    /// Lines of source context shown around diagnostics.
    #[serde(default = "default_context_width")]
    pub context_width: usize,
    pub color: ColorMode,
    /// Directory containing libpycc_runtime.a.
    pub runtime_lib_dir: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            disabled_passes: Vec::new(),
            optimize: false,
            keep_ir: false,
            emit_ir_only: false,
            context_width: default_context_width(),
            color: ColorMode::Auto,
            runtime_lib_dir: None,
        }
    }
}

impl CompilerConfig {
    pub fn pass_enabled(&self, name: &str) -> bool {
        !self.disabled_passes.iter().any(|p| p == name)
    }

    /// Load defaults from a `pycc.toml` file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = CompilerConfig::default();
        assert!(c.pass_enabled("CSE"));
        assert_eq!(c.context_width, 2);
        assert_eq!(c.color, ColorMode::Auto);
    }

    #[test]
    fn test_disabled_pass() {
        let c = CompilerConfig {
            disabled_passes: vec!["LoopUnroll".to_string()],
            ..CompilerConfig::default()
        };
        assert!(!c.pass_enabled("LoopUnroll"));
        assert!(c.pass_enabled("CSE"));
    }

    #[test]
    fn test_toml_round_trip() {
        let parsed: CompilerConfig = toml::from_str(
            r#"
            disabled_passes = ["GVN"]
            optimize = true
            color = "never"
            "#,
        )
        .unwrap();
        assert!(parsed.optimize);
        assert!(!parsed.pass_enabled("GVN"));
        assert_eq!(parsed.color, ColorMode::Never);
    }
}
