//! pycc CLI.
//!
//! Command-line interface for compiling serialized AST modules (produced
//! by the external front end) to executables and running standalone type
//! checks.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use pycc::{check_file, compile_file, ColorMode, CompilerConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "pycc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "pycc - compile typed script modules to executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an AST module (.ast.json) to an executable
    Build {
        /// Input AST module file
        input: PathBuf,

        /// Output executable path (defaults to input filename without extensions)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep intermediate LLVM IR file (.ll)
        #[arg(long)]
        keep_ir: bool,

        /// Stop after writing the .ll file
        #[arg(long)]
        emit_ir: bool,

        /// Run the external `opt` stage before compiling
        #[arg(short = 'O', long)]
        optimize: bool,

        /// Disable an optimizer pass by name (repeatable)
        #[arg(long = "no-pass", value_name = "PASS")]
        disabled_passes: Vec<String>,

        /// Lines of source context in diagnostics
        #[arg(long, default_value_t = 2)]
        context: usize,

        /// Diagnostic color mode
        #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
        color: ColorArg,

        /// Directory containing libpycc_runtime.a
        #[arg(long, value_name = "DIR")]
        runtime_lib: Option<PathBuf>,

        /// Project config file (defaults to ./pycc.toml when present)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Type-check an AST module without generating code
    Check {
        /// Input AST module files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            keep_ir,
            emit_ir,
            optimize,
            disabled_passes,
            context,
            color,
            runtime_lib,
            config,
        } => {
            let output = output.unwrap_or_else(|| {
                let stem = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                PathBuf::from(stem.split('.').next().unwrap_or("a.out"))
            });
            let mut cfg = load_config(config.as_deref());
            cfg.keep_ir = keep_ir;
            cfg.emit_ir_only = emit_ir;
            cfg.optimize = optimize;
            cfg.disabled_passes.extend(disabled_passes);
            cfg.context_width = context;
            cfg.color = match color {
                ColorArg::Auto => ColorMode::Auto,
                ColorArg::Always => ColorMode::Always,
                ColorArg::Never => ColorMode::Never,
            };
            if runtime_lib.is_some() {
                cfg.runtime_lib_dir = runtime_lib;
            }
            run_build(&input, &output, &cfg);
        }
        Commands::Check { inputs } => run_check(&inputs),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "pycc", &mut io::stdout());
        }
    }
}

fn load_config(explicit: Option<&Path>) -> CompilerConfig {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| {
            let default = PathBuf::from("pycc.toml");
            default.exists().then_some(default)
        });
    match path {
        Some(p) => match CompilerConfig::load(&p) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => CompilerConfig::default(),
    }
}

fn run_build(input: &Path, output: &Path, config: &CompilerConfig) {
    match compile_file(input, output, config) {
        Ok(_) => {}
        Err(diags) => {
            for d in &diags {
                eprintln!("{}", d);
            }
            eprintln!(
                "error: compilation failed with {} diagnostic(s)",
                diags.len()
            );
            process::exit(1);
        }
    }
}

fn run_check(inputs: &[PathBuf]) {
    let mut failed = false;
    for input in inputs {
        match check_file(input) {
            Ok(()) => println!("{}: ok", input.display()),
            Err(diags) => {
                for d in &diags {
                    eprintln!("{}", d);
                }
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
