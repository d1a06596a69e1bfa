//! LLVM IR code generation.
//!
//! Generates IR as text (`.ll`) for checked modules. Layout of one module,
//! in emission order: module header and target triple, runtime external
//! declarations, deduplicated private string globals, one `define` per
//! source function, the `pycc_module_init` stub, and the trailing
//! debug-metadata block.
//!
//! # Key Concepts
//!
//! ## Value representation
//!
//! Lowered values are `i32`, `i1`, `double`, or `ptr`. Names whose union
//! covers more than one kind live in boxed pointer slots; refined uses
//! unbox at the use site. Pointer values carry a compile-time tag
//! (string/list/dict/object) that picks the runtime function family at
//! dispatch sites and flows through returns of parameter-forwarding
//! functions.
//!
//! ## GC discipline
//!
//! Every function uses the `shadow-stack` GC strategy. Pointer-typed slots
//! are registered with `llvm.gcroot`; every pointer store into a rooted
//! slot is followed by a `pycc_gc_write_barrier` call. Aggregate literals
//! are built through scoped root slots so a collection triggered mid-
//! construction cannot reclaim them.
//!
//! ## Exceptions
//!
//! Functions carry the C++ personality. Inside a try region every
//! effectful runtime call is an `invoke` with its unwind edge on the
//! region's landing pad; raise forwarding branches to the region's
//! exception-check block, which dispatches on the runtime exception's
//! type-name string. `finally` re-checks the exception slot at its exit to
//! decide whether to continue unwinding.
//!
//! # Module Structure
//!
//! - `state.rs`: CodeGen struct, value kinds, pointer tags, try contexts
//! - `program.rs`: module and function emission
//! - `stmt.rs`: statement lowering, control flow, exception regions
//! - `expr.rs`: expression lowering, boxing, scoped roots
//! - `call.rs`: call-site lowering and the stdlib shim surface
//! - `globals.rs`: FNV-deduplicated string constants
//! - `runtime.rs`: the C-ABI declaration table
//! - `debug.rs`: debug-info metadata
//! - `driver.rs`: external toolchain stages
//! - `error.rs`: error types

mod call;
mod debug;
mod driver;
mod error;
mod expr;
mod globals;
mod program;
mod runtime;
mod state;
mod stmt;

pub use driver::{drive_toolchain, DriverOptions, EmitResult, ToolchainError};
pub use error::CodeGenError;
pub use program::get_target_triple;
pub use runtime::{emit_runtime_decls, RUNTIME_DECLARATIONS};
pub use state::CodeGen;
