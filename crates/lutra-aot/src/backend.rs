//! One-time host code-generation backend setup.
//!
//! The hosting process calls [`initialize`] once before constructing any
//! [`crate::Compiler`]. The call is idempotent; constructing a compiler
//! before initialization is an error rather than an implicit trigger, so
//! the setup point is explicit in every embedding.

use std::sync::{Arc, OnceLock};

use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};

use crate::compiler::CompileError;

static HOST_ISA: OnceLock<Arc<dyn TargetIsa>> = OnceLock::new();

/// Set up code generation for the host processor.
///
/// Uses one fixed, aggressive configuration for every compilation. An
/// unsupported host processor family is a fatal configuration error here,
/// at startup, never a per-function error later.
pub fn initialize() -> Result<(), CompileError> {
    if HOST_ISA.get().is_some() {
        return Ok(());
    }

    let mut flags = settings::builder();
    flags
        .set("opt_level", "speed")
        .map_err(|e| CompileError::Backend(e.to_string()))?;
    flags
        .set("is_pic", "false")
        .map_err(|e| CompileError::Backend(e.to_string()))?;

    let isa = cranelift_native::builder()
        .map_err(|msg| CompileError::UnsupportedHost(msg.to_string()))?
        .finish(settings::Flags::new(flags))
        .map_err(|e| CompileError::Backend(e.to_string()))?;

    // A lost initialization race leaves an equivalent ISA in place.
    let _ = HOST_ISA.set(isa);
    Ok(())
}

/// The host ISA installed by [`initialize`].
pub(crate) fn host_isa() -> Result<Arc<dyn TargetIsa>, CompileError> {
    HOST_ISA
        .get()
        .cloned()
        .ok_or(CompileError::BackendNotInitialized)
}
