//! The common output shape produced by any codegen backend, and the
//! `Backend` trait each lane (`liric_isel`, `liric_copy_patch`, and the
//! optional `liric_codegen_llvm`) implements. The session dispatches
//! across lanes through a tagged enum wrapping this trait (spec §9:
//! "the natural shape is a tagged variant... not inheritance"), never
//! through dynamic dispatch on the trait object itself.

use liric_abi::RelocKind;
use liric_ir::{FunctionId, Module, SymbolId};
use std::fmt;

pub type PatchEntry = liric_abi::reloc::PatchEntry<SymbolId>;

/// Machine code for one function, plus every reference to a symbol whose
/// address wasn't known at emit time. `liric_jit` resolves these against
/// its symbol table; `liric_object` lowers them to ELF relocations.
#[derive(Clone, Debug)]
pub struct CompiledFunction {
    pub symbol: SymbolId,
    pub code: Vec<u8>,
    pub patches: Vec<PatchEntry>,
    /// Byte offsets, within `code`, of every stack-map-free call site that
    /// the JIT's lazy trampoline may need to re-enter (unused by the object
    /// emitter, which patches are resolved statically for).
    pub frame_size: u32,
}

/// Backend-internal failure, per spec §7: an `UNSUPPORTED` request (valid
/// IR the backend doesn't implement) or a `BACKEND` failure (an internal
/// codegen bug/resource exhaustion). The session maps both onto the public
/// `LiricError` taxonomy.
#[derive(Debug)]
pub enum BackendError {
    Unsupported { instruction: String },
    Internal { message: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unsupported { instruction } => {
                write!(f, "unsupported instruction: {instruction}")
            }
            BackendError::Internal { message } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// A codegen lane: takes a finalized function out of a module and returns
/// its machine code plus an unresolved-symbol patch list.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn compile_function(
        &mut self,
        module: &Module,
        func_id: FunctionId,
    ) -> Result<CompiledFunction, BackendError>;
}

/// Convenience used by backends that detect a relocatable call site:
/// bundles the bookkeeping spec §4.4 point 6 describes ("each emitted call
/// to an unresolved symbol... records a patch entry").
pub fn record_call_patch(
    patches: &mut Vec<PatchEntry>,
    offset: u32,
    symbol: SymbolId,
    kind: RelocKind,
) {
    patches.push(PatchEntry {
        offset,
        symbol,
        kind,
        addend: 0,
    });
}
