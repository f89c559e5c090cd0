//! The pluggable backend as a tagged variant (spec §9: "the natural shape
//! is a tagged variant... not inheritance"), dispatching to whichever
//! codegen lane [`crate::Session`] was configured with.

use liric_abi::{BackendKind, TargetTriple};
use liric_codegen_ssa::backend::{Backend, BackendError, CompiledFunction};
use liric_copy_patch::CopyPatchBackend;
use liric_ir::{FunctionId, Module};
use liric_isel::IselBackend;

pub enum BackendLane {
    Isel(IselBackend),
    CopyPatch(CopyPatchBackend),
    #[cfg(feature = "llvm")]
    Llvm(liric_codegen_llvm::LlvmBackend),
}

impl BackendLane {
    pub fn new(kind: BackendKind, triple: Option<&TargetTriple>) -> Result<Self, BackendError> {
        match kind {
            BackendKind::Isel => Ok(BackendLane::Isel(IselBackend::for_triple(triple))),
            BackendKind::CopyPatch => Ok(BackendLane::CopyPatch(CopyPatchBackend::new(
                IselBackend::for_triple(triple),
            ))),
            #[cfg(feature = "llvm")]
            BackendKind::Llvm => Ok(BackendLane::Llvm(liric_codegen_llvm::LlvmBackend::new(triple)?)),
            #[cfg(not(feature = "llvm"))]
            BackendKind::Llvm => Err(BackendError::Internal {
                message: "backend = LLVM requires the `llvm` feature".to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendLane::Isel(b) => b.name(),
            BackendLane::CopyPatch(b) => b.name(),
            #[cfg(feature = "llvm")]
            BackendLane::Llvm(b) => b.name(),
        }
    }

    pub fn compile(&mut self, module: &Module, func_id: FunctionId) -> Result<CompiledFunction, BackendError> {
        match self {
            BackendLane::Isel(b) => b.compile_function(module, func_id),
            BackendLane::CopyPatch(b) => b.compile_function(module, func_id),
            #[cfg(feature = "llvm")]
            BackendLane::Llvm(b) => b.compile_function(module, func_id),
        }
    }
}
