//! Shared codegen infrastructure consumed by every backend lane (spec
//! §4.4-4.6): ABI classification built on top of `liric_ir::layout`, and
//! the `CompiledFunction`/`Backend` shapes that let `liric_isel`,
//! `liric_copy_patch`, and (optionally) `liric_codegen_llvm` plug into the
//! same JIT and object emitter unchanged.

pub mod abi;
pub mod backend;

pub use abi::{calling_convention_for, fn_abi_of};
pub use backend::{Backend, BackendError, CompiledFunction};
