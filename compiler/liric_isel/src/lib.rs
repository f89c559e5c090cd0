//! The ISEL backend (spec §4.4): a single-pass instruction-selector and
//! linear-scan-ish register allocator, the primary codegen lane. Shares
//! one `Prescan`/`FrameLayout`/`ValueCache` pipeline across both ISAs
//! spec.md scopes in; per-opcode emission lives in [`x86_64`] and
//! [`aarch64`], selected at construction time from a target triple.

pub mod aarch64;
pub mod frame;
pub mod prescan;
pub mod regalloc;
pub mod x86_64;

use liric_abi::TargetTriple;
use liric_codegen_ssa::backend::{Backend, BackendError, CompiledFunction};
use liric_ir::{FunctionId, Module};

/// Which ISA's emitter [`IselBackend::compile_function`] dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isa {
    X86_64,
    Aarch64,
}

impl Isa {
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Isa::Aarch64
        } else {
            Isa::X86_64
        }
    }

    pub fn from_triple(triple: Option<&TargetTriple>) -> Self {
        match triple {
            Some(t) if t.is_aarch64() => Isa::Aarch64,
            Some(_) => Isa::X86_64,
            None => Isa::host(),
        }
    }
}

/// The ISEL codegen lane (spec §4.4). Holds no per-function state between
/// calls; `Prescan`/`FrameLayout`/`ValueCache` are all constructed fresh
/// inside `compile_function`, matching the "one-pass" framing of the spec.
pub struct IselBackend {
    isa: Isa,
}

impl IselBackend {
    pub fn new(isa: Isa) -> Self {
        IselBackend { isa }
    }

    pub fn host() -> Self {
        IselBackend { isa: Isa::host() }
    }

    pub fn for_triple(triple: Option<&TargetTriple>) -> Self {
        IselBackend {
            isa: Isa::from_triple(triple),
        }
    }
}

impl Backend for IselBackend {
    fn name(&self) -> &'static str {
        "isel"
    }

    fn compile_function(
        &mut self,
        module: &Module,
        func_id: FunctionId,
    ) -> Result<CompiledFunction, BackendError> {
        let func = module.function(func_id);
        if func.is_decl {
            return Err(BackendError::Internal {
                message: format!("cannot compile a declaration: `{}`", func.name),
            });
        }
        match self.isa {
            Isa::X86_64 => x86_64::compile_function(module, func),
            Isa::Aarch64 => aarch64::compile_function(module, func),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_from_triple_detects_aarch64() {
        let triple = TargetTriple::new("aarch64", "unknown", "linux", "gnu", "");
        assert_eq!(Isa::from_triple(Some(&triple)), Isa::Aarch64);
    }

    #[test]
    fn isa_from_triple_defaults_x86_64() {
        let triple = TargetTriple::new("x86_64", "unknown", "linux", "gnu", "");
        assert_eq!(Isa::from_triple(Some(&triple)), Isa::X86_64);
    }
}
