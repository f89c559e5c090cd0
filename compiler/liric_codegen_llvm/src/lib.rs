//! The optional LLVM-backed codegen lane (spec §4.6), gated behind the
//! `llvm` feature on `liric_session`/`liric`. Rather than driving LLJIT,
//! `compile_function` builds a fresh, throwaway one-function
//! `inkwell::module::Module` per call, lowers just that function's body
//! into it (declaring every callee/global it references alongside), asks
//! a persistent `TargetMachine` to write it straight to an in-memory ELF
//! object, and slices that object back apart with the `object` crate to
//! get the same `(code, patches)` shape `liric_isel`/`liric_copy_patch`
//! produce. One throwaway module per function costs more than LLVM's own
//! incremental codegen would, but it keeps this lane's state to "one
//! `TargetMachine`", matching the rest of the workspace's preference for
//! stateless, per-call backend entry points over a persistent codegen
//! session.

pub mod context;
mod extract;
mod lower;

use inkwell::context::Context;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
    TargetTriple as LlvmTargetTriple,
};
use inkwell::OptimizationLevel;

use liric_abi::TargetTriple;
use liric_codegen_ssa::backend::{Backend, BackendError, CompiledFunction};
use liric_ir::{FunctionId, Module};
use tracing::instrument;

use context::{internal, CodegenCtx};

pub struct LlvmBackend {
    target_machine: TargetMachine,
}

impl LlvmBackend {
    pub fn new(triple: Option<&TargetTriple>) -> Result<Self, BackendError> {
        Target::initialize_all(&InitializationConfig::default());

        let triple_string = triple
            .map(|t| t.into_llvm_triple_string())
            .unwrap_or_else(|| TargetMachine::get_default_triple().as_str().to_string_lossy().into_owned());
        let llvm_triple = LlvmTargetTriple::create(&triple_string);

        let target = Target::from_triple(&llvm_triple)
            .map_err(|e| internal(format!("unknown llvm target triple `{triple_string}`: {e}")))?;
        let target_machine = target
            .create_target_machine(
                &llvm_triple,
                "generic",
                "",
                OptimizationLevel::None,
                RelocMode::Default,
                CodeModel::Default,
            )
            .ok_or_else(|| internal(format!("llvm could not build a target machine for `{triple_string}`")))?;

        Ok(LlvmBackend { target_machine })
    }
}

impl Backend for LlvmBackend {
    fn name(&self) -> &'static str {
        "llvm"
    }

    #[instrument(skip(self, module))]
    fn compile_function(
        &mut self,
        module: &Module,
        func_id: FunctionId,
    ) -> Result<CompiledFunction, BackendError> {
        let func = module.function(func_id);
        if func.is_decl {
            return Err(internal(format!("`{}` has no body to compile", func.name)));
        }

        let context = Context::create();
        let ll_module = context.create_module(func.name);
        ll_module.set_triple(&self.target_machine.get_triple());
        ll_module.set_data_layout(&self.target_machine.get_target_data().get_data_layout());
        let ctx = CodegenCtx::new(&context, ll_module);

        for (_, f) in module.functions() {
            ctx.declare_function(f.name, &f.ret_ty, f.param_tys, f.vararg)?;
        }
        for (_, g) in module.globals() {
            let ty = ctx.basic_type(&g.ty)?;
            let gv = ctx.ll_module.add_global(ty, None, g.name);
            if g.flags.is_const {
                gv.set_constant(true);
            }
            if g.initializer.is_none() {
                gv.set_linkage(inkwell::module::Linkage::External);
            }
        }

        let fn_value = ctx
            .ll_module
            .get_function(func.name)
            .ok_or_else(|| internal("function was declared but is missing from its own module"))?;
        lower::FnLowering::new(&ctx, module, func, fn_value)?.run()?;

        let buffer = self
            .target_machine
            .write_to_memory_buffer(&ctx.ll_module, FileType::Object)
            .map_err(|e| internal(format!("llvm object emission failed: {e}")))?;

        extract::extract(buffer.as_slice(), func.name, module)
    }
}
