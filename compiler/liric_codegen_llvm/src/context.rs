//! Wraps the inkwell `Context`/`Module` pair each `compile_function` call
//! gets, plus the `liric_ir::Type` -> LLVM type mapping every instruction
//! lowering goes through. `Type::Ptr`'s "no pointee" invariant maps onto
//! inkwell's opaque `PointerType` directly: there is no per-pointee LLVM
//! pointer type to reconstruct here, unlike pre-opaque-pointer LLVM.

use inkwell::context::Context;
use inkwell::module::Module as LlvmModule;
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum, FunctionType};
use inkwell::values::FunctionValue;
use inkwell::AddressSpace;

use liric_codegen_ssa::backend::BackendError;
use liric_ir::Type as LiricTy;

pub struct CodegenCtx<'ll> {
    pub ll_context: &'ll Context,
    pub ll_module: LlvmModule<'ll>,
}

impl<'ll> CodegenCtx<'ll> {
    pub fn new(ll_context: &'ll Context, ll_module: LlvmModule<'ll>) -> Self {
        CodegenCtx {
            ll_context,
            ll_module,
        }
    }

    pub fn ptr_type(&self) -> inkwell::types::PointerType<'ll> {
        self.ll_context.ptr_type(AddressSpace::default())
    }

    /// Maps a Liric value type onto its LLVM counterpart. `Type::Void` has
    /// no `BasicTypeEnum`; callers that might see it (a call's result
    /// type, a function's return type) check for it separately.
    pub fn basic_type(&self, ty: &LiricTy) -> Result<BasicTypeEnum<'ll>, BackendError> {
        Ok(match ty {
            LiricTy::Void => return Err(unsupported("void used as a value type")),
            LiricTy::I1 => self.ll_context.bool_type().into(),
            LiricTy::I8 => self.ll_context.i8_type().into(),
            LiricTy::I16 => self.ll_context.i16_type().into(),
            LiricTy::I32 => self.ll_context.i32_type().into(),
            LiricTy::I64 => self.ll_context.i64_type().into(),
            LiricTy::F32 => self.ll_context.f32_type().into(),
            LiricTy::F64 => self.ll_context.f64_type().into(),
            LiricTy::Ptr => self.ptr_type().into(),
            LiricTy::Array(elem, n) => self.basic_type(elem)?.array_type(*n as u32).into(),
            LiricTy::Struct(fields, packed) => {
                let field_tys = fields
                    .iter()
                    .map(|f| self.basic_type(f))
                    .collect::<Result<Vec<_>, _>>()?;
                self.ll_context.struct_type(&field_tys, *packed).into()
            }
            LiricTy::Function(..) => return Err(unsupported("function type used as a value type")),
        })
    }

    /// Builds an LLVM function type for a Liric signature, matched on the
    /// return type's own `BasicTypeEnum` variant since it doesn't expose
    /// `fn_type` uniformly across variants (mirrors `declare_fn` in the
    /// rustc-style codegen backend this crate used to carry).
    pub fn fn_type(
        &self,
        ret_ty: &LiricTy,
        param_tys: &[LiricTy],
        vararg: bool,
    ) -> Result<FunctionType<'ll>, BackendError> {
        let params: Vec<BasicMetadataTypeEnum> = param_tys
            .iter()
            .map(|t| self.basic_type(t).map(Into::into))
            .collect::<Result<_, _>>()?;
        Ok(if matches!(ret_ty, LiricTy::Void) {
            self.ll_context.void_type().fn_type(&params, vararg)
        } else {
            match self.basic_type(ret_ty)? {
                BasicTypeEnum::IntType(t) => t.fn_type(&params, vararg),
                BasicTypeEnum::FloatType(t) => t.fn_type(&params, vararg),
                BasicTypeEnum::PointerType(t) => t.fn_type(&params, vararg),
                BasicTypeEnum::ArrayType(t) => t.fn_type(&params, vararg),
                BasicTypeEnum::StructType(t) => t.fn_type(&params, vararg),
                BasicTypeEnum::VectorType(t) => t.fn_type(&params, vararg),
            }
        })
    }

    /// Declares `name` in the throwaway module if it isn't there yet. Used
    /// both for the function actually being compiled and for every
    /// callee it references, so the one-function module still verifies
    /// and the object the `TargetMachine` writes carries real
    /// relocations against those external names.
    pub fn declare_function(
        &self,
        name: &str,
        ret_ty: &LiricTy,
        param_tys: &[LiricTy],
        vararg: bool,
    ) -> Result<FunctionValue<'ll>, BackendError> {
        if let Some(existing) = self.ll_module.get_function(name) {
            return Ok(existing);
        }
        let fn_ty = self.fn_type(ret_ty, param_tys, vararg)?;
        Ok(self.ll_module.add_function(name, fn_ty, None))
    }
}

pub fn unsupported(msg: impl Into<String>) -> BackendError {
    BackendError::Unsupported {
        instruction: msg.into(),
    }
}

pub fn internal(msg: impl Into<String>) -> BackendError {
    BackendError::Internal {
        message: msg.into(),
    }
}
