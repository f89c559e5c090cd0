//! Translates one `liric_ir::Function` definition into the body of an
//! LLVM function value, instruction by instruction, following the exact
//! operand conventions `liric_frontend::text` encodes and `liric_isel`
//! already consumes (type-sentinel operands ahead of `call`/cast/compare
//! values, a `gep`'s indices summed and scaled by its `result_ty` element
//! size, `phi` operands flattened as `[value, block, value, block, ...]`).
//!
//! Blocks are all pre-created before any instruction is lowered, and
//! `phi` incoming values are resolved in a second pass over the whole
//! function, so a loop's back-edge operand (defined in a block that
//! hasn't been visited yet when the header's `phi` is built) still
//! resolves correctly.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::values::{BasicValue, BasicValueEnum, FunctionValue, PhiValue};
use inkwell::{FloatPredicate, IntPredicate};

use liric_codegen_ssa::backend::BackendError;
use liric_ir::{
    BlockId, CastKind, FCmpPredicate, Function, ICmpPredicate, Instruction, Module, Opcode,
    Operand, SymbolId, Type as LiricTy, VReg,
};
use liric_utils::Idx;

use crate::context::{internal, unsupported, CodegenCtx};

/// `Operand::Undef(ty)`/`Operand::Null(ty)` sentinels carry a value's
/// real type ahead of it (calls, casts, compares); anything else falls
/// back to `i64`, matching `liric_isel::x86_64::type_sentinel_ty`.
fn sentinel_ty<'ir>(op: &Operand<'ir>) -> LiricTy<'ir> {
    match op {
        Operand::Undef(t) | Operand::Null(t) => *t,
        _ => LiricTy::I64,
    }
}

struct PhiFixup<'ir, 'll> {
    phi: PhiValue<'ll>,
    ty: LiricTy<'ir>,
    incoming: Vec<(Operand<'ir>, Operand<'ir>)>,
}

pub struct FnLowering<'a, 'ir, 'll> {
    ctx: &'a CodegenCtx<'ll>,
    module: &'a Module<'ir>,
    func: &'a Function<'ir>,
    builder: Builder<'ll>,
    blocks: Vec<BasicBlock<'ll>>,
    values: HashMap<VReg, BasicValueEnum<'ll>>,
    phi_fixups: Vec<PhiFixup<'ir, 'll>>,
}

impl<'a, 'ir, 'll> FnLowering<'a, 'ir, 'll> {
    pub fn new(
        ctx: &'a CodegenCtx<'ll>,
        module: &'a Module<'ir>,
        func: &'a Function<'ir>,
        fn_value: FunctionValue<'ll>,
    ) -> Result<Self, BackendError> {
        let builder = ctx.ll_context.create_builder();
        let blocks: Vec<BasicBlock<'ll>> = (0..func.blocks.iter_enumerated().count())
            .map(|i| ctx.ll_context.append_basic_block(fn_value, &format!("bb{i}")))
            .collect();

        let mut values = HashMap::new();
        for (i, param_vreg) in func.param_vregs.iter().enumerate() {
            let param = fn_value
                .get_nth_param(i as u32)
                .ok_or_else(|| internal("function value is missing a declared parameter"))?;
            values.insert(*param_vreg, param);
        }

        Ok(FnLowering {
            ctx,
            module,
            func,
            builder,
            blocks,
            values,
            phi_fixups: Vec::new(),
        })
    }

    fn llvm_block(&self, id: BlockId) -> BasicBlock<'ll> {
        self.blocks[id.idx()]
    }

    pub fn run(mut self) -> Result<(), BackendError> {
        for (id, block) in self.func.blocks.iter_enumerated() {
            self.builder.position_at_end(self.llvm_block(id));

            let phi_count = block.phis().count();
            for inst in block.instructions.iter().take(phi_count) {
                self.predefine_phi(inst)?;
            }
            for inst in block.instructions.iter().skip(phi_count) {
                self.lower_instr(inst)?;
            }
        }

        for fixup in &self.phi_fixups {
            for (val_op, block_op) in &fixup.incoming {
                let pred = self
                    .llvm_block(block_op.as_block().ok_or_else(|| internal("phi incoming operand is not a block"))?);
                let v = self.operand_value(val_op, &fixup.ty)?;
                fixup.phi.add_incoming(&[(&v as &dyn BasicValue, pred)]);
            }
        }

        Ok(())
    }

    fn predefine_phi(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let llty = self.ctx.basic_type(&inst.result_ty)?;
        let phi = self
            .builder
            .build_phi(llty, "phi")
            .map_err(|e| internal(e.to_string()))?;
        self.values.insert(inst.dest, phi.as_basic_value());
        self.phi_fixups.push(PhiFixup {
            phi,
            ty: inst.result_ty,
            incoming: inst.phi_incoming().collect(),
        });
        Ok(())
    }

    fn operand_value(
        &self,
        op: &Operand<'ir>,
        ty: &LiricTy<'ir>,
    ) -> Result<BasicValueEnum<'ll>, BackendError> {
        match op {
            Operand::VReg(v) => self
                .values
                .get(v)
                .copied()
                .ok_or_else(|| internal(format!("use of vreg {v:?} before its definition"))),
            Operand::ImmI64(v) => match self.ctx.basic_type(ty)? {
                inkwell::types::BasicTypeEnum::IntType(t) => Ok(t.const_int(*v as u64, true).into()),
                inkwell::types::BasicTypeEnum::PointerType(_) if *v == 0 => {
                    Ok(self.ctx.ptr_type().const_null().into())
                }
                _ => Err(unsupported("integer immediate used against a non-integer type")),
            },
            Operand::ImmF64(v) => match self.ctx.basic_type(ty)? {
                inkwell::types::BasicTypeEnum::FloatType(t) => Ok(t.const_float(*v).into()),
                _ => Err(unsupported("float immediate used against a non-float type")),
            },
            Operand::Null(_) => Ok(self.ctx.ptr_type().const_null().into()),
            Operand::Undef(t) => Ok(undef_value(self.ctx.basic_type(t)?)),
            Operand::Global(sym, offset) => self.global_address(*sym, *offset),
            Operand::Block(_) => Err(internal("a block id was used where a value was expected")),
        }
    }

    fn global_address(&self, sym: SymbolId, offset: i64) -> Result<BasicValueEnum<'ll>, BackendError> {
        let name = self.module.symbol_name(sym);
        let base_ptr = if let Some(f) = self.ctx.ll_module.get_function(name) {
            f.as_global_value().as_pointer_value()
        } else if let Some(g) = self.ctx.ll_module.get_global(name) {
            g.as_pointer_value()
        } else {
            return Err(internal(format!("reference to undeclared symbol `{name}`")));
        };
        if offset == 0 {
            return Ok(base_ptr.into());
        }
        let i8ty = self.ctx.ll_context.i8_type();
        let idx = self.ctx.ll_context.i64_type().const_int(offset as u64, true);
        let gep = unsafe {
            self.builder
                .build_gep(i8ty, base_ptr, &[idx], "goff")
                .map_err(|e| internal(e.to_string()))?
        };
        Ok(gep.into())
    }

    fn lower_instr(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        match inst.opcode {
            Opcode::Ret => {
                let v = self.operand_value(&inst.operands[0], &inst.result_ty)?;
                self.builder.build_return(Some(&v)).map_err(to_internal)?;
            }
            Opcode::RetVoid => {
                self.builder.build_return(None).map_err(to_internal)?;
            }
            Opcode::Br => {
                let target = inst.operands[0]
                    .as_block()
                    .ok_or_else(|| internal("br target is not a block"))?;
                self.builder
                    .build_unconditional_branch(self.llvm_block(target))
                    .map_err(to_internal)?;
            }
            Opcode::CondBr => {
                let cond = self
                    .operand_value(&inst.operands[0], &LiricTy::I1)?
                    .into_int_value();
                let t = inst.operands[1].as_block().ok_or_else(|| internal("condbr true target is not a block"))?;
                let f = inst.operands[2].as_block().ok_or_else(|| internal("condbr false target is not a block"))?;
                self.builder
                    .build_conditional_branch(cond, self.llvm_block(t), self.llvm_block(f))
                    .map_err(to_internal)?;
            }
            Opcode::Unreachable => {
                self.builder.build_unreachable().map_err(to_internal)?;
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::SRem
            | Opcode::UDiv
            | Opcode::URem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr => self.lower_int_binop(inst)?,

            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::FRem => {
                self.lower_float_binop(inst)?
            }
            Opcode::FNeg => {
                let v = self
                    .operand_value(&inst.operands[0], &inst.result_ty)?
                    .into_float_value();
                let r = self.builder.build_float_neg(v, "fneg").map_err(to_internal)?;
                self.values.insert(inst.dest, r.into());
            }

            Opcode::ICmp => self.lower_icmp(inst)?,
            Opcode::FCmp => self.lower_fcmp(inst)?,

            Opcode::Alloca => {
                let llty = self.ctx.basic_type(&inst.result_ty)?;
                let ptr = self.builder.build_alloca(llty, "alloca").map_err(to_internal)?;
                self.values.insert(inst.dest, ptr.into());
            }
            Opcode::Load => {
                let addr = self
                    .operand_value(&inst.operands[0], &LiricTy::Ptr)?
                    .into_pointer_value();
                let llty = self.ctx.basic_type(&inst.result_ty)?;
                let v = self.builder.build_load(llty, addr, "load").map_err(to_internal)?;
                self.values.insert(inst.dest, v);
            }
            Opcode::Store => {
                let val = self.operand_value(&inst.operands[0], &inst.result_ty)?;
                let addr = self
                    .operand_value(&inst.operands[1], &LiricTy::Ptr)?
                    .into_pointer_value();
                self.builder.build_store(addr, val).map_err(to_internal)?;
            }
            Opcode::Gep => self.lower_gep(inst)?,

            Opcode::Call => self.lower_call(inst)?,
            Opcode::Select => {
                let cond = self
                    .operand_value(&inst.operands[0], &LiricTy::I1)?
                    .into_int_value();
                let t = self.operand_value(&inst.operands[1], &inst.result_ty)?;
                let f = self.operand_value(&inst.operands[2], &inst.result_ty)?;
                let v = self.builder.build_select(cond, t, f, "sel").map_err(to_internal)?;
                self.values.insert(inst.dest, v);
            }

            Opcode::Cast(kind) => self.lower_cast(inst, kind)?,

            Opcode::ExtractValue => self.lower_extract_value(inst)?,
            Opcode::InsertValue => self.lower_insert_value(inst)?,

            Opcode::Phi => unreachable!("phis are lowered in the predefine pass"),
        }
        Ok(())
    }

    fn lower_int_binop(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let lhs = self
            .operand_value(&inst.operands[0], &inst.result_ty)?
            .into_int_value();
        let rhs = self
            .operand_value(&inst.operands[1], &inst.result_ty)?
            .into_int_value();
        let b = &self.builder;
        let r = match inst.opcode {
            Opcode::Add => b.build_int_add(lhs, rhs, "add"),
            Opcode::Sub => b.build_int_sub(lhs, rhs, "sub"),
            Opcode::Mul => b.build_int_mul(lhs, rhs, "mul"),
            Opcode::SDiv => b.build_int_signed_div(lhs, rhs, "sdiv"),
            Opcode::SRem => b.build_int_signed_rem(lhs, rhs, "srem"),
            Opcode::UDiv => b.build_int_unsigned_div(lhs, rhs, "udiv"),
            Opcode::URem => b.build_int_unsigned_rem(lhs, rhs, "urem"),
            Opcode::And => b.build_and(lhs, rhs, "and"),
            Opcode::Or => b.build_or(lhs, rhs, "or"),
            Opcode::Xor => b.build_xor(lhs, rhs, "xor"),
            Opcode::Shl => b.build_left_shift(lhs, rhs, "shl"),
            Opcode::LShr => b.build_right_shift(lhs, rhs, false, "lshr"),
            Opcode::AShr => b.build_right_shift(lhs, rhs, true, "ashr"),
            _ => unreachable!(),
        }
        .map_err(to_internal)?;
        self.values.insert(inst.dest, r.into());
        Ok(())
    }

    fn lower_float_binop(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let lhs = self
            .operand_value(&inst.operands[0], &inst.result_ty)?
            .into_float_value();
        let rhs = self
            .operand_value(&inst.operands[1], &inst.result_ty)?
            .into_float_value();
        let b = &self.builder;
        let r = match inst.opcode {
            Opcode::FAdd => b.build_float_add(lhs, rhs, "fadd"),
            Opcode::FSub => b.build_float_sub(lhs, rhs, "fsub"),
            Opcode::FMul => b.build_float_mul(lhs, rhs, "fmul"),
            Opcode::FDiv => b.build_float_div(lhs, rhs, "fdiv"),
            Opcode::FRem => b.build_float_rem(lhs, rhs, "frem"),
            _ => unreachable!(),
        }
        .map_err(to_internal)?;
        self.values.insert(inst.dest, r.into());
        Ok(())
    }

    fn lower_icmp(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let ty = sentinel_ty(&inst.operands[0]);
        let lhs = self.operand_value(&inst.operands[1], &ty)?.into_int_value();
        let rhs = self.operand_value(&inst.operands[2], &ty)?.into_int_value();
        let pred = match inst.icmp_pred.ok_or_else(|| internal("icmp with no predicate"))? {
            ICmpPredicate::Eq => IntPredicate::EQ,
            ICmpPredicate::Ne => IntPredicate::NE,
            ICmpPredicate::Slt => IntPredicate::SLT,
            ICmpPredicate::Sle => IntPredicate::SLE,
            ICmpPredicate::Sgt => IntPredicate::SGT,
            ICmpPredicate::Sge => IntPredicate::SGE,
            ICmpPredicate::Ult => IntPredicate::ULT,
            ICmpPredicate::Ule => IntPredicate::ULE,
            ICmpPredicate::Ugt => IntPredicate::UGT,
            ICmpPredicate::Uge => IntPredicate::UGE,
        };
        let r = self
            .builder
            .build_int_compare(pred, lhs, rhs, "icmp")
            .map_err(to_internal)?;
        self.values.insert(inst.dest, r.into());
        Ok(())
    }

    fn lower_fcmp(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let ty = sentinel_ty(&inst.operands[0]);
        let lhs = self.operand_value(&inst.operands[1], &ty)?.into_float_value();
        let rhs = self.operand_value(&inst.operands[2], &ty)?.into_float_value();
        let pred = match inst.fcmp_pred.ok_or_else(|| internal("fcmp with no predicate"))? {
            FCmpPredicate::Oeq => FloatPredicate::OEQ,
            FCmpPredicate::One => FloatPredicate::ONE,
            FCmpPredicate::Olt => FloatPredicate::OLT,
            FCmpPredicate::Ole => FloatPredicate::OLE,
            FCmpPredicate::Ogt => FloatPredicate::OGT,
            FCmpPredicate::Oge => FloatPredicate::OGE,
            FCmpPredicate::Uno => FloatPredicate::UNO,
        };
        let r = self
            .builder
            .build_float_compare(pred, lhs, rhs, "fcmp")
            .map_err(to_internal)?;
        self.values.insert(inst.dest, r.into());
        Ok(())
    }

    /// Matches `liric_isel::x86_64`'s gep lowering: every index operand is
    /// summed (no separate per-level stride), then the sum scales
    /// `result_ty`'s element size via a single-index element GEP.
    fn lower_gep(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let base = self
            .operand_value(&inst.operands[0], &LiricTy::Ptr)?
            .into_pointer_value();
        let i64ty = self.ctx.ll_context.i64_type();
        let mut sum = i64ty.const_zero();
        for idx_op in &inst.operands[1..] {
            let v = self.operand_value(idx_op, &LiricTy::I64)?.into_int_value();
            sum = self.builder.build_int_add(sum, v, "gepidx").map_err(to_internal)?;
        }
        let elem_ty = self.ctx.basic_type(&inst.result_ty)?;
        let ptr = unsafe {
            self.builder
                .build_gep(elem_ty, base, &[sum], "gep")
                .map_err(to_internal)?
        };
        self.values.insert(inst.dest, ptr.into());
        Ok(())
    }

    /// Only direct calls to a named symbol are supported; an indirect
    /// call through a function-pointer vreg is valid IR the `liric_isel`
    /// lane handles but this lane doesn't yet.
    fn lower_call(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        let callee_sym = match inst.operands[0] {
            Operand::Global(sym, _) => sym,
            _ => return Err(unsupported("indirect call through a function pointer")),
        };
        let name = self.module.symbol_name(callee_sym);
        let callee = self
            .ctx
            .ll_module
            .get_function(name)
            .ok_or_else(|| internal(format!("call to undeclared function `{name}`")))?;

        let args = &inst.operands[1..];
        let mut arg_values = Vec::with_capacity(args.len() / 2);
        let mut i = 0;
        while i < args.len() {
            let ty = sentinel_ty(&args[i]);
            let val = self.operand_value(&args[i + 1], &ty)?;
            arg_values.push(val.into());
            i += 2;
        }

        let call_site = self
            .builder
            .build_call(callee, &arg_values, "call")
            .map_err(to_internal)?;
        if !matches!(inst.result_ty, LiricTy::Void) {
            let v = call_site
                .try_as_basic_value()
                .left()
                .ok_or_else(|| internal("call expected to produce a value produced none"))?;
            self.values.insert(inst.dest, v);
        }
        Ok(())
    }

    fn lower_cast(&mut self, inst: &Instruction<'ir>, kind: CastKind) -> Result<(), BackendError> {
        let src_ty = sentinel_ty(&inst.operands[0]);
        let src = self.operand_value(&inst.operands[1], &src_ty)?;
        let dst_llty = self.ctx.basic_type(&inst.result_ty)?;
        let b = &self.builder;
        let v: BasicValueEnum = match kind {
            CastKind::Sext => b
                .build_int_s_extend(src.into_int_value(), dst_llty.into_int_type(), "sext")
                .map_err(to_internal)?
                .into(),
            CastKind::Zext => b
                .build_int_z_extend(src.into_int_value(), dst_llty.into_int_type(), "zext")
                .map_err(to_internal)?
                .into(),
            CastKind::Trunc => b
                .build_int_truncate(src.into_int_value(), dst_llty.into_int_type(), "trunc")
                .map_err(to_internal)?
                .into(),
            CastKind::Bitcast => b
                .build_bit_cast(src, dst_llty, "bitcast")
                .map_err(to_internal)?,
            CastKind::PtrToInt => b
                .build_ptr_to_int(src.into_pointer_value(), dst_llty.into_int_type(), "ptrtoint")
                .map_err(to_internal)?
                .into(),
            CastKind::IntToPtr => b
                .build_int_to_ptr(src.into_int_value(), dst_llty.into_pointer_type(), "inttoptr")
                .map_err(to_internal)?
                .into(),
            CastKind::SIToFP => b
                .build_signed_int_to_float(src.into_int_value(), dst_llty.into_float_type(), "sitofp")
                .map_err(to_internal)?
                .into(),
            CastKind::UIToFP => b
                .build_unsigned_int_to_float(src.into_int_value(), dst_llty.into_float_type(), "uitofp")
                .map_err(to_internal)?
                .into(),
            CastKind::FPToSI => b
                .build_float_to_signed_int(src.into_float_value(), dst_llty.into_int_type(), "fptosi")
                .map_err(to_internal)?
                .into(),
            CastKind::FPToUI => b
                .build_float_to_unsigned_int(src.into_float_value(), dst_llty.into_int_type(), "fptoui")
                .map_err(to_internal)?
                .into(),
            CastKind::FPExt => b
                .build_float_ext(src.into_float_value(), dst_llty.into_float_type(), "fpext")
                .map_err(to_internal)?
                .into(),
            CastKind::FPTrunc => b
                .build_float_trunc(src.into_float_value(), dst_llty.into_float_type(), "fptrunc")
                .map_err(to_internal)?
                .into(),
        };
        self.values.insert(inst.dest, v);
        Ok(())
    }

    /// Only single-level index paths are supported; the struct/array
    /// literals the frontends and session currently build never nest
    /// deeper than one level.
    fn lower_extract_value(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        if inst.indices.len() != 1 {
            return Err(unsupported("extractvalue with a multi-level index path"));
        }
        let agg_ty = sentinel_ty(&inst.operands[0]);
        let agg = self.operand_value(&inst.operands[1], &agg_ty)?;
        let idx = inst.indices[0];
        let v = match agg {
            BasicValueEnum::StructValue(s) => self.builder.build_extract_value(s, idx, "ev"),
            BasicValueEnum::ArrayValue(a) => self.builder.build_extract_value(a, idx, "ev"),
            _ => return Err(unsupported("extractvalue on a non-aggregate value")),
        }
        .map_err(to_internal)?;
        self.values.insert(inst.dest, v);
        Ok(())
    }

    fn lower_insert_value(&mut self, inst: &Instruction<'ir>) -> Result<(), BackendError> {
        if inst.indices.len() != 1 {
            return Err(unsupported("insertvalue with a multi-level index path"));
        }
        let agg_ty = sentinel_ty(&inst.operands[0]);
        let agg = self.operand_value(&inst.operands[1], &agg_ty)?;
        let field_ty = sentinel_ty(&inst.operands[0]);
        let _ = field_ty;
        let field_val = self.operand_value(&inst.operands[2], &inst.result_ty)?;
        let idx = inst.indices[0];
        let v = match agg {
            BasicValueEnum::StructValue(s) => self.builder.build_insert_value(s, field_val, idx, "iv"),
            BasicValueEnum::ArrayValue(a) => self.builder.build_insert_value(a, field_val, idx, "iv"),
            _ => return Err(unsupported("insertvalue on a non-aggregate value")),
        }
        .map_err(to_internal)?
        .as_basic_value_enum();
        self.values.insert(inst.dest, v);
        Ok(())
    }
}

fn undef_value(ty: inkwell::types::BasicTypeEnum<'_>) -> BasicValueEnum<'_> {
    use inkwell::types::BasicTypeEnum::*;
    match ty {
        IntType(t) => t.get_undef().into(),
        FloatType(t) => t.get_undef().into(),
        PointerType(t) => t.get_undef().into(),
        ArrayType(t) => t.get_undef().into(),
        StructType(t) => t.get_undef().into(),
        VectorType(t) => t.get_undef().into(),
    }
}

fn to_internal(e: impl std::fmt::Display) -> BackendError {
    internal(e.to_string())
}
