//! The copy-and-patch backend (spec §4.5): a stencil-driven codegen lane
//! that is fast to emit from but only covers a subset of the opcode
//! space. Register allocation collapses to "one stack slot per vreg"
//! because every stencil addresses its operands off a single frame
//! pointer, so there is no allocator to share with [`liric_isel`] at
//! all -- this backend either compiles a function entirely through
//! stencils or hands the whole function to [`liric_isel::IselBackend`].
//!
//! **Open question resolved here (recorded in DESIGN.md):** spec §4.5
//! describes falling back to ISEL "for anything outside the stencil
//! catalog", which could mean per-instruction or per-function
//! granularity. Mixing the two at instruction granularity would require
//! the stencil frame and the ISEL allocator's frame to agree on every
//! slot, which defeats the point of the stencil path being allocator-free.
//! This implementation falls back per function: a function is eligible
//! for the stencil path only if every instruction in its single block is
//! stencil-covered, otherwise ISEL compiles the whole function.

pub mod stencil;

use liric_codegen_ssa::backend::{Backend, BackendError, CompiledFunction};
use liric_ir::{Function, Module, Opcode, Operand, Type};
use liric_isel::IselBackend;
use liric_utils::Idx;
use stencil::{Stencil, StencilCatalog, StencilOp};

const INT_ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9]; // rdi, rsi, rdx, rcx, r8, r9
const RAX: u8 = 0;

fn modrm_mem_rbp(reg: u8) -> u8 {
    0x80 | ((reg & 7) << 3) | 0x05
}

fn rex_if_needed(width64: bool, reg: u8) -> Option<u8> {
    if width64 || reg >= 8 {
        Some(0x40 | ((width64 as u8) << 3) | (((reg >> 3) & 1) << 2))
    } else {
        None
    }
}

fn emit_store_gpr(bytes: &mut Vec<u8>, reg: u8, width64: bool, disp: i32) {
    if let Some(r) = rex_if_needed(width64, reg) {
        bytes.push(r);
    }
    bytes.push(0x89);
    bytes.push(modrm_mem_rbp(reg));
    bytes.extend_from_slice(&disp.to_le_bytes());
}

fn emit_load_gpr(bytes: &mut Vec<u8>, reg: u8, width64: bool, disp: i32) {
    if let Some(r) = rex_if_needed(width64, reg) {
        bytes.push(r);
    }
    bytes.push(0x8B);
    bytes.push(modrm_mem_rbp(reg));
    bytes.extend_from_slice(&disp.to_le_bytes());
}

fn emit_store_imm(bytes: &mut Vec<u8>, width64: bool, disp: i32, imm: i32) {
    if width64 {
        bytes.push(0x48);
    }
    bytes.push(0xC7);
    bytes.push(modrm_mem_rbp(0));
    bytes.extend_from_slice(&disp.to_le_bytes());
    bytes.extend_from_slice(&imm.to_le_bytes());
}

fn emit_movsd_store(bytes: &mut Vec<u8>, xmm: u8, disp: i32) {
    bytes.extend_from_slice(&[0xF2, 0x0F, 0x11]);
    bytes.push(modrm_mem_rbp(xmm));
    bytes.extend_from_slice(&disp.to_le_bytes());
}

fn emit_movsd_load(bytes: &mut Vec<u8>, xmm: u8, disp: i32) {
    bytes.extend_from_slice(&[0xF2, 0x0F, 0x10]);
    bytes.push(modrm_mem_rbp(xmm));
    bytes.extend_from_slice(&disp.to_le_bytes());
}

/// Byte offset of the slot for vreg `idx`, counted down from `rbp`.
fn slot_disp(idx: usize) -> i32 {
    -((idx as i32 + 1) * 8)
}

/// Maps a binary opcode plus its result type onto a stencil, or `None`
/// if the combination isn't in the catalog (forces a whole-function
/// ISEL fallback).
fn stencil_for(opcode: Opcode, ty: Type) -> Option<StencilOp> {
    use Opcode::*;
    match (opcode, ty) {
        (Add, Type::I32) => Some(StencilOp::AddI32),
        (Add, Type::I64) => Some(StencilOp::AddI64),
        (Sub, Type::I32) => Some(StencilOp::SubI32),
        (Sub, Type::I64) => Some(StencilOp::SubI64),
        (Mul, Type::I32) => Some(StencilOp::MulI32),
        (Mul, Type::I64) => Some(StencilOp::MulI64),
        (And, Type::I32) => Some(StencilOp::AndI32),
        (And, Type::I64) => Some(StencilOp::AndI64),
        (Or, Type::I32) => Some(StencilOp::OrI32),
        (Or, Type::I64) => Some(StencilOp::OrI64),
        (Xor, Type::I32) => Some(StencilOp::XorI32),
        (Xor, Type::I64) => Some(StencilOp::XorI64),
        (FAdd, Type::F64) => Some(StencilOp::AddF64),
        (FSub, Type::F64) => Some(StencilOp::SubF64),
        (FMul, Type::F64) => Some(StencilOp::MulF64),
        (FDiv, Type::F64) => Some(StencilOp::DivF64),
        _ => None,
    }
}

/// Whether `func` can be compiled entirely through the stencil catalog:
/// a single block, only stencil-covered binary ops, and a plain
/// int/float `ret`/`ret void` terminator.
fn is_stencil_eligible(func: &Function) -> bool {
    if func.vararg || func.blocks.len() != 1 {
        return false;
    }
    if !matches!(func.ret_ty, Type::I32 | Type::I64 | Type::F64 | Type::Void) {
        return false;
    }
    if !func
        .param_tys
        .iter()
        .all(|t| matches!(t, Type::I32 | Type::I64 | Type::F64))
    {
        return false;
    }
    // At most 6 int params and 8 float params: the stencil prologue
    // doesn't implement the stack-passed-argument overflow path ISEL does.
    let int_params = func.param_tys.iter().filter(|t| t.is_integer()).count();
    let float_params = func.param_tys.iter().filter(|t| t.is_float()).count();
    if int_params > INT_ARG_REGS.len() || float_params > 8 {
        return false;
    }

    let block = &func.blocks[liric_ir::ENTRY_BLOCK];
    let Some(term) = block.terminator() else {
        return false;
    };
    for inst in &block.instructions {
        let is_term = std::ptr::eq(inst, term);
        if is_term {
            match inst.opcode {
                Opcode::RetVoid => {}
                Opcode::Ret => {
                    if !matches!(
                        inst.operands.first(),
                        Some(Operand::VReg(_)) | Some(Operand::ImmI64(_)) | Some(Operand::ImmF64(_))
                    ) {
                        return false;
                    }
                }
                _ => return false,
            }
            continue;
        }
        if stencil_for(inst.opcode, inst.result_ty).is_none() {
            return false;
        }
        if inst.operands.len() != 2 {
            return false;
        }
        if !inst
            .operands
            .iter()
            .all(|op| matches!(op, Operand::VReg(_) | Operand::ImmI64(_) | Operand::ImmF64(_)))
        {
            return false;
        }
    }
    true
}

/// Writes the exact 64-bit pattern `bits` at `[rbp+disp]` as two 32-bit
/// immediate stores (x86-64 has no `mov mem64, imm64` form; `C7 /0`
/// only sign-extends a 32-bit immediate, which would corrupt an
/// arbitrary double's bit pattern).
fn store_imm64_exact(code: &mut Vec<u8>, disp: i32, bits: u64) {
    let low = (bits & 0xFFFF_FFFF) as i32;
    let high = (bits >> 32) as i32;
    emit_store_imm(code, false, disp, low);
    emit_store_imm(code, false, disp + 4, high);
}

/// Loads `op` into the scratch slot at `scratch_disp` (if it's an
/// immediate) and returns the displacement the stencil should read from.
fn materialize_operand(op: Operand, scratch_disp: i32, code: &mut Vec<u8>) -> i32 {
    match op {
        Operand::VReg(v) => slot_disp(v.idx()),
        Operand::ImmI64(v) => {
            store_imm64_exact(code, scratch_disp, v as u64);
            scratch_disp
        }
        Operand::ImmF64(v) => {
            store_imm64_exact(code, scratch_disp, v.to_bits());
            scratch_disp
        }
        _ => unreachable!("materialize_operand only called on VReg/Imm operands"),
    }
}

fn compile_stencil_function(func: &Function) -> CompiledFunction {
    let n_slots = func.vreg_count().max(1);
    // Two extra scratch slots for immediate operands.
    let frame_raw = (n_slots + 2) as u32 * 8;
    let frame_size = (frame_raw + 15) & !15;
    let scratch0 = slot_disp(n_slots);
    let scratch1 = slot_disp(n_slots + 1);

    let mut code = Vec::new();
    code.push(0x55); // push rbp
    code.extend_from_slice(&[0x48, 0x89, 0xE5]); // mov rbp, rsp
    code.extend_from_slice(&[0x48, 0x81, 0xEC]);
    code.extend_from_slice(&frame_size.to_le_bytes());

    let mut int_idx = 0usize;
    let mut float_idx = 0u8;
    for (i, ty) in func.param_tys.iter().enumerate() {
        let vreg = func.param_vregs[i];
        let disp = slot_disp(vreg.idx());
        if ty.is_float() {
            emit_movsd_store(&mut code, float_idx, disp);
            float_idx += 1;
        } else {
            emit_store_gpr(&mut code, INT_ARG_REGS[int_idx], matches!(ty, Type::I64), disp);
            int_idx += 1;
        }
    }

    let block = &func.blocks[liric_ir::ENTRY_BLOCK];
    for inst in &block.instructions {
        if inst.opcode.is_terminator() {
            continue;
        }
        let stencil_op = stencil_for(inst.opcode, inst.result_ty).unwrap();
        let stencil: Stencil = StencilCatalog::get(stencil_op);
        let src0 = materialize_operand(inst.operands[0], scratch0, &mut code);
        let src1 = materialize_operand(inst.operands[1], scratch1, &mut code);
        let dst = slot_disp(inst.dest.idx());
        stencil.emit(&mut code, src0, src1, dst);
    }

    if let Some(term) = block.terminator() {
        match term.opcode {
            Opcode::Ret => {
                let is_float = func.ret_ty.is_float();
                let disp = materialize_operand(term.operands[0], scratch0, &mut code);
                if is_float {
                    emit_movsd_load(&mut code, 0, disp);
                } else {
                    emit_load_gpr(&mut code, RAX, matches!(func.ret_ty, Type::I64), disp);
                }
            }
            Opcode::RetVoid => {}
            _ => unreachable!("is_stencil_eligible only allows Ret/RetVoid terminators"),
        }
    }

    code.extend_from_slice(&[0x48, 0x89, 0xEC]); // mov rsp, rbp
    code.push(0x5D); // pop rbp
    code.push(0xC3); // ret

    CompiledFunction {
        symbol: func.symbol,
        code,
        patches: Vec::new(),
        frame_size,
    }
}

/// The copy-and-patch codegen lane (spec §4.5). Wraps an [`IselBackend`]
/// for the fallback path so the session never has to know which lane
/// actually produced a given function's code.
pub struct CopyPatchBackend {
    fallback: IselBackend,
}

impl CopyPatchBackend {
    pub fn new(fallback: IselBackend) -> Self {
        CopyPatchBackend { fallback }
    }

    pub fn host() -> Self {
        CopyPatchBackend {
            fallback: IselBackend::host(),
        }
    }
}

impl Backend for CopyPatchBackend {
    fn name(&self) -> &'static str {
        "copy_patch"
    }

    fn compile_function(
        &mut self,
        module: &Module,
        func_id: liric_ir::FunctionId,
    ) -> Result<CompiledFunction, BackendError> {
        let func = module.function(func_id);
        if func.is_decl {
            return Err(BackendError::Internal {
                message: format!("cannot compile a declaration: `{}`", func.name),
            });
        }
        if is_stencil_eligible(func) {
            Ok(compile_stencil_function(func))
        } else {
            self.fallback.compile_function(module, func_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_arena::Arena;
    use liric_ir::{CallFlags, Instruction, VReg};

    fn build_add_args<'a>(arena: &'a Arena) -> (Module<'a>, liric_ir::FunctionId) {
        let mut module = Module::new(arena, "m");
        let fid = module.declare_function("add", Type::I32, &[Type::I32, Type::I32], false);
        module.function_mut(fid).begin_definition();
        let func = module.function_mut(fid);
        let a = func.param_vregs[0];
        let b = func.param_vregs[1];
        let dest = func.fresh_vreg();
        let block = func.block_mut(liric_ir::ENTRY_BLOCK);
        block.instructions.push(Instruction::new(
            Opcode::Add,
            Type::I32,
            dest,
            vec![Operand::VReg(a), Operand::VReg(b)],
        ));
        block.instructions.push(Instruction::new(
            Opcode::Ret,
            Type::I32,
            VReg::new(0),
            vec![Operand::VReg(dest)],
        ));
        (module, fid)
    }

    #[test]
    fn straight_line_int_function_is_stencil_eligible() {
        let arena = Arena::new();
        let (module, fid) = build_add_args(&arena);
        assert!(is_stencil_eligible(module.function(fid)));
    }

    #[test]
    fn compile_function_emits_a_ret_opcode() {
        let arena = Arena::new();
        let (module, fid) = build_add_args(&arena);
        let mut backend = CopyPatchBackend::host();
        let compiled = backend.compile_function(&module, fid).unwrap();
        assert_eq!(compiled.code.last(), Some(&0xC3));
    }

    #[test]
    fn function_with_a_call_falls_back_to_isel() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let callee = module.declare_function("g", Type::I32, &[], false);
        let fid = module.declare_function("f", Type::I32, &[], false);
        module.function_mut(fid).begin_definition();
        let func = module.function_mut(fid);
        let dest = func.fresh_vreg();
        let block = func.block_mut(liric_ir::ENTRY_BLOCK);
        let mut call = Instruction::new(
            Opcode::Call,
            Type::I32,
            dest,
            vec![Operand::Global(module.function(callee).symbol, 0)],
        );
        call.call_flags = Some(CallFlags::default());
        block.instructions.push(call);
        block
            .instructions
            .push(Instruction::new(Opcode::Ret, Type::I32, VReg::new(0), vec![Operand::VReg(dest)]));
        assert!(!is_stencil_eligible(module.function(fid)));
    }
}
