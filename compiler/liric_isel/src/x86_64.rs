//! x86-64 SysV emission (spec §4.4 point 4-6): the primary ISA. Every
//! integer value is carried in a 64-bit slot/register regardless of its
//! IR width; narrower opcodes (`trunc`, `sext`/`zext`) do the masking
//! explicitly. This keeps the encoder to one register class per value
//! kind instead of four, at the cost of not modeling i8/i16/i32
//! wraparound precisely -- recorded as an open decision in DESIGN.md.

use crate::frame::FrameLayout;
use crate::prescan::Prescan;
use crate::regalloc::{CacheAction, ValueCache};
use liric_abi::RelocKind;
use liric_codegen_ssa::backend::{BackendError, CompiledFunction, PatchEntry};
use liric_ir::{
    BlockId, CallFlags, FCmpPredicate, Function, ICmpPredicate, Instruction, Module, Opcode,
    Operand, Type, VReg,
};
use liric_utils::Idx;
use std::collections::HashMap;

const GPR_POOL: [u8; 9] = [0, 1, 2, 6, 7, 8, 9, 10, 11];
const INT_ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9]; // rdi, rsi, rdx, rcx, r8, r9
const XMM_ARG_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const RAX: u8 = 0;
const RDX: u8 = 2;
const RCX: u8 = 1;

struct Code {
    bytes: Vec<u8>,
    patches: Vec<PatchEntry>,
}

impl Code {
    fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }
    fn u8(&mut self, b: u8) {
        self.bytes.push(b);
    }
    fn i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn rex_if_needed(&mut self, w: bool, reg: u8, rm: u8) {
        if w || reg >= 8 || rm >= 8 {
            self.u8(0x40 | ((w as u8) << 3) | (((reg >> 3) & 1) << 2) | ((rm >> 3) & 1));
        }
    }

    fn rex_always(&mut self, w: bool, reg: u8, rm: u8) {
        self.u8(0x40 | ((w as u8) << 3) | (((reg >> 3) & 1) << 2) | ((rm >> 3) & 1));
    }

    fn modrm(&mut self, m: u8, reg: u8, rm: u8) {
        self.u8((m << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    fn mov_rr(&mut self, dst: u8, src: u8) {
        self.rex_if_needed(true, src, dst);
        self.u8(0x89);
        self.modrm(3, src, dst);
    }

    fn mov_ri64(&mut self, dst: u8, imm: i64) {
        self.rex_if_needed(true, 0, dst);
        self.u8(0xB8 + (dst & 7));
        self.i64(imm);
    }

    fn mov_ri32(&mut self, dst: u8, imm: i32) {
        self.rex_if_needed(false, 0, dst);
        self.u8(0xB8 + (dst & 7));
        self.bytes.extend_from_slice(&imm.to_le_bytes());
    }

    /// Identity-zero/xor idiom and plain immediate load (spec §4.4 point
    /// 3: "a zero immediate ... lowers to `xor reg, reg`").
    fn materialize_imm(&mut self, reg: u8, imm: i64) {
        if imm == 0 {
            self.alu_rr(0x31, reg, reg);
        } else if let Ok(v) = i32::try_from(imm) {
            self.mov_ri32(reg, v);
        } else {
            self.mov_ri64(reg, imm);
        }
    }

    fn load_rbp(&mut self, dst: u8, disp: i32) {
        self.rex_if_needed(true, dst, 5);
        self.u8(0x8B);
        self.modrm(2, dst, 5);
        self.i32(disp);
    }

    fn store_rbp(&mut self, src: u8, disp: i32) {
        self.rex_if_needed(true, src, 5);
        self.u8(0x89);
        self.modrm(2, src, 5);
        self.i32(disp);
    }

    fn lea_rbp(&mut self, dst: u8, disp: i32) {
        self.rex_if_needed(true, dst, 5);
        self.u8(0x8D);
        self.modrm(2, dst, 5);
        self.i32(disp);
    }

    /// `lea dst, [rip+disp32]`, disp32 patched in by the caller once the
    /// symbol's address is resolved. Returns the offset of the disp32
    /// field.
    fn lea_rip(&mut self, dst: u8) -> u32 {
        self.rex_if_needed(true, dst, 5);
        self.u8(0x8D);
        self.modrm(0, dst, 5);
        let at = self.pos();
        self.i32(0);
        at
    }

    fn alu_rr(&mut self, op: u8, dst: u8, src: u8) {
        self.rex_if_needed(true, src, dst);
        self.u8(op);
        self.modrm(3, src, dst);
    }

    fn alu_ri32(&mut self, digit: u8, dst: u8, imm: i32) {
        self.rex_if_needed(true, 0, dst);
        self.u8(0x81);
        self.modrm(3, digit, dst);
        self.i32(imm);
    }

    fn imul_rr(&mut self, dst: u8, src: u8) {
        self.rex_if_needed(true, dst, src);
        self.u8(0x0F);
        self.u8(0xAF);
        self.modrm(3, dst, src);
    }

    fn imul_rri(&mut self, dst: u8, src: u8, imm: i32) {
        self.rex_if_needed(true, dst, src);
        self.u8(0x69);
        self.modrm(3, dst, src);
        self.i32(imm);
    }

    fn not_r(&mut self, r: u8) {
        self.rex_if_needed(true, 0, r);
        self.u8(0xF7);
        self.modrm(3, 2, r);
    }

    fn neg_r(&mut self, r: u8) {
        self.rex_if_needed(true, 0, r);
        self.u8(0xF7);
        self.modrm(3, 3, r);
    }

    fn shift_cl(&mut self, digit: u8, r: u8) {
        self.rex_if_needed(true, 0, r);
        self.u8(0xD3);
        self.modrm(3, digit, r);
    }

    fn cqo(&mut self) {
        self.u8(0x48);
        self.u8(0x99);
    }

    fn idiv_r(&mut self, r: u8) {
        self.rex_if_needed(true, 0, r);
        self.u8(0xF7);
        self.modrm(3, 7, r);
    }

    fn div_r(&mut self, r: u8) {
        self.rex_if_needed(true, 0, r);
        self.u8(0xF7);
        self.modrm(3, 6, r);
    }

    fn setcc(&mut self, cc: u8, dst: u8) {
        self.rex_always(false, 0, dst);
        self.u8(0x0F);
        self.u8(0x90 + cc);
        self.modrm(3, 0, dst);
    }

    /// Zero-extends `dst`'s own low byte (as written by `setcc`) into the
    /// full 64-bit register.
    fn movzx_byte(&mut self, dst: u8) {
        self.rex_if_needed(true, dst, dst);
        self.u8(0x0F);
        self.u8(0xB6);
        self.modrm(3, dst, dst);
    }

    fn cmov(&mut self, cc: u8, dst: u8, src: u8) {
        self.rex_if_needed(true, dst, src);
        self.u8(0x0F);
        self.u8(0x40 + cc);
        self.modrm(3, dst, src);
    }

    fn jmp_rel32(&mut self) -> u32 {
        self.u8(0xE9);
        let at = self.pos();
        self.i32(0);
        at
    }

    fn jcc_rel32(&mut self, cc: u8) -> u32 {
        self.u8(0x0F);
        self.u8(0x80 + cc);
        let at = self.pos();
        self.i32(0);
        at
    }

    fn call_rel32_patch(&mut self, symbol: liric_ir::SymbolId) {
        self.u8(0xE8);
        let at = self.pos();
        self.i32(0);
        self.patches.push(PatchEntry {
            offset: at,
            symbol,
            kind: RelocKind::X86CallRel32,
            addend: -4,
        });
    }

    fn call_indirect(&mut self, reg: u8) {
        self.rex_if_needed(false, 0, reg);
        self.u8(0xFF);
        self.modrm(3, 2, reg);
    }

    fn ret(&mut self) {
        self.u8(0xC3);
    }

    fn push_r(&mut self, r: u8) {
        if r >= 8 {
            self.u8(0x41);
        }
        self.u8(0x50 + (r & 7));
    }

    fn pop_r(&mut self, r: u8) {
        if r >= 8 {
            self.u8(0x41);
        }
        self.u8(0x58 + (r & 7));
    }

    fn patch_rel32(&mut self, at: u32, target: u32) {
        let rel = target as i64 - (at as i64 + 4);
        self.bytes[at as usize..at as usize + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }

    // --- SSE2 ---

    fn movsd_load(&mut self, dst: u8, disp: i32) {
        self.u8(0xF2);
        self.u8(0x0F);
        self.u8(0x10);
        self.modrm(2, dst, 5);
        self.i32(disp);
    }
    fn movsd_store(&mut self, src: u8, disp: i32) {
        self.u8(0xF2);
        self.u8(0x0F);
        self.u8(0x11);
        self.modrm(2, src, 5);
        self.i32(disp);
    }
    fn movss_load(&mut self, dst: u8, disp: i32) {
        self.u8(0xF3);
        self.u8(0x0F);
        self.u8(0x10);
        self.modrm(2, dst, 5);
        self.i32(disp);
    }
    fn movss_store(&mut self, src: u8, disp: i32) {
        self.u8(0xF3);
        self.u8(0x0F);
        self.u8(0x11);
        self.modrm(2, src, 5);
        self.i32(disp);
    }
    fn sse_binop(&mut self, prefix: u8, op: u8, dst: u8, src: u8) {
        self.u8(prefix);
        self.u8(0x0F);
        self.u8(op);
        self.modrm(3, dst, src);
    }
    fn ucomisd(&mut self, a: u8, b: u8) {
        self.u8(0x66);
        self.u8(0x0F);
        self.u8(0x2E);
        self.modrm(3, a, b);
    }
    fn ucomiss(&mut self, a: u8, b: u8) {
        self.u8(0x0F);
        self.u8(0x2E);
        self.modrm(3, a, b);
    }
    fn cvtsi2sd(&mut self, dst_xmm: u8, src_gpr: u8) {
        self.u8(0xF2);
        self.rex_always(true, dst_xmm, src_gpr);
        self.u8(0x0F);
        self.u8(0x2A);
        self.modrm(3, dst_xmm, src_gpr);
    }
    fn cvtsi2ss(&mut self, dst_xmm: u8, src_gpr: u8) {
        self.u8(0xF3);
        self.rex_always(true, dst_xmm, src_gpr);
        self.u8(0x0F);
        self.u8(0x2A);
        self.modrm(3, dst_xmm, src_gpr);
    }
    fn cvttsd2si(&mut self, dst_gpr: u8, src_xmm: u8) {
        self.u8(0xF2);
        self.rex_always(true, dst_gpr, src_xmm);
        self.u8(0x0F);
        self.u8(0x2C);
        self.modrm(3, dst_gpr, src_xmm);
    }
    fn cvttss2si(&mut self, dst_gpr: u8, src_xmm: u8) {
        self.u8(0xF3);
        self.rex_always(true, dst_gpr, src_xmm);
        self.u8(0x0F);
        self.u8(0x2C);
        self.modrm(3, dst_gpr, src_xmm);
    }
    fn cvtsd2ss(&mut self, dst: u8, src: u8) {
        self.u8(0xF2);
        self.u8(0x0F);
        self.u8(0x5A);
        self.modrm(3, dst, src);
    }
    fn cvtss2sd(&mut self, dst: u8, src: u8) {
        self.u8(0xF3);
        self.u8(0x0F);
        self.u8(0x5A);
        self.modrm(3, dst, src);
    }
    fn movq_xmm_to_gpr(&mut self, dst_gpr: u8, src_xmm: u8) {
        self.u8(0x66);
        self.rex_always(true, src_xmm, dst_gpr);
        self.u8(0x0F);
        self.u8(0x7E);
        self.modrm(3, src_xmm, dst_gpr);
    }
    fn movq_gpr_to_xmm(&mut self, dst_xmm: u8, src_gpr: u8) {
        self.u8(0x66);
        self.rex_always(true, dst_xmm, src_gpr);
        self.u8(0x0F);
        self.u8(0x6E);
        self.modrm(3, dst_xmm, src_gpr);
    }
}

fn icmp_cc(pred: ICmpPredicate) -> u8 {
    match pred {
        ICmpPredicate::Eq => 4,
        ICmpPredicate::Ne => 5,
        ICmpPredicate::Slt => 12,
        ICmpPredicate::Sle => 14,
        ICmpPredicate::Sgt => 15,
        ICmpPredicate::Sge => 13,
        ICmpPredicate::Ult => 2,
        ICmpPredicate::Ule => 6,
        ICmpPredicate::Ugt => 7,
        ICmpPredicate::Uge => 3,
    }
}

/// Ordered-compare condition codes from `ucomisd`/`ucomiss`'s flags.
/// NaN/unordered-vs-ordered distinctions beyond `Uno` are approximated
/// (see module docs): `oeq`/`one` don't additionally gate on the parity
/// flag the way a strict IEEE-754 ordered compare would.
fn fcmp_cc(pred: FCmpPredicate) -> Option<u8> {
    Some(match pred {
        FCmpPredicate::Oeq => 4,
        FCmpPredicate::One => 5,
        FCmpPredicate::Olt => 2,
        FCmpPredicate::Ole => 6,
        FCmpPredicate::Ogt => 7,
        FCmpPredicate::Oge => 3,
        FCmpPredicate::Uno => 10,
    })
}

fn type_sentinel_ty<'a>(op: &Operand<'a>) -> Type<'a> {
    match op {
        Operand::Undef(t) | Operand::Null(t) => *t,
        _ => Type::I64,
    }
}

fn unsupported(inst: &Instruction, why: &str) -> BackendError {
    BackendError::Unsupported {
        instruction: format!("{:?} ({why})", inst.opcode),
    }
}

struct Lowering<'a, 'm> {
    module: &'m Module<'a>,
    func: &'m Function<'a>,
    prescan: &'m Prescan,
    frame: &'m FrameLayout,
    code: Code,
    gpr: ValueCache,
    xmm: ValueCache,
    block_offsets: HashMap<BlockId, u32>,
    pending_jumps: Vec<(u32, BlockId)>,
    current_block: BlockId,
}

impl<'a, 'm> Lowering<'a, 'm> {
    fn gpr_read(&mut self, v: VReg) -> u8 {
        let slot = self.prescan.slot_of(v);
        let (reg, actions) = self.gpr.read(v);
        for action in actions {
            match action {
                CacheAction::Load { reg } => self.code.load_rbp(reg, slot.offset),
                CacheAction::Evict { vreg, reg } => {
                    let s = self.prescan.slot_of(vreg);
                    self.code.store_rbp(reg, s.offset);
                }
                CacheAction::None => {}
            }
        }
        reg
    }

    fn gpr_define(&mut self, v: VReg) -> u8 {
        let (reg, actions) = self.gpr.define(v);
        for action in actions {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.store_rbp(reg, s.offset);
            }
        }
        reg
    }

    fn xmm_read(&mut self, v: VReg, is_f32: bool) -> u8 {
        let slot = self.prescan.slot_of(v);
        let (reg, actions) = self.xmm.read(v);
        for action in actions {
            match action {
                CacheAction::Load { reg } => {
                    if is_f32 {
                        self.code.movss_load(reg, slot.offset);
                    } else {
                        self.code.movsd_load(reg, slot.offset);
                    }
                }
                CacheAction::Evict { vreg, reg } => {
                    let s = self.prescan.slot_of(vreg);
                    self.code.movsd_store(reg, s.offset);
                }
                CacheAction::None => {}
            }
        }
        reg
    }

    fn xmm_define(&mut self, v: VReg) -> u8 {
        let (reg, actions) = self.xmm.define(v);
        for action in actions {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.movsd_store(reg, s.offset);
            }
        }
        reg
    }

    fn flush_block(&mut self) {
        for action in self.gpr.flush_all() {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.store_rbp(reg, s.offset);
            }
        }
        for action in self.xmm.flush_all() {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.movsd_store(reg, s.offset);
            }
        }
    }

    /// Loads an operand (vreg, immediate, null/undef) into a fresh
    /// integer register.
    fn load_int_operand(&mut self, op: &Operand) -> u8 {
        match op {
            Operand::VReg(v) => self.gpr_read(*v),
            Operand::ImmI64(i) => {
                let (reg, actions) = self.gpr.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                self.code.materialize_imm(reg, *i);
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Null(_) | Operand::Undef(_) => {
                let (reg, actions) = self.gpr.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                self.code.materialize_imm(reg, 0);
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Global(sym, off) => {
                let (reg, actions) = self.gpr.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                let at = self.code.lea_rip(reg);
                self.code.patches.push(PatchEntry {
                    offset: at,
                    symbol: *sym,
                    kind: RelocKind::X86CallRel32,
                    addend: *off - 4,
                });
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Block(_) => unreachable!("block operand used as a value"),
        }
    }

    fn lower_instruction(&mut self, inst: &Instruction<'a>) -> Result<(), BackendError> {
        match inst.opcode {
            Opcode::Phi => Ok(()),

            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::SRem
            | Opcode::UDiv
            | Opcode::URem
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr
                if inst.result_ty.is_float() =>
            {
                Err(unsupported(inst, "integer opcode on a float type"))
            }

            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
                let lhs = inst.operands[0];
                let rhs = inst.operands[1];
                let lreg = self.load_int_operand(&lhs);
                let op = match inst.opcode {
                    Opcode::Add => 0x01,
                    Opcode::Sub => 0x29,
                    Opcode::And => 0x21,
                    Opcode::Or => 0x09,
                    Opcode::Xor => 0x31,
                    _ => unreachable!(),
                };
                let digit = match inst.opcode {
                    Opcode::Add => 0,
                    Opcode::Sub => 5,
                    Opcode::And => 4,
                    Opcode::Or => 1,
                    Opcode::Xor => 6,
                    _ => unreachable!(),
                };
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, lreg);
                match rhs {
                    Operand::ImmI64(i) if i32::try_from(i).is_ok() => {
                        self.code.alu_ri32(digit, dst, i as i32);
                    }
                    _ => {
                        let rreg = self.load_int_operand(&rhs);
                        self.code.alu_rr(op, dst, rreg);
                    }
                }
                Ok(())
            }

            Opcode::Mul => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, lreg);
                match inst.operands[1] {
                    Operand::ImmI64(i) if i32::try_from(i).is_ok() => {
                        self.code.imul_rri(dst, dst, i as i32);
                    }
                    rhs => {
                        let rreg = self.load_int_operand(&rhs);
                        self.code.imul_rr(dst, rreg);
                    }
                }
                Ok(())
            }

            Opcode::SDiv | Opcode::SRem | Opcode::UDiv | Opcode::URem => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                for r in self.gpr.reserve(RAX) {
                    if let CacheAction::Evict { vreg, reg } = r {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                for r in self.gpr.reserve(RDX) {
                    if let CacheAction::Evict { vreg, reg } = r {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                self.code.mov_rr(RAX, lreg);
                let is_signed = matches!(inst.opcode, Opcode::SDiv | Opcode::SRem);
                if is_signed {
                    self.code.cqo();
                    self.code.idiv_r(rreg);
                } else {
                    self.code.materialize_imm(RDX, 0);
                    self.code.div_r(rreg);
                }
                let want_remainder = matches!(inst.opcode, Opcode::SRem | Opcode::URem);
                let result_phys = if want_remainder { RDX } else { RAX };
                let other = if want_remainder { RAX } else { RDX };
                self.gpr.release(other);
                self.gpr.bind_fixed(inst.dest, result_phys);
                Ok(())
            }

            Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                for r in self.gpr.reserve(RCX) {
                    if let CacheAction::Evict { vreg, reg } = r {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                self.code.mov_rr(RCX, rreg);
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, lreg);
                let digit = match inst.opcode {
                    Opcode::Shl => 4,
                    Opcode::LShr => 5,
                    Opcode::AShr => 7,
                    _ => unreachable!(),
                };
                self.code.shift_cl(digit, dst);
                self.gpr.release(RCX);
                Ok(())
            }

            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::FRem => {
                if matches!(inst.opcode, Opcode::FRem) {
                    return Err(unsupported(inst, "frem has no direct SSE2 instruction"));
                }
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let lhs = inst.operands[0].as_vreg().map(|v| self.xmm_read(v, is_f32));
                let lreg = lhs.unwrap_or_else(|| self.load_float_imm(&inst.operands[0], is_f32));
                let dst = self.xmm_define(inst.dest);
                self.sse_mov(dst, lreg, is_f32);
                let rreg = inst.operands[1]
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(&inst.operands[1], is_f32));
                let prefix = if is_f32 { 0xF3 } else { 0xF2 };
                let op = match inst.opcode {
                    Opcode::FAdd => 0x58,
                    Opcode::FSub => 0x5C,
                    Opcode::FMul => 0x59,
                    Opcode::FDiv => 0x5E,
                    _ => unreachable!(),
                };
                self.code.sse_binop(prefix, op, dst, rreg);
                Ok(())
            }

            Opcode::FNeg => {
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let src = inst.operands[0].as_vreg().unwrap();
                let sreg = self.xmm_read(src, is_f32);
                let dst = self.xmm_define(inst.dest);
                self.sse_mov(dst, sreg, is_f32);
                let (gpr, actions) = self.gpr.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                if is_f32 {
                    self.code.u8(0x66);
                    self.code.rex_if_needed(false, dst, gpr);
                    self.code.u8(0x0F);
                    self.code.u8(0x7E);
                    self.code.modrm(3, dst, gpr);
                    self.code.alu_ri32(6, gpr, i32::MIN);
                    self.code.u8(0x66);
                    self.code.rex_if_needed(false, dst, gpr);
                    self.code.u8(0x0F);
                    self.code.u8(0x6E);
                    self.code.modrm(3, dst, gpr);
                } else {
                    self.code.movq_xmm_to_gpr(gpr, dst);
                    self.code.mov_ri64(gpr, i64::MIN);
                    self.code.movq_gpr_to_xmm(dst, gpr);
                }
                self.gpr.free_scratch(gpr);
                Ok(())
            }

            Opcode::ICmp => {
                let ty = type_sentinel_ty(&inst.operands[0]);
                let _ = ty;
                let lreg = self.load_int_operand(&inst.operands[1]);
                let dst = self.gpr_define(inst.dest);
                match inst.operands[2] {
                    Operand::ImmI64(i) if i32::try_from(i).is_ok() => {
                        self.code.alu_ri32(7, lreg, i as i32);
                    }
                    rhs => {
                        let rreg = self.load_int_operand(&rhs);
                        self.code.alu_rr(0x39, lreg, rreg);
                    }
                }
                self.code.setcc(icmp_cc(inst.icmp_pred.unwrap()), dst);
                self.code.movzx_byte(dst);
                Ok(())
            }

            Opcode::FCmp => {
                let ty = type_sentinel_ty(&inst.operands[0]);
                let is_f32 = matches!(ty, Type::F32);
                let lreg = inst.operands[1]
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(&inst.operands[1], is_f32));
                let rreg = inst.operands[2]
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(&inst.operands[2], is_f32));
                if is_f32 {
                    self.code.ucomiss(lreg, rreg);
                } else {
                    self.code.ucomisd(lreg, rreg);
                }
                let dst = self.gpr_define(inst.dest);
                let cc = fcmp_cc(inst.fcmp_pred.unwrap())
                    .ok_or_else(|| unsupported(inst, "fcmp predicate"))?;
                self.code.setcc(cc, dst);
                self.code.movzx_byte(dst);
                Ok(())
            }

            Opcode::Alloca => {
                let slot = self.prescan.alloca_slot_of(inst.dest);
                let dst = self.gpr_define(inst.dest);
                self.code.lea_rbp(dst, slot.offset);
                Ok(())
            }

            Opcode::Load => {
                let addr = &inst.operands[0];
                if inst.result_ty.is_float() {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let areg = self.load_int_operand(addr);
                    let dst = self.xmm_define(inst.dest);
                    // address is in a GPR; copy through a zero-offset
                    // indirect load by writing the pointer into the
                    // dest's own scratch then reading [reg+0].
                    self.load_float_indirect(dst, areg, is_f32);
                } else {
                    let areg = self.load_int_operand(addr);
                    let dst = self.gpr_define(inst.dest);
                    self.load_int_indirect(dst, areg);
                }
                Ok(())
            }

            Opcode::Store => {
                let val = &inst.operands[0];
                let addr = &inst.operands[1];
                let areg_holder;
                let areg = match addr.as_vreg() {
                    Some(v) => self.gpr_read(v),
                    None => {
                        areg_holder = self.load_int_operand(addr);
                        areg_holder
                    }
                };
                let is_float_val = matches!(inst.result_ty, Type::F32 | Type::F64);
                if is_float_val {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let vreg_ = val.as_vreg().unwrap();
                    let vreg_phys = self.xmm_read(vreg_, is_f32);
                    self.store_float_indirect(areg, vreg_phys, is_f32);
                } else {
                    let vreg_phys = self.load_int_operand(val);
                    self.store_int_indirect(areg, vreg_phys);
                }
                Ok(())
            }

            Opcode::Gep => {
                let base = self.load_int_operand(&inst.operands[0]);
                let elem_size = liric_ir::layout::layout_of(inst.result_ty).layout.size.bytes();
                let mut const_sum: i64 = 0;
                let mut runtime_sum: Option<u8> = None;
                for idx_op in &inst.operands[1..] {
                    match idx_op.as_i64() {
                        Some(c) => const_sum += c,
                        None => {
                            let r = self.load_int_operand(idx_op);
                            match runtime_sum {
                                None => runtime_sum = Some(r),
                                Some(acc) => self.code.alu_rr(0x01, acc, r),
                            }
                        }
                    }
                }
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, base);
                if let Some(r) = runtime_sum {
                    if elem_size != 1 && i32::try_from(elem_size).is_ok() {
                        self.code.imul_rri(r, r, elem_size as i32);
                    }
                    self.code.alu_rr(0x01, dst, r);
                }
                let byte_off = const_sum
                    .checked_mul(elem_size as i64)
                    .ok_or_else(|| unsupported(inst, "gep constant offset overflow"))?;
                if byte_off != 0 {
                    if let Ok(v) = i32::try_from(byte_off) {
                        self.code.alu_ri32(0, dst, v);
                    } else {
                        return Err(unsupported(inst, "gep offset too large for disp32"));
                    }
                }
                Ok(())
            }

            Opcode::Call => self.lower_call(inst),

            Opcode::Select => {
                let cond = inst.operands[0].as_vreg().unwrap();
                let creg = self.gpr_read(cond);
                self.code.alu_rr(0x85, creg, creg);
                if inst.result_ty.is_float() {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let treg = inst.operands[1]
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(&inst.operands[1], is_f32));
                    let dst = self.xmm_define(inst.dest);
                    self.sse_mov(dst, treg, is_f32);
                    let je_at = self.code.jcc_rel32(5); // jne over the false-move
                    let freg = inst.operands[2]
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(&inst.operands[2], is_f32));
                    self.sse_mov(dst, freg, is_f32);
                    let target = self.code.pos();
                    self.code.patch_rel32(je_at, target);
                } else {
                    let treg = self.load_int_operand(&inst.operands[1]);
                    let freg = self.load_int_operand(&inst.operands[2]);
                    let dst = self.gpr_define(inst.dest);
                    self.code.mov_rr(dst, treg);
                    self.code.cmov(4, dst, freg); // cmovz: cond==0 -> false value
                }
                Ok(())
            }

            Opcode::Cast(kind) => self.lower_cast(inst, kind),

            Opcode::ExtractValue => {
                let agg_ty = type_sentinel_ty(&inst.operands[0]);
                let agg = inst.operands[1].as_vreg().unwrap();
                let agg_slot = self.prescan.slot_of(agg);
                let (off, field_ty) = aggregate_field_offset(agg_ty, &inst.indices)
                    .ok_or_else(|| unsupported(inst, "extractvalue index path"))?;
                if field_ty.is_float() {
                    let is_f32 = matches!(field_ty, Type::F32);
                    let dst = self.xmm_define(inst.dest);
                    if is_f32 {
                        self.code.movss_load(dst, agg_slot.offset + off as i32);
                    } else {
                        self.code.movsd_load(dst, agg_slot.offset + off as i32);
                    }
                } else {
                    let dst = self.gpr_define(inst.dest);
                    self.code.load_rbp(dst, agg_slot.offset + off as i32);
                }
                Ok(())
            }

            Opcode::InsertValue => {
                let agg_ty = type_sentinel_ty(&inst.operands[0]);
                let agg = inst.operands[1].as_vreg().unwrap();
                let field_val = &inst.operands[2];
                let agg_slot = self.prescan.slot_of(agg);
                let dst_slot = self.prescan.slot_of(inst.dest);
                let (off, field_ty) = aggregate_field_offset(agg_ty, &inst.indices)
                    .ok_or_else(|| unsupported(inst, "insertvalue index path"))?;
                let whole = liric_ir::layout::layout_of(agg_ty).layout.size.bytes();
                let mut copied = 0u64;
                while copied < whole {
                    let (reg, actions) = self.gpr.acquire_scratch();
                    for a in actions {
                        if let CacheAction::Evict { vreg, reg } = a {
                            let s = self.prescan.slot_of(vreg);
                            self.code.store_rbp(reg, s.offset);
                        }
                    }
                    self.code.load_rbp(reg, agg_slot.offset + copied as i32);
                    self.code.store_rbp(reg, dst_slot.offset + copied as i32);
                    self.gpr.free_scratch(reg);
                    copied += 8;
                }
                if field_ty.is_float() {
                    let is_f32 = matches!(field_ty, Type::F32);
                    let v = field_val
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(field_val, is_f32));
                    if is_f32 {
                        self.code.movss_store(v, dst_slot.offset + off as i32);
                    } else {
                        self.code.movsd_store(v, dst_slot.offset + off as i32);
                    }
                } else {
                    let v = self.load_int_operand(field_val);
                    self.code.store_rbp(v, dst_slot.offset + off as i32);
                }
                Ok(())
            }

            Opcode::Ret => {
                let val = &inst.operands[0];
                if inst.result_ty.is_float() {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let reg = val
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(val, is_f32));
                    if reg != 0 {
                        self.sse_mov(0, reg, is_f32);
                    }
                } else {
                    let reg = self.load_int_operand(val);
                    if reg != RAX {
                        self.code.mov_rr(RAX, reg);
                    }
                }
                self.flush_block();
                self.emit_epilogue();
                Ok(())
            }

            Opcode::RetVoid => {
                self.flush_block();
                self.emit_epilogue();
                Ok(())
            }

            Opcode::Unreachable => {
                self.code.u8(0x0F);
                self.code.u8(0x0B); // ud2
                Ok(())
            }

            Opcode::Br => {
                let target = inst.operands[0].as_block().unwrap();
                self.lower_phi_copies(target);
                self.flush_block();
                let at = self.code.jmp_rel32();
                self.pending_jumps.push((at, target));
                Ok(())
            }

            Opcode::CondBr => {
                let cond = inst.operands[0].as_vreg().unwrap();
                let t = inst.operands[1].as_block().unwrap();
                let f = inst.operands[2].as_block().unwrap();
                let creg = self.gpr_read(cond);
                self.code.alu_rr(0x85, creg, creg);
                // Stage both sides' phi copies before branching away;
                // each side only applies if control actually reaches it,
                // so we duplicate the staged copies per successor.
                let jne_at = self.code.jcc_rel32(5);
                self.lower_phi_copies(f);
                self.flush_block();
                let jmp_f = self.code.jmp_rel32();
                self.pending_jumps.push((jmp_f, f));
                let t_pos = self.code.pos();
                self.code.patch_rel32(jne_at, t_pos);
                self.lower_phi_copies(t);
                self.flush_block();
                let jmp_t = self.code.jmp_rel32();
                self.pending_jumps.push((jmp_t, t));
                Ok(())
            }
        }
    }

    fn sse_mov(&mut self, dst: u8, src: u8, is_f32: bool) {
        if dst == src {
            return;
        }
        if is_f32 {
            self.code.u8(0xF3);
        } else {
            self.code.u8(0xF2);
        }
        self.code.u8(0x0F);
        self.code.u8(0x10);
        self.code.modrm(3, dst, src);
    }

    fn load_float_imm(&mut self, op: &Operand, is_f32: bool) -> u8 {
        let bits = match op {
            Operand::ImmF64(f) => *f,
            _ => 0.0,
        };
        let (gpr, actions) = self.gpr.acquire_scratch();
        for a in actions {
            if let CacheAction::Evict { vreg, reg } = a {
                let s = self.prescan.slot_of(vreg);
                self.code.store_rbp(reg, s.offset);
            }
        }
        let (xmm, xactions) = self.xmm.acquire_scratch();
        for a in xactions {
            if let CacheAction::Evict { vreg, reg } = a {
                let s = self.prescan.slot_of(vreg);
                self.code.movsd_store(reg, s.offset);
            }
        }
        if is_f32 {
            self.code.mov_ri32(gpr, (bits as f32).to_bits() as i32);
            self.code.u8(0x66);
            self.code.rex_if_needed(false, xmm, gpr);
            self.code.u8(0x0F);
            self.code.u8(0x6E);
            self.code.modrm(3, xmm, gpr);
        } else {
            self.code.mov_ri64(gpr, bits.to_bits() as i64);
            self.code.movq_gpr_to_xmm(xmm, gpr);
        }
        self.gpr.free_scratch(gpr);
        self.xmm.free_scratch(xmm);
        xmm
    }

    fn load_int_indirect(&mut self, dst: u8, addr_reg: u8) {
        self.code.rex_if_needed(true, dst, addr_reg);
        self.code.u8(0x8B);
        self.code.modrm(0, dst, addr_reg & 7);
        if addr_reg & 7 == 4 {
            self.code.u8(0x24); // SIB for rsp/r12 base with no index/disp
        }
    }

    fn store_int_indirect(&mut self, addr_reg: u8, src: u8) {
        self.code.rex_if_needed(true, src, addr_reg);
        self.code.u8(0x89);
        self.code.modrm(0, src, addr_reg & 7);
        if addr_reg & 7 == 4 {
            self.code.u8(0x24);
        }
    }

    fn load_float_indirect(&mut self, dst_xmm: u8, addr_reg: u8, is_f32: bool) {
        self.code.u8(if is_f32 { 0xF3 } else { 0xF2 });
        self.code.u8(0x0F);
        self.code.u8(0x10);
        self.code.modrm(0, dst_xmm, addr_reg & 7);
        if addr_reg & 7 == 4 {
            self.code.u8(0x24);
        }
    }

    fn store_float_indirect(&mut self, addr_reg: u8, src_xmm: u8, is_f32: bool) {
        self.code.u8(if is_f32 { 0xF3 } else { 0xF2 });
        self.code.u8(0x0F);
        self.code.u8(0x11);
        self.code.modrm(0, src_xmm, addr_reg & 7);
        if addr_reg & 7 == 4 {
            self.code.u8(0x24);
        }
    }

    fn lower_cast(&mut self, inst: &Instruction, kind: liric_ir::CastKind) -> Result<(), BackendError> {
        use liric_ir::CastKind::*;
        let src_op = &inst.operands[1];
        match kind {
            Sext | Zext | Trunc | Bitcast | PtrToInt | IntToPtr => {
                let sreg = self.load_int_operand(src_op);
                let dst = self.gpr_define(inst.dest);
                match kind {
                    Trunc => {
                        let bits = match inst.result_ty {
                            Type::I1 => 1,
                            Type::I8 => 8,
                            Type::I16 => 16,
                            Type::I32 => 32,
                            _ => 64,
                        };
                        self.code.mov_rr(dst, sreg);
                        if bits < 64 {
                            let mask = if bits == 32 {
                                -1i64 as u32 as i64
                            } else {
                                (1i64 << bits) - 1
                            };
                            if let Ok(m32) = i32::try_from(mask) {
                                self.code.alu_ri32(4, dst, m32);
                            }
                        }
                    }
                    Sext => {
                        let src_ty = type_sentinel_ty(&inst.operands[0]);
                        let bits = match src_ty {
                            Type::I1 => 1,
                            Type::I8 => 8,
                            Type::I16 => 16,
                            Type::I32 => 32,
                            _ => 64,
                        };
                        self.code.mov_rr(dst, sreg);
                        if bits < 64 {
                            let shift = 64 - bits;
                            self.code.rex_if_needed(true, 0, dst);
                            self.code.u8(0xC1);
                            self.code.modrm(3, 4, dst);
                            self.code.u8(shift as u8);
                            self.code.rex_if_needed(true, 0, dst);
                            self.code.u8(0xC1);
                            self.code.modrm(3, 7, dst);
                            self.code.u8(shift as u8);
                        }
                    }
                    _ => self.code.mov_rr(dst, sreg),
                }
                Ok(())
            }
            SIToFP | UIToFP => {
                let sreg = self.load_int_operand(src_op);
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let dst = self.xmm_define(inst.dest);
                if is_f32 {
                    self.code.cvtsi2ss(dst, sreg);
                } else {
                    self.code.cvtsi2sd(dst, sreg);
                }
                Ok(())
            }
            FPToSI | FPToUI => {
                let src_ty = type_sentinel_ty(&inst.operands[0]);
                let is_f32 = matches!(src_ty, Type::F32);
                let sreg = src_op
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(src_op, is_f32));
                let dst = self.gpr_define(inst.dest);
                if is_f32 {
                    self.code.cvttss2si(dst, sreg);
                } else {
                    self.code.cvttsd2si(dst, sreg);
                }
                Ok(())
            }
            FPExt => {
                let sreg = src_op
                    .as_vreg()
                    .map(|v| self.xmm_read(v, true))
                    .unwrap_or_else(|| self.load_float_imm(src_op, true));
                let dst = self.xmm_define(inst.dest);
                self.code.cvtss2sd(dst, sreg);
                Ok(())
            }
            FPTrunc => {
                let sreg = src_op
                    .as_vreg()
                    .map(|v| self.xmm_read(v, false))
                    .unwrap_or_else(|| self.load_float_imm(src_op, false));
                let dst = self.xmm_define(inst.dest);
                self.code.cvtsd2ss(dst, sreg);
                Ok(())
            }
        }
    }

    fn lower_call(&mut self, inst: &Instruction<'a>) -> Result<(), BackendError> {
        let flags = inst.call_flags.unwrap_or_default();
        let callee = inst.operands[0];
        let args = &inst.operands[1..];

        let mut int_idx = 0usize;
        let mut float_idx = 0usize;
        let mut stack_idx = 0u32;
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let ty = type_sentinel_ty(&args[i]);
            let val = args[i + 1];
            pairs.push((ty, val));
            i += 2;
        }

        self.flush_block();

        for (ty, val) in &pairs {
            if ty.is_float() {
                if float_idx >= XMM_ARG_REGS.len() {
                    return Err(unsupported(inst, "more than 8 float args"));
                }
                let is_f32 = matches!(ty, Type::F32);
                let reg = XMM_ARG_REGS[float_idx];
                let vreg_ = val.as_vreg();
                let src = match vreg_ {
                    Some(v) => self.xmm_read(v, is_f32),
                    None => self.load_float_imm(val, is_f32),
                };
                self.sse_mov(reg, src, is_f32);
                float_idx += 1;
            } else if int_idx < INT_ARG_REGS.len() {
                let reg = INT_ARG_REGS[int_idx];
                let src = self.load_int_operand(val);
                self.code.mov_rr(reg, src);
                int_idx += 1;
            } else {
                let src = self.load_int_operand(val);
                self.code
                    .store_rbp(src, self.frame.outgoing_arg_slot(stack_idx));
                stack_idx += 1;
            }
        }

        if flags.vararg {
            self.code.mov_ri32(RAX, float_idx as i32);
        }

        match callee {
            Operand::Global(sym, _) => self.code.call_rel32_patch(sym),
            Operand::VReg(v) => {
                let reg = self.gpr_read(v);
                self.code.call_indirect(reg);
            }
            _ => return Err(unsupported(inst, "call target must be a symbol or vreg")),
        }

        if !matches!(inst.result_ty, Type::Void) {
            if inst.result_ty.is_float() {
                self.xmm.bind_fixed(inst.dest, 0);
            } else {
                self.gpr.bind_fixed(inst.dest, RAX);
            }
        }
        Ok(())
    }

    fn lower_phi_copies(&mut self, target: BlockId) {
        let block = self.func.block(target);
        let transfers: Vec<(VReg, Operand)> = block
            .phis()
            .filter_map(|phi| {
                phi.phi_incoming()
                    .find(|(_, b)| b.as_block() == Some(self.current_block))
                    .map(|(v, _)| (phi.dest, v))
            })
            .collect();
        if transfers.is_empty() {
            return;
        }
        let mut staged = Vec::new();
        for (i, (_, src)) in transfers.iter().enumerate() {
            let is_float = self.func_dest_is_float(transfers[i].0);
            if is_float {
                let reg = src
                    .as_vreg()
                    .map(|v| self.xmm_read(v, false))
                    .unwrap_or_else(|| self.load_float_imm(src, false));
                self.code
                    .movsd_store(reg, self.frame.phi_staging_slot(i as u32));
            } else {
                let reg = self.load_int_operand(src);
                self.code
                    .store_rbp(reg, self.frame.phi_staging_slot(i as u32));
            }
            staged.push(i);
        }
        for (i, (dest, _)) in transfers.iter().enumerate() {
            let is_float = self.func_dest_is_float(*dest);
            let dst_slot = self.prescan.slot_of(*dest);
            if is_float {
                let (reg, actions) = self.xmm.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.movsd_store(reg, s.offset);
                    }
                }
                self.code
                    .movsd_load(reg, self.frame.phi_staging_slot(i as u32));
                self.code.movsd_store(reg, dst_slot.offset);
                self.xmm.free_scratch(reg);
            } else {
                let (reg, actions) = self.gpr.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.store_rbp(reg, s.offset);
                    }
                }
                self.code
                    .load_rbp(reg, self.frame.phi_staging_slot(i as u32));
                self.code.store_rbp(reg, dst_slot.offset);
                self.gpr.free_scratch(reg);
            }
        }
    }

    fn func_dest_is_float(&self, v: VReg) -> bool {
        for block in self.func.blocks.iter() {
            for inst in &block.instructions {
                if inst.dest == v {
                    return inst.result_ty.is_float();
                }
            }
        }
        false
    }

    fn emit_prologue(&mut self) {
        self.code.push_r(5);
        self.code.mov_rr(5, 4);
        if self.frame.frame_size > 0 {
            self.code.u8(0x48);
            self.code.u8(0x81);
            self.code.modrm(3, 5, 4);
            self.code.i32(self.frame.frame_size as i32);
        }
        let mut int_idx = 0usize;
        let mut float_idx = 0usize;
        for (i, &pv) in self.func.param_vregs.iter().enumerate() {
            let ty = self.func.param_tys[i];
            let slot = self.prescan.slot_of(pv);
            if ty.is_float() {
                let reg = XMM_ARG_REGS.get(float_idx).copied().unwrap_or(0);
                if ty == Type::F32 {
                    self.code.movss_store(reg, slot.offset);
                } else {
                    self.code.movsd_store(reg, slot.offset);
                }
                float_idx += 1;
            } else {
                let reg = INT_ARG_REGS.get(int_idx).copied().unwrap_or(RAX);
                self.code.store_rbp(reg, slot.offset);
                int_idx += 1;
            }
        }
    }

    fn emit_epilogue(&mut self) {
        self.code.mov_rr(4, 5);
        self.code.pop_r(5);
        self.code.ret();
    }
}

/// Flat `struct.field` / `array[index]` descent used by
/// `extractvalue`/`insertvalue`: every index scales by the current
/// aggregate's concrete member (not a uniform stride, unlike `gep`).
fn aggregate_field_offset<'a>(agg_ty: Type<'a>, indices: &[u32]) -> Option<(u64, Type<'a>)> {
    let mut ty = agg_ty;
    let mut offset = 0u64;
    for &idx in indices {
        match ty {
            Type::Struct(fields, packed) => {
                let offsets = liric_ir::layout::field_offsets(fields, packed);
                offset += offsets.get(idx as usize).copied()?;
                ty = *fields.get(idx as usize)?;
            }
            Type::Array(elem, _) => {
                let elem_size = liric_ir::layout::layout_of(*elem).layout.size.bytes();
                offset += elem_size * idx as u64;
                ty = *elem;
            }
            _ => return None,
        }
    }
    Some((offset, ty))
}

pub fn compile_function(
    module: &Module,
    func: &Function,
) -> Result<CompiledFunction, BackendError> {
    let prescan = Prescan::run(func);
    let frame = FrameLayout::compute(&prescan);
    let mut lowering = Lowering {
        module,
        func,
        prescan: &prescan,
        frame: &frame,
        code: Code {
            bytes: Vec::new(),
            patches: Vec::new(),
        },
        gpr: ValueCache::new(&GPR_POOL),
        xmm: ValueCache::new(&[0, 1, 2, 3, 4, 5, 6, 7]),
        block_offsets: HashMap::new(),
        pending_jumps: Vec::new(),
        current_block: liric_ir::ENTRY_BLOCK,
    };
    lowering.emit_prologue();

    for (id, block) in func.blocks.iter_enumerated() {
        lowering.current_block = id;
        lowering.block_offsets.insert(id, lowering.code.pos());
        for inst in &block.instructions {
            if inst.opcode.is_terminator() {
                continue;
            }
            lowering.lower_instruction(inst)?;
        }
        if let Some(term) = block.terminator() {
            lowering.lower_instruction(term)?;
        }
    }

    for (at, target) in lowering.pending_jumps.clone() {
        let dest = *lowering.block_offsets.get(&target).unwrap();
        lowering.code.patch_rel32(at, dest);
    }

    Ok(CompiledFunction {
        symbol: func.symbol,
        code: lowering.code.bytes,
        patches: lowering.code.patches,
        frame_size: frame.frame_size,
    })
}
