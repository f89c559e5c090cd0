//! AArch64 AAPCS64 emission (spec §4.4 point 6): the secondary host ISA.
//! Shares `Prescan`/`FrameLayout`/`ValueCache` with [`crate::x86_64`] but
//! is a standalone emitter rather than a shared-trait abstraction over
//! both ISAs -- there was no third backend pulling on a common `Isa`
//! trait, so a sibling module was simpler than an abstraction with one
//! real implementation and one speculative one.
//!
//! Like `x86_64`, every integer value lives in a 64-bit register/slot
//! regardless of IR width. Logical/arithmetic-immediate folding is not
//! attempted: AArch64's bitmask-immediate encoding for `AND`/`ORR`/`EOR`
//! is its own small constraint-satisfaction problem, and `ADD`/`SUB`
//! only take a 12-bit (optionally `LSL #12`) immediate, so operands are
//! materialized into a scratch register and every ALU op goes through
//! the register-register form. Call arguments stop at the eight
//! register slots AAPCS64 gives each class; stack-passed arguments
//! return `BackendError::Unsupported` (recorded as an open decision in
//! DESIGN.md).

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

const GPR_POOL: [u8; 7] = [9, 10, 11, 12, 13, 14, 15];
const FPR_POOL: [u8; 7] = [16, 17, 18, 19, 20, 21, 22];
const INT_ARG_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const FP_ARG_REGS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
/// x16 (IP0): dedicated address-computation scratch, never cache-managed.
const ADDR_SCRATCH: u8 = 16;

const COND_EQ: u8 = 0b0000;
const COND_NE: u8 = 0b0001;
const COND_CS: u8 = 0b0010;
const COND_CC: u8 = 0b0011;
const COND_MI: u8 = 0b0100;
const COND_VS: u8 = 0b0110;
const COND_HI: u8 = 0b1000;
const COND_LS: u8 = 0b1001;
const COND_GE: u8 = 0b1010;
const COND_LT: u8 = 0b1011;
const COND_GT: u8 = 0b1100;
const COND_LE: u8 = 0b1101;

struct Code {
    bytes: Vec<u8>,
    patches: Vec<PatchEntry>,
}

impl Code {
    fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn word(&mut self, w: u32) {
        self.bytes.extend_from_slice(&w.to_le_bytes());
    }

    fn patch_word(&mut self, at: u32, w: u32) {
        self.bytes[at as usize..at as usize + 4].copy_from_slice(&w.to_le_bytes());
    }

    fn read_word(&self, at: u32) -> u32 {
        u32::from_le_bytes(self.bytes[at as usize..at as usize + 4].try_into().unwrap())
    }

    fn mov_rr(&mut self, rd: u8, rn: u8) {
        if rd == rn {
            return;
        }
        self.word(0xAA0003E0 | ((rn as u32) << 16) | rd as u32);
    }

    fn add_reg(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x8B000000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn sub_reg(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0xCB000000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn and_reg(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x8A000000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn orr_reg(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0xAA000000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn eor_reg(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0xCA000000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn mul(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9B007C00 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn msub(&mut self, rd: u8, rn: u8, rm: u8, ra: u8) {
        self.word(0x9B008000 | (rm as u32) << 16 | (ra as u32) << 10 | (rn as u32) << 5 | rd as u32);
    }

    fn sdiv(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9AC00C00 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn udiv(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9AC00800 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn lslv(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9AC02000 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn lsrv(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9AC02400 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn asrv(&mut self, rd: u8, rn: u8, rm: u8) {
        self.word(0x9AC02800 | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn ands_reg(&mut self, rn: u8, rm: u8) {
        self.word(0xEA00001F | (rm as u32) << 16 | (rn as u32) << 5);
    }

    fn cmp_reg(&mut self, rn: u8, rm: u8) {
        self.word(0xEB00001F | (rm as u32) << 16 | (rn as u32) << 5);
    }

    fn cset(&mut self, rd: u8, cond: u8) {
        let inv = cond ^ 1;
        self.word(0x9A9F07E0 | ((inv as u32) << 12) | rd as u32);
    }

    fn csel(&mut self, rd: u8, rn: u8, rm: u8, cond: u8) {
        self.word(0x9A800000 | (rm as u32) << 16 | ((cond as u32) << 12) | (rn as u32) << 5 | rd as u32);
    }

    fn fcsel(&mut self, rd: u8, rn: u8, rm: u8, cond: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E200C00 } else { 0x1E600C00 };
        self.word(base | (rm as u32) << 16 | ((cond as u32) << 12) | (rn as u32) << 5 | rd as u32);
    }

    fn b_placeholder(&mut self) -> u32 {
        let at = self.pos();
        self.word(0x14000000);
        at
    }

    fn patch_b(&mut self, at: u32, target: u32) {
        let imm = (target as i64 - at as i64) / 4;
        self.patch_word(at, 0x14000000 | (imm as u32 & 0x03FF_FFFF));
    }

    fn bcond_placeholder(&mut self, cond: u8) -> u32 {
        let at = self.pos();
        self.word(0x54000000 | cond as u32);
        at
    }

    fn patch_bcond(&mut self, at: u32, target: u32) {
        let cond = self.read_word(at) & 0xF;
        let imm = (target as i64 - at as i64) / 4;
        self.patch_word(at, 0x54000000 | ((imm as u32 & 0x7FFFF) << 5) | cond);
    }

    fn bl_patch(&mut self, symbol: liric_ir::SymbolId) {
        let at = self.pos();
        self.word(0x94000000);
        self.patches.push(PatchEntry {
            offset: at,
            symbol,
            kind: RelocKind::Aarch64CallRel26,
            addend: 0,
        });
    }

    fn blr(&mut self, rn: u8) {
        self.word(0xD63F0000 | (rn as u32) << 5);
    }

    fn ret(&mut self) {
        self.word(0xD65F03C0);
    }

    fn brk(&mut self) {
        self.word(0xD4200000);
    }

    fn ldr_x(&mut self, rt: u8, rn: u8) {
        self.word(0xF9400000 | (rn as u32) << 5 | rt as u32);
    }

    fn str_x(&mut self, rt: u8, rn: u8) {
        self.word(0xF9000000 | (rn as u32) << 5 | rt as u32);
    }

    fn ldr_d(&mut self, rt: u8, rn: u8) {
        self.word(0xFD400000 | (rn as u32) << 5 | rt as u32);
    }

    fn str_d(&mut self, rt: u8, rn: u8) {
        self.word(0xFD000000 | (rn as u32) << 5 | rt as u32);
    }

    fn ldr_s(&mut self, rt: u8, rn: u8) {
        self.word(0xBD400000 | (rn as u32) << 5 | rt as u32);
    }

    fn str_s(&mut self, rt: u8, rn: u8) {
        self.word(0xBD000000 | (rn as u32) << 5 | rt as u32);
    }

    /// Materializes `x29 + offset` into the dedicated address scratch
    /// register and returns it. Built from up to two `ADD`/`SUB`
    /// (immediate, optionally `LSL #12`) so frame offsets of any
    /// reasonable size work without a bitmask-immediate search.
    fn fp_addr(&mut self, offset: i32) -> u8 {
        let abs = offset.unsigned_abs();
        let hi = (abs >> 12) & 0xFFF;
        let lo = abs & 0xFFF;
        let (hi_op, lo_op) = if offset >= 0 {
            (0x9140_0000u32, 0x9100_0000u32)
        } else {
            (0xD140_0000u32, 0xD100_0000u32)
        };
        if hi != 0 {
            self.word(hi_op | (hi << 10) | (29u32 << 5) | ADDR_SCRATCH as u32);
            if lo != 0 {
                self.word(lo_op | (lo << 10) | (ADDR_SCRATCH as u32) << 5 | ADDR_SCRATCH as u32);
            }
        } else {
            self.word(lo_op | (lo << 10) | (29u32 << 5) | ADDR_SCRATCH as u32);
        }
        ADDR_SCRATCH
    }

    fn ldr_fp_x(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.ldr_x(rt, addr);
    }

    fn str_fp_x(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.str_x(rt, addr);
    }

    fn ldr_fp_d(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.ldr_d(rt, addr);
    }

    fn str_fp_d(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.str_d(rt, addr);
    }

    fn ldr_fp_s(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.ldr_s(rt, addr);
    }

    fn str_fp_s(&mut self, rt: u8, offset: i32) {
        let addr = self.fp_addr(offset);
        self.str_s(rt, addr);
    }

    fn fadd(&mut self, rd: u8, rn: u8, rm: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E202800 } else { 0x1E602800 };
        self.word(base | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn fsub(&mut self, rd: u8, rn: u8, rm: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E203800 } else { 0x1E603800 };
        self.word(base | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn fmul(&mut self, rd: u8, rn: u8, rm: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E200800 } else { 0x1E600800 };
        self.word(base | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn fdiv(&mut self, rd: u8, rn: u8, rm: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E201800 } else { 0x1E601800 };
        self.word(base | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32);
    }

    fn fneg(&mut self, rd: u8, rn: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E214000 } else { 0x1E614000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fmov_reg(&mut self, rd: u8, rn: u8, is_f32: bool) {
        if rd == rn {
            return;
        }
        let base = if is_f32 { 0x1E204000 } else { 0x1E604000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fmov_gpr_to_fp(&mut self, rd: u8, rn: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E270000 } else { 0x9E670000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fmov_fp_to_gpr(&mut self, rd: u8, rn: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E260000 } else { 0x9E660000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fcmp(&mut self, rn: u8, rm: u8, is_f32: bool) {
        let base = if is_f32 { 0x1E202000 } else { 0x1E602000 };
        self.word(base | (rm as u32) << 16 | (rn as u32) << 5);
    }

    fn scvtf(&mut self, rd: u8, rn: u8, is_f32: bool) {
        let base = if is_f32 { 0x9E220000 } else { 0x9E620000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn ucvtf(&mut self, rd: u8, rn: u8, is_f32: bool) {
        let base = if is_f32 { 0x9E230000 } else { 0x9E630000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fcvtzs(&mut self, rd: u8, rn: u8, src_f32: bool) {
        let base = if src_f32 { 0x9E380000 } else { 0x9E780000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fcvtzu(&mut self, rd: u8, rn: u8, src_f32: bool) {
        let base = if src_f32 { 0x9E390000 } else { 0x9E790000 };
        self.word(base | (rn as u32) << 5 | rd as u32);
    }

    fn fcvt_s_to_d(&mut self, rd: u8, rn: u8) {
        self.word(0x1E22C000 | (rn as u32) << 5 | rd as u32);
    }

    fn fcvt_d_to_s(&mut self, rd: u8, rn: u8) {
        self.word(0x1E624000 | (rn as u32) << 5 | rd as u32);
    }

    fn materialize_imm64(&mut self, rd: u8, v: i64) {
        let u = v as u64;
        let chunks = [u & 0xFFFF, (u >> 16) & 0xFFFF, (u >> 32) & 0xFFFF, (u >> 48) & 0xFFFF];
        let mut wrote = false;
        for (i, &c) in chunks.iter().enumerate() {
            if c == 0 && !(i == 0 && u == 0) {
                continue;
            }
            let w = if !wrote {
                0xD280_0000u32 | ((i as u32) << 21) | ((c as u32) << 5) | rd as u32
            } else {
                0xF280_0000u32 | ((i as u32) << 21) | ((c as u32) << 5) | rd as u32
            };
            self.word(w);
            wrote = true;
        }
    }

    fn mov_sp(&mut self, rd: u8, rn: u8) {
        self.word(0x9100_0000 | (rn as u32) << 5 | rd as u32);
    }

    fn sub_sp_imm(&mut self, amount: u32) {
        let hi = (amount >> 12) & 0xFFF;
        let lo = amount & 0xFFF;
        if hi != 0 {
            self.word(0xD140_0000 | (hi << 10) | (31u32 << 5) | 31);
        }
        if lo != 0 || hi == 0 {
            self.word(0xD100_0000 | (lo << 10) | (31u32 << 5) | 31);
        }
    }

    fn add_sp_imm(&mut self, amount: u32) {
        let hi = (amount >> 12) & 0xFFF;
        let lo = amount & 0xFFF;
        if hi != 0 {
            self.word(0x9140_0000 | (hi << 10) | (31u32 << 5) | 31);
        }
        if lo != 0 || hi == 0 {
            self.word(0x9100_0000 | (lo << 10) | (31u32 << 5) | 31);
        }
    }

    fn stp_pre(&mut self, rt1: u8, rt2: u8, rn: u8, imm: i32) {
        let imm7 = ((imm / 8) & 0x7F) as u32;
        self.word(0xA980_0000 | (imm7 << 15) | (rt2 as u32) << 10 | (rn as u32) << 5 | rt1 as u32);
    }

    fn ldp_post(&mut self, rt1: u8, rt2: u8, rn: u8, imm: i32) {
        let imm7 = ((imm / 8) & 0x7F) as u32;
        self.word(0xA8C0_0000 | (imm7 << 15) | (rt2 as u32) << 10 | (rn as u32) << 5 | rt1 as u32);
    }
}

fn icmp_cc(pred: ICmpPredicate) -> u8 {
    match pred {
        ICmpPredicate::Eq => COND_EQ,
        ICmpPredicate::Ne => COND_NE,
        ICmpPredicate::Slt => COND_LT,
        ICmpPredicate::Sle => COND_LE,
        ICmpPredicate::Sgt => COND_GT,
        ICmpPredicate::Sge => COND_GE,
        ICmpPredicate::Ult => COND_CC,
        ICmpPredicate::Ule => COND_LS,
        ICmpPredicate::Ugt => COND_HI,
        ICmpPredicate::Uge => COND_CS,
    }
}

fn fcmp_cc(pred: FCmpPredicate) -> Option<u8> {
    Some(match pred {
        FCmpPredicate::Oeq => COND_EQ,
        FCmpPredicate::One => COND_NE,
        FCmpPredicate::Olt => COND_LT,
        FCmpPredicate::Ole => COND_LE,
        FCmpPredicate::Ogt => COND_GT,
        FCmpPredicate::Oge => COND_GE,
        FCmpPredicate::Uno => COND_VS,
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

/// Mirrors `x86_64::aggregate_field_offset`: flat `struct.field` /
/// `array[index]` descent for `extractvalue`/`insertvalue`.
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
                CacheAction::Load { reg } => self.code.ldr_fp_x(reg, slot.offset),
                CacheAction::Evict { vreg, reg } => {
                    let s = self.prescan.slot_of(vreg);
                    self.code.str_fp_x(reg, s.offset);
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
                self.code.str_fp_x(reg, s.offset);
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
                        self.code.ldr_fp_s(reg, slot.offset);
                    } else {
                        self.code.ldr_fp_d(reg, slot.offset);
                    }
                }
                CacheAction::Evict { vreg, reg } => {
                    let s = self.prescan.slot_of(vreg);
                    self.code.str_fp_d(reg, s.offset);
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
                self.code.str_fp_d(reg, s.offset);
            }
        }
        reg
    }

    fn flush_block(&mut self) {
        for action in self.gpr.flush_all() {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.str_fp_x(reg, s.offset);
            }
        }
        for action in self.xmm.flush_all() {
            if let CacheAction::Evict { vreg, reg } = action {
                let s = self.prescan.slot_of(vreg);
                self.code.str_fp_d(reg, s.offset);
            }
        }
    }

    fn scratch_gpr(&mut self) -> u8 {
        let (reg, actions) = self.gpr.acquire_scratch();
        for a in actions {
            if let CacheAction::Evict { vreg, reg } = a {
                let s = self.prescan.slot_of(vreg);
                self.code.str_fp_x(reg, s.offset);
            }
        }
        reg
    }

    fn load_int_operand(&mut self, op: &Operand) -> u8 {
        match op {
            Operand::VReg(v) => self.gpr_read(*v),
            Operand::ImmI64(i) => {
                let reg = self.scratch_gpr();
                self.code.materialize_imm64(reg, *i);
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Null(_) | Operand::Undef(_) => {
                let reg = self.scratch_gpr();
                self.code.materialize_imm64(reg, 0);
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Global(sym, addend) => {
                let reg = self.scratch_gpr();
                let at_adrp = self.code.pos();
                self.code.word(0x9000_0000 | reg as u32);
                self.code.patches.push(PatchEntry {
                    offset: at_adrp,
                    symbol: *sym,
                    kind: RelocKind::Aarch64AdrpPage21,
                    addend: *addend,
                });
                let at_add = self.code.pos();
                self.code.word(0x9100_0000 | (reg as u32) << 5 | reg as u32);
                self.code.patches.push(PatchEntry {
                    offset: at_add,
                    symbol: *sym,
                    kind: RelocKind::Aarch64AddAbsLo12,
                    addend: *addend,
                });
                self.gpr.free_scratch(reg);
                reg
            }
            Operand::Block(_) => unreachable!("block operand used as a value"),
        }
    }

    fn load_float_imm(&mut self, op: &Operand, is_f32: bool) -> u8 {
        let bits = match op {
            Operand::ImmF64(f) => *f,
            _ => 0.0,
        };
        let gpr = self.scratch_gpr();
        let (xmm, xactions) = self.xmm.acquire_scratch();
        for a in xactions {
            if let CacheAction::Evict { vreg, reg } = a {
                let s = self.prescan.slot_of(vreg);
                self.code.str_fp_d(reg, s.offset);
            }
        }
        if is_f32 {
            self.code.materialize_imm64(gpr, (bits as f32).to_bits() as i64);
        } else {
            self.code.materialize_imm64(gpr, bits.to_bits() as i64);
        }
        self.code.fmov_gpr_to_fp(xmm, gpr, is_f32);
        self.gpr.free_scratch(gpr);
        self.xmm.free_scratch(xmm);
        xmm
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

            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Mul => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                let dst = self.gpr_define(inst.dest);
                match inst.opcode {
                    Opcode::Add => self.code.add_reg(dst, lreg, rreg),
                    Opcode::Sub => self.code.sub_reg(dst, lreg, rreg),
                    Opcode::And => self.code.and_reg(dst, lreg, rreg),
                    Opcode::Or => self.code.orr_reg(dst, lreg, rreg),
                    Opcode::Xor => self.code.eor_reg(dst, lreg, rreg),
                    Opcode::Mul => self.code.mul(dst, lreg, rreg),
                    _ => unreachable!(),
                }
                Ok(())
            }

            Opcode::SDiv | Opcode::UDiv => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                let dst = self.gpr_define(inst.dest);
                if matches!(inst.opcode, Opcode::SDiv) {
                    self.code.sdiv(dst, lreg, rreg);
                } else {
                    self.code.udiv(dst, lreg, rreg);
                }
                Ok(())
            }

            Opcode::SRem | Opcode::URem => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                let q = self.scratch_gpr();
                if matches!(inst.opcode, Opcode::SRem) {
                    self.code.sdiv(q, lreg, rreg);
                } else {
                    self.code.udiv(q, lreg, rreg);
                }
                let dst = self.gpr_define(inst.dest);
                self.code.msub(dst, q, rreg, lreg);
                self.gpr.free_scratch(q);
                Ok(())
            }

            Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                let lreg = self.load_int_operand(&inst.operands[0]);
                let rreg = self.load_int_operand(&inst.operands[1]);
                let dst = self.gpr_define(inst.dest);
                match inst.opcode {
                    Opcode::Shl => self.code.lslv(dst, lreg, rreg),
                    Opcode::LShr => self.code.lsrv(dst, lreg, rreg),
                    Opcode::AShr => self.code.asrv(dst, lreg, rreg),
                    _ => unreachable!(),
                }
                Ok(())
            }

            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::FRem => {
                if matches!(inst.opcode, Opcode::FRem) {
                    return Err(unsupported(inst, "frem has no direct AArch64 instruction"));
                }
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let lreg = inst.operands[0]
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(&inst.operands[0], is_f32));
                let rreg = inst.operands[1]
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(&inst.operands[1], is_f32));
                let dst = self.xmm_define(inst.dest);
                match inst.opcode {
                    Opcode::FAdd => self.code.fadd(dst, lreg, rreg, is_f32),
                    Opcode::FSub => self.code.fsub(dst, lreg, rreg, is_f32),
                    Opcode::FMul => self.code.fmul(dst, lreg, rreg, is_f32),
                    Opcode::FDiv => self.code.fdiv(dst, lreg, rreg, is_f32),
                    _ => unreachable!(),
                }
                Ok(())
            }

            Opcode::FNeg => {
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let src = inst.operands[0].as_vreg().unwrap();
                let sreg = self.xmm_read(src, is_f32);
                let dst = self.xmm_define(inst.dest);
                self.code.fneg(dst, sreg, is_f32);
                Ok(())
            }

            Opcode::ICmp => {
                let lreg = self.load_int_operand(&inst.operands[1]);
                let rreg = self.load_int_operand(&inst.operands[2]);
                self.code.cmp_reg(lreg, rreg);
                let dst = self.gpr_define(inst.dest);
                self.code.cset(dst, icmp_cc(inst.icmp_pred.unwrap()));
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
                self.code.fcmp(lreg, rreg, is_f32);
                let dst = self.gpr_define(inst.dest);
                let cc = fcmp_cc(inst.fcmp_pred.unwrap())
                    .ok_or_else(|| unsupported(inst, "fcmp predicate"))?;
                self.code.cset(dst, cc);
                Ok(())
            }

            Opcode::Alloca => {
                let slot = self.prescan.alloca_slot_of(inst.dest);
                let dst = self.gpr_define(inst.dest);
                let addr = self.code.fp_addr(slot.offset);
                self.code.mov_rr(dst, addr);
                Ok(())
            }

            Opcode::Load => {
                let addr = &inst.operands[0];
                if inst.result_ty.is_float() {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let areg = self.load_int_operand(addr);
                    let dst = self.xmm_define(inst.dest);
                    if is_f32 {
                        self.code.ldr_s(dst, areg);
                    } else {
                        self.code.ldr_d(dst, areg);
                    }
                } else {
                    let areg = self.load_int_operand(addr);
                    let dst = self.gpr_define(inst.dest);
                    self.code.ldr_x(dst, areg);
                }
                Ok(())
            }

            Opcode::Store => {
                let val = &inst.operands[0];
                let addr = &inst.operands[1];
                let areg = match addr.as_vreg() {
                    Some(v) => self.gpr_read(v),
                    None => self.load_int_operand(addr),
                };
                let is_float_val = matches!(inst.result_ty, Type::F32 | Type::F64);
                if is_float_val {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let vreg_ = val.as_vreg().unwrap();
                    let vreg_phys = self.xmm_read(vreg_, is_f32);
                    if is_f32 {
                        self.code.str_s(vreg_phys, areg);
                    } else {
                        self.code.str_d(vreg_phys, areg);
                    }
                } else {
                    let vreg_phys = self.load_int_operand(val);
                    self.code.str_x(vreg_phys, areg);
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
                                Some(acc) => self.code.add_reg(acc, acc, r),
                            }
                        }
                    }
                }
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, base);
                if let Some(r) = runtime_sum {
                    if elem_size != 1 {
                        let scale = self.scratch_gpr();
                        self.code.materialize_imm64(scale, elem_size as i64);
                        self.code.mul(r, r, scale);
                        self.gpr.free_scratch(scale);
                    }
                    self.code.add_reg(dst, dst, r);
                }
                let byte_off = const_sum
                    .checked_mul(elem_size as i64)
                    .ok_or_else(|| unsupported(inst, "gep constant offset overflow"))?;
                if byte_off != 0 {
                    let scratch = self.scratch_gpr();
                    self.code.materialize_imm64(scratch, byte_off);
                    self.code.add_reg(dst, dst, scratch);
                    self.gpr.free_scratch(scratch);
                }
                Ok(())
            }

            Opcode::Call => self.lower_call(inst),

            Opcode::Select => {
                let cond = inst.operands[0].as_vreg().unwrap();
                let creg = self.gpr_read(cond);
                self.code.ands_reg(creg, creg);
                if inst.result_ty.is_float() {
                    let is_f32 = matches!(inst.result_ty, Type::F32);
                    let treg = inst.operands[1]
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(&inst.operands[1], is_f32));
                    let freg = inst.operands[2]
                        .as_vreg()
                        .map(|v| self.xmm_read(v, is_f32))
                        .unwrap_or_else(|| self.load_float_imm(&inst.operands[2], is_f32));
                    let dst = self.xmm_define(inst.dest);
                    self.code.fcsel(dst, treg, freg, COND_NE, is_f32);
                } else {
                    let treg = self.load_int_operand(&inst.operands[1]);
                    let freg = self.load_int_operand(&inst.operands[2]);
                    let dst = self.gpr_define(inst.dest);
                    self.code.csel(dst, treg, freg, COND_NE);
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
                        self.code.ldr_fp_s(dst, agg_slot.offset + off as i32);
                    } else {
                        self.code.ldr_fp_d(dst, agg_slot.offset + off as i32);
                    }
                } else {
                    let dst = self.gpr_define(inst.dest);
                    self.code.ldr_fp_x(dst, agg_slot.offset + off as i32);
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
                    let reg = self.scratch_gpr();
                    self.code.ldr_fp_x(reg, agg_slot.offset + copied as i32);
                    self.code.str_fp_x(reg, dst_slot.offset + copied as i32);
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
                        self.code.str_fp_s(v, dst_slot.offset + off as i32);
                    } else {
                        self.code.str_fp_d(v, dst_slot.offset + off as i32);
                    }
                } else {
                    let v = self.load_int_operand(field_val);
                    self.code.str_fp_x(v, dst_slot.offset + off as i32);
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
                    self.code.fmov_reg(0, reg, is_f32);
                } else {
                    let reg = self.load_int_operand(val);
                    self.code.mov_rr(0, reg);
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
                self.code.brk();
                Ok(())
            }

            Opcode::Br => {
                let target = inst.operands[0].as_block().unwrap();
                self.lower_phi_copies(target);
                self.flush_block();
                let at = self.code.b_placeholder();
                self.pending_jumps.push((at, target));
                Ok(())
            }

            Opcode::CondBr => {
                let cond = inst.operands[0].as_vreg().unwrap();
                let t = inst.operands[1].as_block().unwrap();
                let f = inst.operands[2].as_block().unwrap();
                let creg = self.gpr_read(cond);
                self.code.ands_reg(creg, creg);
                let beq_at = self.code.bcond_placeholder(COND_EQ);
                self.lower_phi_copies(t);
                self.flush_block();
                let b_t = self.code.b_placeholder();
                self.pending_jumps.push((b_t, t));
                let f_pos = self.code.pos();
                self.code.patch_bcond(beq_at, f_pos);
                self.lower_phi_copies(f);
                self.flush_block();
                let b_f = self.code.b_placeholder();
                self.pending_jumps.push((b_f, f));
                Ok(())
            }
        }
    }

    fn lower_call(&mut self, inst: &Instruction<'a>) -> Result<(), BackendError> {
        let _flags: CallFlags = inst.call_flags.unwrap_or_default();
        let callee = inst.operands[0];
        let args = &inst.operands[1..];

        let mut pairs = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let ty = type_sentinel_ty(&args[i]);
            let val = args[i + 1];
            pairs.push((ty, val));
            i += 2;
        }

        let int_count = pairs.iter().filter(|(ty, _)| !ty.is_float()).count();
        let float_count = pairs.iter().filter(|(ty, _)| ty.is_float()).count();
        if int_count > INT_ARG_REGS.len() || float_count > FP_ARG_REGS.len() {
            return Err(unsupported(inst, "more than 8 args of one class (no stack args on aarch64)"));
        }

        self.flush_block();

        let mut int_idx = 0usize;
        let mut float_idx = 0usize;
        for (ty, val) in &pairs {
            if ty.is_float() {
                let is_f32 = matches!(ty, Type::F32);
                let reg = FP_ARG_REGS[float_idx];
                let src = val
                    .as_vreg()
                    .map(|v| self.xmm_read(v, is_f32))
                    .unwrap_or_else(|| self.load_float_imm(val, is_f32));
                self.code.fmov_reg(reg, src, is_f32);
                float_idx += 1;
            } else {
                let reg = INT_ARG_REGS[int_idx];
                let src = self.load_int_operand(val);
                self.code.mov_rr(reg, src);
                int_idx += 1;
            }
        }

        match callee {
            Operand::Global(sym, _) => self.code.bl_patch(sym),
            Operand::VReg(v) => {
                let reg = self.gpr_read(v);
                self.code.blr(reg);
            }
            _ => return Err(unsupported(inst, "call target must be a symbol or vreg")),
        }

        if !matches!(inst.result_ty, Type::Void) {
            if inst.result_ty.is_float() {
                self.xmm.bind_fixed(inst.dest, 0);
            } else {
                self.gpr.bind_fixed(inst.dest, 0);
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
        for (i, (_, src)) in transfers.iter().enumerate() {
            let is_float = self.func_dest_is_float(transfers[i].0);
            if is_float {
                let reg = src
                    .as_vreg()
                    .map(|v| self.xmm_read(v, false))
                    .unwrap_or_else(|| self.load_float_imm(src, false));
                self.code.str_fp_d(reg, self.frame.phi_staging_slot(i as u32));
            } else {
                let reg = self.load_int_operand(src);
                self.code.str_fp_x(reg, self.frame.phi_staging_slot(i as u32));
            }
        }
        for (i, (dest, _)) in transfers.iter().enumerate() {
            let is_float = self.func_dest_is_float(*dest);
            let dst_slot = self.prescan.slot_of(*dest);
            if is_float {
                let (reg, actions) = self.xmm.acquire_scratch();
                for a in actions {
                    if let CacheAction::Evict { vreg, reg } = a {
                        let s = self.prescan.slot_of(vreg);
                        self.code.str_fp_d(reg, s.offset);
                    }
                }
                self.code.ldr_fp_d(reg, self.frame.phi_staging_slot(i as u32));
                self.code.str_fp_d(reg, dst_slot.offset);
                self.xmm.free_scratch(reg);
            } else {
                let reg = self.scratch_gpr();
                self.code.ldr_fp_x(reg, self.frame.phi_staging_slot(i as u32));
                self.code.str_fp_x(reg, dst_slot.offset);
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

    fn lower_cast(&mut self, inst: &Instruction, kind: liric_ir::CastKind) -> Result<(), BackendError> {
        use liric_ir::CastKind::*;
        let src_op = &inst.operands[1];
        match kind {
            Sext | Zext | Trunc | Bitcast | PtrToInt | IntToPtr => {
                let sreg = self.load_int_operand(src_op);
                let dst = self.gpr_define(inst.dest);
                self.code.mov_rr(dst, sreg);
                match kind {
                    Trunc => {
                        let bits = match inst.result_ty {
                            Type::I1 => 1,
                            Type::I8 => 8,
                            Type::I16 => 16,
                            Type::I32 => 32,
                            _ => 64,
                        };
                        if bits < 64 {
                            let mask: i64 = (1i64 << bits) - 1;
                            let m = self.scratch_gpr();
                            self.code.materialize_imm64(m, mask);
                            self.code.and_reg(dst, dst, m);
                            self.gpr.free_scratch(m);
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
                        if bits < 64 {
                            let shift = self.scratch_gpr();
                            self.code.materialize_imm64(shift, (64 - bits) as i64);
                            self.code.lslv(dst, dst, shift);
                            self.code.asrv(dst, dst, shift);
                            self.gpr.free_scratch(shift);
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            SIToFP | UIToFP => {
                let sreg = self.load_int_operand(src_op);
                let is_f32 = matches!(inst.result_ty, Type::F32);
                let dst = self.xmm_define(inst.dest);
                if matches!(kind, SIToFP) {
                    self.code.scvtf(dst, sreg, is_f32);
                } else {
                    self.code.ucvtf(dst, sreg, is_f32);
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
                if matches!(kind, FPToSI) {
                    self.code.fcvtzs(dst, sreg, is_f32);
                } else {
                    self.code.fcvtzu(dst, sreg, is_f32);
                }
                Ok(())
            }
            FPExt => {
                let sreg = src_op
                    .as_vreg()
                    .map(|v| self.xmm_read(v, true))
                    .unwrap_or_else(|| self.load_float_imm(src_op, true));
                let dst = self.xmm_define(inst.dest);
                self.code.fcvt_s_to_d(dst, sreg);
                Ok(())
            }
            FPTrunc => {
                let sreg = src_op
                    .as_vreg()
                    .map(|v| self.xmm_read(v, false))
                    .unwrap_or_else(|| self.load_float_imm(src_op, false));
                let dst = self.xmm_define(inst.dest);
                self.code.fcvt_d_to_s(dst, sreg);
                Ok(())
            }
        }
    }

    fn emit_prologue(&mut self) {
        self.code.stp_pre(29, 30, 31, -16);
        self.code.mov_sp(29, 31);
        if self.frame.frame_size > 0 {
            self.code.sub_sp_imm(self.frame.frame_size);
        }
        let mut int_idx = 0usize;
        let mut float_idx = 0usize;
        for (i, &pv) in self.func.param_vregs.iter().enumerate() {
            let ty = self.func.param_tys[i];
            let slot = self.prescan.slot_of(pv);
            if ty.is_float() {
                let reg = FP_ARG_REGS.get(float_idx).copied().unwrap_or(0);
                let is_f32 = ty == Type::F32;
                if is_f32 {
                    self.code.str_fp_s(reg, slot.offset);
                } else {
                    self.code.str_fp_d(reg, slot.offset);
                }
                float_idx += 1;
            } else {
                let reg = INT_ARG_REGS.get(int_idx).copied().unwrap_or(0);
                self.code.str_fp_x(reg, slot.offset);
                int_idx += 1;
            }
        }
    }

    fn emit_epilogue(&mut self) {
        if self.frame.frame_size > 0 {
            self.code.add_sp_imm(self.frame.frame_size);
        }
        self.code.ldp_post(29, 30, 31, 16);
        self.code.ret();
    }
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
        xmm: ValueCache::new(&FPR_POOL),
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
        lowering.code.patch_b(at, dest);
    }

    Ok(CompiledFunction {
        symbol: func.symbol,
        code: lowering.code.bytes,
        patches: lowering.code.patches,
        frame_size: frame.frame_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_imm64_zero_emits_one_instruction() {
        let mut code = Code {
            bytes: Vec::new(),
            patches: Vec::new(),
        };
        code.materialize_imm64(9, 0);
        assert_eq!(code.bytes.len(), 4);
    }

    #[test]
    fn materialize_imm64_round_trips_via_chunks() {
        let mut code = Code {
            bytes: Vec::new(),
            patches: Vec::new(),
        };
        code.materialize_imm64(9, 0x1234_5678_9abc_def0u64 as i64);
        assert_eq!(code.bytes.len(), 16);
    }

    #[test]
    fn icmp_cc_covers_all_predicates() {
        assert_eq!(icmp_cc(ICmpPredicate::Eq), COND_EQ);
        assert_eq!(icmp_cc(ICmpPredicate::Sgt), COND_GT);
        assert_eq!(icmp_cc(ICmpPredicate::Uge), COND_CS);
    }
}
