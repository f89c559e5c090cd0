//! Content hashing for the materialization cache (`liric_jit`).
//!
//! Grounded on `examples/original_source/src/sha256.c`: the original
//! computed a SHA-256 over the function's serialized bytes to key a
//! code cache. Here we depend on the `sha2` crate (already pulled in
//! by the pack's `wasmtime-internal-cache`) instead of hand-rolling the
//! compression function, and hash a canonical serialization of opcodes,
//! structural type tags, operand kinds, and block topology rather than
//! raw source text, so alpha-renaming of vreg numbers across otherwise
//! identical functions still hits the cache.

use crate::function::Function;
use crate::instr::Opcode;
use crate::operand::Operand;
use crate::types::Type;
use sha2::{Digest, Sha256};

fn hash_type(ty: &Type, out: &mut Sha256) {
    match ty {
        Type::Void => out.update([0u8]),
        Type::I1 => out.update([1u8]),
        Type::I8 => out.update([2u8]),
        Type::I16 => out.update([3u8]),
        Type::I32 => out.update([4u8]),
        Type::I64 => out.update([5u8]),
        Type::F32 => out.update([6u8]),
        Type::F64 => out.update([7u8]),
        Type::Ptr => out.update([8u8]),
        Type::Array(elem, n) => {
            out.update([9u8]);
            out.update(n.to_le_bytes());
            hash_type(elem, out);
        }
        Type::Struct(fields, packed) => {
            out.update([10u8, *packed as u8]);
            for f in fields.iter() {
                hash_type(f, out);
            }
        }
        Type::Function(ret, params, vararg) => {
            out.update([11u8, *vararg as u8]);
            hash_type(ret, out);
            for p in params.iter() {
                hash_type(p, out);
            }
        }
    }
}

fn hash_operand(op: &Operand, out: &mut Sha256) {
    match op {
        Operand::VReg(v) => {
            out.update([0u8]);
            out.update((v.idx() as u32).to_le_bytes());
        }
        Operand::ImmI64(v) => {
            out.update([1u8]);
            out.update(v.to_le_bytes());
        }
        Operand::ImmF64(v) => {
            out.update([2u8]);
            out.update(v.to_bits().to_le_bytes());
        }
        Operand::Block(b) => {
            out.update([3u8]);
            out.update((b.idx() as u32).to_le_bytes());
        }
        Operand::Global(sym, off) => {
            out.update([4u8]);
            out.update((sym.idx() as u32).to_le_bytes());
            out.update(off.to_le_bytes());
        }
        Operand::Null(ty) => {
            out.update([5u8]);
            hash_type(ty, out);
        }
        Operand::Undef(ty) => {
            out.update([6u8]);
            hash_type(ty, out);
        }
    }
}

/// SHA-256 over a canonical serialization of `f`: opcodes, result
/// types, operand kinds, and block topology. Two functions that are
/// structurally identical (including identical callee symbol names
/// baked into `Operand::Global`) hash the same regardless of which
/// module they were parsed from.
pub fn content_hash(f: &Function) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(f.name.as_bytes());
    hash_type(&f.sig, &mut h);
    for (_, block) in f.blocks.iter_enumerated() {
        h.update([0xFFu8]);
        for instr in &block.instructions {
            h.update([instr.opcode_tag()]);
            hash_type(&instr.result_ty, &mut h);
            for op in &instr.operands {
                hash_operand(op, &mut h);
            }
            for idx in &instr.indices {
                h.update(idx.to_le_bytes());
            }
        }
    }
    h.finalize().into()
}

impl Opcode {
    /// A stable byte tag per opcode, used only for hashing (not for any
    /// on-disk format, so adding opcodes never breaks compatibility
    /// with previously-cached entries in a meaningful way beyond a
    /// cache miss).
    fn tag(&self) -> u8 {
        use crate::instr::CastKind;
        match self {
            Opcode::Ret => 0,
            Opcode::RetVoid => 1,
            Opcode::Br => 2,
            Opcode::CondBr => 3,
            Opcode::Unreachable => 4,
            Opcode::Add => 5,
            Opcode::Sub => 6,
            Opcode::Mul => 7,
            Opcode::SDiv => 8,
            Opcode::SRem => 9,
            Opcode::UDiv => 10,
            Opcode::URem => 11,
            Opcode::And => 12,
            Opcode::Or => 13,
            Opcode::Xor => 14,
            Opcode::Shl => 15,
            Opcode::LShr => 16,
            Opcode::AShr => 17,
            Opcode::FAdd => 18,
            Opcode::FSub => 19,
            Opcode::FMul => 20,
            Opcode::FDiv => 21,
            Opcode::FRem => 22,
            Opcode::FNeg => 23,
            Opcode::ICmp => 24,
            Opcode::FCmp => 25,
            Opcode::Alloca => 26,
            Opcode::Load => 27,
            Opcode::Store => 28,
            Opcode::Gep => 29,
            Opcode::Call => 30,
            Opcode::Phi => 31,
            Opcode::Select => 32,
            Opcode::ExtractValue => 33,
            Opcode::InsertValue => 34,
            Opcode::Cast(kind) => {
                40 + match kind {
                    CastKind::Sext => 0,
                    CastKind::Zext => 1,
                    CastKind::Trunc => 2,
                    CastKind::Bitcast => 3,
                    CastKind::PtrToInt => 4,
                    CastKind::IntToPtr => 5,
                    CastKind::SIToFP => 6,
                    CastKind::UIToFP => 7,
                    CastKind::FPToSI => 8,
                    CastKind::FPToUI => 9,
                    CastKind::FPExt => 10,
                    CastKind::FPTrunc => 11,
                }
            }
        }
    }
}

impl crate::instr::Instruction<'_> {
    fn opcode_tag(&self) -> u8 {
        self.opcode.tag()
    }
}
