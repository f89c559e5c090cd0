use crate::ids::{BlockId, SymbolId, VReg};
use crate::types::Type;

/// A value of some type, produced by one of the variants below.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operand<'a> {
    /// A virtual register local to the enclosing function.
    VReg(VReg),
    /// An integer constant, zero-extended to the operand type's width.
    ImmI64(i64),
    /// A floating-point constant.
    ImmF64(f64),
    /// A branch target within the enclosing function.
    Block(BlockId),
    /// The address of a module-level symbol plus a constant byte offset.
    Global(SymbolId, i64),
    /// A null pointer of the given type.
    Null(Type<'a>),
    /// A deliberately uninitialized value of the given type.
    Undef(Type<'a>),
}

impl<'a> Operand<'a> {
    pub fn as_vreg(&self) -> Option<VReg> {
        match self {
            Operand::VReg(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Operand::Block(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Operand::ImmI64(v) => Some(*v),
            _ => None,
        }
    }
}
