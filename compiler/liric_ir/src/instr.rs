use crate::ids::VReg;
use crate::operand::Operand;
use crate::types::Type;

/// Predicate used by `icmp`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ICmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// Predicate used by `fcmp`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FCmpPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Uno,
}

/// The cast family: every opcode that reinterprets or converts a value
/// of one type to another without arithmetic semantics of its own.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CastKind {
    Sext,
    Zext,
    Trunc,
    Bitcast,
    PtrToInt,
    IntToPtr,
    SIToFP,
    UIToFP,
    FPToSI,
    FPToUI,
    FPExt,
    FPTrunc,
}

/// The opcode of an [`Instruction`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    // Terminators
    Ret,
    RetVoid,
    Br,
    CondBr,
    Unreachable,

    // Integer arithmetic / bitwise
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,

    // Float arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FNeg,

    // Compares
    ICmp,
    FCmp,

    // Memory
    Alloca,
    Load,
    Store,
    Gep,

    Call,
    Phi,
    Select,

    Cast(CastKind),

    ExtractValue,
    InsertValue,
}

impl Opcode {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Ret | Opcode::RetVoid | Opcode::Br | Opcode::CondBr | Opcode::Unreachable
        )
    }

    /// Whether this opcode ever produces a result vreg. False for
    /// terminators, `store`, and void calls (the latter is determined
    /// dynamically from the result type, not the opcode, so callers
    /// should also check `Instruction::result_ty`).
    pub fn produces_value(&self) -> bool {
        !matches!(
            self,
            Opcode::Ret
                | Opcode::RetVoid
                | Opcode::Br
                | Opcode::CondBr
                | Opcode::Unreachable
                | Opcode::Store
        )
    }
}

/// Call-site flags, set by the frontend/session when an instruction is
/// a `call`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CallFlags {
    pub external_abi: bool,
    pub vararg: bool,
    pub fixed_args: u32,
}

/// A single IR instruction.
///
/// **Invariants** (enforced by the session's `emit` and by every
/// frontend before it hands a block to the session):
/// - Every non-terminator instruction in a block is followed by another
///   non-terminator or a terminator; exactly one terminator per block.
/// - A `phi` only appears at the head of a block; its operand list is
///   pairs of `(value, predecessor_block)`, flattened as
///   `[value0, block0, value1, block1, ...]`.
/// - A `gep`'s first operand is a base pointer; `result_ty` carries the
///   base element type so indices can be scaled correctly at lowering
///   time.
/// - An `icmp`/`fcmp` produces `i1` regardless of operand width.
#[derive(Clone, Debug)]
pub struct Instruction<'a> {
    pub opcode: Opcode,
    /// The type of the value this instruction produces. `Type::Void`
    /// when the opcode produces no value.
    pub result_ty: Type<'a>,
    /// `VOID_VREG` (0) if the opcode produces no value.
    pub dest: VReg,
    pub operands: Vec<Operand<'a>>,
    /// Index list, used by `extractvalue`/`insertvalue`.
    pub indices: Vec<u32>,
    pub icmp_pred: Option<ICmpPredicate>,
    pub fcmp_pred: Option<FCmpPredicate>,
    pub call_flags: Option<CallFlags>,
}

impl<'a> Instruction<'a> {
    pub fn new(opcode: Opcode, result_ty: Type<'a>, dest: VReg, operands: Vec<Operand<'a>>) -> Self {
        Instruction {
            opcode,
            result_ty,
            dest,
            operands,
            indices: Vec::new(),
            icmp_pred: None,
            fcmp_pred: None,
            call_flags: None,
        }
    }

    pub fn phi_incoming(&self) -> impl Iterator<Item = (Operand<'a>, Operand<'a>)> + '_ {
        self.operands.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }
}
