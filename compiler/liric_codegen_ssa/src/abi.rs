//! Function ABI classification for a `liric_ir::Function` signature,
//! built on `liric_ir::layout::layout_of` and `liric_abi`'s generic
//! `FnAbi<T>` classifier (spec §4.4 point 4: "calls follow the
//! SysV/AAPCS64 ABI").

use liric_abi::calling_convention::function::{CallingConvention, FnAbi};
use liric_abi::TargetTriple;
use liric_ir::layout::layout_of;
use liric_ir::Type;

/// Picks the calling convention for a target triple: AAPCS64 on aarch64,
/// SysV everywhere else (the only two ISAs spec.md scopes in).
pub fn calling_convention_for(triple: Option<&TargetTriple>) -> CallingConvention {
    match triple {
        Some(t) if t.is_aarch64() => CallingConvention::Aapcs64,
        _ => CallingConvention::SysV,
    }
}

/// Classifies a function's return type and parameter types into a full
/// `FnAbi`, ready for a backend to map onto physical registers/stack slots.
pub fn fn_abi_of<'a>(
    ret_ty: Type<'a>,
    param_tys: &[Type<'a>],
    conv: CallingConvention,
) -> FnAbi<Type<'a>> {
    let params = param_tys.iter().copied().map(layout_of);
    FnAbi::classify_for(params, layout_of(ret_ty), conv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_int_args_classify_direct() {
        let abi = fn_abi_of(Type::I32, &[Type::I32, Type::I32], CallingConvention::SysV);
        assert_eq!(abi.args.len(), 2);
        for a in abi.args.iter() {
            assert_eq!(a.mode, liric_abi::calling_convention::function::PassMode::Direct);
        }
    }

    #[test]
    fn large_struct_return_is_indirect() {
        let big = Type::Array(&Type::I64, 8);
        let abi = fn_abi_of(big, &[], CallingConvention::SysV);
        assert_eq!(abi.ret.mode, liric_abi::calling_convention::function::PassMode::Indirect);
    }
}
