use crate::layout::{BackendRepr, TyAndLayout};

/// Describes the full application binary interface (ABI) of a function.
///
/// A function ABI specifies how each argument is passed to the backend
/// (e.g., in registers, via pointers, or ignored) and how the return
/// value is produced.
///
/// # Examples
///
/// A simple function `fn add(a: i32, b: i32) -> i32` might lower to:
///
/// ```ignore
/// FnAbi {
///     args: [
///         ArgAbi { layout: i32, mode: PassMode::Direct },
///         ArgAbi { layout: i32, mode: PassMode::Direct },
///     ],
///     ret: ArgAbi { layout: i32, mode: PassMode::Direct },
/// }
/// ```
///
/// In contrast, a function returning a large struct `fn foo() -> BigStruct`
/// may use `PassMode::Indirect` for the return value, indicating that the
/// caller allocates space and passes a hidden pointer where the result is stored.
#[derive(Debug, Clone)]
pub struct FnAbi<T> {
    /// The type, layout, and passing convention for each argument.
    pub args: Box<[ArgAbi<T>]>,

    /// The type, layout, and passing convention for the return value.
    pub ret: ArgAbi<T>,
}

/// Describes how a single argument or return value is represented
/// and passed according to the ABI.
#[derive(Debug, Clone)]
pub struct ArgAbi<T> {
    /// The memory layout of the argument or return value
    /// (size, alignment, and type information).
    pub layout: TyAndLayout<T>,

    /// The convention for passing this value to/from the backend.
    pub mode: PassMode,
}

impl<T> ArgAbi<T> {
    pub fn new(layout: TyAndLayout<T>, mode: PassMode) -> Self {
        ArgAbi { layout, mode }
    }

    /// Classifies a single argument's layout into a `PassMode` per the
    /// given calling convention. Return-value classification is identical
    /// except a `Memory`-repr return additionally implies a hidden
    /// pointer argument, which the caller of this function is responsible
    /// for threading into the argument list (see `FnAbi::classify_for`).
    pub fn classify(layout: TyAndLayout<T>, conv: CallingConvention) -> Self {
        let mode = match &layout.layout.backend_repr {
            _ if layout.layout.is_zst() => PassMode::Ignore,
            BackendRepr::Scalar(_) => PassMode::Direct,
            BackendRepr::ScalarPair(_, _) => PassMode::Direct,
            BackendRepr::Memory => match conv {
                // Both SysV and AAPCS64 pass large aggregates indirectly
                // once they exceed two eightwords / two doublewords.
                CallingConvention::SysV | CallingConvention::Aapcs64 => PassMode::Indirect,
            },
        };
        ArgAbi { layout, mode }
    }
}

/// The possible ways in which an argument or return value
/// can be passed across the ABI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// The argument is ignored (e.g., a zero-sized type).
    Ignore,
    /// The argument is passed directly, typically in registers or
    /// as a plain immediate value.
    Direct,
    /// The argument is passed indirectly, via a hidden pointer
    /// to memory allocated by the caller or callee.
    Indirect,
}

/// The calling convention used to classify argument/return passing.
/// `liric_isel` picks one of these based on the host architecture;
/// `liric_codegen_llvm` lets LLVM itself perform the classification
/// and only consults this enum for its own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// x86-64 System V AMD64 ABI.
    SysV,
    /// ARM64 Procedure Call Standard (AAPCS64).
    Aapcs64,
}

impl<T> FnAbi<T> {
    /// Builds a `FnAbi` by classifying every parameter and the return type
    /// per the given calling convention.
    pub fn classify_for(
        params: impl IntoIterator<Item = TyAndLayout<T>>,
        ret: TyAndLayout<T>,
        conv: CallingConvention,
    ) -> Self {
        let ret = ArgAbi::classify(ret, conv);
        let args = params
            .into_iter()
            .map(|layout| ArgAbi::classify(layout, conv))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        FnAbi { args, ret }
    }
}
