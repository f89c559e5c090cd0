//! The object emitter (spec §4.8): turns a finalized `liric_ir::Module`
//! plus its already-compiled functions into ELF64 bytes — a relocatable
//! `.o` (leaning on the `object` crate, which already knows how to write
//! `ET_REL`), or a statically/dynamically linked `ET_EXEC` (hand-rolled:
//! `object`'s writer has no concept of program headers or a `.dynamic`
//! section, so the two executable flavors build their byte layout
//! directly).
//!
//! This crate never compiles anything itself. It is handed the output of
//! a [`liric_codegen_ssa::backend::Backend`] lane (code bytes + an
//! unresolved-symbol patch list per function) by the caller — normally
//! `liric`'s `Compiler` facade driving a `Session` in `Mode::Ir` — and
//! turns that plus the `Module`'s globals into bytes. Keeping
//! `liric_codegen_ssa`/`liric_isel`/`liric_jit` out of this crate's
//! dependency graph means a patch's `SymbolId` only ever needs resolving
//! through the one `Module` already in scope here.

mod dynamic;
mod elf_consts;
mod exe_common;
mod layout;
mod relocatable;
mod static_exe;

use liric_abi::reloc::PatchEntry;
use liric_abi::{LiricTarget, TargetTriple};
use liric_ir::{FunctionId, Module, SymbolId};
use std::fmt;

/// One already-compiled function, ready to be laid out into an object or
/// executable: machine code plus every reference to a symbol whose
/// address wasn't known when the backend emitted it.
pub struct ObjectFunction {
    pub id: FunctionId,
    pub code: Vec<u8>,
    pub patches: Vec<PatchEntry<SymbolId>>,
}

#[derive(Debug)]
pub enum ObjectError {
    /// A patch or a global's relocation named a symbol with neither a
    /// compiled function, a global, nor a recognized dynamic import
    /// behind it.
    UndefinedSymbol(String),
    /// The active target isn't one `liric_object` can emit for (spec:
    /// "host architectures x86-64 and aarch64").
    UnsupportedTarget(String),
    /// An internal failure building the `object` crate's writer, or an
    /// invariant the hand-rolled executable writers rely on (e.g. a
    /// relocation whose kind makes no sense for the requested output).
    Write(String),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::UndefinedSymbol(s) => write!(f, "undefined symbol: {s}"),
            ObjectError::UnsupportedTarget(s) => write!(f, "unsupported target: {s}"),
            ObjectError::Write(s) => write!(f, "object emission failed: {s}"),
        }
    }
}

impl std::error::Error for ObjectError {}

/// Architectures `liric_object` can emit for (spec §1: "host
/// architectures x86-64 and aarch64").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn from_triple(triple: Option<&TargetTriple>) -> Result<Self, ObjectError> {
        match triple {
            Some(t) if t.is_aarch64() => Ok(Arch::Aarch64),
            Some(t) if t.arch == "x86_64" => Ok(Arch::X86_64),
            Some(t) => Err(ObjectError::UnsupportedTarget(t.arch.clone())),
            None => Ok(if cfg!(target_arch = "aarch64") {
                Arch::Aarch64
            } else {
                Arch::X86_64
            }),
        }
    }

    pub fn from_target(target: &LiricTarget) -> Result<Self, ObjectError> {
        Self::from_triple(target.target_triple.as_ref())
    }

    pub fn ptr_size(&self) -> u64 {
        8
    }
}

/// Fortran-runtime helper name prefixes that get `STB_WEAK` instead of
/// `STB_GLOBAL` (spec §4.8) so overlapping per-module definitions across
/// separately compiled objects link without a multiple-definition error.
const WEAK_PREFIXES: &[&str] = &[
    "__lfortran_module_init_",
    "_copy_",
    "_Type_Info_",
    "__module_file_common_block_",
];

pub(crate) fn is_weak_symbol(name: &str) -> bool {
    WEAK_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Emits an ELF64 relocatable object (`ET_REL`) for `module`, given the
/// already-compiled bytes for each function definition in `functions`.
/// One flattened `.text` section covers every function (spec §4.8: "one
/// `.text` section per module... with symbol offsets").
pub fn emit_object(
    module: &Module,
    target: &LiricTarget,
    functions: &[ObjectFunction],
) -> Result<Vec<u8>, ObjectError> {
    let arch = Arch::from_target(target)?;
    let layout = layout::ModuleLayout::build(module, functions);
    relocatable::write(module, arch, &layout)
}

/// Emits a statically-linked ELF64 executable (`ET_EXEC`, no dynamic
/// section): a single loadable segment plus a start stub that calls
/// `entry_symbol` and exits via the raw syscall with its return value
/// (spec §4.8).
pub fn emit_static_executable(
    module: &Module,
    target: &LiricTarget,
    functions: &[ObjectFunction],
    entry_symbol: &str,
) -> Result<Vec<u8>, ObjectError> {
    let arch = Arch::from_target(target)?;
    let layout = layout::ModuleLayout::build(module, functions);
    static_exe::write(module, arch, &layout, entry_symbol)
}

/// Emits a dynamically-linked ELF64 executable: `PT_INTERP`, a minimal
/// `.dynamic`/`.dynsym`/`.dynstr`, a `.plt`/`.got.plt` pair per imported
/// symbol, and `DT_NEEDED` entries inferred from which imports were used
/// (spec §4.8).
pub fn emit_dynamic_executable(
    module: &Module,
    target: &LiricTarget,
    functions: &[ObjectFunction],
    entry_symbol: &str,
) -> Result<Vec<u8>, ObjectError> {
    let arch = Arch::from_target(target)?;
    let layout = layout::ModuleLayout::build(module, functions);
    dynamic::write(module, arch, &layout, entry_symbol)
}

/// True if `module` references any symbol that isn't defined by one of
/// `functions` or the module's own globals — i.e. the executable writer
/// needs `emit_dynamic_executable`'s `PT_INTERP`/`.dynamic` machinery to
/// have any hope of resolving it. A module with no such reference (the
/// `ret42` shape) is better served by [`emit_static_executable`], which
/// carries no dynamic linker dependency at all.
pub fn needs_dynamic_linking(module: &Module, functions: &[ObjectFunction]) -> bool {
    !layout::ModuleLayout::build(module, functions)
        .referenced_undefined(module)
        .is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_abi::BackendKind;
    use liric_arena::Arena;

    fn host_target() -> LiricTarget {
        LiricTarget::host(BackendKind::Isel)
    }

    /// `ret42`-shaped module (spec §8 scenario 1): one function, no
    /// patches, no globals.
    fn ret42_module(arena: &Arena) -> (Module<'_>, Vec<ObjectFunction>) {
        let mut module = Module::new(arena, "ret42");
        let id = module.declare_function("main", liric_ir::Type::I32, &[], false);
        module.function_mut(id).begin_definition();
        // mov eax, 42; ret
        let code = vec![0xB8, 42, 0, 0, 0, 0xC3];
        (module, vec![ObjectFunction { id, code, patches: Vec::new() }])
    }

    #[test]
    fn relocatable_object_starts_with_elf_magic() {
        let arena = Arena::new();
        let (module, funcs) = ret42_module(&arena);
        let bytes = emit_object(&module, &host_target(), &funcs).unwrap();
        assert_eq!(&bytes[0..4], b"\x7FELF");
        assert_eq!(bytes[4], 2, "ELFCLASS64");
        assert_eq!(bytes[5], 1, "ELFDATA2LSB");
        let e_type = u16::from_le_bytes([bytes[16], bytes[17]]);
        assert_eq!(e_type, 1, "ET_REL");
    }

    #[test]
    fn static_executable_has_exec_type_and_entry() {
        let arena = Arena::new();
        let (module, funcs) = ret42_module(&arena);
        let bytes = emit_static_executable(&module, &host_target(), &funcs, "main").unwrap();
        assert_eq!(&bytes[0..4], b"\x7FELF");
        let e_type = u16::from_le_bytes([bytes[16], bytes[17]]);
        assert_eq!(e_type, 2, "ET_EXEC");
        let e_entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert_ne!(e_entry, 0);
    }

    #[test]
    fn weak_symbol_prefixes_match_spec() {
        assert!(is_weak_symbol("__lfortran_module_init_demo"));
        assert!(is_weak_symbol("_copy_demo_t"));
        assert!(is_weak_symbol("_Type_Info_t"));
        assert!(is_weak_symbol("__module_file_common_block_demo"));
        assert!(!is_weak_symbol("main"));
    }
}
