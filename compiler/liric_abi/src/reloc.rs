//! Relocation kinds shared by every component that patches a call site or
//! a data reference after code has already been emitted: the ISEL/copy-patch
//! backends record these in their patch lists (spec §4.4 point 6), the JIT
//! resolves them against its symbol table (§4.7), and the object emitter
//! lowers them to the matching ELF `R_*` constant (§4.8).
//!
//! Keeping one enum in `liric_abi` (rather than duplicating per-backend
//! relocation types) is what lets a patch list recorded by `liric_isel`
//! flow unchanged into either `liric_jit` or `liric_object`.

/// How to patch a single reference to an as-yet-unresolved symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelocKind {
    /// x86-64 32-bit PC-relative displacement to a direct call/jmp target
    /// (`R_X86_64_PC32` for data references, `R_X86_64_PLT32` for calls —
    /// the object emitter picks the ELF constant from call-site context).
    X86CallRel32,
    /// x86-64 32-bit PC-relative displacement to a GOT slot holding a
    /// 64-bit absolute address (`R_X86_64_GOTPCRELX`), used for indirect
    /// calls/loads through the GOT.
    X86GotPcRel32,
    /// AArch64 26-bit PC-relative immediate packed into a `bl`/`b`
    /// instruction (`R_AARCH64_CALL26`).
    Aarch64CallRel26,
    /// AArch64 page-relative `adrp` immediate (`R_AARCH64_ADR_PREL_PG_HI21`),
    /// always paired with an immediately following [`RelocKind::Aarch64AddAbsLo12`].
    Aarch64AdrpPage21,
    /// AArch64 page-offset immediate on the `add` that follows an `adrp`
    /// (`R_AARCH64_ADD_ABS_LO12_NC`).
    Aarch64AddAbsLo12,
    /// A plain absolute 64-bit pointer written in place: GOT slots,
    /// `.data` initializer relocations, `R_X86_64_GLOB_DAT`/PLT `.got.plt`
    /// entries populated by the dynamic loader.
    Abs64,
}

impl RelocKind {
    /// Byte width of the field this relocation patches, for bounds-checking
    /// a patch before writing it.
    pub fn patched_width(&self) -> usize {
        match self {
            RelocKind::X86CallRel32
            | RelocKind::X86GotPcRel32
            | RelocKind::Aarch64CallRel26
            | RelocKind::Aarch64AdrpPage21
            | RelocKind::Aarch64AddAbsLo12 => 4,
            RelocKind::Abs64 => 8,
        }
    }

    pub fn is_pc_relative(&self) -> bool {
        !matches!(self, RelocKind::Abs64)
    }
}

/// A single deferred patch: at `offset` bytes into some code/data buffer,
/// patch in a reference to `symbol` once its address is known.
#[derive(Clone, Debug)]
pub struct PatchEntry<Sym> {
    pub offset: u32,
    pub symbol: Sym,
    pub kind: RelocKind,
    /// Constant addend folded into the relocation (e.g. a `Global(sym, off)`
    /// operand's byte offset).
    pub addend: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_the_isa_encoding() {
        assert_eq!(RelocKind::X86CallRel32.patched_width(), 4);
        assert_eq!(RelocKind::Abs64.patched_width(), 8);
    }
}
