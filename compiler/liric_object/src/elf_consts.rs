//! Raw ELF64 constants the hand-rolled executable writers need that the
//! `object` crate's `write` API doesn't expose directly (program header
//! types, dynamic tags, PLT/GOT relocation kinds). Section/symbol
//! constants for the relocatable path are the `object` crate's own
//! (`object::elf::*`); this module covers only what `static_exe.rs` and
//! `dynamic.rs` assemble byte-by-byte.

use crate::Arch;

pub const EI_NIDENT: usize = 16;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;
pub const ELFOSABI_SYSV: u8 = 0;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub fn e_machine(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => EM_X86_64,
        Arch::Aarch64 => EM_AARCH64,
    }
}

// Program header types.
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;

// Program header flags.
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

// Section header types.
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

// Section header flags.
pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 2;
pub const SHF_EXECINSTR: u64 = 4;

// Symbol binding/type, packed into `st_info` as `(bind << 4) | ty`.
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;
pub const STT_NOTYPE: u8 = 0;
pub const STT_FUNC: u8 = 2;
pub const STT_OBJECT: u8 = 1;

pub fn st_info(bind: u8, ty: u8) -> u8 {
    (bind << 4) | (ty & 0xf)
}

// Dynamic section tags.
pub const DT_NULL: i64 = 0;
pub const DT_NEEDED: i64 = 1;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_PLTGOT: i64 = 3;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_RELA: i64 = 7;
pub const DT_RELASZ: i64 = 8;
pub const DT_RELAENT: i64 = 9;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;
pub const DT_PLTREL: i64 = 20;
pub const DT_BIND_NOW: i64 = 24;
pub const DT_FLAGS: i64 = 30;
pub const DT_JMPREL: i64 = 23;

pub const DF_BIND_NOW: i64 = 0x8;
pub const DT_RELA_TAG: i64 = 7; // DT_PLTREL value meaning "entries are Elf64_Rela"

// Relocation types used by the dynamic linker at load time.
pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_JUMP_SLOT: u32 = 7;
pub const R_X86_64_GLOB_DAT: u32 = 6;
pub const R_X86_64_RELATIVE: u32 = 8;
pub const R_AARCH64_ABS64: u32 = 257;
pub const R_AARCH64_JUMP_SLOT: u32 = 1026;
pub const R_AARCH64_GLOB_DAT: u32 = 1025;

pub fn abs64_reloc(arch: Arch) -> u32 {
    match arch {
        Arch::X86_64 => R_X86_64_64,
        Arch::Aarch64 => R_AARCH64_ABS64,
    }
}

pub fn jump_slot_reloc(arch: Arch) -> u32 {
    match arch {
        Arch::X86_64 => R_X86_64_JUMP_SLOT,
        Arch::Aarch64 => R_AARCH64_JUMP_SLOT,
    }
}

pub fn glob_dat_reloc(arch: Arch) -> u32 {
    match arch {
        Arch::X86_64 => R_X86_64_GLOB_DAT,
        Arch::Aarch64 => R_AARCH64_GLOB_DAT,
    }
}

/// `PT_INTERP`'s content: the path to the dynamic linker ld.so looks for
/// on the host it is run on (spec §4.8).
pub fn interp_path(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "/lib64/ld-linux-x86-64.so.2\0",
        Arch::Aarch64 => "/lib/ld-linux-aarch64.so.1\0",
    }
}
