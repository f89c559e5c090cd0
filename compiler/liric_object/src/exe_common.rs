//! Byte-level pieces shared by [`crate::static_exe`] and [`crate::dynamic`]:
//! the raw `Elf64_Ehdr`/`Elf64_Phdr` structures (the `object` crate's
//! writer never emits these — ELF program headers exist only for
//! loadable/executable images, not relocatables), page alignment, and
//! applying a [`liric_abi::RelocKind`] patch once every symbol's final
//! virtual address is known.

use crate::elf_consts::*;
use crate::Arch;
use liric_abi::RelocKind;

pub const PAGE_SIZE: u64 = 0x1000;

pub fn align_up(v: u64, align: u64) -> u64 {
    v.next_multiple_of(align)
}

pub struct Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Phdr {
    pub fn to_bytes(&self) -> [u8; 56] {
        let mut buf = [0u8; 56];
        buf[0..4].copy_from_slice(&self.p_type.to_le_bytes());
        buf[4..8].copy_from_slice(&self.p_flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.p_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.p_vaddr.to_le_bytes());
        buf[24..32].copy_from_slice(&self.p_vaddr.to_le_bytes()); // p_paddr, unused under Linux
        buf[32..40].copy_from_slice(&self.p_filesz.to_le_bytes());
        buf[40..48].copy_from_slice(&self.p_memsz.to_le_bytes());
        buf[48..56].copy_from_slice(&self.p_align.to_le_bytes());
        buf
    }
}

/// Builds a 64-byte `Elf64_Ehdr`. `e_shoff`/`e_shnum`/`e_shstrndx` of 0
/// produce a section-header-free image — valid for an `ET_EXEC` the
/// kernel only ever loads via its program headers, never its sections.
#[allow(clippy::too_many_arguments)]
pub fn ehdr_bytes(
    arch: Arch,
    e_type: u16,
    e_entry: u64,
    e_phoff: u64,
    e_phnum: u16,
    e_shoff: u64,
    e_shnum: u16,
    e_shstrndx: u16,
) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[0..4].copy_from_slice(b"\x7FELF");
    buf[4] = ELFCLASS64;
    buf[5] = ELFDATA2LSB;
    buf[6] = EV_CURRENT;
    buf[7] = ELFOSABI_SYSV;
    // bytes 8..16 (ABI version + padding) stay zero.
    buf[16..18].copy_from_slice(&e_type.to_le_bytes());
    buf[18..20].copy_from_slice(&e_machine(arch).to_le_bytes());
    buf[20..24].copy_from_slice(&(EV_CURRENT as u32).to_le_bytes());
    buf[24..32].copy_from_slice(&e_entry.to_le_bytes());
    buf[32..40].copy_from_slice(&e_phoff.to_le_bytes());
    buf[40..48].copy_from_slice(&e_shoff.to_le_bytes());
    buf[48..50].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
    buf[50..52].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
    buf[52..54].copy_from_slice(&e_phnum.to_le_bytes());
    buf[54..56].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
    buf[56..58].copy_from_slice(&e_shnum.to_le_bytes());
    buf[58..60].copy_from_slice(&e_shstrndx.to_le_bytes());
    buf
}

/// Applies one relocation in place, now that `target_vaddr` (the
/// resolved symbol's final address, `.got` slot, or PLT stub) is known.
/// `field` is the patched bytes' location within whatever buffer is
/// being assembled and `patch_site_vaddr` is that location's own final
/// virtual address — mirrors `liric_jit::Jit::apply_patch`, except
/// AArch64's `adrp`/`add` pair gets its real bit-level encoding instead
/// of a flat overwrite, since this code never runs, only gets loaded.
pub fn apply_relocation(kind: RelocKind, field: &mut [u8], patch_site_vaddr: u64, target_vaddr: u64, addend: i64) {
    match kind {
        RelocKind::Abs64 => {
            let value = (target_vaddr as i64 + addend) as u64;
            field[0..8].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::X86CallRel32 | RelocKind::X86GotPcRel32 => {
            let pc_after = patch_site_vaddr as i64 + 4;
            let disp = (target_vaddr as i64 + addend) - pc_after;
            field[0..4].copy_from_slice(&(disp as i32).to_le_bytes());
        }
        RelocKind::Aarch64CallRel26 => {
            let disp = (target_vaddr as i64 + addend) - patch_site_vaddr as i64;
            let imm26 = ((disp / 4) as i32) as u32 & 0x03FF_FFFF;
            let existing = u32::from_le_bytes(field[0..4].try_into().unwrap()) & 0xFC00_0000;
            field[0..4].copy_from_slice(&(existing | imm26).to_le_bytes());
        }
        RelocKind::Aarch64AdrpPage21 => {
            let target_page = (target_vaddr as i64 + addend) & !0xFFF;
            let pc_page = patch_site_vaddr as i64 & !0xFFF;
            let imm21 = ((target_page - pc_page) >> 12) as u32 & 0x1F_FFFF;
            let immlo = imm21 & 0x3;
            let immhi = (imm21 >> 2) & 0x7_FFFF;
            let existing = u32::from_le_bytes(field[0..4].try_into().unwrap()) & 0x1F; // keep Rd
            let word = (1 << 31) | (immlo << 29) | (0b10000 << 24) | (immhi << 5) | existing;
            field[0..4].copy_from_slice(&word.to_le_bytes());
        }
        RelocKind::Aarch64AddAbsLo12 => {
            let imm12 = ((target_vaddr as i64 + addend) & 0xFFF) as u32;
            let existing = u32::from_le_bytes(field[0..4].try_into().unwrap()) & 0x3FF; // keep Rn/Rd
            let word = 0x9100_0000 | (imm12 << 10) | existing;
            field[0..4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// Raw `_start` machine code: calls `entry_call_site` (already patched
/// by the caller to reach the compiled entry function) then exits via
/// the bare syscall with the call's return value, so the process needs
/// no libc/crt0 (spec §4.8: "a custom start stub", no dynamic
/// dependency for the static-executable path).
pub fn start_stub(arch: Arch) -> Vec<u8> {
    match arch {
        // call rel32 (placeholder, patched by the caller); mov edi, eax;
        // mov eax, 60 (__NR_exit); syscall.
        Arch::X86_64 => vec![
            0xE8, 0x00, 0x00, 0x00, 0x00, // call entry
            0x89, 0xC7, // mov edi, eax
            0xB8, 0x3C, 0x00, 0x00, 0x00, // mov eax, 60
            0x0F, 0x05, // syscall
        ],
        // bl entry (placeholder); mov x8, x0 (entry's return is in x0,
        // exit wants its status in x0 too, but keep w0 explicit); mov
        // x8, #93 (__NR_exit); svc #0.
        Arch::Aarch64 => {
            let mut code = vec![0x00, 0x00, 0x00, 0x94]; // bl entry (imm26 patched)
            code.extend_from_slice(&[0x08, 0x0E, 0x80, 0xD2]); // mov x8, #93
            code.extend_from_slice(&[0x01, 0x00, 0x00, 0xD4]); // svc #0
            code
        }
    }
}
