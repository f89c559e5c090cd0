//! Statically-linked `ET_EXEC` executable (spec §4.8): a single `PT_LOAD`
//! segment covering headers, start stub, `.text`, `.rodata` and `.data`,
//! with `.bss` left unbacked by file content (`p_memsz > p_filesz`) the
//! way every Linux loader already expects a BSS to be represented.
//!
//! Every reference this path can't resolve locally is an error up front
//! (spec: a static executable carries no `PT_INTERP`/`.dynamic`, so it
//! has no mechanism to satisfy an import at load time).

use crate::exe_common::{align_up, apply_relocation, ehdr_bytes, start_stub, Phdr, PAGE_SIZE};
use crate::layout::{DataSection, ModuleLayout, SymbolLocation};
use crate::{elf_consts::*, Arch, ObjectError};
use liric_abi::RelocKind;
use liric_ir::Module;

const LOAD_BASE: u64 = 0x40_0000;

pub fn write(module: &Module, arch: Arch, layout: &ModuleLayout, entry_symbol: &str) -> Result<Vec<u8>, ObjectError> {
    let undefined = layout.referenced_undefined(module);
    if !undefined.is_empty() {
        return Err(ObjectError::UndefinedSymbol(undefined.join(", ")));
    }
    let entry_offset = match layout.locate(entry_symbol) {
        Some(SymbolLocation::Text { offset, .. }) => offset,
        _ => return Err(ObjectError::UndefinedSymbol(entry_symbol.to_string())),
    };

    let ehdr_size = 64u64;
    let phdr_size = 56u64;
    let headers_size = ehdr_size + phdr_size;

    let mut stub = start_stub(arch);
    let stub_offset = headers_size;
    let text_offset = align_up(stub_offset + stub.len() as u64, 16);
    let rodata_offset = align_up(text_offset + layout.text.len() as u64, 8);
    let data_offset = align_up(rodata_offset + layout.rodata.len() as u64, 8);
    let bss_offset = data_offset + layout.data.len() as u64;
    let file_end = bss_offset;

    let resolve = |name: &str| -> Option<u64> {
        match layout.locate(name)? {
            SymbolLocation::Text { offset, .. } => Some(LOAD_BASE + text_offset + offset),
            SymbolLocation::Data { section, offset, .. } => Some(
                LOAD_BASE
                    + match section {
                        DataSection::RoData => rodata_offset,
                        DataSection::Data => data_offset,
                        DataSection::Bss => bss_offset,
                    }
                    + offset,
            ),
            SymbolLocation::Undefined => None,
        }
    };

    let mut text = layout.text.clone();
    for patch in &layout.text_patches {
        let name = module.symbol_name(patch.symbol);
        let target = resolve(name).ok_or_else(|| ObjectError::UndefinedSymbol(name.to_string()))?;
        let site = LOAD_BASE + text_offset + patch.offset as u64;
        let width = patch.kind.patched_width();
        let field = &mut text[patch.offset as usize..patch.offset as usize + width];
        apply_relocation(patch.kind, field, site, target, patch.addend);
    }

    let mut rodata = layout.rodata.clone();
    let mut data = layout.data.clone();
    for (section, reloc) in &layout.data_relocations {
        let name = module.symbol_name(reloc.target);
        let target = resolve(name).ok_or_else(|| ObjectError::UndefinedSymbol(name.to_string()))?;
        let (buf, base_off) = match section {
            DataSection::RoData => (&mut rodata, rodata_offset),
            DataSection::Data => (&mut data, data_offset),
            DataSection::Bss => unreachable!("bss globals have no initializer to relocate"),
        };
        let site = LOAD_BASE + base_off + reloc.offset;
        let field = &mut buf[reloc.offset as usize..reloc.offset as usize + 8];
        apply_relocation(RelocKind::Abs64, field, site, target, 0);
    }

    // Patch the stub's call/bl to land on the entry function, then the
    // kernel's entry point is simply the stub's own address.
    let entry_vaddr = LOAD_BASE + text_offset + entry_offset;
    match arch {
        Arch::X86_64 => {
            let site = LOAD_BASE + stub_offset + 1;
            apply_relocation(RelocKind::X86CallRel32, &mut stub[1..5], site, entry_vaddr, 0);
        }
        Arch::Aarch64 => {
            let site = LOAD_BASE + stub_offset;
            apply_relocation(RelocKind::Aarch64CallRel26, &mut stub[0..4], site, entry_vaddr, 0);
        }
    }
    let e_entry = LOAD_BASE + stub_offset;

    let mem_end = align_up(file_end + layout.bss_size, PAGE_SIZE);
    let phdr = Phdr {
        p_type: PT_LOAD,
        p_flags: PF_R | PF_W | PF_X,
        p_offset: 0,
        p_vaddr: LOAD_BASE,
        p_filesz: file_end,
        p_memsz: mem_end,
        p_align: PAGE_SIZE,
    };

    let mut out = Vec::with_capacity(file_end as usize);
    out.extend_from_slice(&ehdr_bytes(arch, ET_EXEC, e_entry, 64, 1, 0, 0, 0));
    out.extend_from_slice(&phdr.to_bytes());
    out.resize(stub_offset as usize, 0);
    out.extend_from_slice(&stub);
    out.resize(text_offset as usize, 0x90);
    out.extend_from_slice(&text);
    out.resize(rodata_offset as usize, 0);
    out.extend_from_slice(&rodata);
    out.resize(data_offset as usize, 0);
    out.extend_from_slice(&data);
    out.resize(file_end as usize, 0);

    Ok(out)
}
