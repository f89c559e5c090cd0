//! ELF64 relocatable object (`ET_REL`) emission, spec §4.8. Delegates the
//! byte-level writing to the `object` crate (which already knows how to
//! lay out an ELF relocatable with a symtab/strtab/`.rela.*` sections);
//! this module's job is translating [`ModuleLayout`] and each patch's
//! [`liric_abi::RelocKind`] into the `object` crate's section/symbol/
//! relocation calls, picking the platform-appropriate `R_*` constant
//! spec §4.8 names.

use crate::layout::{DataSection, ModuleLayout, SymbolLocation};
use crate::{is_weak_symbol, Arch, ObjectError};
use liric_abi::RelocKind;
use liric_ir::Module;
use object::write::{Object, Relocation, StandardSegment, Symbol, SymbolSection};
use object::{
    elf, Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};
use std::collections::HashMap;

pub fn write(module: &Module, arch: Arch, layout: &ModuleLayout) -> Result<Vec<u8>, ObjectError> {
    let architecture = match arch {
        Arch::X86_64 => Architecture::X86_64,
        Arch::Aarch64 => Architecture::Aarch64,
    };
    let mut obj = Object::new(BinaryFormat::Elf, architecture, Endianness::Little);

    let text_id = obj.add_section(obj.segment_name(StandardSegment::Text).to_vec(), b".text".to_vec(), SectionKind::Text);
    obj.append_section_data(text_id, &layout.text, 16);

    let rodata_id = (!layout.rodata.is_empty()).then(|| {
        let id = obj.add_section(
            obj.segment_name(StandardSegment::Data).to_vec(),
            b".rodata".to_vec(),
            SectionKind::ReadOnlyData,
        );
        obj.append_section_data(id, &layout.rodata, 8);
        id
    });
    let data_id = (!layout.data.is_empty()).then(|| {
        let id = obj.add_section(obj.segment_name(StandardSegment::Data).to_vec(), b".data".to_vec(), SectionKind::Data);
        obj.append_section_data(id, &layout.data, 8);
        id
    });
    let bss_id = (layout.bss_size > 0).then(|| {
        let id = obj.add_section(obj.segment_name(StandardSegment::Data).to_vec(), b".bss".to_vec(), SectionKind::UninitializedData);
        obj.append_section_bss(id, layout.bss_size, 8);
        id
    });

    // Every name the layout knows about (defined or undefined) gets a
    // symbol so relocations and callers alike can reference it by
    // `object::write::SymbolId`.
    let mut sym_ids = HashMap::new();
    for func in &layout.functions {
        let weak = is_weak_symbol(&func.name);
        let id = obj.add_symbol(Symbol {
            name: func.name.as_bytes().to_vec(),
            value: func.offset,
            size: func.size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak,
            section: SymbolSection::Section(text_id),
            flags: SymbolFlags::None,
        });
        sym_ids.insert(func.name.clone(), id);
    }
    for global in &layout.globals {
        let (section, weak) = (
            match global.section {
                DataSection::RoData => rodata_id.unwrap(),
                DataSection::Data => data_id.unwrap(),
                DataSection::Bss => bss_id.unwrap(),
            },
            is_weak_symbol(&global.name),
        );
        let id = obj.add_symbol(Symbol {
            name: global.name.as_bytes().to_vec(),
            value: global.offset,
            size: global.size,
            kind: SymbolKind::Data,
            scope: SymbolScope::Dynamic,
            weak,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
        sym_ids.insert(global.name.clone(), id);
    }
    // Declarations with no local definition become `SHN_UNDEF` symbols
    // that the linker resolves against whatever else is on the link
    // line (another Liric object, libc, ...).
    for (name, loc) in module
        .functions()
        .map(|(_, f)| f.name.to_string())
        .chain(module.globals().map(|(_, g)| g.name.to_string()))
        .filter_map(|name| layout.locate(&name).map(|loc| (name, loc)))
    {
        if matches!(loc, SymbolLocation::Undefined) && !sym_ids.contains_key(&name) {
            let id = obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Unknown,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
            sym_ids.insert(name, id);
        }
    }

    let mut ensure_symbol = |name: &str, obj: &mut Object| -> object::write::SymbolId {
        if let Some(&id) = sym_ids.get(name) {
            return id;
        }
        let id = obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Unknown,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        sym_ids.insert(name.to_string(), id);
        id
    };

    for patch in &layout.text_patches {
        let name = module.symbol_name(patch.symbol);
        let is_call_target = matches!(layout.locate(name), Some(SymbolLocation::Text { .. }) | None);
        let r_type = reloc_type(arch, patch.kind, is_call_target);
        let symbol = ensure_symbol(name, &mut obj);
        obj.add_relocation(
            text_id,
            Relocation {
                offset: patch.offset as u64,
                symbol,
                addend: patch.addend,
                flags: RelocationFlags::Elf { r_type },
            },
        )
        .map_err(|e| ObjectError::Write(e.to_string()))?;
    }

    for (section, reloc) in &layout.data_relocations {
        let section_id = match section {
            DataSection::RoData => rodata_id.unwrap(),
            DataSection::Data => data_id.unwrap(),
            DataSection::Bss => unreachable!("bss globals carry no initializer relocations"),
        };
        let name = module.symbol_name(reloc.target);
        let symbol = ensure_symbol(name, &mut obj);
        obj.add_relocation(
            section_id,
            Relocation {
                offset: reloc.offset,
                symbol,
                addend: 0,
                flags: RelocationFlags::Elf { r_type: elf::R_X86_64_64 },
            },
        )
        .map_err(|e| ObjectError::Write(e.to_string()))?;
    }

    obj.write().map_err(|e| ObjectError::Write(e.to_string()))
}

/// Picks the ELF relocation constant for a patch (spec §4.8): x86-64
/// direct calls get `R_X86_64_PLT32`, data references `R_X86_64_PC32`,
/// GOT-indirect loads `R_X86_64_GOTPCRELX`; aarch64 direct calls get
/// `R_AARCH64_CALL26`, page References the `adrp`/`add` pair.
fn reloc_type(arch: Arch, kind: RelocKind, is_call: bool) -> u32 {
    match (arch, kind) {
        (Arch::X86_64, RelocKind::X86CallRel32) => {
            if is_call {
                elf::R_X86_64_PLT32
            } else {
                elf::R_X86_64_PC32
            }
        }
        (Arch::X86_64, RelocKind::X86GotPcRel32) => elf::R_X86_64_GOTPCRELX,
        (Arch::X86_64, RelocKind::Abs64) => elf::R_X86_64_64,
        (Arch::Aarch64, RelocKind::Aarch64CallRel26) => elf::R_AARCH64_CALL26,
        (Arch::Aarch64, RelocKind::Aarch64AdrpPage21) => elf::R_AARCH64_ADR_PREL_PG_HI21,
        (Arch::Aarch64, RelocKind::Aarch64AddAbsLo12) => elf::R_AARCH64_ADD_ABS_LO12_NC,
        (Arch::Aarch64, RelocKind::Abs64) => elf::R_AARCH64_ABS64,
        // A relocation kind recorded by the wrong ISA's backend never
        // reaches here in practice (the session picks one `IselBackend`
        // per target), but fall back to an absolute write rather than
        // panic on a malformed patch list.
        _ => elf::R_X86_64_64,
    }
}
