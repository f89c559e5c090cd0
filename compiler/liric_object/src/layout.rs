//! Lays a `Module`'s functions and globals out into the four section
//! blobs every output format shares (spec §4.8: "one `.text` section...
//! one `.rodata`... one `.data`... one `.bss`"), independent of whether
//! the result becomes a relocatable object or a hand-rolled executable.

use crate::ObjectFunction;
use liric_abi::reloc::PatchEntry;
use liric_ir::global::Relocation as GlobalReloc;
use liric_ir::layout::layout_of;
use liric_ir::{FunctionId, GlobalId, Module, SymbolId};
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataSection {
    RoData,
    Data,
    Bss,
}

pub struct FunctionLayout {
    pub id: FunctionId,
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

pub struct GlobalLayout {
    pub id: GlobalId,
    pub name: String,
    pub section: DataSection,
    pub offset: u64,
    pub size: u64,
}

/// Where a symbol (by name) ended up after layout: defined locally in
/// one of the four sections, or left undefined (an external import the
/// linker/loader must resolve — libc, or a Liric function that was only
/// ever declared).
#[derive(Clone, Copy, Debug)]
pub enum SymbolLocation {
    Text { offset: u64, size: u64 },
    Data { section: DataSection, offset: u64, size: u64 },
    Undefined,
}

pub struct ModuleLayout {
    pub text: Vec<u8>,
    pub functions: Vec<FunctionLayout>,
    /// Each function's patch list, offsets already shifted to be
    /// relative to the start of `text` rather than the start of that
    /// function's own code.
    pub text_patches: Vec<PatchEntry<SymbolId>>,
    pub rodata: Vec<u8>,
    pub data: Vec<u8>,
    pub bss_size: u64,
    pub globals: Vec<GlobalLayout>,
    /// Each global's embedded relocations, offsets shifted the same way.
    pub data_relocations: Vec<(DataSection, GlobalReloc)>,
    by_name: HashMap<String, SymbolLocation>,
}

impl ModuleLayout {
    pub fn build(module: &Module, functions: &[ObjectFunction]) -> Self {
        let mut text = Vec::new();
        let mut fn_layouts = Vec::new();
        let mut text_patches = Vec::new();
        let mut by_name = HashMap::new();

        for f in functions {
            let func = module.function(f.id);
            let base = text.len() as u64;
            // Functions are placed on an 16-byte boundary so per-opcode
            // backends that assume call-site alignment (copy-patch's
            // stencils) stay valid once concatenated into one section.
            let pad = (16 - (base % 16)) % 16;
            text.resize(text.len() + pad as usize, 0x90); // nop filler
            let base = text.len() as u64;
            text.extend_from_slice(&f.code);
            fn_layouts.push(FunctionLayout {
                id: f.id,
                name: func.name.to_string(),
                offset: base,
                size: f.code.len() as u64,
            });
            by_name.insert(func.name.to_string(), SymbolLocation::Text { offset: base, size: f.code.len() as u64 });
            for patch in &f.patches {
                text_patches.push(PatchEntry {
                    offset: patch.offset + base as u32,
                    symbol: patch.symbol,
                    kind: patch.kind,
                    addend: patch.addend,
                });
            }
        }

        // Every declared-but-not-compiled function is an import: record
        // it as undefined so a lookup by name doesn't silently fall
        // through to "unknown symbol" for a perfectly valid `declare`.
        for (_, func) in module.functions() {
            by_name.entry(func.name.to_string()).or_insert(SymbolLocation::Undefined);
        }

        let mut rodata = Vec::new();
        let mut data = Vec::new();
        let mut bss_size = 0u64;
        let mut globals = Vec::new();
        let mut data_relocations = Vec::new();

        for (id, global) in module.globals() {
            let layout = layout_of(global.ty);
            let size = layout.layout.size.bytes();
            let align = layout.layout.align.abi.bytes().max(1);

            if global.flags.is_external && global.initializer.is_none() {
                by_name.insert(global.name.to_string(), SymbolLocation::Undefined);
                continue;
            }

            let (section_kind, buf): (DataSection, &mut Vec<u8>) = match (global.initializer, global.flags.is_const) {
                (Some(_), true) => (DataSection::RoData, &mut rodata),
                (Some(_), false) => (DataSection::Data, &mut data),
                (None, _) => {
                    let pad = (bss_size.next_multiple_of(align)) - bss_size;
                    bss_size += pad + size;
                    globals.push(GlobalLayout {
                        id,
                        name: global.name.to_string(),
                        section: DataSection::Bss,
                        offset: bss_size - size,
                        size,
                    });
                    by_name.insert(
                        global.name.to_string(),
                        SymbolLocation::Data { section: DataSection::Bss, offset: bss_size - size, size },
                    );
                    continue;
                }
            };

            let cur = buf.len() as u64;
            let pad = cur.next_multiple_of(align) - cur;
            buf.resize(buf.len() + pad as usize, 0);
            let offset = buf.len() as u64;
            buf.extend_from_slice(global.initializer.unwrap());
            globals.push(GlobalLayout { id, name: global.name.to_string(), section: section_kind, offset, size });
            by_name.insert(global.name.to_string(), SymbolLocation::Data { section: section_kind, offset, size });

            for reloc in &global.relocations {
                data_relocations.push((
                    section_kind,
                    GlobalReloc { offset: reloc.offset + offset, target: reloc.target },
                ));
            }
        }

        ModuleLayout {
            text,
            functions: fn_layouts,
            text_patches,
            rodata,
            data,
            bss_size,
            globals,
            data_relocations,
            by_name,
        }
    }

    pub fn locate(&self, name: &str) -> Option<SymbolLocation> {
        self.by_name.get(name).copied()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        !matches!(self.locate(name), None | Some(SymbolLocation::Undefined))
    }

    /// Every import that is both undefined locally and actually
    /// referenced by some patch or data relocation: the set an
    /// executable writer must route through PLT/GOT (spec §4.8:
    /// "`DT_NEEDED` entries deduced from undefined-symbol provenance").
    /// Sorted for deterministic PLT/GOT slot assignment.
    pub fn referenced_undefined(&self, module: &Module) -> Vec<String> {
        let mut needed = std::collections::BTreeSet::new();
        for patch in &self.text_patches {
            let name = module.symbol_name(patch.symbol);
            if matches!(self.locate(name), Some(SymbolLocation::Undefined)) {
                needed.insert(name.to_string());
            }
        }
        for (_, reloc) in &self.data_relocations {
            let name = module.symbol_name(reloc.target);
            if matches!(self.locate(name), Some(SymbolLocation::Undefined)) {
                needed.insert(name.to_string());
            }
        }
        needed.into_iter().collect()
    }
}
