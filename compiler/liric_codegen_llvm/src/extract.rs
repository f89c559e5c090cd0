//! Peels one function's machine code and relocation list back out of the
//! single in-memory ELF object `TargetMachine::write_to_memory_buffer`
//! wrote for a throwaway one-function module. This is what lets
//! `LlvmBackend` satisfy the same per-function `Backend::compile_function`
//! contract every other lane does, without driving LLJIT/ORC: the
//! `object` crate (already a dependency elsewhere in the workspace for
//! `liric_object`'s writer side) reads back what LLVM's own object
//! emitter wrote.

use liric_abi::RelocKind;
use liric_codegen_ssa::backend::{BackendError, CompiledFunction, PatchEntry};
use liric_ir::Module;
use object::{Object, ObjectSection, ObjectSymbol, RelocationTarget};

use crate::context::internal;

pub fn extract(
    obj_bytes: &[u8],
    func_name: &str,
    module: &Module,
) -> Result<CompiledFunction, BackendError> {
    let file = object::File::parse(obj_bytes).map_err(|e| internal(format!("parsing llvm object: {e}")))?;

    let symbol = file
        .symbols()
        .find(|s| s.name() == Ok(func_name))
        .ok_or_else(|| internal(format!("compiled object has no symbol `{func_name}`")))?;
    let section_index = symbol
        .section_index()
        .ok_or_else(|| internal("function symbol has no section"))?;
    let section = file
        .section_by_index(section_index)
        .map_err(|e| internal(e.to_string()))?;
    let sec_data = section.data().map_err(|e| internal(e.to_string()))?;

    let sym_addr = symbol.address();
    let sym_size = symbol.size();
    let start = (sym_addr - section.address()) as usize;
    let end = start + sym_size as usize;
    let code = sec_data
        .get(start..end)
        .ok_or_else(|| internal("function body out of section bounds"))?
        .to_vec();

    let mut patches = Vec::new();
    for (addr, reloc) in section.relocations() {
        if addr < sym_addr || addr >= sym_addr + sym_size {
            continue;
        }
        let offset = (addr - sym_addr) as u32;
        let target_name = match reloc.target() {
            RelocationTarget::Symbol(idx) => file
                .symbol_by_index(idx)
                .map_err(|e| internal(e.to_string()))?
                .name()
                .map_err(|e| internal(e.to_string()))?
                .to_string(),
            _ => return Err(internal("unsupported relocation target kind")),
        };
        let symbol_id = module
            .symbols()
            .lookup(&target_name)
            .ok_or_else(|| internal(format!("relocation against unknown symbol `{target_name}`")))?;
        let kind = reloc_kind(reloc.flags())?;
        patches.push(PatchEntry {
            offset,
            symbol: symbol_id,
            kind,
            addend: reloc.addend(),
        });
    }

    let self_symbol = module
        .symbols()
        .lookup(func_name)
        .ok_or_else(|| internal(format!("unknown function symbol `{func_name}`")))?;
    Ok(CompiledFunction {
        symbol: self_symbol,
        code,
        patches,
        frame_size: 0,
    })
}

fn reloc_kind(flags: object::RelocationFlags) -> Result<RelocKind, BackendError> {
    if let object::RelocationFlags::Elf { r_type } = flags {
        return Ok(match r_type {
            object::elf::R_X86_64_PLT32 | object::elf::R_X86_64_PC32 => RelocKind::X86CallRel32,
            object::elf::R_X86_64_GOTPCREL
            | object::elf::R_X86_64_GOTPCRELX
            | object::elf::R_X86_64_REX_GOTPCRELX => RelocKind::X86GotPcRel32,
            object::elf::R_X86_64_64 => RelocKind::Abs64,
            object::elf::R_AARCH64_CALL26 | object::elf::R_AARCH64_JUMP26 => {
                RelocKind::Aarch64CallRel26
            }
            object::elf::R_AARCH64_ADR_PREL_PG_HI21 => RelocKind::Aarch64AdrpPage21,
            object::elf::R_AARCH64_ADD_ABS_LO12_NC => RelocKind::Aarch64AddAbsLo12,
            object::elf::R_AARCH64_ABS64 => RelocKind::Abs64,
            other => return Err(internal(format!("unsupported relocation type {other}"))),
        });
    }
    Err(internal("unsupported relocation flavor (non-ELF object)"))
}
