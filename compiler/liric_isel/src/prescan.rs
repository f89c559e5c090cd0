//! Step 1 of the ISEL pipeline (spec §4.4 point 1): one walk over a
//! function's instructions to size every stack slot before any code is
//! emitted, so the prologue can carve the whole frame in one `sub rsp`.

use liric_ir::{Function, Opcode, Type};
use std::collections::HashMap;

/// A fixed-size, 8-byte-aligned stack slot for one vreg's "value cache"
/// backing store, or for one alloca's storage.
#[derive(Clone, Copy, Debug)]
pub struct Slot {
    pub offset: i32,
    pub size: u32,
}

/// Everything the frame layout and lowering passes need, computed once
/// per function before any instruction is emitted.
pub struct Prescan {
    /// Every producing vreg's value-cache slot (includes alloca pointer
    /// results; the storage those pointers address is separate, see
    /// `alloca_storage`).
    pub value_slots: HashMap<u32, Slot>,
    /// Storage for constant-size allocas in the entry block, keyed by the
    /// alloca's dest vreg. Dynamic-size allocas aren't supported (see
    /// `Opcode::Alloca` handling in the lowering pass) and never appear
    /// here.
    pub alloca_storage: HashMap<u32, Slot>,
    /// Bytes needed by the largest call site's stack-passed arguments
    /// (integer args beyond the sixth).
    pub outgoing_args_bytes: u32,
    /// Bytes needed by the largest single phi-copy transfer (per-edge
    /// staging area used to break copy cycles).
    pub phi_staging_bytes: u32,
    /// Running total of slot bytes handed out so far, used to place the
    /// next slot; frame.rs turns this into the final frame size.
    pub locals_bytes: u32,
}

fn vreg_raw(v: liric_ir::VReg) -> u32 {
    // VReg has no public accessor for its raw index; Debug is stable and
    // cheap enough for a one-shot prescan, but we'd rather not parse text.
    // `liric_ir` exposes `Idx` through `liric_utils`, which every `VReg`
    // implements, so we go through that instead.
    use liric_utils::Idx;
    v.idx() as u32
}

fn ty_slot_size(ty: Type) -> u32 {
    let layout = liric_ir::layout::layout_of(ty);
    (layout.layout.size.bytes().max(8) as u32 + 7) & !7
}

impl Prescan {
    pub fn run(func: &Function) -> Self {
        let mut value_slots = HashMap::new();
        let mut alloca_storage = HashMap::new();
        let mut outgoing_args_bytes = 0u32;
        let mut phi_staging_bytes = 0u32;
        let mut locals_bytes = 0u32;

        let mut alloc_slot = |bytes: &mut u32, size: u32| -> Slot {
            let offset = -(*bytes as i32) - size as i32;
            *bytes += size;
            Slot { offset, size }
        };

        for (_, block) in func.blocks.iter_enumerated() {
            let mut phi_count_here = 0u32;
            for inst in block.instructions.iter() {
                if matches!(inst.opcode, Opcode::Phi) {
                    phi_count_here += 1;
                }

                if inst.opcode.produces_value() && !matches!(inst.result_ty, Type::Void) {
                    let size = ty_slot_size(inst.result_ty);
                    let slot = alloc_slot(&mut locals_bytes, size);
                    value_slots.insert(vreg_raw(inst.dest), slot);
                }

                if let Opcode::Alloca = inst.opcode {
                    let size = {
                        let layout = liric_ir::layout::layout_of(inst.result_ty);
                        ((layout.layout.size.bytes().max(1) as u32) + 15) & !15
                    };
                    let slot = alloc_slot(&mut locals_bytes, size);
                    alloca_storage.insert(vreg_raw(inst.dest), slot);
                }

                if let Opcode::Call = inst.opcode {
                    let flags = inst.call_flags.unwrap_or_default();
                    let n_stack_args = (flags.fixed_args as i64 - 6).max(0) as u32;
                    outgoing_args_bytes = outgoing_args_bytes.max(n_stack_args * 8);
                }
            }
            phi_staging_bytes = phi_staging_bytes.max(phi_count_here * 8);
        }

        Prescan {
            value_slots,
            alloca_storage,
            outgoing_args_bytes,
            phi_staging_bytes,
            locals_bytes,
        }
    }

    pub fn slot_of(&self, v: liric_ir::VReg) -> Slot {
        *self
            .value_slots
            .get(&vreg_raw(v))
            .expect("prescan: every producing vreg has a value slot")
    }

    pub fn alloca_slot_of(&self, v: liric_ir::VReg) -> Slot {
        *self
            .alloca_storage
            .get(&vreg_raw(v))
            .expect("prescan: alloca dest has a storage slot")
    }
}
