//! Step 2 of the ISEL pipeline (spec §4.4 point 2): turns a [`Prescan`]
//! into one committed frame size and the fixed offsets within it.
//!
//! Layout below `rbp`, from `rbp` down to `rsp`:
//! `[locals + allocas][padding][phi staging][outgoing args]`. The
//! outgoing-args region is pinned flush against `rsp` (offset
//! `-frame_size`) so a call site's stack-passed arguments land at
//! `[rsp+0]`, `[rsp+8]`, ... exactly where the callee's ABI expects them,
//! with any 16-byte rounding slack absorbed between locals and staging
//! instead.

use crate::prescan::Prescan;

#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub frame_size: u32,
    pub phi_staging_base: i32,
    pub outgoing_args_base: i32,
}

impl FrameLayout {
    pub fn compute(prescan: &Prescan) -> Self {
        let raw_size = prescan.locals_bytes + prescan.phi_staging_bytes + prescan.outgoing_args_bytes;
        let frame_size = (raw_size + 15) & !15;
        let outgoing_args_base = -(frame_size as i32);
        let phi_staging_base = outgoing_args_base + prescan.outgoing_args_bytes as i32;
        FrameLayout {
            frame_size,
            phi_staging_base,
            outgoing_args_base,
        }
    }

    pub fn phi_staging_slot(&self, index: u32) -> i32 {
        self.phi_staging_base + index as i32 * 8
    }

    pub fn outgoing_arg_slot(&self, index: u32) -> i32 {
        self.outgoing_args_base + index as i32 * 8
    }
}
