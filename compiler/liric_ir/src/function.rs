use crate::block::Block;
use crate::ids::{BlockId, SymbolId, VReg};
use crate::types::Type;
use liric_utils::index_vec::IdxVec;

/// A function, definition or external declaration.
///
/// Blocks are appended one at a time during streaming construction
/// (the session's `block()`/`set_block()` cursor) into a dense
/// `IdxVec<BlockId, Block>`; that same vector plays the role of the
/// spec's "linked list, densified on finalize" — an `IdxVec` is already
/// contiguous, so there is no separate densification step to perform.
#[derive(Clone, Debug)]
pub struct Function<'a> {
    pub symbol: SymbolId,
    pub name: &'a str,
    pub sig: Type<'a>,
    pub ret_ty: Type<'a>,
    pub param_tys: &'a [Type<'a>],
    /// Pre-allocated so the ABI can map them 1:1 to incoming arguments.
    pub param_vregs: Vec<VReg>,
    pub blocks: IdxVec<BlockId, Block<'a>>,
    next_vreg: u32,
    pub is_decl: bool,
    pub vararg: bool,
}

impl<'a> Function<'a> {
    pub fn new_declaration(
        symbol: SymbolId,
        name: &'a str,
        sig: Type<'a>,
        ret_ty: Type<'a>,
        param_tys: &'a [Type<'a>],
        vararg: bool,
    ) -> Self {
        Function {
            symbol,
            name,
            sig,
            ret_ty,
            param_tys,
            param_vregs: Vec::new(),
            blocks: IdxVec::new(),
            next_vreg: 0,
            is_decl: true,
            vararg,
        }
    }

    /// Turns a declaration into a definition: allocates parameter
    /// vregs (so the backend's ABI lowering can map them before the
    /// first instruction is emitted) and the entry block.
    pub fn begin_definition(&mut self) {
        self.is_decl = false;
        self.param_vregs = (0..self.param_tys.len()).map(|_| self.fresh_vreg()).collect();
        self.blocks.push(Block::new());
    }

    /// Allocates a fresh, dense, function-local vreg.
    pub fn fresh_vreg(&mut self) -> VReg {
        let v = VReg::new(self.next_vreg as usize);
        self.next_vreg += 1;
        v
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push(Block::new())
    }

    pub fn block(&self, id: BlockId) -> &Block<'a> {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block<'a> {
        &mut self.blocks[id]
    }

    pub fn vreg_count(&self) -> usize {
        self.next_vreg as usize
    }

    /// Every block has exactly one terminator: used by the session at
    /// `func_end` to validate the finalized function.
    pub fn verify_blocks_terminated(&self) -> Result<(), BlockId> {
        for (id, block) in self.blocks.iter_enumerated() {
            if !block.has_terminator() {
                return Err(id);
            }
        }
        Ok(())
    }
}
