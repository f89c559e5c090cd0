use crate::instr::Instruction;

/// A straight-line sequence of instructions ending in exactly one
/// terminator. Densified into a contiguous array once the enclosing
/// function is finalized, for random access during codegen.
#[derive(Clone, Debug)]
pub struct Block<'a> {
    pub instructions: Vec<Instruction<'a>>,
}

impl<'a> Block<'a> {
    pub fn new() -> Self {
        Block {
            instructions: Vec::new(),
        }
    }

    pub fn terminator(&self) -> Option<&Instruction<'a>> {
        self.instructions.last().filter(|i| i.opcode.is_terminator())
    }

    pub fn has_terminator(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instruction<'a>> {
        self.instructions
            .iter()
            .take_while(|i| matches!(i.opcode, crate::instr::Opcode::Phi))
    }
}

impl<'a> Default for Block<'a> {
    fn default() -> Self {
        Self::new()
    }
}
