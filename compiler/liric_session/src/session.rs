//! The session (spec §4.3): the single coherent API where frontends and
//! backends meet. Owns the module, the JIT, the mode, the backend lane,
//! the target, and the function/block cursor used while a caller streams
//! instructions in one at a time via `emit`.

use crate::backend_lane::BackendLane;
use crate::error::LiricError;
use liric_abi::{BackendKind, LiricTarget, TargetTriple};
use liric_arena::Arena;
use liric_ir::{
    content_hash, BlockId, FunctionId, Instruction, Module, Opcode, Operand, Type, VReg,
};
use liric_jit::{Jit, MaterializedFunction, ResolvedPatch};
use std::collections::HashMap;
use tracing::instrument;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Each function is compiled and installed in the JIT as soon as
    /// `func_end` (or a frontend finishes parsing it) closes it out.
    Direct,
    /// The whole module is buffered; codegen is deferred until `lookup`
    /// or an object/executable is requested.
    Ir,
}

/// Describes a function about to be opened with [`Session::func_begin`].
pub struct FuncSpec<'a> {
    pub name: String,
    pub ret_ty: Type<'a>,
    pub param_tys: Vec<Type<'a>>,
    pub vararg: bool,
}

/// A declarative phi edge recorded by [`Session::add_phi_copy`]: at
/// `func_end` every group sharing a `(block, dest)` pair is flattened
/// into one real `Phi` instruction at the head of that block, which is
/// the form every backend actually consumes (spec §3: "a `phi` only
/// appears at the head of a block").
struct PendingPhi<'a> {
    ty: Type<'a>,
    incoming: Vec<(Operand<'a>, BlockId)>,
}

pub struct Session<'a> {
    module: Module<'a>,
    jit: Jit<'static>,
    mode: Mode,
    backend: BackendLane,
    target: LiricTarget,
    current_function: Option<FunctionId>,
    current_block: Option<BlockId>,
    pending_phis: HashMap<(BlockId, VReg), PendingPhi<'a>>,
    installed: std::collections::HashSet<String>,
}

impl<'a> Session<'a> {
    pub fn new(
        arena: &'a Arena,
        module_name: impl Into<String>,
        mode: Mode,
        backend_kind: BackendKind,
        triple: Option<TargetTriple>,
    ) -> Result<Self, LiricError> {
        let target = match triple {
            Some(t) => LiricTarget::new(backend_kind).with_triple(t),
            None => LiricTarget::host(backend_kind),
        };
        let backend = BackendLane::new(backend_kind, target.target_triple.as_ref())?;
        let target_string = target
            .target_triple_string()
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Session {
            module: Module::new(arena, module_name),
            jit: Jit::new(target_string, backend.name()),
            mode,
            backend,
            target,
            current_function: None,
            current_block: None,
            pending_phis: HashMap::new(),
            installed: std::collections::HashSet::new(),
        })
    }

    pub fn module(&self) -> &Module<'a> {
        &self.module
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn jit(&self) -> &Jit<'static> {
        &self.jit
    }

    pub fn target(&self) -> &liric_abi::LiricTarget {
        &self.target
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // -- Type constructors -------------------------------------------------

    pub fn array_ty(&self, elem: Type<'a>, count: u64) -> Type<'a> {
        self.module.array_ty(elem, count)
    }

    pub fn struct_ty(&self, fields: &[Type<'a>], packed: bool) -> Type<'a> {
        self.module.struct_ty(fields, packed)
    }

    pub fn function_ty(&self, ret: Type<'a>, params: &[Type<'a>], vararg: bool) -> Type<'a> {
        self.module.function_ty(ret, params, vararg)
    }

    // -- Declarations --------------------------------------------------

    /// Records an external function declaration and, if the JIT doesn't
    /// already have an entry for it, a lazy stub: a call emitted against
    /// this name before it is ever defined (forward reference,
    /// self-recursion, mutual recursion) has a real trampoline address to
    /// patch against.
    pub fn declare(
        &mut self,
        name: &str,
        ret_ty: Type<'a>,
        param_tys: &[Type<'a>],
        vararg: bool,
    ) -> Result<FunctionId, LiricError> {
        if name.is_empty() {
            return Err(LiricError::Argument("function name must not be empty".to_string()));
        }
        let id = self.module.declare_function(name, ret_ty, param_tys, vararg);
        self.ensure_forward_stub(name);
        Ok(id)
    }

    fn ensure_forward_stub(&mut self, name: &str) {
        if self.jit.contains_symbol(name) {
            return;
        }
        let owned = name.to_string();
        let _ = self.jit.register_lazy(owned.clone(), move || {
            Err(liric_codegen_ssa::backend::BackendError::Internal {
                message: format!("`{owned}` called before it was ever defined"),
            })
        });
    }

    // -- Function/block/instruction cursor ------------------------------

    #[instrument(level = "debug", skip(self))]
    pub fn func_begin(&mut self, spec: FuncSpec<'a>) -> Result<FunctionId, LiricError> {
        if self.current_function.is_some() {
            return Err(LiricError::State(
                "func_begin called with a function already open".to_string(),
            ));
        }
        if spec.name.is_empty() {
            return Err(LiricError::Argument("function name must not be empty".to_string()));
        }
        let id = self
            .module
            .declare_function(&spec.name, spec.ret_ty, &spec.param_tys, spec.vararg);
        if !self.module.function(id).is_decl {
            return Err(LiricError::State(format!(
                "function `{}` is already defined",
                spec.name
            )));
        }
        self.module.function_mut(id).begin_definition();
        self.ensure_forward_stub(&spec.name);
        self.current_function = Some(id);
        self.current_block = Some(liric_ir::ENTRY_BLOCK);
        Ok(id)
    }

    pub fn block(&mut self) -> Result<BlockId, LiricError> {
        let id = self.current_function()?;
        Ok(self.module.function_mut(id).new_block())
    }

    pub fn set_block(&mut self, id: BlockId) -> Result<(), LiricError> {
        let func_id = self.current_function()?;
        if id.idx() >= self.module.function(func_id).blocks.len() {
            return Err(LiricError::Argument(format!("block {} does not exist", id.idx())));
        }
        self.current_block = Some(id);
        Ok(())
    }

    pub fn vreg(&mut self) -> Result<VReg, LiricError> {
        let id = self.current_function()?;
        Ok(self.module.function_mut(id).fresh_vreg())
    }

    /// Appends `inst` to the current block after a light arity check
    /// (spec §4.3: "validate operand types and arities"). Returns the
    /// instruction's destination vreg, `VOID_VREG` for opcodes that
    /// produce no value.
    pub fn emit(&mut self, inst: Instruction<'a>) -> Result<VReg, LiricError> {
        let func_id = self.current_function()?;
        let block_id = self
            .current_block
            .ok_or_else(|| LiricError::State("emit called with no current block".to_string()))?;
        validate_arity(&inst)?;
        let dest = inst.dest;
        self.module.function_mut(func_id).block_mut(block_id).instructions.push(inst);
        Ok(dest)
    }

    /// Records a declarative phi edge: on entry to the current block from
    /// `pred`, `dest` should take on `src`'s value. Flattened into a real
    /// `Phi` instruction at `func_end`.
    pub fn add_phi_copy(&mut self, pred: BlockId, dest: VReg, ty: Type<'a>, src: Operand<'a>) -> Result<(), LiricError> {
        let block_id = self
            .current_block
            .ok_or_else(|| LiricError::State("add_phi_copy called with no current block".to_string()))?;
        self.pending_phis
            .entry((block_id, dest))
            .or_insert_with(|| PendingPhi { ty, incoming: Vec::new() })
            .incoming
            .push((src, pred));
        Ok(())
    }

    fn flush_pending_phis(&mut self, func_id: FunctionId) {
        if self.pending_phis.is_empty() {
            return;
        }
        let mut by_block: HashMap<BlockId, Vec<Instruction<'a>>> = HashMap::new();
        for ((block_id, dest), pending) in self.pending_phis.drain() {
            let mut operands = Vec::with_capacity(pending.incoming.len() * 2);
            for (src, pred) in pending.incoming {
                operands.push(src);
                operands.push(Operand::Block(pred));
            }
            let instr = Instruction::new(Opcode::Phi, pending.ty, dest, operands);
            by_block.entry(block_id).or_default().push(instr);
        }
        let func = self.module.function_mut(func_id);
        for (block_id, instrs) in by_block {
            let block = func.block_mut(block_id);
            block.instructions.splice(0..0, instrs);
        }
    }

    /// Finalizes the current function. In [`Mode::Direct`] this compiles
    /// and installs it in the JIT immediately, returning its code address;
    /// in [`Mode::Ir`] compilation is deferred and `None` is returned.
    #[instrument(level = "debug", skip(self))]
    pub fn func_end(&mut self) -> Result<Option<usize>, LiricError> {
        let func_id = self.current_function()?;
        self.flush_pending_phis(func_id);
        if let Err(block_id) = self.module.function(func_id).verify_blocks_terminated() {
            return Err(LiricError::State(format!(
                "block {} has no terminator",
                block_id.idx()
            )));
        }
        self.current_function = None;
        self.current_block = None;

        match self.mode {
            Mode::Ir => Ok(None),
            Mode::Direct => {
                let addr = self.compile_and_install(func_id)?;
                Ok(Some(addr))
            }
        }
    }

    fn current_function(&self) -> Result<FunctionId, LiricError> {
        self.current_function
            .ok_or_else(|| LiricError::State("no function is currently open".to_string()))
    }

    /// Compiles `func_id` through the active backend lane and installs it
    /// in the JIT, resolving its patch list against interned symbol names
    /// (a `SymbolId` only means anything against `self.module`, so the
    /// translation to [`ResolvedPatch`] happens here, at the one place
    /// that has both the `Module` and the `Jit` in scope).
    fn compile_and_install(&mut self, func_id: FunctionId) -> Result<usize, LiricError> {
        let name = self.module.function(func_id).name.to_string();
        let hash = content_hash(self.module.function(func_id));
        let compiled = self.backend.compile(&self.module, func_id)?;
        let module = &self.module;
        let patches = compiled
            .patches
            .iter()
            .map(|p| ResolvedPatch {
                offset: p.offset,
                target: module.symbol_name(p.symbol).to_string(),
                kind: p.kind,
                addend: p.addend,
            })
            .collect();
        let materialized = MaterializedFunction {
            code: compiled.code,
            patches,
            frame_size: compiled.frame_size,
            content_hash: hash,
        };
        let addr = self.jit.install(&name, hash, move || Ok(materialized))?;
        self.installed.insert(name);
        Ok(addr)
    }

    // -- Frontend shortcuts ----------------------------------------------

    /// Pumps `bytes` through the `auto` frontend dispatcher (spec §4.2's
    /// sniffing rule). In direct mode, every function the parse added
    /// (definitions only; declarations stay lazy stubs) is compiled and
    /// installed right after the parse completes. This gives the same
    /// externally observable timing as a literal streaming callback
    /// (code is ready before `compile_auto` returns) without threading a
    /// closure that would need to borrow `self.module` and the rest of
    /// `self` at once.
    pub fn compile_auto(&mut self, bytes: &[u8]) -> Result<(), LiricError> {
        let before: std::collections::HashSet<FunctionId> =
            self.module.functions().map(|(id, _)| id).collect();
        liric_frontend::auto::parse(bytes, &mut self.module)?;
        self.install_new_definitions(&before)
    }

    pub fn compile_ll(&mut self, bytes: &[u8]) -> Result<(), LiricError> {
        self.compile_auto(bytes)
    }

    pub fn compile_wasm(&mut self, bytes: &[u8]) -> Result<(), LiricError> {
        self.compile_auto(bytes)
    }

    pub fn compile_bc(&mut self, bytes: &[u8]) -> Result<(), LiricError> {
        self.compile_auto(bytes)
    }

    fn install_new_definitions(
        &mut self,
        seen_before: &std::collections::HashSet<FunctionId>,
    ) -> Result<(), LiricError> {
        if self.mode != Mode::Direct {
            return Ok(());
        }
        let new_defs: Vec<FunctionId> = self
            .module
            .functions()
            .filter(|(id, f)| !seen_before.contains(id) && !f.is_decl)
            .map(|(id, _)| id)
            .collect();
        for func_id in new_defs {
            self.ensure_forward_stub(&self.module.function(func_id).name.to_string());
        }
        for func_id in self
            .module
            .functions()
            .filter(|(id, f)| !seen_before.contains(id) && !f.is_decl)
            .map(|(id, _)| id)
            .collect::<Vec<_>>()
        {
            self.compile_and_install(func_id)?;
        }
        Ok(())
    }

    /// Looks up a symbol's code address, compiling it first if the
    /// session is in [`Mode::Ir`] and it hasn't been materialized yet.
    pub fn lookup(&mut self, name: &str) -> Result<usize, LiricError> {
        if let Some(addr) = self.jit.symbol_address(name) {
            if self.jit.contains_symbol(name) && !self.is_lazy(name) {
                return Ok(addr);
            }
        }
        if self.mode == Mode::Ir {
            if let Some(func_id) = self.module.find_function(name) {
                if !self.module.function(func_id).is_decl {
                    return Ok(self.compile_and_install(func_id)?);
                }
            }
        }
        self.jit
            .symbol_address(name)
            .ok_or_else(|| LiricError::NotFound(name.to_string()))
    }

    fn is_lazy(&self, name: &str) -> bool {
        // `Jit` doesn't expose flags directly; a lazy stub's trampoline
        // address is meaningless to callers that only want the real
        // code, so `lookup` in IR mode always forces a real compile
        // rather than trusting a cached trampoline address.
        self.mode == Mode::Ir && self.module.find_function(name).is_some() && !self.installed.contains(name)
    }

    /// Registers a symbol whose address is provided by the embedding
    /// application (`Compiler::add_symbol`, `load_library`) rather than
    /// compiled from fed IR.
    pub fn add_external_symbol(&mut self, name: &str, address: usize) -> Result<(), LiricError> {
        if name.is_empty() {
            return Err(LiricError::Argument("symbol name must not be empty".to_string()));
        }
        self.jit.add_external_symbol(name, address);
        Ok(())
    }

    /// Merges a runtime bitcode bundle into the module as declarations
    /// (spec §6: "install a runtime bitcode bundle (parsed and merged as
    /// declarations)"). Only declarations are merged; bodies, if any,
    /// are not overwritten into `self.module` since a runtime bundle's
    /// role is to provide external symbol signatures, not definitions to
    /// compile.
    pub fn set_runtime_bc(&mut self, bytes: &[u8]) -> Result<(), LiricError> {
        let scratch_arena = Arena::new();
        let mut scratch = Module::new(&scratch_arena, "runtime");
        liric_frontend::auto::parse(bytes, &mut scratch)?;
        for (_, func) in scratch.functions() {
            self.module
                .declare_function(func.name, func.ret_ty, func.param_tys, func.vararg);
        }
        Ok(())
    }

    /// Compiles every function definition in the module through the active
    /// backend lane without installing any of it in the JIT, for
    /// `liric_object`'s benefit. Spec §4.3: IR mode "is the only mode
    /// compatible with... object emission", since emitting an object from
    /// a direct-mode session would mean re-running the backend over code
    /// already installed and running.
    pub fn compile_for_object(&mut self) -> Result<Vec<liric_object::ObjectFunction>, LiricError> {
        if self.mode != Mode::Ir {
            return Err(LiricError::State(
                "object/executable emission requires Mode::Ir".to_string(),
            ));
        }
        let ids: Vec<FunctionId> = self
            .module
            .functions()
            .filter(|(_, f)| !f.is_decl)
            .map(|(id, _)| id)
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let compiled = self.backend.compile(&self.module, id)?;
            out.push(liric_object::ObjectFunction {
                id,
                code: compiled.code,
                patches: compiled.patches,
            });
        }
        Ok(out)
    }
}

fn validate_arity(inst: &Instruction<'_>) -> Result<(), LiricError> {
    let want: Option<usize> = match inst.opcode {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::SDiv
        | Opcode::SRem
        | Opcode::UDiv
        | Opcode::URem
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::LShr
        | Opcode::AShr
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMul
        | Opcode::FDiv
        | Opcode::FRem
        | Opcode::ICmp
        | Opcode::FCmp => Some(2),
        Opcode::FNeg | Opcode::Cast(_) | Opcode::Load => Some(1),
        Opcode::Store => Some(2),
        Opcode::Ret => None, // 0 (ret void shape via RetVoid) or 1, checked below
        Opcode::RetVoid | Opcode::Unreachable => Some(0),
        Opcode::Br => Some(1),
        Opcode::CondBr => Some(3),
        _ => None,
    };
    if inst.opcode == Opcode::Ret && inst.operands.len() != 1 {
        return Err(LiricError::Argument(format!(
            "ret expects exactly one operand, got {}",
            inst.operands.len()
        )));
    }
    if let Some(n) = want {
        if inst.operands.len() != n {
            return Err(LiricError::Argument(format!(
                "{:?} expects {} operand(s), got {}",
                inst.opcode,
                n,
                inst.operands.len()
            )));
        }
    }
    Ok(())
}
