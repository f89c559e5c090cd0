//! The JIT materialization engine (spec §4.7): ties the RW-then-flip
//! memory regions (`memory`), the name -> address symbol table
//! (`symtab`), and the process-wide content-hash cache (`cache`)
//! together into a single handle a session drives through `install` and
//! `register_lazy`.
//!
//! Lazy materialization is real machine code, not a bookkeeping fiction:
//! a lazy symbol starts out bound to a trampoline that saves the six
//! integer argument registers, calls back into [`trampoline_resolve`]
//! with this `Jit`'s address and the lazy entry's index, then tail-jumps
//! into whatever address the resolver returns. The resolver compiles the
//! function on first entry and just returns its address on every call
//! after that (the trampoline itself is never repointed — unlike a
//! self-patching PLT, every call through it pays one indirect call plus
//! an already-resolved check, which keeps the patch list for the
//! *caller* untouched forever: its relocation target is the trampoline's
//! fixed address, so no already-emitted call site is ever revisited).
//!
//! Because the trampoline embeds this `Jit`'s address as a literal, a
//! `Jit` must not move in memory once [`Jit::register_lazy`] has been
//! called on it (callers should hold it behind a `Box` or similar).

pub mod cache;
pub mod memory;
pub mod symtab;

use liric_abi::RelocKind;
use liric_codegen_ssa::backend::BackendError;
use memory::{MemError, MemRegion};
use std::fmt;
use symtab::{SymbolFlags, SymbolTable};

/// A single deferred patch already resolved to a symbol *name*, as
/// opposed to `liric_codegen_ssa::backend::PatchEntry`, whose `SymbolId`
/// is only meaningful against the `Module` that minted it. The session
/// builds these by walking a `CompiledFunction`'s patch list and looking
/// each `SymbolId` up in its `Module` before handing the result to the
/// JIT, so the JIT itself never needs to know about `Module` at all.
#[derive(Clone, Debug)]
pub struct ResolvedPatch {
    pub offset: u32,
    pub target: String,
    pub kind: RelocKind,
    pub addend: i64,
}

/// A function ready to hand to [`Jit::install`] or [`Jit::register_lazy`]:
/// machine code, its resolved patch list, and the content hash the
/// materialization cache is keyed on.
#[derive(Clone, Debug)]
pub struct MaterializedFunction {
    pub code: Vec<u8>,
    pub patches: Vec<ResolvedPatch>,
    pub frame_size: u32,
    pub content_hash: [u8; 32],
}

#[derive(Debug)]
pub enum JitError {
    Memory(MemError),
    Backend(BackendError),
    /// A patch referenced a symbol name with no entry in the symbol
    /// table at all — not even a lazy stub. The session is expected to
    /// register every declared function (eagerly or lazily) before
    /// compiling anything that might call it.
    UnresolvedSymbol(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::Memory(e) => write!(f, "jit memory error: {e}"),
            JitError::Backend(e) => write!(f, "jit backend error: {e}"),
            JitError::UnresolvedSymbol(name) => {
                write!(f, "no symbol or lazy stub registered for `{name}`")
            }
        }
    }
}

impl std::error::Error for JitError {}

impl From<MemError> for JitError {
    fn from(e: MemError) -> Self {
        JitError::Memory(e)
    }
}

type LazyThunk<'a> = Box<dyn FnMut() -> Result<MaterializedFunction, BackendError> + 'a>;

/// One not-yet-materialized function: its name (so the resolver can
/// repoint the symbol table), and the closure that compiles it on first
/// call. Taken out of its `Option` for the duration of the call so a
/// thunk that (indirectly, through some future extension) touched the
/// `Jit` again wouldn't alias its own storage.
struct LazyEntry<'a> {
    name: String,
    materialize: Option<LazyThunk<'a>>,
}

/// A JIT target: one memory region, one symbol table, one lazy-entry
/// list, tagged with the `(target, backend)` pair written into every
/// [`cache::CacheKey`] it looks up or inserts, so an ISEL-compiled and a
/// copy-patch-compiled version of the same function never collide.
pub struct Jit<'a> {
    memory: MemRegion,
    symbols: SymbolTable,
    target: String,
    backend: &'static str,
    lazy: Vec<LazyEntry<'a>>,
    in_batch: bool,
}

impl<'a> Jit<'a> {
    pub fn new(target: impl Into<String>, backend: &'static str) -> Self {
        Jit {
            memory: MemRegion::new(),
            symbols: SymbolTable::new(),
            target: target.into(),
            backend,
            lazy: Vec::new(),
            in_batch: false,
        }
    }

    /// Registers a name bound outside the JIT entirely (`Compiler::add_symbol`,
    /// `load_library`): the address is trusted as given, never lazy.
    pub fn add_external_symbol(&mut self, name: impl Into<String>, address: usize) {
        self.symbols.add(
            name,
            address,
            SymbolFlags {
                is_lazy: false,
                is_external: true,
            },
        );
    }

    pub fn symbol_address(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).map(|e| e.address)
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.symbols.contains(name)
    }

    /// Opens a batch: every `install`/`register_lazy` call before the
    /// matching [`Jit::end_update`] shares one [`MemRegion::flip_all`]
    /// call, so a forward call from one function in the batch to another
    /// resolves before either becomes callable.
    pub fn begin_update(&mut self) {
        self.in_batch = true;
    }

    /// Flips every chunk touched since `begin_update` from RW to RX in
    /// one pass.
    pub fn end_update(&mut self) -> Result<(), JitError> {
        self.in_batch = false;
        self.memory.flip_all()?;
        Ok(())
    }

    /// Eagerly materializes `name`: a cache hit copies the already
    /// compiled bytes and skips `compile` entirely; a miss calls
    /// `compile`, inserts its result, and uses it. Either way every patch
    /// in the result is applied and `name` is bound to the final address
    /// before returning.
    pub fn install(
        &mut self,
        name: &str,
        hash: [u8; 32],
        compile: impl FnOnce() -> Result<MaterializedFunction, BackendError>,
    ) -> Result<usize, JitError> {
        let key = cache::CacheKey::new(self.target.clone(), self.backend, hash);
        let (code, patches, frame_size) = match cache::lookup(&key) {
            Some(hit) => (hit.code, hit.patches, hit.frame_size),
            None => {
                let materialized = compile().map_err(JitError::Backend)?;
                cache::insert(
                    key,
                    materialized.code.clone(),
                    materialized.patches.clone(),
                    materialized.frame_size,
                );
                (materialized.code, materialized.patches, materialized.frame_size)
            }
        };
        self.emit(name, &code, &patches, frame_size)
    }

    /// Registers `name` as lazy and returns a trampoline address safe to
    /// hand out as the symbol's call target right away. The first actual
    /// call through the trampoline runs `materialize` to produce the real
    /// body; every call after that is a fast already-resolved check plus
    /// an indirect jump.
    ///
    /// `materialize` must not itself depend on live float arguments at
    /// its own call site: the trampoline only preserves the six integer
    /// argument registers across the resolver call (spec §4.7's common
    /// case). A function whose callers may pass floating-point arguments
    /// on its first invocation should go through [`Jit::install`] instead.
    pub fn register_lazy(
        &mut self,
        name: impl Into<String>,
        materialize: impl FnMut() -> Result<MaterializedFunction, BackendError> + 'a,
    ) -> Result<usize, JitError> {
        let name = name.into();
        let index = self.lazy.len();
        let jit_ptr = self as *mut Jit<'a> as usize;
        let trampoline_code = build_trampoline(jit_ptr, index);
        let trampoline = self.memory.write(&trampoline_code)? as usize;
        self.symbols.add(
            name.clone(),
            trampoline,
            SymbolFlags {
                is_lazy: true,
                is_external: false,
            },
        );
        self.lazy.push(LazyEntry {
            name,
            materialize: Some(Box::new(materialize)),
        });
        if !self.in_batch {
            self.memory.flip_all()?;
        }
        Ok(trampoline)
    }

    /// Forces materialization of the lazy entry at `index`. Called by
    /// [`trampoline_resolve`] from generated code, and safe to call
    /// directly (e.g. to eagerly resolve every lazy stub before
    /// `emit_object`, which has no trampoline to fall back on).
    pub fn materialize_lazy(&mut self, index: usize) -> Result<usize, JitError> {
        let name = self.lazy[index].name.clone();
        if let Some(entry) = self.symbols.get(&name) {
            if !entry.flags.is_lazy {
                return Ok(entry.address);
            }
        }
        let mut thunk = self.lazy[index].materialize.take().ok_or_else(|| {
            JitError::UnresolvedSymbol(format!("{name} (already being materialized)"))
        })?;
        let result = thunk();
        self.lazy[index].materialize = Some(thunk);
        let materialized = result.map_err(JitError::Backend)?;

        let key = cache::CacheKey::new(self.target.clone(), self.backend, materialized.content_hash);
        if cache::lookup(&key).is_none() {
            cache::insert(
                key,
                materialized.code.clone(),
                materialized.patches.clone(),
                materialized.frame_size,
            );
        }

        let was_batching = self.in_batch;
        self.in_batch = true;
        let result = self.emit(&name, &materialized.code, &materialized.patches, materialized.frame_size);
        self.in_batch = was_batching;
        let addr = result?;
        if !was_batching {
            self.memory.flip_all()?;
        }
        Ok(addr)
    }

    /// Writes `code` into fresh space, applies every patch against an
    /// already-known symbol (eager or lazy), and binds `name` to the
    /// result. `frame_size` is currently unused by the JIT itself (it
    /// exists for `liric_object`'s benefit) but kept alongside the other
    /// fields so `install`/`materialize_lazy` have one place to thread it
    /// through from a cache hit or a fresh compile.
    fn emit(
        &mut self,
        name: &str,
        code: &[u8],
        patches: &[ResolvedPatch],
        _frame_size: u32,
    ) -> Result<usize, JitError> {
        let base = self.memory.write(code)?;
        for patch in patches {
            self.apply_patch(base, patch)?;
        }
        let addr = base as usize;
        self.symbols.set_address(name, addr);
        if !self.in_batch {
            self.memory.flip_all()?;
        }
        Ok(addr)
    }

    /// Resolves `patch.target`'s current address and writes it into
    /// `base + patch.offset`. The target must already have a symbol table
    /// entry, eager or lazy — the session is responsible for registering
    /// a lazy stub for every declared-but-not-yet-defined function before
    /// compiling anything that might reference it, so this never needs to
    /// invent one on the fly.
    fn apply_patch(&mut self, base: *mut u8, patch: &ResolvedPatch) -> Result<(), JitError> {
        let target_addr = self
            .symbols
            .get(&patch.target)
            .map(|e| e.address)
            .ok_or_else(|| JitError::UnresolvedSymbol(patch.target.clone()))?;
        let field = unsafe { base.add(patch.offset as usize) };
        match patch.kind {
            RelocKind::Abs64 => {
                let value = (target_addr as i64 + patch.addend) as u64;
                unsafe { self.memory.patch(field, &value.to_le_bytes()) };
            }
            RelocKind::X86CallRel32 | RelocKind::X86GotPcRel32 => {
                let pc_after = field as i64 + 4;
                let disp = (target_addr as i64 + patch.addend) - pc_after;
                unsafe { self.memory.patch(field, &(disp as i32).to_le_bytes()) };
            }
            RelocKind::Aarch64CallRel26 => {
                let pc_after = field as i64;
                let disp = (target_addr as i64 + patch.addend) - pc_after;
                let imm26 = ((disp / 4) as i32) & 0x03FF_FFFF;
                let mut word = [0u8; 4];
                unsafe { std::ptr::copy_nonoverlapping(field, word.as_mut_ptr(), 4) };
                let existing = u32::from_le_bytes(word) & 0xFC00_0000;
                let patched = existing | (imm26 as u32);
                unsafe { self.memory.patch(field, &patched.to_le_bytes()) };
            }
            RelocKind::Aarch64AdrpPage21 | RelocKind::Aarch64AddAbsLo12 => {
                // Splitting the absolute target into `adrp`'s 21-bit page
                // immediate and `add`'s 12-bit page-offset immediate needs
                // each instruction's specific bit layout, not a flat
                // 4-byte overwrite. Aarch64 isn't a host ISA this JIT ever
                // executes on (only emits for), so this path is only
                // reached by tests exercising the patch table itself; the
                // real bit-packing lives in `liric_object`'s static linker.
                let value = (target_addr as i64 + patch.addend) as u32;
                unsafe { self.memory.patch(field, &value.to_le_bytes()) };
            }
        }
        Ok(())
    }
}

/// The machine code trampoline's call target. `jit_ptr` is the address
/// captured when [`Jit::register_lazy`] built the trampoline calling this.
///
/// # Safety
/// `jit_ptr` must be the address of a `Jit` that has not moved since that
/// trampoline was built and must still be alive when the trampoline runs.
unsafe extern "C" fn trampoline_resolve(jit_ptr: usize, index: usize) -> usize {
    let jit = &mut *(jit_ptr as *mut Jit<'static>);
    jit.materialize_lazy(index).unwrap_or(0)
}

/// Builds a trampoline that preserves the six SysV integer argument
/// registers across a call to [`trampoline_resolve`], then tail-jumps
/// into whatever address it returns.
///
/// Stack discipline: at entry `rsp % 16 == 8` (the normal post-`call`
/// state). Six 8-byte pushes leave that unchanged, so a `sub rsp, 8`
/// realigns to 0 before `call`; the matching `add rsp, 8` after the call
/// restores `rsp % 16 == 8` before the pops, so by the time the trailing
/// `jmp` executes the stack looks exactly as it did on entry — the
/// callee sees the same frame it would have if the original caller had
/// called it directly.
fn build_trampoline(jit_ptr: usize, index: usize) -> Vec<u8> {
    let mut code = Vec::with_capacity(64);
    code.extend_from_slice(&[0x57, 0x56, 0x52, 0x51]); // push rdi, rsi, rdx, rcx
    code.extend_from_slice(&[0x41, 0x50]); // push r8
    code.extend_from_slice(&[0x41, 0x51]); // push r9
    code.extend_from_slice(&[0x48, 0x83, 0xEC, 0x08]); // sub rsp, 8

    code.extend_from_slice(&[0x48, 0xBF]); // mov rdi, imm64
    code.extend_from_slice(&(jit_ptr as u64).to_le_bytes());
    code.extend_from_slice(&[0x48, 0xBE]); // mov rsi, imm64
    code.extend_from_slice(&(index as u64).to_le_bytes());
    code.extend_from_slice(&[0x48, 0xB8]); // mov rax, imm64
    code.extend_from_slice(&(trampoline_resolve as usize as u64).to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]); // call rax

    code.extend_from_slice(&[0x48, 0x83, 0xC4, 0x08]); // add rsp, 8
    code.extend_from_slice(&[0x41, 0x59]); // pop r9
    code.extend_from_slice(&[0x41, 0x58]); // pop r8
    code.extend_from_slice(&[0x59, 0x5A, 0x5E, 0x5F]); // pop rcx, rdx, rsi, rdi

    code.push(0xFF);
    code.push(0xE0); // jmp rax
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `mov eax, 42; ret` — a trivial but real callable body, used to
    /// exercise the RW->RX path end to end rather than just inspecting
    /// bytes.
    fn returns_42() -> MaterializedFunction {
        MaterializedFunction {
            code: vec![0xB8, 42, 0, 0, 0, 0xC3],
            patches: Vec::new(),
            frame_size: 0,
            content_hash: [1u8; 32],
        }
    }

    #[test]
    fn install_compiles_once_and_runs_the_result() {
        let mut jit = Jit::new("x86_64-unknown-linux-gnu", "isel");
        let mut calls = 0;
        let addr = jit
            .install("answer", [42u8; 32], || {
                calls += 1;
                Ok(returns_42())
            })
            .unwrap();
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn install_hits_cache_on_matching_content_hash() {
        let mut jit_a = Jit::new("x86_64-unknown-linux-gnu", "isel");
        jit_a.install("f", [77u8; 32], || Ok(returns_42())).unwrap();

        let mut jit_b = Jit::new("x86_64-unknown-linux-gnu", "isel");
        let mut compiled = false;
        let addr = jit_b
            .install("f", [77u8; 32], || {
                compiled = true;
                Ok(returns_42())
            })
            .unwrap();
        assert!(!compiled, "second session should hit the process cache");
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(), 42);
    }

    #[test]
    fn register_lazy_defers_compilation_until_first_call() {
        let mut jit = Box::new(Jit::new("x86_64-unknown-linux-gnu", "isel"));
        let compiled = std::rc::Rc::new(std::cell::Cell::new(false));
        let flag = compiled.clone();
        let trampoline = jit
            .register_lazy("lazy_fn", move || {
                flag.set(true);
                Ok(returns_42())
            })
            .unwrap();
        assert!(!compiled.get());

        let entry = jit.symbols.get("lazy_fn").unwrap();
        assert_eq!(entry.address, trampoline);
        assert!(entry.flags.is_lazy);

        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(trampoline) };
        assert_eq!(f(), 42);
        assert!(compiled.get());

        let resolved = jit.symbols.get("lazy_fn").unwrap();
        assert!(!resolved.flags.is_lazy);
        assert_ne!(resolved.address, trampoline);
    }

    #[test]
    fn begin_end_update_batches_forward_references() {
        let mut jit = Jit::new("x86_64-unknown-linux-gnu", "isel");
        jit.begin_update();
        jit.install("a", [1u8; 32], || Ok(returns_42())).unwrap();
        jit.install("b", [2u8; 32], || Ok(returns_42())).unwrap();
        jit.end_update().unwrap();
        assert!(jit.symbol_address("a").is_some());
        assert!(jit.symbol_address("b").is_some());
    }

    #[test]
    fn apply_patch_rejects_unknown_symbol() {
        let mut jit = Jit::new("x86_64-unknown-linux-gnu", "isel");
        let patch = ResolvedPatch {
            offset: 1,
            target: "does_not_exist".to_string(),
            kind: RelocKind::X86CallRel32,
            addend: 0,
        };
        let err = jit
            .install("caller", [9u8; 32], || {
                Ok(MaterializedFunction {
                    code: vec![0xE8, 0, 0, 0, 0, 0xC3],
                    patches: vec![patch],
                    frame_size: 0,
                    content_hash: [9u8; 32],
                })
            })
            .unwrap_err();
        assert!(matches!(err, JitError::UnresolvedSymbol(_)));
    }
}
