//! The compiler facade (spec §4.9 / §6): a small top-level `Compiler`
//! handle wrapping a [`liric_session::Session`], for an embedding
//! application or a language frontend that wants `create` / `feed_*` /
//! `lookup` / `emit_*` without learning the session's richer IR-building
//! grammar (that grammar — `func_begin`/`emit`/`add_phi_copy`/... — stays
//! available straight off `liric_session::Session` for a frontend that
//! streams instructions in directly, the way `tidec`'s `main.rs` drove
//! `CodegenCtx` straight off `inkwell`).
//!
//! This is the one crate every embedder depends on; it re-exports just
//! enough of `liric_ir`/`liric_session` to build and run IR without a
//! second `Cargo.toml` line.

pub mod config;
pub mod library;

use liric_arena::Arena;
use liric_ir::print::print_module;
use liric_session::Session;
use std::path::Path;

pub use config::{Backend, Config, Policy};
pub use liric_session::LiricError as Error;

/// The public result alias every fallible `Compiler` method returns
/// (spec §6's error taxonomy, `liric_session::LiricError`, surfaced
/// without renaming it — a second `Error` enum here would just be a
/// pass-through).
pub type Result<T> = std::result::Result<T, Error>;

/// The opaque `Compiler` handle (spec §6). Owns its arena and session;
/// `arena` is boxed so its address is stable across a `Compiler` move —
/// `session` borrows it for `'static` the same way `liric_jit::Jit`
/// already captures its own address as a raw pointer for the lazy
/// trampoline (see that crate's module doc). Declared first so it drops
/// before `arena`, even though neither type's `Drop` impl currently
/// reads through the borrow.
pub struct Compiler {
    session: Session<'static>,
    _arena: Box<Arena>,
}

impl Compiler {
    /// Creates a compiler configured per `config` (spec §6). `policy`
    /// picks `Mode::Direct`/`Mode::Ir`; `backend` picks the codegen lane;
    /// `target` picks the host or an explicit `x86_64`/`aarch64` triple.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;
        let triple = config.resolve_target()?;
        let arena = Box::new(Arena::new());
        // SAFETY: `arena`'s heap allocation (not the `Box` pointer value
        // itself) is what every `&'a Arena` borrow actually points into;
        // `Compiler` keeps `arena` alive at least as long as `session`,
        // and `session` is dropped first (see the struct's field order),
        // so this reference never outlives its referent.
        let arena_ref: &'static Arena = unsafe { &*(arena.as_ref() as *const Arena) };
        let session = Session::new(arena_ref, "liric_module", config.policy.into(), config.backend, triple)?;
        Ok(Compiler { session, _arena: arena })
    }

    /// Tears the compiler down. Equivalent to dropping it; kept as an
    /// explicit method because spec §6 lists `destroy` as part of the
    /// public operation set (a C-API-shaped embedder has no destructor to
    /// rely on).
    pub fn destroy(self) {}

    /// Exposes the underlying [`Session`] for a frontend that wants to
    /// stream instructions in directly (`func_begin`/`block`/`emit`/...)
    /// instead of feeding a pre-serialized `.ll`/`.bc`/`.wasm` buffer.
    pub fn session_api(&mut self) -> &mut Session<'static> {
        &mut self.session
    }

    /// Registers an external symbol whose address is supplied directly by
    /// the embedder (spec §6: "register external symbol `(name, address)`").
    pub fn add_symbol(&mut self, name: &str, address: usize) -> Result<()> {
        self.session.add_external_symbol(name, address)
    }

    /// Loads `path` and registers every dynamic symbol it exports (spec
    /// §6: "load a shared library (adds all its symbols)"). The mapping
    /// is kept alive for the remainder of this `Compiler`'s lifetime by
    /// leaking the `LoadedLibrary` handle into a side table — unmapping
    /// it while JIT'd code might still call into it would be unsound, and
    /// this facade has no API to ever signal "this library's code is no
    /// longer reachable".
    pub fn load_library(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let loaded =
            library::load(path.as_ref()).map_err(|e| Error::Backend(e.to_string()))?;
        let count = loaded.exported_symbols.len();
        for (name, addr) in &loaded.exported_symbols {
            self.session.add_external_symbol(name, *addr)?;
        }
        // Leaked deliberately: see the doc comment above.
        std::mem::forget(loaded);
        Ok(count)
    }

    /// Installs a runtime bitcode bundle as declarations (spec §6: "install
    /// a runtime bitcode bundle (parsed and merged as declarations)").
    pub fn set_runtime_bc(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.set_runtime_bc(bytes)
    }

    /// Feeds textual IR, auto-sniffed like every other `feed_*` (the
    /// textual frontend has no magic bytes to key a dedicated entry point
    /// off of, so this is `feed_auto` under another name).
    pub fn feed_ll(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.compile_ll(bytes)
    }

    /// Feeds LLVM bitcode (raw or wrapped).
    pub fn feed_bc(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.compile_bc(bytes)
    }

    /// Feeds a WebAssembly binary module.
    pub fn feed_wasm(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.compile_wasm(bytes)
    }

    /// Feeds `bytes`, sniffing which of the three input formats it is
    /// (spec §4.2's `auto` dispatcher).
    pub fn feed_auto(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.compile_auto(bytes)
    }

    /// Looks up `name`'s code address, compiling it first if needed (spec
    /// §6: "lookup a symbol").
    pub fn lookup(&mut self, name: &str) -> Result<usize> {
        self.session.lookup(name)
    }

    /// Renders the current module back to textual IR (used by the
    /// round-trip-parse testable property, spec §8 #1, and handy for
    /// debugging a session built up through `session_api`).
    pub fn print_ir(&self) -> String {
        print_module(self.session.module())
    }

    /// Emits an ELF64 relocatable object (spec §6: "emit an object...").
    /// Requires `policy = IR` (spec §4.3: IR mode "is the only mode
    /// compatible with... object emission").
    pub fn emit_object(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let functions = self.session.compile_for_object()?;
        let bytes = liric_object::emit_object(self.session.module(), self.session.target(), &functions)?;
        std::fs::write(path, bytes).map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    /// Emits an executable at `path` with entry symbol `main` (spec §6:
    /// default entry). Picks a statically or dynamically linked layout
    /// automatically: a module with no reference to an undefined symbol
    /// (the `ret42` shape) gets a static executable with no dynamic
    /// linker dependency at all; one that calls into `puts`/`libc`/etc.
    /// gets `PT_INTERP` plus a minimal `.dynamic` section (spec §4.8).
    pub fn emit_exe(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.emit_exe_entry(path, "main")
    }

    /// [`Compiler::emit_exe`] with an explicit entry symbol.
    pub fn emit_exe_entry(&mut self, path: impl AsRef<Path>, entry_symbol: &str) -> Result<()> {
        let functions = self.session.compile_for_object()?;
        let module = self.session.module();
        let target = self.session.target();
        let bytes = if liric_object::needs_dynamic_linking(module, &functions) {
            liric_object::emit_dynamic_executable(module, target, &functions, entry_symbol)?
        } else {
            liric_object::emit_static_executable(module, target, &functions, entry_symbol)?
        };
        write_executable(path, bytes)
    }

    /// [`Compiler::emit_exe`], first merging `runtime_bytes` into the
    /// module as declarations exactly like [`Compiler::set_runtime_bc`]
    /// (spec §6: "emit an object or executable (with or without an
    /// embedded runtime module)"), so an executable can resolve symbols a
    /// Fortran-runtime support library provides without the caller
    /// needing to call `set_runtime_bc` separately first.
    pub fn emit_exe_with_runtime(&mut self, path: impl AsRef<Path>, runtime_bytes: &[u8]) -> Result<()> {
        self.set_runtime_bc(runtime_bytes)?;
        self.emit_exe(path)
    }
}

#[cfg(unix)]
fn write_executable(path: impl AsRef<Path>, bytes: Vec<u8>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let path = path.as_ref();
    std::fs::write(path, &bytes).map_err(|e| Error::Backend(e.to_string()))?;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| Error::Backend(e.to_string()))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).map_err(|e| Error::Backend(e.to_string()))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_executable(path: impl AsRef<Path>, bytes: Vec<u8>) -> Result<()> {
    std::fs::write(path, &bytes).map_err(|e| Error::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 1 (spec §8): `define i32 @main() { ret i32 42 }`, looked
    /// up and called, returns 42.
    #[test]
    fn ret42_end_to_end() {
        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler
            .feed_ll(b"define i32 @main() {\nentry:\n  ret i32 42\n}\n")
            .unwrap();
        let addr = compiler.lookup("main").unwrap();
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(), 42);
    }

    /// Scenario 2 (spec §8): `add(17, 25) == 42`.
    #[test]
    fn add_args_end_to_end() {
        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler
            .feed_ll(
                b"define i32 @add(i32 %a, i32 %b) {\nentry:\n  %s = add i32 %a, %b\n  ret i32 %s\n}\n",
            )
            .unwrap();
        let addr = compiler.lookup("add").unwrap();
        let f: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(17, 25), 42);
    }

    #[test]
    fn ir_mode_defers_compilation_until_lookup() {
        let mut compiler = Compiler::create(Config::new().with_policy(Policy::Ir)).unwrap();
        compiler
            .feed_ll(b"define i32 @main() {\nentry:\n  ret i32 42\n}\n")
            .unwrap();
        let addr = compiler.lookup("main").unwrap();
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(), 42);
    }

    #[test]
    fn emit_object_requires_ir_policy() {
        let dir = std::env::temp_dir().join(format!("liric-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let out = dir.join("ret42.o");
        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler
            .feed_ll(b"define i32 @main() {\nentry:\n  ret i32 42\n}\n")
            .unwrap();
        let err = compiler.emit_object(&out).unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    /// Scenario 3 (spec §8): `sum_to(n)` accumulates `1..=n` through a
    /// `phi`-carried loop counter and sum; `sum_to(10) == 55`. Exercises
    /// `icmp sle` + `condbr` on the loop-continuation test, the one path
    /// the `ret42`/`add_args` scenarios never touch.
    #[test]
    fn loop_sum_end_to_end() {
        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler
            .feed_ll(
                b"define i32 @sum_to(i32 %n) {\n\
                  entry:\n\
                  \x20 br label %loop\n\
                  loop:\n\
                  \x20 %i = phi i32 [1, %entry], [%i_next, %loop]\n\
                  \x20 %s = phi i32 [0, %entry], [%s_next, %loop]\n\
                  \x20 %s_next = add i32 %s, %i\n\
                  \x20 %i_next = add i32 %i, 1\n\
                  \x20 %cmp = icmp sle i32 %i_next, %n\n\
                  \x20 condbr i1 %cmp, label %loop, label %done\n\
                  done:\n\
                  \x20 ret i32 %s_next\n\
                  }\n",
            )
            .unwrap();
        let addr = compiler.lookup("sum_to").unwrap();
        let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(10), 55);
    }

    /// Scenario 4 (spec §8): signed-int absolute value via `icmp slt` +
    /// `condbr` + `phi(neg, x)`; `abs_val(-7) == 7`. Exercises a
    /// non-symmetric `icmp` predicate feeding a `phi` merge, unlike
    /// `loop_sum`'s `sle` test which only gates a branch.
    #[test]
    fn abs_val_end_to_end() {
        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler
            .feed_ll(
                b"define i32 @abs_val(i32 %x) {\n\
                  entry:\n\
                  \x20 %cmp = icmp slt i32 %x, 0\n\
                  \x20 condbr i1 %cmp, label %neg, label %done\n\
                  neg:\n\
                  \x20 %n = sub i32 0, %x\n\
                  \x20 br label %done\n\
                  done:\n\
                  \x20 %r = phi i32 [%n, %neg], [%x, %entry]\n\
                  \x20 ret i32 %r\n\
                  }\n",
            )
            .unwrap();
        let addr = compiler.lookup("abs_val").unwrap();
        let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(-7), 7);
    }

    /// Scenario 5 (spec §8): a minimal wasm module exporting
    /// `add(i32, i32) -> i32` as `local.get 0; local.get 1; i32.add; end`;
    /// `add(17, 25) == 42`.
    #[test]
    fn wasm_add_end_to_end() {
        fn uleb(mut v: u32) -> Vec<u8> {
            let mut out = Vec::new();
            loop {
                let byte = (v & 0x7f) as u8;
                v >>= 7;
                if v == 0 {
                    out.push(byte);
                    break;
                }
                out.push(byte | 0x80);
            }
            out
        }
        fn section(id: u8, payload: &[u8]) -> Vec<u8> {
            let mut out = vec![id];
            out.extend(uleb(payload.len() as u32));
            out.extend_from_slice(payload);
            out
        }

        let mut bytes = vec![0x00, 0x61, 0x73, 0x6d, 1, 0, 0, 0];

        let mut type_sec = uleb(1);
        type_sec.push(0x60);
        type_sec.extend(uleb(2));
        type_sec.push(0x7f);
        type_sec.push(0x7f);
        type_sec.extend(uleb(1));
        type_sec.push(0x7f);
        bytes.extend(section(1, &type_sec));

        let mut func_sec = uleb(1);
        func_sec.extend(uleb(0));
        bytes.extend(section(3, &func_sec));

        let mut export_sec = uleb(1);
        export_sec.extend(uleb(3));
        export_sec.extend(b"add");
        export_sec.push(0x00);
        export_sec.extend(uleb(0));
        bytes.extend(section(7, &export_sec));

        let mut body = uleb(0);
        body.push(0x20);
        body.extend(uleb(0));
        body.push(0x20);
        body.extend(uleb(1));
        body.push(0x6a);
        body.push(0x0b);

        let mut code_sec = uleb(1);
        code_sec.extend(uleb(body.len() as u32));
        code_sec.extend(body);
        bytes.extend(section(10, &code_sec));

        let mut compiler = Compiler::create(Config::new()).unwrap();
        compiler.feed_wasm(&bytes).unwrap();
        let addr = compiler.lookup("add").unwrap();
        let f: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(17, 25), 42);
    }

    /// Scenario 6 (spec §8): a static executable returning 42 via the
    /// actual syscall exit path, invoked as a real subprocess.
    #[test]
    fn elf_exec_scenario_exits_42() {
        let dir = std::env::temp_dir().join(format!("liric-exe-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let out = dir.join("ret42.out");
        let mut compiler = Compiler::create(Config::new().with_policy(Policy::Ir)).unwrap();
        compiler
            .feed_ll(b"define i32 @main() {\nentry:\n  ret i32 42\n}\n")
            .unwrap();
        compiler.emit_exe(&out).unwrap();

        if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
            let status = std::process::Command::new(&out).status().unwrap();
            assert_eq!(status.code(), Some(42));
        }
    }
}
