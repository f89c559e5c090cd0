//! `Compiler::load_library` (spec §5: "Dlopen'ed libraries add their
//! symbols to a process-wide table used as a fallback") and spec §6's
//! "load a shared library (adds all its symbols)".
//!
//! Loading happens in two steps: `libloading::Library::new` maps the
//! `.so` and runs its dynamic linker fixups (resolving its own imports
//! against whatever is already loaded in the process), and `object`
//! reads the same file's `.dynsym` to enumerate which names it actually
//! exports, so `Compiler` knows what to forward into the session's
//! symbol table without needing the caller to name each symbol up
//! front — the `object`-crate-for-reading-symbol-tables idiom the
//! `wasmtime-jit` manifest in the retrieval pack uses.

use libloading::Library;
use object::{Object, ObjectSymbol};
use std::fmt;
use std::path::Path;

#[derive(Debug)]
pub enum LibraryError {
    Load(String),
    Parse(String),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::Load(m) => write!(f, "failed to load shared library: {m}"),
            LibraryError::Parse(m) => write!(f, "failed to read shared library symbols: {m}"),
        }
    }
}

impl std::error::Error for LibraryError {}

/// A shared library kept alive for the remaining lifetime of the
/// [`crate::Compiler`] that loaded it: `libloading::Library` unmaps on
/// `Drop`, and every address `exported_symbols` hands out is only valid
/// while the mapping is live.
pub struct LoadedLibrary {
    _handle: Library,
    pub exported_symbols: Vec<(String, usize)>,
}

/// Loads `path` and resolves every defined, global, function/object
/// dynamic symbol it exports to an address in the now-mapped library.
pub fn load(path: &Path) -> Result<LoadedLibrary, LibraryError> {
    let bytes = std::fs::read(path).map_err(|e| LibraryError::Load(e.to_string()))?;
    let names = exported_names(&bytes)?;

    // SAFETY: running a shared library's static initializers is an
    // inherent part of dynamic loading; the caller accepted this when it
    // asked to load an arbitrary `.so` by path.
    let handle = unsafe { Library::new(path) }.map_err(|e| LibraryError::Load(e.to_string()))?;

    let mut exported_symbols = Vec::with_capacity(names.len());
    for name in names {
        // SAFETY: `name` came from the library's own dynamic symbol
        // table, so a lookup failure here would mean the loader and
        // `object`'s view of the file disagree, not a dangling pointer.
        let addr = unsafe { handle.get::<*const ()>(name.as_bytes()) };
        if let Ok(sym) = addr {
            exported_symbols.push((name, *sym as usize));
        }
    }

    Ok(LoadedLibrary {
        _handle: handle,
        exported_symbols,
    })
}

fn exported_names(bytes: &[u8]) -> Result<Vec<String>, LibraryError> {
    let file = object::File::parse(bytes).map_err(|e| LibraryError::Parse(e.to_string()))?;
    let mut names = Vec::new();
    for sym in file.dynamic_symbols() {
        if sym.is_undefined() || !sym.is_global() {
            continue;
        }
        if let Ok(name) = sym.name() {
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
