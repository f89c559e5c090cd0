//! Name -> address bindings the JIT resolves patch lists against (spec
//! §4.7). Entries start out lazy (bound to a trampoline) and get
//! repointed to the real function body once it's materialized.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolFlags {
    /// Set until the symbol's first call forces materialization; cleared
    /// once `SymbolTable::set_address` repoints it at real code.
    pub is_lazy: bool,
    /// Set for symbols registered via `Compiler::add_symbol`/
    /// `load_library` rather than compiled from fed IR.
    pub is_external: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct SymbolEntry {
    pub address: usize,
    pub flags: SymbolFlags,
}

/// Every symbol the session currently knows an address for, keyed by
/// name (matching `liric_ir`'s interned symbol strings, not `SymbolId`,
/// since the table outlives any one `Module` it was populated from).
#[derive(Default)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolEntry>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, address: usize, flags: SymbolFlags) {
        self.entries.insert(name.into(), SymbolEntry { address, flags });
    }

    pub fn get(&self, name: &str) -> Option<SymbolEntry> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Repoints an existing entry (or inserts a fresh non-lazy one) at a
    /// freshly materialized address. Used both for a function's first
    /// real compile and for re-resolving a trampoline after a lazy call.
    pub fn set_address(&mut self, name: &str, address: usize) {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.address = address;
                entry.flags.is_lazy = false;
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    SymbolEntry {
                        address,
                        flags: SymbolFlags::default(),
                    },
                );
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_address_clears_lazy_flag() {
        let mut table = SymbolTable::new();
        table.add(
            "foo",
            0,
            SymbolFlags {
                is_lazy: true,
                is_external: false,
            },
        );
        table.set_address("foo", 0x1000);
        let entry = table.get("foo").unwrap();
        assert_eq!(entry.address, 0x1000);
        assert!(!entry.flags.is_lazy);
    }

    #[test]
    fn missing_symbol_is_none() {
        let table = SymbolTable::new();
        assert!(table.get("nope").is_none());
    }
}
