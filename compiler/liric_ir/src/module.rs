use crate::function::Function;
use crate::global::Global;
use crate::ids::{FunctionId, GlobalId, SymbolId};
use crate::symbol::SymbolTable;
use crate::types::Type;
use liric_arena::Arena;
use liric_utils::index_vec::IdxVec;
use tracing::{info, instrument};

/// A compilation unit: an arena, the function and global lists it owns,
/// and the symbol table that interns every global name.
///
/// `Module` borrows its arena rather than owning it directly (mirroring
/// how `inkwell::module::Module<'ctx>` borrows its owning `Context`):
/// every arena-backed reference inside a `Function`/`Global`/`Type`
/// carries the same `'a`, so the borrow checker enforces the spec's
/// "module exclusively owns its arena" rule for free — a `Module<'a>`
/// simply cannot outlive the `Arena` it was built from. Dropping the
/// `Arena` after the `Module` frees every chunk, and with it every IR
/// node, in one step.
#[derive(Debug)]
pub struct Module<'a> {
    arena: &'a Arena,
    name: String,
    functions: IdxVec<FunctionId, Function<'a>>,
    globals: IdxVec<GlobalId, Global<'a>>,
    symbols: SymbolTable,
    function_index: std::collections::HashMap<SymbolId, FunctionId>,
    global_index: std::collections::HashMap<SymbolId, GlobalId>,
}

impl<'a> Module<'a> {
    pub fn new(arena: &'a Arena, name: impl Into<String>) -> Self {
        Module {
            arena,
            name: name.into(),
            functions: IdxVec::new(),
            globals: IdxVec::new(),
            symbols: SymbolTable::new(),
            function_index: std::collections::HashMap::new(),
            global_index: std::collections::HashMap::new(),
        }
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbols.name(id)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Type constructors sharing the module's arena. Primitive variants
    /// are plain enum tags (no interning needed); composite types are
    /// carved out of the arena and compared structurally by the caller.
    pub fn array_ty(&self, elem: Type<'a>, count: u64) -> Type<'a> {
        Type::Array(self.arena.alloc_val(elem), count)
    }

    pub fn struct_ty(&self, fields: &[Type<'a>], packed: bool) -> Type<'a> {
        Type::Struct(self.arena.alloc_slice_copy(fields), packed)
    }

    pub fn function_ty(&self, ret: Type<'a>, params: &[Type<'a>], vararg: bool) -> Type<'a> {
        Type::Function(
            self.arena.alloc_val(ret),
            self.arena.alloc_slice_copy(params),
            vararg,
        )
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        ret_ty: Type<'a>,
        param_tys: &[Type<'a>],
        vararg: bool,
    ) -> FunctionId {
        let symbol = self.intern(name);
        if let Some(&existing) = self.function_index.get(&symbol) {
            return existing;
        }
        let owned_name = self.arena.strdup(name.as_bytes());
        let owned_params = self.arena.alloc_slice_copy(param_tys);
        let sig = self.function_ty(ret_ty, param_tys, vararg);
        let func = Function::new_declaration(symbol, owned_name, sig, ret_ty, owned_params, vararg);
        let id = self.functions.push(func);
        self.function_index.insert(symbol, id);
        id
    }

    pub fn function(&self, id: FunctionId) -> &Function<'a> {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function<'a> {
        &mut self.functions[id]
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        let symbol = self.symbols.lookup(name)?;
        self.function_index.get(&symbol).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function<'a>)> {
        self.functions.iter_enumerated()
    }

    pub fn declare_global(
        &mut self,
        name: &str,
        ty: Type<'a>,
        initializer: Option<&[u8]>,
        flags: crate::global::GlobalFlags,
    ) -> GlobalId {
        let symbol = self.intern(name);
        if let Some(&existing) = self.global_index.get(&symbol) {
            return existing;
        }
        let owned_name = self.arena.strdup(name.as_bytes());
        let owned_init = initializer.map(|bytes| &*self.arena.alloc_slice_copy(bytes));
        let global = Global {
            symbol,
            name: owned_name,
            ty,
            initializer: owned_init,
            relocations: Vec::new(),
            flags,
        };
        let id = self.globals.push(global);
        self.global_index.insert(symbol, id);
        id
    }

    pub fn global(&self, id: GlobalId) -> &Global<'a> {
        &self.globals[id]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut Global<'a> {
        &mut self.globals[id]
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        let symbol = self.symbols.lookup(name)?;
        self.global_index.get(&symbol).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global<'a>)> {
        self.globals.iter_enumerated()
    }

    /// Merges `other` into `self`. Declarations in `self` are replaced
    /// by definitions of the same name found in `other`; two *definitions*
    /// of the same name is an error. Symbol ids are remapped through
    /// `self`'s intern table as required by the spec's "Symbol
    /// interning" rule, since `other`'s ids are meaningless once its
    /// arena is gone.
    #[instrument(level = "info", skip(self, other))]
    pub fn merge(&mut self, other: Module<'a>) -> Result<(), String> {
        for (_, func) in other.functions() {
            match self.find_function(func.name) {
                Some(existing_id) => {
                    let existing = self.function(existing_id);
                    if !existing.is_decl && !func.is_decl {
                        return Err(format!(
                            "conflicting definitions of function `{}`",
                            func.name
                        ));
                    }
                    if existing.is_decl && !func.is_decl {
                        info!(name = func.name, "merge: definition replaces declaration");
                        *self.function_mut(existing_id) = func.clone();
                    }
                }
                None => {
                    info!(name = func.name, "merge: new function");
                    let id = self.declare_function(func.name, func.ret_ty, func.param_tys, func.vararg);
                    if !func.is_decl {
                        *self.function_mut(id) = func.clone();
                    }
                }
            }
        }

        for (_, global) in other.globals() {
            if self.find_global(global.name).is_none() {
                info!(name = global.name, "merge: new global");
                self.declare_global(global.name, global.ty, global.initializer, global.flags);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_function_is_idempotent_by_name() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let a = module.declare_function("f", Type::I32, &[], false);
        let b = module.declare_function("f", Type::I32, &[], false);
        assert_eq!(a, b);
    }

    #[test]
    fn merge_replaces_declaration_with_definition() {
        let arena_a = Arena::new();
        let arena_b = Arena::new();
        let mut dest = Module::new(&arena_a, "dest");
        dest.declare_function("f", Type::I32, &[], false);

        let mut src = Module::new(&arena_b, "src");
        let fid = src.declare_function("f", Type::I32, &[], false);
        src.function_mut(fid).begin_definition();

        dest.merge(src).unwrap();
        assert!(!dest.function(dest.find_function("f").unwrap()).is_decl);
    }
}
