use std::collections::HashMap;

use crate::object::BUILTINS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Builtin,
    Global,
    Local,
    Free,
    /// The enclosing function's own name, loaded with `OpCurrentClosure`.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

impl Symbol {
    fn new(name: &str, scope: SymbolScope, index: usize) -> Self {
        Symbol { name: name.to_string(), scope, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Builtin,
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("'{name}' is already defined in this scope")]
    AlreadyDefined { name: String },
    #[error("builtin '{name}' can only be defined in the builtin table")]
    NotBuiltinTable { name: String },
}

/// One lexical scope. Each table owns its parent, so the chain from the
/// innermost function scope out to the builtin root is a singly linked list
/// that the compiler pushes and pops as it enters and leaves function bodies.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    kind: TableKind,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    /// Original symbols captured by this scope, in free-index order.
    pub free_symbols: Vec<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new_global()
    }
}

impl SymbolTable {
    fn with_kind(kind: TableKind, outer: Option<SymbolTable>) -> Self {
        SymbolTable {
            outer: outer.map(Box::new),
            kind,
            store: HashMap::new(),
            num_definitions: 0,
            free_symbols: Vec::new(),
        }
    }

    /// Root table holding every entry of the builtin registry at its registry index.
    pub fn new_builtins() -> Self {
        let mut table = SymbolTable::with_kind(TableKind::Builtin, None);
        for (index, builtin) in BUILTINS.iter().enumerate() {
            table.store.insert(
                builtin.name.to_string(),
                Symbol::new(builtin.name, SymbolScope::Builtin, index),
            );
        }
        table
    }

    /// Program-level table, enclosed by the builtin root.
    pub fn new_global() -> Self {
        SymbolTable::with_kind(TableKind::Global, Some(SymbolTable::new_builtins()))
    }

    /// Function-body table.
    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable::with_kind(TableKind::Local, Some(outer))
    }

    /// Consume this table, handing back its parent.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    pub fn define(&mut self, name: &str) -> Result<Symbol, SymbolError> {
        // A parameter or local may shadow the function's own name or a
        // variable captured earlier in the body; the capture keeps its slot
        let shadowable = |s: &Symbol| matches!(s.scope, SymbolScope::Function | SymbolScope::Free);
        if self.store.get(name).is_some_and(|s| !shadowable(s)) {
            return Err(SymbolError::AlreadyDefined { name: name.to_string() });
        }
        let scope = match self.kind {
            TableKind::Builtin => SymbolScope::Builtin,
            TableKind::Global => SymbolScope::Global,
            TableKind::Local => SymbolScope::Local,
        };
        let symbol = Symbol::new(name, scope, self.num_definitions);
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Result<Symbol, SymbolError> {
        if self.kind != TableKind::Builtin {
            return Err(SymbolError::NotBuiltinTable { name: name.to_string() });
        }
        let symbol = Symbol::new(name, SymbolScope::Builtin, index);
        self.store.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Function, 0);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol::new(&original.name, SymbolScope::Free, self.free_symbols.len());
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Look `name` up through the scope chain. A hit in an enclosing function
    /// scope is captured as a free variable here, and recursively in every
    /// scope in between.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => Some(self.define_free(symbol)),
        }
    }
}
