//! The front-end data contract.
//!
//! A module is what the bytecode generator hands the runtime: function
//! descriptors, a symbol table resolving names to them, and the registered
//! native builtins with their declared signatures. Re-adding a function under
//! an existing name publishes it as the hot-swap replacement of the previous
//! version, which is how the REPL path redefines functions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::function::Function;
use crate::instruction::NativeFn;
use crate::types::TypeId;

/// A native builtin entry: handler pointer plus declared signature.
pub struct Builtin {
    /// Surface name, shared by type-directed specializations.
    pub name: String,
    /// The native handler.
    pub handler: NativeFn,
    /// Declared parameter types.
    pub params: Vec<TypeId>,
    /// Declared return type.
    pub returns: TypeId,
}

impl Builtin {
    /// Builds a builtin entry.
    pub fn new(
        name: impl Into<String>,
        handler: NativeFn,
        params: Vec<TypeId>,
        returns: TypeId,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            params,
            returns,
        }
    }
}

/// A compiled module.
pub struct Module {
    /// Module name, for diagnostics.
    pub name: String,
    functions: Vec<Arc<Function>>,
    symbols: HashMap<String, usize>,
    builtins: Vec<Builtin>,
}

impl Module {
    /// An empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            symbols: HashMap::new(),
            builtins: Vec::new(),
        }
    }

    /// Adds a function. If the name is already bound, the previous descriptor
    /// gets the new one as its hot-swap replacement and the symbol now
    /// resolves to the new version.
    pub fn add_function(&mut self, function: Arc<Function>) {
        let name = function.name.clone();
        let index = self.functions.len();
        self.functions.push(Arc::clone(&function));

        if let Some(&existing) = self.symbols.get(&name) {
            self.functions[existing].set_replacement(function);
        }
        self.symbols.insert(name, index);
    }

    /// Resolves a function by name, returning its newest version.
    pub fn function(&self, name: &str) -> Option<Arc<Function>> {
        self.symbols
            .get(name)
            .map(|&index| self.functions[index].latest())
    }

    /// All registered functions, in registration order.
    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    /// Registers a builtin entry.
    pub fn add_builtin(&mut self, builtin: Builtin) {
        self.builtins.push(builtin);
    }

    /// The first builtin registered under `name`.
    pub fn builtin(&self, name: &str) -> Option<&Builtin> {
        self.builtins.iter().find(|b| b.name == name)
    }

    /// The builtin registered under `name` whose first parameter matches.
    pub fn builtin_for(&self, name: &str, first_param: TypeId) -> Option<&Builtin> {
        self.builtins
            .iter()
            .find(|b| b.name == name && b.params.first() == Some(&first_param))
    }

    /// All registered builtins.
    pub fn builtins(&self) -> &[Builtin] {
        &self.builtins
    }
}
