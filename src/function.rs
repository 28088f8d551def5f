//! Function descriptors.
//!
//! A descriptor is immutable once published by the front-end, except for the
//! hot-swap slot. The stack layout of one activation is
//! `[receiver?][parameters][constants][locals][temporaries]`; all boundary
//! counts are published by the front-end and never recomputed by the VM.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::instruction::Instruction;
use crate::types::TypeId;
use crate::value::Value;

/// An executable function produced by the front-end.
#[derive(Debug)]
pub struct Function {
    /// Symbol name, used for lookups and diagnostics.
    pub name: String,
    /// Ordered instruction sequence.
    pub code: Vec<Instruction>,
    /// Owned constant pool, copied into each activation's frame.
    pub constants: Vec<Value>,

    /// Start of the parameter region (1 when slot 0 holds a receiver).
    pub parameters_start: usize,
    /// Start of the constant region.
    pub constants_start: usize,
    /// Start of the locals region.
    pub locals_start: usize,
    /// Start of the temporaries region.
    pub temp_start: usize,
    /// One past the last temporary.
    pub temp_end: usize,
    /// Slots the activation adds above the caller's top:
    /// `temp_end - parameters_start`.
    pub storage_requirement: usize,

    /// Declared return type. `TypeId::NIL` means no reply promise is built
    /// for asynchronous calls.
    pub return_type: TypeId,

    /// Methods and when-evals run in the enclosing frame's base.
    pub reuse_context: bool,
    /// Constructors receive the new process handle in slot 0 and take their
    /// arguments starting at operand C of the spawn instruction.
    pub is_constructor: bool,
    /// Evaluation function of a `when`/`whenever` block.
    pub is_when_eval: bool,
    /// Incrementally recompiled top-level function (REPL path).
    pub is_repl: bool,

    /// Hot-swap slot; set by the front-end when it produces a newer version.
    replacement: RwLock<Option<Arc<Function>>>,
}

impl Function {
    /// Number of declared parameters.
    pub fn parameter_count(&self) -> usize {
        self.constants_start - self.parameters_start
    }

    /// Number of pooled constants.
    pub fn constant_count(&self) -> usize {
        self.locals_start - self.constants_start
    }

    /// Number of local slots.
    pub fn locals_count(&self) -> usize {
        self.temp_start - self.locals_start
    }

    /// Number of slots a closure snapshot covers (parameters, constants and
    /// locals).
    pub fn capture_count(&self) -> usize {
        self.temp_start - self.parameters_start
    }

    /// Publishes a replacement body for hot swapping.
    pub fn set_replacement(&self, newer: Arc<Function>) {
        *self.replacement.write() = Some(newer);
    }

    /// The directly registered replacement, if any.
    pub fn replacement(&self) -> Option<Arc<Function>> {
        self.replacement.read().clone()
    }

    /// Follows the replacement chain to the newest version of this function.
    pub fn latest(self: &Arc<Function>) -> Arc<Function> {
        let mut current = Arc::clone(self);
        while let Some(newer) = current.replacement() {
            current = newer;
        }
        current
    }
}

/// All the fields of a [`Function`] except the hot-swap slot, for construction
/// by the front-end or the [`crate::builder::FunctionBuilder`].
#[derive(Debug, Default)]
pub struct FunctionSpec {
    pub name: String,
    pub code: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub parameters_start: usize,
    pub constants_start: usize,
    pub locals_start: usize,
    pub temp_start: usize,
    pub temp_end: usize,
    pub storage_requirement: usize,
    pub return_type: TypeId,
    pub reuse_context: bool,
    pub is_constructor: bool,
    pub is_when_eval: bool,
    pub is_repl: bool,
}

impl FunctionSpec {
    /// Freezes the spec into a shareable descriptor.
    pub fn build(self) -> Arc<Function> {
        Arc::new(Function {
            name: self.name,
            code: self.code,
            constants: self.constants,
            parameters_start: self.parameters_start,
            constants_start: self.constants_start,
            locals_start: self.locals_start,
            temp_start: self.temp_start,
            temp_end: self.temp_end,
            storage_requirement: self.storage_requirement,
            return_type: self.return_type,
            reuse_context: self.reuse_context,
            is_constructor: self.is_constructor,
            is_when_eval: self.is_when_eval,
            is_repl: self.is_repl,
            replacement: RwLock::new(None),
        })
    }
}
