//! Programmatic construction of function descriptors.
//!
//! The builder stands in for the bytecode generator: it allocates frame slots
//! in layout order, pools constants, emits instructions and publishes the
//! layout counts the VM requires. Declare storage before emitting code, in
//! layout order (parameters, constants, locals, temporaries), so slot offsets
//! are final when they are referenced.

use std::sync::Arc;

use crate::function::{Function, FunctionSpec};
use crate::instruction::{Instruction, NativeFn, Opcode, Operand};
use crate::types::TypeId;
use crate::value::Value;

/// Builds one [`Function`].
pub struct FunctionBuilder {
    name: String,
    anchor: Option<usize>,
    has_receiver: bool,
    params: usize,
    constants: Vec<Value>,
    locals: usize,
    temps: usize,
    code: Vec<Instruction>,
    return_type: TypeId,
    reuse_context: bool,
    is_constructor: bool,
    is_when_eval: bool,
    is_repl: bool,
}

impl FunctionBuilder {
    /// A builder for a free function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            anchor: None,
            has_receiver: false,
            params: 0,
            constants: Vec::new(),
            locals: 0,
            temps: 0,
            code: Vec::new(),
            return_type: TypeId::NIL,
            reuse_context: false,
            is_constructor: false,
            is_when_eval: false,
            is_repl: false,
        }
    }

    /// Marks this as a process-class constructor: slot 0 holds the receiver
    /// and arguments arrive starting at operand C of the spawn instruction.
    pub fn constructor(mut self) -> Self {
        self.is_constructor = true;
        self.has_receiver = true;
        self
    }

    /// Marks this as a method: it reuses the constructor frame's base, so
    /// class state stays addressable at its constructor offsets.
    pub fn method(mut self) -> Self {
        self.reuse_context = true;
        self.has_receiver = true;
        self
    }

    /// Marks this as the evaluation function of a `when`/`whenever` block.
    pub fn when_eval(mut self) -> Self {
        self.is_when_eval = true;
        self.reuse_context = true;
        self
    }

    /// Marks this as an incrementally recompiled REPL function.
    pub fn repl(mut self) -> Self {
        self.is_repl = true;
        self
    }

    /// Anchors the parameter region at an explicit offset, for methods of
    /// classes whose constructor frame holds member slots.
    pub fn anchored_at(mut self, parameters_start: usize) -> Self {
        self.anchor = Some(parameters_start);
        self
    }

    /// Declares the return type.
    pub fn returns(mut self, return_type: TypeId) -> Self {
        self.return_type = return_type;
        self
    }

    fn parameters_start(&self) -> usize {
        self.anchor.unwrap_or(usize::from(self.has_receiver))
    }

    fn constants_start(&self) -> usize {
        self.parameters_start() + self.params
    }

    fn locals_start(&self) -> usize {
        self.constants_start() + self.constants.len()
    }

    fn temp_start(&self) -> usize {
        self.locals_start() + self.locals
    }

    fn temp_end(&self) -> usize {
        self.temp_start() + self.temps
    }

    /// Declares the next parameter; returns its slot offset.
    pub fn param(&mut self) -> Operand {
        debug_assert!(
            self.constants.is_empty() && self.locals == 0 && self.temps == 0,
            "declare parameters before constants, locals and temporaries"
        );
        let offset = self.parameters_start() + self.params;
        self.params += 1;
        offset as Operand
    }

    /// Pools a constant; returns its slot offset.
    pub fn constant(&mut self, value: Value) -> Operand {
        debug_assert!(
            self.locals == 0 && self.temps == 0,
            "declare constants before locals and temporaries"
        );
        let offset = self.constants_start() + self.constants.len();
        self.constants.push(value);
        offset as Operand
    }

    /// Declares the next local; returns its slot offset.
    pub fn local(&mut self) -> Operand {
        debug_assert!(self.temps == 0, "declare locals before temporaries");
        let offset = self.locals_start() + self.locals;
        self.locals += 1;
        offset as Operand
    }

    /// Declares the next temporary; returns its slot offset.
    pub fn temp(&mut self) -> Operand {
        let offset = self.temp_start() + self.temps;
        self.temps += 1;
        offset as Operand
    }

    /// The slot where native builtins and non-method calls leave their
    /// result, relative to this function's frame base.
    pub fn ccall_slot(&self) -> Operand {
        let slot = if self.is_constructor {
            self.temp_end() - 1
        } else {
            self.temp_end()
        };
        slot as Operand
    }

    /// Index the next emitted instruction will get.
    pub fn next_index(&self) -> usize {
        self.code.len()
    }

    /// Emits a bytecode instruction; returns its index for later patching.
    pub fn op(&mut self, opcode: Opcode, a: Operand, b: Operand, c: Operand, d: Operand) -> usize {
        self.code.push(Instruction::new(opcode, a, b, c, d));
        self.code.len() - 1
    }

    /// Emits a native-builtin instruction; returns its index.
    pub fn native(&mut self, handler: NativeFn, a: Operand, b: Operand, c: Operand, d: Operand) -> usize {
        self.code.push(Instruction::native(handler, a, b, c, d));
        self.code.len() - 1
    }

    /// Patches operand A of an already emitted instruction (jump offsets).
    pub fn patch_a(&mut self, index: usize, value: Operand) {
        self.code[index].a = value;
    }

    /// Patches operand B (condition segment lengths).
    pub fn patch_b(&mut self, index: usize, value: Operand) {
        self.code[index].b = value;
    }

    /// Patches operand C (body lengths).
    pub fn patch_c(&mut self, index: usize, value: Operand) {
        self.code[index].c = value;
    }

    /// Patches operand D (loop body lengths).
    pub fn patch_d(&mut self, index: usize, value: Operand) {
        self.code[index].d = value;
    }

    /// Freezes the layout and code into a function descriptor.
    pub fn build(self) -> Arc<Function> {
        let parameters_start = self.parameters_start();
        let constants_start = self.constants_start();
        let locals_start = self.locals_start();
        let temp_start = self.temp_start();
        let temp_end = self.temp_end();
        FunctionSpec {
            name: self.name,
            code: self.code,
            constants: self.constants,
            parameters_start,
            constants_start,
            locals_start,
            temp_start,
            temp_end,
            storage_requirement: temp_end - parameters_start,
            return_type: self.return_type,
            reuse_context: self.reuse_context,
            is_constructor: self.is_constructor,
            is_when_eval: self.is_when_eval,
            is_repl: self.is_repl,
        }
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_counts_follow_declarations() {
        let mut b = FunctionBuilder::new("f");
        let p = b.param();
        let c = b.constant(Value::Int(1));
        let l = b.local();
        let t = b.temp();
        b.op(Opcode::Return, 0, 0, 0, 0);
        let f = b.build();

        assert_eq!((p, c, l, t), (0, 1, 2, 3));
        assert_eq!(f.parameters_start, 0);
        assert_eq!(f.constants_start, 1);
        assert_eq!(f.locals_start, 2);
        assert_eq!(f.temp_start, 3);
        assert_eq!(f.temp_end, 4);
        assert_eq!(f.storage_requirement, 4);
        assert_eq!(f.parameter_count(), 1);
        assert_eq!(f.constant_count(), 1);
        assert_eq!(f.locals_count(), 1);
    }

    #[test]
    fn receiver_shifts_the_frame() {
        let mut b = FunctionBuilder::new("ctor").constructor();
        let p = b.param();
        b.op(Opcode::Return, 0, 0, 0, 0);
        let f = b.build();

        assert_eq!(p, 1);
        assert_eq!(f.parameters_start, 1);
        assert_eq!(f.storage_requirement, f.temp_end - 1);
    }
}
