//! Stack discipline observed through real execution: alignment across
//! growth, frame restoration under nesting, and incremental shifts.

use std::sync::Arc;

use eople_vm::{
    CallData, FunctionBuilder, Opcode, ProcessStack, Value, VirtualMachine,
};

/// Deep nesting forces several reallocations; the buffer must stay 64-byte
/// aligned and every frame must unwind to where it started.
#[test]
fn growth_keeps_alignment_and_frames_unwind() {
    // leaf: return 1
    let mut leaf = FunctionBuilder::new("leaf");
    let one = leaf.constant(Value::Int(1));
    for _ in 0..24 {
        leaf.temp();
    }
    leaf.op(Opcode::ReturnValue, one, 0, 0, 0);
    let leaf = leaf.build();

    // wrap: return leaf() + 1
    let wrap = |inner: Arc<eople_vm::Function>, name: &str| {
        let mut f = FunctionBuilder::new(name);
        let cf = f.constant(Value::Function(inner));
        let one = f.constant(Value::Int(1));
        for _ in 0..24 {
            f.temp();
        }
        let result = f.ccall_slot();
        let out: u16 = 2; // first temp slot
        f.op(Opcode::FunctionCall, cf, 0, 0, 0);
        f.op(Opcode::AddI, result, one, out, 0);
        f.op(Opcode::ReturnValue, out, 0, 0, 0);
        f.build()
    };

    let mut chain = leaf;
    for depth in 0..6 {
        chain = wrap(chain, &format!("wrap{depth}"));
    }

    let vm = VirtualMachine::new();
    let main = vm.spawn();
    let result = vm.execute_function(CallData::call(chain, main.clone())).unwrap();
    assert_eq!(result, Value::Int(7));

    let state = main.try_lock_state().expect("process is idle");
    assert_eq!(state.stack.buffer_addr() % 64, 0);
    assert_eq!(state.stack.frame_depth(), 0);
    assert_eq!(state.stack.base_offset(), 0);
    assert_eq!(state.stack.top_offset(), 0);
}

/// Running the shift twice against the same new layout leaves the stack
/// exactly as one run did.
#[test]
fn incremental_shift_is_idempotent_for_a_fixed_layout() {
    // v2 layout: constants [10, 20], one local.
    let mut v2 = FunctionBuilder::new("v2").repl();
    v2.constant(Value::Int(10));
    v2.constant(Value::Int(20));
    v2.local();
    v2.op(Opcode::Return, 0, 0, 0, 0);
    let v2 = v2.build();

    // Stack as v1 left it: constant 10 at slot 0, live local 7 at slot 1.
    let mut stack = ProcessStack::new();
    stack.setup_frame(&v2).unwrap();
    *stack.abs_mut(0) = Value::Int(10);
    *stack.abs_mut(1) = Value::Int(7);

    // First increment: one constant and one local were live before.
    let shifted = stack.incremental_stack_shift(&v2, 1, 1).unwrap();
    assert!(shifted);
    assert_eq!(*stack.abs(0), Value::Int(10));
    assert_eq!(*stack.abs(1), Value::Int(20));
    assert_eq!(*stack.abs(2), Value::Int(7));

    // Re-running with the now-current counts changes nothing.
    let shifted_again = stack.incremental_stack_shift(&v2, 2, 1).unwrap();
    assert!(!shifted_again);
    assert_eq!(*stack.abs(0), Value::Int(10));
    assert_eq!(*stack.abs(1), Value::Int(20));
    assert_eq!(*stack.abs(2), Value::Int(7));
}
