//! End-to-end execution: arithmetic, loops, conditionals, nested calls and
//! subscript faults, driven through the synchronous entry point.

use eople_vm::{
    builtins, CallData, FunctionBuilder, Opcode, RuntimeError, Value, VirtualMachine,
};

fn vm() -> VirtualMachine {
    VirtualMachine::new()
}

/// `sum = 0; for i in 1 to 11 by 1: sum = sum + i end; return sum` => 55.
#[test]
fn integer_for_loop_sums_range() {
    let mut f = FunctionBuilder::new("sum_to_ten");
    let zero = f.constant(Value::Int(0));
    let start = f.constant(Value::Int(1));
    let stop = f.constant(Value::Int(11));
    let step = f.constant(Value::Int(1));
    let sum = f.local();
    let i = f.local();

    f.op(Opcode::Store, sum, zero, 0, 0);
    f.op(Opcode::Store, i, start, 0, 0);
    f.op(Opcode::ForI, i, stop, step, 1);
    f.op(Opcode::AddI, sum, i, sum, 0);
    f.op(Opcode::ReturnValue, sum, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let result = vm.execute_function(CallData::call(function, main)).unwrap();
    assert_eq!(result, Value::Int(55));
}

/// `while i < 5: sum += i; i += 1` => 10, with the condition re-evaluated
/// between iterations.
#[test]
fn while_loop_reevaluates_condition() {
    let mut f = FunctionBuilder::new("while_sum");
    let zero = f.constant(Value::Int(0));
    let five = f.constant(Value::Int(5));
    let one = f.constant(Value::Int(1));
    let sum = f.local();
    let i = f.local();
    let cond = f.temp();

    f.op(Opcode::Store, sum, zero, 0, 0);
    f.op(Opcode::Store, i, zero, 0, 0);
    f.op(Opcode::While, cond, 1, 2, 0);
    f.op(Opcode::LessThanI, i, five, cond, 0);
    f.op(Opcode::AddI, sum, i, sum, 0);
    f.op(Opcode::AddI, i, one, i, 0);
    f.op(Opcode::ReturnValue, sum, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let result = vm.execute_function(CallData::call(function, main)).unwrap();
    assert_eq!(result, Value::Int(10));
}

/// An `if / else` compiled to a conditional jump plus a trampoline.
#[test]
fn conditional_jump_selects_branch() {
    let build_max = |a: i64, b: i64| {
        let mut f = FunctionBuilder::new("max");
        let ca = f.constant(Value::Int(a));
        let cb = f.constant(Value::Int(b));
        let m = f.local();
        let cond = f.temp();

        f.op(Opcode::GreaterThanI, ca, cb, cond, 0);
        f.op(Opcode::JumpIf, 2, cond, 0, 0);
        f.op(Opcode::Store, m, ca, 0, 0);
        f.op(Opcode::Jump, 1, 0, 0, 0);
        f.op(Opcode::Store, m, cb, 0, 0);
        f.op(Opcode::ReturnValue, m, 0, 0, 0);
        f.build()
    };

    let vm = vm();
    let main = vm.spawn();
    let hi = vm
        .execute_function(CallData::call(build_max(3, 7), main.clone()))
        .unwrap();
    assert_eq!(hi, Value::Int(7));
    let lo = vm
        .execute_function(CallData::call(build_max(9, 2), main))
        .unwrap();
    assert_eq!(lo, Value::Int(9));
}

/// A nested call's return value is addressable just above the caller's frame.
#[test]
fn local_call_returns_above_caller_frame() {
    let mut callee = FunctionBuilder::new("add_one");
    let x = callee.param();
    let one = callee.constant(Value::Int(1));
    let out = callee.temp();
    callee.op(Opcode::AddI, x, one, out, 0);
    callee.op(Opcode::ReturnValue, out, 0, 0, 0);
    let callee = callee.build();

    let mut caller = FunctionBuilder::new("main");
    let cf = caller.constant(Value::Function(callee));
    let arg = caller.constant(Value::Int(41));
    let result_slot = caller.ccall_slot();
    caller.op(Opcode::FunctionCall, cf, arg, 0, 0);
    caller.op(Opcode::ReturnValue, result_slot, 0, 0, 0);
    let caller = caller.build();

    let vm = vm();
    let main = vm.spawn();
    let result = vm.execute_function(CallData::call(caller, main)).unwrap();
    assert_eq!(result, Value::Int(42));
}

/// Frame bookkeeping is restored after a completed call (frame integrity).
#[test]
fn frame_offsets_restored_after_execution() {
    let mut f = FunctionBuilder::new("noop");
    let c = f.constant(Value::Int(9));
    f.local();
    f.op(Opcode::ReturnValue, c, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    vm.execute_function(CallData::call(function, main.clone()))
        .unwrap();

    let state = main.try_lock_state().expect("process is idle");
    assert_eq!(state.stack.frame_depth(), 0);
    assert_eq!(state.stack.base_offset(), 0);
    assert_eq!(state.stack.top_offset(), 0);
}

#[test]
fn array_subscript_faults_past_the_end() {
    let mut f = FunctionBuilder::new("oob");
    let arr = f.constant(Value::array(vec![Value::Int(1)]));
    let idx = f.constant(Value::Int(5));
    let dest = f.temp();
    f.op(Opcode::ArraySubscript, dest, arr, idx, 0);
    f.op(Opcode::Return, 0, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let err = vm
        .execute_function(CallData::call(function, main))
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::IndexOutOfBounds { index: 5, len: 1, .. }
    ));
}

#[test]
fn dict_subscript_faults_on_missing_key() {
    let mut f = FunctionBuilder::new("miss");
    let dict = f.constant(Value::dict());
    let key = f.constant(Value::str("missing"));
    let dest = f.temp();
    f.op(Opcode::ArraySubscript, dest, dict, key, 0);
    f.op(Opcode::Return, 0, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let err = vm
        .execute_function(CallData::call(function, main))
        .unwrap_err();
    match err {
        RuntimeError::KeyNotFound { key, .. } => assert_eq!(key, "missing"),
        other => panic!("expected KeyNotFound, got {other}"),
    }
}

#[test]
fn string_concat_and_compare() {
    let mut f = FunctionBuilder::new("greet");
    let hello = f.constant(Value::str("hello "));
    let world = f.constant(Value::str("world"));
    let out = f.temp();
    f.op(Opcode::ConcatS, hello, world, out, 0);
    f.op(Opcode::ReturnValue, out, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let result = vm.execute_function(CallData::call(function, main)).unwrap();
    assert_eq!(result, Value::str("hello world"));
}

/// `to_int(to_float(x)) == x` across the exactly-representable range.
#[test]
fn int_float_conversions_round_trip() {
    let mut f = FunctionBuilder::new("round_trip");
    let x = f.param();
    let halfway = f.temp();
    let result = f.ccall_slot();
    f.native(builtins::int_to_float, x, 0, 0, 0);
    f.op(Opcode::Store, halfway, result, 0, 0);
    f.native(builtins::float_to_int, halfway, 0, 0, 0);
    f.op(Opcode::ReturnValue, result, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    let samples: [i64; 7] = [
        0,
        1,
        -1,
        123_456_789,
        -987_654_321,
        1 << 53,
        -(1 << 53),
    ];
    for &x in &samples {
        let result = vm
            .execute_function(
                CallData::call(function.clone(), main.clone()).with_args(vec![Value::Int(x)]),
            )
            .unwrap();
        assert_eq!(result, Value::Int(x), "round trip failed for {x}");
    }
}

/// `to_string` output parses back to the original primitive.
#[test]
fn to_string_round_trips_via_parser() {
    let mut f = FunctionBuilder::new("stringify");
    let x = f.param();
    let result = f.ccall_slot();
    f.native(builtins::int_to_string, x, 0, 0, 0);
    f.op(Opcode::ReturnValue, result, 0, 0, 0);
    let function = f.build();

    let vm = vm();
    let main = vm.spawn();
    for &x in &[0i64, 42, -7, i64::MAX, i64::MIN] {
        let result = vm
            .execute_function(
                CallData::call(function.clone(), main.clone()).with_args(vec![Value::Int(x)]),
            )
            .unwrap();
        let rendered = result.as_str().unwrap();
        let parsed: i64 = rendered.read().parse().unwrap();
        assert_eq!(parsed, x);
    }
}
