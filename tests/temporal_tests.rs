//! Timers and the `when` / `whenever` temporal forms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eople_vm::{
    builtins, CallData, Console, FunctionBuilder, Opcode, Value, VirtualMachine, VmConfig,
};

fn test_vm() -> (VirtualMachine, eople_vm::CapturedOutput) {
    let (console, output) = Console::capture();
    let vm = VirtualMachine::with_config(VmConfig {
        workers: Some(2),
        console,
        ..VmConfig::default()
    });
    (vm, output)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// A plain wake-up: no function, no promise. Processing it only re-evaluates
/// pending temporal blocks.
fn wake(target: &Arc<eople_vm::Process>) -> CallData {
    CallData {
        function: None,
        target: Arc::clone(target),
        args: Vec::new(),
        promise: None,
        earliest: Instant::now(),
    }
}

/// `p = after(50); whenever is_ready(p): return end`: the body executes
/// exactly once, no earlier than the timer, and removes itself.
#[test]
fn whenever_fires_once_on_timer_and_removes_itself() {
    // Evaluation function; shares the registering frame's layout:
    // constants at 0..3, the promise local at 3, native results at 4.
    let mut eval = FunctionBuilder::new("whenever_eval").when_eval();
    eval.constant(Value::Int(50));
    eval.constant(Value::Nil); // placeholder for the eval-function slot
    eval.constant(Value::str("fired"));
    let p = eval.local();
    let cond = eval.ccall_slot();
    eval.op(Opcode::Whenever, cond, 1, 2, 0);
    eval.native(builtins::promise_is_ready, p, 0, 0, 0);
    eval.native(builtins::print_string, 2, 0, 0, 0);
    eval.op(Opcode::Return, 0, 0, 0, 0);
    let eval = eval.build();

    let mut main = FunctionBuilder::new("main");
    let ms = main.constant(Value::Int(50));
    let c_eval = main.constant(Value::Function(Arc::clone(&eval)));
    main.constant(Value::str("fired"));
    let p_local = main.local();
    let result = main.ccall_slot();
    main.native(builtins::timer_after, ms, 0, 0, 0);
    main.op(Opcode::Store, p_local, result, 0, 0);
    main.op(Opcode::WheneverRegister, c_eval, 0, 0, 0);
    main.op(Opcode::Return, 0, 0, 0, 0);
    let main = main.build();

    let (vm, output) = test_vm();
    vm.run();
    let process = vm.spawn();

    let registered_at = Instant::now();
    vm.execute_function(CallData::call(main, Arc::clone(&process)))
        .unwrap();

    assert!(wait_until(Duration::from_millis(1500), || {
        !output.lines().is_empty()
    }));
    assert!(
        registered_at.elapsed() >= Duration::from_millis(45),
        "whenever fired before its timer"
    );
    assert_eq!(output.lines(), vec!["fired".to_string()]);

    // The block removed itself; further messages must not re-fire it.
    vm.send_message(wake(&process));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(output.lines(), vec!["fired".to_string()]);

    let state = process.lock_state_with_backoff();
    assert!(state.whenever_blocks.is_empty());
    drop(state);

    vm.shutdown().unwrap();
}

/// Two one-shot `when`s on two timers print exactly one "a" and one "b",
/// in either order, and leave the pending set empty.
#[test]
fn when_fires_at_most_once_each() {
    let build_eval = |name: &str, promise_slot: u16, text_slot: u16| {
        let mut eval = FunctionBuilder::new(name).when_eval();
        for _ in 0..3 {
            eval.constant(Value::Nil);
        }
        eval.constant(Value::str("a"));
        eval.constant(Value::str("b"));
        eval.local();
        eval.local();
        let cond = eval.ccall_slot();
        eval.op(Opcode::When, cond, 1, 1, 0);
        eval.native(builtins::promise_is_ready, promise_slot, 0, 0, 0);
        eval.native(builtins::print_string, text_slot, 0, 0, 0);
        eval.build()
    };
    let eval_a = build_eval("when_a", 5, 3);
    let eval_b = build_eval("when_b", 6, 4);

    let mut main = FunctionBuilder::new("main");
    let ms = main.constant(Value::Int(10));
    let c_eval_a = main.constant(Value::Function(eval_a));
    let c_eval_b = main.constant(Value::Function(eval_b));
    main.constant(Value::str("a"));
    main.constant(Value::str("b"));
    let p1 = main.local();
    let p2 = main.local();
    let result = main.ccall_slot();
    main.native(builtins::timer_after, ms, 0, 0, 0);
    main.op(Opcode::Store, p1, result, 0, 0);
    main.native(builtins::timer_after, ms, 0, 0, 0);
    main.op(Opcode::Store, p2, result, 0, 0);
    main.op(Opcode::WhenRegister, c_eval_a, 0, 0, 0);
    main.op(Opcode::WhenRegister, c_eval_b, 0, 0, 0);
    main.op(Opcode::Return, 0, 0, 0, 0);
    let main = main.build();

    let (vm, output) = test_vm();
    vm.run();
    let process = vm.spawn();
    vm.execute_function(CallData::call(main, Arc::clone(&process)))
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        output.lines().len() >= 2
    }));
    // Settle, then check nothing fires twice.
    std::thread::sleep(Duration::from_millis(50));
    vm.send_message(wake(&process));
    std::thread::sleep(Duration::from_millis(50));

    let mut lines = output.lines();
    lines.sort();
    assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);

    let state = process.lock_state_with_backoff();
    assert!(state.when_blocks.is_empty());
    drop(state);

    vm.shutdown().unwrap();
}

/// A `whenever` body's mutations survive to its next evaluation through the
/// captured closure, and re-evaluation happens once per message.
#[test]
fn whenever_closure_carries_mutations_across_messages() {
    // Frame layout: true@0, eval@1, one@2, zero@3, count@4, results at 5.
    let mut eval = FunctionBuilder::new("count_eval").when_eval();
    let c_true = eval.constant(Value::Bool(true));
    eval.constant(Value::Nil);
    let one = eval.constant(Value::Int(1));
    eval.constant(Value::Int(0));
    let count = eval.local();
    eval.op(Opcode::Whenever, c_true, 0, 2, 0);
    eval.op(Opcode::AddI, count, one, count, 0);
    eval.native(builtins::print_int, count, 0, 0, 0);
    let eval = eval.build();

    let mut main = FunctionBuilder::new("main");
    main.constant(Value::Bool(true));
    let c_eval = main.constant(Value::Function(Arc::clone(&eval)));
    main.constant(Value::Int(1));
    let zero = main.constant(Value::Int(0));
    let count_local = main.local();
    main.op(Opcode::Store, count_local, zero, 0, 0);
    main.op(Opcode::WheneverRegister, c_eval, 0, 0, 0);
    main.op(Opcode::Return, 0, 0, 0, 0);
    let main = main.build();

    let (vm, output) = test_vm();
    vm.run();
    let process = vm.spawn();
    vm.execute_function(CallData::call(main, Arc::clone(&process)))
        .unwrap();

    for _ in 0..3 {
        vm.send_message(wake(&process));
    }

    assert!(wait_until(Duration::from_secs(2), || {
        output.lines().len() == 3
    }));
    assert_eq!(
        output.lines(),
        vec!["1".to_string(), "2".to_string(), "3".to_string()]
    );

    vm.shutdown().unwrap();
}
