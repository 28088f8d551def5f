//! Spawning, asynchronous messages, reply promises, ordering and fault
//! recovery across the worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eople_vm::{
    builtins, CallData, Console, FunctionBuilder, Function, Opcode, Promise, TypeId, Value,
    VirtualMachine, VmConfig,
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

/// An empty process-class constructor whose frame leaves the receiver in
/// slot 0 and the frame top at slot 1, where method parameter regions start.
fn empty_constructor(name: &str) -> Arc<Function> {
    let mut ctor = FunctionBuilder::new(name).constructor();
    ctor.temp();
    ctor.op(Opcode::Return, 0, 0, 0, 0);
    ctor.build()
}

/// Class `Echo` with `say(s) -> s ++ "!"`; main spawns it, sends `say("hi")`
/// and waits on the reply promise. Expected output: a single `hi!` line.
#[test]
fn echo_round_trip_through_reply_promise() {
    let ctor = empty_constructor("Echo");

    let mut say = FunctionBuilder::new("say").method().anchored_at(1);
    let s = say.param();
    let bang = say.constant(Value::str("!"));
    let out = say.temp();
    say.op(Opcode::ConcatS, s, bang, out, 0);
    say.op(Opcode::ReturnValue, out, 0, 0, 0);
    let say = say.returns(TypeId::STR);
    let say = say.build();

    let mut main = FunctionBuilder::new("main");
    let c_ctor = main.constant(Value::Function(ctor));
    let c_say = main.constant(Value::Function(say));
    let c_hi = main.constant(Value::str("hi"));
    let echo = main.local();
    let reply = main.ccall_slot();
    main.op(Opcode::SpawnProcess, echo, c_ctor, 0, 0);
    main.op(Opcode::ProcessMessage, echo, c_say, c_hi, 0);
    main.op(Opcode::ReturnValue, reply, 0, 0, 0);
    let main = main.build();

    let (vm, output) = test_vm();
    vm.run();
    let main_process = vm.spawn();

    let result = vm
        .execute_function(CallData::call(main, main_process.clone()))
        .unwrap();
    let promise = result.as_promise().unwrap();

    assert!(wait_until(Duration::from_secs(2), || promise.is_ready()));
    let value = promise.get_value();
    assert_eq!(value, Value::str("hi!"));

    // Print the reply the way the scenario's main would.
    let mut show = FunctionBuilder::new("show");
    let line = show.param();
    show.native(builtins::print_string, line, 0, 0, 0);
    show.op(Opcode::Return, 0, 0, 0, 0);
    let show = show.build();
    vm.execute_function(CallData::call(show, main_process).with_args(vec![value]))
        .unwrap();

    vm.shutdown().unwrap();
    assert_eq!(output.lines(), vec!["hi!".to_string()]);
}

/// Messages from one sender to one process are handled in send order.
#[test]
fn same_sender_messages_arrive_in_order() {
    let ctor = empty_constructor("Collector");

    let mut log = FunctionBuilder::new("log").method().anchored_at(1);
    let i = log.param();
    log.native(builtins::print_int, i, 0, 0, 0);
    log.op(Opcode::Return, 0, 0, 0, 0);
    let log = log.build();

    let (vm, output) = test_vm();
    vm.run();

    // Spawn through the instruction path so the constructor frame is laid in.
    let mut main = FunctionBuilder::new("main");
    let c_ctor = main.constant(Value::Function(ctor));
    let dest = main.local();
    main.op(Opcode::SpawnProcess, dest, c_ctor, 0, 0);
    main.op(Opcode::ReturnValue, dest, 0, 0, 0);
    let main = main.build();

    let driver = vm.spawn();
    let collector = vm
        .execute_function(CallData::call(main, driver))
        .unwrap()
        .as_process()
        .unwrap();

    const COUNT: i64 = 20;
    for i in 0..COUNT {
        vm.send_message(
            CallData::call(Arc::clone(&log), Arc::clone(&collector))
                .with_args(vec![Value::Int(i)]),
        );
    }

    assert!(wait_until(Duration::from_secs(2), || {
        output.lines().len() == COUNT as usize
    }));
    let expected: Vec<String> = (0..COUNT).map(|i| i.to_string()).collect();
    assert_eq!(output.lines(), expected);

    vm.shutdown().unwrap();
}

/// A subscript fault aborts only the failing message; the process keeps
/// consuming its mailbox.
#[test]
fn process_survives_a_faulting_message() {
    let mut bad = FunctionBuilder::new("bad");
    let arr = bad.constant(Value::array(vec![Value::Int(1)]));
    let idx = bad.constant(Value::Int(99));
    let dest = bad.temp();
    bad.op(Opcode::ArraySubscript, dest, arr, idx, 0);
    bad.op(Opcode::Return, 0, 0, 0, 0);
    let bad = bad.build();

    let mut good = FunctionBuilder::new("good");
    let ok = good.constant(Value::str("still alive"));
    good.native(builtins::print_string, ok, 0, 0, 0);
    good.op(Opcode::Return, 0, 0, 0, 0);
    let good = good.build();

    let (vm, output) = test_vm();
    vm.run();
    let worker = vm.spawn();

    vm.send_message(CallData::call(bad, Arc::clone(&worker)));
    vm.send_message(CallData::call(good, Arc::clone(&worker)));

    assert!(wait_until(Duration::from_secs(2), || {
        !output.lines().is_empty()
    }));
    assert_eq!(output.lines(), vec!["still alive".to_string()]);

    let state = worker.lock_state_with_backoff();
    assert_eq!(state.stack.frame_depth(), 0);
    drop(state);

    vm.shutdown().unwrap();
}

/// A reply promise is built only when the callee returns a value.
#[test]
fn nil_returning_message_gets_no_promise() {
    let mut silent = FunctionBuilder::new("silent").method().anchored_at(1);
    silent.op(Opcode::Return, 0, 0, 0, 0);
    let silent = silent.build();

    let ctor = empty_constructor("Quiet");

    let mut main = FunctionBuilder::new("main");
    let c_ctor = main.constant(Value::Function(ctor));
    let c_silent = main.constant(Value::Function(silent));
    let quiet = main.local();
    let reply = main.ccall_slot();
    main.op(Opcode::SpawnProcess, quiet, c_ctor, 0, 0);
    main.op(Opcode::ProcessMessage, quiet, c_silent, 0, 0);
    main.op(Opcode::ReturnValue, reply, 0, 0, 0);
    let main = main.build();

    let (vm, _output) = test_vm();
    vm.run();
    let driver = vm.spawn();
    let result = vm.execute_function(CallData::call(main, driver)).unwrap();
    assert_eq!(result, Value::Nil);
    vm.shutdown().unwrap();
}

/// Once ready, a promise's flag and value never change (monotonicity).
#[test]
fn promise_stays_ready_with_stable_value() {
    let ctor = empty_constructor("Counter");

    let mut ask = FunctionBuilder::new("ask").method().anchored_at(1);
    let seven = ask.constant(Value::Int(7));
    ask.op(Opcode::ReturnValue, seven, 0, 0, 0);
    let ask = ask.returns(TypeId::INT);
    let ask = ask.build();

    let (vm, _output) = test_vm();
    vm.run();
    let driver = vm.spawn();

    let mut main = FunctionBuilder::new("main");
    let c_ctor = main.constant(Value::Function(ctor));
    let dest = main.local();
    main.op(Opcode::SpawnProcess, dest, c_ctor, 0, 0);
    main.op(Opcode::ReturnValue, dest, 0, 0, 0);
    let main = main.build();
    let counter = vm
        .execute_function(CallData::call(main, Arc::clone(&driver)))
        .unwrap()
        .as_process()
        .unwrap();

    let promise = Promise::new(Arc::clone(&driver));
    vm.send_message(
        CallData::call(ask, counter).with_promise(Arc::clone(&promise)),
    );

    assert!(wait_until(Duration::from_secs(2), || promise.is_ready()));
    for _ in 0..5 {
        assert!(promise.is_ready());
        assert_eq!(promise.get_value(), Value::Int(7));
        std::thread::sleep(Duration::from_millis(2));
    }

    vm.shutdown().unwrap();
}
