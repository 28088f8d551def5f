//! The virtual machine: worker pool, mailbox queues and execution paths.
//!
//! Workers steal round-robin across all mailbox queues starting from their
//! own index, try-locking queues and processes so no worker ever blocks on
//! another. A batch of up to [`VmConfig::batch_size`] consecutive messages
//! for one process is drained per queue visit; messages whose earliest-run
//! instant has not arrived are re-enqueued at the tail. After every message a
//! process's pending `when`/`whenever` blocks are re-evaluated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::console::Console;
use crate::error::{RuntimeError, RuntimeResult};
use crate::function::Function;
use crate::instruction::Instruction;
use crate::jump_table;
use crate::process::{CallSite, Process, ProcessState, WhenBlock};
use crate::promise::Promise;
use crate::value::Value;

/// Fruitless sweeps over all queues before a worker considers parking.
const MAX_RETRIES: u32 = 10;
/// Spin attempts on a contended queue before napping.
const SEND_RETRY_LIMIT: u32 = 50;
/// Nap length for contended-lock backoff.
const RETRY_NAP: Duration = Duration::from_micros(500);
/// How long shutdown waits for queued messages to drain before giving up and
/// reporting the leftovers.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The sole currency between callers and the scheduler.
pub struct CallData {
    /// The function to execute; `None` for timer and reply wake-ups.
    pub function: Option<Arc<Function>>,
    /// The process the message is addressed to.
    pub target: Arc<Process>,
    /// Owned argument buffer; moved into the receiving frame.
    pub args: Vec<Value>,
    /// Reply promise to fulfill when the function returns.
    pub promise: Option<Arc<Promise>>,
    /// Do not execute before this instant.
    pub earliest: Instant,
}

impl CallData {
    /// A plain call with no arguments, promise or delay.
    pub fn call(function: Arc<Function>, target: Arc<Process>) -> Self {
        Self {
            function: Some(function),
            target,
            args: Vec::new(),
            promise: None,
            earliest: Instant::now(),
        }
    }

    /// A wake-up message carrying only a promise.
    pub fn wake(target: Arc<Process>, promise: Arc<Promise>) -> Self {
        Self {
            function: None,
            target,
            args: Vec::new(),
            promise: Some(promise),
            earliest: Instant::now(),
        }
    }

    /// Attaches an argument buffer.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Attaches a reply promise.
    pub fn with_promise(mut self, promise: Arc<Promise>) -> Self {
        self.promise = Some(promise);
        self
    }

    /// Defers execution until `earliest`.
    pub fn not_before(mut self, earliest: Instant) -> Self {
        self.earliest = earliest;
        self
    }
}

/// Startup configuration for a [`VirtualMachine`].
pub struct VmConfig {
    /// Worker-thread count; defaults to `max(2, hardware parallelism)`.
    pub workers: Option<usize>,
    /// Maximum consecutive messages drained for one process per queue visit.
    pub batch_size: usize,
    /// Sink for program output from the print builtins.
    pub console: Console,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            workers: None,
            batch_size: 16,
            console: Console::stdout(),
        }
    }
}

/// Execution context threaded through instruction handlers: the VM, the
/// process being run, its locked state, and the current function + index.
pub struct ExecContext<'a> {
    pub(crate) vm: &'a VmInner,
    /// The process this context executes on behalf of.
    pub process: &'a Arc<Process>,
    /// The process's state; the caller holds the process lock.
    pub state: &'a mut ProcessState,
    /// The function being executed.
    pub function: Arc<Function>,
    /// Index of the current instruction.
    pub ip: usize,
}

impl<'a> ExecContext<'a> {
    /// The instruction at the current index.
    pub fn current(&self) -> Instruction {
        self.function.code[self.ip]
    }

    /// Source line of the current instruction, for fault reports.
    pub fn line(&self) -> u32 {
        self.current().line
    }

    /// The program-output sink.
    pub fn console(&self) -> &Console {
        self.vm.console()
    }

    /// Enqueues a message.
    pub fn send_message(&self, call: CallData) {
        self.vm.send_message(call);
    }

    /// Creates a new process.
    pub fn spawn(&self) -> Arc<Process> {
        self.vm.spawn()
    }
}

type MessageQueue = Mutex<VecDeque<CallData>>;

pub(crate) struct VmInner {
    core_count: usize,
    batch_size: usize,
    queues: Vec<MessageQueue>,
    idle_mutex: Mutex<()>,
    idle_event: Condvar,
    idle_count: AtomicUsize,
    message_count: AtomicUsize,
    ready_to_exit: AtomicBool,
    force_exit: AtomicBool,
    processes: Mutex<Vec<Arc<Process>>>,
    next_process_id: AtomicU32,
    console: Console,
}

impl VmInner {
    pub(crate) fn console(&self) -> &Console {
        &self.console
    }

    /// Creates a process and records it on the live list.
    pub(crate) fn spawn(&self) -> Arc<Process> {
        let mut processes = self.processes.lock();
        let id = self.next_process_id.fetch_add(1, Ordering::SeqCst);
        let process = Process::new(id);
        processes.push(Arc::clone(&process));
        process
    }

    /// Enqueues a message on the target's mailbox queue and wakes a parked
    /// worker if messages now outnumber the awake ones.
    pub(crate) fn send_message(&self, call: CallData) {
        let index = call.target.id() as usize % self.queues.len();

        let mut retries = 0;
        let mut queue = loop {
            if let Some(guard) = self.queues[index].try_lock() {
                break guard;
            }
            retries += 1;
            if retries > SEND_RETRY_LIMIT {
                thread::sleep(RETRY_NAP);
                retries = 0;
            }
        };
        queue.push_back(call);
        drop(queue);

        self.message_count.fetch_add(1, Ordering::SeqCst);

        let _guard = self.idle_mutex.lock();
        let awake = self.core_count - self.idle_count.load(Ordering::SeqCst);
        if self.message_count.load(Ordering::SeqCst) > awake {
            self.idle_event.notify_one();
        }
    }

    /// Whether a worker that found no work should park. During a run, only
    /// while the remaining messages are covered by the workers still awake,
    /// so at least one stays up to deliver them. Under shutdown the last
    /// worker keeps sweeping until the queues are empty, unless the drain
    /// timed out and exit is forced.
    fn should_idle(&self) -> bool {
        if self.force_exit.load(Ordering::SeqCst) {
            return true;
        }
        let pending = self.message_count.load(Ordering::SeqCst);
        if self.ready_to_exit.load(Ordering::SeqCst) && pending == 0 {
            return true;
        }
        let awake = self.core_count - self.idle_count.load(Ordering::SeqCst);
        pending < awake
    }

    /// Binds one message's function to the target process and runs it, then
    /// re-evaluates pending temporal blocks. Called with the process lock
    /// held. Faults abort the message, never the process.
    pub(crate) fn execute_process_message(
        &self,
        target: &Arc<Process>,
        state: &mut ProcessState,
        call: CallData,
    ) {
        let CallData {
            function,
            args,
            promise,
            ..
        } = call;

        if let Some(function) = function {
            let function = function.latest();
            let frame_depth = state.stack.frame_depth();
            let call_depth = state.callstack.len();

            match self.run_message(target, state, &function, args) {
                Ok(()) => {
                    if let Some(promise) = promise {
                        let result = state.stack.abs(state.stack.base_offset()).clone();
                        promise.fulfill(result);
                        self.send_message(CallData::wake(
                            Arc::clone(promise.owner()),
                            Arc::clone(&promise),
                        ));
                    }
                    state.stack.pop_frame();
                }
                Err(fault) => {
                    error!(
                        "vm> message '{}' to process#{} aborted: {}",
                        function.name,
                        target.id(),
                        fault
                    );
                    state.stack.truncate_frames(frame_depth);
                    state.callstack.truncate(call_depth);
                }
            }
        }

        self.evaluate_when_blocks(target, state);
        self.evaluate_whenever_blocks(target, state);
    }

    fn run_message(
        &self,
        target: &Arc<Process>,
        state: &mut ProcessState,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> RuntimeResult<()> {
        state.stack.setup_frame(function)?;
        // Message-level frames are anchored at the stack start: methods share
        // the constructor frame's base, which is offset zero.
        state.stack.write_args(function, 0, args);
        state.stack.install_constants(function, 0);
        state.stack.clear_locals(function, 0);

        let mut ctx = ExecContext {
            vm: self,
            process: target,
            state,
            function: Arc::clone(function),
            ip: 0,
        };
        jump_table::run(&mut ctx)
    }

    /// Synchronous call on the current thread, reusing the target process.
    pub(crate) fn execute_function(&self, call: CallData) -> RuntimeResult<Value> {
        let CallData {
            function,
            target,
            args,
            ..
        } = call;
        let Some(function) = function else {
            return Ok(Value::Nil);
        };
        let function = function.latest();

        let mut guard = target.lock_state_with_backoff();
        let state = &mut *guard;

        let frame_depth = state.stack.frame_depth();
        let call_depth = state.callstack.len();
        let run = self.run_sync(&target, state, &function, args);

        match run {
            Ok(()) => {
                let value = state.stack.abs(state.stack.base_offset()).clone();
                state.stack.pop_frame();
                Ok(value)
            }
            Err(fault) => {
                state.stack.truncate_frames(frame_depth);
                state.callstack.truncate(call_depth);
                Err(fault)
            }
        }
    }

    fn run_sync(
        &self,
        target: &Arc<Process>,
        state: &mut ProcessState,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> RuntimeResult<()> {
        state.stack.setup_frame(function)?;
        let base = state.stack.base_offset();
        state.stack.write_args(function, base, args);
        state.stack.install_constants(function, base);
        state.stack.clear_locals(function, base);

        let mut ctx = ExecContext {
            vm: self,
            process: target,
            state,
            function: Arc::clone(function),
            ip: 0,
        };
        jump_table::run(&mut ctx)
    }

    /// REPL execution: re-enters a recompiled function at the last executed
    /// instruction after shifting the stack for newly appended constants and
    /// locals, and rewrites pending closures to match. The entered frame is
    /// left in place for the next increment.
    pub(crate) fn execute_function_incremental(&self, call: CallData) -> RuntimeResult<Value> {
        let CallData {
            function, target, ..
        } = call;
        let Some(function) = function else {
            return Ok(Value::Nil);
        };
        let function = function.latest();

        let mut guard = target.lock_state_with_backoff();
        let state = &mut *guard;

        if state.stack.frame_depth() > 0 {
            state.stack.pop_frame();
        }
        state.stack.setup_frame(&function)?;
        let repl_depth = state.stack.frame_depth();

        let old_constants = state.incremental_constants;
        let old_locals = state.incremental_locals;
        state
            .stack
            .incremental_stack_shift(&function, old_constants, old_locals)?;
        adjust_blocks_after_shift(&mut state.when_blocks, &function, old_constants, old_locals);
        adjust_blocks_after_shift(
            &mut state.whenever_blocks,
            &function,
            old_constants,
            old_locals,
        );
        state.incremental_constants = function.constant_count();
        state.incremental_locals = function.locals_count();

        let resume_at = state.incremental_ip;
        let run = {
            let mut ctx = ExecContext {
                vm: self,
                process: &target,
                state: &mut *state,
                function: Arc::clone(&function),
                ip: resume_at,
            };
            let result = jump_table::run(&mut ctx);
            (result, ctx.ip)
        };
        match run {
            (Ok(()), final_ip) => {
                state.incremental_ip = final_ip;
            }
            (Err(fault), _) => {
                // Keep the REPL frame, drop anything a nested call left.
                state.stack.truncate_frames(repl_depth);
                return Err(fault);
            }
        }

        let value = state.stack.abs(state.stack.base_offset()).clone();
        self.evaluate_when_blocks(&target, state);
        self.evaluate_whenever_blocks(&target, state);
        Ok(value)
    }

    /// Runs a constructor inline on the spawning worker. The constructor's
    /// frame is never popped: it holds the receiver and class state every
    /// later message frame is stacked on.
    pub(crate) fn execute_constructor(
        &self,
        new_process: &Arc<Process>,
        constructor: &Arc<Function>,
        args: Vec<Value>,
    ) -> RuntimeResult<()> {
        let mut guard = new_process.lock_state_with_backoff();
        let state = &mut *guard;

        state.stack.setup_frame(constructor)?;
        state.stack.install_constants(constructor, 0);
        for (i, arg) in args
            .into_iter()
            .take(constructor.parameter_count())
            .enumerate()
        {
            *state.stack.abs_mut(1 + i) = arg;
        }
        *state.stack.abs_mut(0) = Value::Process(Arc::clone(new_process));

        let mut ctx = ExecContext {
            vm: self,
            process: new_process,
            state,
            function: Arc::clone(constructor),
            ip: 0,
        };
        jump_table::run(&mut ctx)
    }

    /// Nested call within the current process turn: allocate the frame, copy
    /// the gathered arguments, and run the callee's dispatch loop inline.
    pub(crate) fn call_function(
        &self,
        ctx: &mut ExecContext<'_>,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> RuntimeResult<()> {
        ctx.state.callstack.push(CallSite {
            function: Arc::clone(&ctx.function),
            ip: ctx.ip,
        });

        ctx.state.stack.setup_frame(function)?;
        let base = ctx.state.stack.base_offset();
        ctx.state.stack.write_args(function, base, args);
        ctx.state.stack.install_constants(function, base);
        ctx.state.stack.clear_locals(function, base);

        {
            let mut callee = ExecContext {
                vm: self,
                process: ctx.process,
                state: &mut *ctx.state,
                function: Arc::clone(function),
                ip: 0,
            };
            jump_table::run(&mut callee)?;
        }

        ctx.state.stack.pop_frame();
        ctx.state.callstack.pop();
        Ok(())
    }

    /// Tests every pending one-shot block once, in registration order. A
    /// block whose predicate fires runs its body and is removed.
    fn evaluate_when_blocks(&self, target: &Arc<Process>, state: &mut ProcessState) {
        let mut i = 0;
        while i < state.when_blocks.len() {
            let eval = state.when_blocks[i].eval.latest();
            state.when_blocks[i].eval = Arc::clone(&eval);

            let frame_depth = state.stack.frame_depth();
            let closure = state.when_blocks[i].closure.clone();
            let outcome = self.run_temporal_eval(target, state, &eval, &closure);
            match outcome {
                Ok(true) => {
                    state.stack.pop_frame();
                    state.when_blocks.swap_remove(i);
                }
                Ok(false) => {
                    state.stack.pop_frame();
                    i += 1;
                }
                Err(fault) => {
                    error!(
                        "vm> when block on process#{} aborted: {}",
                        target.id(),
                        fault
                    );
                    state.stack.truncate_frames(frame_depth);
                    i += 1;
                }
            }
        }
    }

    /// Tests every pending repeating block once, in registration order. A
    /// body that executed updates the captured closure and stays pending
    /// unless it returned, which removes it.
    fn evaluate_whenever_blocks(&self, target: &Arc<Process>, state: &mut ProcessState) {
        let mut i = 0;
        while i < state.whenever_blocks.len() {
            let eval = state.whenever_blocks[i].eval.latest();
            state.whenever_blocks[i].eval = Arc::clone(&eval);

            let frame_depth = state.stack.frame_depth();
            let closure = state.whenever_blocks[i].closure.clone();
            let outcome = self.run_temporal_eval(target, state, &eval, &closure);
            match outcome {
                Ok(true) => {
                    let keep = state
                        .stack
                        .ccall_return()
                        .as_bool()
                        .unwrap_or(false);
                    if keep {
                        state
                            .stack
                            .update_closure_state(&eval, &mut state.whenever_blocks[i].closure);
                        state.stack.pop_frame();
                        i += 1;
                    } else {
                        state.stack.pop_frame();
                        state.whenever_blocks.swap_remove(i);
                    }
                }
                Ok(false) => {
                    state.stack.pop_frame();
                    i += 1;
                }
                Err(fault) => {
                    error!(
                        "vm> whenever block on process#{} aborted: {}",
                        target.id(),
                        fault
                    );
                    state.stack.truncate_frames(frame_depth);
                    i += 1;
                }
            }
        }
    }

    /// Sets up a frame for a block's eval function, replays its captured
    /// closure, and executes the leading `When`/`Whenever` instruction.
    /// Returns whether the block reported execution (fired / body ran).
    fn run_temporal_eval(
        &self,
        target: &Arc<Process>,
        state: &mut ProcessState,
        eval: &Arc<Function>,
        closure: &crate::process_stack::ClosureState,
    ) -> RuntimeResult<bool> {
        state.stack.setup_frame(eval)?;
        state.stack.apply_closure_state(eval, closure)?;

        let mut ctx = ExecContext {
            vm: self,
            process: target,
            state,
            function: Arc::clone(eval),
            ip: 0,
        };
        jump_table::execute(&mut ctx)
    }
}

/// Rewrites the closures captured by pending temporal blocks after an
/// incremental recompile moved the locals region and/or appended constants.
/// A closure whose eval function grew its capture region is re-sized first.
fn adjust_blocks_after_shift(
    blocks: &mut Vec<WhenBlock>,
    function: &Function,
    old_constants: usize,
    old_locals: usize,
) {
    let constants_added = function.constant_count() - old_constants;
    let locals_added = function.locals_count().saturating_sub(old_locals);

    for block in blocks.iter_mut() {
        let latest = block.eval.latest();
        if !Arc::ptr_eq(&latest, &block.eval) {
            block.eval = latest;
        }
        if block.closure.is_empty() {
            continue;
        }
        let eval = Arc::clone(&block.eval);

        let new_size = eval.capture_count();
        if new_size != block.closure.len() {
            block.closure.resize(new_size);
        }

        // Positions inside the closure are frame offsets shifted down by the
        // capture start.
        let rel = |frame_offset: usize| frame_offset - eval.parameters_start;

        let old_offset = eval.constants_start + old_constants;
        let new_offset = eval.locals_start;
        if new_offset != old_offset {
            let from = rel(old_offset);
            let to = rel(new_offset);
            let values = block.closure.values_mut();
            let moved: Vec<Value> = values[from..from + old_locals].to_vec();
            for (k, value) in moved.into_iter().enumerate() {
                values[to + k] = value;
            }
        }

        if locals_added > 0 {
            let start = rel(eval.locals_start) + old_locals;
            let values = block.closure.values_mut();
            for value in &mut values[start..start + locals_added] {
                *value = Value::Nil;
            }
        }

        if constants_added > 0 {
            let start = rel(eval.constants_start) + old_constants;
            let values = block.closure.values_mut();
            for k in 0..constants_added {
                values[start + k] = function.constants[old_constants + k].clone();
            }
        }
    }
}

fn worker_main(inner: Arc<VmInner>, worker_index: usize) {
    let queue_count = inner.queues.len();
    let mut deferred: Vec<CallData> = Vec::new();
    let mut tries: u32 = 0;

    loop {
        tries += 1;
        for j in 0..queue_count {
            let index = (j + worker_index) % queue_count;
            let Some(mut queue) = inner.queues[index].try_lock() else {
                continue;
            };
            let Some(front) = queue.front() else {
                continue;
            };
            let target = Arc::clone(&front.target);
            // First come first served on the process lock.
            let Some(mut state) = target.try_lock_state() else {
                continue;
            };

            let now = Instant::now();
            let mut batch: Vec<CallData> = Vec::with_capacity(inner.batch_size);
            while batch.len() < inner.batch_size {
                let Some(next) = queue.front() else { break };
                if !Arc::ptr_eq(&next.target, &target) {
                    break;
                }
                let Some(message) = queue.pop_front() else {
                    break;
                };
                if message.earliest > now {
                    deferred.push(message);
                    continue;
                }
                if let Some(promise) = &message.promise {
                    if promise.is_timer() {
                        promise.mark_ready();
                    }
                }
                batch.push(message);
            }
            for message in deferred.drain(..) {
                queue.push_back(message);
            }
            drop(queue);

            if batch.is_empty() {
                continue;
            }
            // Keep one message's worth of count until processing finishes so
            // the idle accounting stays tight.
            inner
                .message_count
                .fetch_sub(batch.len() - 1, Ordering::SeqCst);

            for message in batch {
                inner.execute_process_message(&target, &mut state, message);
            }
            drop(state);

            inner.message_count.fetch_sub(1, Ordering::SeqCst);
            tries = 0;
        }

        if tries > MAX_RETRIES {
            tries = 0;
            // Mini-nap in case we are spinning against a busy scheduler.
            thread::sleep(RETRY_NAP);
            if inner.should_idle() {
                let mut guard = inner.idle_mutex.lock();
                // Re-check before committing to sleep.
                if inner.should_idle() {
                    let idle = inner.idle_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if idle == inner.core_count && inner.ready_to_exit.load(Ordering::SeqCst) {
                        // Last worker out turns off the lights.
                        inner.idle_event.notify_all();
                        return;
                    }
                    inner.idle_event.wait(&mut guard);
                    if inner.ready_to_exit.load(Ordering::SeqCst)
                        && inner.idle_count.load(Ordering::SeqCst) == inner.core_count
                    {
                        return;
                    }
                    inner.idle_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

/// The runtime instance owning workers, queues and processes.
pub struct VirtualMachine {
    inner: Arc<VmInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// A VM with default configuration.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// A VM with explicit worker count, batch size and output sink.
    pub fn with_config(config: VmConfig) -> Self {
        let core_count = config
            .workers
            .unwrap_or_else(|| num_cpus::get().max(2));
        debug!("vm> initializing with {core_count} cores");

        let queues = (0..core_count)
            .map(|_| Mutex::new(VecDeque::new()))
            .collect();

        Self {
            inner: Arc::new(VmInner {
                core_count,
                batch_size: config.batch_size,
                queues,
                idle_mutex: Mutex::new(()),
                idle_event: Condvar::new(),
                idle_count: AtomicUsize::new(0),
                message_count: AtomicUsize::new(0),
                ready_to_exit: AtomicBool::new(false),
                force_exit: AtomicBool::new(false),
                processes: Mutex::new(Vec::new()),
                next_process_id: AtomicU32::new(0),
                console: config.console,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Starts the worker threads.
    pub fn run(&self) {
        let mut workers = self.workers.lock();
        for i in 0..self.inner.core_count {
            let inner = Arc::clone(&self.inner);
            workers.push(
                thread::Builder::new()
                    .name(format!("eople-worker-{i}"))
                    .spawn(move || worker_main(inner, i))
                    .expect("failed to spawn worker thread"),
            );
        }
    }

    /// Creates a new process.
    pub fn spawn(&self) -> Arc<Process> {
        self.inner.spawn()
    }

    /// Enqueues a message for asynchronous execution.
    pub fn send_message(&self, call: CallData) {
        self.inner.send_message(call);
    }

    /// Synchronous call on the current thread; returns the callee's result
    /// slot.
    pub fn execute_function(&self, call: CallData) -> RuntimeResult<Value> {
        self.inner.execute_function(call)
    }

    /// Synchronous REPL execution with stack shifting and closure fix-up.
    pub fn execute_function_incremental(&self, call: CallData) -> RuntimeResult<Value> {
        self.inner.execute_function_incremental(call)
    }

    /// The program-output sink.
    pub fn console(&self) -> Console {
        self.inner.console.clone()
    }

    /// Cooperative drain and join. Messages still queued when the workers
    /// exit are reported as undeliverable, never executed.
    pub fn shutdown(&self) -> RuntimeResult<()> {
        self.inner.ready_to_exit.store(true, Ordering::SeqCst);
        self.inner.idle_event.notify_all();

        let pending = self.inner.message_count.load(Ordering::SeqCst);
        debug!("vm> received shutdown signal, waiting to deliver {pending} messages");

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();

        if !handles.is_empty() {
            let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
            while self.inner.message_count.load(Ordering::SeqCst) > 0
                && Instant::now() < deadline
            {
                thread::sleep(Duration::from_millis(1));
            }
        }
        self.inner.force_exit.store(true, Ordering::SeqCst);
        self.inner.idle_event.notify_all();

        for handle in handles {
            let _ = handle.join();
        }

        let undelivered = self.inner.message_count.load(Ordering::SeqCst);
        if undelivered > 0 {
            error!("vm> left {undelivered} messages undelivered");
            return Err(RuntimeError::undeliverable(undelivered));
        }
        debug!("vm> shutdown complete");
        Ok(())
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if !self.inner.ready_to_exit.load(Ordering::SeqCst) {
            let _ = self.shutdown();
        }
        self.inner.processes.lock().clear();
    }
}
