//! Calls: local function calls, asynchronous process messages, spawning.
//!
//! Argument operands ride in the call instruction after its fixed operands
//! and spill into trailing `Nop` instructions in groups of four. Gathering
//! advances the instruction index over consumed carriers; `Nop`s execute as
//! no-ops if reached, so the layouts stay interchangeable.

use std::sync::Arc;
use std::time::Instant;

use crate::error::RuntimeResult;
use crate::instruction::{Opcode, Operand};
use crate::jump_table::JumpTable;
use crate::promise::Promise;
use crate::types::TypeId;
use crate::value::Value;
use crate::vm::{CallData, ExecContext};

/// Registers the call handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.set(Opcode::FunctionCall, function_call);
    table.set(Opcode::ProcessMessage, process_message);
    table.set(Opcode::SpawnProcess, spawn_process);
    table.set(Opcode::Nop, nop);
}

/// Collects `count` argument slot offsets, starting at operand index `first`
/// of the call instruction (1 = operand B, 2 = operand C) and continuing
/// through trailing `Nop` carriers.
fn collect_arg_slots(ctx: &mut ExecContext<'_>, count: usize, first: usize) -> Vec<Operand> {
    let mut slots = Vec::with_capacity(count);
    let inst = ctx.current();
    let head = [inst.a, inst.b, inst.c, inst.d];
    for &slot in head.iter().skip(first) {
        if slots.len() == count {
            return slots;
        }
        slots.push(slot);
    }
    while slots.len() < count {
        ctx.ip += 1;
        let carrier = ctx.current();
        debug_assert!(carrier.is_nop());
        for &slot in &[carrier.a, carrier.b, carrier.c, carrier.d] {
            if slots.len() == count {
                break;
            }
            slots.push(slot);
        }
    }
    slots
}

/// Synchronous call within the current process: the callee runs to
/// completion on this worker before the next instruction.
fn function_call(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let function = ctx.state.stack.at(inst.a).as_function()?;

    let slots = collect_arg_slots(ctx, function.parameter_count(), 1);
    let args: Vec<Value> = slots
        .iter()
        .map(|&slot| ctx.state.stack.at(slot).clone())
        .collect();

    let vm = ctx.vm;
    vm.call_function(ctx, &function, args)?;
    Ok(true)
}

/// Asynchronous call to another process. Builds a reply promise iff the
/// callee returns a value, enqueues the message, and leaves the promise in
/// the call's result slot. Arguments are deep-copied across the process
/// boundary.
fn process_message(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let target = ctx.state.stack.at(inst.a).as_process()?;
    let function = ctx.state.stack.at(inst.b).as_function()?;

    let slots = collect_arg_slots(ctx, function.parameter_count(), 2);
    let args: Vec<Value> = slots
        .iter()
        .map(|&slot| ctx.state.stack.at(slot).deep_copy())
        .collect();

    let promise = (function.return_type != TypeId::NIL)
        .then(|| Promise::new(Arc::clone(ctx.process)));

    let mut call = CallData::call(function, target)
        .with_args(args)
        .not_before(Instant::now());
    if let Some(promise) = &promise {
        call = call.with_promise(Arc::clone(promise));
    }
    ctx.send_message(call);

    *ctx.state.stack.ccall_return_mut() = match promise {
        Some(promise) => Value::Promise(promise),
        None => Value::Nil,
    };
    Ok(true)
}

/// Creates a process and runs its constructor inline on this worker, then
/// records the handle in the destination slot. Constructor arguments start
/// at operand C because B holds the constructor function.
fn spawn_process(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let constructor = ctx.state.stack.at(inst.b).as_function()?;

    let slots = collect_arg_slots(ctx, constructor.parameter_count(), 2);
    let args: Vec<Value> = slots
        .iter()
        .map(|&slot| ctx.state.stack.at(slot).deep_copy())
        .collect();

    let new_process = ctx.spawn();
    let vm = ctx.vm;
    vm.execute_constructor(&new_process, &constructor, args)?;

    *ctx.state.stack.at_mut(inst.a) = Value::Process(new_process);
    Ok(true)
}

/// Operand carrier; a no-op when executed directly.
fn nop(_ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    Ok(true)
}
