//! Jumps, loops and returns.
//!
//! Jumping handlers leave the instruction index on the last instruction they
//! consumed; the dispatch loop's post-increment lands on the next one. Loop
//! bodies are executed index-driven so nested loops and jumps compose. A
//! return executed inside a loop body stops the loop and propagates out of
//! the enclosing function.

use crate::error::RuntimeResult;
use crate::instruction::Opcode;
use crate::jump_table::{self, JumpTable};
use crate::value::Value;
use crate::vm::ExecContext;

/// Registers the control-flow handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.set(Opcode::Jump, jump);
    table.set(Opcode::JumpIf, jump_if);
    table.set(Opcode::JumpGT, jump_gt);
    table.set(Opcode::JumpLT, jump_lt);
    table.set(Opcode::JumpEQ, jump_eq);
    table.set(Opcode::JumpNEQ, jump_neq);
    table.set(Opcode::JumpLEQ, jump_leq);
    table.set(Opcode::JumpGEQ, jump_geq);
    table.set(Opcode::ForI, for_i);
    table.set(Opcode::ForF, for_f);
    table.set(Opcode::ForA, for_a);
    table.set(Opcode::While, while_loop);
    table.set(Opcode::Return, return_);
    table.set(Opcode::ReturnValue, return_value);
}

fn branch(ctx: &mut ExecContext<'_>, offset: isize) {
    ctx.ip = (ctx.ip as isize + offset) as usize;
}

fn jump(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let offset = ctx.current().jump_offset();
    branch(ctx, offset);
    Ok(true)
}

/// Branches when the condition in B is false: the fall-through is the taken
/// `if` body.
fn jump_if(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if !ctx.state.stack.at(inst.b).as_bool()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_gt(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? > ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_lt(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? < ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_eq(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? == ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_neq(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? != ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_leq(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? <= ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

fn jump_geq(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.at(inst.b).as_int()? >= ctx.state.stack.at(inst.c).as_int()? {
        branch(ctx, inst.jump_offset());
    }
    Ok(true)
}

/// Integer counting loop. A names the counter slot (pre-loaded with the start
/// value), B the stop slot, C the step slot, D the body length.
fn for_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let start = ctx.state.stack.at(inst.a).as_int()?;
    let stop = ctx.state.stack.at(inst.b).as_int()?;
    let step = ctx.state.stack.at(inst.c).as_int()?;
    let body_start = ctx.ip + 1;
    let body_end = body_start + inst.d as usize;

    let mut i = start;
    while if step >= 0 { i < stop } else { i > stop } {
        *ctx.state.stack.at_mut(inst.a) = Value::Int(i);
        if !jump_table::run_range(ctx, body_start, body_end)? {
            return Ok(false);
        }
        i = i.wrapping_add(step);
    }

    ctx.ip = body_end - 1;
    Ok(true)
}

/// Float counting loop; layout as [`for_i`].
fn for_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let start = ctx.state.stack.at(inst.a).as_float()?;
    let stop = ctx.state.stack.at(inst.b).as_float()?;
    let step = ctx.state.stack.at(inst.c).as_float()?;
    let body_start = ctx.ip + 1;
    let body_end = body_start + inst.d as usize;

    let mut i = start;
    while if step >= 0.0 { i < stop } else { i > stop } {
        *ctx.state.stack.at_mut(inst.a) = Value::Float(i);
        if !jump_table::run_range(ctx, body_start, body_end)? {
            return Ok(false);
        }
        i += step;
    }

    ctx.ip = body_end - 1;
    Ok(true)
}

/// Element loop over an array snapshot. A names the element slot, B the
/// array slot, D the body length.
fn for_a(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.b).as_array()?;
    let body_start = ctx.ip + 1;
    let body_end = body_start + inst.d as usize;

    let elements: Vec<Value> = array.read().clone();
    for element in elements {
        *ctx.state.stack.at_mut(inst.a) = element;
        if !jump_table::run_range(ctx, body_start, body_end)? {
            return Ok(false);
        }
    }

    ctx.ip = body_end - 1;
    Ok(true)
}

/// Condition-driven loop. A names the condition slot, B the condition
/// segment length, C the body length. The condition segment re-runs between
/// iterations.
fn while_loop(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let cond_slot = inst.a;
    let cond_start = ctx.ip + 1;
    let body_start = cond_start + inst.b as usize;
    let body_end = body_start + inst.c as usize;

    if !jump_table::run_range(ctx, cond_start, body_start)? {
        return Ok(false);
    }
    while ctx.state.stack.at(cond_slot).as_bool()? {
        if !jump_table::run_range(ctx, body_start, body_end)? {
            return Ok(false);
        }
        if !jump_table::run_range(ctx, cond_start, body_start)? {
            return Ok(false);
        }
    }

    ctx.ip = body_end - 1;
    Ok(true)
}

fn return_(_ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    Ok(false)
}

/// Leaves the return value in frame slot zero, where the caller can address
/// it just above its own frame.
fn return_value(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let value = ctx.state.stack.at(inst.a).clone();
    *ctx.state.stack.at_mut(0) = value;
    Ok(false)
}
