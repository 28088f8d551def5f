//! `when` / `whenever` registration and evaluation.
//!
//! Registration snapshots the registering frame's parameters, constants and
//! locals. After every message the scheduler re-runs each pending block's
//! eval function, whose first instruction is `When` or `Whenever`: evaluate
//! the condition segment, and only if it produced true, run the body.
//!
//! Unlike other instructions, `When`/`Whenever` report through their return
//! flag whether the block executed, not whether dispatch should continue;
//! their eval functions are driven one instruction at a time by the
//! scheduler, never by the plain dispatch loop.

use crate::error::RuntimeResult;
use crate::instruction::Opcode;
use crate::jump_table::{self, JumpTable};
use crate::process::WhenBlock;
use crate::value::Value;
use crate::vm::ExecContext;

/// Registers the temporal handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.set(Opcode::WhenRegister, when_register);
    table.set(Opcode::WheneverRegister, whenever_register);
    table.set(Opcode::When, when);
    table.set(Opcode::Whenever, whenever);
}

/// Pushes a pending one-shot block capturing the current frame slice.
fn when_register(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let eval = ctx.state.stack.at(inst.a).as_function()?;
    let closure = ctx.state.stack.capture_closure(&eval);
    ctx.state.when_blocks.push(WhenBlock { eval, closure });
    Ok(true)
}

/// Pushes a pending repeating block capturing the current frame slice.
fn whenever_register(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let eval = ctx.state.stack.at(inst.a).as_function()?;
    let closure = ctx.state.stack.capture_closure(&eval);
    ctx.state.whenever_blocks.push(WhenBlock { eval, closure });
    Ok(true)
}

/// One-shot conditional. A names the condition slot, B the condition segment
/// length, C the body length. Returns whether the block fired; a fired block
/// is removed by the scheduler.
fn when(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let cond_slot = inst.a;
    let cond_start = ctx.ip + 1;
    let body_start = cond_start + inst.b as usize;
    let body_end = body_start + inst.c as usize;

    jump_table::run_range(ctx, cond_start, body_start)?;

    if ctx.state.stack.at(cond_slot).as_bool()? {
        jump_table::run_range(ctx, body_start, body_end)?;
        ctx.ip = body_end;
        return Ok(true);
    }

    ctx.ip = body_end;
    Ok(false)
}

/// Repeating conditional; layout as [`when`]. After running the body it
/// reports through the native-call return slot whether the block stays
/// pending: a return inside the body stops the loop.
fn whenever(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let cond_slot = inst.a;
    let cond_start = ctx.ip + 1;
    let body_start = cond_start + inst.b as usize;
    let body_end = body_start + inst.c as usize;

    jump_table::run_range(ctx, cond_start, body_start)?;

    if ctx.state.stack.at(cond_slot).as_bool()? {
        let keep = jump_table::run_range(ctx, body_start, body_end)?;
        *ctx.state.stack.ccall_return_mut() = Value::Bool(keep);
        ctx.ip = body_end;
        return Ok(true);
    }

    ctx.ip = body_end;
    Ok(false)
}
