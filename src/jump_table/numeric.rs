//! Arithmetic, comparison, bitwise and boolean handlers.
//!
//! Integer arithmetic wraps on overflow; float arithmetic follows IEEE.
//! Operands are always read before the destination is written, so an
//! instruction may alias its destination with either source.

use crate::error::RuntimeResult;
use crate::instruction::Opcode;
use crate::jump_table::JumpTable;
use crate::value::Value;
use crate::vm::ExecContext;

/// Registers the numeric handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.set(Opcode::AddI, add_i);
    table.set(Opcode::SubI, sub_i);
    table.set(Opcode::MulI, mul_i);
    table.set(Opcode::DivI, div_i);
    table.set(Opcode::ModI, mod_i);
    table.set(Opcode::AddF, add_f);
    table.set(Opcode::SubF, sub_f);
    table.set(Opcode::MulF, mul_f);
    table.set(Opcode::DivF, div_f);
    table.set(Opcode::ShiftLeft, shift_left);
    table.set(Opcode::ShiftRight, shift_right);
    table.set(Opcode::BitAnd, bit_and);
    table.set(Opcode::BitXor, bit_xor);
    table.set(Opcode::BitOr, bit_or);
    table.set(Opcode::GreaterThanI, greater_than_i);
    table.set(Opcode::LessThanI, less_than_i);
    table.set(Opcode::EqualI, equal_i);
    table.set(Opcode::NotEqualI, not_equal_i);
    table.set(Opcode::LessEqualI, less_equal_i);
    table.set(Opcode::GreaterEqualI, greater_equal_i);
    table.set(Opcode::GreaterThanF, greater_than_f);
    table.set(Opcode::LessThanF, less_than_f);
    table.set(Opcode::EqualF, equal_f);
    table.set(Opcode::NotEqualF, not_equal_f);
    table.set(Opcode::LessEqualF, less_equal_f);
    table.set(Opcode::GreaterEqualF, greater_equal_f);
    table.set(Opcode::And, bool_and);
    table.set(Opcode::Or, bool_or);
}

fn add_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_add(b));
    Ok(true)
}

fn sub_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_sub(b));
    Ok(true)
}

fn mul_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_mul(b));
    Ok(true)
}

// Division by zero traps; the front-end's inference cannot prove it away and
// the runtime deliberately does not catch it.
fn div_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_div(b));
    Ok(true)
}

fn mod_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_rem(b));
    Ok(true)
}

fn add_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Float(a + b);
    Ok(true)
}

fn sub_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Float(a - b);
    Ok(true)
}

fn mul_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Float(a * b);
    Ok(true)
}

fn div_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Float(a / b);
    Ok(true)
}

fn shift_left(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_shl(b as u32));
    Ok(true)
}

fn shift_right(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a.wrapping_shr(b as u32));
    Ok(true)
}

fn bit_and(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a & b);
    Ok(true)
}

fn bit_xor(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a ^ b);
    Ok(true)
}

fn bit_or(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Int(a | b);
    Ok(true)
}

fn greater_than_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a > b);
    Ok(true)
}

fn less_than_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a < b);
    Ok(true)
}

fn equal_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a == b);
    Ok(true)
}

fn not_equal_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a != b);
    Ok(true)
}

fn less_equal_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a <= b);
    Ok(true)
}

fn greater_equal_i(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_int()?;
    let b = ctx.state.stack.at(inst.b).as_int()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a >= b);
    Ok(true)
}

fn greater_than_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a > b);
    Ok(true)
}

fn less_than_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a < b);
    Ok(true)
}

fn equal_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a == b);
    Ok(true)
}

fn not_equal_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a != b);
    Ok(true)
}

fn less_equal_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a <= b);
    Ok(true)
}

fn greater_equal_f(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_float()?;
    let b = ctx.state.stack.at(inst.b).as_float()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a >= b);
    Ok(true)
}

fn bool_and(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_bool()?;
    let b = ctx.state.stack.at(inst.b).as_bool()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a && b);
    Ok(true)
}

fn bool_or(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_bool()?;
    let b = ctx.state.stack.at(inst.b).as_bool()?;
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(a || b);
    Ok(true)
}
