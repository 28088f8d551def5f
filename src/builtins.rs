//! Native builtin functions.
//!
//! Builtins follow the c-call contract: read argument slots from the current
//! instruction's operands, write the result to the slot one past the frame
//! top, return `Ok(true)`. The `sleep` builtin blocks its worker thread and
//! is the only handler that does.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{RuntimeError, RuntimeResult};
use crate::module::{Builtin, Module};
use crate::promise::Promise;
use crate::types::{TypeId, TypeInterner};
use crate::value::Value;
use crate::vm::{CallData, ExecContext};

/// Registers the builtin surface in a module, with signature types built
/// through the interner.
pub fn install_builtins(module: &mut Module, interner: &mut TypeInterner) {
    let any = TypeId::ANY;
    let array_any = interner.array_of(any);
    let array_int = interner.array_of(TypeId::INT);
    let array_float = interner.array_of(TypeId::FLOAT);
    let array_str = interner.array_of(TypeId::STR);
    let kind_any = interner.kind_of(any);
    let promise_any = interner.promise_of(any);

    module.add_builtin(Builtin::new("print", print_int, vec![TypeId::INT], TypeId::NIL));
    module.add_builtin(Builtin::new("print", print_float, vec![TypeId::FLOAT], TypeId::NIL));
    module.add_builtin(Builtin::new("print", print_string, vec![TypeId::STR], TypeId::NIL));
    module.add_builtin(Builtin::new("print", print_int_array, vec![array_int], TypeId::NIL));
    module.add_builtin(Builtin::new(
        "print",
        print_float_array,
        vec![array_float],
        TypeId::NIL,
    ));
    module.add_builtin(Builtin::new(
        "print",
        print_string_array,
        vec![array_str],
        TypeId::NIL,
    ));

    module.add_builtin(Builtin::new("array", array_new, vec![kind_any], array_any));
    module.add_builtin(Builtin::new("push", array_push, vec![array_any, any], TypeId::NIL));
    module.add_builtin(Builtin::new(
        "push",
        array_push_string,
        vec![array_str, TypeId::STR],
        TypeId::NIL,
    ));
    module.add_builtin(Builtin::new(
        "push",
        array_push_array,
        vec![interner.array_of(array_any), array_any],
        TypeId::NIL,
    ));
    module.add_builtin(Builtin::new("pop", array_pop, vec![array_any], TypeId::NIL));
    module.add_builtin(Builtin::new("top", array_top, vec![array_any], any));
    module.add_builtin(Builtin::new(
        "top",
        array_top_string,
        vec![array_str],
        TypeId::STR,
    ));
    module.add_builtin(Builtin::new(
        "top",
        array_top_array,
        vec![interner.array_of(array_any)],
        array_any,
    ));
    module.add_builtin(Builtin::new("size", array_size, vec![array_any], TypeId::INT));
    module.add_builtin(Builtin::new("clear", array_clear, vec![array_any], TypeId::NIL));

    module.add_builtin(Builtin::new("get_time", get_time, vec![], TypeId::FLOAT));
    module.add_builtin(Builtin::new("sleep", sleep_ms, vec![TypeId::INT], TypeId::NIL));
    module.add_builtin(Builtin::new("after", timer_after, vec![TypeId::INT], promise_any));
    module.add_builtin(Builtin::new(
        "is_ready",
        promise_is_ready,
        vec![promise_any],
        TypeId::BOOL,
    ));
    module.add_builtin(Builtin::new(
        "get_value",
        promise_get_value,
        vec![promise_any],
        TypeId::NIL,
    ));

    module.add_builtin(Builtin::new("to_float", int_to_float, vec![TypeId::INT], TypeId::FLOAT));
    module.add_builtin(Builtin::new("to_int", float_to_int, vec![TypeId::FLOAT], TypeId::INT));
    module.add_builtin(Builtin::new("to_string", int_to_string, vec![TypeId::INT], TypeId::STR));
    module.add_builtin(Builtin::new(
        "to_string",
        float_to_string,
        vec![TypeId::FLOAT],
        TypeId::STR,
    ));
}

/// Prints the integer in operand A.
pub fn print_int(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_int()?;
    ctx.console().print_line(&value.to_string());
    Ok(true)
}

/// Prints the float in operand A.
pub fn print_float(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_float()?;
    ctx.console().print_line(&value.to_string());
    Ok(true)
}

/// Prints the string in operand A.
pub fn print_string(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_str()?;
    let line = value.read().clone();
    ctx.console().print_line(&line);
    Ok(true)
}

fn print_array_with(
    ctx: &mut ExecContext<'_>,
    render: impl Fn(&Value) -> RuntimeResult<String>,
) -> RuntimeResult<bool> {
    let array = ctx.state.stack.at(ctx.current().a).as_array()?;
    let rendered: RuntimeResult<Vec<String>> = array.read().iter().map(&render).collect();
    ctx.console().print_line(&format!("[{}]", rendered?.join(", ")));
    Ok(true)
}

/// Prints the int array in operand A as `[a, b, c]`.
pub fn print_int_array(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    print_array_with(ctx, |v| Ok(v.as_int()?.to_string()))
}

/// Prints the float array in operand A as `[a, b, c]`.
pub fn print_float_array(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    print_array_with(ctx, |v| Ok(v.as_float()?.to_string()))
}

/// Prints the string array in operand A as `[a, b, c]`.
pub fn print_string_array(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    print_array_with(ctx, |v| Ok(v.as_str()?.read().clone()))
}

/// `array()`: a fresh empty array in the return slot.
pub fn array_new(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    *ctx.state.stack.ccall_return_mut() = Value::array(Vec::new());
    Ok(true)
}

/// `push(arr, value)` for plain values: the slot's handle is shared.
pub fn array_push(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let value = ctx.state.stack.at(inst.b).clone();
    array.write().push(value);
    Ok(true)
}

/// `push(arr, s)` for strings: pushes an owned copy.
pub fn array_push_string(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let value = ctx.state.stack.at(inst.b).deep_copy();
    array.write().push(value);
    Ok(true)
}

/// `push(arr, inner)` for arrays: pushes an owned copy.
pub fn array_push_array(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let value = ctx.state.stack.at(inst.b).deep_copy();
    array.write().push(value);
    Ok(true)
}

/// `pop(arr)`: removes the last element.
pub fn array_pop(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let mut elements = array.write();
    if elements.pop().is_none() {
        return Err(RuntimeError::index_out_of_bounds(0, 0, inst.line));
    }
    Ok(true)
}

/// `top(arr)` for plain values.
pub fn array_top(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let last = array
        .read()
        .last()
        .cloned()
        .ok_or_else(|| RuntimeError::index_out_of_bounds(0, 0, inst.line))?;
    *ctx.state.stack.ccall_return_mut() = last;
    Ok(true)
}

/// `top(arr)` for string elements: returns an owned copy.
pub fn array_top_string(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let last = array
        .read()
        .last()
        .map(Value::deep_copy)
        .ok_or_else(|| RuntimeError::index_out_of_bounds(0, 0, inst.line))?;
    *ctx.state.stack.ccall_return_mut() = last;
    Ok(true)
}

/// `top(arr)` for array elements: returns an owned copy.
pub fn array_top_array(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    array_top_string(ctx)
}

/// `size(arr)`.
pub fn array_size(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let array = ctx.state.stack.at(ctx.current().a).as_array()?;
    let len = array.read().len() as i64;
    *ctx.state.stack.ccall_return_mut() = Value::Int(len);
    Ok(true)
}

/// `clear(arr)`.
pub fn array_clear(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let array = ctx.state.stack.at(ctx.current().a).as_array()?;
    array.write().clear();
    Ok(true)
}

/// `get_time()`: seconds since the Unix epoch as a float.
pub fn get_time(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    *ctx.state.stack.ccall_return_mut() = Value::Float(now.as_secs_f64());
    Ok(true)
}

/// `sleep(ms)`: blocks the worker thread.
pub fn sleep_ms(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let ms = ctx.state.stack.at(ctx.current().a).as_int()?;
    std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
    Ok(true)
}

/// `after(ms)`: a timer promise delivered to this process once `ms` have
/// elapsed. The wake-up carries no function; its arrival flips the promise
/// ready and re-evaluates pending temporal blocks.
pub fn timer_after(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let ms = ctx.state.stack.at(ctx.current().a).as_int()?;
    let promise = Promise::new_timer(Arc::clone(ctx.process));
    let mature = Instant::now() + Duration::from_millis(ms.max(0) as u64);
    ctx.send_message(
        CallData::wake(Arc::clone(ctx.process), Arc::clone(&promise)).not_before(mature),
    );
    *ctx.state.stack.ccall_return_mut() = Value::Promise(promise);
    Ok(true)
}

/// `is_ready(p)`: chain-walking readiness test.
pub fn promise_is_ready(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let promise = ctx.state.stack.at(ctx.current().a).as_promise()?;
    *ctx.state.stack.ccall_return_mut() = Value::Bool(promise.is_ready());
    Ok(true)
}

/// `get_value(p)`: chain-walking read with container deep copy.
pub fn promise_get_value(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let promise = ctx.state.stack.at(ctx.current().a).as_promise()?;
    *ctx.state.stack.ccall_return_mut() = promise.get_value();
    Ok(true)
}

/// `to_float(i)`.
pub fn int_to_float(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_int()?;
    *ctx.state.stack.ccall_return_mut() = Value::Float(value as f64);
    Ok(true)
}

/// `to_int(f)`: truncates toward zero.
pub fn float_to_int(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_float()?;
    *ctx.state.stack.ccall_return_mut() = Value::Int(value as i64);
    Ok(true)
}

/// `to_string(i)`.
pub fn int_to_string(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_int()?;
    *ctx.state.stack.ccall_return_mut() = Value::str(value.to_string());
    Ok(true)
}

/// `to_string(f)`.
pub fn float_to_string(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let value = ctx.state.stack.at(ctx.current().a).as_float()?;
    *ctx.state.stack.ccall_return_mut() = Value::str(value.to_string());
    Ok(true)
}
