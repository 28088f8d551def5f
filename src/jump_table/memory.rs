//! Stores, string operations and container subscripts.
//!
//! String instructions are temp-aware: a source in the temporaries region is
//! dead after the instruction, so its handle is moved instead of its contents
//! copied. A destination outside the temporaries region always ends up with
//! its own string.

use std::mem;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::instruction::Opcode;
use crate::jump_table::JumpTable;
use crate::value::Value;
use crate::vm::ExecContext;

/// Registers the store/string/subscript handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.set(Opcode::Store, store);
    table.set(Opcode::StringCopy, string_copy);
    table.set(Opcode::ConcatS, concat_s);
    table.set(Opcode::EqualS, equal_s);
    table.set(Opcode::NotEqualS, not_equal_s);
    table.set(Opcode::StoreArrayElement, store_array_element);
    table.set(Opcode::StoreArrayStringElement, store_array_string_element);
    table.set(Opcode::ArraySubscript, array_subscript);
}

/// A = B, bitwise slot copy.
fn store(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let source = ctx.state.stack.at(inst.b).clone();
    *ctx.state.stack.at_mut(inst.a) = source;
    Ok(true)
}

/// A = B for strings: move the handle when B is a dying temporary, copy the
/// contents otherwise so A owns its string.
fn string_copy(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    if ctx.state.stack.is_temporary(inst.b) {
        let source = mem::take(ctx.state.stack.at_mut(inst.b));
        *ctx.state.stack.at_mut(inst.a) = source;
    } else {
        let source = ctx.state.stack.at(inst.b).deep_copy();
        *ctx.state.stack.at_mut(inst.a) = source;
    }
    Ok(true)
}

/// C = A ++ B. When C aliases A the right side is appended in place.
fn concat_s(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_str()?;
    let b = ctx.state.stack.at(inst.b).as_str()?;

    let dest_aliases_a = match ctx.state.stack.at(inst.c) {
        Value::Str(dest) => Arc::ptr_eq(dest, &a),
        _ => false,
    };
    if dest_aliases_a {
        let suffix = b.read().clone();
        a.write().push_str(&suffix);
    } else {
        let mut combined = a.read().clone();
        combined.push_str(&b.read());
        *ctx.state.stack.at_mut(inst.c) = Value::str(combined);
    }
    Ok(true)
}

/// C = (A == B), comparing handles first, contents second.
fn equal_s(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_str()?;
    let b = ctx.state.stack.at(inst.b).as_str()?;
    let equal = Arc::ptr_eq(&a, &b) || *a.read() == *b.read();
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(equal);
    Ok(true)
}

/// C = (A != B).
fn not_equal_s(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let a = ctx.state.stack.at(inst.a).as_str()?;
    let b = ctx.state.stack.at(inst.b).as_str()?;
    let equal = Arc::ptr_eq(&a, &b) || *a.read() == *b.read();
    *ctx.state.stack.at_mut(inst.c) = Value::Bool(!equal);
    Ok(true)
}

/// A[B] = C.
fn store_array_element(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let index = ctx.state.stack.at(inst.b).as_int()?;
    let source = ctx.state.stack.at(inst.c).clone();

    let mut elements = array.write();
    let len = elements.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| elements.get_mut(i))
        .ok_or_else(|| RuntimeError::index_out_of_bounds(index, len, inst.line))?;
    *slot = source;
    Ok(true)
}

/// A[B] = C for string elements: steal the handle from a dying temporary,
/// store an owned copy otherwise.
fn store_array_string_element(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let array = ctx.state.stack.at(inst.a).as_array()?;
    let index = ctx.state.stack.at(inst.b).as_int()?;
    let source = if ctx.state.stack.is_temporary(inst.c) {
        mem::take(ctx.state.stack.at_mut(inst.c))
    } else {
        ctx.state.stack.at(inst.c).deep_copy()
    };

    let mut elements = array.write();
    let len = elements.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| elements.get_mut(i))
        .ok_or_else(|| RuntimeError::index_out_of_bounds(index, len, inst.line))?;
    *slot = source;
    Ok(true)
}

/// A = B[C]: array by integer index or dict by string key. Container
/// elements are copied out so the reader owns what it got.
fn array_subscript(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let inst = ctx.current();
    let element = match ctx.state.stack.at(inst.b) {
        Value::Array(array) => {
            let index = ctx.state.stack.at(inst.c).as_int()?;
            let elements = array.read();
            usize::try_from(index)
                .ok()
                .and_then(|i| elements.get(i))
                .map(Value::deep_copy)
                .ok_or_else(|| {
                    RuntimeError::index_out_of_bounds(index, elements.len(), inst.line)
                })?
        }
        Value::Dict(dict) => {
            let key = ctx.state.stack.at(inst.c).as_str()?;
            let key = key.read().clone();
            let entries = dict.read();
            entries
                .get(&key)
                .map(Value::deep_copy)
                .ok_or_else(|| RuntimeError::key_not_found(key, inst.line))?
        }
        other => {
            return Err(RuntimeError::type_mismatch(
                "array or dict",
                other.kind().name(),
            ))
        }
    };
    *ctx.state.stack.at_mut(inst.a) = element;
    Ok(true)
}
