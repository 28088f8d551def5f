//! Instruction dispatch.
//!
//! A fixed table maps every opcode to its handler; native builtins embedded
//! in the instruction stream bypass the table and are called directly. The
//! dispatch loop post-increments the instruction index after every handler
//! that continues, so handlers that jump leave the index pointing at the last
//! instruction they consumed.

pub mod call;
pub mod control;
pub mod memory;
pub mod numeric;
pub mod temporal;

use once_cell::sync::Lazy;

use crate::error::{RuntimeError, RuntimeResult};
use crate::instruction::{Op, Opcode};
use crate::vm::ExecContext;

/// Handler for one opcode. `Ok(true)` continues the dispatch loop, `Ok(false)`
/// leaves it.
pub type OpHandler = fn(&mut ExecContext<'_>) -> RuntimeResult<bool>;

/// Opcode-indexed handler table.
pub struct JumpTable {
    handlers: [OpHandler; Opcode::COUNT],
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpTable {
    /// A table with every opcode's handler registered.
    pub fn new() -> Self {
        let mut table = Self {
            handlers: [unregistered; Opcode::COUNT],
        };
        numeric::register_handlers(&mut table);
        memory::register_handlers(&mut table);
        control::register_handlers(&mut table);
        call::register_handlers(&mut table);
        temporal::register_handlers(&mut table);
        table
    }

    /// Installs the handler for an opcode.
    pub fn set(&mut self, opcode: Opcode, handler: OpHandler) {
        self.handlers[opcode as usize] = handler;
    }

    /// The handler for an opcode.
    pub fn get(&self, opcode: Opcode) -> OpHandler {
        self.handlers[opcode as usize]
    }
}

fn unregistered(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    let opcode = match ctx.current().op {
        Op::Code(opcode) => opcode.name(),
        Op::Native(_) => "native",
    };
    Err(RuntimeError::type_mismatch("a registered opcode", opcode))
}

/// The shared dispatch table.
static DEFAULT: Lazy<JumpTable> = Lazy::new(JumpTable::new);

/// Executes the instruction at the context's current index.
pub fn execute(ctx: &mut ExecContext<'_>) -> RuntimeResult<bool> {
    match ctx.current().op {
        Op::Code(opcode) => (DEFAULT.get(opcode))(ctx),
        Op::Native(handler) => handler(ctx),
    }
}

/// Runs the dispatch loop until a handler leaves it.
pub fn run(ctx: &mut ExecContext<'_>) -> RuntimeResult<()> {
    loop {
        if !execute(ctx)? {
            return Ok(());
        }
        ctx.ip += 1;
    }
}

/// Executes the half-open instruction range `[start, end)`, honoring handler
/// jumps within it. Used by the loop and temporal handlers for their
/// condition and body segments. Returns `false` if an instruction requested
/// loop exit (a return).
pub fn run_range(ctx: &mut ExecContext<'_>, start: usize, end: usize) -> RuntimeResult<bool> {
    ctx.ip = start;
    while ctx.ip != end {
        if !execute(ctx)? {
            return Ok(false);
        }
        ctx.ip += 1;
    }
    Ok(true)
}
