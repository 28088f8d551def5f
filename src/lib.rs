//! # Eople Virtual Machine
//!
//! Execution runtime for the Eople language: a register-style bytecode VM
//! whose unit of execution is a lightweight actor-style *process*. Each
//! process owns a private stack and a mailbox; processes interact only by
//! message, never by shared mutable state. A small pool of worker threads
//! multiplexes the processes onto the physical cores.
//!
//! On top of plain messages the runtime implements the language's temporal
//! control flow: one-shot `when` and repeating `whenever` blocks that
//! re-evaluate after every message a process handles, and first-class
//! promises used both for RPC-style replies and for timers.
//!
//! ## Architecture
//!
//! - [`VirtualMachine`]: worker pool, mailbox queues, execution entry points
//! - [`ProcessStack`]: aligned growable frame stack with closure capture
//! - [`jump_table`]: opcode dispatch and the instruction handlers
//! - [`Function`]: immutable descriptors with a hot-swap replacement slot
//! - [`Promise`]: single-assignment cells with chain resolution and timers
//! - [`FunctionBuilder`]: programmatic bytecode construction for embedders
//!
//! ## Example
//!
//! ```rust
//! use eople_vm::{CallData, FunctionBuilder, Opcode, Value, VirtualMachine};
//!
//! // fn forty_two() -> int: return 40 + 2
//! let mut f = FunctionBuilder::new("forty_two");
//! let a = f.constant(Value::Int(40));
//! let b = f.constant(Value::Int(2));
//! let out = f.temp();
//! f.op(Opcode::AddI, a, b, out, 0);
//! f.op(Opcode::ReturnValue, out, 0, 0, 0);
//! let forty_two = f.build();
//!
//! let vm = VirtualMachine::new();
//! let main = vm.spawn();
//! let result = vm.execute_function(CallData::call(forty_two, main)).unwrap();
//! assert_eq!(result, Value::Int(42));
//! ```

pub mod builder;
pub mod builtins;
pub mod console;
pub mod error;
pub mod function;
pub mod instruction;
pub mod jump_table;
pub mod module;
pub mod process;
pub mod process_stack;
pub mod promise;
pub mod types;
pub mod value;
pub mod vm;

pub use builder::FunctionBuilder;
pub use console::{CapturedOutput, Console};
pub use error::{RuntimeError, RuntimeResult};
pub use function::{Function, FunctionSpec};
pub use instruction::{Instruction, NativeFn, Op, Opcode, Operand};
pub use module::{Builtin, Module};
pub use process::{Process, ProcessState, WhenBlock};
pub use process_stack::{ClosureState, ProcessStack, SavedFrame};
pub use promise::Promise;
pub use types::{Type, TypeId, TypeInterner};
pub use value::{Value, ValueKind};
pub use vm::{CallData, ExecContext, VirtualMachine, VmConfig};
