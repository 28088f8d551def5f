//! Runtime processes.
//!
//! An Eople class constructor builds a `Process`, not an object: a lightweight
//! actor owning a private stack and a set of pending temporal blocks. A
//! process executes at most one message at a time, enforced by its lock;
//! workers acquire it with try-lock semantics and never block each other
//! while holding it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::function::Function;
use crate::process_stack::{ClosureState, ProcessStack};

/// Spins this many times on a contended lock before taking a micro-nap.
const LOCK_RETRY_LIMIT: u32 = 50;
/// Nap length between retry bursts.
const LOCK_RETRY_NAP: Duration = Duration::from_micros(500);

/// A registered `when`/`whenever` block: the evaluation function compiled
/// from the block's condition and body, plus the captured enclosing scope.
#[derive(Debug)]
pub struct WhenBlock {
    /// Evaluation function; starts with a `When` or `Whenever` instruction.
    pub eval: Arc<Function>,
    /// Snapshot of the registering frame's parameters/constants/locals.
    pub closure: ClosureState,
}

/// Saved call site for a nested function call within one process turn.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// The caller's function.
    pub function: Arc<Function>,
    /// The caller's instruction index.
    pub ip: usize,
}

/// Everything about a process that changes while it runs. Only reachable
/// behind the process lock.
#[derive(Default)]
pub struct ProcessState {
    /// The process's value stack.
    pub stack: ProcessStack,
    /// Saved instruction pointers for nested calls in the current turn.
    pub callstack: Vec<CallSite>,
    /// Pending one-shot blocks, in registration order.
    pub when_blocks: Vec<WhenBlock>,
    /// Pending repeating blocks, in registration order.
    pub whenever_blocks: Vec<WhenBlock>,

    /// Last instruction index executed by the incremental (REPL) path.
    pub incremental_ip: usize,
    /// Constants initialized by the previous incremental run.
    pub incremental_constants: usize,
    /// Locals initialized by the previous incremental run.
    pub incremental_locals: usize,
}

/// A lightweight actor-style process.
pub struct Process {
    id: u32,
    state: Mutex<ProcessState>,
}

impl Process {
    pub(crate) fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(ProcessState::default()),
        })
    }

    /// The process's unique identifier; also selects its mailbox queue.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Attempts to take the process lock without blocking.
    pub fn try_lock_state(&self) -> Option<MutexGuard<'_, ProcessState>> {
        self.state.try_lock()
    }

    /// Acquires the process lock with the scheduler's bounded-spin discipline:
    /// try, and every `LOCK_RETRY_LIMIT` failures sleep for half a
    /// millisecond so a contended core is not burned.
    pub fn lock_state_with_backoff(&self) -> MutexGuard<'_, ProcessState> {
        let mut retries = 0;
        loop {
            if let Some(guard) = self.state.try_lock() {
                return guard;
            }
            retries += 1;
            if retries > LOCK_RETRY_LIMIT {
                std::thread::sleep(LOCK_RETRY_NAP);
                retries = 0;
            }
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process").field("id", &self.id).finish()
    }
}
