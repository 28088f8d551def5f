//! Promise cells.
//!
//! A promise is a single-assignment cell with a ready flag, owned by the
//! process that will consume it. Reply promises are fulfilled when their
//! producing function returns; timer promises are flipped ready by the
//! scheduler when their wake-up message matures. A promise whose payload is
//! itself a promise is *chained*: readiness and reads walk the chain.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::process::Process;
use crate::value::Value;

#[derive(Debug)]
struct PromiseCell {
    value: Value,
    ready: bool,
}

/// Single-assignment result cell.
#[derive(Debug)]
pub struct Promise {
    owner: Arc<Process>,
    is_timer: bool,
    cell: Mutex<PromiseCell>,
}

impl Promise {
    /// A pending reply promise owned by `owner`.
    pub fn new(owner: Arc<Process>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            is_timer: false,
            cell: Mutex::new(PromiseCell {
                value: Value::Nil,
                ready: false,
            }),
        })
    }

    /// A pending timer promise owned by `owner`.
    pub fn new_timer(owner: Arc<Process>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            is_timer: true,
            cell: Mutex::new(PromiseCell {
                value: Value::Nil,
                ready: false,
            }),
        })
    }

    /// The process whose `when`/`whenever` blocks wait on this promise.
    pub fn owner(&self) -> &Arc<Process> {
        &self.owner
    }

    /// Whether this promise was created by the `after` builtin.
    pub fn is_timer(&self) -> bool {
        self.is_timer
    }

    /// Stores the result and flips the ready flag. The first write wins;
    /// once ready, neither flag nor value ever change again.
    pub fn fulfill(&self, value: Value) {
        let mut cell = self.cell.lock();
        if cell.ready {
            return;
        }
        cell.value = value;
        cell.ready = true;
    }

    /// Flips a timer promise ready without a payload.
    pub fn mark_ready(&self) {
        self.fulfill(Value::Nil);
    }

    /// Whether every link along the promise chain is ready. A link whose
    /// payload is another promise defers to that promise; a ready link with a
    /// nil payload is terminal (timers).
    pub fn is_ready(self: &Arc<Self>) -> bool {
        let mut current = Arc::clone(self);
        loop {
            let (ready, value) = {
                let cell = current.cell.lock();
                (cell.ready, cell.value.clone())
            };
            if !ready {
                return false;
            }
            match value {
                Value::Promise(inner) => current = inner,
                _ => return true,
            }
        }
    }

    /// The payload at the end of the chain. Container payloads are
    /// deep-copied so the consumer gets its own writable value.
    pub fn get_value(self: &Arc<Self>) -> Value {
        let mut current = Arc::clone(self);
        loop {
            let value = current.cell.lock().value.clone();
            match value {
                Value::Promise(inner) => current = inner,
                other => return other.deep_copy(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Arc<Process> {
        Process::new(0)
    }

    #[test]
    fn ready_is_monotonic() {
        let promise = Promise::new(owner());
        assert!(!promise.is_ready());

        promise.fulfill(Value::Int(1));
        assert!(promise.is_ready());
        assert_eq!(promise.get_value(), Value::Int(1));

        // A second write is ignored.
        promise.fulfill(Value::Int(2));
        assert!(promise.is_ready());
        assert_eq!(promise.get_value(), Value::Int(1));
    }

    #[test]
    fn timer_is_ready_with_nil_payload() {
        let promise = Promise::new_timer(owner());
        promise.mark_ready();
        assert!(promise.is_ready());
        assert_eq!(promise.get_value(), Value::Nil);
    }

    #[test]
    fn chain_walks_to_inner_value() {
        let inner = Promise::new(owner());
        let outer = Promise::new(owner());
        outer.fulfill(Value::Promise(Arc::clone(&inner)));

        // Outer is ready but the chain is not until inner resolves.
        assert!(!outer.is_ready());

        inner.fulfill(Value::Int(42));
        assert!(outer.is_ready());
        assert_eq!(outer.get_value(), Value::Int(42));
    }

    #[test]
    fn get_value_copies_containers() {
        let promise = Promise::new(owner());
        let stored = Value::str("payload");
        promise.fulfill(stored.clone());

        let read = promise.get_value();
        if let (Value::Str(a), Value::Str(b)) = (&stored, &read) {
            assert!(!Arc::ptr_eq(a, b));
            assert_eq!(*a.read(), *b.read());
        } else {
            unreachable!();
        }
    }
}
