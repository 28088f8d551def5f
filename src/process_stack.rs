//! Per-process value stack.
//!
//! A contiguous, 64-byte-aligned, growable buffer of [`Value`] slots. One
//! activation's frame is the slice `[base, top)` laid out as
//! `[receiver?][parameters][constants][locals][temporaries]`; the slot at
//! `top` itself is reserved headroom where native builtins leave their return
//! value, which is why every growth keeps one slot past `top` allocated.
//!
//! All bookkeeping is in slot offsets, never pointers, so growth preserves
//! frames without fix-up.

use std::alloc::{alloc, dealloc, Layout};
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{RuntimeError, RuntimeResult};
use crate::function::Function;
use crate::instruction::Operand;
use crate::value::Value;

/// Required buffer alignment in bytes.
pub const STACK_ALIGN: usize = 64;

/// Raw aligned allocation holding initialized `Value` slots.
struct AlignedBuf {
    ptr: NonNull<Value>,
    cap: usize,
}

// The buffer is owned by exactly one `ProcessStack`, which is only reachable
// behind the owning process's lock.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: 0,
        }
    }

    fn layout(cap: usize) -> RuntimeResult<Layout> {
        Layout::from_size_align(cap * mem::size_of::<Value>(), STACK_ALIGN)
            .map_err(|_| RuntimeError::stack_allocation_failed(cap))
    }

    /// Grows to `new_cap` slots, moving existing values and nil-filling the
    /// region `[old_cap, new_cap)`.
    fn grow(&mut self, new_cap: usize) -> RuntimeResult<()> {
        debug_assert!(new_cap > self.cap);
        let layout = Self::layout(new_cap)?;
        // SAFETY: layout has non-zero size (new_cap > 0); old values are moved
        // bitwise into the new buffer and the old allocation is released
        // without running their destructors.
        unsafe {
            let raw = alloc(layout) as *mut Value;
            let ptr = NonNull::new(raw)
                .ok_or_else(|| RuntimeError::stack_allocation_failed(new_cap))?;
            if self.cap > 0 {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), ptr.as_ptr(), self.cap);
                dealloc(self.ptr.as_ptr() as *mut u8, Self::layout(self.cap)?);
            }
            for i in self.cap..new_cap {
                ptr.as_ptr().add(i).write(Value::Nil);
            }
            self.ptr = ptr;
            self.cap = new_cap;
        }
        Ok(())
    }

    fn as_slice(&self) -> &[Value] {
        if self.cap == 0 {
            return &[];
        }
        // SAFETY: every slot in [0, cap) is initialized.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.cap) }
    }

    fn as_mut_slice(&mut self) -> &mut [Value] {
        if self.cap == 0 {
            return &mut [];
        }
        // SAFETY: every slot in [0, cap) is initialized.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.cap) }
    }

    fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.cap == 0 {
            return;
        }
        // SAFETY: all slots are initialized; the layout matches the allocation.
        unsafe {
            for i in 0..self.cap {
                ptr::drop_in_place(self.ptr.as_ptr().add(i));
            }
            if let Ok(layout) = Self::layout(self.cap) {
                dealloc(self.ptr.as_ptr() as *mut u8, layout);
            }
        }
    }
}

/// A caller's saved `(base, top, temporaries)` tuple, recorded as offsets so
/// growth cannot invalidate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedFrame {
    pub base: usize,
    pub top: usize,
    pub temp: usize,
}

/// Snapshot of the `[parameters][constants][locals]` slice of one frame, plus
/// the absolute base offset at capture time. Replays the enclosing scope for
/// a `when`/`whenever` block after the process has returned to its mailbox
/// loop.
#[derive(Debug, Clone, Default)]
pub struct ClosureState {
    values: Vec<Value>,
    base_offset: usize,
}

impl ClosureState {
    /// An empty snapshot (nothing to restore).
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the capture holds no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of captured slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Absolute frame base at capture time.
    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// The captured slots.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The captured slots, mutable (incremental fix-up).
    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// Grows or shrinks the capture, nil-filling any new slots.
    pub fn resize(&mut self, new_len: usize) {
        self.values.resize(new_len, Value::Nil);
    }
}

/// Growable frame stack for one process.
pub struct ProcessStack {
    buf: AlignedBuf,
    frames: Vec<SavedFrame>,
    base: usize,
    top: usize,
    temp: usize,
}

impl Default for ProcessStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStack {
    /// A stack with no storage; the first frame setup allocates.
    pub fn new() -> Self {
        Self {
            buf: AlignedBuf::empty(),
            frames: Vec::new(),
            base: 0,
            top: 0,
            temp: 0,
        }
    }

    /// Absolute offset of the current frame base.
    pub fn base_offset(&self) -> usize {
        self.base
    }

    /// Absolute offset of the first free slot.
    pub fn top_offset(&self) -> usize {
        self.top
    }

    /// Absolute offset of the first temporary slot.
    pub fn temp_offset(&self) -> usize {
        self.temp
    }

    /// Number of saved caller frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Allocated capacity in slots.
    pub fn capacity(&self) -> usize {
        self.buf.cap
    }

    /// Address of the backing buffer; exposed so tests can check alignment.
    pub fn buffer_addr(&self) -> usize {
        self.buf.addr()
    }

    /// Slot at `offset` relative to the frame base.
    pub fn at(&self, offset: Operand) -> &Value {
        &self.buf.as_slice()[self.base + offset as usize]
    }

    /// Mutable slot at `offset` relative to the frame base.
    pub fn at_mut(&mut self, offset: Operand) -> &mut Value {
        let index = self.base + offset as usize;
        &mut self.buf.as_mut_slice()[index]
    }

    /// Slot at an absolute offset.
    pub fn abs(&self, index: usize) -> &Value {
        &self.buf.as_slice()[index]
    }

    /// Mutable slot at an absolute offset.
    pub fn abs_mut(&mut self, index: usize) -> &mut Value {
        &mut self.buf.as_mut_slice()[index]
    }

    /// The native-call return slot: the reserved slot at `top`.
    pub fn ccall_return(&self) -> &Value {
        self.abs(self.top)
    }

    /// The native-call return slot, mutable.
    pub fn ccall_return_mut(&mut self) -> &mut Value {
        let index = self.top;
        self.abs_mut(index)
    }

    /// Whether a base-relative offset lands in the temporaries region.
    pub fn is_temporary(&self, offset: Operand) -> bool {
        self.base + offset as usize >= self.temp
    }

    /// Grows the buffer so `required_top` plus the native-call headroom slot
    /// is addressable. Offsets are untouched; the new region is nil.
    pub fn ensure_capacity(&mut self, required_top: usize) -> RuntimeResult<()> {
        if required_top + 1 > self.buf.cap {
            self.buf.grow(required_top + 1)?;
        }
        Ok(())
    }

    /// Saves the caller's `(base, top, temp)` tuple.
    pub fn push_frame(&mut self) {
        self.frames.push(SavedFrame {
            base: self.base,
            top: self.top,
            temp: self.temp,
        });
    }

    /// Restores the most recently saved frame tuple.
    pub fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.base = frame.base;
            self.top = frame.top;
            self.temp = frame.temp;
        }
    }

    /// Pops saved frames until only `depth` remain. Used to unwind after a
    /// fault aborts a message mid-call.
    pub fn truncate_frames(&mut self, depth: usize) {
        while self.frames.len() > depth {
            self.pop_frame();
        }
    }

    /// Allocates the frame for a new activation.
    ///
    /// Methods and when-evals keep the caller's base so class state stays
    /// addressable; other functions start their frame at the caller's top.
    /// When-evals size the frame from the shared base rather than stacking
    /// storage on top, since their closure is about to be restored over it.
    pub fn setup_frame(&mut self, function: &Function) -> RuntimeResult<()> {
        self.push_frame();

        self.base = if function.reuse_context {
            self.base
        } else {
            self.top
        };
        self.top = if function.is_when_eval {
            self.base + function.temp_end
        } else {
            self.top + function.storage_requirement
        };
        self.temp = function.temp_start
            + if function.reuse_context { 0 } else { self.base };

        self.ensure_capacity(self.top)
    }

    /// Copies the function's constant pool into the frame anchored at
    /// `at_base`.
    pub fn install_constants(&mut self, function: &Function, at_base: usize) {
        let start = at_base + function.constants_start;
        let slots = self.buf.as_mut_slice();
        for (i, constant) in function.constants.iter().enumerate() {
            slots[start + i] = constant.clone();
        }
    }

    /// Nil-fills the locals region of the frame anchored at `at_base`, so
    /// container slots start out empty.
    pub fn clear_locals(&mut self, function: &Function, at_base: usize) {
        let start = at_base + function.locals_start;
        let slots = self.buf.as_mut_slice();
        for slot in &mut slots[start..start + function.locals_count()] {
            *slot = Value::Nil;
        }
    }

    /// Moves an owned argument buffer into the parameter region of the frame
    /// anchored at `at_base`.
    pub fn write_args(&mut self, function: &Function, at_base: usize, args: Vec<Value>) {
        let start = at_base + function.parameters_start;
        let slots = self.buf.as_mut_slice();
        for (i, arg) in args.into_iter().take(function.parameter_count()).enumerate() {
            slots[start + i] = arg;
        }
    }

    /// Snapshots the current frame's parameters, constants and locals.
    pub fn capture_closure(&self, function: &Function) -> ClosureState {
        let count = function.capture_count();
        if count == 0 {
            return ClosureState::empty();
        }
        let start = self.base + function.parameters_start;
        ClosureState {
            values: self.buf.as_slice()[start..start + count].to_vec(),
            base_offset: self.base,
        }
    }

    /// Rebases the freshly set up frame to the closure's captured base and
    /// copies the snapshot back onto the stack.
    pub fn apply_closure_state(
        &mut self,
        function: &Function,
        closure: &ClosureState,
    ) -> RuntimeResult<()> {
        let delta = closure.base_offset as isize - self.base as isize;
        self.base = closure.base_offset;
        self.top = (self.top as isize + delta) as usize;
        self.temp = (self.temp as isize + delta) as usize;
        self.ensure_capacity(self.top)?;

        if !closure.is_empty() {
            let start = self.base + function.parameters_start;
            let slots = self.buf.as_mut_slice();
            for (i, value) in closure.values.iter().enumerate() {
                slots[start + i] = value.clone();
            }
        }
        Ok(())
    }

    /// Copies the frame's capture slice back into the snapshot, so mutations
    /// made by a `whenever` body survive to its next evaluation.
    pub fn update_closure_state(&self, function: &Function, closure: &mut ClosureState) {
        if closure.is_empty() {
            return;
        }
        let start = self.base + function.parameters_start;
        let count = closure.values.len();
        closure
            .values
            .clone_from_slice(&self.buf.as_slice()[start..start + count]);
    }

    /// Relocates live locals after an incremental recompile appended
    /// constants, nil-fills any newly declared locals, and copies the
    /// appended constants into the gap the locals vacated.
    ///
    /// `old_constants`/`old_locals` are the counts initialized by the previous
    /// incremental run. Returns whether anything moved; running again with
    /// unchanged counts is a no-op.
    pub fn incremental_stack_shift(
        &mut self,
        function: &Function,
        old_constants: usize,
        old_locals: usize,
    ) -> RuntimeResult<bool> {
        let old_offset = function.constants_start + old_constants;
        let new_offset = function.locals_start;
        let moved = new_offset != old_offset;

        self.ensure_capacity(self.base + function.temp_end)?;

        let old_start = self.base + old_offset;
        let new_start = self.base + new_offset;

        if moved {
            // Lift the live locals out before overwriting their old home.
            let live: Vec<Value> = self.buf.as_slice()[old_start..old_start + old_locals].to_vec();
            let slots = self.buf.as_mut_slice();
            for (i, value) in live.into_iter().enumerate() {
                slots[new_start + i] = value;
            }
        }

        if function.locals_count() > old_locals {
            let slots = self.buf.as_mut_slice();
            for slot in &mut slots[new_start + old_locals..new_start + function.locals_count()] {
                *slot = Value::Nil;
            }
        }

        let appended = function.constant_count() - old_constants;
        if appended > 0 {
            let slots = self.buf.as_mut_slice();
            for i in 0..appended {
                slots[old_start + i] = function.constants[old_constants + i].clone();
            }
        }

        Ok(moved)
    }
}
