//! Per-thread work list that keeps continuation firing and teardown flat.
//!
//! Settling an inline stage settles its downstream, which fires that
//! value's continuations, and so on down the chain. Run naively this nests
//! one set of stack frames per stage. Dropping a pending chain nests the
//! same way, because each registry owns the next value through its
//! continuations.
//!
//! [`run`] breaks the nesting. The outermost call on a thread executes its
//! task and then drains every task queued while it ran. Nested calls only
//! queue. Stack depth stays constant whatever the chain length.
//!
//! Continuations of one value still fire in registration order. A value
//! settled from inside a continuation has its own continuations fired after
//! the current task returns, before the outermost call returns.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
    /// Set while the outermost [`run`] on this thread is draining.
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    /// Tasks queued by nested [`run`] calls.
    static QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
}

/// Clears the draining flag when the outermost call ends, even on unwind.
struct DrainGuard;

impl DrainGuard {
    fn enter() -> Self {
        DRAINING.with(|draining| draining.set(true));
        Self
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = DRAINING.try_with(|draining| draining.set(false));
    }
}

/// Runs `task` now, or queues it if this thread is already draining.
pub(crate) fn run(task: impl FnOnce() + 'static) {
    // During thread-local teardown there is nothing to queue onto.
    let Ok(draining) = DRAINING.try_with(Cell::get) else {
        task();
        return;
    };

    if draining {
        let mut task = Some(Box::new(task) as Task);
        let _ = QUEUE.try_with(|queue| {
            if let Some(task) = task.take() {
                queue.borrow_mut().push_back(task);
            }
        });
        if let Some(task) = task {
            task();
        }
        return;
    }

    let _guard = DrainGuard::enter();
    task();
    while let Some(next) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        next();
    }
}

/// Returns the number of tasks waiting on this thread.
#[cfg(test)]
pub(crate) fn queued() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}
