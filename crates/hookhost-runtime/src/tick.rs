//! Tick queue: the only door from background threads into the runtime.
//!
//! Watcher and fetch threads never touch runtime state; they enqueue
//! callbacks that the tick thread drains once per tick.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::Mutex;
use tracing::error;

use crate::hookable::panic_message;

type Callback<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Thread-safe FIFO of callbacks run on the tick thread.
pub struct TickQueue<T> {
    pending: Mutex<Vec<Callback<T>>>,
}

impl<T> Default for TickQueue<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for TickQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl<T> TickQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` for the next drain.
    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.pending.lock().push(Box::new(callback));
    }

    /// Runs every queued callback in FIFO order and returns how many ran.
    ///
    /// The lock is released before callbacks run, so a callback may
    /// enqueue more work; that work waits for the next drain. A panicking
    /// callback is logged and does not stop the rest.
    pub fn drain(&self, target: &mut T) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();

        for callback in batch {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(target))) {
                error!(error = %panic_message(payload.as_ref()), "Tick callback panicked");
            }
        }

        count
    }

    /// Number of callbacks waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
