//! Pooled argument buffers for by-ref handler variants.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::definitions::HookValue;

const DEFAULT_MAX_POOLED: usize = 32;

/// Pool of reusable, resizable argument buffers.
#[derive(Debug)]
pub struct ArgPool {
    buffers: Mutex<Vec<Vec<HookValue>>>,
    max_pooled: usize,
}

impl Default for ArgPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}

impl ArgPool {
    /// Creates a pool keeping at most `max_pooled` idle buffers.
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Rents a buffer holding a copy of `values`; it returns to the pool on drop.
    pub fn rent(&self, values: &[HookValue]) -> Rented<'_> {
        let mut buffer = self.buffers.lock().pop().unwrap_or_default();
        buffer.extend_from_slice(values);
        Rented { pool: self, buffer }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn give_back(&self, mut buffer: Vec<HookValue>) {
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }
}

/// A buffer on loan from an [`ArgPool`].
#[derive(Debug)]
pub struct Rented<'a> {
    pool: &'a ArgPool,
    buffer: Vec<HookValue>,
}

impl Deref for Rented<'_> {
    type Target = Vec<HookValue>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for Rented<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for Rented<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}
