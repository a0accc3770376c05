//! Reusable string buffers for building statement text.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

const DEFAULT_BUFFER_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<String>>,
    max_idle: usize,
}

impl BufferPool {
    /// A pool keeping at most `max_idle` returned buffers.
    pub fn new(max_idle: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Take an empty buffer. It goes back to the pool when the guard drops.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| String::with_capacity(DEFAULT_BUFFER_CAPACITY));
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn put(&self, mut buf: String) {
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_idle {
            buffers.push(buf);
        }
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<String>,
}

impl Deref for PooledBuffer<'_> {
    type Target = String;

    fn deref(&self) -> &String {
        self.buf.as_ref().map_or(&EMPTY, |b| b)
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut String {
        self.buf.get_or_insert_with(String::new)
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

static EMPTY: String = String::new();
