//! Lock-free hand-off queues and buffer pools
//!
//! Buffers cross between the real-time callbacks and the background tasks
//! through these. Both are bounded `ArrayQueue`s: pushes and pops are
//! wait-free and never allocate, so they are safe inside an audio callback.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded single-producer single-consumer queue with overflow accounting
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push an item, handing it back when the buffer is full
    pub fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item).map_err(|item| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            item
        })
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

pub fn create_shared_buffer<T>(capacity: usize) -> SharedRingBuffer<T> {
    Arc::new(RingBuffer::new(capacity))
}

/// Free list of reusable buffers
///
/// Consumers give buffers back once they are done with them; producers take
/// from the pool and only allocate when it is empty.
pub struct BufferPool<T> {
    free: ArrayQueue<T>,
    allocated: AtomicUsize,
}

impl<T> BufferPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Pool pre-filled with `count` buffers built by `make`
    pub fn prefilled(capacity: usize, count: usize, mut make: impl FnMut() -> T) -> Self {
        let pool = Self::new(capacity);
        for _ in 0..count.min(capacity) {
            pool.give(make());
        }
        pool
    }

    /// Reuse a pooled buffer or build a new one
    pub fn take_or(&self, make: impl FnOnce() -> T) -> T {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                make()
            }
        }
    }

    /// Return a buffer. Dropped when the pool is already full.
    pub fn give(&self, item: T) {
        let _ = self.free.push(item);
    }

    /// Buffers currently available
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers built because the pool was empty
    pub fn allocations(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

pub type SharedBufferPool<T> = Arc<BufferPool<T>>;
