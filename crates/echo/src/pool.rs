//! Reusable payload buffers.
//!
//! HTTP workers draw multi-megabyte payloads at a steady rate. Recycling the
//! backing allocations keeps memory flat under sustained load. The pool is a
//! bounded lock-free queue: releases beyond its capacity are simply dropped.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Free list of byte buffers shared by all workers.
pub struct PayloadBufferPool {
    free: ArrayQueue<BytesMut>,
    allocations: AtomicU64,
}

impl PayloadBufferPool {
    /// Create a pool that retains at most `retained` idle buffers.
    pub fn new(retained: usize) -> Self {
        Self {
            free: ArrayQueue::new(retained.max(1)),
            allocations: AtomicU64::new(0),
        }
    }

    /// Take an empty buffer able to hold at least `min_size` bytes.
    ///
    /// A pooled buffer that is too small is dropped and replaced.
    pub fn acquire(&self, min_size: usize) -> BytesMut {
        if let Some(mut buf) = self.free.pop() {
            if buf.capacity() >= min_size {
                buf.clear();
                return buf;
            }
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(min_size)
    }

    /// Hand a buffer back. Contents are not preserved.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        // A full free list drops the buffer.
        let _ = self.free.push(buf);
    }

    /// Number of fresh allocations made so far.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl std::fmt::Debug for PayloadBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadBufferPool")
            .field("idle", &self.idle())
            .field("allocations", &self.allocations())
            .finish()
    }
}
