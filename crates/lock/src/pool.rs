//! Bounded descriptor pools
//!
//! Item and request descriptors own small collections (request queues,
//! per-duration counts). Clearing a collection keeps its allocation, so
//! recycling descriptors avoids re-allocating those buffers on the hot
//! path. A pool never grows past its limit; surplus descriptors are
//! dropped.
//!
//! Pools live inside the lock table and are protected by the manager latch.

/// A descriptor that can be returned to a [`DescriptorPool`]
pub(crate) trait Recycle {
    /// Reset to the freshly-constructed state, keeping allocations
    fn recycle(&mut self);
}

/// Bounded free list of descriptors
#[derive(Debug)]
pub(crate) struct DescriptorPool<T> {
    free: Vec<T>,
    limit: usize,
}

impl<T: Recycle> DescriptorPool<T> {
    /// Create a pool keeping at most `limit` descriptors
    pub(crate) fn new(limit: usize) -> Self {
        DescriptorPool {
            free: Vec::new(),
            limit,
        }
    }

    /// Take a recycled descriptor, if any
    pub(crate) fn take(&mut self) -> Option<T> {
        self.free.pop()
    }

    /// Return a descriptor; dropped if the pool is full
    pub(crate) fn put(&mut self, mut value: T) {
        if self.free.len() < self.limit {
            value.recycle();
            self.free.push(value);
        }
    }

    /// Change the limit, dropping surplus descriptors
    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.free.truncate(limit);
    }

    /// Number of descriptors waiting for reuse
    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}
