//! Transfer buffer allocation
//!
//! Buffers are handed out by a [`BufferAllocator`] and wrapped in a
//! [`TransferBuffer`], which gives the memory back to the same allocator when
//! it is dropped. A session therefore never frees a buffer by hand: dropping
//! the session, or dropping a half-built one during a failed attach, releases
//! every buffer exactly once.

use crate::error::AllocError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Allocation primitive supplied by the host environment
pub trait BufferAllocator: Send + Sync + fmt::Debug {
    /// Allocate a zeroed buffer of exactly `len` bytes
    fn allocate(&self, len: usize) -> Result<Vec<u8>, AllocError>;

    /// Give a buffer back. Never fails.
    fn release(&self, buffer: Vec<u8>);
}

/// Fallible heap allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<Vec<u8>, AllocError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| AllocError { requested: len })?;
        buffer.resize(len, 0);
        Ok(buffer)
    }

    fn release(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

/// Allocator wrapper that counts allocations and releases
///
/// Can also be told to fail once a number of allocations have succeeded,
/// which is how attach failure paths are exercised.
#[derive(Debug)]
pub struct CountingAllocator<A = HeapAllocator> {
    inner: A,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    fail_after: Option<usize>,
}

impl CountingAllocator<HeapAllocator> {
    pub fn new() -> Self {
        Self::wrap(HeapAllocator)
    }

    /// Succeed `successes` times, then report out-of-memory
    pub fn failing_after(successes: usize) -> Self {
        Self {
            fail_after: Some(successes),
            ..Self::new()
        }
    }
}

impl Default for CountingAllocator<HeapAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: BufferAllocator> CountingAllocator<A> {
    pub fn wrap(inner: A) -> Self {
        Self {
            inner,
            allocations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Successful allocations so far
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Releases so far
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Buffers currently handed out
    pub fn outstanding(&self) -> usize {
        self.allocations().saturating_sub(self.releases())
    }
}

impl<A: BufferAllocator> BufferAllocator for CountingAllocator<A> {
    fn allocate(&self, len: usize) -> Result<Vec<u8>, AllocError> {
        if let Some(limit) = self.fail_after
            && self.allocations() >= limit
        {
            return Err(AllocError { requested: len });
        }

        let buffer = self.inner.allocate(len)?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(buffer)
    }

    fn release(&self, buffer: Vec<u8>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(buffer);
    }
}

/// A buffer owned by a session, returned to its allocator on drop
pub struct TransferBuffer {
    data: Vec<u8>,
    allocator: Arc<dyn BufferAllocator>,
}

impl TransferBuffer {
    /// Allocate a buffer of exactly `len` bytes from `allocator`
    pub fn allocate(allocator: &Arc<dyn BufferAllocator>, len: usize) -> Result<Self, AllocError> {
        let data = allocator.allocate(len)?;
        trace!("Allocated {} byte transfer buffer", len);
        Ok(Self {
            data,
            allocator: Arc::clone(allocator),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        let len = self.data.len();
        self.allocator.release(std::mem::take(&mut self.data));
        trace!("Released {} byte transfer buffer", len);
    }
}
