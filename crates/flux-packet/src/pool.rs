//! Preallocated buffer pool
//!
//! One contiguous slab of fixed-size buffers, allocated once at init and
//! addressed by 32-bit index handles. Handles (never pointers) travel
//! through rings, so cross-thread ownership transfer is a copy of a
//! `u32`. A tagged-head free stack serves the global pool; per-worker
//! magazines keep the fast path off it.
//!
//! # Design
//!
//! - Slab is 2 MiB-aligned so the kernel can back it with hugepages
//! - Global free list: lock-free stack, ABA-guarded by a 32-bit tag
//! - `PoolClient` magazine: 64 handles cached per worker
//! - Allocation fails with `PoolExhausted`; free is infallible

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use flux_common::{FluxError, FluxResult};

use crate::buffer::PacketBuffer;

/// Handles cached per worker before spilling to the global pool
pub const MAGAZINE_SIZE: usize = 64;

/// Alignment of the buffer slab (one hugepage)
const SLAB_ALIGN: usize = 2 * 1024 * 1024;

/// Free-list terminator
const NIL: u32 = u32::MAX;

/// Index handle to one buffer in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u32);

impl BufferHandle {
    /// Raw slab index
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Rebuild a handle from a raw index. Only the driver layer should
    /// need this, to map its completion cookies back to buffers.
    #[inline(always)]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }
}

/// The buffer pool: single authority for packet memory
pub struct BufferPool {
    slab: NonNull<PacketBuffer>,
    layout: Layout,
    capacity: usize,
    /// Free stack links; `next[i]` is the handle below `i` on the stack
    next: Box<[AtomicU32]>,
    /// Packed (tag << 32 | head index); the tag defeats ABA
    head: AtomicU64,
    free_count: AtomicUsize,
    alloc_failures: AtomicU64,
    #[cfg(debug_assertions)]
    in_flight: Box<[std::sync::atomic::AtomicBool]>,
}

// Buffers are exclusively owned by whoever holds the handle; the pool
// itself only touches the free-list words, which are atomic.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Allocate a pool of `capacity` buffers
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0 && capacity < NIL as usize, "bad pool capacity");
        let layout = Layout::from_size_align(
            capacity * std::mem::size_of::<PacketBuffer>(),
            SLAB_ALIGN,
        )
        .expect("pool layout");

        let ptr = unsafe { alloc_zeroed(layout) as *mut PacketBuffer };
        let slab = NonNull::new(ptr).expect("pool allocation failed");
        for i in 0..capacity {
            unsafe { std::ptr::write(ptr.add(i), PacketBuffer::empty()) };
        }

        // Thread the whole slab onto the free stack: i -> i+1 -> .. -> NIL
        let next: Box<[AtomicU32]> = (0..capacity)
            .map(|i| {
                AtomicU32::new(if i + 1 < capacity { (i + 1) as u32 } else { NIL })
            })
            .collect();

        Arc::new(Self {
            slab,
            layout,
            capacity,
            next,
            head: AtomicU64::new(pack(0, 0)),
            free_count: AtomicUsize::new(capacity),
            alloc_failures: AtomicU64::new(0),
            #[cfg(debug_assertions)]
            in_flight: (0..capacity)
                .map(|_| std::sync::atomic::AtomicBool::new(false))
                .collect(),
        })
    }

    /// Total number of buffers
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of free buffers
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Cumulative count of failed allocations
    #[inline(always)]
    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures.load(Ordering::Relaxed)
    }

    /// Borrow the buffer behind a handle.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own `h`: the handle is not on the
    /// free list and not visible to any other thread.
    #[inline(always)]
    pub unsafe fn buffer(&self, h: BufferHandle) -> &PacketBuffer {
        debug_assert!(h.index() < self.capacity);
        &*self.slab.as_ptr().add(h.index())
    }

    /// Mutably borrow the buffer behind a handle.
    ///
    /// # Safety
    ///
    /// Same ownership requirement as [`BufferPool::buffer`].
    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub unsafe fn buffer_mut(&self, h: BufferHandle) -> &mut PacketBuffer {
        debug_assert!(h.index() < self.capacity);
        &mut *self.slab.as_ptr().add(h.index())
    }

    /// Pop up to `n` handles from the global free stack into `out`.
    /// Returns the number obtained.
    pub fn pop_batch(&self, out: &mut Vec<BufferHandle>, n: usize) -> usize {
        let mut got = 0;
        while got < n {
            match self.pop() {
                Some(h) => {
                    out.push(h);
                    got += 1;
                }
                None => break,
            }
        }
        if got < n {
            self.alloc_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.free_count.fetch_sub(got, Ordering::Relaxed);
        got
    }

    /// Push handles back onto the global free stack. Infallible.
    pub fn push_batch(&self, handles: &[BufferHandle]) {
        for &h in handles {
            self.push(h);
        }
        self.free_count.fetch_add(handles.len(), Ordering::Relaxed);
    }

    fn pop(&self) -> Option<BufferHandle> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, idx) = unpack(head);
            if idx == NIL {
                return None;
            }
            let next = self.next[idx as usize].load(Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    #[cfg(debug_assertions)]
                    {
                        let was = self.in_flight[idx as usize]
                            .swap(true, Ordering::Relaxed);
                        debug_assert!(!was, "buffer {idx} popped while in flight");
                    }
                    return Some(BufferHandle(idx));
                }
                Err(actual) => head = actual,
            }
        }
    }

    fn push(&self, h: BufferHandle) {
        #[cfg(debug_assertions)]
        {
            let was = self.in_flight[h.index()].swap(false, Ordering::Relaxed);
            debug_assert!(was, "buffer {} freed while on the free list", h.index());
        }
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, idx) = unpack(head);
            self.next[h.index()].store(idx, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), h.0),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        unsafe { dealloc(self.slab.as_ptr() as *mut u8, self.layout) };
    }
}

#[inline(always)]
fn pack(tag: u32, idx: u32) -> u64 {
    ((tag as u64) << 32) | idx as u64
}

#[inline(always)]
fn unpack(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

/// Per-worker allocation front end with a handle magazine
pub struct PoolClient {
    pool: Arc<BufferPool>,
    magazine: Vec<BufferHandle>,
}

impl PoolClient {
    /// Create a client over the shared pool
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            magazine: Vec::with_capacity(2 * MAGAZINE_SIZE),
        }
    }

    /// The pool this client draws from
    #[inline(always)]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Allocate up to `n` buffers into `out`. Returns the count obtained,
    /// or `PoolExhausted` when not even one buffer is free.
    pub fn alloc_batch(&mut self, out: &mut Vec<BufferHandle>, n: usize) -> FluxResult<usize> {
        let mut got = 0;
        while got < n {
            if self.magazine.is_empty()
                && self.pool.pop_batch(&mut self.magazine, MAGAZINE_SIZE) == 0
            {
                break;
            }
            let take = (n - got).min(self.magazine.len());
            let at = self.magazine.len() - take;
            out.extend(self.magazine.drain(at..));
            got += take;
        }
        if got == 0 {
            return Err(FluxError::PoolExhausted);
        }
        Ok(got)
    }

    /// Allocate a single buffer
    #[inline]
    pub fn alloc(&mut self) -> FluxResult<BufferHandle> {
        if self.magazine.is_empty()
            && self.pool.pop_batch(&mut self.magazine, MAGAZINE_SIZE) == 0
        {
            return Err(FluxError::PoolExhausted);
        }
        Ok(self.magazine.pop().unwrap())
    }

    /// Return buffers to the magazine, spilling the excess to the pool.
    pub fn free_batch(&mut self, handles: &[BufferHandle]) {
        self.magazine.extend_from_slice(handles);
        if self.magazine.len() > MAGAZINE_SIZE {
            let spill_from = self.magazine.len() - MAGAZINE_SIZE;
            self.pool.push_batch(&self.magazine[..spill_from]);
            self.magazine.drain(..spill_from);
        }
    }

    /// Return a single buffer
    #[inline]
    pub fn free(&mut self, h: BufferHandle) {
        self.free_batch(&[h]);
    }
}

impl Drop for PoolClient {
    fn drop(&mut self) {
        self.pool.push_batch(&self.magazine);
        self.magazine.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free_roundtrip() {
        let pool = BufferPool::new(128);
        let mut client = PoolClient::new(pool.clone());

        let mut batch = Vec::new();
        let got = client.alloc_batch(&mut batch, 32).unwrap();
        assert_eq!(got, 32);
        assert_eq!(batch.len(), 32);

        client.free_batch(&batch);
        drop(client);
        assert_eq!(pool.available(), 128);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = BufferPool::new(16);
        let mut client = PoolClient::new(pool.clone());

        let mut batch = Vec::new();
        let got = client.alloc_batch(&mut batch, 64).unwrap();
        assert_eq!(got, 16);
        assert!(matches!(
            client.alloc_batch(&mut batch, 1),
            Err(FluxError::PoolExhausted)
        ));
        assert!(pool.alloc_failures() > 0);
    }

    #[test]
    fn test_handles_are_unique() {
        let pool = BufferPool::new(64);
        let mut client = PoolClient::new(pool);
        let mut batch = Vec::new();
        client.alloc_batch(&mut batch, 64).unwrap();
        let mut idx: Vec<_> = batch.iter().map(|h| h.index()).collect();
        idx.sort_unstable();
        idx.dedup();
        assert_eq!(idx.len(), 64);
    }

    #[test]
    fn test_buffer_access() {
        let pool = BufferPool::new(8);
        let mut client = PoolClient::new(pool.clone());
        let h = client.alloc().unwrap();
        unsafe {
            let buf = pool.buffer_mut(h);
            buf.fill(&[0xDE, 0xAD]);
            assert_eq!(pool.buffer(h).data(), &[0xDE, 0xAD]);
        }
        client.free(h);
    }

    #[test]
    fn test_concurrent_alloc_free() {
        use std::thread;

        let pool = BufferPool::new(1024);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                let mut client = PoolClient::new(pool);
                let mut batch = Vec::new();
                for _ in 0..1000 {
                    batch.clear();
                    let got = client.alloc_batch(&mut batch, 16).unwrap();
                    assert!(got >= 1);
                    client.free_batch(&batch);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), 1024);
    }
}
