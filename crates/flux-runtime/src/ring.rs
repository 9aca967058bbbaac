//! SPSC ring transport
//!
//! A bounded single-producer/single-consumer queue of buffer handles —
//! the runtime realization of a graph edge. Never blocks: backpressure
//! is a short write. An enqueue publishes the handles (and, by
//! transitivity, the buffer contents written before it) with a release
//! store of the tail; a dequeue acquires it.
//!
//! Exactly one clone produces into a ring and exactly one clone consumes
//! from it. Fan-in and fan-out are built from *matrices* of rings by the
//! scheduler, never by sharing a ring.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use flux_packet::BufferHandle;

/// Bounded SPSC queue of buffer handles
pub struct SpscRing {
    mask: usize,
    slots: Box<[UnsafeCell<u32>]>,
    /// Next slot to dequeue; written only by the consumer
    head: CachePadded<AtomicUsize>,
    /// Next slot to enqueue; written only by the producer
    tail: CachePadded<AtomicUsize>,
}

// Slots are only written by the producer before the tail release and
// only read by the consumer after the tail acquire.
unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}

impl SpscRing {
    /// Create a ring. Capacity is rounded up to a power of two, min 4.
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.next_power_of_two().max(4);
        Arc::new(Self {
            mask: capacity - 1,
            slots: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Slot capacity
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate occupancy; exact when called by producer or consumer
    #[inline(always)]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// True when no handles are queued
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue as many of `handles` as fit. Returns the accepted count;
    /// anything short of `handles.len()` is backpressure.
    ///
    /// Must only be called from the single producer.
    pub fn enqueue_batch(&self, handles: &[BufferHandle]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let free = self.capacity() - tail.wrapping_sub(head);
        let n = handles.len().min(free);
        for (i, h) in handles[..n].iter().enumerate() {
            let slot = &self.slots[(tail.wrapping_add(i)) & self.mask];
            unsafe { *slot.get() = h.index() as u32 };
        }
        self.tail.store(tail.wrapping_add(n), Ordering::Release);
        n
    }

    /// Dequeue up to `max` handles into `out`. Returns the count taken.
    ///
    /// Must only be called from the single consumer.
    pub fn dequeue_batch(&self, out: &mut Vec<BufferHandle>, max: usize) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let n = tail.wrapping_sub(head).min(max);
        for i in 0..n {
            let slot = &self.slots[(head.wrapping_add(i)) & self.mask];
            out.push(BufferHandle::from_index(unsafe { *slot.get() }));
        }
        self.head.store(head.wrapping_add(n), Ordering::Release);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(range: std::ops::Range<u32>) -> Vec<BufferHandle> {
        range.map(BufferHandle::from_index).collect()
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(SpscRing::new(100).capacity(), 128);
        assert_eq!(SpscRing::new(1).capacity(), 4);
    }

    #[test]
    fn test_enqueue_dequeue_batch() {
        let ring = SpscRing::new(8);
        let put = ring.enqueue_batch(&handles(0..5));
        assert_eq!(put, 5);
        assert_eq!(ring.len(), 5);

        let mut out = Vec::new();
        let got = ring.dequeue_batch(&mut out, 3);
        assert_eq!(got, 3);
        assert_eq!(out.iter().map(|h| h.index()).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_short_write_on_full() {
        let ring = SpscRing::new(8);
        assert_eq!(ring.enqueue_batch(&handles(0..8)), 8);
        assert_eq!(ring.enqueue_batch(&handles(8..12)), 0);

        let mut out = Vec::new();
        ring.dequeue_batch(&mut out, 4);
        assert_eq!(ring.enqueue_batch(&handles(8..14)), 4);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring = SpscRing::new(4);
        let mut next = 0u32;
        let mut expect = 0u32;
        let mut out = Vec::new();
        for _ in 0..100 {
            let put = ring.enqueue_batch(&handles(next..next + 3));
            next += put as u32;
            out.clear();
            ring.dequeue_batch(&mut out, 2);
            for h in &out {
                assert_eq!(h.index() as u32, expect);
                expect += 1;
            }
        }
    }

    #[test]
    fn test_cross_thread_order() {
        use std::thread;

        let ring = SpscRing::new(64);
        const N: u32 = 200_000;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 0u32;
                while next < N {
                    let hi = (next + 16).min(N);
                    let put = ring.enqueue_batch(&handles(next..hi));
                    next += put as u32;
                }
            })
        };

        let mut expect = 0u32;
        let mut out = Vec::new();
        while expect < N {
            out.clear();
            ring.dequeue_batch(&mut out, 32);
            for h in &out {
                assert_eq!(h.index() as u32, expect, "sequence gap at {expect}");
                expect += 1;
            }
        }
        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
