//! Bounded single-producer / single-consumer ring
//!
//! The hand-off primitive between adjacent pipeline stages. Capacity is a
//! power of two (enforced); head and tail live on separate cache lines; a
//! successful `pop` observes every write that preceded the matching `push`
//! in the producer's program order (release/acquire pairing on the indices).
//!
//! # Key Design:
//! - `push` fails when full, `pop` fails when empty - no retries, no blocking
//! - The producer and consumer roles are enforced by the type system:
//!   construction returns a `(SpscProducer, SpscConsumer)` pair and neither
//!   half is clonable, so a second producer cannot exist by construction
//! - Indices are free-running `usize` counters masked on access, so full vs
//!   empty needs no reserved slot

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct SpscInner<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Producer-advanced write index
    head: CachePadded<AtomicUsize>,
    /// Consumer-advanced read index
    tail: CachePadded<AtomicUsize>,
}

// T moves across the ring exactly once; the index protocol guarantees a slot
// is never read and written concurrently.
unsafe impl<T: Send> Send for SpscInner<T> {}
unsafe impl<T: Send> Sync for SpscInner<T> {}

impl<T> Drop for SpscInner<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Relaxed);
        while tail != head {
            let slot = &self.buffer[tail & self.mask];
            // SAFETY: slots in [tail, head) were written and never consumed.
            unsafe { (*slot.get()).assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Create a bounded SPSC ring. `capacity` must be a power of two.
pub fn spsc_channel<T>(capacity: usize) -> (SpscProducer<T>, SpscConsumer<T>) {
    assert!(
        capacity.is_power_of_two() && capacity > 0,
        "spsc capacity must be a nonzero power of two, got {capacity}"
    );
    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(SpscInner {
        buffer,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        SpscProducer {
            inner: inner.clone(),
        },
        SpscConsumer { inner },
    )
}

/// Write half. Exactly one exists per ring.
pub struct SpscProducer<T> {
    inner: Arc<SpscInner<T>>,
}

impl<T> SpscProducer<T> {
    /// Push one element; returns it back when the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) > self.inner.mask {
            return Err(value);
        }
        let slot = &self.inner.buffer[head & self.inner.mask];
        // SAFETY: the slot at `head` is outside [tail, head) and therefore
        // not visible to the consumer until the release store below.
        unsafe { (*slot.get()).write(value) };
        self.inner.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Acquire);
        let tail = self.inner.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() > self.inner.mask
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}

/// Read half. Exactly one exists per ring.
pub struct SpscConsumer<T> {
    inner: Arc<SpscInner<T>>,
}

impl<T> SpscConsumer<T> {
    /// Pop one element; `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let slot = &self.inner.buffer[tail & self.inner.mask];
        // SAFETY: the acquire load of `head` makes the producer's write to
        // this slot visible; the slot leaves the live range on the store
        // below and is never touched again until re-written.
        let value = unsafe { (*slot.get()).assume_init_read() };
        self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Acquire);
        let tail = self.inner.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}
