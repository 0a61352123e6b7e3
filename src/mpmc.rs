//! Bounded multi-producer / multi-consumer ring
//!
//! The fan-in primitive for market-data and session events: every matching
//! engine and the risk engine produce into one ring, a single thread on the
//! other end drains it. Classic bounded-MPMC protocol: each slot carries its
//! own sequence counter, producers claim positions with CAS on `enqueue_pos`
//! and publish by bumping the slot sequence with release semantics;
//! consumers mirror the dance one turn behind.
//!
//! FIFO observability holds between matched push/pop pairs: a consumer that
//! pops two elements produced by the same thread sees them in that
//! producer's program order.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring. Share via `Arc`; `push`/`pop` take `&self`.
pub struct MpmcQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// The sequence protocol guarantees exclusive access to a slot's value
// between the claim and the publish on either side.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a ring. `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "mpmc capacity must be a nonzero power of two, got {capacity}"
        );
        let buffer = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Push one element; returns it back when the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive write
                        // access to this slot until the sequence store.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop one element; `None` when the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive read
                        // access to this slot until the sequence store.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Acquire);
        let deq = self.dequeue_pos.load(Ordering::Acquire);
        enq.wrapping_sub(deq)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    #[should_panic]
    fn test_capacity_must_be_power_of_two() {
        let _ = MpmcQueue::<u64>::new(100);
    }

    #[test]
    fn test_push_pop_basic() {
        let q = MpmcQueue::<u64>::new(4);
        assert!(q.pop().is_none());
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_full_ring_rejects() {
        let q = MpmcQueue::<u64>::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(3));
        assert_eq!(q.pop(), Some(1));
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_single_producer_order_preserved() {
        // FIFO observability: one producer, one consumer through the MPMC
        // protocol must still be strictly ordered.
        let q = Arc::new(MpmcQueue::<u64>::new(64));
        let producer_q = q.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..10_000u64 {
                loop {
                    if producer_q.push(i).is_ok() {
                        break;
                    }
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(v) = q.pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_multi_producer_multi_consumer_conservation() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 25_000;
        let q = Arc::new(MpmcQueue::<u64>::new(1024));
        let total = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let v = p * PER_PRODUCER + i;
                        loop {
                            if q.push(v).is_ok() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let q = q.clone();
                let total = total.clone();
                let sum = sum.clone();
                std::thread::spawn(move || {
                    loop {
                        if total.load(Ordering::SeqCst) >= (PRODUCERS * PER_PRODUCER) as usize {
                            break;
                        }
                        if let Some(v) = q.pop() {
                            sum.fetch_add(v as usize, Ordering::SeqCst);
                            total.fetch_add(1, Ordering::SeqCst);
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        let n = PRODUCERS * PER_PRODUCER;
        assert_eq!(total.load(Ordering::SeqCst), n as usize);
        assert_eq!(sum.load(Ordering::SeqCst), (n * (n - 1) / 2) as usize);
    }
}
