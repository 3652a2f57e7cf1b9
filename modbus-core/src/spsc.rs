// SPDX-License-Identifier: BSD-3-Clause

//! Lock-free single-producer/single-consumer slot queue (§3, §4.3).
//!
//! The reference design passes `void*` through these queues; per the
//! redesign note in spec.md §9 ("void-pointer slot queues → typed
//! container"), this is a queue over a caller-chosen `Copy` element type `T`
//! — in this engine, always a pool slot *index*, never a pointer, so the
//! pool remains the sole owner of its storage (see `pool.rs`).

use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

/// A bounded SPSC queue of `T` over caller-provided storage. `storage.len()`
/// must be a power of two.
pub struct SpscQueue<'s, T> {
    storage: &'s mut [Option<T>],
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    high_water: AtomicUsize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NotPowerOfTwo;

impl<'s, T: Copy> SpscQueue<'s, T> {
    pub fn new(storage: &'s mut [Option<T>]) -> core::result::Result<Self, NotPowerOfTwo> {
        let capacity = storage.len();
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(NotPowerOfTwo);
        }
        for slot in storage.iter_mut() {
            *slot = None;
        }
        Ok(Self {
            mask: capacity - 1,
            storage,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn occupancy(&self, head: usize, tail: usize) -> usize {
        tail.wrapping_sub(head)
    }

    pub fn len(&self) -> usize {
        self.occupancy(self.head.load(Ordering::Acquire), self.tail.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Peak occupancy observed since construction; a diagnostics aid for
    /// catching both leaks and back-pressure.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    /// Producer-only. Returns `false` without enqueuing if the queue is full.
    pub fn enqueue(&mut self, item: T) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if self.occupancy(head, tail) == self.capacity() {
            return false;
        }
        let idx = tail & self.mask;
        self.storage[idx] = Some(item);
        let new_tail = tail.wrapping_add(1);
        self.tail.store(new_tail, Ordering::Release);
        let occ = self.occupancy(head, new_tail);
        self.high_water.fetch_max(occ, Ordering::Relaxed);
        true
    }

    /// Consumer-only.
    pub fn dequeue(&mut self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if self.occupancy(head, tail) == 0 {
            return None;
        }
        let idx = head & self.mask;
        let item = self.storage[idx].take();
        self.head.store(head.wrapping_add(1), Ordering::Release);
        item
    }

    /// Splits the queue into a [`Producer`]/[`Consumer`] pair that can each
    /// be moved to a different thread, the same shape
    /// `heapless::spsc::Queue::split` gives its callers. The single
    /// `&mut self` borrow here still guarantees at compile time that no
    /// third handle can alias the storage.
    pub fn split<'q>(&'q mut self) -> (Producer<'q, 's, T>, Consumer<'q, 's, T>) {
        let queue: *mut SpscQueue<'s, T> = self;
        (Producer { queue, _marker: PhantomData }, Consumer { queue, _marker: PhantomData })
    }
}

/// The producer half of a [`SpscQueue::split`] pair. Only ever calls
/// [`SpscQueue::enqueue`].
pub struct Producer<'q, 's, T> {
    queue: *mut SpscQueue<'s, T>,
    _marker: PhantomData<&'q mut SpscQueue<'s, T>>,
}

/// The consumer half of a [`SpscQueue::split`] pair. Only ever calls
/// [`SpscQueue::dequeue`].
pub struct Consumer<'q, 's, T> {
    queue: *mut SpscQueue<'s, T>,
    _marker: PhantomData<&'q mut SpscQueue<'s, T>>,
}

// SAFETY: `Producer` only ever touches `tail`/`storage[tail]`, `Consumer`
// only ever touches `head`/`storage[head]`; the acquire/release ordering in
// `enqueue`/`dequeue` is exactly what makes that split safe across threads,
// the same invariant a lock-free SPSC ring always depends on.
unsafe impl<'q, 's, T: Send> Send for Producer<'q, 's, T> {}
unsafe impl<'q, 's, T: Send> Send for Consumer<'q, 's, T> {}

impl<'q, 's, T: Copy> Producer<'q, 's, T> {
    pub fn enqueue(&mut self, item: T) -> bool {
        unsafe { (*self.queue).enqueue(item) }
    }
}

impl<'q, 's, T: Copy> Consumer<'q, 's, T> {
    pub fn dequeue(&mut self) -> Option<T> {
        unsafe { (*self.queue).dequeue() }
    }
}
