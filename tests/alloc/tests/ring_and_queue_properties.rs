// SPDX-License-Identifier: BSD-3-Clause

//! Property tests for the lock-free ring and SPSC queue (§8: "Ring/SPSC
//! safety" and "no data corruption under interleaved push/pop sequences").

use modbus_core::ring::Ring;
use modbus_core::spsc::SpscQueue;
use proptest::prelude::*;

proptest! {
    #[test]
    fn ring_never_reorders_or_drops_bytes_under_interleaved_ops(do_writes in prop::collection::vec(any::<bool>(), 0..500)) {
        let mut storage = [0u8; 16];
        let mut ring = Ring::new(&mut storage).unwrap();
        let mut produced = 0u32;
        let mut consumed = 0u32;

        for write in do_writes {
            if write {
                if ring.push(produced as u8) {
                    produced += 1;
                }
            } else if let Some(b) = ring.pop() {
                prop_assert_eq!(b, consumed as u8);
                consumed += 1;
            }
            prop_assert!(ring.size() <= ring.capacity());
        }
        while let Some(b) = ring.pop() {
            prop_assert_eq!(b, consumed as u8);
            consumed += 1;
        }
        prop_assert_eq!(consumed, produced);
    }

    #[test]
    fn spsc_queue_preserves_fifo_order_under_interleaved_ops(do_enqueues in prop::collection::vec(any::<bool>(), 0..500)) {
        let mut storage: [Option<u32>; 16] = [None; 16];
        let mut q = SpscQueue::new(&mut storage).unwrap();
        let mut produced = 0u32;
        let mut consumed = 0u32;

        for enqueue in do_enqueues {
            if enqueue {
                if q.enqueue(produced) {
                    produced += 1;
                }
            } else if let Some(v) = q.dequeue() {
                prop_assert_eq!(v, consumed);
                consumed += 1;
            }
            prop_assert!(q.len() <= q.capacity());
        }
        while let Some(v) = q.dequeue() {
            prop_assert_eq!(v, consumed);
            consumed += 1;
        }
        prop_assert_eq!(consumed, produced);
    }

    #[test]
    fn ring_write_then_read_round_trips_arbitrary_chunks(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..6), 0..40)) {
        use std::collections::VecDeque;

        let mut storage = [0u8; 32];
        let mut ring = Ring::new(&mut storage).unwrap();
        let mut expected: VecDeque<u8> = VecDeque::new();

        for chunk in &chunks {
            let written = ring.write(chunk);
            expected.extend(&chunk[..written]);
            // Drain a little so the ring doesn't stay permanently full.
            let mut out = [0u8; 3];
            let n = ring.read(&mut out);
            for &b in &out[..n] {
                prop_assert_eq!(expected.pop_front(), Some(b));
            }
        }
        let mut out = [0u8; 256];
        let n = ring.read(&mut out);
        for &b in &out[..n] {
            prop_assert_eq!(expected.pop_front(), Some(b));
        }
        prop_assert_eq!(expected.pop_front(), None);
    }
}

/// §8's SPSC safety property exercised with two genuinely concurrent
/// threads, one per [`SpscQueue::split`] handle, rather than single-threaded
/// interleaved calls: every item crosses exactly once, in enqueue order,
/// with no torn read.
#[test]
fn spsc_queue_preserves_fifo_order_across_two_real_threads() {
    const ITEMS: u32 = 20_000;

    let mut storage: [Option<u32>; 64] = [None; 64];
    let mut queue = SpscQueue::new(&mut storage).unwrap();
    let (mut producer, mut consumer) = queue.split();

    std::thread::scope(|scope| {
        scope.spawn(move || {
            let mut next = 0u32;
            while next < ITEMS {
                if producer.enqueue(next) {
                    next += 1;
                }
            }
        });

        let consumed = scope.spawn(move || {
            let mut received = Vec::with_capacity(ITEMS as usize);
            while received.len() < ITEMS as usize {
                if let Some(v) = consumer.dequeue() {
                    received.push(v);
                }
            }
            received
        });

        let received = consumed.join().unwrap();
        assert_eq!(received.len(), ITEMS as usize);
        assert!(received.iter().enumerate().all(|(i, &v)| v == i as u32));
    });
}
