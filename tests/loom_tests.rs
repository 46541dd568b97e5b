//! Loom-based interleaving tests for the index protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! The protocol is modeled here with loom atomics at a tiny capacity so the
//! state space stays tractable: two indices wrapped in [0, N) with one slot
//! reserved, relaxed loads of the owned index, acquire loads of the
//! opposite index, release publication. Loom then explores every
//! interleaving of one producer and one consumer.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

const N: usize = 4;
const MASK: usize = N - 1;

/// Minimal model of the wrapped-index SPSC protocol.
struct Proto {
    head: AtomicUsize,
    tail: AtomicUsize,
    slots: UnsafeCell<[u64; N]>,
}

unsafe impl Send for Proto {}
unsafe impl Sync for Proto {}

impl Proto {
    fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            slots: UnsafeCell::new([0; N]),
        }
    }

    fn occupancy(head: usize, tail: usize) -> usize {
        tail.wrapping_sub(head) & MASK
    }

    fn push(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if Self::occupancy(head, tail) == N - 1 {
            return false;
        }
        // SAFETY: the slot at `tail` is outside the live window and only
        // the producer writes it before the release below.
        unsafe {
            (*self.slots.get())[tail] = value;
        }
        self.tail.store((tail + 1) & MASK, Ordering::Release);
        true
    }

    fn pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: the slot at `head` was published by the release store the
        // acquire load above observed.
        let value = unsafe { (*self.slots.get())[head] };
        self.head.store((head + 1) & MASK, Ordering::Release);
        Some(value)
    }
}

/// Whatever the interleaving, values arrive in order and without tearing.
#[test]
fn loom_push_pop_preserves_fifo() {
    loom::model(|| {
        let proto = Arc::new(Proto::new());
        let producer_side = Arc::clone(&proto);

        let producer = thread::spawn(move || {
            producer_side.push(100);
            producer_side.push(101);
        });

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            // Bounded retries: the producer may not have published yet.
            for _ in 0..10 {
                if let Some(value) = proto.pop() {
                    received.push(value);
                }
                if received.len() == 2 {
                    break;
                }
                thread::yield_now();
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();

        // FIFO for however much arrived in this interleaving.
        if !received.is_empty() {
            assert_eq!(received[0], 100);
        }
        if received.len() == 2 {
            assert_eq!(received[1], 101);
        }
    });
}

/// The reserved slot rejects the N-th element in every interleaving, and a
/// single dequeue reopens exactly one slot.
#[test]
fn loom_reserved_slot_bounds_occupancy() {
    loom::model(|| {
        let proto = Arc::new(Proto::new());

        // Fill to the bound from this thread: capacity 4 holds 3.
        assert!(proto.push(1));
        assert!(proto.push(2));
        assert!(proto.push(3));
        assert!(!proto.push(4));

        let consumer_side = Arc::clone(&proto);
        let consumer = thread::spawn(move || consumer_side.pop());

        let value = consumer.join().unwrap();
        assert_eq!(value, Some(1));

        assert!(proto.push(4));
        assert!(!proto.push(5));
    });
}

/// Conservation: the consumer never observes more than was sent.
#[test]
fn loom_never_receives_unsent_values() {
    loom::model(|| {
        let proto = Arc::new(Proto::new());
        let producer_side = Arc::clone(&proto);

        let sent = Arc::new(AtomicUsize::new(0));
        let sent_by_producer = Arc::clone(&sent);

        let producer = thread::spawn(move || {
            if producer_side.push(7) {
                sent_by_producer.fetch_add(1, Ordering::SeqCst);
            }
            if producer_side.push(8) {
                sent_by_producer.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut received = 0usize;
        for _ in 0..4 {
            if proto.pop().is_some() {
                received += 1;
            }
            thread::yield_now();
        }

        producer.join().unwrap();
        assert!(
            received <= sent.load(Ordering::SeqCst),
            "received {received} values out of thin air"
        );
    });
}
