//! Miri-compatible tests for the unsafe code paths.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! Miri interprets MIR and flags undefined behavior: reads of
//! uninitialized slots, out-of-bounds access, use-after-free, double
//! drops. Capacities are kept tiny so the interpreter stays fast, and the
//! mapped engine runs through its heap layout (miri has no mmap), which is
//! exactly the code path that does split-segment pointer arithmetic.

use ringspsc_rs::{spsc, spsc_locked, spsc_mapped, Queue, Sink, Source};

/// Exercise single-item writes, reads, and the wrap of both indices.
fn cycle_often<Q: Queue<Item = u32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    for round in 0..5 {
        for i in 0..3 {
            assert!(sink.try_push(round * 10 + i).is_ok());
        }
        for i in 0..3 {
            assert_eq!(source.try_pop(), Some(round * 10 + i));
        }
    }
    assert!(source.is_empty());
}

#[test]
fn miri_spsc_cycles() {
    cycle_often(spsc::<u32, 4>());
}

#[test]
fn miri_mapped_cycles() {
    cycle_often(spsc_mapped::<u32, 4>().unwrap());
}

#[test]
fn miri_locked_cycles() {
    cycle_often(spsc_locked::<u32, 4>());
}

/// Bulk copies that split at the boundary must stay inside the buffer.
fn bulk_across_boundary<Q: Queue<Item = u32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    // Park the indices at slot 2 of 4.
    assert_eq!(sink.try_push_slice(&[1, 2]), 2);
    let mut park = [0u32; 2];
    assert_eq!(source.try_pop_slice(&mut park), 2);

    // A three-element run from slot 2 wraps into slot 0.
    assert_eq!(sink.try_push_slice(&[7, 8, 9]), 3);
    let mut out = [0u32; 3];
    assert_eq!(source.try_pop_slice(&mut out), 3);
    assert_eq!(out, [7, 8, 9]);
}

#[test]
fn miri_spsc_bulk_boundary() {
    bulk_across_boundary(spsc::<u32, 4>());
}

#[test]
fn miri_mapped_bulk_boundary() {
    bulk_across_boundary(spsc_mapped::<u32, 4>().unwrap());
}

#[test]
fn miri_locked_bulk_boundary() {
    bulk_across_boundary(spsc_locked::<u32, 4>());
}

/// Owned payloads: every value must be dropped exactly once, whether it
/// was consumed or still queued when the engine died.
fn exact_drop_counts<Q, F>(factory: F)
where
    Q: Queue<Item = String>,
    F: Fn() -> (Sink<Q>, Source<Q>),
{
    let (mut sink, mut source) = factory();

    for i in 0..3 {
        assert!(sink.try_push(format!("value-{i}")).is_ok());
    }
    assert_eq!(source.try_pop().as_deref(), Some("value-0"));

    // Two strings are still queued; dropping both handles must free them
    // without touching the already-moved-out slot.
    drop(sink);
    drop(source);
}

#[test]
fn miri_spsc_drop_counts() {
    exact_drop_counts(spsc::<String, 4>);
}

#[test]
fn miri_mapped_drop_counts() {
    exact_drop_counts(|| spsc_mapped::<String, 4>().unwrap());
}

#[test]
fn miri_locked_drop_counts() {
    exact_drop_counts(spsc_locked::<String, 4>);
}

/// Concurrent producer and consumer under miri's data-race detector.
#[test]
fn miri_spsc_concurrent_handoff() {
    use std::thread;

    let (mut sink, mut source) = spsc::<u32, 4>();

    let producer = thread::spawn(move || {
        for i in 0..20 {
            let mut value = i;
            loop {
                match sink.try_push(value) {
                    Ok(()) => break,
                    Err(rejected) => {
                        value = rejected;
                        thread::yield_now();
                    }
                }
            }
        }
    });

    let mut expected = 0;
    while expected < 20 {
        if let Some(value) = source.try_pop() {
            assert_eq!(value, expected);
            expected += 1;
        } else {
            thread::yield_now();
        }
    }

    producer.join().unwrap();
}
