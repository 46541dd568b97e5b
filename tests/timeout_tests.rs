//! Deadline behavior of the timed operations: compliance windows, partial
//! transfers, and the move-on-success discipline for blocking enqueue.

use ringspsc_rs::{spsc, spsc_locked, spsc_mapped, Queue, Sink, Source};
use std::thread;
use std::time::{Duration, Instant};

/// Generous upper bound for scheduler slack; the lower bound is exact
/// because the deadline loops only give up once the deadline has passed.
const SLACK: Duration = Duration::from_millis(450);

/// Full queue, no consumer: a 50 ms push must fail, return the value, take
/// at least 50 ms, and leave the queue untouched.
fn check_push_deadline<Q: Queue<Item = i32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    for value in 0..7 {
        assert_eq!(sink.try_push(value), Ok(()));
    }

    let timeout = Duration::from_millis(50);
    let started = Instant::now();
    assert_eq!(sink.push_timeout(999, timeout), Err(999));
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout, "returned after {elapsed:?}, before the deadline");
    assert!(elapsed < timeout + SLACK, "took {elapsed:?}, far past the deadline");

    // Queue unchanged: same count, same order.
    assert_eq!(sink.len(), 7);
    for value in 0..7 {
        assert_eq!(source.try_pop(), Some(value));
    }
}

/// Empty queue, no producer: a 50 ms pop must return None within the window.
fn check_pop_deadline<Q: Queue<Item = i32>>((_sink, mut source): (Sink<Q>, Source<Q>)) {
    let timeout = Duration::from_millis(50);
    let started = Instant::now();
    assert_eq!(source.pop_timeout(timeout), None);
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + SLACK);
}

/// Bulk blocking enqueue is all-or-timeout: on deadline it reports failure
/// but the elements that did fit stay published.
fn check_bulk_push_partial<Q: Queue<Item = i32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    assert_eq!(sink.try_push_slice(&[0, 1, 2, 3, 4]), 5);

    let started = Instant::now();
    let complete = sink.push_slice_timeout(&[5, 6, 7, 8, 9], Duration::from_millis(50));
    assert!(!complete);
    assert!(started.elapsed() >= Duration::from_millis(50));

    // Two of the five fit before the deadline.
    assert_eq!(sink.len(), 7);
    for value in 0..7 {
        assert_eq!(source.try_pop(), Some(value));
    }
}

/// Bulk blocking dequeue returns the partial count achieved at deadline.
fn check_bulk_pop_partial<Q: Queue<Item = i32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    assert_eq!(sink.try_push_slice(&[1, 2, 3]), 3);

    let mut out = [0i32; 10];
    let started = Instant::now();
    let moved = source.pop_slice_timeout(&mut out, Duration::from_millis(50));
    assert!(started.elapsed() >= Duration::from_millis(50));

    assert_eq!(moved, 3);
    assert_eq!(&out[..3], &[1, 2, 3]);
    assert!(source.is_empty());
}

/// Bulk blocking dequeue completes early once the count is met.
fn check_bulk_pop_complete<Q: Queue<Item = i32>>((mut sink, mut source): (Sink<Q>, Source<Q>)) {
    assert_eq!(sink.try_push_slice(&[1, 2, 3, 4]), 4);

    let mut out = [0i32; 4];
    let started = Instant::now();
    let moved = source.pop_slice_timeout(&mut out, Duration::from_secs(5));
    assert_eq!(moved, 4);
    assert_eq!(out, [1, 2, 3, 4]);
    // Nowhere near the deadline: the data was already there.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn spsc_push_deadline() {
    check_push_deadline(spsc::<i32, 8>());
}

#[test]
fn mapped_push_deadline() {
    check_push_deadline(spsc_mapped::<i32, 8>().unwrap());
}

#[test]
fn locked_push_deadline() {
    check_push_deadline(spsc_locked::<i32, 8>());
}

#[test]
fn spsc_pop_deadline() {
    check_pop_deadline(spsc::<i32, 8>());
}

#[test]
fn mapped_pop_deadline() {
    check_pop_deadline(spsc_mapped::<i32, 8>().unwrap());
}

#[test]
fn locked_pop_deadline() {
    check_pop_deadline(spsc_locked::<i32, 8>());
}

#[test]
fn spsc_bulk_push_partial() {
    check_bulk_push_partial(spsc::<i32, 8>());
}

#[test]
fn mapped_bulk_push_partial() {
    check_bulk_push_partial(spsc_mapped::<i32, 8>().unwrap());
}

#[test]
fn locked_bulk_push_partial() {
    check_bulk_push_partial(spsc_locked::<i32, 8>());
}

#[test]
fn spsc_bulk_pop_partial() {
    check_bulk_pop_partial(spsc::<i32, 8>());
}

#[test]
fn mapped_bulk_pop_partial() {
    check_bulk_pop_partial(spsc_mapped::<i32, 8>().unwrap());
}

#[test]
fn locked_bulk_pop_partial() {
    check_bulk_pop_partial(spsc_locked::<i32, 8>());
}

#[test]
fn spsc_bulk_pop_complete() {
    check_bulk_pop_complete(spsc::<i32, 8>());
}

#[test]
fn locked_bulk_pop_complete() {
    check_bulk_pop_complete(spsc_locked::<i32, 8>());
}

// ---------------------------------------------------------------------------
// Move discipline
// ---------------------------------------------------------------------------

/// A blocking enqueue that contends with a full queue must deliver the
/// exact value it was given: no retry may consume it early. The payload is
/// move-only, so any early-move bug corrupts the delivered value.
fn check_blocking_push_keeps_value<Q: Queue<Item = Box<i32>> + 'static>(
    (mut sink, mut source): (Sink<Q>, Source<Q>),
) {
    for value in 0..7 {
        assert!(sink.try_push(Box::new(value)).is_ok());
    }

    // A slow consumer drains the backlog while the producer is blocked.
    let drainer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        for expected in 0..7 {
            loop {
                if let Some(value) = source.try_pop() {
                    assert_eq!(*value, expected);
                    break;
                }
                thread::yield_now();
            }
        }
        source
    });

    assert!(sink
        .push_timeout(Box::new(99), Duration::from_millis(500))
        .is_ok());

    let mut source = drainer.join().unwrap();
    let delivered = source
        .pop_timeout(Duration::from_millis(500))
        .expect("the blocked push must have published its value");
    assert_eq!(*delivered, 99);
}

#[test]
fn mapped_blocking_push_keeps_value() {
    check_blocking_push_keeps_value(spsc_mapped::<Box<i32>, 8>().unwrap());
}

#[test]
fn spsc_blocking_push_keeps_value() {
    check_blocking_push_keeps_value(spsc::<Box<i32>, 8>());
}

#[test]
fn locked_blocking_push_keeps_value() {
    check_blocking_push_keeps_value(spsc_locked::<Box<i32>, 8>());
}

/// A timed-out push hands back the original value, still usable.
#[test]
fn timed_out_push_returns_the_value() {
    let (mut sink, _source) = spsc::<String, 2>();
    assert!(sink.try_push("occupant".to_string()).is_ok());

    let rejected = sink
        .push_timeout("priceless".to_string(), Duration::from_millis(10))
        .unwrap_err();
    assert_eq!(rejected, "priceless");
}
