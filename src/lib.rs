//! Bounded single-producer single-consumer queues.
//!
//! Three interchangeable engines move typed values from exactly one
//! producer to exactly one consumer inside one process, behind the same
//! operation set and the same role-typed handles:
//!
//! - [`spsc`] - lock-free ring over an inline array, coordinated by two
//!   cache-line-isolated indices and acquire/release ordering.
//! - [`spsc_mapped`] - lock-free ring whose storage is mapped twice into
//!   adjacent virtual ranges, so bulk transfers never split at the
//!   wrap-around boundary (with a transparent heap fallback).
//! - [`spsc_locked`] - mutex + condition variables with identical
//!   externally-observable semantics, for callers that prefer suspending
//!   waits over spinning.
//!
//! Every factory returns a ([`Sink`], [`Source`]) pair sharing ownership of
//! the engine. `Sink` can only enqueue and `Source` can only dequeue, so
//! using a handle for the wrong role is a compile-time error. Each engine
//! holds at most `N - 1` elements: one slot stays reserved so that the two
//! indices alone distinguish full from empty.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! let (mut sink, mut source) = ringspsc_rs::spsc::<u64, 8>();
//!
//! sink.try_push(7).unwrap();
//! assert_eq!(source.try_pop(), Some(7));
//!
//! // Timed operations take a per-call deadline.
//! assert_eq!(source.pop_timeout(Duration::from_millis(1)), None);
//!
//! // Bulk operations report how much actually moved.
//! assert_eq!(sink.try_push_slice(&[1, 2, 3]), 3);
//! let mut out = [0u64; 3];
//! assert_eq!(source.try_pop_slice(&mut out), 3);
//! assert_eq!(out, [1, 2, 3]);
//! ```

mod backoff;
mod handle;
mod index;
mod invariants;
mod locked;
mod mapped;
mod queue;
mod ring;

pub use handle::{Sink, Source};
pub use locked::LockedQueue;
pub use mapped::{MapError, MappedRing};
pub use queue::Queue;
pub use ring::SpscRing;

use std::sync::Arc;

/// Create a lock-free SPSC ring of `N` slots (power of two).
///
/// Timed operations on this engine spin with cooperative yielding, which
/// keeps latency low but burns CPU while waiting.
///
/// ```
/// let (mut sink, mut source) = ringspsc_rs::spsc::<u32, 64>();
/// let producer = std::thread::spawn(move || {
///     for i in 0..10 {
///         let mut value = i;
///         while let Err(rejected) = sink.try_push(value) {
///             value = rejected;
///             std::thread::yield_now();
///         }
///     }
/// });
/// let mut received = 0;
/// while received < 10 {
///     if let Some(value) = source.try_pop() {
///         assert_eq!(value, received);
///         received += 1;
///     }
/// }
/// producer.join().unwrap();
/// ```
pub fn spsc<T: Send, const N: usize>() -> (Sink<SpscRing<T, N>>, Source<SpscRing<T, N>>) {
    let shared = Arc::new(SpscRing::new());
    (Sink::new(Arc::clone(&shared)), Source::new(shared))
}

/// Create a double-mapped SPSC ring of `N` slots (power of two).
///
/// Fails only when the OS refuses the descriptor or mappings. Hosts (or
/// capacities) without a usable double mapping fall back to heap storage
/// with identical semantics.
///
/// ```
/// let (mut sink, mut source) = ringspsc_rs::spsc_mapped::<u64, 4096>()?;
/// assert_eq!(sink.try_push_slice(&[1, 2, 3]), 3);
/// let mut out = [0u64; 3];
/// assert_eq!(source.try_pop_slice(&mut out), 3);
/// # Ok::<(), ringspsc_rs::MapError>(())
/// ```
pub fn spsc_mapped<T: Send, const N: usize>(
) -> Result<(Sink<MappedRing<T, N>>, Source<MappedRing<T, N>>), MapError> {
    let shared = Arc::new(MappedRing::new()?);
    Ok((Sink::new(Arc::clone(&shared)), Source::new(shared)))
}

/// Create a mutex/condvar bounded queue of `N` slots (any `N >= 2`).
///
/// Timed operations on this engine suspend on condition variables until
/// signaled or the deadline passes.
///
/// ```
/// use std::time::Duration;
///
/// // Capacity does not need to be a power of two here.
/// let (mut sink, mut source) = ringspsc_rs::spsc_locked::<&str, 3>();
/// assert!(sink.try_push("a").is_ok());
/// assert!(sink.try_push("b").is_ok());
/// assert_eq!(sink.try_push("c"), Err("c"));
/// assert_eq!(source.pop_timeout(Duration::from_millis(5)), Some("a"));
/// ```
pub fn spsc_locked<T: Send, const N: usize>(
) -> (Sink<LockedQueue<T, N>>, Source<LockedQueue<T, N>>) {
    let shared = Arc::new(LockedQueue::new());
    (Sink::new(Arc::clone(&shared)), Source::new(shared))
}
