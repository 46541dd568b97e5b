use crate::backoff::Backoff;
use std::time::{Duration, Instant};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// The operational contract shared by every queue engine.
///
/// All engines move values from exactly one producer to exactly one
/// consumer. The non-blocking operations never suspend and report shortfall
/// through their return shape; the timed operations compute a monotonic
/// deadline once on entry and give up when it passes.
///
/// The trait is sealed: it exists so that [`Sink`](crate::Sink) and
/// [`Source`](crate::Source) can name their engine, not as an extension
/// point.
///
/// Bulk operations require `Item: Copy`. That keeps element transfer
/// infallible, so a bulk operation never publishes a half-constructed slot.
pub trait Queue: sealed::Sealed + Send + Sync {
    /// The element type carried by the queue.
    type Item: Send;

    /// Number of slots, including the one reserved slot.
    ///
    /// At most `capacity() - 1` elements are ever held.
    fn capacity(&self) -> usize;

    /// Advisory element count: exact while the queue is quiescent, a recent
    /// value while the other side is active.
    fn len(&self) -> usize;

    /// Advisory emptiness check with the same accuracy as [`len`](Queue::len).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to enqueue one value without blocking.
    ///
    /// On a full queue the value is handed back in `Err`, untouched, so the
    /// caller can retry with it later.
    fn try_push(&self, value: Self::Item) -> Result<(), Self::Item>;

    /// Attempt to dequeue the oldest value without blocking.
    fn try_pop(&self) -> Option<Self::Item>;

    /// Enqueue a prefix of `src`, returning how many elements were stored
    /// (possibly 0, never more than `src.len()`).
    fn try_push_slice(&self, src: &[Self::Item]) -> usize
    where
        Self::Item: Copy;

    /// Dequeue into a prefix of `dst` in FIFO order, returning how many
    /// elements were extracted.
    fn try_pop_slice(&self, dst: &mut [Self::Item]) -> usize
    where
        Self::Item: Copy;

    /// Enqueue one value, waiting up to `timeout` for space.
    ///
    /// The value is consumed only by the attempt that succeeds; on deadline
    /// it comes back in `Err`.
    fn push_timeout(&self, value: Self::Item, timeout: Duration) -> Result<(), Self::Item> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        let mut value = value;
        loop {
            value = match self.try_push(value) {
                Ok(()) => return Ok(()),
                Err(rejected) => rejected,
            };
            if Instant::now() >= deadline {
                return Err(value);
            }
            backoff.snooze();
        }
    }

    /// Dequeue one value, waiting up to `timeout` for it to arrive.
    fn pop_timeout(&self, timeout: Duration) -> Option<Self::Item> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            if Instant::now() >= deadline {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Enqueue all of `src`, waiting up to `timeout`: all-or-timeout.
    ///
    /// Returns `true` once every element has been stored. On deadline it
    /// returns `false`; elements already transferred stay published.
    fn push_slice_timeout(&self, src: &[Self::Item], timeout: Duration) -> bool
    where
        Self::Item: Copy,
    {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        let mut done = 0;
        loop {
            let moved = self.try_push_slice(&src[done..]);
            done += moved;
            if done == src.len() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if moved == 0 {
                backoff.snooze();
            } else {
                backoff.reset();
            }
        }
    }

    /// Dequeue up to `dst.len()` elements, waiting up to `timeout`:
    /// partial-on-timeout.
    ///
    /// Returns the number of elements written to the front of `dst`, which
    /// is `dst.len()` unless the deadline passed first.
    fn pop_slice_timeout(&self, dst: &mut [Self::Item], timeout: Duration) -> usize
    where
        Self::Item: Copy,
    {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        let mut done = 0;
        loop {
            let moved = self.try_pop_slice(&mut dst[done..]);
            done += moved;
            if done == dst.len() {
                return done;
            }
            if Instant::now() >= deadline {
                return done;
            }
            if moved == 0 {
                backoff.snooze();
            } else {
                backoff.reset();
            }
        }
    }
}
