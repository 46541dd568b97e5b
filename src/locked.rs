use crate::index;
use crate::queue::{sealed, Queue};
use std::mem::MaybeUninit;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Bounded one-in/one-out queue built on a mutex and two condition
/// variables.
///
/// Externally identical to the lock-free rings, but timed operations
/// suspend the thread on `not_empty`/`not_full` instead of spinning, which
/// trades latency for idle CPU. Capacity `N` may be any integer >= 2 (no
/// power-of-two requirement; the index arithmetic uses modulo). One slot
/// stays reserved, so at most `N - 1` elements are held.
///
/// Created through [`spsc_locked`](crate::spsc_locked).
pub struct LockedQueue<T, const N: usize> {
    state: Mutex<State<T>>,
    /// Signaled after every enqueue; `pop` waiters park here.
    not_empty: Condvar,
    /// Signaled after every dequeue; `push` waiters park here.
    not_full: Condvar,
}

struct State<T> {
    head: usize,
    tail: usize,
    slots: Box<[MaybeUninit<T>]>,
}

impl<T> State<T> {
    fn occupancy(&self) -> usize {
        index::occupancy(self.head, self.tail, self.slots.len())
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        index::succ(self.tail, self.slots.len()) == self.head
    }

    /// Store one value; the caller has checked `!is_full()`.
    fn store(&mut self, value: T) {
        let cap = self.slots.len();
        self.slots[self.tail].write(value);
        self.tail = index::succ(self.tail, cap);
    }

    /// Extract the oldest value; the caller has checked `!is_empty()`.
    fn extract(&mut self) -> T {
        let cap = self.slots.len();
        // SAFETY: the slot at `head` is inside the live window and was
        // written by a preceding store under the same lock.
        let value = unsafe { self.slots[self.head].assume_init_read() };
        self.head = index::succ(self.head, cap);
        value
    }

    /// Copy in as much of `src` as fits, as one contiguous segment pair.
    fn copy_in(&mut self, src: &[T]) -> usize
    where
        T: Copy,
    {
        let cap = self.slots.len();
        let free = index::free_slots(self.occupancy(), cap);
        let count = src.len().min(free);
        if count == 0 {
            return 0;
        }
        let seg = index::split(self.tail, count, cap);
        for (offset, value) in src[..seg.first].iter().enumerate() {
            self.slots[self.tail + offset].write(*value);
        }
        for (offset, value) in src[seg.first..count].iter().enumerate() {
            self.slots[offset].write(*value);
        }
        self.tail = index::add(self.tail, count, cap);
        count
    }

    /// Copy out up to `dst.len()` elements in FIFO order.
    fn copy_out(&mut self, dst: &mut [T]) -> usize
    where
        T: Copy,
    {
        let cap = self.slots.len();
        let count = dst.len().min(self.occupancy());
        if count == 0 {
            return 0;
        }
        let seg = index::split(self.head, count, cap);
        for (offset, out) in dst[..seg.first].iter_mut().enumerate() {
            // SAFETY: slots in the live window hold initialized values.
            *out = unsafe { self.slots[self.head + offset].assume_init_read() };
        }
        for (offset, out) in dst[seg.first..count].iter_mut().enumerate() {
            // SAFETY: as above; the run wrapped to slot 0.
            *out = unsafe { self.slots[offset].assume_init_read() };
        }
        self.head = index::add(self.head, count, cap);
        count
    }
}

impl<T, const N: usize> LockedQueue<T, N> {
    /// The reserved slot needs a capacity of at least 2 to hold anything.
    const CAPACITY_OK: () = assert!(N >= 2, "capacity must be at least 2");

    pub(crate) fn new() -> Self {
        let () = Self::CAPACITY_OK;
        let mut slots = Vec::with_capacity(N);
        slots.resize_with(N, MaybeUninit::uninit);
        Self {
            state: Mutex::new(State {
                head: 0,
                tail: 0,
                slots: slots.into_boxed_slice(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }
}

impl<T, const N: usize> sealed::Sealed for LockedQueue<T, N> {}

impl<T: Send, const N: usize> Queue for LockedQueue<T, N> {
    type Item = T;

    #[inline]
    fn capacity(&self) -> usize {
        N
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().occupancy()
    }

    fn is_empty(&self) -> bool {
        self.state.lock().unwrap().is_empty()
    }

    fn try_push(&self, value: T) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();
        if state.is_full() {
            return Err(value);
        }
        state.store(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        if state.is_empty() {
            return None;
        }
        let value = state.extract();
        drop(state);
        self.not_full.notify_one();
        Some(value)
    }

    fn try_push_slice(&self, src: &[T]) -> usize
    where
        T: Copy,
    {
        let mut state = self.state.lock().unwrap();
        let count = state.copy_in(src);
        drop(state);
        if count > 0 {
            self.not_empty.notify_one();
        }
        count
    }

    fn try_pop_slice(&self, dst: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut state = self.state.lock().unwrap();
        let count = state.copy_out(dst);
        drop(state);
        if count > 0 {
            self.not_full.notify_one();
        }
        count
    }

    fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.is_full() {
                state.store(value);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            let Some(remaining) = remaining_before(deadline) else {
                return Err(value);
            };
            // The predicate is re-checked on every wakeup, so spurious
            // wakeups and timeouts fall through the same path.
            let (guard, _timed_out) = self.not_full.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.is_empty() {
                let value = state.extract();
                drop(state);
                self.not_full.notify_one();
                return Some(value);
            }
            let remaining = remaining_before(deadline)?;
            let (guard, _timed_out) = self.not_empty.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }

    fn push_slice_timeout(&self, src: &[T], timeout: Duration) -> bool
    where
        T: Copy,
    {
        let deadline = Instant::now() + timeout;
        let mut done = 0;
        let mut state = self.state.lock().unwrap();
        loop {
            let moved = state.copy_in(&src[done..]);
            done += moved;
            if moved > 0 {
                // Wake the consumer for each transferred group. The guard
                // is still held; the wait below releases it.
                self.not_empty.notify_one();
            }
            if done == src.len() {
                return true;
            }
            let Some(remaining) = remaining_before(deadline) else {
                // Deadline: the partial transfer stays published.
                return false;
            };
            let (guard, _timed_out) = self.not_full.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }

    fn pop_slice_timeout(&self, dst: &mut [T], timeout: Duration) -> usize
    where
        T: Copy,
    {
        let deadline = Instant::now() + timeout;
        let mut done = 0;
        let mut state = self.state.lock().unwrap();
        loop {
            let moved = state.copy_out(&mut dst[done..]);
            done += moved;
            if moved > 0 {
                self.not_full.notify_one();
            }
            if done == dst.len() {
                return done;
            }
            let Some(remaining) = remaining_before(deadline) else {
                return done;
            };
            let (guard, _timed_out) = self.not_empty.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }
}

/// Time left before `deadline`, or `None` once it has passed.
fn remaining_before(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        None
    } else {
        Some(remaining)
    }
}

impl<T, const N: usize> Drop for LockedQueue<T, N> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let cap = state.slots.len();
        let count = state.occupancy();
        for i in 0..count {
            let idx = index::add(state.head, i, cap);
            // SAFETY: slots in the live window hold initialized values.
            unsafe {
                state.slots[idx].assume_init_drop();
            }
        }
    }
}
