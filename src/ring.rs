use crate::index;
use crate::invariants::{debug_assert_room, debug_assert_slot, debug_assert_transfer};
use crate::queue::{sealed, Queue};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Classic SPSC protocol over two indices wrapped in [0, N) with one slot
// reserved, so the index pair alone distinguishes full from empty:
// empty <=> head == tail, full <=> succ(tail) == head.
//
// **Producer (write path):**
// 1. Load `tail` with Relaxed (only the producer writes tail)
// 2. Check `cached_head`; refresh it with an Acquire load of `head` only
//    when the cached view reports too little free space
// 3. Write the slot(s) (no ordering needed - protected by the protocol)
// 4. Store `tail` with Release (publishes the writes to the consumer)
//
// **Consumer (read path):**
// 1. Load `head` with Relaxed (only the consumer writes head)
// 2. Check `cached_tail`; refresh it with an Acquire load of `tail` only
//    when the cached view reports nothing available
// 3. Read the slot(s)
// 4. Store `head` with Release (returns the slots to the producer)
//
// ## Single-writer invariants
//
// `cached_head` and `cached_tail` live in UnsafeCells without atomics
// because each has exactly one writer: the producer side owns
// `cached_head`, the consumer side owns `cached_tail`. The unique Sink and
// Source handles serialize each side behind `&mut self`. A stale cached
// view is conservative - it under-reports free space or availability,
// never the reverse.
//
// =============================================================================

/// Lock-free SPSC ring buffer over an inline slot array.
///
/// Capacity `N` must be a power of two; one slot stays reserved, so at most
/// `N - 1` elements are held. Instances are created through
/// [`spsc`](crate::spsc), which returns the producer and consumer handles.
#[repr(C)]
pub struct SpscRing<T, const N: usize> {
    // === PRODUCER HOT ===
    /// Write index (written by producer, read by consumer).
    tail: CachePadded<AtomicUsize>,
    /// Producer's cached view of `head` (avoids cross-core reads).
    cached_head: CachePadded<UnsafeCell<usize>>,

    // === CONSUMER HOT ===
    /// Read index (written by consumer, read by producer).
    head: CachePadded<AtomicUsize>,
    /// Consumer's cached view of `tail`.
    cached_tail: CachePadded<UnsafeCell<usize>>,

    // === DATA BUFFER ===
    /// Slot storage, embedded in the struct. `UnsafeCell<MaybeUninit<T>>`
    /// gives interior mutability without requiring `T: Default`.
    buffer: [UnsafeCell<MaybeUninit<T>>; N],
}

// Safety: the ring is Send + Sync as long as T is Send. The atomic protocol
// above synchronizes slot access between the one producer and one consumer.
unsafe impl<T: Send, const N: usize> Send for SpscRing<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for SpscRing<T, N> {}

impl<T, const N: usize> SpscRing<T, N> {
    const MASK: usize = N - 1;

    /// Evaluated at monomorphization time; rejects capacities that would
    /// break the mask arithmetic.
    const CAPACITY_OK: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    pub(crate) fn new() -> Self {
        let () = Self::CAPACITY_OK;
        Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            // SAFETY: MaybeUninit does not require initialization, and
            // UnsafeCell is repr(transparent) over it. This is the standard
            // pattern for an uninitialized MaybeUninit array.
            buffer: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    #[inline]
    fn slot(&self, idx: usize) -> *mut T {
        debug_assert_slot!(idx, N);
        self.buffer[idx].get().cast()
    }

    /// Producer side: free slots, refreshing the cached head only when the
    /// cached view cannot satisfy `wanted`.
    #[inline]
    fn free_for(&self, tail: usize, wanted: usize) -> usize {
        // SAFETY: cached_head is written only from producer operations,
        // which the unique Sink handle serializes.
        let cached = unsafe { *self.cached_head.get() };
        let free = index::free_slots(index::occupancy_masked(cached, tail, Self::MASK), N);
        if free >= wanted {
            return free;
        }
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: as above; the Acquire load synchronizes with the
        // consumer's Release store of `head`.
        unsafe { *self.cached_head.get() = head };
        index::free_slots(index::occupancy_masked(head, tail, Self::MASK), N)
    }

    /// Consumer side: available elements, refreshing the cached tail only
    /// when the cached view cannot satisfy `wanted`.
    #[inline]
    fn available_for(&self, head: usize, wanted: usize) -> usize {
        // SAFETY: cached_tail is written only from consumer operations,
        // which the unique Source handle serializes.
        let cached = unsafe { *self.cached_tail.get() };
        let avail = index::occupancy_masked(head, cached, Self::MASK);
        if avail >= wanted {
            return avail;
        }
        let tail = self.tail.load(Ordering::Acquire);
        // SAFETY: as above; the Acquire load synchronizes with the
        // producer's Release store of `tail`.
        unsafe { *self.cached_tail.get() = tail };
        index::occupancy_masked(head, tail, Self::MASK)
    }
}

impl<T, const N: usize> sealed::Sealed for SpscRing<T, N> {}

impl<T: Send, const N: usize> Queue for SpscRing<T, N> {
    type Item = T;

    #[inline]
    fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        index::occupancy_masked(head, tail, Self::MASK)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }

    fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if self.free_for(tail, 1) == 0 {
            return Err(value);
        }
        // SAFETY: the slot at `tail` is outside the live window [head, tail)
        // and only the producer writes it before the Release below.
        unsafe { self.slot(tail).write(value) };
        self.tail
            .store(index::succ_masked(tail, Self::MASK), Ordering::Release);
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if self.available_for(head, 1) == 0 {
            return None;
        }
        // SAFETY: the slot at `head` is inside the live window; its write
        // was published by the producer's Release store that the Acquire
        // load in available_for observed. Reading moves the value out; the
        // Release store below returns the slot to the producer.
        let value = unsafe { self.slot(head).read() };
        self.head
            .store(index::succ_masked(head, Self::MASK), Ordering::Release);
        Some(value)
    }

    fn try_push_slice(&self, src: &[T]) -> usize
    where
        T: Copy,
    {
        if src.is_empty() {
            return 0;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let free = self.free_for(tail, src.len());
        let count = src.len().min(free);
        if count == 0 {
            return 0;
        }
        debug_assert_transfer!(count, free);

        let seg = index::split(tail, count, N);
        // SAFETY: the `count` slots starting at `tail` are free (the
        // reserved slot keeps the run clear of `head`) and only the
        // producer touches them until the Release store publishes.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.slot(tail), seg.first);
            if seg.second > 0 {
                ptr::copy_nonoverlapping(src.as_ptr().add(seg.first), self.slot(0), seg.second);
            }
        }
        debug_assert_room!((N - 1 - free) + count, N);
        self.tail
            .store(index::add_masked(tail, count, Self::MASK), Ordering::Release);
        count
    }

    fn try_pop_slice(&self, dst: &mut [T]) -> usize
    where
        T: Copy,
    {
        if dst.is_empty() {
            return 0;
        }
        let head = self.head.load(Ordering::Relaxed);
        let avail = self.available_for(head, dst.len());
        let count = dst.len().min(avail);
        if count == 0 {
            return 0;
        }
        debug_assert_transfer!(count, avail);

        let seg = index::split(head, count, N);
        // SAFETY: the `count` slots starting at `head` are live and
        // published; T: Copy, so reading leaves the slots inert until the
        // Release store hands them back to the producer.
        unsafe {
            ptr::copy_nonoverlapping(self.slot(head), dst.as_mut_ptr(), seg.first);
            if seg.second > 0 {
                ptr::copy_nonoverlapping(self.slot(0), dst.as_mut_ptr().add(seg.first), seg.second);
            }
        }
        self.head
            .store(index::add_masked(head, count, Self::MASK), Ordering::Release);
        count
    }
}

impl<T, const N: usize> Drop for SpscRing<T, N> {
    fn drop(&mut self) {
        // Drop the live window [head, tail).
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let count = index::occupancy_masked(head, tail, Self::MASK);

        for i in 0..count {
            let idx = index::add_masked(head, i, Self::MASK);
            // SAFETY: slots in the live window hold initialized values that
            // were never moved out.
            unsafe {
                ptr::drop_in_place(self.buffer[idx].get().cast::<T>());
            }
        }
    }
}
