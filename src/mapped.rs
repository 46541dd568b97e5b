use crate::index;
use crate::invariants::{debug_assert_room, debug_assert_slot, debug_assert_transfer};
use crate::queue::{sealed, Queue};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[cfg(any(target_os = "linux", target_os = "macos"))]
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

// The index protocol is identical to `SpscRing` (see the strategy note in
// ring.rs). What changes is the storage: one physical buffer mapped twice
// into adjacent virtual ranges, so any run of up to N slots starting
// anywhere in the first range is contiguous in virtual memory - wrap-around
// disappears from the bulk loops. The hardware keeps both views coherent
// because they are the same physical pages.
//
// Slot aliasing only works when the mirror starts exactly at byte
// N * size_of::<T>(), so the mapped layout engages only when that byte count
// is a whole number of pages. Everything else (including non-unix hosts)
// uses plain heap slots with the same split-segment logic as the array ring.

/// Construction failure of the double-mapped ring.
///
/// The only operations that can fail are the OS calls that build the
/// mapping; every partially built resource is torn down before the error is
/// returned.
#[derive(Debug, Error)]
pub enum MapError {
    /// The anonymous shared memory descriptor could not be created.
    #[error("creating the shared memory descriptor failed: {0}")]
    Descriptor(io::Error),
    /// The descriptor could not be sized to the ring storage.
    #[error("sizing the shared memory region to {bytes} bytes failed: {source}")]
    Size {
        /// Requested physical size in bytes.
        bytes: usize,
        /// The failing `ftruncate` error.
        source: io::Error,
    },
    /// Reserving or fixing one of the two mappings failed.
    #[error("mapping the ring storage failed: {0}")]
    Map(io::Error),
}

/// SPSC ring whose storage is one physical buffer mapped twice.
///
/// Same contract as [`SpscRing`](crate::SpscRing): capacity `N` is a power
/// of two, one slot stays reserved. Created through
/// [`spsc_mapped`](crate::spsc_mapped), which fails only when the OS
/// refuses a descriptor or mapping.
#[repr(C)]
pub struct MappedRing<T, const N: usize> {
    // === PRODUCER HOT ===
    tail: CachePadded<AtomicUsize>,
    cached_head: CachePadded<UnsafeCell<usize>>,

    // === CONSUMER HOT ===
    head: CachePadded<AtomicUsize>,
    cached_tail: CachePadded<UnsafeCell<usize>>,

    storage: Storage<T>,
}

// Safety: same argument as SpscRing - the acquire/release index protocol
// synchronizes slot access, and both storage layouts are plain memory.
unsafe impl<T: Send, const N: usize> Send for MappedRing<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for MappedRing<T, N> {}

enum Storage<T> {
    /// Double-mapped region; slot `i` is also visible at slot `i + N`.
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    Mapped(DoubleMap),
    /// Fallback slots on the heap; bulk loops split at the boundary.
    Heap(Box<[UnsafeCell<MaybeUninit<T>>]>),
}

impl<T> Storage<T> {
    fn new(slots: usize) -> Result<Self, MapError> {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            let bytes = slots * std::mem::size_of::<T>();
            let page = page_size();
            if bytes > 0 && bytes % page == 0 && std::mem::align_of::<T>() <= page {
                return Ok(Storage::Mapped(DoubleMap::new(bytes)?));
            }
        }

        let mut buffer = Vec::with_capacity(slots);
        buffer.resize_with(slots, || UnsafeCell::new(MaybeUninit::uninit()));
        Ok(Storage::Heap(buffer.into_boxed_slice()))
    }

    /// Pointer to slot `idx` in the first (canonical) range.
    #[inline]
    fn slot(&self, idx: usize) -> *mut T {
        match self {
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            Storage::Mapped(map) => unsafe { map.base.cast::<T>().add(idx) },
            Storage::Heap(slots) => slots[idx].get().cast(),
        }
    }
}

impl<T, const N: usize> MappedRing<T, N> {
    const MASK: usize = N - 1;

    const CAPACITY_OK: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    pub(crate) fn new() -> Result<Self, MapError> {
        let () = Self::CAPACITY_OK;
        Ok(Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            storage: Storage::new(N)?,
        })
    }

    #[inline]
    fn slot(&self, idx: usize) -> *mut T {
        debug_assert_slot!(idx, N);
        self.storage.slot(idx)
    }

    /// Producer side: free slots, refreshing the cached head only when the
    /// cached view cannot satisfy `wanted`.
    #[inline]
    fn free_for(&self, tail: usize, wanted: usize) -> usize {
        // SAFETY: cached_head has a single writer - the producer side,
        // serialized by the unique Sink handle.
        let cached = unsafe { *self.cached_head.get() };
        let free = index::free_slots(index::occupancy_masked(cached, tail, Self::MASK), N);
        if free >= wanted {
            return free;
        }
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: as above.
        unsafe { *self.cached_head.get() = head };
        index::free_slots(index::occupancy_masked(head, tail, Self::MASK), N)
    }

    /// Consumer side: available elements, refreshing the cached tail only
    /// when the cached view cannot satisfy `wanted`.
    #[inline]
    fn available_for(&self, head: usize, wanted: usize) -> usize {
        // SAFETY: cached_tail has a single writer - the consumer side,
        // serialized by the unique Source handle.
        let cached = unsafe { *self.cached_tail.get() };
        let avail = index::occupancy_masked(head, cached, Self::MASK);
        if avail >= wanted {
            return avail;
        }
        let tail = self.tail.load(Ordering::Acquire);
        // SAFETY: as above.
        unsafe { *self.cached_tail.get() = tail };
        index::occupancy_masked(head, tail, Self::MASK)
    }
}

impl<T, const N: usize> sealed::Sealed for MappedRing<T, N> {}

impl<T: Send, const N: usize> Queue for MappedRing<T, N> {
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
        // SAFETY: the slot at `tail` is raw storage outside the live
        // window; construct the value in place.
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
        // SAFETY: the slot at `head` holds a published value; reading moves
        // it out and the slot reverts to raw storage.
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

        match &self.storage {
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            Storage::Mapped(map) => {
                // SAFETY: the run tail..tail+count stays within the doubled
                // range (count <= N - 1); slots past N alias slots from 0
                // through the second mapping.
                unsafe {
                    let dst = map.base.cast::<T>().add(tail);
                    ptr::copy_nonoverlapping(src.as_ptr(), dst, count);
                }
            }
            Storage::Heap(_) => {
                let seg = index::split(tail, count, N);
                // SAFETY: same argument as the array ring - the run is free
                // and producer-owned until the Release store.
                unsafe {
                    ptr::copy_nonoverlapping(src.as_ptr(), self.slot(tail), seg.first);
                    if seg.second > 0 {
                        ptr::copy_nonoverlapping(
                            src.as_ptr().add(seg.first),
                            self.slot(0),
                            seg.second,
                        );
                    }
                }
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

        match &self.storage {
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            Storage::Mapped(map) => {
                // SAFETY: the live run head..head+count is published and
                // contiguous through the second mapping.
                unsafe {
                    let src = map.base.cast::<T>().add(head);
                    ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), count);
                }
            }
            Storage::Heap(_) => {
                let seg = index::split(head, count, N);
                // SAFETY: same argument as the array ring.
                unsafe {
                    ptr::copy_nonoverlapping(self.slot(head), dst.as_mut_ptr(), seg.first);
                    if seg.second > 0 {
                        ptr::copy_nonoverlapping(
                            self.slot(0),
                            dst.as_mut_ptr().add(seg.first),
                            seg.second,
                        );
                    }
                }
            }
        }
        self.head
            .store(index::add_masked(head, count, Self::MASK), Ordering::Release);
        count
    }
}

impl<T, const N: usize> Drop for MappedRing<T, N> {
    fn drop(&mut self) {
        // Destroy the live window, then the storage drop unmaps/frees.
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let count = index::occupancy_masked(head, tail, Self::MASK);

        for i in 0..count {
            let idx = index::add_masked(head, i, Self::MASK);
            // SAFETY: slots in the live window hold initialized values.
            unsafe {
                ptr::drop_in_place(self.storage.slot(idx));
            }
        }
    }
}

// =============================================================================
// DOUBLE MAPPING
// =============================================================================

/// One physical buffer of `span` bytes, visible at `base` and `base + span`.
///
/// Unmaps the doubled range and closes the descriptor on drop.
#[cfg(any(target_os = "linux", target_os = "macos"))]
struct DoubleMap {
    base: *mut u8,
    span: usize,
    _fd: OwnedFd,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl DoubleMap {
    fn new(span: usize) -> Result<Self, MapError> {
        let fd = memory_fd()?;

        // SAFETY: freshly created descriptor; span was validated nonzero.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), span as libc::off_t) } != 0 {
            return Err(MapError::Size {
                bytes: span,
                source: io::Error::last_os_error(),
            });
        }

        unsafe {
            // Reserve the doubled range without access rights; the two data
            // maps below replace it in place.
            let reserved = libc::mmap(
                ptr::null_mut(),
                span * 2,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if reserved == libc::MAP_FAILED {
                return Err(MapError::Map(io::Error::last_os_error()));
            }
            // MAP_FIXED over an existing mapping discards the overlapped
            // part, so dropping this guard unwinds whatever has been built
            // so far in one munmap of the full range.
            let guard = Unmap {
                addr: reserved,
                len: span * 2,
            };

            let rw = libc::PROT_READ | libc::PROT_WRITE;
            let lo = libc::mmap(
                reserved,
                span,
                rw,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd.as_raw_fd(),
                0,
            );
            if lo != reserved {
                return Err(MapError::Map(io::Error::last_os_error()));
            }

            let mirror = reserved.cast::<u8>().add(span).cast::<libc::c_void>();
            let hi = libc::mmap(
                mirror,
                span,
                rw,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd.as_raw_fd(),
                0,
            );
            if hi != mirror {
                return Err(MapError::Map(io::Error::last_os_error()));
            }

            std::mem::forget(guard);
            Ok(Self {
                base: reserved.cast(),
                span,
                _fd: fd,
            })
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl Drop for DoubleMap {
    fn drop(&mut self) {
        // SAFETY: base/span describe the mapping built in new(); both
        // halves live inside this one range.
        unsafe {
            libc::munmap(self.base.cast(), self.span * 2);
        }
    }
}

/// Unwind guard for a partially constructed mapping.
#[cfg(any(target_os = "linux", target_os = "macos"))]
struct Unmap {
    addr: *mut libc::c_void,
    len: usize,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl Drop for Unmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr, self.len);
        }
    }
}

/// Descriptor for anonymous memory that can be mapped twice.
#[cfg(target_os = "linux")]
fn memory_fd() -> Result<OwnedFd, MapError> {
    // SAFETY: plain syscall; the name is only a debugging label.
    let fd = unsafe { libc::memfd_create(c"ringspsc".as_ptr(), 0) };
    if fd < 0 {
        return Err(MapError::Descriptor(io::Error::last_os_error()));
    }
    // SAFETY: fd was just returned by the kernel and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(target_os = "macos")]
fn memory_fd() -> Result<OwnedFd, MapError> {
    use std::ffi::CString;
    use std::sync::atomic::AtomicU32;

    static SEQ: AtomicU32 = AtomicU32::new(0);

    // shm names are process-wide; pid + sequence keeps them unique. The
    // object is unlinked immediately so only the descriptor keeps it alive.
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let name = CString::new(format!("/ringspsc-{}-{}", std::process::id(), seq)).unwrap();

    // SAFETY: plain syscalls over a valid C string.
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600,
        )
    };
    if fd < 0 {
        return Err(MapError::Descriptor(io::Error::last_os_error()));
    }
    unsafe {
        libc::shm_unlink(name.as_ptr());
    }
    // SAFETY: fd was just returned by the kernel and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn page_size() -> usize {
    // SAFETY: sysconf is always callable; _SC_PAGESIZE cannot fail.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
