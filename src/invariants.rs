//! Debug assertion macros for the queue invariants.
//!
//! Active only in debug builds, so the release hot paths carry no checks.
//! Used by `SpscRing<T, N>` and `MappedRing<T, N>`.

/// Assert that occupancy stays below capacity (one slot is reserved).
macro_rules! debug_assert_room {
    ($occ:expr, $cap:expr) => {
        debug_assert!(
            $occ < $cap,
            "occupancy {} reached capacity {}; the reserved slot was consumed",
            $occ,
            $cap
        )
    };
}

/// Assert that a slot index is inside the buffer.
macro_rules! debug_assert_slot {
    ($idx:expr, $cap:expr) => {
        debug_assert!(
            $idx < $cap,
            "slot index {} out of range for capacity {}",
            $idx,
            $cap
        )
    };
}

/// Assert that a bulk transfer never exceeds its clamp.
macro_rules! debug_assert_transfer {
    ($count:expr, $limit:expr) => {
        debug_assert!(
            $count <= $limit,
            "transferring {} elements past the computed limit {}",
            $count,
            $limit
        )
    };
}

pub(crate) use debug_assert_room;
pub(crate) use debug_assert_slot;
pub(crate) use debug_assert_transfer;
