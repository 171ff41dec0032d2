//! `extern "C"` exports over [`PiMutex`] and [`PiCond`].
//!
//! Handles are validated for null and alignment before use; anything else
//! about the pointed-to memory is the caller's contract.

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_int;

use rtpi_core::errno::to_errno;
use rtpi_core::{PiCond, PiMutex, Timespec};

/// C name of the mutex storage: 64 bytes, 64-byte aligned.
#[allow(non_camel_case_types)]
pub type pi_mutex_t = PiMutex;

/// C name of the condvar storage: 128 bytes, 64-byte aligned.
#[allow(non_camel_case_types)]
pub type pi_cond_t = PiCond;

const _: () = assert!(core::mem::size_of::<pi_mutex_t>() == 64);
const _: () = assert!(core::mem::size_of::<pi_cond_t>() == 128);

/// Borrow a caller handle, rejecting null and misaligned pointers.
///
/// # Safety
///
/// A non-null aligned `ptr` must point to live storage of `T` for `'a`.
#[inline]
unsafe fn handle<'a, T>(ptr: *const T) -> Option<&'a T> {
    if ptr.is_null() || !ptr.is_aligned() {
        return None;
    }
    // SAFETY: non-null and aligned; liveness is the caller's contract.
    Some(unsafe { &*ptr })
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Initialize `mutex` with `flags` (`RTPI_MUTEX_PSHARED` or 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_mutex_init(mutex: *mut pi_mutex_t, flags: u32) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(m) = (unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(m.init(flags))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_mutex_destroy(mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(m) = (unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(m.destroy())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_mutex_trylock(mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(m) = (unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(m.trylock())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_mutex_lock(mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(m) = (unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(m.lock())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_mutex_unlock(mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(m) = (unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(m.unlock())
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

/// Initialize `cond` with 0 or `RTPI_COND_PSHARED`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_init(cond: *mut pi_cond_t, flags: u32) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(c) = (unsafe { handle(cond) }) else {
        return libc::EINVAL;
    };
    to_errno(c.init(flags))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_destroy(cond: *mut pi_cond_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(c) = (unsafe { handle(cond) }) else {
        return libc::EINVAL;
    };
    to_errno(c.destroy())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_wait(cond: *mut pi_cond_t, mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { handle(cond) }, unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(c.wait(m))
}

/// Wait until signaled or until the absolute `abstime` on the condvar's
/// clock. A null `abstime` waits without a deadline.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_timedwait(
    cond: *mut pi_cond_t,
    mutex: *mut pi_mutex_t,
    abstime: *const libc::timespec,
) -> c_int {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { handle(cond) }, unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    let deadline = if abstime.is_null() {
        None
    } else {
        // SAFETY: forwarded caller contract.
        let Some(ts) = (unsafe { handle(abstime) }) else {
            return libc::EINVAL;
        };
        Some(Timespec::new(ts.tv_sec, ts.tv_nsec))
    };
    to_errno(c.timedwait(m, deadline.as_ref()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_signal(cond: *mut pi_cond_t, mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { handle(cond) }, unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(c.signal(m))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pi_cond_broadcast(cond: *mut pi_cond_t, mutex: *mut pi_mutex_t) -> c_int {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { handle(cond) }, unsafe { handle(mutex) }) else {
        return libc::EINVAL;
    };
    to_errno(c.broadcast(m))
}
