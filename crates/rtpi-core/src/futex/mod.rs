//! Kernel-assisted PI blocking and wake operations.
//!
//! The PI mutex and condvar protocols only need four operations from the
//! kernel. They are expressed as the [`FutexOps`] capability so the protocol
//! code can run against the real Linux futex ([`KernelFutex`]) or against the
//! in-process model in [`sim`].
//!
//! Errors are plain errno values; `EAGAIN` from the requeue operations means
//! the compared value moved and the caller should retry.

pub mod sim;

use std::sync::atomic::AtomicU32;

use crate::syscall;
use crate::time::{CLOCK_REALTIME, Timespec};

// ---------------------------------------------------------------------------
// Futex operation constants (Linux)
// ---------------------------------------------------------------------------

pub const FUTEX_LOCK_PI: i32 = 6;
pub const FUTEX_UNLOCK_PI: i32 = 7;
pub const FUTEX_WAIT_REQUEUE_PI: i32 = 11;
pub const FUTEX_CMP_REQUEUE_PI: i32 = 12;
pub const FUTEX_PRIVATE_FLAG: i32 = 128;
pub const FUTEX_CLOCK_REALTIME: i32 = 256;

// ---------------------------------------------------------------------------
// PI owner word layout
// ---------------------------------------------------------------------------

/// Owner tid bits of a PI futex word.
pub const FUTEX_TID_MASK: u32 = 0x3fff_ffff;
/// Set by the kernel while threads are queued on the word.
pub const FUTEX_WAITERS: u32 = 0x8000_0000;
/// Set by the kernel when the owner exited without unlocking.
pub const FUTEX_OWNER_DIED: u32 = 0x4000_0000;

/// The four kernel-assisted operations the PI protocols are built on.
///
/// `shared` selects process-shared futex keys; private keys are used
/// otherwise. Every method blocks only where the kernel operation would.
pub trait FutexOps {
    /// Acquire the PI futex `word`, boosting its current owner while blocked.
    fn lock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32>;

    /// Release `word`, handing it to the highest-priority waiter.
    fn unlock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32>;

    /// If `cond` still holds `expected`, wake or requeue one waiter onto `mutex`
    /// and requeue up to `nr_requeue` more. Returns how many were moved.
    fn cmp_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        nr_requeue: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<usize, i32>;

    /// If `cond` still holds `expected`, sleep on it until requeued onto
    /// `mutex` and granted ownership of it, or until `deadline` passes.
    fn wait_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        deadline: Option<&Timespec>,
        clock_id: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<(), i32>;
}

impl<T: FutexOps + ?Sized> FutexOps for &T {
    fn lock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32> {
        (**self).lock_pi(word, shared)
    }

    fn unlock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32> {
        (**self).unlock_pi(word, shared)
    }

    fn cmp_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        nr_requeue: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<usize, i32> {
        (**self).cmp_requeue_pi(cond, expected, nr_requeue, mutex, shared)
    }

    fn wait_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        deadline: Option<&Timespec>,
        clock_id: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<(), i32> {
        (**self).wait_requeue_pi(cond, expected, deadline, clock_id, mutex, shared)
    }
}

/// The Linux futex syscall.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelFutex;

#[inline]
const fn futex_op(op: i32, shared: bool) -> i32 {
    if shared { op } else { op | FUTEX_PRIVATE_FLAG }
}

#[inline]
fn word_ptr(word: &AtomicU32) -> *const u32 {
    word.as_ptr().cast_const()
}

impl FutexOps for KernelFutex {
    fn lock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32> {
        // SAFETY: `word` is a live aligned futex word; no timeout, no uaddr2.
        unsafe {
            syscall::sys_futex(
                word_ptr(word),
                futex_op(FUTEX_LOCK_PI, shared),
                0,
                0,
                std::ptr::null(),
                0,
            )
        }
        .map(|_| ())
    }

    fn unlock_pi(&self, word: &AtomicU32, shared: bool) -> Result<(), i32> {
        // SAFETY: `word` is a live aligned futex word.
        unsafe {
            syscall::sys_futex(
                word_ptr(word),
                futex_op(FUTEX_UNLOCK_PI, shared),
                0,
                0,
                std::ptr::null(),
                0,
            )
        }
        .map(|_| ())
    }

    fn cmp_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        nr_requeue: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<usize, i32> {
        // nr_wake must be 1 for requeue-PI; nr_requeue rides in the timeout slot.
        // SAFETY: both words are live and aligned; val2 is a count, not a pointer.
        unsafe {
            syscall::sys_futex(
                word_ptr(cond),
                futex_op(FUTEX_CMP_REQUEUE_PI, shared),
                1,
                nr_requeue.max(0) as usize,
                word_ptr(mutex),
                expected,
            )
        }
    }

    fn wait_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        deadline: Option<&Timespec>,
        clock_id: i32,
        mutex: &AtomicU32,
        shared: bool,
    ) -> Result<(), i32> {
        let mut op = futex_op(FUTEX_WAIT_REQUEUE_PI, shared);
        if clock_id == CLOCK_REALTIME {
            op |= FUTEX_CLOCK_REALTIME;
        }
        let timeout = deadline.map_or(0, |ts| ts as *const Timespec as usize);
        // SAFETY: both words are live and aligned; `timeout` is 0 or points to
        // a `#[repr(C)]` timespec that outlives the call.
        unsafe {
            syscall::sys_futex(
                word_ptr(cond),
                op,
                expected,
                timeout,
                word_ptr(mutex),
                0,
            )
        }
        .map(|_| ())
    }
}
