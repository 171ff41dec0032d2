//! Priority-inheritance condition variable.
//!
//! Waiters block with `FUTEX_WAIT_REQUEUE_PI` on a 32-bit epoch counter and
//! are moved by `FUTEX_CMP_REQUEUE_PI` straight onto the caller's PI mutex,
//! so a woken waiter returns already owning it and priority inheritance
//! covers the whole hand-off.
//!
//! Epoch protocol, all counter updates under the private mutex:
//! - wait: bump the epoch and keep the new value as the ticket, then sleep
//!   comparing against the current epoch.
//! - signal/broadcast: bump the epoch and publish it as `wake_id`, then
//!   requeue comparing against that value.
//! - a waiter whose sleep fails with `EAGAIN` checks `wake_id` against its
//!   ticket: if a signal already covered it, it relocks and returns;
//!   otherwise it sleeps again on the fresh epoch.
//!
//! The external mutex is passed to every call; the condvar keeps no
//! reference to it. Wakeup order follows the kernel's priority queue, not
//! ticket order.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::errno::PiError;
use crate::futex::{FutexOps, KernelFutex};
use crate::pi::mutex::{PiMutex, RTPI_MUTEX_PSHARED, SavedLock};
use crate::pi::tid;
use crate::syscall;
use crate::time::{CLOCK_MONOTONIC, CLOCK_REALTIME, Timespec, valid_clock_id, validate_deadline};
use crate::trace::{self, Severity, TraceEvent};

// ---------------------------------------------------------------------------
// Condvar flags
// ---------------------------------------------------------------------------

/// The condvar lives in memory shared between processes.
pub const RTPI_COND_PSHARED: u32 = 0x01;

const RTPI_COND_KNOWN_FLAGS: u32 = RTPI_COND_PSHARED;

/// Internal flags-word bit set by [`PiCond::init_with_clock`]; never accepted
/// from callers.
const COND_CLOCK_REALTIME: u32 = 0x8000_0000;

/// Returns true if `flags` only contains recognized condvar flag bits.
#[must_use]
pub const fn valid_cond_flags(flags: u32) -> bool {
    flags & !RTPI_COND_KNOWN_FLAGS == 0
}

/// True when `wake_id` is at or past `ticket` in wrapping epoch order.
#[inline]
#[must_use]
pub const fn epoch_reached(wake_id: u32, ticket: u32) -> bool {
    (wake_id.wrapping_sub(ticket) as i32) >= 0
}

// ---------------------------------------------------------------------------
// Condvar state
// ---------------------------------------------------------------------------

/// PI condvar state, overlaid on caller-provided `pi_cond_t` memory.
///
/// Layout (128 bytes, two cache lines):
/// - `cond` @0: epoch counter, the futex waiters sleep on
/// - `flags` @4
/// - `wake_id` @8: last signaled epoch
/// - reserved @12..64
/// - `priv_mut` @64: serializes `cond` and `wake_id` updates
#[repr(C, align(64))]
pub struct PiCond {
    cond: AtomicU32,
    flags: AtomicU32,
    wake_id: AtomicU32,
    _reserved: [u32; 13],
    priv_mut: PiMutex,
}

const _: () = assert!(core::mem::size_of::<PiCond>() == 128);
const _: () = assert!(core::mem::align_of::<PiCond>() == 64);

impl PiCond {
    /// A process-private condvar on `CLOCK_MONOTONIC`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cond: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            wake_id: AtomicU32::new(0),
            _reserved: [0; 13],
            priv_mut: PiMutex::new(),
        }
    }

    pub fn with_flags(flags: u32) -> Result<Self, PiError> {
        let c = Self::new();
        c.init(flags)?;
        Ok(c)
    }

    /// A condvar whose deadlines are measured on `clock_id`.
    pub fn with_clock(flags: u32, clock_id: i32) -> Result<Self, PiError> {
        let c = Self::new();
        c.init_with_clock(flags, clock_id)?;
        Ok(c)
    }

    /// Reset with `flags` (0 or `RTPI_COND_PSHARED`); deadlines use
    /// `CLOCK_MONOTONIC`.
    pub fn init(&self, flags: u32) -> Result<(), PiError> {
        self.init_with_clock(flags, CLOCK_MONOTONIC)
    }

    /// [`init`](Self::init) with an explicit deadline clock,
    /// `CLOCK_MONOTONIC` or `CLOCK_REALTIME`.
    pub fn init_with_clock(&self, flags: u32, clock_id: i32) -> Result<(), PiError> {
        if !valid_cond_flags(flags) || !valid_clock_id(clock_id) {
            return Err(PiError::InvalidArgument);
        }
        let clock_bit = if clock_id == CLOCK_REALTIME {
            COND_CLOCK_REALTIME
        } else {
            0
        };
        self.cond.store(0, Ordering::Relaxed);
        self.wake_id.store(0, Ordering::Relaxed);
        self.flags.store(flags | clock_bit, Ordering::Release);
        let priv_flags = if flags & RTPI_COND_PSHARED != 0 {
            RTPI_MUTEX_PSHARED
        } else {
            0
        };
        self.priv_mut.init(priv_flags)
    }

    /// Zero the state. Destroying a condvar with blocked waiters is a
    /// caller bug.
    pub fn destroy(&self) -> Result<(), PiError> {
        self.cond.store(0, Ordering::Relaxed);
        self.wake_id.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Release);
        self.priv_mut.destroy()
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.cond.load(Ordering::Acquire)
    }

    /// Epoch published by the most recent signal or broadcast.
    #[must_use]
    pub fn last_signaled(&self) -> u32 {
        self.wake_id.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_process_shared(&self) -> bool {
        self.flags.load(Ordering::Acquire) & RTPI_COND_PSHARED != 0
    }

    /// Clock that timed-wait deadlines are measured against.
    #[must_use]
    pub fn clock_id(&self) -> i32 {
        if self.flags.load(Ordering::Acquire) & COND_CLOCK_REALTIME != 0 {
            CLOCK_REALTIME
        } else {
            CLOCK_MONOTONIC
        }
    }

    /// Requeue operations use one key scope for both words, so the condvar
    /// and `mutex` must agree on process sharing.
    fn check_scope(&self, mutex: &PiMutex, op: &'static str) -> Result<bool, PiError> {
        let shared = self.is_process_shared();
        if shared != mutex.is_process_shared() {
            trace::emit(Severity::Error, || {
                TraceEvent::new("scope_mismatch", op, tid::current(), shared)
                    .errno(crate::errno::EINVAL)
            });
            return Err(PiError::InvalidArgument);
        }
        Ok(shared)
    }

    /// Caller must hold the private mutex.
    fn advance_epoch(&self) -> u32 {
        self.cond.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    // -----------------------------------------------------------------------
    // Wait
    // -----------------------------------------------------------------------

    /// Release `mutex`, sleep until signaled, return owning `mutex` again.
    pub fn wait(&self, mutex: &PiMutex) -> Result<(), PiError> {
        self.timedwait_with(mutex, None, &KernelFutex)
    }

    /// [`wait`](Self::wait) bounded by the absolute `deadline` on
    /// [`clock_id`](Self::clock_id). `mutex` is owned again on every return
    /// except argument errors.
    pub fn timedwait(&self, mutex: &PiMutex, deadline: Option<&Timespec>) -> Result<(), PiError> {
        self.timedwait_with(mutex, deadline, &KernelFutex)
    }

    pub fn wait_with<F: FutexOps + ?Sized>(&self, mutex: &PiMutex, futex: &F) -> Result<(), PiError> {
        self.timedwait_with(mutex, None, futex)
    }

    pub fn timedwait_with<F: FutexOps + ?Sized>(
        &self,
        mutex: &PiMutex,
        deadline: Option<&Timespec>,
        futex: &F,
    ) -> Result<(), PiError> {
        validate_deadline(deadline)?;
        let shared = self.check_scope(mutex, "cond_wait")?;
        let clock_id = self.clock_id();

        let mut private = self.priv_mut.lock_save_with(futex)?;
        if let Err(e) = mutex.unlock_with(futex) {
            // Not holding the external mutex: nothing was registered.
            release_private(private, shared);
            return Err(e);
        }
        let ticket = self.advance_epoch();

        loop {
            let observed = self.cond.load(Ordering::Acquire);
            if let Err(e) = private.restore() {
                return relock_then_fail(mutex, futex, e, shared);
            }

            let waited =
                futex.wait_requeue_pi(&self.cond, observed, deadline, clock_id, mutex.word(), shared);

            private = match self.priv_mut.lock_save_with(futex) {
                Ok(guard) => guard,
                // After a successful requeue the external mutex is already ours.
                Err(e) if waited.is_ok() => return Err(e),
                Err(e) => return relock_then_fail(mutex, futex, e, shared),
            };

            match waited {
                Ok(()) => return private.restore(),
                Err(e) if syscall::is_retry(e) => {
                    if epoch_reached(self.wake_id.load(Ordering::Acquire), ticket) {
                        trace::emit(Severity::Info, || {
                            TraceEvent::new("wakeup_already_delivered", "cond_wait", tid::current(), shared)
                                .epoch(observed)
                                .ticket(ticket)
                        });
                        release_private(private, shared);
                        return relock(mutex, futex);
                    }
                    trace::emit(Severity::Info, || {
                        TraceEvent::new("wait_retry", "cond_wait", tid::current(), shared)
                            .epoch(observed)
                            .ticket(ticket)
                    });
                }
                Err(e) => {
                    let event = if e == crate::errno::ETIMEDOUT {
                        "timeout"
                    } else {
                        "kernel_error"
                    };
                    trace::emit(Severity::Error, || {
                        TraceEvent::new(event, "cond_wait", tid::current(), shared)
                            .errno(e)
                            .ticket(ticket)
                    });
                    release_private(private, shared);
                    return relock_then_fail(mutex, futex, PiError::from_errno(e), shared);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Signal / broadcast
    // -----------------------------------------------------------------------

    /// Wake one waiter, moving it onto `mutex`. No waiters is not an error.
    pub fn signal(&self, mutex: &PiMutex) -> Result<(), PiError> {
        self.wake_with(mutex, false, &KernelFutex)
    }

    /// Wake every waiter, moving them onto `mutex`.
    pub fn broadcast(&self, mutex: &PiMutex) -> Result<(), PiError> {
        self.wake_with(mutex, true, &KernelFutex)
    }

    pub fn signal_with<F: FutexOps + ?Sized>(&self, mutex: &PiMutex, futex: &F) -> Result<(), PiError> {
        self.wake_with(mutex, false, futex)
    }

    pub fn broadcast_with<F: FutexOps + ?Sized>(
        &self,
        mutex: &PiMutex,
        futex: &F,
    ) -> Result<(), PiError> {
        self.wake_with(mutex, true, futex)
    }

    fn publish_wakeup<F: FutexOps + ?Sized>(&self, futex: &F) -> Result<u32, PiError> {
        let private = self.priv_mut.lock_save_with(futex)?;
        let epoch = self.advance_epoch();
        self.wake_id.store(epoch, Ordering::Release);
        private.restore()?;
        Ok(epoch)
    }

    fn wake_with<F: FutexOps + ?Sized>(
        &self,
        mutex: &PiMutex,
        broadcast: bool,
        futex: &F,
    ) -> Result<(), PiError> {
        let op = if broadcast { "cond_broadcast" } else { "cond_signal" };
        let shared = self.check_scope(mutex, op)?;
        let nr_requeue = if broadcast { i32::MAX } else { 0 };
        let mut epoch = self.publish_wakeup(futex)?;
        loop {
            match futex.cmp_requeue_pi(&self.cond, epoch, nr_requeue, mutex.word(), shared) {
                Ok(_) => return Ok(()),
                Err(e) if syscall::is_retry(e) => {
                    trace::emit(Severity::Info, || {
                        TraceEvent::new("requeue_retry", op, tid::current(), shared).epoch(epoch)
                    });
                    epoch = self.publish_wakeup(futex)?;
                }
                Err(e) => {
                    trace::emit(Severity::Error, || {
                        TraceEvent::new("kernel_error", op, tid::current(), shared)
                            .errno(e)
                            .epoch(epoch)
                    });
                    return Err(PiError::from_errno(e));
                }
            }
        }
    }
}

/// Take `mutex` back after an aborted wait. Already owning it counts.
fn relock<F: FutexOps + ?Sized>(mutex: &PiMutex, futex: &F) -> Result<(), PiError> {
    match mutex.lock_with(futex) {
        Ok(()) | Err(PiError::Deadlock) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Relock, then report `err`. A failed relock wins because the caller must
/// learn the mutex is not held; `err` is still traced.
fn relock_then_fail<F: FutexOps + ?Sized>(
    mutex: &PiMutex,
    futex: &F,
    err: PiError,
    shared: bool,
) -> Result<(), PiError> {
    if let Err(relock_err) = relock(mutex, futex) {
        trace::emit(Severity::Error, || {
            TraceEvent::new("abort_error_dropped", "cond_wait", tid::current(), shared)
                .errno(err.errno())
        });
        return Err(relock_err);
    }
    Err(err)
}

/// Drop the private mutex on a path that already has a result to return.
fn release_private<G: FutexOps>(private: SavedLock<'_, G>, shared: bool) {
    if let Err(e) = private.restore() {
        trace::emit(Severity::Error, || {
            TraceEvent::new("private_release_failed", "cond_wait", tid::current(), shared)
                .errno(e.errno())
        });
    }
}

impl Default for PiCond {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PiCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiCond")
            .field("epoch", &self.epoch())
            .field("wake_id", &self.last_signaled())
            .field("pshared", &self.is_process_shared())
            .field("clock_id", &self.clock_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
