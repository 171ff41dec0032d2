//! Priority-inheritance mutex.
//!
//! The lock is a single PI futex word holding the owner's kernel tid. The
//! uncontended paths are one compare-and-swap each; contention is handed to
//! the kernel (`FUTEX_LOCK_PI` / `FUTEX_UNLOCK_PI`), which queues waiters by
//! priority and boosts the owner while a higher-priority thread waits.
//!
//! The mutex is non-recursive: relocking by the owner reports `Deadlock`
//! instead of blocking.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::errno::PiError;
use crate::futex::{FUTEX_TID_MASK, FUTEX_WAITERS, FutexOps, KernelFutex};
use crate::pi::tid;
use crate::trace::{self, Severity, TraceEvent};

// ---------------------------------------------------------------------------
// Mutex flags
// ---------------------------------------------------------------------------

/// The mutex lives in memory shared between processes.
pub const RTPI_MUTEX_PSHARED: u32 = 0x01;

const RTPI_MUTEX_KNOWN_FLAGS: u32 = RTPI_MUTEX_PSHARED;

/// Returns true if `flags` only contains recognized mutex flag bits.
#[must_use]
pub const fn valid_mutex_flags(flags: u32) -> bool {
    flags & !RTPI_MUTEX_KNOWN_FLAGS == 0
}

// ---------------------------------------------------------------------------
// Mutex state
// ---------------------------------------------------------------------------

/// PI mutex state, overlaid on caller-provided `pi_mutex_t` memory.
///
/// Layout (64 bytes, one cache line):
/// - `futex` @0: owner tid in the low 30 bits, kernel waiter bits above
/// - `flags` @4: `RTPI_MUTEX_PSHARED` or 0
/// - reserved @8..64
#[repr(C, align(64))]
pub struct PiMutex {
    futex: AtomicU32,
    flags: AtomicU32,
    _reserved: [u32; 14],
}

const _: () = assert!(core::mem::size_of::<PiMutex>() == 64);
const _: () = assert!(core::mem::align_of::<PiMutex>() == 64);

impl PiMutex {
    /// An unlocked, process-private mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            _reserved: [0; 14],
        }
    }

    /// An unlocked mutex initialized with `flags`.
    pub fn with_flags(flags: u32) -> Result<Self, PiError> {
        let m = Self::new();
        m.init(flags)?;
        Ok(m)
    }

    /// Reset to unlocked and record `flags`. Unknown bits are rejected and
    /// leave the state untouched.
    pub fn init(&self, flags: u32) -> Result<(), PiError> {
        if !valid_mutex_flags(flags) {
            return Err(PiError::InvalidArgument);
        }
        tid::install_fork_guard();
        self.futex.store(0, Ordering::Relaxed);
        self.flags
            .store(flags & RTPI_MUTEX_PSHARED, Ordering::Release);
        Ok(())
    }

    /// Zero the state. Destroying a mutex somebody still holds or waits on
    /// is a caller bug.
    pub fn destroy(&self) -> Result<(), PiError> {
        self.futex.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Release);
        Ok(())
    }

    /// Acquire without blocking and without entering the kernel.
    pub fn trylock(&self) -> Result<(), PiError> {
        let me = tid::current();
        if self.futex.load(Ordering::Relaxed) & FUTEX_TID_MASK == me {
            return Err(PiError::Deadlock);
        }
        self.futex
            .compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| PiError::WouldBlock)
    }

    /// Acquire, blocking in the kernel with priority inheritance if needed.
    pub fn lock(&self) -> Result<(), PiError> {
        self.lock_with(&KernelFutex)
    }

    pub fn lock_with<F: FutexOps + ?Sized>(&self, futex: &F) -> Result<(), PiError> {
        match self.trylock() {
            Err(PiError::WouldBlock) => {}
            other => return other,
        }
        let shared = self.is_process_shared();
        trace::emit(Severity::Info, || {
            TraceEvent::new("lock_slow_path", "lock", tid::current(), shared)
        });
        futex.lock_pi(&self.futex, shared).map_err(|e| {
            trace::emit(Severity::Error, || {
                TraceEvent::new("kernel_error", "lock", tid::current(), shared).errno(e)
            });
            PiError::from_errno(e)
        })
    }

    /// Release. Only the owner may unlock.
    pub fn unlock(&self) -> Result<(), PiError> {
        self.unlock_with(&KernelFutex)
    }

    pub fn unlock_with<F: FutexOps + ?Sized>(&self, futex: &F) -> Result<(), PiError> {
        let me = tid::current();
        if self.futex.load(Ordering::Relaxed) & FUTEX_TID_MASK != me {
            return Err(PiError::NotOwner);
        }
        if self
            .futex
            .compare_exchange(me, 0, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return Ok(());
        }
        // Waiter bits are set: the kernel must pick the next owner.
        let shared = self.is_process_shared();
        trace::emit(Severity::Info, || {
            TraceEvent::new("unlock_handoff", "unlock", me, shared)
        });
        futex.unlock_pi(&self.futex, shared).map_err(|e| {
            trace::emit(Severity::Error, || {
                TraceEvent::new("kernel_error", "unlock", me, shared).errno(e)
            });
            PiError::from_errno(e)
        })
    }

    /// Lock unless the caller already owns the mutex.
    ///
    /// The returned guard remembers which case applied and only unlocks on
    /// [`SavedLock::restore`] (or drop) when this call did the acquiring.
    pub fn lock_save(&self) -> Result<SavedLock<'_, KernelFutex>, PiError> {
        self.lock_save_with(KernelFutex)
    }

    pub fn lock_save_with<F: FutexOps>(&self, futex: F) -> Result<SavedLock<'_, F>, PiError> {
        let already_held = match self.lock_with(&futex) {
            Ok(()) => false,
            Err(PiError::Deadlock) => true,
            Err(e) => return Err(e),
        };
        Ok(SavedLock {
            mutex: self,
            futex,
            already_held,
            restored: false,
        })
    }

    /// True while any thread owns the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.futex.load(Ordering::Acquire) & FUTEX_TID_MASK != 0
    }

    /// Owner tid, if locked.
    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        match self.futex.load(Ordering::Acquire) & FUTEX_TID_MASK {
            0 => None,
            tid => Some(tid),
        }
    }

    /// True when the calling thread owns the mutex.
    #[must_use]
    pub fn is_owned_by_current(&self) -> bool {
        self.owner() == Some(tid::current())
    }

    /// True when the kernel has recorded queued waiters.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        self.futex.load(Ordering::Acquire) & FUTEX_WAITERS != 0
    }

    #[must_use]
    pub fn is_process_shared(&self) -> bool {
        self.flags.load(Ordering::Acquire) & RTPI_MUTEX_PSHARED != 0
    }

    /// The raw PI futex word, for requeue targets.
    pub(crate) fn word(&self) -> &AtomicU32 {
        &self.futex
    }
}

impl Default for PiMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PiMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiMutex")
            .field("owner", &self.owner())
            .field("waiters", &self.has_waiters())
            .field("pshared", &self.is_process_shared())
            .finish()
    }
}

/// Scoped acquisition from [`PiMutex::lock_save`].
#[must_use = "dropping the guard releases a lock it acquired"]
pub struct SavedLock<'a, F: FutexOps> {
    mutex: &'a PiMutex,
    futex: F,
    already_held: bool,
    restored: bool,
}

impl<F: FutexOps> SavedLock<'_, F> {
    /// The caller owned the mutex before `lock_save`.
    #[must_use]
    pub fn already_held(&self) -> bool {
        self.already_held
    }

    /// Undo the acquisition, if there was one.
    pub fn restore(mut self) -> Result<(), PiError> {
        self.restored = true;
        if self.already_held {
            return Ok(());
        }
        self.mutex.unlock_with(&self.futex)
    }
}

impl<F: FutexOps> Drop for SavedLock<'_, F> {
    fn drop(&mut self) {
        if !self.restored && !self.already_held {
            let _ = self.mutex.unlock_with(&self.futex);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
