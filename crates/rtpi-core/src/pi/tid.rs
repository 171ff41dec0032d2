//! Per-thread kernel tid cache.
//!
//! The owner word of a PI futex must hold the kernel tid of the owner, so
//! every lock and unlock needs it. The tid is fetched once per thread and
//! cached; a fork child handler clears the cache because the forking thread
//! gets a new tid in the child.

use std::cell::Cell;
use std::sync::Once;

use crate::syscall;
use crate::trace::{self, Severity, TraceEvent};

thread_local! {
    static CACHED_TID: Cell<u32> = const { Cell::new(0) };
}

static FORK_GUARD: Once = Once::new();

extern "C" fn clear_cached_tid() {
    let _ = CACHED_TID.try_with(|slot| slot.set(0));
}

/// Register the post-fork cache reset. Idempotent and race-free.
pub fn install_fork_guard() {
    FORK_GUARD.call_once(|| {
        // SAFETY: registers a plain `extern "C"` handler that only touches
        // this thread's TLS slot.
        let rc = unsafe { libc::pthread_atfork(None, None, Some(clear_cached_tid)) };
        trace::emit(if rc == 0 { Severity::Info } else { Severity::Error }, || {
            TraceEvent::new("fork_guard_installed", "tid", syscall::sys_gettid(), false).errno(rc)
        });
    });
}

/// True once the process-wide fork guard has been registered.
pub fn fork_guard_installed() -> bool {
    FORK_GUARD.is_completed()
}

/// The calling thread's kernel tid.
#[inline]
pub fn current() -> u32 {
    CACHED_TID
        .try_with(|slot| {
            let tid = slot.get();
            if tid != 0 {
                return tid;
            }
            install_fork_guard();
            let tid = syscall::sys_gettid();
            slot.set(tid);
            tid
        })
        // TLS already torn down (thread exit): ask the kernel every time.
        .unwrap_or_else(|_| syscall::sys_gettid())
}

/// Cached value without resolving; 0 means unresolved.
pub fn cached() -> u32 {
    CACHED_TID.try_with(Cell::get).unwrap_or(0)
}
