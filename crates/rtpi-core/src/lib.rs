//! Priority-inheritance mutex and condition variable for Linux.
//!
//! Both primitives are plain `#[repr(C)]` blocks of atomics that can live in
//! static, heap, or process-shared memory. Contended paths go through the
//! kernel's PI futex operations (`FUTEX_LOCK_PI`, `FUTEX_UNLOCK_PI`,
//! `FUTEX_WAIT_REQUEUE_PI`, `FUTEX_CMP_REQUEUE_PI`); uncontended lock and
//! unlock never leave user space.
//!
//! Every blocking operation has a `*_with` form taking a [`futex::FutexOps`]
//! backend. The plain forms use [`futex::KernelFutex`];
//! [`futex::sim::SimFutex`] models the kernel in-process for tests.

#![deny(unsafe_code)]

#[cfg(not(target_os = "linux"))]
compile_error!("rtpi-core requires Linux futex PI operations");

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("rtpi-core supports x86_64 and aarch64 only");

pub mod errno;
#[allow(unsafe_code)]
pub mod futex;
pub mod pi;
#[allow(unsafe_code)]
pub mod syscall;
pub mod time;
pub mod trace;

pub use errno::PiError;
pub use futex::{FutexOps, KernelFutex};
pub use pi::{PiCond, PiMutex, SavedLock};
pub use time::Timespec;
