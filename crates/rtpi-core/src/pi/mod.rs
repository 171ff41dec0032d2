//! Priority-inheritance locking.
//!
//! [`PiMutex`] is a PI futex word with a user-space fast path; [`PiCond`]
//! is a condition variable whose waiters are requeued straight onto a
//! `PiMutex`, so the woken thread never runs without PI protection.

pub mod cond;
pub mod mutex;
#[allow(unsafe_code)]
pub mod tid;

pub use cond::{PiCond, RTPI_COND_PSHARED, epoch_reached, valid_cond_flags};
pub use mutex::{PiMutex, RTPI_MUTEX_PSHARED, SavedLock, valid_mutex_flags};
