//! Error number definitions.
//!
//! The errno vocabulary the PI primitives and the kernel futex calls speak,
//! plus the `PiError` kind every core operation returns.

use core::fmt;

/// Well-known errno constants (Linux values).
pub const EPERM: i32 = 1;
pub const ESRCH: i32 = 3;
pub const EINTR: i32 = 4;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const EDEADLK: i32 = 35;
pub const ENOSYS: i32 = 38;
pub const ETIMEDOUT: i32 = 110;
pub const EOWNERDEAD: i32 = 130;
pub const ENOTRECOVERABLE: i32 = 131;

/// Glibc spelling of `EDEADLK`.
pub const EDEADLOCK: i32 = EDEADLK;

/// Returns the human-readable message for an errno value.
pub fn strerror_message(errnum: i32) -> &'static str {
    match errnum {
        0 => "Success",
        EPERM => "Operation not permitted",
        ESRCH => "No such process",
        EINTR => "Interrupted system call",
        EAGAIN => "Resource temporarily unavailable",
        ENOMEM => "Cannot allocate memory",
        EFAULT => "Bad address",
        EBUSY => "Device or resource busy",
        EINVAL => "Invalid argument",
        EDEADLK => "Resource deadlock avoided",
        ENOSYS => "Function not implemented",
        ETIMEDOUT => "Connection timed out",
        EOWNERDEAD => "Owner died",
        ENOTRECOVERABLE => "State not recoverable",
        _ => "Unknown error",
    }
}

/// Failure kinds reported by `PiMutex` and `PiCond` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiError {
    /// Unknown init flags, malformed deadline, or an invalid handle.
    InvalidArgument,
    /// The caller already owns the mutex.
    Deadlock,
    /// Non-blocking acquisition found the mutex held.
    WouldBlock,
    /// Unlock attempted by a thread that does not own the mutex.
    NotOwner,
    /// A timed condition wait reached its deadline.
    TimedOut,
    /// Any other errno reported by the kernel, verbatim.
    Kernel(i32),
}

impl PiError {
    /// Classify a raw errno value.
    #[must_use]
    pub const fn from_errno(errnum: i32) -> Self {
        match errnum {
            EINVAL => Self::InvalidArgument,
            EDEADLK => Self::Deadlock,
            EBUSY => Self::WouldBlock,
            EPERM => Self::NotOwner,
            ETIMEDOUT => Self::TimedOut,
            other => Self::Kernel(other),
        }
    }

    /// The errno value the C ABI reports for this failure.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => EINVAL,
            Self::Deadlock => EDEADLK,
            Self::WouldBlock => EBUSY,
            Self::NotOwner => EPERM,
            Self::TimedOut => ETIMEDOUT,
            Self::Kernel(errnum) => errnum,
        }
    }
}

impl fmt::Display for PiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", strerror_message(self.errno()), self.errno())
    }
}

impl std::error::Error for PiError {}

/// Collapse a core result into the errno-style return code of the ABI.
#[inline]
pub fn to_errno(result: Result<(), PiError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}
