//! Absolute deadlines for timed condition waits.

use std::time::{Duration, Instant};

use crate::errno::{self, PiError};
use crate::syscall;

/// Clock identifiers accepted for deadlines.
pub const CLOCK_REALTIME: i32 = 0;
pub const CLOCK_MONOTONIC: i32 = 1;

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Represents a timespec value (seconds + nanoseconds).
///
/// Layout matches the kernel's 64-bit `struct timespec`, so a reference to it
/// can be handed to `futex(2)` directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    /// Seconds.
    pub tv_sec: i64,
    /// Nanoseconds (0 to 999_999_999).
    pub tv_nsec: i64,
}

/// Returns `true` if `clock_id` is a clock deadlines may be expressed on.
#[inline]
pub const fn valid_clock_id(clock_id: i32) -> bool {
    matches!(clock_id, CLOCK_REALTIME | CLOCK_MONOTONIC)
}

impl Timespec {
    #[must_use]
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Normalized, non-negative deadlines only.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.tv_sec >= 0 && self.tv_nsec >= 0 && self.tv_nsec < NSEC_PER_SEC
    }

    /// Current time on `clock_id`.
    pub fn now(clock_id: i32) -> Result<Self, PiError> {
        if !valid_clock_id(clock_id) {
            return Err(PiError::InvalidArgument);
        }
        syscall::sys_clock_gettime(clock_id)
            .map(|(tv_sec, tv_nsec)| Self { tv_sec, tv_nsec })
            .map_err(PiError::from_errno)
    }

    /// Absolute deadline `timeout` from now on `clock_id`.
    pub fn after(clock_id: i32, timeout: Duration) -> Result<Self, PiError> {
        Ok(Self::now(clock_id)?.saturating_add(timeout))
    }

    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        let mut tv_sec = self.tv_sec.saturating_add(secs);
        let mut tv_nsec = self.tv_nsec + i64::from(d.subsec_nanos());
        if tv_nsec >= NSEC_PER_SEC {
            tv_nsec -= NSEC_PER_SEC;
            tv_sec = tv_sec.saturating_add(1);
        }
        Self { tv_sec, tv_nsec }
    }

    /// Time left until `self` as seen from `now`; zero once passed.
    #[must_use]
    pub fn remaining_from(&self, now: &Self) -> Duration {
        if self <= now {
            return Duration::ZERO;
        }
        let mut secs = self.tv_sec - now.tv_sec;
        let mut nsec = self.tv_nsec - now.tv_nsec;
        if nsec < 0 {
            nsec += NSEC_PER_SEC;
            secs -= 1;
        }
        Duration::new(secs as u64, nsec as u32)
    }

    /// Project this deadline on `clock_id` onto the process-local `Instant` clock.
    pub fn to_instant(&self, clock_id: i32) -> Result<Instant, PiError> {
        let now = Self::now(clock_id)?;
        let base = Instant::now();
        let left = self.remaining_from(&now);
        Ok(base.checked_add(left).unwrap_or(base + Duration::from_secs(86_400 * 365)))
    }
}

/// Reject a deadline the kernel would refuse.
#[inline]
pub fn validate_deadline(deadline: Option<&Timespec>) -> Result<(), PiError> {
    match deadline {
        Some(ts) if !ts.is_valid() => Err(PiError::from_errno(errno::EINVAL)),
        _ => Ok(()),
    }
}
