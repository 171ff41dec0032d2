//! Thin syscall wrappers used by the PI primitives.
//!
//! Only three kernel entry points are needed: `futex` for the PI lock and
//! requeue operations, `gettid` for the owner word, and `clock_gettime` for
//! building absolute deadlines.

mod raw;

use crate::errno;

#[cfg(target_arch = "x86_64")]
mod nr {
    pub const SYS_GETTID: usize = 186;
    pub const SYS_FUTEX: usize = 202;
    pub const SYS_CLOCK_GETTIME: usize = 228;
}

#[cfg(target_arch = "aarch64")]
mod nr {
    pub const SYS_FUTEX: usize = 98;
    pub const SYS_CLOCK_GETTIME: usize = 113;
    pub const SYS_GETTID: usize = 178;
}

/// Decode a raw kernel return value into `Ok(value)` or `Err(errno)`.
#[inline]
fn decode(ret: usize) -> Result<usize, i32> {
    let signed = ret as isize;
    if (-4095..0).contains(&signed) {
        Err((-signed) as i32)
    } else {
        Ok(ret)
    }
}

/// Kernel thread id of the calling thread.
#[inline]
pub fn sys_gettid() -> u32 {
    // SAFETY: gettid takes no arguments and cannot fail.
    let ret = unsafe { raw::syscall0(nr::SYS_GETTID) };
    ret as u32
}

/// Raw `futex(2)`.
///
/// `val2` occupies the timeout slot; for requeue operations it carries the
/// requeue count instead of a pointer.
///
/// # Safety
///
/// `uaddr` must point to a live, 4-byte aligned futex word. `val2` must be 0
/// or a valid `timespec` pointer for ops that read a timeout, and `uaddr2`
/// must be 0 or a live futex word for ops that read a second address.
#[inline]
pub unsafe fn sys_futex(
    uaddr: *const u32,
    op: i32,
    val: u32,
    val2: usize,
    uaddr2: *const u32,
    val3: u32,
) -> Result<usize, i32> {
    // SAFETY: caller upholds the pointer contracts above.
    let ret = unsafe {
        raw::syscall6(
            nr::SYS_FUTEX,
            [
                uaddr as usize,
                op as usize,
                val as usize,
                val2,
                uaddr2 as usize,
                val3 as usize,
            ],
        )
    };
    decode(ret)
}

/// `clock_gettime(2)` into `(tv_sec, tv_nsec)`.
pub fn sys_clock_gettime(clock_id: i32) -> Result<(i64, i64), i32> {
    let mut ts: [i64; 2] = [0, 0];
    // SAFETY: `ts` has the kernel `timespec` layout on 64-bit Linux and
    // outlives the call.
    let ret = unsafe {
        raw::syscall2(
            nr::SYS_CLOCK_GETTIME,
            clock_id as usize,
            ts.as_mut_ptr() as usize,
        )
    };
    decode(ret).map(|_| (ts[0], ts[1]))
}

/// Returns true when `err` is a kernel-reported "try again" race.
#[inline]
pub const fn is_retry(err: i32) -> bool {
    err == errno::EAGAIN
}
