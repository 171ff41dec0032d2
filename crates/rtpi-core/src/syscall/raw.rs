//! Trap-instruction syscall entry for the handful of calls the PI
//! primitives make.
//!
//! Every function returns the kernel's result register untouched; values in
//! `-4095..=-1` (viewed as `isize`) are negated errno codes and are decoded
//! by the caller.
//!
//! # Safety
//!
//! All entry points are `unsafe`: the caller picks a syscall number and
//! arguments whose pointer contracts it upholds.

#[cfg(target_arch = "x86_64")]
mod arch {
    use core::arch::asm;

    // rcx and r11 are clobbered by `syscall`; flags survive.

    #[inline]
    pub unsafe fn syscall0(nr: usize) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!(
                "syscall",
                inlateout("rax") nr => ret,
                lateout("rcx") _,
                lateout("r11") _,
                options(nostack, preserves_flags),
            );
        }
        ret
    }

    #[inline]
    pub unsafe fn syscall2(nr: usize, a1: usize, a2: usize) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!(
                "syscall",
                inlateout("rax") nr => ret,
                in("rdi") a1,
                in("rsi") a2,
                lateout("rcx") _,
                lateout("r11") _,
                options(nostack, preserves_flags),
            );
        }
        ret
    }

    /// The fourth argument travels in r10, not rcx.
    #[inline]
    pub unsafe fn syscall6(nr: usize, args: [usize; 6]) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!(
                "syscall",
                inlateout("rax") nr => ret,
                in("rdi") args[0],
                in("rsi") args[1],
                in("rdx") args[2],
                in("r10") args[3],
                in("r8") args[4],
                in("r9") args[5],
                lateout("rcx") _,
                lateout("r11") _,
                options(nostack, preserves_flags),
            );
        }
        ret
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use core::arch::asm;

    // Number in x8, arguments in x0..x5, result back in x0.

    #[inline]
    pub unsafe fn syscall0(nr: usize) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!("svc 0", in("x8") nr, lateout("x0") ret, options(nostack));
        }
        ret
    }

    #[inline]
    pub unsafe fn syscall2(nr: usize, a1: usize, a2: usize) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!(
                "svc 0",
                in("x8") nr,
                inlateout("x0") a1 => ret,
                in("x1") a2,
                options(nostack),
            );
        }
        ret
    }

    #[inline]
    pub unsafe fn syscall6(nr: usize, args: [usize; 6]) -> usize {
        let ret: usize;
        // SAFETY: forwarded caller contract.
        unsafe {
            asm!(
                "svc 0",
                in("x8") nr,
                inlateout("x0") args[0] => ret,
                in("x1") args[1],
                in("x2") args[2],
                in("x3") args[3],
                in("x4") args[4],
                in("x5") args[5],
                options(nostack),
            );
        }
        ret
    }
}

pub(super) use arch::{syscall0, syscall2, syscall6};
