#![cfg(target_os = "linux")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rtpi::{
    pi_cond_broadcast, pi_cond_destroy, pi_cond_init, pi_cond_signal, pi_cond_t,
    pi_cond_timedwait, pi_cond_wait, pi_mutex_destroy, pi_mutex_init, pi_mutex_lock, pi_mutex_t,
    pi_mutex_unlock,
};
use rtpi_core::pi::RTPI_COND_PSHARED;

struct Pair {
    mutex: pi_mutex_t,
    cond: pi_cond_t,
}

impl Pair {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mutex: pi_mutex_t::new(),
            cond: pi_cond_t::new(),
        })
    }

    fn m(&self) -> *mut pi_mutex_t {
        &self.mutex as *const pi_mutex_t as *mut pi_mutex_t
    }

    fn c(&self) -> *mut pi_cond_t {
        &self.cond as *const pi_cond_t as *mut pi_cond_t
    }
}

fn monotonic_after(d: Duration) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe {
        assert_eq!(libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts), 0);
    }
    let nanos = ts.tv_nsec as u64 + u64::from(d.subsec_nanos());
    ts.tv_sec += d.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (nanos % 1_000_000_000) as libc::c_long;
    ts
}

#[test]
fn null_handles_are_einval() {
    let p = Pair::new();
    let null_c = std::ptr::null_mut();
    let null_m = std::ptr::null_mut();
    unsafe {
        assert_eq!(pi_cond_init(null_c, 0), libc::EINVAL);
        assert_eq!(pi_cond_destroy(null_c), libc::EINVAL);
        assert_eq!(pi_cond_wait(null_c, p.m()), libc::EINVAL);
        assert_eq!(pi_cond_wait(p.c(), null_m), libc::EINVAL);
        assert_eq!(
            pi_cond_timedwait(p.c(), null_m, std::ptr::null()),
            libc::EINVAL
        );
        assert_eq!(pi_cond_signal(null_c, p.m()), libc::EINVAL);
        assert_eq!(pi_cond_broadcast(p.c(), null_m), libc::EINVAL);
    }
}

#[test]
fn init_flags_and_signal_without_waiters() {
    let p = Pair::new();
    unsafe {
        assert_eq!(pi_cond_init(p.c(), 0x10), libc::EINVAL);
        assert_eq!(pi_cond_init(p.c(), 0x2), libc::EINVAL);
        assert_eq!(pi_cond_init(p.c(), RTPI_COND_PSHARED), 0);
        assert_eq!(pi_mutex_init(p.m(), 0), 0);
        // Process-shared condvar with a private mutex.
        assert_eq!(pi_cond_signal(p.c(), p.m()), libc::EINVAL);
        assert_eq!(pi_cond_init(p.c(), 0), 0);
        assert_eq!(pi_cond_signal(p.c(), p.m()), 0);
        assert_eq!(pi_cond_broadcast(p.c(), p.m()), 0);
        assert_eq!(pi_cond_destroy(p.c()), 0);
        assert_eq!(pi_mutex_destroy(p.m()), 0);
    }
}

#[test]
fn wait_without_holding_mutex_is_eperm() {
    let p = Pair::new();
    unsafe {
        assert_eq!(pi_cond_init(p.c(), 0), 0);
        assert_eq!(pi_mutex_init(p.m(), 0), 0);
        assert_eq!(pi_cond_wait(p.c(), p.m()), libc::EPERM);
    }
}

#[test]
fn timedwait_reports_etimedout_and_bad_timespec() {
    let p = Pair::new();
    unsafe {
        assert_eq!(pi_cond_init(p.c(), 0), 0);
        assert_eq!(pi_mutex_init(p.m(), 0), 0);
        assert_eq!(pi_mutex_lock(p.m()), 0);

        let mut bad = monotonic_after(Duration::ZERO);
        bad.tv_nsec = 1_000_000_000;
        assert_eq!(pi_cond_timedwait(p.c(), p.m(), &bad), libc::EINVAL);

        let deadline = monotonic_after(Duration::from_millis(25));
        assert_eq!(pi_cond_timedwait(p.c(), p.m(), &deadline), libc::ETIMEDOUT);
        // Still ours after the timeout.
        assert_eq!(pi_mutex_unlock(p.m()), 0);
    }
}

#[test]
fn broadcast_wakes_every_waiter() {
    const WAITERS: usize = 3;
    let p = Pair::new();
    unsafe {
        assert_eq!(pi_cond_init(p.c(), 0), 0);
        assert_eq!(pi_mutex_init(p.m(), 0), 0);
    }
    let registered = Arc::new(AtomicUsize::new(0));
    let woken = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let (p, registered, woken) = (p.clone(), registered.clone(), woken.clone());
            std::thread::spawn(move || unsafe {
                assert_eq!(pi_mutex_lock(p.m()), 0);
                registered.fetch_add(1, Ordering::AcqRel);
                assert_eq!(pi_cond_wait(p.c(), p.m()), 0);
                woken.fetch_add(1, Ordering::AcqRel);
                assert_eq!(pi_mutex_unlock(p.m()), 0);
            })
        })
        .collect();
    loop {
        unsafe {
            assert_eq!(pi_mutex_lock(p.m()), 0);
        }
        if registered.load(Ordering::Acquire) == WAITERS {
            break;
        }
        unsafe {
            assert_eq!(pi_mutex_unlock(p.m()), 0);
        }
        std::thread::yield_now();
    }
    unsafe {
        assert_eq!(pi_cond_broadcast(p.c(), p.m()), 0);
        assert_eq!(pi_mutex_unlock(p.m()), 0);
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Acquire), WAITERS);
}
