//! In-process model of the PI futex operations.
//!
//! `SimFutex` follows the kernel's owner-word protocol exactly (tid bits,
//! `FUTEX_WAITERS`, direct hand-off on unlock, atomic acquisition of a free
//! target during requeue) but keeps its wait queues in user space behind one
//! lock. Waiters are served in arrival order; there is no real priority
//! boosting. It exists so the mutex and condvar protocols can be exercised
//! deterministically and so tests can count how often the slow path runs.
//!
//! Timeouts are honoured only while a waiter is still queued on the
//! condition word; once requeued it waits for the mutex like a plain locker.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{FUTEX_TID_MASK, FUTEX_WAITERS, FutexOps};
use crate::errno;
use crate::pi::tid;
use crate::time::Timespec;

type Hook = Box<dyn Fn(&AtomicU32) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterState {
    Queued,
    Granted,
}

#[derive(Debug)]
struct SimWaiter {
    id: u64,
    tid: u32,
    /// Address of the word this waiter is queued on.
    queue: usize,
    /// Requeue target for condition waiters, 0 for plain lockers.
    target: usize,
    state: WaiterState,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    waiters: Vec<SimWaiter>,
}

impl SimState {
    fn enqueue(&mut self, tid: u32, queue: usize, target: usize) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.waiters.push(SimWaiter {
            id,
            tid,
            queue,
            target,
            state: WaiterState::Queued,
        });
        id
    }

    fn find(&self, id: u64) -> Option<&SimWaiter> {
        self.waiters.iter().find(|w| w.id == id)
    }

    fn remove(&mut self, id: u64) {
        self.waiters.retain(|w| w.id != id);
    }

    fn queued_on(&self, addr: usize) -> impl Iterator<Item = &SimWaiter> {
        self.waiters
            .iter()
            .filter(move |w| w.state == WaiterState::Queued && w.queue == addr)
    }

    fn first_queued_on(&self, addr: usize) -> Option<usize> {
        self.waiters
            .iter()
            .position(|w| w.state == WaiterState::Queued && w.queue == addr)
    }
}

/// Per-operation call counters.
#[derive(Debug, Default)]
struct SimCounters {
    lock_pi: AtomicU64,
    unlock_pi: AtomicU64,
    cmp_requeue_pi: AtomicU64,
    wait_requeue_pi: AtomicU64,
}

/// Snapshot of how often each kernel operation was entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub lock_pi: u64,
    pub unlock_pi: u64,
    pub cmp_requeue_pi: u64,
    pub wait_requeue_pi: u64,
}

impl SimStats {
    /// Total kernel entries of any kind.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.lock_pi + self.unlock_pi + self.cmp_requeue_pi + self.wait_requeue_pi
    }
}

/// User-space stand-in for the kernel PI futex.
#[derive(Default)]
pub struct SimFutex {
    state: Mutex<SimState>,
    wake: Condvar,
    counters: SimCounters,
    pre_wait: Mutex<Option<Hook>>,
    pre_requeue: Mutex<Option<Hook>>,
}

#[inline]
fn addr_of(word: &AtomicU32) -> usize {
    word as *const AtomicU32 as usize
}

impl SimFutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            lock_pi: self.counters.lock_pi.load(Ordering::Relaxed),
            unlock_pi: self.counters.unlock_pi.load(Ordering::Relaxed),
            cmp_requeue_pi: self.counters.cmp_requeue_pi.load(Ordering::Relaxed),
            wait_requeue_pi: self.counters.wait_requeue_pi.load(Ordering::Relaxed),
        }
    }

    /// Threads currently blocked on `word` (condition or mutex queue).
    pub fn queued_on(&self, word: &AtomicU32) -> usize {
        self.state.lock().queued_on(addr_of(word)).count()
    }

    /// Run `hook` on the condition word at the start of every
    /// `wait_requeue_pi`, before the value comparison.
    pub fn set_pre_wait_hook<F>(&self, hook: F)
    where
        F: Fn(&AtomicU32) + Send + Sync + 'static,
    {
        *self.pre_wait.lock() = Some(Box::new(hook));
    }

    /// Run `hook` on the condition word at the start of every
    /// `cmp_requeue_pi`, before the value comparison.
    pub fn set_pre_requeue_hook<F>(&self, hook: F)
    where
        F: Fn(&AtomicU32) + Send + Sync + 'static,
    {
        *self.pre_requeue.lock() = Some(Box::new(hook));
    }

    pub fn clear_hooks(&self) {
        *self.pre_wait.lock() = None;
        *self.pre_requeue.lock() = None;
    }

    /// Give `word` to waiter `idx` if it is free, otherwise queue the waiter
    /// on it and make sure the owner sees `FUTEX_WAITERS`.
    fn acquire_or_queue(st: &mut SimState, idx: usize, word: &AtomicU32) {
        let addr = addr_of(word);
        let others = st.queued_on(addr).count() > 0;
        let waiter_tid = st.waiters[idx].tid;
        loop {
            let cur = word.load(Ordering::Acquire);
            if cur & FUTEX_TID_MASK == 0 {
                let new = waiter_tid | if others { FUTEX_WAITERS } else { 0 };
                if word
                    .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    st.waiters[idx].state = WaiterState::Granted;
                    st.waiters[idx].queue = 0;
                    return;
                }
                continue;
            }
            if cur & FUTEX_WAITERS != 0
                || word
                    .compare_exchange(cur, cur | FUTEX_WAITERS, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                st.waiters[idx].queue = addr;
                return;
            }
        }
    }
}

impl FutexOps for SimFutex {
    fn lock_pi(&self, word: &AtomicU32, _shared: bool) -> Result<(), i32> {
        self.counters.lock_pi.fetch_add(1, Ordering::Relaxed);
        let me = tid::current();
        let addr = addr_of(word);
        let mut st = self.state.lock();
        loop {
            let cur = word.load(Ordering::Acquire);
            let owner = cur & FUTEX_TID_MASK;
            if owner == 0 {
                let others = st.queued_on(addr).count() > 0;
                let new = me | if others { FUTEX_WAITERS } else { 0 };
                if word
                    .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            if owner == me {
                return Err(errno::EDEADLK);
            }
            if cur & FUTEX_WAITERS != 0
                || word
                    .compare_exchange(cur, cur | FUTEX_WAITERS, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                break;
            }
        }
        let id = st.enqueue(me, addr, 0);
        loop {
            match st.find(id).map(|w| w.state) {
                Some(WaiterState::Granted) => {
                    st.remove(id);
                    return Ok(());
                }
                Some(WaiterState::Queued) => self.wake.wait(&mut st),
                None => return Err(errno::EFAULT),
            }
        }
    }

    fn unlock_pi(&self, word: &AtomicU32, _shared: bool) -> Result<(), i32> {
        self.counters.unlock_pi.fetch_add(1, Ordering::Relaxed);
        let me = tid::current();
        let addr = addr_of(word);
        let mut st = self.state.lock();
        if word.load(Ordering::Acquire) & FUTEX_TID_MASK != me {
            return Err(errno::EPERM);
        }
        match st.first_queued_on(addr) {
            Some(idx) => {
                st.waiters[idx].state = WaiterState::Granted;
                st.waiters[idx].queue = 0;
                let next = st.waiters[idx].tid;
                let more = st.queued_on(addr).count() > 0;
                word.store(next | if more { FUTEX_WAITERS } else { 0 }, Ordering::Release);
                self.wake.notify_all();
            }
            None => word.store(0, Ordering::Release),
        }
        Ok(())
    }

    fn cmp_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        nr_requeue: i32,
        mutex: &AtomicU32,
        _shared: bool,
    ) -> Result<usize, i32> {
        self.counters.cmp_requeue_pi.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = self.pre_requeue.lock().as_ref() {
            hook(cond);
        }
        let cond_addr = addr_of(cond);
        let mutex_addr = addr_of(mutex);
        if cond_addr == mutex_addr || nr_requeue < 0 {
            return Err(errno::EINVAL);
        }
        let mut st = self.state.lock();
        if cond.load(Ordering::Acquire) != expected {
            return Err(errno::EAGAIN);
        }
        let candidates: Vec<usize> = st
            .waiters
            .iter()
            .enumerate()
            .filter(|(_, w)| w.state == WaiterState::Queued && w.queue == cond_addr)
            .map(|(i, _)| i)
            .collect();
        if candidates.iter().any(|&i| st.waiters[i].target != mutex_addr) {
            return Err(errno::EINVAL);
        }
        let limit = (nr_requeue as usize).saturating_add(1);
        let mut moved = 0;
        for idx in candidates.into_iter().take(limit) {
            Self::acquire_or_queue(&mut st, idx, mutex);
            moved += 1;
        }
        if moved > 0 {
            self.wake.notify_all();
        }
        Ok(moved)
    }

    fn wait_requeue_pi(
        &self,
        cond: &AtomicU32,
        expected: u32,
        deadline: Option<&Timespec>,
        clock_id: i32,
        mutex: &AtomicU32,
        _shared: bool,
    ) -> Result<(), i32> {
        self.counters.wait_requeue_pi.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = self.pre_wait.lock().as_ref() {
            hook(cond);
        }
        let cond_addr = addr_of(cond);
        let mutex_addr = addr_of(mutex);
        if cond_addr == mutex_addr {
            return Err(errno::EINVAL);
        }
        let until: Option<Instant> = match deadline {
            Some(ts) if !ts.is_valid() => return Err(errno::EINVAL),
            Some(ts) => Some(ts.to_instant(clock_id).map_err(|e| e.errno())?),
            None => None,
        };
        let me = tid::current();
        let mut st = self.state.lock();
        if cond.load(Ordering::Acquire) != expected {
            return Err(errno::EAGAIN);
        }
        let id = st.enqueue(me, cond_addr, mutex_addr);
        loop {
            let Some((state, queue)) = st.find(id).map(|w| (w.state, w.queue)) else {
                return Err(errno::EFAULT);
            };
            if state == WaiterState::Granted {
                st.remove(id);
                return Ok(());
            }
            let on_cond = queue == cond_addr;
            match until {
                Some(t) if on_cond => {
                    if Instant::now() >= t {
                        st.remove(id);
                        return Err(errno::ETIMEDOUT);
                    }
                    let _ = self.wake.wait_until(&mut st, t);
                }
                _ => self.wake.wait(&mut st),
            }
        }
    }
}
