#![cfg(target_os = "linux")]

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;

use rtpi_core::{PiCond, PiMutex};

const CAPACITY: usize = 4;
const PRODUCERS: usize = 4;
const CONSUMERS: usize = 4;
const PER_PRODUCER: usize = 2_000;

/// Bounded queue guarded by a PI mutex with two PI condvars.
struct BoundedQueue {
    lock: PiMutex,
    not_empty: PiCond,
    not_full: PiCond,
    items: UnsafeCell<VecDeque<u64>>,
}

// SAFETY: `items` is only touched while `lock` is held.
unsafe impl Sync for BoundedQueue {}

impl BoundedQueue {
    fn new() -> Self {
        Self {
            lock: PiMutex::new(),
            not_empty: PiCond::new(),
            not_full: PiCond::new(),
            items: UnsafeCell::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    fn push(&self, v: u64) {
        self.lock.lock().unwrap();
        // SAFETY: lock held.
        while unsafe { (*self.items.get()).len() } == CAPACITY {
            self.not_full.wait(&self.lock).unwrap();
        }
        unsafe { (*self.items.get()).push_back(v) };
        self.not_empty.signal(&self.lock).unwrap();
        self.lock.unlock().unwrap();
    }

    fn pop(&self) -> u64 {
        self.lock.lock().unwrap();
        let v = loop {
            // SAFETY: lock held.
            if let Some(v) = unsafe { (*self.items.get()).pop_front() } {
                break v;
            }
            self.not_empty.wait(&self.lock).unwrap();
        };
        self.not_full.signal(&self.lock).unwrap();
        self.lock.unlock().unwrap();
        v
    }
}

#[test]
fn bounded_queue_delivers_every_item_once() {
    let q = Arc::new(BoundedQueue::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = q.clone();
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.push((p * PER_PRODUCER + i) as u64);
                }
            })
        })
        .collect();
    let per_consumer = PRODUCERS * PER_PRODUCER / CONSUMERS;
    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = q.clone();
            std::thread::spawn(move || (0..per_consumer).map(|_| q.pop()).collect::<Vec<_>>())
        })
        .collect();
    for h in producers {
        h.join().unwrap();
    }
    let mut seen: Vec<u64> = consumers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seen.sort_unstable();
    let expected: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
    assert_eq!(seen, expected);
    assert!(!q.lock.is_locked());
}

#[test]
fn broadcast_releases_a_crowd_one_at_a_time() {
    const WAITERS: usize = 16;
    let gate = Arc::new((PiMutex::new(), PiCond::new(), UnsafeCellFlag::default()));
    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let gate = gate.clone();
            std::thread::spawn(move || {
                let (m, c, open) = &*gate;
                m.lock().unwrap();
                while !open.get() {
                    c.wait(m).unwrap();
                }
                // Exclusive section: nobody else may observe it held.
                assert!(m.is_owned_by_current());
                open.bump();
                m.unlock().unwrap();
            })
        })
        .collect();
    std::thread::sleep(std::time::Duration::from_millis(30));
    {
        let (m, c, open) = &*gate;
        m.lock().unwrap();
        open.set();
        c.broadcast(m).unwrap();
        m.unlock().unwrap();
    }
    for h in handles {
        h.join().unwrap();
    }
    let (m, _, open) = &*gate;
    m.lock().unwrap();
    assert_eq!(open.count(), WAITERS);
    m.unlock().unwrap();
}

/// Open flag plus pass counter, only touched under the gate mutex.
#[derive(Default)]
struct UnsafeCellFlag(UnsafeCell<(bool, usize)>);

// SAFETY: every access happens with the gate mutex held.
unsafe impl Sync for UnsafeCellFlag {}

impl UnsafeCellFlag {
    fn get(&self) -> bool {
        unsafe { (*self.0.get()).0 }
    }
    fn set(&self) {
        unsafe { (*self.0.get()).0 = true };
    }
    fn bump(&self) {
        unsafe { (*self.0.get()).1 += 1 };
    }
    fn count(&self) -> usize {
        unsafe { (*self.0.get()).1 }
    }
}
