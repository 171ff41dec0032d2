//! Structured slow-path trace events.
//!
//! Events are JSONL records written to stderr (or kept in memory for tests).
//! Nothing is emitted from the uncontended fast paths; the kernel-assisted
//! paths, requeue retries, timeouts and kernel errors are the only producers.
//!
//! The verbosity comes from `RTPI_TRACE` (`off`, `errors`, `all`), resolved on
//! first use and cached until [`reset_level_cache`].

use std::io::Write as _;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

const LEVEL_UNRESOLVED: u8 = 0;
const LEVEL_OFF: u8 = 1;
const LEVEL_ERRORS: u8 = 2;
const LEVEL_ALL: u8 = 3;
const SINK_STDERR: u8 = 0;
const SINK_MEMORY: u8 = 1;
const MEMORY_SINK_LIMIT: usize = 4096;
pub const TRACE_ENV: &str = "RTPI_TRACE";

static LEVEL_STATE: AtomicU8 = AtomicU8::new(LEVEL_UNRESOLVED);
static SINK_STATE: AtomicU8 = AtomicU8::new(SINK_STDERR);
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);
static MEMORY_SINK: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// How much the primitives report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceLevel {
    Off,
    /// Kernel errors and timeouts.
    Errors,
    /// Every slow-path transition.
    All,
}

/// Where rendered events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Stderr,
    Memory,
}

/// Importance of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Info,
    Error,
}

fn level_to_u8(level: TraceLevel) -> u8 {
    match level {
        TraceLevel::Off => LEVEL_OFF,
        TraceLevel::Errors => LEVEL_ERRORS,
        TraceLevel::All => LEVEL_ALL,
    }
}

fn u8_to_level(v: u8) -> TraceLevel {
    match v {
        LEVEL_ERRORS => TraceLevel::Errors,
        LEVEL_ALL => TraceLevel::All,
        _ => TraceLevel::Off,
    }
}

/// Parse a `RTPI_TRACE` value. Unknown values disable tracing.
pub fn parse_level_value(raw: &str) -> TraceLevel {
    match raw.trim().to_ascii_lowercase().as_str() {
        "all" | "debug" | "1" => TraceLevel::All,
        "errors" | "error" => TraceLevel::Errors,
        _ => TraceLevel::Off,
    }
}

/// Effective trace level, resolving `RTPI_TRACE` on first call.
pub fn level() -> TraceLevel {
    let cached = LEVEL_STATE.load(Ordering::Acquire);
    if cached != LEVEL_UNRESOLVED {
        return u8_to_level(cached);
    }
    let resolved = std::env::var(TRACE_ENV)
        .map(|raw| parse_level_value(&raw))
        .unwrap_or(TraceLevel::Off);
    // A concurrent set_level wins over the environment.
    match LEVEL_STATE.compare_exchange(
        LEVEL_UNRESOLVED,
        level_to_u8(resolved),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => resolved,
        Err(current) => u8_to_level(current),
    }
}

/// Override the level, bypassing the environment.
pub fn set_level(level: TraceLevel) {
    LEVEL_STATE.store(level_to_u8(level), Ordering::Release);
}

/// Forget the cached level so the next call re-reads `RTPI_TRACE`.
pub fn reset_level_cache() {
    LEVEL_STATE.store(LEVEL_UNRESOLVED, Ordering::Release);
}

pub fn set_sink(sink: Sink) {
    let v = match sink {
        Sink::Stderr => SINK_STDERR,
        Sink::Memory => SINK_MEMORY,
    };
    SINK_STATE.store(v, Ordering::Release);
}

/// Take every event captured by the memory sink.
pub fn drain_memory() -> Vec<String> {
    std::mem::take(&mut *MEMORY_SINK.lock())
}

/// One slow-path observation.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub event: &'static str,
    pub op: &'static str,
    pub tid: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub errno: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<u32>,
    pub shared: bool,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl TraceEvent {
    pub(crate) fn new(event: &'static str, op: &'static str, tid: u32, shared: bool) -> Self {
        Self {
            seq: 0,
            event,
            op,
            tid,
            errno: 0,
            epoch: None,
            ticket: None,
            shared,
        }
    }

    pub(crate) fn errno(mut self, errno: i32) -> Self {
        self.errno = errno;
        self
    }

    pub(crate) fn epoch(mut self, epoch: u32) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub(crate) fn ticket(mut self, ticket: u32) -> Self {
        self.ticket = Some(ticket);
        self
    }
}

#[inline]
fn enabled(severity: Severity) -> bool {
    match level() {
        TraceLevel::Off => false,
        TraceLevel::Errors => severity == Severity::Error,
        TraceLevel::All => true,
    }
}

/// Emit the event produced by `build` if the current level admits `severity`.
#[inline]
pub(crate) fn emit<F>(severity: Severity, build: F)
where
    F: FnOnce() -> TraceEvent,
{
    if !enabled(severity) {
        return;
    }
    let mut event = build();
    event.seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    let Ok(line) = serde_json::to_string(&event) else {
        return;
    };
    if SINK_STATE.load(Ordering::Acquire) == SINK_MEMORY {
        let mut buf = MEMORY_SINK.lock();
        if buf.len() < MEMORY_SINK_LIMIT {
            buf.push(line);
        }
        return;
    }
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{line}");
}
