//! Shared reporting for the rtpi Criterion benches.
//!
//! Each bench records per-sample ns/op and prints one summary line with
//! percentiles, tagged with the `RTPI_TRACE` level it ran under.

use std::sync::Once;
use std::time::Duration;

use rtpi_core::trace::{TRACE_ENV, TraceLevel, parse_level_value};

#[derive(Default)]
pub struct BenchStats {
    samples_ns_per_op: Vec<f64>,
    total_iters: u64,
    total_ns: u128,
}

impl BenchStats {
    pub fn record(&mut self, iters: u64, dur: Duration) {
        let ns = dur.as_nanos();
        self.total_iters = self.total_iters.saturating_add(iters);
        self.total_ns = self.total_ns.saturating_add(ns);
        self.samples_ns_per_op.push(ns as f64 / iters.max(1) as f64);
    }

    pub fn report(&self, tag: &str, bench_label: &str) {
        let mut samples = self.samples_ns_per_op.clone();
        if samples.is_empty() {
            return;
        }
        samples.sort_by(f64::total_cmp);

        let p50 = percentile_sorted(&samples, 0.50);
        let p95 = percentile_sorted(&samples, 0.95);
        let p99 = percentile_sorted(&samples, 0.99);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let throughput_ops_s = if self.total_ns == 0 {
            0.0
        } else {
            (self.total_iters as f64) / (self.total_ns as f64 / 1e9)
        };

        println!(
            "{tag} trace={} bench={bench_label} samples={} p50_ns_op={p50:.3} p95_ns_op={p95:.3} p99_ns_op={p99:.3} mean_ns_op={mean:.3} throughput_ops_s={throughput_ops_s:.3}",
            trace_label(),
            samples.len(),
        );
    }
}

pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&p));
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Normalized `RTPI_TRACE` level, used as the Criterion parameter.
pub fn trace_label() -> &'static str {
    level_label(std::env::var(TRACE_ENV).ok().as_deref())
}

fn level_label(raw: Option<&str>) -> &'static str {
    match raw.map_or(TraceLevel::Off, parse_level_value) {
        TraceLevel::Off => "off",
        TraceLevel::Errors => "errors",
        TraceLevel::All => "all",
    }
}

pub fn print_env_metadata_once(tag: &str) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let raw = std::env::var(TRACE_ENV).unwrap_or_else(|_| "<unset>".to_string());
        println!("{tag}_META rtpi_trace_env={raw} arch={}", std::env::consts::ARCH);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_pick_nearest_rank() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&s, 0.0), 1.0);
        assert_eq!(percentile_sorted(&s, 0.5), 3.0);
        assert_eq!(percentile_sorted(&s, 1.0), 5.0);
        assert_eq!(percentile_sorted(&[], 0.5), 0.0);
    }

    #[test]
    fn labels_follow_core_level_parsing() {
        assert_eq!(level_label(None), "off");
        assert_eq!(level_label(Some(" DEBUG ")), "all");
        assert_eq!(level_label(Some("1")), "all");
        assert_eq!(level_label(Some("Error")), "errors");
        assert_eq!(level_label(Some("verbose")), "off");
    }

    #[test]
    fn record_accumulates_totals() {
        let mut stats = BenchStats::default();
        stats.record(10, Duration::from_nanos(100));
        stats.record(0, Duration::from_nanos(5));
        assert_eq!(stats.total_iters, 10);
        assert_eq!(stats.total_ns, 105);
        assert_eq!(stats.samples_ns_per_op, vec![10.0, 5.0]);
    }
}
