//! 统计与监控模块
//!
//! `Telemetry` is created by a [`crate::Library`] and shared with every wrapper
//! built from it. There is no process-wide instance: two libraries never see
//! each other's counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// 原子计数器
#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    #[inline]
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    fn inc(&self) {
        self.add(1);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// How a native object was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePath {
    /// `close()` called by the owner.
    Explicit,
    /// Wrapper dropped without `close()`.
    Fallback,
}

/// 运行时统计
#[derive(Debug)]
pub struct Telemetry {
    enabled: AtomicBool,
    train_calls: Counter,
    add_calls: Counter,
    search_calls: Counter,
    reset_calls: Counter,
    vectors_trained: Counter,
    vectors_added: Counter,
    queries_served: Counter,
    train_ns: Counter,
    add_ns: Counter,
    search_ns: Counter,
    handles_created: Counter,
    explicit_releases: Counter,
    fallback_releases: Counter,
    release_failures: Counter,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Telemetry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            train_calls: Counter::default(),
            add_calls: Counter::default(),
            search_calls: Counter::default(),
            reset_calls: Counter::default(),
            vectors_trained: Counter::default(),
            vectors_added: Counter::default(),
            queries_served: Counter::default(),
            train_ns: Counter::default(),
            add_ns: Counter::default(),
            search_ns: Counter::default(),
            handles_created: Counter::default(),
            explicit_releases: Counter::default(),
            fallback_releases: Counter::default(),
            release_failures: Counter::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    fn record(&self, f: impl FnOnce(&Self)) {
        if self.is_enabled() {
            f(self);
        }
    }

    pub fn record_train(&self, n: usize, elapsed: Duration) {
        self.record(|t| {
            t.train_calls.inc();
            t.vectors_trained.add(n as u64);
            t.train_ns.add(elapsed.as_nanos() as u64);
        });
    }

    pub fn record_add(&self, n: usize, elapsed: Duration) {
        self.record(|t| {
            t.add_calls.inc();
            t.vectors_added.add(n as u64);
            t.add_ns.add(elapsed.as_nanos() as u64);
        });
    }

    pub fn record_search(&self, nq: usize, elapsed: Duration) {
        self.record(|t| {
            t.search_calls.inc();
            t.queries_served.add(nq as u64);
            t.search_ns.add(elapsed.as_nanos() as u64);
        });
    }

    pub fn record_reset(&self) {
        self.record(|t| t.reset_calls.inc());
    }

    pub fn record_handle_created(&self) {
        self.record(|t| t.handles_created.inc());
    }

    pub fn record_release(&self, path: ReleasePath) {
        self.record(|t| match path {
            ReleasePath::Explicit => t.explicit_releases.inc(),
            ReleasePath::Fallback => t.fallback_releases.inc(),
        });
    }

    pub fn record_release_failure(&self) {
        self.record(|t| t.release_failures.inc());
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            train_calls: self.train_calls.get(),
            add_calls: self.add_calls.get(),
            search_calls: self.search_calls.get(),
            reset_calls: self.reset_calls.get(),
            vectors_trained: self.vectors_trained.get(),
            vectors_added: self.vectors_added.get(),
            queries_served: self.queries_served.get(),
            total_train_ns: self.train_ns.get(),
            total_add_ns: self.add_ns.get(),
            total_search_ns: self.search_ns.get(),
            handles_created: self.handles_created.get(),
            explicit_releases: self.explicit_releases.get(),
            fallback_releases: self.fallback_releases.get(),
            release_failures: self.release_failures.get(),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.train_calls,
            &self.add_calls,
            &self.search_calls,
            &self.reset_calls,
            &self.vectors_trained,
            &self.vectors_added,
            &self.queries_served,
            &self.train_ns,
            &self.add_ns,
            &self.search_ns,
            &self.handles_created,
            &self.explicit_releases,
            &self.fallback_releases,
            &self.release_failures,
        ] {
            c.reset();
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub train_calls: u64,
    pub add_calls: u64,
    pub search_calls: u64,
    pub reset_calls: u64,
    pub vectors_trained: u64,
    pub vectors_added: u64,
    pub queries_served: u64,
    pub total_train_ns: u64,
    pub total_add_ns: u64,
    pub total_search_ns: u64,
    pub handles_created: u64,
    pub explicit_releases: u64,
    pub fallback_releases: u64,
    pub release_failures: u64,
}

impl TelemetrySnapshot {
    pub fn avg_search_us(&self) -> f64 {
        if self.search_calls == 0 {
            0.0
        } else {
            self.total_search_ns as f64 / self.search_calls as f64 / 1000.0
        }
    }

    pub fn avg_add_us(&self) -> f64 {
        if self.add_calls == 0 {
            0.0
        } else {
            self.total_add_ns as f64 / self.add_calls as f64 / 1000.0
        }
    }

    /// Handles created but not yet released through either path.
    pub fn outstanding_handles(&self) -> u64 {
        self.handles_created
            .saturating_sub(self.explicit_releases + self.fallback_releases)
    }
}

impl std::fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Telemetry: {} searches ({:.2} us avg), {} adds ({:.2} us avg), {} handles ({} explicit / {} fallback releases)",
            self.search_calls,
            self.avg_search_us(),
            self.add_calls,
            self.avg_add_us(),
            self.handles_created,
            self.explicit_releases,
            self.fallback_releases,
        )
    }
}

/// 性能计时器
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let t = Telemetry::new(true);
        t.record_search(10, Duration::from_micros(100));
        t.record_search(10, Duration::from_micros(200));
        t.record_add(1000, Duration::from_micros(50));

        let s = t.snapshot();
        assert_eq!(s.search_calls, 2);
        assert_eq!(s.queries_served, 20);
        assert_eq!(s.vectors_added, 1000);
        assert!((s.avg_search_us() - 150.0).abs() < 0.1);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let t = Telemetry::new(false);
        t.record_handle_created();
        t.record_release(ReleasePath::Fallback);
        assert_eq!(t.snapshot(), TelemetrySnapshot::default());

        t.set_enabled(true);
        t.record_handle_created();
        assert_eq!(t.snapshot().outstanding_handles(), 1);
    }

    #[test]
    fn test_reset() {
        let t = Telemetry::default();
        t.record_reset();
        t.reset();
        assert_eq!(t.snapshot().reset_calls, 0);
    }

    #[test]
    fn test_snapshot_json() {
        let t = Telemetry::default();
        t.record_release(ReleasePath::Explicit);
        let json = serde_json::to_string(&t.snapshot()).unwrap();
        assert!(json.contains("\"explicit_releases\":1"));
    }
}
