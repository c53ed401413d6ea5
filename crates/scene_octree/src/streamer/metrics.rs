//! Streaming statistics.
//!
//! Counters are always kept. Tick timings are feature-gated and
//! runtime-toggled so they cost nothing when disabled.
//!
//! ```ignore
//! // Compile with --features metrics
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

use super::TickReport;

/// Runtime toggle for timing collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Whether timings are collected (compile-time and runtime switch).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// Fixed-capacity window of recent values.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, dropping the oldest at capacity.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl RollingWindow<u64> {
    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.buffer.iter().sum::<u64>() as f64 / self.buffer.len() as f64
        }
    }

    pub fn max(&self) -> Option<u64> {
        self.buffer.iter().copied().max()
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(128) // ~2 seconds of ticks at 60 Hz
    }
}

/// Totals across the streamer's lifetime plus the latest gauges.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    /// Tick durations in microseconds.
    pub tick_timings: RollingWindow<u64>,
    pub ticks: u64,
    pub loads_issued: u64,
    pub loads_completed: u64,
    pub loads_missing: u64,
    pub loads_failed: u64,
    pub cache_hits: u64,
    pub prefetches: u64,
    pub evictions: u64,

    // Gauges from the last tick
    pub resident: usize,
    pub visible: usize,
    pub in_flight: usize,
}

impl StreamMetrics {
    /// Fold one tick into the totals.
    pub fn record_tick(&mut self, report: &TickReport, tick_us: u64) {
        self.ticks += 1;
        self.loads_issued += (report.loads_issued + report.prefetched) as u64;
        self.loads_completed += report.loads_completed as u64;
        self.loads_missing += report.missing as u64;
        self.loads_failed += report.failed as u64;
        self.cache_hits += report.cache_hits as u64;
        self.prefetches += report.prefetched as u64;
        self.evictions += report.evicted as u64;
        if is_enabled() {
            self.tick_timings.push(tick_us);
        }
    }
}
