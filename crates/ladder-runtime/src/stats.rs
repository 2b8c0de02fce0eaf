//! Scan timing statistics.
//!
//! Whole-microsecond figures, updated once per cycle by the scan thread
//! under the stats mutex and snapshotted by anyone else. The first cycle
//! only seeds the baselines; minimum fields start at an `i64::MAX` sentinel
//! until a real sample arrives.

use serde::Serialize;

/// min/max/running-mean over one measured series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Series {
    /// Smallest sample, `i64::MAX` until the first sample.
    pub min: i64,
    /// Largest sample, `i64::MIN` until the first sample.
    pub max: i64,
    /// Running mean, `mean += (sample - mean) / weight`.
    pub avg: i64,
}

impl Series {
    const fn new() -> Self {
        Self {
            min: i64::MAX,
            max: i64::MIN,
            avg: 0,
        }
    }

    fn record(&mut self, sample: i64, weight: i64) {
        if sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
        self.avg += (sample - self.avg) / weight.max(1);
    }
}

/// Per-cycle timing statistics.
#[derive(Debug, Clone, Copy)]
pub struct TimingStats {
    scan_time: Series,
    cycle_time: Series,
    cycle_latency: Series,
    scan_count: i64,
    overruns: i64,
}

impl TimingStats {
    /// Fresh statistics with sentinel minima and zero counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scan_time: Series::new(),
            cycle_time: Series::new(),
            cycle_latency: Series::new(),
            scan_count: 0,
            overruns: 0,
        }
    }

    /// Completed cycle count so far.
    #[must_use]
    pub fn scan_count(&self) -> i64 {
        self.scan_count
    }

    /// Reset everything; called when a program (re)starts.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// First cycle: count it, record nothing.
    pub fn seed_first_cycle(&mut self) {
        self.scan_count = 1;
    }

    /// Record cycle time (start-to-start) and signed latency (actual minus
    /// expected start) at the top of a non-first cycle.
    pub fn record_cycle(&mut self, cycle_time_us: i64, latency_us: i64) {
        self.cycle_time.record(cycle_time_us, self.scan_count);
        self.cycle_latency.record(latency_us, self.scan_count);
        self.scan_count += 1;
    }

    /// Record the scan duration at the bottom of a cycle, plus whether the
    /// cycle finished past its deadline.
    pub fn record_scan(&mut self, scan_time_us: i64, overrun: bool) {
        self.scan_time.record(scan_time_us, self.scan_count);
        if overrun {
            self.overruns += 1;
        }
    }

    /// Copy out the current figures. Timing fields are `None` until at
    /// least one cycle has completed.
    #[must_use]
    pub fn snapshot(&self) -> TimingStatsSnapshot {
        if self.scan_count == 0 {
            return TimingStatsSnapshot::default();
        }
        let series = |s: &Series| {
            if s.min == i64::MAX {
                (None, None, None)
            } else {
                (Some(s.min), Some(s.max), Some(s.avg))
            }
        };
        let (scan_time_min, scan_time_max, scan_time_avg) = series(&self.scan_time);
        let (cycle_time_min, cycle_time_max, cycle_time_avg) = series(&self.cycle_time);
        let (cycle_latency_min, cycle_latency_max, cycle_latency_avg) =
            series(&self.cycle_latency);
        TimingStatsSnapshot {
            scan_count: self.scan_count,
            scan_time_min,
            scan_time_max,
            scan_time_avg,
            cycle_time_min,
            cycle_time_max,
            cycle_time_avg,
            cycle_latency_min,
            cycle_latency_max,
            cycle_latency_avg,
            overruns: self.overruns,
        }
    }
}

impl Default for TimingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot serialized into the `STATS:{...}` response. Field order is the
/// wire order the tooling expects.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimingStatsSnapshot {
    /// Completed cycles.
    pub scan_count: i64,
    /// Program execution duration, µs.
    pub scan_time_min: Option<i64>,
    #[allow(missing_docs)]
    pub scan_time_max: Option<i64>,
    #[allow(missing_docs)]
    pub scan_time_avg: Option<i64>,
    /// Start-to-next-start duration, µs.
    pub cycle_time_min: Option<i64>,
    #[allow(missing_docs)]
    pub cycle_time_max: Option<i64>,
    #[allow(missing_docs)]
    pub cycle_time_avg: Option<i64>,
    /// Actual minus expected start, µs (signed).
    pub cycle_latency_min: Option<i64>,
    #[allow(missing_docs)]
    pub cycle_latency_max: Option<i64>,
    #[allow(missing_docs)]
    pub cycle_latency_avg: Option<i64>,
    /// Cycles that finished past their deadline.
    pub overruns: i64,
}

impl TimingStatsSnapshot {
    /// Render the `STATS:` response line, LF-terminated.
    #[must_use]
    pub fn to_response(&self) -> String {
        let json = serde_json::to_string(self).expect("stats snapshot serializes");
        format!("STATS:{json}\n")
    }
}
