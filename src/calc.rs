//! Transfer-rate estimation.
//!
//! On every display tick the engine feeds the calculator the current
//! elapsed time and cumulative count. The calculator maintains the
//! instantaneous rate, a windowed average over a bounded history ring,
//! the completion percentage, and min/max/mean/stddev statistics for
//! the end-of-run summary.

/// Ticks closer together than this are folded into the next one, so a
/// pair of back-to-back updates cannot produce a garbage spike.
const MIN_RATE_DT_SECS: f64 = 0.01;

/// Upper bound for the completion percentage. The count can overrun a
/// wrong size estimate a thousandfold before the display pins.
const MAX_PERCENTAGE: f64 = 100_000.0;

/// Upper bound for an ETA, in seconds (about 100 000 hours).
pub const MAX_ETA_SECS: i64 = 360_000_000;

/// History sizing for an averaging window of `window` seconds: short
/// windows sample every second, longer ones every five.
pub fn history_sizing(window: f64) -> (usize, f64) {
    let w = window.max(1.0);
    if w < 20.0 {
        (w as usize + 1, 1.0)
    } else {
        ((w / 5.0) as usize + 1, 5.0)
    }
}

// ---------------------------------------------------------------------------
// History ring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    elapsed: f64,
    total: u64,
}

/// Bounded circular sequence of (elapsed, total) samples. Entries are
/// strictly non-decreasing in elapsed time; when the ring is full the
/// oldest sample falls off.
#[derive(Debug)]
struct HistoryRing {
    entries: Vec<Sample>,
    first: usize,
    last: usize,
    len: usize,
    interval: f64,
}

impl HistoryRing {
    fn new(capacity: usize, interval: f64) -> Self {
        HistoryRing {
            entries: vec![Sample::default(); capacity.max(2)],
            first: 0,
            last: 0,
            len: 0,
            interval,
        }
    }

    fn clear(&mut self) {
        self.first = 0;
        self.last = 0;
        self.len = 0;
    }

    /// Records a sample if the ring is empty or the history interval
    /// has passed, then returns the windowed average rate.
    fn update(&mut self, elapsed: f64, total: u64, fallback_rate: f64) -> f64 {
        let cap = self.entries.len();
        if self.len == 0 {
            self.entries[0] = Sample { elapsed, total };
            self.first = 0;
            self.last = 0;
            self.len = 1;
            return fallback_rate;
        }
        if elapsed - self.entries[self.last].elapsed >= self.interval {
            self.last = (self.last + 1) % cap;
            if self.last == self.first {
                self.first = (self.first + 1) % cap;
            } else {
                self.len += 1;
            }
            self.entries[self.last] = Sample { elapsed, total };
        } else {
            // Keep the newest sample current within its slot.
            self.entries[self.last] = Sample { elapsed, total };
        }
        let first = self.entries[self.first];
        let last = self.entries[self.last];
        let dt = last.elapsed - first.elapsed;
        if dt <= 0.0 {
            fallback_rate
        } else {
            last.total.saturating_sub(first.total) as f64 / dt
        }
    }
}

// ---------------------------------------------------------------------------
// Rate statistics
// ---------------------------------------------------------------------------

/// Accumulators for the `rate min/avg/max/mdev` summary line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateStats {
    pub min: f64,
    pub max: f64,
    sum: f64,
    sum_sq: f64,
    pub count: u64,
}

impl RateStats {
    fn record(&mut self, rate: f64) {
        if self.count == 0 || rate < self.min {
            self.min = rate;
        }
        if rate > self.max {
            self.max = rate;
        }
        self.sum += rate;
        self.sum_sq += rate * rate;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population standard deviation of the observed rates.
    pub fn mdev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Rolling rate calculator; one per transfer.
#[derive(Debug)]
pub struct RateCalc {
    prev_elapsed: f64,
    prev_rate: f64,
    /// Count accumulated across ticks too close together to divide by.
    prev_trans: f64,
    prev_total: u64,
    avg_rate: f64,
    percentage: f64,
    history: HistoryRing,
    /// Count already transferred when this calculator started; the
    /// final average excludes it.
    initial_offset: u64,
    /// Rates are recorded in bits/s when the display counts bits.
    bits: bool,
    pub stats: RateStats,
}

impl RateCalc {
    pub fn new(average_window: f64, bits: bool) -> Self {
        let (capacity, interval) = history_sizing(average_window);
        RateCalc {
            prev_elapsed: 0.0,
            prev_rate: 0.0,
            prev_trans: 0.0,
            prev_total: 0,
            avg_rate: 0.0,
            percentage: 0.0,
            history: HistoryRing::new(capacity, interval),
            initial_offset: 0,
            bits,
            stats: RateStats::default(),
        }
    }

    /// Restarts rate history without losing the lifetime statistics.
    /// `total` becomes the baseline the final average is measured from.
    pub fn restart(&mut self, total: u64) {
        self.prev_elapsed = 0.0;
        self.prev_rate = 0.0;
        self.prev_trans = 0.0;
        self.prev_total = total;
        self.avg_rate = 0.0;
        self.initial_offset = total;
        self.history.clear();
    }

    /// One display tick. `total` is the cumulative count (bytes or
    /// lines), `size` the expected total (0 = unknown).
    pub fn update(&mut self, elapsed: f64, total: u64, size: u64, final_update: bool) {
        let since_last = total.saturating_sub(self.prev_total) as f64;
        self.prev_total = total;

        let dt = elapsed - self.prev_elapsed;
        if dt <= MIN_RATE_DT_SECS && !final_update {
            self.prev_trans += since_last;
            return;
        }

        let mut rate = if dt > 0.0 {
            (since_last + self.prev_trans) / dt
        } else {
            self.prev_rate
        };
        self.prev_trans = 0.0;
        self.prev_elapsed = elapsed;

        self.avg_rate = self.history.update(elapsed, total, rate);

        if final_update {
            let overall =
                total.saturating_sub(self.initial_offset) as f64 / elapsed.max(1e-6);
            rate = overall;
            self.avg_rate = overall;
        }

        self.prev_rate = rate;
        self.stats
            .record(if self.bits { rate * 8.0 } else { rate });

        self.update_percentage(total, size);
    }

    fn update_percentage(&mut self, total: u64, size: u64) {
        if size > 0 {
            let pct = (100.0 * total as f64 / size as f64).floor();
            self.percentage = pct.clamp(0.0, MAX_PERCENTAGE);
        } else {
            // Swept 0..200; the renderer folds it into a bounce.
            self.percentage = (self.percentage + 2.0) % 200.0;
        }
    }

    /// Instantaneous rate from the most recent tick, per second.
    pub fn rate(&self) -> f64 {
        self.prev_rate
    }

    /// Windowed-average rate, per second.
    pub fn avg_rate(&self) -> f64 {
        self.avg_rate
    }

    /// Completion percentage; above 100 the size estimate was short.
    /// With an unknown size this is the 0..200 sweep counter.
    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    /// Estimated seconds to completion, based on the windowed average
    /// and the amount the consumer has actually taken.
    pub fn eta_secs(&self, transferred: u64, size: u64) -> Option<i64> {
        if size == 0 {
            return None;
        }
        let remaining = size.saturating_sub(transferred) as f64;
        if self.avg_rate <= 0.0 {
            return Some(MAX_ETA_SECS);
        }
        Some(((remaining / self.avg_rate) as i64).clamp(0, MAX_ETA_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> RateCalc {
        RateCalc::new(30.0, false)
    }

    #[test]
    fn history_sizing_rules() {
        assert_eq!(history_sizing(5.0), (6, 1.0));
        assert_eq!(history_sizing(19.0), (20, 1.0));
        assert_eq!(history_sizing(20.0), (5, 5.0));
        assert_eq!(history_sizing(30.0), (7, 5.0));
    }

    #[test]
    fn steady_stream_rate() {
        let mut c = calc();
        for i in 1..=10u64 {
            c.update(i as f64, i * 1000, 0, false);
        }
        assert!((c.rate() - 1000.0).abs() < 1.0);
        assert!((c.avg_rate() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn close_ticks_accumulate() {
        let mut c = calc();
        c.update(1.0, 1000, 0, false);
        // Two ticks within 10ms: counted, not rated.
        c.update(1.005, 2000, 0, false);
        c.update(1.008, 3000, 0, false);
        let before = c.rate();
        assert_eq!(before, c.rate());
        // The next real tick sees all accumulated bytes.
        c.update(2.0, 4000, 0, false);
        assert!((c.rate() - 3000.0).abs() < 1.0);
    }

    #[test]
    fn windowed_average_tracks_recent_rate() {
        let mut c = RateCalc::new(10.0, false);
        // 1000/s for 15s, then stalls.
        for i in 1..=15u64 {
            c.update(i as f64, i * 1000, 0, false);
        }
        for i in 16..=26u64 {
            c.update(i as f64, 15_000, 0, false);
        }
        // Window only sees the stall.
        assert!(c.avg_rate() < 100.0, "avg {}", c.avg_rate());
    }

    #[test]
    fn final_update_is_overall_average() {
        let mut c = calc();
        c.update(1.0, 5000, 0, false);
        c.update(2.0, 5000, 0, false);
        c.update(10.0, 10_000, 10_000, true);
        assert!((c.rate() - 1000.0).abs() < 1.0);
        assert!((c.avg_rate() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn final_average_excludes_initial_offset() {
        let mut c = calc();
        c.restart(5_000);
        c.update(10.0, 15_000, 0, true);
        assert!((c.rate() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn percentage_known_size() {
        let mut c = calc();
        c.update(1.0, 500, 1000, false);
        assert_eq!(c.percentage(), 50.0);
        c.update(2.0, 1000, 1000, false);
        assert_eq!(c.percentage(), 100.0);
    }

    #[test]
    fn percentage_clamps_on_overrun() {
        let mut c = calc();
        c.update(1.0, u64::MAX / 2, 10, false);
        assert_eq!(c.percentage(), 100_000.0);
    }

    #[test]
    fn percentage_sweeps_when_size_unknown() {
        let mut c = calc();
        let mut last = 0.0;
        for i in 1..=99u64 {
            c.update(i as f64, i, 0, false);
            let p = c.percentage();
            assert!((0.0..200.0).contains(&p));
            if i > 1 {
                assert!((p - last - 2.0).abs() < 1e-9 || p < last);
            }
            last = p;
        }
    }

    #[test]
    fn eta_and_clamps() {
        let mut c = calc();
        for i in 1..=5u64 {
            c.update(i as f64, i * 100, 1000, false);
        }
        let eta = c.eta_secs(500, 1000).unwrap();
        assert!((4..=6).contains(&eta), "eta {}", eta);
        assert_eq!(c.eta_secs(0, 0), None);
        let stalled = RateCalc::new(30.0, false);
        assert_eq!(stalled.eta_secs(0, 1000), Some(MAX_ETA_SECS));
    }

    #[test]
    fn stats_accumulate() {
        let mut s = RateStats::default();
        for r in [100.0, 200.0, 300.0] {
            s.record(r);
        }
        assert_eq!(s.min, 100.0);
        assert_eq!(s.max, 300.0);
        assert!((s.mean() - 200.0).abs() < 1e-9);
        assert!((s.mdev() - (20000.0f64 / 3.0 * 2.0 / 2.0).sqrt()).abs() < 1.0);
        assert_eq!(s.count, 3);
    }

    #[test]
    fn stats_in_bits_mode() {
        let mut c = RateCalc::new(30.0, true);
        c.update(1.0, 1000, 0, false);
        c.update(2.0, 2000, 0, false);
        assert!((c.stats.max - 8000.0).abs() < 1.0);
    }
}
