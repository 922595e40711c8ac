//! Pace sample production to wall clock time.
//!
//! Sources that aren't backed by hardware (simulated input, file playback)
//! would otherwise produce as fast as the CPU allows.
use std::time::{Duration, Instant};

use crate::Float;

/// Never hand out more than this many seconds of samples at once.
const MAX_BURST: f64 = 0.05;

/// Sample pacer.
#[derive(Debug)]
pub struct Throttle {
    rate: f64,
    start: Option<Instant>,
    produced: u64,
}

impl Throttle {
    /// Create new pacer, for `rate` samples per second.
    #[must_use]
    pub fn new(rate: Float) -> Self {
        Self {
            rate: rate as f64,
            start: None,
            produced: 0,
        }
    }

    /// Samples per second.
    #[must_use]
    pub fn rate(&self) -> Float {
        self.rate as Float
    }

    /// Change the rate. The clock starts over.
    pub fn set_rate(&mut self, rate: Float) {
        self.rate = rate as f64;
        self.reset();
    }

    /// Start over, as if nothing was produced.
    pub fn reset(&mut self) {
        self.start = None;
        self.produced = 0;
    }

    /// Number of samples that may be produced now.
    ///
    /// The first call starts the clock. If the caller falls far behind
    /// (e.g. the graph was stopped), the clock is restarted instead of
    /// bursting to catch up.
    pub fn allowance(&mut self) -> usize {
        let now = Instant::now();
        let start = *self.start.get_or_insert(now);
        let due = (now.duration_since(start).as_secs_f64() * self.rate) as u64;
        let burst = ((self.rate * MAX_BURST) as u64).max(1);
        let n = due.saturating_sub(self.produced);
        if n > 4 * burst {
            self.start = Some(now);
            self.produced = 0;
            return burst as usize;
        }
        n.min(burst) as usize
    }

    /// Record that `n` samples were produced.
    pub fn produced(&mut self, n: usize) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
        self.produced += n as u64;
    }

    /// Time until at least one more sample is due.
    #[must_use]
    pub fn until_next(&self) -> Duration {
        let Some(start) = self.start else {
            return Duration::ZERO;
        };
        if self.rate <= 0.0 {
            return Duration::from_millis(1);
        }
        let due_at = start + Duration::from_secs_f64((self.produced + 1) as f64 / self.rate);
        due_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn paces() {
        let mut t = Throttle::new(10_000.0);
        assert_eq!(t.allowance(), 0);
        std::thread::sleep(Duration::from_millis(20));
        let n = t.allowance();
        assert!(n >= 150 && n <= 500, "{n}");
        t.produced(n);
        assert!(t.allowance() < 50);
    }

    #[test]
    fn no_catch_up_burst() {
        let mut t = Throttle::new(1000.0);
        t.produced(0);
        std::thread::sleep(Duration::from_millis(300));
        // 300 samples due, but capped to one burst.
        assert_eq!(t.allowance(), 50);
        t.set_rate(2000.0);
        assert_eq!(t.rate(), 2000.0);
        assert_eq!(t.until_next(), Duration::ZERO);
    }
}
/* vim: textwidth=80
 */
