// src/pipeline/metrics.rs
//
// Wall-clock timing per pipeline stage. Each stage is timed with its own
// lap; the total runs from construction.

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StageTimer {
    started_at: Instant,
    lap_started_at: Instant,
}

impl StageTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            lap_started_at: now,
        }
    }

    /// Seconds since the previous lap (or construction); starts the next lap.
    pub fn lap(&mut self, stage: &str) -> f64 {
        let now = Instant::now();
        let secs = seconds(now.duration_since(self.lap_started_at));
        self.lap_started_at = now;
        debug!("⏱  {} took {:.3}s", stage, secs);
        secs
    }

    pub fn total(&self) -> f64 {
        seconds(self.started_at.elapsed())
    }
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_laps_sum_to_at_most_total() {
        let mut timer = StageTimer::new();
        sleep(Duration::from_millis(5));
        let a = timer.lap("first");
        sleep(Duration::from_millis(5));
        let b = timer.lap("second");
        let total = timer.total();

        assert!(a >= 0.005);
        assert!(b >= 0.005);
        assert!(a + b <= total + 1e-9);
    }
}
