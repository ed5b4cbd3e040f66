//! Transfer progress tracking with smoothed speed and ETA

use std::time::{Duration, Instant};

/// Weight of the newest sample in the speed moving average. The previous
/// estimate keeps the complementary `1.0 - SPEED_EMA_ALPHA`.
pub const SPEED_EMA_ALPHA: f64 = 0.3;

/// Minimum interval between accepted samples; updates arriving faster
/// than this are folded into the next one.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Point-in-time view of a tracked transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub total: Option<u64>,
    /// Completed fraction in `0..=1`, when the total is known.
    pub fraction: Option<f64>,
    /// EMA-smoothed throughput in bytes per second.
    pub speed_bps: f64,
    /// Remaining-time estimate from current throughput.
    pub eta: Option<Duration>,
}

/// Tracks one transfer, smoothing instantaneous speed with an
/// exponential moving average.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: Option<u64>,
    speed_ema: Option<f64>,
    last_bytes: u64,
    last_instant: Instant,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            speed_ema: None,
            last_bytes: 0,
            last_instant: Instant::now(),
        }
    }

    /// Record that `bytes` have been transferred so far.
    ///
    /// Returns a snapshot when enough time has passed since the previous
    /// accepted sample, `None` otherwise.
    pub fn update(&mut self, bytes: u64) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_instant);
        if elapsed < MIN_SAMPLE_INTERVAL && self.speed_ema.is_some() {
            return None;
        }

        let delta = bytes.saturating_sub(self.last_bytes);
        #[allow(clippy::cast_precision_loss)]
        let instantaneous = if elapsed.as_secs_f64() > 0.0 {
            delta as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let smoothed = match self.speed_ema {
            Some(prev) => SPEED_EMA_ALPHA * instantaneous + (1.0 - SPEED_EMA_ALPHA) * prev,
            None => instantaneous,
        };
        self.speed_ema = Some(smoothed);
        self.last_bytes = bytes;
        self.last_instant = now;

        Some(self.snapshot(bytes, smoothed))
    }

    /// Final snapshot for a finished transfer, bypassing the sampling
    /// interval.
    #[must_use]
    pub fn finish(&self, bytes: u64) -> ProgressSnapshot {
        self.snapshot(bytes, self.speed_ema.unwrap_or(0.0))
    }

    fn snapshot(&self, bytes: u64, speed_bps: f64) -> ProgressSnapshot {
        #[allow(clippy::cast_precision_loss)]
        let fraction = self.total.filter(|total| *total > 0).map(|total| {
            (bytes as f64 / total as f64).clamp(0.0, 1.0)
        });
        let eta = self.total.and_then(|total| {
            let remaining = total.saturating_sub(bytes);
            if speed_bps > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                Some(Duration::from_secs_f64(remaining as f64 / speed_bps))
            } else {
                None
            }
        });
        ProgressSnapshot {
            bytes,
            total: self.total,
            fraction,
            speed_bps,
            eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut tracker = ProgressTracker::new(Some(1000));
        let snap = tracker.update(100).expect("first sample always reports");
        assert_eq!(snap.bytes, 100);
        assert_eq!(snap.fraction, Some(0.1));
    }

    #[test]
    fn fraction_clamps_at_one() {
        let tracker = ProgressTracker::new(Some(100));
        let snap = tracker.finish(150);
        assert_eq!(snap.fraction, Some(1.0));
    }

    #[test]
    fn unknown_total_has_no_fraction_or_eta() {
        let mut tracker = ProgressTracker::new(None);
        let snap = tracker.update(42).expect("first sample always reports");
        assert_eq!(snap.fraction, None);
        assert_eq!(snap.eta, None);
    }

    #[test]
    fn ema_blends_old_and_new_speed() {
        // Two synthetic samples through the private path: seed, then blend.
        let mut tracker = ProgressTracker::new(None);
        tracker.speed_ema = Some(1000.0);
        tracker.last_bytes = 0;
        tracker.last_instant = Instant::now() - Duration::from_secs(1);
        let snap = tracker.update(2000).expect("interval elapsed");
        // new ~2000 B/s blended as 0.3*new + 0.7*old
        assert!(snap.speed_bps > 1000.0 && snap.speed_bps < 2000.0);
    }
}
