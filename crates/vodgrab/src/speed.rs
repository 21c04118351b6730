// Throughput estimation and ETA rendering.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Sliding window of smoothed samples.
const WINDOW: usize = 10;
/// EMA weight of the incoming raw sample.
const ALPHA: f64 = 0.3;

#[derive(Default)]
struct Inner {
    window: VecDeque<f64>,
    smoothed: Option<f64>,
}

/// EMA-smoothed bytes/sec estimator.
#[derive(Default)]
pub struct ThroughputEstimator {
    inner: Mutex<Inner>,
}

impl ThroughputEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transfer of `bytes` over `elapsed`.
    pub fn add_sample(&self, bytes: u64, elapsed: Duration) {
        let ms = (elapsed.as_secs_f64() * 1000.0).max(1.0);
        let raw = bytes as f64 * 1000.0 / ms;

        let mut inner = self.inner.lock().unwrap();
        let smoothed = match inner.smoothed {
            Some(prev) => (1.0 - ALPHA) * prev + ALPHA * raw,
            None => raw,
        };
        inner.smoothed = Some(smoothed);
        if inner.window.len() >= WINDOW {
            inner.window.pop_front();
        }
        inner.window.push_back(smoothed);
    }

    /// Mean of the smoothed window; 0.0 when no samples yet.
    pub fn avg_bps(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.window.is_empty() {
            return 0.0;
        }
        inner.window.iter().sum::<f64>() / inner.window.len() as f64
    }

    pub fn eta_seconds(&self, remaining_bytes: u64) -> Option<u64> {
        let bps = self.avg_bps();
        if bps <= 0.0 {
            return None;
        }
        Some((remaining_bytes as f64 / bps).ceil() as u64)
    }

    /// Human-readable ETA for `remaining_bytes`; `"--"` with no estimate.
    pub fn eta(&self, remaining_bytes: u64) -> String {
        match self.eta_seconds(remaining_bytes) {
            Some(secs) => format_eta(secs),
            None => "--".to_owned(),
        }
    }
}

/// `Ns`, `Mm Ss`, or `Hh Mm`.
pub fn format_eta(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Format bytes per second in human-readable form.
pub fn format_bytes_per_sec(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1_000_000_000.0 {
        format!("{:.2} GB/s", bytes_per_sec / 1_000_000_000.0)
    } else if bytes_per_sec >= 1_000_000.0 {
        format!("{:.2} MB/s", bytes_per_sec / 1_000_000.0)
    } else if bytes_per_sec >= 1_000.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1_000.0)
    } else {
        format!("{:.2} B/s", bytes_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_estimator_has_no_estimate() {
        let est = ThroughputEstimator::new();
        assert_eq!(est.avg_bps(), 0.0);
        assert_eq!(est.eta(1_000_000), "--");
        assert!(est.eta_seconds(1).is_none());
    }

    #[test]
    fn first_sample_sets_the_baseline() {
        let est = ThroughputEstimator::new();
        // 1000 bytes in 100 ms = 10_000 B/s
        est.add_sample(1000, Duration::from_millis(100));
        assert!((est.avg_bps() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn ema_dampens_spikes() {
        let est = ThroughputEstimator::new();
        est.add_sample(1000, Duration::from_millis(100)); // 10_000 B/s
        est.add_sample(10_000, Duration::from_millis(100)); // raw 100_000 B/s
        // Second smoothed value: 0.7 * 10_000 + 0.3 * 100_000 = 37_000
        let avg = est.avg_bps();
        assert!((avg - (10_000.0 + 37_000.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn window_is_bounded() {
        let est = ThroughputEstimator::new();
        for _ in 0..50 {
            est.add_sample(1000, Duration::from_millis(100));
        }
        // Steady input converges; window holds the last 10 identical values.
        assert!((est.avg_bps() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn eta_from_throughput() {
        let est = ThroughputEstimator::new();
        est.add_sample(10_000, Duration::from_secs(1)); // 10 KB/s
        assert_eq!(est.eta_seconds(100_000), Some(10));
        assert_eq!(est.eta(100_000), "10s");
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(45), "45s");
        assert_eq!(format_eta(200), "3m 20s");
        assert_eq!(format_eta(4320), "1h 12m");
        assert_eq!(format_eta(3600), "1h 0m");
    }

    #[test]
    fn bytes_per_sec_formats() {
        assert_eq!(format_bytes_per_sec(512.0), "512.00 B/s");
        assert_eq!(format_bytes_per_sec(2_048.0), "2.05 KB/s");
        assert_eq!(format_bytes_per_sec(3_500_000.0), "3.50 MB/s");
        assert_eq!(format_bytes_per_sec(1_200_000_000.0), "1.20 GB/s");
    }
}
