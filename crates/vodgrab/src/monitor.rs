// Network health observer. Records request outcomes, derives a health
// score, and answers the concurrency controller's policy questions. This
// component only observes; it never drives anything itself.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Rolling window size.
const WINDOW: usize = 20;

/// One observed request outcome.
#[derive(Debug, Clone, Copy)]
struct RequestSample {
    success: bool,
    duration: Duration,
}

/// Point-in-time health reading.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub health_score: f64,
    pub samples: usize,
}

#[derive(Default)]
pub struct NetworkMonitor {
    window: Mutex<VecDeque<RequestSample>>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request outcome; the oldest sample falls out at capacity.
    pub fn record(&self, success: bool, duration: Duration) {
        let mut window = self.window.lock().unwrap();
        if window.len() >= WINDOW {
            window.pop_front();
        }
        window.push_back(RequestSample { success, duration });
    }

    pub fn success_rate(&self) -> f64 {
        self.snapshot().success_rate
    }

    pub fn avg_response_time(&self) -> Duration {
        Duration::from_millis(self.snapshot().avg_response_ms as u64)
    }

    /// `0.7 * success_rate + 0.3 * rt_score`, where response time only
    /// starts to hurt above 5 s and bottoms out at 10 s.
    pub fn health_score(&self) -> f64 {
        self.snapshot().health_score
    }

    /// Back off: at least 5 samples and (health < 0.6 or success < 0.5).
    pub fn should_reduce(&self) -> bool {
        let s = self.snapshot();
        s.samples >= 5 && (s.health_score < 0.6 || s.success_rate < 0.5)
    }

    /// Ramp up: at least 10 samples, health > 0.8, success > 0.9, avg < 2 s.
    pub fn should_increase(&self) -> bool {
        let s = self.snapshot();
        s.samples >= 10
            && s.health_score > 0.8
            && s.success_rate > 0.9
            && s.avg_response_ms < 2000.0
    }

    pub fn is_poor(&self) -> bool {
        self.snapshot().success_rate < 0.5
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let window = self.window.lock().unwrap();
        let samples = window.len();
        if samples == 0 {
            return HealthSnapshot {
                success_rate: 1.0,
                avg_response_ms: 1000.0,
                health_score: 1.0,
                samples: 0,
            };
        }

        let successes = window.iter().filter(|s| s.success).count();
        let success_rate = successes as f64 / samples as f64;
        let avg_response_ms = window
            .iter()
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .sum::<f64>()
            / samples as f64;

        let rt_score = if avg_response_ms > 5000.0 {
            ((10_000.0 - avg_response_ms) / 10_000.0).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let health_score = 0.7 * success_rate + 0.3 * rt_score;

        HealthSnapshot {
            success_rate,
            avg_response_ms,
            health_score,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(monitor: &NetworkMonitor, successes: usize, failures: usize, ms: u64) {
        for _ in 0..successes {
            monitor.record(true, Duration::from_millis(ms));
        }
        for _ in 0..failures {
            monitor.record(false, Duration::from_millis(ms));
        }
    }

    #[test]
    fn empty_window_is_healthy() {
        let m = NetworkMonitor::new();
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.avg_response_time(), Duration::from_secs(1));
        assert_eq!(m.health_score(), 1.0);
        assert!(!m.should_reduce());
        assert!(!m.should_increase());
        assert!(!m.is_poor());
    }

    #[test]
    fn window_drops_oldest() {
        let m = NetworkMonitor::new();
        fill(&m, 0, WINDOW, 100);
        assert_eq!(m.success_rate(), 0.0);
        // 20 successes push every failure out.
        fill(&m, WINDOW, 0, 100);
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.snapshot().samples, WINDOW);
    }

    #[test]
    fn fast_responses_keep_full_rt_score() {
        let m = NetworkMonitor::new();
        fill(&m, 10, 0, 800);
        let s = m.snapshot();
        assert!((s.health_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn slow_responses_erode_health() {
        let m = NetworkMonitor::new();
        fill(&m, 10, 0, 8000);
        // rt_score = (10000 - 8000) / 10000 = 0.2 → health = 0.7 + 0.06
        let s = m.snapshot();
        assert!((s.health_score - 0.76).abs() < 1e-9);
    }

    #[test]
    fn should_reduce_needs_five_samples() {
        let m = NetworkMonitor::new();
        fill(&m, 0, 4, 100);
        assert!(!m.should_reduce());
        fill(&m, 0, 1, 100);
        assert!(m.should_reduce());
    }

    #[test]
    fn should_increase_on_good_window() {
        let m = NetworkMonitor::new();
        fill(&m, 9, 0, 500);
        assert!(!m.should_increase()); // only 9 samples
        fill(&m, 3, 0, 500);
        assert!(m.should_increase());
    }

    #[test]
    fn slow_but_successful_window_does_not_increase() {
        let m = NetworkMonitor::new();
        fill(&m, 12, 0, 3000);
        assert!(!m.should_increase());
    }

    #[test]
    fn poor_network_detected() {
        let m = NetworkMonitor::new();
        fill(&m, 2, 3, 100);
        assert!(m.is_poor());
        assert!(m.should_reduce());
    }
}
