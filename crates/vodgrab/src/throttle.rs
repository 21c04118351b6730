// Bandwidth throttle: a per-second byte ceiling over the segment body
// stream. Chunks that would overflow the current second sleep off the
// overshoot, then start a fresh window.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct BandwidthThrottle {
    max_bps: Option<u64>,
    window: Mutex<Window>,
}

struct Window {
    started: Instant,
    bytes: u64,
}

impl BandwidthThrottle {
    /// `None` disables throttling entirely. The limit is fixed for the
    /// lifetime of the throttle.
    pub fn new(max_bps: Option<u64>) -> Self {
        Self {
            max_bps,
            window: Mutex::new(Window {
                started: Instant::now(),
                bytes: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_bps.is_some()
    }

    /// Account `n` bytes against the current second, sleeping off any
    /// overshoot before returning.
    pub async fn throttle(&self, n: usize) {
        let Some(max_bps) = self.max_bps else {
            return;
        };

        let sleep_for = {
            let mut window = self.window.lock().await;
            let now = Instant::now();
            if now.duration_since(window.started) >= Duration::from_secs(1) {
                window.started = now;
                window.bytes = 0;
            }
            window.bytes += n as u64;
            if window.bytes > max_bps {
                let overflow = window.bytes - max_bps;
                window.started = now;
                window.bytes = 0;
                Some(Duration::from_secs_f64(overflow as f64 / max_bps as f64))
            } else {
                None
            }
        };

        if let Some(delay) = sleep_for {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn disabled_throttle_is_free() {
        let throttle = BandwidthThrottle::new(None);
        let start = Instant::now();
        throttle.throttle(100_000_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn under_budget_does_not_sleep() {
        let throttle = BandwidthThrottle::new(Some(1000));
        let start = Instant::now();
        throttle.throttle(400).await;
        throttle.throttle(400).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_sleeps_proportionally() {
        let throttle = BandwidthThrottle::new(Some(1000));
        throttle.throttle(800).await;
        let start = Instant::now();
        // 800 + 400 = 1200, overflow 200 → 0.2 s
        throttle.throttle(400).await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_on_second_boundary() {
        let throttle = BandwidthThrottle::new(Some(1000));
        throttle.throttle(900).await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        // Fresh window: 900 more bytes fit without sleeping.
        let start = Instant::now();
        throttle.throttle(900).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
